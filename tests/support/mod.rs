#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use formula_context::error::{HostError, NetworkError};
use formula_context::host::{
    CellValue, HostDiagnostics, MemorySheet, MemoryWorkbook, NamedRangeInfo, PivotTableInfo,
    RangeBounds, SheetChange, TableInfo, WorkbookHost, WorksheetInfo,
};
use formula_context::network::{HttpRequest, HttpResponse, HttpTransport};
use parking_lot::Mutex;
use tempfile::tempdir;
use tokio::sync::broadcast;
use tokio::time::Instant;
use umya_spreadsheet::{self, Spreadsheet};

// =============================================================================
// Workbook fixtures
// =============================================================================

pub fn build_workbook<F>(f: F) -> PathBuf
where
    F: FnOnce(&mut Spreadsheet),
{
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("fixture.xlsx");
    write_workbook_to_path(&path, f);
    std::mem::forget(tmp);
    path
}

pub fn write_workbook_to_path<F>(path: &Path, f: F)
where
    F: FnOnce(&mut Spreadsheet),
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create dir");
    }
    let mut book = umya_spreadsheet::new_file();
    f(&mut book);
    umya_spreadsheet::writer::xlsx::write(&book, path).expect("write workbook");
}

/// `Sales` with a single header row (`Date`, `Units Sold`) over four data rows.
pub fn sales_sheet() -> MemorySheet {
    MemorySheet::new("Sales").with_rows(vec![
        vec![CellValue::from("Date"), CellValue::from("Units Sold")],
        vec![CellValue::from("2024-01-01"), CellValue::from(12.0)],
        vec![CellValue::from("2024-01-02"), CellValue::from(7.0)],
        vec![CellValue::from("2024-01-03"), CellValue::from(3.0)],
        vec![CellValue::from("2024-01-04"), CellValue::from(9.0)],
    ])
}

pub fn sales_workbook() -> MemoryWorkbook {
    MemoryWorkbook::new()
        .with_sheet(sales_sheet())
        .with_diagnostics(HostDiagnostics {
            host: "memory".to_string(),
            platform: "test".to_string(),
            version: "16.0".to_string(),
            build: "1".to_string(),
        })
}

// =============================================================================
// Host wrappers
// =============================================================================

/// Delegates to an inner workbook with optional latency and a sheet whose
/// used range cannot be read.
pub struct ScriptedHost {
    inner: Arc<MemoryWorkbook>,
    latency: Duration,
    broken_sheet: Mutex<Option<String>>,
}

impl ScriptedHost {
    pub fn new(inner: Arc<MemoryWorkbook>) -> Self {
        Self {
            inner,
            latency: Duration::ZERO,
            broken_sheet: Mutex::new(None),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn break_sheet(&self, sheet: &str) {
        *self.broken_sheet.lock() = Some(sheet.to_string());
    }

    pub fn repair(&self) {
        *self.broken_sheet.lock() = None;
    }

    pub fn inner(&self) -> &Arc<MemoryWorkbook> {
        &self.inner
    }
}

#[async_trait]
impl WorkbookHost for ScriptedHost {
    async fn worksheets(&self) -> Result<Vec<WorksheetInfo>, HostError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.inner.worksheets().await
    }

    async fn used_range(&self, sheet: &str) -> Result<Option<RangeBounds>, HostError> {
        if self.broken_sheet.lock().as_deref() == Some(sheet) {
            return Err(HostError::query("getUsedRange", "range is locked"));
        }
        self.inner.used_range(sheet).await
    }

    async fn read_values(
        &self,
        sheet: &str,
        bounds: RangeBounds,
    ) -> Result<Vec<Vec<CellValue>>, HostError> {
        self.inner.read_values(sheet, bounds).await
    }

    async fn tables(&self, sheet: &str) -> Result<Vec<TableInfo>, HostError> {
        self.inner.tables(sheet).await
    }

    async fn pivot_tables(&self, sheet: &str) -> Result<Vec<PivotTableInfo>, HostError> {
        self.inner.pivot_tables(sheet).await
    }

    async fn named_ranges(&self) -> Result<Vec<NamedRangeInfo>, HostError> {
        self.inner.named_ranges().await
    }

    fn subscribe_changes(&self) -> Option<broadcast::Receiver<SheetChange>> {
        self.inner.subscribe_changes()
    }

    fn diagnostics(&self) -> HostDiagnostics {
        self.inner.diagnostics()
    }
}

// =============================================================================
// HTTP transport
// =============================================================================

#[derive(Debug, Clone)]
pub enum Step {
    Respond { status: u16, body: String },
    Fail(NetworkError),
    /// Never completes; only the client timeout ends the attempt
    Hang,
}

impl Step {
    pub fn ok(body: impl Into<String>) -> Self {
        Step::Respond {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Step::Respond {
            status,
            body: String::new(),
        }
    }

    pub fn transport(message: &str) -> Self {
        Step::Fail(NetworkError::Transport(message.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub at: Instant,
    pub url: String,
    pub body: Option<serde_json::Value>,
}

/// Plays back a fixed script of outcomes and records every call it sees.
/// Once the script runs out every call gets `fallback`.
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Self {
        Self::with_fallback(steps, Step::ok("{}"))
    }

    /// Answers every call with `step`.
    pub fn always(step: Step) -> Self {
        Self::with_fallback(Vec::new(), step)
    }

    pub fn with_fallback(steps: Vec<Step>, fallback: Step) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Gaps between consecutive calls.
    pub fn gaps(&self) -> Vec<Duration> {
        self.calls
            .lock()
            .windows(2)
            .map(|pair| pair[1].at - pair[0].at)
            .collect()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        self.calls.lock().push(RecordedCall {
            at: Instant::now(),
            url: request.url.clone(),
            body: request.body.clone(),
        });
        let step = self
            .steps
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Respond { status, body } => Ok(HttpResponse { status, body }),
            Step::Fail(error) => Err(error),
            Step::Hang => std::future::pending().await,
        }
    }
}
