//! Structural queries against a spreadsheet host.
//!
//! The builder only ever talks to a [`WorkbookHost`]. Each method resolves one
//! batch of properties; whatever batching the host does internally is hidden
//! behind the returned future.

mod memory;
mod xlsx;

pub use memory::{MemorySheet, MemoryWorkbook};
pub use xlsx::XlsxWorkbook;

use crate::error::HostError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SheetVisibility {
    #[default]
    Visible,
    Hidden,
    #[serde(alias = "very_hidden", alias = "veryHidden")]
    VeryHidden,
}

impl fmt::Display for SheetVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetVisibility::Visible => write!(f, "visible"),
            SheetVisibility::Hidden => write!(f, "hidden"),
            SheetVisibility::VeryHidden => write!(f, "veryhidden"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorksheetInfo {
    pub name: String,
    #[serde(default)]
    pub visibility: SheetVisibility,
}

/// A rectangle of cells, 0-based origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeBounds {
    pub row_index: u32,
    pub column_index: u32,
    pub row_count: u32,
    pub column_count: u32,
}

impl RangeBounds {
    pub fn new(row_index: u32, column_index: u32, row_count: u32, column_count: u32) -> Self {
        Self {
            row_index,
            column_index,
            row_count,
            column_count,
        }
    }

    /// 0-based index of the last row; only meaningful when `row_count > 0`.
    pub fn last_row_index(&self) -> u32 {
        (self.row_index + self.row_count).saturating_sub(1)
    }

    pub fn last_column_index(&self) -> u32 {
        (self.column_index + self.column_count).saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0 || self.column_count == 0
    }

    pub fn contains(&self, row: u32, column: u32) -> bool {
        !self.is_empty()
            && row >= self.row_index
            && row <= self.last_row_index()
            && column >= self.column_index
            && column <= self.last_column_index()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Bool(bool),
    Number(f64),
    Text(String),
    #[default]
    Empty,
}

impl CellValue {
    /// Cell rendered as text; blank cells become an empty string.
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(text) => text.clone(),
            CellValue::Number(number) => number.to_string(),
            CellValue::Bool(flag) => flag.to_string(),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(text) => text.is_empty(),
            _ => false,
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(value.to_string())
        }
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::from(value.as_str())
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub name: String,
    #[serde(default)]
    pub header_values: Vec<CellValue>,
    #[serde(default)]
    pub body: Option<RangeBounds>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotTableInfo {
    pub name: String,
}

/// A workbook-scoped name and the address it resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRangeInfo {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDiagnostics {
    pub host: String,
    pub platform: String,
    pub version: String,
    pub build: String,
}

impl Default for HostDiagnostics {
    fn default() -> Self {
        Self {
            host: "unknown".to_string(),
            platform: "unknown".to_string(),
            version: "unknown".to_string(),
            build: "n/a".to_string(),
        }
    }
}

/// Notification that a sheet's contents or structure changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetChange {
    pub sheet: String,
}

#[async_trait]
pub trait WorkbookHost: Send + Sync {
    /// Worksheets in host order.
    async fn worksheets(&self) -> Result<Vec<WorksheetInfo>, HostError>;

    /// Bounds of the used range, `None` when the sheet holds no data.
    async fn used_range(&self, sheet: &str) -> Result<Option<RangeBounds>, HostError>;

    /// Values of `bounds` as rows of cells. Every row has `column_count` entries.
    async fn read_values(
        &self,
        sheet: &str,
        bounds: RangeBounds,
    ) -> Result<Vec<Vec<CellValue>>, HostError>;

    async fn tables(&self, sheet: &str) -> Result<Vec<TableInfo>, HostError>;

    async fn pivot_tables(&self, sheet: &str) -> Result<Vec<PivotTableInfo>, HostError>;

    async fn named_ranges(&self) -> Result<Vec<NamedRangeInfo>, HostError>;

    /// Stream of sheet change notifications, if the host supports them.
    fn subscribe_changes(&self) -> Option<broadcast::Receiver<SheetChange>> {
        None
    }

    fn diagnostics(&self) -> HostDiagnostics {
        HostDiagnostics::default()
    }
}
