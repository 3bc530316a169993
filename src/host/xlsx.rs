use super::{
    CellValue, HostDiagnostics, NamedRangeInfo, PivotTableInfo, RangeBounds, SheetChange,
    SheetVisibility, TableInfo, WorkbookHost, WorksheetInfo,
};
use crate::error::HostError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task;
use tracing::{debug, info};
use umya_spreadsheet::reader::xlsx;
use umya_spreadsheet::{Spreadsheet, Worksheet};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Workbook host backed by an `.xlsx` file on disk.
///
/// The reader does not expose pivot caches, so pivot enumeration is empty.
pub struct XlsxWorkbook {
    path: PathBuf,
    book: Arc<RwLock<Spreadsheet>>,
    changes: broadcast::Sender<SheetChange>,
}

impl XlsxWorkbook {
    pub fn open(path: &Path) -> Result<Self> {
        let book = read_book(path)?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            path: path.to_path_buf(),
            book: Arc::new(RwLock::new(book)),
            changes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the file and reports every sheet as changed.
    pub async fn reload(&self) -> Result<()> {
        let path = self.path.clone();
        let book = task::spawn_blocking(move || read_book(&path)).await??;
        let names: Vec<String> = book
            .get_sheet_collection()
            .iter()
            .map(|sheet| sheet.get_name().to_string())
            .collect();
        *self.book.write() = book;
        info!(path = %self.path.display(), sheets = names.len(), "workbook reloaded");
        for sheet in names {
            let _ = self.changes.send(SheetChange { sheet });
        }
        Ok(())
    }

    fn with_sheet<T>(&self, sheet: &str, f: impl FnOnce(&Worksheet) -> T) -> Result<T, HostError> {
        let book = self.book.read();
        book.get_sheet_by_name(sheet)
            .map(f)
            .ok_or_else(|| HostError::SheetNotFound(sheet.to_string()))
    }
}

fn read_book(path: &Path) -> Result<Spreadsheet> {
    xlsx::read(path).with_context(|| format!("failed to parse workbook {:?}", path))
}

fn visibility_of(sheet: &Worksheet) -> SheetVisibility {
    match sheet.get_sheet_state().to_ascii_lowercase().as_str() {
        "hidden" => SheetVisibility::Hidden,
        "veryhidden" => SheetVisibility::VeryHidden,
        _ => SheetVisibility::Visible,
    }
}

fn cell_value(sheet: &Worksheet, column: u32, row: u32) -> CellValue {
    let Some(cell) = sheet.get_cell((column, row)) else {
        return CellValue::Empty;
    };
    let raw = cell.get_value();
    if raw.is_empty() {
        return CellValue::Empty;
    }
    // text cells keep their exact text even when it looks numeric
    match cell.get_data_type() {
        "n" => raw
            .parse::<f64>()
            .map(CellValue::Number)
            .unwrap_or_else(|_| CellValue::Text(raw.to_string())),
        "b" => CellValue::Bool(raw.eq_ignore_ascii_case("true") || raw == "1"),
        _ => CellValue::Text(raw.to_string()),
    }
}

fn used_bounds(sheet: &Worksheet) -> Option<RangeBounds> {
    let mut extent: Option<(u32, u32, u32, u32)> = None;
    for cell in sheet.get_cell_collection() {
        if cell.get_value().is_empty() {
            continue;
        }
        let coordinate = cell.get_coordinate();
        let (column, row) = (*coordinate.get_col_num(), *coordinate.get_row_num());
        extent = Some(match extent {
            None => (row, column, row, column),
            Some((r0, c0, r1, c1)) => (r0.min(row), c0.min(column), r1.max(row), c1.max(column)),
        });
    }
    // umya coordinates are 1-based
    extent.map(|(r0, c0, r1, c1)| RangeBounds::new(r0 - 1, c0 - 1, r1 - r0 + 1, c1 - c0 + 1))
}

fn table_info(sheet: &Worksheet, table: &umya_spreadsheet::Table) -> TableInfo {
    let (start, end) = table.get_area();
    let (first_column, last_column) = (*start.get_col_num(), *end.get_col_num());
    let (header_row, last_row) = (*start.get_row_num(), *end.get_row_num());

    let header_values = (first_column..=last_column)
        .map(|column| cell_value(sheet, column, header_row))
        .collect();
    let body = (last_row > header_row).then(|| {
        RangeBounds::new(
            header_row,
            first_column - 1,
            last_row - header_row,
            last_column - first_column + 1,
        )
    });

    TableInfo {
        name: table.get_name().to_string(),
        header_values,
        body,
    }
}

#[async_trait]
impl WorkbookHost for XlsxWorkbook {
    async fn worksheets(&self) -> Result<Vec<WorksheetInfo>, HostError> {
        let book = self.book.read();
        Ok(book
            .get_sheet_collection()
            .iter()
            .map(|sheet| WorksheetInfo {
                name: sheet.get_name().to_string(),
                visibility: visibility_of(sheet),
            })
            .collect())
    }

    async fn used_range(&self, sheet: &str) -> Result<Option<RangeBounds>, HostError> {
        self.with_sheet(sheet, used_bounds)
    }

    async fn read_values(
        &self,
        sheet: &str,
        bounds: RangeBounds,
    ) -> Result<Vec<Vec<CellValue>>, HostError> {
        self.with_sheet(sheet, |ws| {
            (bounds.row_index..bounds.row_index + bounds.row_count)
                .map(|row| {
                    (bounds.column_index..bounds.column_index + bounds.column_count)
                        .map(|column| cell_value(ws, column + 1, row + 1))
                        .collect()
                })
                .collect()
        })
    }

    async fn tables(&self, sheet: &str) -> Result<Vec<TableInfo>, HostError> {
        self.with_sheet(sheet, |ws| {
            ws.get_tables()
                .iter()
                .map(|table| table_info(ws, table))
                .collect()
        })
    }

    async fn pivot_tables(&self, sheet: &str) -> Result<Vec<PivotTableInfo>, HostError> {
        self.with_sheet(sheet, |_| Vec::new())
    }

    async fn named_ranges(&self) -> Result<Vec<NamedRangeInfo>, HostError> {
        let book = self.book.read();
        let names = book
            .get_defined_names()
            .iter()
            .filter(|defined| !defined.has_local_sheet_id())
            .map(|defined| NamedRangeInfo {
                name: defined.get_name().to_string(),
                address: defined.get_address(),
            })
            .collect::<Vec<_>>();
        debug!(count = names.len(), "workbook-scoped names resolved");
        Ok(names)
    }

    fn subscribe_changes(&self) -> Option<broadcast::Receiver<SheetChange>> {
        Some(self.changes.subscribe())
    }

    fn diagnostics(&self) -> HostDiagnostics {
        HostDiagnostics {
            host: "xlsx".to_string(),
            platform: std::env::consts::OS.to_string(),
            ..HostDiagnostics::default()
        }
    }
}
