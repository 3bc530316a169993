use super::{
    CellValue, HostDiagnostics, NamedRangeInfo, PivotTableInfo, RangeBounds, SheetChange,
    SheetVisibility, TableInfo, WorkbookHost, WorksheetInfo,
};
use crate::error::HostError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tokio::sync::broadcast;
use tracing::debug;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// A sheet held in memory. `rows` starts at `(origin_row, origin_column)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySheet {
    pub name: String,
    #[serde(default)]
    pub visibility: SheetVisibility,
    #[serde(default)]
    pub origin_row: u32,
    #[serde(default)]
    pub origin_column: u32,
    #[serde(default)]
    pub rows: Vec<Vec<CellValue>>,
    /// Overrides the used range derived from `rows`
    #[serde(default)]
    pub used_range: Option<RangeBounds>,
    #[serde(default)]
    pub tables: Vec<TableInfo>,
    #[serde(default)]
    pub pivot_tables: Vec<String>,
}

impl MemorySheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_visibility(mut self, visibility: SheetVisibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Places the first row of data at a 0-based row and column.
    pub fn at(mut self, row: u32, column: u32) -> Self {
        self.origin_row = row;
        self.origin_column = column;
        self
    }

    pub fn with_rows<R, V>(mut self, rows: impl IntoIterator<Item = R>) -> Self
    where
        R: IntoIterator<Item = V>,
        V: Into<CellValue>,
    {
        self.rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(Into::into).collect())
            .collect();
        self
    }

    pub fn with_used_range(mut self, bounds: RangeBounds) -> Self {
        self.used_range = Some(bounds);
        self
    }

    pub fn with_table(mut self, table: TableInfo) -> Self {
        self.tables.push(table);
        self
    }

    pub fn with_pivot_table(mut self, name: impl Into<String>) -> Self {
        self.pivot_tables.push(name.into());
        self
    }

    pub fn cell(&self, row: u32, column: u32) -> CellValue {
        if row < self.origin_row || column < self.origin_column {
            return CellValue::Empty;
        }
        self.rows
            .get((row - self.origin_row) as usize)
            .and_then(|cells| cells.get((column - self.origin_column) as usize))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_cell(&mut self, row: u32, column: u32, value: CellValue) {
        if row < self.origin_row || column < self.origin_column {
            self.rebase(row.min(self.origin_row), column.min(self.origin_column));
        }
        let r = (row - self.origin_row) as usize;
        let c = (column - self.origin_column) as usize;
        if self.rows.len() <= r {
            self.rows.resize_with(r + 1, Vec::new);
        }
        let cells = &mut self.rows[r];
        if cells.len() <= c {
            cells.resize(c + 1, CellValue::Empty);
        }
        cells[c] = value;
        self.used_range = None;
    }

    fn rebase(&mut self, row: u32, column: u32) {
        let shift_rows = (self.origin_row - row) as usize;
        let shift_columns = (self.origin_column - column) as usize;
        for cells in &mut self.rows {
            let mut shifted = vec![CellValue::Empty; shift_columns];
            shifted.append(cells);
            *cells = shifted;
        }
        let mut rows = vec![Vec::new(); shift_rows];
        rows.append(&mut self.rows);
        self.rows = rows;
        self.origin_row = row;
        self.origin_column = column;
    }

    /// Tight bounds around non-blank cells, unless overridden.
    pub fn computed_used_range(&self) -> Option<RangeBounds> {
        if let Some(bounds) = self.used_range {
            return (!bounds.is_empty()).then_some(bounds);
        }

        let mut extent: Option<(u32, u32, u32, u32)> = None;
        for (r, cells) in self.rows.iter().enumerate() {
            for (c, value) in cells.iter().enumerate() {
                if value.is_blank() {
                    continue;
                }
                let (row, column) = (self.origin_row + r as u32, self.origin_column + c as u32);
                extent = Some(match extent {
                    None => (row, column, row, column),
                    Some((r0, c0, r1, c1)) => {
                        (r0.min(row), c0.min(column), r1.max(row), c1.max(column))
                    }
                });
            }
        }

        extent.map(|(r0, c0, r1, c1)| RangeBounds::new(r0, c0, r1 - r0 + 1, c1 - c0 + 1))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkbookData {
    #[serde(default)]
    sheets: Vec<MemorySheet>,
    #[serde(default)]
    named_ranges: Vec<NamedRangeInfo>,
    #[serde(default)]
    diagnostics: Option<HostDiagnostics>,
}

/// In-process workbook host. Edits broadcast [`SheetChange`] notifications.
pub struct MemoryWorkbook {
    data: RwLock<WorkbookData>,
    changes: broadcast::Sender<SheetChange>,
}

impl Default for MemoryWorkbook {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWorkbook {
    pub fn new() -> Self {
        Self::from_data(WorkbookData::default())
    }

    fn from_data(data: WorkbookData) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            data: RwLock::new(data),
            changes,
        }
    }

    /// Loads a workbook description from a YAML or JSON file.
    pub fn from_fixture(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read workbook fixture {:?}", path))?;
        let ext = path
            .extension()
            .and_then(|os| os.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        let data: WorkbookData = match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("failed to parse YAML fixture {:?}", path))?,
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse JSON fixture {:?}", path))?,
            other => anyhow::bail!("unsupported fixture extension: {other}"),
        };
        Ok(Self::from_data(data))
    }

    pub fn with_sheet(self, sheet: MemorySheet) -> Self {
        self.data.write().sheets.push(sheet);
        self
    }

    pub fn with_named_range(self, name: impl Into<String>, address: impl Into<String>) -> Self {
        self.data.write().named_ranges.push(NamedRangeInfo {
            name: name.into(),
            address: address.into(),
        });
        self
    }

    pub fn with_diagnostics(self, diagnostics: HostDiagnostics) -> Self {
        self.data.write().diagnostics = Some(diagnostics);
        self
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.data
            .read()
            .sheets
            .iter()
            .map(|sheet| sheet.name.clone())
            .collect()
    }

    /// Writes a cell and notifies subscribers that the sheet changed.
    pub fn set_cell(
        &self,
        sheet: &str,
        row: u32,
        column: u32,
        value: impl Into<CellValue>,
    ) -> Result<(), HostError> {
        {
            let mut data = self.data.write();
            let target = data
                .sheets
                .iter_mut()
                .find(|s| s.name == sheet)
                .ok_or_else(|| HostError::SheetNotFound(sheet.to_string()))?;
            target.set_cell(row, column, value.into());
        }
        self.notify_changed(sheet);
        Ok(())
    }

    pub fn add_sheet(&self, sheet: MemorySheet) {
        let name = sheet.name.clone();
        self.data.write().sheets.push(sheet);
        self.notify_changed(&name);
    }

    pub fn remove_sheet(&self, sheet: &str) -> Result<(), HostError> {
        {
            let mut data = self.data.write();
            let before = data.sheets.len();
            data.sheets.retain(|s| s.name != sheet);
            if data.sheets.len() == before {
                return Err(HostError::SheetNotFound(sheet.to_string()));
            }
        }
        self.notify_changed(sheet);
        Ok(())
    }

    pub fn notify_changed(&self, sheet: &str) {
        // no receivers is fine
        let delivered = self
            .changes
            .send(SheetChange {
                sheet: sheet.to_string(),
            })
            .unwrap_or(0);
        debug!(sheet, receivers = delivered, "sheet change published");
    }

    fn with_sheet_ref<T>(
        &self,
        sheet: &str,
        f: impl FnOnce(&MemorySheet) -> T,
    ) -> Result<T, HostError> {
        let data = self.data.read();
        data.sheets
            .iter()
            .find(|s| s.name == sheet)
            .map(f)
            .ok_or_else(|| HostError::SheetNotFound(sheet.to_string()))
    }
}

#[async_trait]
impl WorkbookHost for MemoryWorkbook {
    async fn worksheets(&self) -> Result<Vec<WorksheetInfo>, HostError> {
        Ok(self
            .data
            .read()
            .sheets
            .iter()
            .map(|sheet| WorksheetInfo {
                name: sheet.name.clone(),
                visibility: sheet.visibility,
            })
            .collect())
    }

    async fn used_range(&self, sheet: &str) -> Result<Option<RangeBounds>, HostError> {
        self.with_sheet_ref(sheet, MemorySheet::computed_used_range)
    }

    async fn read_values(
        &self,
        sheet: &str,
        bounds: RangeBounds,
    ) -> Result<Vec<Vec<CellValue>>, HostError> {
        self.with_sheet_ref(sheet, |s| {
            (bounds.row_index..bounds.row_index + bounds.row_count)
                .map(|row| {
                    (bounds.column_index..bounds.column_index + bounds.column_count)
                        .map(|column| s.cell(row, column))
                        .collect()
                })
                .collect()
        })
    }

    async fn tables(&self, sheet: &str) -> Result<Vec<TableInfo>, HostError> {
        self.with_sheet_ref(sheet, |s| s.tables.clone())
    }

    async fn pivot_tables(&self, sheet: &str) -> Result<Vec<PivotTableInfo>, HostError> {
        self.with_sheet_ref(sheet, |s| {
            s.pivot_tables
                .iter()
                .map(|name| PivotTableInfo { name: name.clone() })
                .collect()
        })
    }

    async fn named_ranges(&self) -> Result<Vec<NamedRangeInfo>, HostError> {
        Ok(self.data.read().named_ranges.clone())
    }

    fn subscribe_changes(&self) -> Option<broadcast::Receiver<SheetChange>> {
        Some(self.changes.subscribe())
    }

    fn diagnostics(&self) -> HostDiagnostics {
        self.data.read().diagnostics.clone().unwrap_or_default()
    }
}
