//! Semantic map builder.
//!
//! One build walks the workbook in a fixed order: every sheet (used-range
//! columns, then tables, then pivot markers), then workbook-scoped names. All
//! names are deduplicated through a single [`NameRegistry`] owned by the build.
//! The first failing structural query aborts the whole build.

use crate::error::{BuildError, HostError};
use crate::host::{RangeBounds, WorkbookHost, WorksheetInfo};
use crate::map::{MapLine, SemanticMap};
use crate::names::NameRegistry;
use crate::utils::column_range_address;
use std::time::Instant;
use tracing::{debug, info};

pub const DEFAULT_MAX_ROWS_PER_COLUMN: u32 = 50_000;
pub const DEFAULT_HEADER_ROWS: u32 = 3;

/// Bounds on how much of each sheet a build inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapLimits {
    /// Rows at the top of the used range read as headers
    pub header_rows: u32,
    /// Ceiling on the number of data rows a column range may span
    pub max_rows_per_column: u32,
}

impl Default for MapLimits {
    fn default() -> Self {
        Self {
            header_rows: DEFAULT_HEADER_ROWS,
            max_rows_per_column: DEFAULT_MAX_ROWS_PER_COLUMN,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SemanticMapBuilder {
    limits: MapLimits,
}

impl SemanticMapBuilder {
    pub fn new(limits: MapLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> MapLimits {
        self.limits
    }

    pub async fn build(&self, host: &dyn WorkbookHost) -> Result<SemanticMap, BuildError> {
        let started = Instant::now();
        let mut map = SemanticMap::new();
        let mut registry = NameRegistry::new();

        let sheets = host.worksheets().await?;
        for sheet in &sheets {
            self.build_sheet(host, sheet, &mut map, &mut registry)
                .await
                .map_err(|source| BuildError::Sheet {
                    sheet: sheet.name.clone(),
                    source,
                })?;
        }

        for named in host.named_ranges().await? {
            map.push(MapLine::NamedRange {
                name: named.name.clone(),
            });
            if let Some(name) = registry.claim(&named.name) {
                map.push_descriptor(name, named.address);
            }
        }

        info!(
            sheets = sheets.len(),
            lines = map.len(),
            descriptors = map.descriptors().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "semantic map built"
        );
        Ok(map)
    }

    async fn build_sheet(
        &self,
        host: &dyn WorkbookHost,
        sheet: &WorksheetInfo,
        map: &mut SemanticMap,
        registry: &mut NameRegistry,
    ) -> Result<(), HostError> {
        map.push(MapLine::Sheet {
            name: sheet.name.clone(),
            visibility: sheet.visibility,
        });

        // sheets without a header row and a data row contribute only their marker
        let used = match host.used_range(&sheet.name).await? {
            Some(used) if used.row_count >= 2 && used.column_count > 0 => used,
            used => {
                debug!(sheet = %sheet.name, ?used, "no header and data rows, skipping sheet");
                return Ok(());
            }
        };
        self.push_columns(host, &sheet.name, used, map, registry)
            .await?;

        for table in host.tables(&sheet.name).await? {
            map.push(MapLine::Table {
                name: table.name.clone(),
            });
            for header in &table.header_values {
                let header = header.as_text();
                if header.is_empty() {
                    continue;
                }
                if let Some(name) = registry.claim(&format!("{}.{}", table.name, header)) {
                    map.push_descriptor(name, format!("{}[{}]", table.name, header));
                }
            }
        }

        for pivot in host.pivot_tables(&sheet.name).await? {
            map.push(MapLine::PivotSource { name: pivot.name });
        }

        Ok(())
    }

    async fn push_columns(
        &self,
        host: &dyn WorkbookHost,
        sheet: &str,
        used: RangeBounds,
        map: &mut SemanticMap,
        registry: &mut NameRegistry,
    ) -> Result<(), HostError> {
        let header_rows = self.limits.header_rows.clamp(1, used.row_count);
        let header_block = RangeBounds::new(
            used.row_index,
            used.column_index,
            header_rows,
            used.column_count,
        );
        let headers = host.read_values(sheet, header_block).await?;

        // 1-based rows from here on
        let start_row = used.row_index + header_rows + 1;
        let last_used_row = used.last_row_index() + 1;
        let cap_row = start_row.saturating_add(self.limits.max_rows_per_column.saturating_sub(1));
        let end_row = last_used_row.min(cap_row);
        if end_row < start_row || self.limits.max_rows_per_column == 0 {
            debug!(sheet, start_row, end_row, "no data rows below headers");
            return Ok(());
        }

        for col in 0..used.column_count as usize {
            let texts: Vec<String> = (0..header_rows as usize)
                .map(|r| {
                    headers
                        .get(r)
                        .and_then(|row| row.get(col))
                        .map(|value| value.as_text().trim().to_string())
                        .unwrap_or_default()
                })
                .collect();

            let Some(label) = column_label(&texts) else {
                continue;
            };
            let Some(name) = registry.claim(&label) else {
                continue;
            };

            let column = used.column_index + col as u32 + 1;
            map.push_descriptor(
                name,
                column_range_address(sheet, column, start_row, end_row),
            );
        }

        Ok(())
    }
}

/// Merges a column's header cells (top to bottom, already trimmed) into one label.
///
/// The bottom-most non-empty cell is the primary label. The first non-empty
/// cell above the bottom row that differs from it becomes a single prefix.
pub fn column_label(texts: &[String]) -> Option<String> {
    let primary = texts.iter().rev().find(|text| !text.is_empty())?;
    let upper = &texts[..texts.len().saturating_sub(1)];
    let prefix = upper
        .iter()
        .find(|text| !text.is_empty() && *text != primary);

    Some(match prefix {
        Some(prefix) => format!("{prefix} - {primary}"),
        None => primary.clone(),
    })
}
