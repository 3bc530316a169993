//! The semantic map: ordered section markers and `name = expression` lines.

use crate::host::SheetVisibility;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A column, table column or named range paired with the expression that
/// locates its data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub normalized_name: String,
    pub source_expression: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MapLine {
    Sheet {
        name: String,
        visibility: SheetVisibility,
    },
    Table {
        name: String,
    },
    PivotSource {
        name: String,
    },
    NamedRange {
        name: String,
    },
    Descriptor(ColumnDescriptor),
}

impl fmt::Display for MapLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapLine::Sheet { name, visibility } => match visibility {
                SheetVisibility::Visible => write!(f, "Sheet: {name}"),
                hidden => write!(f, "Sheet: {name} ({hidden})"),
            },
            MapLine::Table { name } => write!(f, "Table: {name}"),
            MapLine::PivotSource { name } => write!(f, "PivotSource: {name}"),
            MapLine::NamedRange { name } => write!(f, "NamedRange: {name}"),
            MapLine::Descriptor(descriptor) => write!(
                f,
                "{} = {}",
                descriptor.normalized_name, descriptor.source_expression
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticMap {
    lines: Vec<MapLine>,
}

impl SemanticMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: MapLine) {
        self.lines.push(line);
    }

    pub(crate) fn push_descriptor(
        &mut self,
        normalized_name: String,
        source_expression: impl Into<String>,
    ) {
        self.lines.push(MapLine::Descriptor(ColumnDescriptor {
            normalized_name,
            source_expression: source_expression.into(),
        }));
    }

    pub fn lines(&self) -> &[MapLine] {
        &self.lines
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.lines.iter().filter_map(|line| match line {
            MapLine::Descriptor(descriptor) => Some(descriptor),
            _ => None,
        })
    }

    pub fn descriptor(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.descriptors().find(|d| d.normalized_name == name)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines joined by `\n`, the form sent to the generation service.
    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SemanticMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{line}")?;
        }
        Ok(())
    }
}
