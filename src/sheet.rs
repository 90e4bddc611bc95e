//! Spreadsheet rows as the engine sees them.
//!
//! Cell-level I/O sits behind [`SheetCodec`]. The bundled [`JsonSheetCodec`]
//! stores a sheet as `{"header": [...], "rows": [[...], ...]}`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SheetError;

pub type CellValue = serde_json::Value;

/// Render a cell as identifier text.
pub fn cell_text(value: &CellValue) -> String {
    match value {
        CellValue::Null => String::new(),
        CellValue::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// One data row keyed by (trimmed) column name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    values: BTreeMap<String, CellValue>,
}

impl Row {
    /// Pair cells with the header. Blank header cells are skipped and
    /// missing trailing cells read as null.
    pub fn from_cells(header: &[String], cells: &[CellValue]) -> Self {
        let values = header
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.trim().is_empty())
            .map(|(i, name)| {
                let value = cells.get(i).cloned().unwrap_or(CellValue::Null);
                (name.trim().to_string(), value)
            })
            .collect();
        Self { values }
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.values.get(column.trim())
    }

    /// Identifier under `column`, empty when absent.
    pub fn identifier(&self, column: &str) -> String {
        self.get(column).map(cell_text).unwrap_or_default()
    }

    /// Cells in `header` order, for writing the row back out.
    pub fn to_cells(&self, header: &[String]) -> Vec<CellValue> {
        header
            .iter()
            .map(|name| self.get(name).cloned().unwrap_or(CellValue::Null))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Sheet {
    pub header: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl Sheet {
    pub fn new(header: Vec<String>) -> Self {
        Self {
            header,
            rows: Vec::new(),
        }
    }

    /// Build a sheet carrying `rows` under `header`.
    pub fn from_rows(header: &[String], rows: &[Row]) -> Self {
        Self {
            header: header.to_vec(),
            rows: rows.iter().map(|r| r.to_cells(header)).collect(),
        }
    }

    pub fn records(&self) -> Vec<Row> {
        self.rows
            .iter()
            .map(|cells| Row::from_cells(&self.header, cells))
            .collect()
    }

    pub fn has_column(&self, column: &str) -> bool {
        let column = column.trim();
        self.header.iter().any(|h| h.trim() == column)
    }

    /// Reject sheets the engine cannot work from.
    pub fn validate(&self, identifier_column: &str) -> Result<(), SheetError> {
        if self.header.iter().all(|h| h.trim().is_empty()) {
            return Err(SheetError::MissingHeader);
        }
        if !self.has_column(identifier_column) {
            return Err(SheetError::MissingColumn(identifier_column.to_string()));
        }
        if self.rows.is_empty() {
            return Err(SheetError::NoRows);
        }
        Ok(())
    }
}

#[async_trait]
pub trait SheetCodec: Send + Sync {
    async fn read(&self, path: &Path) -> Result<Sheet, SheetError>;

    /// Durably write `sheet`; on error nothing is left at `path`.
    async fn write(&self, path: &Path, sheet: &Sheet) -> Result<(), SheetError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSheetCodec;

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[async_trait]
impl SheetCodec for JsonSheetCodec {
    async fn read(&self, path: &Path) -> Result<Sheet, SheetError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write(&self, path: &Path, sheet: &Sheet) -> Result<(), SheetError> {
        let bytes = serde_json::to_vec_pretty(sheet)?;
        let staging = staging_path(path);
        let result = async {
            tokio::fs::write(&staging, &bytes).await?;
            tokio::fs::rename(&staging, path).await
        }
        .await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&staging).await;
        }
        Ok(result?)
    }
}
