//! Interface to the tabular data store

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a row source
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RowSourceError {
    #[error("Sheet not found: {0}")]
    SheetNotFound(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Write failed: {0}")]
    Write(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub column_id: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub id: String,
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn value(&self, column_id: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|c| c.column_id == column_id)
            .and_then(|c| c.value.as_deref())
    }

    /// Non-empty values of `source_columns`, in that order, joined by a space
    pub fn content(&self, source_columns: &[String]) -> String {
        source_columns
            .iter()
            .filter_map(|column| self.value(column))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One cell write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellUpdate {
    pub row_id: String,
    pub column_id: String,
    pub value: String,
}

/// Per-row result of a bulk update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowWriteOutcome {
    pub row_id: String,
    pub error: Option<String>,
}

impl RowWriteOutcome {
    pub fn ok(row_id: impl Into<String>) -> Self {
        Self {
            row_id: row_id.into(),
            error: None,
        }
    }

    pub fn failed(row_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            row_id: row_id.into(),
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Tabular data source the analysis reads from and writes back to
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn fetch_schema(&self, sheet_id: &str) -> Result<Vec<Column>, RowSourceError>;

    /// Every row of the sheet; only used when a job names no rows
    async fn fetch_rows(&self, sheet_id: &str) -> Result<Vec<Row>, RowSourceError>;

    /// Rows with the given ids; unknown ids are omitted
    ///
    /// Called once per batch, so implementations should request just these
    /// rows from the backing store rather than the whole sheet.
    async fn fetch_rows_by_id(
        &self,
        sheet_id: &str,
        row_ids: &[String],
    ) -> Result<Vec<Row>, RowSourceError>;

    /// Apply cell writes, reporting any per-row failures
    async fn bulk_update(
        &self,
        sheet_id: &str,
        updates: Vec<CellUpdate>,
    ) -> Result<Vec<RowWriteOutcome>, RowSourceError>;
}

/// Find a column by id, falling back to a title match
pub fn resolve_column<'a>(columns: &'a [Column], name: &str) -> Option<&'a Column> {
    columns
        .iter()
        .find(|c| c.id == name)
        .or_else(|| columns.iter().find(|c| c.title == name))
}
