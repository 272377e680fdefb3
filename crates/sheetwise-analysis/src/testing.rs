//! In-memory collaborators for tests
//!
//! Available to this crate's unit tests and, with the `test-util` feature, to
//! integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sheetwise_providers::{CompletionRequest, CompletionService, ProviderError};
use tokio::sync::Semaphore;

use crate::row_source::{Cell, CellUpdate, Column, Row, RowSource, RowSourceError, RowWriteOutcome};

type Responder = dyn Fn(&CompletionRequest, usize) -> Result<String, ProviderError> + Send + Sync;

/// Completion service answering from a closure
///
/// The closure receives the request and the zero-based call number.
pub struct ScriptedCompletion {
    responder: Box<Responder>,
    calls: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedCompletion {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&CompletionRequest, usize) -> Result<String, ProviderError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
            delay: None,
            gate: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn constant(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_, _| Ok(text.clone()))
    }

    /// Sleep this long inside every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every call consumes one permit of `gate` before answering
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Requests received so far, in arrival order
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Highest number of calls that were in progress at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlightGuard(&self.in_flight);

        let index = {
            let mut calls = self.calls.lock();
            calls.push(request.clone());
            calls.len() - 1
        };

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        (self.responder)(&request, index)
    }
}

/// Decrements the in-flight counter even when a call is dropped by a timeout
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct SheetData {
    columns: Vec<Column>,
    rows: Vec<Row>,
}

/// Row source backed by a map of sheets
#[derive(Default)]
pub struct InMemoryRowSource {
    sheets: Mutex<HashMap<String, SheetData>>,
    bulk_calls: Mutex<Vec<Vec<CellUpdate>>>,
    fail_writes: Mutex<bool>,
    reject_rows: Mutex<HashSet<String>>,
    fail_fetches: Mutex<bool>,
    sheet_fetches: AtomicUsize,
    id_fetches: Mutex<Vec<Vec<String>>>,
}

impl InMemoryRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sheet; columns are `(id, title)` pairs
    pub fn add_sheet(&self, sheet_id: &str, columns: &[(&str, &str)]) {
        let columns = columns
            .iter()
            .map(|(id, title)| Column {
                id: id.to_string(),
                title: title.to_string(),
            })
            .collect();
        self.sheets.lock().insert(
            sheet_id.to_string(),
            SheetData {
                columns,
                rows: Vec::new(),
            },
        );
    }

    /// Append a row; values are `(column_id, value)` pairs
    pub fn add_row(&self, sheet_id: &str, row_id: &str, values: &[(&str, &str)]) {
        let cells = values
            .iter()
            .map(|(column_id, value)| Cell {
                column_id: column_id.to_string(),
                value: Some(value.to_string()),
            })
            .collect();
        if let Some(sheet) = self.sheets.lock().get_mut(sheet_id) {
            sheet.rows.push(Row {
                id: row_id.to_string(),
                cells,
            });
        }
    }

    pub fn cell(&self, sheet_id: &str, row_id: &str, column_id: &str) -> Option<String> {
        let sheets = self.sheets.lock();
        sheets
            .get(sheet_id)?
            .rows
            .iter()
            .find(|r| r.id == row_id)?
            .value(column_id)
            .map(str::to_string)
    }

    /// Every bulk update call received, in order
    pub fn bulk_calls(&self) -> Vec<Vec<CellUpdate>> {
        self.bulk_calls.lock().clone()
    }

    /// Number of whole-sheet row fetches
    pub fn sheet_fetches(&self) -> usize {
        self.sheet_fetches.load(Ordering::SeqCst)
    }

    /// Ids requested by every by-id fetch, in order
    pub fn id_fetches(&self) -> Vec<Vec<String>> {
        self.id_fetches.lock().clone()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }

    pub fn set_fail_fetches(&self, fail: bool) {
        *self.fail_fetches.lock() = fail;
    }

    /// Report a per-row write failure for this row
    pub fn reject_row(&self, row_id: &str) {
        self.reject_rows.lock().insert(row_id.to_string());
    }
}

#[async_trait]
impl RowSource for InMemoryRowSource {
    async fn fetch_schema(&self, sheet_id: &str) -> Result<Vec<Column>, RowSourceError> {
        self.sheets
            .lock()
            .get(sheet_id)
            .map(|s| s.columns.clone())
            .ok_or_else(|| RowSourceError::SheetNotFound(sheet_id.to_string()))
    }

    async fn fetch_rows(&self, sheet_id: &str) -> Result<Vec<Row>, RowSourceError> {
        self.sheet_fetches.fetch_add(1, Ordering::SeqCst);
        if *self.fail_fetches.lock() {
            return Err(RowSourceError::Request("fetch refused".to_string()));
        }
        self.sheets
            .lock()
            .get(sheet_id)
            .map(|s| s.rows.clone())
            .ok_or_else(|| RowSourceError::SheetNotFound(sheet_id.to_string()))
    }

    async fn fetch_rows_by_id(
        &self,
        sheet_id: &str,
        row_ids: &[String],
    ) -> Result<Vec<Row>, RowSourceError> {
        self.id_fetches.lock().push(row_ids.to_vec());
        if *self.fail_fetches.lock() {
            return Err(RowSourceError::Request("fetch refused".to_string()));
        }
        let wanted: HashSet<&str> = row_ids.iter().map(String::as_str).collect();
        let sheets = self.sheets.lock();
        let sheet = sheets
            .get(sheet_id)
            .ok_or_else(|| RowSourceError::SheetNotFound(sheet_id.to_string()))?;
        Ok(sheet
            .rows
            .iter()
            .filter(|row| wanted.contains(row.id.as_str()))
            .cloned()
            .collect())
    }

    async fn bulk_update(
        &self,
        sheet_id: &str,
        updates: Vec<CellUpdate>,
    ) -> Result<Vec<RowWriteOutcome>, RowSourceError> {
        self.bulk_calls.lock().push(updates.clone());
        if *self.fail_writes.lock() {
            return Err(RowSourceError::Write("write refused".to_string()));
        }

        let rejected = self.reject_rows.lock().clone();
        let mut sheets = self.sheets.lock();
        let sheet = sheets
            .get_mut(sheet_id)
            .ok_or_else(|| RowSourceError::SheetNotFound(sheet_id.to_string()))?;

        let mut outcomes = Vec::with_capacity(updates.len());
        for update in updates {
            if rejected.contains(&update.row_id) {
                outcomes.push(RowWriteOutcome::failed(&update.row_id, "row locked"));
                continue;
            }
            let Some(row) = sheet.rows.iter_mut().find(|r| r.id == update.row_id) else {
                outcomes.push(RowWriteOutcome::failed(&update.row_id, "row not found"));
                continue;
            };
            match row.cells.iter_mut().find(|c| c.column_id == update.column_id) {
                Some(cell) => cell.value = Some(update.value.clone()),
                None => row.cells.push(Cell {
                    column_id: update.column_id.clone(),
                    value: Some(update.value.clone()),
                }),
            }
            outcomes.push(RowWriteOutcome::ok(&update.row_id));
        }
        Ok(outcomes)
    }
}
