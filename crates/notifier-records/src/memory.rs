//! In-memory record source.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use notifier_core::{QueryError, Record, RecordSource, validate_month_day};

/// Record source holding a fixed set of records per month/day.
#[derive(Default)]
pub struct StaticRecordSource {
    records: HashMap<(u32, u32), Vec<Record>>,
    queries: AtomicUsize,
    closed: AtomicBool,
}

impl StaticRecordSource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record for a month/day, after any already there.
    #[must_use]
    pub fn with_record(mut self, month: u32, day: u32, record: Record) -> Self {
        self.records.entry((month, day)).or_default().push(record);
        self
    }

    /// Number of queries served.
    #[must_use]
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSource for StaticRecordSource {
    async fn records_for_date(&self, month: u32, day: u32) -> Result<Vec<Record>, QueryError> {
        validate_month_day(month, day)?;
        if self.is_closed() {
            return Err(QueryError::Database("record source is closed".to_string()));
        }
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.get(&(month, day)).cloned().unwrap_or_default())
    }

    async fn close(&self) -> Result<(), QueryError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
