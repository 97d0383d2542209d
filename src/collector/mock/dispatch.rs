//! Dispatcher that keeps every record for later inspection.

use std::sync::{Mutex, MutexGuard};

use crate::dispatch::{Dispatch, DispatchError};
use crate::sample::DispatchRecord;

#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    records: Mutex<Vec<DispatchRecord>>,
    fail: Mutex<bool>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following dispatch fail.
    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(|p| p.into_inner()) = fail;
    }

    fn guard(&self) -> MutexGuard<'_, Vec<DispatchRecord>> {
        self.records.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn records(&self) -> Vec<DispatchRecord> {
        self.guard().clone()
    }

    /// Records whose `type/type_instance` matches.
    pub fn find(&self, type_: &str, type_instance: &str) -> Option<DispatchRecord> {
        self.guard()
            .iter()
            .find(|r| r.type_ == type_ && r.type_instance == type_instance)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    pub fn clear(&self) {
        self.guard().clear();
    }
}

impl Dispatch for RecordingDispatcher {
    fn dispatch(&self, record: &DispatchRecord) -> Result<(), DispatchError> {
        if *self.fail.lock().unwrap_or_else(|p| p.into_inner()) {
            return Err(DispatchError::new("dispatcher rejected record"));
        }
        self.guard().push(record.clone());
        Ok(())
    }
}
