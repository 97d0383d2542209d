//! Counter-file backend: rebuilds a `CounterStore` from a text file.

use std::path::PathBuf;

use super::{Backend, BackendKind};
use crate::collector::counters::CounterStore;
use crate::collector::traits::FileSystem;
use crate::error::CounterError;
use crate::sample::{Derive, Gauge};

/// Reads counters from a snapshot file such as `/proc/meminfo`.
pub struct CounterFileBackend<F: FileSystem> {
    fs: F,
    path: PathBuf,
    store: CounterStore,
}

impl<F: FileSystem> CounterFileBackend<F> {
    /// Creates a backend for `key value ...` files.
    pub fn new(fs: F, path: impl Into<PathBuf>) -> Self {
        Self::with_value_field(fs, path, 1)
    }

    /// Creates a backend reading values from a later field, e.g. field 2 for
    /// ZFS `arcstats` (`name type data`).
    pub fn with_value_field(fs: F, path: impl Into<PathBuf>, value_field: usize) -> Self {
        Self {
            fs,
            path: path.into(),
            store: CounterStore::with_value_field(value_field),
        }
    }

    /// Returns `true` if the snapshot file currently exists.
    pub fn is_available(&self) -> bool {
        self.fs.exists(&self.path)
    }

    fn populated(&self) -> Result<&CounterStore, CounterError> {
        if self.store.generation() == 0 {
            return Err(CounterError::NotInitialized);
        }
        Ok(&self.store)
    }
}

impl<F: FileSystem> Backend for CounterFileBackend<F> {
    fn kind(&self) -> BackendKind {
        BackendKind::CounterFile
    }

    fn refresh(&mut self) -> Result<(), CounterError> {
        let content = self.fs.read_to_string(&self.path).map_err(|e| {
            CounterError::TransientUnavailable(format!("{}: {}", self.path.display(), e))
        })?;
        self.store.rebuild_from(content.as_bytes())
    }

    fn get_gauge(&self, name: &str) -> Result<Gauge, CounterError> {
        self.populated()?.get_gauge(name)
    }

    fn get_derive(&self, name: &str) -> Result<Derive, CounterError> {
        self.populated()?.get_derive(name)
    }
}
