//! In-memory sysctl namespace.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::collector::backend::SysctlReader;

#[derive(Debug, Default)]
struct MockSysctlState {
    values: HashMap<String, i64>,
    /// Names that fail with a raw OS error instead of returning a value.
    failures: HashMap<String, i32>,
}

/// Shared name-to-integer table; clones see each other's writes.
#[derive(Debug, Clone, Default)]
pub struct MockSysctl {
    inner: Arc<Mutex<MockSysctlState>>,
}

impl MockSysctl {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockSysctlState> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set(&self, name: &str, value: i64) {
        self.state().values.insert(name.to_string(), value);
    }

    pub fn remove(&self, name: &str) {
        self.state().values.remove(name);
    }

    /// Makes reads of `name` fail with the raw OS error `errno`.
    pub fn fail_with(&self, name: &str, errno: i32) {
        self.state().failures.insert(name.to_string(), errno);
    }
}

impl SysctlReader for MockSysctl {
    fn read_i64(&self, name: &str) -> io::Result<i64> {
        let state = self.state();
        if let Some(&errno) = state.failures.get(name) {
            return Err(io::Error::from_raw_os_error(errno));
        }
        state.values.get(name).copied().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("unknown oid '{}'", name))
        })
    }
}
