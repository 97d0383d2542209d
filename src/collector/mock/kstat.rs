//! In-memory kstat facility for testing without libkstat.

use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::collector::kstat::{ChainId, KstatCtl, KstatId, KstatRecord, NamedStat, NamedValue};

#[derive(Debug, Default)]
struct MockKstatState {
    /// Latest chain generation "in the kernel".
    chain_id: ChainId,
    /// Generation the connection has seen.
    reported_chain_id: ChainId,
    records: BTreeMap<KstatId, KstatRecord>,
    fail_open: bool,
    fail_update: bool,
    open_calls: usize,
    update_calls: usize,
    read_calls: usize,
}

/// Shared in-memory kstat chain.
///
/// Clones share state, so a test can keep one clone to mutate the chain and
/// inspect call counters while a `KstatHandle` owns another.
#[derive(Debug, Clone)]
pub struct MockKstat {
    inner: Arc<Mutex<MockKstatState>>,
}

impl Default for MockKstat {
    fn default() -> Self {
        Self::new()
    }
}

impl MockKstat {
    /// Creates an empty chain at generation 1.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockKstatState {
                chain_id: 1,
                reported_chain_id: 1,
                ..MockKstatState::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockKstatState> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Returns an opener for `KstatHandle::new` that connects to this chain.
    pub fn opener(&self) -> impl Fn() -> io::Result<MockKstat> + Send + Sync + 'static {
        let kstat = self.clone();
        move || {
            let mut state = kstat.state();
            state.open_calls += 1;
            if state.fail_open {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "cannot open /dev/kstat",
                ));
            }
            drop(state);
            Ok(kstat.clone())
        }
    }

    /// Adds (or replaces) a named record.
    pub fn add_named(&self, module: &str, instance: i32, name: &str, stats: &[(&str, NamedValue)]) {
        let record = KstatRecord::named(
            stats
                .iter()
                .map(|(n, v)| NamedStat {
                    name: n.to_string(),
                    value: *v,
                })
                .collect(),
        );
        self.state()
            .records
            .insert(KstatId::new(module, instance, name), record);
    }

    /// Sets one field of an existing named record.
    pub fn set_value(&self, module: &str, instance: i32, name: &str, field: &str, value: NamedValue) {
        let mut state = self.state();
        if let Some(record) = state.records.get_mut(&KstatId::new(module, instance, name)) {
            match record.named.iter_mut().find(|s| s.name == field) {
                Some(stat) => stat.value = value,
                None => record.named.push(NamedStat {
                    name: field.to_string(),
                    value,
                }),
            }
        }
    }

    /// Removes a record from the chain.
    pub fn remove(&self, module: &str, instance: i32, name: &str) {
        self.state()
            .records
            .remove(&KstatId::new(module, instance, name));
    }

    /// Simulates the kernel adding or removing a kstat.
    pub fn bump_chain(&self) {
        self.state().chain_id += 1;
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state().fail_open = fail;
    }

    pub fn set_fail_update(&self, fail: bool) {
        self.state().fail_update = fail;
    }

    pub fn open_calls(&self) -> usize {
        self.state().open_calls
    }

    pub fn update_calls(&self) -> usize {
        self.state().update_calls
    }

    pub fn read_calls(&self) -> usize {
        self.state().read_calls
    }
}

impl KstatCtl for MockKstat {
    fn chain_id(&self) -> ChainId {
        self.state().reported_chain_id
    }

    fn chain_update(&mut self) -> io::Result<Option<ChainId>> {
        let mut state = self.state();
        state.update_calls += 1;
        if state.fail_update {
            return Err(io::Error::other("kstat chain update failed"));
        }
        if state.reported_chain_id == state.chain_id {
            return Ok(None);
        }
        state.reported_chain_id = state.chain_id;
        Ok(Some(state.chain_id))
    }

    fn contains(&self, id: &KstatId) -> bool {
        self.state().records.contains_key(id)
    }

    fn read(&mut self, id: &KstatId) -> io::Result<KstatRecord> {
        let mut state = self.state();
        state.read_calls += 1;
        state.records.get(id).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("kstat {} not found", id))
        })
    }

    fn ids(&self) -> Vec<KstatId> {
        self.state().records.keys().cloned().collect()
    }
}
