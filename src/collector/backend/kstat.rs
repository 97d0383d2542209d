//! kstat backend: one named record read through the shared handle.

use std::sync::Arc;

use tracing::{debug, error};

use super::{Backend, BackendKind};
use crate::collector::kstat::{
    KstatCtl, KstatHandle, KstatId, KstatRecord, KstatRef, extract_derive, extract_gauge,
};
use crate::error::CounterError;
use crate::sample::{Derive, Gauge};

/// Reads counters from a single named kstat, e.g. `zfs:0:arcstats`.
pub struct KstatBackend<K: KstatCtl> {
    handle: Arc<KstatHandle<K>>,
    id: KstatId,
    kref: Option<KstatRef>,
    record: Option<KstatRecord>,
}

impl<K: KstatCtl> KstatBackend<K> {
    pub fn new(handle: Arc<KstatHandle<K>>, module: &str, instance: i32, name: &str) -> Self {
        Self {
            handle,
            id: KstatId::new(module, instance, name),
            kref: None,
            record: None,
        }
    }

    /// Returns a record reference valid for the handle's current chain.
    fn current_ref(&mut self) -> Result<KstatRef, CounterError> {
        let chain_id = self.handle.chain_id();
        if let Some(kref) = &self.kref
            && kref.chain_id == chain_id
        {
            return Ok(kref.clone());
        }

        let kref = self
            .handle
            .lookup(&self.id.module, self.id.instance, &self.id.name)
            .ok_or_else(|| {
                error!("Cannot find {} kstat", self.id);
                CounterError::NotFound(self.id.to_string())
            })?;
        debug!("kstat: resolved {} in chain {}", self.id, kref.chain_id);
        self.kref = Some(kref.clone());
        Ok(kref)
    }

    fn read_record(&mut self) -> Result<KstatRecord, CounterError> {
        let kref = self.current_ref()?;
        match self.handle.read(&kref) {
            Err(CounterError::Stale) => {
                // Another source moved the chain on between lookup and read.
                self.kref = None;
                let kref = self.current_ref()?;
                self.handle.read(&kref)
            }
            other => other,
        }
    }

    fn snapshot(&self) -> Result<&KstatRecord, CounterError> {
        self.record.as_ref().ok_or(CounterError::NotInitialized)
    }
}

impl<K: KstatCtl> Backend for KstatBackend<K> {
    fn kind(&self) -> BackendKind {
        BackendKind::KernelStats
    }

    fn refresh(&mut self) -> Result<(), CounterError> {
        let mut chain_changed = false;
        let refreshed = self.handle.refresh(Some(&mut |_| chain_changed = true));
        if chain_changed {
            self.kref = None;
        }

        match refreshed.and_then(|()| self.read_record()) {
            Ok(record) => {
                self.record = Some(record);
                Ok(())
            }
            Err(e) => {
                self.record = None;
                Err(e)
            }
        }
    }

    fn get_gauge(&self, name: &str) -> Result<Gauge, CounterError> {
        extract_gauge(Some(self.snapshot()?), name)
    }

    fn get_derive(&self, name: &str) -> Result<Derive, CounterError> {
        extract_derive(Some(self.snapshot()?), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::kstat::NamedValue;
    use crate::collector::mock::MockKstat;

    fn arc_backend(kstat: &MockKstat) -> KstatBackend<MockKstat> {
        let handle = Arc::new(KstatHandle::new(kstat.opener()));
        KstatBackend::new(handle, "zfs", 0, "arcstats")
    }

    #[test]
    fn test_refresh_and_extract() {
        let kstat = MockKstat::zfs_arcstats();
        let mut backend = arc_backend(&kstat);

        assert_eq!(backend.get_gauge("size"), Err(CounterError::NotInitialized));
        backend.refresh().unwrap();

        assert_eq!(backend.get_gauge("size").unwrap(), 2147483648.0);
        assert_eq!(backend.get_derive("hits").unwrap(), 9000);
        assert!(matches!(
            backend.get_derive("l2_size"),
            Err(CounterError::NotFound(_))
        ));
    }

    #[test]
    fn test_missing_record_fails_refresh() {
        let kstat = MockKstat::new();
        let mut backend = arc_backend(&kstat);
        assert!(matches!(
            backend.refresh(),
            Err(CounterError::NotFound(_))
        ));
    }

    #[test]
    fn test_open_failure_clears_snapshot() {
        let kstat = MockKstat::zfs_arcstats();
        kstat.set_fail_open(true);
        let mut backend = arc_backend(&kstat);

        assert!(matches!(backend.refresh(), Err(CounterError::Fatal(_))));
        assert_eq!(backend.get_gauge("size"), Err(CounterError::NotInitialized));
    }

    #[test]
    fn test_removed_record_clears_snapshot() {
        let kstat = MockKstat::zfs_arcstats();
        let mut backend = arc_backend(&kstat);
        backend.refresh().unwrap();
        assert_eq!(backend.get_derive("hits").unwrap(), 9000);

        kstat.remove("zfs", 0, "arcstats");

        assert!(matches!(
            backend.refresh(),
            Err(CounterError::NotFound(_))
        ));
        assert_eq!(backend.get_derive("hits"), Err(CounterError::NotInitialized));
    }

    #[test]
    fn test_shared_handle_between_backends() {
        let kstat = MockKstat::zfs_arcstats();
        kstat.add_named(
            "unix",
            0,
            "system_pages",
            &[("pagesfree", NamedValue::UInt64(100))],
        );
        let handle = Arc::new(KstatHandle::new(kstat.opener()));
        let mut arc = KstatBackend::new(Arc::clone(&handle), "zfs", 0, "arcstats");
        let mut pages = KstatBackend::new(Arc::clone(&handle), "unix", 0, "system_pages");

        arc.refresh().unwrap();
        pages.refresh().unwrap();

        assert_eq!(kstat.open_calls(), 1);
        assert_eq!(kstat.update_calls(), 1);
        assert_eq!(pages.get_gauge("pagesfree").unwrap(), 100.0);
    }

    #[test]
    fn test_values_change_between_reads() {
        let kstat = MockKstat::zfs_arcstats();
        let mut backend = arc_backend(&kstat);
        backend.refresh().unwrap();

        kstat.set_value("zfs", 0, "arcstats", "hits", NamedValue::UInt64(9500));
        backend.refresh().unwrap();
        assert_eq!(backend.get_derive("hits").unwrap(), 9500);
        assert_eq!(kstat.read_calls(), 2);
    }
}
