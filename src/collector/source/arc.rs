//! ZFS ARC (Adaptive Replacement Cache) statistics.

use tracing::{debug, info};

use super::{MetricSource, ReadSummary};
use crate::collector::assemble::{Assembler, Extraction};
use crate::collector::backend::{Backend, BackendKind};
use crate::dispatch::Dispatch;
use crate::error::CounterError;
use crate::sample::{Gauge, Value};

const PLUGIN: &str = "zfs_arc";

/// Optional L2ARC size; missing on some kernel releases.
const L2_SIZE: &str = "l2_size";

const OPERATIONS: &[Extraction] = &[Extraction::derive("deleted", "cache_operation", "deleted")];

/// Only exported through sysctl.
const SYSCTL_OPERATIONS: &[Extraction] = &[
    Extraction::derive("allocated", "cache_operation", "allocated"),
    Extraction::derive("stolen", "cache_operation", "stolen"),
];

const COUNTERS: &[Extraction] = &[
    Extraction::derive("mutex_miss", "mutex_operations", "miss"),
    Extraction::derive("hash_collisions", "hash_collisions", ""),
    Extraction::derive("evict_l2_cached", "cache_eviction", "cached"),
    Extraction::derive("evict_l2_eligible", "cache_eviction", "eligible"),
    Extraction::derive("evict_l2_ineligible", "cache_eviction", "ineligible"),
    Extraction::derive("demand_data_hits", "cache_result", "demand_data-hit"),
    Extraction::derive("demand_metadata_hits", "cache_result", "demand_metadata-hit"),
    Extraction::derive("prefetch_data_hits", "cache_result", "prefetch_data-hit"),
    Extraction::derive("prefetch_metadata_hits", "cache_result", "prefetch_metadata-hit"),
    Extraction::derive("demand_data_misses", "cache_result", "demand_data-miss"),
    Extraction::derive("demand_metadata_misses", "cache_result", "demand_metadata-miss"),
    Extraction::derive("prefetch_data_misses", "cache_result", "prefetch_data-miss"),
    Extraction::derive("prefetch_metadata_misses", "cache_result", "prefetch_metadata-miss"),
];

/// Reads ARC sizes, operation counters, hit ratios and L2 I/O.
pub struct ArcSource<B: Backend> {
    backend: B,
    assembler: Assembler,
    /// Cleared the first time `l2_size` is confirmed absent; never set again.
    l2_size_available: bool,
}

impl<B: Backend> ArcSource<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            assembler: Assembler::new(PLUGIN),
            l2_size_available: true,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn l2_size_available(&self) -> bool {
        self.l2_size_available
    }

    fn read_l2_size(&mut self, dispatch: &dyn Dispatch) -> Result<ReadSummary, CounterError> {
        let mut summary = ReadSummary::default();
        if !self.l2_size_available {
            return Ok(summary);
        }

        match self.backend.get_gauge(L2_SIZE) {
            Ok(size) => {
                self.assembler
                    .assemble_and_dispatch("cache_size", "L2", vec![Value::Gauge(size)], dispatch)?;
                summary.dispatched += 1;
            }
            Err(CounterError::NotFound(_)) => {
                info!("{}: {} not exported by this kernel, no longer reading it", PLUGIN, L2_SIZE);
                self.l2_size_available = false;
                summary.skipped += 1;
            }
            Err(e) if e.is_per_counter() => {
                debug!("{}: skipping {}: {}", PLUGIN, L2_SIZE, e);
                summary.skipped += 1;
            }
            Err(e) => return Err(e),
        }
        Ok(summary)
    }

    /// Missing inputs become `NaN`, which the ratio clamps to 0.
    fn gauge_or_nan(&self, name: &str) -> Result<Gauge, CounterError> {
        match self.backend.get_gauge(name) {
            Ok(v) => Ok(v),
            Err(e) if e.is_per_counter() => {
                debug!("{}: {} unavailable for ratio: {}", PLUGIN, name, e);
                Ok(Gauge::NAN)
            }
            Err(e) => Err(e),
        }
    }

    fn read_l2_io(&self, dispatch: &dyn Dispatch) -> Result<ReadSummary, CounterError> {
        let read = self.backend.get_derive("l2_read_bytes");
        let write = self.backend.get_derive("l2_write_bytes");
        match (read, write) {
            (Ok(read), Ok(write)) => {
                self.assembler.assemble_and_dispatch(
                    "io_octets",
                    "L2",
                    vec![Value::Derive(read), Value::Derive(write)],
                    dispatch,
                )?;
                Ok(ReadSummary {
                    dispatched: 1,
                    skipped: 0,
                })
            }
            (Err(e), _) | (_, Err(e)) => {
                if !e.is_per_counter() {
                    return Err(e);
                }
                debug!("{}: skipping io_octets/L2: {}", PLUGIN, e);
                Ok(ReadSummary {
                    dispatched: 0,
                    skipped: 1,
                })
            }
        }
    }
}

impl<B: Backend> MetricSource for ArcSource<B> {
    fn name(&self) -> &str {
        self.assembler.plugin()
    }

    fn read(&mut self, dispatch: &dyn Dispatch) -> Result<ReadSummary, CounterError> {
        self.backend.refresh()?;

        let mut summary = self.assembler.extract_each(
            &self.backend,
            &[Extraction::gauge("size", "cache_size", "arc")],
            dispatch,
        )?;
        summary.merge(self.read_l2_size(dispatch)?);

        summary.merge(self.assembler.extract_each(&self.backend, OPERATIONS, dispatch)?);
        if self.backend.kind() == BackendKind::OneShotSyscall {
            summary.merge(
                self.assembler
                    .extract_each(&self.backend, SYSCTL_OPERATIONS, dispatch)?,
            );
        }
        summary.merge(self.assembler.extract_each(&self.backend, COUNTERS, dispatch)?);

        let hits = self.gauge_or_nan("hits")?;
        let misses = self.gauge_or_nan("misses")?;
        self.assembler.submit_ratio("arc", hits, misses, dispatch)?;

        let l2_hits = self.gauge_or_nan("l2_hits")?;
        let l2_misses = self.gauge_or_nan("l2_misses")?;
        self.assembler
            .submit_ratio("L2", l2_hits, l2_misses, dispatch)?;
        summary.dispatched += 2;

        summary.merge(self.read_l2_io(dispatch)?);

        debug!(
            "{}: dispatched {} records, skipped {}",
            PLUGIN, summary.dispatched, summary.skipped
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::collector::backend::{CounterFileBackend, KstatBackend, SysctlBackend};
    use crate::collector::kstat::{KstatHandle, NamedValue};
    use crate::collector::mock::{MockFs, MockKstat, MockSysctl, RecordingDispatcher};

    const ARCSTATS: &str = "/proc/spl/kstat/zfs/arcstats";

    fn linux_source(fs: MockFs) -> ArcSource<CounterFileBackend<MockFs>> {
        ArcSource::new(CounterFileBackend::with_value_field(fs, ARCSTATS, 2))
    }

    #[test]
    fn test_read_linux_arcstats() {
        let mut source = linux_source(MockFs::zfs_system());
        let dispatcher = RecordingDispatcher::new();

        let summary = source.read(&dispatcher).unwrap();
        assert_eq!(
            summary,
            ReadSummary {
                dispatched: 18,
                skipped: 1
            }
        );

        let size = dispatcher.find("cache_size", "arc").unwrap();
        assert_eq!(size.plugin, "zfs_arc");
        assert_eq!(size.values, vec![Value::Gauge(2147483648.0)]);

        let ratio = dispatcher.find("cache_ratio", "arc").unwrap();
        assert_eq!(ratio.values, vec![Value::Gauge(0.9)]);

        let l2_ratio = dispatcher.find("cache_ratio", "L2").unwrap();
        assert!(l2_ratio.values[0].as_f64().is_nan());

        let hit = dispatcher.find("cache_result", "demand_data-hit").unwrap();
        assert_eq!(hit.values, vec![Value::Derive(4000)]);
        assert!(dispatcher.find("hash_collisions", "").is_some());
        assert!(dispatcher.find("cache_operation", "allocated").is_none());

        let io = dispatcher.find("io_octets", "L2").unwrap();
        assert_eq!(io.values, vec![Value::Derive(0), Value::Derive(0)]);
    }

    #[test]
    fn test_l2_size_disabled_once_absent() {
        let sysctl = MockSysctl::freebsd_arcstats();
        let backend = SysctlBackend::new(sysctl.clone(), "kstat.zfs.misc.arcstats.");
        let mut source = ArcSource::new(backend);
        let dispatcher = RecordingDispatcher::new();

        let summary = source.read(&dispatcher).unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(!source.l2_size_available());

        // Even once it reappears, the counter stays disabled.
        sysctl.set("kstat.zfs.misc.arcstats.l2_size", 1024);
        assert_eq!(source.backend().get_gauge("l2_size").unwrap(), 1024.0);

        dispatcher.clear();
        let summary = source.read(&dispatcher).unwrap();
        assert_eq!(summary.skipped, 0);
        assert!(dispatcher.find("cache_size", "L2").is_none());
    }

    #[test]
    fn test_l2_size_dispatched_when_present() {
        let kstat = MockKstat::zfs_arcstats();
        kstat.set_value("zfs", 0, "arcstats", "l2_size", NamedValue::UInt64(1 << 30));
        let handle = Arc::new(KstatHandle::new(kstat.opener()));
        let mut source = ArcSource::new(KstatBackend::new(handle, "zfs", 0, "arcstats"));
        let dispatcher = RecordingDispatcher::new();

        let summary = source.read(&dispatcher).unwrap();
        assert_eq!(summary.skipped, 0);
        assert!(source.l2_size_available());
        assert_eq!(
            dispatcher.find("cache_size", "L2").unwrap().values,
            vec![Value::Gauge(1073741824.0)]
        );
    }

    #[test]
    fn test_sysctl_adds_operations() {
        let backend = SysctlBackend::new(MockSysctl::freebsd_arcstats(), "kstat.zfs.misc.arcstats.");
        let mut source = ArcSource::new(backend);
        let dispatcher = RecordingDispatcher::new();

        let summary = source.read(&dispatcher).unwrap();
        assert_eq!(summary.dispatched, 20);
        assert_eq!(
            dispatcher.find("cache_operation", "stolen").unwrap().values,
            vec![Value::Derive(60)]
        );
    }

    #[test]
    fn test_syscall_failure_skips_one_counter() {
        let sysctl = MockSysctl::freebsd_arcstats();
        sysctl.fail_with("kstat.zfs.misc.arcstats.mutex_miss", 12);
        let mut source = ArcSource::new(SysctlBackend::new(sysctl, "kstat.zfs.misc.arcstats."));
        let dispatcher = RecordingDispatcher::new();

        let summary = source.read(&dispatcher).unwrap();
        assert_eq!(
            summary,
            ReadSummary {
                dispatched: 19,
                skipped: 2
            }
        );
        assert!(dispatcher.find("mutex_operations", "miss").is_none());
        assert!(dispatcher.find("hash_collisions", "").is_some());
        assert_eq!(
            dispatcher.find("cache_ratio", "arc").unwrap().values,
            vec![Value::Gauge(0.9)]
        );
        assert!(!source.l2_size_available());
    }

    #[test]
    fn test_syscall_failure_on_ratio_input() {
        let sysctl = MockSysctl::freebsd_arcstats();
        sysctl.fail_with("kstat.zfs.misc.arcstats.misses", 1);
        sysctl.fail_with("kstat.zfs.misc.arcstats.l2_read_bytes", 12);
        let mut source = ArcSource::new(SysctlBackend::new(sysctl, "kstat.zfs.misc.arcstats."));
        let dispatcher = RecordingDispatcher::new();

        source.read(&dispatcher).unwrap();
        assert_eq!(
            dispatcher.find("cache_ratio", "arc").unwrap().values,
            vec![Value::Gauge(1.0)]
        );
        assert!(dispatcher.find("io_octets", "L2").is_none());
    }

    #[test]
    fn test_missing_io_counter_skips_io_octets() {
        let sysctl = MockSysctl::freebsd_arcstats();
        sysctl.remove("kstat.zfs.misc.arcstats.l2_write_bytes");
        let mut source = ArcSource::new(SysctlBackend::new(sysctl, "kstat.zfs.misc.arcstats."));
        let dispatcher = RecordingDispatcher::new();

        source.read(&dispatcher).unwrap();
        assert!(dispatcher.find("io_octets", "L2").is_none());
    }

    #[test]
    fn test_missing_hits_clamps_ratio() {
        let sysctl = MockSysctl::freebsd_arcstats();
        sysctl.remove("kstat.zfs.misc.arcstats.hits");
        let mut source = ArcSource::new(SysctlBackend::new(sysctl, "kstat.zfs.misc.arcstats."));
        let dispatcher = RecordingDispatcher::new();

        source.read(&dispatcher).unwrap();
        assert_eq!(
            dispatcher.find("cache_ratio", "arc").unwrap().values,
            vec![Value::Gauge(0.0)]
        );
    }

    #[test]
    fn test_refresh_failure_dispatches_nothing() {
        let mut source = linux_source(MockFs::typical_system());
        let dispatcher = RecordingDispatcher::new();

        let err = source.read(&dispatcher).unwrap_err();
        assert!(err.is_transient());
        assert!(dispatcher.is_empty());
        assert!(source.l2_size_available());
    }

    #[test]
    fn test_kstat_fatal_open() {
        let kstat = MockKstat::zfs_arcstats();
        kstat.set_fail_open(true);
        let handle = Arc::new(KstatHandle::new(kstat.opener()));
        let mut source = ArcSource::new(KstatBackend::new(handle, "zfs", 0, "arcstats"));
        let dispatcher = RecordingDispatcher::new();

        assert!(matches!(
            source.read(&dispatcher),
            Err(CounterError::Fatal(_))
        ));
        assert!(dispatcher.is_empty());
    }
}
