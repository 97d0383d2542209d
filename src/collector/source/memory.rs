//! Physical memory usage.
//!
//! Each platform exposes a different set of counters, so the source is
//! parameterised by a `MemoryLayout` that turns one backend snapshot into a
//! list of `(type_instance, bytes)` pairs.

use tracing::debug;

use super::{MetricSource, ReadSummary};
use crate::collector::assemble::Assembler;
use crate::collector::backend::Backend;
use crate::dispatch::Dispatch;
use crate::error::CounterError;
use crate::sample::Gauge;

const PLUGIN: &str = "memory";

/// How counters map onto memory categories.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MemoryLayout {
    /// Linux `/proc/meminfo`, values in kB.
    ProcMeminfo,
    /// kstat `unix:0:system_pages`, values in pages.
    SystemPages { page_size: Gauge },
    /// FreeBSD `vm.stats.vm.*` sysctls, values in pages.
    VmStats,
}

/// What to dispatch each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryOptions {
    /// Dispatch byte counts under type `memory`.
    pub values_absolute: bool,
    /// Dispatch each category's share under type `percent`.
    pub values_percentage: bool,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            values_absolute: true,
            values_percentage: false,
        }
    }
}

pub struct MemorySource<B: Backend> {
    backend: B,
    layout: MemoryLayout,
    options: MemoryOptions,
    assembler: Assembler,
}

impl<B: Backend> MemorySource<B> {
    pub fn new(backend: B, layout: MemoryLayout, options: MemoryOptions) -> Self {
        Self {
            backend,
            layout,
            options,
            assembler: Assembler::new(PLUGIN),
        }
    }

    pub fn layout(&self) -> MemoryLayout {
        self.layout
    }

    /// Reads a counter that may legitimately be absent.
    fn optional(&self, name: &str) -> Result<Option<Gauge>, CounterError> {
        match self.backend.get_gauge(name) {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_per_counter() => {
                debug!("{}: {} unavailable: {}", PLUGIN, name, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn meminfo(&self) -> Result<Vec<(&'static str, Gauge)>, CounterError> {
        let kb = |name: &str| -> Result<Option<Gauge>, CounterError> {
            Ok(self.optional(name)?.map(|v| v * 1024.0))
        };

        let total = kb("MemTotal")?.unwrap_or(0.0);
        let free = kb("MemFree")?.unwrap_or(0.0);
        let buffered = kb("Buffers")?.unwrap_or(0.0);
        let cached = kb("Cached")?.unwrap_or(0.0);
        let slab = kb("Slab")?.unwrap_or(0.0);
        let slab_recl = kb("SReclaimable")?;
        let slab_unrecl = kb("SUnreclaim")?;

        let accounted = free + buffered + cached + slab;
        if total < accounted {
            return Err(CounterError::Inconsistent(format!(
                "MemTotal {} is smaller than free+buffers+cached+slab {}",
                total, accounted
            )));
        }
        let used = total - accounted;

        if slab_recl.is_some() || slab_unrecl.is_some() {
            Ok(vec![
                ("used", used),
                ("buffered", buffered),
                ("cached", cached),
                ("free", free),
                ("slab_unrecl", slab_unrecl.unwrap_or(0.0)),
                ("slab_recl", slab_recl.unwrap_or(0.0)),
            ])
        } else {
            Ok(vec![
                ("used", used),
                ("buffered", buffered),
                ("cached", cached),
                ("free", free),
                ("slab", slab),
            ])
        }
    }

    fn system_pages(&self, page_size: Gauge) -> Result<Vec<(&'static str, Gauge)>, CounterError> {
        let total = self.backend.get_gauge("pagestotal")?;
        let mut free = self.backend.get_gauge("pagesfree")?;
        let mut locked = self.backend.get_gauge("pageslocked")?;
        let pp_kernel = self.backend.get_gauge("pp_kernel")?;
        let physmem = self.backend.get_gauge("physmem")?;
        let availrmem = self.backend.get_gauge("availrmem")?;

        let unusable = physmem - total;
        let used = if total < free + locked {
            // Seen on hosts with little swap configured.
            debug!("{}: pagestotal is smaller than pagesfree + pageslocked", PLUGIN);
            free = availrmem;
            0.0
        } else {
            total - (free + locked)
        };

        // Kernel pages are included in pageslocked.
        let kernel = if pp_kernel < locked {
            locked -= pp_kernel;
            pp_kernel
        } else {
            let kernel = locked;
            locked = 0.0;
            kernel
        };

        Ok(vec![
            ("used", used * page_size),
            ("free", free * page_size),
            ("locked", locked * page_size),
            ("kernel", kernel * page_size),
            ("unusable", unusable * page_size),
        ])
    }

    fn vm_stats(&self) -> Result<Vec<(&'static str, Gauge)>, CounterError> {
        let read = |name: &str| -> Result<Gauge, CounterError> {
            Ok(self.optional(name)?.unwrap_or(Gauge::NAN))
        };
        let page_size = read("vm.stats.vm.v_page_size")?;
        // NaN page counts stay NaN.
        let pages = |name: &str| -> Result<Gauge, CounterError> { Ok(read(name)? * page_size) };

        Ok(vec![
            ("free", pages("vm.stats.vm.v_free_count")?),
            ("wired", pages("vm.stats.vm.v_wire_count")?),
            ("active", pages("vm.stats.vm.v_active_count")?),
            ("inactive", pages("vm.stats.vm.v_inactive_count")?),
            ("cache", pages("vm.stats.vm.v_cache_count")?),
        ])
    }

    /// Turns the current snapshot into byte counts per category.
    pub fn collect(&self) -> Result<Vec<(&'static str, Gauge)>, CounterError> {
        match self.layout {
            MemoryLayout::ProcMeminfo => self.meminfo(),
            MemoryLayout::SystemPages { page_size } => self.system_pages(page_size),
            MemoryLayout::VmStats => self.vm_stats(),
        }
    }
}

impl<B: Backend> MetricSource for MemorySource<B> {
    fn name(&self) -> &str {
        self.assembler.plugin()
    }

    fn read(&mut self, dispatch: &dyn Dispatch) -> Result<ReadSummary, CounterError> {
        self.backend.refresh()?;
        let entries = self.collect()?;

        let mut summary = ReadSummary::default();
        if self.options.values_absolute {
            summary.dispatched += self
                .assembler
                .dispatch_multivalue("memory", &entries, false, dispatch)?;
        }
        if self.options.values_percentage {
            summary.dispatched += self
                .assembler
                .dispatch_multivalue("memory", &entries, true, dispatch)?;
        }
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
    use crate::sample::Value;

    fn meminfo_source(content: &str, options: MemoryOptions) -> MemorySource<CounterFileBackend<MockFs>> {
        let mut fs = MockFs::new();
        fs.add_file("/proc/meminfo", content);
        MemorySource::new(
            CounterFileBackend::new(fs, "/proc/meminfo"),
            MemoryLayout::ProcMeminfo,
            options,
        )
    }

    fn gauge(dispatcher: &RecordingDispatcher, type_: &str, instance: &str) -> Gauge {
        dispatcher.find(type_, instance).unwrap().values[0].as_f64()
    }

    #[test]
    fn test_meminfo_without_slab_split() {
        let mut source = meminfo_source(
            "MemTotal: 1000 kB\nMemFree: 200 kB\nBuffers: 50 kB\nCached: 100 kB\nSlab: 50 kB\n",
            MemoryOptions::default(),
        );
        let dispatcher = RecordingDispatcher::new();

        let summary = source.read(&dispatcher).unwrap();
        assert_eq!(summary.dispatched, 5);

        assert_eq!(gauge(&dispatcher, "memory", "used"), 600.0 * 1024.0);
        assert_eq!(gauge(&dispatcher, "memory", "buffered"), 50.0 * 1024.0);
        assert_eq!(gauge(&dispatcher, "memory", "cached"), 100.0 * 1024.0);
        assert_eq!(gauge(&dispatcher, "memory", "free"), 200.0 * 1024.0);
        assert_eq!(gauge(&dispatcher, "memory", "slab"), 50.0 * 1024.0);

        let records = dispatcher.records();
        assert!(records.iter().all(|r| r.plugin == "memory"));
        assert!(records.iter().all(|r| r.time == records[0].time));
    }

    #[test]
    fn test_meminfo_detailed_slab() {
        let mut source = MemorySource::new(
            CounterFileBackend::new(MockFs::typical_system(), "/proc/meminfo"),
            MemoryLayout::ProcMeminfo,
            MemoryOptions::default(),
        );
        let dispatcher = RecordingDispatcher::new();

        source.read(&dispatcher).unwrap();
        assert_eq!(dispatcher.len(), 6);
        assert!(dispatcher.find("memory", "slab").is_none());
        assert_eq!(gauge(&dispatcher, "memory", "slab_recl"), 256000.0 * 1024.0);
        assert_eq!(
            gauge(&dispatcher, "memory", "used"),
            (16384000.0 - 8192000.0 - 512000.0 - 2048000.0 - 512000.0) * 1024.0
        );
    }

    #[test]
    fn test_meminfo_inconsistent_total() {
        let mut source = meminfo_source(
            "MemTotal: 100 kB\nMemFree: 200 kB\n",
            MemoryOptions::default(),
        );
        let dispatcher = RecordingDispatcher::new();

        assert!(matches!(
            source.read(&dispatcher),
            Err(CounterError::Inconsistent(_))
        ));
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_percentages_only() {
        let mut source = meminfo_source(
            "MemTotal: 1000 kB\nMemFree: 500 kB\nBuffers: 0 kB\nCached: 250 kB\nSlab: 0 kB\n",
            MemoryOptions {
                values_absolute: false,
                values_percentage: true,
            },
        );
        let dispatcher = RecordingDispatcher::new();

        source.read(&dispatcher).unwrap();
        assert!(dispatcher.records().iter().all(|r| r.type_ == "percent"));
        assert_eq!(gauge(&dispatcher, "percent", "free"), 50.0);
        assert_eq!(gauge(&dispatcher, "percent", "used"), 25.0);
    }

    #[test]
    fn test_system_pages() {
        let kstat = MockKstat::system_pages();
        let handle = Arc::new(KstatHandle::new(kstat.opener()));
        let mut source = MemorySource::new(
            KstatBackend::new(handle, "unix", 0, "system_pages"),
            MemoryLayout::SystemPages { page_size: 4096.0 },
            MemoryOptions::default(),
        );
        let dispatcher = RecordingDispatcher::new();

        source.read(&dispatcher).unwrap();
        assert_eq!(gauge(&dispatcher, "memory", "used"), 500.0 * 4096.0);
        assert_eq!(gauge(&dispatcher, "memory", "free"), 300.0 * 4096.0);
        assert_eq!(gauge(&dispatcher, "memory", "kernel"), 150.0 * 4096.0);
        assert_eq!(gauge(&dispatcher, "memory", "locked"), 50.0 * 4096.0);
        assert_eq!(gauge(&dispatcher, "memory", "unusable"), 100.0 * 4096.0);
    }

    #[test]
    fn test_system_pages_small_swap() {
        let kstat = MockKstat::system_pages();
        kstat.set_value("unix", 0, "system_pages", "pagesfree", NamedValue::UInt64(900));
        let handle = Arc::new(KstatHandle::new(kstat.opener()));
        let mut source = MemorySource::new(
            KstatBackend::new(handle, "unix", 0, "system_pages"),
            MemoryLayout::SystemPages { page_size: 1.0 },
            MemoryOptions::default(),
        );
        let dispatcher = RecordingDispatcher::new();

        source.read(&dispatcher).unwrap();
        assert_eq!(gauge(&dispatcher, "memory", "used"), 0.0);
        assert_eq!(gauge(&dispatcher, "memory", "free"), 400.0);
    }

    #[test]
    fn test_system_pages_missing_field_fails_cycle() {
        let kstat = MockKstat::new();
        kstat.add_named("unix", 0, "system_pages", &[("pagestotal", NamedValue::UInt64(10))]);
        let handle = Arc::new(KstatHandle::new(kstat.opener()));
        let mut source = MemorySource::new(
            KstatBackend::new(handle, "unix", 0, "system_pages"),
            MemoryLayout::SystemPages { page_size: 1.0 },
            MemoryOptions::default(),
        );
        let dispatcher = RecordingDispatcher::new();

        assert!(matches!(
            source.read(&dispatcher),
            Err(CounterError::NotFound(_))
        ));
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_vm_stats() {
        let sysctl = MockSysctl::freebsd_vm();
        sysctl.remove("vm.stats.vm.v_cache_count");
        let mut source = MemorySource::new(
            SysctlBackend::new(sysctl, ""),
            MemoryLayout::VmStats,
            MemoryOptions::default(),
        );
        let dispatcher = RecordingDispatcher::new();

        source.read(&dispatcher).unwrap();
        assert_eq!(dispatcher.len(), 5);
        assert_eq!(
            dispatcher.find("memory", "wired").unwrap().values,
            vec![Value::Gauge(200.0 * 4096.0)]
        );
        assert!(gauge(&dispatcher, "memory", "cache").is_nan());
    }
}
