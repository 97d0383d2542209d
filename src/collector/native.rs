//! Backend selection for the build target.
//!
//! | Target            | Backend            | ARC counters                     | Memory layout   |
//! |-------------------|--------------------|----------------------------------|-----------------|
//! | illumos, Solaris  | kstat              | `zfs:0:arcstats`                 | `SystemPages`   |
//! | FreeBSD           | sysctl             | `kstat.zfs.misc.arcstats.*`      | `VmStats`       |
//! | everything else   | counter file       | `/proc/spl/kstat/zfs/arcstats`   | `ProcMeminfo`   |

use std::path::PathBuf;

use super::backend::{Backend, BackendKind};
use super::source::{ArcSource, MemoryLayout, MemoryOptions, MemorySource};
use crate::error::CounterError;

/// Where the counter-file backend finds its files.
///
/// Ignored on targets without a counter-file backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativePaths {
    pub proc_path: PathBuf,
    pub arcstats_path: PathBuf,
}

impl Default for NativePaths {
    fn default() -> Self {
        Self {
            proc_path: PathBuf::from("/proc"),
            arcstats_path: PathBuf::from("/proc/spl/kstat/zfs/arcstats"),
        }
    }
}

/// Builds the ZFS ARC source for this target.
pub fn arc_source(paths: &NativePaths) -> ArcSource<Box<dyn Backend>> {
    ArcSource::new(imp::arc_backend(paths))
}

/// Builds the memory source for this target.
pub fn memory_source(
    paths: &NativePaths,
    options: MemoryOptions,
) -> Result<MemorySource<Box<dyn Backend>>, CounterError> {
    let (backend, layout) = imp::memory_backend(paths)?;
    Ok(MemorySource::new(backend, layout, options))
}

/// Backend family compiled into this build.
pub fn backend_kind() -> BackendKind {
    imp::KIND
}

#[cfg(any(target_os = "illumos", target_os = "solaris"))]
mod imp {
    use std::ffi::c_int;

    use super::*;
    use crate::collector::backend::KstatBackend;
    use crate::collector::kstat::shared;

    pub const KIND: BackendKind = BackendKind::KernelStats;

    unsafe extern "C" {
        fn getpagesize() -> c_int;
    }

    pub fn arc_backend(_paths: &NativePaths) -> Box<dyn Backend> {
        Box::new(KstatBackend::new(shared(), "zfs", 0, "arcstats"))
    }

    pub fn memory_backend(
        _paths: &NativePaths,
    ) -> Result<(Box<dyn Backend>, MemoryLayout), CounterError> {
        // SAFETY: getpagesize has no preconditions.
        let page_size = unsafe { getpagesize() };
        if page_size <= 0 {
            return Err(CounterError::Fatal(format!("invalid page size: {}", page_size)));
        }
        let backend = KstatBackend::new(shared(), "unix", 0, "system_pages");
        Ok((
            Box::new(backend),
            MemoryLayout::SystemPages {
                page_size: page_size as f64,
            },
        ))
    }
}

#[cfg(target_os = "freebsd")]
mod imp {
    use super::*;
    use crate::collector::backend::{RealSysctl, SysctlBackend};

    pub const KIND: BackendKind = BackendKind::OneShotSyscall;

    pub fn arc_backend(_paths: &NativePaths) -> Box<dyn Backend> {
        Box::new(SysctlBackend::new(RealSysctl, "kstat.zfs.misc.arcstats."))
    }

    pub fn memory_backend(
        _paths: &NativePaths,
    ) -> Result<(Box<dyn Backend>, MemoryLayout), CounterError> {
        Ok((Box::new(SysctlBackend::new(RealSysctl, "")), MemoryLayout::VmStats))
    }
}

#[cfg(not(any(
    target_os = "illumos",
    target_os = "solaris",
    target_os = "freebsd"
)))]
mod imp {
    use super::*;
    use crate::collector::backend::CounterFileBackend;
    use crate::collector::traits::RealFs;

    pub const KIND: BackendKind = BackendKind::CounterFile;

    pub fn arc_backend(paths: &NativePaths) -> Box<dyn Backend> {
        Box::new(CounterFileBackend::with_value_field(
            RealFs::new(),
            paths.arcstats_path.clone(),
            2,
        ))
    }

    pub fn memory_backend(
        paths: &NativePaths,
    ) -> Result<(Box<dyn Backend>, MemoryLayout), CounterError> {
        let backend = CounterFileBackend::new(RealFs::new(), paths.proc_path.join("meminfo"));
        Ok((Box::new(backend), MemoryLayout::ProcMeminfo))
    }
}
