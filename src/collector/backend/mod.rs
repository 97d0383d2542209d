//! Uniform `refresh / get_gauge / get_derive` surface over the counter
//! backends.
//!
//! Exactly one backend is used per build target (see `collector::native`):
//!
//! | Backend              | Source                                 | State            |
//! |----------------------|----------------------------------------|------------------|
//! | `KstatBackend`       | kstat chain (illumos, Solaris)          | shared handle    |
//! | `CounterFileBackend` | text snapshot file (Linux `/proc`)      | `CounterStore`   |
//! | `SysctlBackend`      | `sysctlbyname(3)` namespace (FreeBSD)   | none             |

mod file;
mod kstat;
mod sysctl;

pub use file::CounterFileBackend;
pub use kstat::KstatBackend;
#[cfg(target_os = "freebsd")]
pub use sysctl::RealSysctl;
pub use sysctl::{SysctlBackend, SysctlReader};

use crate::error::CounterError;
use crate::sample::{Derive, Gauge, Value, ValueKind};

/// Which family of backend is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    KernelStats,
    CounterFile,
    OneShotSyscall,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::KernelStats => write!(f, "kstat"),
            BackendKind::CounterFile => write!(f, "counter file"),
            BackendKind::OneShotSyscall => write!(f, "sysctl"),
        }
    }
}

/// A source of named counters.
///
/// `refresh` is called once per read cycle; every `get_*` call in that cycle
/// reads from the resulting snapshot. Getters return `NotInitialized` until a
/// refresh has succeeded.
pub trait Backend: Send {
    fn kind(&self) -> BackendKind;

    /// Takes a new snapshot of the counters.
    fn refresh(&mut self) -> Result<(), CounterError>;

    fn get_gauge(&self, name: &str) -> Result<Gauge, CounterError>;

    fn get_derive(&self, name: &str) -> Result<Derive, CounterError>;

    /// Reads `name` as the requested kind.
    fn get_value(&self, name: &str, kind: ValueKind) -> Result<Value, CounterError> {
        match kind {
            ValueKind::Gauge => self.get_gauge(name).map(Value::Gauge),
            ValueKind::Derive => self.get_derive(name).map(Value::Derive),
        }
    }
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn kind(&self) -> BackendKind {
        (**self).kind()
    }

    fn refresh(&mut self) -> Result<(), CounterError> {
        (**self).refresh()
    }

    fn get_gauge(&self, name: &str) -> Result<Gauge, CounterError> {
        (**self).get_gauge(name)
    }

    fn get_derive(&self, name: &str) -> Result<Derive, CounterError> {
        (**self).get_derive(name)
    }
}
