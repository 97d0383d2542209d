//! Counter acquisition for kernel and subsystem statistics.
//!
//! Each metric source refreshes exactly one backend per cycle, extracts a
//! fixed list of named counters and hands the resulting records to a
//! dispatcher. Which backend is used depends on the build target.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         MetricSource                         │
//! │  ┌──────────────────────┐       ┌──────────────────────────┐ │
//! │  │      ArcSource       │       │      MemorySource        │ │
//! │  │  - sticky l2_size    │       │  - MemoryLayout          │ │
//! │  └──────────┬───────────┘       └────────────┬─────────────┘ │
//! │             └──────────────┬─────────────────┘               │
//! │                            │                                 │
//! │                     ┌──────▼──────┐      ┌────────────────┐  │
//! │                     │  Backend    │─────▶│   Assembler    │──┼──▶ Dispatch
//! │                     │  (trait)    │      │ compute_ratio  │  │
//! │                     └──────┬──────┘      └────────────────┘  │
//! └────────────────────────────┼─────────────────────────────────┘
//!                              │
//!              ┌───────────────┼────────────────┐
//!              │               │                │
//!       ┌──────▼──────┐ ┌──────▼───────┐ ┌──────▼──────┐
//!       │KstatBackend │ │ CounterFile  │ │SysctlBackend│
//!       │ KstatHandle │ │ CounterStore │ │ SysctlReader│
//!       │ (illumos)   │ │ FileSystem   │ │ (FreeBSD)   │
//!       └─────────────┘ └──────────────┘ └─────────────┘
//! ```
//!
//! # Usage
//!
//! ## Production
//!
//! ```ignore
//! use counterd::collector::native::{self, NativePaths};
//! use counterd::collector::MetricSource;
//! use counterd::dispatch::JsonLinesDispatcher;
//!
//! let mut source = native::arc_source(&NativePaths::default());
//! source.read(&JsonLinesDispatcher::stdout())?;
//! ```
//!
//! ## Testing (with MockFs)
//!
//! ```
//! use counterd::collector::{ArcSource, CounterFileBackend, MetricSource, MockFs};
//! use counterd::collector::mock::RecordingDispatcher;
//!
//! let fs = MockFs::zfs_system();
//! let backend = CounterFileBackend::with_value_field(fs, "/proc/spl/kstat/zfs/arcstats", 2);
//! let mut source = ArcSource::new(backend);
//! let dispatcher = RecordingDispatcher::new();
//! source.read(&dispatcher).unwrap();
//! assert!(dispatcher.find("cache_ratio", "arc").is_some());
//! ```

pub mod assemble;
pub mod backend;
pub mod counters;
pub mod kstat;
pub mod mock;
pub mod native;
pub mod source;
pub mod traits;

pub use assemble::{Assembler, Extraction, ReadSummary, compute_ratio};
pub use backend::{Backend, BackendKind, CounterFileBackend, KstatBackend, SysctlBackend};
pub use counters::CounterStore;
pub use kstat::KstatHandle;
pub use mock::MockFs;
pub use source::{
    ArcSource, CycleReporter, MemoryLayout, MemoryOptions, MemorySource, MetricSource,
};
pub use traits::{FileSystem, RealFs};
