//! In-memory stand-ins for the kernel interfaces and the dispatcher.
//!
//! These let every backend and source be exercised on any platform: `MockFs`
//! replaces `/proc`, `MockKstat` replaces libkstat, `MockSysctl` replaces
//! `sysctlbyname(3)` and `RecordingDispatcher` captures dispatched records.

mod dispatch;
mod filesystem;
mod kstat;
mod scenarios;
mod sysctl;

pub use dispatch::RecordingDispatcher;
pub use filesystem::MockFs;
pub use kstat::MockKstat;
pub use sysctl::MockSysctl;
