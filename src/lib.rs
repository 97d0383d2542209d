//! counterd - kernel counter acquisition library.
//!
//! This library provides the pieces used by the `counterd` daemon:
//! - `collector` - backends, metric sources and record assembly
//! - `dispatch` - the record sink contract and a JSON-lines sink
//! - `sample` - typed values and dispatch records

pub mod collector;
pub mod dispatch;
pub mod error;
pub mod sample;

pub use error::CounterError;
