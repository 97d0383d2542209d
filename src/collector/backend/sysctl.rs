//! One-shot sysctl backend: every getter issues its own system call.

use std::io;

use super::{Backend, BackendKind};
use crate::error::CounterError;
use crate::sample::{Derive, Gauge};

/// Reads integer values from the sysctl namespace.
pub trait SysctlReader: Send {
    fn read_i64(&self, name: &str) -> io::Result<i64>;
}

/// Reads counters by name from `<prefix><name>` sysctls.
///
/// There is no cached state, so getters never see stale data; `refresh` only
/// marks the backend as ready.
pub struct SysctlBackend<S: SysctlReader> {
    reader: S,
    prefix: String,
    refreshed: bool,
}

impl<S: SysctlReader> SysctlBackend<S> {
    pub fn new(reader: S, prefix: impl Into<String>) -> Self {
        Self {
            reader,
            prefix: prefix.into(),
            refreshed: false,
        }
    }

    /// Every getter is its own system call, so a failure only concerns that
    /// one counter and never aborts the cycle.
    fn read(&self, name: &str) -> Result<i64, CounterError> {
        if !self.refreshed {
            return Err(CounterError::NotInitialized);
        }
        let full = format!("{}{}", self.prefix, name);
        self.reader.read_i64(&full).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CounterError::NotFound(full),
            _ => CounterError::InvalidArgument(format!("sysctl {}: {}", full, e)),
        })
    }
}

impl<S: SysctlReader> Backend for SysctlBackend<S> {
    fn kind(&self) -> BackendKind {
        BackendKind::OneShotSyscall
    }

    fn refresh(&mut self) -> Result<(), CounterError> {
        self.refreshed = true;
        Ok(())
    }

    fn get_gauge(&self, name: &str) -> Result<Gauge, CounterError> {
        self.read(name).map(|v| v as Gauge)
    }

    fn get_derive(&self, name: &str) -> Result<Derive, CounterError> {
        self.read(name)
    }
}

/// `sysctlbyname(3)` reader.
#[cfg(target_os = "freebsd")]
#[derive(Debug, Default, Clone, Copy)]
pub struct RealSysctl;

#[cfg(target_os = "freebsd")]
mod ffi {
    use std::ffi::{c_char, c_int, c_void};

    unsafe extern "C" {
        pub fn sysctlbyname(
            name: *const c_char,
            oldp: *mut c_void,
            oldlenp: *mut usize,
            newp: *const c_void,
            newlen: usize,
        ) -> c_int;
    }
}

#[cfg(target_os = "freebsd")]
impl SysctlReader for RealSysctl {
    /// Accepts 4- and 8-byte integer sysctls.
    fn read_i64(&self, name: &str) -> io::Result<i64> {
        let cname = std::ffi::CString::new(name)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut buf = [0u8; 8];
        let mut len = buf.len();

        // SAFETY: buf is writable for `len` bytes and the name is NUL-terminated.
        let status = unsafe {
            ffi::sysctlbyname(
                cname.as_ptr(),
                buf.as_mut_ptr().cast(),
                &mut len,
                std::ptr::null(),
                0,
            )
        };
        if status != 0 {
            return Err(io::Error::last_os_error());
        }

        match len {
            4 => Ok(i32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]) as i64),
            8 => Ok(i64::from_ne_bytes(buf)),
            n => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("sysctl {} returned {} bytes", name, n),
            )),
        }
    }
}
