//! libkstat binding for illumos and Solaris.

use std::ffi::{CString, c_char, c_int, c_uint, c_void};
use std::io;
use std::ptr::{self, NonNull};
use std::sync::{Arc, OnceLock};

use super::{ChainId, KstatCtl, KstatHandle, KstatId, KstatKind, KstatRecord, NamedStat, NamedValue};

const KSTAT_STRLEN: usize = 31;

const KSTAT_DATA_INT32: u8 = 1;
const KSTAT_DATA_UINT32: u8 = 2;
const KSTAT_DATA_INT64: u8 = 3;
const KSTAT_DATA_UINT64: u8 = 4;

/// Public prefix of `kstat_t`; kernel-private fields follow and are never
/// touched here.
#[allow(dead_code)]
#[repr(C)]
struct RawKstat {
    ks_crtime: i64,
    ks_next: *mut RawKstat,
    ks_kid: c_int,
    ks_module: [c_char; KSTAT_STRLEN],
    ks_resv: u8,
    ks_instance: c_int,
    ks_name: [c_char; KSTAT_STRLEN],
    ks_type: u8,
    ks_class: [c_char; KSTAT_STRLEN],
    ks_flags: u8,
    ks_data: *mut c_void,
    ks_ndata: c_uint,
    ks_data_size: usize,
    ks_snaptime: i64,
}

#[allow(dead_code)]
#[repr(C)]
struct RawKstatCtl {
    kc_chain_id: c_int,
    kc_chain: *mut RawKstat,
    kc_kd: c_int,
}

#[allow(dead_code)]
#[repr(C)]
#[derive(Clone, Copy)]
union RawNamedValue {
    c: [c_char; 16],
    i32: i32,
    ui32: u32,
    i64: i64,
    ui64: u64,
}

#[repr(C)]
struct RawNamed {
    name: [c_char; KSTAT_STRLEN],
    data_type: u8,
    value: RawNamedValue,
}

#[link(name = "kstat")]
unsafe extern "C" {
    fn kstat_open() -> *mut RawKstatCtl;
    fn kstat_chain_update(kc: *mut RawKstatCtl) -> c_int;
    fn kstat_lookup(
        kc: *mut RawKstatCtl,
        module: *mut c_char,
        instance: c_int,
        name: *mut c_char,
    ) -> *mut RawKstat;
    fn kstat_read(kc: *mut RawKstatCtl, ksp: *mut RawKstat, buf: *mut c_void) -> c_int;
}

/// Connection to `/dev/kstat` through libkstat.
pub struct LibKstat {
    kc: NonNull<RawKstatCtl>,
}

// SAFETY: the control structure is only used through `KstatHandle`, which
// serializes every call behind its mutex.
unsafe impl Send for LibKstat {}

impl LibKstat {
    pub fn open() -> io::Result<Self> {
        // SAFETY: kstat_open has no preconditions; NULL signals failure.
        let kc = unsafe { kstat_open() };
        NonNull::new(kc)
            .map(|kc| Self { kc })
            .ok_or_else(io::Error::last_os_error)
    }

    fn find(&self, id: &KstatId) -> io::Result<*mut RawKstat> {
        let module = CString::new(id.module.as_str())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let name = CString::new(id.name.as_str())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        // SAFETY: kc is a live control structure; libkstat does not modify the
        // strings despite the non-const prototype.
        let ksp = unsafe {
            kstat_lookup(
                self.kc.as_ptr(),
                module.as_ptr() as *mut c_char,
                id.instance,
                name.as_ptr() as *mut c_char,
            )
        };
        if ksp.is_null() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("kstat {} not found", id),
            ));
        }
        Ok(ksp)
    }
}

fn fixed_str(raw: &[c_char; KSTAT_STRLEN]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn named_value(named: &RawNamed) -> NamedValue {
    // SAFETY: data_type selects the active union member.
    unsafe {
        match named.data_type {
            KSTAT_DATA_INT32 => NamedValue::Int32(named.value.i32),
            KSTAT_DATA_UINT32 => NamedValue::UInt32(named.value.ui32),
            KSTAT_DATA_INT64 => NamedValue::Int64(named.value.i64),
            KSTAT_DATA_UINT64 => NamedValue::UInt64(named.value.ui64),
            _ => NamedValue::Unsupported,
        }
    }
}

impl KstatCtl for LibKstat {
    fn chain_id(&self) -> ChainId {
        // SAFETY: kc stays valid for the life of the process.
        unsafe { (*self.kc.as_ptr()).kc_chain_id }
    }

    fn chain_update(&mut self) -> io::Result<Option<ChainId>> {
        // SAFETY: kc is a live control structure.
        let kid = unsafe { kstat_chain_update(self.kc.as_ptr()) };
        match kid {
            -1 => Err(io::Error::last_os_error()),
            0 => Ok(None),
            kid => Ok(Some(kid)),
        }
    }

    fn contains(&self, id: &KstatId) -> bool {
        self.find(id).is_ok()
    }

    fn read(&mut self, id: &KstatId) -> io::Result<KstatRecord> {
        let ksp = self.find(id)?;

        // SAFETY: ksp came from kstat_lookup on this chain; a NULL buffer makes
        // libkstat snapshot into ks_data.
        if unsafe { kstat_read(self.kc.as_ptr(), ksp, ptr::null_mut()) } == -1 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: kstat_read succeeded, so ks_data holds ks_ndata entries of
        // the layout named by ks_type.
        unsafe {
            let ks = &*ksp;
            let kind = KstatKind::from_raw(ks.ks_type).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, "unknown kstat type")
            })?;
            if kind != KstatKind::Named || ks.ks_data.is_null() {
                return Ok(KstatRecord {
                    kind,
                    named: Vec::new(),
                });
            }

            let entries =
                std::slice::from_raw_parts(ks.ks_data as *const RawNamed, ks.ks_ndata as usize);
            let named = entries
                .iter()
                .map(|n| NamedStat {
                    name: fixed_str(&n.name),
                    value: named_value(n),
                })
                .collect();
            Ok(KstatRecord { kind, named })
        }
    }

    fn ids(&self) -> Vec<KstatId> {
        let mut ids = Vec::new();
        // SAFETY: the chain is a NULL-terminated list owned by kc.
        unsafe {
            let mut ksp = (*self.kc.as_ptr()).kc_chain;
            while let Some(ks) = ksp.as_ref() {
                ids.push(KstatId {
                    module: fixed_str(&ks.ks_module),
                    instance: ks.ks_instance,
                    name: fixed_str(&ks.ks_name),
                });
                ksp = ks.ks_next;
            }
        }
        ids
    }
}

/// Returns the process-wide kstat handle, creating it on first use.
pub fn shared() -> Arc<KstatHandle<LibKstat>> {
    static SHARED: OnceLock<Arc<KstatHandle<LibKstat>>> = OnceLock::new();
    Arc::clone(SHARED.get_or_init(|| Arc::new(KstatHandle::new(LibKstat::open))))
}
