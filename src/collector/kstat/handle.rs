//! Shared, throttled kstat connection.

use std::io;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tracing::{debug, error, warn};

use super::{ChainId, KstatCtl, KstatId, KstatRecord, KstatRef};
use crate::error::CounterError;

/// Chain updates closer together than this (in seconds) are skipped.
pub const STALENESS_WINDOW_SECS: i64 = 1;

type Opener<K> = Box<dyn Fn() -> io::Result<K> + Send + Sync>;

struct HandleState<K> {
    ctl: Option<K>,
    /// Unix seconds of the last chain update attempt.
    last_update: Option<i64>,
    last_chain_id: ChainId,
    /// Set once any chain update has succeeded.
    has_generation: bool,
}

/// Process-wide kstat connection shared by all metric sources.
///
/// The connection is opened lazily on the first refresh and never closed.
/// All state lives behind one mutex, so concurrent refreshes from different
/// sources cannot interleave the staleness check with the timestamp update.
pub struct KstatHandle<K: KstatCtl> {
    opener: Opener<K>,
    state: Mutex<HandleState<K>>,
}

impl<K: KstatCtl> KstatHandle<K> {
    /// Creates a handle that opens its connection with `opener` on first use.
    pub fn new(opener: impl Fn() -> io::Result<K> + Send + Sync + 'static) -> Self {
        Self {
            opener: Box::new(opener),
            state: Mutex::new(HandleState {
                ctl: None,
                last_update: None,
                last_chain_id: 0,
                has_generation: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HandleState<K>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Brings the chain up to date, at most once per staleness window.
    ///
    /// `on_changed` runs after the lock is released, only when a newer
    /// generation was observed.
    pub fn refresh(&self, on_changed: Option<&mut dyn FnMut(ChainId)>) -> Result<(), CounterError> {
        self.refresh_at(Utc::now().timestamp(), on_changed)
    }

    /// Same as [`refresh`](Self::refresh) with an explicit clock reading.
    pub fn refresh_at(
        &self,
        now: i64,
        on_changed: Option<&mut dyn FnMut(ChainId)>,
    ) -> Result<(), CounterError> {
        let changed = {
            let mut state = self.lock();
            let state = &mut *state;

            if state.ctl.is_none() {
                match (self.opener)() {
                    Ok(ctl) => {
                        debug!("kstat: opened connection");
                        state.ctl = Some(ctl);
                    }
                    Err(e) => {
                        error!("kstat: kstat_open failed: {}", e);
                        return Err(CounterError::Fatal(format!("kstat_open failed: {}", e)));
                    }
                }
            }

            if let Some(last) = state.last_update
                && now - last <= STALENESS_WINDOW_SECS
            {
                return Ok(());
            }

            let Some(ctl) = state.ctl.as_mut() else {
                return Err(CounterError::NotInitialized);
            };
            let result = ctl.chain_update();
            state.last_update = Some(now);

            match result {
                Ok(Some(kid)) if kid > state.last_chain_id => {
                    debug!("kstat: updated chain to ID {}", kid);
                    state.last_chain_id = kid;
                    state.has_generation = true;
                    Some(kid)
                }
                Ok(_) if !state.has_generation => {
                    // First contact with an already-current chain.
                    state.has_generation = true;
                    state.last_chain_id = state.last_chain_id.max(ctl.chain_id());
                    Some(state.last_chain_id)
                }
                Ok(_) => None,
                Err(e) if state.has_generation => {
                    warn!(
                        "kstat: kstat_chain_update failed, keeping chain {}: {}",
                        state.last_chain_id, e
                    );
                    None
                }
                Err(e) => {
                    error!("kstat: kstat_chain_update failed: {}", e);
                    return Err(CounterError::Fatal(format!(
                        "kstat_chain_update failed: {}",
                        e
                    )));
                }
            }
        };

        if let (Some(kid), Some(callback)) = (changed, on_changed) {
            callback(kid);
        }
        Ok(())
    }

    /// Generation id of the last successfully observed chain (0 = none).
    pub fn chain_id(&self) -> ChainId {
        self.lock().last_chain_id
    }

    /// Looks up a record in the current generation. Never refreshes.
    pub fn lookup(&self, module: &str, instance: i32, name: &str) -> Option<KstatRef> {
        let state = self.lock();
        let ctl = state.ctl.as_ref()?;
        let id = KstatId::new(module, instance, name);
        if !ctl.contains(&id) {
            return None;
        }
        Some(KstatRef {
            id,
            chain_id: state.last_chain_id,
        })
    }

    /// Reads the current values of a record.
    ///
    /// Fails with `Stale` if the chain moved on since `kref` was looked up.
    pub fn read(&self, kref: &KstatRef) -> Result<KstatRecord, CounterError> {
        let mut state = self.lock();
        let current = state.last_chain_id;
        let ctl = state.ctl.as_mut().ok_or(CounterError::NotInitialized)?;

        if kref.chain_id != current {
            return Err(CounterError::Stale);
        }

        ctl.read(&kref.id).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CounterError::Stale,
            _ => CounterError::TransientUnavailable(format!("kstat_read {}: {}", kref.id, e)),
        })
    }

    /// Calls `callback` for every record of the current chain, stopping at
    /// the first error and returning it.
    pub fn foreach<F>(&self, mut callback: F) -> Result<(), CounterError>
    where
        F: FnMut(&KstatId) -> Result<(), CounterError>,
    {
        let ids = {
            let state = self.lock();
            let ctl = state.ctl.as_ref().ok_or(CounterError::NotInitialized)?;
            ctl.ids()
        };

        for id in &ids {
            callback(id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::kstat::NamedValue;
    use crate::collector::mock::MockKstat;
    use std::sync::Arc;
    use std::thread;

    const NOW: i64 = 1_700_000_000;

    fn handle_with(kstat: &MockKstat) -> KstatHandle<MockKstat> {
        KstatHandle::new(kstat.opener())
    }

    #[test]
    fn test_refresh_opens_lazily() {
        let kstat = MockKstat::new();
        let handle = handle_with(&kstat);
        assert_eq!(kstat.open_calls(), 0);

        handle.refresh_at(NOW, None).unwrap();
        assert_eq!(kstat.open_calls(), 1);

        handle.refresh_at(NOW + 5, None).unwrap();
        assert_eq!(kstat.open_calls(), 1);
    }

    #[test]
    fn test_open_failure_is_fatal_and_retried_next_cycle() {
        let kstat = MockKstat::new();
        kstat.set_fail_open(true);
        let handle = handle_with(&kstat);

        assert!(matches!(
            handle.refresh_at(NOW, None),
            Err(CounterError::Fatal(_))
        ));

        kstat.set_fail_open(false);
        handle.refresh_at(NOW, None).unwrap();
        assert_eq!(kstat.open_calls(), 2);
    }

    #[test]
    fn test_refresh_throttled_within_window() {
        let kstat = MockKstat::new();
        let handle = handle_with(&kstat);

        handle.refresh_at(NOW, None).unwrap();
        let first_chain = handle.chain_id();
        kstat.bump_chain();

        handle.refresh_at(NOW, None).unwrap();
        handle.refresh_at(NOW + 1, None).unwrap();
        assert_eq!(kstat.update_calls(), 1);
        assert_eq!(handle.chain_id(), first_chain);

        handle.refresh_at(NOW + 2, None).unwrap();
        assert_eq!(kstat.update_calls(), 2);
        assert!(handle.chain_id() > first_chain);
    }

    #[test]
    fn test_on_changed_fires_only_for_new_generation() {
        let kstat = MockKstat::new();
        let handle = handle_with(&kstat);
        let mut seen = Vec::new();

        handle
            .refresh_at(NOW, Some(&mut |kid| seen.push(kid)))
            .unwrap();
        handle
            .refresh_at(NOW + 2, Some(&mut |kid| seen.push(kid)))
            .unwrap();
        kstat.bump_chain();
        handle
            .refresh_at(NOW + 4, Some(&mut |kid| seen.push(kid)))
            .unwrap();

        assert_eq!(seen.len(), 2);
        assert!(seen[1] > seen[0]);
    }

    #[test]
    fn test_first_update_failure_is_fatal() {
        let kstat = MockKstat::new();
        kstat.set_fail_update(true);
        let handle = handle_with(&kstat);

        assert!(matches!(
            handle.refresh_at(NOW, None),
            Err(CounterError::Fatal(_))
        ));
        assert_eq!(handle.chain_id(), 0);
    }

    #[test]
    fn test_update_failure_after_success_degrades() {
        let kstat = MockKstat::new();
        let handle = handle_with(&kstat);
        handle.refresh_at(NOW, None).unwrap();
        let chain = handle.chain_id();

        kstat.set_fail_update(true);
        handle.refresh_at(NOW + 2, None).unwrap();
        assert_eq!(handle.chain_id(), chain);
    }

    #[test]
    fn test_failed_update_still_respects_window() {
        let kstat = MockKstat::new();
        let handle = handle_with(&kstat);
        handle.refresh_at(NOW, None).unwrap();

        kstat.set_fail_update(true);
        handle.refresh_at(NOW + 2, None).unwrap();
        handle.refresh_at(NOW + 3, None).unwrap();
        assert_eq!(kstat.update_calls(), 2);
    }

    #[test]
    fn test_read_rejects_stale_reference() {
        let kstat = MockKstat::new();
        kstat.add_named("zfs", 0, "arcstats", &[("size", NamedValue::UInt64(4096))]);
        let handle = handle_with(&kstat);
        handle.refresh_at(NOW, None).unwrap();

        let kref = handle.lookup("zfs", 0, "arcstats").unwrap();
        assert!(handle.read(&kref).is_ok());

        kstat.bump_chain();
        handle.refresh_at(NOW + 2, None).unwrap();
        assert_eq!(handle.read(&kref), Err(CounterError::Stale));

        let fresh = handle.lookup("zfs", 0, "arcstats").unwrap();
        let record = handle.read(&fresh).unwrap();
        assert_eq!(record.lookup("size"), Some(&NamedValue::UInt64(4096)));
    }

    #[test]
    fn test_lookup_before_open_and_missing_record() {
        let kstat = MockKstat::new();
        let handle = handle_with(&kstat);
        assert!(handle.lookup("unix", 0, "system_pages").is_none());

        handle.refresh_at(NOW, None).unwrap();
        assert!(handle.lookup("unix", 0, "system_pages").is_none());
    }

    #[test]
    fn test_foreach_stops_at_first_error() {
        let kstat = MockKstat::new();
        kstat.add_named("unix", 0, "system_pages", &[]);
        kstat.add_named("zfs", 0, "arcstats", &[]);
        kstat.add_named("zfs", 0, "zfetchstats", &[]);
        let handle = handle_with(&kstat);
        handle.refresh_at(NOW, None).unwrap();

        let mut visited = Vec::new();
        let result = handle.foreach(|id| {
            visited.push(id.to_string());
            if id.name == "arcstats" {
                return Err(CounterError::NotFound(id.to_string()));
            }
            Ok(())
        });

        assert!(result.is_err());
        assert_eq!(visited, vec!["unix:0:system_pages", "zfs:0:arcstats"]);
    }

    #[test]
    fn test_concurrent_refresh_contacts_kernel_once() {
        let kstat = MockKstat::new();
        let handle = Arc::new(handle_with(&kstat));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let handle = Arc::clone(&handle);
                thread::spawn(move || handle.refresh_at(NOW, None))
            })
            .collect();
        for t in threads {
            t.join().unwrap().unwrap();
        }

        assert_eq!(kstat.open_calls(), 1);
        assert_eq!(kstat.update_calls(), 1);
    }
}
