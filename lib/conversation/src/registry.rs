//! Per-session serialization.
//!
//! Two turns of one session must not run concurrently: both would read the
//! same latest snapshot and one branch of the conversation would be lost.
//! The registry hands out an exclusive [`SessionLease`] per session ID;
//! a second caller for the same session waits until the first lease drops.
//!
//! Resident entries are bounded. On every acquisition, unleased entries idle
//! longer than `idle_ttl` are dropped, then unleased entries are dropped in
//! least-recently-used order while more than `max_resident` remain. A leased
//! entry (held or awaited) is never evicted, so `max_resident` can be
//! exceeded while that many sessions are genuinely busy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tracing::debug;
use waypoint_core::SessionId;

/// Registry limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Soft cap on resident session entries.
    pub max_resident: usize,
    /// How long an unleased entry may sit unused before eviction.
    pub idle_ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_resident: 1024,
            idle_ttl: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug)]
struct Slot {
    lock: Arc<tokio::sync::Mutex<()>>,
    last_used: Instant,
}

impl Slot {
    /// The map's own reference is the only one when nobody holds or awaits it.
    fn is_leased(&self) -> bool {
        Arc::strong_count(&self.lock) > 1
    }
}

/// Exclusive right to run a turn for one session.
///
/// Released on drop.
#[derive(Debug)]
pub struct SessionLease {
    session_id: SessionId,
    _guard: OwnedMutexGuard<()>,
}

impl SessionLease {
    /// The session this lease covers.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

/// Hands out per-session leases with bounded residency.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    config: RegistryConfig,
    slots: Mutex<HashMap<SessionId, Slot>>,
}

impl SessionRegistry {
    /// Creates a registry with the given limits.
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the configured limits.
    #[must_use]
    pub fn config(&self) -> RegistryConfig {
        self.config
    }

    /// Waits for exclusive access to `session_id`.
    pub async fn acquire(&self, session_id: &SessionId) -> SessionLease {
        let lock = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            let slot = slots.entry(session_id.clone()).or_insert_with(|| Slot {
                lock: Arc::new(tokio::sync::Mutex::new(())),
                last_used: now,
            });
            slot.last_used = now;
            let lock = Arc::clone(&slot.lock);
            self.evict(&mut slots, now);
            lock
        };

        let guard = lock.lock_owned().await;
        SessionLease {
            session_id: session_id.clone(),
            _guard: guard,
        }
    }

    /// Number of resident entries.
    #[must_use]
    pub fn resident(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if `session_id` currently has an entry.
    #[must_use]
    pub fn is_resident(&self, session_id: &SessionId) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(session_id)
    }

    fn evict(&self, slots: &mut HashMap<SessionId, Slot>, now: Instant) {
        let before = slots.len();
        let ttl = self.config.idle_ttl;
        slots.retain(|_, slot| slot.is_leased() || now.duration_since(slot.last_used) <= ttl);

        if slots.len() > self.config.max_resident {
            let mut idle: Vec<(SessionId, Instant)> = slots
                .iter()
                .filter(|(_, slot)| !slot.is_leased())
                .map(|(id, slot)| (id.clone(), slot.last_used))
                .collect();
            idle.sort_by_key(|(_, last_used)| *last_used);

            let excess = slots.len() - self.config.max_resident;
            for (id, _) in idle.into_iter().take(excess) {
                slots.remove(&id);
            }
        }

        let evicted = before - slots.len();
        if evicted > 0 {
            debug!(evicted, resident = slots.len(), "evicted idle sessions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sid(value: &str) -> SessionId {
        SessionId::new(value).unwrap()
    }

    #[tokio::test]
    async fn same_session_is_serialized() {
        let registry = Arc::new(SessionRegistry::default());
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let active = Arc::clone(&active);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _lease = registry.acquire(&sid("shared")).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_sessions_do_not_block() {
        let registry = SessionRegistry::default();
        let a = registry.acquire(&sid("a")).await;
        let b = tokio::time::timeout(Duration::from_secs(1), registry.acquire(&sid("b")))
            .await
            .expect("independent session must not wait");
        assert_eq!(a.session_id().as_str(), "a");
        assert_eq!(b.session_id().as_str(), "b");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_entries_expire() {
        let registry = SessionRegistry::new(RegistryConfig {
            max_resident: 100,
            idle_ttl: Duration::from_secs(60),
        });
        drop(registry.acquire(&sid("old")).await);
        tokio::time::advance(Duration::from_secs(61)).await;

        drop(registry.acquire(&sid("new")).await);
        assert!(!registry.is_resident(&sid("old")));
        assert!(registry.is_resident(&sid("new")));
    }

    #[tokio::test(start_paused = true)]
    async fn least_recently_used_is_evicted_first() {
        let registry = SessionRegistry::new(RegistryConfig {
            max_resident: 2,
            idle_ttl: Duration::from_secs(3600),
        });
        drop(registry.acquire(&sid("a")).await);
        tokio::time::advance(Duration::from_secs(1)).await;
        drop(registry.acquire(&sid("b")).await);
        tokio::time::advance(Duration::from_secs(1)).await;
        drop(registry.acquire(&sid("a")).await);
        tokio::time::advance(Duration::from_secs(1)).await;
        drop(registry.acquire(&sid("c")).await);

        assert_eq!(registry.resident(), 2);
        assert!(registry.is_resident(&sid("a")));
        assert!(!registry.is_resident(&sid("b")));
        assert!(registry.is_resident(&sid("c")));
    }

    #[tokio::test(start_paused = true)]
    async fn leased_entries_are_never_evicted() {
        let registry = SessionRegistry::new(RegistryConfig {
            max_resident: 1,
            idle_ttl: Duration::from_secs(1),
        });
        let held = registry.acquire(&sid("busy")).await;
        tokio::time::advance(Duration::from_secs(10)).await;

        let other = registry.acquire(&sid("other")).await;
        assert!(registry.is_resident(&sid("busy")));
        assert_eq!(registry.resident(), 2);

        drop(held);
        drop(other);
        drop(registry.acquire(&sid("third")).await);
        assert_eq!(registry.resident(), 1);
        assert!(registry.is_resident(&sid("third")));
    }
}
