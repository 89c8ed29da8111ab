use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::core::ScanSession;

#[derive(Debug)]
struct Entry {
    session: ScanSession,
    /// Set the first time the stored session is terminal.
    finished_at: Option<Instant>,
}

impl Entry {
    fn new(session: ScanSession, now: Instant) -> Self {
        let finished_at = session.status.is_terminal().then_some(now);
        Self {
            session,
            finished_at,
        }
    }
}

/// Process-wide scan id → session store shared by every in-flight scan and
/// by status queries. Cloning shares the same underlying map.
///
/// With a TTL, sessions that finished more than the TTL ago are dropped on the
/// next insertion. Age counts from completion, not submission, and running
/// sessions are never evicted.
#[derive(Debug, Clone, Default)]
pub struct ScanRegistry {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
    ttl: Option<Duration>,
}

impl ScanRegistry {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            inner: Arc::default(),
            ttl,
        }
    }

    pub fn insert(&self, session: ScanSession) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(ttl) = self.ttl {
            purge_locked(&mut map, ttl, Instant::now());
        }
        map.insert(session.id.clone(), Entry::new(session, Instant::now()));
    }

    /// Replaces the stored snapshot and stamps the completion time on the
    /// first terminal update. Returns false when the id is unknown (for
    /// example after expiry).
    pub fn update(&self, session: &ScanSession) -> bool {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match map.get_mut(&session.id) {
            Some(entry) => {
                if entry.finished_at.is_none() && session.status.is_terminal() {
                    entry.finished_at = Some(Instant::now());
                }
                entry.session = session.clone();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<ScanSession> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(id).map(|entry| entry.session.clone())
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn purge_expired(&self) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        purge_locked(&mut map, ttl, Instant::now())
    }
}

fn purge_locked(map: &mut HashMap<String, Entry>, ttl: Duration, now: Instant) -> usize {
    let before = map.len();
    map.retain(|_, entry| match entry.finished_at {
        Some(finished_at) => now.duration_since(finished_at) < ttl,
        None => true,
    });
    before - map.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ScanStatus;

    fn session(id: &str, status: ScanStatus) -> ScanSession {
        let mut s = ScanSession::new(id, "2026-01-01T00:00:00Z", "example.com", "all", "tester");
        s.status = status;
        s
    }

    #[test]
    fn insert_update_get_roundtrip() {
        let reg = ScanRegistry::new(None);
        reg.insert(session("a", ScanStatus::Running));
        assert_eq!(reg.get("a").map(|s| s.status), Some(ScanStatus::Running));

        let mut done = session("a", ScanStatus::Completed);
        done.target = "changed".to_string();
        assert!(reg.update(&done));
        let got = reg.get("a").expect("present");
        assert_eq!(got.status, ScanStatus::Completed);
        assert_eq!(got.target, "changed");

        assert!(!reg.update(&session("missing", ScanStatus::Failed)));
        assert!(reg.get("missing").is_none());
    }

    #[test]
    fn expiry_only_drops_old_terminal_sessions() {
        let reg = ScanRegistry::new(Some(Duration::from_millis(20)));
        reg.insert(session("done", ScanStatus::Completed));
        reg.insert(session("failed", ScanStatus::Failed));
        reg.insert(session("busy", ScanStatus::Running));
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(reg.purge_expired(), 2);
        assert!(reg.get("done").is_none());
        assert!(reg.get("failed").is_none());
        assert!(reg.get("busy").is_some());
    }

    #[test]
    fn long_running_scan_outlives_ttl_until_it_finishes() {
        let ttl = Duration::from_millis(50);
        let reg = ScanRegistry::new(Some(ttl));
        reg.insert(session("slow", ScanStatus::Running));
        std::thread::sleep(Duration::from_millis(100));

        assert!(reg.update(&session("slow", ScanStatus::Completed)));
        reg.insert(session("next", ScanStatus::Running));
        assert_eq!(
            reg.get("slow").map(|s| s.status),
            Some(ScanStatus::Completed)
        );

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(reg.purge_expired(), 1);
        assert!(reg.get("slow").is_none());
        assert!(reg.get("next").is_some());
    }

    #[test]
    fn repeated_terminal_updates_keep_first_completion_time() {
        let reg = ScanRegistry::new(Some(Duration::from_millis(50)));
        reg.insert(session("a", ScanStatus::Running));
        assert!(reg.update(&session("a", ScanStatus::Failed)));
        std::thread::sleep(Duration::from_millis(80));
        assert!(reg.update(&session("a", ScanStatus::Failed)));

        assert_eq!(reg.purge_expired(), 1);
    }

    #[test]
    fn no_ttl_never_evicts() {
        let reg = ScanRegistry::new(None);
        reg.insert(session("done", ScanStatus::Completed));
        assert_eq!(reg.purge_expired(), 0);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn concurrent_inserts_are_all_visible() {
        let reg = ScanRegistry::new(None);
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    reg.insert(session(&format!("scan-{i}"), ScanStatus::Running));
                })
            })
            .collect();
        for h in handles {
            h.join().expect("join");
        }
        assert_eq!(reg.len(), 16);
        assert!(reg.get("scan-7").is_some());
    }
}
