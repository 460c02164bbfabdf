//! In-memory record of logged-out credentials.
//!
//! Uses DashMap so request handlers can revoke and check concurrently.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;

/// Raw cookie values and bearer tokens that must no longer authenticate,
/// each with the time after which it can be forgotten.
#[derive(Debug)]
pub struct RevocationRegistry {
    revoked: DashMap<String, DateTime<Utc>>,
    retention: TimeDelta,
}

impl RevocationRegistry {
    /// `retention` should be the session duration: once that has passed the
    /// credential is expired anyway.
    pub fn new(retention: Duration) -> Self {
        Self {
            revoked: DashMap::new(),
            retention: TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn revoke(&self, credential: &str) {
        let until = Utc::now()
            .checked_add_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.revoked.insert(credential.to_string(), until);
        tracing::debug!("Credential revoked until {}", until);
    }

    pub fn is_revoked(&self, credential: &str) -> bool {
        self.revoked.contains_key(credential)
    }

    /// Drops entries whose retention has passed. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.revoked.len();
        self.revoked.retain(|_, until| *until > now);
        let purged = before.saturating_sub(self.revoked.len());
        if purged > 0 {
            tracing::debug!("Purged {} revoked credentials", purged);
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.revoked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revoked.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn revoke_and_check() {
        let r = RevocationRegistry::new(Duration::from_secs(60));
        assert!(!r.is_revoked("abc"));
        r.revoke("abc");
        assert!(r.is_revoked("abc"));
        assert!(!r.is_revoked("abcd"));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn purge_keeps_live_entries() {
        let r = RevocationRegistry::new(Duration::from_secs(60));
        r.revoke("cookie");
        assert_eq!(r.purge_expired(), 0);
        assert!(r.is_revoked("cookie"));

        assert_eq!(r.purge_expired_at(Utc::now() + TimeDelta::minutes(2)), 1);
        assert!(r.is_empty());
    }

    #[test]
    fn concurrent_revocations() {
        let r = Arc::new(RevocationRegistry::new(Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let r = Arc::clone(&r);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        r.revoke(&format!("{}-{}", t, i));
                        assert!(r.is_revoked(&format!("{}-{}", t, i)));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(r.len(), 800);
    }
}
