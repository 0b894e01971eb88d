use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::grant::{Grant, GrantKind, Verdict};
use crate::policy::{EvictionPolicy, ReissuePolicy, StoreConfig};
use crate::token::redact_token;

/// Keyed store of outstanding grants.
///
/// Pure reads (`lookup`, `active_snapshot`, `len`) share the lock. Anything that
/// may mutate (`create`, `redeem`, `purge_expired`) holds the write lock for the
/// whole evaluate-then-mutate sequence.
///
/// Callers always pass `now`; the store never reads the clock.
pub struct GrantStore {
    grants: RwLock<HashMap<String, Grant>>,
    config: StoreConfig,
}

impl GrantStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            grants: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> StoreConfig {
        self.config
    }

    /// Issue a grant valid from `now` until `now + ttl`
    pub fn create(
        &self,
        key: impl Into<String>,
        kind: GrantKind,
        ttl: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<Grant> {
        if ttl <= TimeDelta::zero() {
            return Err(StoreError::InvalidTtl(ttl));
        }
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(StoreError::InvalidTtl(ttl))?;

        let key = key.into();
        let mut grants = self.grants.write();

        if let Some(existing) = grants.get(&key) {
            match self.config.reissue {
                ReissuePolicy::Reject if existing.is_valid_at(now) => {
                    warn!("Refusing to reissue live grant {}", redact_token(&key));
                    return Err(StoreError::KeyExists(key));
                }
                ReissuePolicy::Reject => {
                    debug!("Replacing dead grant {}", redact_token(&key));
                }
                ReissuePolicy::Overwrite => {
                    debug!("Overwriting grant {}, window restarts", redact_token(&key));
                }
            }
        }

        let grant = Grant::issue(key.clone(), kind, now, expires_at);
        grants.insert(key, grant.clone());

        info!(
            "Issued {} grant {} (expires {})",
            kind,
            redact_token(&grant.key),
            grant.expires_at.to_rfc3339()
        );
        Ok(grant)
    }

    /// Raw record, validity not evaluated. Not for access decisions; use `redeem`.
    pub fn lookup(&self, key: &str) -> Option<Grant> {
        self.grants.read().get(key).cloned()
    }

    /// Decide whether `key` grants access at `now`.
    ///
    /// Expiry is checked before use-state, so an unused single-use grant past its
    /// window reports `Expired`. A single-use grant is marked used inside the same
    /// write lock that found it valid.
    pub fn redeem(&self, key: &str, now: DateTime<Utc>) -> Verdict {
        let mut grants = self.grants.write();

        let verdict = match grants.get_mut(key) {
            None => Verdict::NotFound,
            Some(grant) if grant.is_expired_at(now) => Verdict::Expired,
            Some(grant) if grant.is_consumed() => Verdict::AlreadyUsed,
            Some(grant) => {
                if grant.kind == GrantKind::SingleUse {
                    grant.used = true;
                }
                Verdict::Valid(grant.clone())
            }
        };

        if verdict == Verdict::Expired && self.config.eviction == EvictionPolicy::EvictOnAccess {
            grants.remove(key);
        }

        debug!("Redeem {} -> {}", redact_token(key), verdict);
        verdict
    }

    /// Grants valid at `now`, in no particular order
    pub fn active_snapshot(&self, now: DateTime<Utc>) -> Vec<Grant> {
        self.grants
            .read()
            .values()
            .filter(|grant| grant.is_valid_at(now))
            .cloned()
            .collect()
    }

    /// Drop every grant whose window has closed at `now`. Returns how many went.
    ///
    /// Consumed single-use grants stay until they expire, so a spent key keeps
    /// answering `AlreadyUsed` rather than `NotFound`.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut grants = self.grants.write();
        let before = grants.len();
        grants.retain(|_, grant| !grant.is_expired_at(now));
        let purged = before - grants.len();
        if purged > 0 {
            debug!("Purged {} expired grants, {} remain", purged, grants.len());
        }
        purged
    }

    /// Records physically held, including dead ones not yet evicted
    pub fn len(&self) -> usize {
        self.grants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.read().is_empty()
    }
}

impl Default for GrantStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_create_sets_window() {
        let store = GrantStore::default();
        let grant = store
            .create("abc", GrantKind::Recurring, TimeDelta::seconds(30), t0())
            .unwrap();

        assert_eq!(grant.created_at, t0());
        assert_eq!(grant.expires_at, t0() + TimeDelta::seconds(30));
        assert!(!grant.used);
        assert_eq!(store.lookup("abc"), Some(grant));
    }

    #[test]
    fn test_non_positive_ttl_rejected() {
        let store = GrantStore::default();
        let err = store
            .create("abc", GrantKind::Recurring, TimeDelta::zero(), t0())
            .unwrap_err();
        assert_eq!(err, StoreError::InvalidTtl(TimeDelta::zero()));

        assert!(store
            .create("abc", GrantKind::Recurring, TimeDelta::seconds(-5), t0())
            .is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_out_of_range_ttl_rejected() {
        let store = GrantStore::default();
        let huge = TimeDelta::try_seconds(9_000_000_000_000).unwrap();
        let err = store
            .create("big", GrantKind::Recurring, huge, t0())
            .unwrap_err();
        assert_eq!(err, StoreError::InvalidTtl(huge));
        assert!(store.is_empty());

        assert!(store
            .create("big", GrantKind::Recurring, TimeDelta::hours(1), t0())
            .is_ok());
    }

    #[test]
    fn test_lookup_does_not_mutate() {
        let store = GrantStore::default();
        store
            .create("once", GrantKind::SingleUse, TimeDelta::minutes(5), t0())
            .unwrap();

        for _ in 0..3 {
            assert!(!store.lookup("once").unwrap().used);
        }
        assert!(store.redeem("once", t0()).is_valid());
        assert!(store.lookup("once").unwrap().used);
    }

    #[test]
    fn test_single_use_consumed_once() {
        let store = GrantStore::default();
        store
            .create("A", GrantKind::SingleUse, TimeDelta::minutes(5), t0())
            .unwrap();

        let first = store.redeem("A", t0());
        assert!(first.is_valid());
        assert!(first.grant().unwrap().used);
        assert_eq!(store.redeem("A", t0()), Verdict::AlreadyUsed);
    }

    #[test]
    fn test_expiry_checked_before_use_state() {
        let store = GrantStore::default();
        store
            .create("C", GrantKind::SingleUse, TimeDelta::seconds(30), t0())
            .unwrap();
        store.redeem("C", t0());

        assert_eq!(
            store.redeem("C", t0() + TimeDelta::seconds(31)),
            Verdict::Expired
        );
    }

    #[test]
    fn test_retain_keeps_expired_record() {
        let store = GrantStore::new(StoreConfig::session_tokens());
        store
            .create("k", GrantKind::Recurring, TimeDelta::seconds(10), t0())
            .unwrap();

        let later = t0() + TimeDelta::seconds(10);
        assert_eq!(store.redeem("k", later), Verdict::Expired);
        assert_eq!(store.redeem("k", later), Verdict::Expired);
        assert!(store.lookup("k").is_some());
    }

    #[test]
    fn test_evict_on_access_removes_expired_record() {
        let store = GrantStore::new(StoreConfig::wallet_identity());
        store
            .create("0xabc", GrantKind::Recurring, TimeDelta::seconds(30), t0())
            .unwrap();

        let later = t0() + TimeDelta::seconds(30);
        assert_eq!(store.redeem("0xabc", later), Verdict::Expired);
        assert_eq!(store.redeem("0xabc", later), Verdict::NotFound);
        assert!(store.is_empty());
    }

    #[test]
    fn test_overwrite_restarts_window() {
        let store = GrantStore::new(StoreConfig::wallet_identity());
        store
            .create("0xabc", GrantKind::Recurring, TimeDelta::seconds(30), t0())
            .unwrap();

        let repaid_at = t0() + TimeDelta::seconds(20);
        let grant = store
            .create("0xabc", GrantKind::Recurring, TimeDelta::seconds(30), repaid_at)
            .unwrap();

        assert_eq!(grant.created_at, repaid_at);
        assert!(store.redeem("0xabc", t0() + TimeDelta::seconds(45)).is_valid());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_reject_refuses_live_key() {
        let store = GrantStore::new(StoreConfig::session_tokens());
        store
            .create("tok", GrantKind::Recurring, TimeDelta::hours(1), t0())
            .unwrap();

        let err = store
            .create("tok", GrantKind::SingleUse, TimeDelta::hours(1), t0())
            .unwrap_err();
        assert_eq!(err, StoreError::KeyExists("tok".into()));
        assert_eq!(store.lookup("tok").unwrap().kind, GrantKind::Recurring);
    }

    #[test]
    fn test_reject_replaces_dead_grants() {
        let store = GrantStore::new(StoreConfig::session_tokens());
        store
            .create("used", GrantKind::SingleUse, TimeDelta::hours(1), t0())
            .unwrap();
        store.redeem("used", t0());
        store
            .create("old", GrantKind::Recurring, TimeDelta::seconds(5), t0())
            .unwrap();

        let later = t0() + TimeDelta::seconds(10);
        assert!(store
            .create("used", GrantKind::SingleUse, TimeDelta::hours(1), later)
            .is_ok());
        assert!(store
            .create("old", GrantKind::Recurring, TimeDelta::seconds(5), later)
            .is_ok());
        assert!(store.redeem("used", later).is_valid());
    }

    #[test]
    fn test_snapshot_and_purge() {
        let store = GrantStore::default();
        store
            .create("live", GrantKind::Recurring, TimeDelta::hours(1), t0())
            .unwrap();
        store
            .create("stale", GrantKind::Recurring, TimeDelta::seconds(1), t0())
            .unwrap();
        store
            .create("spent", GrantKind::SingleUse, TimeDelta::hours(1), t0())
            .unwrap();
        store.redeem("spent", t0());

        let now = t0() + TimeDelta::seconds(5);
        let active = store.active_snapshot(now);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].key, "live");
        assert_eq!(store.len(), 3);

        assert_eq!(store.purge_expired(now), 1);
        assert_eq!(store.len(), 2);
        assert!(store.lookup("stale").is_none());
        assert_eq!(store.purge_expired(now), 0);

        assert_eq!(store.purge_expired(t0() + TimeDelta::hours(1)), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_purge_keeps_consumed_until_expiry() {
        let store = GrantStore::new(StoreConfig::session_tokens());
        store
            .create("once", GrantKind::SingleUse, TimeDelta::minutes(5), t0())
            .unwrap();
        assert!(store.redeem("once", t0()).is_valid());

        assert_eq!(store.purge_expired(t0() + TimeDelta::seconds(1)), 0);
        assert_eq!(
            store.redeem("once", t0() + TimeDelta::seconds(2)),
            Verdict::AlreadyUsed
        );
    }
}
