//! Lease table
//!
//! Exclusive edit rights over shared elements (a track, a track's mixer
//! property group, a region). Per element id the table is a two-state
//! machine:
//!
//! ```text
//!   Unlocked ──acquire(user)──▶ Locked(user)
//!   Locked(user) ──release(user) / release_all(user)──▶ Unlocked
//! ```
//!
//! Acquire by another user while locked fails and leaves the holder
//! untouched. Re-acquire by the holder succeeds without changing the lease.

use rf_core::{RegionId, TrackId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ═══════════════════════════════════════════════════════════════════════════════
// ELEMENT IDS
// ═══════════════════════════════════════════════════════════════════════════════

/// Element id of a whole track
pub fn track_element(track_id: &TrackId) -> String {
    format!("track_{}", track_id)
}

/// Element id of a track's mixer property group
pub fn track_property_element(track_id: &TrackId) -> String {
    format!("track_{}_property", track_id)
}

/// Element id of a region
pub fn region_element(region_id: &RegionId) -> String {
    format!("region_{}", region_id)
}

// ═══════════════════════════════════════════════════════════════════════════════
// LEASE
// ═══════════════════════════════════════════════════════════════════════════════

/// What kind of element a lease guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseType {
    Track,
    TrackProperty,
    Region,
    Note,
    Marker,
    EffectChain,
}

/// Lease holder information, as carried by `lock_acquired` and snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseInfo {
    pub user_id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(rename = "type")]
    pub lease_type: LeaseType,
    /// Acquisition time (Unix ms)
    #[serde(default)]
    pub acquired_at: i64,
}

impl LeaseInfo {
    /// Lease stamped with the current time
    pub fn new(user_id: UserId, username: impl Into<String>, lease_type: LeaseType) -> Self {
        Self {
            user_id,
            username: username.into(),
            lease_type,
            acquired_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOCK MANAGER
// ═══════════════════════════════════════════════════════════════════════════════

/// Keyed lease table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LockManager {
    leases: BTreeMap<String, LeaseInfo>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `element_id` for `info.user_id`.
    ///
    /// Returns false (state unchanged) if another user holds it.
    pub fn acquire_lock(&mut self, element_id: impl Into<String>, info: LeaseInfo) -> bool {
        let element_id = element_id.into();
        match self.leases.get(&element_id) {
            Some(holder) if holder.user_id == info.user_id => true,
            Some(holder) => {
                log::debug!(
                    "[Locks] {} denied to {}: held by {}",
                    element_id,
                    info.user_id,
                    holder.user_id
                );
                false
            }
            None => {
                self.leases.insert(element_id, info);
                true
            }
        }
    }

    /// Install a lease confirmed by the relay, replacing any stale holder
    pub fn force_acquire(&mut self, element_id: impl Into<String>, info: LeaseInfo) -> Option<LeaseInfo> {
        self.leases.insert(element_id.into(), info)
    }

    /// Release `element_id`; succeeds only for the exact holder
    pub fn release_lock(&mut self, element_id: &str, user_id: &UserId) -> bool {
        match self.leases.get(element_id) {
            Some(holder) if &holder.user_id == user_id => {
                self.leases.remove(element_id);
                true
            }
            _ => false,
        }
    }

    /// Drop a lease whoever holds it (relay-side release without a sender)
    pub fn force_release(&mut self, element_id: &str) -> Option<LeaseInfo> {
        self.leases.remove(element_id)
    }

    /// Release everything `user_id` holds; returns the released element ids
    pub fn release_all_for_user(&mut self, user_id: &UserId) -> Vec<String> {
        let released = self.held_by(user_id);
        for element_id in &released {
            self.leases.remove(element_id);
        }
        released
    }

    pub fn is_locked(&self, element_id: &str) -> Option<&LeaseInfo> {
        self.leases.get(element_id)
    }

    pub fn is_locked_by_user(&self, element_id: &str, user_id: &UserId) -> bool {
        self.leases
            .get(element_id)
            .is_some_and(|holder| &holder.user_id == user_id)
    }

    /// Element ids currently held by `user_id`
    pub fn held_by(&self, user_id: &UserId) -> Vec<String> {
        self.leases
            .iter()
            .filter(|(_, info)| &info.user_id == user_id)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Destructive replace (snapshot application)
    pub fn replace_all(&mut self, leases: BTreeMap<String, LeaseInfo>) {
        self.leases = leases;
    }

    pub fn leases(&self) -> &BTreeMap<String, LeaseInfo> {
        &self.leases
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    pub fn clear(&mut self) {
        self.leases.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(user: &str) -> LeaseInfo {
        LeaseInfo::new(UserId::new(user), user.to_uppercase(), LeaseType::TrackProperty)
    }

    #[test]
    fn test_exclusive_acquire_release_cycle() {
        let mut locks = LockManager::new();
        let key = track_property_element(&TrackId::new("T1"));
        assert_eq!(key, "track_T1_property");

        assert!(locks.acquire_lock(&key, lease("a")));
        assert!(!locks.acquire_lock(&key, lease("b")));
        assert_eq!(locks.is_locked(&key).map(|l| l.user_id.as_str()), Some("a"));

        assert!(locks.release_lock(&key, &UserId::new("a")));
        assert!(locks.acquire_lock(&key, lease("b")));
        assert!(locks.is_locked_by_user(&key, &UserId::new("b")));
    }

    #[test]
    fn test_reacquire_by_holder_is_idempotent() {
        let mut locks = LockManager::new();
        let mut first = lease("a");
        first.acquired_at = 1;
        assert!(locks.acquire_lock("region_R1", first));
        assert!(locks.acquire_lock("region_R1", lease("a")));
        assert_eq!(locks.len(), 1);
        assert_eq!(locks.is_locked("region_R1").unwrap().acquired_at, 1);
    }

    #[test]
    fn test_release_by_non_holder_fails() {
        let mut locks = LockManager::new();
        locks.acquire_lock("track_T1", lease("a"));
        assert!(!locks.release_lock("track_T1", &UserId::new("b")));
        assert!(!locks.release_lock("track_T2", &UserId::new("a")));
        assert!(locks.is_locked("track_T1").is_some());
    }

    #[test]
    fn test_release_all_for_user() {
        let mut locks = LockManager::new();
        locks.acquire_lock("track_T1", lease("a"));
        locks.acquire_lock("region_R1", lease("a"));
        locks.acquire_lock("region_R2", lease("b"));

        let mut released = locks.release_all_for_user(&UserId::new("a"));
        released.sort();
        assert_eq!(released, vec!["region_R1".to_string(), "track_T1".to_string()]);
        assert_eq!(locks.len(), 1);
        assert!(locks.is_locked_by_user("region_R2", &UserId::new("b")));
    }

    #[test]
    fn test_force_acquire_overrides_stale_holder() {
        let mut locks = LockManager::new();
        locks.acquire_lock("region_R1", lease("a"));
        let stale = locks.force_acquire("region_R1", lease("b"));
        assert_eq!(stale.map(|l| l.user_id), Some(UserId::new("a")));
        assert!(locks.is_locked_by_user("region_R1", &UserId::new("b")));
    }

    #[test]
    fn test_lease_info_wire_shape() {
        let json = r#"{"userId":"u1","username":"Ana","type":"track_property","acquiredAt":5}"#;
        let info: LeaseInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.lease_type, LeaseType::TrackProperty);
        assert_eq!(info.acquired_at, 5);
    }
}
