use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use accounts_core::clock::{Clock, SystemClock};
use accounts_core::entities::KEY_FRESHNESS_SECONDS;
use accounts_core::{AccountsError, AuthorizedKeys, Group, User};
use arc_swap::ArcSwap;

use crate::snapshot::AccountSnapshot;

/// Thread-safe user/group snapshot plus an authorized-keys sub-cache.
///
/// The snapshot lives behind an `ArcSwap` so readers never take a lock to
/// look up a user or group; the key sub-cache is small and mutated on every
/// successful key fetch, so it stays behind a plain `Mutex`.
pub struct Cache {
    snapshot: ArcSwap<AccountSnapshot>,
    keys: Mutex<HashMap<String, AuthorizedKeys>>,
    clock: Arc<dyn Clock>,
}

impl Cache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(AccountSnapshot::default()),
            keys: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Builds the new snapshot and the pruned key sub-cache before taking
    /// any lock, then swaps both in sequence. No network I/O happens here;
    /// callers fetch users/groups first and pass the results in.
    pub fn replace_accounts(&self, users: Vec<User>, groups: Vec<Group>) {
        let new_snapshot = AccountSnapshot::new(users, groups);
        let now = self.clock.now_secs();

        {
            let mut keys = self.keys.lock().expect("cache key mutex poisoned");
            keys.retain(|user_name, entry| {
                new_snapshot.contains_user_name(user_name) && Self::is_fresh(entry, now)
            });
        }

        self.snapshot.store(Arc::new(new_snapshot));
    }

    pub fn get_user_by_name(&self, name: &str) -> Result<User, AccountsError> {
        self.snapshot
            .load()
            .user_by_name(name)
            .map(|u| (*u).clone())
            .ok_or_else(|| AccountsError::NotFound(name.to_string()))
    }

    pub fn get_user_by_uid(&self, uid: u32) -> Result<User, AccountsError> {
        self.snapshot
            .load()
            .user_by_uid(uid)
            .map(|u| (*u).clone())
            .ok_or_else(|| AccountsError::NotFound(uid.to_string()))
    }

    pub fn get_group_by_name(&self, name: &str) -> Result<Group, AccountsError> {
        self.snapshot
            .load()
            .group_by_name(name)
            .map(|g| (*g).clone())
            .ok_or_else(|| AccountsError::NotFound(name.to_string()))
    }

    pub fn get_group_by_gid(&self, gid: u32) -> Result<Group, AccountsError> {
        self.snapshot
            .load()
            .group_by_gid(gid)
            .map(|g| (*g).clone())
            .ok_or_else(|| AccountsError::NotFound(gid.to_string()))
    }

    pub fn list_users(&self) -> Vec<User> {
        self.snapshot.load().users().map(|u| (**u).clone()).collect()
    }

    pub fn list_groups(&self) -> Vec<Group> {
        self.snapshot.load().groups().map(|g| (**g).clone()).collect()
    }

    pub fn validate_account_name(&self, name: &str) -> Result<(), AccountsError> {
        if self.snapshot.load().has_account_name(name) {
            Ok(())
        } else {
            Err(AccountsError::NotFound(name.to_string()))
        }
    }

    /// Present and fresh (`0 <= now - timestamp < 1800s`); otherwise
    /// `NotFound`, distinguishing "not cached" from "stale" in the message
    /// only.
    pub fn get_authorized_keys(&self, user_name: &str) -> Result<AuthorizedKeys, AccountsError> {
        let now = self.clock.now_secs();
        let keys = self.keys.lock().expect("cache key mutex poisoned");
        match keys.get(user_name) {
            Some(entry) if Self::is_fresh(entry, now) => Ok(entry.clone()),
            Some(_) => Err(AccountsError::NotFound(format!(
                "{user_name} (stale cache entry)"
            ))),
            None => Err(AccountsError::NotFound(format!(
                "{user_name} (no cached entry)"
            ))),
        }
    }

    pub fn put_authorized_keys(&self, user_name: &str, keys: AuthorizedKeys) {
        self.keys
            .lock()
            .expect("cache key mutex poisoned")
            .insert(user_name.to_string(), keys);
    }

    /// Future-dated entries (`delta < 0`) are treated as stale, not extra
    /// fresh — a clock going backward must not extend freshness.
    fn is_fresh(entry: &AuthorizedKeys, now: u64) -> bool {
        now >= entry.timestamp && now - entry.timestamp < KEY_FRESHNESS_SECONDS
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}
