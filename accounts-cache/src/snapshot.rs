use std::collections::HashMap;
use std::sync::Arc;

use accounts_core::{Group, User};

/// All users and groups visible at one moment, plus derived indices. Built
/// once and swapped as a unit so readers never observe a mix of two
/// generations.
///
/// `by_uid`/`by_gid` hold the *same* `Arc` as `by_name`, so "looking a user up
/// by uid returns the same record as looking them up by name" holds
/// structurally rather than by convention.
#[derive(Debug, Default)]
pub struct AccountSnapshot {
    users_by_name: HashMap<String, Arc<User>>,
    users_by_uid: HashMap<u32, Arc<User>>,
    groups_by_name: HashMap<String, Arc<Group>>,
    groups_by_gid: HashMap<u32, Arc<Group>>,
}

impl AccountSnapshot {
    pub fn new(users: Vec<User>, groups: Vec<Group>) -> Self {
        let mut users_by_name = HashMap::with_capacity(users.len());
        let mut users_by_uid = HashMap::with_capacity(users.len());
        for user in users {
            let user = Arc::new(user);
            users_by_uid.insert(user.uid, Arc::clone(&user));
            users_by_name.insert(user.name.clone(), user);
        }

        let mut groups_by_name = HashMap::with_capacity(groups.len());
        let mut groups_by_gid = HashMap::with_capacity(groups.len());
        for group in groups {
            let group = Arc::new(group);
            groups_by_gid.insert(group.gid, Arc::clone(&group));
            groups_by_name.insert(group.name.clone(), group);
        }

        Self {
            users_by_name,
            users_by_uid,
            groups_by_name,
            groups_by_gid,
        }
    }

    pub fn user_by_name(&self, name: &str) -> Option<Arc<User>> {
        self.users_by_name.get(name).cloned()
    }

    pub fn user_by_uid(&self, uid: u32) -> Option<Arc<User>> {
        self.users_by_uid.get(&uid).cloned()
    }

    pub fn group_by_name(&self, name: &str) -> Option<Arc<Group>> {
        self.groups_by_name.get(name).cloned()
    }

    pub fn group_by_gid(&self, gid: u32) -> Option<Arc<Group>> {
        self.groups_by_gid.get(&gid).cloned()
    }

    pub fn users(&self) -> impl Iterator<Item = &Arc<User>> {
        self.users_by_name.values()
    }

    pub fn groups(&self) -> impl Iterator<Item = &Arc<Group>> {
        self.groups_by_name.values()
    }

    pub fn has_account_name(&self, name: &str) -> bool {
        self.users_by_name.contains_key(name) || self.groups_by_name.contains_key(name)
    }

    pub fn contains_user_name(&self, name: &str) -> bool {
        self.users_by_name.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str, uid: u32) -> User {
        User {
            name: name.into(),
            uid,
            gid: 1001,
            gecos: "".into(),
            home: format!("/home/{name}"),
            shell: "/bin/bash".into(),
        }
    }

    fn group(name: &str, gid: u32, members: &[&str]) -> Group {
        Group {
            name: name.into(),
            gid,
            members: members.iter().map(|s| s.to_string()).collect(),
        }
    }

    // === invariant 1: uid index and name index agree ===

    #[test]
    fn test_uid_index_matches_name_index() {
        let snapshot = AccountSnapshot::new(
            vec![user("user1", 1001), user("user2", 1002)],
            vec![],
        );
        for uid in [1001u32, 1002] {
            let by_uid = snapshot.user_by_uid(uid).unwrap();
            let by_name = snapshot.user_by_name(&by_uid.name).unwrap();
            assert!(Arc::ptr_eq(&by_uid, &by_name));
        }
    }

    #[test]
    fn test_gid_index_matches_name_index() {
        let snapshot = AccountSnapshot::new(vec![], vec![group("group1", 1001, &["user1"])]);
        let by_gid = snapshot.group_by_gid(1001).unwrap();
        let by_name = snapshot.group_by_name(&by_gid.name).unwrap();
        assert!(Arc::ptr_eq(&by_gid, &by_name));
    }

    #[test]
    fn test_missing_lookups_return_none() {
        let snapshot = AccountSnapshot::new(vec![], vec![]);
        assert!(snapshot.user_by_name("nobody").is_none());
        assert!(snapshot.user_by_uid(1).is_none());
        assert!(snapshot.group_by_name("nogroup").is_none());
        assert!(snapshot.group_by_gid(1).is_none());
    }

    #[test]
    fn test_has_account_name_covers_users_and_groups() {
        let snapshot = AccountSnapshot::new(vec![user("user1", 1001)], vec![group("group1", 1001, &[])]);
        assert!(snapshot.has_account_name("user1"));
        assert!(snapshot.has_account_name("group1"));
        assert!(!snapshot.has_account_name("nope"));
    }
}
