use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::error::AccountsError;

/// `^[a-z][-a-z0-9_]{0,31}$` — the account-name pattern shared by users and
/// groups. Single source of truth: reused both for wire validation here and
/// for the HTTP client's pre-flight username check before any network I/O.
pub static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][-a-z0-9_]{0,31}$").unwrap());

/// Freshness window for a `KeyCacheEntry`, in seconds.
pub const KEY_FRESHNESS_SECONDS: u64 = 1800;

pub fn is_valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

fn has_colon_or_newline(s: &str) -> bool {
    s.contains(':') || s.contains('\n')
}

fn has_newline(s: &str) -> bool {
    s.contains('\n')
}

/// A Unix user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub gecos: String,
    pub home: String,
    pub shell: String,
}

impl User {
    /// `name:uid:gid:gecos:home:shell` — the empty-password-field passwd line.
    /// See `DESIGN.md` for the byte-sequence rationale.
    pub fn to_passwd_line(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}",
            self.name, self.uid, self.gid, self.gecos, self.home, self.shell
        )
    }
}

/// A Unix group, with an ordered member list (members may repeat the same
/// name; callers must not assume a particular order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

impl Group {
    /// `name:gid:m1,m2,...` — no trailing comma when `members` is empty.
    pub fn to_group_line(&self) -> String {
        format!("{}:{}:{}", self.name, self.gid, self.members.join(","))
    }
}

/// Authorized SSH keys for a single user, fetched at `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedKeys {
    pub timestamp: u64,
    pub keys: Vec<String>,
}

// ── Wire schemas (JSON → domain) ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UserView {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    #[serde(default)]
    pub gecos: String,
    #[serde(rename = "homeDirectory")]
    pub home_directory: String,
    pub shell: String,
}

impl TryFrom<UserView> for User {
    type Error = AccountsError;

    fn try_from(v: UserView) -> Result<Self, Self::Error> {
        if !is_valid_name(&v.username) {
            return Err(AccountsError::Backend(format!(
                "invalid username in userViews entry: {}",
                v.username
            )));
        }
        for (field, value) in [
            ("gecos", &v.gecos),
            ("homeDirectory", &v.home_directory),
            ("shell", &v.shell),
        ] {
            if has_colon_or_newline(value) {
                return Err(AccountsError::Backend(format!(
                    "userViews entry for {} has invalid {} field: {}",
                    v.username, field, value
                )));
            }
        }
        Ok(User {
            name: v.username,
            uid: v.uid,
            gid: v.gid,
            gecos: v.gecos,
            home: v.home_directory,
            shell: v.shell,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct GroupView {
    #[serde(rename = "groupName")]
    pub group_name: String,
    pub gid: u32,
    #[serde(default)]
    pub members: Vec<String>,
}

impl TryFrom<GroupView> for Group {
    type Error = AccountsError;

    fn try_from(v: GroupView) -> Result<Self, Self::Error> {
        if !is_valid_name(&v.group_name) {
            return Err(AccountsError::Backend(format!(
                "invalid group name in groupViews entry: {}",
                v.group_name
            )));
        }
        for member in &v.members {
            if !is_valid_name(member) {
                return Err(AccountsError::Backend(format!(
                    "groupViews entry for {} has invalid member: {}",
                    v.group_name, member
                )));
            }
        }
        Ok(Group {
            name: v.group_name,
            gid: v.gid,
            members: v.members,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct LinuxAccountViewsResource {
    #[serde(default)]
    #[serde(rename = "userViews")]
    pub user_views: Vec<UserView>,
    #[serde(default)]
    #[serde(rename = "groupViews")]
    pub group_views: Vec<GroupView>,
}

#[derive(Debug, Deserialize)]
pub struct LinuxAccountViewsResponse {
    pub resource: LinuxAccountViewsResource,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizedKeysResource {
    #[serde(default)]
    pub keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizedKeysViewResponse {
    pub resource: AuthorizedKeysResource,
}

impl AuthorizedKeysResource {
    pub fn into_keys(self) -> Result<Vec<String>, AccountsError> {
        for key in &self.keys {
            if has_newline(key) {
                return Err(AccountsError::Backend(format!(
                    "authorizedKeysView entry contains embedded newline: {:?}",
                    key
                )));
            }
        }
        Ok(self.keys)
    }
}

/// Authorization metadata parsed from the metadata server's
/// `instance/service-accounts/default/token` endpoint.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub token_type: String,
    pub access_token: String,
}

impl TokenResponse {
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}
