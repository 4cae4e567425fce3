use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use accounts_cache::Cache;
use accounts_client::SharedAccountsSource;
use accounts_core::AccountsError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, error, warn};

/// Per-connection read timeout, enforced via a deadline rather than a
/// background timer so a slow or silent client can't pin a connection task
/// open indefinitely.
const READ_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_REQUEST_BYTES: usize = 128;

struct Response {
    status: u16,
    body_lines: Vec<String>,
}

impl Response {
    fn ok(body_lines: Vec<String>) -> Self {
        Self { status: 200, body_lines }
    }

    fn empty_ok() -> Self {
        Self { status: 200, body_lines: vec![] }
    }

    fn status_only(status: u16) -> Self {
        Self { status, body_lines: vec![] }
    }

    fn from_error(err: &AccountsError) -> Self {
        Self::status_only(err.protocol_status())
    }

    fn to_wire(&self) -> Vec<u8> {
        let mut lines = Vec::with_capacity(1 + self.body_lines.len());
        lines.push(self.status.to_string());
        lines.extend(self.body_lines.iter().cloned());
        lines.join("\n").into_bytes()
    }
}

/// Handles a single accepted connection end to end: read the request line
/// under a deadline, dispatch it, write the framed response in one shot,
/// close. Any error other than a `NotFound`/`Backend`/`OutOfQuota` lookup
/// failure is escalated to `fatal_tx`: an unexpected failure here means the
/// handler is in a state we don't trust enough to keep serving from.
pub async fn handle_connection(
    mut stream: UnixStream,
    cache: Arc<Cache>,
    source: SharedAccountsSource,
    fatal_tx: tokio::sync::mpsc::Sender<String>,
) {
    let response = match read_request_line(&mut stream).await {
        Ok(Some(line)) => dispatch(&line, &cache, &source, &fatal_tx).await,
        Ok(None) => {
            debug!("client disconnected before sending a request");
            Response::status_only(400)
        }
        Err(ReadError::Timeout) => {
            debug!("read timed out waiting for a request line");
            Response::status_only(400)
        }
        Err(ReadError::Io(e)) => {
            debug!(error = %e, "socket read error");
            Response::status_only(400)
        }
    };

    let bytes = response.to_wire();
    if let Err(e) = stream.write_all(&bytes).await {
        debug!(error = %e, "failed to write response (client likely disconnected)");
    }
    let _ = stream.shutdown().await;
}

enum ReadError {
    Timeout,
    Io(std::io::Error),
}

/// Reads at most `MAX_REQUEST_BYTES`, within `READ_TIMEOUT`. Returns `Ok(None)`
/// on a clean EOF with no bytes read (client connected but never sent).
async fn read_request_line(stream: &mut UnixStream) -> Result<Option<String>, ReadError> {
    let mut buf = vec![0u8; MAX_REQUEST_BYTES];
    let n = tokio::time::timeout(READ_TIMEOUT, stream.read(&mut buf))
        .await
        .map_err(|_| ReadError::Timeout)?
        .map_err(ReadError::Io)?;

    if n == 0 {
        return Ok(None);
    }

    let text = String::from_utf8_lossy(&buf[..n]);
    Ok(Some(text.trim_end_matches(['\r', '\n']).to_string()))
}

async fn dispatch(
    line: &str,
    cache: &Cache,
    source: &SharedAccountsSource,
    fatal_tx: &tokio::sync::mpsc::Sender<String>,
) -> Response {
    let (method, arg) = match line.split_once(' ') {
        Some((m, a)) => (m, a),
        None => (line, ""),
    };

    let result = run_handler(method, arg, cache, source).await;
    match result {
        Ok(response) => response,
        Err(HandlerError::BadRequest) => Response::status_only(400),
        Err(HandlerError::Lookup(err)) => Response::from_error(&err),
        Err(HandlerError::Fatal(message)) => {
            error!(%message, "fatal error escaped request handler");
            let _ = fatal_tx.try_send(message);
            Response::status_only(500)
        }
    }
}

enum HandlerError {
    BadRequest,
    Lookup(AccountsError),
    #[allow(dead_code)]
    Fatal(String),
}

impl From<AccountsError> for HandlerError {
    fn from(err: AccountsError) -> Self {
        HandlerError::Lookup(err)
    }
}

async fn run_handler(
    method: &str,
    arg: &str,
    cache: &Cache,
    source: &SharedAccountsSource,
) -> Result<Response, HandlerError> {
    match method {
        "get_user_by_name" => handle_get_user_by_name(arg, cache, source).await,
        "get_user_by_uid" => {
            let uid: u32 = arg.parse().map_err(|_| HandlerError::BadRequest)?;
            let user = cache.get_user_by_uid(uid)?;
            Ok(Response::ok(vec![user.to_passwd_line()]))
        }
        "get_users" => {
            let lines = cache.list_users().iter().map(|u| u.to_passwd_line()).collect();
            Ok(Response::ok(lines))
        }
        "get_group_by_name" => {
            let group = cache.get_group_by_name(arg)?;
            Ok(Response::ok(vec![group.to_group_line()]))
        }
        "get_group_by_gid" => {
            let gid: u32 = arg.parse().map_err(|_| HandlerError::BadRequest)?;
            let group = cache.get_group_by_gid(gid)?;
            Ok(Response::ok(vec![group.to_group_line()]))
        }
        "get_groups" => {
            let lines = cache.list_groups().iter().map(|g| g.to_group_line()).collect();
            Ok(Response::ok(lines))
        }
        "get_account_names" => {
            let mut names: BTreeSet<String> = BTreeSet::new();
            names.extend(cache.list_users().into_iter().map(|u| u.name));
            names.extend(cache.list_groups().into_iter().map(|g| g.name));
            Ok(Response::ok(names.into_iter().collect()))
        }
        "is_account_name" => {
            cache.validate_account_name(arg)?;
            Ok(Response::empty_ok())
        }
        "get_authorized_keys" => handle_get_authorized_keys(arg, cache, source).await,
        _ => Err(HandlerError::BadRequest),
    }
}

/// On a cache miss, trigger exactly one targeted refresh scoped to this
/// user, then retry. This is the sole handler that induces an on-demand
/// refresh.
async fn handle_get_user_by_name(
    name: &str,
    cache: &Cache,
    source: &SharedAccountsSource,
) -> Result<Response, HandlerError> {
    match cache.get_user_by_name(name) {
        Ok(user) => Ok(Response::ok(vec![user.to_passwd_line()])),
        Err(AccountsError::NotFound(_)) => {
            let (users, groups) = source.get_users_and_groups(Some(name)).await?;
            cache.replace_accounts(users, groups);
            let user = cache.get_user_by_name(name)?;
            Ok(Response::ok(vec![user.to_passwd_line()]))
        }
        Err(other) => Err(other.into()),
    }
}

/// Calls the HTTP client first; on `Backend`/`OutOfQuota`, falls back to a
/// fresh cache entry if one exists, else re-raises the underlying failure. A
/// `NotFound` from the HTTP client is returned directly, bypassing the cache
/// entirely — an upstream 404 means the account genuinely has no keys, which
/// a stale cached entry would misreport.
async fn handle_get_authorized_keys(
    name: &str,
    cache: &Cache,
    source: &SharedAccountsSource,
) -> Result<Response, HandlerError> {
    match source.get_authorized_keys(name).await {
        Ok(keys) => {
            cache.put_authorized_keys(name, keys.clone());
            Ok(Response::ok(keys.keys))
        }
        Err(AccountsError::NotFound(_)) => Err(AccountsError::NotFound(name.to_string()).into()),
        Err(backend_err @ (AccountsError::Backend(_) | AccountsError::OutOfQuota { .. })) => {
            match cache.get_authorized_keys(name) {
                Ok(keys) => {
                    warn!(user = name, "serving stale-but-fresh authorized keys after upstream failure");
                    Ok(Response::ok(keys.keys))
                }
                Err(_) => Err(backend_err.into()),
            }
        }
        Err(other) => Err(other.into()),
    }
}
