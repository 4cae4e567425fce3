use std::sync::Arc;
use std::time::Duration;

use accounts_cache::Cache;
use accounts_client::SharedAccountsSource;
use accounts_core::AccountsError;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Interval between background refreshes of the full account snapshot.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(1800);

/// Runs one refresh: fetch, then replace the cache on success. Lookup
/// failures (`NotFound`/`Backend`/`OutOfQuota`) are logged and swallowed by
/// the caller; anything else would be a bug in this codebase (there is no
/// other failure mode for `AccountsSource`), so it is not specially handled
/// here.
pub async fn refresh_once(cache: &Cache, source: &SharedAccountsSource) -> Result<(), AccountsError> {
    let (users, groups) = source.get_users_and_groups(None).await?;
    cache.replace_accounts(users, groups);
    Ok(())
}

/// The background refresh task: sleeps for `REFRESH_INTERVAL`, interruptibly
/// (a plain `sleep` would not let `shutdown()` wake it promptly), then
/// refreshes, then repeats. Exits as soon as `shutdown` is notified. Any
/// failure that is not an ordinary lookup failure is reported to `fatal_tx`
/// before the task exits, so the server can tear itself down instead of
/// continuing to serve a cache that will never refresh again.
pub async fn run(
    cache: Arc<Cache>,
    source: SharedAccountsSource,
    mut shutdown_rx: watch::Receiver<bool>,
    fatal_tx: mpsc::Sender<String>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(REFRESH_INTERVAL) => {}
            _ = shutdown_rx.changed() => {
                info!("refresh loop exiting on shutdown");
                return;
            }
        }

        match refresh_once(&cache, &source).await {
            Ok(()) => info!("periodic cache refresh succeeded"),
            Err(err) if err.is_lookup_failure() => {
                warn!(error = %err, "periodic cache refresh failed, will retry next interval");
            }
            Err(err) => {
                error!(error = %err, "periodic cache refresh failed fatally");
                let _ = fatal_tx.try_send(format!("refresh task failed fatally: {err}"));
                return;
            }
        }
    }
}
