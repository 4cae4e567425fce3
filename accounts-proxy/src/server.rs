use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use accounts_cache::Cache;
use accounts_client::SharedAccountsSource;
use accounts_core::AccountsError;
use tokio::net::UnixListener;
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::dispatcher;
use crate::refresh;

/// Per-run bookkeeping, created by `start()`. Whichever of `start()` (after
/// the accept loop exits) or `shutdown()` gets there first takes and awaits
/// the refresh handle / accept-loop-done signal; the other finds it already
/// taken and does nothing.
struct ServingState {
    shutdown_tx: watch::Sender<bool>,
    accept_done_rx: Arc<AsyncMutex<Option<oneshot::Receiver<()>>>>,
    refresh_handle: Arc<AsyncMutex<Option<JoinHandle<()>>>>,
}

/// The accounts proxy's Unix-socket server: accept loop, per-connection
/// dispatch, and the background refresh task, wired together behind a
/// single start/shutdown lifecycle. Supports idempotent restart: `start()`
/// after a completed `shutdown()` succeeds.
pub struct AccountsServer {
    socket_path: PathBuf,
    cache: Arc<Cache>,
    source: SharedAccountsSource,
    state: StdMutex<Option<ServingState>>,
}

impl AccountsServer {
    pub fn new(socket_path: PathBuf, cache: Arc<Cache>, source: SharedAccountsSource) -> Self {
        Self {
            socket_path,
            cache,
            source,
            state: StdMutex::new(None),
        }
    }

    /// Performs the initial cache refresh, binds the socket, starts the
    /// refresh task, then runs the accept loop until shutdown or a fatal
    /// error. Fails with `AlreadyServing` if already running.
    pub async fn start(&self) -> Result<(), AccountsError> {
        {
            let guard = self.state.lock().expect("server state mutex poisoned");
            if guard.is_some() {
                return Err(AccountsError::AlreadyServing);
            }
        }

        if let Err(err) = refresh::refresh_once(&self.cache, &self.source).await {
            warn!(error = %err, "initial cache refresh failed, starting with an empty cache");
        }

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .map_err(|e| AccountsError::Backend(format!("failed to unlink stale socket: {e}")))?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AccountsError::Backend(format!("failed to create socket directory: {e}")))?;
        }
        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| AccountsError::Backend(format!("failed to bind {}: {e}", self.socket_path.display())))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (fatal_tx, fatal_rx) = mpsc::channel::<String>(1);
        let (accept_done_tx, accept_done_rx) = oneshot::channel::<()>();

        let refresh_handle = tokio::spawn(refresh::run(
            Arc::clone(&self.cache),
            Arc::clone(&self.source),
            shutdown_rx.clone(),
            fatal_tx.clone(),
        ));

        let accept_done_slot = Arc::new(AsyncMutex::new(Some(accept_done_rx)));
        let refresh_handle_slot = Arc::new(AsyncMutex::new(Some(refresh_handle)));

        {
            let mut guard = self.state.lock().expect("server state mutex poisoned");
            *guard = Some(ServingState {
                shutdown_tx: shutdown_tx.clone(),
                accept_done_rx: Arc::clone(&accept_done_slot),
                refresh_handle: Arc::clone(&refresh_handle_slot),
            });
        }

        info!(path = %self.socket_path.display(), "accounts proxy listening");
        let mut fatal_message = accept_loop(
            listener,
            shutdown_rx,
            fatal_tx,
            fatal_rx,
            Arc::clone(&self.cache),
            Arc::clone(&self.source),
        )
        .await;

        // Idempotent: shutdown() may already have sent this.
        let _ = shutdown_tx.send(true);
        let _ = accept_done_tx.send(());

        if let Some(handle) = refresh_handle_slot.lock().await.take() {
            if let Err(join_err) = handle.await {
                if fatal_message.is_none() {
                    fatal_message = Some(format!("refresh task panicked: {join_err}"));
                }
            }
        }

        {
            let mut guard = self.state.lock().expect("server state mutex poisoned");
            *guard = None;
        }

        match fatal_message {
            Some(message) => Err(AccountsError::Backend(message)),
            None => Ok(()),
        }
    }

    /// Stops accepting new connections and waits for the refresh task to
    /// exit. Fails with `NotServing` if not currently running.
    pub async fn shutdown(&self) -> Result<(), AccountsError> {
        let (shutdown_tx, accept_done_rx, refresh_handle) = {
            let guard = self.state.lock().expect("server state mutex poisoned");
            match guard.as_ref() {
                Some(state) => (
                    state.shutdown_tx.clone(),
                    Arc::clone(&state.accept_done_rx),
                    Arc::clone(&state.refresh_handle),
                ),
                None => return Err(AccountsError::NotServing),
            }
        };

        let _ = shutdown_tx.send(true);

        if let Some(rx) = accept_done_rx.lock().await.take() {
            let _ = rx.await;
        }
        if let Some(handle) = refresh_handle.lock().await.take() {
            if let Err(join_err) = handle.await {
                error!(error = %join_err, "refresh task panicked during shutdown");
            }
        }
        Ok(())
    }
}

/// The accept loop itself: one task per connection, racing accept against
/// the shutdown signal and the fatal channel. Returns the first fatal
/// message, if any, so `start()` can re-raise it.
async fn accept_loop(
    listener: UnixListener,
    mut shutdown_rx: watch::Receiver<bool>,
    fatal_tx: mpsc::Sender<String>,
    mut fatal_rx: mpsc::Receiver<String>,
    cache: Arc<Cache>,
    source: SharedAccountsSource,
) -> Option<String> {
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, _addr)) => {
                        let cache = Arc::clone(&cache);
                        let source = Arc::clone(&source);
                        let fatal_tx = fatal_tx.clone();
                        tokio::spawn(async move {
                            dispatcher::handle_connection(stream, cache, source, fatal_tx).await;
                        });
                    }
                    Err(e) => error!(error = %e, "accept error"),
                }
            }
            _ = shutdown_rx.changed() => {
                info!("accept loop exiting on shutdown");
                return None;
            }
            Some(message) = fatal_rx.recv() => {
                error!(%message, "fatal error reported, tearing down server");
                return Some(message);
            }
        }
    }
}
