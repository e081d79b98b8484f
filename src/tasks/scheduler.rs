use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, Duration};

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::repositories::sessions::PgSessionStore;
use crate::tasks::sweeper;

pub(crate) async fn run(state: AppState) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweep_handle = tokio::spawn(sweep_loop(state.clone(), shutdown_rx));

    crate::core::shutdown::shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to background tasks");
    }

    if let Err(err) = sweep_handle.await {
        tracing::error!(error = %err, "Background task join failed");
    }

    Ok(())
}

/// Periodic housekeeping. Every error is logged and swallowed: the sweep
/// must never disrupt request handling, and the resolver independently
/// re-checks timeouts at read/write time.
async fn sweep_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let store = PgSessionStore::new(state.db().clone());
    let mut tick = interval(Duration::from_secs(state.settings().exam().sweep_interval_seconds));

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = sweeper::sweep_expired_sessions(&store, primitive_now_utc()).await {
                    tracing::error!(error = %err, "sweep_expired_sessions failed");
                }
            }
        }
    }
}
