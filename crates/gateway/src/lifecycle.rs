//! Lifecycle Manager (§4.9) — owns process-signal handling and the
//! coordinated shutdown sweep: notify every live connection, give each
//! session's persistence a bounded window to flush, then exit.
//!
//! Grounded on the teacher's signal-handling block in `main.rs` (SIGINT +
//! SIGTERM via `tokio::signal`, one shared shutdown future raced against
//! the server future), generalized into its own awaitable so `main.rs`
//! stays a thin assembly script.

use std::time::Duration;

use ak_domain::event::EventType;
use ak_domain::Event;

use crate::state::AppState;

const SHUTDOWN_FLUSH_DEADLINE: Duration = Duration::from_secs(5);

/// Resolves when SIGINT or SIGTERM is received (SIGTERM is unix-only; on
/// other platforms only Ctrl+C is observed).
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

/// Run the shutdown sweep: broadcast `shutdown` to every connected socket,
/// let each session's loop task drain (bounded by `SHUTDOWN_FLUSH_DEADLINE`
/// each), then force a final persistence sync.
///
/// §7's propagation policy applies here too: a persistence failure during
/// this sweep is logged, never returned as an error that would block exit.
pub async fn run_shutdown_sweep(state: &AppState) {
    state.connections.broadcast(Event::bare(EventType::Shutdown));

    let sessions = state.sessions.list_sessions();
    tracing::info!(count = sessions.len(), "shutting down live sessions");
    for info in sessions {
        let ok = state
            .sessions
            .shutdown_session_with_deadline(&info.session_id, SHUTDOWN_FLUSH_DEADLINE)
            .await;
        if !ok {
            tracing::warn!(session_id = %info.session_id, "session did not shut down cleanly within deadline");
        }
    }

    if let Err(e) = state.persistence.lock().await.force_sync().await {
        tracing::error!(error = %e, "final persistence sync failed during shutdown");
    }
}
