// Stuck-workflow reaper
//
// Background sweep marking running workflows whose `last_activity_at` has
// fallen behind the configured threshold as `stuck`. Operators (or an
// auto-resume policy) decide what happens next: stuck workflows accept
// resume, fail and cancel.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use foreman_core::Result;
use foreman_core::WorkflowState;

use crate::engine::Engine;

/// Spawn the reaper loop. Send `true` on the returned channel to stop it.
pub fn spawn_reaper(engine: Engine, interval: Duration) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("reaper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = sweep(&engine).await {
                        error!(error = %err, "reaper sweep failed");
                    }
                }
            }
        }
    });

    (handle, shutdown_tx)
}

/// One sweep over the store. Public so tests (and an admin surface) can
/// trigger it without the timer.
pub async fn sweep(engine: &Engine) -> Result<usize> {
    let threshold = engine.inner.config.engine.stuck_threshold();
    let candidates = engine.inner.store.stuck_candidates(threshold).await?;
    let mut marked = 0;

    for workflow in candidates {
        match engine
            .transition(
                &workflow.id,
                WorkflowState::Running,
                WorkflowState::Stuck,
                Default::default(),
            )
            .await
        {
            Ok(_) => {
                warn!(
                    workflow_id = %workflow.id,
                    last_activity_at = %workflow.last_activity_at,
                    "workflow marked stuck"
                );
                marked += 1;
            }
            Err(err) => {
                // lost the race with a live transition; nothing to do
                warn!(workflow_id = %workflow.id, error = %err, "stuck marking skipped");
            }
        }
    }

    Ok(marked)
}
