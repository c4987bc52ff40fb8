//! Per-session rotation task.
//!
//! Each active session gets one Tokio task running a [`RotationTimer`]
//! loop. The task holds no session state of its own: every tick issues a
//! fresh token and writes it through the store, which is where verifiers
//! read it back.

use std::sync::Arc;

use rollcall_protocol::{Clock, PresenceToken, SessionId, TokenCodec};
use rollcall_rotation::{RotationConfig, RotationTimer};
use rollcall_store::SessionStore;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::SessionError;

/// Cancellation handle for a running rotation task.
pub(crate) struct RotationHandle {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RotationHandle {
    /// Signals the task to stop and waits until it has.
    ///
    /// A rotation already in flight finishes first; the store rejects it
    /// if the session was ended before it landed.
    pub(crate) async fn stop(self) {
        let _ = self.cancel.send(());
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "rotation task did not exit cleanly");
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Issues a new token for the session and persists it as current.
pub(crate) async fn rotate_token<S: SessionStore, C: Clock>(
    store: &S,
    codec: &TokenCodec,
    clock: &C,
    session_id: SessionId,
) -> Result<PresenceToken, SessionError> {
    let token = codec.issue(session_id, clock.now());
    store
        .update_session_token(session_id, token.clone())
        .await?;
    Ok(token)
}

/// Spawns the rotation loop for one session.
pub(crate) fn spawn_rotation<S: SessionStore, C: Clock>(
    session_id: SessionId,
    store: Arc<S>,
    codec: Arc<TokenCodec>,
    clock: Arc<C>,
    config: RotationConfig,
) -> RotationHandle {
    let (cancel, mut cancel_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut timer = RotationTimer::new(config);
        tracing::info!(
            %session_id,
            interval_secs = timer.interval().as_secs(),
            "rotation loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut cancel_rx => break,
                tick = timer.wait_for_rotation() => {
                    match rotate_token(&*store, &codec, &*clock, session_id).await {
                        Ok(token) => {
                            timer.record_success();
                            tracing::debug!(
                                %session_id,
                                rotation = tick.rotation,
                                issued_at = token.issued_at_millis,
                                "token rotated"
                            );
                        }
                        Err(SessionError::NotActive(_) | SessionError::NotFound(_)) => {
                            tracing::info!(%session_id, "session no longer active");
                            break;
                        }
                        Err(err) => {
                            timer.record_failure();
                            tracing::warn!(
                                %session_id,
                                error = %err,
                                consecutive = timer.metrics().consecutive_failures,
                                "rotation failed, retrying next tick"
                            );
                        }
                    }
                }
            }
        }

        tracing::info!(
            %session_id,
            rotations = timer.metrics().total_rotations,
            failures = timer.metrics().total_failures,
            "rotation loop stopped"
        );
    });

    RotationHandle { cancel, task }
}
