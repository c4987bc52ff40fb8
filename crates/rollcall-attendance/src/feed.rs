//! Roster feed: routes commits and subscribers to per-session actors.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rollcall_protocol::{AttendanceRecord, RosterSnapshot, SessionId};
use rollcall_store::SessionStore;
use tokio::sync::Mutex;

use crate::roster::{spawn_roster, RosterHandle, RosterState};
use crate::{FeedConfig, FeedError, RosterSubscription};

/// Streams live roster deltas to observers (the instructor dashboard).
///
/// A roster actor is started the first time someone subscribes to a
/// session and lives until the session is closed. Sessions nobody watches
/// cost nothing: commits for them are dropped here, and a later subscriber
/// rebuilds the roster from the store.
pub struct RosterFeed<S> {
    store: Arc<S>,
    config: FeedConfig,
    /// Running roster actors, keyed by session.
    rosters: Arc<Mutex<HashMap<SessionId, RosterHandle>>>,
}

impl<S> Clone for RosterFeed<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            rosters: Arc::clone(&self.rosters),
        }
    }
}

/// Either a running actor or the final state of an ended session.
enum Roster {
    Live(RosterHandle),
    Finished(RosterState),
}

impl<S: SessionStore> RosterFeed<S> {
    /// Creates a feed reading from `store`.
    pub fn new(store: Arc<S>, config: FeedConfig) -> Self {
        Self {
            store,
            config: config.validated(),
            rosters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribes to a session's roster.
    ///
    /// The subscription starts with a snapshot of the store's current
    /// truth. For an ended session it carries the snapshot and `Closed`.
    ///
    /// # Errors
    /// [`FeedError::SessionNotFound`] for an unknown session;
    /// [`FeedError::Store`] if the roster could not be loaded.
    pub async fn subscribe(
        &self,
        session_id: SessionId,
    ) -> Result<RosterSubscription, FeedError> {
        // The second attempt covers an actor that stopped between lookup
        // and subscribe (the session was closed in between).
        for _ in 0..2 {
            let handle = match self.roster_for(session_id).await? {
                Roster::Live(handle) => handle,
                Roster::Finished(state) => {
                    return Ok(RosterSubscription::finished(
                        state.snapshot(),
                        state.closed_delta(),
                    ));
                }
            };

            match handle.subscribe().await {
                Ok((snapshot, deltas)) => {
                    tracing::debug!(%session_id, "roster subscriber added");
                    return Ok(RosterSubscription::live(snapshot, deltas, handle));
                }
                Err(FeedError::Unavailable(_)) => self.forget(session_id, &handle).await,
                Err(err) => return Err(err),
            }
        }
        Err(FeedError::Unavailable(session_id))
    }

    /// Publishes a committed record to the session's subscribers, if any.
    pub async fn publish(&self, record: AttendanceRecord) {
        let session_id = record.session_id;
        let handle = self.rosters.lock().await.get(&session_id).cloned();
        let Some(handle) = handle else {
            return;
        };
        if handle.commit(record).await.is_err() {
            tracing::debug!(%session_id, "roster actor gone, commit not mirrored");
            self.forget(session_id, &handle).await;
        }
    }

    /// Current roster of a session.
    ///
    /// Answered by the running actor when there is one, otherwise read
    /// straight from the store.
    pub async fn snapshot(&self, session_id: SessionId) -> Result<RosterSnapshot, FeedError> {
        let handle = self.rosters.lock().await.get(&session_id).cloned();
        if let Some(handle) = handle {
            if let Ok(snapshot) = handle.snapshot().await {
                return Ok(snapshot);
            }
        }
        let state =
            RosterState::load(&*self.store, session_id, self.config.recent_limit).await?;
        Ok(state.snapshot())
    }

    /// Publishes `Closed` to the session's subscribers and stops its actor.
    pub async fn close(&self, session_id: SessionId, ended_at: Option<DateTime<Utc>>) {
        let handle = self.rosters.lock().await.remove(&session_id);
        if let Some(handle) = handle {
            let _ = handle.close(ended_at).await;
            tracing::debug!(%session_id, "roster closed");
        }
    }

    /// Number of sessions with a running roster actor.
    pub async fn watched_sessions(&self) -> usize {
        self.rosters.lock().await.len()
    }

    /// Stops every roster actor. Open subscriptions end without `Closed`.
    pub async fn shutdown(&self) {
        let handles: Vec<RosterHandle> =
            self.rosters.lock().await.drain().map(|(_, h)| h).collect();
        for handle in &handles {
            handle.shutdown().await;
        }
        tracing::info!(stopped = handles.len(), "roster feed shut down");
    }

    /// Finds the session's actor, starting one if the session is active.
    ///
    /// The map stays locked while the roster loads, so a commit published
    /// meanwhile waits and reaches the new actor (which drops it if the
    /// load already saw it).
    async fn roster_for(&self, session_id: SessionId) -> Result<Roster, FeedError> {
        let mut rosters = self.rosters.lock().await;
        if let Some(handle) = rosters.get(&session_id) {
            return Ok(Roster::Live(handle.clone()));
        }

        let state =
            RosterState::load(&*self.store, session_id, self.config.recent_limit).await?;
        if !state.is_active() {
            return Ok(Roster::Finished(state));
        }

        let handle = spawn_roster(state, Arc::clone(&self.store), &self.config);
        rosters.insert(session_id, handle.clone());
        Ok(Roster::Live(handle))
    }

    /// Drops a stale handle, unless it has already been replaced.
    async fn forget(&self, session_id: SessionId, stale: &RosterHandle) {
        let mut rosters = self.rosters.lock().await;
        if rosters.get(&session_id).is_some_and(|h| h.same_actor(stale)) {
            rosters.remove(&session_id);
        }
    }
}
