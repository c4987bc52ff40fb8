//! Roster actor: an isolated Tokio task that mirrors one session's roster.
//!
//! Each watched session gets its own task, fed through an mpsc channel.
//! The actor folds committed records into counts and fans the resulting
//! deltas out over a broadcast channel. It never writes anything: the
//! store stays the source of truth, and the actor can always be rebuilt
//! from it.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rollcall_protocol::{
    AttendanceRecord, RosterCounts, RosterDelta, RosterSnapshot, SessionId,
    SessionStatus,
};
use rollcall_store::SessionStore;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{FeedConfig, FeedError};

// ---------------------------------------------------------------------------
// RosterState
// ---------------------------------------------------------------------------

/// Aggregated roster of one session.
#[derive(Debug, Clone)]
pub(crate) struct RosterState {
    pub(crate) session_id: SessionId,
    pub(crate) status: SessionStatus,
    pub(crate) ended_at: Option<DateTime<Utc>>,
    counts: RosterCounts,
    /// Newest first, at most `recent_limit` long.
    recent: VecDeque<AttendanceRecord>,
    recent_limit: usize,
    /// Highest commit sequence folded in so far.
    last_seq: u64,
}

impl RosterState {
    /// Builds the roster from the store's current truth.
    pub(crate) async fn load<S: SessionStore>(
        store: &S,
        session_id: SessionId,
        recent_limit: usize,
    ) -> Result<Self, FeedError> {
        let session = store
            .get_session(session_id)
            .await?
            .ok_or(FeedError::SessionNotFound(session_id))?;
        let enrolled = store.count_enrolled(session.course_id).await?;
        let records = store.list_records(session_id).await?;

        let counts = RosterCounts {
            enrolled,
            present: records.len(),
            late: records.iter().filter(|r| r.is_late).count(),
        };
        let last_seq = records.iter().map(|r| r.seq).max().unwrap_or(0);

        Ok(Self {
            session_id,
            status: session.status,
            ended_at: session.ended_at,
            counts,
            recent: records.into_iter().take(recent_limit).collect(),
            recent_limit,
            last_seq,
        })
    }

    pub(crate) fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub(crate) fn snapshot(&self) -> RosterSnapshot {
        RosterSnapshot {
            session_id: self.session_id,
            status: self.status,
            counts: self.counts,
            recent: self.recent.iter().cloned().collect(),
        }
    }

    pub(crate) fn closed_delta(&self) -> RosterDelta {
        RosterDelta::Closed {
            session_id: self.session_id,
            ended_at: self.ended_at,
            counts: self.counts,
        }
    }

    /// Folds the next record (`seq == last_seq + 1`) into the roster.
    fn apply(&mut self, record: AttendanceRecord) -> RosterDelta {
        self.last_seq = record.seq;
        self.counts.record(&record);
        self.recent.push_front(record.clone());
        self.recent.truncate(self.recent_limit);
        RosterDelta::Marked {
            record,
            counts: self.counts,
        }
    }
}

// ---------------------------------------------------------------------------
// Commands and handle
// ---------------------------------------------------------------------------

/// Commands sent to a roster actor through its channel.
pub(crate) enum RosterCommand {
    /// A record was committed to the store.
    Commit(AttendanceRecord),

    /// Register a subscriber. The snapshot and the receiver are taken in
    /// the same step, so the subscriber sees every later delta exactly once.
    Subscribe {
        reply: oneshot::Sender<(RosterSnapshot, broadcast::Receiver<RosterDelta>)>,
    },

    /// Request the current roster.
    Snapshot {
        reply: oneshot::Sender<RosterSnapshot>,
    },

    /// The session ended: publish `Closed` and stop.
    Close { ended_at: Option<DateTime<Utc>> },

    /// Stop without publishing anything.
    Shutdown,
}

/// Handle to a running roster actor. Cheap to clone.
#[derive(Clone)]
pub(crate) struct RosterHandle {
    session_id: SessionId,
    sender: mpsc::Sender<RosterCommand>,
}

impl RosterHandle {
    pub(crate) fn same_actor(&self, other: &Self) -> bool {
        self.sender.same_channel(&other.sender)
    }

    pub(crate) async fn commit(&self, record: AttendanceRecord) -> Result<(), FeedError> {
        self.sender
            .send(RosterCommand::Commit(record))
            .await
            .map_err(|_| FeedError::Unavailable(self.session_id))
    }

    pub(crate) async fn subscribe(
        &self,
    ) -> Result<(RosterSnapshot, broadcast::Receiver<RosterDelta>), FeedError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RosterCommand::Subscribe { reply: reply_tx })
            .await
            .map_err(|_| FeedError::Unavailable(self.session_id))?;
        reply_rx
            .await
            .map_err(|_| FeedError::Unavailable(self.session_id))
    }

    pub(crate) async fn snapshot(&self) -> Result<RosterSnapshot, FeedError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RosterCommand::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| FeedError::Unavailable(self.session_id))?;
        reply_rx
            .await
            .map_err(|_| FeedError::Unavailable(self.session_id))
    }

    pub(crate) async fn close(&self, ended_at: Option<DateTime<Utc>>) -> Result<(), FeedError> {
        self.sender
            .send(RosterCommand::Close { ended_at })
            .await
            .map_err(|_| FeedError::Unavailable(self.session_id))
    }

    pub(crate) async fn shutdown(&self) {
        let _ = self.sender.send(RosterCommand::Shutdown).await;
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// The internal roster actor. Runs inside a Tokio task.
struct RosterActor<S> {
    state: RosterState,
    /// Commits that arrived ahead of their predecessors, keyed by `seq`.
    pending: BTreeMap<u64, AttendanceRecord>,
    store: Arc<S>,
    deltas: broadcast::Sender<RosterDelta>,
    receiver: mpsc::Receiver<RosterCommand>,
}

impl<S: SessionStore> RosterActor<S> {
    /// Runs the actor loop until the session closes or the feed shuts down.
    async fn run(mut self) {
        let session_id = self.state.session_id;
        tracing::debug!(%session_id, "roster actor started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                RosterCommand::Commit(record) => self.handle_commit(record).await,
                RosterCommand::Subscribe { reply } => {
                    let receiver = self.deltas.subscribe();
                    let _ = reply.send((self.state.snapshot(), receiver));
                }
                RosterCommand::Snapshot { reply } => {
                    let _ = reply.send(self.state.snapshot());
                }
                RosterCommand::Close { ended_at } => {
                    // The store stops accepting records at end, so this
                    // picks up every commit whose publish is still in flight.
                    self.catch_up().await;
                    self.drain_pending();
                    self.state.status = SessionStatus::Ended;
                    self.state.ended_at = ended_at.or(self.state.ended_at);
                    let _ = self.deltas.send(self.state.closed_delta());
                    break;
                }
                RosterCommand::Shutdown => break,
            }
        }

        tracing::debug!(
            %session_id,
            present = self.state.counts.present,
            "roster actor stopped"
        );
    }

    /// Delivers commits strictly in `seq` order.
    ///
    /// Duplicates are dropped. A gap means another publisher's commit is
    /// still in flight (or was lost), so the missing records are read back
    /// from the store.
    async fn handle_commit(&mut self, record: AttendanceRecord) {
        if record.seq <= self.state.last_seq {
            tracing::trace!(seq = record.seq, "commit already applied");
            return;
        }
        self.pending.insert(record.seq, record);

        let next = self.state.last_seq + 1;
        if !self.pending.contains_key(&next) {
            self.catch_up().await;
        }

        self.drain_pending();
    }

    /// Applies and broadcasts every pending record that is next in order.
    fn drain_pending(&mut self) {
        while let Some(record) = self.pending.remove(&(self.state.last_seq + 1)) {
            let delta = self.state.apply(record);
            // No receivers is not an error; the roster still advances.
            let _ = self.deltas.send(delta);
        }
    }

    async fn catch_up(&mut self) {
        let session_id = self.state.session_id;
        match self.store.list_records(session_id).await {
            Ok(records) => {
                let applied = self.state.last_seq;
                for record in records.into_iter().filter(|r| r.seq > applied) {
                    self.pending.entry(record.seq).or_insert(record);
                }
            }
            Err(err) => {
                tracing::warn!(
                    %session_id,
                    error = %err,
                    waiting = self.pending.len(),
                    "roster catch-up failed, holding out-of-order commits"
                );
            }
        }
    }
}

/// Spawns a roster actor seeded with `state` and returns its handle.
pub(crate) fn spawn_roster<S: SessionStore>(
    state: RosterState,
    store: Arc<S>,
    config: &FeedConfig,
) -> RosterHandle {
    let (tx, rx) = mpsc::channel(config.command_buffer);
    let (deltas, _) = broadcast::channel(config.channel_capacity);
    let session_id = state.session_id;

    let actor = RosterActor {
        state,
        pending: BTreeMap::new(),
        store,
        deltas,
        receiver: rx,
    };
    tokio::spawn(actor.run());

    RosterHandle {
        session_id,
        sender: tx,
    }
}
