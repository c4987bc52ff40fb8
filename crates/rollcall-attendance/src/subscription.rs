//! The subscriber side of a roster feed.

use std::collections::VecDeque;

use futures_util::Stream;
use rollcall_protocol::{RosterDelta, RosterSnapshot, SessionId};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::roster::RosterHandle;

/// A live view of one session's roster.
///
/// The first delta is always a [`RosterDelta::Snapshot`]. After that come
/// `Marked` deltas in commit order and, when the session ends, one
/// `Closed`, after which [`recv`](Self::recv) returns `None`.
///
/// A subscriber that falls too far behind receives a fresh `Snapshot`
/// in place of the deltas it missed. Nothing is ever delivered twice.
pub struct RosterSubscription {
    session_id: SessionId,
    queued: VecDeque<RosterDelta>,
    deltas: Option<broadcast::Receiver<RosterDelta>>,
    roster: Option<RosterHandle>,
    /// Highest commit sequence already delivered.
    delivered_seq: u64,
}

impl RosterSubscription {
    pub(crate) fn live(
        snapshot: RosterSnapshot,
        deltas: broadcast::Receiver<RosterDelta>,
        roster: RosterHandle,
    ) -> Self {
        Self {
            session_id: snapshot.session_id,
            queued: VecDeque::from([RosterDelta::Snapshot(snapshot)]),
            deltas: Some(deltas),
            roster: Some(roster),
            delivered_seq: 0,
        }
    }

    /// A subscription to a session that has already ended: its snapshot,
    /// then `Closed`.
    pub(crate) fn finished(snapshot: RosterSnapshot, closed: RosterDelta) -> Self {
        Self {
            session_id: snapshot.session_id,
            queued: VecDeque::from([RosterDelta::Snapshot(snapshot), closed]),
            deltas: None,
            roster: None,
            delivered_seq: 0,
        }
    }

    /// The session this subscription follows.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Waits for the next delta. `None` once the session has closed (or
    /// the feed shut down).
    pub async fn recv(&mut self) -> Option<RosterDelta> {
        loop {
            if let Some(delta) = self.queued.pop_front() {
                self.observe(&delta);
                return Some(delta);
            }

            let deltas = self.deltas.as_mut()?;
            match deltas.recv().await {
                Ok(RosterDelta::Marked { record, .. })
                    if record.seq <= self.delivered_seq =>
                {
                    continue;
                }
                Ok(delta) => {
                    self.observe(&delta);
                    return Some(delta);
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(
                        session_id = %self.session_id,
                        missed,
                        "roster subscriber lagged, resending snapshot"
                    );
                    if let Some(roster) = &self.roster {
                        if let Ok(snapshot) = roster.snapshot().await {
                            self.queued.push_back(RosterDelta::Snapshot(snapshot));
                        }
                    }
                }
                Err(RecvError::Closed) => {
                    self.deltas = None;
                    return None;
                }
            }
        }
    }

    /// Converts the subscription into a `Stream` of deltas.
    pub fn into_stream(self) -> impl Stream<Item = RosterDelta> + Send {
        futures_util::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|delta| (delta, sub))
        })
    }

    fn observe(&mut self, delta: &RosterDelta) {
        match delta {
            // Commit sequence numbers are dense from 1, so the number of
            // records present is the highest sequence folded in.
            RosterDelta::Snapshot(snapshot) => {
                self.delivered_seq = snapshot.counts.present as u64;
            }
            RosterDelta::Marked { record, .. } => {
                self.delivered_seq = record.seq;
            }
            RosterDelta::Closed { .. } => {
                self.deltas = None;
                self.roster = None;
            }
        }
    }
}
