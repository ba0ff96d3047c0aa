//! Lifecycle state and status snapshots

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a [`StreamController`](crate::StreamController).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// No session exists
    #[default]
    Idle,
    /// Opening the frame source
    Starting,
    /// Capture loop running
    Active,
    /// Tearing down: source closed, uploads draining
    Stopping,
    /// The source failed; cleared by `stop()` or the next `start()`
    Errored,
}

impl StreamState {
    /// Whether a session currently owns a source
    pub fn is_running(self) -> bool {
        matches!(self, StreamState::Starting | StreamState::Active)
    }

    /// Whether the controller has settled and no session task exists
    pub fn is_settled(self) -> bool {
        matches!(self, StreamState::Idle | StreamState::Errored)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Idle => "idle",
            StreamState::Starting => "starting",
            StreamState::Active => "active",
            StreamState::Stopping => "stopping",
            StreamState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Cumulative per-session counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionCounters {
    /// Frames accepted into the buffer
    pub frames_captured: u64,
    /// Batches acknowledged with a 2xx response
    pub batches_sent: u64,
    /// Batches that exhausted retries or were rejected
    pub batches_failed: u64,
    /// Transient capture failures that were skipped
    pub capture_errors: u64,
    /// Captures skipped because the previous frame was not yet committed
    pub frames_skipped: u64,
    /// In-flight uploads aborted when the stop grace period ran out
    pub batches_abandoned: u64,
    /// Frames discarded at stop because partial flush was disabled
    pub frames_dropped: u64,
}

/// Point-in-time status of the controller, as surfaced to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamStatus {
    pub state: StreamState,
    /// Current (or most recent) session
    pub session_id: Option<Uuid>,
    #[serde(flatten)]
    pub counters: SessionCounters,
    /// Message of the source failure that moved the stream to `Errored`
    pub last_error: Option<String>,
}

impl StreamStatus {
    pub fn frames_captured(&self) -> u64 {
        self.counters.frames_captured
    }

    pub fn batches_sent(&self) -> u64 {
        self.counters.batches_sent
    }

    pub fn batches_failed(&self) -> u64 {
        self.counters.batches_failed
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// `stop()` was called
    Stopped,
    /// The source ran out of frames
    EndOfStream,
    /// The source failed fatally
    Failed(String),
}

/// Final report of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub end: SessionEnd,
    pub counters: SessionCounters,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_flat_counters() {
        let status = StreamStatus {
            state: StreamState::Active,
            session_id: None,
            counters: SessionCounters { frames_captured: 3, batches_sent: 2, ..Default::default() },
            last_error: None,
        };
        let json = serde_json::to_value(&status).expect("serialize");
        assert_eq!(json["state"], "active");
        assert_eq!(json["frames_captured"], 3);
        assert_eq!(json["batches_sent"], 2);
    }

    #[test]
    fn settled_and_running_states_are_disjoint() {
        for state in [
            StreamState::Idle,
            StreamState::Starting,
            StreamState::Active,
            StreamState::Stopping,
            StreamState::Errored,
        ] {
            assert!(!(state.is_running() && state.is_settled()), "{state}");
        }
    }
}
