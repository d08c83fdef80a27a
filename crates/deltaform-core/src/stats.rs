//! Session and engine statistics.
//!
//! Plain counters snapshotted on demand. Durations are reported in
//! milliseconds; time-to-first-path measures the gap between session
//! creation and the first emitted `added` event.

use serde::{Deserialize, Serialize};

/// Per-session counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub chunks_received: u64,
    pub chunks_processed: u64,
    pub chunks_failed: u64,
    pub bytes_received: u64,
    pub bytes_dropped: u64,
    pub buffer_overflows: u64,
    pub repair_attempts: u64,
    pub repair_successes: u64,
    pub events_emitted: u64,
    pub events_coalesced: u64,
    pub events_deduplicated: u64,
    pub largest_chunk_bytes: usize,
    /// Milliseconds from session creation to the first `added` event.
    pub time_to_first_path_ms: Option<u64>,
    /// Milliseconds from session creation to the terminal event.
    pub completion_ms: Option<u64>,
}

/// Engine-wide aggregates.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub sessions_created: u64,
    pub sessions_expired: u64,
    pub sessions_closed: u64,
    pub active_sessions: usize,
    pub completions_total: u64,
    pub completions_successful: u64,
    pub completions_failed: u64,
    pub events_emitted: u64,
}

impl EngineStats {
    /// Completion success rate in [0, 1]; 1.0 before any attempt.
    pub fn completion_success_rate(&self) -> f64 {
        if self.completions_total == 0 {
            return 1.0;
        }
        self.completions_successful as f64 / self.completions_total as f64
    }
}
