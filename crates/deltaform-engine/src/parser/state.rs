//! Per-session parse state and lifecycle.

use deltaform_core::value::JsonValue;

use super::buffer::ChunkBuffer;

/// Session lifecycle. Operations on a `Terminal` session fail with
/// `SessionClosed`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SessionPhase {
    #[default]
    Idle,
    Active,
    Draining,
    Terminal,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal)
    }
}

/// Incremental parser state for one session.
#[derive(Debug)]
pub(crate) struct ParseState {
    pub buffer: ChunkBuffer,
    /// The latest best-effort tree. Always a valid value; `Null` with
    /// `has_committed == false` means nothing has parsed yet.
    pub committed: JsonValue,
    pub has_committed: bool,
    pub chunks_received: u64,
    pub finalized: bool,
}

impl ParseState {
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            buffer: ChunkBuffer::new(buffer_capacity),
            committed: JsonValue::Null,
            has_committed: false,
            chunks_received: 0,
            finalized: false,
        }
    }
}
