//! The streaming parser: cross-chunk buffering, incremental commits,
//! and the completer probe fallback.
//!
//! Each ingested chunk extends the ring buffer and updates balance
//! counters in one forward pass. When the buffer holds a complete
//! top-level value (depth counters back to zero) it is parsed strictly
//! and consumed; otherwise the completer runs in non-destructive probe
//! mode: the repaired tree is committed but the buffer keeps its bytes
//! so later chunks can extend them.

mod buffer;
mod merge;
mod state;

use merge::merge_trees;
pub use state::SessionPhase;
pub(crate) use state::ParseState;

use tracing::debug;

use deltaform_core::errors::CoreError;
use deltaform_core::repair::{CompletionResult, CompletionStrategy};
use deltaform_core::value::JsonValue;

use crate::completer::{CompleteOptions, Completer};

/// What one chunk did to the parse state.
#[derive(Debug, Default)]
pub(crate) struct IngestOutcome {
    /// Bytes dropped by overflow trimming.
    pub dropped: usize,
    /// The committed tree may have changed.
    pub tree_updated: bool,
    /// The completer ran in probe mode.
    pub probe: Option<CompletionResult>,
    /// The residual text is unparseable even after repair.
    pub parse_failed: bool,
}

/// Result of draining the residual at finalize.
#[derive(Debug)]
pub(crate) struct FinalizeOutcome {
    pub result: CompletionResult,
    /// The final strict tree; replaces the committed tree (removals are
    /// allowed at this point). `None` when the committed tree stands.
    pub final_tree: Option<JsonValue>,
}

/// Append a chunk and advance the committed tree.
pub(crate) fn ingest_chunk(
    state: &mut ParseState,
    completer: &Completer,
    strategy: CompletionStrategy,
    chunk: &[u8],
    opts: CompleteOptions<'_>,
) -> Result<IngestOutcome, CoreError> {
    // Cancellation is checked before any state mutation so a cancelled
    // ingest is a clean no-op; the probe below runs without the token.
    if opts.cancel.map_or(false, |t| t.is_cancelled()) {
        return Err(CoreError::Cancelled);
    }
    let opts = CompleteOptions {
        cancel: None,
        ..opts
    };
    state.chunks_received += 1;
    let append = state.buffer.append(chunk)?;
    debug!(
        bytes = chunk.len(),
        buffered = state.buffer.len(),
        depth = state.buffer.depth(),
        in_string = state.buffer.in_string(),
        reopened = state.buffer.has_reopen_prefix(),
        "chunk buffered"
    );
    let mut outcome = IngestOutcome {
        dropped: append.dropped,
        ..Default::default()
    };

    let window = state.buffer.window();
    if window.trim().is_empty() {
        return Ok(outcome);
    }

    // Largest safe prefix: a complete top-level value parses strictly and
    // is consumed from the buffer.
    if let Some(prefix) = state.buffer.closed_prefix() {
        if prefix <= window.len() {
            if let Ok(tree) = JsonValue::from_json_str(window[..prefix].trim_start()) {
                commit(state, tree);
                state.buffer.consume(prefix);
                outcome.tree_updated = true;
                return Ok(outcome);
            }
            // Clean depth counters but strict parse failed; fall through
            // to the probe so the cursor stays put.
        }
    }

    let result = completer.complete_with(&window, strategy, opts)?;
    if let Ok(mut tree) = JsonValue::from_json_str(&result.repaired) {
        mark_open_spine(&mut tree, auto_closed_frames(&result));
        commit(state, tree);
        outcome.tree_updated = true;
    }
    outcome.parse_failed = !result.is_valid;
    outcome.probe = Some(result);
    Ok(outcome)
}

/// Drain the residual text through the completer one last time.
pub(crate) fn finalize_residual(
    state: &mut ParseState,
    completer: &Completer,
    strategy: CompletionStrategy,
    opts: CompleteOptions<'_>,
) -> Result<FinalizeOutcome, CoreError> {
    let window = state.buffer.window();

    if window.trim().is_empty() {
        // Nothing residual: the committed tree is final. Reported
        // through the completer so the result carries a trace.
        let text = if state.has_committed {
            state.committed.canonical_string()
        } else {
            String::new()
        };
        let result = completer.complete_with(&text, strategy, opts)?;
        state.finalized = true;
        let final_tree = if state.has_committed {
            None
        } else {
            JsonValue::from_json_str(&result.repaired).ok().map(|t| {
                commit(state, t.clone());
                t
            })
        };
        return Ok(FinalizeOutcome { result, final_tree });
    }

    let result = completer.complete_with(&window, strategy, opts)?;
    state.finalized = true;
    let final_tree = match JsonValue::from_json_str(&result.repaired) {
        Ok(tree) => {
            // The last parse wins wholesale; paths retained mid-stream
            // may now disappear.
            state.committed = tree.clone();
            state.has_committed = true;
            Some(tree)
        }
        Err(_) => None,
    };
    Ok(FinalizeOutcome { result, final_tree })
}

fn commit(state: &mut ParseState, tree: JsonValue) {
    if state.has_committed {
        merge_trees(&mut state.committed, tree);
    } else {
        state.committed = tree;
        state.has_committed = true;
    }
}

/// Containers the completer closed at end of input; they sit on the
/// rightmost spine of the repaired tree and are still open to extension.
fn auto_closed_frames(result: &CompletionResult) -> usize {
    result
        .trace
        .steps
        .iter()
        .rev()
        .take_while(|s| s.applied && matches!(s.op.as_str(), "close-object" | "close-array"))
        .count()
}

fn mark_open_spine(tree: &mut JsonValue, open: usize) {
    if open == 0 {
        return;
    }
    let total = spine_len(tree);
    mark_spine(tree, 0, total.saturating_sub(open));
}

fn spine_len(value: &JsonValue) -> usize {
    match value {
        JsonValue::Object(o) => 1 + o.last().map(|(_, v)| spine_len(v)).unwrap_or(0),
        JsonValue::Array(a) => 1 + a.items.last().map(spine_len).unwrap_or(0),
        _ => 0,
    }
}

fn mark_spine(value: &mut JsonValue, index: usize, open_from: usize) {
    match value {
        JsonValue::Object(o) => {
            if index >= open_from {
                o.closed = false;
            }
            if let Some(last) = o.last_mut() {
                mark_spine(last, index + 1, open_from);
            }
        }
        JsonValue::Array(a) => {
            if index >= open_from {
                a.closed = false;
            }
            if let Some(last) = a.items.last_mut() {
                mark_spine(last, index + 1, open_from);
            }
        }
        _ => {}
    }
}
