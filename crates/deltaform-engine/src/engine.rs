//! The engine: session lifecycle and the per-chunk pipeline.
//!
//! Sessions live in a concurrent map keyed by id. The ingest path for
//! one session is serialized by its write lock; readers snapshot under
//! the shared lock. Events are sequenced under the session lock and
//! published to the bus after it is released; the per-session ordering
//! guarantee holds because writers for one session are mutually
//! exclusive.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use deltaform_core::config::{DiffMode, EngineConfig};
use deltaform_core::errors::CoreError;
use deltaform_core::events::{DeltaEvent, ErrorInfo, EventKind, ProgressReport};
use deltaform_core::path::{Path, PathStyle};
use deltaform_core::repair::{CompletionResult, CompletionStrategy};
use deltaform_core::stats::{EngineStats, SessionStats};
use deltaform_core::value::{JsonArray, JsonValue, ObjectMap};

use crate::bus::{EventBus, SubscriberHandle, Subscription, SubscriptionFilter};
use crate::coalesce::{Coalescer, PendingDelta};
use crate::completer::{CompleteOptions, Completer};
pub use crate::completer::SchemaHook;
use crate::diff::{ChangeOp, DiffState, StructuralDiffer};
use crate::filter::FieldFilter;
use crate::parser::{self, ParseState, SessionPhase};
use crate::strategy::StrategySelector;

/// Budget for inline subscriber callbacks.
const CALLBACK_BUDGET: Duration = Duration::from_millis(50);

/// Per-session creation options. Everything unset inherits the engine
/// configuration.
#[derive(Default)]
pub struct SessionOptions {
    /// Explicit session id; generated (UUID v7) when absent.
    pub session_id: Option<String>,
    pub field_filter: Option<FieldFilter>,
    /// Pin the completion strategy, bypassing the adaptive selector.
    pub strategy: Option<CompletionStrategy>,
    pub path_style: Option<PathStyle>,
    pub diff_mode: Option<DiffMode>,
}

struct SessionInner {
    phase: SessionPhase,
    parse: ParseState,
    diff_state: DiffState,
    coalescer: Coalescer,
    filter: Option<FieldFilter>,
    strategy_override: Option<CompletionStrategy>,
    path_style: PathStyle,
    differ: StructuralDiffer,
    seq: u64,
    last_activity: Instant,
    stats: SessionStats,
}

struct SessionSlot {
    id: String,
    created: Instant,
    inner: RwLock<SessionInner>,
}

#[derive(Default)]
struct EngineCounters {
    sessions_created: AtomicU64,
    sessions_expired: AtomicU64,
    sessions_closed: AtomicU64,
    events_emitted: AtomicU64,
}

/// The streaming JSON stabilization engine.
pub struct Engine {
    config: EngineConfig,
    sessions: DashMap<String, Arc<SessionSlot>>,
    bus: EventBus,
    completer: Completer,
    selector: StrategySelector,
    schema_hook: RwLock<Option<SchemaHook>>,
    counters: EngineCounters,
}

/// An event sealed under the session lock, ready for publication.
type SealedEvent = (Option<Path>, DeltaEvent);

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let selector = StrategySelector::new(
            config.default_strategy,
            config.adaptive_enabled,
            config.consecutive_failure_threshold,
            Duration::from_secs(config.min_switch_interval_seconds),
        );
        Ok(Self {
            bus: EventBus::new(config.subscriber_queue_cap, CALLBACK_BUDGET),
            sessions: DashMap::new(),
            completer: Completer::new(),
            selector,
            schema_hook: RwLock::new(None),
            counters: EngineCounters::default(),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register the schema validator hook. Affects completions made
    /// after the call; register before creating sessions.
    pub fn set_schema_hook(&self, hook: SchemaHook) {
        *self.schema_hook.write() = Some(hook);
    }

    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        self.bus.subscribe(filter)
    }

    pub fn subscribe_fn(
        &self,
        filter: SubscriptionFilter,
        callback: Arc<dyn Fn(&DeltaEvent) + Send + Sync>,
    ) -> SubscriberHandle {
        self.bus.subscribe_fn(filter, callback)
    }

    pub fn unsubscribe(&self, handle: SubscriberHandle) {
        self.bus.unsubscribe(handle);
    }

    /// Create a session. Fails with `CapacityExceeded` at the session
    /// cap or when the id is already in use.
    #[instrument(skip(self, opts))]
    pub fn create_session(&self, opts: SessionOptions) -> Result<String, CoreError> {
        if self.sessions.len() >= self.config.max_sessions {
            return Err(CoreError::CapacityExceeded(format!(
                "session cap of {} reached",
                self.config.max_sessions
            )));
        }
        let id = opts
            .session_id
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        let inner = SessionInner {
            phase: SessionPhase::Idle,
            parse: ParseState::new(self.config.max_buffer_bytes),
            diff_state: DiffState::new(),
            coalescer: Coalescer::new(&self.config),
            filter: opts.field_filter,
            strategy_override: opts.strategy,
            path_style: opts.path_style.unwrap_or(self.config.path_style),
            differ: StructuralDiffer::new(opts.diff_mode.unwrap_or(self.config.diff_mode)),
            seq: 0,
            last_activity: Instant::now(),
            stats: SessionStats::default(),
        };
        let slot = Arc::new(SessionSlot {
            id: id.clone(),
            created: Instant::now(),
            inner: RwLock::new(inner),
        });

        match self.sessions.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(CoreError::CapacityExceeded(format!(
                    "session {id} already exists"
                )));
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let _ = entry.insert(slot);
            }
        }
        let _ = self.counters.sessions_created.fetch_add(1, Ordering::Relaxed);
        debug!(session_id = %id, "session created");
        Ok(id)
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Append a chunk to a session. `is_final` drains the residual and
    /// transitions the session to `Terminal`.
    pub fn ingest(
        &self,
        session_id: &str,
        chunk: &[u8],
        is_final: bool,
    ) -> Result<ProgressReport, CoreError> {
        self.ingest_inner(session_id, chunk, is_final, None)
    }

    /// Cancellable ingest; cancellation leaves the session consistent.
    pub fn ingest_with_cancel(
        &self,
        session_id: &str,
        chunk: &[u8],
        is_final: bool,
        cancel: &CancellationToken,
    ) -> Result<ProgressReport, CoreError> {
        self.ingest_inner(session_id, chunk, is_final, Some(cancel))
    }

    /// Ingest with back-pressure: waits for queue room on subscribers
    /// that opted in instead of dropping their oldest events.
    pub async fn ingest_with_backpressure(
        &self,
        session_id: &str,
        chunk: &[u8],
        is_final: bool,
    ) -> Result<ProgressReport, CoreError> {
        let (report, events) = self.ingest_collect(session_id, chunk, is_final, None)?;
        for (path, event) in &events {
            self.bus.publish_with_backpressure(path.as_ref(), event).await;
        }
        let _ = self
            .counters
            .events_emitted
            .fetch_add(events.len() as u64, Ordering::Relaxed);
        Ok(report)
    }

    fn ingest_inner(
        &self,
        session_id: &str,
        chunk: &[u8],
        is_final: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<ProgressReport, CoreError> {
        let (report, events) = self.ingest_collect(session_id, chunk, is_final, cancel)?;
        self.publish_all(events);
        Ok(report)
    }

    #[instrument(skip(self, chunk, cancel), fields(bytes = chunk.len()))]
    fn ingest_collect(
        &self,
        session_id: &str,
        chunk: &[u8],
        is_final: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<(ProgressReport, Vec<SealedEvent>), CoreError> {
        let slot = self.get_slot(session_id)?;
        let mut events: Vec<SealedEvent> = Vec::new();
        let mut inner = slot.inner.write();

        if inner.phase.is_terminal() || inner.phase == SessionPhase::Draining {
            return Err(CoreError::SessionClosed(session_id.to_string()));
        }
        if self.config.max_chunk_bytes > 0 && chunk.len() > self.config.max_chunk_bytes {
            return Err(CoreError::CapacityExceeded(format!(
                "chunk of {} bytes exceeds max_chunk_bytes {}",
                chunk.len(),
                self.config.max_chunk_bytes
            )));
        }

        inner.phase = SessionPhase::Active;
        inner.last_activity = Instant::now();
        inner.stats.chunks_received += 1;
        inner.stats.bytes_received += chunk.len() as u64;
        inner.stats.largest_chunk_bytes = inner.stats.largest_chunk_bytes.max(chunk.len());

        let strategy = self.selector.select(inner.strategy_override);
        let before = inner.parse.committed.clone();
        let had_committed = inner.parse.has_committed;

        let outcome = {
            let hook = self.schema_hook.read();
            let opts = CompleteOptions {
                schema_hook: hook.as_ref(),
                historical_success_rate: Some(self.selector.success_rate(strategy)),
                cancel,
            };
            parser::ingest_chunk(&mut inner.parse, &self.completer, strategy, chunk, opts)?
        };

        if let Some(probe) = &outcome.probe {
            inner.stats.repair_attempts += 1;
            if probe.is_valid {
                inner.stats.repair_successes += 1;
            }
            self.selector.record_outcome(
                probe.strategy,
                probe.is_valid,
                probe.confidence,
                (!probe.is_valid).then_some("parse_unrecoverable"),
            );
        }
        if outcome.parse_failed {
            inner.stats.chunks_failed += 1;
        } else {
            inner.stats.chunks_processed += 1;
        }
        if outcome.dropped > 0 {
            inner.stats.bytes_dropped += outcome.dropped as u64;
            inner.stats.buffer_overflows += 1;
            warn!(
                session_id = %slot.id,
                dropped = outcome.dropped,
                "ring buffer overflow, prefix dropped at safe split"
            );
        }

        let mut flushed: Vec<PendingDelta> = Vec::new();
        if outcome.tree_updated {
            let ops = diff_committed(&inner, &before, had_committed);
            let (novel, deduplicated) = inner.diff_state.filter_novel(ops);
            inner.stats.events_deduplicated += deduplicated;
            let touched: HashSet<Path> = novel.iter().map(|op| op.path().clone()).collect();
            flushed.extend(self.offer_all(&mut inner, novel));
            flushed.extend(inner.coalescer.tick(&touched));
        } else {
            flushed.extend(inner.coalescer.tick(&HashSet::new()));
        }
        for delta in flushed {
            events.push(seal_delta(&slot, &mut inner, delta));
        }

        // Direct, uncoalesced events.
        if chunk.is_empty() && !is_final {
            events.push(seal_progress(&slot, &mut inner, 0));
        }
        if outcome.dropped > 0 {
            events.push(seal_progress(&slot, &mut inner, outcome.dropped));
        }
        if outcome.parse_failed {
            let error =
                CoreError::ParseUnrecoverable("residual text failed repair".to_string());
            events.push(seal_error(&slot, &mut inner, &error));
        }

        if is_final {
            let _ = self.drain(&slot, &mut inner, cancel, &mut events)?;
        }

        let report = ProgressReport {
            chunks_received: inner.stats.chunks_received,
            bytes_buffered: inner.parse.buffer.len(),
            bytes_dropped: outcome.dropped,
            tree_updated: outcome.tree_updated,
            events_emitted: events.len(),
        };
        Ok((report, events))
    }

    /// Mark the stream finished and drain the residual. The session ends
    /// `Terminal`; further operations fail with `SessionClosed`.
    pub fn finalize(&self, session_id: &str) -> Result<CompletionResult, CoreError> {
        self.finalize_with_cancel(session_id, None)
    }

    pub fn finalize_with_cancel(
        &self,
        session_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<CompletionResult, CoreError> {
        let slot = self.get_slot(session_id)?;
        let mut events = Vec::new();
        let result = {
            let mut inner = slot.inner.write();
            if inner.phase.is_terminal() || inner.phase == SessionPhase::Draining {
                return Err(CoreError::SessionClosed(session_id.to_string()));
            }
            self.drain(&slot, &mut inner, cancel, &mut events)?
        };
        self.publish_all(events);
        Ok(result)
    }

    fn drain(
        &self,
        slot: &SessionSlot,
        inner: &mut SessionInner,
        cancel: Option<&CancellationToken>,
        events: &mut Vec<SealedEvent>,
    ) -> Result<CompletionResult, CoreError> {
        inner.phase = SessionPhase::Draining;
        let strategy = self.selector.select(inner.strategy_override);
        let before = inner.parse.committed.clone();
        let had_committed = inner.parse.has_committed;

        let outcome = {
            let hook = self.schema_hook.read();
            let opts = CompleteOptions {
                schema_hook: hook.as_ref(),
                historical_success_rate: Some(self.selector.success_rate(strategy)),
                cancel,
            };
            parser::finalize_residual(&mut inner.parse, &self.completer, strategy, opts)
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                // Cancellation: roll the phase back so the caller can
                // retry; nothing else was mutated yet.
                inner.phase = SessionPhase::Active;
                return Err(e);
            }
        };

        inner.stats.repair_attempts += 1;
        if outcome.result.is_valid {
            inner.stats.repair_successes += 1;
        }
        self.selector.record_outcome(
            outcome.result.strategy,
            outcome.result.is_valid,
            outcome.result.confidence,
            (!outcome.result.is_valid).then_some("parse_unrecoverable"),
        );

        if outcome.final_tree.is_some() {
            let ops = diff_committed(inner, &before, had_committed);
            let (novel, deduplicated) = inner.diff_state.filter_novel(ops);
            inner.stats.events_deduplicated += deduplicated;
            let immediate = self.offer_all(inner, novel);
            for delta in immediate {
                events.push(seal_delta(slot, inner, delta));
            }
        }
        for delta in inner.coalescer.flush_all() {
            events.push(seal_delta(slot, inner, delta));
        }

        if !outcome.result.is_valid {
            let error =
                CoreError::ParseUnrecoverable("residual text failed repair at finalize".into());
            events.push(seal_error(slot, inner, &error));
        }
        events.push(seal_complete(slot, inner));

        inner.stats.completion_ms = Some(slot.created.elapsed().as_millis() as u64);
        inner.phase = SessionPhase::Terminal;
        info!(session_id = %slot.id, valid = outcome.result.is_valid, "session drained");
        Ok(outcome.result)
    }

    /// Close a session without draining through the completer; pending
    /// coalesced events are flushed and a terminal event is emitted.
    #[instrument(skip(self))]
    pub fn close(&self, session_id: &str) -> Result<(), CoreError> {
        let slot = self.get_slot(session_id)?;
        let mut events = Vec::new();
        {
            let mut inner = slot.inner.write();
            if inner.phase.is_terminal() {
                return Err(CoreError::SessionClosed(session_id.to_string()));
            }
            self.terminate(&slot, &mut inner, &mut events);
        }
        let _ = self.sessions.remove(session_id);
        let _ = self.counters.sessions_closed.fetch_add(1, Ordering::Relaxed);
        self.publish_all(events);
        Ok(())
    }

    /// Terminal transition shared by close and TTL expiry: flush, then
    /// `Complete`, or `Error` when residual text exists and fails to
    /// parse even after repair.
    fn terminate(
        &self,
        slot: &SessionSlot,
        inner: &mut SessionInner,
        events: &mut Vec<SealedEvent>,
    ) {
        for delta in inner.coalescer.flush_all() {
            events.push(seal_delta(slot, inner, delta));
        }
        let residual = inner.parse.buffer.window();
        if !inner.parse.finalized && !residual.trim().is_empty() {
            let strategy = self.selector.select(inner.strategy_override);
            let result = self.completer.complete(&residual, strategy);
            if !result.is_valid {
                let error =
                    CoreError::ParseUnrecoverable("residual text failed repair at close".into());
                events.push(seal_error(slot, inner, &error));
            }
        }
        events.push(seal_complete(slot, inner));
        inner.stats.completion_ms = Some(slot.created.elapsed().as_millis() as u64);
        inner.phase = SessionPhase::Terminal;
    }

    /// Remove sessions idle past their TTL. Returns how many expired.
    pub fn sweep_expired(&self) -> usize {
        let ttl = Duration::from_secs(self.config.session_ttl_seconds);
        let expired: Vec<Arc<SessionSlot>> = self
            .sessions
            .iter()
            .filter(|entry| {
                let inner = entry.value().inner.read();
                !inner.phase.is_terminal() && inner.last_activity.elapsed() >= ttl
            })
            .map(|entry| entry.value().clone())
            .collect();

        let mut removed = 0;
        for slot in expired {
            let mut events = Vec::new();
            {
                let mut inner = slot.inner.write();
                if inner.phase.is_terminal() {
                    continue;
                }
                self.terminate(&slot, &mut inner, &mut events);
            }
            let _ = self.sessions.remove(&slot.id);
            let _ = self.counters.sessions_expired.fetch_add(1, Ordering::Relaxed);
            info!(session_id = %slot.id, "session expired");
            self.publish_all(events);
            removed += 1;
        }
        removed
    }

    /// Flush coalescing windows that have elapsed, across all sessions.
    /// Driven by the maintenance task.
    pub fn flush_expired_windows(&self) {
        let slots: Vec<Arc<SessionSlot>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        for slot in slots {
            let mut events = Vec::new();
            {
                let mut inner = slot.inner.write();
                if inner.phase != SessionPhase::Active {
                    continue;
                }
                for delta in inner.coalescer.flush_expired() {
                    events.push(seal_delta(&slot, &mut inner, delta));
                }
            }
            self.publish_all(events);
        }
    }

    /// Explicitly flush pending coalesced events: one path, or all of
    /// them. Returns the number of events emitted.
    pub fn flush(&self, session_id: &str, path: Option<&Path>) -> Result<usize, CoreError> {
        let slot = self.get_slot(session_id)?;
        let mut events = Vec::new();
        {
            let mut inner = slot.inner.write();
            if inner.phase.is_terminal() {
                return Err(CoreError::SessionClosed(session_id.to_string()));
            }
            let flushed = match path {
                Some(path) => inner.coalescer.flush_path(path).into_iter().collect(),
                None => inner.coalescer.flush_all(),
            };
            for delta in flushed {
                events.push(seal_delta(&slot, &mut inner, delta));
            }
        }
        let count = events.len();
        self.publish_all(events);
        Ok(count)
    }

    /// Snapshot the committed tree.
    pub fn current_tree(&self, session_id: &str) -> Result<JsonValue, CoreError> {
        let slot = self.get_slot(session_id)?;
        let inner = slot.inner.read();
        Ok(inner.parse.committed.clone())
    }

    /// The accumulated text not yet committed.
    pub fn raw_buffer(&self, session_id: &str) -> Result<Vec<u8>, CoreError> {
        let slot = self.get_slot(session_id)?;
        let inner = slot.inner.read();
        Ok(inner.parse.buffer.as_bytes().to_vec())
    }

    pub fn session_stats(&self, session_id: &str) -> Result<SessionStats, CoreError> {
        let slot = self.get_slot(session_id)?;
        let inner = slot.inner.read();
        Ok(inner.stats.clone())
    }

    pub fn engine_stats(&self) -> EngineStats {
        let total = self.completer.attempt_count();
        let failed = self.completer.failure_count();
        EngineStats {
            sessions_created: self.counters.sessions_created.load(Ordering::Relaxed),
            sessions_expired: self.counters.sessions_expired.load(Ordering::Relaxed),
            sessions_closed: self.counters.sessions_closed.load(Ordering::Relaxed),
            active_sessions: self.sessions.len(),
            completions_total: total,
            completions_successful: total - failed,
            completions_failed: failed,
            events_emitted: self.counters.events_emitted.load(Ordering::Relaxed),
        }
    }

    /// One-shot completion outside any session, driven by the adaptive
    /// selector unless a strategy is given.
    pub fn complete(
        &self,
        input: &str,
        strategy: Option<CompletionStrategy>,
    ) -> CompletionResult {
        let chosen = self.selector.select(strategy);
        let hook = self.schema_hook.read();
        let opts = CompleteOptions {
            schema_hook: hook.as_ref(),
            historical_success_rate: Some(self.selector.success_rate(chosen)),
            cancel: None,
        };
        let result = match self.completer.complete_with(input, chosen, opts) {
            Ok(result) => result,
            // No cancellation token was passed.
            Err(_) => unreachable!("completion without a token cannot be cancelled"),
        };
        self.selector.record_outcome(
            chosen,
            result.is_valid,
            result.confidence,
            (!result.is_valid).then_some("parse_unrecoverable"),
        );
        result
    }

    /// Historical success rate of a strategy, per the adaptive selector.
    pub fn strategy_success_rate(&self, strategy: CompletionStrategy) -> f64 {
        self.selector.success_rate(strategy)
    }

    fn offer_all(&self, inner: &mut SessionInner, ops: Vec<ChangeOp>) -> Vec<PendingDelta> {
        let mut immediate = Vec::new();
        for op in ops {
            let delta = pending_from_op(op);
            if let Some(filter) = &inner.filter {
                if !filter.should_emit(&delta.path) {
                    continue;
                }
            }
            let pending_before = inner.coalescer.pending_count();
            let out = inner.coalescer.offer(delta);
            if out.is_empty() && inner.coalescer.pending_count() == pending_before {
                // Merged into an existing slot.
                inner.stats.events_coalesced += 1;
            }
            immediate.extend(out);
        }
        immediate
    }

    fn publish_all(&self, events: Vec<SealedEvent>) {
        let _ = self
            .counters
            .events_emitted
            .fetch_add(events.len() as u64, Ordering::Relaxed);
        for (path, event) in events {
            self.bus.publish(path.as_ref(), &event);
        }
    }

    fn get_slot(&self, session_id: &str) -> Result<Arc<SessionSlot>, CoreError> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoreError::NotFound(format!("session {session_id}")))
    }
}

/// Diff the committed tree against its previous snapshot. A first commit
/// diffs against an empty container of the same kind so each top-level
/// member surfaces as its own `added` event.
fn diff_committed(inner: &SessionInner, before: &JsonValue, had_committed: bool) -> Vec<ChangeOp> {
    let after = &inner.parse.committed;
    if had_committed {
        return inner.differ.diff(before, after, &Path::root());
    }
    match after {
        JsonValue::Object(_) => {
            inner
                .differ
                .diff(&JsonValue::Object(ObjectMap::open()), after, &Path::root())
        }
        JsonValue::Array(_) => {
            inner
                .differ
                .diff(&JsonValue::Array(JsonArray::open()), after, &Path::root())
        }
        scalar => vec![ChangeOp::Add {
            path: Path::root(),
            value: scalar.clone(),
        }],
    }
}

fn pending_from_op(op: ChangeOp) -> PendingDelta {
    match op {
        ChangeOp::Add { path, value } => PendingDelta {
            kind: EventKind::PathAdded,
            path,
            value: Some(value.to_json()),
            old_value: None,
        },
        ChangeOp::Remove { path, old_value } => PendingDelta {
            kind: EventKind::PathRemoved,
            path,
            value: None,
            old_value: Some(old_value.sketch()),
        },
        ChangeOp::Replace {
            path,
            old_value,
            new_value,
        } => PendingDelta {
            kind: EventKind::ValueChanged,
            path,
            value: Some(new_value.to_json()),
            old_value: Some(old_value.sketch()),
        },
    }
}

fn next_seq(inner: &mut SessionInner) -> u64 {
    let seq = inner.seq;
    inner.seq += 1;
    seq
}

fn seal_delta(slot: &SessionSlot, inner: &mut SessionInner, delta: PendingDelta) -> SealedEvent {
    if delta.kind == EventKind::PathAdded && inner.stats.time_to_first_path_ms.is_none() {
        inner.stats.time_to_first_path_ms = Some(slot.created.elapsed().as_millis() as u64);
    }
    inner.stats.events_emitted += 1;
    let event = DeltaEvent {
        session_id: slot.id.clone(),
        seq: next_seq(inner),
        timestamp_ms: Utc::now().timestamp_millis(),
        kind: delta.kind,
        path: delta.path.render(inner.path_style),
        value: delta.value,
        old_value: delta.old_value,
        error: None,
    };
    (Some(delta.path), event)
}

fn seal_progress(slot: &SessionSlot, inner: &mut SessionInner, dropped: usize) -> SealedEvent {
    inner.stats.events_emitted += 1;
    let event = DeltaEvent {
        session_id: slot.id.clone(),
        seq: next_seq(inner),
        timestamp_ms: Utc::now().timestamp_millis(),
        kind: EventKind::Progress,
        path: String::new(),
        value: Some(serde_json::json!({ "bytes_dropped": dropped })),
        old_value: None,
        error: None,
    };
    (None, event)
}

fn seal_error(slot: &SessionSlot, inner: &mut SessionInner, error: &CoreError) -> SealedEvent {
    inner.stats.events_emitted += 1;
    let event = DeltaEvent {
        session_id: slot.id.clone(),
        seq: next_seq(inner),
        timestamp_ms: Utc::now().timestamp_millis(),
        kind: EventKind::Error,
        path: String::new(),
        value: None,
        old_value: None,
        error: Some(ErrorInfo::from(error)),
    };
    (None, event)
}

fn seal_complete(slot: &SessionSlot, inner: &mut SessionInner) -> SealedEvent {
    inner.stats.events_emitted += 1;
    let value = if inner.parse.has_committed {
        Some(inner.parse.committed.to_json())
    } else {
        None
    };
    let event = DeltaEvent {
        session_id: slot.id.clone(),
        seq: next_seq(inner),
        timestamp_ms: Utc::now().timestamp_millis(),
        kind: EventKind::Complete,
        path: String::new(),
        value,
        old_value: None,
        error: None,
    };
    (None, event)
}

/// Handle for the background maintenance tasks (TTL sweep and coalescing
/// window flushes).
pub struct MaintenanceHandle {
    cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl MaintenanceHandle {
    pub fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Spawn the TTL sweeper and the window flusher on the current tokio
/// runtime.
pub fn spawn_maintenance(engine: &Arc<Engine>) -> MaintenanceHandle {
    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    {
        let engine = engine.clone();
        let cancel = cancel.clone();
        let period = Duration::from_secs(engine.config.cleanup_period_seconds.max(1));
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = engine.sweep_expired();
                    }
                }
            }
        }));
    }

    {
        let engine = engine.clone();
        let cancel = cancel.clone();
        let period = Duration::from_millis(engine.config.coalesce_window_ms.max(10));
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => engine.flush_expired_windows(),
                }
            }
        }));
    }

    MaintenanceHandle { cancel, tasks }
}
