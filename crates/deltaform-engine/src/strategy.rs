//! Adaptive strategy selection.
//!
//! Tracks per-strategy outcome history and switches the session default
//! after a run of consecutive failures, subject to a cooldown. State is
//! owned by the engine instance; construct a fresh selector to get
//! deterministic behavior in tests.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::info;

use deltaform_core::repair::CompletionStrategy;

/// How many recent failure kinds to retain per strategy.
const RECENT_FAILURES_CAP: usize = 8;

/// Outcome history for one strategy.
#[derive(Clone, Debug)]
pub struct StrategyRecord {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    /// Running mean of result confidence.
    pub mean_confidence: f64,
    pub last_used: Option<Instant>,
    pub recent_failure_kinds: VecDeque<String>,
}

impl Default for StrategyRecord {
    fn default() -> Self {
        Self {
            attempts: 0,
            successes: 0,
            failures: 0,
            mean_confidence: 0.0,
            last_used: None,
            recent_failure_kinds: VecDeque::with_capacity(RECENT_FAILURES_CAP),
        }
    }
}

impl StrategyRecord {
    /// Success rate in [0, 1]; optimistic 1.0 before the first attempt.
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            return 1.0;
        }
        self.successes as f64 / self.attempts as f64
    }

    fn score(&self) -> f64 {
        0.6 * self.success_rate() + 0.4 * self.mean_confidence
    }
}

struct SelectorInner {
    current: CompletionStrategy,
    consecutive_failures: u32,
    last_switch: Option<Instant>,
    records: [StrategyRecord; 3],
}

/// Per-engine strategy selector.
pub struct StrategySelector {
    inner: Mutex<SelectorInner>,
    adaptive_enabled: bool,
    failure_threshold: u32,
    min_switch_interval: Duration,
}

fn index_of(strategy: CompletionStrategy) -> usize {
    match strategy {
        CompletionStrategy::Conservative => 0,
        CompletionStrategy::Smart => 1,
        CompletionStrategy::Aggressive => 2,
    }
}

impl StrategySelector {
    pub fn new(
        default_strategy: CompletionStrategy,
        adaptive_enabled: bool,
        failure_threshold: u32,
        min_switch_interval: Duration,
    ) -> Self {
        Self {
            inner: Mutex::new(SelectorInner {
                current: default_strategy,
                consecutive_failures: 0,
                last_switch: None,
                records: Default::default(),
            }),
            adaptive_enabled,
            failure_threshold,
            min_switch_interval,
        }
    }

    /// Choose the strategy for the next completion call. An explicit
    /// caller hint is always honored and never disturbs selector state.
    pub fn select(&self, explicit: Option<CompletionStrategy>) -> CompletionStrategy {
        if let Some(strategy) = explicit {
            return strategy;
        }
        let mut inner = self.inner.lock();
        if self.adaptive_enabled
            && inner.consecutive_failures >= self.failure_threshold
            && inner
                .last_switch
                .map_or(true, |at| at.elapsed() >= self.min_switch_interval)
        {
            let best = CompletionStrategy::ALL
                .into_iter()
                .max_by(|a, b| {
                    let (sa, sb) = (
                        inner.records[index_of(*a)].score(),
                        inner.records[index_of(*b)].score(),
                    );
                    // Stable max: on a tie the earlier (more conservative)
                    // strategy wins.
                    sa.partial_cmp(&sb)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(std::cmp::Ordering::Greater)
                })
                .unwrap_or(inner.current);
            if best != inner.current {
                info!(
                    from = inner.current.as_str(),
                    to = best.as_str(),
                    failures = inner.consecutive_failures,
                    "switching completion strategy"
                );
                inner.current = best;
                inner.last_switch = Some(Instant::now());
                inner.consecutive_failures = 0;
            }
        }
        inner.current
    }

    /// Record the outcome of a completion made with `strategy`.
    pub fn record_outcome(
        &self,
        strategy: CompletionStrategy,
        success: bool,
        confidence: f64,
        failure_kind: Option<&str>,
    ) {
        let mut inner = self.inner.lock();
        let record = &mut inner.records[index_of(strategy)];
        record.attempts += 1;
        if success {
            record.successes += 1;
        } else {
            record.failures += 1;
            if let Some(kind) = failure_kind {
                if record.recent_failure_kinds.len() == RECENT_FAILURES_CAP {
                    let _ = record.recent_failure_kinds.pop_front();
                }
                record.recent_failure_kinds.push_back(kind.to_string());
            }
        }
        record.mean_confidence += (confidence - record.mean_confidence) / record.attempts as f64;
        record.last_used = Some(Instant::now());

        if strategy == inner.current {
            inner.consecutive_failures = if success {
                0
            } else {
                inner.consecutive_failures + 1
            };
        }
    }

    /// Success rate of a strategy at this moment.
    pub fn success_rate(&self, strategy: CompletionStrategy) -> f64 {
        self.inner.lock().records[index_of(strategy)].success_rate()
    }

    pub fn record(&self, strategy: CompletionStrategy) -> StrategyRecord {
        self.inner.lock().records[index_of(strategy)].clone()
    }

    pub fn current(&self) -> CompletionStrategy {
        self.inner.lock().current
    }
}
