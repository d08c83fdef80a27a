//! The engine configuration surface.
//!
//! One flat struct of knobs with documented defaults. A config is validated
//! once and snapshotted immutably into each session at creation; changing
//! the engine config later never affects live sessions.

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::path::PathStyle;
use crate::repair::CompletionStrategy;

/// Differ mode.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffMode {
    /// Single `Replace` at the highest differing node.
    Conservative,
    /// Recursive shape-aware diff.
    #[default]
    Smart,
}

/// Engine-wide configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ring-buffer cap per session, bytes.
    pub max_buffer_bytes: usize,
    /// Inactivity expiry, seconds.
    pub session_ttl_seconds: u64,
    /// Concurrent session cap; creations beyond it fail `CapacityExceeded`.
    pub max_sessions: usize,
    /// Completer initial strategy.
    pub default_strategy: CompletionStrategy,
    /// Whether the adaptive selector may switch strategies.
    pub adaptive_enabled: bool,
    /// Consecutive failures before the selector switches.
    pub consecutive_failure_threshold: u32,
    /// Selector switch cooldown, seconds.
    pub min_switch_interval_seconds: u64,
    /// Differ mode.
    pub diff_mode: DiffMode,
    /// Gate for the coalescer; disabled means immediate emission.
    pub coalesce_enabled: bool,
    /// Coalescing time window, milliseconds.
    pub coalesce_window_ms: u64,
    /// Consecutive quiet ingests before an early flush.
    pub coalesce_stability: u32,
    /// Max candidate events buffered per path.
    pub coalesce_max_buffered: u32,
    /// Event bus per-subscriber queue capacity.
    pub subscriber_queue_cap: usize,
    /// Render style for event paths.
    pub path_style: PathStyle,
    /// TTL sweeper period, seconds.
    pub cleanup_period_seconds: u64,
    /// Hard cap on a single chunk, bytes. 0 means unlimited.
    pub max_chunk_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_buffer_bytes: 1_048_576,
            session_ttl_seconds: 3_600,
            max_sessions: 1_000,
            default_strategy: CompletionStrategy::Smart,
            adaptive_enabled: true,
            consecutive_failure_threshold: 3,
            min_switch_interval_seconds: 60,
            diff_mode: DiffMode::Smart,
            coalesce_enabled: true,
            coalesce_window_ms: 100,
            coalesce_stability: 3,
            coalesce_max_buffered: 10,
            subscriber_queue_cap: 1_024,
            path_style: PathStyle::Dot,
            cleanup_period_seconds: 60,
            max_chunk_bytes: 0,
        }
    }
}

impl EngineConfig {
    /// Reject configurations that cannot work at all.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_buffer_bytes == 0 {
            return Err(CoreError::CapacityExceeded(
                "max_buffer_bytes must be nonzero".into(),
            ));
        }
        if self.max_sessions == 0 {
            return Err(CoreError::CapacityExceeded(
                "max_sessions must be nonzero".into(),
            ));
        }
        if self.subscriber_queue_cap == 0 {
            return Err(CoreError::CapacityExceeded(
                "subscriber_queue_cap must be nonzero".into(),
            ));
        }
        if self.coalesce_max_buffered == 0 {
            return Err(CoreError::CapacityExceeded(
                "coalesce_max_buffered must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_table() {
        let c = EngineConfig::default();
        assert_eq!(c.max_buffer_bytes, 1_048_576);
        assert_eq!(c.session_ttl_seconds, 3_600);
        assert_eq!(c.max_sessions, 1_000);
        assert_eq!(c.default_strategy, CompletionStrategy::Smart);
        assert!(c.adaptive_enabled);
        assert_eq!(c.consecutive_failure_threshold, 3);
        assert_eq!(c.min_switch_interval_seconds, 60);
        assert_eq!(c.diff_mode, DiffMode::Smart);
        assert!(c.coalesce_enabled);
        assert_eq!(c.coalesce_window_ms, 100);
        assert_eq!(c.coalesce_stability, 3);
        assert_eq!(c.coalesce_max_buffered, 10);
        assert_eq!(c.subscriber_queue_cap, 1_024);
        assert_eq!(c.path_style, PathStyle::Dot);
        assert_eq!(c.cleanup_period_seconds, 60);
        assert_eq!(c.max_chunk_bytes, 0);
    }

    #[test]
    fn validate_rejects_zero_caps() {
        let mut c = EngineConfig::default();
        c.max_buffer_bytes = 0;
        assert!(c.validate().is_err());

        let mut c = EngineConfig::default();
        c.max_sessions = 0;
        assert!(c.validate().is_err());

        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_deserialization_fills_defaults() {
        let c: EngineConfig = serde_json::from_str(r#"{"coalesce_window_ms": 50}"#).unwrap();
        assert_eq!(c.coalesce_window_ms, 50);
        assert_eq!(c.max_sessions, 1_000);
    }
}
