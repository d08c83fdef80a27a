//! Repair traces and completion results.
//!
//! Every completion attempt produces a [`RepairTrace`]: the ordered list
//! of steps the completer proposed, each with a phase, an operation tag, a
//! byte range, a per-step confidence, and an `applied` flag. The repaired
//! text always corresponds exactly to the applied-true steps applied in
//! order; steps proposed by a strategy that later failed validation stay
//! in the trace with `applied = false`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::Path;

/// Completion strategy, ordered from most to least conservative.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStrategy {
    /// Inject `null` or remove; never guess.
    Conservative,
    /// Closest syntactically legal completion.
    #[default]
    Smart,
    /// Synthesize typed defaults and expand partial tokens.
    Aggressive,
}

impl CompletionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Smart => "smart",
            Self::Aggressive => "aggressive",
        }
    }

    /// The next more conservative strategy to retry with, if any.
    pub fn more_conservative(&self) -> Option<Self> {
        match self {
            Self::Aggressive => Some(Self::Smart),
            Self::Smart => Some(Self::Conservative),
            Self::Conservative => None,
        }
    }

    pub const ALL: [Self; 3] = [Self::Conservative, Self::Smart, Self::Aggressive];
}

/// Which phase of the two-phase repair produced a step.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairPhase {
    Lexical,
    Syntactic,
}

/// How much the repair deformed the input.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Minor,
    Moderate,
    Major,
    Critical,
}

impl Severity {
    /// Confidence multiplier for this severity.
    pub fn confidence_factor(&self) -> f64 {
        match self {
            Self::Minor => 1.0,
            Self::Moderate => 0.85,
            Self::Major => 0.6,
            Self::Critical => 0.3,
        }
    }
}

/// One proposed (and possibly applied) repair operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RepairStep {
    pub phase: RepairPhase,
    /// Stable operation tag, e.g. `close-object`, `close-string`,
    /// `trim-whitespace`, `already-valid`.
    pub op: String,
    /// Human-readable description of what was done.
    pub description: String,
    /// Byte range of the original text the step touches.
    pub start: usize,
    pub end: usize,
    /// Per-step confidence in [0, 1].
    pub confidence: f64,
    /// Whether the step is part of the final repaired text.
    pub applied: bool,
}

impl RepairStep {
    pub fn new(
        phase: RepairPhase,
        op: impl Into<String>,
        description: impl Into<String>,
        range: std::ops::Range<usize>,
        confidence: f64,
    ) -> Self {
        Self {
            phase,
            op: op.into(),
            description: description.into(),
            start: range.start,
            end: range.end,
            confidence,
            applied: true,
        }
    }
}

/// The full record of one completion attempt.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RepairTrace {
    pub original: String,
    pub repaired: String,
    pub steps: Vec<RepairStep>,
    /// Overall confidence in [0, 1].
    pub confidence: f64,
    pub severity: Severity,
    pub strategy: CompletionStrategy,
}

impl RepairTrace {
    pub fn applied_steps(&self) -> impl Iterator<Item = &RepairStep> {
        self.steps.iter().filter(|s| s.applied)
    }

    pub fn lexical_step_count(&self) -> usize {
        self.applied_steps()
            .filter(|s| s.phase == RepairPhase::Lexical)
            .count()
    }

    pub fn syntactic_step_count(&self) -> usize {
        self.applied_steps()
            .filter(|s| s.phase == RepairPhase::Syntactic)
            .count()
    }
}

/// What the completer returns. Never an error: malformed input yields
/// `is_valid = false` with a populated trace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    /// The repaired JSON text (best attempt even when invalid).
    pub repaired: String,
    pub is_valid: bool,
    /// Overall confidence in [0, 1].
    pub confidence: f64,
    pub strategy: CompletionStrategy,
    pub trace: RepairTrace,
    /// Schema suggestions applied; always 0 without a registered hook.
    pub suggestions_applied: usize,
    /// Success rate of `strategy` at the moment of use, in [0, 1].
    pub historical_success_rate: f64,
}

/// Why a text fragment looks incomplete. Diagnostic only.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum IncompleteReason {
    Empty,
    UnclosedString,
    UnclosedContainers { depth: usize },
    UnmatchedClose { found: char },
    TrailingComma,
    TrailingColon,
}

/// A schema-hook suggestion for a path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub path: Path,
    pub suggested_value: Value,
    /// Hook's confidence in [0, 1].
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_de_escalation_chain() {
        assert_eq!(
            CompletionStrategy::Aggressive.more_conservative(),
            Some(CompletionStrategy::Smart)
        );
        assert_eq!(
            CompletionStrategy::Smart.more_conservative(),
            Some(CompletionStrategy::Conservative)
        );
        assert_eq!(CompletionStrategy::Conservative.more_conservative(), None);
    }

    #[test]
    fn severity_factors_decrease() {
        assert_eq!(Severity::Minor.confidence_factor(), 1.0);
        assert!(Severity::Moderate.confidence_factor() > Severity::Major.confidence_factor());
        assert!(Severity::Major.confidence_factor() > Severity::Critical.confidence_factor());
    }

    #[test]
    fn trace_counts_applied_only() {
        let mut step = RepairStep::new(RepairPhase::Lexical, "trim-whitespace", "trim", 0..2, 0.95);
        let trace = RepairTrace {
            steps: vec![step.clone(), {
                step.applied = false;
                step
            }],
            ..Default::default()
        };
        assert_eq!(trace.lexical_step_count(), 1);
        assert_eq!(trace.syntactic_step_count(), 0);
    }

    #[test]
    fn strategy_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&CompletionStrategy::Smart).unwrap(),
            r#""smart""#
        );
    }
}
