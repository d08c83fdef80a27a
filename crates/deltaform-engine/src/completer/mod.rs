//! The completer: two-phase repair of truncated JSON.
//!
//! Phase L (lexical) normalizes whitespace without touching structure;
//! Phase S (syntactic) closes open frames under the active strategy. The
//! candidate is validated by a strict round-trip through `serde_json`;
//! on failure the completer retries with the next more conservative
//! strategy, keeping the failed attempt's steps in the trace with
//! `applied = false`. The completer never fails loudly: malformed input
//! yields `is_valid = false` with the best attempt and a populated
//! trace.

mod lexical;
mod syntactic;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use deltaform_core::errors::CoreError;
use deltaform_core::path::Path;
use deltaform_core::repair::{
    CompletionResult, CompletionStrategy, IncompleteReason, RepairPhase, RepairStep, RepairTrace,
    Severity, Suggestion,
};
use deltaform_core::value::JsonValue;

/// Callback registered by a host schema validator. Invoked with the
/// repaired tree; returns value suggestions per path.
pub type SchemaHook = Arc<dyn Fn(&JsonValue, &Path) -> Vec<Suggestion> + Send + Sync>;

/// Optional context for a completion call.
#[derive(Default)]
pub struct CompleteOptions<'a> {
    pub schema_hook: Option<&'a SchemaHook>,
    /// Success rate of the chosen strategy at the moment of use; when
    /// absent the completer's own aggregate rate is reported.
    pub historical_success_rate: Option<f64>,
    pub cancel: Option<&'a CancellationToken>,
}

/// Two-phase JSON repair engine with attempt counters.
#[derive(Debug, Default)]
pub struct Completer {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
}

impl Completer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repair a fragment with the given strategy. Infallible convenience
    /// wrapper around [`complete_with`](Self::complete_with).
    pub fn complete(&self, input: &str, strategy: CompletionStrategy) -> CompletionResult {
        match self.complete_with(input, strategy, CompleteOptions::default()) {
            Ok(result) => result,
            // Unreachable without a cancellation token.
            Err(_) => unreachable!("completion without a token cannot be cancelled"),
        }
    }

    /// Repair a fragment. The only error is `Cancelled`; every shape of
    /// bad input is reported through the result instead.
    pub fn complete_with(
        &self,
        input: &str,
        strategy: CompletionStrategy,
        opts: CompleteOptions<'_>,
    ) -> Result<CompletionResult, CoreError> {
        let _ = self.total.fetch_add(1, Ordering::Relaxed);
        check_cancel(opts.cancel)?;

        if input.trim().is_empty() {
            let _ = self.successful.fetch_add(1, Ordering::Relaxed);
            return Ok(self.empty_input_result(input, strategy, &opts));
        }

        if serde_json::from_str::<Value>(input).is_ok() {
            let _ = self.successful.fetch_add(1, Ordering::Relaxed);
            return Ok(self.already_valid_result(input, strategy, &opts));
        }

        let mut attempt_strategy = strategy;
        let mut prior_steps: Vec<RepairStep> = Vec::new();

        loop {
            check_cancel(opts.cancel)?;

            let lex = lexical::normalize(input);
            let syn = syntactic::close(&lex.text, attempt_strategy);
            let mut steps = lex.steps;
            steps.extend(syn.steps);
            let candidate = syn.text;

            let parses = serde_json::from_str::<Value>(&candidate).is_ok();
            if parses && !syn.corruption {
                let _ = self.successful.fetch_add(1, Ordering::Relaxed);
                return Ok(self.valid_result(
                    input,
                    candidate,
                    attempt_strategy,
                    prior_steps,
                    steps,
                    &opts,
                ));
            }

            // Corruption repairs identically under every strategy; only a
            // genuine validation failure is worth a more conservative retry.
            let next = if syn.corruption {
                None
            } else {
                attempt_strategy.more_conservative()
            };
            match next {
                Some(next_strategy) => {
                    debug!(
                        from = attempt_strategy.as_str(),
                        to = next_strategy.as_str(),
                        "completion attempt failed validation, retrying"
                    );
                    for step in &mut steps {
                        step.applied = false;
                    }
                    prior_steps.extend(steps);
                    attempt_strategy = next_strategy;
                }
                None => {
                    let _ = self.failed.fetch_add(1, Ordering::Relaxed);
                    let mut all_steps = prior_steps;
                    all_steps.extend(steps);
                    let trace = RepairTrace {
                        original: input.to_string(),
                        repaired: candidate.clone(),
                        steps: all_steps,
                        confidence: 0.0,
                        severity: Severity::Critical,
                        strategy: attempt_strategy,
                    };
                    return Ok(CompletionResult {
                        repaired: candidate,
                        is_valid: false,
                        confidence: 0.0,
                        strategy: attempt_strategy,
                        trace,
                        suggestions_applied: 0,
                        historical_success_rate: opts
                            .historical_success_rate
                            .unwrap_or_else(|| self.success_rate()),
                    });
                }
            }
        }
    }

    fn empty_input_result(
        &self,
        input: &str,
        strategy: CompletionStrategy,
        opts: &CompleteOptions<'_>,
    ) -> CompletionResult {
        let confidence = if strategy == CompletionStrategy::Aggressive {
            1.0
        } else {
            0.0
        };
        let step = RepairStep::new(
            RepairPhase::Syntactic,
            "empty-input",
            "synthesized a null document for empty input",
            0..input.len(),
            confidence,
        );
        let trace = RepairTrace {
            original: input.to_string(),
            repaired: "null".to_string(),
            steps: vec![step],
            confidence,
            severity: Severity::Minor,
            strategy,
        };
        CompletionResult {
            repaired: "null".to_string(),
            is_valid: true,
            confidence,
            strategy,
            trace,
            suggestions_applied: 0,
            historical_success_rate: opts
                .historical_success_rate
                .unwrap_or_else(|| self.success_rate()),
        }
    }

    fn already_valid_result(
        &self,
        input: &str,
        strategy: CompletionStrategy,
        opts: &CompleteOptions<'_>,
    ) -> CompletionResult {
        let step = RepairStep::new(
            RepairPhase::Syntactic,
            "already-valid",
            "input was already valid JSON",
            0..input.len(),
            1.0,
        );
        let trace = RepairTrace {
            original: input.to_string(),
            repaired: input.to_string(),
            steps: vec![step],
            confidence: 1.0,
            severity: Severity::Minor,
            strategy,
        };
        CompletionResult {
            repaired: input.to_string(),
            is_valid: true,
            confidence: 1.0,
            strategy,
            trace,
            suggestions_applied: 0,
            historical_success_rate: opts
                .historical_success_rate
                .unwrap_or_else(|| self.success_rate()),
        }
    }

    fn valid_result(
        &self,
        input: &str,
        mut repaired: String,
        strategy: CompletionStrategy,
        prior_steps: Vec<RepairStep>,
        steps: Vec<RepairStep>,
        opts: &CompleteOptions<'_>,
    ) -> CompletionResult {
        let mut suggestions_returned = None;
        let mut suggestions_applied = 0;

        if let Some(hook) = opts.schema_hook {
            if let Ok(mut tree) = JsonValue::from_json_str(&repaired) {
                let suggestions = hook(&tree, &Path::root());
                suggestions_returned = Some(suggestions.len());
                if strategy == CompletionStrategy::Aggressive {
                    for suggestion in &suggestions {
                        if apply_suggestion(&mut tree, suggestion) {
                            suggestions_applied += 1;
                        }
                    }
                    if suggestions_applied > 0 {
                        repaired = tree.canonical_string();
                    }
                }
            }
        }

        let severity = severity_of(&steps, added_ratio(input, &repaired));
        let historical = opts
            .historical_success_rate
            .unwrap_or_else(|| self.success_rate());
        let confidence = confidence_of(
            input,
            &repaired,
            &steps,
            severity,
            suggestions_returned,
            historical,
        );

        let mut all_steps = prior_steps;
        all_steps.extend(steps);
        let trace = RepairTrace {
            original: input.to_string(),
            repaired: repaired.clone(),
            steps: all_steps,
            confidence,
            severity,
            strategy,
        };
        CompletionResult {
            repaired,
            is_valid: true,
            confidence,
            strategy,
            trace,
            suggestions_applied,
            historical_success_rate: historical,
        }
    }

    /// Diagnostic probe: why does this fragment look incomplete?
    pub fn probe_incomplete(&self, input: &str) -> Vec<IncompleteReason> {
        let mut reasons = Vec::new();
        if input.trim().is_empty() {
            reasons.push(IncompleteReason::Empty);
            return reasons;
        }

        let mut depth = 0usize;
        let mut stack: Vec<char> = Vec::new();
        let mut in_string = false;
        let mut escape = false;
        let mut unmatched: Option<char> = None;
        for ch in input.chars() {
            if in_string {
                if escape {
                    escape = false;
                } else if ch == '\\' {
                    escape = true;
                } else if ch == '"' {
                    in_string = false;
                }
                continue;
            }
            match ch {
                '"' => in_string = true,
                '{' | '[' => {
                    stack.push(ch);
                    depth += 1;
                }
                '}' | ']' => {
                    let expected = if ch == '}' { '{' } else { '[' };
                    if stack.last() == Some(&expected) {
                        let _ = stack.pop();
                        depth -= 1;
                    } else if unmatched.is_none() {
                        unmatched = Some(ch);
                    }
                }
                _ => {}
            }
        }

        if in_string {
            reasons.push(IncompleteReason::UnclosedString);
        }
        if depth > 0 {
            reasons.push(IncompleteReason::UnclosedContainers { depth });
        }
        if let Some(found) = unmatched {
            reasons.push(IncompleteReason::UnmatchedClose { found });
        }
        let trimmed = input.trim_end();
        if trimmed.ends_with(',') {
            reasons.push(IncompleteReason::TrailingComma);
        } else if trimmed.ends_with(':') {
            reasons.push(IncompleteReason::TrailingColon);
        }
        reasons
    }

    /// Aggregate success rate across all completion calls, in [0, 1];
    /// 1.0 before the first call.
    pub fn success_rate(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        self.successful.load(Ordering::Relaxed) as f64 / total as f64
    }

    pub fn attempt_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

fn check_cancel(cancel: Option<&CancellationToken>) -> Result<(), CoreError> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(CoreError::Cancelled),
        _ => Ok(()),
    }
}

fn apply_suggestion(tree: &mut JsonValue, suggestion: &Suggestion) -> bool {
    // Suggestions only ever refine paths that already exist.
    if suggestion.path.traverse(tree).is_none() {
        return false;
    }
    set_at_path(tree, &suggestion.path, JsonValue::from(&suggestion.suggested_value))
}

fn set_at_path(tree: &mut JsonValue, path: &Path, value: JsonValue) -> bool {
    use deltaform_core::path::PathSegment;
    let mut current = tree;
    for seg in path.segments() {
        let next = match (seg, current) {
            (PathSegment::Key(k), JsonValue::Object(o)) => o.get_mut(k),
            (PathSegment::Index(i), JsonValue::Array(a)) => a.items.get_mut(*i),
            _ => None,
        };
        match next {
            Some(slot) => current = slot,
            None => return false,
        }
    }
    *current = value;
    true
}

fn added_ratio(original: &str, repaired: &str) -> f64 {
    let added = repaired.len().saturating_sub(original.len());
    added as f64 / original.len().max(1) as f64
}

/// Severity is the worst classification over applied steps, bumped to
/// Major when the repair grew the text by more than half.
fn severity_of(steps: &[RepairStep], added_ratio: f64) -> Severity {
    let mut severity = Severity::Minor;
    for step in steps.iter().filter(|s| s.applied) {
        let step_severity = match step.op.as_str() {
            "close-string" | "complete-literal" | "trim-number" | "complete-value-null"
            | "remove-trailing-comma" | "insert-comma" | "trim-escape" => Severity::Moderate,
            "replace-with-null" | "drop-partial-key" | "drop-partial-member"
            | "synthesize-default" | "extend-number" | "complete-key-null" | "quote-key" => {
                Severity::Major
            }
            "drop-corrupt-suffix" => Severity::Critical,
            _ => Severity::Minor,
        };
        severity = severity.max(step_severity);
    }
    if added_ratio > 0.5 {
        severity = severity.max(Severity::Major);
    }
    severity
}

/// Arithmetic mean of the available confidence factors, scaled by the
/// severity multiplier.
fn confidence_of(
    original: &str,
    repaired: &str,
    steps: &[RepairStep],
    severity: Severity,
    suggestions_returned: Option<usize>,
    historical_success_rate: f64,
) -> f64 {
    let mut factors: Vec<f64> = Vec::with_capacity(5);

    let added = repaired.len().saturating_sub(original.len());
    let base = (1.0 - (added as f64 / original.len().max(1) as f64).min(0.9)).max(0.1);
    factors.push(base);

    let applied: Vec<&RepairStep> = steps.iter().filter(|s| s.applied).collect();
    if !applied.is_empty() {
        let lexical = applied
            .iter()
            .filter(|s| s.phase == RepairPhase::Lexical)
            .count();
        factors.push(0.7 + 0.3 * lexical as f64 / applied.len() as f64);
        factors.push(applied.iter().map(|s| s.confidence).sum::<f64>() / applied.len() as f64);
    }

    if let Some(returned) = suggestions_returned {
        factors.push((0.8 + 0.04 * returned as f64).min(1.0));
    }
    factors.push(historical_success_rate);

    let mean = factors.iter().sum::<f64>() / factors.len() as f64;
    (mean * severity.confidence_factor()).clamp(0.0, 1.0)
}
