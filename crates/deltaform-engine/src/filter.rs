//! Field filtering: selective event emission by path pattern.
//!
//! Patterns are dot-style paths whose components may be `*`, matching
//! any single segment. Matching is prefix-based: a pattern selects its
//! own path and everything beneath it, and in include mode the
//! ancestors of an included path also pass (their subtrees carry the
//! included data). Filtered paths still merge into the committed tree;
//! only their events are suppressed.

use serde::{Deserialize, Serialize};

use deltaform_core::errors::CoreError;
use deltaform_core::path::{Path, PathSegment, PathStyle};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    Include,
    Exclude,
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum PatternSeg {
    Key(String),
    Index(usize),
    Wildcard,
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct PathPattern {
    segs: Vec<PatternSeg>,
}

impl PathPattern {
    fn parse(text: &str) -> Result<Self, CoreError> {
        // `*` is not legal in a plain path; rewrite wildcard components
        // to a placeholder key and patch the segments afterwards.
        // `[*]` must become a dot component first, because brackets are
        // index-only in dot style.
        let normalized = text.replace("[*]", ".*").replace('*', "\u{1}");
        let normalized = normalized.trim_start_matches('.');
        let mut segs = Vec::new();
        for seg in Path::parse(normalized, PathStyle::Dot)?.segments() {
            segs.push(match seg {
                PathSegment::Key(k) if k == "\u{1}" => PatternSeg::Wildcard,
                PathSegment::Key(k) => PatternSeg::Key(k.clone()),
                PathSegment::Index(i) => PatternSeg::Index(*i),
            });
        }
        if segs.is_empty() {
            return Err(CoreError::BadPath("empty filter pattern".into()));
        }
        Ok(Self { segs })
    }

    fn seg_matches(seg: &PatternSeg, actual: &PathSegment) -> bool {
        match (seg, actual) {
            (PatternSeg::Wildcard, _) => true,
            (PatternSeg::Key(k), PathSegment::Key(a)) => k == a,
            (PatternSeg::Index(i), PathSegment::Index(a)) => i == a,
            _ => false,
        }
    }

    /// The pattern selects `path` or anything beneath it.
    fn covers(&self, path: &Path) -> bool {
        let segments = path.segments();
        self.segs.len() <= segments.len()
            && self
                .segs
                .iter()
                .zip(segments)
                .all(|(p, a)| Self::seg_matches(p, a))
    }

    /// `path` is a strict ancestor of something the pattern selects.
    fn covered_ancestor(&self, path: &Path) -> bool {
        let segments = path.segments();
        segments.len() < self.segs.len()
            && self
                .segs
                .iter()
                .zip(segments)
                .all(|(p, a)| Self::seg_matches(p, a))
    }
}

/// Per-session event filter.
#[derive(Clone, Debug)]
pub struct FieldFilter {
    mode: FilterMode,
    include: Vec<PathPattern>,
    exclude: Vec<PathPattern>,
}

impl FieldFilter {
    /// Include mode: only the listed paths (and their subtrees) emit.
    pub fn include(patterns: &[&str]) -> Result<Self, CoreError> {
        Self::new(FilterMode::Include, patterns, &[])
    }

    /// Exclude mode: the listed paths (and their subtrees) are silenced.
    pub fn exclude(patterns: &[&str]) -> Result<Self, CoreError> {
        Self::new(FilterMode::Exclude, &[], patterns)
    }

    pub fn new(
        mode: FilterMode,
        include: &[&str],
        exclude: &[&str],
    ) -> Result<Self, CoreError> {
        let include = include
            .iter()
            .map(|p| PathPattern::parse(p))
            .collect::<Result<Vec<_>, _>>()?;
        let exclude = exclude
            .iter()
            .map(|p| PathPattern::parse(p))
            .collect::<Result<Vec<_>, _>>()?;
        for pattern in &include {
            if exclude.contains(pattern) {
                return Err(CoreError::BadPath(
                    "a path cannot be both included and excluded".into(),
                ));
            }
        }
        Ok(Self {
            mode,
            include,
            exclude,
        })
    }

    /// Whether events at `path` should be emitted.
    pub fn should_emit(&self, path: &Path) -> bool {
        match self.mode {
            FilterMode::Include => {
                if self.include.is_empty() {
                    return true;
                }
                self.include
                    .iter()
                    .any(|p| p.covers(path) || p.covered_ancestor(path))
            }
            FilterMode::Exclude => !self.exclude.iter().any(|p| p.covers(path)),
        }
    }
}
