//! Path representation, parsing, rendering, and tree traversal.
//!
//! A path is an ordered list of segments, each an object key or an array
//! index. The segment list is the canonical form used for hashing and
//! dedup; rendered strings exist only at the API edges. Three render
//! styles are supported:
//!
//! - dot: `a.b[0].c` (brackets only for indices; keys may not contain
//!   `.`, `[` or `]`)
//! - slash: `/a/b/0/c` (all-digit components parse as indices)
//! - bracket: `a[b][0][c]` (all-digit bracket groups parse as indices)

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::value::JsonValue;

/// One step of a path: an object key or an array index.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl PathSegment {
    pub fn key(k: impl Into<String>) -> Self {
        Self::Key(k.into())
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(k) => f.write_str(k),
            Self::Index(i) => write!(f, "{i}"),
        }
    }
}

/// The rendering style for a [`Path`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathStyle {
    /// `a.b[0].c`. Keys containing `.`, `[` or `]` do not round-trip.
    #[default]
    Dot,
    /// `/a/b/0/c`. All-digit keys do not round-trip (they parse as indices).
    Slash,
    /// `a[b][0][c]`. All-digit keys do not round-trip.
    Bracket,
}

/// A canonical path: an ordered segment list rooted at the document root.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path {
    segments: Vec<PathSegment>,
}

impl Path {
    /// The empty path addressing the document root.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Extend with an object key.
    pub fn child_key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Key(key.into()));
        Self { segments }
    }

    /// Extend with an array index.
    pub fn child_index(&self, index: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Index(index));
        Self { segments }
    }

    pub fn push(&mut self, segment: PathSegment) {
        self.segments.push(segment);
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Whether `self` is a (non-strict) prefix of `other`.
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        other.segments.len() >= self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// Parse a rendered path of the given style into canonical form.
    ///
    /// The empty string parses as the root path in every style.
    pub fn parse(input: &str, style: PathStyle) -> Result<Self, CoreError> {
        if input.is_empty() {
            return Ok(Self::root());
        }
        match style {
            PathStyle::Dot => parse_dot(input),
            PathStyle::Slash => parse_slash(input),
            PathStyle::Bracket => parse_bracket(input),
        }
    }

    /// Render in the requested style. Rendering is total; see
    /// [`PathStyle`] for the key shapes that do not round-trip.
    pub fn render(&self, style: PathStyle) -> String {
        match style {
            PathStyle::Dot => self.render_dot(),
            PathStyle::Slash => self.render_slash(),
            PathStyle::Bracket => self.render_bracket(),
        }
    }

    fn render_dot(&self) -> String {
        let mut out = String::new();
        for (i, seg) in self.segments.iter().enumerate() {
            match seg {
                PathSegment::Key(k) => {
                    if i > 0 {
                        out.push('.');
                    }
                    out.push_str(k);
                }
                PathSegment::Index(idx) => {
                    out.push('[');
                    out.push_str(&idx.to_string());
                    out.push(']');
                }
            }
        }
        out
    }

    fn render_slash(&self) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            out.push('/');
            out.push_str(&seg.to_string());
        }
        out
    }

    fn render_bracket(&self) -> String {
        let mut out = String::new();
        for (i, seg) in self.segments.iter().enumerate() {
            match seg {
                PathSegment::Key(k) if i == 0 => out.push_str(k),
                seg => {
                    out.push('[');
                    out.push_str(&seg.to_string());
                    out.push(']');
                }
            }
        }
        out
    }

    /// Walk a tree along this path. Returns `None` when any intermediate
    /// segment is missing or addresses the wrong kind of node; absence is
    /// not an error.
    pub fn traverse<'a>(&self, root: &'a JsonValue) -> Option<&'a JsonValue> {
        let mut current = root;
        for seg in &self.segments {
            current = match (seg, current) {
                (PathSegment::Key(k), JsonValue::Object(o)) => o.get(k)?,
                (PathSegment::Index(i), JsonValue::Array(a)) => a.items.get(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_dot())
    }
}

fn parse_dot(input: &str) -> Result<Path, CoreError> {
    let mut segments = Vec::new();
    for (i, component) in input.split('.').enumerate() {
        if component.is_empty() {
            return Err(CoreError::BadPath(format!(
                "empty dot component in {input:?}"
            )));
        }
        // A component is a key, optional bracket-index suffixes, or pure
        // bracket indices (for a root-level array).
        let bracket_start = component.find('[').unwrap_or(component.len());
        let key = &component[..bracket_start];
        if key.contains(']') {
            return Err(CoreError::BadPath(format!(
                "unmatched ']' in component {component:?}"
            )));
        }
        if key.is_empty() && bracket_start == component.len() {
            return Err(CoreError::BadPath(format!(
                "empty component in {input:?}"
            )));
        }
        if !key.is_empty() {
            segments.push(PathSegment::Key(key.to_string()));
        } else if i > 0 {
            // `.` followed directly by `[0]` has an empty key.
            return Err(CoreError::BadPath(format!(
                "empty key before index in {input:?}"
            )));
        }
        parse_bracket_groups(&component[bracket_start..], input, &mut segments, true)?;
    }
    Ok(Path { segments })
}

fn parse_slash(input: &str) -> Result<Path, CoreError> {
    if !input.starts_with('/') {
        return Err(CoreError::BadPath(format!(
            "slash path must start with '/': {input:?}"
        )));
    }
    let mut segments = Vec::new();
    for component in input[1..].split('/') {
        if component.is_empty() {
            return Err(CoreError::BadPath(format!(
                "empty slash component in {input:?}"
            )));
        }
        segments.push(classify_component(component));
    }
    Ok(Path { segments })
}

fn parse_bracket(input: &str) -> Result<Path, CoreError> {
    let mut segments = Vec::new();
    let bracket_start = input.find('[').unwrap_or(input.len());
    let head = &input[..bracket_start];
    if head.contains(']') {
        return Err(CoreError::BadPath(format!("unmatched ']' in {input:?}")));
    }
    if !head.is_empty() {
        segments.push(PathSegment::Key(head.to_string()));
    }
    parse_bracket_groups(&input[bracket_start..], input, &mut segments, false)?;
    if segments.is_empty() {
        return Err(CoreError::BadPath(format!("empty bracket path {input:?}")));
    }
    Ok(Path { segments })
}

/// Parse a run of `[seg][seg]...` groups. In dot style only indices are
/// legal inside brackets; in bracket style digit groups are indices and
/// anything else is a key.
fn parse_bracket_groups(
    mut rest: &str,
    whole: &str,
    segments: &mut Vec<PathSegment>,
    indices_only: bool,
) -> Result<(), CoreError> {
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return Err(CoreError::BadPath(format!(
                "expected '[' at {rest:?} in {whole:?}"
            )));
        }
        let close = rest.find(']').ok_or_else(|| {
            CoreError::BadPath(format!("unclosed '[' in {whole:?}"))
        })?;
        let inner = &rest[1..close];
        if inner.is_empty() {
            return Err(CoreError::BadPath(format!("empty '[]' in {whole:?}")));
        }
        if inner.contains('[') {
            return Err(CoreError::BadPath(format!("nested '[' in {whole:?}")));
        }
        let seg = classify_component(inner);
        if indices_only && matches!(seg, PathSegment::Key(_)) {
            return Err(CoreError::BadPath(format!(
                "non-numeric index {inner:?} in {whole:?}"
            )));
        }
        segments.push(seg);
        rest = &rest[close + 1..];
    }
    Ok(())
}

fn classify_component(component: &str) -> PathSegment {
    if component.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(i) = component.parse::<usize>() {
            return PathSegment::Index(i);
        }
    }
    PathSegment::Key(component.to_string())
}

/// Enumerate all leaf paths of a tree in canonical scan order: depth
/// first, object keys in insertion order, array indices ascending. Empty
/// containers count as leaves.
pub fn leaf_paths(root: &JsonValue) -> Vec<Path> {
    let mut out = Vec::new();
    collect_leaves(root, &Path::root(), &mut out);
    out
}

fn collect_leaves(value: &JsonValue, at: &Path, out: &mut Vec<Path>) {
    match value {
        JsonValue::Object(o) if !o.is_empty() => {
            for (k, v) in o.iter() {
                collect_leaves(v, &at.child_key(k), out);
            }
        }
        JsonValue::Array(a) if !a.items.is_empty() => {
            for (i, v) in a.items.iter().enumerate() {
                collect_leaves(v, &at.child_index(i), out);
            }
        }
        _ => out.push(at.clone()),
    }
}
