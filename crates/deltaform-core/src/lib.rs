//! Core types for the deltaform streaming JSON stabilization engine.
//!
//! This crate holds the data model shared by every engine subsystem: the
//! insertion-ordered JSON value model, path representation and traversal,
//! delta events, repair traces, the error taxonomy, the configuration
//! surface, and session statistics. It contains no parsing or diffing
//! logic; that lives in `deltaform-engine`.

pub mod config;
pub mod errors;
pub mod events;
pub mod path;
pub mod repair;
pub mod stats;
pub mod value;

pub use config::{DiffMode, EngineConfig};
pub use errors::CoreError;
pub use events::{DeltaEvent, ErrorInfo, EventKind, ProgressReport};
pub use path::{leaf_paths, Path, PathSegment, PathStyle};
pub use repair::{
    CompletionResult, CompletionStrategy, IncompleteReason, RepairPhase, RepairStep, RepairTrace,
    Severity, Suggestion,
};
pub use stats::{EngineStats, SessionStats};
pub use value::{JsonArray, JsonNumber, JsonValue, ObjectMap};
