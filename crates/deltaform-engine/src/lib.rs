//! The deltaform engine: a streaming structured-text completion and
//! differential-emission core.
//!
//! The engine consumes UTF-8 text fragments of JSON-shaped output (in
//! byte order per session), maintains an incrementally growing partial
//! document, repairs it into valid JSON on demand, and emits path-scoped
//! delta events with per-path deduplication and temporal coalescing.
//!
//! Pipeline per ingested chunk:
//!
//! ```text
//! chunk ─▶ ring buffer ─▶ strict parse of largest safe prefix
//!                 │                │ (fallback)
//!                 │                ▼
//!                 │          completer probe
//!                 ▼                │
//!            committed tree ◀─ merge
//!                 │
//!                 ▼
//!            structural diff ─▶ hash dedup ─▶ field filter ─▶ coalescer ─▶ bus
//! ```
//!
//! The core API is synchronous; async appears only at the edges (bus
//! subscriptions, the maintenance task, opt-in back-pressure).

pub mod bus;
pub mod coalesce;
pub mod completer;
pub mod diff;
pub mod engine;
pub mod filter;
pub mod parser;
pub mod strategy;

pub use bus::{EventBus, SubscriberHandle, Subscription, SubscriptionFilter};
pub use coalesce::{Coalescer, PendingDelta};
pub use completer::{CompleteOptions, Completer};
pub use diff::{ChangeOp, DiffState, StructuralDiffer};
pub use engine::{spawn_maintenance, Engine, MaintenanceHandle, SchemaHook, SessionOptions};
pub use filter::{FieldFilter, FilterMode};
pub use parser::SessionPhase;
pub use strategy::StrategySelector;
