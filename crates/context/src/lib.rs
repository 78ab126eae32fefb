//! The Context Manager: an append-only message log with token-budgeted
//! compaction. Owns nothing about transport or persistence — a session
//! wraps one of these and is responsible for saving/restoring its state.

pub mod manager;

pub use manager::{CompactionOutcome, ContextManager, Summarizer};
