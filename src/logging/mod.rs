//! Event log output.

mod jsonl;

pub use jsonl::{JsonlLogger, SessionEvent};
