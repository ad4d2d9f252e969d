//! Market data plumbing: rolling history and indicator math.

mod history;
pub mod indicators;

pub use history::{HistoryStore, DEFAULT_TRIM_TOLERANCE};
