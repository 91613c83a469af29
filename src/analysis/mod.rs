//! Analysis modules.
//!
//! Typed stage payloads and the aggregator that turns them into a report.

pub mod aggregator;
pub mod payload;

pub use aggregator::{ResultAggregator, ScoringPolicy};
pub use payload::StagePayload;
