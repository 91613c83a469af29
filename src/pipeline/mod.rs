//! Stage execution and job sequencing.

pub mod controller;
pub mod runner;

pub use controller::PipelineController;
pub use runner::{AttemptObserver, NoopObserver, RetryPolicy, StageRunner};
