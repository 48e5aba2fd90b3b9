//! Monitoring
//!
//! [`ExecutionTimeline`] records when each experiment of a pipeline run
//! started and finished.

pub mod timeline;

pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
