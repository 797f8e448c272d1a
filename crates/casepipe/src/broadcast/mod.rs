//! Broadcasting of pipeline events for live dashboards.

pub mod pipeline_events;

pub use pipeline_events::{PipelineEvent, PipelineEventBroadcaster, PipelineEventKind};
