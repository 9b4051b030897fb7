//! Scheduler layer for the node
//!
//! Watchers push [`Event`](keel_core::domain::event::Event)s into an
//! [`EventSink`]; the production sink is a bounded queue drained by the
//! [`Scheduler`], which keeps this node's table of known pipelines.

pub mod sink;
pub mod table;

pub use sink::{ChannelSink, CollectingSink, EventQueue, EventSink};
pub use table::{Applied, PipelineTable, ScheduledPipeline, Scheduler};
