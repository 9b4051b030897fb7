//! Service Module
//!
//! Store-side write paths used by the node API:
//! - `killer`: lease-bound kill requests
//! - `publisher`: pipeline definitions

pub mod killer;
pub mod publisher;

pub use killer::{KillEmitter, KillError};
pub use publisher::{PipelinePublisher, PublishError};
