//! Core domain types
//!
//! These types are shared between the write path (which publishes pipeline
//! records to the coordination store) and the node agent (which replicates
//! them into its scheduler).

pub mod event;
pub mod kill;
pub mod pipeline;
