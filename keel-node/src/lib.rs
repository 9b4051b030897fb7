//! Keel Node
//!
//! The node-local control plane of the Keel scheduler.
//!
//! Architecture:
//! - Configuration: settings from environment or defaults
//! - Sync: replicates pipeline definitions and kill markers from the
//!   coordination store (snapshot, then revision-ordered watch)
//! - Services: store-side write paths (kill requests, pipeline publishing)
//! - Scheduler: the event queue and the consumer holding this node's view
//! - API: operator-facing HTTP endpoints
//!
//! Watchers never talk to the scheduler directly; they push into an injected
//! [`scheduler::EventSink`].

pub mod api;
pub mod config;
pub mod scheduler;
pub mod service;
pub mod signal;
pub mod sync;
