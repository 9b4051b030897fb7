//! Keel Core
//!
//! Core types shared by every Keel component.
//!
//! This crate contains:
//! - Domain types: pipelines, scheduler events and kill markers
//! - Keys: the coordination store namespace layout

pub mod domain;
pub mod keys;
