//! Annex Types - Shared data structures for the plugin lifecycle
//!
//! This crate contains the pure data used by the annex host and by plugin
//! authors: persisted plugin records and their state machine, the artifact
//! descriptor shipped inside every plugin, and the dependency-spec line format
//! used when merging plugins into the bundled manifest.

mod dependency;
mod manifest;
mod record;

pub use dependency::*;
pub use manifest::*;
pub use record::*;
