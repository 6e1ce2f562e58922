//! Annex - Plugin lifecycle and bundled environment builder
//!
//! This crate provides the host side of the plugin system:
//! - Plugin records and their persistence (`store`)
//! - Conflict probing and materializing the bundled runtime (`environment`)
//! - Artifact discovery and restart-based activation (`discovery`, `plugin`)
//! - Startup reconciliation and the shared operation lock (`lifecycle`)
//! - The HTTP record API (`server`)

// Ambient
pub mod config;
pub mod error;

// Persistence
pub mod store;

// Service manifest, resolver and build
pub mod environment;

// Plugin hosting
pub mod discovery;
pub mod plugin;
pub mod builtin;

// Orchestration
pub mod lifecycle;
pub mod host;

// HTTP API
pub mod server;

pub use error::{Error, Result};
pub use host::AnnexHost;
