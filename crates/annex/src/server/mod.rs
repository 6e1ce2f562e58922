//! HTTP Server
//!
//! Plugin record API plus the routes of every activated plugin.

mod handler;
mod router;
mod state;

pub use handler::*;
pub use router::*;
pub use state::*;
