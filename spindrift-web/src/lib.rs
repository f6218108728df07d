//! Spindrift web server
//!
//! Exposes magnet links and info hashes to HTTP clients as a file listing
//! API plus a seekable range-streaming endpoint, backed by a content
//! engine behind the acquisition coordinator.

pub mod handlers;
pub mod server;

pub use server::{AppState, router, run_server};
