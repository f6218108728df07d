//! Spindrift Core - content acquisition and range streaming
//!
//! This crate provides the building blocks for exposing peer-to-peer
//! content over HTTP: identifier normalization, the content engine
//! capability interface, the acquisition coordinator that deduplicates
//! in-flight resolutions, and configuration management.

pub mod config;
pub mod content;
pub mod coordinator;
pub mod engine;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::{ResolveConfig, ServerConfig, SpindriftConfig};
pub use content::{ContentId, InfoHash};
pub use coordinator::AcquisitionCoordinator;
pub use engine::{ContentByteStream, ContentEngine, ContentError, FileEntry, ResolvedContent};
