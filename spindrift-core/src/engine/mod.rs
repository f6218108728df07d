//! Content engine capability interface.
//!
//! The peer-to-peer machinery that turns an identifier into file metadata
//! and bytes lives behind this narrow trait. The coordinator and the web
//! layer only ever see resolved handles, chunked byte streams, and a
//! process-wide readiness broadcast; piece selection, swarms, and trackers
//! are someone else's problem.

pub mod simulation;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::content::ContentId;

/// One file inside a resolved piece of content. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// Zero-based position within the content's file list.
    pub index: usize,
    /// File name, used for MIME type detection.
    pub name: String,
    /// File length in bytes.
    pub length: u64,
}

/// Metadata for content the engine has fully resolved.
///
/// Created once per identifier on first successful resolution, then shared
/// via `Arc` by every request for the same identifier for the life of the
/// process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContent {
    /// Canonical identifier this content was resolved under.
    pub content_id: ContentId,
    /// Human-readable content name.
    pub display_name: String,
    /// Ordered file list.
    pub files: Vec<FileEntry>,
}

impl ResolvedContent {
    /// Looks up a file by index.
    ///
    /// # Errors
    /// - `ContentError::FileNotFound` - Index is outside the file list
    pub fn file(&self, index: usize) -> Result<&FileEntry, ContentError> {
        self.files.get(index).ok_or(ContentError::FileNotFound {
            index,
            file_count: self.files.len(),
        })
    }
}

/// Lazily-pulled sequence of byte chunks for one open range read.
///
/// Dropping the stream releases the engine-side read; the engine stops
/// fetching data for it.
pub type ContentByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ContentError>> + Send>>;

/// Errors from content acquisition and streaming.
///
/// The kinds map one-to-one onto HTTP responses in the web layer, and
/// `ResolutionTimeout` is deliberately distinct from `ResolutionFailed` so
/// callers can tell "try again later" from "this content is broken".
#[derive(Debug, Clone, thiserror::Error)]
pub enum ContentError {
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Resolution failed for {content_id}: {reason}")]
    ResolutionFailed {
        content_id: ContentId,
        reason: String,
    },

    #[error("Timed out waiting for {content_id} to resolve")]
    ResolutionTimeout { content_id: ContentId },

    #[error("Content {content_id} not found")]
    ContentNotFound { content_id: ContentId },

    #[error("File index {index} out of range ({file_count} files)")]
    FileNotFound { index: usize, file_count: usize },

    #[error("Stream error: {reason}")]
    StreamError { reason: String },

    #[error("Engine capability unavailable: {reason}")]
    CapabilityUnavailable { reason: String },

    #[error("Content engine closed")]
    EngineClosed,
}

/// Capability interface over the peer-to-peer content source.
///
/// Implementations must be cheap to share (`Arc`) and safe to call from
/// many request tasks at once.
#[async_trait]
pub trait ContentEngine: Send + Sync {
    /// Whether this engine can hold open peer connections for the life of
    /// the process.
    ///
    /// Resolution and streaming both require a long-lived process; an
    /// engine running in a request-scoped environment reports `false` and
    /// the coordinator refuses to operate rather than silently degrading.
    fn supports_persistent_peers(&self) -> bool;

    /// Resolves an identifier into file metadata.
    ///
    /// This is the one network-touching operation: peer, tracker, or DHT
    /// lookups happen here and may be slow or never complete. The
    /// coordinator guarantees at most one in-flight call per identifier.
    ///
    /// # Errors
    /// - `ContentError::ContentNotFound` - Engine knows nothing under this identifier
    /// - `ContentError::ResolutionFailed` - Engine-reported resolution error
    async fn resolve(&self, content_id: &ContentId) -> Result<Arc<ResolvedContent>, ContentError>;

    /// Queries the engine-side cache of already-resolved content.
    ///
    /// Never touches the network; returns `None` when the identifier has
    /// not been resolved yet.
    async fn lookup(&self, content_id: &ContentId) -> Option<Arc<ResolvedContent>>;

    /// Opens a byte-range read over one file of resolved content.
    ///
    /// `start` and `end` are inclusive byte offsets. Chunks arrive as the
    /// engine fetches them; the file is never materialized whole.
    ///
    /// # Errors
    /// - `ContentError::ContentNotFound` - Identifier is not resolved
    /// - `ContentError::FileNotFound` - Index is outside the file list
    async fn open_range(
        &self,
        content_id: &ContentId,
        file_index: usize,
        start: u64,
        end: u64,
    ) -> Result<ContentByteStream, ContentError>;

    /// Subscribes to the process-wide "content became ready" channel.
    ///
    /// The coordinator's timeout recovery path listens here for late
    /// resolutions that missed the primary window.
    fn subscribe_ready(&self) -> broadcast::Receiver<ContentId>;
}
