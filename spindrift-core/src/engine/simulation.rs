//! In-memory content engine for tests, development, and the demo CLI.
//!
//! Resolution behavior is scripted per identifier so tests can exercise
//! the coordinator's dedupe, failure, timeout, and late-recovery paths
//! deterministically. Open range reads are counted so resource-release
//! tests can assert that a dropped stream actually let go of its read.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::{ContentByteStream, ContentEngine, ContentError, FileEntry, ResolvedContent};
use crate::content::ContentId;

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
const READY_CHANNEL_CAPACITY: usize = 16;

/// How a scripted piece of content responds to `resolve`.
#[derive(Debug, Clone)]
pub enum ResolveBehavior {
    /// Resolves as soon as `resolve` is called.
    Immediate,
    /// Resolves after a fixed delay.
    Delayed(Duration),
    /// Fails with the given reason.
    Fails(String),
    /// Never completes. Content only becomes available through
    /// [`SimulatedContentEngine::announce_ready`].
    Stalls,
}

struct SimulatedFile {
    name: String,
    data: Bytes,
}

struct SimulatedItem {
    display_name: String,
    files: Vec<SimulatedFile>,
    behavior: ResolveBehavior,
}

/// Scriptable in-memory [`ContentEngine`].
pub struct SimulatedContentEngine {
    items: Mutex<HashMap<ContentId, SimulatedItem>>,
    ready: Mutex<HashMap<ContentId, Arc<ResolvedContent>>>,
    resolve_calls: Mutex<HashMap<ContentId, usize>>,
    open_streams: Arc<AtomicUsize>,
    ready_tx: broadcast::Sender<ContentId>,
    persistent_peers: bool,
    chunk_size: usize,
}

impl SimulatedContentEngine {
    /// Creates an engine that reports persistent-peer support.
    pub fn new() -> Self {
        let (ready_tx, _) = broadcast::channel(READY_CHANNEL_CAPACITY);
        Self {
            items: Mutex::new(HashMap::new()),
            ready: Mutex::new(HashMap::new()),
            resolve_calls: Mutex::new(HashMap::new()),
            open_streams: Arc::new(AtomicUsize::new(0)),
            ready_tx,
            persistent_peers: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Marks the engine as running in a request-scoped environment that
    /// cannot hold peer connections open.
    pub fn without_persistent_peers(mut self) -> Self {
        self.persistent_peers = false;
        self
    }

    /// Overrides the chunk size used by range streams.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Registers content that resolves immediately.
    pub fn add_content(
        &self,
        content_id: ContentId,
        display_name: &str,
        files: Vec<(&str, Vec<u8>)>,
    ) {
        self.add_content_with_behavior(content_id, display_name, files, ResolveBehavior::Immediate);
    }

    /// Registers content with scripted resolve behavior.
    pub fn add_content_with_behavior(
        &self,
        content_id: ContentId,
        display_name: &str,
        files: Vec<(&str, Vec<u8>)>,
        behavior: ResolveBehavior,
    ) {
        let files = files
            .into_iter()
            .map(|(name, data)| SimulatedFile {
                name: name.to_string(),
                data: Bytes::from(data),
            })
            .collect();
        self.items.lock().insert(
            content_id,
            SimulatedItem {
                display_name: display_name.to_string(),
                files,
                behavior,
            },
        );
    }

    /// Makes registered content available out-of-band and fires the ready
    /// broadcast, the way a late peer-side resolution would.
    pub fn announce_ready(&self, content_id: &ContentId) -> Option<Arc<ResolvedContent>> {
        if !self.items.lock().contains_key(content_id) {
            return None;
        }
        Some(self.mark_ready(content_id))
    }

    /// How many times `resolve` was invoked for an identifier.
    pub fn resolve_call_count(&self, content_id: &ContentId) -> usize {
        self.resolve_calls
            .lock()
            .get(content_id)
            .copied()
            .unwrap_or(0)
    }

    /// Number of currently-open range streams.
    pub fn open_stream_count(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    fn mark_ready(&self, content_id: &ContentId) -> Arc<ResolvedContent> {
        let content = {
            let items = self.items.lock();
            // Caller checked presence; an unknown id here is a test bug.
            let item = &items[content_id];
            Arc::new(ResolvedContent {
                content_id: content_id.clone(),
                display_name: item.display_name.clone(),
                files: item
                    .files
                    .iter()
                    .enumerate()
                    .map(|(index, file)| FileEntry {
                        index,
                        name: file.name.clone(),
                        length: file.data.len() as u64,
                    })
                    .collect(),
            })
        };
        self.ready
            .lock()
            .insert(content_id.clone(), content.clone());
        let _ = self.ready_tx.send(content_id.clone());
        content
    }
}

impl Default for SimulatedContentEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentEngine for SimulatedContentEngine {
    fn supports_persistent_peers(&self) -> bool {
        self.persistent_peers
    }

    async fn resolve(&self, content_id: &ContentId) -> Result<Arc<ResolvedContent>, ContentError> {
        *self
            .resolve_calls
            .lock()
            .entry(content_id.clone())
            .or_insert(0) += 1;

        if let Some(existing) = self.ready.lock().get(content_id).cloned() {
            return Ok(existing);
        }

        let behavior = {
            let items = self.items.lock();
            let Some(item) = items.get(content_id) else {
                return Err(ContentError::ContentNotFound {
                    content_id: content_id.clone(),
                });
            };
            item.behavior.clone()
        };

        match behavior {
            ResolveBehavior::Immediate => {}
            ResolveBehavior::Delayed(delay) => tokio::time::sleep(delay).await,
            ResolveBehavior::Fails(reason) => {
                return Err(ContentError::ResolutionFailed {
                    content_id: content_id.clone(),
                    reason,
                });
            }
            ResolveBehavior::Stalls => futures::future::pending::<()>().await,
        }

        Ok(self.mark_ready(content_id))
    }

    async fn lookup(&self, content_id: &ContentId) -> Option<Arc<ResolvedContent>> {
        self.ready.lock().get(content_id).cloned()
    }

    async fn open_range(
        &self,
        content_id: &ContentId,
        file_index: usize,
        start: u64,
        end: u64,
    ) -> Result<ContentByteStream, ContentError> {
        if self.ready.lock().get(content_id).is_none() {
            return Err(ContentError::ContentNotFound {
                content_id: content_id.clone(),
            });
        }

        let data = {
            let items = self.items.lock();
            let item = items.get(content_id).ok_or(ContentError::ContentNotFound {
                content_id: content_id.clone(),
            })?;
            let file = item
                .files
                .get(file_index)
                .ok_or(ContentError::FileNotFound {
                    index: file_index,
                    file_count: item.files.len(),
                })?;
            file.data.clone()
        };

        let total = data.len() as u64;
        let span = if total == 0 || start >= total || end < start {
            Bytes::new()
        } else {
            let end = end.min(total - 1);
            data.slice(start as usize..=end as usize)
        };

        Ok(Box::pin(SimulatedRangeStream::new(
            span,
            self.chunk_size,
            self.open_streams.clone(),
        )))
    }

    fn subscribe_ready(&self) -> broadcast::Receiver<ContentId> {
        self.ready_tx.subscribe()
    }
}

/// Chunked stream over an in-memory byte span.
///
/// Holds an open-stream count for its whole lifetime; dropping it is the
/// release, mirroring how a real engine stops fetching pieces when the
/// read handle goes away.
struct SimulatedRangeStream {
    remaining: Bytes,
    chunk_size: usize,
    open_streams: Arc<AtomicUsize>,
}

impl SimulatedRangeStream {
    fn new(data: Bytes, chunk_size: usize, open_streams: Arc<AtomicUsize>) -> Self {
        open_streams.fetch_add(1, Ordering::SeqCst);
        Self {
            remaining: data,
            chunk_size,
            open_streams,
        }
    }
}

impl Stream for SimulatedRangeStream {
    type Item = Result<Bytes, ContentError>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.remaining.is_empty() {
            return Poll::Ready(None);
        }
        let take = self.chunk_size.min(self.remaining.len());
        let chunk = self.remaining.split_to(take);
        Poll::Ready(Some(Ok(chunk)))
    }
}

impl Drop for SimulatedRangeStream {
    fn drop(&mut self) {
        self.open_streams.fetch_sub(1, Ordering::SeqCst);
    }
}
