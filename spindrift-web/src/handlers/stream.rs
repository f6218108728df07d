//! Range-streaming proxy handler.
//!
//! Serves `GET /stream/{content_id}/{file_index}` against a resolved
//! handle, honoring Range semantics and piping bytes from the content
//! engine as they arrive. The file is never buffered whole; a client that
//! disconnects tears down only its own session, releasing the engine-side
//! read through the session's drop.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Response, StatusCode, header};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::Stream;
use spindrift_core::content::ContentId;
use spindrift_core::engine::ContentByteStream;
use tracing::{debug, error, warn};

use super::content_error_response;
use super::range::{ByteRange, extract_range_header, parse_range_header, validate_range};
use crate::server::AppState;

pub async fn stream_content(
    State(state): State<AppState>,
    Path((content_id, file_index)): Path<(String, usize)>,
    headers: HeaderMap,
) -> Response<Body> {
    let content_id = ContentId::normalize(&content_id);

    let content = match state.coordinator.acquire(&content_id).await {
        Ok(content) => content,
        Err(error) => return content_error_response(&error, Some(&content_id)),
    };

    // Local validation; the engine is not consulted for a bad index.
    let file = match content.file(file_index) {
        Ok(file) => file.clone(),
        Err(error) => return content_error_response(&error, Some(&content_id)),
    };

    let total_size = file.length;
    let content_type = mime_guess::from_path(&file.name).first_or_octet_stream();

    match extract_range_header(&headers) {
        Some(range_header) => {
            let range = parse_range_header(&range_header, total_size);
            let range = match validate_range(range, total_size) {
                Ok(range) => range,
                Err(status) => {
                    return build_response(
                        Response::builder()
                            .status(status)
                            .header(header::CONTENT_RANGE, format!("bytes */{total_size}"))
                            .body(Body::empty()),
                    );
                }
            };

            let session = match open_session(&state, &content_id, file_index, range).await {
                Ok(session) => session,
                Err(response) => return response,
            };

            build_response(
                Response::builder()
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(
                        header::CONTENT_RANGE,
                        format!("bytes {}-{}/{total_size}", range.start, range.end),
                    )
                    .header(header::ACCEPT_RANGES, "bytes")
                    .header(header::CONTENT_LENGTH, range.content_length().to_string())
                    .header(header::CONTENT_TYPE, content_type.as_ref())
                    .body(Body::from_stream(session)),
            )
        }
        None => {
            if total_size == 0 {
                return build_response(
                    Response::builder()
                        .status(StatusCode::OK)
                        .header(header::CONTENT_LENGTH, "0")
                        .header(header::CONTENT_TYPE, content_type.as_ref())
                        .body(Body::empty()),
                );
            }

            let range = ByteRange {
                start: 0,
                end: total_size - 1,
            };
            let session = match open_session(&state, &content_id, file_index, range).await {
                Ok(session) => session,
                Err(response) => return response,
            };

            build_response(
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_LENGTH, total_size.to_string())
                    .header(header::CONTENT_TYPE, content_type.as_ref())
                    .body(Body::from_stream(session)),
            )
        }
    }
}

/// Opens the engine byte stream for one request.
///
/// Deliberately the last thing done before the response body is built:
/// nothing is fetched for requests that fail validation.
async fn open_session(
    state: &AppState,
    content_id: &ContentId,
    file_index: usize,
    range: ByteRange,
) -> Result<StreamSession, Response<Body>> {
    match state
        .engine
        .open_range(content_id, file_index, range.start, range.end)
        .await
    {
        Ok(stream) => Ok(StreamSession::new(stream, content_id.clone(), file_index)),
        Err(error) => Err(content_error_response(&error, Some(content_id))),
    }
}

fn build_response(response: Result<Response<Body>, axum::http::Error>) -> Response<Body> {
    response.unwrap_or_else(|build_error| {
        error!("failed to build streaming response: {build_error}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Open,
    Streaming,
    Completed,
    Failed,
}

/// One HTTP response body over an engine byte stream.
///
/// Tracks the session through open → streaming → terminal so teardown is
/// reported accurately; the drop is the single release point for the
/// engine read, whether the stream completed, failed, or the client went
/// away mid-transfer.
struct StreamSession {
    stream: ContentByteStream,
    state: SessionState,
    content_id: ContentId,
    file_index: usize,
    bytes_sent: u64,
}

impl StreamSession {
    fn new(stream: ContentByteStream, content_id: ContentId, file_index: usize) -> Self {
        Self {
            stream,
            state: SessionState::Open,
            content_id,
            file_index,
            bytes_sent: 0,
        }
    }
}

impl Stream for StreamSession {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let session = self.get_mut();
        match session.stream.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                session.state = SessionState::Streaming;
                session.bytes_sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(stream_error))) => {
                // Headers are already on the wire; all that is left is to
                // log and cut the connection.
                warn!(
                    content_id = %session.content_id,
                    file_index = session.file_index,
                    bytes_sent = session.bytes_sent,
                    "engine read failed mid-stream: {stream_error}"
                );
                session.state = SessionState::Failed;
                Poll::Ready(Some(Err(io::Error::other(stream_error))))
            }
            Poll::Ready(None) => {
                session.state = SessionState::Completed;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        match self.state {
            SessionState::Completed => {
                debug!(
                    content_id = %self.content_id,
                    file_index = self.file_index,
                    bytes_sent = self.bytes_sent,
                    "stream completed"
                );
            }
            // Already logged when the read failed.
            SessionState::Failed => {}
            SessionState::Open | SessionState::Streaming => {
                debug!(
                    content_id = %self.content_id,
                    file_index = self.file_index,
                    bytes_sent = self.bytes_sent,
                    "client disconnected, releasing stream"
                );
            }
        }
    }
}
