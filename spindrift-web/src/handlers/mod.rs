//! Request handlers for the streaming API.

pub mod api;
pub mod range;
pub mod stream;

pub use api::start_stream;
pub use stream::stream_content;

use axum::Json;
use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use serde_json::json;
use spindrift_core::content::ContentId;
use spindrift_core::engine::ContentError;

/// Maps a content error onto exactly one HTTP response.
///
/// Timeout is deliberately distinct from failure so clients can tell "try
/// again later" (504) from "this content is broken" (500). Capability
/// refusal gets a structured body so frontends never end up parsing an
/// HTML error page.
pub(crate) fn content_error_response(
    error: &ContentError,
    content_id: Option<&ContentId>,
) -> Response<Body> {
    if let ContentError::CapabilityUnavailable { .. } = error {
        let info_hash = content_id
            .and_then(ContentId::info_hash)
            .map(|hash| hash.to_string());
        return (
            StatusCode::NOT_IMPLEMENTED,
            Json(json!({
                "error": "streaming_not_supported_in_ephemeral_deployment",
                "fallback": true,
                "note": "Content resolution requires a long-running process that can \
                         hold open peer connections. Deploy the persistent server to \
                         stream this content.",
                "infoHash": info_hash,
            })),
        )
            .into_response();
    }

    let status = match error {
        ContentError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
        ContentError::ContentNotFound { .. } | ContentError::FileNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        ContentError::ResolutionTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ContentError::ResolutionFailed { .. }
        | ContentError::StreamError { .. }
        | ContentError::EngineClosed => StatusCode::INTERNAL_SERVER_ERROR,
        ContentError::CapabilityUnavailable { .. } => StatusCode::NOT_IMPLEMENTED,
    };

    (status, Json(json!({ "error": error.to_string() }))).into_response()
}
