//! JSON API for starting streams.
//!
//! `POST /start-stream` resolves a magnet link or info hash through the
//! acquisition coordinator. Without a file index it answers with the
//! resolved file listing so a frontend can offer choices; with one it
//! answers with the locator of the range-streaming endpoint.

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;
use spindrift_core::content::ContentId;
use tracing::debug;

use super::content_error_response;
use crate::server::AppState;

/// Request body for `POST /start-stream`.
#[derive(Debug, Deserialize)]
pub struct StartStreamRequest {
    pub magnet: Option<String>,
    #[serde(rename = "fileIndex")]
    pub file_index: Option<usize>,
}

pub async fn start_stream(
    State(state): State<AppState>,
    Json(request): Json<StartStreamRequest>,
) -> Response<Body> {
    let Some(magnet) = request
        .magnet
        .as_deref()
        .map(str::trim)
        .filter(|magnet| !magnet.is_empty())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Magnet link required" })),
        )
            .into_response();
    };

    let content_id = ContentId::normalize(magnet);
    debug!(%content_id, file_index = ?request.file_index, "start-stream request");

    let content = match state.coordinator.acquire(&content_id).await {
        Ok(content) => content,
        Err(error) => return content_error_response(&error, Some(&content_id)),
    };

    match request.file_index {
        None => {
            let files: Vec<_> = content
                .files
                .iter()
                .map(|file| {
                    json!({
                        "index": file.index,
                        "name": file.name,
                        "length": file.length,
                        "mime": mime_guess::from_path(&file.name)
                            .first_or_octet_stream()
                            .to_string(),
                    })
                })
                .collect();

            Json(json!({
                "infoHash": content.content_id.to_string(),
                "name": content.display_name,
                "files": files,
            }))
            .into_response()
        }
        Some(index) => match content.file(index) {
            Ok(file) => Json(json!({
                "url": stream_url(&content.content_id, file.index),
            }))
            .into_response(),
            Err(error) => content_error_response(&error, Some(&content_id)),
        },
    }
}

/// Locator of the range-streaming endpoint for one file.
pub fn stream_url(content_id: &ContentId, file_index: usize) -> String {
    format!(
        "/stream/{}/{file_index}",
        urlencoding::encode(&content_id.to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_uses_the_canonical_hash() {
        let content_id = ContentId::normalize("0123456789ABCDEF0123456789ABCDEF01234567");
        assert_eq!(
            stream_url(&content_id, 2),
            "/stream/0123456789abcdef0123456789abcdef01234567/2"
        );
    }

    #[test]
    fn stream_url_escapes_raw_fallback_keys() {
        let content_id = ContentId::normalize("not a hash");
        assert_eq!(stream_url(&content_id, 0), "/stream/not%20a%20hash/0");
    }
}
