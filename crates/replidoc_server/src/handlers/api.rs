use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::info;

use replidoc_core::attachment::AttachmentId;
use replidoc_core::changeset::{AttachmentPayloads, Changeset, ChangesetResult};
use replidoc_core::primary::Primary;

use crate::auth::RequireAuth;
use crate::error::ApiError;

/// Changeset uploads carry binary attachment payloads
const MAX_CHANGESET_BYTES: usize = 64 * 1024 * 1024;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub primary: Arc<Primary>,
}

#[derive(Debug, Serialize)]
pub struct CompactResponse {
    pub compacted: usize,
}

/// Create API routes
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/changeset", post(apply_changeset))
        .route("/file/{id}", get(get_file))
        .route("/compact", post(compact))
        .layer(DefaultBodyLimit::max(MAX_CHANGESET_BYTES))
        .with_state(state)
}

/// POST /api/changeset - Apply a replica's changeset
///
/// Multipart body: a `changeset` field holding the JSON changeset plus
/// one file part per new attachment, named by attachment id.
async fn apply_changeset(
    State(state): State<ApiState>,
    RequireAuth(_): RequireAuth,
    mut multipart: Multipart,
) -> Result<Json<ChangesetResult>, ApiError> {
    let mut changeset: Option<Changeset> = None;
    let mut payloads = AttachmentPayloads::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(format!("malformed multipart body: {err}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|err| ApiError::bad_request(format!("unreadable field {name}: {err}")))?;

        if name == "changeset" {
            let parsed = serde_json::from_slice(&data)
                .map_err(|err| ApiError::bad_request(format!("malformed changeset: {err}")))?;
            changeset = Some(parsed);
        } else {
            payloads.insert(AttachmentId::new(name), data.to_vec());
        }
    }

    let Some(changeset) = changeset else {
        return Err(ApiError::bad_request("missing changeset field"));
    };

    info!(
        base_rev = %changeset.base_rev,
        documents = changeset.documents.len(),
        attachments = changeset.attachments.len(),
        "applying changeset"
    );

    // primary storage is blocking fs work
    let primary = state.primary.clone();
    let result = tokio::task::spawn_blocking(move || primary.apply_changeset(changeset, &payloads))
        .await
        .map_err(|err| ApiError::internal(format!("changeset task failed: {err}")))??;

    Ok(Json(result))
}

/// GET /api/file/{id} - Stream an attachment payload
///
/// Payloads are immutable per id, so clients may cache forever.
async fn get_file(
    State(state): State<ApiState>,
    RequireAuth(_): RequireAuth,
    Path(id): Path<String>,
) -> Response {
    let id = AttachmentId::new(id);

    let Some(path) = state.primary.get_attachment_payload_path(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let mime_type = state
        .primary
        .get_attachment(&id)
        .map(|attachment| attachment.mime_type)
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };

    (
        [
            (header::CONTENT_TYPE, mime_type),
            (
                header::CACHE_CONTROL,
                "public, max-age=31536000, immutable".to_string(),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}

/// POST /api/compact - Reclaim unreferenced attachment payloads
async fn compact(
    State(state): State<ApiState>,
    RequireAuth(_): RequireAuth,
) -> Result<Json<CompactResponse>, ApiError> {
    let primary = state.primary.clone();
    let compacted = tokio::task::spawn_blocking(move || primary.compact())
        .await
        .map_err(|err| ApiError::internal(format!("compact task failed: {err}")))??;

    Ok(Json(CompactResponse { compacted }))
}
