//! Storage handlers: multipart upload, streaming download, signed URLs.

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::instrument;
use utoipa::IntoParams;

use crate::{
    api::models::pagination::Pagination,
    auth::{CurrentIdentity, RequireAdmin},
    errors::{Error, Result},
    storage::SignedUrl,
    types::Role,
    AppState,
};

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct DownloadParams {
    /// Signed-URL expiry (unix seconds)
    pub expires: Option<i64>,
    /// Signed-URL signature
    pub sig: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/storage/{bucket}",
    tag = "storage",
    summary = "Upload an object",
    description = "Multipart upload with a single `file` field. The part's filename becomes the object name unless a `name` field precedes it.",
    params(("bucket" = String, Path, description = "Bucket name")),
    responses(
        (status = 201, description = "Object stored", body = serde_json::Value),
        (status = 400, description = "Missing file field or invalid name"),
    )
)]
#[instrument(skip_all, fields(bucket = %bucket))]
pub async fn upload(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(bucket): Path<String>,
    mut multipart: Multipart,
) -> Result<Response> {
    let mut explicit_name: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::bad_request(format!("malformed multipart body: {e}")))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("name") => {
                explicit_name = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| Error::bad_request(format!("bad name field: {e}")))?,
                );
            }
            Some("file") => {
                let name = explicit_name
                    .or_else(|| field.file_name().map(str::to_string))
                    .ok_or_else(|| Error::bad_request("object name missing: provide a filename or a name field"))?;
                let content_type = field.content_type().map(str::to_string);

                let object = state
                    .storage
                    .store(&bucket, &name, content_type.as_deref(), field)
                    .await?;
                let body = serde_json::json!({
                    "id": object.id,
                    "bucket": object.bucket,
                    "name": object.name,
                    "size": object.size,
                    "contentType": object.content_type,
                    "createdAt": object.created_at,
                });
                return Ok((StatusCode::CREATED, Json(body)).into_response());
            }
            _ => continue,
        }
    }

    Err(Error::bad_request("multipart body must contain a file field"))
}

#[utoipa::path(
    get,
    path = "/api/storage/{bucket}/{name}",
    tag = "storage",
    summary = "Download an object",
    description = "Streams the object bytes. Accepts either an authenticated identity or a valid signed-URL token.",
    params(
        ("bucket" = String, Path, description = "Bucket name"),
        ("name" = String, Path, description = "Object name"),
        DownloadParams,
    ),
    responses(
        (status = 200, description = "Object bytes"),
        (status = 401, description = "No identity and no valid signature"),
        (status = 404, description = "Unknown object"),
    )
)]
#[instrument(skip_all, fields(bucket = %bucket, name = %name))]
pub async fn download(
    State(state): State<AppState>,
    Path((bucket, name)): Path<(String, String)>,
    Query(params): Query<DownloadParams>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<Response> {
    let signed_ok = match (params.expires, params.sig.as_deref()) {
        (Some(expires), Some(sig)) => state.storage.verify(&bucket, &name, expires, sig),
        _ => false,
    };
    if !signed_ok && identity.role == Role::Anon {
        return Err(Error::unauthenticated());
    }

    let (object, file) = state.storage.open(&bucket, &name).await?;
    let stream = ReaderStream::new(file);
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, object.content_type)
        .header(header::CONTENT_LENGTH, object.size)
        .header(header::CACHE_CONTROL, "private, max-age=3600")
        .body(Body::from_stream(stream))
        .map_err(|e| Error::Internal {
            operation: format!("build download response: {e}"),
        })?;
    Ok(response)
}

#[utoipa::path(
    get,
    path = "/api/storage/{bucket}",
    tag = "storage",
    summary = "List objects in a bucket",
    params(("bucket" = String, Path, description = "Bucket name"), Pagination),
    responses((status = 200, description = "Objects, by name", body = serde_json::Value))
)]
#[instrument(skip_all, fields(bucket = %bucket))]
pub async fn list(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(bucket): Path<String>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<serde_json::Value>> {
    let objects = state.storage.list(&bucket, pagination.limit(), pagination.skip()).await?;
    let items: Vec<serde_json::Value> = objects
        .into_iter()
        .map(|o| {
            serde_json::json!({
                "id": o.id,
                "bucket": o.bucket,
                "name": o.name,
                "size": o.size,
                "contentType": o.content_type,
                "createdAt": o.created_at,
            })
        })
        .collect();
    Ok(Json(serde_json::json!({ "items": items })))
}

#[utoipa::path(
    delete,
    path = "/api/storage/{bucket}/{name}",
    tag = "storage",
    summary = "Delete an object",
    params(
        ("bucket" = String, Path, description = "Bucket name"),
        ("name" = String, Path, description = "Object name"),
    ),
    responses(
        (status = 204, description = "Blob and metadata removed"),
        (status = 404, description = "Unknown object"),
    )
)]
#[instrument(skip_all, fields(bucket = %bucket, name = %name))]
pub async fn delete(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path((bucket, name)): Path<(String, String)>,
) -> Result<StatusCode> {
    state.storage.delete(&bucket, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/storage/{bucket}/{name}/sign",
    tag = "storage",
    summary = "Create a signed download URL",
    params(
        ("bucket" = String, Path, description = "Bucket name"),
        ("name" = String, Path, description = "Object name"),
    ),
    responses(
        (status = 200, description = "Short-lived signed URL", body = SignedUrl),
        (status = 404, description = "Unknown object"),
        (status = 412, description = "No signing secret configured"),
    )
)]
#[instrument(skip_all, fields(bucket = %bucket, name = %name))]
pub async fn sign(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path((bucket, name)): Path<(String, String)>,
) -> Result<Json<SignedUrl>> {
    let signed = state.storage.sign(&bucket, &name).await?;
    Ok(Json(signed))
}
