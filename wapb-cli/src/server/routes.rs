use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::{ACCEPT, CONTENT_DISPOSITION, CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use wapb_lib::negotiate::{
    encode_created, encode_record, response_format, Encoded, APPLICATION_JSON,
};
use wapb_lib::{CreateRequest, Error, FileGroup, Info, Kind, Negotiate, Params, Resource, UploadPart};

use super::error::ApiError;
use super::metrics::metrics;
use super::state::AppState;

type ApiResult = Result<Response, ApiError>;

// ── Helpers ──────────────────────────────────────────────────

fn header<'a>(headers: &'a HeaderMap, name: axum::http::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn respond(status: StatusCode, encoded: Encoded) -> Response {
    (status, [(CONTENT_TYPE, encoded.content_type)], encoded.body).into_response()
}

fn json(body: Vec<u8>) -> Response {
    (StatusCode::OK, [(CONTENT_TYPE, APPLICATION_JSON)], body).into_response()
}

// ── Heartbeat ────────────────────────────────────────────────

pub async fn handle_ping() -> &'static str {
    "."
}

// ── Generic record handlers (text, link, file groups) ────────

pub async fn handle_list<R: Resource + 'static>(State(state): State<Arc<AppState>>) -> ApiResult {
    let body = state.service.list(R::KIND).await?;
    Ok(json(body))
}

pub async fn handle_create<R: Negotiate + 'static>(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Params>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let req = CreateRequest {
        content_type: header(&headers, CONTENT_TYPE),
        params: &params,
        body: &body,
    };
    let created = state.service.create::<R>(&req).await?;
    metrics()
        .records_created
        .with_label_values(&[R::KIND.route()])
        .inc();

    let format = response_format(header(&headers, ACCEPT), Some(created.format));
    let host = header(&headers, HOST).unwrap_or("localhost");
    let encoded = encode_created(&created.record, format, host, state.service.codec())?;
    Ok(respond(StatusCode::CREATED, encoded))
}

pub async fn handle_get<R: Negotiate + 'static>(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult {
    let record: R = state.service.get(&id).await?;
    let format = response_format(header(&headers, ACCEPT), None);
    let encoded = encode_record(&record, format, state.service.codec())?;
    Ok(respond(StatusCode::OK, encoded))
}

pub async fn handle_delete<R: Resource + 'static>(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    state.service.delete::<R>(&id).await?;
    Ok(StatusCode::OK.into_response())
}

/// `PUT /{kind}/{id}`: creating under a caller-chosen id.
pub async fn handle_create_manual(Path(_id): Path<String>) -> ApiResult {
    Err(Error::Unsupported("creating records with a chosen id").into())
}

// ── File groups ──────────────────────────────────────────────

pub async fn handle_delete_group(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    state.service.delete_group(&id).await?;
    Ok(StatusCode::OK.into_response())
}

pub async fn handle_upload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> ApiResult {
    let mut batch = state.service.begin_upload(&id).await?;
    let mut total = 0u64;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                batch.abort().await;
                return Err(Error::Decode(format!("multipart body: {}", e)).into());
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let contents = match field.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                tracing::warn!(group_id = %id, %filename, error = %e, "failed to read upload part");
                batch.abort().await;
                return Err(Error::Decode(format!("upload part {}: {}", filename, e)).into());
            }
        };

        total += contents.len() as u64;
        let part = UploadPart {
            name,
            filename,
            content_type,
            contents,
        };
        if let Err(e) = batch.add(part).await {
            batch.abort().await;
            return Err(e.into());
        }
    }

    let group: FileGroup = batch.commit().await?;
    metrics().uploaded_bytes.inc_by(total);

    let body = state.service.codec().encode(&group)?;
    Ok((StatusCode::CREATED, [(CONTENT_TYPE, APPLICATION_JSON)], body).into_response())
}

pub async fn handle_get_file(
    State(state): State<Arc<AppState>>,
    Path((group_id, file_id)): Path<(String, String)>,
    Query(params): Query<Params>,
) -> ApiResult {
    let file = state.service.get_file(Some(&group_id), &file_id).await?;

    let mut headers = HeaderMap::new();
    let mime = HeaderValue::from_str(file.mime())
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    headers.insert(CONTENT_TYPE, mime);

    let download = params.get("dl").is_some_and(|v| !v.is_empty());
    if let (true, Some(descriptor)) = (download, &file.descriptor) {
        let filename = descriptor.filename.replace(['"', '\\'], "_");
        match HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename)) {
            Ok(value) => {
                headers.insert(CONTENT_DISPOSITION, value);
            }
            Err(_) => tracing::debug!(%file_id, "filename not usable in Content-Disposition"),
        }
    }

    Ok((StatusCode::OK, headers, file.contents).into_response())
}

// ── Administrative enumeration ───────────────────────────────

#[derive(Serialize)]
struct InfoListing {
    data: Vec<Info>,
}

pub async fn handle_info(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> ApiResult {
    let kind: Kind = kind.parse().map_err(|_| ApiError(Error::NotFound))?;
    let data = state.service.info(kind).await?;
    let body = state.service.codec().encode(&InfoListing { data })?;
    Ok(json(body))
}
