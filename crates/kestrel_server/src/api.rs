use crate::prelude::*;

use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::StreamExt;
use kestrel_core::media::encode_data_uri;
use kestrel_core::prelude::*;
use serde_json::json;
use std::path::Path as FilePath;
use tracing::{error, info, warn};

pub struct ApiError(anyhow::Error);

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// Validation problems are reported as `{"error"}`, everything else as `{"detail"}`.
fn error_body(status: StatusCode, message: String) -> Response {
    let body = if status == StatusCode::BAD_REQUEST {
        json!({ "error": message })
    } else {
        json!({ "detail": message })
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Some(err) = self.0.downcast_ref::<JobError>() {
            return match err {
                JobError::Validation(_) => error_body(StatusCode::BAD_REQUEST, err.to_string()),
                JobError::NotFound(_) | JobError::Unsupported(_) => {
                    error_body(StatusCode::NOT_FOUND, err.to_string())
                }
                _ => {
                    error!("Job error: {err}");
                    error_body(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
                }
            };
        }

        if let Some(err) = self.0.downcast_ref::<StorageError>() {
            return match err {
                StorageError::NotFound(_) => error_body(StatusCode::NOT_FOUND, err.to_string()),
                StorageError::InvalidRequest(_) => {
                    error_body(StatusCode::BAD_REQUEST, err.to_string())
                }
                _ => {
                    error!("Internal Server StorageError: {:?}", self.0);
                    error_body(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Storage Error".to_string(),
                    )
                }
            };
        }

        error!("Internal Server Error: {:?}", self.0);
        error_body(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error".to_string(),
        )
    }
}

/// POST /api/jobs/{capability}
pub async fn submit<P: InferenceProvider, St: StorageBackend>(
    State(state): State<AppState<P, St>>,
    Path(capability): Path<String>,
    Json(request): Json<JobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let capability: Capability = capability.parse()?;
    let snapshot = state.jobs.submit(capability, &request).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// GET /api/jobs/{capability}/{id}
///
/// Terminal snapshots carry the normalized output instead of the provider's raw one.
pub async fn status<P: InferenceProvider, St: StorageBackend>(
    State(state): State<AppState<P, St>>,
    Path((capability, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let capability: Capability = capability.parse()?;
    state.jobs.adapter(capability)?;

    let snapshot = state.jobs.status(&JobHandle::new(id)).await?;
    if !snapshot.is_terminal() {
        return Ok(Json(snapshot.without_partial_output()));
    }

    let outcome = state.outcome(capability, &snapshot).await;
    Ok(Json(snapshot.with_outcome(&outcome)))
}

/// POST /api/jobs/{capability}/run
pub async fn run<P: InferenceProvider, St: StorageBackend>(
    State(state): State<AppState<P, St>>,
    Path(capability): Path<String>,
    Json(request): Json<JobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let capability: Capability = capability.parse()?;
    let res = state.jobs.run(capability, &request).await.map(Json)?;
    Ok(res)
}

/// POST /api/remove-background
///
/// Takes the image as the `image` field of a multipart form and waits for the cut-out.
pub async fn remove_background<P: InferenceProvider, St: StorageBackend>(
    State(state): State<AppState<P, St>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut media = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| JobError::Validation(e.body_text()))?
    {
        if field.name() != Some("image") {
            continue;
        }

        let mime = field
            .content_type()
            .map(str::to_string)
            .or_else(|| {
                field
                    .file_name()
                    .and_then(|name| mime_guess::from_path(name).first_raw())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let data = field
            .bytes()
            .await
            .map_err(|e| JobError::Validation(e.body_text()))?;

        if !data.is_empty() {
            media = Some(encode_data_uri(&mime, &data));
        }
    }

    let request = JobRequest {
        media,
        ..Default::default()
    };
    let res = state
        .jobs
        .run(Capability::BackgroundRemoval, &request)
        .await
        .map(Json)?;
    Ok(res)
}

#[derive(serde::Deserialize)]
pub struct DownloadParams {
    url: Option<String>,
}

/// GET /api/download?url=
///
/// Serves an output as an attachment, from storage when it is ours, proxied otherwise.
pub async fn download<P: InferenceProvider, St: StorageBackend>(
    State(state): State<AppState<P, St>>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, ApiError> {
    let url = params
        .url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| JobError::Validation("URL is required".into()))?;

    if let Some(name) = state.storage().local_name(&url) {
        let data = state.storage().read_file(name).await?;
        let content_type = content_type_for(name);
        let file_name = attachment_name(name, &content_type);
        return Ok(attachment(content_type, &file_name, data.into()));
    }

    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(JobError::Validation(format!("Unsupported URL: {url}")).into());
    }

    let response = state
        .http
        .get(&url)
        .header(header::ACCEPT, "video/mp4,video/*;q=0.9,*/*;q=0.8")
        .send()
        .await
        .map_err(|e| {
            warn!("Download of {url} failed: {e}");
            JobError::Network("Failed to download file".into())
        })?;

    if !response.status().is_success() {
        warn!("Download of {url} answered {}", response.status());
        return Err(JobError::Provider(format!("Failed to download file: {}", response.status())).into());
    }

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| content_type_for(&url));

    let file_name = attachment_name(&url, &content_type);
    info!("Proxying {url} as {file_name}");
    Ok(attachment(
        content_type,
        &file_name,
        Body::from_stream(response.bytes_stream()),
    ))
}

/// GET /tmp/{name}
pub async fn get_output<P: InferenceProvider, St: StorageBackend>(
    State(state): State<AppState<P, St>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let data = state.storage().read_file(&name).await?;
    let content_type = mime_guess::from_path(&name).first_or_octet_stream();
    Ok(([(header::CONTENT_TYPE, content_type.to_string())], data))
}

/// GET /api/jobs/{capability}/{id}/attach
///
/// Streams [`WatchEvent`]s over a WebSocket until the job ends. Closing the socket stops polling.
pub async fn attach<P: InferenceProvider, St: StorageBackend>(
    State(state): State<AppState<P, St>>,
    Path((capability, id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let capability: Capability = capability.parse()?;
    let poller = state.jobs.poller(capability)?;
    let handle = JobHandle::new(id);

    let res = ws.on_upgrade(move |socket| {
        handle_attach_socket(state, capability, poller, handle, socket)
    });
    Ok(res)
}

async fn handle_attach_socket<P: InferenceProvider, St: StorageBackend>(
    state: AppState<P, St>,
    capability: Capability,
    poller: JobPoller<P>,
    handle: JobHandle,
    mut socket: WebSocket,
) {
    let initial = match state.jobs.status(&handle).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            let _ = send_event(&mut socket, &WatchEvent::Finished(JobOutcome::failed(e))).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    info!("Attached to job {handle}");
    let mut updates = poller.watch(initial);

    loop {
        tokio::select! {
            update = updates.next() => {
                match update {
                    Some(Ok(snapshot)) if snapshot.is_terminal() => {
                        let outcome = state.outcome(capability, &snapshot).await;
                        let _ = send_event(&mut socket, &WatchEvent::Status(snapshot.with_outcome(&outcome))).await;
                        let _ = send_event(&mut socket, &WatchEvent::Finished(outcome)).await;
                        break;
                    }
                    Some(Ok(snapshot)) => {
                        let event = WatchEvent::Status(snapshot.without_partial_output());
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        let _ = send_event(&mut socket, &WatchEvent::Finished(JobOutcome::failed(e))).await;
                        break;
                    }
                    None => break,
                }
            }
            client_msg = socket.recv() => {
                match client_msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    drop(updates);
    let _ = socket.send(Message::Close(None)).await;
    info!("Detached from job {handle}");
}

async fn send_event(socket: &mut WebSocket, event: &WatchEvent) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(text) => socket.send(Message::Text(text.into())).await,
        Err(e) => {
            error!("Serialization error: {:?}", e);
            Ok(())
        }
    }
}

fn content_type_for(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("video/mp4")
        .to_string()
}

/// `<stem>-<millis>.<ext>`, where the extension comes from the source path or the content type.
fn attachment_name(source: &str, content_type: &str) -> String {
    let path = source.split(['?', '#']).next().unwrap_or(source);
    let path = FilePath::new(path.rsplit('/').next().unwrap_or(path));

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("kestrel");
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_string)
        .or_else(|| {
            mime_guess::get_mime_extensions_str(content_type)
                .and_then(|exts| exts.first())
                .map(|e| e.to_string())
        })
        .unwrap_or_else(|| "mp4".to_string());

    format!("{stem}-{}.{extension}", Utc::now().timestamp_millis())
}

fn attachment(content_type: String, file_name: &str, body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        body,
    )
        .into_response()
}
