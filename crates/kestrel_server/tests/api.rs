//! Route tests against a mocked Replicate API and a temporary output directory.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use http_body_util::BodyExt;
use kestrel_core::prelude::*;
use kestrel_fs::FileSystemStorage;
use kestrel_replicate::{ReplicateClient, ReplicateConfig, adapters};
use kestrel_server::prelude::*;
use serde_json::{Value, json};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    upstream: MockServer,
    outputs: TempDir,
    app: Router,
}

async fn harness(token: Option<&str>) -> Harness {
    let upstream = MockServer::start().await;
    let outputs = TempDir::new().unwrap();

    let provider = ReplicateClient::new(ReplicateConfig {
        base_url: upstream.uri(),
        api_token: token.map(str::to_string),
        ..Default::default()
    })
    .unwrap();
    let jobs = JobService::new(provider, FileSystemStorage::new(outputs.path()))
        .with_adapters(adapters::all())
        .with_interval(Duration::from_millis(10));

    Harness {
        upstream,
        outputs,
        app: KestrelServer::default().build(jobs),
    }
}

fn prediction(id: &str, status: &str, output: Value) -> Value {
    json!({
        "id": id,
        "status": status,
        "input": {},
        "output": output,
        "error": null,
        "logs": "",
        "created_at": "2024-11-02T10:00:00.000Z"
    })
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

async fn read_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn read_bytes(response: Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

fn multipart(field: &str, file_name: &str, mime: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(b"--KESTREL\r\n");
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
             Content-Type: {mime}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n--KESTREL--\r\n");

    Request::post(routes::REMOVE_BACKGROUND)
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=KESTREL")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn health_check() {
    let h = harness(Some("r8_test")).await;
    let response = send(&h.app, get(routes::HEALTH)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_bytes(response).await, b"OK");
}

#[tokio::test]
async fn submit_returns_the_first_snapshot() {
    let h = harness(Some("r8_test")).await;
    Mock::given(method("POST"))
        .and(path("/models/black-forest-labs/flux-schnell/predictions"))
        .and(body_partial_json(json!({ "input": { "prompt": "a kestrel at dusk" } })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(prediction("p1", "starting", Value::Null)),
        )
        .expect(1)
        .mount(&h.upstream)
        .await;

    let response = send(
        &h.app,
        post_json(
            "/api/jobs/generate-image",
            json!({ "prompt": "a kestrel at dusk", "model": adapters::FLUX_SCHNELL }),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    assert_eq!(body["id"], "p1");
    assert_eq!(body["status"], "starting");
}

#[tokio::test]
async fn validation_errors_never_reach_the_provider() {
    let h = harness(Some("r8_test")).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&h.upstream)
        .await;

    let response = send(
        &h.app,
        post_json("/api/jobs/generate-image", json!({ "model": adapters::FLUX_PRO })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await, json!({ "error": "No prompt provided" }));

    let response = send(
        &h.app,
        post_json(
            "/api/jobs/generate-image",
            json!({ "prompt": "a kestrel", "model": "someone/else" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await, json!({ "error": "Invalid model selected" }));
}

#[tokio::test]
async fn unknown_capability_is_not_found() {
    let h = harness(Some("r8_test")).await;
    let response = send(&h.app, post_json("/api/jobs/upscale", json!({ "prompt": "x" }))).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_api_key_is_a_server_error() {
    let h = harness(None).await;
    let response = send(
        &h.app,
        post_json(
            "/api/jobs/live2d",
            json!({ "first_frame_image": "data:image/png;base64,iVBORw0KGgo=" }),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        read_json(response).await,
        json!({ "detail": "REPLICATE_API_KEY is not set" })
    );
}

#[tokio::test]
async fn finished_jobs_are_persisted_once() {
    let h = harness(Some("r8_test")).await;
    let video_url = format!("{}/delivery/a1.mp4", h.upstream.uri());
    Mock::given(method("GET"))
        .and(path("/predictions/a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prediction(
            "a1",
            "succeeded",
            json!(video_url),
        )))
        .mount(&h.upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/delivery/a1.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x00\x00\x00\x18ftypmp42".to_vec()))
        .expect(1)
        .mount(&h.upstream)
        .await;

    let first = read_json(send(&h.app, get("/api/jobs/live2d/a1")).await).await;
    let second = read_json(send(&h.app, get("/api/jobs/live2d/a1")).await).await;

    assert_eq!(first["status"], "succeeded");
    let reference = first["output"].as_str().unwrap();
    assert!(reference.starts_with("/tmp/live2d-animation-"), "{reference}");
    assert!(reference.ends_with(".mp4"), "{reference}");
    assert_eq!(second["output"], first["output"]);

    let name = reference.trim_start_matches("/tmp/");
    let stored = std::fs::read(h.outputs.path().join(name)).unwrap();
    assert_eq!(stored, b"\x00\x00\x00\x18ftypmp42");

    let served = send(&h.app, get(reference)).await;
    assert_eq!(served.status(), StatusCode::OK);
    assert_eq!(served.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(read_bytes(served).await, stored);
}

#[tokio::test]
async fn outcomes_are_remembered_per_capability() {
    let h = harness(Some("r8_test")).await;
    let url = format!("{}/delivery/shared.mp4", h.upstream.uri());
    Mock::given(method("GET"))
        .and(path("/predictions/shared"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prediction("shared", "succeeded", json!(url))))
        .mount(&h.upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/delivery/shared.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp4".to_vec()))
        .mount(&h.upstream)
        .await;

    let animation = read_json(send(&h.app, get("/api/jobs/live2d/shared")).await).await;
    let image = read_json(send(&h.app, get("/api/jobs/generate-image/shared")).await).await;

    let stored = animation["output"].as_str().unwrap();
    assert!(stored.starts_with("/tmp/live2d-animation-"), "{stored}");
    assert_eq!(image["output"], json!(url));
}

#[tokio::test]
async fn outcome_cache_is_bounded() {
    let upstream = MockServer::start().await;
    let outputs = TempDir::new().unwrap();
    let provider = ReplicateClient::new(ReplicateConfig {
        base_url: upstream.uri(),
        api_token: Some("r8_test".into()),
        ..Default::default()
    })
    .unwrap();
    let jobs = JobService::new(provider, FileSystemStorage::new(outputs.path()))
        .with_adapters(adapters::all());
    let app = KestrelServer::new(KestrelServerConfig {
        outcome_capacity: Some(1),
        ..Default::default()
    })
    .build(jobs);

    let delivered = |id: &str| {
        let url = format!("{}/delivery/{id}.mp4", upstream.uri());
        prediction(id, "succeeded", json!(url))
    };
    for id in ["c1", "c2"] {
        Mock::given(method("GET"))
            .and(path(format!("/predictions/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(delivered(id)))
            .mount(&upstream)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/delivery/{id}.mp4")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp4".to_vec()))
            .mount(&upstream)
            .await;
    }

    let first = read_json(send(&app, get("/api/jobs/live2d/c1")).await).await;
    read_json(send(&app, get("/api/jobs/live2d/c2")).await).await;
    let again = read_json(send(&app, get("/api/jobs/live2d/c1")).await).await;

    // c2 pushed c1 out, so c1 was finalized and stored a second time.
    assert_ne!(first["output"], again["output"]);
    let stored = std::fs::read_dir(outputs.path()).unwrap().count();
    assert_eq!(stored, 3);
}

#[tokio::test]
async fn running_jobs_hide_partial_output() {
    let h = harness(Some("r8_test")).await;
    Mock::given(method("GET"))
        .and(path("/predictions/a2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prediction(
            "a2",
            "processing",
            json!(["https://replicate.delivery/partial.mp4"]),
        )))
        .mount(&h.upstream)
        .await;

    let body = read_json(send(&h.app, get("/api/jobs/live2d/a2")).await).await;

    assert_eq!(body["status"], "processing");
    assert!(body["output"].is_null());
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let h = harness(Some("r8_test")).await;
    Mock::given(method("GET"))
        .and(path("/predictions/nope"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "detail": "Not found." })))
        .mount(&h.upstream)
        .await;

    let response = send(&h.app, get("/api/jobs/soundtovideo/nope")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn run_reports_failed_predictions_as_outcomes() {
    let h = harness(Some("r8_test")).await;
    Mock::given(method("POST"))
        .and(path("/predictions"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(prediction("s1", "starting", Value::Null)),
        )
        .mount(&h.upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/predictions/s1"))
        .respond_with(ResponseTemplate::new(200).set_body_json({
            let mut failed = prediction("s1", "failed", Value::Null);
            failed["error"] = json!("CUDA out of memory");
            failed
        }))
        .mount(&h.upstream)
        .await;

    let response = send(
        &h.app,
        post_json(
            "/api/jobs/soundtovideo/run",
            json!({ "videoFile": "https://example.com/clip.mp4", "prompt": "rain" }),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        read_json(response).await,
        json!({ "status": "failed", "error": "CUDA out of memory" })
    );
}

#[tokio::test]
async fn remove_background_from_upload() {
    let h = harness(Some("r8_test")).await;
    Mock::given(method("POST"))
        .and(path("/predictions"))
        .and(body_partial_json(json!({
            "version": adapters::REMOVE_BG,
            "input": { "image": "data:image/png;base64,iVBORw==" }
        })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(prediction("bg1", "starting", Value::Null)),
        )
        .expect(1)
        .mount(&h.upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/predictions/bg1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prediction(
            "bg1",
            "succeeded",
            json!("https://replicate.delivery/cut.png"),
        )))
        .mount(&h.upstream)
        .await;

    let response = send(&h.app, multipart("image", "cat.png", "image/png", b"\x89PNG")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        read_json(response).await,
        json!({ "status": "succeeded", "output": "https://replicate.delivery/cut.png" })
    );
}

#[tokio::test]
async fn remove_background_requires_an_image() {
    let h = harness(Some("r8_test")).await;
    let response = send(&h.app, multipart("photo", "cat.png", "image/png", b"\x89PNG")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await, json!({ "error": "No image file provided" }));
}

#[tokio::test]
async fn download_serves_attachments() {
    let h = harness(Some("r8_test")).await;
    std::fs::write(h.outputs.path().join("soundtovideo-1.mp4"), b"local video").unwrap();
    Mock::given(method("GET"))
        .and(path("/delivery/cut.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(b"remote png".to_vec()),
        )
        .mount(&h.upstream)
        .await;

    let local = send(&h.app, get("/api/download?url=/tmp/soundtovideo-1.mp4")).await;
    assert_eq!(local.status(), StatusCode::OK);
    assert_eq!(local.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(local.headers()[header::CACHE_CONTROL], "no-cache");
    let disposition = local.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("attachment; filename=\"soundtovideo-1-"), "{disposition}");
    assert_eq!(read_bytes(local).await, b"local video");

    let remote_url = format!("{}/delivery/cut.png", h.upstream.uri());
    let remote = send(&h.app, get(&format!("/api/download?url={remote_url}"))).await;
    assert_eq!(remote.status(), StatusCode::OK);
    assert_eq!(remote.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(read_bytes(remote).await, b"remote png");
}

#[tokio::test]
async fn download_rejects_bad_urls() {
    let h = harness(Some("r8_test")).await;

    let missing = send(&h.app, get("/api/download")).await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    let unsupported = send(&h.app, get("/api/download?url=ftp://example.com/a.mp4")).await;
    assert_eq!(unsupported.status(), StatusCode::BAD_REQUEST);

    let escape = send(&h.app, get("/tmp/..")).await;
    assert_eq!(escape.status(), StatusCode::BAD_REQUEST);

    let gone = send(&h.app, get("/tmp/never-written.mp4")).await;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}
