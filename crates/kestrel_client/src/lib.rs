//! # Kestrel Client
//!
//! An async HTTP client for a Kestrel Server.
//!
//! Used by tooling (the CLI, scripts) to submit jobs, follow them until they finish and fetch
//! what they produced. Following a job can either poll the status route with the same
//! [`JobPoller`] the server uses, or attach to the server's WebSocket and let it poll.
//!
//! ## Example: Animating an Image
//!
//! ```no_run
//! use kestrel_client::KestrelClient;
//! use kestrel_core::prelude::*;
//! use std::path::Path;
//!
//! async fn run() -> kestrel_client::Result<()> {
//!     let client = KestrelClient::new("http://localhost:3000");
//!
//!     let submitted = client
//!         .submit(Capability::Animation, &JobRequest {
//!             media: Some("https://example.com/portrait.png".into()),
//!             ..Default::default()
//!         })
//!         .await?;
//!
//!     let outcome = client
//!         .attach(Capability::Animation, &submitted.handle, |event| println!("{event:?}"))
//!         .await?;
//!
//!     if let Some(output) = outcome.output() {
//!         client.download(output.as_str(), Path::new(".")).await?;
//!     }
//!     Ok(())
//! }
//! ```

use futures_util::{SinkExt, StreamExt};
use kestrel_core::prelude::{routes::*, *};
use reqwest::{Client, Response, StatusCode, Url, header, multipart};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite::{Message, client::IntoClientRequest};
use tracing::{debug, warn};

const HEARTBEAT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum KestrelClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server returned error {0}: {1}")]
    ServerError(StatusCode, String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Job(#[from] JobError),
}

pub type Result<T> = std::result::Result<T, KestrelClientError>;

impl From<KestrelClientError> for JobError {
    fn from(err: KestrelClientError) -> Self {
        match err {
            KestrelClientError::Job(e) => e,
            KestrelClientError::Network(e) => JobError::Network(e.to_string()),
            KestrelClientError::ServerError(StatusCode::BAD_REQUEST, msg) => {
                JobError::Validation(msg)
            }
            e => JobError::Provider(e.to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct KestrelClient {
    base_url: String,
    client: Client,
    interval: Duration,
}

impl KestrelClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
            interval: DEFAULT_INTERVAL,
        }
    }

    /// How often [`KestrelClient::wait`] polls the status route.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn url(&self, route: &str, capability: Capability, handle: Option<&JobHandle>) -> String {
        let mut path = route.replace("{capability}", capability.slug());
        if let Some(handle) = handle {
            path = path.replace("{id}", handle.as_str());
        }
        format!("{}{}", self.base_url, path)
    }

    /// Turns non-2xx answers into [`KestrelClientError::ServerError`] with the server's message.
    async fn check(response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| {
                ["error", "detail"]
                    .iter()
                    .find_map(|key| v.get(key).and_then(Value::as_str).map(str::to_string))
            })
            .unwrap_or(text);
        Err(KestrelClientError::ServerError(status, message))
    }

    async fn parse<T: serde::de::DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| KestrelClientError::Validation(format!("Failed to parse {what}: {e}")))
    }

    pub async fn submit(&self, capability: Capability, request: &JobRequest) -> Result<JobSnapshot> {
        let url = self.url(JOBS, capability, None);
        let response = self.client.post(&url).json(request).send().await?;
        let response = Self::check(response).await?;
        Self::parse(response, "job snapshot").await
    }

    pub async fn status(&self, capability: Capability, handle: &JobHandle) -> Result<JobSnapshot> {
        let url = self.url(JOB_BY_ID, capability, Some(handle));
        let response = self.client.get(&url).send().await?;
        let response = Self::check(response).await?;
        Self::parse(response, "job snapshot").await
    }

    /// A [`StatusSource`] over the status route of one capability.
    pub fn jobs(&self, capability: Capability) -> RemoteJobs {
        RemoteJobs {
            client: self.clone(),
            capability,
        }
    }

    /// Polls the status route until the job finishes.
    ///
    /// Polls without an attempt ceiling. Use [`KestrelClient::wait_with`] to bound it.
    pub async fn wait<F>(
        &self,
        capability: Capability,
        initial: JobSnapshot,
        on_update: F,
    ) -> Result<JobSnapshot>
    where
        F: FnMut(&JobSnapshot),
    {
        let config = PollConfig::default().with_interval(self.interval);
        self.wait_with(capability, initial, config, on_update).await
    }

    /// Polls the status route with an explicit [`PollConfig`].
    pub async fn wait_with<F>(
        &self,
        capability: Capability,
        initial: JobSnapshot,
        config: PollConfig,
        on_update: F,
    ) -> Result<JobSnapshot>
    where
        F: FnMut(&JobSnapshot),
    {
        let done = JobPoller::new(self.jobs(capability), config)
            .wait(initial, on_update)
            .await?;
        Ok(done)
    }

    /// Submits and lets the server wait for the outcome.
    pub async fn run(&self, capability: Capability, request: &JobRequest) -> Result<JobOutcome> {
        let url = self.url(JOBS_RUN, capability, None);
        let response = self.client.post(&url).json(request).send().await?;
        let response = Self::check(response).await?;
        Self::parse(response, "job outcome").await
    }

    /// Uploads an image file and waits for the cut-out.
    pub async fn remove_background(&self, path: &Path) -> Result<JobOutcome> {
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image")
            .to_string();
        let mime = mime_guess::from_path(path).first_or_octet_stream();

        let part = multipart::Part::bytes(data)
            .file_name(file_name)
            .mime_str(mime.as_ref())?;
        let form = multipart::Form::new().part("image", part);

        let url = format!("{}{}", self.base_url, REMOVE_BACKGROUND);
        let response = self.client.post(&url).multipart(form).send().await?;
        let response = Self::check(response).await?;
        Self::parse(response, "job outcome").await
    }

    /// Downloads an output through the server into `dir`, returning the written path.
    ///
    /// The file is named after the server's `Content-Disposition`.
    pub async fn download(&self, reference: &str, dir: &Path) -> Result<PathBuf> {
        let url = format!("{}{}", self.base_url, DOWNLOAD);
        let response = self
            .client
            .get(&url)
            .query(&[("url", reference)])
            .send()
            .await?;
        let response = Self::check(response).await?;

        let file_name = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(attachment_file_name)
            .unwrap_or_else(|| "download.mp4".to_string());

        let target = dir.join(file_name);
        let bytes = response.bytes().await?;
        tokio::fs::write(&target, &bytes).await?;
        debug!("Downloaded {reference} to {}", target.display());

        Ok(target)
    }

    /// Follows a job over the server's WebSocket until it finishes.
    ///
    /// Returns the final outcome. Dropping the future closes the socket, which stops the
    /// server from polling on our behalf.
    pub async fn attach<F>(
        &self,
        capability: Capability,
        handle: &JobHandle,
        mut on_event: F,
    ) -> Result<JobOutcome>
    where
        F: FnMut(&WatchEvent),
    {
        let url = self.url(JOB_ATTACH, capability, Some(handle));
        let ws_url = if Url::from_str(url.as_str())?.scheme() == "https" {
            url.replacen("https://", "wss://", 1)
        } else {
            url.replacen("http://", "ws://", 1)
        };

        let req = ws_url.into_client_request()?;
        let (stream, res) = tokio_tungstenite::connect_async(req)
            .await
            .map_err(|e| match e {
                tokio_tungstenite::tungstenite::Error::Http(res) => {
                    KestrelClientError::ServerError(res.status(), "Handshake rejected".into())
                }
                _ => KestrelClientError::WebSocket(e),
            })?;

        if res.status() != StatusCode::SWITCHING_PROTOCOLS {
            return Err(KestrelClientError::ServerError(
                res.status(),
                "Upgrade failed".into(),
            ));
        }

        let (mut write, mut read) = stream.split();

        // Pings share the loop with the reader so the socket never outlives this future.
        let mut heartbeat = tokio::time::interval(HEARTBEAT);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if write.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(txt))) => {
                        let event: WatchEvent = match serde_json::from_str(&txt) {
                            Ok(event) => event,
                            Err(e) => {
                                warn!("Failed to deserialize event: {e}");
                                continue;
                            }
                        };
                        on_event(&event);
                        if let WatchEvent::Finished(done) = event {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(done);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        return Err(KestrelClientError::Connection(format!(
                            "Connection error: {e}"
                        )));
                    }
                    Some(Ok(_)) => {}
                },
            }
        }

        Err(KestrelClientError::Connection(
            "Socket closed before the job finished".into(),
        ))
    }
}

/// The status route of one capability, as a [`StatusSource`] for a [`JobPoller`].
#[derive(Clone, Debug)]
pub struct RemoteJobs {
    client: KestrelClient,
    capability: Capability,
}

impl StatusSource for RemoteJobs {
    async fn fetch(&self, handle: &JobHandle) -> std::result::Result<JobSnapshot, JobError> {
        match self.client.status(self.capability, handle).await {
            Err(KestrelClientError::ServerError(StatusCode::NOT_FOUND, _)) => {
                Err(JobError::NotFound(handle.to_string()))
            }
            res => Ok(res?),
        }
    }
}

/// `filename="..."` out of a `Content-Disposition` header.
fn attachment_file_name(disposition: &str) -> Option<String> {
    let name = disposition
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))?
        .trim_matches('"');

    // Only a bare name, never a path.
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty() && *n != "..")
        .map(str::to_string)
}
