use kestrel_core::prelude::*;

use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.replicate.com/v1";

#[derive(Clone, Debug)]
pub struct ReplicateConfig {
    /// API root, without a trailing slash.
    ///
    /// Defaults to [`DEFAULT_BASE_URL`].
    pub base_url: String,
    /// Bearer token. Submissions fail with a configuration error while it is missing.
    pub api_token: Option<String>,
    /// Per-request timeout. [`None`] leaves it to the network layer.
    pub request_timeout: Option<Duration>,
}

impl Default for ReplicateConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_token: None,
            request_timeout: None,
        }
    }
}

/// Client for the Replicate predictions API.
///
/// Build one per process and hand it to the [`JobService`].
#[derive(Clone, Debug)]
pub struct ReplicateClient {
    base_url: String,
    token: Option<String>,
    client: Client,
}

#[derive(Serialize)]
struct CreatePrediction<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a str>,
    input: &'a Value,
}

impl ReplicateClient {
    pub fn new(config: ReplicateConfig) -> Result<Self, JobError> {
        let mut builder = Client::builder().user_agent(concat!("kestrel/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|e| JobError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.api_token.filter(|t| !t.trim().is_empty()),
            client,
        })
    }

    fn token(&self) -> Result<&str, JobError> {
        self.token
            .as_deref()
            .ok_or_else(|| JobError::Configuration(format!("{} is not set", env::API_KEY)))
    }

    fn auth_request(&self, builder: RequestBuilder) -> Result<RequestBuilder, JobError> {
        Ok(builder.bearer_auth(self.token()?))
    }

    async fn send(builder: RequestBuilder) -> Result<Response, JobError> {
        let response = builder
            .send()
            .await
            .map_err(|e| JobError::Network(e.to_string()))?;

        Self::check_status(response).await
    }

    async fn check_status(response: Response) -> Result<Response, JobError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Err(JobError::Provider(format!("{status}: {}", error_detail(&text))))
    }

    async fn read_snapshot(response: Response) -> Result<JobSnapshot, JobError> {
        response
            .json::<JobSnapshot>()
            .await
            .map_err(|e| JobError::Provider(format!("Malformed prediction: {e}")))
    }
}

/// Whether `url` points below the API root, compared by origin and path segments.
fn served_by_api(base_url: &str, url: &str) -> bool {
    let (Ok(base), Ok(target)) = (Url::parse(base_url), Url::parse(url)) else {
        return false;
    };
    if base.origin() != target.origin() {
        return false;
    }

    let root = base.path().trim_end_matches('/');
    let path = target.path();
    path == root || path.starts_with(&format!("{root}/"))
}

/// Pulls the human readable part out of an error body.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["detail", "error", "title"]
                .iter()
                .find_map(|key| v.get(key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

impl StatusSource for ReplicateClient {
    async fn fetch(&self, handle: &JobHandle) -> Result<JobSnapshot, JobError> {
        let url = format!("{}/predictions/{}", self.base_url, handle);
        let request = self.auth_request(self.client.get(&url))?;

        let response = request
            .send()
            .await
            .map_err(|e| JobError::Network(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(JobError::NotFound(handle.to_string()));
        }

        let response = Self::check_status(response).await?;
        Self::read_snapshot(response).await
    }
}

impl InferenceProvider for ReplicateClient {
    fn check_config(&self) -> Result<(), JobError> {
        self.token().map(|_| ())
    }

    async fn create(&self, request: &PredictionRequest) -> Result<JobSnapshot, JobError> {
        let (url, version) = match (&request.model.version, &request.model.name) {
            (Some(version), _) => (format!("{}/predictions", self.base_url), Some(version.as_str())),
            (None, Some(name)) => (format!("{}/models/{name}/predictions", self.base_url), None),
            (None, None) => {
                return Err(JobError::Validation("Invalid model selected".into()));
            }
        };

        debug!("Creating prediction at {url}");
        let body = CreatePrediction {
            version,
            input: &request.input,
        };
        let builder = self.auth_request(self.client.post(&url))?.json(&body);
        let response = Self::send(builder).await?;
        Self::read_snapshot(response).await
    }

    async fn open_stream(&self, url: &str) -> Result<ByteStream, JobError> {
        let mut builder = self.client.get(url);
        // Files served by the API itself need the token, delivery URLs are public.
        if served_by_api(&self.base_url, url) {
            builder = self.auth_request(builder)?;
        }

        let response = Self::send(builder).await?;
        Ok(response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed())
    }
}
