//! # Kestrel Server
//!
//! An Axum-based front end for generative media jobs.
//!
//! Provides the [`KestrelServer`] builder, which serves a [`JobService`](kestrel_core::service::JobService)
//! over HTTP.
//!
//! ## Routes
//!
//! * **`POST /api/jobs/{capability}`**: submit a job, answers with the first snapshot.
//! * **`GET /api/jobs/{capability}/{id}`**: current snapshot, with the normalized output once finished.
//! * **`GET /api/jobs/{capability}/{id}/attach`**: WebSocket of status events until the job ends.
//! * **`POST /api/jobs/{capability}/run`**: submit and wait for the outcome.
//! * **`POST /api/remove-background`**: multipart upload of an `image`, waits for the cut-out.
//! * **`GET /api/download?url=`**: an output as an attachment.
//! * **`GET /tmp/{name}`**: persisted outputs.
//!
//! Validation failures answer `400 {"error": ...}`, unknown jobs and capabilities `404`, and
//! configuration or provider failures `500 {"detail": ...}`.
//!
//! ## Example
//!
//! ```no_run
//! use kestrel_core::prelude::*;
//! use kestrel_fs::FileSystemStorage;
//! use kestrel_replicate::{ReplicateClient, ReplicateConfig, adapters};
//! use kestrel_server::prelude::*;
//!
//! # fn run() -> Result<(), JobError> {
//! let provider = ReplicateClient::new(ReplicateConfig::default())?;
//! let storage = FileSystemStorage::new("./public/tmp");
//! let jobs = JobService::new(provider, storage).with_adapters(adapters::all());
//!
//! let app = KestrelServer::default().build(jobs);
//! # Ok(())
//! # }
//! ```

mod api;

pub mod state;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use kestrel_core::prelude::*;
use state::AppState;
use tower_http::trace::TraceLayer;

/// The builder for the Kestrel Server.
#[derive(Clone, Debug, Default)]
pub struct KestrelServer {
    config: KestrelServerConfig,
}

impl KestrelServer {
    pub fn new(config: KestrelServerConfig) -> Self {
        Self { config }
    }
}

#[derive(Clone, Debug, Default)]
pub struct KestrelServerConfig {
    /// Largest accepted request body. Media travels inline, so [`None`] disables the limit.
    pub body_limit: Option<usize>,
    /// Finished outcomes kept in memory. [`None`] uses [`DEFAULT_OUTCOME_CAPACITY`](state::DEFAULT_OUTCOME_CAPACITY).
    pub outcome_capacity: Option<usize>,
}

impl KestrelServer {
    pub fn build<P: InferenceProvider, St: StorageBackend>(self, jobs: JobService<P, St>) -> Router {
        let KestrelServerConfig {
            body_limit,
            outcome_capacity,
        } = self.config;
        let state = AppState::with_outcome_capacity(
            jobs,
            outcome_capacity.unwrap_or(state::DEFAULT_OUTCOME_CAPACITY),
        );

        let body_limit = match body_limit {
            Some(limit) => DefaultBodyLimit::max(limit),
            None => DefaultBodyLimit::disable(),
        };

        Router::new()
            .route(routes::HEALTH, get(|| async { "OK" }))
            .route(routes::JOBS, post(api::submit))
            .route(routes::JOBS_RUN, post(api::run))
            .route(routes::JOB_BY_ID, get(api::status))
            .route(routes::JOB_ATTACH, get(api::attach))
            .route(routes::REMOVE_BACKGROUND, post(api::remove_background))
            .route(routes::DOWNLOAD, get(api::download))
            .route(routes::OUTPUT_BY_NAME, get(api::get_output))
            .layer(body_limit)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

pub mod prelude {
    pub use crate::state::*;
    pub use crate::{KestrelServer, KestrelServerConfig};
}
