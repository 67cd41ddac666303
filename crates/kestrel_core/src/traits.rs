use crate::error::*;
use crate::job::*;
use crate::output::{ByteStream, OutputPolicy};
use crate::poller::PollConfig;

use bytes::Bytes;
use chrono::Utc;

/// Anything that can report the current state of a job.
pub trait StatusSource: Send + Sync + 'static + Clone {
    /// Fetches the latest snapshot of a job. One network call per invocation.
    fn fetch(&self, handle: &JobHandle)
    -> impl Future<Output = Result<JobSnapshot, JobError>> + Send;
}

/// A trait for injecting a remote prediction service into the [`JobService`](crate::service::JobService).
pub trait InferenceProvider: StatusSource {
    /// Fails fast when the provider cannot be used at all (e.g., missing credentials).
    ///
    /// Called before every submission, never touches the network.
    fn check_config(&self) -> Result<(), JobError> {
        Ok(())
    }

    /// Starts a prediction. Returns the handle and initial status.
    fn create(
        &self,
        request: &PredictionRequest,
    ) -> impl Future<Output = Result<JobSnapshot, JobError>> + Send;

    /// Opens the bytes behind an output URL.
    fn open_stream(&self, url: &str) -> impl Future<Output = Result<ByteStream, JobError>> + Send;
}

/// A trait for injecting output storage into the server.
pub trait StorageBackend: Send + Sync + 'static + Clone {
    /// Persists a finished output and returns a stable reference to it.
    fn write_output(
        &self,
        name: &str,
        data: Bytes,
    ) -> impl Future<Output = Result<OutputReference, StorageError>> + Send;

    /// Reads a stored output by name.
    fn read_file(&self, name: &str) -> impl Future<Output = Result<Bytes, StorageError>> + Send;

    /// Maps a reference handed out by [`write_output`](Self::write_output) back to its name.
    ///
    /// [`None`] if the reference does not point into this storage.
    fn local_name<'a>(&self, reference: &'a str) -> Option<&'a str>;

    /// Returns a unique file name for a new output.
    fn output_name(&self, prefix: &str, extension: &str) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "{prefix}-{}-{}.{extension}",
            Utc::now().timestamp_millis(),
            &id[..8]
        )
    }
}

/// Translates a [`JobRequest`] into the shape one provider model expects.
///
/// Adapters are plain descriptions: they never perform I/O themselves.
pub trait SubmissionAdapter: Send + Sync + 'static {
    fn capability(&self) -> Capability;

    /// Model identifiers this adapter accepts.
    fn models(&self) -> &[&'static str];

    /// The model used when the request names none. [`None`] makes the model mandatory.
    fn default_model(&self) -> Option<&'static str> {
        None
    }

    /// Checks the request fields. Runs before anything is sent.
    fn validate(&self, request: &JobRequest) -> Result<(), JobError>;

    /// Builds the provider input from a validated request.
    fn input(&self, request: &JobRequest) -> serde_json::Value;

    fn poll_config(&self) -> PollConfig {
        PollConfig::default()
    }

    fn output_policy(&self) -> OutputPolicy;

    /// Validates the request, resolves the model against the allow-list and builds the prediction.
    fn prepare(&self, request: &JobRequest) -> Result<PredictionRequest, JobError> {
        self.validate(request)?;

        let model = match request.model.as_deref().map(str::trim) {
            Some(model) if !model.is_empty() => model,
            _ => self
                .default_model()
                .ok_or_else(|| JobError::Validation("Invalid model selected".into()))?,
        };

        if !self.models().contains(&model) {
            return Err(JobError::Validation("Invalid model selected".into()));
        }

        Ok(PredictionRequest {
            model: model.parse()?,
            input: self.input(request),
        })
    }
}
