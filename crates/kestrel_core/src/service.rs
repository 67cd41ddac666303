use crate::error::JobError;
use crate::job::*;
use crate::output::{JobOutput, OutputShape, normalize};
use crate::poller::JobPoller;
use crate::traits::*;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Submits jobs through their adapters, polls them and normalizes what they produce.
///
/// Constructed once per process from an explicit provider and storage.
#[derive(Clone)]
pub struct JobService<P, St> {
    provider: P,
    storage: St,
    adapters: HashMap<Capability, Arc<dyn SubmissionAdapter>>,
    interval: Option<Duration>,
}

impl<P: InferenceProvider, St: StorageBackend> JobService<P, St> {
    pub fn new(provider: P, storage: St) -> Self {
        Self {
            provider,
            storage,
            adapters: HashMap::new(),
            interval: None,
        }
    }

    /// Registers an adapter, replacing any previous one for the same capability.
    pub fn with_adapter(mut self, adapter: impl SubmissionAdapter) -> Self {
        self.adapters.insert(adapter.capability(), Arc::new(adapter));
        self
    }

    pub fn with_adapters(
        mut self,
        adapters: impl IntoIterator<Item = Arc<dyn SubmissionAdapter>>,
    ) -> Self {
        for adapter in adapters {
            self.adapters.insert(adapter.capability(), adapter);
        }
        self
    }

    /// Overrides the polling interval of every adapter.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn storage(&self) -> &St {
        &self.storage
    }

    pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
        self.adapters.keys().copied()
    }

    pub fn adapter(&self, capability: Capability) -> Result<&dyn SubmissionAdapter, JobError> {
        self.adapters
            .get(&capability)
            .map(|a| a.as_ref())
            .ok_or_else(|| JobError::Unsupported(capability.to_string()))
    }

    /// Validates the request and starts exactly one prediction.
    pub async fn submit(
        &self,
        capability: Capability,
        request: &JobRequest,
    ) -> Result<JobSnapshot, JobError> {
        let adapter = self.adapter(capability)?;
        self.provider.check_config()?;
        let prediction = adapter.prepare(request)?;

        let snapshot = self.provider.create(&prediction).await?;
        info!(
            "Submitted {capability} job {} ({})",
            snapshot.handle, snapshot.status
        );
        Ok(snapshot)
    }

    /// Fetches the current snapshot of a job.
    pub async fn status(&self, handle: &JobHandle) -> Result<JobSnapshot, JobError> {
        self.provider.check_config()?;
        self.provider.fetch(handle).await
    }

    /// A poller configured for the capability's adapter.
    pub fn poller(&self, capability: Capability) -> Result<JobPoller<P>, JobError> {
        let mut config = self.adapter(capability)?.poll_config();
        if let Some(interval) = self.interval {
            config.interval = interval;
        }
        Ok(JobPoller::new(self.provider.clone(), config))
    }

    /// Turns a terminal snapshot into an outcome, persisting streamed output if needed.
    pub async fn finalize(&self, capability: Capability, snapshot: &JobSnapshot) -> JobOutcome {
        match snapshot.status {
            JobStatus::Succeeded => match self.normalize(capability, snapshot).await {
                Ok(output) => JobOutcome::Succeeded { output },
                Err(e) => {
                    warn!("Job {} succeeded but its output is unusable: {e}", snapshot.handle);
                    JobOutcome::failed(e)
                }
            },
            JobStatus::Failed => JobOutcome::failed(
                snapshot
                    .error
                    .as_deref()
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or("Prediction failed"),
            ),
            status => JobOutcome::failed(format!(
                "Job {} has not finished yet ({status})",
                snapshot.handle
            )),
        }
    }

    /// Submits, polls to a terminal state and normalizes the output in one call.
    ///
    /// Errors before the job exists are returned as `Err`; anything after becomes a failed outcome.
    pub async fn run(
        &self,
        capability: Capability,
        request: &JobRequest,
    ) -> Result<JobOutcome, JobError> {
        let initial = self.submit(capability, request).await?;
        let poller = self.poller(capability)?;

        let outcome = match poller.wait(initial, |_| {}).await {
            Ok(done) => self.finalize(capability, &done).await,
            Err(e) => JobOutcome::failed(e),
        };

        Ok(outcome)
    }

    /// Resolves the raw output into a [`JobOutput`] following the adapter's policy.
    pub async fn resolve_output(
        &self,
        capability: Capability,
        snapshot: &JobSnapshot,
    ) -> Result<JobOutput, JobError> {
        let policy = self.adapter(capability)?.output_policy();

        match OutputShape::classify(snapshot.output.as_ref())? {
            OutputShape::Url(url) if policy.persist => {
                let stream = self.provider.open_stream(&url).await?;
                Ok(JobOutput::Stream {
                    stream,
                    extension: policy.extension,
                })
            }
            OutputShape::Url(url) => Ok(JobOutput::Inline(url)),
            OutputShape::DataUri(uri) => JobOutput::from_data_uri(&uri, &policy.extension),
            OutputShape::Empty => Ok(JobOutput::Empty),
        }
    }

    async fn normalize(
        &self,
        capability: Capability,
        snapshot: &JobSnapshot,
    ) -> Result<Option<OutputReference>, JobError> {
        let policy = self.adapter(capability)?.output_policy();
        let output = self.resolve_output(capability, snapshot).await?;
        normalize(&self.storage, output, &policy).await
    }
}
