use crate::error::JobError;
use crate::job::{JobHandle, JobSnapshot};
use crate::traits::StatusSource;

use futures::stream::{self, BoxStream, StreamExt};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// Bounded exponential backoff for transport failures while fetching a status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Wait between two fetches.
    ///
    /// Defaults to 1 second.
    pub interval: Duration,
    /// Give up with [`JobError::Timeout`] after this many fetches.
    ///
    /// [`None`] polls until the job reaches a terminal state.
    pub max_attempts: Option<u32>,
    /// Retry transport failures. [`None`] treats every fetch error as fatal.
    pub retry: Option<RetryPolicy>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_attempts: None,
            retry: None,
        }
    }
}

impl PollConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// Drives a single job from its initial snapshot to a terminal one.
#[derive(Clone)]
pub struct JobPoller<S> {
    source: S,
    config: PollConfig,
}

struct PollState<S> {
    source: S,
    config: PollConfig,
    current: JobSnapshot,
    attempts: u32,
    started: bool,
    finished: bool,
}

impl<S: StatusSource> JobPoller<S> {
    pub fn new(source: S, config: PollConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Streams every accepted snapshot, starting with `initial`.
    ///
    /// The stream ends after the first terminal snapshot, after a fetch error or after the
    /// attempt ceiling; the last two are yielded as `Err`. Nothing is fetched unless the stream
    /// is polled, and dropping it stops the loop.
    pub fn watch(&self, initial: JobSnapshot) -> BoxStream<'static, Result<JobSnapshot, JobError>> {
        let state = PollState {
            source: self.source.clone(),
            config: self.config.clone(),
            current: initial,
            attempts: 0,
            started: false,
            finished: false,
        };

        stream::unfold(state, |mut state| async move {
            if state.finished {
                return None;
            }

            if !state.started {
                state.started = true;
                state.finished = state.current.is_terminal();
                return Some((Ok(state.current.clone()), state));
            }

            loop {
                if matches!(state.config.max_attempts, Some(max) if state.attempts >= max) {
                    warn!(
                        "Job {} still {} after {} attempts, giving up",
                        state.current.handle, state.current.status, state.attempts
                    );
                    state.finished = true;
                    return Some((Err(JobError::Timeout), state));
                }

                tokio::time::sleep(state.config.interval).await;
                state.attempts += 1;

                let fetched = fetch_with_retry(
                    &state.source,
                    &state.current.handle,
                    state.config.retry.as_ref(),
                )
                .await;

                match fetched {
                    Ok(snapshot) => {
                        if snapshot.status.rank() < state.current.status.rank() {
                            warn!(
                                "Job {} went back from {} to {}, ignoring",
                                snapshot.handle, state.current.status, snapshot.status
                            );
                            continue;
                        }

                        debug!(
                            "Job {} is {} (attempt {})",
                            snapshot.handle, snapshot.status, state.attempts
                        );
                        state.finished = snapshot.is_terminal();
                        state.current = snapshot;
                        return Some((Ok(state.current.clone()), state));
                    }
                    Err(e) => {
                        warn!("Polling job {} failed: {e}", state.current.handle);
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                }
            }
        })
        .boxed()
    }

    /// Polls until the job is terminal, reporting every snapshot to `on_update`.
    pub async fn wait<F>(&self, initial: JobSnapshot, mut on_update: F) -> Result<JobSnapshot, JobError>
    where
        F: FnMut(&JobSnapshot),
    {
        let mut updates = self.watch(initial);
        let mut last = None;

        while let Some(update) = updates.next().await {
            let snapshot = update?;
            on_update(&snapshot);
            last = Some(snapshot);
        }

        // The stream only ends cleanly on a terminal snapshot.
        last.filter(JobSnapshot::is_terminal)
            .ok_or(JobError::Timeout)
    }
}

async fn fetch_with_retry<S: StatusSource>(
    source: &S,
    handle: &JobHandle,
    retry: Option<&RetryPolicy>,
) -> Result<JobSnapshot, JobError> {
    let Some(policy) = retry else {
        return source.fetch(handle).await;
    };

    let mut retries = 0;
    let mut backoff = policy.initial_backoff;

    loop {
        match source.fetch(handle).await {
            Err(e) if e.is_transient() && retries < policy.max_retries => {
                retries += 1;
                warn!(
                    "Fetching job {handle} failed ({e}), retry {retries}/{} in {backoff:?}",
                    policy.max_retries
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
            result => return result,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::job::JobStatus;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays a fixed list of fetch results and counts the calls.
    #[derive(Clone, Default)]
    pub(crate) struct ScriptedSource {
        script: Arc<Mutex<VecDeque<Result<JobSnapshot, JobError>>>>,
        pub calls: Arc<Mutex<u32>>,
    }

    impl ScriptedSource {
        pub(crate) fn new(script: Vec<Result<JobSnapshot, JobError>>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into())),
                calls: Arc::default(),
            }
        }

        pub(crate) fn statuses(statuses: &[JobStatus]) -> Self {
            Self::new(
                statuses
                    .iter()
                    .map(|s| Ok(JobSnapshot::new("job-1", *s)))
                    .collect(),
            )
        }

        pub(crate) fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl StatusSource for ScriptedSource {
        async fn fetch(&self, _handle: &JobHandle) -> Result<JobSnapshot, JobError> {
            *self.calls.lock().unwrap() += 1;
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(JobSnapshot::new("job-1", JobStatus::Processing)))
        }
    }

    fn starting() -> JobSnapshot {
        JobSnapshot::new("job-1", JobStatus::Starting)
    }

    async fn collect(
        poller: &JobPoller<ScriptedSource>,
        initial: JobSnapshot,
    ) -> Vec<Result<JobStatus, JobError>> {
        poller
            .watch(initial)
            .map(|r| r.map(|s| s.status))
            .collect()
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn reaches_success_once_and_in_order() {
        let source = ScriptedSource::statuses(&[
            JobStatus::Processing,
            JobStatus::Processing,
            JobStatus::Succeeded,
        ]);
        let poller = JobPoller::new(source.clone(), PollConfig::default());

        let events = collect(&poller, starting()).await;

        assert_eq!(
            events,
            vec![
                Ok(JobStatus::Starting),
                Ok(JobStatus::Processing),
                Ok(JobStatus::Processing),
                Ok(JobStatus::Succeeded),
            ]
        );
        assert_eq!(source.calls(), 3);

        let ranks: Vec<u8> = events.iter().map(|e| e.as_ref().unwrap().rank()).collect();
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_initial_snapshot_never_fetches() {
        let source = ScriptedSource::default();
        let poller = JobPoller::new(source.clone(), PollConfig::default());

        let done = JobSnapshot::new("job-1", JobStatus::Failed).with_error("NSFW content detected");
        let result = poller.wait(done, |_| {}).await.unwrap();

        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn no_fetch_after_terminal_status() {
        let source = ScriptedSource::statuses(&[JobStatus::Failed, JobStatus::Processing]);
        let poller = JobPoller::new(source.clone(), PollConfig::default());

        let events = collect(&poller, starting()).await;
        tokio::time::sleep(DEFAULT_INTERVAL * 10).await;

        assert_eq!(events.last(), Some(&Ok(JobStatus::Failed)));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_ceiling_yields_single_timeout() {
        let source = ScriptedSource::default();
        let poller = JobPoller::new(source.clone(), PollConfig::default().with_max_attempts(20));

        let events = collect(&poller, starting()).await;

        assert_eq!(source.calls(), 20);
        assert_eq!(events.len(), 22);
        assert_eq!(events.last(), Some(&Err(JobError::Timeout)));
        assert_eq!(events.iter().filter(|e| e.is_err()).count(), 1);
        assert_eq!(JobError::Timeout.to_string(), "timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn polls_at_the_configured_interval() {
        let source = ScriptedSource::statuses(&[JobStatus::Processing, JobStatus::Succeeded]);
        let poller = JobPoller::new(source, PollConfig::default());

        let start = tokio::time::Instant::now();
        poller.wait(starting(), |_| {}).await.unwrap();

        assert_eq!(start.elapsed(), DEFAULT_INTERVAL * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn provider_error_stops_polling() {
        let source = ScriptedSource::new(vec![
            Ok(JobSnapshot::new("job-1", JobStatus::Processing)),
            Err(JobError::Provider("502 Bad Gateway".into())),
            Ok(JobSnapshot::new("job-1", JobStatus::Succeeded)),
        ]);
        // Retries are on, but a non-2xx answer is never retried.
        let poller = JobPoller::new(
            source.clone(),
            PollConfig::default().with_retry(RetryPolicy::default()),
        );

        let events = collect(&poller, starting()).await;

        assert_eq!(
            events.last(),
            Some(&Err(JobError::Provider("502 Bad Gateway".into())))
        );
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn network_errors_are_fatal_without_retry_policy() {
        let source = ScriptedSource::new(vec![Err(JobError::Network("connection refused".into()))]);
        let poller = JobPoller::new(source.clone(), PollConfig::default());

        let err = poller.wait(starting(), |_| {}).await.unwrap_err();

        assert!(matches!(err, JobError::Network(_)));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn network_errors_retry_with_backoff() {
        let source = ScriptedSource::new(vec![
            Err(JobError::Network("connection reset".into())),
            Err(JobError::Network("connection reset".into())),
            Ok(JobSnapshot::new("job-1", JobStatus::Succeeded)),
        ]);
        let retry = RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(150),
        };
        let poller = JobPoller::new(
            source.clone(),
            PollConfig::default().with_max_attempts(1).with_retry(retry),
        );

        let start = tokio::time::Instant::now();
        let done = poller.wait(starting(), |_| {}).await.unwrap();

        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(source.calls(), 3);
        // One interval, then 100ms and 150ms (capped) of backoff.
        assert_eq!(
            start.elapsed(),
            DEFAULT_INTERVAL + Duration::from_millis(250)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let source = ScriptedSource::new(vec![
            Err(JobError::Network("timed out".into())),
            Err(JobError::Network("timed out".into())),
            Err(JobError::Network("timed out".into())),
        ]);
        let retry = RetryPolicy {
            max_retries: 2,
            ..Default::default()
        };
        let poller = JobPoller::new(source.clone(), PollConfig::default().with_retry(retry));

        let err = poller.wait(starting(), |_| {}).await.unwrap_err();

        assert!(matches!(err, JobError::Network(_)));
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn regressions_are_not_reported() {
        let source = ScriptedSource::statuses(&[
            JobStatus::Processing,
            JobStatus::Starting,
            JobStatus::Succeeded,
        ]);
        let poller = JobPoller::new(source.clone(), PollConfig::default());

        let events = collect(&poller, starting()).await;

        assert_eq!(
            events,
            vec![
                Ok(JobStatus::Starting),
                Ok(JobStatus::Processing),
                Ok(JobStatus::Succeeded),
            ]
        );
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_stream_stops_fetching() {
        let source = ScriptedSource::default();
        let poller = JobPoller::new(source.clone(), PollConfig::default());

        let mut updates = poller.watch(starting());
        updates.next().await;
        updates.next().await;
        updates.next().await;
        drop(updates);

        tokio::time::sleep(DEFAULT_INTERVAL * 10).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_reports_every_update() {
        let source = ScriptedSource::statuses(&[JobStatus::Processing, JobStatus::Succeeded]);
        let poller = JobPoller::new(source, PollConfig::default());

        let mut seen = Vec::new();
        let done = poller
            .wait(starting(), |s| seen.push(s.status))
            .await
            .unwrap();

        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(
            seen,
            vec![JobStatus::Starting, JobStatus::Processing, JobStatus::Succeeded]
        );
    }
}
