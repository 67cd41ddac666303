use kestrel_core::prelude::*;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

/// How many finished outcomes are remembered by default.
pub const DEFAULT_OUTCOME_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct AppState<P, St> {
    pub jobs: Arc<JobService<P, St>>,
    /// Outcomes of finished jobs, so a streamed output is persisted once per job.
    pub outcomes: Arc<Mutex<OutcomeCache>>,
    /// Used to proxy downloads of remote outputs.
    pub http: reqwest::Client,
}

impl<P: InferenceProvider, St: StorageBackend> AppState<P, St> {
    pub fn new(jobs: JobService<P, St>) -> Self {
        Self::with_outcome_capacity(jobs, DEFAULT_OUTCOME_CAPACITY)
    }

    pub fn with_outcome_capacity(jobs: JobService<P, St>, capacity: usize) -> Self {
        Self {
            jobs: Arc::new(jobs),
            outcomes: Arc::new(Mutex::new(OutcomeCache::new(capacity))),
            http: reqwest::Client::new(),
        }
    }

    pub fn storage(&self) -> &St {
        self.jobs.storage()
    }

    /// The outcome of a terminal snapshot, finalized on first use.
    pub async fn outcome(&self, capability: Capability, snapshot: &JobSnapshot) -> JobOutcome {
        let key = (capability, snapshot.handle.clone());
        if let Some(outcome) = self.lock().get(&key) {
            return outcome;
        }

        let outcome = self.jobs.finalize(capability, snapshot).await;
        self.lock().insert(key, outcome.clone());
        outcome
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OutcomeCache> {
        self.outcomes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Finished outcomes by capability and handle, dropping the oldest past `capacity`.
#[derive(Debug, Default)]
pub struct OutcomeCache {
    capacity: usize,
    entries: HashMap<(Capability, JobHandle), JobOutcome>,
    order: VecDeque<(Capability, JobHandle)>,
}

impl OutcomeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    pub fn get(&self, key: &(Capability, JobHandle)) -> Option<JobOutcome> {
        self.entries.get(key).cloned()
    }

    pub fn insert(&mut self, key: (Capability, JobHandle), outcome: JobOutcome) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(key.clone(), outcome).is_some() {
            return;
        }

        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
