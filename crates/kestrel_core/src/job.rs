use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::JobError;

/// What the caller wants generated. Immutable once submitted.
///
/// The field aliases accept the payloads the web forms send.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct JobRequest {
    /// Text prompt (image description, motion or sound prompt).
    #[serde(default, alias = "motion_prompt", skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Model identifier. Checked against the adapter's allow-list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Input media as a `data:` URI or a URL.
    #[serde(
        default,
        alias = "first_frame_image",
        alias = "videoFile",
        alias = "image",
        skip_serializing_if = "Option::is_none"
    )]
    pub media: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl JobRequest {
    /// The prompt, if it has any non-whitespace content.
    pub fn prompt(&self) -> Option<&str> {
        non_blank(self.prompt.as_deref())
    }

    /// The media payload, if present and non-blank.
    pub fn media(&self) -> Option<&str> {
        non_blank(self.media.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// The kind of work a [`SubmissionAdapter`](crate::traits::SubmissionAdapter) knows how to submit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Capability {
    #[serde(rename = "generate-image")]
    ImageGeneration,
    #[serde(rename = "live2d")]
    Animation,
    #[serde(rename = "soundtovideo")]
    SoundToVideo,
    #[serde(rename = "remove-background")]
    BackgroundRemoval,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::ImageGeneration,
        Capability::Animation,
        Capability::SoundToVideo,
        Capability::BackgroundRemoval,
    ];

    /// The path segment used on the HTTP surface.
    pub fn slug(&self) -> &'static str {
        match self {
            Capability::ImageGeneration => "generate-image",
            Capability::Animation => "live2d",
            Capability::SoundToVideo => "soundtovideo",
            Capability::BackgroundRemoval => "remove-background",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Capability {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|c| c.slug() == s)
            .ok_or_else(|| JobError::Unsupported(s.to_string()))
    }
}

/// A model on the provider, by name, by version, or both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    /// `owner/name`
    pub name: Option<String>,
    /// Version id (64 hex characters on Replicate).
    pub version: Option<String>,
}

impl FromStr for ModelRef {
    type Err = JobError;

    /// Accepts `owner/name`, `owner/name:version` or a bare version id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || JobError::Validation(format!("Invalid model identifier '{s}'"));
        let s = s.trim();

        if let Some((name, version)) = s.split_once(':') {
            if !is_model_name(name) || version.is_empty() {
                return Err(invalid());
            }
            return Ok(ModelRef {
                name: Some(name.to_string()),
                version: Some(version.to_string()),
            });
        }

        if is_model_name(s) {
            return Ok(ModelRef {
                name: Some(s.to_string()),
                version: None,
            });
        }

        if !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(ModelRef {
                name: None,
                version: Some(s.to_string()),
            });
        }

        Err(invalid())
    }
}

fn is_model_name(s: &str) -> bool {
    matches!(s.split_once('/'), Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/'))
}

/// The provider-shaped payload an adapter produces from a [`JobRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRequest {
    pub model: ModelRef,
    pub input: Value,
}

/// Opaque identifier the provider returns on submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobHandle {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Lifecycle of a remote job. Only moves forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Starting,
    Processing,
    Succeeded,
    #[serde(alias = "canceled", alias = "cancelled", alias = "aborted")]
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Position in the lifecycle. Both terminal states share the last rank.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Starting => 0,
            JobStatus::Processing => 1,
            JobStatus::Succeeded | JobStatus::Failed => 2,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Starting => "starting",
            JobStatus::Processing => "processing",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The state of a job at one point in time, as reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSnapshot {
    #[serde(rename = "id")]
    pub handle: JobHandle,
    pub status: JobStatus,
    /// Raw output. May hold partial results while `processing`; only read once terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobSnapshot {
    pub fn new(handle: impl Into<JobHandle>, status: JobStatus) -> Self {
        Self {
            handle: handle.into(),
            status,
            output: None,
            error: None,
            logs: None,
            created_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Drops partial output so callers never render an unfinished result.
    pub fn without_partial_output(mut self) -> Self {
        if !self.is_terminal() {
            self.output = None;
        }
        self
    }

    /// Replaces the raw output with the normalized outcome of the job.
    pub fn with_outcome(mut self, outcome: &JobOutcome) -> Self {
        match outcome {
            JobOutcome::Succeeded { output } => {
                self.status = JobStatus::Succeeded;
                self.output = output.as_ref().map(|o| Value::String(o.to_string()));
                self.error = None;
            }
            JobOutcome::Failed { error } => {
                self.status = JobStatus::Failed;
                self.output = None;
                self.error = Some(error.clone());
            }
        }
        self
    }
}

impl From<String> for JobHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A stable pointer to a job's result, usable as a media `src` or download target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct OutputReference(String);

impl OutputReference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OutputReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a job ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobOutcome {
    Succeeded {
        #[serde(default)]
        output: Option<OutputReference>,
    },
    Failed {
        error: String,
    },
}

impl JobOutcome {
    pub fn failed(error: impl fmt::Display) -> Self {
        JobOutcome::Failed {
            error: error.to_string(),
        }
    }

    pub fn output(&self) -> Option<&OutputReference> {
        match self {
            JobOutcome::Succeeded { output } => output.as_ref(),
            JobOutcome::Failed { .. } => None,
        }
    }
}

/// Message sent to attached watchers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum WatchEvent {
    Status(JobSnapshot),
    Finished(JobOutcome),
}
