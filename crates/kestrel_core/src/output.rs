use crate::error::*;
use crate::job::OutputReference;
use crate::media::DataUri;
use crate::traits::StorageBackend;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::Value;
use std::fmt;
use tracing::info;

/// Raw bytes of an output that still has to be drained.
pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// What to do when a job succeeds without any output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyOutputPolicy {
    /// Report the job as failed with `unexpected output format`.
    #[default]
    Fail,
    /// Report success without an output reference.
    Allow,
}

/// How an adapter wants its outputs handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPolicy {
    /// Copy URL outputs into storage instead of handing out the provider URL.
    pub persist: bool,
    pub on_empty: EmptyOutputPolicy,
    /// File name prefix for persisted outputs.
    pub file_prefix: String,
    /// File extension for persisted outputs when the output does not say otherwise.
    pub extension: String,
}

impl OutputPolicy {
    pub fn inline(file_prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            persist: false,
            on_empty: EmptyOutputPolicy::Fail,
            file_prefix: file_prefix.into(),
            extension: extension.into(),
        }
    }

    pub fn persisted(file_prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            persist: true,
            ..Self::inline(file_prefix, extension)
        }
    }

    pub fn allow_empty(mut self) -> Self {
        self.on_empty = EmptyOutputPolicy::Allow;
        self
    }
}

/// The raw provider output, classified once.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputShape {
    Url(String),
    DataUri(String),
    Empty,
}

impl OutputShape {
    /// Arrays resolve to their first element. Anything that is not a URL, a `data:` URI or
    /// empty is an [`UnexpectedOutput`](JobError::UnexpectedOutput).
    pub fn classify(output: Option<&Value>) -> Result<Self, JobError> {
        match output {
            None | Some(Value::Null) => Ok(OutputShape::Empty),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(OutputShape::Empty),
            Some(Value::String(s)) if s.starts_with("http://") || s.starts_with("https://") => {
                Ok(OutputShape::Url(s.clone()))
            }
            Some(Value::String(s)) if s.starts_with("data:") => Ok(OutputShape::DataUri(s.clone())),
            Some(Value::Array(items)) => OutputShape::classify(items.first()),
            Some(_) => Err(JobError::UnexpectedOutput),
        }
    }
}

/// A finished job's output, as decided at the adapter boundary.
pub enum JobOutput {
    /// Already usable as-is.
    Inline(String),
    /// Must be drained and persisted before it can be referenced.
    Stream {
        stream: ByteStream,
        extension: String,
    },
    Empty,
}

impl fmt::Debug for JobOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutput::Inline(url) => f.debug_tuple("Inline").field(url).finish(),
            JobOutput::Stream { extension, .. } => f
                .debug_struct("Stream")
                .field("extension", extension)
                .finish_non_exhaustive(),
            JobOutput::Empty => f.write_str("Empty"),
        }
    }
}

impl JobOutput {
    /// Wraps a decoded `data:` URI as a single-chunk stream.
    pub fn from_data_uri(uri: &str, fallback_extension: &str) -> Result<Self, JobError> {
        let decoded = DataUri::parse(uri).map_err(|_| JobError::UnexpectedOutput)?;
        let extension = decoded.extension().unwrap_or(fallback_extension).to_string();
        Ok(JobOutput::Stream {
            stream: stream::once(async move { Ok(decoded.data) }).boxed(),
            extension,
        })
    }
}

/// Reads a byte stream to the end.
pub async fn drain(stream: ByteStream) -> Result<Bytes, JobError> {
    stream
        .try_fold(BytesMut::new(), |mut buf, chunk| async move {
            buf.extend_from_slice(&chunk);
            Ok(buf)
        })
        .await
        .map(BytesMut::freeze)
        .map_err(|e| JobError::Io(e.to_string()))
}

/// Turns a [`JobOutput`] into a stable reference, persisting streamed bytes on the way.
pub async fn normalize<St: StorageBackend>(
    storage: &St,
    output: JobOutput,
    policy: &OutputPolicy,
) -> Result<Option<OutputReference>, JobError> {
    match output {
        JobOutput::Inline(url) => Ok(Some(OutputReference::new(url))),
        JobOutput::Stream { stream, extension } => {
            let data = drain(stream).await?;
            let name = storage.output_name(&policy.file_prefix, &extension);
            let size = data.len();
            let reference = storage.write_output(&name, data).await?;
            info!("Persisted {size} bytes to {reference}");
            Ok(Some(reference))
        }
        JobOutput::Empty => match policy.on_empty {
            EmptyOutputPolicy::Fail => Err(JobError::UnexpectedOutput),
            EmptyOutputPolicy::Allow => Ok(None),
        },
    }
}
