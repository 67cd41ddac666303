//! # Kestrel Replicate
//!
//! A [Replicate](https://replicate.com) backed [`InferenceProvider`](kestrel_core::traits::InferenceProvider)
//! and the [`SubmissionAdapter`](kestrel_core::traits::SubmissionAdapter)s for the supported models.
//!
//! ## Usage
//!
//! ```no_run
//! use kestrel_core::prelude::*;
//! use kestrel_replicate::{ReplicateClient, ReplicateConfig, adapters};
//!
//! # async fn run() -> Result<(), JobError> {
//! let client = ReplicateClient::new(ReplicateConfig {
//!     api_token: Some("r8_...".into()),
//!     ..Default::default()
//! })?;
//!
//! let prediction = adapters::ImageGeneration.prepare(&JobRequest {
//!     prompt: Some("a kestrel at dusk".into()),
//!     model: Some(adapters::FLUX_SCHNELL.into()),
//!     ..Default::default()
//! })?;
//!
//! let submitted = client.create(&prediction).await?;
//! let done = JobPoller::new(client, PollConfig::default())
//!     .wait(submitted, |s| println!("{}", s.status))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod adapters;
mod client;

pub use client::*;
