//! # Kestrel Core
//!
//! Types and traits for the ecosystem.
//!
//! Defines the job model shared by clients and servers, and the polling machinery that
//! drives a submitted job to a terminal state.
//!
//! - **[`JobPoller`](poller::JobPoller)**: Polls a [`StatusSource`](traits::StatusSource) at a fixed interval until the job succeeds, fails, or runs out of attempts.
//! - **[`JobService`](service::JobService)**: Ties an [`InferenceProvider`](traits::InferenceProvider), a [`StorageBackend`](traits::StorageBackend) and a set of [`SubmissionAdapter`](traits::SubmissionAdapter)s together.
//! - **[`JobOutput`](output::JobOutput)**: The tagged result of a finished job, either an inline reference or a byte stream that still needs to be persisted.

pub mod constants;
pub mod error;
pub mod job;
pub mod media;
pub mod output;
pub mod poller;
pub mod service;
pub mod traits;

pub mod prelude {
    pub use super::constants::*;
    pub use super::error::*;
    pub use super::job::*;
    pub use super::output::*;
    pub use super::poller::*;
    pub use super::service::*;
    pub use super::traits::*;
}
