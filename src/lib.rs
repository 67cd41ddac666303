//! # 🪶 Kestrel
//!
//!> *Hovers over a prediction until it lands*
//!
//! A small front end for remote generative-media predictions. Submit a prompt, an image or a
//! video to an inference provider, poll the job until it finishes, and keep the result somewhere
//! it can be rendered or downloaded from.
//!
//! This crate serves as an entry point, re-exporting the core logic and
//! optionally including server, client, storage and provider implementations via feature flags.
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | **`server`** | Includes the Axum-based server implementation (`kestrel_server`). |
//! | **`client`** | Includes the HTTP client (`kestrel_client`) for tooling. |
//! | **`fs`** | Output storage on the local filesystem (`kestrel_fs`). |
//! | **`replicate`** | Replicate prediction client and submission adapters (`kestrel_replicate`). |
//!
//! ## Example: Custom Server
//!
//! ```toml
//! [dependencies]
//! kestrel = { version = "0.3", features = ["server", "fs", "replicate"] }
//! ```
//!
//! ```rust,ignore
//! use kestrel::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let provider = ReplicateClient::new(ReplicateConfig {
//!         api_token: std::env::var("REPLICATE_API_KEY").ok(),
//!         ..Default::default()
//!     })
//!     .unwrap();
//!     let storage = FileSystemStorage::new("./public/tmp");
//!
//!     // Build
//!     let jobs = JobService::new(provider, storage).with_adapters(adapters::all());
//!     let app = KestrelServer::default().build(jobs);
//!
//!     // Serve
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

pub use kestrel_core::*;

#[cfg(feature = "server")]
pub mod server {
    pub use kestrel_server::*;
}

#[cfg(feature = "client")]
pub mod client {
    pub use kestrel_client::*;
}

#[cfg(feature = "fs")]
pub mod fs {
    pub use kestrel_fs::*;
}

#[cfg(feature = "replicate")]
pub mod replicate {
    pub use kestrel_replicate::*;
}

pub mod prelude {
    pub use kestrel_core::prelude::*;

    #[cfg(feature = "server")]
    pub use kestrel_server::prelude::*;

    #[cfg(feature = "client")]
    pub use kestrel_client::KestrelClient;

    #[cfg(feature = "fs")]
    pub use kestrel_fs::FileSystemStorage;

    #[cfg(feature = "replicate")]
    pub use kestrel_replicate::{ReplicateClient, ReplicateConfig, adapters};
}
