//! # Replicate Server Example
//!
//! Showcases a [`KestrelServer`] that runs every capability on Replicate and keeps outputs on the
//! local filesystem.
//!
//! ## Usage
//!
//! ```sh
//! REPLICATE_API_KEY=r8_... cargo run --example replicate_server --features "server fs replicate"
//! ```

use kestrel::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    // Providers & Services
    let provider = ReplicateClient::new(ReplicateConfig {
        api_token: std::env::var(env::API_KEY).ok(),
        ..Default::default()
    })?;
    let storage = FileSystemStorage::new("./public/tmp");

    let jobs = JobService::new(provider, storage).with_adapters(adapters::all());

    // Build App
    let app = KestrelServer::default().build(jobs);

    // Serve
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");
    println!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
