mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, FollowArgs, ServeArgs};
use kestrel_client::KestrelClient;
use kestrel_core::media::encode_data_uri;
use kestrel_core::prelude::*;
use kestrel_fs::FileSystemStorage;
use kestrel_replicate::{ReplicateClient, ReplicateConfig, adapters};
use kestrel_server::prelude::*;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

async fn serve(args: ServeArgs) -> Result<()> {
    let ServeArgs {
        port,
        data_dir,
        api_key,
        base_url,
        poll_interval_ms,
        request_timeout_secs,
    } = args;

    if api_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
        tracing::warn!("{} is not set, submissions will fail", env::API_KEY);
    }

    tokio::fs::create_dir_all(&data_dir)
        .await
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;

    let provider = ReplicateClient::new(ReplicateConfig {
        base_url,
        api_token: api_key,
        request_timeout: request_timeout_secs.map(Duration::from_secs),
    })?;
    let storage = FileSystemStorage::new(data_dir.clone());
    let jobs = JobService::new(provider, storage)
        .with_adapters(adapters::all())
        .with_interval(Duration::from_millis(poll_interval_ms));

    let mut capabilities: Vec<&str> = jobs.capabilities().map(|c| c.slug()).collect();
    capabilities.sort_unstable();
    tracing::info!("Serving {}", capabilities.join(", "));

    let app = KestrelServer::default().build(jobs);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!("Outputs are stored in {}", data_dir.display());
    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Local files are sent inline as data URIs, anything else is passed on as a URL.
async fn media_input(input: &str) -> Result<String> {
    let path = Path::new(input);
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(input.to_string());
    }

    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {input}"))?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    Ok(encode_data_uri(mime.as_ref(), &data))
}

async fn submit_and_follow(
    client: &KestrelClient,
    capability: Capability,
    request: JobRequest,
    follow: FollowArgs,
) -> Result<()> {
    let submitted = client.submit(capability, &request).await?;
    println!("Submitted {capability} job {}", submitted.handle);

    let outcome = if follow.poll {
        let done = client
            .wait(capability, submitted, |s| println!("  {}", s.status))
            .await?;
        outcome_of(done)
    } else {
        client
            .attach(capability, &submitted.handle, |event| {
                if let WatchEvent::Status(s) = event {
                    println!("  {}", s.status);
                }
            })
            .await?
    };

    finish(client, outcome, follow.out.as_deref()).await
}

/// The status route already replaced the raw output of a finished job with its reference.
fn outcome_of(snapshot: JobSnapshot) -> JobOutcome {
    match snapshot.status {
        JobStatus::Failed => {
            JobOutcome::failed(snapshot.error.as_deref().unwrap_or("Prediction failed"))
        }
        _ => JobOutcome::Succeeded {
            output: snapshot
                .output
                .as_ref()
                .and_then(|o| o.as_str())
                .map(OutputReference::new),
        },
    }
}

async fn finish(client: &KestrelClient, outcome: JobOutcome, out: Option<&Path>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    match (&outcome, out) {
        (JobOutcome::Failed { error }, _) => anyhow::bail!("Job failed: {error}"),
        (JobOutcome::Succeeded { output: Some(output) }, Some(dir)) => {
            let path = client.download(output.as_str(), dir).await?;
            println!("Saved to {}", path.display());
        }
        _ => {}
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let client = KestrelClient::new(&cli.url);

    match cli.command {
        Commands::Serve(args) => serve(args).await?,
        Commands::Image {
            prompt,
            model,
            seed,
            follow,
        } => {
            let request = JobRequest {
                prompt: Some(prompt),
                model: Some(model),
                seed,
                ..Default::default()
            };
            submit_and_follow(&client, Capability::ImageGeneration, request, follow).await?;
        }
        Commands::Animate {
            image,
            prompt,
            seed,
            follow,
        } => {
            let request = JobRequest {
                prompt,
                media: Some(media_input(&image).await?),
                seed,
                ..Default::default()
            };
            submit_and_follow(&client, Capability::Animation, request, follow).await?;
        }
        Commands::Dub {
            video,
            prompt,
            follow,
        } => {
            let request = JobRequest {
                prompt: Some(prompt),
                media: Some(media_input(&video).await?),
                ..Default::default()
            };
            submit_and_follow(&client, Capability::SoundToVideo, request, follow).await?;
        }
        Commands::RemoveBg { image, out } => {
            let outcome = client.remove_background(&image).await?;
            finish(&client, outcome, out.as_deref()).await?;
        }
        Commands::Status { capability, id } => {
            let snapshot = client.status(capability, &JobHandle::new(id)).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Download { reference, out } => {
            let path = client.download(&reference, &out).await?;
            println!("Saved to {}", path.display());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbose flag.
    let default_filter = if cli.verbose {
        "kestrel=debug,kestrel_core=debug,kestrel_server=debug,kestrel_replicate=debug,tower_http=debug"
    } else {
        "kestrel=info,kestrel_core=info,kestrel_server=info,kestrel_replicate=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    run(cli).await
}
