use clap::{Args, Parser, Subcommand};
use kestrel_core::prelude::Capability;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kestrel")]
#[command(author, version, about = "Generate images, animations and soundtracks through Replicate")]
pub struct Cli {
    /// Server to talk to
    #[arg(long, global = true, env = "KESTREL_URL", default_value = "http://localhost:3000")]
    pub url: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the server
    Serve(ServeArgs),

    /// Generate an image from a prompt
    Image {
        prompt: String,

        /// Model to use
        #[arg(long, default_value = kestrel_replicate::adapters::FLUX_SCHNELL)]
        model: String,

        #[arg(long)]
        seed: Option<u64>,

        #[command(flatten)]
        follow: FollowArgs,
    },

    /// Animate a still image (file path or URL)
    Animate {
        image: String,

        /// What should move and how
        #[arg(long)]
        prompt: Option<String>,

        #[arg(long)]
        seed: Option<u64>,

        #[command(flatten)]
        follow: FollowArgs,
    },

    /// Generate a soundtrack for a video (file path or URL)
    Dub {
        video: String,

        prompt: String,

        #[command(flatten)]
        follow: FollowArgs,
    },

    /// Cut the subject out of an image file
    RemoveBg {
        image: PathBuf,

        /// Download the result into this directory
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show the current state of a job
    Status {
        /// One of generate-image, live2d, soundtovideo, remove-background
        capability: Capability,

        id: String,
    },

    /// Download an output reference or URL
    Download {
        reference: String,

        /// Target directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
}

#[derive(Args)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// Where persisted outputs are written
    #[arg(long, env = "KESTREL_DATA_DIR", default_value = "./public/tmp")]
    pub data_dir: PathBuf,

    /// Replicate API token
    #[arg(long, env = "REPLICATE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Replicate API root
    #[arg(long, env = "REPLICATE_BASE_URL", default_value = kestrel_replicate::DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Delay between status polls
    #[arg(long, env = "KESTREL_POLL_INTERVAL_MS", default_value = "1000")]
    pub poll_interval_ms: u64,

    /// Timeout for each request to Replicate
    #[arg(long, env = "KESTREL_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Args)]
pub struct FollowArgs {
    /// Poll the status route instead of attaching over WebSocket
    #[arg(long)]
    pub poll: bool,

    /// Download the result into this directory
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}
