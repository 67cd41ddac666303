//! # Animate Client Example
//!
//! Submits an animation job to a running server, follows it over WebSocket and downloads the clip.
//!
//! ## Usage
//!
//! ```sh
//! cargo run --example animate_client --features client -- https://example.com/portrait.png
//! ```

use kestrel::prelude::*;
use std::path::Path;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let image = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: animate_client <image-url>"))?;

    let client = KestrelClient::new("http://localhost:3000");
    let submitted = client
        .submit(
            Capability::Animation,
            &JobRequest {
                media: Some(image),
                prompt: Some("a slow smile".into()),
                ..Default::default()
            },
        )
        .await?;

    let outcome = client
        .attach(Capability::Animation, &submitted.handle, |event| {
            if let WatchEvent::Status(snapshot) = event {
                println!("{}", snapshot.status);
            }
        })
        .await?;

    match outcome.output() {
        Some(output) => {
            let path = client.download(output.as_str(), Path::new(".")).await?;
            println!("Saved to {}", path.display());
        }
        None => println!("{outcome:?}"),
    }
    Ok(())
}
