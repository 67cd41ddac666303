//! Submission adapters for the models the front end offers.
//!
//! Each adapter only describes its model: what it accepts, how the input is shaped, and what
//! happens to the output. Submitting and polling is left to the [`JobService`].

use kestrel_core::prelude::*;

use serde_json::{Value, json};
use std::sync::Arc;

pub const FLUX_SCHNELL: &str = "black-forest-labs/flux-schnell";
pub const FLUX_PRO: &str = "black-forest-labs/flux-1.1-pro";
pub const VIDEO_01_LIVE: &str = "minimax/video-01-live";
pub const MMAUDIO: &str =
    "zsxkib/mmaudio:4b9f801a167b1f6cc2db6ba7ffdeb307630bf411841d4e8300e63ca992de0be9";
pub const REMOVE_BG: &str = "fb8af171cfa1616ddcf1242c093f9c46bcada5ad4cf6f2fbe8b81b330ec5c003";

/// Every adapter, ready for [`JobService::with_adapters`].
pub fn all() -> Vec<Arc<dyn SubmissionAdapter>> {
    vec![
        Arc::new(ImageGeneration),
        Arc::new(Animation),
        Arc::new(SoundToVideo),
        Arc::new(BackgroundRemoval),
    ]
}

/// Text-to-image with the FLUX models. The model has to be picked explicitly.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageGeneration;

impl SubmissionAdapter for ImageGeneration {
    fn capability(&self) -> Capability {
        Capability::ImageGeneration
    }

    fn models(&self) -> &[&'static str] {
        &[FLUX_SCHNELL, FLUX_PRO]
    }

    fn validate(&self, request: &JobRequest) -> Result<(), JobError> {
        if request.prompt().is_none() {
            return Err(JobError::Validation("No prompt provided".into()));
        }
        Ok(())
    }

    fn input(&self, request: &JobRequest) -> Value {
        let mut input = json!({
            "prompt": request.prompt(),
            "aspect_ratio": "16:9",
            "num_inference_steps": 4,
            "negative_prompt": "low quality, bad anatomy, bad hands, cropped, worst quality",
            "output_format": "png",
        });
        if let Some(seed) = request.seed {
            input["seed"] = json!(seed);
        }
        input
    }

    fn output_policy(&self) -> OutputPolicy {
        OutputPolicy::inline("generated-image", "png")
    }
}

/// Animates a still image into a short clip.
#[derive(Clone, Copy, Debug, Default)]
pub struct Animation;

impl SubmissionAdapter for Animation {
    fn capability(&self) -> Capability {
        Capability::Animation
    }

    fn models(&self) -> &[&'static str] {
        &[VIDEO_01_LIVE]
    }

    fn default_model(&self) -> Option<&'static str> {
        Some(VIDEO_01_LIVE)
    }

    fn validate(&self, request: &JobRequest) -> Result<(), JobError> {
        if request.media().is_none() {
            return Err(JobError::Validation("Image is required".into()));
        }
        Ok(())
    }

    fn input(&self, request: &JobRequest) -> Value {
        let seed = request
            .seed
            .unwrap_or_else(|| rand::random_range(0..1_000_000));

        json!({
            "first_frame_image": request.media(),
            "seed": seed,
            "motion_type": "live",
            "motion_speed": 1,
            "prompt": request.prompt().unwrap_or("natural movement"),
            "prompt_optimizer": true,
        })
    }

    fn output_policy(&self) -> OutputPolicy {
        OutputPolicy::persisted("live2d-animation", "mp4")
    }
}

/// Generates a soundtrack for a video from a prompt.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoundToVideo;

impl SubmissionAdapter for SoundToVideo {
    fn capability(&self) -> Capability {
        Capability::SoundToVideo
    }

    fn models(&self) -> &[&'static str] {
        &[MMAUDIO]
    }

    fn default_model(&self) -> Option<&'static str> {
        Some(MMAUDIO)
    }

    fn validate(&self, request: &JobRequest) -> Result<(), JobError> {
        if request.media().is_none() || request.prompt().is_none() {
            return Err(JobError::Validation("Video and prompt are required".into()));
        }
        Ok(())
    }

    fn input(&self, request: &JobRequest) -> Value {
        json!({
            "video": request.media(),
            "prompt": request.prompt(),
        })
    }

    fn output_policy(&self) -> OutputPolicy {
        OutputPolicy::persisted("soundtovideo", "mp4")
    }
}

/// Cuts the subject out of an image. Usually run synchronously, so it gives up after 20 polls.
#[derive(Clone, Copy, Debug, Default)]
pub struct BackgroundRemoval;

impl BackgroundRemoval {
    pub const MAX_ATTEMPTS: u32 = 20;
}

impl SubmissionAdapter for BackgroundRemoval {
    fn capability(&self) -> Capability {
        Capability::BackgroundRemoval
    }

    fn models(&self) -> &[&'static str] {
        &[REMOVE_BG]
    }

    fn default_model(&self) -> Option<&'static str> {
        Some(REMOVE_BG)
    }

    fn validate(&self, request: &JobRequest) -> Result<(), JobError> {
        if request.media().is_none() {
            return Err(JobError::Validation("No image file provided".into()));
        }
        Ok(())
    }

    fn input(&self, request: &JobRequest) -> Value {
        json!({ "image": request.media() })
    }

    fn poll_config(&self) -> PollConfig {
        PollConfig::default().with_max_attempts(Self::MAX_ATTEMPTS)
    }

    fn output_policy(&self) -> OutputPolicy {
        OutputPolicy::inline("background-removed", "png").allow_empty()
    }
}
