//! Consuming the engine's response stream.
//!
//! The stream is read strictly in order. Each frame is checked against the
//! cancellation flag before it is processed; previews are decoded and
//! reported as they arrive, final images are decoded once the stream ends.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::codec::decode_image;
use crate::preview::decode_preview;
use crate::request::REQUEST_USER;
use crate::schema::image_generation_signpost::Signpost;
use crate::schema::{EchoReply, EchoRequest, ImageGenerationRequest, ImageGenerationResponse};
use crate::{
    BridgeError, BridgeSettings, DecodedImage, GenerationConfiguration, ModelProfile, PreviewImage,
    Result, TransportError,
};

/// Cancellation flag and preview toggle, written by control-plane handlers
#[derive(Debug)]
pub struct ControlFlags {
    cancel: AtomicBool,
    preview: AtomicBool,
}

static GLOBAL_FLAGS: ControlFlags = ControlFlags::new();

impl ControlFlags {
    pub const fn new() -> Self {
        Self {
            cancel: AtomicBool::new(false),
            preview: AtomicBool::new(true),
        }
    }

    /// Process-wide flags
    pub fn global() -> &'static ControlFlags {
        &GLOBAL_FLAGS
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn reset_cancel(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    pub fn should_cancel(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn set_preview_enabled(&self, enabled: bool) {
        self.preview.store(enabled, Ordering::Relaxed);
    }

    pub fn preview_enabled(&self) -> bool {
        self.preview.load(Ordering::Relaxed)
    }
}

impl Default for ControlFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Server-streamed generation responses
#[allow(async_fn_in_trait)]
pub trait ResponseStream {
    /// Next frame, or `None` once the engine closes the stream
    async fn next_response(&mut self) -> std::result::Result<Option<ImageGenerationResponse>, TransportError>;

    /// Tear the stream down early
    async fn close(&mut self) {}
}

/// Connection to the generation engine
#[allow(async_fn_in_trait)]
pub trait EngineChannel {
    type Stream: ResponseStream;

    async fn echo(&self, request: EchoRequest) -> std::result::Result<EchoReply, TransportError>;

    async fn generate(&self, request: ImageGenerationRequest) -> std::result::Result<Self::Stream, TransportError>;
}

/// Host-side progress display
pub trait ProgressSink {
    fn update(&mut self, step: u32, total: u32, preview: Option<PreviewImage>);
}

/// Total steps reported to the host, counting the hi-res second pass
pub fn estimated_steps(config: &GenerationConfiguration) -> u32 {
    let steps = config.steps.unwrap_or(0);
    if config.hires_fix_enabled() {
        let strength = config.hires_fix_strength.unwrap_or(0.0);
        (steps as f32 * (1.0 + strength)).round() as u32
    } else {
        steps
    }
}

/// Step a signpost points at, if it is a sampling signpost
fn signpost_step(response: &ImageGenerationResponse, steps: u32) -> Option<u32> {
    let signpost = response.current_signpost.as_ref()?.signpost.as_ref()?;
    match signpost {
        Signpost::Sampling(sampling) => Some(sampling.step.max(0) as u32),
        Signpost::SecondPassSampling(sampling) => Some(sampling.step.max(0) as u32 + steps),
        _ => None,
    }
}

/// Run one generation and return the decoded images.
///
/// Frame-local decode failures drop the frame; the request fails only when
/// no image was produced or none of them decodes.
pub async fn generate_images<C, P>(
    channel: &C,
    request: ImageGenerationRequest,
    config: &GenerationConfiguration,
    profile: &ModelProfile,
    settings: &BridgeSettings,
    flags: &ControlFlags,
    sink: &mut P,
) -> Result<Vec<DecodedImage>>
where
    C: EngineChannel,
    P: ProgressSink,
{
    let reply = channel
        .echo(EchoRequest {
            name: REQUEST_USER.to_string(),
        })
        .await?;
    debug!(files = reply.files.len(), "engine answered echo");

    let mut stream = channel.generate(request).await?;
    flags.reset_cancel();

    let steps = config.steps.unwrap_or(0);
    let total = estimated_steps(config);
    let mut current_step = 0;
    let mut encoded_images = Vec::new();

    info!(steps, total, family = ?profile.family, "generation stream opened");

    while let Some(response) = stream.next_response().await? {
        if flags.should_cancel() {
            stream.close().await;
            info!(current_step, "generation cancelled");
            return Err(BridgeError::Cancelled);
        }

        if let Some(step) = signpost_step(&response, steps) {
            current_step = step;
        }

        if current_step > 0 {
            let preview = match response.preview_image.as_deref() {
                Some(bytes) if settings.show_preview && flags.preview_enabled() => {
                    match decode_preview(bytes, profile.family) {
                        Ok(preview) => Some(preview.fit_within(settings.max_preview_resolution)),
                        Err(e) => {
                            debug!(error = %e, "skipping preview frame");
                            None
                        }
                    }
                }
                _ => None,
            };
            sink.update(current_step, total, preview);
        }

        encoded_images.extend(response.generated_images);
    }

    if encoded_images.is_empty() {
        return Err(BridgeError::EmptyResultStream);
    }

    let mut images = Vec::with_capacity(encoded_images.len());
    for (idx, bytes) in encoded_images.iter().enumerate() {
        match decode_image(bytes) {
            Ok(image) => images.push(image),
            Err(e) if e.is_frame_local() => warn!(idx, error = %e, "dropping undecodable image"),
            Err(e) => return Err(e),
        }
    }

    if images.is_empty() {
        return Err(BridgeError::EmptyDecodedImages);
    }
    info!(count = images.len(), "generation finished");
    Ok(images)
}
