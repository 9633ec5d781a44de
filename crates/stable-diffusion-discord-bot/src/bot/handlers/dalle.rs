use tracing::{instrument, warn};

use crate::bot::{
    backend::{HostedImageBackend, MAX_HOSTED_IMAGES},
    error::InteractionError,
    render::render_hosted,
};

use super::{deliver, Outcome, Responder};

/// A `/dalle` invocation.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct HostedRequest {
    pub prompt: String,
    pub count: u8,
    pub user_tag: String,
}

impl HostedRequest {
    /// The command bounds `num`, but the value is clamped again in case the
    /// registered bounds drift.
    pub fn new(prompt: impl Into<String>, count: i64, user_tag: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            count: count.clamp(1, MAX_HOSTED_IMAGES.into()) as u8,
            user_tag: user_tag.into(),
        }
    }
}

/// Generates images with the hosted API and replies with one embed per image.
#[instrument(skip_all, fields(count = request.count))]
pub async fn run<R>(
    request: HostedRequest,
    responder: &R,
    backend: &dyn HostedImageBackend,
    group_url: &str,
) -> anyhow::Result<Outcome>
where
    R: Responder + ?Sized,
{
    responder.defer().await?;

    let images = match backend.create_images(&request.prompt, request.count).await {
        Ok(images) => images,
        Err(e) => {
            warn!("Hosted image generation failed: {e}");
            responder
                .fail(&InteractionError::from_backend(e, &request.prompt))
                .await?;
            return Ok(Outcome::Failed);
        }
    };

    let message = render_hosted(images, &request.prompt, &request.user_tag, group_url);
    if !deliver(responder, &message).await? {
        return Ok(Outcome::Failed);
    }

    Ok(Outcome::Done)
}
