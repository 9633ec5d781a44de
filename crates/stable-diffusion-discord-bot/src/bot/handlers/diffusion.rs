use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::bot::{
    backend::{DiffusionBackend, ImageSource},
    error::InteractionError,
    model::Model,
    params::{GenParams, RawParams},
    render::render_diffusion,
    request::{GenerationRequest, SourceImage},
    status::ModelStatus,
};

use super::{deliver, Outcome, Responder};

pub const SWITCHING_MODELS: &str = "Switching models, might take a minute...";

/// A submitted options form.
pub struct Submission {
    pub model: Model,
    pub raw: RawParams,
    pub user_tag: String,
    /// Present for image to image.
    pub source: Option<Arc<dyn ImageSource>>,
}

/// Shared state the diffusion flow reads and updates.
pub struct DiffusionContext<'a> {
    pub backend: &'a dyn DiffusionBackend,
    pub status: &'a ModelStatus,
    pub group_url: &'a str,
}

/// Runs one text to image or image to image interaction from form submission
/// to final reply.
///
/// `None` means the form was never submitted; nothing is sent in that case.
#[instrument(skip_all)]
pub async fn run<R>(
    submission: Option<Submission>,
    responder: &R,
    ctx: DiffusionContext<'_>,
) -> anyhow::Result<Outcome>
where
    R: Responder + ?Sized,
{
    let Some(submission) = submission else {
        info!("Options form was not submitted, the user may have closed it.");
        return Ok(Outcome::Abandoned);
    };
    let Submission {
        model,
        raw,
        user_tag,
        source,
    } = submission;

    responder.defer().await?;

    let params = match GenParams::try_from(raw) {
        Ok(params) => params,
        Err(e) => {
            info!(user = %user_tag, "Rejected submission: {e}");
            responder.fail(&e.into()).await?;
            return Ok(Outcome::Rejected);
        }
    };

    let previous = ctx.status.mark_loaded(model);
    let noticed = previous != Some(model);
    if noticed {
        info!(?previous, %model, "Switching models");
        responder.notice(SWITCHING_MODELS).await?;
    }

    let mut request = GenerationRequest::new(model, params);
    let source_url = source.as_ref().map(|s| s.url().to_owned());
    if let Some(source) = source {
        match source.fetch().await {
            Ok(data) => {
                request = request.with_source_image(SourceImage {
                    url: source.url().to_owned(),
                    data,
                })
            }
            Err(e) => {
                warn!("Failed to fetch source image: {e}");
                responder
                    .fail(&InteractionError::from_backend(e, &request.params.prompt))
                    .await?;
                return Ok(Outcome::Failed);
            }
        }
    }

    let result = match ctx.backend.generate(&request).await {
        Ok(result) => result,
        Err(e) => {
            warn!(%model, "Generation failed: {e}");
            responder
                .fail(&InteractionError::from_backend(e, &request.params.prompt))
                .await?;
            return Ok(Outcome::Failed);
        }
    };

    let message = render_diffusion(
        result,
        model,
        &request.params,
        &user_tag,
        ctx.group_url,
        source_url.as_deref(),
    );
    if !deliver(responder, &message).await? {
        return Ok(Outcome::Failed);
    }
    if noticed {
        responder.clear_notice().await?;
    }

    Ok(Outcome::Done)
}
