use stable_diffusion_api::{Img2ImgRequest, Txt2ImgRequest};

use super::{model::Model, params::GenParams};

const HIRES_SCALE: f64 = 2.0;
const HIRES_SIZE: u32 = 1024;
const HIRES_UPSCALER: &str = "ESRGAN_4x";

/// A source image for image to image generation.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SourceImage {
    /// Where the image was uploaded; the reply links back to it.
    pub url: String,
    pub data: Vec<u8>,
}

/// Everything needed to run one generation on the diffusion backend.
///
/// Text to image and image to image share this type; the presence of
/// `source_image` selects the endpoint.
#[derive(Clone, PartialEq, Debug)]
pub struct GenerationRequest {
    pub model: Model,
    pub params: GenParams,
    pub source_image: Option<SourceImage>,
}

/// The request body for the selected endpoint.
#[derive(Clone, PartialEq, Debug)]
pub enum DiffusionRequest {
    Txt2Img(Txt2ImgRequest),
    Img2Img(Img2ImgRequest),
}

/// Settings sent with every request regardless of the user's input.
fn base_settings() -> Txt2ImgRequest {
    let mut settings = Txt2ImgRequest::default();
    settings
        .with_batch_size(1)
        .with_n_iter(1)
        .with_send_images(true)
        .with_hires_fix(
            HIRES_SCALE,
            HIRES_SIZE,
            HIRES_SIZE,
            HIRES_UPSCALER.to_owned(),
        );
    settings
}

impl GenerationRequest {
    pub fn new(model: Model, params: GenParams) -> Self {
        Self {
            model,
            params,
            source_image: None,
        }
    }

    pub fn with_source_image(mut self, source_image: SourceImage) -> Self {
        self.source_image = Some(source_image);
        self
    }

    /// Builds the webui request body.
    ///
    /// The checkpoint is left loaded after the request (`restore_afterwards`
    /// is false) so consecutive requests for the same model skip the reload.
    pub fn build(&self) -> DiffusionRequest {
        let profile = self.model.profile();

        let mut user = Txt2ImgRequest::default();
        user.with_prompt(self.params.prompt.clone())
            .with_negative_prompt(self.params.negative_prompt.clone())
            .with_cfg_scale(self.params.cfg_scale.into())
            .with_sampler_name(self.params.sampler.name().to_owned())
            .with_steps(self.params.steps)
            .with_size(profile.width, profile.height)
            .with_checkpoint(profile.checkpoint.to_owned(), false);

        let settings = base_settings().merge(user);

        match &self.source_image {
            None => DiffusionRequest::Txt2Img(settings),
            Some(source) => {
                let mut img2img = Img2ImgRequest::default();
                img2img
                    .with_settings(settings)
                    .with_image(&source.data)
                    .with_include_init_images(true);
                DiffusionRequest::Img2Img(img2img)
            }
        }
    }
}
