use async_trait::async_trait;
use futures::{stream::FuturesOrdered, TryStreamExt};
use tracing::{debug, warn};

use super::request::{DiffusionRequest, GenerationRequest};

/// How many images the hosted API may produce for one request.
pub const MAX_HOSTED_IMAGES: u8 = 4;

/// Images produced by a backend, in display order.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct GenerationResult {
    pub images: Vec<Vec<u8>>,
    /// Source images echoed back by the backend, shown after the generated ones.
    pub echoed_sources: Vec<Vec<u8>>,
}

/// A failed backend call. No call is ever retried.
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("the prompt was refused by the upstream safety system")]
    SafetyRejection,
    #[error("upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("upstream could not be reached: {0}")]
    Unreachable(String),
}

/// The self-hosted diffusion service.
#[async_trait]
pub trait DiffusionBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest)
        -> Result<GenerationResult, BackendError>;
}

/// The hosted image generation service.
#[async_trait]
pub trait HostedImageBackend: Send + Sync {
    /// Generates `count` images for `prompt` and returns their bytes.
    async fn create_images(&self, prompt: &str, count: u8)
        -> Result<Vec<Vec<u8>>, BackendError>;
}

/// An uploaded image that is fetched only once a request has been validated.
#[async_trait]
pub trait ImageSource: Send + Sync {
    fn url(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<u8>, BackendError>;
}

#[async_trait]
impl ImageSource for serenity::model::channel::Attachment {
    fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<Vec<u8>, BackendError> {
        self.download()
            .await
            .map_err(|e| BackendError::Unreachable(format!("failed to download source: {e}")))
    }
}

impl From<stable_diffusion_api::ApiError> for BackendError {
    fn from(err: stable_diffusion_api::ApiError) -> Self {
        use stable_diffusion_api::ApiError;

        match err {
            ApiError::Status { status, message } => BackendError::Upstream {
                status: status.as_u16(),
                message,
            },
            ApiError::Request(e) => BackendError::Unreachable(e.to_string()),
            ApiError::Decode(e) => BackendError::Unreachable(format!("bad image data: {e}")),
        }
    }
}

impl From<dalle_api::ApiError> for BackendError {
    fn from(err: dalle_api::ApiError) -> Self {
        use dalle_api::ApiError;

        if err.is_safety_rejection() {
            return BackendError::SafetyRejection;
        }
        match err {
            ApiError::Status { status, message } => BackendError::Upstream {
                status: status.as_u16(),
                message,
            },
            other => BackendError::Unreachable(other.to_string()),
        }
    }
}

#[async_trait]
impl DiffusionBackend for stable_diffusion_api::Api {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, BackendError> {
        let endpoint_error = |e: anyhow::Error| BackendError::Unreachable(format!("{e:#}"));

        debug!(model = %request.model, "Sending diffusion request");
        let result = match request.build() {
            DiffusionRequest::Txt2Img(body) => {
                let resp = self.txt2img().map_err(endpoint_error)?.send(&body).await?;
                log_info(&resp);
                GenerationResult {
                    images: first_batch(resp.images()?, &body),
                    echoed_sources: Vec::new(),
                }
            }
            DiffusionRequest::Img2Img(body) => {
                let resp = self.img2img().map_err(endpoint_error)?.send(&body).await?;
                log_info(&resp);
                GenerationResult {
                    images: first_batch(resp.images()?, &body.settings),
                    echoed_sources: resp.parameters.decoded_init_images()?,
                }
            }
        };

        if result.images.is_empty() {
            warn!("Did not get any images from the API.");
            return Err(BackendError::Unreachable(
                "no images in the response".to_owned(),
            ));
        }
        Ok(result)
    }
}

fn log_info<T>(resp: &stable_diffusion_api::ImgResponse<T>) {
    if let Ok(info) = resp.info() {
        debug!(seed = ?info.seed, checkpoint = ?info.sd_model_name, "Generated image");
    }
}

/// Keeps only the images the request asked for; the webui may append extras
/// such as grids or echoed inputs.
fn first_batch(
    mut images: Vec<Vec<u8>>,
    request: &stable_diffusion_api::Txt2ImgRequest,
) -> Vec<Vec<u8>> {
    let wanted = request.batch_size.unwrap_or(1) * request.n_iter.unwrap_or(1);
    images.truncate(wanted as usize);
    images
}

#[async_trait]
impl HostedImageBackend for dalle_api::Api {
    async fn create_images(
        &self,
        prompt: &str,
        count: u8,
    ) -> Result<Vec<Vec<u8>>, BackendError> {
        let request = dalle_api::ImageRequest::new(prompt, count.clamp(1, MAX_HOSTED_IMAGES));
        let response = self.images().send(&request).await?;

        response
            .urls()
            .map(|url| async move { self.download(url).await.map(|b| b.to_vec()) })
            .collect::<FuturesOrdered<_>>()
            .try_collect()
            .await
            .map_err(BackendError::from)
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;

    #[test]
    fn safety_rejection_maps_to_its_own_variant() {
        let err = dalle_api::ApiError::Status {
            status: StatusCode::BAD_REQUEST,
            message: "Your request was rejected as a result of our safety system.".to_owned(),
        };
        assert!(matches!(
            BackendError::from(err),
            BackendError::SafetyRejection
        ));
    }

    #[test]
    fn other_statuses_keep_status_and_message() {
        let err = dalle_api::ApiError::Status {
            status: StatusCode::UNAUTHORIZED,
            message: "Incorrect API key provided".to_owned(),
        };
        match BackendError::from(err) {
            BackendError::Upstream { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Incorrect API key provided");
            }
            other => panic!("unexpected {other:?}"),
        }

        let err = stable_diffusion_api::ApiError::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "CUDA out of memory".to_owned(),
        };
        assert!(matches!(
            BackendError::from(err),
            BackendError::Upstream { status: 500, .. }
        ));
    }

    #[test]
    fn extra_images_are_dropped() {
        let mut req = stable_diffusion_api::Txt2ImgRequest::default();
        req.with_batch_size(1).with_n_iter(1);
        assert_eq!(
            first_batch(vec![vec![1], vec![2], vec![3]], &req),
            vec![vec![1]]
        );
    }
}
