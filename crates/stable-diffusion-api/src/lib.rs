mod txt2img;
use anyhow::Context;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
pub use txt2img::*;

mod img2img;
pub use img2img::*;

/// Errors that can occur while talking to the Stable Diffusion WebUI API.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    /// The API answered with a non-success status code.
    #[error("got error code: {status}, message text: {message}")]
    Status { status: StatusCode, message: String },
    /// The request could not be sent or the response body could not be read.
    #[error("request failed")]
    Request(#[from] reqwest::Error),
    /// An image in the response was not valid base64.
    #[error("failed to decode image")]
    Decode(#[from] base64::DecodeError),
}

/// Struct representing a connection to a Stable Diffusion WebUI API.
#[derive(Clone, Debug)]
pub struct Api {
    client: reqwest::Client,
    url: Url,
}

impl Default for Api {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            url: Url::parse("http://localhost:7860").expect("Failed to parse default URL"),
        }
    }
}

impl Api {
    /// Returns a new `Api` instance with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new `Api` instance with the given URL as a string value.
    ///
    /// # Errors
    ///
    /// If the URL fails to parse, an error will be returned.
    pub fn new_with_url<S>(url: S) -> anyhow::Result<Self>
    where
        S: AsRef<str>,
    {
        Ok(Self {
            url: Url::parse(url.as_ref()).context("Failed to parse URL")?,
            ..Default::default()
        })
    }

    /// Returns a new `Api` instance with the given `reqwest::Client` and URL as a string value.
    ///
    /// # Arguments
    ///
    /// * `client` - An instance of `reqwest::Client`.
    /// * `url` - A string that specifies the Stable Diffusion WebUI API URL endpoint.
    ///
    /// # Errors
    ///
    /// If the URL fails to parse, an error will be returned.
    pub fn new_with_client_and_url<S>(client: reqwest::Client, url: S) -> anyhow::Result<Self>
    where
        S: AsRef<str>,
    {
        Ok(Self {
            client,
            url: Url::parse(url.as_ref()).context("Failed to parse URL")?,
        })
    }

    /// Returns a new instance of `Txt2Img` with the API's cloned `reqwest::Client` and the URL for `txt2img` endpoint.
    ///
    /// # Errors
    ///
    /// If the URL fails to parse, an error will be returned.
    pub fn txt2img(&self) -> anyhow::Result<Txt2Img> {
        Ok(Txt2Img::new_with_url(
            self.client.clone(),
            self.endpoint("sdapi/v1/txt2img")
                .context("Failed to parse txt2img endpoint")?,
        ))
    }

    /// Returns a new instance of `Img2Img` with the API's cloned `reqwest::Client` and the URL for `img2img` endpoint.
    ///
    /// # Errors
    ///
    /// If the URL fails to parse, an error will be returned.
    pub fn img2img(&self) -> anyhow::Result<Img2Img> {
        Ok(Img2Img::new_with_url(
            self.client.clone(),
            self.endpoint("sdapi/v1/img2img")
                .context("Failed to parse img2img endpoint")?,
        ))
    }

    // `Url::join` drops the last path segment unless the base ends with a slash,
    // which would break webuis served under a sub-path.
    fn endpoint(&self, route: &str) -> Result<Url, url::ParseError> {
        if self.url.path().ends_with('/') {
            self.url.join(route)
        } else {
            Url::parse(&format!("{}/", self.url))?.join(route)
        }
    }
}

/// Posts `request` as JSON to `endpoint`, turning non-success statuses into [`ApiError::Status`].
pub(crate) async fn post_json<Req, Resp>(
    client: &reqwest::Client,
    endpoint: Url,
    request: &Req,
) -> Result<Resp, ApiError>
where
    Req: Serialize + ?Sized,
    Resp: serde::de::DeserializeOwned,
{
    let response = client.post(endpoint).json(request).send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let message = response.text().await?;
    Err(ApiError::Status { status, message })
}

/// A struct that represents the response from the Stable Diffusion WebUI API endpoint.
#[skip_serializing_none]
#[derive(Default, Serialize, Deserialize, Debug)]
#[serde(bound(deserialize = "T: Deserialize<'de> + Default"))]
pub struct ImgResponse<T> {
    /// A vector of strings containing base64-encoded images.
    pub images: Vec<String>,
    /// The parameters that were provided for the generation request.
    #[serde(default)]
    pub parameters: T,
    /// A string containing JSON representing information about the request.
    #[serde(default)]
    pub info: String,
}

impl<T> ImgResponse<T> {
    /// Decodes the base64-encoded images in the response.
    ///
    /// # Errors
    ///
    /// If any image is not valid base64, an error will be returned.
    pub fn images(&self) -> Result<Vec<Vec<u8>>, ApiError> {
        decode_images(&self.images)
    }

    /// Parses and returns a new `ImgInfo` instance from the `info` field of the `ImgResponse`.
    ///
    /// # Errors
    ///
    /// If the `info` field fails to parse, an error will be returned.
    pub fn info(&self) -> anyhow::Result<ImgInfo> {
        serde_json::from_str(&self.info).context("failed to parse info")
    }
}

pub(crate) fn decode_images(images: &[String]) -> Result<Vec<Vec<u8>>, ApiError> {
    use base64::{engine::general_purpose, Engine as _};

    images
        .iter()
        .map(|i| general_purpose::STANDARD.decode(i).map_err(ApiError::from))
        .collect()
}

#[skip_serializing_none]
#[derive(Default, Serialize, Deserialize, Debug)]
/// Information about the generated images.
pub struct ImgInfo {
    /// The prompt used when generating the image.
    pub prompt: Option<String>,
    /// The negative prompt used when generating the image.
    pub negative_prompt: Option<String>,
    /// The random seed used for image generation.
    pub seed: Option<i64>,
    /// The width of the generated image.
    pub width: Option<i32>,
    /// The height of the generated image.
    pub height: Option<i32>,
    /// The name of the sampler used for image generation.
    pub sampler_name: Option<String>,
    /// The cfg scale factor used when generating the image.
    pub cfg_scale: Option<f64>,
    /// The number of steps taken when generating the image.
    pub steps: Option<u32>,
    /// The name of the checkpoint used for image generation.
    pub sd_model_name: Option<String>,
    /// The hash of the checkpoint used for image generation.
    pub sd_model_hash: Option<String>,
    /// The strength of the denoising applied during image generation.
    pub denoising_strength: Option<f64>,
    /// A vector of information texts about the generated images.
    pub infotexts: Option<Vec<String>>,
}
