use anyhow::Context;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use super::{decode_images, post_json, ApiError, ImgResponse, Txt2ImgRequest};

/// Struct representing an image to image request.
///
/// Every generation setting shared with text to image lives in `settings`,
/// which is flattened into the same JSON object.
#[skip_serializing_none]
#[derive(Default, PartialEq, Serialize, Deserialize, Debug, Clone)]
pub struct Img2ImgRequest {
    /// Base64-encoded source images.
    pub init_images: Option<Vec<String>>,
    /// Whether the source images are echoed back in the response parameters.
    pub include_init_images: Option<bool>,
    #[serde(flatten)]
    pub settings: Txt2ImgRequest,
}

impl Img2ImgRequest {
    /// Adds a single image to the request.
    ///
    /// # Arguments
    ///
    /// * `image` - array bytes of the image to be added.
    ///
    /// # Examples
    ///
    /// ```
    /// # use stable_diffusion_api::Img2ImgRequest;
    /// let mut req = Img2ImgRequest::default();
    /// req.with_image(b"\x89PNG");
    /// assert_eq!(req.init_images, Some(vec!["iVBORw==".to_string()]));
    /// ```
    pub fn with_image<T>(&mut self, image: T) -> &mut Self
    where
        T: AsRef<[u8]>,
    {
        use base64::{engine::general_purpose, Engine as _};

        self.init_images
            .get_or_insert_with(Vec::new)
            .push(general_purpose::STANDARD.encode(image));
        self
    }

    /// Sets whether the source images should be echoed back.
    pub fn with_include_init_images(&mut self, include: bool) -> &mut Self {
        self.include_init_images = Some(include);
        self
    }

    /// Replaces the shared generation settings.
    pub fn with_settings(&mut self, settings: Txt2ImgRequest) -> &mut Self {
        self.settings = settings;
        self
    }

    /// Decodes the source images carried by this request.
    ///
    /// Used on the `parameters` echoed in an [`ImgResponse`].
    pub fn decoded_init_images(&self) -> Result<Vec<Vec<u8>>, ApiError> {
        self.init_images
            .as_deref()
            .map(decode_images)
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// A client for sending image to image requests to a specified endpoint.
pub struct Img2Img {
    client: reqwest::Client,
    endpoint: Url,
}

impl Img2Img {
    /// Constructs a new Img2Img client with a given `reqwest::Client` and Stable Diffusion API
    /// endpoint `String`.
    ///
    /// # Returns
    ///
    /// A `Result` containing a new Img2Img instance on success, or an error if url parsing failed.
    pub fn new(client: reqwest::Client, endpoint: String) -> anyhow::Result<Self> {
        Ok(Self::new_with_url(
            client,
            Url::parse(&endpoint).context("failed to parse endpoint url")?,
        ))
    }

    /// Constructs a new Img2Img client with a given `reqwest::Client` and endpoint `Url`.
    pub fn new_with_url(client: reqwest::Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }

    /// Sends an image to image request.
    ///
    /// # Returns
    ///
    /// A `Result` containing an `ImgResponse<Img2ImgRequest>` on success, or an error if one occurred.
    pub async fn send(
        &self,
        request: &Img2ImgRequest,
    ) -> Result<ImgResponse<Img2ImgRequest>, ApiError> {
        post_json(&self.client, self.endpoint.clone(), request).await
    }
}
