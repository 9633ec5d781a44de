use std::collections::HashMap;

use anyhow::Context;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use super::{post_json, ApiError, ImgResponse};

/// Key in `override_settings` that pins the checkpoint used for a request.
pub const CHECKPOINT_SETTING: &str = "sd_model_checkpoint";

/// Struct representing a text to image request.
#[skip_serializing_none]
#[derive(Default, PartialEq, Serialize, Deserialize, Debug, Clone)]
pub struct Txt2ImgRequest {
    /// Text prompt for generating the image.
    pub prompt: Option<String>,
    /// Negative text prompt.
    pub negative_prompt: Option<String>,
    /// Seed for generating the image.
    pub seed: Option<i64>,
    /// Name of the sampler.
    pub sampler_name: Option<String>,
    /// Batch size used in generating images.
    pub batch_size: Option<u32>,
    /// Number of batches to generate.
    pub n_iter: Option<u32>,
    /// Number of steps.
    pub steps: Option<u32>,
    /// CFG scale factor.
    pub cfg_scale: Option<f64>,
    /// Width of the generated image.
    pub width: Option<u32>,
    /// Height of the generated image.
    pub height: Option<u32>,
    /// Whether to enable high resolution mode.
    pub enable_hr: Option<bool>,
    /// Scale factor for high resolution mode.
    pub hr_scale: Option<f64>,
    /// Upscaler used in high resolution mode.
    pub hr_upscaler: Option<String>,
    /// Width of the image after resizing in high resolution mode.
    pub hr_resize_x: Option<u32>,
    /// Height of the image after resizing in high resolution mode.
    pub hr_resize_y: Option<u32>,
    /// Strength of denoising applied during the high resolution pass.
    pub denoising_strength: Option<f64>,
    /// Settings to override when generating the image.
    pub override_settings: Option<HashMap<String, serde_json::Value>>,
    /// Whether to restore the settings after generating the image.
    pub override_settings_restore_afterwards: Option<bool>,
    /// Whether to send the generated images.
    pub send_images: Option<bool>,
    /// Whether to save the generated images on the server.
    pub save_images: Option<bool>,
}

impl Txt2ImgRequest {
    /// Adds a prompt to the request.
    ///
    /// # Example
    ///
    /// ```
    /// # use stable_diffusion_api::Txt2ImgRequest;
    /// let mut req = Txt2ImgRequest::default();
    /// req.with_prompt("A blue sky with green grass".to_string());
    /// ```
    pub fn with_prompt(&mut self, prompt: String) -> &mut Self {
        self.prompt = Some(prompt);
        self
    }

    /// Adds a negative prompt to the request.
    pub fn with_negative_prompt(&mut self, negative_prompt: String) -> &mut Self {
        self.negative_prompt = Some(negative_prompt);
        self
    }

    /// Sets the sampler name for image generation.
    ///
    /// # Examples
    ///
    /// ```
    /// # use stable_diffusion_api::Txt2ImgRequest;
    /// let mut req = Txt2ImgRequest::default();
    /// req.with_sampler_name("Euler a".to_string());
    /// ```
    pub fn with_sampler_name(&mut self, sampler_name: String) -> &mut Self {
        self.sampler_name = Some(sampler_name);
        self
    }

    /// Sets the batch size for image generation.
    pub fn with_batch_size(&mut self, batch_size: u32) -> &mut Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Sets the number of batches for image generation.
    pub fn with_n_iter(&mut self, n_iter: u32) -> &mut Self {
        self.n_iter = Some(n_iter);
        self
    }

    /// Sets the number of steps for image generation.
    pub fn with_steps(&mut self, steps: u32) -> &mut Self {
        self.steps = Some(steps);
        self
    }

    /// Sets the cfg scale for image generation.
    pub fn with_cfg_scale(&mut self, cfg_scale: f64) -> &mut Self {
        self.cfg_scale = Some(cfg_scale);
        self
    }

    /// Sets the output size of the first pass.
    pub fn with_size(&mut self, width: u32, height: u32) -> &mut Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Enables the high resolution fix: the first pass is upscaled by `scale`
    /// with `upscaler`, resized to `resize_x`×`resize_y`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use stable_diffusion_api::Txt2ImgRequest;
    /// let mut req = Txt2ImgRequest::default();
    /// req.with_hires_fix(2.0, 1024, 1024, "ESRGAN_4x".to_string());
    /// assert_eq!(req.enable_hr, Some(true));
    /// ```
    pub fn with_hires_fix(
        &mut self,
        scale: f64,
        resize_x: u32,
        resize_y: u32,
        upscaler: String,
    ) -> &mut Self {
        self.enable_hr = Some(true);
        self.hr_scale = Some(scale);
        self.hr_resize_x = Some(resize_x);
        self.hr_resize_y = Some(resize_y);
        self.hr_upscaler = Some(upscaler);
        self
    }

    /// Pins the checkpoint used for this request.
    ///
    /// When `restore_afterwards` is false the webui keeps the checkpoint loaded
    /// once the request finishes.
    pub fn with_checkpoint(&mut self, checkpoint: String, restore_afterwards: bool) -> &mut Self {
        self.override_settings
            .get_or_insert_with(HashMap::new)
            .insert(
                CHECKPOINT_SETTING.to_owned(),
                serde_json::Value::String(checkpoint),
            );
        self.override_settings_restore_afterwards = Some(restore_afterwards);
        self
    }

    /// Sets whether the generated images are returned in the response.
    pub fn with_send_images(&mut self, send_images: bool) -> &mut Self {
        self.send_images = Some(send_images);
        self
    }

    /// The checkpoint pinned by [`Txt2ImgRequest::with_checkpoint`], if any.
    pub fn checkpoint(&self) -> Option<&str> {
        self.override_settings
            .as_ref()?
            .get(CHECKPOINT_SETTING)?
            .as_str()
    }

    /// Merges the given settings with the request's settings.
    ///
    /// Fields set in `request` take precedence.
    pub fn merge(&self, request: Self) -> Self {
        Self {
            prompt: request.prompt.or(self.prompt.clone()),
            negative_prompt: request.negative_prompt.or(self.negative_prompt.clone()),
            seed: request.seed.or(self.seed),
            sampler_name: request.sampler_name.or(self.sampler_name.clone()),
            batch_size: request.batch_size.or(self.batch_size),
            n_iter: request.n_iter.or(self.n_iter),
            steps: request.steps.or(self.steps),
            cfg_scale: request.cfg_scale.or(self.cfg_scale),
            width: request.width.or(self.width),
            height: request.height.or(self.height),
            enable_hr: request.enable_hr.or(self.enable_hr),
            hr_scale: request.hr_scale.or(self.hr_scale),
            hr_upscaler: request.hr_upscaler.or(self.hr_upscaler.clone()),
            hr_resize_x: request.hr_resize_x.or(self.hr_resize_x),
            hr_resize_y: request.hr_resize_y.or(self.hr_resize_y),
            denoising_strength: request.denoising_strength.or(self.denoising_strength),
            override_settings: request.override_settings.or(self.override_settings.clone()),
            override_settings_restore_afterwards: request
                .override_settings_restore_afterwards
                .or(self.override_settings_restore_afterwards),
            send_images: request.send_images.or(self.send_images),
            save_images: request.save_images.or(self.save_images),
        }
    }
}

/// A client for sending text to image requests to a specified endpoint.
pub struct Txt2Img {
    client: reqwest::Client,
    endpoint: Url,
}

impl Txt2Img {
    /// Constructs a new Txt2Img client with a given `reqwest::Client` and Stable Diffusion API
    /// endpoint `String`.
    ///
    /// # Returns
    ///
    /// A `Result` containing a new Txt2Img instance on success, or an error if url parsing failed.
    pub fn new(client: reqwest::Client, endpoint: String) -> anyhow::Result<Self> {
        Ok(Self::new_with_url(
            client,
            Url::parse(&endpoint).context("failed to parse endpoint url")?,
        ))
    }

    /// Constructs a new Txt2Img client with a given `reqwest::Client` and endpoint `Url`.
    pub fn new_with_url(client: reqwest::Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }

    /// Sends a text to image request.
    ///
    /// A single attempt is made; a non-success status is returned as
    /// [`ApiError::Status`] carrying the response body.
    pub async fn send(
        &self,
        request: &Txt2ImgRequest,
    ) -> Result<ImgResponse<Txt2ImgRequest>, ApiError> {
        post_json(&self.client, self.endpoint.clone(), request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_fields_are_not_serialized() {
        let mut req = Txt2ImgRequest::default();
        req.with_prompt("a cat".to_owned()).with_steps(20);

        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value, serde_json::json!({"prompt": "a cat", "steps": 20}));
    }

    #[test]
    fn checkpoint_override() {
        let mut req = Txt2ImgRequest::default();
        req.with_checkpoint("dreamshaper".to_owned(), false);

        assert_eq!(req.checkpoint(), Some("dreamshaper"));
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value["override_settings"]["sd_model_checkpoint"],
            "dreamshaper"
        );
        assert_eq!(value["override_settings_restore_afterwards"], false);
    }

    #[test]
    fn merge_prefers_new_values() {
        let base = Txt2ImgRequest {
            steps: Some(50),
            width: Some(512),
            ..Default::default()
        };
        let merged = base.merge(Txt2ImgRequest {
            steps: Some(20),
            ..Default::default()
        });

        assert_eq!(merged.steps, Some(20));
        assert_eq!(merged.width, Some(512));
    }
}
