//! A small client for the OpenAI image generation endpoint.
//!
//! ```no_run
//! # async fn run() -> Result<(), dalle_api::ApiError> {
//! let api = dalle_api::Api::new("sk-...".to_string());
//! let request = dalle_api::ImageRequest::new("a lighthouse at dusk", 2);
//! let response = api.images().send(&request).await?;
//! for url in response.urls() {
//!     let bytes = api.download(url).await?;
//!     println!("{} bytes", bytes.len());
//! }
//! # Ok(())
//! # }
//! ```
use anyhow::Context;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use tracing::debug;

/// Base URL of the public API.
pub const DEFAULT_URL: &str = "https://api.openai.com/v1/";

/// The only image size requested by this client.
pub const DEFAULT_SIZE: &str = "1024x1024";

/// Substring the API puts in its message when the prompt is refused by moderation.
const SAFETY_SYSTEM_MARKER: &str = "safety system.";

/// Errors returned by the image generation API.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    /// The API answered with a non-success status code.
    #[error("Status {status}, {message}")]
    Status { status: StatusCode, message: String },
    /// The request could not be sent or the response could not be read.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The endpoint URL could not be built from the base URL.
    #[error("invalid endpoint URL")]
    Url(#[from] url::ParseError),
    /// A successful response body was not the expected JSON.
    #[error("failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),
    /// A successful response did not carry any image URL.
    #[error("response did not contain any images")]
    MissingImage,
}

impl ApiError {
    /// Whether the API refused the prompt through its safety system.
    pub fn is_safety_rejection(&self) -> bool {
        match self {
            ApiError::Status { message, .. } => message.contains(SAFETY_SYSTEM_MARKER),
            _ => false,
        }
    }
}

/// Struct representing a connection to the image generation API.
#[derive(Clone, Debug)]
pub struct Api {
    client: reqwest::Client,
    url: Url,
    api_key: String,
}

impl Api {
    /// Returns a new `Api` for the public OpenAI endpoint.
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: Url::parse(DEFAULT_URL).expect("Failed to parse default URL"),
            api_key,
        }
    }

    /// Returns a new `Api` instance with the given `reqwest::Client` and base URL.
    ///
    /// # Errors
    ///
    /// If the URL fails to parse, an error will be returned.
    pub fn new_with_client_and_url<S>(
        client: reqwest::Client,
        url: S,
        api_key: String,
    ) -> anyhow::Result<Self>
    where
        S: AsRef<str>,
    {
        Ok(Self {
            client,
            url: Url::parse(url.as_ref()).context("Failed to parse URL")?,
            api_key,
        })
    }

    /// Returns the `images/generations` endpoint client.
    pub fn images(&self) -> Images<'_> {
        Images { api: self }
    }

    /// Downloads an image returned by the API.
    pub async fn download(&self, url: &str) -> Result<bytes::Bytes, ApiError> {
        debug!("Downloading generated image");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status,
                message: format!("failed to download {url}"),
            });
        }
        Ok(response.bytes().await?)
    }
}

/// Body of an image generation request.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct ImageRequest {
    /// The text prompt.
    pub prompt: String,
    /// Number of images to generate.
    pub n: u8,
    /// Output size, e.g. `1024x1024`.
    pub size: String,
}

impl ImageRequest {
    /// A request for `n` square images.
    pub fn new<S: Into<String>>(prompt: S, n: u8) -> Self {
        Self {
            prompt: prompt.into(),
            n,
            size: DEFAULT_SIZE.to_owned(),
        }
    }
}

/// A successful image generation response.
#[derive(Deserialize, Serialize, Default, Debug, Clone)]
pub struct ImageResponse {
    pub created: Option<i64>,
    pub data: Vec<ImageData>,
}

impl ImageResponse {
    /// URLs of the generated images, in order.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.data.iter().filter_map(|d| d.url.as_deref())
    }
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Default, Debug, Clone)]
pub struct ImageData {
    pub url: Option<String>,
    pub revised_prompt: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ErrorEnvelope {
    error: ErrorDetails,
}

#[derive(Deserialize, Debug)]
struct ErrorDetails {
    message: String,
}

/// Parses the message out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_owned())
}

/// Client for the `images/generations` endpoint.
pub struct Images<'a> {
    api: &'a Api,
}

impl Images<'_> {
    /// Sends an image generation request. A single attempt is made.
    pub async fn send(&self, request: &ImageRequest) -> Result<ImageResponse, ApiError> {
        let endpoint = self.api.url.join("images/generations")?;
        let response = self
            .api
            .client
            .post(endpoint)
            .bearer_auth(&self.api.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status,
                message: error_message(&body),
            });
        }

        let response: ImageResponse = serde_json::from_str(&body)?;
        if response.urls().next().is_none() {
            return Err(ApiError::MissingImage);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body() {
        let value = serde_json::to_value(ImageRequest::new("a fox", 3)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"prompt": "a fox", "n": 3, "size": "1024x1024"})
        );
    }

    #[test]
    fn safety_rejection_is_detected() {
        let body = r#"{"error": {"message": "Your request was rejected as a result of our safety system.", "type": "invalid_request_error"}}"#;
        let err = ApiError::Status {
            status: StatusCode::BAD_REQUEST,
            message: error_message(body),
        };
        assert!(err.is_safety_rejection());

        let err = ApiError::Status {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: error_message(r#"{"error": {"message": "Rate limit reached"}}"#),
        };
        assert!(!err.is_safety_rejection());
        assert_eq!(err.to_string(), "Status 429 Too Many Requests, Rate limit reached");
    }

    #[test]
    fn unparseable_error_body_is_kept() {
        assert_eq!(error_message("bad gateway"), "bad gateway");
    }

    #[test]
    fn urls_skip_entries_without_url() {
        let resp: ImageResponse = serde_json::from_str(
            r#"{"created": 1, "data": [{"url": "https://a/1.png"}, {"b64_json": "AAAA"}, {"url": "https://a/2.png"}]}"#,
        )
        .unwrap();
        assert_eq!(
            resp.urls().collect::<Vec<_>>(),
            vec!["https://a/1.png", "https://a/2.png"]
        );
    }

    mod http {
        use tokio::{
            io::{AsyncReadExt, AsyncWriteExt},
            net::{TcpListener, TcpStream},
            task::JoinHandle,
        };

        use super::*;

        /// Answers a single request with `status` and `body`, handing back the raw request.
        async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}/v1/", listener.local_addr().unwrap());
            let server = tokio::spawn(async move {
                let (mut socket, _) = listener.accept().await.unwrap();
                let request = read_request(&mut socket).await;
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
                request
            });
            (url, server)
        }

        async fn read_request(socket: &mut TcpStream) -> String {
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                request.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&request).into_owned();
                let Some(end) = text.find("\r\n\r\n") else {
                    assert!(n > 0, "connection closed mid request");
                    continue;
                };
                let length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if n == 0 || request.len() >= end + 4 + length {
                    return text;
                }
            }
        }

        fn api(url: &str) -> Api {
            Api::new_with_client_and_url(reqwest::Client::new(), url, "sk-test".to_owned()).unwrap()
        }

        #[tokio::test]
        async fn error_envelope_is_read_from_the_body() {
            let (url, server) = serve_once(
                "400 Bad Request",
                r#"{"error": {"message": "Your request was rejected as a result of our safety system.", "type": "invalid_request_error", "code": null}}"#,
            )
            .await;

            let err = api(&url)
                .images()
                .send(&ImageRequest::new("a fox", 2))
                .await
                .unwrap_err();

            match &err {
                ApiError::Status { status, message } => {
                    assert_eq!(*status, StatusCode::BAD_REQUEST);
                    assert_eq!(
                        message,
                        "Your request was rejected as a result of our safety system."
                    );
                }
                other => panic!("unexpected {other:?}"),
            }
            assert!(err.is_safety_rejection());

            let request = server.await.unwrap();
            assert!(request.starts_with("POST /v1/images/generations "));
            assert!(request.to_lowercase().contains("authorization: bearer sk-test"));
            assert!(request.contains(r#""prompt":"a fox""#));
        }

        #[tokio::test]
        async fn server_error_keeps_plain_body() {
            let (url, _server) = serve_once("500 Internal Server Error", "upstream timed out").await;

            let err = api(&url)
                .images()
                .send(&ImageRequest::new("a fox", 1))
                .await
                .unwrap_err();

            assert!(!err.is_safety_rejection());
            assert_eq!(
                err.to_string(),
                "Status 500 Internal Server Error, upstream timed out"
            );
        }

        #[tokio::test]
        async fn garbled_success_is_a_parse_error() {
            let (url, _server) = serve_once("200 OK", "<html>maintenance</html>").await;

            let err = api(&url)
                .images()
                .send(&ImageRequest::new("a fox", 1))
                .await
                .unwrap_err();

            assert!(matches!(err, ApiError::Parse(_)), "unexpected {err:?}");
        }

        #[tokio::test]
        async fn success_without_urls_is_missing_image() {
            let (url, _server) = serve_once("200 OK", r#"{"created": 1, "data": []}"#).await;

            let err = api(&url)
                .images()
                .send(&ImageRequest::new("a fox", 1))
                .await
                .unwrap_err();

            assert!(matches!(err, ApiError::MissingImage), "unexpected {err:?}");
        }

        #[tokio::test]
        async fn failed_download_reports_status() {
            let (url, _server) = serve_once("404 Not Found", "").await;

            let err = api(&url)
                .download(&format!("{url}img.png"))
                .await
                .unwrap_err();

            assert!(matches!(
                err,
                ApiError::Status { status: StatusCode::NOT_FOUND, .. }
            ));
        }
    }
}
