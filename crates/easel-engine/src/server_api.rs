//! Typed HTTP client for a running `server`-mode engine.
//!
//! The engine speaks an image-generation JSON schema: generation-style
//! endpoints take `{prompt, negative_prompt, width, height, n, seed, steps,
//! cfg_scale, sampler, …}` and return `{data: [{b64_json, revised_prompt?}]}`;
//! upscaling goes through the separate `extra-single-image` endpoint.
//! Parameters the engine only accepts out-of-band ride a sentinel-wrapped
//! JSON suffix on the prompt.

use base64::Engine as _;
use easel_core::status::JobType;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Sentinel pair wrapping the side-channel JSON appended to the prompt.
pub const SIDE_CHANNEL_OPEN: &str = "<sd_cpp_extra_args>";
pub const SIDE_CHANNEL_CLOSE: &str = "</sd_cpp_extra_args>";

/// HTTP client for a single engine endpoint.
pub struct EngineApi {
    client: reqwest::Client,
    api_url: String,
}

/// Request body for the generation-style endpoints.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub n: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    /// Engine-native name for `sample_steps`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cfg_scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampler: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    /// Base64 source image for edit/variation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Base64 inpaint mask.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
}

/// One image out of a generation response.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageDatum {
    pub b64_json: String,
    #[serde(default)]
    pub revised_prompt: Option<String>,
}

/// Response from the generation-style endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ImagesResponse {
    pub data: Vec<ImageDatum>,
}

/// Request body for the `extra-single-image` upscale endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct UpscaleRequest {
    /// Base64 source image.
    pub image: String,
    pub resize_mode: i64,
    pub upscaling_resize: f64,
    pub upscaler_1: String,
}

/// Response from the upscale endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UpscaleResponse {
    pub image: String,
}

impl EngineApi {
    /// Create a client for an engine at `api_url` (e.g. `http://127.0.0.1:8080`).
    pub fn new(api_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
        }
    }

    /// Create a client reusing an existing [`reqwest::Client`] for
    /// connection pooling across engines.
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    /// The generation-style path for a job type.
    ///
    /// Upscale is not a generation-style call; use [`EngineApi::upscale`].
    pub fn images_path(job_type: JobType) -> &'static str {
        match job_type {
            JobType::Generate => "/v1/images/generations",
            JobType::Edit => "/v1/images/edits",
            JobType::Variation => "/v1/images/variations",
            JobType::Upscale => "/sdapi/v1/extra-single-image",
        }
    }

    /// POST a generation-style request for `job_type`.
    pub async fn images(
        &self,
        job_type: JobType,
        request: &GenerationRequest,
    ) -> Result<ImagesResponse, EngineError> {
        let url = format!("{}{}", self.api_url, Self::images_path(job_type));
        let response = self.client.post(url).json(request).send().await?;
        Self::parse_response(response).await
    }

    /// POST an upscale request to the `extra-single-image` endpoint.
    pub async fn upscale(&self, request: &UpscaleRequest) -> Result<UpscaleResponse, EngineError> {
        let url = format!("{}{}", self.api_url, Self::images_path(JobType::Upscale));
        let response = self.client.post(url).json(request).send().await?;
        Self::parse_response(response).await
    }

    /// One readiness probe against the engine's health endpoint.
    pub async fn health(&self) -> Result<(), EngineError> {
        let response = self
            .client
            .get(format!("{}/health", self.api_url))
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    // ---- private helpers ----

    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, EngineError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(EngineError::EngineHttp {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, EngineError> {
        let response = Self::ensure_success(response).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| EngineError::EngineBadResponse(e.to_string()))
    }
}

/// Append the side-channel JSON to a prompt when there is anything to carry.
pub fn append_side_channel(prompt: &str, extra: &serde_json::Map<String, serde_json::Value>) -> String {
    if extra.is_empty() {
        return prompt.to_string();
    }
    let json = serde_json::Value::Object(extra.clone());
    format!("{prompt}{SIDE_CHANNEL_OPEN}{json}{SIDE_CHANNEL_CLOSE}")
}

/// Decode an engine's base64 image payload.
pub fn decode_b64_image(b64: &str) -> Result<Vec<u8>, EngineError> {
    base64::engine::general_purpose::STANDARD
        .decode(b64.trim())
        .map_err(|e| EngineError::EngineBadResponse(format!("invalid base64 image: {e}")))
}

/// Encode raw image bytes for an engine request.
pub fn encode_b64_image(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
