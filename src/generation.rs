//! Generative content provider: image and speech requests.
//!
//! This is a request/response seam used by the command line only; the room
//! messaging core never calls it. Each call makes exactly one request and
//! either returns a result or a single [`ChatError::GenerationFailed`].

use std::env;

use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::error::{ChatError, Result};

/// Style prefix applied to every image prompt.
pub const IMAGE_PROMPT_PREFIX: &str = "A serene, calming, guided meditation visual: ";

/// Something that can turn prompts into images and scripts into speech.
#[allow(async_fn_in_trait)]
pub trait ContentGenerator {
    /// Returns an image reference (a `data:` URI).
    async fn generate_image(&self, prompt: &str) -> Result<String>;

    /// Returns base64-encoded 16-bit little-endian PCM.
    async fn generate_speech(&self, script: &str) -> Result<String>;
}

// -- Imagen predict types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ImageInstance {
    pub prompt: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageOutputOptions {
    pub mime_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageParameters {
    pub sample_count: u32,
    pub aspect_ratio: String,
    pub output_options: ImageOutputOptions,
}

#[derive(Debug, Serialize)]
pub struct ImageRequest {
    pub instances: Vec<ImageInstance>,
    pub parameters: ImageParameters,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePrediction {
    #[serde(default)]
    pub bytes_base64_encoded: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ImageResponse {
    #[serde(default)]
    pub predictions: Vec<ImagePrediction>,
}

// -- generateContent (TTS) types ----------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechGenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechRequest {
    pub contents: Vec<Content>,
    pub generation_config: SpeechGenerationConfig,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}

#[derive(Debug, Deserialize)]
pub struct SpeechResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

// ---------------------------------------------------------------------------
// Request builders / response readers
// ---------------------------------------------------------------------------

fn require_text(input: &str, what: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ChatError::InvalidInput(format!("{what} is empty")));
    }
    Ok(trimmed.to_string())
}

/// Build the image request for `prompt`, applying the style prefix.
pub fn image_request(prompt: &str) -> Result<ImageRequest> {
    let prompt = require_text(prompt, "image prompt")?;
    Ok(ImageRequest {
        instances: vec![ImageInstance {
            prompt: format!("{IMAGE_PROMPT_PREFIX}{prompt}"),
        }],
        parameters: ImageParameters {
            sample_count: 1,
            aspect_ratio: "16:9".to_string(),
            output_options: ImageOutputOptions {
                mime_type: "image/jpeg".to_string(),
            },
        },
    })
}

/// Build the speech request for `script` spoken by `voice`.
pub fn speech_request(script: &str, voice: &str) -> Result<SpeechRequest> {
    let script = require_text(script, "speech script")?;
    Ok(SpeechRequest {
        contents: vec![Content {
            parts: vec![Part {
                text: Some(script),
                inline_data: None,
            }],
        }],
        generation_config: SpeechGenerationConfig {
            response_modalities: vec!["AUDIO".to_string()],
            speech_config: SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: voice.to_string(),
                    },
                },
            },
        },
    })
}

/// First generated image as a `data:` URI.
pub fn image_data_uri(response: &ImageResponse) -> Result<String> {
    response
        .predictions
        .iter()
        .find_map(|p| {
            p.bytes_base64_encoded
                .as_deref()
                .filter(|b| !b.is_empty())
                .map(|bytes| {
                    let mime = p.mime_type.as_deref().unwrap_or("image/jpeg");
                    format!("data:{mime};base64,{bytes}")
                })
        })
        .ok_or_else(|| ChatError::GenerationFailed("no image was generated".to_string()))
}

/// Base64 audio from the first candidate's first inline part.
pub fn speech_audio(response: &SpeechResponse) -> Result<String> {
    response
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .and_then(|c| c.parts.iter().find_map(|p| p.inline_data.as_ref()))
        .map(|d| d.data.clone())
        .filter(|d| !d.is_empty())
        .ok_or_else(|| ChatError::GenerationFailed("no audio was generated".to_string()))
}

// ---------------------------------------------------------------------------
// GeminiClient
// ---------------------------------------------------------------------------

pub struct GeminiClient {
    client: Client,
    api_key: String,
    config: GenerationConfig,
}

impl GeminiClient {
    pub fn new(api_key: String, config: GenerationConfig) -> Self {
        Self {
            client: Client::new(),
            api_key,
            config,
        }
    }

    /// Read the API key from the configured environment variable.
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let api_key = env::var(&config.api_key_env).map_err(|_| {
            ChatError::EnvironmentUnsupported(format!(
                "{} not set. Export it or pass via environment.",
                config.api_key_env
            ))
        })?;
        Ok(Self::new(api_key, config.clone()))
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}",
            self.config.base_url.trim_end_matches('/'),
            model,
            method
        )
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, url: &str, body: &B) -> Result<R> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| ChatError::GenerationFailed(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(%status, "provider returned an error");
            return Err(ChatError::GenerationFailed(format!("{status}: {text}")));
        }
        response
            .json::<R>()
            .await
            .map_err(|e| ChatError::GenerationFailed(format!("unreadable response: {e}")))
    }
}

impl ContentGenerator for GeminiClient {
    async fn generate_image(&self, prompt: &str) -> Result<String> {
        let request = image_request(prompt)?;
        let url = self.endpoint(&self.config.image_model, "predict");
        let response: ImageResponse = self.post(&url, &request).await?;
        image_data_uri(&response)
    }

    async fn generate_speech(&self, script: &str) -> Result<String> {
        let request = speech_request(script, &self.config.voice)?;
        let url = self.endpoint(&self.config.speech_model, "generateContent");
        let response: SpeechResponse = self.post(&url, &request).await?;
        speech_audio(&response)
    }
}
