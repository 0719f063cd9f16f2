use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::encoder::{self, EncodedImagePart};
use crate::error::PlacementError;
use crate::intake::UploadedImage;

/// Sent after the two images on every request.
pub const PLACEMENT_INSTRUCTION: &str = "Take the character from the first image and have them use or interact with the product from the second image. \
It is crucial that you maintain the exact art style, proportions, and size of the original character image. \
The final output image must have the same dimensions and aspect ratio as the first input image.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
  Image,
  Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub text: Option<String>,
  #[serde(default, alias = "inline_data", skip_serializing_if = "Option::is_none")]
  pub inline_data: Option<EncodedImagePart>,
}

impl Part {
  fn inline(data: EncodedImagePart) -> Self {
    Self {
      text: None,
      inline_data: Some(data),
    }
  }

  fn text(text: &str) -> Self {
    Self {
      text: Some(text.to_string()),
      inline_data: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub role: Option<String>,
  #[serde(default)]
  pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
  pub response_modalities: Vec<Modality>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
  pub contents: Vec<Content>,
  pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Candidate {
  #[serde(default)]
  pub content: Option<Content>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateContentResponse {
  #[serde(default)]
  pub candidates: Vec<Candidate>,
}

/// One request/response round trip to the generative service.
#[async_trait]
pub trait GenerateTransport: Send + Sync {
  async fn generate_content(
    &self,
    model: &str,
    api_key: &str,
    request: &GenerateContentRequest,
  ) -> Result<GenerateContentResponse, PlacementError>;
}

pub struct HttpTransport {
  client: reqwest::Client,
  base_url: String,
}

impl HttpTransport {
  pub fn new(base_url: &str) -> Self {
    Self {
      client: reqwest::Client::new(),
      base_url: base_url.trim_end_matches('/').to_string(),
    }
  }

  fn endpoint(&self, model: &str) -> String {
    format!("{}/models/{}:generateContent", self.base_url, model)
  }
}

#[async_trait]
impl GenerateTransport for HttpTransport {
  async fn generate_content(
    &self,
    model: &str,
    api_key: &str,
    request: &GenerateContentRequest,
  ) -> Result<GenerateContentResponse, PlacementError> {
    let resp = self
      .client
      .post(self.endpoint(model))
      .header("x-goog-api-key", api_key)
      .json(request)
      .send()
      .await?;

    if !resp.status().is_success() {
      let upstream_status = resp.status();
      let text = resp
        .text()
        .await
        .unwrap_or_else(|_| "Gemini request failed.".to_string());
      return Err(PlacementError::Network(format!(
        "Gemini error ({}): {}",
        upstream_status, text
      )));
    }

    let body = resp.json::<GenerateContentResponse>().await?;
    Ok(body)
  }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
  pub model: String,
  pub api_key: Option<String>,
  /// Reported as a configuration error when `api_key` is absent or blank.
  pub missing_credential: String,
}

pub struct GenerationClient {
  config: ClientConfig,
  transport: Arc<dyn GenerateTransport>,
}

impl GenerationClient {
  pub fn new(config: ClientConfig, transport: Arc<dyn GenerateTransport>) -> Self {
    Self { config, transport }
  }

  /// Character first, product second; the order is part of the contract.
  pub async fn generate(
    &self,
    character: &UploadedImage,
    product: &UploadedImage,
  ) -> Result<String, PlacementError> {
    let api_key = match self.config.api_key.as_deref() {
      Some(key) if !key.trim().is_empty() => key,
      _ => {
        return Err(PlacementError::Configuration(
          self.config.missing_credential.clone(),
        ))
      }
    };

    let request = build_request(
      encoder::encode(&character.bytes, &character.mime_type),
      encoder::encode(&product.bytes, &product.mime_type),
    );
    let response = self
      .transport
      .generate_content(&self.config.model, api_key, &request)
      .await?;
    first_image_uri(&response).ok_or(PlacementError::NoImageProduced)
  }
}

pub fn build_request(character: EncodedImagePart, product: EncodedImagePart) -> GenerateContentRequest {
  GenerateContentRequest {
    contents: vec![Content {
      role: Some("user".to_string()),
      parts: vec![
        Part::inline(character),
        Part::inline(product),
        Part::text(PLACEMENT_INSTRUCTION),
      ],
    }],
    generation_config: GenerationConfig {
      response_modalities: vec![Modality::Image, Modality::Text],
    },
  }
}

/// First inline image of the first candidate, as a data URI. Later image parts
/// are ignored.
pub fn first_image_uri(response: &GenerateContentResponse) -> Option<String> {
  let parts = response
    .candidates
    .first()
    .and_then(|c| c.content.as_ref())
    .map(|c| c.parts.as_slice())
    .unwrap_or(&[]);
  parts
    .iter()
    .find_map(|p| p.inline_data.as_ref())
    .map(encoder::to_data_uri)
}
