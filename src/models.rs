use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::intake::UploadedImage;
use crate::session::Phase;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SlotSummary {
  pub mime_type: String,
  pub size: usize,
  pub preview_url: String,
}

impl From<&UploadedImage> for SlotSummary {
  fn from(image: &UploadedImage) -> Self {
    Self {
      mime_type: image.mime_type.clone(),
      size: image.bytes.len(),
      preview_url: image.preview.url(),
    }
  }
}

#[derive(Serialize, Clone, Debug)]
pub struct SessionSnapshot {
  pub phase: Phase,
  pub is_loading: bool,
  pub error: Option<String>,
  pub character: Option<SlotSummary>,
  pub product: Option<SlotSummary>,
  pub has_result: bool,
  pub can_generate: bool,
}

#[derive(Serialize, Deserialize)]
pub struct SelectPathRequest {
  pub path: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ResultResponse {
  pub data_uri: String,
  pub mime_type: String,
}

#[derive(Serialize, Deserialize, Default)]
pub struct GenerateQuery {
  #[serde(default)]
  pub wait: bool,
}

#[derive(Serialize)]
pub struct ConfigResponse {
  #[serde(flatten)]
  pub config: AppConfig,
  pub credential_present: bool,
}
