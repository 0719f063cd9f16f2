use std::path::Path;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::PlacementError;

/// Inline payload sent to the model: MIME type plus standard, padded base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedImagePart {
  pub mime_type: String,
  pub data: String,
}

pub fn encode(bytes: &[u8], mime_type: &str) -> EncodedImagePart {
  EncodedImagePart {
    mime_type: mime_type.to_string(),
    data: base64::engine::general_purpose::STANDARD.encode(bytes),
  }
}

/// Reads an image source without blocking the runtime.
pub async fn read_source(path: &Path) -> Result<Vec<u8>, PlacementError> {
  tokio::fs::read(path)
    .await
    .map_err(|err| PlacementError::Encoding(format!("{}: {err}", path.display())))
}

pub fn to_data_uri(part: &EncodedImagePart) -> String {
  format!("data:{};base64,{}", part.mime_type, part.data)
}

/// Splits a `data:<mime>;base64,<payload>` URI and decodes the payload.
pub fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>), PlacementError> {
  let rest = uri
    .strip_prefix("data:")
    .ok_or_else(|| PlacementError::Encoding("not a data URI".to_string()))?;
  let (header, payload) = rest
    .split_once(',')
    .ok_or_else(|| PlacementError::Encoding("data URI has no payload".to_string()))?;
  let mime_type = header
    .strip_suffix(";base64")
    .ok_or_else(|| PlacementError::Encoding("data URI is not base64".to_string()))?;

  let bytes = base64::engine::general_purpose::STANDARD
    .decode(payload)
    .map_err(|err| PlacementError::Encoding(err.to_string()))?;
  Ok((mime_type.to_string(), bytes))
}
