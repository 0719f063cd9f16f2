use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::encoder;
use crate::error::PlacementError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSlot {
  Character,
  Product,
}

impl ImageSlot {
  pub fn parse(value: &str) -> Option<Self> {
    match value {
      "character" => Some(ImageSlot::Character),
      "product" => Some(ImageSlot::Product),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ImageSlot::Character => "character",
      ImageSlot::Product => "product",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreviewHandle(Uuid);

impl PreviewHandle {
  pub fn parse(value: &str) -> Option<Self> {
    Uuid::parse_str(value).ok().map(PreviewHandle)
  }

  pub fn url(&self) -> String {
    format!("/v1/previews/{}", self.0)
  }
}

impl std::fmt::Display for PreviewHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    self.0.fmt(f)
  }
}

/// An image chosen by the user. The preview handle belongs to whoever holds
/// this value and must be released through the registry when it is dropped
/// from the session.
#[derive(Debug, Clone)]
pub struct UploadedImage {
  pub bytes: Arc<[u8]>,
  pub mime_type: String,
  pub preview: PreviewHandle,
}

#[derive(Debug, Clone)]
pub struct PreviewEntry {
  pub mime_type: String,
  pub bytes: Arc<[u8]>,
}

/// Scoped displayable resources for uploaded images.
#[derive(Default)]
pub struct PreviewRegistry {
  entries: Mutex<HashMap<PreviewHandle, PreviewEntry>>,
}

impl PreviewRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn acquire(&self, bytes: Vec<u8>, mime_type: &str) -> UploadedImage {
    let bytes: Arc<[u8]> = bytes.into();
    let handle = PreviewHandle(Uuid::new_v4());
    let entry = PreviewEntry {
      mime_type: mime_type.to_string(),
      bytes: bytes.clone(),
    };
    if let Ok(mut entries) = self.entries.lock() {
      entries.insert(handle, entry);
    }
    UploadedImage {
      bytes,
      mime_type: mime_type.to_string(),
      preview: handle,
    }
  }

  pub fn get(&self, handle: PreviewHandle) -> Option<PreviewEntry> {
    self.entries.lock().ok()?.get(&handle).cloned()
  }

  pub fn release(&self, handle: PreviewHandle) -> bool {
    match self.entries.lock() {
      Ok(mut entries) => entries.remove(&handle).is_some(),
      Err(_) => false,
    }
  }

  pub fn release_all(&self) -> usize {
    match self.entries.lock() {
      Ok(mut entries) => {
        let count = entries.len();
        entries.clear();
        count
      }
      Err(_) => 0,
    }
  }

  pub fn len(&self) -> usize {
    self.entries.lock().map(|e| e.len()).unwrap_or(0)
  }
}

/// Mirrors the picker's `accept="image/*"` filter.
pub fn check_image_mime(content_type: &str) -> Result<String, PlacementError> {
  let mime = content_type
    .split(';')
    .next()
    .unwrap_or("")
    .trim()
    .to_ascii_lowercase();
  if mime.starts_with("image/") && mime.len() > "image/".len() {
    Ok(mime)
  } else {
    Err(PlacementError::Validation(format!(
      "Unsupported file type '{content_type}'. Please choose an image."
    )))
  }
}

pub fn mime_from_path(path: &Path) -> Result<String, PlacementError> {
  let ext = path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| e.to_ascii_lowercase())
    .unwrap_or_default();
  let mime = match ext.as_str() {
    "png" => "image/png",
    "jpg" | "jpeg" => "image/jpeg",
    "gif" => "image/gif",
    "webp" => "image/webp",
    "bmp" => "image/bmp",
    "heic" => "image/heic",
    "heif" => "image/heif",
    "avif" => "image/avif",
    "svg" => "image/svg+xml",
    "tif" | "tiff" => "image/tiff",
    "ico" => "image/x-icon",
    _ => {
      return Err(PlacementError::Validation(format!(
        "Unsupported file type for {}. Please choose an image.",
        path.display()
      )))
    }
  };
  Ok(mime.to_string())
}

/// Picker path: MIME from the extension, contents read asynchronously.
pub async fn load_from_path(path: &Path) -> Result<(Vec<u8>, String), PlacementError> {
  let mime = mime_from_path(path)?;
  let bytes = encoder::read_source(path).await?;
  Ok((bytes, mime))
}
