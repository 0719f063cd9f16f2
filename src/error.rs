use thiserror::Error;

pub const MISSING_IMAGES: &str = "Please upload both a character and a product image.";
pub const NO_IMAGE_PRODUCED: &str = "No image was generated. The model may have refused the prompt.";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlacementError {
  #[error("{0}")]
  Validation(String),
  #[error("{0}")]
  Configuration(String),
  #[error("Failed to read image: {0}")]
  Encoding(String),
  #[error("{0}")]
  Network(String),
  #[error("{}", NO_IMAGE_PRODUCED)]
  NoImageProduced,
  #[error("A generation is already in progress.")]
  Busy,
  #[error("An unknown error occurred: {0}")]
  Internal(String),
}

impl PlacementError {
  pub fn code(&self) -> &'static str {
    match self {
      PlacementError::Validation(_) => "validation_failed",
      PlacementError::Configuration(_) => "configuration_missing",
      PlacementError::Encoding(_) => "encoding_failed",
      PlacementError::Network(_) => "network_error",
      PlacementError::NoImageProduced => "no_image_produced",
      PlacementError::Busy => "generation_in_progress",
      PlacementError::Internal(_) => "internal_error",
    }
  }

  pub fn missing_images() -> Self {
    PlacementError::Validation(MISSING_IMAGES.to_string())
  }
}

impl From<reqwest::Error> for PlacementError {
  fn from(err: reqwest::Error) -> Self {
    PlacementError::Network(err.to_string())
  }
}
