use serde::Serialize;

use crate::error::PlacementError;
use crate::intake::{ImageSlot, PreviewHandle, UploadedImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
  Idle,
  Ready,
  Generating,
  Succeeded,
  Failed,
}

/// The generated composite, kept as a self-contained `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
  pub data_uri: String,
}

/// Inputs captured when an attempt starts; `attempt` ties the completion back
/// to the session that issued it.
#[derive(Debug, Clone)]
pub struct GenerationTicket {
  pub attempt: u64,
  pub character: UploadedImage,
  pub product: UploadedImage,
}

/// UI state record. `in_flight` is the single-slot lock for the one outstanding
/// service call; it outlives a reset until that call resolves, while
/// `is_loading` only reflects what the view shows.
#[derive(Debug, Default)]
pub struct Session {
  character: Option<UploadedImage>,
  product: Option<UploadedImage>,
  result: Option<GeneratedImage>,
  is_loading: bool,
  error: Option<String>,
  attempt: u64,
  in_flight: Option<u64>,
}

impl Session {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn phase(&self) -> Phase {
    let both = self.has_both_images();
    if self.is_loading {
      Phase::Generating
    } else if self.result.is_some() {
      Phase::Succeeded
    } else if self.error.is_some() && both {
      Phase::Failed
    } else if both {
      Phase::Ready
    } else {
      Phase::Idle
    }
  }

  fn has_both_images(&self) -> bool {
    self.character.is_some() && self.product.is_some()
  }

  pub fn image(&self, slot: ImageSlot) -> Option<&UploadedImage> {
    match slot {
      ImageSlot::Character => self.character.as_ref(),
      ImageSlot::Product => self.product.as_ref(),
    }
  }

  pub fn result(&self) -> Option<&GeneratedImage> {
    self.result.as_ref()
  }

  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }

  pub fn is_loading(&self) -> bool {
    self.is_loading
  }

  pub fn can_generate(&self) -> bool {
    !self.is_loading && self.in_flight.is_none() && self.has_both_images()
  }

  /// Stores a newly chosen image and returns the one it replaced so the caller
  /// can release its preview.
  pub fn select(
    &mut self,
    slot: ImageSlot,
    image: UploadedImage,
  ) -> Result<Option<UploadedImage>, PlacementError> {
    if self.is_loading {
      return Err(PlacementError::Busy);
    }
    let previous = match slot {
      ImageSlot::Character => self.character.replace(image),
      ImageSlot::Product => self.product.replace(image),
    };
    self.result = None;
    self.error = None;
    Ok(previous)
  }

  /// `Ok(None)` while a service call is still outstanding, including one
  /// orphaned by a reset: the action is disabled and nothing changes.
  pub fn begin_generation(&mut self) -> Result<Option<GenerationTicket>, PlacementError> {
    if self.is_loading || self.in_flight.is_some() {
      return Ok(None);
    }
    let (character, product) = match (&self.character, &self.product) {
      (Some(c), Some(p)) => (c.clone(), p.clone()),
      _ => {
        let err = PlacementError::missing_images();
        self.error = Some(err.to_string());
        return Err(err);
      }
    };

    self.attempt += 1;
    self.in_flight = Some(self.attempt);
    self.is_loading = true;
    self.error = None;
    self.result = None;
    Ok(Some(GenerationTicket {
      attempt: self.attempt,
      character,
      product,
    }))
  }

  /// Applies the outcome of `attempt` and frees the call slot. Returns false
  /// when the attempt was superseded by a reset and the outcome was dropped.
  pub fn finish_generation(
    &mut self,
    attempt: u64,
    outcome: Result<GeneratedImage, PlacementError>,
  ) -> bool {
    if self.in_flight == Some(attempt) {
      self.in_flight = None;
    }
    if !self.is_loading || attempt != self.attempt {
      return false;
    }
    self.is_loading = false;
    match outcome {
      Ok(image) => self.result = Some(image),
      Err(err) => self.error = Some(err.to_string()),
    }
    true
  }

  /// Start over. Returns the preview handles that are no longer owned. An
  /// outstanding call keeps its slot until it resolves.
  pub fn reset(&mut self) -> Vec<PreviewHandle> {
    let released = [self.character.take(), self.product.take()]
      .into_iter()
      .flatten()
      .map(|image| image.preview)
      .collect();
    self.result = None;
    self.error = None;
    self.is_loading = false;
    self.attempt += 1;
    released
  }
}
