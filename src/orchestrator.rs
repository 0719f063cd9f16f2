use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::encoder;
use crate::error::PlacementError;
use crate::gemini::{ClientConfig, GenerateTransport, GenerationClient};
use crate::intake::{self, ImageSlot, PreviewEntry, PreviewHandle, PreviewRegistry};
use crate::logger::Logger;
use crate::models::{SessionSnapshot, SlotSummary};
use crate::session::{GeneratedImage, GenerationTicket, Session};

/// Owns the session and wires intake, encoding and the generation client
/// together. All mutation of the session goes through here.
pub struct Orchestrator {
  session: Mutex<Session>,
  previews: PreviewRegistry,
  config: Arc<AppConfig>,
  transport: Arc<dyn GenerateTransport>,
  logger: Arc<Logger>,
}

impl Orchestrator {
  pub fn new(config: Arc<AppConfig>, transport: Arc<dyn GenerateTransport>, logger: Arc<Logger>) -> Self {
    Self {
      session: Mutex::new(Session::new()),
      previews: PreviewRegistry::new(),
      config,
      transport,
      logger,
    }
  }

  pub async fn snapshot(&self) -> SessionSnapshot {
    let session = self.session.lock().await;
    snapshot_of(&session)
  }

  /// Drag-and-drop style upload: raw bytes plus the declared content type.
  pub async fn select_bytes(
    &self,
    slot: ImageSlot,
    bytes: Vec<u8>,
    content_type: &str,
  ) -> Result<SessionSnapshot, PlacementError> {
    let mime = intake::check_image_mime(content_type)?;
    self.select(slot, bytes, &mime).await
  }

  /// Picker style selection of a local file.
  pub async fn select_path(&self, slot: ImageSlot, path: &Path) -> Result<SessionSnapshot, PlacementError> {
    let (bytes, mime) = intake::load_from_path(path).await?;
    self.select(slot, bytes, &mime).await
  }

  async fn select(&self, slot: ImageSlot, bytes: Vec<u8>, mime: &str) -> Result<SessionSnapshot, PlacementError> {
    let size = bytes.len();
    let image = self.previews.acquire(bytes, mime);
    let handle = image.preview;

    let mut session = self.session.lock().await;
    match session.select(slot, image) {
      Ok(previous) => {
        if let Some(previous) = previous {
          self.previews.release(previous.preview);
          self.logger.info(&format!("preview {} released", previous.preview));
        }
        self
          .logger
          .info(&format!("{} image selected ({mime}, {size} bytes)", slot.as_str()));
        Ok(snapshot_of(&session))
      }
      Err(err) => {
        self.previews.release(handle);
        Err(err)
      }
    }
  }

  /// Starts a generation in the background. `Ok(None)` means one is already
  /// pending and this call changed nothing.
  pub async fn generate(self: &Arc<Self>) -> Result<Option<JoinHandle<()>>, PlacementError> {
    let ticket = {
      let mut session = self.session.lock().await;
      match session.begin_generation() {
        Ok(Some(ticket)) => ticket,
        Ok(None) => return Ok(None),
        Err(err) => {
          self.logger.warn(&format!("generate rejected: {}", err.code()));
          return Err(err);
        }
      }
    };

    self
      .logger
      .info(&format!("generation {} started with model {}", ticket.attempt, self.config.model));
    let this = Arc::clone(self);
    Ok(Some(tokio::spawn(async move { this.run(ticket).await })))
  }

  async fn run(self: Arc<Self>, ticket: GenerationTicket) {
    let client = GenerationClient::new(
      ClientConfig {
        model: self.config.model.clone(),
        api_key: self.config.resolve_api_key(),
        missing_credential: self.config.missing_credential_message(),
      },
      self.transport.clone(),
    );
    let attempt = ticket.attempt;

    // The call runs in its own task so a panic still clears the loading flag.
    let worker = tokio::spawn(async move { client.generate(&ticket.character, &ticket.product).await });
    let outcome = match worker.await {
      Ok(outcome) => outcome.map(|data_uri| GeneratedImage { data_uri }),
      Err(err) => Err(PlacementError::Internal(err.to_string())),
    };

    match &outcome {
      Ok(_) => self.logger.info(&format!("generation {attempt} succeeded")),
      Err(err) => self
        .logger
        .error(&format!("generation {attempt} failed: {}: {err}", err.code())),
    }

    let mut session = self.session.lock().await;
    if !session.finish_generation(attempt, outcome) {
      self
        .logger
        .info(&format!("generation {attempt} finished after reset, result dropped"));
    }
  }

  pub async fn result(&self) -> Option<GeneratedImage> {
    self.session.lock().await.result().cloned()
  }

  /// Decoded result bytes and their MIME type.
  pub async fn download(&self) -> Result<Option<(String, Vec<u8>)>, PlacementError> {
    match self.result().await {
      Some(image) => encoder::decode_data_uri(&image.data_uri).map(Some),
      None => Ok(None),
    }
  }

  pub fn preview(&self, handle: PreviewHandle) -> Option<PreviewEntry> {
    self.previews.get(handle)
  }

  pub async fn reset(&self) -> SessionSnapshot {
    let mut session = self.session.lock().await;
    for handle in session.reset() {
      self.previews.release(handle);
    }
    self.logger.info("session reset");
    snapshot_of(&session)
  }

  /// Releases every preview handle still held.
  pub fn shutdown(&self) -> usize {
    let released = self.previews.release_all();
    self
      .logger
      .info(&format!("shutting down, released {released} previews"));
    released
  }

  pub fn config(&self) -> &AppConfig {
    &self.config
  }
}

fn snapshot_of(session: &Session) -> SessionSnapshot {
  SessionSnapshot {
    phase: session.phase(),
    is_loading: session.is_loading(),
    error: session.error().map(|e| e.to_string()),
    character: session.image(ImageSlot::Character).map(SlotSummary::from),
    product: session.image(ImageSlot::Product).map(SlotSummary::from),
    has_result: session.result().is_some(),
    can_generate: session.can_generate(),
  }
}
