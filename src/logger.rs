use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
  Info,
  Warn,
  Error,
}

impl Level {
  fn as_str(&self) -> &'static str {
    match self {
      Level::Info => "INFO",
      Level::Warn => "WARN",
      Level::Error => "ERROR",
    }
  }
}

/// Session log shared by the router and the orchestrator. Never receives
/// credentials or image payloads.
pub struct Logger {
  file: Mutex<std::fs::File>,
}

impl Logger {
  pub fn new(path: &Path) -> anyhow::Result<Self> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Self {
      file: Mutex::new(file),
    })
  }

  pub fn log(&self, level: Level, message: &str) {
    let line = format!("[{}] {}: {message}\n", Utc::now().to_rfc3339(), level.as_str());
    if let Ok(mut file) = self.file.lock() {
      let _ = file.write_all(line.as_bytes());
    }
  }

  pub fn info(&self, message: &str) {
    self.log(Level::Info, message);
  }

  pub fn warn(&self, message: &str) {
    self.log(Level::Warn, message);
  }

  pub fn error(&self, message: &str) {
    self.log(Level::Error, message);
  }
}
