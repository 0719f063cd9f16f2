use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct AppConfig {
  pub model: String,
  pub api_base_url: String,
  pub api_key_env: String,
  pub api_key: Option<String>,
  pub host: String,
  pub port: u16,
  pub download_filename: String,
  pub max_upload_bytes: usize,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      model: "gemini-2.5-flash-image-preview".to_string(),
      api_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
      api_key_env: "API_KEY".to_string(),
      api_key: None,
      host: "127.0.0.1".to_string(),
      port: 0,
      download_filename: "generated-product-placement.png".to_string(),
      max_upload_bytes: 10 * 1024 * 1024,
    }
  }
}

impl AppConfig {
  /// Environment first, then the value stored in the config file. Blank
  /// values count as unset.
  pub fn resolve_api_key(&self) -> Option<String> {
    std::env::var(&self.api_key_env)
      .ok()
      .filter(|k| !k.trim().is_empty())
      .or_else(|| self.api_key.clone().filter(|k| !k.trim().is_empty()))
  }

  pub fn missing_credential_message(&self) -> String {
    format!("{} environment variable not set.", self.api_key_env)
  }

  pub fn redacted(&self) -> Self {
    Self {
      api_key: self.api_key.as_ref().map(|_| "********".to_string()),
      ..self.clone()
    }
  }
}

pub fn data_dir() -> anyhow::Result<PathBuf> {
  let base = dirs::data_dir()
    .or_else(dirs::home_dir)
    .context("missing app data dir")?;
  Ok(base.join("placement-desk"))
}

pub fn load_or_init(path: &Path) -> anyhow::Result<AppConfig> {
  if path.exists() {
    let data = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&data)
      .with_context(|| format!("invalid config file {}", path.display()))?;
    Ok(config)
  } else {
    let config = AppConfig::default();
    save_config(path, &config)?;
    Ok(config)
  }
}

pub fn save_config(path: &Path, config: &AppConfig) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(config)?;
  std::fs::write(path, json)?;
  Ok(())
}
