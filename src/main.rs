mod config;
mod encoder;
mod error;
mod gemini;
mod intake;
mod logger;
mod models;
mod orchestrator;
mod router;
mod session;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;

use config::load_or_init;
use gemini::HttpTransport;
use orchestrator::Orchestrator;
use router::{run_router, RouterState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let data_dir = config::data_dir()?;
  std::fs::create_dir_all(&data_dir)
    .with_context(|| format!("cannot create {}", data_dir.display()))?;

  let config_path = data_dir.join("config.json");
  let log_path = data_dir.join("placement-desk.log");

  let config = Arc::new(load_or_init(&config_path)?);
  let logger = Arc::new(logger::Logger::new(&log_path)?);
  logger.info("PlacementDesk starting up");

  if config.resolve_api_key().is_none() {
    logger.warn(&format!("{} is not set; generation will fail", config.api_key_env));
  }

  let listener = std::net::TcpListener::bind((config.host.as_str(), config.port))?;
  let addr = listener.local_addr()?;
  logger.info(&format!("listening on http://{addr}"));
  println!("PlacementDesk listening on http://{addr} (log: {})", log_path.display());

  let transport = Arc::new(HttpTransport::new(&config.api_base_url));
  let orchestrator = Arc::new(Orchestrator::new(config.clone(), transport, logger.clone()));

  let state = RouterState {
    started_at: Instant::now(),
    orchestrator: orchestrator.clone(),
    logger: logger.clone(),
  };

  let shutdown = async {
    let _ = tokio::signal::ctrl_c().await;
  };
  if let Err(err) = run_router(listener, state, shutdown).await {
    logger.error(&format!("router error: {err}"));
    eprintln!("router error: {err}");
  }

  orchestrator.shutdown();
  Ok(())
}
