use std::future::Future;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::error::PlacementError;
use crate::intake::{ImageSlot, PreviewHandle};
use crate::logger::Logger;
use crate::models::{ConfigResponse, GenerateQuery, ResultResponse, SelectPathRequest};
use crate::orchestrator::Orchestrator;

pub struct RouterState {
  pub started_at: Instant,
  pub orchestrator: Arc<Orchestrator>,
  pub logger: Arc<Logger>,
}

/// Only pages served from the service's own loopback address may read
/// responses cross-origin.
pub fn loopback_origins(port: u16) -> Vec<HeaderValue> {
  [format!("http://127.0.0.1:{port}"), format!("http://localhost:{port}")]
    .iter()
    .filter_map(|origin| HeaderValue::from_str(origin).ok())
    .collect()
}

pub fn build_router(state: RouterState, max_upload_bytes: usize, origins: Vec<HeaderValue>) -> Router {
  Router::new()
    .route("/health", get(health))
    .route("/v1/config", get(config))
    .route("/v1/session", get(session))
    .route("/v1/images/:slot", axum::routing::put(upload_image))
    .route("/v1/images/:slot/path", post(select_image_path))
    .route("/v1/previews/:id", get(preview))
    .route("/v1/generate", post(generate))
    .route("/v1/result", get(result))
    .route("/v1/result/download", get(download))
    .route("/v1/reset", post(reset))
    .layer(DefaultBodyLimit::max(max_upload_bytes))
    .layer(
      CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any),
    )
    .with_state(Arc::new(state))
}

pub async fn run_router(
  listener: TcpListener,
  state: RouterState,
  shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
  let max_upload_bytes = state.orchestrator.config().max_upload_bytes;
  let port = listener.local_addr()?.port();
  let app = build_router(state, max_upload_bytes, loopback_origins(port));

  listener.set_nonblocking(true)?;
  let listener = tokio::net::TcpListener::from_std(listener)?;
  axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
  Ok(())
}

async fn health(State(state): State<Arc<RouterState>>) -> Json<serde_json::Value> {
  let uptime = state.started_at.elapsed().as_millis();
  Json(serde_json::json!({
    "status": "ok",
    "version": env!("CARGO_PKG_VERSION"),
    "uptime_ms": uptime
  }))
}

async fn config(State(state): State<Arc<RouterState>>) -> Json<ConfigResponse> {
  let config = state.orchestrator.config();
  Json(ConfigResponse {
    config: config.redacted(),
    credential_present: config.resolve_api_key().is_some(),
  })
}

async fn session(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
  Json(state.orchestrator.snapshot().await)
}

async fn upload_image(
  State(state): State<Arc<RouterState>>,
  Path(slot): Path<String>,
  headers: HeaderMap,
  body: Bytes,
) -> Response {
  let slot = match parse_slot(&slot) {
    Ok(slot) => slot,
    Err(resp) => return resp,
  };
  let content_type = headers
    .get(CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .unwrap_or("");

  match state
    .orchestrator
    .select_bytes(slot, body.to_vec(), content_type)
    .await
  {
    Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
    Err(err) => placement_error_response(&state.logger, &err),
  }
}

async fn select_image_path(
  State(state): State<Arc<RouterState>>,
  Path(slot): Path<String>,
  Json(req): Json<SelectPathRequest>,
) -> Response {
  let slot = match parse_slot(&slot) {
    Ok(slot) => slot,
    Err(resp) => return resp,
  };
  let path = PathBuf::from(req.path);

  match state.orchestrator.select_path(slot, &path).await {
    Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
    Err(err) => placement_error_response(&state.logger, &err),
  }
}

async fn preview(State(state): State<Arc<RouterState>>, Path(id): Path<String>) -> Response {
  let entry = PreviewHandle::parse(&id).and_then(|handle| state.orchestrator.preview(handle));
  match entry {
    Some(entry) => ([(CONTENT_TYPE, entry.mime_type)], entry.bytes.to_vec()).into_response(),
    None => error_response(StatusCode::NOT_FOUND, "preview_missing", "Preview not found."),
  }
}

async fn generate(State(state): State<Arc<RouterState>>, Query(query): Query<GenerateQuery>) -> Response {
  match state.orchestrator.generate().await {
    Ok(Some(task)) => {
      if query.wait {
        if let Err(err) = task.await {
          state.logger.error(&format!("generation task join failed: {err}"));
        }
      }
      (StatusCode::ACCEPTED, Json(state.orchestrator.snapshot().await)).into_response()
    }
    Ok(None) => error_response(
      StatusCode::CONFLICT,
      PlacementError::Busy.code(),
      &PlacementError::Busy.to_string(),
    ),
    Err(err) => placement_error_response(&state.logger, &err),
  }
}

async fn result(State(state): State<Arc<RouterState>>) -> Response {
  match state.orchestrator.result().await {
    Some(image) => {
      let mime_type = image
        .data_uri
        .strip_prefix("data:")
        .and_then(|rest| rest.split(';').next())
        .unwrap_or("")
        .to_string();
      Json(ResultResponse {
        data_uri: image.data_uri,
        mime_type,
      })
      .into_response()
    }
    None => error_response(StatusCode::NOT_FOUND, "result_missing", "No generated image yet."),
  }
}

async fn download(State(state): State<Arc<RouterState>>) -> Response {
  match state.orchestrator.download().await {
    Ok(Some((mime_type, bytes))) => {
      let disposition = format!(
        "attachment; filename=\"{}\"",
        state.orchestrator.config().download_filename
      );
      ([(CONTENT_TYPE, mime_type), (CONTENT_DISPOSITION, disposition)], bytes).into_response()
    }
    Ok(None) => error_response(StatusCode::NOT_FOUND, "result_missing", "No generated image yet."),
    Err(err) => placement_error_response(&state.logger, &err),
  }
}

async fn reset(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
  Json(state.orchestrator.reset().await)
}

fn parse_slot(value: &str) -> Result<ImageSlot, Response> {
  ImageSlot::parse(value).ok_or_else(|| {
    error_response(
      StatusCode::NOT_FOUND,
      "slot_unknown",
      "Image slot must be 'character' or 'product'.",
    )
  })
}

fn status_for(err: &PlacementError) -> StatusCode {
  match err {
    PlacementError::Validation(_) | PlacementError::Encoding(_) => StatusCode::BAD_REQUEST,
    PlacementError::Configuration(_) | PlacementError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    PlacementError::Network(_) | PlacementError::NoImageProduced => StatusCode::BAD_GATEWAY,
    PlacementError::Busy => StatusCode::CONFLICT,
  }
}

fn placement_error_response(logger: &Logger, err: &PlacementError) -> Response {
  logger.warn(&format!("request failed: {}: {err}", err.code()));
  error_response(status_for(err), err.code(), &err.to_string())
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
  let body = Json(serde_json::json!({ "error": message, "code": code }));
  (status, body).into_response()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::gemini::tests::FakeTransport;
  use crate::gemini::GenerateTransport;
  use crate::orchestrator::tests::test_config;

  struct TestServer {
    base: String,
    client: reqwest::Client,
    _dir: tempfile::TempDir,
  }

  impl TestServer {
    fn url(&self, path: &str) -> String {
      format!("{}{}", self.base, path)
    }
  }

  async fn spawn_server(key: Option<&str>, transport: Arc<dyn GenerateTransport>) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let logger = Arc::new(Logger::new(&dir.path().join("router.log")).unwrap());
    let orchestrator = Arc::new(Orchestrator::new(
      Arc::new(test_config(key)),
      transport,
      logger.clone(),
    ));
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let state = RouterState {
      started_at: Instant::now(),
      orchestrator,
      logger,
    };
    tokio::spawn(async move {
      let _ = run_router(listener, state, std::future::pending()).await;
    });

    TestServer {
      base: format!("http://127.0.0.1:{port}"),
      client: reqwest::Client::new(),
      _dir: dir,
    }
  }

  async fn upload(server: &TestServer, slot: &str, mime: &str, body: &'static [u8]) -> reqwest::Response {
    server
      .client
      .put(server.url(&format!("/v1/images/{slot}")))
      .header("content-type", mime)
      .body(body)
      .send()
      .await
      .unwrap()
  }

  #[test]
  fn status_mapping() {
    assert_eq!(status_for(&PlacementError::missing_images()), StatusCode::BAD_REQUEST);
    assert_eq!(status_for(&PlacementError::NoImageProduced), StatusCode::BAD_GATEWAY);
    assert_eq!(status_for(&PlacementError::Busy), StatusCode::CONFLICT);
  }

  #[tokio::test]
  async fn full_flow_over_http() {
    let server = spawn_server(
      Some("test-key"),
      Arc::new(FakeTransport::returning_image("image/png", "iVBORw==")),
    )
    .await;

    let health: serde_json::Value = server
      .client
      .get(server.url("/health"))
      .send()
      .await
      .unwrap()
      .json()
      .await
      .unwrap();
    assert_eq!(health["status"], "ok");

    let resp = upload(&server, "character", "image/png", b"char").await;
    assert_eq!(resp.status(), 200);
    let snapshot: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(snapshot["phase"], "idle");
    let preview_url = snapshot["character"]["preview_url"].as_str().unwrap().to_string();

    let preview = server.client.get(server.url(&preview_url)).send().await.unwrap();
    assert_eq!(preview.headers()["content-type"], "image/png");
    assert_eq!(preview.bytes().await.unwrap().as_ref(), b"char");

    let snapshot: serde_json::Value = upload(&server, "product", "image/jpeg", b"prod")
      .await
      .json()
      .await
      .unwrap();
    assert_eq!(snapshot["phase"], "ready");
    assert_eq!(snapshot["can_generate"], true);

    let resp = server
      .client
      .post(server.url("/v1/generate?wait=true"))
      .send()
      .await
      .unwrap();
    assert_eq!(resp.status(), 202);
    let snapshot: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(snapshot["phase"], "succeeded");

    let result: serde_json::Value = server
      .client
      .get(server.url("/v1/result"))
      .send()
      .await
      .unwrap()
      .json()
      .await
      .unwrap();
    assert_eq!(result["data_uri"], "data:image/png;base64,iVBORw==");
    assert_eq!(result["mime_type"], "image/png");

    let download = server
      .client
      .get(server.url("/v1/result/download"))
      .send()
      .await
      .unwrap();
    assert_eq!(download.status(), 200);
    assert_eq!(
      download.headers()["content-disposition"],
      "attachment; filename=\"generated-product-placement.png\""
    );
    assert_eq!(download.bytes().await.unwrap().as_ref(), &[0x89, b'P', b'N', b'G']);

    let snapshot: serde_json::Value = server
      .client
      .post(server.url("/v1/reset"))
      .send()
      .await
      .unwrap()
      .json()
      .await
      .unwrap();
    assert_eq!(snapshot["phase"], "idle");
    assert!(snapshot["character"].is_null());

    let gone = server.client.get(server.url(&preview_url)).send().await.unwrap();
    assert_eq!(gone.status(), 404);
    let no_result = server.client.get(server.url("/v1/result")).send().await.unwrap();
    assert_eq!(no_result.status(), 404);
  }

  #[tokio::test]
  async fn generate_without_images_is_rejected() {
    let transport = Arc::new(FakeTransport::returning_image("image/png", "AA=="));
    let server = spawn_server(Some("test-key"), transport.clone()).await;

    let resp = server
      .client
      .post(server.url("/v1/generate"))
      .send()
      .await
      .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "validation_failed");
    assert_eq!(body["error"], crate::error::MISSING_IMAGES);
    assert_eq!(transport.call_count(), 0);
  }

  #[tokio::test]
  async fn non_image_upload_and_unknown_slot() {
    let server = spawn_server(
      Some("test-key"),
      Arc::new(FakeTransport::returning_image("image/png", "AA==")),
    )
    .await;

    let resp = upload(&server, "character", "text/plain", b"hello").await;
    assert_eq!(resp.status(), 400);

    let resp = upload(&server, "background", "image/png", b"x").await;
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "slot_unknown");
  }

  #[tokio::test]
  async fn config_hides_stored_credential() {
    let server = spawn_server(
      Some("secret-key"),
      Arc::new(FakeTransport::returning_image("image/png", "AA==")),
    )
    .await;

    let body: serde_json::Value = server
      .client
      .get(server.url("/v1/config"))
      .send()
      .await
      .unwrap()
      .json()
      .await
      .unwrap();
    assert_eq!(body["api_key"], "********");
    assert_eq!(body["credential_present"], true);
    assert_eq!(body["model"], "gemini-2.5-flash-image-preview");
  }

  async fn preflight(server: &TestServer, origin: &str) -> reqwest::Response {
    server
      .client
      .request(reqwest::Method::OPTIONS, server.url("/v1/images/character/path"))
      .header("origin", origin)
      .header("access-control-request-method", "POST")
      .header("access-control-request-headers", "content-type")
      .send()
      .await
      .unwrap()
  }

  #[tokio::test]
  async fn foreign_origins_get_no_cors_grant() {
    let server = spawn_server(
      Some("test-key"),
      Arc::new(FakeTransport::returning_image("image/png", "AA==")),
    )
    .await;

    let resp = preflight(&server, "https://evil.example").await;
    assert!(resp.headers().get("access-control-allow-origin").is_none());

    let resp = server
      .client
      .get(server.url("/v1/session"))
      .header("origin", "https://evil.example")
      .send()
      .await
      .unwrap();
    assert!(resp.headers().get("access-control-allow-origin").is_none());

    let own = server.base.clone();
    let resp = preflight(&server, &own).await;
    assert_eq!(resp.headers()["access-control-allow-origin"], own.as_str());
  }

  #[test]
  fn loopback_origins_cover_both_hostnames() {
    let origins = loopback_origins(4711);
    assert_eq!(origins, vec![
      HeaderValue::from_static("http://127.0.0.1:4711"),
      HeaderValue::from_static("http://localhost:4711"),
    ]);
  }

  #[tokio::test]
  async fn select_by_path() {
    let server = spawn_server(
      Some("test-key"),
      Arc::new(FakeTransport::returning_image("image/png", "AA==")),
    )
    .await;
    let path = server._dir.path().join("product.webp");
    std::fs::write(&path, b"webp").unwrap();

    let resp = server
      .client
      .post(server.url("/v1/images/product/path"))
      .json(&serde_json::json!({ "path": path.display().to_string() }))
      .send()
      .await
      .unwrap();
    assert_eq!(resp.status(), 200);
    let snapshot: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(snapshot["product"]["mime_type"], "image/webp");
    assert_eq!(snapshot["product"]["size"], 4);
  }
}
