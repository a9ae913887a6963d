use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use miette::IntoDiagnostic;
use tower_http::trace::TraceLayer;

use crate::edge::check::{self, CheckRequest, CheckResponse};
use crate::edge::store::Datastore;
use crate::errors::EdgeError;
use crate::settings;

pub fn router(store: Arc<Datastore>) -> Router {
    Router::new()
        .route("/v2/authorize", post(handle_check))
        .route("/v2/check", post(handle_check))
        .route("/healthz", get(health))
        .route("/readyz", get(ready))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

pub async fn serve(cfg: &settings::Server, store: Arc<Datastore>) -> miette::Result<()> {
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    tracing::info!(%addr, "Check API listening");
    axum::serve(listener, router(store)).await.into_diagnostic()?;
    Ok(())
}

// Readiness is checked before the body is parsed, so a cold cache answers
// 503 regardless of what was sent.
async fn handle_check(State(store): State<Arc<Datastore>>, body: Bytes) -> Response {
    if !store.is_ready() {
        return EdgeError::CacheNotReady.into_response();
    }

    let req: CheckRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => return EdgeError::InvalidRequest(e.to_string()).into_response(),
    };

    match check::evaluate(store.as_ref(), &req).await {
        Ok(verdict) => Json(CheckResponse::from(verdict)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn ready(State(store): State<Arc<Datastore>>) -> Response {
    if store.is_ready() {
        (StatusCode::OK, "ready").into_response()
    } else {
        EdgeError::CacheNotReady.into_response()
    }
}
