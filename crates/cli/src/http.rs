//! `/metrics` and `/status` endpoints.

use std::sync::Arc;

use {
    axum::{
        Json, Router,
        extract::State,
        http::{StatusCode, header},
        response::{IntoResponse, Response},
        routing::get,
    },
    chanrelay_cursor::CursorStore,
    chanrelay_forward::Counters,
    chanrelay_metrics::MetricsHandle,
    serde_json::json,
    tokio::net::TcpListener,
    tokio_util::sync::CancellationToken,
    tracing::warn,
};

#[derive(Clone)]
pub struct HttpState {
    pub metrics: MetricsHandle,
    pub counters: Arc<Counters>,
    pub store: Arc<dyn CursorStore>,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: HttpState, cancel: CancellationToken) {
    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
    {
        warn!(error = %e, "metrics endpoint stopped");
    }
}

async fn metrics_handler(State(state): State<HttpState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}

async fn status_handler(State(state): State<HttpState>) -> Response {
    match state.store.list().await {
        Ok(cursors) => Json(json!({
            "counters": state.counters.snapshot(),
            "cursors": cursors,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
