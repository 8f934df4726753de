//! Router construction and server host.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::{header::CONTENT_TYPE, HeaderName, HeaderValue, Method, Request},
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn, Span};

use crate::config::CorsConfig;
use crate::http::handlers::{
    compress_image, compress_image_batch, compress_pdf, compress_pdf_advanced,
    compress_pdf_batch, convert_image, convert_image_batch, pdf_to_word_handler, rotate_pdf,
    split_pdf, word_to_pdf_handler,
};
use crate::http::health::health;
use crate::http::response::{
    HEADER_BATCH_ERRORS, HEADER_BATCH_FAILED, HEADER_BATCH_SUCCEEDED, HEADER_BATCH_TOTAL,
};
use crate::http::AppState;

/// Builds the full application router around `state`.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.body_limit();
    let cors_layer = cors_layer(&state.config.cors);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                route = %request.uri().path(),
                status_code = tracing::field::Empty,
                latency_ms = tracing::field::Empty,
            )
        })
        .on_request(|_request: &Request<_>, _span: &Span| {})
        .on_response(
            |response: &axum::response::Response, latency: Duration, span: &Span| {
                span.record("status_code", response.status().as_u16());
                let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                span.record("latency_ms", latency_ms);
            },
        );

    Router::new()
        .route("/health", get(health))
        .nest("/api/pdf", pdf_routes())
        .nest("/api/image", image_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(ServiceBuilder::new().layer(trace_layer).layer(cors_layer))
        .with_state(state)
}

fn pdf_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/compress", post(compress_pdf))
        .route("/compress-advanced", post(compress_pdf_advanced))
        .route("/compress-batch", post(compress_pdf_batch))
        .route("/split", post(split_pdf))
        .route("/rotate", post(rotate_pdf))
        .route("/pdf-to-word", post(pdf_to_word_handler))
        .route("/word-to-pdf", post(word_to_pdf_handler))
}

fn image_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/convert", post(convert_image))
        .route("/convert-batch", post(convert_image_batch))
        .route("/compress", post(compress_image))
        .route("/compress-batch", post(compress_image_batch))
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .expose_headers([
            HeaderName::from_static(HEADER_BATCH_TOTAL),
            HeaderName::from_static(HEADER_BATCH_SUCCEEDED),
            HeaderName::from_static(HEADER_BATCH_FAILED),
            HeaderName::from_static(HEADER_BATCH_ERRORS),
            axum::http::header::CONTENT_DISPOSITION,
        ]);

    if config.allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Binds the configured address and serves until `shutdown` resolves.
pub async fn serve<F>(state: Arc<AppState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = state.config.bind_address;
    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, "Listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
