pub mod api;
pub mod db;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use sqlx::migrate::Migrator;
use sqlx::SqlitePool;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

fn cors_origin_values() -> Vec<HeaderValue> {
    std::env::var("FRONTDESK_CORS_ORIGINS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect()
}

fn build_cors_layer() -> CorsLayer {
    let origins = cors_origin_values();
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE]);
    if origins.is_empty() {
        tracing::debug!("no CORS origins configured; browser consoles must be same-origin");
        layer
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

pub fn router(pool: SqlitePool) -> Router {
    Router::new()
        .route("/", get(|| async { "Frontdesk Gateway Online" }))
        .route("/health", get(api::health))
        .route("/v1/calls", get(api::list_calls).post(api::create_call))
        .route("/v1/calls/:id", get(api::get_call).patch(api::update_call))
        .route(
            "/v1/calls/:id/signals",
            get(api::list_signals)
                .post(api::append_signal)
                .delete(api::clear_signals),
        )
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
        .with_state(pool)
}
