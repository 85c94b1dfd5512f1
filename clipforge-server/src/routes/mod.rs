use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{
    handle_websocket::status_websocket_handler,
    health_handler,
    records::{get_record_handler, list_collection_records_handler, playback_token_handler},
    uploads::upload_video_handler,
};
use crate::infra::app_state::AppState;

/// Build the application router.
pub fn create_app(state: AppState) -> Router {
    let max_upload_bytes = state.config.server.max_upload_bytes;
    let cors_layer = cors_layer(&state.config.server.cors_allowed_origins);

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/admin/uploads",
            post(upload_video_handler).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route(
            "/api/collections/{id}/records",
            get(list_collection_records_handler),
        )
        .route("/api/records/{id}", get(get_record_handler))
        .route(
            "/api/records/{id}/playback-token",
            get(playback_token_handler),
        )
        .route("/ws/status", get(status_websocket_handler))
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|s| HeaderValue::from_str(s).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
