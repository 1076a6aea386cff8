use crate::config::ServerConfig;
use crate::state::AppState;
use crate::{routes, websocket};
use axum::{
    http::HeaderValue,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

/// CORS for the configured origins; `*` allows any
pub fn cors_layer(config: &ServerConfig) -> CorsLayer {
    if config.cors_origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the Axum application
pub fn build_app(state: AppState, config: &ServerConfig) -> Router {
    // API routes
    let api_routes = Router::new()
        // Chat
        .route("/chat/message", post(routes::send_message))
        .route("/chat/session", post(routes::create_session))
        .route("/chat/history", get(routes::get_history))
        .route("/chat/history/:session_id", delete(routes::clear_history))
        .route("/chat/config", put(routes::update_session_config))
        .route("/chat/config/:session_id", get(routes::get_session_config))
        .route("/chat/sessions", get(routes::list_sessions))
        .route("/chat/stats/:session_id", get(routes::session_stats))
        .route("/chat/export", post(routes::export_session))
        .route("/chat/batch", post(routes::batch_chat))
        // Detectors
        .route("/detectors", get(routes::list_detectors))
        .route("/detectors/detect", post(routes::detect))
        .route("/detectors/test", post(routes::test_detector))
        .route("/detectors/batch", post(routes::batch_detect))
        .route("/detectors/stats", get(routes::detector_stats))
        .route("/detectors/presets", get(routes::list_presets))
        .route("/detectors/presets/:name", post(routes::apply_preset));

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .route("/ws", get(websocket::websocket_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(config))
        .with_state(state)
}
