//! Axum router construction for the SensorHub server.
//!
//! Assembles the `WebSocket` route and the static dashboard into a single
//! [`Router`] with CORS and HTTP tracing middleware.

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::ws;

/// File served at `/`.
pub const INDEX_FILE: &str = "index.html";

/// Build the complete Axum router.
///
/// The router includes:
/// - `GET /` -- `index.html` from the static directory
/// - `GET /ws` -- `WebSocket` reading stream
/// - `GET /static/*` -- everything else in the static directory
///
/// A missing `index.html` yields `404`, not a startup failure.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let index = ServeFile::new(state.static_dir.join(INDEX_FILE));
    let assets = ServeDir::new(&state.static_dir);

    Router::new()
        .route_service("/", index)
        .route("/ws", get(ws::ws_subscribe))
        .nest_service("/static", assets)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
