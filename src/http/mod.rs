//! HTTP surface: the WebSocket admission endpoint plus auxiliary routes
//!
//! The auxiliary routes (search, counters, hello) sit behind the per-IP rate
//! limiter and share no state with the relay core.

use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::http::counters::Counters;
use crate::http::ip_limit::IpRateLimiter;
use crate::http::search::MarkerEntry;
use crate::relay::Hub;

pub mod counters;
pub mod ip_limit;
pub mod keepalive;
pub mod search;
pub mod ws;

/// State shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub dataset: Arc<Vec<MarkerEntry>>,
    pub counters: Arc<Counters>,
    pub ip_limiter: Arc<IpRateLimiter>,
}

/// Assemble the application router.
pub fn router(state: AppState) -> Router {
    let aux = Router::new()
        .route("/hello", get(hello))
        .route("/search", get(search::search_handler))
        .route("/counters", get(counters::counters_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            ip_limit::ip_limit_mw,
        ));

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .merge(aux)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn hello() -> &'static str {
    "Hello, AetherDraw Relay Server!"
}
