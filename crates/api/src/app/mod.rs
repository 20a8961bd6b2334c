//! HTTP application wiring (Axum router + dispatcher).
//!
//! - `routes/`: the RPC handlers and the health check
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: RPC error kinds mapped onto HTTP responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use gatekeeper_infra::RequestDispatcher;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(dispatcher: Arc<RequestDispatcher>, api_token: Option<String>) -> Router {
    let auth_state = middleware::AuthState::new(api_token);

    // Protected routes: bearer token when one is configured.
    let protected = Router::new()
        .nest("/rpc", routes::router())
        .layer(Extension(dispatcher))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn(middleware::request_id_middleware)))
}
