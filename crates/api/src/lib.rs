//! HTTP API: configuration, routing and request/response mapping for the
//! enforcer RPC surface.

pub mod app;
pub mod config;
pub mod middleware;
