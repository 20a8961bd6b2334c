use axum::{routing::post, Router};

pub mod rpc;
pub mod system;

/// Router for the RPC calls, one POST route per call.
pub fn router() -> Router {
    Router::new()
        .route("/NewAdapter", post(rpc::new_adapter))
        .route("/NewEnforcer", post(rpc::new_enforcer))
        .route("/Enforce", post(rpc::enforce))
        .route("/LoadPolicy", post(rpc::load_policy))
        .route("/SavePolicy", post(rpc::save_policy))
        .route("/AddPolicy", post(rpc::add_policy))
        .route("/RemovePolicy", post(rpc::remove_policy))
        .route("/GetPolicy", post(rpc::get_policy))
        .route("/ListAdapters", post(rpc::list_adapters))
        .route("/ListEnforcers", post(rpc::list_enforcers))
}
