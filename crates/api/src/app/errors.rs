use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use gatekeeper_core::{ErrorKind, RpcError};

/// HTTP status for each RPC error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArgument
        | ErrorKind::UnsupportedDriver
        | ErrorKind::ParamType
        | ErrorKind::ArityMismatch
        | ErrorKind::Policy => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::ModelParse | ErrorKind::EnforcerInit | ErrorKind::Evaluation => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorKind::AdapterInit | ErrorKind::PolicyLoad | ErrorKind::PolicySave => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn rpc_error_to_response(err: RpcError) -> axum::response::Response {
    let kind = err.kind();
    json_error(status_for(kind), kind.code(), err.message)
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
