//! Handlers for the `/rpc/<Call>` routes. Each one unpacks its body, calls the
//! dispatcher and maps the outcome to JSON.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::{Extension, FromRequest, Request};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;

use gatekeeper_core::{RpcError, RpcResult};
use gatekeeper_infra::RequestDispatcher;

use crate::app::{dto, errors};

type Dispatcher = Extension<Arc<RequestDispatcher>>;

/// `Json` whose rejections use the `{error, message}` body of every other failure.
pub struct RpcJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for RpcJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(errors::rpc_error_to_response(RpcError::invalid_argument(
                rejection.body_text(),
            ))),
        }
    }
}

fn reply<T: serde::Serialize>(result: RpcResult<T>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => errors::rpc_error_to_response(e),
    }
}

pub async fn new_adapter(
    Extension(dispatcher): Dispatcher,
    RpcJson(body): RpcJson<dto::NewAdapterRequest>,
) -> Response {
    let result = dispatcher
        .new_adapter(&body.handle, &body.driver_name, &body.connect_string, &body.table_prefix)
        .await;
    reply(result.map(|handle| dto::HandleReply {
        handle: handle.into_string(),
    }))
}

pub async fn new_enforcer(
    Extension(dispatcher): Dispatcher,
    RpcJson(body): RpcJson<dto::NewEnforcerRequest>,
) -> Response {
    let result = dispatcher
        .new_enforcer(&body.handle, &body.model_text, &body.adapter_handle)
        .await;
    reply(result.map(|handle| dto::HandleReply {
        handle: handle.into_string(),
    }))
}

pub async fn enforce(
    Extension(dispatcher): Dispatcher,
    RpcJson(body): RpcJson<dto::EnforceRequest>,
) -> Response {
    reply(
        dispatcher
            .enforce(&body.enforcer_handle, &body.params)
            .map(|res| dto::BoolReply { res }),
    )
}

pub async fn load_policy(
    Extension(dispatcher): Dispatcher,
    RpcJson(body): RpcJson<dto::EnforcerRequest>,
) -> Response {
    reply(
        dispatcher
            .load_policy(&body.enforcer_handle)
            .await
            .map(|()| serde_json::json!({})),
    )
}

pub async fn save_policy(
    Extension(dispatcher): Dispatcher,
    RpcJson(body): RpcJson<dto::EnforcerRequest>,
) -> Response {
    reply(
        dispatcher
            .save_policy(&body.enforcer_handle)
            .await
            .map(|()| serde_json::json!({})),
    )
}

pub async fn add_policy(
    Extension(dispatcher): Dispatcher,
    RpcJson(body): RpcJson<dto::PolicyRequest>,
) -> Response {
    reply(
        dispatcher
            .add_policy(&body.enforcer_handle, &body.ptype, body.params)
            .map(|res| dto::BoolReply { res }),
    )
}

pub async fn remove_policy(
    Extension(dispatcher): Dispatcher,
    RpcJson(body): RpcJson<dto::PolicyRequest>,
) -> Response {
    reply(
        dispatcher
            .remove_policy(&body.enforcer_handle, &body.ptype, &body.params)
            .map(|res| dto::BoolReply { res }),
    )
}

pub async fn get_policy(
    Extension(dispatcher): Dispatcher,
    RpcJson(body): RpcJson<dto::EnforcerRequest>,
) -> Response {
    let rules = dispatcher.get_policy(&body.enforcer_handle, &body.ptype);
    reply(rules.map(|rules| dto::PolicyReply {
        ptype: body.ptype,
        rules,
    }))
}

pub async fn list_adapters(Extension(dispatcher): Dispatcher) -> Response {
    reply(dispatcher.list_adapters())
}

pub async fn list_enforcers(Extension(dispatcher): Dispatcher) -> Response {
    reply(dispatcher.list_enforcers())
}
