use std::sync::Arc;

use gatekeeper_infra::RequestDispatcher;
use reqwest::StatusCode;
use serde_json::{json, Value};

const TOKEN: &str = "test-token";

const ACL_MODEL: &str = "[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = r.sub == p.sub && r.obj == p.obj && r.act == p.act
";

const AGE_MODEL: &str = "[request_definition]
r = sub, age

[policy_definition]
p = sub

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = r.sub == p.sub && r.age >= 18
";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(api_token: Option<&str>) -> Self {
        // Same router as prod, bound to an ephemeral port.
        let dispatcher = Arc::new(RequestDispatcher::with_defaults(2));
        let app = gatekeeper_api::app::build_app(dispatcher, api_token.map(str::to_string));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            handle,
        }
    }

    async fn call(&self, name: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .post(format!("{}/rpc/{}", self.base_url, name))
            .bearer_auth(TOKEN)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap())
    }

    async fn ok(&self, name: &str, body: Value) -> Value {
        let (status, reply) = self.call(name, body).await;
        assert_eq!(status, StatusCode::OK, "{name} failed: {reply}");
        reply
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn enforce(server: &TestServer, handle: &str, params: &[&str]) -> bool {
    let reply = server
        .ok("Enforce", json!({ "enforcerHandle": handle, "params": params }))
        .await;
    reply["res"].as_bool().unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let server = TestServer::spawn(Some(TOKEN)).await;
    let res = reqwest::get(format!("{}/health", server.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn rpc_routes_require_the_configured_token() {
    let server = TestServer::spawn(Some(TOKEN)).await;
    let url = format!("{}/rpc/ListAdapters", server.base_url);

    let missing = server.client.post(&url).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = server.client.post(&url).bearer_auth("nope").send().await.unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let right = server.client.post(&url).bearer_auth(TOKEN).send().await.unwrap();
    assert_eq!(right.status(), StatusCode::OK);
}

#[tokio::test]
async fn rpc_routes_are_open_without_a_token() {
    let server = TestServer::spawn(None).await;
    let res = server
        .client
        .post(format!("{}/rpc/ListEnforcers", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.json::<Value>().await.unwrap(), json!([]));
}

#[tokio::test]
async fn sqlite_enforcer_end_to_end() {
    let server = TestServer::spawn(Some(TOKEN)).await;

    let adapter = server
        .ok(
            "NewAdapter",
            json!({ "handle": "A1", "driverName": "sqlite", "connectString": "file::memory:" }),
        )
        .await;
    assert_eq!(adapter["handle"], "A1");

    let enforcer = server
        .ok(
            "NewEnforcer",
            json!({ "handle": "E1", "modelText": ACL_MODEL, "adapterHandle": "A1" }),
        )
        .await;
    assert_eq!(enforcer["handle"], "E1");

    let added = server
        .ok(
            "AddPolicy",
            json!({ "enforcerHandle": "E1", "params": ["alice", "data1", "read"] }),
        )
        .await;
    assert_eq!(added["res"], true);
    server.ok("SavePolicy", json!({ "enforcerHandle": "E1" })).await;

    assert!(enforce(&server, "E1", &["alice", "data1", "read"]).await);
    assert!(!enforce(&server, "E1", &["alice", "data1", "write"]).await);

    // A second enforcer over the same adapter sees the saved rule after loading.
    server
        .ok(
            "NewEnforcer",
            json!({ "handle": "E2", "modelText": ACL_MODEL, "adapterHandle": "A1" }),
        )
        .await;
    assert!(!enforce(&server, "E2", &["alice", "data1", "read"]).await);
    server.ok("LoadPolicy", json!({ "enforcerHandle": "E2" })).await;
    assert!(enforce(&server, "E2", &["alice", "data1", "read"]).await);

    let policy = server.ok("GetPolicy", json!({ "enforcerHandle": "E2" })).await;
    assert_eq!(policy["ptype"], "p");
    assert_eq!(policy["rules"], json!([["alice", "data1", "read"]]));

    let listed = server.ok("ListEnforcers", json!({})).await;
    let names: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["handle"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["E1", "E2"]);
}

#[tokio::test]
async fn errors_carry_kind_and_status() {
    let server = TestServer::spawn(Some(TOKEN)).await;

    let (status, reply) = server
        .call("Enforce", json!({ "enforcerHandle": "ghost", "params": [] }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(reply["error"], "not_found");

    let (status, reply) = server
        .call("NewAdapter", json!({ "handle": "A1", "driverName": "mongodb" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["error"], "unsupported_driver");

    let (status, reply) = server
        .call("NewAdapter", json!({ "handle": "", "driverName": "memory" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["error"], "invalid_argument");

    server
        .ok("NewAdapter", json!({ "handle": "mem", "driverName": "memory" }))
        .await;

    let (status, reply) = server
        .call(
            "NewEnforcer",
            json!({ "handle": "bad", "modelText": "[matchers]\nm = (", "adapterHandle": "mem" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply["error"], "model_parse");

    server
        .ok(
            "NewEnforcer",
            json!({ "handle": "age", "modelText": AGE_MODEL, "adapterHandle": "mem" }),
        )
        .await;
    server
        .ok("AddPolicy", json!({ "enforcerHandle": "age", "params": ["alice"] }))
        .await;
    assert!(enforce(&server, "age", &["alice", "21"]).await);
    assert!(!enforce(&server, "age", &["alice", "17"]).await);

    let (status, reply) = server
        .call("Enforce", json!({ "enforcerHandle": "age", "params": ["alice"] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["error"], "arity_mismatch");

    let (status, reply) = server
        .call("Enforce", json!({ "enforcerHandle": "age", "params": ["alice", "old"] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["error"], "param_type");

    let (status, reply) = server
        .call(
            "AddPolicy",
            json!({ "enforcerHandle": "age", "ptype": "g", "params": ["alice", "admin"] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["error"], "policy");
}

#[tokio::test]
async fn malformed_bodies_get_structured_errors() {
    let server = TestServer::spawn(Some(TOKEN)).await;

    let (status, reply) = server
        .call("NewEnforcer", json!({ "handle": "e1", "adapterHandle": "a1" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["error"], "invalid_argument");
    assert!(reply["message"].as_str().unwrap().contains("modelText"));

    let (status, reply) = server
        .call("Enforce", json!({ "enforcerHandle": "e1", "params": "alice" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["error"], "invalid_argument");

    let res = server
        .client
        .post(format!("{}/rpc/ListAdapters", server.base_url))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}
