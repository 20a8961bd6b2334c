use serde::{Deserialize, Serialize};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAdapterRequest {
    pub handle: String,
    pub driver_name: String,
    #[serde(default)]
    pub connect_string: String,
    #[serde(default)]
    pub table_prefix: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEnforcerRequest {
    pub handle: String,
    pub model_text: String,
    pub adapter_handle: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforceRequest {
    pub enforcer_handle: String,
    #[serde(default)]
    pub params: Vec<String>,
}

/// Body of `LoadPolicy`, `SavePolicy` and `GetPolicy`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcerRequest {
    pub enforcer_handle: String,
    #[serde(default = "default_ptype")]
    pub ptype: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRequest {
    pub enforcer_handle: String,
    #[serde(default = "default_ptype")]
    pub ptype: String,
    pub params: Vec<String>,
}

fn default_ptype() -> String {
    "p".to_string()
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct HandleReply {
    pub handle: String,
}

#[derive(Debug, Serialize)]
pub struct BoolReply {
    pub res: bool,
}

#[derive(Debug, Serialize)]
pub struct PolicyReply {
    pub ptype: String,
    pub rules: Vec<Vec<String>>,
}
