//! Request parameters shared by every VMGrid operation.
//!
//! A request is a flat JSON object. Required keys vary per operation; the
//! engine checks them before any agent is invoked.

use serde_json::{Map, Value};

/// A caller request: string keys mapped to arbitrary JSON values.
pub type Parameters = Map<String, Value>;

pub const PARAM_RESERVATION_ID: &str = "reservation_id";
pub const PARAM_INFRASTRUCTURE: &str = "infrastructure";
pub const PARAM_VMS: &str = "vms";
pub const PARAM_KEYNAME: &str = "keyname";
pub const PARAM_CREDENTIALS: &str = "credentials";

/// Borrow a string parameter. Returns `None` for missing, null or non-string values.
pub fn get_str<'a>(params: &'a Parameters, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

/// Number of VMs requested, i.e. the length of the `vms` array.
pub fn vm_count(params: &Parameters) -> Option<usize> {
    params.get(PARAM_VMS).and_then(Value::as_array).map(Vec::len)
}

/// Parse a JSON document into a parameter map.
///
/// Anything other than a JSON object is rejected.
pub fn parse_parameters(json: &str) -> anyhow::Result<Parameters> {
    match serde_json::from_str::<Value>(json)? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("parameters must be a JSON object, got {}", type_name(&other)),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
