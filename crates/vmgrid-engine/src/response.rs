//! Response envelope returned by every engine operation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use vmgrid_state::{ReservationState, ReservationStatus};

/// Reason used when a successful call has nothing further to report.
pub const REASON_NONE: &str = "none";
pub const REASON_BAD_ARGUMENTS: &str = "bad arguments";
pub const REASON_BAD_VM_COUNT: &str = "bad vm count";
pub const REASON_RESERVATION_NOT_FOUND: &str = "reservation_id not found";
pub const REASON_RESERVATION_EXISTS: &str = "reservation_id already exists";
pub const REASON_INTERRUPTED: &str = "interrupted before provisioning completed";

/// Flat JSON object with at least `success` and `reason`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Response(Map<String, Value>);

impl Response {
    /// Build an envelope. `extra` keys are merged last and win on collision.
    pub fn build(success: bool, reason: impl Into<String>, extra: Option<Map<String, Value>>) -> Self {
        let mut map = Map::new();
        map.insert("success".to_string(), Value::Bool(success));
        map.insert("reason".to_string(), Value::String(reason.into()));
        if let Some(extra) = extra {
            map.extend(extra);
        }
        Self(map)
    }

    pub fn ok() -> Self {
        Self::build(true, REASON_NONE, None)
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self::build(false, reason, None)
    }

    /// Merge a reservation record. `success` is false only for failed records.
    pub fn from_status(status: &ReservationStatus) -> Self {
        let extra = match serde_json::to_value(status) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        };
        let reason = status.reason.clone().unwrap_or_else(|| REASON_NONE.to_string());
        Self::build(status.state != ReservationState::Failed, reason, extra)
    }

    /// Add one extra key.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn success(&self) -> bool {
        self.0.get("success").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn reason(&self) -> &str {
        self.0.get("reason").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vmgrid_state::VmInfo;

    #[test]
    fn build_always_has_success_and_reason() {
        let resp = Response::ok();
        assert!(resp.success());
        assert_eq!(resp.reason(), "none");

        let resp = Response::fail("no infrastructure");
        assert!(!resp.success());
        assert_eq!(resp.reason(), "no infrastructure");
    }

    #[test]
    fn extra_keys_are_merged_last() {
        let extra = json!({ "reservation_id": "r1", "reason": "overridden" });
        let resp = Response::build(true, "none", extra.as_object().cloned());

        assert_eq!(resp.get("reservation_id"), Some(&json!("r1")));
        assert_eq!(resp.reason(), "overridden");
    }

    #[test]
    fn serializes_flat() {
        let resp = Response::ok().with("reservation_id", "r1");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json, json!({ "success": true, "reason": "none", "reservation_id": "r1" }));
    }

    #[test]
    fn from_status_reflects_record() {
        let mut status = ReservationStatus::pending("r1");
        status
            .complete_running(VmInfo {
                public_ips: vec!["1.2.3.4".into()],
                private_ips: vec!["10.0.0.1".into()],
                instance_ids: vec!["i-1".into()],
            })
            .unwrap();
        let resp = Response::from_status(&status);
        assert!(resp.success());
        assert_eq!(resp.reason(), "none");
        assert_eq!(resp.get("state"), Some(&json!("running")));
        assert_eq!(resp.get("vm_info").unwrap()["instance_ids"], json!(["i-1"]));

        let mut failed = ReservationStatus::pending("r2");
        failed.complete_failed("quota exceeded").unwrap();
        let resp = Response::from_status(&failed);
        assert!(!resp.success());
        assert_eq!(resp.reason(), "quota exceeded");
        assert!(resp.get("vm_info").is_none());
    }
}
