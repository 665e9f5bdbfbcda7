//! Request validation: runs before any agent call or store write.

use vmgrid_core::*;

/// Keys a prepare request must carry.
pub const PREPARE_REQUIRED_PARAMS: &[&str] = &[
    PARAM_RESERVATION_ID,
    PARAM_INFRASTRUCTURE,
    PARAM_KEYNAME,
    PARAM_VMS,
];

/// Keys describe and deregister need to resolve an agent.
pub const AGENT_REQUIRED_PARAMS: &[&str] = &[PARAM_INFRASTRUCTURE];

pub const STATUS_REQUIRED_PARAMS: &[&str] = &[PARAM_RESERVATION_ID];

pub const CREDENTIALS_REQUIRED_PARAMS: &[&str] = &[PARAM_INFRASTRUCTURE, PARAM_CREDENTIALS];

/// Check that every key in `required` is present.
///
/// Returns the failure reason (`"no <field>"`) for the first missing key.
pub fn require_params(params: &Parameters, required: &[&str]) -> Result<(), String> {
    match required.iter().find(|key| !params.contains_key(**key)) {
        Some(missing) => Err(format!("no {missing}")),
        None => Ok(()),
    }
}

/// A present, non-empty string parameter.
pub fn non_empty_str<'a>(params: &'a Parameters, key: &str) -> Option<&'a str> {
    get_str(params, key).filter(|s| !s.is_empty())
}
