use serde::{Deserialize, Serialize};

/// Settings for the built-in attribute handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandlersConfig {
    /// Directory attribute whose sentinel value marks an account inactive.
    #[serde(default = "default_lock_attribute")]
    pub lock_attribute: String,

    /// Sentinel written to `lock_attribute` when `active` is set to false.
    #[serde(default = "default_lock_value")]
    pub lock_value: String,

    /// Member value kept when a group would otherwise have no members.
    #[serde(default = "default_member_sentinel")]
    pub member_sentinel: String,
}

impl Default for HandlersConfig {
    fn default() -> Self {
        Self {
            lock_attribute: default_lock_attribute(),
            lock_value: default_lock_value(),
            member_sentinel: default_member_sentinel(),
        }
    }
}

fn default_lock_attribute() -> String {
    "pwdAccountLockedTime".to_string()
}

fn default_lock_value() -> String {
    "000001010000Z".to_string()
}

fn default_member_sentinel() -> String {
    "cn=nobody".to_string()
}
