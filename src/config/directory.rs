use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Directory configuration for the built-in in-memory gateway.
///
/// ```toml
/// [directory]
/// binary_attributes = ["jpegPhoto", "userCertificate"]
///
/// [[directory.constraints]]
/// object_class = "groupOfNames"
/// attribute = "member"
///
/// [[directory.entries]]
/// dn = "uid=bjensen,ou=people,dc=example,dc=com"
/// attributes = { objectClass = ["inetOrgPerson"], uid = "bjensen", sn = "Jensen" }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectoryConfig {
    /// Attributes with a binary syntax. Their seed values are base64.
    #[serde(default)]
    pub binary_attributes: Vec<String>,

    /// Non-empty multi-value constraints.
    #[serde(default)]
    pub constraints: Vec<NonEmptyConstraint>,

    /// Entries loaded at startup.
    #[serde(default)]
    pub entries: Vec<SeedEntry>,
}

/// Entries of `object_class` must keep at least one `attribute` value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NonEmptyConstraint {
    pub object_class: String,
    pub attribute: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedEntry {
    pub dn: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, SeedValues>,
}

/// A single value or a list of values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeedValues {
    One(String),
    Many(Vec<String>),
}

impl SeedValues {
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        match self {
            SeedValues::One(value) => std::slice::from_ref(value).iter(),
            SeedValues::Many(values) => values.iter(),
        }
    }
}
