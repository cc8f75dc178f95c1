use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Declarative SCIM-to-directory mapping.
///
/// ```toml
/// [[mapping.resource_types]]
/// name = "User"
/// endpoint = "/Users"
/// schema = "urn:ietf:params:scim:schemas:core:2.0:User"
/// base_dn = "ou=people,dc=example,dc=com"
/// filter = "(objectClass=inetOrgPerson)"
/// object_classes = ["top", "person", "organizationalPerson", "inetOrgPerson"]
/// rdn_attribute = "uid"
/// display_attribute = "cn"
///
/// [[mapping.resource_types.schemas]]
/// uri = "urn:ietf:params:scim:schemas:core:2.0:User"
/// attributes = [
///   { name = "userName", attribute = "uid" },
///   { name = "name", sub_attributes = [
///       { name = "givenName", attribute = "givenName" },
///       { name = "familyName", attribute = "sn" },
///   ] },
///   { name = "emails", multi_valued = true, types = [
///       { type = "work", sub_attributes = [{ name = "value", attribute = "mail" }] },
///   ] },
///   { name = "active", dynamic = true, handler = "active" },
/// ]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingConfig {
    #[serde(default)]
    pub resource_types: Vec<ResourceTypeMapping>,
}

impl MappingConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        for rt in &self.resource_types {
            if !rt.endpoint.starts_with('/') {
                return Err(ConfigError::Validation(format!(
                    "Resource type '{}': endpoint must start with '/': {}",
                    rt.name, rt.endpoint
                )));
            }
            if rt.base_dn.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Resource type '{}': base_dn must not be empty",
                    rt.name
                )));
            }
            if !rt.schemas.iter().any(|s| s.uri == rt.schema) {
                return Err(ConfigError::Validation(format!(
                    "Resource type '{}': no attribute block for its schema '{}'",
                    rt.name, rt.schema
                )));
            }
        }
        Ok(())
    }
}

/// Mapping for one resource type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceTypeMapping {
    /// Resource type name (e.g., "User").
    pub name: String,

    /// Endpoint path (e.g., "/Users").
    pub endpoint: String,

    /// Canonical (core) schema URI.
    pub schema: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Directory subtree holding entries of this type.
    pub base_dn: String,

    /// Filter every entry of this type matches.
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Object classes written on create.
    #[serde(default)]
    pub object_classes: Vec<String>,

    /// Directory attribute carrying the SCIM `id`.
    #[serde(default = "default_id_attribute")]
    pub id_attribute: String,

    /// Directory attribute naming new entries.
    pub rdn_attribute: String,

    /// Directory attribute used for `display` on references.
    #[serde(default)]
    pub display_attribute: Option<String>,

    /// Attribute blocks, one per schema URI (core and extensions).
    #[serde(default)]
    pub schemas: Vec<SchemaMapping>,
}

fn default_filter() -> String {
    "(objectClass=*)".to_string()
}

fn default_id_attribute() -> String {
    "entryUUID".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaMapping {
    pub uri: String,

    /// Advertised as required on `/ResourceTypes` (extensions only).
    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub attributes: Vec<AttributeMapping>,
}

/// One wire attribute.
///
/// The shape follows from the fields present: `types` makes a typed
/// multi-valued attribute, `multi_valued` a grouped one, `sub_attributes` a
/// complex one, anything else a simple one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeMapping {
    #[serde(default)]
    pub name: Option<String>,

    /// Directory attribute for simple attributes, or the hint handed to the
    /// handler of a dynamic attribute.
    #[serde(default)]
    pub attribute: Option<String>,

    #[serde(default)]
    pub multi_valued: bool,

    #[serde(default)]
    pub sub_attributes: Vec<SubAttributeMapping>,

    #[serde(default)]
    pub types: Vec<TypedVariantMapping>,

    #[serde(default)]
    pub secondary_base_dn: Option<String>,

    #[serde(default)]
    pub secondary_filter: Option<String>,

    /// Returned on reads.
    #[serde(default = "default_true")]
    pub show: bool,

    #[serde(default)]
    pub read_only: bool,

    /// No static mapping; `handler` supplies the translation.
    #[serde(default)]
    pub dynamic: bool,

    #[serde(default)]
    pub handler: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubAttributeMapping {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub attribute: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypedVariantMapping {
    #[serde(rename = "type")]
    pub type_value: String,

    #[serde(default)]
    pub sub_attributes: Vec<SubAttributeMapping>,
}
