//! SCIM Protocol Types
//!
//! Schema URIs and the protocol envelopes (list responses, query parameters,
//! resource type descriptors) that surround encoded resources.

use serde::{Deserialize, Serialize};

// =============================================================================
// Schema URIs
// =============================================================================

/// SCIM Core User schema URI
pub const SCHEMA_USER: &str = "urn:ietf:params:scim:schemas:core:2.0:User";

/// SCIM Core Group schema URI
pub const SCHEMA_GROUP: &str = "urn:ietf:params:scim:schemas:core:2.0:Group";

/// SCIM Enterprise User extension schema URI
pub const SCHEMA_ENTERPRISE_USER: &str =
    "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User";

/// SCIM ListResponse schema URI
pub const SCHEMA_LIST_RESPONSE: &str = "urn:ietf:params:scim:api:messages:2.0:ListResponse";

/// SCIM PatchOp schema URI
pub const SCHEMA_PATCH_OP: &str = "urn:ietf:params:scim:api:messages:2.0:PatchOp";

/// SCIM ResourceType schema URI
pub const SCHEMA_RESOURCE_TYPE: &str = "urn:ietf:params:scim:schemas:core:2.0:ResourceType";

/// Prefix shared by every schema URI; top-level JSON keys carrying it are
/// extension namespaces.
pub const SCHEMA_URI_PREFIX: &str = "urn:";

// =============================================================================
// Protocol Types
// =============================================================================

/// SCIM list response for paginated collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimListResponse<T> {
    /// SCIM schema URIs
    pub schemas: Vec<String>,

    /// Total number of results available
    pub total_results: u32,

    /// Number of results returned in this response
    pub items_per_page: u32,

    /// 1-based index of the first result in this response
    pub start_index: u32,

    /// The list of resources
    #[serde(rename = "Resources")]
    pub resources: Vec<T>,
}

impl<T> ScimListResponse<T> {
    /// Create a new list response
    pub fn new(resources: Vec<T>, total_results: u32, start_index: u32) -> Self {
        let items_per_page = resources.len() as u32;
        Self {
            schemas: vec![SCHEMA_LIST_RESPONSE.to_string()],
            total_results,
            items_per_page,
            start_index,
            resources,
        }
    }

    /// Convert the resources while keeping the paging fields.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> ScimListResponse<U> {
        ScimListResponse {
            schemas: self.schemas,
            total_results: self.total_results,
            items_per_page: self.items_per_page,
            start_index: self.start_index,
            resources: self.resources.into_iter().map(f).collect(),
        }
    }
}

/// Query parameters for list and read operations
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimListParams {
    /// SCIM filter expression
    #[serde(default)]
    pub filter: Option<String>,

    /// 1-based start index (default: 1)
    #[serde(default = "default_start_index")]
    pub start_index: u32,

    /// Number of results per page
    #[serde(default)]
    pub count: Option<u32>,

    /// Comma-separated attributes to include in the response
    #[serde(default)]
    pub attributes: Option<String>,
}

impl Default for ScimListParams {
    fn default() -> Self {
        Self {
            filter: None,
            start_index: default_start_index(),
            count: None,
            attributes: None,
        }
    }
}

impl ScimListParams {
    /// Requested attribute names, if a projection was given.
    ///
    /// Sub-attribute paths (`name.givenName`) select their parent attribute.
    pub fn requested_attributes(&self) -> Option<Vec<String>> {
        parse_attribute_list(self.attributes.as_deref())
    }
}

/// Split a comma-separated `attributes` parameter into top-level names.
pub fn parse_attribute_list(attributes: Option<&str>) -> Option<Vec<String>> {
    let raw = attributes?;
    let names: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| top_level_name(s).to_string())
        .collect();
    if names.is_empty() { None } else { Some(names) }
}

/// `urn:...:User:name.givenName` → `name`; `emails.value` → `emails`.
fn top_level_name(path: &str) -> &str {
    let unqualified = if path.starts_with(SCHEMA_URI_PREFIX) {
        path.rsplit_once(':').map_or(path, |(_, name)| name)
    } else {
        path
    };
    unqualified
        .split_once('.')
        .map_or(unqualified, |(head, _)| head)
}

fn default_start_index() -> u32 {
    1
}

/// Resource type descriptor served from `/ResourceTypes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTypeDescriptor {
    /// SCIM schema URIs
    pub schemas: Vec<String>,

    /// Resource type identifier (e.g., "User")
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Endpoint path (e.g., "/Users")
    pub endpoint: String,

    /// Primary schema URI for this resource type
    pub schema: String,

    /// Schema extensions supported
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schema_extensions: Vec<SchemaExtension>,
}

/// Schema extension reference on a resource type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaExtension {
    pub schema: String,
    pub required: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_response_counts_items() {
        let response = ScimListResponse::new(vec!["a", "b"], 10, 3);
        assert_eq!(response.items_per_page, 2);
        assert_eq!(response.total_results, 10);
        assert_eq!(response.start_index, 3);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["schemas"][0], SCHEMA_LIST_RESPONSE);
        assert_eq!(json["Resources"][1], "b");
        assert_eq!(json["itemsPerPage"], 2);
    }

    #[test]
    fn test_requested_attributes() {
        let params = ScimListParams {
            attributes: Some(format!(
                "userName, name.givenName,{}:employeeNumber",
                SCHEMA_ENTERPRISE_USER
            )),
            ..Default::default()
        };
        assert_eq!(
            params.requested_attributes().unwrap(),
            vec!["userName", "name", "employeeNumber"]
        );

        assert!(ScimListParams::default().requested_attributes().is_none());
        assert!(parse_attribute_list(Some(" , ")).is_none());
    }

    #[test]
    fn test_list_params_defaults_from_query() {
        let params: ScimListParams =
            serde_json::from_value(serde_json::json!({"filter": "userName pr"})).unwrap();
        assert_eq!(params.start_index, 1);
        assert_eq!(params.count, None);
        assert_eq!(params.filter.as_deref(), Some("userName pr"));
    }
}
