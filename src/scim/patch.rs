//! SCIM 2.0 PATCH Operations
//!
//! Parsing of RFC 7644 Section 3.5.2 PATCH requests and evaluation of the
//! value filters used in their paths.
//!
//! ## Operations
//!
//! - `add`: Add value(s) to an attribute
//! - `remove`: Remove an attribute, or matching elements of a multi-valued one
//! - `replace`: Replace attribute value
//!
//! ## Path Syntax
//!
//! ```text
//! path = attrPath / valuePath / subAttrPath
//! attrPath = [URI ":"] ATTRNAME
//! subAttrPath = attrPath "." ATTRNAME
//! valuePath = attrPath "[" valueFilter "]" ["." ATTRNAME]
//! ```
//!
//! ## Examples
//!
//! ```json
//! {
//!   "schemas": ["urn:ietf:params:scim:api:messages:2.0:PatchOp"],
//!   "Operations": [
//!     { "op": "replace", "path": "displayName", "value": "New Name" },
//!     { "op": "add", "path": "members", "value": [{"value": "2819c223"}] },
//!     { "op": "remove", "path": "members[value eq \"2819c223\"]" }
//!   ]
//! }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::{
    filter::{CompareOp, FilterNode, LogicalOp, TerminalNode, parse_filter},
    types::{SCHEMA_PATCH_OP, SCHEMA_URI_PREFIX},
};
use crate::resource::{AttributeValueGroup, ScalarValue};

/// A SCIM PATCH request containing one or more operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRequest {
    /// SCIM schema URIs (should contain PatchOp schema)
    pub schemas: Vec<String>,

    /// List of patch operations to apply
    #[serde(rename = "Operations")]
    pub operations: Vec<PatchOp>,
}

impl PatchRequest {
    /// Create a new patch request with operations
    pub fn new(operations: Vec<PatchOp>) -> Self {
        Self {
            schemas: vec![SCHEMA_PATCH_OP.to_string()],
            operations,
        }
    }

    /// Whether a JSON body is a PatchOp message rather than a partial
    /// resource.
    pub fn is_patch_op(body: &Value) -> bool {
        body.get("schemas")
            .and_then(Value::as_array)
            .is_some_and(|schemas| {
                schemas
                    .iter()
                    .any(|s| s.as_str().is_some_and(|s| s.eq_ignore_ascii_case(SCHEMA_PATCH_OP)))
            })
    }

    /// Validate the request
    pub fn validate(&self) -> Result<(), PatchError> {
        if !self
            .schemas
            .iter()
            .any(|s| s.eq_ignore_ascii_case(SCHEMA_PATCH_OP))
        {
            return Err(PatchError::InvalidSchema);
        }

        for (i, op) in self.operations.iter().enumerate() {
            op.validate().map_err(|e| PatchError::InvalidOperation {
                index: i,
                error: Box::new(e),
            })?;
        }

        Ok(())
    }
}

/// A single SCIM PATCH operation.
///
/// Some identity providers send capitalised op names, so those are
/// accepted too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    /// Add value(s) to an attribute
    #[serde(alias = "Add")]
    Add {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        value: Value,
    },
    /// Replace attribute value
    #[serde(alias = "Replace")]
    Replace {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        value: Value,
    },
    /// Remove attribute or value
    #[serde(alias = "Remove")]
    Remove {
        #[serde(default)]
        path: String,
        /// Elements to remove from a multi-valued attribute
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
}

impl PatchOp {
    /// Create an add operation
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        PatchOp::Add {
            path: Some(path.into()),
            value,
        }
    }

    /// Create a replace operation
    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        PatchOp::Replace {
            path: Some(path.into()),
            value,
        }
    }

    /// Create a remove operation
    pub fn remove(path: impl Into<String>) -> Self {
        PatchOp::Remove {
            path: path.into(),
            value: None,
        }
    }

    /// Validate the operation
    pub fn validate(&self) -> Result<(), PatchError> {
        self.parsed_path().map(|_| ())
    }

    /// Get the parsed path if present
    pub fn parsed_path(&self) -> Result<Option<PatchPath>, PatchError> {
        match self {
            PatchOp::Add { path, .. } | PatchOp::Replace { path, .. } => {
                path.as_deref().map(parse_path).transpose()
            }
            PatchOp::Remove { path, .. } => {
                if path.trim().is_empty() {
                    return Err(PatchError::NoTarget);
                }
                Ok(Some(parse_path(path)?))
            }
        }
    }
}

/// A parsed SCIM PATCH path.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchPath {
    /// Attribute name, including its schema URI prefix when one was given
    pub attr: String,
    /// Sub-attribute (for nested paths like "name.familyName")
    pub sub_attr: Option<String>,
    /// Value filter for multi-valued attributes (e.g., `[type eq "work"]`)
    pub value_filter: Option<FilterNode>,
}

impl PatchPath {
    /// Create a simple path
    pub fn simple(attr: impl Into<String>) -> Self {
        Self {
            attr: attr.into(),
            sub_attr: None,
            value_filter: None,
        }
    }

    /// Create a nested path (e.g., "name.familyName")
    pub fn nested(attr: impl Into<String>, sub_attr: impl Into<String>) -> Self {
        Self {
            attr: attr.into(),
            sub_attr: Some(sub_attr.into()),
            value_filter: None,
        }
    }
}

impl fmt::Display for PatchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.attr)?;
        if let Some(ref filter) = self.value_filter {
            write!(f, "[{}]", filter)?;
        }
        if let Some(ref sub) = self.sub_attr {
            write!(f, ".{}", sub)?;
        }
        Ok(())
    }
}

/// PATCH operation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatchError {
    #[error("Request must include PatchOp schema")]
    InvalidSchema,

    #[error("Remove operation requires a path")]
    NoTarget,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid operation at index {index}: {error}")]
    InvalidOperation {
        index: usize,
        error: Box<PatchError>,
    },
}

impl From<super::filter::FilterParseError> for PatchError {
    fn from(e: super::filter::FilterParseError) -> Self {
        PatchError::InvalidPath(e.to_string())
    }
}

/// Split `urn:...:User:name.givenName` after the schema prefix; dots in
/// the URI (`2.0`) are not path separators.
fn split_sub_attribute(path: &str) -> (&str, Option<&str>) {
    let name_start = if path.starts_with(SCHEMA_URI_PREFIX) {
        path.rfind(':').map_or(0, |i| i + 1)
    } else {
        0
    };
    match path[name_start..].find('.') {
        Some(dot) => {
            let dot = name_start + dot;
            (&path[..dot], Some(&path[dot + 1..]))
        }
        None => (path, None),
    }
}

/// Parse a SCIM PATCH path string.
///
/// # Examples
///
/// ```
/// use scim_ldap_bridge::scim::patch::parse_path;
///
/// let path = parse_path("emails[type eq \"work\"].value").unwrap();
/// assert_eq!(path.attr, "emails");
/// assert_eq!(path.sub_attr.as_deref(), Some("value"));
/// ```
pub fn parse_path(input: &str) -> Result<PatchPath, PatchError> {
    let input = input.trim();

    if input.is_empty() {
        return Err(PatchError::InvalidPath("Empty path".to_string()));
    }

    // Check for value filter
    if let Some(bracket_pos) = input.find('[') {
        let attr = &input[..bracket_pos];
        if attr.is_empty() {
            return Err(PatchError::InvalidPath(
                "Value filter needs an attribute".to_string(),
            ));
        }

        let close_bracket = input
            .rfind(']')
            .filter(|&pos| pos > bracket_pos)
            .ok_or_else(|| PatchError::InvalidPath("Unclosed bracket in path".to_string()))?;

        let filter = parse_filter(&input[bracket_pos + 1..close_bracket])
            .map_err(|e| PatchError::InvalidPath(format!("Invalid value filter: {}", e)))?;

        let remaining = &input[close_bracket + 1..];
        let sub_attr = if remaining.is_empty() {
            None
        } else if let Some(stripped) = remaining.strip_prefix('.')
            && !stripped.is_empty()
        {
            Some(stripped.to_string())
        } else {
            return Err(PatchError::InvalidPath(format!(
                "Unexpected characters after filter: '{}'",
                remaining
            )));
        };

        return Ok(PatchPath {
            attr: attr.to_string(),
            sub_attr,
            value_filter: Some(filter),
        });
    }

    match split_sub_attribute(input) {
        (_, Some("")) => Err(PatchError::InvalidPath(
            "Sub-attribute cannot be empty".to_string(),
        )),
        (attr, sub_attr) => Ok(PatchPath {
            attr: attr.to_string(),
            sub_attr: sub_attr.map(String::from),
            value_filter: None,
        }),
    }
}

/// Evaluate a value filter against one element of a multi-valued
/// attribute. Attribute paths in the filter name sub-attributes of the
/// element.
pub fn matches_filter(filter: &FilterNode, element: &AttributeValueGroup) -> bool {
    match filter {
        FilterNode::Terminal(terminal) => matches_terminal(terminal, element),
        FilterNode::Branch(branch) => match branch.operator {
            LogicalOp::And => {
                matches_filter(&branch.left, element) && matches_filter(&branch.right, element)
            }
            LogicalOp::Or => {
                matches_filter(&branch.left, element) || matches_filter(&branch.right, element)
            }
        },
    }
}

fn matches_terminal(terminal: &TerminalNode, element: &AttributeValueGroup) -> bool {
    let name = terminal
        .attribute_path
        .rsplit_once('.')
        .map_or(terminal.attribute_path.as_str(), |(_, sub)| sub);
    let actual = element.get(name).map(|a| &a.value);

    match (actual, terminal.operator, terminal.value.as_deref()) {
        (actual, CompareOp::Pr, _) => actual.is_some(),
        (None, CompareOp::Ne, _) => true,
        (None, _, _) => false,
        (Some(_), _, None) => false,
        (Some(actual), op, Some(expected)) => compare(actual, op, expected),
    }
}

fn compare(actual: &ScalarValue, op: CompareOp, expected: &str) -> bool {
    match actual {
        ScalarValue::Boolean(b) => match expected.parse::<bool>() {
            Ok(e) => match op {
                CompareOp::Eq => *b == e,
                CompareOp::Ne => *b != e,
                _ => false,
            },
            Err(_) => matches!(op, CompareOp::Ne),
        },
        ScalarValue::Integer(_) | ScalarValue::Decimal(_) => {
            let n = match actual {
                ScalarValue::Integer(i) => *i as f64,
                ScalarValue::Decimal(d) => *d,
                _ => f64::NAN,
            };
            let Ok(e) = expected.parse::<f64>() else {
                return matches!(op, CompareOp::Ne);
            };
            match op {
                CompareOp::Eq => (n - e).abs() < f64::EPSILON,
                CompareOp::Ne => (n - e).abs() >= f64::EPSILON,
                CompareOp::Gt => n > e,
                CompareOp::Ge => n >= e,
                CompareOp::Lt => n < e,
                CompareOp::Le => n <= e,
                _ => false,
            }
        }
        ScalarValue::String(s) => {
            let s_lower = s.to_lowercase();
            let e_lower = expected.to_lowercase();
            match op {
                CompareOp::Eq => s_lower == e_lower,
                CompareOp::Ne => s_lower != e_lower,
                CompareOp::Co => s_lower.contains(&e_lower),
                CompareOp::Sw => s_lower.starts_with(&e_lower),
                CompareOp::Ew => s_lower.ends_with(&e_lower),
                CompareOp::Gt => s_lower > e_lower,
                CompareOp::Ge => s_lower >= e_lower,
                CompareOp::Lt => s_lower < e_lower,
                CompareOp::Le => s_lower <= e_lower,
                CompareOp::Pr => true,
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
