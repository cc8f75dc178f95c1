//! In-memory resource representation.
//!
//! A [`Resource`] is the request-scoped form of one SCIM resource: its id,
//! its canonical schema URI and, per schema URI, an ordered list of
//! [`AttributeValue`]s. Attribute values come in three shapes matching the
//! schema model: a single scalar, a complex object of scalars, or a list of
//! groups where each group is one element of a multi-valued attribute.

use std::{collections::BTreeMap, fmt};

use serde_json::{Number, Value};

/// Sub-attribute carrying the add/delete discriminator on multi-valued
/// elements in partial updates.
pub const OPERATION_ATTRIBUTE: &str = "operation";

/// Discriminator value requesting removal of an element.
pub const OPERATION_DELETE: &str = "delete";

/// A scalar attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    String(String),
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
}

impl ScalarValue {
    /// Convert from JSON. Arrays, objects and null are not scalars.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(ScalarValue::String(s.clone())),
            Value::Bool(b) => Some(ScalarValue::Boolean(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(ScalarValue::Integer)
                .or_else(|| n.as_f64().map(ScalarValue::Decimal)),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ScalarValue::String(s) => Value::String(s.clone()),
            ScalarValue::Boolean(b) => Value::Bool(*b),
            ScalarValue::Integer(i) => Value::Number((*i).into()),
            ScalarValue::Decimal(d) => Number::from_f64(*d).map_or(Value::Null, Value::Number),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Boolean(b) => Some(*b),
            ScalarValue::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            ScalarValue::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::String(s) => write!(f, "{}", s),
            ScalarValue::Boolean(b) => write!(f, "{}", b),
            ScalarValue::Integer(i) => write!(f, "{}", i),
            ScalarValue::Decimal(d) => write!(f, "{}", d),
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(s: &str) -> Self {
        ScalarValue::String(s.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(s: String) -> Self {
        ScalarValue::String(s)
    }
}

impl From<bool> for ScalarValue {
    fn from(b: bool) -> Self {
        ScalarValue::Boolean(b)
    }
}

impl From<i64> for ScalarValue {
    fn from(i: i64) -> Self {
        ScalarValue::Integer(i)
    }
}

/// A named scalar.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleAttribute {
    pub name: String,
    pub value: ScalarValue,
}

impl SimpleAttribute {
    pub fn new(name: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A named object whose members are scalars.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexAttribute {
    pub name: String,
    pub sub_attributes: Vec<SimpleAttribute>,
}

impl ComplexAttribute {
    pub fn get(&self, name: &str) -> Option<&SimpleAttribute> {
        find(&self.sub_attributes, name)
    }
}

/// One element of a multi-valued attribute.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttributeValueGroup {
    pub values: Vec<SimpleAttribute>,
}

impl AttributeValueGroup {
    pub fn new(values: Vec<SimpleAttribute>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&SimpleAttribute> {
        find(&self.values, name)
    }

    /// The `value` sub-attribute rendered as text.
    pub fn value(&self) -> Option<String> {
        self.get("value").map(|v| v.value.to_string())
    }

    /// The `type` discriminator, if present.
    pub fn type_value(&self) -> Option<&str> {
        self.get("type").and_then(|v| v.value.as_str())
    }

    /// Whether this element asks to be removed.
    pub fn is_delete(&self) -> bool {
        self.get(OPERATION_ATTRIBUTE)
            .and_then(|v| v.value.as_str())
            .is_some_and(|op| op.eq_ignore_ascii_case(OPERATION_DELETE))
    }

    /// Set a sub-attribute, replacing an existing one of the same name.
    pub fn set(&mut self, attribute: SimpleAttribute) {
        match self
            .values
            .iter_mut()
            .find(|v| v.name.eq_ignore_ascii_case(&attribute.name))
        {
            Some(existing) => *existing = attribute,
            None => self.values.push(attribute),
        }
    }
}

/// A named list of groups.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiValuedAttribute {
    pub name: String,
    pub groups: Vec<AttributeValueGroup>,
}

/// Attribute data for one attribute on one resource.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Simple(SimpleAttribute),
    Complex(ComplexAttribute),
    MultiValued(MultiValuedAttribute),
}

impl AttributeValue {
    pub fn simple(name: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        AttributeValue::Simple(SimpleAttribute::new(name, value))
    }

    pub fn complex(name: impl Into<String>, sub_attributes: Vec<SimpleAttribute>) -> Self {
        AttributeValue::Complex(ComplexAttribute {
            name: name.into(),
            sub_attributes,
        })
    }

    pub fn multi_valued(name: impl Into<String>, groups: Vec<AttributeValueGroup>) -> Self {
        AttributeValue::MultiValued(MultiValuedAttribute {
            name: name.into(),
            groups,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            AttributeValue::Simple(a) => &a.name,
            AttributeValue::Complex(a) => &a.name,
            AttributeValue::MultiValued(a) => &a.name,
        }
    }
}

fn find<'a>(values: &'a [SimpleAttribute], name: &str) -> Option<&'a SimpleAttribute> {
    values.iter().find(|v| v.name.eq_ignore_ascii_case(name))
}

/// A SCIM resource for the duration of one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    /// Server-assigned identifier; absent on resources decoded from a create body
    pub id: Option<String>,
    /// Canonical (core) schema URI of the resource type
    pub schema: String,
    /// Attributes grouped by owning schema URI
    pub attributes: BTreeMap<String, Vec<AttributeValue>>,
}

impl Resource {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            id: None,
            schema: schema.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Add an attribute under a schema URI, replacing one of the same name.
    pub fn insert(&mut self, schema_uri: &str, value: AttributeValue) {
        let values = self.attributes.entry(schema_uri.to_string()).or_default();
        match values
            .iter_mut()
            .find(|v| v.name().eq_ignore_ascii_case(value.name()))
        {
            Some(existing) => *existing = value,
            None => values.push(value),
        }
    }

    pub fn get(&self, schema_uri: &str, name: &str) -> Option<&AttributeValue> {
        self.attributes
            .get(schema_uri)?
            .iter()
            .find(|v| v.name().eq_ignore_ascii_case(name))
    }

    pub fn remove(&mut self, schema_uri: &str, name: &str) -> Option<AttributeValue> {
        let values = self.attributes.get_mut(schema_uri)?;
        let position = values
            .iter()
            .position(|v| v.name().eq_ignore_ascii_case(name))?;
        Some(values.remove(position))
    }

    /// Look up a core attribute.
    pub fn core(&self, name: &str) -> Option<&AttributeValue> {
        self.get(&self.schema, name)
    }

    /// Schema URIs of extensions carrying at least one attribute.
    pub fn extension_schemas(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .iter()
            .filter(|(uri, values)| *uri != &self.schema && !values.is_empty())
            .map(|(uri, _)| uri.as_str())
    }

    /// Iterate `(schema URI, attribute)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.attributes
            .iter()
            .flat_map(|(uri, values)| values.iter().map(move |v| (uri.as_str(), v)))
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.values().all(Vec::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_scalar_from_json() {
        assert_eq!(
            ScalarValue::from_json(&json!("x")),
            Some(ScalarValue::String("x".into()))
        );
        assert_eq!(
            ScalarValue::from_json(&json!(true)),
            Some(ScalarValue::Boolean(true))
        );
        assert_eq!(
            ScalarValue::from_json(&json!(42)),
            Some(ScalarValue::Integer(42))
        );
        assert_eq!(
            ScalarValue::from_json(&json!(1.5)),
            Some(ScalarValue::Decimal(1.5))
        );
        assert_eq!(ScalarValue::from_json(&json!(null)), None);
        assert_eq!(ScalarValue::from_json(&json!([1])), None);
    }

    #[test]
    fn test_insert_replaces_same_name_case_insensitively() {
        let mut resource = Resource::new("urn:core");
        resource.insert("urn:core", AttributeValue::simple("userName", "a"));
        resource.insert("urn:core", AttributeValue::simple("username", "b"));

        assert_eq!(resource.attributes["urn:core"].len(), 1);
        assert_eq!(
            resource.core("USERNAME"),
            Some(&AttributeValue::simple("username", "b"))
        );
    }

    #[test]
    fn test_extension_schemas_skip_core_and_empty() {
        let mut resource = Resource::new("urn:core");
        resource.insert("urn:core", AttributeValue::simple("userName", "a"));
        resource.insert("urn:ext", AttributeValue::simple("employeeNumber", "7"));
        resource.attributes.insert("urn:empty".into(), Vec::new());

        let extensions: Vec<_> = resource.extension_schemas().collect();
        assert_eq!(extensions, vec!["urn:ext"]);
    }

    #[test]
    fn test_group_delete_marker() {
        let group = AttributeValueGroup::new(vec![
            SimpleAttribute::new("value", "A"),
            SimpleAttribute::new("operation", "DELETE"),
        ]);
        assert!(group.is_delete());
        assert_eq!(group.value().as_deref(), Some("A"));

        let group = AttributeValueGroup::new(vec![SimpleAttribute::new("value", "D")]);
        assert!(!group.is_delete());
    }
}
