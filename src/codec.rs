//! JSON ⇄ [`Resource`] codec.
//!
//! Core-schema attributes sit at the top level of the document; extension
//! attributes nest under an object keyed by their schema URI, which is also
//! listed in `schemas`. Simple attributes encode as scalars, complex ones as
//! objects and multi-valued ones as arrays of objects.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    resource::{
        AttributeValue, AttributeValueGroup, ComplexAttribute, MultiValuedAttribute, Resource,
        ScalarValue, SimpleAttribute,
    },
    scim::SCHEMA_URI_PREFIX,
};

/// Top-level keys handled by the codec itself.
const KEY_SCHEMAS: &str = "schemas";
const KEY_ID: &str = "id";

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("Resource body must be a JSON object")]
    NotAnObject,

    #[error("Extension '{0}' must be a JSON object")]
    ExtensionNotAnObject(String),

    #[error("Attribute '{0}' contains a nested structure that cannot be mapped")]
    TooDeep(String),

    #[error("Attribute 'id' must be a string")]
    InvalidId,
}

/// Encode a resource as a SCIM JSON document.
pub fn encode(resource: &Resource) -> Value {
    let mut doc = Map::new();

    let mut schemas = vec![Value::String(resource.schema.clone())];
    schemas.extend(
        resource
            .extension_schemas()
            .map(|uri| Value::String(uri.to_string())),
    );
    doc.insert(KEY_SCHEMAS.to_string(), Value::Array(schemas));

    if let Some(id) = &resource.id {
        doc.insert(KEY_ID.to_string(), Value::String(id.clone()));
    }

    if let Some(core) = resource.attributes.get(&resource.schema) {
        for attribute in core {
            doc.insert(attribute.name().to_string(), encode_attribute(attribute));
        }
    }

    for uri in resource.extension_schemas() {
        let mut extension = Map::new();
        for attribute in &resource.attributes[uri] {
            extension.insert(attribute.name().to_string(), encode_attribute(attribute));
        }
        doc.insert(uri.to_string(), Value::Object(extension));
    }

    Value::Object(doc)
}

fn encode_attribute(attribute: &AttributeValue) -> Value {
    match attribute {
        AttributeValue::Simple(simple) => simple.value.to_json(),
        AttributeValue::Complex(complex) => encode_simple_list(&complex.sub_attributes),
        AttributeValue::MultiValued(multi) => Value::Array(
            multi
                .groups
                .iter()
                .map(|group| encode_simple_list(&group.values))
                .collect(),
        ),
    }
}

fn encode_simple_list(values: &[SimpleAttribute]) -> Value {
    Value::Object(
        values
            .iter()
            .map(|v| (v.name.clone(), v.value.to_json()))
            .collect(),
    )
}

/// Decode a SCIM JSON document into a resource of the given core schema.
///
/// `schemas` is not trusted: extension namespaces are recognised from
/// top-level keys that look like schema URIs. `null` values are skipped.
pub fn decode(doc: &Value, core_schema: &str) -> Result<Resource, CodecError> {
    let object = doc.as_object().ok_or(CodecError::NotAnObject)?;
    let mut resource = Resource::new(core_schema);

    for (key, value) in object {
        if key == KEY_SCHEMAS {
            continue;
        }
        if key == KEY_ID {
            match value {
                Value::String(id) => resource.id = Some(id.clone()),
                Value::Null => {}
                _ => return Err(CodecError::InvalidId),
            }
            continue;
        }

        if key.starts_with(SCHEMA_URI_PREFIX) {
            let extension = value
                .as_object()
                .ok_or_else(|| CodecError::ExtensionNotAnObject(key.clone()))?;
            // Always register the namespace, even when empty, so callers can
            // see which extensions a body referred to.
            resource.attributes.entry(key.clone()).or_default();
            for (name, value) in extension {
                if let Some(attribute) = decode_attribute(name, value)? {
                    resource.insert(key, attribute);
                }
            }
            continue;
        }

        if let Some(attribute) = decode_attribute(key, value)? {
            resource.insert(core_schema, attribute);
        }
    }

    Ok(resource)
}

/// Decode one attribute value. `null` decodes to `None`.
pub fn decode_attribute(name: &str, value: &Value) -> Result<Option<AttributeValue>, CodecError> {
    match value {
        Value::Null => Ok(None),
        Value::Object(members) => Ok(Some(AttributeValue::Complex(ComplexAttribute {
            name: name.to_string(),
            sub_attributes: decode_simple_list(name, members)?,
        }))),
        Value::Array(items) => {
            let groups = items
                .iter()
                .filter(|item| !item.is_null())
                .map(|item| decode_group(name, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(AttributeValue::MultiValued(MultiValuedAttribute {
                name: name.to_string(),
                groups,
            })))
        }
        scalar => Ok(ScalarValue::from_json(scalar)
            .map(|value| AttributeValue::Simple(SimpleAttribute::new(name, value)))),
    }
}

fn decode_group(name: &str, item: &Value) -> Result<AttributeValueGroup, CodecError> {
    match item {
        Value::Object(members) => Ok(AttributeValueGroup::new(decode_simple_list(
            name, members,
        )?)),
        scalar => {
            let value = ScalarValue::from_json(scalar)
                .ok_or_else(|| CodecError::TooDeep(name.to_string()))?;
            Ok(AttributeValueGroup::new(vec![SimpleAttribute::new(
                "value", value,
            )]))
        }
    }
}

fn decode_simple_list(
    name: &str,
    members: &Map<String, Value>,
) -> Result<Vec<SimpleAttribute>, CodecError> {
    let mut out = Vec::with_capacity(members.len());
    for (key, value) in members {
        if value.is_null() {
            continue;
        }
        let scalar = ScalarValue::from_json(value)
            .ok_or_else(|| CodecError::TooDeep(format!("{}.{}", name, key)))?;
        out.push(SimpleAttribute::new(key.clone(), scalar));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::scim::{SCHEMA_ENTERPRISE_USER, SCHEMA_USER};

    fn sample_user() -> Resource {
        let mut resource = Resource::new(SCHEMA_USER).with_id("2819c223");
        resource.insert(SCHEMA_USER, AttributeValue::simple("userName", "bjensen"));
        resource.insert(SCHEMA_USER, AttributeValue::simple("active", true));
        resource.insert(
            SCHEMA_USER,
            AttributeValue::complex(
                "name",
                vec![
                    SimpleAttribute::new("givenName", "Barbara"),
                    SimpleAttribute::new("familyName", "Jensen"),
                ],
            ),
        );
        resource.insert(
            SCHEMA_USER,
            AttributeValue::multi_valued(
                "emails",
                vec![
                    AttributeValueGroup::new(vec![
                        SimpleAttribute::new("value", "bjensen@example.com"),
                        SimpleAttribute::new("type", "work"),
                    ]),
                    AttributeValueGroup::new(vec![
                        SimpleAttribute::new("value", "babs@jensen.org"),
                        SimpleAttribute::new("type", "home"),
                    ]),
                ],
            ),
        );
        resource
    }

    #[test]
    fn test_round_trip() {
        let resource = sample_user();
        let decoded = decode(&encode(&resource), SCHEMA_USER).unwrap();
        assert_eq!(decoded, resource);
    }

    #[test]
    fn test_round_trip_with_extension() {
        let mut resource = sample_user();
        resource.insert(
            SCHEMA_ENTERPRISE_USER,
            AttributeValue::simple("employeeNumber", "701984"),
        );
        resource.insert(
            SCHEMA_ENTERPRISE_USER,
            AttributeValue::simple("costCenter", 4130_i64),
        );

        let decoded = decode(&encode(&resource), SCHEMA_USER).unwrap();
        assert_eq!(decoded, resource);
    }

    #[test]
    fn test_encode_shapes() {
        let doc = encode(&sample_user());

        assert_eq!(doc["schemas"], json!([SCHEMA_USER]));
        assert_eq!(doc["id"], "2819c223");
        assert_eq!(doc["userName"], "bjensen");
        assert_eq!(doc["active"], true);
        assert_eq!(doc["name"]["familyName"], "Jensen");
        assert_eq!(doc["emails"][1]["type"], "home");
    }

    #[test]
    fn test_extension_nested_and_listed() {
        let mut resource = sample_user();
        resource.insert(
            SCHEMA_ENTERPRISE_USER,
            AttributeValue::simple("employeeNumber", "701984"),
        );

        let doc = encode(&resource);
        assert_eq!(doc["schemas"], json!([SCHEMA_USER, SCHEMA_ENTERPRISE_USER]));
        assert_eq!(doc[SCHEMA_ENTERPRISE_USER]["employeeNumber"], "701984");
        assert!(doc.get("employeeNumber").is_none());
    }

    #[test]
    fn test_decode_scalar_arrays_and_nulls() {
        let doc = json!({
            "schemas": [SCHEMA_USER],
            "userName": "bjensen",
            "nickName": null,
            "x509Certificates": ["MIIDQzCC"],
            "name": {"givenName": "Barbara", "middleName": null}
        });

        let resource = decode(&doc, SCHEMA_USER).unwrap();
        assert!(resource.core("nickName").is_none());
        assert_eq!(
            resource.core("x509Certificates"),
            Some(&AttributeValue::multi_valued(
                "x509Certificates",
                vec![AttributeValueGroup::new(vec![SimpleAttribute::new(
                    "value", "MIIDQzCC"
                )])]
            ))
        );
        assert_eq!(
            resource.core("name"),
            Some(&AttributeValue::complex(
                "name",
                vec![SimpleAttribute::new("givenName", "Barbara")]
            ))
        );
    }

    #[test]
    fn test_decode_rejects_bad_shapes() {
        assert_eq!(
            decode(&json!([1, 2]), SCHEMA_USER),
            Err(CodecError::NotAnObject)
        );
        assert_eq!(
            decode(&json!({SCHEMA_ENTERPRISE_USER: "x"}), SCHEMA_USER),
            Err(CodecError::ExtensionNotAnObject(
                SCHEMA_ENTERPRISE_USER.to_string()
            ))
        );
        assert_eq!(
            decode(&json!({"name": {"parts": {"given": "B"}}}), SCHEMA_USER),
            Err(CodecError::TooDeep("name.parts".to_string()))
        );
        assert_eq!(
            decode(&json!({"id": 7}), SCHEMA_USER),
            Err(CodecError::InvalidId)
        );
    }
}
