//! Schema model.
//!
//! Built once from the [`MappingConfig`] at startup and shared read-only
//! behind an `Arc`. Each [`ResourceTypeSchema`] knows where its entries live
//! in the directory and how every wire attribute maps onto directory
//! attributes.

use std::collections::HashMap;

use tracing::warn;

use crate::{
    config::{
        AttributeMapping, ConfigError, MappingConfig, ResourceTypeMapping, SubAttributeMapping,
    },
    directory::{LdapFilter, filter},
};

/// Sub-attribute carrying the variant discriminator of typed attributes.
pub const TYPE_SUB_ATTRIBUTE: &str = "type";

/// A simple attribute and the directory attribute backing it.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleAttributeType {
    pub name: String,
    /// `None` only for sub-attributes of dynamic attributes.
    pub directory_attribute: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComplexAttributeType {
    pub sub_attributes: Vec<SimpleAttributeType>,
}

/// One variant of a typed multi-valued attribute, e.g. `emails` of type
/// `work` stored in `mail`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedVariantType {
    pub type_value: String,
    pub sub_attributes: Vec<SimpleAttributeType>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MultiValuedShape {
    /// Every element has the same sub-attributes; the n-th value of each
    /// mapped directory attribute forms the n-th element.
    Group(Vec<SimpleAttributeType>),
    /// Elements are distinguished by their `type` sub-attribute.
    Typed(Vec<TypedVariantType>),
}

/// Dependent search issued to resolve a relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryLookup {
    pub base_dn: String,
    /// Template; may carry `$attribute` placeholders.
    pub filter: LdapFilter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiValuedAttributeType {
    pub shape: MultiValuedShape,
    pub secondary: Option<SecondaryLookup>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeKind {
    Simple(SimpleAttributeType),
    Complex(ComplexAttributeType),
    MultiValued(MultiValuedAttributeType),
}

/// Schema-level description of one wire attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeType {
    pub name: String,
    pub schema_uri: String,
    pub visible: bool,
    pub read_only: bool,
    pub dynamic: bool,
    pub handler: Option<String>,
    /// Directory attribute handed to the handler of a dynamic attribute.
    pub directory_hint: Option<String>,
    pub kind: AttributeKind,
}

impl AttributeType {
    pub fn is_multi_valued(&self) -> bool {
        matches!(self.kind, AttributeKind::MultiValued(_))
    }

    /// Every directory attribute the static mapping touches.
    pub fn directory_attributes(&self) -> Vec<&str> {
        fn mapped(subs: &[SimpleAttributeType]) -> impl Iterator<Item = &str> {
            subs.iter().filter_map(|s| s.directory_attribute.as_deref())
        }

        let mut out: Vec<&str> = match &self.kind {
            AttributeKind::Simple(simple) => {
                simple.directory_attribute.as_deref().into_iter().collect()
            }
            AttributeKind::Complex(complex) => mapped(&complex.sub_attributes).collect(),
            AttributeKind::MultiValued(multi) => match &multi.shape {
                MultiValuedShape::Group(subs) => mapped(subs).collect(),
                MultiValuedShape::Typed(variants) => variants
                    .iter()
                    .flat_map(|v| mapped(&v.sub_attributes))
                    .collect(),
            },
        };
        if let Some(hint) = &self.directory_hint
            && !out.iter().any(|a| a.eq_ignore_ascii_case(hint))
        {
            out.push(hint);
        }
        out
    }

    /// Directory attribute for a filter path below this attribute.
    ///
    /// `sub` is the sub-attribute path (`givenName` for `name.givenName`),
    /// `None` for the attribute itself. A path into a typed attribute may
    /// resolve to several directory attributes, one per variant.
    pub fn resolve_path(&self, sub: Option<&str>) -> Vec<&str> {
        fn pick<'a>(subs: &'a [SimpleAttributeType], name: &str) -> Option<&'a str> {
            subs.iter()
                .find(|s| s.name.eq_ignore_ascii_case(name))
                .and_then(|s| s.directory_attribute.as_deref())
        }

        match (&self.kind, sub) {
            (AttributeKind::Simple(simple), None) => {
                simple.directory_attribute.as_deref().into_iter().collect()
            }
            (AttributeKind::Complex(complex), Some(name)) => {
                pick(&complex.sub_attributes, name).into_iter().collect()
            }
            (AttributeKind::MultiValued(multi), sub) => {
                let name = sub.unwrap_or("value");
                match &multi.shape {
                    MultiValuedShape::Group(subs) => pick(subs, name).into_iter().collect(),
                    MultiValuedShape::Typed(variants) => variants
                        .iter()
                        .filter_map(|v| pick(&v.sub_attributes, name))
                        .collect(),
                }
            }
            _ => Vec::new(),
        }
    }
}

/// Schema and directory placement of one resource type.
#[derive(Debug, Clone)]
pub struct ResourceTypeSchema {
    pub name: String,
    pub endpoint: String,
    pub description: Option<String>,
    pub schema_uri: String,
    pub base_dn: String,
    pub default_filter: LdapFilter,
    pub object_classes: Vec<String>,
    pub id_attribute: String,
    pub rdn_attribute: String,
    pub display_attribute: Option<String>,
    /// Extension URIs with their `required` flag.
    pub extensions: Vec<(String, bool)>,
    attributes: Vec<AttributeType>,
    core: HashMap<String, usize>,
    extension_index: HashMap<String, HashMap<String, usize>>,
}

impl ResourceTypeSchema {
    /// All attributes in declaration order.
    pub fn attributes(&self) -> &[AttributeType] {
        &self.attributes
    }

    /// Core attribute by name.
    pub fn core_attribute(&self, name: &str) -> Option<&AttributeType> {
        self.core
            .get(&name.to_ascii_lowercase())
            .map(|&i| &self.attributes[i])
    }

    /// Attribute by owning schema URI and name.
    pub fn attribute(&self, schema_uri: &str, name: &str) -> Option<&AttributeType> {
        if schema_uri.eq_ignore_ascii_case(&self.schema_uri) {
            return self.core_attribute(name);
        }
        self.extension_index
            .iter()
            .find(|(uri, _)| uri.eq_ignore_ascii_case(schema_uri))
            .and_then(|(_, index)| index.get(&name.to_ascii_lowercase()))
            .map(|&i| &self.attributes[i])
    }

    /// Whether `uri` is the core schema or a configured extension.
    pub fn knows_schema(&self, uri: &str) -> bool {
        uri.eq_ignore_ascii_case(&self.schema_uri)
            || self
                .extension_index
                .keys()
                .any(|u| u.eq_ignore_ascii_case(uri))
    }

    /// Resolve a wire attribute path (`name.givenName`,
    /// `urn:...:enterprise:2.0:User:employeeNumber`) to its attribute and
    /// the remaining sub-attribute name.
    ///
    /// Schema URIs contain dots, so a URI prefix is matched against the
    /// known schemas rather than split on `.`.
    pub fn resolve(&self, path: &str) -> Option<(&AttributeType, Option<String>)> {
        let (uri, rest) = self.split_schema_prefix(path);
        let (name, sub) = match rest.split_once('.') {
            Some((name, sub)) => (name, Some(sub.to_string())),
            None => (rest, None),
        };
        let attribute = match uri {
            Some(uri) => self.attribute(uri, name)?,
            None => self.core_attribute(name)?,
        };
        Some((attribute, sub))
    }

    fn split_schema_prefix<'p>(&'p self, path: &'p str) -> (Option<&'p str>, &'p str) {
        let lower = path.to_ascii_lowercase();
        let known = std::iter::once(self.schema_uri.as_str())
            .chain(self.extension_index.keys().map(String::as_str));
        for uri in known {
            let prefix = format!("{}:", uri.to_ascii_lowercase());
            if lower.starts_with(&prefix) {
                return (Some(&path[..uri.len()]), &path[prefix.len()..]);
            }
        }
        (None, path)
    }
}

/// Registry of all configured resource types.
#[derive(Debug, Clone, Default)]
pub struct SchemaModel {
    resource_types: Vec<ResourceTypeSchema>,
}

impl SchemaModel {
    /// Build the model from the mapping.
    ///
    /// Fails when a complex or multi-valued attribute is unnamed, when a
    /// mapped simple attribute is unnamed, when a filter does not parse, or
    /// when names or endpoints collide. A non-dynamic simple attribute with
    /// no directory mapping is dropped with a warning.
    pub fn build(mapping: &MappingConfig) -> Result<SchemaModel, ConfigError> {
        let mut resource_types: Vec<ResourceTypeSchema> = Vec::new();

        for rt in &mapping.resource_types {
            if resource_types
                .iter()
                .any(|e| e.name.eq_ignore_ascii_case(&rt.name))
            {
                return Err(ConfigError::Mapping(format!(
                    "Duplicate resource type name '{}'",
                    rt.name
                )));
            }
            if resource_types
                .iter()
                .any(|e| e.endpoint.eq_ignore_ascii_case(&rt.endpoint))
            {
                return Err(ConfigError::Mapping(format!(
                    "Duplicate endpoint '{}'",
                    rt.endpoint
                )));
            }
            resource_types.push(build_resource_type(rt)?);
        }

        tracing::debug!(
            resource_types = resource_types.len(),
            "Built schema model"
        );
        Ok(SchemaModel { resource_types })
    }

    pub fn resource_types(&self) -> &[ResourceTypeSchema] {
        &self.resource_types
    }

    pub fn by_name(&self, name: &str) -> Option<&ResourceTypeSchema> {
        self.resource_types
            .iter()
            .find(|rt| rt.name.eq_ignore_ascii_case(name))
    }

    /// Look up by endpoint; accepts `/Users` or `Users`.
    pub fn by_endpoint(&self, endpoint: &str) -> Option<&ResourceTypeSchema> {
        let wanted = endpoint.trim_start_matches('/');
        self.resource_types
            .iter()
            .find(|rt| rt.endpoint.trim_start_matches('/').eq_ignore_ascii_case(wanted))
    }
}

fn build_resource_type(rt: &ResourceTypeMapping) -> Result<ResourceTypeSchema, ConfigError> {
    let default_filter = parse_filter(&rt.name, "filter", &rt.filter)?;

    let mut attributes = Vec::new();
    let mut core = HashMap::new();
    let mut extension_index: HashMap<String, HashMap<String, usize>> = HashMap::new();
    let mut extensions = Vec::new();

    for schema in &rt.schemas {
        let is_core = schema.uri == rt.schema;
        if !is_core {
            extensions.push((schema.uri.clone(), schema.required));
        }

        for mapping in &schema.attributes {
            let Some(attribute) = build_attribute(rt, &schema.uri, mapping)? else {
                continue;
            };

            let index = if is_core {
                &mut core
            } else {
                extension_index.entry(schema.uri.clone()).or_default()
            };
            let key = attribute.name.to_ascii_lowercase();
            if index.contains_key(&key) {
                return Err(ConfigError::Mapping(format!(
                    "Resource type '{}': attribute '{}' is declared twice in '{}'",
                    rt.name, attribute.name, schema.uri
                )));
            }
            index.insert(key, attributes.len());
            attributes.push(attribute);
        }
    }

    Ok(ResourceTypeSchema {
        name: rt.name.clone(),
        endpoint: rt.endpoint.clone(),
        description: rt.description.clone(),
        schema_uri: rt.schema.clone(),
        base_dn: rt.base_dn.clone(),
        default_filter,
        object_classes: rt.object_classes.clone(),
        id_attribute: rt.id_attribute.clone(),
        rdn_attribute: rt.rdn_attribute.clone(),
        display_attribute: rt.display_attribute.clone(),
        extensions,
        attributes,
        core,
        extension_index,
    })
}

fn build_attribute(
    rt: &ResourceTypeMapping,
    schema_uri: &str,
    mapping: &AttributeMapping,
) -> Result<Option<AttributeType>, ConfigError> {
    let structured =
        mapping.multi_valued || !mapping.types.is_empty() || !mapping.sub_attributes.is_empty();

    let name = match (&mapping.name, structured) {
        (Some(name), _) if !name.trim().is_empty() => name.clone(),
        (_, true) => {
            return Err(ConfigError::Mapping(format!(
                "Resource type '{}': a complex or multi-valued attribute in '{}' has no name",
                rt.name, schema_uri
            )));
        }
        (_, false) if mapping.attribute.is_some() || mapping.dynamic => {
            return Err(ConfigError::Mapping(format!(
                "Resource type '{}': an attribute mapped to '{}' in '{}' has no name",
                rt.name,
                mapping.attribute.as_deref().unwrap_or("(dynamic)"),
                schema_uri
            )));
        }
        (_, false) => {
            warn!(
                resource_type = %rt.name,
                schema = %schema_uri,
                "Dropping unnamed attribute without a directory mapping"
            );
            return Ok(None);
        }
    };

    let dynamic = mapping.dynamic;
    let subs = |list: &[SubAttributeMapping]| sub_attributes(rt, &name, list, dynamic);

    let kind = if !mapping.types.is_empty() {
        let variants = mapping
            .types
            .iter()
            .map(|t| {
                Ok(TypedVariantType {
                    type_value: t.type_value.clone(),
                    sub_attributes: subs(&t.sub_attributes)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        AttributeKind::MultiValued(MultiValuedAttributeType {
            shape: MultiValuedShape::Typed(variants),
            secondary: secondary(rt, &name, mapping)?,
        })
    } else if mapping.multi_valued {
        let mut group = subs(&mapping.sub_attributes)?;
        if group.is_empty()
            && let Some(attribute) = &mapping.attribute
            && !dynamic
        {
            group.push(SimpleAttributeType {
                name: "value".to_string(),
                directory_attribute: Some(attribute.clone()),
            });
        }
        AttributeKind::MultiValued(MultiValuedAttributeType {
            shape: MultiValuedShape::Group(group),
            secondary: secondary(rt, &name, mapping)?,
        })
    } else if !mapping.sub_attributes.is_empty() {
        AttributeKind::Complex(ComplexAttributeType {
            sub_attributes: subs(&mapping.sub_attributes)?,
        })
    } else {
        if !dynamic && mapping.attribute.is_none() {
            warn!(
                resource_type = %rt.name,
                attribute = %name,
                "Dropping attribute without a directory mapping"
            );
            return Ok(None);
        }
        AttributeKind::Simple(SimpleAttributeType {
            name: name.clone(),
            directory_attribute: if dynamic {
                None
            } else {
                mapping.attribute.clone()
            },
        })
    };

    Ok(Some(AttributeType {
        name,
        schema_uri: schema_uri.to_string(),
        visible: mapping.show,
        read_only: mapping.read_only,
        dynamic,
        handler: mapping.handler.clone(),
        directory_hint: if dynamic {
            mapping.attribute.clone()
        } else {
            None
        },
        kind,
    }))
}

fn sub_attributes(
    rt: &ResourceTypeMapping,
    parent: &str,
    list: &[SubAttributeMapping],
    dynamic: bool,
) -> Result<Vec<SimpleAttributeType>, ConfigError> {
    let mut out = Vec::with_capacity(list.len());
    for sub in list {
        let name = match &sub.name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ if sub.attribute.is_some() => {
                return Err(ConfigError::Mapping(format!(
                    "Resource type '{}': a sub-attribute of '{}' mapped to '{}' has no name",
                    rt.name,
                    parent,
                    sub.attribute.as_deref().unwrap_or_default()
                )));
            }
            _ => {
                warn!(
                    resource_type = %rt.name,
                    attribute = %parent,
                    "Dropping unnamed sub-attribute without a directory mapping"
                );
                continue;
            }
        };
        if sub.attribute.is_none() && !dynamic {
            warn!(
                resource_type = %rt.name,
                attribute = %parent,
                sub_attribute = %name,
                "Dropping sub-attribute without a directory mapping"
            );
            continue;
        }
        if out
            .iter()
            .any(|s: &SimpleAttributeType| s.name.eq_ignore_ascii_case(&name))
        {
            return Err(ConfigError::Mapping(format!(
                "Resource type '{}': sub-attribute '{}.{}' is declared twice",
                rt.name, parent, name
            )));
        }
        out.push(SimpleAttributeType {
            name,
            directory_attribute: sub.attribute.clone(),
        });
    }
    Ok(out)
}

fn secondary(
    rt: &ResourceTypeMapping,
    name: &str,
    mapping: &AttributeMapping,
) -> Result<Option<SecondaryLookup>, ConfigError> {
    match (&mapping.secondary_base_dn, &mapping.secondary_filter) {
        (None, None) => Ok(None),
        (Some(base_dn), Some(template)) => Ok(Some(SecondaryLookup {
            base_dn: base_dn.clone(),
            filter: parse_filter(&rt.name, name, template)?,
        })),
        _ => Err(ConfigError::Mapping(format!(
            "Resource type '{}': attribute '{}' needs both secondary_base_dn and secondary_filter",
            rt.name, name
        ))),
    }
}

fn parse_filter(resource_type: &str, field: &str, source: &str) -> Result<LdapFilter, ConfigError> {
    filter::parse(source).map_err(|e| {
        ConfigError::Mapping(format!(
            "Resource type '{}': invalid filter for '{}': {}",
            resource_type, field, e
        ))
    })
}
