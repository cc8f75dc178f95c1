//! Attribute handlers.
//!
//! Every attribute of every resource type is translated by exactly one
//! [`AttributeHandler`]. Statically mapped attributes use
//! [`DefaultHandler`]; attributes whose wire value is computed (derived
//! booleans, metadata, relationships, binary callback URLs) name a custom
//! handler in the mapping. [`HandlerRegistry::bind`] resolves the whole
//! schema once at startup into [`HandlerBindings`].

mod active;
mod binary_url;
mod default;
mod groups;
mod members;
mod meta;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use futures::TryStreamExt;

pub use active::ActiveHandler;
pub use binary_url::{BINARY_URL_HANDLER, BinaryUrlHandler};
pub use default::DefaultHandler;
pub use groups::GroupsHandler;
pub use members::MembersHandler;
pub use meta::MetaHandler;

use crate::{
    config::{ConfigError, HandlersConfig},
    directory::{DirectoryGateway, Entry, LdapFilter, PendingMutation, SearchScope},
    engine::{TranslationError, TranslationResult},
    resource::{AttributeValue, AttributeValueGroup, SimpleAttribute},
    schema::{AttributeType, ResourceTypeSchema, SchemaModel},
    scim::TerminalNode,
};

/// Per-request view handed to handlers.
pub struct RequestContext<'a> {
    /// Resource type of the resource being translated
    pub resource_type: &'a ResourceTypeSchema,
    pub schema: &'a SchemaModel,
    pub gateway: &'a dyn DirectoryGateway,
    /// Public base URL of the SCIM service, without trailing slash
    pub base_url: &'a str,
}

impl<'a> RequestContext<'a> {
    /// `{base_url}{endpoint}/{id}`
    pub fn location(&self, resource_type: &ResourceTypeSchema, id: &str) -> String {
        format!("{}{}/{}", self.base_url, resource_type.endpoint, id)
    }

    /// Resource type whose subtree holds `dn`; the most specific base wins.
    pub fn resource_type_for_dn(&self, dn: &str) -> Option<&'a ResourceTypeSchema> {
        self.schema
            .resource_types()
            .iter()
            .filter(|rt| crate::directory::dn::is_within(dn, &rt.base_dn))
            .max_by_key(|rt| rt.base_dn.len())
    }

    /// SCIM id of an entry of the given type.
    pub fn resource_id(resource_type: &ResourceTypeSchema, entry: &Entry) -> Option<String> {
        entry
            .first(&resource_type.id_attribute)
            .map(|v| v.to_text_lossy().into_owned())
    }

    /// Find the entry of `resource_type` carrying `id`.
    pub async fn find_entry(
        &self,
        resource_type: &ResourceTypeSchema,
        id: &str,
    ) -> TranslationResult<Option<Entry>> {
        let filter = resource_type
            .default_filter
            .clone()
            .and_with(LdapFilter::equality(
                resource_type.id_attribute.clone(),
                id.to_string(),
            ));
        let mut entries = self
            .gateway
            .search(&resource_type.base_dn, &filter, SearchScope::Subtree, &[])
            .await?;
        Ok(entries.try_next().await?)
    }

    /// Resolve a referenced id to a DN. `type_hint` names the resource type
    /// when the reference carries one; otherwise every type is tried.
    pub async fn resolve_reference(
        &self,
        id: &str,
        type_hint: Option<&str>,
    ) -> TranslationResult<Option<String>> {
        let hinted = type_hint.and_then(|name| self.schema.by_name(name));
        let candidates: Vec<&ResourceTypeSchema> = match hinted {
            Some(rt) => vec![rt],
            None => self.schema.resource_types().iter().collect(),
        };
        for rt in candidates {
            if let Some(entry) = self.find_entry(rt, id).await? {
                return Ok(Some(entry.dn));
            }
        }
        Ok(None)
    }

    /// `{value, $ref, display, type}` for an entry found by DN.
    pub fn reference_for(&self, entry: &Entry, type_label: Option<&str>) -> Option<AttributeValueGroup> {
        let rt = self.resource_type_for_dn(&entry.dn)?;
        let id = Self::resource_id(rt, entry)?;

        let mut values = vec![
            SimpleAttribute::new("value", id.clone()),
            SimpleAttribute::new("$ref", self.location(rt, &id)),
        ];
        if let Some(display) = rt
            .display_attribute
            .as_deref()
            .and_then(|attr| entry.first(attr))
        {
            values.push(SimpleAttribute::new(
                "display",
                display.to_text_lossy().into_owned(),
            ));
        }
        values.push(SimpleAttribute::new(
            "type",
            type_label.unwrap_or(&rt.name).to_string(),
        ));
        Some(AttributeValueGroup::new(values))
    }
}

/// Translation logic for one attribute.
///
/// Write, patch and delete append to the request's [`PendingMutation`];
/// they never talk to the directory for mutation themselves.
#[async_trait]
pub trait AttributeHandler: Send + Sync {
    /// Produce the wire value from a directory entry. `None` omits the
    /// attribute.
    async fn read(
        &self,
        attr: &AttributeType,
        entry: &Entry,
        ctx: &RequestContext<'_>,
    ) -> TranslationResult<Option<AttributeValue>>;

    /// Set the attribute to `value`, replacing what the directory holds.
    async fn write(
        &self,
        _attr: &AttributeType,
        _value: &AttributeValue,
        _mutation: &mut PendingMutation,
        _ctx: &RequestContext<'_>,
    ) -> TranslationResult<()> {
        Ok(())
    }

    /// Merge `value` into the current entry.
    async fn patch(
        &self,
        attr: &AttributeType,
        value: &AttributeValue,
        _entry: &Entry,
        mutation: &mut PendingMutation,
        ctx: &RequestContext<'_>,
    ) -> TranslationResult<()> {
        self.write(attr, value, mutation, ctx).await
    }

    /// Contribute values for an attribute a create request left out.
    async fn initialize(
        &self,
        _attr: &AttributeType,
        _mutation: &mut PendingMutation,
        _ctx: &RequestContext<'_>,
    ) -> TranslationResult<()> {
        Ok(())
    }

    /// Remove the whole attribute.
    async fn delete_attribute(
        &self,
        _attr: &AttributeType,
        _entry: &Entry,
        _mutation: &mut PendingMutation,
        _ctx: &RequestContext<'_>,
    ) -> TranslationResult<()> {
        Ok(())
    }

    /// Translate a filter terminal on this attribute. `None` falls back to
    /// the static mapping.
    async fn translate_filter(
        &self,
        _attr: &AttributeType,
        _sub_attribute: Option<&str>,
        _node: &TerminalNode,
        _ctx: &RequestContext<'_>,
    ) -> Option<TranslationResult<LdapFilter>> {
        None
    }
}

/// Named handlers plus per-attribute overrides.
pub struct HandlerRegistry {
    default: Arc<dyn AttributeHandler>,
    named: HashMap<String, Arc<dyn AttributeHandler>>,
    overrides: HashMap<(String, String), Arc<dyn AttributeHandler>>,
}

impl HandlerRegistry {
    /// Registry holding only the default handler.
    pub fn new(default: Arc<dyn AttributeHandler>) -> Self {
        Self {
            default,
            named: HashMap::new(),
            overrides: HashMap::new(),
        }
    }

    /// Registry with the default handler and every built-in custom handler.
    pub fn with_builtins(config: &HandlersConfig) -> Self {
        let mut registry = Self::new(Arc::new(DefaultHandler));
        registry.register(
            "active",
            Arc::new(ActiveHandler::new(&config.lock_attribute, &config.lock_value)),
        );
        registry.register("meta", Arc::new(MetaHandler));
        registry.register(
            "members",
            Arc::new(MembersHandler::new(&config.member_sentinel)),
        );
        registry.register("groups", Arc::new(GroupsHandler));
        registry.register(BINARY_URL_HANDLER, Arc::new(BinaryUrlHandler));
        registry
    }

    /// Make a handler available to mappings under `name`.
    pub fn register(&mut self, name: &str, handler: Arc<dyn AttributeHandler>) {
        self.named.insert(name.to_ascii_lowercase(), handler);
    }

    /// Force a handler for one attribute of one resource type, regardless
    /// of what the mapping names.
    pub fn register_for(
        &mut self,
        resource_type: &str,
        attribute: &str,
        handler: Arc<dyn AttributeHandler>,
    ) {
        self.overrides.insert(
            (
                resource_type.to_ascii_lowercase(),
                attribute.to_ascii_lowercase(),
            ),
            handler,
        );
    }

    /// Resolve every attribute of the model.
    ///
    /// Order: explicit override, then the handler named in the mapping,
    /// then the default handler for statically mapped attributes. A dynamic
    /// attribute left without a handler stays unbound and fails at dispatch.
    pub fn bind(&self, model: &SchemaModel) -> Result<HandlerBindings, ConfigError> {
        let mut bound = HashMap::new();

        for rt in model.resource_types() {
            for attr in rt.attributes() {
                let override_key = (rt.name.to_ascii_lowercase(), attr.name.to_ascii_lowercase());
                let handler = if let Some(handler) = self.overrides.get(&override_key) {
                    Some(handler.clone())
                } else if let Some(name) = &attr.handler {
                    let handler = self.named.get(&name.to_ascii_lowercase()).ok_or_else(|| {
                        ConfigError::Mapping(format!(
                            "Resource type '{}': attribute '{}' names unknown handler '{}'",
                            rt.name, attr.name, name
                        ))
                    })?;
                    Some(handler.clone())
                } else if !attr.dynamic {
                    Some(self.default.clone())
                } else {
                    tracing::warn!(
                        resource_type = %rt.name,
                        attribute = %attr.name,
                        "Dynamic attribute has no handler; operations on it will fail"
                    );
                    None
                };

                if let Some(handler) = handler {
                    bound.insert(binding_key(rt, attr), handler);
                }
            }
        }

        Ok(HandlerBindings { bound })
    }
}

fn binding_key(rt: &ResourceTypeSchema, attr: &AttributeType) -> (String, String, String) {
    (
        rt.name.to_ascii_lowercase(),
        attr.schema_uri.to_ascii_lowercase(),
        attr.name.to_ascii_lowercase(),
    )
}

/// Attribute-to-handler map resolved at startup.
#[derive(Clone)]
pub struct HandlerBindings {
    bound: HashMap<(String, String, String), Arc<dyn AttributeHandler>>,
}

impl HandlerBindings {
    pub fn get(
        &self,
        rt: &ResourceTypeSchema,
        attr: &AttributeType,
    ) -> TranslationResult<&Arc<dyn AttributeHandler>> {
        self.bound
            .get(&binding_key(rt, attr))
            .ok_or_else(|| TranslationError::UnmappedAttribute(attr.name.clone()))
    }

    pub fn len(&self) -> usize {
        self.bound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }
}
