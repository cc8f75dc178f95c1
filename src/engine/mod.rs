//! Translation engine.
//!
//! Coordinates a SCIM request end to end: resolves the resource type,
//! dispatches every attribute to its bound handler, turns the accumulated
//! [`PendingMutation`] into a single directory call and reads the result
//! back into a [`Resource`].

mod error;
mod filter;
pub mod patch;

use std::sync::Arc;

use futures::TryStreamExt;
use serde_json::Value;

pub use error::{ErrorKind, TranslationError, TranslationResult};
pub use filter::terminal_filter;

use crate::{
    codec,
    config::ConfigError,
    directory::{
        ATTR_OBJECT_CLASS, DirectoryGateway, DirectoryValue, Entry, LdapFilter, PendingMutation,
        SearchScope, dn,
    },
    handlers::{BINARY_URL_HANDLER, HandlerBindings, HandlerRegistry, RequestContext},
    resource::Resource,
    schema::{AttributeType, ResourceTypeSchema, SchemaModel},
    scim::{
        ResourceTypeDescriptor, SCHEMA_RESOURCE_TYPE, SchemaExtension, ScimListParams,
        ScimListResponse, parse_filter,
    },
};

/// Page size when none is configured.
pub const DEFAULT_MAX_RESULTS: u32 = 100;

pub struct TranslationEngine {
    schema: Arc<SchemaModel>,
    gateway: Arc<dyn DirectoryGateway>,
    bindings: HandlerBindings,
    base_url: String,
    max_results: u32,
}

impl TranslationEngine {
    /// Bind every attribute of `schema` through `registry`.
    pub fn new(
        schema: Arc<SchemaModel>,
        gateway: Arc<dyn DirectoryGateway>,
        registry: &HandlerRegistry,
        base_url: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let bindings = registry.bind(&schema)?;
        tracing::debug!(
            resource_types = schema.resource_types().len(),
            bound_attributes = bindings.len(),
            "Translation engine ready"
        );
        Ok(Self {
            schema,
            gateway,
            bindings,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_results: DEFAULT_MAX_RESULTS,
        })
    }

    /// Cap on `count` for list requests, also the default page size.
    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    pub fn schema(&self) -> &SchemaModel {
        &self.schema
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resource type served at `endpoint` (`Users` or `/Users`).
    pub fn resource_type(&self, endpoint: &str) -> TranslationResult<&ResourceTypeSchema> {
        self.schema.by_endpoint(endpoint).ok_or_else(|| {
            TranslationError::NotFound(format!("Unknown resource endpoint '{}'", endpoint))
        })
    }

    fn context<'a>(&'a self, resource_type: &'a ResourceTypeSchema) -> RequestContext<'a> {
        RequestContext {
            resource_type,
            schema: &self.schema,
            gateway: self.gateway.as_ref(),
            base_url: &self.base_url,
        }
    }

    async fn require_entry(
        &self,
        ctx: &RequestContext<'_>,
        id: &str,
    ) -> TranslationResult<Entry> {
        ctx.find_entry(ctx.resource_type, id).await?.ok_or_else(|| {
            TranslationError::NotFound(format!(
                "{} '{}' not found",
                ctx.resource_type.name, id
            ))
        })
    }

    /// Re-read an entry after a write.
    async fn reload(&self, rt: &ResourceTypeSchema, dn: &str) -> TranslationResult<Resource> {
        let entry = self
            .gateway
            .get_by_dn(dn)
            .await?
            .ok_or_else(|| TranslationError::NotFound(format!("Entry '{}' vanished", dn)))?;
        self.read_entry(rt, &entry, None).await
    }

    /// Translate a directory entry into a resource.
    ///
    /// Only visible attributes are read; `projection` further restricts
    /// them by name. Attributes whose handler yields nothing are omitted.
    pub async fn read_entry(
        &self,
        rt: &ResourceTypeSchema,
        entry: &Entry,
        projection: Option<&[String]>,
    ) -> TranslationResult<Resource> {
        let ctx = self.context(rt);
        let mut resource = Resource::new(rt.schema_uri.clone());
        resource.id = RequestContext::resource_id(rt, entry);

        for attr in rt.attributes().iter().filter(|a| a.visible) {
            if let Some(names) = projection
                && !names.iter().any(|n| n.eq_ignore_ascii_case(&attr.name))
            {
                continue;
            }
            let handler = self.bindings.get(rt, attr)?;
            if let Some(value) = handler.read(attr, entry, &ctx).await? {
                resource.insert(&attr.schema_uri, value);
            }
        }
        Ok(resource)
    }

    pub async fn get(
        &self,
        rt: &ResourceTypeSchema,
        id: &str,
        projection: Option<&[String]>,
    ) -> TranslationResult<Resource> {
        let ctx = self.context(rt);
        let entry = self.require_entry(&ctx, id).await?;
        self.read_entry(rt, &entry, projection).await
    }

    /// Translate a SCIM filter string into a directory filter, ANDed with
    /// the resource type's default filter. An empty filter selects every
    /// entry the default filter selects.
    pub async fn translate_filter(
        &self,
        rt: &ResourceTypeSchema,
        filter: Option<&str>,
    ) -> TranslationResult<LdapFilter> {
        let Some(expression) = filter.map(str::trim).filter(|f| !f.is_empty()) else {
            return Ok(rt.default_filter.clone());
        };
        let node = parse_filter(expression)?;
        let ctx = self.context(rt);
        let translated = filter::translate(&node, &ctx, &self.bindings).await?;
        Ok(rt.default_filter.clone().and_with(translated))
    }

    /// List resources matching `params.filter`, paged by `startIndex` and
    /// `count`. Results are ordered by DN so pages are stable.
    pub async fn search(
        &self,
        rt: &ResourceTypeSchema,
        params: &ScimListParams,
    ) -> TranslationResult<ScimListResponse<Resource>> {
        let filter = self.translate_filter(rt, params.filter.as_deref()).await?;
        tracing::debug!(resource_type = %rt.name, filter = %filter, "Searching directory");

        let mut entries: Vec<Entry> = self
            .gateway
            .search(&rt.base_dn, &filter, SearchScope::Subtree, &[])
            .await?
            .try_collect()
            .await?;
        entries.sort_by_cached_key(|e| dn::normalize(&e.dn));

        let total = entries.len() as u32;
        let start_index = params.start_index.max(1);
        let count = params
            .count
            .unwrap_or(self.max_results)
            .min(self.max_results);
        let projection = params.requested_attributes();

        let mut resources = Vec::new();
        for entry in entries
            .iter()
            .skip((start_index - 1) as usize)
            .take(count as usize)
        {
            resources.push(self.read_entry(rt, entry, projection.as_deref()).await?);
        }

        Ok(ScimListResponse::new(resources, total, start_index))
    }

    /// Dispatch `write` for every writable attribute present in `resource`.
    async fn write_attributes(
        &self,
        ctx: &RequestContext<'_>,
        resource: &Resource,
        mutation: &mut PendingMutation,
    ) -> TranslationResult<()> {
        let rt = ctx.resource_type;
        for (uri, value) in resource.iter() {
            let Some(attr) = rt.attribute(uri, value.name()) else {
                tracing::debug!(
                    resource_type = %rt.name,
                    schema = %uri,
                    attribute = %value.name(),
                    "Ignoring unknown attribute"
                );
                continue;
            };
            if attr.read_only {
                continue;
            }
            self.bindings
                .get(rt, attr)?
                .write(attr, value, mutation, ctx)
                .await?;
        }
        Ok(())
    }

    /// Create a resource from a JSON body.
    ///
    /// The DN is built from the value written to the resource type's RDN
    /// attribute; the configured object classes are added.
    pub async fn create(
        &self,
        rt: &ResourceTypeSchema,
        body: &Value,
    ) -> TranslationResult<Resource> {
        let resource = codec::decode(body, &rt.schema_uri)?;
        let ctx = self.context(rt);

        let mut mutation = PendingMutation::new();
        self.write_attributes(&ctx, &resource, &mut mutation).await?;
        for attr in rt.attributes().iter().filter(|a| !a.read_only) {
            if resource.get(&attr.schema_uri, &attr.name).is_none()
                && let Ok(handler) = self.bindings.get(rt, attr)
            {
                handler.initialize(attr, &mut mutation, &ctx).await?;
            }
        }

        let rdn_value = mutation
            .values_for(&rt.rdn_attribute)
            .and_then(|values| values.into_iter().next())
            .ok_or_else(|| {
                TranslationError::InvalidValue(format!(
                    "{} needs a value for its naming attribute '{}'",
                    rt.name, rt.rdn_attribute
                ))
            })?;
        let entry_dn = dn::build(&rt.rdn_attribute, &rdn_value.to_text_lossy(), &rt.base_dn);

        let mut attributes = mutation.to_attributes();
        if !rt.object_classes.is_empty()
            && !attributes
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case(ATTR_OBJECT_CLASS))
        {
            attributes.insert(
                0,
                (
                    ATTR_OBJECT_CLASS.to_string(),
                    rt.object_classes
                        .iter()
                        .map(|oc| DirectoryValue::from(oc.as_str()))
                        .collect(),
                ),
            );
        }

        self.gateway.add(&entry_dn, attributes).await?;
        tracing::info!(resource_type = %rt.name, dn = %entry_dn, "Created resource");

        self.reload(rt, &entry_dn).await
    }

    /// Replace a resource.
    ///
    /// Only attributes present in the body are written; the directory call
    /// is skipped when nothing would change.
    pub async fn replace(
        &self,
        rt: &ResourceTypeSchema,
        id: &str,
        body: &Value,
    ) -> TranslationResult<Resource> {
        let resource = codec::decode(body, &rt.schema_uri)?;
        let ctx = self.context(rt);
        let entry = self.require_entry(&ctx, id).await?;

        let mut mutation = PendingMutation::new();
        self.write_attributes(&ctx, &resource, &mut mutation).await?;
        self.commit(rt, &entry, mutation).await?;

        self.reload(rt, &entry.dn).await
    }

    /// Apply a PATCH body of either accepted form as one modify request.
    pub async fn patch(
        &self,
        rt: &ResourceTypeSchema,
        id: &str,
        body: &Value,
    ) -> TranslationResult<Resource> {
        let ctx = self.context(rt);
        let entry = self.require_entry(&ctx, id).await?;
        let current = self.read_entry(rt, &entry, None).await?;
        let plan = patch::plan(rt, body, &current)?;

        let mut mutation = PendingMutation::new();
        for target in &plan.removals {
            let attr = planned_attribute(rt, target)?;
            if attr.read_only {
                continue;
            }
            self.bindings
                .get(rt, attr)?
                .delete_attribute(attr, &entry, &mut mutation, &ctx)
                .await?;
        }
        for (target, value) in &plan.replacements {
            let attr = planned_attribute(rt, target)?;
            if attr.read_only {
                continue;
            }
            self.bindings
                .get(rt, attr)?
                .write(attr, value, &mut mutation, &ctx)
                .await?;
        }
        for (target, value) in &plan.updates {
            let attr = planned_attribute(rt, target)?;
            if attr.read_only {
                continue;
            }
            self.bindings
                .get(rt, attr)?
                .patch(attr, value, &entry, &mut mutation, &ctx)
                .await?;
        }

        self.commit(rt, &entry, mutation).await?;
        self.reload(rt, &entry.dn).await
    }

    async fn commit(
        &self,
        rt: &ResourceTypeSchema,
        entry: &Entry,
        mutation: PendingMutation,
    ) -> TranslationResult<()> {
        if mutation.is_empty() {
            tracing::debug!(resource_type = %rt.name, dn = %entry.dn, "Nothing to modify");
            return Ok(());
        }
        let modifications = mutation.into_modifications();
        tracing::info!(
            resource_type = %rt.name,
            dn = %entry.dn,
            modifications = modifications.len(),
            "Modifying resource"
        );
        self.gateway.modify(&entry.dn, modifications).await?;
        Ok(())
    }

    pub async fn delete(&self, rt: &ResourceTypeSchema, id: &str) -> TranslationResult<()> {
        let ctx = self.context(rt);
        let entry = self.require_entry(&ctx, id).await?;
        self.gateway.delete(&entry.dn).await?;
        tracing::info!(resource_type = %rt.name, dn = %entry.dn, "Deleted resource");
        Ok(())
    }

    /// Raw bytes of the `index`-th value behind a binary URL attribute.
    ///
    /// Only visible attributes served by the `binary_url` handler have
    /// bytes to download; any other name is `NotFound`.
    pub async fn fetch_binary(
        &self,
        rt: &ResourceTypeSchema,
        id: &str,
        attribute: &str,
        index: usize,
    ) -> TranslationResult<Vec<u8>> {
        let attr = rt
            .attributes()
            .iter()
            .find(|a| {
                a.name.eq_ignore_ascii_case(attribute)
                    && a.visible
                    && a.handler
                        .as_deref()
                        .is_some_and(|h| h.eq_ignore_ascii_case(BINARY_URL_HANDLER))
            })
            .ok_or_else(|| {
                TranslationError::NotFound(format!(
                    "{} has no binary attribute '{}'",
                    rt.name, attribute
                ))
            })?;
        let directory_attribute = attr
            .directory_hint
            .as_deref()
            .ok_or_else(|| TranslationError::UnmappedAttribute(attr.name.clone()))?;

        let ctx = self.context(rt);
        let entry = self.require_entry(&ctx, id).await?;
        entry
            .get(directory_attribute)
            .and_then(|values| values.get(index))
            .map(|value| value.as_bytes().to_vec())
            .ok_or_else(|| {
                TranslationError::NotFound(format!(
                    "No value {} for '{}' on {} '{}'",
                    index, attribute, rt.name, id
                ))
            })
    }

    /// Descriptors of every configured resource type.
    pub fn resource_types(&self) -> Vec<ResourceTypeDescriptor> {
        self.schema
            .resource_types()
            .iter()
            .map(|rt| ResourceTypeDescriptor {
                schemas: vec![SCHEMA_RESOURCE_TYPE.to_string()],
                id: rt.name.clone(),
                name: rt.name.clone(),
                endpoint: rt.endpoint.clone(),
                schema: rt.schema_uri.clone(),
                schema_extensions: rt
                    .extensions
                    .iter()
                    .map(|(schema, required)| SchemaExtension {
                        schema: schema.clone(),
                        required: *required,
                    })
                    .collect(),
            })
            .collect()
    }
}

fn planned_attribute<'r>(
    rt: &'r ResourceTypeSchema,
    target: &patch::AttributeRef,
) -> TranslationResult<&'r AttributeType> {
    rt.attribute(&target.schema_uri, &target.name)
        .ok_or_else(|| TranslationError::UnmappedAttribute(target.name.clone()))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{
        codec::encode,
        config::{AttributeMapping, HandlersConfig},
        directory::{DirectoryResult, EntryStream, InMemoryDirectory, Modification},
        handlers::test_support::*,
        scim::{SCHEMA_PATCH_OP, SCHEMA_USER},
    };

    /// In-memory directory that counts mutating calls and records filters.
    struct Recording {
        inner: InMemoryDirectory,
        mutations: AtomicUsize,
        filters: std::sync::Mutex<Vec<String>>,
    }

    impl Recording {
        fn new(inner: InMemoryDirectory) -> Self {
            Self {
                inner,
                mutations: AtomicUsize::new(0),
                filters: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn mutations(&self) -> usize {
            self.mutations.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DirectoryGateway for Recording {
        async fn search(
            &self,
            base_dn: &str,
            filter: &LdapFilter,
            scope: SearchScope,
            attributes: &[String],
        ) -> DirectoryResult<EntryStream> {
            self.filters.lock().unwrap().push(filter.to_string());
            self.inner.search(base_dn, filter, scope, attributes).await
        }

        async fn get_by_dn(&self, dn: &str) -> DirectoryResult<Option<Entry>> {
            self.inner.get_by_dn(dn).await
        }

        async fn add(
            &self,
            dn: &str,
            attributes: Vec<(String, Vec<DirectoryValue>)>,
        ) -> DirectoryResult<()> {
            self.mutations.fetch_add(1, Ordering::SeqCst);
            self.inner.add(dn, attributes).await
        }

        async fn modify(&self, dn: &str, modifications: Vec<Modification>) -> DirectoryResult<()> {
            self.mutations.fetch_add(1, Ordering::SeqCst);
            self.inner.modify(dn, modifications).await
        }

        async fn delete(&self, dn: &str) -> DirectoryResult<()> {
            self.mutations.fetch_add(1, Ordering::SeqCst);
            self.inner.delete(dn).await
        }

        fn is_binary(&self, attribute: &str) -> bool {
            self.inner.is_binary(attribute)
        }
    }

    async fn setup() -> (TranslationEngine, Arc<Recording>) {
        let dir = directory();
        add_user(&dir, "alice", "Alice").await;
        add_user(&dir, "bob", "Bob").await;
        add_user(&dir, "carol", "Carol").await;
        add_user(&dir, "dave", "Dave").await;
        add_group(&dir, "staff", &["alice", "bob", "carol"]).await;

        let gateway = Arc::new(Recording::new(dir));
        let engine = TranslationEngine::new(
            model(),
            gateway.clone(),
            &HandlerRegistry::with_builtins(&HandlersConfig::default()),
            BASE_URL,
        )
        .unwrap();
        (engine, gateway)
    }

    fn member_ids(resource: &Resource) -> Vec<String> {
        match resource.core("members") {
            Some(crate::resource::AttributeValue::MultiValued(members)) => {
                let mut ids: Vec<String> =
                    members.groups.iter().filter_map(|g| g.value()).collect();
                ids.sort();
                ids
            }
            _ => Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_create_and_read_back() {
        let (engine, gateway) = setup().await;
        let users = engine.resource_type("Users").unwrap();

        let created = engine
            .create(
                users,
                &json!({
                    "schemas": [SCHEMA_USER],
                    "userName": "bjensen",
                    "displayName": "Barbara Jensen",
                    "title": "ignored",
                    "emails": [{"value": "bjensen@example.com", "type": "work"}]
                }),
            )
            .await
            .unwrap();
        assert_eq!(gateway.mutations(), 1);

        let id = created.id.clone().unwrap();
        let doc = encode(&created);
        assert_eq!(doc["userName"], "bjensen");
        assert_eq!(doc["active"], true);
        assert!(doc.get("title").is_none());
        assert_eq!(doc["emails"][0]["type"], "work");
        assert_eq!(doc["meta"]["location"], format!("{}/Users/{}", BASE_URL, id));

        let entry = gateway
            .get_by_dn(&format!("uid=bjensen,{}", PEOPLE))
            .await
            .unwrap()
            .unwrap();
        assert!(entry.has_value("objectClass", &"inetOrgPerson".into()));

        let err = engine
            .create(users, &json!({"userName": "bjensen"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = engine
            .create(users, &json!({"displayName": "No Uid"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[tokio::test]
    async fn test_create_group_without_members() {
        let (engine, gateway) = setup().await;
        let groups = engine.resource_type("Groups").unwrap();

        let created = engine
            .create(groups, &json!({"displayName": "empty"}))
            .await
            .unwrap();
        assert!(member_ids(&created).is_empty());

        let entry = gateway
            .get_by_dn(&format!("cn=empty,{}", GROUPS))
            .await
            .unwrap()
            .unwrap();
        assert!(entry.has_value("member", &"cn=nobody".into()));
    }

    #[tokio::test]
    async fn test_members_patch_reconciles() {
        let (engine, _) = setup().await;
        let groups = engine.resource_type("/Groups").unwrap();

        let patched = engine
            .patch(
                groups,
                "id-staff",
                &json!({
                    "members": [
                        {"value": "id-alice", "operation": "delete"},
                        {"value": "id-dave"}
                    ]
                }),
            )
            .await
            .unwrap();
        assert_eq!(member_ids(&patched), vec!["id-bob", "id-carol", "id-dave"]);

        let patched = engine
            .patch(
                groups,
                "id-staff",
                &json!({
                    "schemas": [SCHEMA_PATCH_OP],
                    "Operations": [{"op": "remove", "path": "members[value eq \"id-bob\"]"}]
                }),
            )
            .await
            .unwrap();
        assert_eq!(member_ids(&patched), vec!["id-carol", "id-dave"]);
    }

    #[tokio::test]
    async fn test_removing_all_members_keeps_sentinel() {
        let (engine, gateway) = setup().await;
        let groups = engine.resource_type("Groups").unwrap();

        let patched = engine
            .patch(
                groups,
                "id-staff",
                &json!({"meta": {"attributes": ["members"]}}),
            )
            .await
            .unwrap();
        assert!(member_ids(&patched).is_empty());

        let entry = gateway
            .get_by_dn(&format!("cn=staff,{}", GROUPS))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.get("member").map(<[_]>::len), Some(1));
        assert!(entry.has_value("member", &"cn=nobody".into()));
    }

    #[tokio::test]
    async fn test_read_only_write_issues_no_call() {
        let (engine, gateway) = setup().await;
        let users = engine.resource_type("Users").unwrap();

        engine
            .replace(users, "id-alice", &json!({"title": "Boss"}))
            .await
            .unwrap();
        engine
            .patch(
                users,
                "id-alice",
                &json!({
                    "schemas": [SCHEMA_PATCH_OP],
                    "Operations": [{"op": "replace", "path": "title", "value": "Boss"}]
                }),
            )
            .await
            .unwrap();
        assert_eq!(gateway.mutations(), 0);
    }

    #[tokio::test]
    async fn test_search_ands_default_filter_and_pages() {
        let (engine, gateway) = setup().await;
        let users = engine.resource_type("Users").unwrap();

        let params = ScimListParams {
            filter: Some("userName eq \"alice\"".into()),
            ..Default::default()
        };
        let page = engine.search(users, &params).await.unwrap();
        assert_eq!(page.total_results, 1);
        assert!(
            gateway
                .filters
                .lock()
                .unwrap()
                .iter()
                .any(|f| f == "(&(objectClass=inetOrgPerson)(uid=alice))")
        );

        let params = ScimListParams {
            start_index: 2,
            count: Some(2),
            attributes: Some("userName".into()),
            ..Default::default()
        };
        let page = engine.search(users, &params).await.unwrap();
        assert_eq!(page.total_results, 4);
        assert_eq!(page.items_per_page, 2);
        assert_eq!(page.start_index, 2);
        let names: Vec<_> = page
            .resources
            .iter()
            .map(|r| encode(r)["userName"].clone())
            .collect();
        assert_eq!(names, vec![json!("bob"), json!("carol")]);
        assert!(page.resources.iter().all(|r| r.core("displayName").is_none()));
    }

    #[tokio::test]
    async fn test_active_filter_and_write() {
        let (engine, _) = setup().await;
        let users = engine.resource_type("Users").unwrap();

        let filter = engine
            .translate_filter(users, Some("active eq false"))
            .await
            .unwrap();
        assert_eq!(
            filter.to_string(),
            "(&(objectClass=inetOrgPerson)(pwdAccountLockedTime=000001010000Z))"
        );

        engine
            .replace(users, "id-bob", &json!({"active": false}))
            .await
            .unwrap();
        let params = ScimListParams {
            filter: Some("active eq false".into()),
            ..Default::default()
        };
        let page = engine.search(users, &params).await.unwrap();
        assert_eq!(page.total_results, 1);
        assert_eq!(page.resources[0].id.as_deref(), Some("id-bob"));
    }

    #[tokio::test]
    async fn test_unknown_ids_and_filters() {
        let (engine, _) = setup().await;
        let users = engine.resource_type("Users").unwrap();

        let err = engine.get(users, "missing", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = engine.delete(users, "missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(engine.resource_type("Widgets").is_err());

        let params = ScimListParams {
            filter: Some("nickName eq \"x\"".into()),
            ..Default::default()
        };
        let err = engine.search(users, &params).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownFilterAttribute);
    }

    #[tokio::test]
    async fn test_delete_then_get() {
        let (engine, _) = setup().await;
        let users = engine.resource_type("Users").unwrap();

        engine.delete(users, "id-dave").await.unwrap();
        let err = engine.get(users, "id-dave", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_fetch_binary() {
        let (engine, gateway) = setup().await;
        let users = engine.resource_type("Users").unwrap();
        gateway
            .modify(
                &format!("uid=alice,{}", PEOPLE),
                vec![Modification::Replace {
                    attribute: "jpegPhoto".into(),
                    values: vec![DirectoryValue::Binary(vec![0xff, 0xd8, 0xff])],
                }],
            )
            .await
            .unwrap();

        let bytes = engine
            .fetch_binary(users, "id-alice", "photos", 0)
            .await
            .unwrap();
        assert_eq!(bytes, vec![0xff, 0xd8, 0xff]);

        let err = engine
            .fetch_binary(users, "id-alice", "photos", 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_removing_members_one_operation_at_a_time() {
        let (engine, gateway) = setup().await;
        let groups = engine.resource_type("Groups").unwrap();

        let patched = engine
            .patch(
                groups,
                "id-staff",
                &json!({
                    "schemas": [SCHEMA_PATCH_OP],
                    "Operations": [
                        {"op": "remove", "path": "members[value eq \"id-alice\"]"},
                        {"op": "remove", "path": "members[value eq \"id-bob\"]"},
                        {"op": "remove", "path": "members[value eq \"id-carol\"]"}
                    ]
                }),
            )
            .await
            .unwrap();
        assert!(member_ids(&patched).is_empty());
        assert_eq!(gateway.mutations(), 1);

        let entry = gateway
            .get_by_dn(&format!("cn=staff,{}", GROUPS))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.get("member").map(<[_]>::len), Some(1));
        assert!(entry.has_value("member", &"cn=nobody".into()));
    }

    #[tokio::test]
    async fn test_filtered_replaces_on_one_attribute_all_apply() {
        let (engine, gateway) = setup().await;
        let users = engine.resource_type("Users").unwrap();
        gateway
            .modify(
                &format!("uid=alice,{}", PEOPLE),
                vec![
                    Modification::Replace {
                        attribute: "mail".into(),
                        values: vec!["a@work.example".into()],
                    },
                    Modification::Replace {
                        attribute: "homeEmail".into(),
                        values: vec!["a@home.example".into()],
                    },
                ],
            )
            .await
            .unwrap();

        engine
            .patch(
                users,
                "id-alice",
                &json!({
                    "schemas": [SCHEMA_PATCH_OP],
                    "Operations": [
                        {"op": "replace", "path": "emails[type eq \"work\"].value", "value": "new@work.example"},
                        {"op": "replace", "path": "emails[type eq \"home\"].value", "value": "new@home.example"}
                    ]
                }),
            )
            .await
            .unwrap();

        let entry = gateway
            .get_by_dn(&format!("uid=alice,{}", PEOPLE))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.get("mail"), Some(&[DirectoryValue::from("new@work.example")][..]));
        assert_eq!(entry.get("homeEmail"), Some(&[DirectoryValue::from("new@home.example")][..]));
    }

    #[tokio::test]
    async fn test_fetch_binary_only_serves_visible_binary_urls() {
        let mut mapping = mapping();
        mapping.resource_types[0].schemas[0].attributes.extend([
            AttributeMapping {
                show: false,
                ..simple("password", "userPassword")
            },
            AttributeMapping {
                show: false,
                multi_valued: true,
                ..dynamic("hiddenPhotos", "binary_url", Some("jpegPhoto"))
            },
        ]);

        let dir = directory();
        add_user(&dir, "alice", "Alice").await;
        dir.modify(
            &format!("uid=alice,{}", PEOPLE),
            vec![
                Modification::Replace {
                    attribute: "userPassword".into(),
                    values: vec!["s3cret".into()],
                },
                Modification::Replace {
                    attribute: "jpegPhoto".into(),
                    values: vec![DirectoryValue::Binary(vec![0xff, 0xd8])],
                },
            ],
        )
        .await
        .unwrap();

        let engine = TranslationEngine::new(
            Arc::new(SchemaModel::build(&mapping).unwrap()),
            Arc::new(dir),
            &HandlerRegistry::with_builtins(&HandlersConfig::default()),
            BASE_URL,
        )
        .unwrap();
        let users = engine.resource_type("Users").unwrap();

        let read = engine.get(users, "id-alice", None).await.unwrap();
        assert!(read.core("password").is_none());
        assert!(read.core("hiddenPhotos").is_none());

        for attribute in ["password", "hiddenPhotos", "userName", "x509Certificates"] {
            let err = engine
                .fetch_binary(users, "id-alice", attribute, 0)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound, "{}", attribute);
        }
        assert_eq!(
            engine
                .fetch_binary(users, "id-alice", "photos", 0)
                .await
                .unwrap(),
            vec![0xff, 0xd8]
        );
    }

    #[test]
    fn test_resource_type_descriptors() {
        let engine = TranslationEngine::new(
            model(),
            Arc::new(directory()),
            &HandlerRegistry::with_builtins(&HandlersConfig::default()),
            BASE_URL,
        )
        .unwrap();

        let descriptors = engine.resource_types();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].endpoint, "/Users");
        assert_eq!(descriptors[0].schema_extensions.len(), 1);
        assert!(descriptors[1].schema_extensions.is_empty());
    }
}
