use async_trait::async_trait;
use futures::TryStreamExt;

use super::{AttributeHandler, RequestContext};
use crate::{
    directory::{Entry, LdapFilter, SearchScope},
    engine::{TranslationError, TranslationResult},
    resource::{AttributeValue, AttributeValueGroup},
    schema::{AttributeKind, AttributeType, SecondaryLookup},
    scim::{CompareOp, TerminalNode},
};

const DEFAULT_MEMBER_OF_ATTRIBUTE: &str = "memberOf";

/// Membership type reported for every resolved group.
const MEMBERSHIP_DIRECT: &str = "direct";

/// Read-only reverse membership (`User.groups`).
///
/// Uses the attribute's secondary lookup when one is configured: its filter
/// template is filled from the user entry (`(member=$dn)`) and run against
/// the group subtree. Otherwise the forward `memberOf` values are
/// dereferenced. A failing lookup omits the attribute.
pub struct GroupsHandler;

fn secondary(attr: &AttributeType) -> Option<&SecondaryLookup> {
    match &attr.kind {
        AttributeKind::MultiValued(multi) => multi.secondary.as_ref(),
        _ => None,
    }
}

impl GroupsHandler {
    async fn search_groups(
        &self,
        lookup: &SecondaryLookup,
        entry: &Entry,
        ctx: &RequestContext<'_>,
    ) -> TranslationResult<Vec<AttributeValueGroup>> {
        let filter = lookup.filter.substitute(entry);
        tracing::debug!(base = %lookup.base_dn, filter = %filter, "Resolving groups by search");

        let groups: Vec<Entry> = ctx
            .gateway
            .search(&lookup.base_dn, &filter, SearchScope::Subtree, &[])
            .await?
            .try_collect()
            .await?;
        Ok(groups
            .iter()
            .filter_map(|group| ctx.reference_for(group, Some(MEMBERSHIP_DIRECT)))
            .collect())
    }

    async fn dereference_groups(
        &self,
        attribute: &str,
        entry: &Entry,
        ctx: &RequestContext<'_>,
    ) -> TranslationResult<Vec<AttributeValueGroup>> {
        let mut out = Vec::new();
        for value in entry.get(attribute).unwrap_or_default() {
            if let Some(group) = ctx.gateway.get_by_dn(&value.to_text_lossy()).await?
                && let Some(reference) = ctx.reference_for(&group, Some(MEMBERSHIP_DIRECT))
            {
                out.push(reference);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl AttributeHandler for GroupsHandler {
    async fn read(
        &self,
        attr: &AttributeType,
        entry: &Entry,
        ctx: &RequestContext<'_>,
    ) -> TranslationResult<Option<AttributeValue>> {
        let resolved = match secondary(attr) {
            Some(lookup) => self.search_groups(lookup, entry, ctx).await,
            None => {
                let attribute = attr
                    .directory_hint
                    .as_deref()
                    .unwrap_or(DEFAULT_MEMBER_OF_ATTRIBUTE);
                self.dereference_groups(attribute, entry, ctx).await
            }
        };

        match resolved {
            Ok(groups) if groups.is_empty() => Ok(None),
            Ok(groups) => Ok(Some(AttributeValue::multi_valued(attr.name.clone(), groups))),
            Err(e) => {
                tracing::warn!(
                    dn = %entry.dn,
                    attribute = %attr.name,
                    error = %e,
                    "Group lookup failed; omitting attribute"
                );
                Ok(None)
            }
        }
    }

    async fn translate_filter(
        &self,
        attr: &AttributeType,
        sub_attribute: Option<&str>,
        node: &TerminalNode,
        ctx: &RequestContext<'_>,
    ) -> Option<TranslationResult<LdapFilter>> {
        // Only the forward attribute can be searched directly.
        if secondary(attr).is_some() {
            return None;
        }
        if sub_attribute.is_some_and(|s| !s.eq_ignore_ascii_case("value")) {
            return Some(Err(TranslationError::UnknownFilterAttribute(
                node.attribute_path.clone(),
            )));
        }
        let attribute = attr
            .directory_hint
            .as_deref()
            .unwrap_or(DEFAULT_MEMBER_OF_ATTRIBUTE);

        let result = match (node.operator, node.value.as_deref()) {
            (CompareOp::Pr, _) => Ok(LdapFilter::present(attribute)),
            (CompareOp::Eq, Some(id)) => {
                ctx.resolve_reference(id, None)
                    .await
                    .map(|resolved| match resolved {
                        Some(group) => LdapFilter::equality(attribute, group),
                        None => LdapFilter::Or(Vec::new()),
                    })
            }
            (op, _) => Err(TranslationError::InvalidFilter(format!(
                "Operator '{}' is not supported on '{}'",
                op, node.attribute_path
            ))),
        };
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        directory::{
            DirectoryError, DirectoryGateway, DirectoryResult, DirectoryValue, EntryStream,
            Modification,
        },
        handlers::test_support::*,
        schema::SchemaModel,
    };

    fn groups(model: &SchemaModel) -> &AttributeType {
        model.by_name("User").unwrap().core_attribute("groups").unwrap()
    }

    #[tokio::test]
    async fn test_read_by_secondary_search() {
        let model = model();
        let directory = directory();
        add_user(&directory, "alice", "Alice").await;
        add_user(&directory, "bob", "Bob").await;
        let staff = add_group(&directory, "staff", &["alice", "bob"]).await;
        add_group(&directory, "admins", &["bob"]).await;
        let alice = directory
            .get_by_dn(&format!("uid=alice,{}", PEOPLE))
            .await
            .unwrap()
            .unwrap();

        let ctx = RequestContext {
            resource_type: model.by_name("User").unwrap(),
            schema: &model,
            gateway: &directory,
            base_url: BASE_URL,
        };
        let value = GroupsHandler.read(groups(&model), &alice, &ctx).await.unwrap();

        let Some(AttributeValue::MultiValued(value)) = value else {
            panic!("expected groups");
        };
        assert_eq!(value.groups.len(), 1);
        assert_eq!(value.groups[0].value(), Some(staff.clone()));
        assert_eq!(value.groups[0].type_value(), Some("direct"));
        assert_eq!(
            value.groups[0].get("display").map(|d| d.value.to_string()).as_deref(),
            Some("staff")
        );
        assert_eq!(
            value.groups[0].get("$ref").map(|d| d.value.to_string()),
            Some(format!("{}/Groups/{}", BASE_URL, staff))
        );
    }

    #[tokio::test]
    async fn test_read_without_groups_omits_attribute() {
        let model = model();
        let directory = directory();
        add_user(&directory, "carol", "Carol").await;
        let carol = directory
            .get_by_dn(&format!("uid=carol,{}", PEOPLE))
            .await
            .unwrap()
            .unwrap();
        let ctx = RequestContext {
            resource_type: model.by_name("User").unwrap(),
            schema: &model,
            gateway: &directory,
            base_url: BASE_URL,
        };

        let value = GroupsHandler.read(groups(&model), &carol, &ctx).await.unwrap();
        assert_eq!(value, None);
    }

    /// Gateway whose searches always fail.
    struct Unreachable;

    #[async_trait]
    impl DirectoryGateway for Unreachable {
        async fn search(
            &self,
            _base_dn: &str,
            _filter: &LdapFilter,
            _scope: SearchScope,
            _attributes: &[String],
        ) -> DirectoryResult<EntryStream> {
            Err(DirectoryError::Unavailable("connection refused".into()))
        }

        async fn get_by_dn(&self, _dn: &str) -> DirectoryResult<Option<Entry>> {
            Err(DirectoryError::Unavailable("connection refused".into()))
        }

        async fn add(
            &self,
            _dn: &str,
            _attributes: Vec<(String, Vec<DirectoryValue>)>,
        ) -> DirectoryResult<()> {
            Ok(())
        }

        async fn modify(&self, _dn: &str, _modifications: Vec<Modification>) -> DirectoryResult<()> {
            Ok(())
        }

        async fn delete(&self, _dn: &str) -> DirectoryResult<()> {
            Ok(())
        }

        fn is_binary(&self, _attribute: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_failed_search_degrades_to_none() {
        let model = model();
        let gateway: Arc<dyn DirectoryGateway> = Arc::new(Unreachable);
        let ctx = RequestContext {
            resource_type: model.by_name("User").unwrap(),
            schema: &model,
            gateway: gateway.as_ref(),
            base_url: BASE_URL,
        };
        let entry = Entry::new(format!("uid=alice,{}", PEOPLE));

        let value = GroupsHandler.read(groups(&model), &entry, &ctx).await.unwrap();
        assert_eq!(value, None);

    }

    #[tokio::test]
    async fn test_member_of_without_secondary() {
        let mut mapping = mapping();
        let groups_mapping = mapping.resource_types[0].schemas[0]
            .attributes
            .iter_mut()
            .find(|a| a.name.as_deref() == Some("groups"))
            .unwrap();
        groups_mapping.secondary_base_dn = None;
        groups_mapping.secondary_filter = None;
        let model = SchemaModel::build(&mapping).unwrap();

        let directory = directory();
        add_user(&directory, "alice", "Alice").await;
        let staff = add_group(&directory, "staff", &["alice"]).await;
        let alice = Entry::new(format!("uid=alice,{}", PEOPLE))
            .with_attribute("memberOf", [format!("cn=staff,{}", GROUPS)]);
        let ctx = RequestContext {
            resource_type: model.by_name("User").unwrap(),
            schema: &model,
            gateway: &directory,
            base_url: BASE_URL,
        };

        let value = GroupsHandler.read(groups(&model), &alice, &ctx).await.unwrap();
        let Some(AttributeValue::MultiValued(value)) = value else {
            panic!("expected groups");
        };
        assert_eq!(value.groups[0].value(), Some(staff.clone()));

        let node = TerminalNode {
            attribute_path: "groups.value".into(),
            operator: CompareOp::Eq,
            value: Some(staff),
        };
        let filter = GroupsHandler
            .translate_filter(groups(&model), Some("value"), &node, &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(filter.to_string(), format!("(memberOf=cn=staff,{})", GROUPS));
    }
}
