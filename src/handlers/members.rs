use async_trait::async_trait;

use super::{AttributeHandler, RequestContext};
use crate::{
    directory::{DirectoryValue, Entry, LdapFilter, PendingMutation, dn},
    engine::{TranslationError, TranslationResult},
    resource::{AttributeValue, AttributeValueGroup},
    schema::AttributeType,
    scim::{CompareOp, TerminalNode},
};

const DEFAULT_MEMBER_ATTRIBUTE: &str = "member";

/// Group membership stored as member DNs.
///
/// Group object classes usually require at least one member, so a group
/// that would end up empty keeps a sentinel DN instead. The sentinel is
/// never shown on the wire.
pub struct MembersHandler {
    sentinel: String,
}

impl MembersHandler {
    pub fn new(sentinel: &str) -> Self {
        Self {
            sentinel: sentinel.to_string(),
        }
    }

    fn attribute<'a>(&self, attr: &'a AttributeType) -> &'a str {
        attr.directory_hint
            .as_deref()
            .unwrap_or(DEFAULT_MEMBER_ATTRIBUTE)
    }

    fn is_sentinel(&self, value: &str) -> bool {
        dn::normalize(value) == dn::normalize(&self.sentinel)
    }

    fn sentinel_value(&self) -> DirectoryValue {
        DirectoryValue::Text(self.sentinel.clone())
    }

    /// Member DN for a wire element, resolving its `value` id.
    async fn member_dn(
        &self,
        group: &AttributeValueGroup,
        ctx: &RequestContext<'_>,
    ) -> TranslationResult<Option<String>> {
        let Some(id) = group.value() else {
            return Err(TranslationError::InvalidValue(
                "Member elements need a 'value'".to_string(),
            ));
        };
        ctx.resolve_reference(&id, group.type_value()).await
    }
}

/// DNs currently stored on the entry.
fn current_members(entry: &Entry, attribute: &str) -> Vec<String> {
    entry
        .get(attribute)
        .unwrap_or_default()
        .iter()
        .map(|v| v.to_text_lossy().into_owned())
        .collect()
}

fn position_of(members: &[String], member: &str) -> Option<usize> {
    let wanted = dn::normalize(member);
    members.iter().position(|m| dn::normalize(m) == wanted)
}

fn groups_of(value: &AttributeValue) -> Vec<AttributeValueGroup> {
    match value {
        AttributeValue::MultiValued(multi) => multi.groups.clone(),
        AttributeValue::Complex(complex) => {
            vec![AttributeValueGroup::new(complex.sub_attributes.clone())]
        }
        AttributeValue::Simple(simple) => vec![AttributeValueGroup::new(vec![
            crate::resource::SimpleAttribute::new("value", simple.value.clone()),
        ])],
    }
}

#[async_trait]
impl AttributeHandler for MembersHandler {
    async fn read(
        &self,
        attr: &AttributeType,
        entry: &Entry,
        ctx: &RequestContext<'_>,
    ) -> TranslationResult<Option<AttributeValue>> {
        let mut groups = Vec::new();

        for member in current_members(entry, self.attribute(attr)) {
            if self.is_sentinel(&member) {
                continue;
            }
            match ctx.gateway.get_by_dn(&member).await {
                Ok(Some(target)) => {
                    if let Some(reference) = ctx.reference_for(&target, None) {
                        groups.push(reference);
                    }
                }
                Ok(None) => {
                    tracing::debug!(group = %entry.dn, member = %member, "Skipping dangling member");
                }
                Err(e) => {
                    tracing::warn!(
                        group = %entry.dn,
                        member = %member,
                        error = %e,
                        "Failed to resolve member"
                    );
                }
            }
        }

        Ok((!groups.is_empty()).then(|| AttributeValue::multi_valued(attr.name.clone(), groups)))
    }

    async fn write(
        &self,
        attr: &AttributeType,
        value: &AttributeValue,
        mutation: &mut PendingMutation,
        ctx: &RequestContext<'_>,
    ) -> TranslationResult<()> {
        if attr.read_only {
            return Ok(());
        }

        let mut members: Vec<DirectoryValue> = Vec::new();
        for group in groups_of(value).iter().filter(|g| !g.is_delete()) {
            let member = self.member_dn(group, ctx).await?.ok_or_else(|| {
                TranslationError::InvalidValue(format!(
                    "Member '{}' does not exist",
                    group.value().unwrap_or_default()
                ))
            })?;
            let member = DirectoryValue::Text(member);
            if !members.iter().any(|m| m.matches(&member)) {
                members.push(member);
            }
        }
        if members.is_empty() {
            members.push(self.sentinel_value());
        }

        mutation.replace(self.attribute(attr), members);
        Ok(())
    }

    async fn patch(
        &self,
        attr: &AttributeType,
        value: &AttributeValue,
        entry: &Entry,
        mutation: &mut PendingMutation,
        ctx: &RequestContext<'_>,
    ) -> TranslationResult<()> {
        if attr.read_only {
            return Ok(());
        }
        let attribute = self.attribute(attr);

        let mut members: Vec<String> = current_members(entry, attribute)
            .into_iter()
            .filter(|m| !self.is_sentinel(m))
            .collect();
        let had_sentinel = current_members(entry, attribute)
            .iter()
            .any(|m| self.is_sentinel(m));
        let mut additions = Vec::new();
        let mut removals = Vec::new();

        for group in groups_of(value) {
            let resolved = self.member_dn(&group, ctx).await?;
            let position = resolved.as_deref().and_then(|m| position_of(&members, m));

            // A later instruction for the same member cancels an earlier one.
            match (group.is_delete(), resolved, position) {
                (true, Some(_), Some(i)) => {
                    let member = members.remove(i);
                    match position_of(&additions, &member) {
                        Some(j) => {
                            additions.remove(j);
                        }
                        None => removals.push(member),
                    }
                }
                (true, _, _) => {}
                (false, Some(member), None) => {
                    members.push(member.clone());
                    match position_of(&removals, &member) {
                        Some(j) => {
                            removals.remove(j);
                        }
                        None => additions.push(member),
                    }
                }
                (false, Some(_), Some(_)) => {}
                (false, None, _) => {
                    return Err(TranslationError::InvalidValue(format!(
                        "Member '{}' does not exist",
                        group.value().unwrap_or_default()
                    )));
                }
            }
        }

        let mut additions: Vec<DirectoryValue> =
            additions.into_iter().map(DirectoryValue::Text).collect();
        let mut removals: Vec<DirectoryValue> =
            removals.into_iter().map(DirectoryValue::Text).collect();
        if members.is_empty() && !had_sentinel {
            additions.push(self.sentinel_value());
        } else if !members.is_empty() && had_sentinel {
            removals.push(self.sentinel_value());
        }

        mutation.add_values(attribute, additions);
        mutation.delete_values(attribute, removals);
        Ok(())
    }

    async fn initialize(
        &self,
        attr: &AttributeType,
        mutation: &mut PendingMutation,
        _ctx: &RequestContext<'_>,
    ) -> TranslationResult<()> {
        if !attr.read_only {
            mutation.replace(self.attribute(attr), vec![self.sentinel_value()]);
        }
        Ok(())
    }

    async fn delete_attribute(
        &self,
        attr: &AttributeType,
        _entry: &Entry,
        mutation: &mut PendingMutation,
        _ctx: &RequestContext<'_>,
    ) -> TranslationResult<()> {
        if !attr.read_only {
            mutation.replace(self.attribute(attr), vec![self.sentinel_value()]);
        }
        Ok(())
    }

    async fn translate_filter(
        &self,
        attr: &AttributeType,
        sub_attribute: Option<&str>,
        node: &TerminalNode,
        ctx: &RequestContext<'_>,
    ) -> Option<TranslationResult<LdapFilter>> {
        if sub_attribute.is_some_and(|s| !s.eq_ignore_ascii_case("value")) {
            return Some(Err(TranslationError::UnknownFilterAttribute(
                node.attribute_path.clone(),
            )));
        }
        let attribute = self.attribute(attr);

        let result = match (node.operator, node.value.as_deref()) {
            (CompareOp::Pr, _) => Ok(LdapFilter::not(LdapFilter::equality(
                attribute,
                self.sentinel.clone(),
            ))),
            (op @ (CompareOp::Eq | CompareOp::Ne), Some(id)) => {
                ctx.resolve_reference(id, None).await.map(|resolved| {
                    let filter = match resolved {
                        Some(member) => LdapFilter::equality(attribute, member),
                        None => LdapFilter::Or(Vec::new()),
                    };
                    if op == CompareOp::Ne {
                        LdapFilter::not(filter)
                    } else {
                        filter
                    }
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
