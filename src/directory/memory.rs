use std::{cmp::Ordering, collections::HashSet};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use dashmap::{DashMap, mapref::entry::Entry as Slot};
use futures::{StreamExt, stream};
use uuid::Uuid;

use super::{
    ATTR_CREATE_TIMESTAMP, ATTR_ENTRY_UUID, ATTR_MODIFY_TIMESTAMP, ATTR_OBJECT_CLASS,
    AssertionValue, DirectoryError, DirectoryGateway, DirectoryResult, DirectoryValue, Entry,
    EntryStream, LdapFilter, Modification, SearchScope, dn,
};
use crate::config::{DirectoryConfig, NonEmptyConstraint};

/// Generalized-time layout used for operational timestamps.
const GENERALIZED_TIME: &str = "%Y%m%d%H%M%SZ";

/// Directory kept in process memory, keyed by normalized DN.
///
/// Each entry lives in one DashMap shard, so a modify request is applied to
/// a copy under the shard lock and committed only when every constraint
/// still holds.
pub struct InMemoryDirectory {
    entries: DashMap<String, Entry>,
    binary_attributes: HashSet<String>,
    constraints: Vec<NonEmptyConstraint>,
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            binary_attributes: HashSet::new(),
            constraints: Vec::new(),
        }
    }

    pub fn with_binary_attributes<S: AsRef<str>>(
        mut self,
        attributes: impl IntoIterator<Item = S>,
    ) -> Self {
        self.binary_attributes
            .extend(attributes.into_iter().map(|a| a.as_ref().to_ascii_lowercase()));
        self
    }

    /// Require entries of `object_class` to keep at least one `attribute`
    /// value.
    pub fn with_constraint(mut self, object_class: &str, attribute: &str) -> Self {
        self.constraints.push(NonEmptyConstraint {
            object_class: object_class.to_string(),
            attribute: attribute.to_string(),
        });
        self
    }

    /// Build from configuration, loading the seed entries.
    pub fn from_config(config: &DirectoryConfig) -> DirectoryResult<Self> {
        let mut directory = Self::new().with_binary_attributes(&config.binary_attributes);
        directory.constraints = config.constraints.clone();

        for seed in &config.entries {
            let mut attributes = Vec::with_capacity(seed.attributes.len());
            for (name, values) in &seed.attributes {
                let values = values
                    .iter()
                    .map(|v| {
                        if directory.is_binary(name) {
                            STANDARD.decode(v).map(DirectoryValue::Binary).map_err(|e| {
                                DirectoryError::Other(format!(
                                    "Seed entry '{}': attribute '{}' is not valid base64: {}",
                                    seed.dn, name, e
                                ))
                            })
                        } else {
                            Ok(DirectoryValue::Text(v.to_string()))
                        }
                    })
                    .collect::<DirectoryResult<Vec<_>>>()?;
                attributes.push((name.clone(), values));
            }
            directory.insert(&seed.dn, attributes)?;
        }

        tracing::debug!(
            entries = directory.entries.len(),
            constraints = directory.constraints.len(),
            "Loaded in-memory directory"
        );
        Ok(directory)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&self, dn: &str, attributes: Vec<(String, Vec<DirectoryValue>)>) -> DirectoryResult<()> {
        let mut entry = Entry::new(dn);
        for (name, values) in &attributes {
            entry.add_values(name, values);
        }

        let now = timestamp();
        if !entry.contains(ATTR_ENTRY_UUID) {
            entry.set(ATTR_ENTRY_UUID, vec![Uuid::new_v4().to_string().into()]);
        }
        if !entry.contains(ATTR_CREATE_TIMESTAMP) {
            entry.set(ATTR_CREATE_TIMESTAMP, vec![now.clone().into()]);
        }
        if !entry.contains(ATTR_MODIFY_TIMESTAMP) {
            entry.set(ATTR_MODIFY_TIMESTAMP, vec![now.into()]);
        }

        self.check_constraints(&entry)?;

        match self.entries.entry(dn::normalize(dn)) {
            Slot::Occupied(_) => Err(DirectoryError::AlreadyExists(dn.to_string())),
            Slot::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    fn check_constraints(&self, entry: &Entry) -> DirectoryResult<()> {
        for constraint in &self.constraints {
            let applies = entry.has_value(
                ATTR_OBJECT_CLASS,
                &DirectoryValue::Text(constraint.object_class.clone()),
            );
            if applies && !entry.contains(&constraint.attribute) {
                return Err(DirectoryError::ConstraintViolation(format!(
                    "'{}' entries require at least one '{}' value ({})",
                    constraint.object_class, constraint.attribute, entry.dn
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryGateway for InMemoryDirectory {
    async fn search(
        &self,
        base_dn: &str,
        filter: &LdapFilter,
        scope: SearchScope,
        attributes: &[String],
    ) -> DirectoryResult<EntryStream> {
        let base = dn::normalize(base_dn);
        let mut found: Vec<(String, Entry)> = self
            .entries
            .iter()
            .filter(|item| in_scope(item.key(), &base, scope) && evaluate(filter, item.value()))
            .map(|item| (item.key().clone(), item.value().project(attributes)))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));

        tracing::debug!(
            base_dn,
            filter = %filter,
            ?scope,
            results = found.len(),
            "Directory search"
        );

        Ok(stream::iter(found.into_iter().map(|(_, entry)| Ok(entry))).boxed())
    }

    async fn get_by_dn(&self, dn: &str) -> DirectoryResult<Option<Entry>> {
        Ok(self
            .entries
            .get(&dn::normalize(dn))
            .map(|entry| entry.value().clone()))
    }

    async fn add(
        &self,
        dn: &str,
        attributes: Vec<(String, Vec<DirectoryValue>)>,
    ) -> DirectoryResult<()> {
        self.insert(dn, attributes)?;
        tracing::debug!(dn, "Added directory entry");
        Ok(())
    }

    async fn modify(&self, dn: &str, modifications: Vec<Modification>) -> DirectoryResult<()> {
        let mut stored = self
            .entries
            .get_mut(&dn::normalize(dn))
            .ok_or_else(|| DirectoryError::NoSuchObject(dn.to_string()))?;

        let mut updated = stored.value().clone();
        for modification in &modifications {
            modification.apply(&mut updated);
        }
        self.check_constraints(&updated)?;
        updated.set(ATTR_MODIFY_TIMESTAMP, vec![timestamp().into()]);
        *stored = updated;

        tracing::debug!(
            dn,
            modifications = modifications.len(),
            "Applied modify request"
        );
        Ok(())
    }

    async fn delete(&self, dn: &str) -> DirectoryResult<()> {
        self.entries
            .remove(&dn::normalize(dn))
            .map(|_| tracing::debug!(dn, "Deleted directory entry"))
            .ok_or_else(|| DirectoryError::NoSuchObject(dn.to_string()))
    }

    fn is_binary(&self, attribute: &str) -> bool {
        let lower = attribute.to_ascii_lowercase();
        lower.ends_with(";binary") || self.binary_attributes.contains(&lower)
    }
}

fn timestamp() -> String {
    chrono::Utc::now().format(GENERALIZED_TIME).to_string()
}

fn in_scope(normalized_dn: &str, base: &str, scope: SearchScope) -> bool {
    match scope {
        SearchScope::Base => normalized_dn == base,
        SearchScope::OneLevel => dn::is_child_of(normalized_dn, base),
        SearchScope::Subtree => dn::is_within(normalized_dn, base),
    }
}

fn evaluate(filter: &LdapFilter, entry: &Entry) -> bool {
    match filter {
        LdapFilter::And(items) => items.iter().all(|f| evaluate(f, entry)),
        LdapFilter::Or(items) => items.iter().any(|f| evaluate(f, entry)),
        LdapFilter::Not(inner) => !evaluate(inner, entry),
        LdapFilter::Equality {
            attribute,
            value: AssertionValue::Value(value),
        } => entry.has_value(attribute, value),
        LdapFilter::Substring {
            attribute,
            initial,
            any,
            final_,
        } => entry.get(attribute).is_some_and(|values| {
            values
                .iter()
                .any(|v| substring_match(&v.to_text_lossy().to_lowercase(), initial, any, final_))
        }),
        LdapFilter::GreaterOrEqual {
            attribute,
            value: AssertionValue::Value(value),
        } => entry.get(attribute).is_some_and(|values| {
            values.iter().any(|v| compare(v, value) != Ordering::Less)
        }),
        LdapFilter::LessOrEqual {
            attribute,
            value: AssertionValue::Value(value),
        } => entry.get(attribute).is_some_and(|values| {
            values.iter().any(|v| compare(v, value) != Ordering::Greater)
        }),
        LdapFilter::Present { attribute } => {
            attribute.eq_ignore_ascii_case(ATTR_OBJECT_CLASS) || entry.contains(attribute)
        }
        // Unresolved placeholders never match.
        LdapFilter::Equality { .. }
        | LdapFilter::GreaterOrEqual { .. }
        | LdapFilter::LessOrEqual { .. } => false,
    }
}

fn compare(stored: &DirectoryValue, asserted: &DirectoryValue) -> Ordering {
    let a = stored.to_text_lossy();
    let b = asserted.to_text_lossy();
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.to_lowercase().cmp(&b.to_lowercase()),
    }
}

fn lowered(value: &AssertionValue) -> Option<String> {
    match value {
        AssertionValue::Value(v) => Some(v.to_text_lossy().to_lowercase()),
        AssertionValue::Placeholder(_) => None,
    }
}

fn substring_match(
    value: &str,
    initial: &Option<AssertionValue>,
    any: &[AssertionValue],
    final_: &Option<AssertionValue>,
) -> bool {
    let mut rest = value;

    if let Some(initial) = initial {
        let Some(prefix) = lowered(initial) else {
            return false;
        };
        match rest.strip_prefix(prefix.as_str()) {
            Some(r) => rest = r,
            None => return false,
        }
    }

    for part in any {
        let Some(part) = lowered(part) else {
            return false;
        };
        match rest.find(part.as_str()) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }

    match final_ {
        Some(final_) => lowered(final_).is_some_and(|suffix| rest.ends_with(suffix.as_str())),
        None => true,
    }
}
