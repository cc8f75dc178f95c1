//! Partial-update planning.
//!
//! Both accepted PATCH bodies reduce to one [`PatchPlan`]:
//!
//! - the partial-resource form: a resource document whose attributes are
//!   merged into the entry, with `meta.attributes` naming attributes to
//!   clear and multi-valued elements optionally carrying
//!   `"operation": "delete"`;
//! - the RFC 7644 `PatchOp` message.
//!
//! Operations are applied in order to a working copy of the resource, so a
//! path or filter sees the effect of every earlier operation. Each
//! attribute ends up in at most one list of the plan, and the plan is
//! applied as a single modify request.

use serde_json::Value;

use super::{TranslationError, TranslationResult};
use crate::{
    codec,
    resource::{
        AttributeValue, AttributeValueGroup, OPERATION_ATTRIBUTE, OPERATION_DELETE, Resource,
        ScalarValue, SimpleAttribute,
    },
    schema::{AttributeType, ResourceTypeSchema},
    scim::{FilterNode, PatchError, PatchOp, PatchPath, PatchRequest, matches_filter},
};

const KEY_META: &str = "meta";
const KEY_META_ATTRIBUTES: &str = "attributes";

/// Attribute addressed by its owning schema URI and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRef {
    pub schema_uri: String,
    pub name: String,
}

impl AttributeRef {
    fn of(attr: &AttributeType) -> Self {
        Self {
            schema_uri: attr.schema_uri.clone(),
            name: attr.name.clone(),
        }
    }

    fn is(&self, other: &AttributeRef) -> bool {
        self.schema_uri.eq_ignore_ascii_case(&other.schema_uri)
            && self.name.eq_ignore_ascii_case(&other.name)
    }
}

/// Handler calls a PATCH request turns into.
#[derive(Debug, Default, PartialEq)]
pub struct PatchPlan {
    /// Whole-attribute removals, dispatched to `delete_attribute`
    pub removals: Vec<AttributeRef>,
    /// Full replacements, dispatched to `write`
    pub replacements: Vec<(AttributeRef, AttributeValue)>,
    /// Merges into the current value, dispatched to `patch`
    pub updates: Vec<(AttributeRef, AttributeValue)>,
}

impl PatchPlan {
    fn remove(&mut self, target: AttributeRef) {
        self.replacements.retain(|(t, _)| !t.is(&target));
        self.updates.retain(|(t, _)| !t.is(&target));
        if !self.removals.iter().any(|r| r.is(&target)) {
            self.removals.push(target);
        }
    }

    /// `value` is the attribute's complete new content.
    fn replace(&mut self, target: AttributeRef, value: AttributeValue) {
        self.removals.retain(|r| !r.is(&target));
        self.updates.retain(|(t, _)| !t.is(&target));
        match self.replacements.iter_mut().find(|(t, _)| t.is(&target)) {
            Some(slot) => slot.1 = value,
            None => self.replacements.push((target, value)),
        }
    }

    /// Merge `value` into the attribute. `content` is what the attribute
    /// holds afterwards; it is written whole when the attribute was already
    /// cleared or replaced earlier in the request.
    fn update(&mut self, target: AttributeRef, value: AttributeValue, content: AttributeValue) {
        let rewritten = self.removals.iter().any(|r| r.is(&target))
            || self.replacements.iter().any(|(t, _)| t.is(&target));
        if rewritten {
            self.replace(target, content);
            return;
        }
        match self.updates.iter().position(|(t, _)| t.is(&target)) {
            Some(i) => {
                let (target, earlier) = self.updates.remove(i);
                self.updates.insert(i, (target, combined(earlier, value)));
            }
            None => self.updates.push((target, value)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.replacements.is_empty() && self.updates.is_empty()
    }
}

/// Two pending merges into the same attribute as one. Element instructions
/// keep their order.
fn combined(earlier: AttributeValue, later: AttributeValue) -> AttributeValue {
    match (earlier, later) {
        (AttributeValue::MultiValued(mut earlier), AttributeValue::MultiValued(later)) => {
            earlier.groups.extend(later.groups);
            AttributeValue::MultiValued(earlier)
        }
        (AttributeValue::Complex(earlier), AttributeValue::Complex(later)) => {
            AttributeValue::complex(
                later.name,
                overlay(earlier.sub_attributes, &later.sub_attributes),
            )
        }
        (_, later) => later,
    }
}

/// Content of an attribute after merging `update` into `base`.
fn merged(base: Option<&AttributeValue>, update: &AttributeValue) -> AttributeValue {
    match update {
        AttributeValue::MultiValued(update) => {
            let mut groups = match base {
                Some(AttributeValue::MultiValued(base)) => base.groups.clone(),
                _ => Vec::new(),
            };
            for group in &update.groups {
                let position = groups.iter().position(|g| same_element(g, group));
                match (group.is_delete(), position) {
                    (true, Some(i)) => {
                        groups.remove(i);
                    }
                    (false, None) => groups.push(group.clone()),
                    _ => {}
                }
            }
            AttributeValue::multi_valued(update.name.clone(), groups)
        }
        AttributeValue::Complex(update) => {
            let base = match base {
                Some(AttributeValue::Complex(base)) => base.sub_attributes.clone(),
                _ => Vec::new(),
            };
            AttributeValue::complex(update.name.clone(), overlay(base, &update.sub_attributes))
        }
        simple => simple.clone(),
    }
}

fn overlay(mut base: Vec<SimpleAttribute>, update: &[SimpleAttribute]) -> Vec<SimpleAttribute> {
    for sub in update {
        match base
            .iter_mut()
            .find(|s| s.name.eq_ignore_ascii_case(&sub.name))
        {
            Some(existing) => existing.value = sub.value.clone(),
            None => base.push(sub.clone()),
        }
    }
    base
}

/// Elements are the same when their `value`s agree, or when they carry
/// identical sub-attributes if either has no `value`.
fn same_element(a: &AttributeValueGroup, b: &AttributeValueGroup) -> bool {
    if let (Some(x), Some(y)) = (a.value(), b.value()) {
        return x == y;
    }
    let significant = |g: &AttributeValueGroup| -> Vec<SimpleAttribute> {
        g.values
            .iter()
            .filter(|v| !v.name.eq_ignore_ascii_case(OPERATION_ATTRIBUTE))
            .cloned()
            .collect()
    };
    significant(a) == significant(b)
}

/// Plan state: the plan so far and the resource as it stands after the
/// operations planned so far.
struct Planner {
    working: Resource,
    plan: PatchPlan,
}

impl Planner {
    fn new(current: &Resource) -> Self {
        Self {
            working: current.clone(),
            plan: PatchPlan::default(),
        }
    }

    fn remove(&mut self, attr: &AttributeType) {
        self.working.remove(&attr.schema_uri, &attr.name);
        self.plan.remove(AttributeRef::of(attr));
    }

    fn replace(&mut self, attr: &AttributeType, value: AttributeValue) {
        self.working.insert(&attr.schema_uri, value.clone());
        self.plan.replace(AttributeRef::of(attr), value);
    }

    fn update(&mut self, attr: &AttributeType, value: AttributeValue) {
        let content = merged(self.working.get(&attr.schema_uri, &attr.name), &value);
        self.working.insert(&attr.schema_uri, content.clone());
        self.plan.update(AttributeRef::of(attr), value, content);
    }

    fn elements(&self, attr: &AttributeType) -> Vec<AttributeValueGroup> {
        match self.working.get(&attr.schema_uri, &attr.name) {
            Some(AttributeValue::MultiValued(multi)) => multi.groups.clone(),
            _ => Vec::new(),
        }
    }

    fn finish(self) -> PatchPlan {
        self.plan
    }
}

/// Plan a PATCH body of either form.
pub fn plan(
    rt: &ResourceTypeSchema,
    body: &Value,
    current: &Resource,
) -> TranslationResult<PatchPlan> {
    if PatchRequest::is_patch_op(body) {
        let request: PatchRequest = serde_json::from_value(body.clone())
            .map_err(|e| TranslationError::InvalidSyntax(format!("Invalid PatchOp body: {}", e)))?;
        request.validate()?;
        plan_operations(rt, &request, current)
    } else {
        plan_partial(rt, body, current)
    }
}

/// Plan the partial-resource form.
///
/// Removals named in `meta.attributes` come first, then the attributes of
/// the body are merged.
pub fn plan_partial(
    rt: &ResourceTypeSchema,
    body: &Value,
    current: &Resource,
) -> TranslationResult<PatchPlan> {
    let mut body = body.clone();
    let meta = body
        .as_object_mut()
        .ok_or_else(|| TranslationError::InvalidSyntax("Resource body must be a JSON object".into()))?
        .remove(KEY_META);

    let mut planner = Planner::new(current);

    if let Some(cleared) = meta
        .as_ref()
        .and_then(|m| m.get(KEY_META_ATTRIBUTES))
        .and_then(Value::as_array)
    {
        for path in cleared.iter().filter_map(Value::as_str) {
            let (attr, sub) = resolve(rt, path)?;
            match sub {
                None => planner.remove(attr),
                Some(sub) => {
                    if let Some(value) = without_sub_attribute(attr, &planner.working, &sub, None) {
                        planner.replace(attr, value);
                    }
                }
            }
        }
    }

    for (attr, value) in decode_object(rt, &body)? {
        planner.update(attr, value);
    }

    Ok(planner.finish())
}

/// Plan an RFC 7644 `PatchOp` message.
pub fn plan_operations(
    rt: &ResourceTypeSchema,
    request: &PatchRequest,
    current: &Resource,
) -> TranslationResult<PatchPlan> {
    let mut planner = Planner::new(current);

    for op in &request.operations {
        let path = op.parsed_path()?;
        match (op, path) {
            (PatchOp::Add { value, .. }, None) => {
                require_object(value)?;
                for (attr, value) in decode_object(rt, value)? {
                    planner.update(attr, value);
                }
            }
            (PatchOp::Replace { value, .. }, None) => {
                require_object(value)?;
                for (attr, value) in decode_object(rt, value)? {
                    planner.replace(attr, value);
                }
            }
            (PatchOp::Add { value, .. }, Some(path)) => {
                let (attr, _) = resolve(rt, &path.attr)?;
                match (&path.value_filter, &path.sub_attr) {
                    (None, None) => {
                        let value = decode_value(attr, value)?;
                        planner.update(attr, value);
                    }
                    _ => {
                        let value = set_at_path(attr, &planner.working, &path, value)?;
                        planner.replace(attr, value);
                    }
                }
            }
            (PatchOp::Replace { value, .. }, Some(path)) => {
                let (attr, _) = resolve(rt, &path.attr)?;
                let value = match (&path.value_filter, &path.sub_attr) {
                    (None, None) => decode_value(attr, value)?,
                    _ => set_at_path(attr, &planner.working, &path, value)?,
                };
                planner.replace(attr, value);
            }
            (PatchOp::Remove { value, .. }, Some(path)) => {
                let (attr, _) = resolve(rt, &path.attr)?;
                plan_removal(&mut planner, attr, &path, value.as_ref())?;
            }
            (PatchOp::Remove { .. }, None) => return Err(PatchError::NoTarget.into()),
        }
    }

    Ok(planner.finish())
}

fn plan_removal(
    planner: &mut Planner,
    attr: &AttributeType,
    path: &PatchPath,
    value: Option<&Value>,
) -> TranslationResult<()> {
    match (&path.value_filter, &path.sub_attr, value) {
        // Elements listed in the body are removed one by one.
        (None, None, Some(value)) => {
            let AttributeValue::MultiValued(mut multi) = decode_value(attr, value)? else {
                return Err(PatchError::InvalidValue(format!(
                    "'{}' is not multi-valued; remove it without a value",
                    attr.name
                ))
                .into());
            };
            for group in &mut multi.groups {
                group.set(SimpleAttribute::new(OPERATION_ATTRIBUTE, OPERATION_DELETE));
            }
            planner.update(attr, AttributeValue::MultiValued(multi));
        }
        (None, None, None) => planner.remove(attr),
        (None, Some(sub), _) => {
            if let Some(value) = without_sub_attribute(attr, &planner.working, sub, None) {
                planner.replace(attr, value);
            }
        }
        (Some(filter), None, _) => {
            let matched: Vec<AttributeValueGroup> = planner
                .elements(attr)
                .into_iter()
                .filter(|e| matches_filter(filter, e))
                .map(|mut e| {
                    e.set(SimpleAttribute::new(OPERATION_ATTRIBUTE, OPERATION_DELETE));
                    e
                })
                .collect();
            if matched.is_empty() {
                return Err(PatchError::NoTarget.into());
            }
            planner.update(attr, AttributeValue::multi_valued(attr.name.clone(), matched));
        }
        (Some(filter), Some(sub), _) => {
            let Some(value) = without_sub_attribute(attr, &planner.working, sub, Some(filter))
            else {
                return Err(PatchError::NoTarget.into());
            };
            planner.replace(attr, value);
        }
    }
    Ok(())
}

fn resolve<'a>(
    rt: &'a ResourceTypeSchema,
    path: &str,
) -> TranslationResult<(&'a AttributeType, Option<String>)> {
    rt.resolve(path)
        .ok_or_else(|| PatchError::InvalidPath(format!("Unknown attribute '{}'", path)).into())
}

fn require_object(value: &Value) -> TranslationResult<()> {
    if value.is_object() {
        Ok(())
    } else {
        Err(PatchError::InvalidValue("An operation without a path needs an object value".into())
            .into())
    }
}

/// Decode an object of attributes, dropping those the resource type does
/// not know.
fn decode_object<'a>(
    rt: &'a ResourceTypeSchema,
    value: &Value,
) -> TranslationResult<Vec<(&'a AttributeType, AttributeValue)>> {
    let resource = codec::decode(value, &rt.schema_uri)?;
    let mut out = Vec::new();
    for (uri, value) in resource.iter() {
        match rt.attribute(uri, value.name()) {
            Some(attr) => out.push((attr, value.clone())),
            None => tracing::debug!(
                schema = %uri,
                attribute = %value.name(),
                "Ignoring unknown attribute in patch"
            ),
        }
    }
    Ok(out)
}

fn decode_value(attr: &AttributeType, value: &Value) -> TranslationResult<AttributeValue> {
    let decoded = codec::decode_attribute(&attr.name, value)?.ok_or_else(|| {
        PatchError::InvalidValue(format!("'{}' needs a non-null value", attr.name))
    })?;
    // A single object or scalar added to a multi-valued attribute is one element.
    Ok(match decoded {
        AttributeValue::Complex(complex) if attr.is_multi_valued() => AttributeValue::multi_valued(
            complex.name,
            vec![AttributeValueGroup::new(complex.sub_attributes)],
        ),
        AttributeValue::Simple(simple) if attr.is_multi_valued() => AttributeValue::multi_valued(
            simple.name,
            vec![AttributeValueGroup::new(vec![SimpleAttribute::new(
                "value",
                simple.value,
            )])],
        ),
        other => other,
    })
}

fn scalar(attr: &AttributeType, value: &Value) -> TranslationResult<ScalarValue> {
    ScalarValue::from_json(value).ok_or_else(|| {
        PatchError::InvalidValue(format!("'{}' expects a single value here", attr.name)).into()
    })
}

/// New value of `attr` after setting `path`'s sub-attribute or filtered
/// elements to `value`.
fn set_at_path(
    attr: &AttributeType,
    current: &Resource,
    path: &PatchPath,
    value: &Value,
) -> TranslationResult<AttributeValue> {
    if !attr.is_multi_valued() {
        let sub = path.sub_attr.as_deref().ok_or_else(|| {
            PatchError::InvalidPath(format!("'{}' is not multi-valued", attr.name))
        })?;
        let mut subs = match current.get(&attr.schema_uri, &attr.name) {
            Some(AttributeValue::Complex(complex)) => complex.sub_attributes.clone(),
            _ => Vec::new(),
        };
        let scalar = scalar(attr, value)?;
        match subs.iter_mut().find(|s| s.name.eq_ignore_ascii_case(sub)) {
            Some(existing) => existing.value = scalar,
            None => subs.push(SimpleAttribute::new(sub, scalar)),
        }
        return Ok(AttributeValue::complex(attr.name.clone(), subs));
    }

    let mut elements = match current.get(&attr.schema_uri, &attr.name) {
        Some(AttributeValue::MultiValued(multi)) => multi.groups.clone(),
        _ => Vec::new(),
    };
    let mut matched = 0;
    for element in &mut elements {
        if let Some(filter) = &path.value_filter
            && !matches_filter(filter, element)
        {
            continue;
        }
        matched += 1;
        match &path.sub_attr {
            Some(sub) => element.set(SimpleAttribute::new(sub.clone(), scalar(attr, value)?)),
            None => {
                let replacement = match decode_value(attr, value)? {
                    AttributeValue::MultiValued(multi) => {
                        multi.groups.into_iter().next().unwrap_or_default()
                    }
                    AttributeValue::Complex(complex) => {
                        AttributeValueGroup::new(complex.sub_attributes)
                    }
                    AttributeValue::Simple(simple) => AttributeValueGroup::new(vec![
                        SimpleAttribute::new("value", simple.value),
                    ]),
                };
                for sub in replacement.values {
                    element.set(sub);
                }
            }
        }
    }

    if path.value_filter.is_some() && matched == 0 {
        return Err(PatchError::NoTarget.into());
    }
    Ok(AttributeValue::multi_valued(attr.name.clone(), elements))
}

/// Current value of `attr` with `sub` dropped, from every element or only
/// those matching `filter`. `None` when nothing would change.
fn without_sub_attribute(
    attr: &AttributeType,
    current: &Resource,
    sub: &str,
    filter: Option<&FilterNode>,
) -> Option<AttributeValue> {
    match current.get(&attr.schema_uri, &attr.name)? {
        AttributeValue::Complex(complex) => {
            let subs: Vec<SimpleAttribute> = complex
                .sub_attributes
                .iter()
                .filter(|s| !s.name.eq_ignore_ascii_case(sub))
                .cloned()
                .collect();
            (subs.len() != complex.sub_attributes.len())
                .then(|| AttributeValue::complex(attr.name.clone(), subs))
        }
        AttributeValue::MultiValued(multi) => {
            let mut changed = false;
            let groups = multi
                .groups
                .iter()
                .map(|group| {
                    if filter.is_some_and(|f| !matches_filter(f, group)) {
                        return group.clone();
                    }
                    let values: Vec<SimpleAttribute> = group
                        .values
                        .iter()
                        .filter(|s| !s.name.eq_ignore_ascii_case(sub))
                        .cloned()
                        .collect();
                    changed |= values.len() != group.values.len();
                    AttributeValueGroup::new(values)
                })
                .collect();
            changed.then(|| AttributeValue::multi_valued(attr.name.clone(), groups))
        }
        AttributeValue::Simple(_) => None,
    }
}
