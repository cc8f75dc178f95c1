use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};

use super::{AttributeHandler, RequestContext};
use crate::{
    directory::{DirectoryValue, Entry, PendingMutation},
    engine::{TranslationError, TranslationResult},
    resource::{AttributeValue, AttributeValueGroup, ScalarValue, SimpleAttribute},
    schema::{
        AttributeKind, AttributeType, MultiValuedShape, SimpleAttributeType, TYPE_SUB_ATTRIBUTE,
        TypedVariantType,
    },
};

/// Static mapping between wire attributes and directory attributes.
pub struct DefaultHandler;

/// Wire form of a directory value; binary values travel as base64.
pub(crate) fn to_wire(value: &DirectoryValue) -> ScalarValue {
    match value {
        DirectoryValue::Text(s) => ScalarValue::String(s.clone()),
        DirectoryValue::Binary(b) => ScalarValue::String(STANDARD.encode(b)),
    }
}

/// Directory form of a wire scalar for `attribute`.
pub(crate) fn to_directory(
    attribute: &str,
    value: &ScalarValue,
    ctx: &RequestContext<'_>,
) -> TranslationResult<DirectoryValue> {
    if !ctx.gateway.is_binary(attribute) {
        return Ok(DirectoryValue::Text(value.to_string()));
    }
    let encoded = value.as_str().ok_or_else(|| {
        TranslationError::InvalidValue(format!(
            "Binary attribute '{}' expects a base64 string",
            attribute
        ))
    })?;
    STANDARD
        .decode(encoded)
        .map(DirectoryValue::Binary)
        .map_err(|e| {
            TranslationError::InvalidValue(format!(
                "Binary attribute '{}' is not valid base64: {}",
                attribute, e
            ))
        })
}

fn mismatch(attr: &AttributeType, expected: &str) -> TranslationError {
    TranslationError::InvalidValue(format!(
        "Attribute '{}' expects {}",
        attr.name, expected
    ))
}

/// Build the elements of a multi-valued attribute: the n-th value of every
/// mapped sub-attribute forms the n-th element.
fn read_elements(
    subs: &[SimpleAttributeType],
    entry: &Entry,
    type_value: Option<&str>,
) -> Vec<AttributeValueGroup> {
    let columns: Vec<(&str, &[DirectoryValue])> = subs
        .iter()
        .filter_map(|sub| {
            let values = entry.get(sub.directory_attribute.as_deref()?)?;
            Some((sub.name.as_str(), values))
        })
        .collect();
    let rows = columns.iter().map(|(_, v)| v.len()).max().unwrap_or(0);

    (0..rows)
        .map(|i| {
            let mut group = AttributeValueGroup::default();
            for (name, values) in &columns {
                if let Some(value) = values.get(i) {
                    group.set(SimpleAttribute::new(*name, to_wire(value)));
                }
            }
            if let Some(type_value) = type_value {
                group.set(SimpleAttribute::new(TYPE_SUB_ATTRIBUTE, type_value));
            }
            group
        })
        .collect()
}

/// Pick the variant an element belongs to. Elements without a type go to
/// the first variant.
fn select_variant<'v>(
    attr: &AttributeType,
    variants: &'v [TypedVariantType],
    group: &AttributeValueGroup,
) -> TranslationResult<Option<&'v TypedVariantType>> {
    match group.type_value() {
        Some(wanted) => variants
            .iter()
            .find(|v| v.type_value.eq_ignore_ascii_case(wanted))
            .map(Some)
            .ok_or_else(|| {
                TranslationError::InvalidValue(format!(
                    "Attribute '{}' has no type '{}'",
                    attr.name, wanted
                ))
            }),
        None => Ok(variants.first()),
    }
}

/// Collect, per mapped directory attribute, the values the given elements
/// carry for it.
fn collect_columns(
    subs: &[SimpleAttributeType],
    groups: &[&AttributeValueGroup],
    ctx: &RequestContext<'_>,
) -> TranslationResult<Vec<(String, Vec<DirectoryValue>)>> {
    let mut columns = Vec::with_capacity(subs.len());
    for sub in subs {
        let Some(directory_attribute) = sub.directory_attribute.as_deref() else {
            continue;
        };
        let mut values = Vec::new();
        for group in groups {
            if let Some(value) = group.get(&sub.name) {
                values.push(to_directory(directory_attribute, &value.value, ctx)?);
            }
        }
        columns.push((directory_attribute.to_string(), values));
    }
    Ok(columns)
}

/// Elements of a multi-valued value; a bare scalar or object counts as one
/// element.
fn elements(value: &AttributeValue) -> Vec<AttributeValueGroup> {
    match value {
        AttributeValue::MultiValued(multi) => multi.groups.clone(),
        AttributeValue::Simple(simple) => vec![AttributeValueGroup::new(vec![
            SimpleAttribute::new("value", simple.value.clone()),
        ])],
        AttributeValue::Complex(complex) => {
            vec![AttributeValueGroup::new(complex.sub_attributes.clone())]
        }
    }
}

#[async_trait]
impl AttributeHandler for DefaultHandler {
    async fn read(
        &self,
        attr: &AttributeType,
        entry: &Entry,
        _ctx: &RequestContext<'_>,
    ) -> TranslationResult<Option<AttributeValue>> {
        let value = match &attr.kind {
            AttributeKind::Simple(simple) => simple
                .directory_attribute
                .as_deref()
                .and_then(|a| entry.first(a))
                .map(|v| AttributeValue::simple(attr.name.clone(), to_wire(v))),
            AttributeKind::Complex(complex) => {
                let subs: Vec<SimpleAttribute> = complex
                    .sub_attributes
                    .iter()
                    .filter_map(|sub| {
                        let value = entry.first(sub.directory_attribute.as_deref()?)?;
                        Some(SimpleAttribute::new(sub.name.clone(), to_wire(value)))
                    })
                    .collect();
                (!subs.is_empty()).then(|| AttributeValue::complex(attr.name.clone(), subs))
            }
            AttributeKind::MultiValued(multi) => {
                let groups = match &multi.shape {
                    MultiValuedShape::Group(subs) => read_elements(subs, entry, None),
                    MultiValuedShape::Typed(variants) => variants
                        .iter()
                        .flat_map(|v| read_elements(&v.sub_attributes, entry, Some(&v.type_value)))
                        .collect(),
                };
                (!groups.is_empty()).then(|| AttributeValue::multi_valued(attr.name.clone(), groups))
            }
        };
        Ok(value)
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

        match &attr.kind {
            AttributeKind::Simple(simple) => {
                let AttributeValue::Simple(value) = value else {
                    return Err(mismatch(attr, "a single value"));
                };
                if let Some(directory_attribute) = simple.directory_attribute.as_deref() {
                    let value = to_directory(directory_attribute, &value.value, ctx)?;
                    mutation.replace(directory_attribute, vec![value]);
                }
            }
            AttributeKind::Complex(complex) => {
                let AttributeValue::Complex(value) = value else {
                    return Err(mismatch(attr, "an object"));
                };
                for sub in &complex.sub_attributes {
                    let Some(directory_attribute) = sub.directory_attribute.as_deref() else {
                        continue;
                    };
                    let values = match value.get(&sub.name) {
                        Some(v) => vec![to_directory(directory_attribute, &v.value, ctx)?],
                        None => Vec::new(),
                    };
                    mutation.replace(directory_attribute, values);
                }
            }
            AttributeKind::MultiValued(multi) => {
                let groups = elements(value);
                let kept: Vec<&AttributeValueGroup> =
                    groups.iter().filter(|g| !g.is_delete()).collect();

                match &multi.shape {
                    MultiValuedShape::Group(subs) => {
                        for (directory_attribute, values) in collect_columns(subs, &kept, ctx)? {
                            mutation.replace(&directory_attribute, values);
                        }
                    }
                    MultiValuedShape::Typed(variants) => {
                        let mut buckets: Vec<Vec<&AttributeValueGroup>> =
                            vec![Vec::new(); variants.len()];
                        for group in &kept {
                            if let Some(variant) = select_variant(attr, variants, group)?
                                && let Some(i) = variants
                                    .iter()
                                    .position(|v| v.type_value == variant.type_value)
                            {
                                buckets[i].push(group);
                            }
                        }
                        for (variant, bucket) in variants.iter().zip(&buckets) {
                            for (directory_attribute, values) in
                                collect_columns(&variant.sub_attributes, bucket, ctx)?
                            {
                                mutation.replace(&directory_attribute, values);
                            }
                        }
                    }
                }
            }
        }
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

        match &attr.kind {
            AttributeKind::Simple(_) => self.write(attr, value, mutation, ctx).await,
            AttributeKind::Complex(complex) => {
                let AttributeValue::Complex(value) = value else {
                    return Err(mismatch(attr, "an object"));
                };
                for sub in &complex.sub_attributes {
                    if let (Some(directory_attribute), Some(v)) =
                        (sub.directory_attribute.as_deref(), value.get(&sub.name))
                    {
                        let v = to_directory(directory_attribute, &v.value, ctx)?;
                        mutation.replace(directory_attribute, vec![v]);
                    }
                }
                Ok(())
            }
            AttributeKind::MultiValued(multi) => {
                // Final presence per (attribute, value); the last element wins.
                let mut wanted: Vec<(String, DirectoryValue, bool)> = Vec::new();
                for group in elements(value) {
                    let subs: &[SimpleAttributeType] = match &multi.shape {
                        MultiValuedShape::Group(subs) => subs,
                        MultiValuedShape::Typed(variants) => {
                            match select_variant(attr, variants, &group)? {
                                Some(variant) => &variant.sub_attributes,
                                None => continue,
                            }
                        }
                    };

                    let keep = !group.is_delete();
                    for (directory_attribute, values) in collect_columns(subs, &[&group], ctx)? {
                        for v in values {
                            match wanted.iter_mut().find(|(a, existing, _)| {
                                a.eq_ignore_ascii_case(&directory_attribute) && existing.matches(&v)
                            }) {
                                Some(slot) => slot.2 = keep,
                                None => wanted.push((directory_attribute.clone(), v, keep)),
                            }
                        }
                    }
                }

                for (directory_attribute, v, keep) in wanted {
                    let present = entry.has_value(&directory_attribute, &v);
                    if keep && !present {
                        mutation.add_values(&directory_attribute, vec![v]);
                    } else if !keep && present {
                        mutation.delete_values(&directory_attribute, vec![v]);
                    }
                }
                Ok(())
            }
        }
    }

    async fn delete_attribute(
        &self,
        attr: &AttributeType,
        entry: &Entry,
        mutation: &mut PendingMutation,
        _ctx: &RequestContext<'_>,
    ) -> TranslationResult<()> {
        if attr.read_only {
            return Ok(());
        }
        for directory_attribute in attr.directory_attributes() {
            if entry.contains(directory_attribute) {
                mutation.delete_attribute(directory_attribute);
            }
        }
        Ok(())
    }
}
