use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use super::{AttributeHandler, RequestContext};
use crate::{
    directory::{ATTR_CREATE_TIMESTAMP, ATTR_MODIFY_TIMESTAMP, Entry, LdapFilter},
    engine::{TranslationError, TranslationResult, terminal_filter},
    resource::{AttributeValue, SimpleAttribute},
    schema::AttributeType,
    scim::TerminalNode,
};

/// Generalized-time layout of directory timestamps.
const GENERALIZED_TIME: &str = "%Y%m%d%H%M%SZ";

/// Read-only resource metadata: `resourceType`, `created`, `lastModified`
/// and `location`, computed from operational attributes.
pub struct MetaHandler;

/// Generalized time (`20240115093000Z`, optional fraction) to RFC 3339.
fn to_rfc3339(value: &str) -> Option<String> {
    let trimmed = value.trim_end_matches('Z');
    let whole = trimmed.split(['.', ',']).next()?;
    let parsed = NaiveDateTime::parse_from_str(whole, "%Y%m%d%H%M%S").ok()?;
    Some(parsed.and_utc().to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// RFC 3339 to generalized time.
fn to_generalized(value: &str) -> Option<String> {
    let parsed = DateTime::parse_from_rfc3339(value).ok()?;
    Some(parsed.with_timezone(&Utc).format(GENERALIZED_TIME).to_string())
}

#[async_trait]
impl AttributeHandler for MetaHandler {
    async fn read(
        &self,
        attr: &AttributeType,
        entry: &Entry,
        ctx: &RequestContext<'_>,
    ) -> TranslationResult<Option<AttributeValue>> {
        let rt = ctx.resource_type;
        let mut meta = vec![SimpleAttribute::new("resourceType", rt.name.clone())];

        if let Some(created) = entry.first_text(ATTR_CREATE_TIMESTAMP).and_then(to_rfc3339) {
            meta.push(SimpleAttribute::new("created", created));
        }
        if let Some(modified) = entry.first_text(ATTR_MODIFY_TIMESTAMP).and_then(to_rfc3339) {
            meta.push(SimpleAttribute::new("lastModified", modified));
        }
        if let Some(id) = RequestContext::resource_id(rt, entry) {
            meta.push(SimpleAttribute::new("location", ctx.location(rt, &id)));
        }

        Ok(Some(AttributeValue::complex(attr.name.clone(), meta)))
    }

    async fn translate_filter(
        &self,
        attr: &AttributeType,
        sub_attribute: Option<&str>,
        node: &TerminalNode,
        _ctx: &RequestContext<'_>,
    ) -> Option<TranslationResult<LdapFilter>> {
        let directory_attribute = match sub_attribute {
            Some(s) if s.eq_ignore_ascii_case("created") => ATTR_CREATE_TIMESTAMP,
            Some(s) if s.eq_ignore_ascii_case("lastModified") => ATTR_MODIFY_TIMESTAMP,
            _ => {
                return Some(Err(TranslationError::UnknownFilterAttribute(
                    node.attribute_path.clone(),
                )));
            }
        };

        let value = match node.value.as_deref() {
            None => None,
            Some(v) => match to_generalized(v) {
                Some(converted) => Some(converted),
                None => {
                    return Some(Err(TranslationError::InvalidFilter(format!(
                        "'{}.{}' expects an RFC 3339 timestamp, got '{}'",
                        attr.name,
                        sub_attribute.unwrap_or_default(),
                        v
                    ))));
                }
            },
        };
        Some(Ok(terminal_filter(
            directory_attribute,
            node.operator,
            value.as_deref(),
        )))
    }
}
