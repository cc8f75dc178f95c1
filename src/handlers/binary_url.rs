use async_trait::async_trait;

use super::{AttributeHandler, RequestContext};
use crate::{
    directory::Entry,
    engine::TranslationResult,
    resource::{AttributeValue, AttributeValueGroup, SimpleAttribute},
    schema::AttributeType,
};

/// Binary directory values exposed as download URLs instead of inline
/// base64, e.g. `photos` over `jpegPhoto`.
///
/// Each value `i` is served from
/// `{base}{endpoint}/{id}/binary/{attribute}/{i}`.
pub struct BinaryUrlHandler;

/// Name the handler is registered under.
pub const BINARY_URL_HANDLER: &str = "binary_url";

/// URL path of the `index`-th value of `attribute` on a resource.
pub fn binary_url(ctx: &RequestContext<'_>, id: &str, attribute: &str, index: usize) -> String {
    format!(
        "{}/binary/{}/{}",
        ctx.location(ctx.resource_type, id),
        attribute,
        index
    )
}

#[async_trait]
impl AttributeHandler for BinaryUrlHandler {
    async fn read(
        &self,
        attr: &AttributeType,
        entry: &Entry,
        ctx: &RequestContext<'_>,
    ) -> TranslationResult<Option<AttributeValue>> {
        let Some(attribute) = attr.directory_hint.as_deref() else {
            return Ok(None);
        };
        let Some(id) = RequestContext::resource_id(ctx.resource_type, entry) else {
            return Ok(None);
        };
        let count = entry.get(attribute).map_or(0, <[_]>::len);
        if count == 0 {
            return Ok(None);
        }

        let groups = (0..count)
            .map(|i| {
                AttributeValueGroup::new(vec![SimpleAttribute::new(
                    "value",
                    binary_url(ctx, &id, &attr.name, i),
                )])
            })
            .collect();
        Ok(Some(AttributeValue::multi_valued(attr.name.clone(), groups)))
    }
}
