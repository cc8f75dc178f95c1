//! SCIM filter → directory filter translation.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use futures::{FutureExt, future::BoxFuture};

use super::{TranslationError, TranslationResult};
use crate::{
    directory::{AssertionValue, DirectoryValue, LdapFilter},
    handlers::{HandlerBindings, RequestContext},
    scim::{CompareOp, FilterNode, LogicalOp, TerminalNode},
};

/// Wire attribute that always maps to the resource type's id attribute.
const ID_ATTRIBUTE: &str = "id";

/// Directory filter for one comparison on a directory attribute.
///
/// `gt`/`lt` have no native operator and render as `>=`/`<=` with the
/// equal value excluded.
pub fn terminal_filter(attribute: &str, operator: CompareOp, value: Option<&str>) -> LdapFilter {
    compare(
        attribute,
        operator,
        DirectoryValue::Text(value.unwrap_or_default().to_string()),
    )
}

fn compare(attribute: &str, operator: CompareOp, value: DirectoryValue) -> LdapFilter {
    let attribute = attribute.to_string();
    let assertion = AssertionValue::Value(value.clone());
    match operator {
        CompareOp::Eq => LdapFilter::equality(attribute, value),
        CompareOp::Ne => LdapFilter::not(LdapFilter::equality(attribute, value)),
        CompareOp::Co => LdapFilter::Substring {
            attribute,
            initial: None,
            any: vec![assertion],
            final_: None,
        },
        CompareOp::Sw => LdapFilter::Substring {
            attribute,
            initial: Some(assertion),
            any: Vec::new(),
            final_: None,
        },
        CompareOp::Ew => LdapFilter::Substring {
            attribute,
            initial: None,
            any: Vec::new(),
            final_: Some(assertion),
        },
        CompareOp::Gt => LdapFilter::And(vec![
            LdapFilter::GreaterOrEqual {
                attribute: attribute.clone(),
                value: assertion,
            },
            LdapFilter::not(LdapFilter::equality(attribute, value)),
        ]),
        CompareOp::Ge => LdapFilter::GreaterOrEqual {
            attribute,
            value: assertion,
        },
        CompareOp::Lt => LdapFilter::And(vec![
            LdapFilter::LessOrEqual {
                attribute: attribute.clone(),
                value: assertion,
            },
            LdapFilter::not(LdapFilter::equality(attribute, value)),
        ]),
        CompareOp::Le => LdapFilter::LessOrEqual {
            attribute,
            value: assertion,
        },
        CompareOp::Pr => LdapFilter::present(attribute),
    }
}

/// Join two operands, flattening runs of the same operator.
fn join(operator: LogicalOp, left: LdapFilter, right: LdapFilter) -> LdapFilter {
    let mut items = Vec::new();
    for operand in [left, right] {
        match (operator, operand) {
            (LogicalOp::And, LdapFilter::And(inner)) | (LogicalOp::Or, LdapFilter::Or(inner))
                if !inner.is_empty() =>
            {
                items.extend(inner)
            }
            (_, other) => items.push(other),
        }
    }
    match operator {
        LogicalOp::And => LdapFilter::And(items),
        LogicalOp::Or => LdapFilter::Or(items),
    }
}

/// Translate a parsed SCIM filter for the context's resource type.
///
/// Branches keep the parser's left-deep shape. The resource type's default
/// filter is not applied here.
pub fn translate<'a>(
    node: &'a FilterNode,
    ctx: &'a RequestContext<'a>,
    bindings: &'a HandlerBindings,
) -> BoxFuture<'a, TranslationResult<LdapFilter>> {
    async move {
        match node {
            FilterNode::Terminal(terminal) => translate_terminal(terminal, ctx, bindings).await,
            FilterNode::Branch(branch) => {
                let left = translate(&branch.left, ctx, bindings).await?;
                let right = translate(&branch.right, ctx, bindings).await?;
                Ok(join(branch.operator, left, right))
            }
        }
    }
    .boxed()
}

async fn translate_terminal(
    terminal: &TerminalNode,
    ctx: &RequestContext<'_>,
    bindings: &HandlerBindings,
) -> TranslationResult<LdapFilter> {
    let rt = ctx.resource_type;
    let path = terminal.attribute_path.as_str();

    if path.eq_ignore_ascii_case(ID_ATTRIBUTE) {
        return Ok(terminal_filter(
            &rt.id_attribute,
            terminal.operator,
            terminal.value.as_deref(),
        ));
    }

    let (attr, sub) = rt
        .resolve(path)
        .ok_or_else(|| TranslationError::UnknownFilterAttribute(path.to_string()))?;

    let handler = bindings.get(rt, attr)?;
    if let Some(translated) = handler
        .translate_filter(attr, sub.as_deref(), terminal, ctx)
        .await
    {
        return translated;
    }

    let targets = attr.resolve_path(sub.as_deref());
    if targets.is_empty() {
        return Err(TranslationError::UnknownFilterAttribute(path.to_string()));
    }

    let mut filters = Vec::with_capacity(targets.len());
    for target in targets {
        let value = match terminal.value.as_deref() {
            Some(v) if ctx.gateway.is_binary(target) => {
                let bytes = STANDARD.decode(v).map_err(|e| {
                    TranslationError::InvalidFilter(format!(
                        "'{}' compares binary values and needs base64: {}",
                        path, e
                    ))
                })?;
                DirectoryValue::Binary(bytes)
            }
            v => DirectoryValue::Text(v.unwrap_or_default().to_string()),
        };
        filters.push(compare(target, terminal.operator, value));
    }

    Ok(match filters.len() {
        1 => filters.remove(0),
        // A value held by any variant matches; a negation must hold for all.
        _ if terminal.operator == CompareOp::Ne => LdapFilter::And(filters),
        _ => LdapFilter::Or(filters),
    })
}
