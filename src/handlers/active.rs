use async_trait::async_trait;

use super::{AttributeHandler, RequestContext};
use crate::{
    directory::{ATTR_OBJECT_CLASS, DirectoryValue, Entry, LdapFilter, PendingMutation},
    engine::{TranslationError, TranslationResult},
    resource::AttributeValue,
    schema::AttributeType,
    scim::{CompareOp, TerminalNode},
};

/// Derives `active` from an account lock attribute.
///
/// The account is inactive when the lock attribute holds the configured
/// sentinel. Any other state, including an absent attribute or a lock
/// timestamp set by password policy, reads as active.
pub struct ActiveHandler {
    lock_attribute: String,
    lock_value: String,
}

impl ActiveHandler {
    pub fn new(lock_attribute: &str, lock_value: &str) -> Self {
        Self {
            lock_attribute: lock_attribute.to_string(),
            lock_value: lock_value.to_string(),
        }
    }

    fn attribute<'a>(&'a self, attr: &'a AttributeType) -> &'a str {
        attr.directory_hint.as_deref().unwrap_or(&self.lock_attribute)
    }

    fn locked(&self, attribute: &str) -> LdapFilter {
        LdapFilter::equality(attribute, self.lock_value.clone())
    }
}

#[async_trait]
impl AttributeHandler for ActiveHandler {
    async fn read(
        &self,
        attr: &AttributeType,
        entry: &Entry,
        _ctx: &RequestContext<'_>,
    ) -> TranslationResult<Option<AttributeValue>> {
        let locked = entry.has_value(
            self.attribute(attr),
            &DirectoryValue::Text(self.lock_value.clone()),
        );
        Ok(Some(AttributeValue::simple(attr.name.clone(), !locked)))
    }

    async fn write(
        &self,
        attr: &AttributeType,
        value: &AttributeValue,
        mutation: &mut PendingMutation,
        _ctx: &RequestContext<'_>,
    ) -> TranslationResult<()> {
        if attr.read_only {
            return Ok(());
        }
        let active = match value {
            AttributeValue::Simple(simple) => simple.value.as_bool(),
            _ => None,
        }
        .ok_or_else(|| {
            TranslationError::InvalidValue(format!("Attribute '{}' must be a boolean", attr.name))
        })?;

        let values = if active {
            Vec::new()
        } else {
            vec![DirectoryValue::Text(self.lock_value.clone())]
        };
        mutation.replace(self.attribute(attr), values);
        Ok(())
    }

    async fn delete_attribute(
        &self,
        attr: &AttributeType,
        entry: &Entry,
        mutation: &mut PendingMutation,
        _ctx: &RequestContext<'_>,
    ) -> TranslationResult<()> {
        let attribute = self.attribute(attr);
        if !attr.read_only && entry.contains(attribute) {
            mutation.delete_attribute(attribute);
        }
        Ok(())
    }

    async fn translate_filter(
        &self,
        attr: &AttributeType,
        _sub_attribute: Option<&str>,
        node: &TerminalNode,
        _ctx: &RequestContext<'_>,
    ) -> Option<TranslationResult<LdapFilter>> {
        let attribute = self.attribute(attr);
        if node.operator == CompareOp::Pr {
            return Some(Ok(LdapFilter::present(ATTR_OBJECT_CLASS)));
        }

        let wanted = match node.value.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("true") => true,
            Some("false") => false,
            _ => {
                return Some(Err(TranslationError::InvalidFilter(format!(
                    "'{}' only compares with true or false",
                    attr.name
                ))));
            }
        };
        let active = match node.operator {
            CompareOp::Eq => wanted,
            CompareOp::Ne => !wanted,
            other => {
                return Some(Err(TranslationError::InvalidFilter(format!(
                    "Operator '{}' is not supported on '{}'",
                    other, attr.name
                ))));
            }
        };

        let locked = self.locked(attribute);
        Some(Ok(if active {
            LdapFilter::not(locked)
        } else {
            locked
        }))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{
        config::HandlersConfig,
        directory::Modification,
        handlers::test_support::*,
        schema::SchemaModel,
    };

    fn handler() -> ActiveHandler {
        let config = HandlersConfig::default();
        ActiveHandler::new(&config.lock_attribute, &config.lock_value)
    }

    fn active(model: &SchemaModel) -> &AttributeType {
        model.by_name("User").unwrap().core_attribute("active").unwrap()
    }

    #[rstest]
    #[case(None, true)]
    #[case(Some("000001010000Z"), false)]
    #[case(Some("20240101000000Z"), true)]
    #[tokio::test]
    async fn test_read(#[case] lock: Option<&str>, #[case] expected: bool) {
        let model = model();
        let directory = directory();
        let ctx = RequestContext {
            resource_type: model.by_name("User").unwrap(),
            schema: &model,
            gateway: &directory,
            base_url: BASE_URL,
        };
        let mut entry = Entry::new("uid=bjensen");
        if let Some(lock) = lock {
            entry = entry.with_attribute("pwdAccountLockedTime", [lock]);
        }

        let value = handler().read(active(&model), &entry, &ctx).await.unwrap();
        assert_eq!(value, Some(AttributeValue::simple("active", expected)));
    }

    #[tokio::test]
    async fn test_write() {
        let model = model();
        let directory = directory();
        let ctx = RequestContext {
            resource_type: model.by_name("User").unwrap(),
            schema: &model,
            gateway: &directory,
            base_url: BASE_URL,
        };

        let mut mutation = PendingMutation::new();
        handler()
            .write(active(&model), &AttributeValue::simple("active", false), &mut mutation, &ctx)
            .await
            .unwrap();
        handler()
            .write(active(&model), &AttributeValue::simple("active", "True"), &mut mutation, &ctx)
            .await
            .unwrap();
        assert_eq!(
            mutation.modifications(),
            &[
                Modification::Replace {
                    attribute: "pwdAccountLockedTime".into(),
                    values: vec!["000001010000Z".into()],
                },
                Modification::Replace {
                    attribute: "pwdAccountLockedTime".into(),
                    values: vec![],
                },
            ]
        );

        let err = handler()
            .write(active(&model), &AttributeValue::simple("active", "maybe"), &mut mutation, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, TranslationError::InvalidValue(_)));
    }

    #[rstest]
    #[case("active eq false", "(pwdAccountLockedTime=000001010000Z)")]
    #[case("active eq true", "(!(pwdAccountLockedTime=000001010000Z))")]
    #[case("active ne false", "(!(pwdAccountLockedTime=000001010000Z))")]
    #[case("active pr", "(objectClass=*)")]
    #[tokio::test]
    async fn test_translate_filter(#[case] filter: &str, #[case] expected: &str) {
        let model = model();
        let directory = directory();
        let ctx = RequestContext {
            resource_type: model.by_name("User").unwrap(),
            schema: &model,
            gateway: &directory,
            base_url: BASE_URL,
        };
        let node = crate::scim::parse_filter(filter).unwrap();
        let crate::scim::FilterNode::Terminal(terminal) = node else {
            panic!("expected a terminal");
        };

        let translated = handler()
            .translate_filter(active(&model), None, &terminal, &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(translated.to_string(), expected);
    }

    #[tokio::test]
    async fn test_translate_filter_rejects_ordering() {
        let model = model();
        let directory = directory();
        let ctx = RequestContext {
            resource_type: model.by_name("User").unwrap(),
            schema: &model,
            gateway: &directory,
            base_url: BASE_URL,
        };
        let terminal = TerminalNode {
            attribute_path: "active".into(),
            operator: CompareOp::Gt,
            value: Some("true".into()),
        };

        let result = handler()
            .translate_filter(active(&model), None, &terminal, &ctx)
            .await
            .unwrap();
        assert!(matches!(result, Err(TranslationError::InvalidFilter(_))));
    }
}
