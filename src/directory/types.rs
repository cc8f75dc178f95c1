use std::{borrow::Cow, collections::BTreeMap};

/// A single attribute value as held by the directory.
///
/// Whether an attribute is binary is a property of its syntax; the gateway
/// answers that through [`DirectoryGateway::is_binary`](super::DirectoryGateway::is_binary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryValue {
    Text(String),
    Binary(Vec<u8>),
}

impl DirectoryValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            DirectoryValue::Text(s) => Some(s),
            DirectoryValue::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            DirectoryValue::Text(s) => s.as_bytes(),
            DirectoryValue::Binary(b) => b,
        }
    }

    pub fn to_text_lossy(&self) -> Cow<'_, str> {
        match self {
            DirectoryValue::Text(s) => Cow::Borrowed(s),
            DirectoryValue::Binary(b) => String::from_utf8_lossy(b),
        }
    }

    /// Equality under a case-ignoring match for text and an octet match
    /// otherwise.
    pub fn matches(&self, other: &DirectoryValue) -> bool {
        match (self, other) {
            (DirectoryValue::Text(a), DirectoryValue::Text(b)) => {
                a.eq_ignore_ascii_case(b) || a.to_lowercase() == b.to_lowercase()
            }
            _ => self.as_bytes() == other.as_bytes(),
        }
    }
}

impl From<&str> for DirectoryValue {
    fn from(s: &str) -> Self {
        DirectoryValue::Text(s.to_string())
    }
}

impl From<String> for DirectoryValue {
    fn from(s: String) -> Self {
        DirectoryValue::Text(s)
    }
}

impl From<Vec<u8>> for DirectoryValue {
    fn from(b: Vec<u8>) -> Self {
        DirectoryValue::Binary(b)
    }
}

/// A directory entry. Attribute names are matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Entry {
    pub dn: String,
    attributes: BTreeMap<String, Vec<DirectoryValue>>,
}

impl Entry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute<V: Into<DirectoryValue>>(
        mut self,
        name: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.set(name, values.into_iter().map(Into::into).collect());
        self
    }

    /// Values of an attribute; `None` when absent or empty.
    pub fn get(&self, name: &str) -> Option<&[DirectoryValue]> {
        self.attributes
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .filter(|values| !values.is_empty())
    }

    pub fn first(&self, name: &str) -> Option<&DirectoryValue> {
        self.get(name).and_then(|values| values.first())
    }

    pub fn first_text(&self, name: &str) -> Option<&str> {
        self.first(name).and_then(DirectoryValue::as_text)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn has_value(&self, name: &str, value: &DirectoryValue) -> bool {
        self.get(name)
            .is_some_and(|values| values.iter().any(|v| v.matches(value)))
    }

    /// Replace all values of an attribute. An empty list removes it.
    pub fn set(&mut self, name: &str, values: Vec<DirectoryValue>) {
        let key = name.to_ascii_lowercase();
        if values.is_empty() {
            self.attributes.remove(&key);
        } else {
            self.attributes.insert(key, values);
        }
    }

    /// Append values that are not already present.
    pub fn add_values(&mut self, name: &str, values: &[DirectoryValue]) {
        let existing = self.attributes.entry(name.to_ascii_lowercase()).or_default();
        for value in values {
            if !existing.iter().any(|v| v.matches(value)) {
                existing.push(value.clone());
            }
        }
        if existing.is_empty() {
            self.attributes.remove(&name.to_ascii_lowercase());
        }
    }

    /// Remove matching values; the attribute disappears once empty.
    pub fn remove_values(&mut self, name: &str, values: &[DirectoryValue]) {
        let key = name.to_ascii_lowercase();
        if let Some(existing) = self.attributes.get_mut(&key) {
            existing.retain(|v| !values.iter().any(|r| r.matches(v)));
            if existing.is_empty() {
                self.attributes.remove(&key);
            }
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.attributes.remove(&name.to_ascii_lowercase());
    }

    /// Attribute names (lower-cased) and values.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &[DirectoryValue])> {
        self.attributes
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Copy restricted to the named attributes. An empty list keeps all.
    pub fn project(&self, names: &[String]) -> Entry {
        if names.is_empty() {
            return self.clone();
        }
        let mut projected = Entry::new(self.dn.clone());
        for name in names {
            if let Some(values) = self.get(name) {
                projected.set(name, values.to_vec());
            }
        }
        projected
    }
}

/// One change within a modify request.
#[derive(Debug, Clone, PartialEq)]
pub enum Modification {
    Add {
        attribute: String,
        values: Vec<DirectoryValue>,
    },
    /// Replace all values; an empty list removes the attribute.
    Replace {
        attribute: String,
        values: Vec<DirectoryValue>,
    },
    /// Remove the listed values; an empty list removes the attribute.
    Delete {
        attribute: String,
        values: Vec<DirectoryValue>,
    },
}

impl Modification {
    pub fn attribute(&self) -> &str {
        match self {
            Modification::Add { attribute, .. }
            | Modification::Replace { attribute, .. }
            | Modification::Delete { attribute, .. } => attribute,
        }
    }

    /// Apply to an entry in place.
    pub fn apply(&self, entry: &mut Entry) {
        match self {
            Modification::Add { attribute, values } => entry.add_values(attribute, values),
            Modification::Replace { attribute, values } => entry.set(attribute, values.clone()),
            Modification::Delete { attribute, values } if values.is_empty() => {
                entry.remove(attribute)
            }
            Modification::Delete { attribute, values } => entry.remove_values(attribute, values),
        }
    }
}

/// Directory changes accumulated while translating one request.
///
/// Handlers append to it; the engine turns it into a single `add` or
/// `modify` call, or no call at all when it stays empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingMutation {
    modifications: Vec<Modification>,
}

impl PendingMutation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_values(&mut self, attribute: &str, values: Vec<DirectoryValue>) {
        if values.is_empty() {
            return;
        }
        self.modifications.push(Modification::Add {
            attribute: attribute.to_string(),
            values,
        });
    }

    pub fn replace(&mut self, attribute: &str, values: Vec<DirectoryValue>) {
        self.modifications.push(Modification::Replace {
            attribute: attribute.to_string(),
            values,
        });
    }

    pub fn delete_values(&mut self, attribute: &str, values: Vec<DirectoryValue>) {
        if values.is_empty() {
            return;
        }
        self.modifications.push(Modification::Delete {
            attribute: attribute.to_string(),
            values,
        });
    }

    pub fn delete_attribute(&mut self, attribute: &str) {
        self.modifications.push(Modification::Delete {
            attribute: attribute.to_string(),
            values: Vec::new(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.modifications.is_empty()
    }

    pub fn modifications(&self) -> &[Modification] {
        &self.modifications
    }

    pub fn into_modifications(self) -> Vec<Modification> {
        self.modifications
    }

    /// Fold the changes into the attribute set of a new entry.
    pub fn to_attributes(&self) -> Vec<(String, Vec<DirectoryValue>)> {
        let mut folded = Entry::default();
        for modification in &self.modifications {
            modification.apply(&mut folded);
        }

        // Keep first-mention order and spelling for readability in logs.
        let mut out: Vec<(String, Vec<DirectoryValue>)> = Vec::new();
        for modification in &self.modifications {
            let name = modification.attribute();
            if out.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)) {
                continue;
            }
            if let Some(values) = folded.get(name) {
                out.push((name.to_string(), values.to_vec()));
            }
        }
        out
    }

    /// Net values an attribute would hold on a new entry.
    pub fn values_for(&self, attribute: &str) -> Option<Vec<DirectoryValue>> {
        let mut folded = Entry::default();
        for modification in self
            .modifications
            .iter()
            .filter(|m| m.attribute().eq_ignore_ascii_case(attribute))
        {
            modification.apply(&mut folded);
        }
        folded.get(attribute).map(<[DirectoryValue]>::to_vec)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Base,
    OneLevel,
    Subtree,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_lookup_ignores_case() {
        let entry = Entry::new("uid=bjensen,ou=people,dc=example,dc=com")
            .with_attribute("givenName", ["Barbara"]);

        assert_eq!(entry.first_text("GIVENNAME"), Some("Barbara"));
        assert!(entry.has_value("givenname", &"barbara".into()));
        assert!(entry.get("sn").is_none());
    }

    #[test]
    fn test_modifications_apply() {
        let mut entry = Entry::new("cn=admins").with_attribute("member", ["a", "b"]);

        Modification::Add {
            attribute: "member".into(),
            values: vec!["B".into(), "c".into()],
        }
        .apply(&mut entry);
        assert_eq!(entry.get("member").unwrap().len(), 3);

        Modification::Delete {
            attribute: "member".into(),
            values: vec!["a".into()],
        }
        .apply(&mut entry);
        assert!(!entry.has_value("member", &"a".into()));

        Modification::Delete {
            attribute: "member".into(),
            values: vec![],
        }
        .apply(&mut entry);
        assert!(!entry.contains("member"));
    }

    #[test]
    fn test_pending_mutation_folds_for_add() {
        let mut pending = PendingMutation::new();
        pending.replace("uid", vec!["bjensen".into()]);
        pending.add_values("mail", vec!["a@example.com".into()]);
        pending.add_values("mail", vec!["b@example.com".into()]);
        pending.delete_attribute("description");
        pending.add_values("telephoneNumber", vec![]);

        assert_eq!(
            pending.to_attributes(),
            vec![
                ("uid".to_string(), vec!["bjensen".into()]),
                (
                    "mail".to_string(),
                    vec!["a@example.com".into(), "b@example.com".into()]
                ),
            ]
        );
        assert_eq!(pending.values_for("UID"), Some(vec!["bjensen".into()]));
        assert_eq!(pending.values_for("description"), None);
        assert_eq!(pending.modifications().len(), 4);
    }
}
