//! Distinguished-name helpers (RFC 4514).

/// Escape a value for use inside an RDN.
///
/// Escapes `, + " \ < > ; =`, a leading `#` or space, a trailing space and
/// NUL.
pub fn escape_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len() * 2);
    let last = value.chars().count().saturating_sub(1);

    for (i, ch) in value.chars().enumerate() {
        match ch {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                result.push('\\');
                result.push(ch);
            }
            '#' if i == 0 => result.push_str("\\23"),
            ' ' if i == 0 || i == last => result.push_str("\\20"),
            '\0' => result.push_str("\\00"),
            _ => result.push(ch),
        }
    }
    result
}

/// `attribute=value,base` with the value escaped.
pub fn build(rdn_attribute: &str, value: &str, base_dn: &str) -> String {
    format!("{}={},{}", rdn_attribute, escape_value(value), base_dn)
}

/// Split a DN into its RDN components at unescaped commas.
fn components(dn: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, ch) in dn.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            ',' => {
                parts.push(&dn[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < dn.len() || !parts.is_empty() {
        parts.push(&dn[start..]);
    }
    parts
}

/// Canonical form for comparisons: lower-cased, with the optional space
/// around `,` and `=` removed.
pub fn normalize(dn: &str) -> String {
    components(dn)
        .into_iter()
        .map(|rdn| match rdn.split_once('=') {
            Some((attr, value)) => format!(
                "{}={}",
                attr.trim().to_lowercase(),
                value.trim().to_lowercase()
            ),
            None => rdn.trim().to_lowercase(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// DN of the parent entry, if any.
pub fn parent(dn: &str) -> Option<String> {
    let parts = components(dn);
    if parts.len() < 2 {
        return None;
    }
    Some(
        parts[1..]
            .iter()
            .map(|p| p.trim())
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Whether `dn` equals `base` or sits anywhere beneath it.
pub fn is_within(dn: &str, base: &str) -> bool {
    let dn = normalize(dn);
    let base = normalize(base);
    if base.is_empty() {
        return true;
    }
    dn == base || dn.ends_with(&format!(",{}", base))
}

/// Whether `dn` is an immediate child of `base`.
pub fn is_child_of(dn: &str, base: &str) -> bool {
    parent(dn).is_some_and(|p| normalize(&p) == normalize(base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_value() {
        assert_eq!(escape_value("Jensen, Barbara"), "Jensen\\, Barbara");
        assert_eq!(escape_value("#admin"), "\\23admin");
        assert_eq!(escape_value(" padded "), "\\20padded\\20");
        assert_eq!(escape_value("a+b=c"), "a\\+b\\=c");
        assert_eq!(escape_value(""), "");
    }

    #[test]
    fn test_build() {
        assert_eq!(
            build("cn", "Jensen, Barbara", "ou=people,dc=example,dc=com"),
            "cn=Jensen\\, Barbara,ou=people,dc=example,dc=com"
        );
    }

    #[test]
    fn test_normalize_and_parent() {
        assert_eq!(
            normalize("UID=BJensen, OU=People,dc=Example"),
            "uid=bjensen,ou=people,dc=example"
        );
        assert_eq!(
            parent("cn=Jensen\\, Barbara,ou=people,dc=example").as_deref(),
            Some("ou=people,dc=example")
        );
        assert_eq!(parent("dc=com"), None);
    }

    #[test]
    fn test_scope_checks() {
        let base = "ou=people,dc=example,dc=com";
        assert!(is_within("uid=a,ou=People,dc=example,dc=com", base));
        assert!(is_within(base, base));
        assert!(!is_within("uid=a,ou=groups,dc=example,dc=com", base));
        assert!(!is_within("uid=a,xou=people,dc=example,dc=com", base));

        assert!(is_child_of("uid=a,ou=people,dc=example,dc=com", base));
        assert!(!is_child_of("uid=a,ou=x,ou=people,dc=example,dc=com", base));
    }
}
