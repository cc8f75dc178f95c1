//! Native directory filters (RFC 4515).
//!
//! Filters are used in three places: the default filter of each resource
//! type, secondary-search templates carrying `$attribute` placeholders, and
//! the output of SCIM filter translation.
//!
//! # Syntax
//!
//! ```text
//! (&(objectClass=inetOrgPerson)(!(uid=admin)))
//! (|(mail=*@example.com)(cn=Jo*n*))
//! (member=$dn)
//! ```
//!
//! A value made entirely of `$name` is a placeholder. [`LdapFilter::substitute`]
//! replaces placeholders with the values of the named attribute on a
//! primary entry (`$dn` is the entry's DN) and returns a new tree.

use std::fmt;

use super::{DirectoryError, DirectoryResult, DirectoryValue, Entry};

/// Placeholder resolving to the DN of the primary entry.
pub const PLACEHOLDER_DN: &str = "dn";

#[derive(Debug, Clone, PartialEq)]
pub enum LdapFilter {
    And(Vec<LdapFilter>),
    Or(Vec<LdapFilter>),
    Not(Box<LdapFilter>),
    Equality {
        attribute: String,
        value: AssertionValue,
    },
    Substring {
        attribute: String,
        initial: Option<AssertionValue>,
        any: Vec<AssertionValue>,
        final_: Option<AssertionValue>,
    },
    GreaterOrEqual {
        attribute: String,
        value: AssertionValue,
    },
    LessOrEqual {
        attribute: String,
        value: AssertionValue,
    },
    Present {
        attribute: String,
    },
}

/// The right-hand side of a filter item.
#[derive(Debug, Clone, PartialEq)]
pub enum AssertionValue {
    Value(DirectoryValue),
    Placeholder(String),
}

impl AssertionValue {
    pub fn text(s: impl Into<String>) -> Self {
        AssertionValue::Value(DirectoryValue::Text(s.into()))
    }
}

impl From<DirectoryValue> for AssertionValue {
    fn from(value: DirectoryValue) -> Self {
        AssertionValue::Value(value)
    }
}

impl LdapFilter {
    pub fn equality(attribute: impl Into<String>, value: impl Into<DirectoryValue>) -> Self {
        LdapFilter::Equality {
            attribute: attribute.into(),
            value: AssertionValue::Value(value.into()),
        }
    }

    pub fn present(attribute: impl Into<String>) -> Self {
        LdapFilter::Present {
            attribute: attribute.into(),
        }
    }

    pub fn not(filter: LdapFilter) -> Self {
        LdapFilter::Not(Box::new(filter))
    }

    /// Conjunction of two filters, flattening nested `&`.
    pub fn and_with(self, other: LdapFilter) -> Self {
        let mut items = match self {
            LdapFilter::And(items) => items,
            single => vec![single],
        };
        match other {
            LdapFilter::And(more) => items.extend(more),
            single => items.push(single),
        }
        LdapFilter::And(items)
    }

    pub fn has_placeholders(&self) -> bool {
        match self {
            LdapFilter::And(items) | LdapFilter::Or(items) => {
                items.iter().any(LdapFilter::has_placeholders)
            }
            LdapFilter::Not(inner) => inner.has_placeholders(),
            LdapFilter::Equality { value, .. }
            | LdapFilter::GreaterOrEqual { value, .. }
            | LdapFilter::LessOrEqual { value, .. } => {
                matches!(value, AssertionValue::Placeholder(_))
            }
            LdapFilter::Substring { .. } | LdapFilter::Present { .. } => false,
        }
    }

    /// Build a new filter with every placeholder replaced by values of
    /// `entry`. The template itself is left untouched.
    ///
    /// A multi-valued source attribute expands into an `|` of equalities;
    /// a missing one becomes the empty `(|)`, which matches nothing.
    pub fn substitute(&self, entry: &Entry) -> LdapFilter {
        match self {
            LdapFilter::And(items) => {
                LdapFilter::And(items.iter().map(|f| f.substitute(entry)).collect())
            }
            LdapFilter::Or(items) => {
                LdapFilter::Or(items.iter().map(|f| f.substitute(entry)).collect())
            }
            LdapFilter::Not(inner) => LdapFilter::not(inner.substitute(entry)),
            LdapFilter::Equality {
                attribute,
                value: AssertionValue::Placeholder(name),
            } => {
                let mut values = placeholder_values(name, entry);
                if values.len() == 1 {
                    LdapFilter::Equality {
                        attribute: attribute.clone(),
                        value: AssertionValue::Value(values.remove(0)),
                    }
                } else {
                    LdapFilter::Or(
                        values
                            .into_iter()
                            .map(|v| LdapFilter::equality(attribute.clone(), v))
                            .collect(),
                    )
                }
            }
            LdapFilter::GreaterOrEqual {
                attribute,
                value: AssertionValue::Placeholder(name),
            } => match placeholder_values(name, entry).into_iter().next() {
                Some(v) => LdapFilter::GreaterOrEqual {
                    attribute: attribute.clone(),
                    value: AssertionValue::Value(v),
                },
                None => LdapFilter::Or(Vec::new()),
            },
            LdapFilter::LessOrEqual {
                attribute,
                value: AssertionValue::Placeholder(name),
            } => match placeholder_values(name, entry).into_iter().next() {
                Some(v) => LdapFilter::LessOrEqual {
                    attribute: attribute.clone(),
                    value: AssertionValue::Value(v),
                },
                None => LdapFilter::Or(Vec::new()),
            },
            other => other.clone(),
        }
    }
}

fn placeholder_values(name: &str, entry: &Entry) -> Vec<DirectoryValue> {
    if name.eq_ignore_ascii_case(PLACEHOLDER_DN) {
        return vec![DirectoryValue::Text(entry.dn.clone())];
    }
    entry.get(name).map(<[_]>::to_vec).unwrap_or_default()
}

// =============================================================================
// Rendering
// =============================================================================

impl fmt::Display for LdapFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LdapFilter::And(items) => {
                write!(f, "(&")?;
                for item in items {
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            LdapFilter::Or(items) => {
                write!(f, "(|")?;
                for item in items {
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            LdapFilter::Not(inner) => write!(f, "(!{})", inner),
            LdapFilter::Equality { attribute, value } => write!(f, "({}={})", attribute, value),
            LdapFilter::Substring {
                attribute,
                initial,
                any,
                final_,
            } => {
                write!(f, "({}=", attribute)?;
                if let Some(initial) = initial {
                    write!(f, "{}", initial)?;
                }
                write!(f, "*")?;
                for part in any {
                    write!(f, "{}*", part)?;
                }
                if let Some(final_) = final_ {
                    write!(f, "{}", final_)?;
                }
                write!(f, ")")
            }
            LdapFilter::GreaterOrEqual { attribute, value } => {
                write!(f, "({}>={})", attribute, value)
            }
            LdapFilter::LessOrEqual { attribute, value } => {
                write!(f, "({}<={})", attribute, value)
            }
            LdapFilter::Present { attribute } => write!(f, "({}=*)", attribute),
        }
    }
}

impl fmt::Display for AssertionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssertionValue::Placeholder(name) => write!(f, "${}", name),
            AssertionValue::Value(DirectoryValue::Text(s)) => write!(f, "{}", escape_value(s)),
            AssertionValue::Value(DirectoryValue::Binary(bytes)) => {
                for b in bytes {
                    write!(f, "\\{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// Escape an assertion value (RFC 4515 section 3).
pub fn escape_value(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00");
    // A leading '$' would read back as a placeholder.
    match escaped.strip_prefix('$') {
        Some(rest) => format!("\\24{}", rest),
        None => escaped,
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse an RFC 4515 filter. A single item may omit its outer parentheses.
pub fn parse(input: &str) -> DirectoryResult<LdapFilter> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DirectoryError::InvalidFilter("Empty filter".to_string()));
    }

    let wrapped;
    let source = if trimmed.starts_with('(') {
        trimmed
    } else {
        wrapped = format!("({})", trimmed);
        &wrapped
    };

    let mut parser = Parser {
        input: source,
        pos: 0,
    };
    let filter = parser.filter()?;
    if parser.pos != source.len() {
        return Err(parser.error("Unexpected trailing characters"));
    }
    Ok(filter)
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn error(&self, message: &str) -> DirectoryError {
        DirectoryError::InvalidFilter(format!("{} at position {}", message, self.pos))
    }

    fn expect(&mut self, byte: u8) -> DirectoryResult<()> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("Expected '{}'", byte as char)))
        }
    }

    fn filter(&mut self) -> DirectoryResult<LdapFilter> {
        self.expect(b'(')?;
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                LdapFilter::And(self.filter_list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                LdapFilter::Or(self.filter_list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                LdapFilter::not(self.filter()?)
            }
            Some(_) => self.item()?,
            None => return Err(self.error("Unexpected end of filter")),
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn filter_list(&mut self) -> DirectoryResult<Vec<LdapFilter>> {
        let mut items = Vec::new();
        while self.peek() == Some(b'(') {
            items.push(self.filter()?);
        }
        Ok(items)
    }

    fn item(&mut self) -> DirectoryResult<LdapFilter> {
        let start = self.pos;
        while let Some(b) = self.peek()
            && (b.is_ascii_alphanumeric() || b == b'-' || b == b'.' || b == b';')
        {
            self.pos += 1;
        }
        let attribute = self.input[start..self.pos].to_string();
        if attribute.is_empty() {
            return Err(self.error("Expected attribute description"));
        }

        let next = self.input.as_bytes().get(self.pos + 1).copied();
        let kind = match (self.peek(), next) {
            (Some(b'='), _) => {
                self.pos += 1;
                b'='
            }
            (Some(b'>'), Some(b'=')) => {
                self.pos += 2;
                b'>'
            }
            (Some(b'<'), Some(b'=')) => {
                self.pos += 2;
                b'<'
            }
            (Some(b'~'), Some(b'=')) => {
                return Err(self.error("Approximate match is not supported"));
            }
            _ => return Err(self.error("Expected filter type")),
        };

        let value_start = self.pos;
        while let Some(b) = self.peek()
            && b != b')'
        {
            if b == b'(' {
                return Err(self.error("Unescaped '(' in assertion value"));
            }
            self.pos += 1;
        }
        let raw = &self.input[value_start..self.pos];

        match kind {
            b'>' => Ok(LdapFilter::GreaterOrEqual {
                attribute,
                value: self.assertion(raw, value_start)?,
            }),
            b'<' => Ok(LdapFilter::LessOrEqual {
                attribute,
                value: self.assertion(raw, value_start)?,
            }),
            _ if raw == "*" => Ok(LdapFilter::Present { attribute }),
            _ if raw.contains('*') => {
                let mut parts: Vec<&str> = raw.split('*').collect();
                let final_part = parts.pop().unwrap_or_default();
                let initial_part = if parts.is_empty() {
                    ""
                } else {
                    parts.remove(0)
                };
                let optional = |part: &str| -> DirectoryResult<Option<AssertionValue>> {
                    if part.is_empty() {
                        Ok(None)
                    } else {
                        Ok(Some(AssertionValue::Value(unescape(part, value_start)?)))
                    }
                };
                let any = parts
                    .into_iter()
                    .filter(|p| !p.is_empty())
                    .map(|p| unescape(p, value_start).map(AssertionValue::Value))
                    .collect::<DirectoryResult<Vec<_>>>()?;
                Ok(LdapFilter::Substring {
                    attribute,
                    initial: optional(initial_part)?,
                    any,
                    final_: optional(final_part)?,
                })
            }
            _ => Ok(LdapFilter::Equality {
                attribute,
                value: self.assertion(raw, value_start)?,
            }),
        }
    }

    fn assertion(&self, raw: &str, offset: usize) -> DirectoryResult<AssertionValue> {
        if let Some(name) = raw.strip_prefix('$')
            && !name.is_empty()
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.')
        {
            return Ok(AssertionValue::Placeholder(name.to_string()));
        }
        unescape(raw, offset).map(AssertionValue::Value)
    }
}

/// Decode `\xx` escapes. Results that are not UTF-8 stay binary.
fn unescape(raw: &str, offset: usize) -> DirectoryResult<DirectoryValue> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let hex = raw
                .get(i + 1..i + 3)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| {
                    DirectoryError::InvalidFilter(format!(
                        "Invalid escape sequence at position {}",
                        offset + i
                    ))
                })?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(match String::from_utf8(out) {
        Ok(text) => DirectoryValue::Text(text),
        Err(e) => DirectoryValue::Binary(e.into_bytes()),
    })
}
