//! SCIM Filter Parser
//!
//! Turns a SCIM filter string into a [`FilterNode`] tree.
//!
//! ## Grammar
//!
//! ```text
//! filter    = operand { ("and" | "or") operand }
//! operand   = "(" filter ")" | predicate
//! predicate = ATTRPATH "pr" | ATTRPATH compareOp VALUE
//! compareOp = "eq" | "ne" | "co" | "sw" | "ew" | "gt" | "ge" | "lt" | "le"
//! VALUE     = token up to the next unquoted, unescaped space
//! ```
//!
//! `and` and `or` share one precedence level. Every branch keyword absorbs the
//! tree built so far as its left operand, so `a eq 1 or b eq 2 and c eq 3`
//! yields `((a or b) and c)`.
//!
//! ## Examples
//!
//! ```text
//! userName eq "bjensen"
//! name.familyName co "O'Malley"
//! title pr and userType eq "Employee"
//! (emails.value ew "example.org" or emails.value ew "example.com") and active eq true
//! ```
//!
//! ## Limits
//!
//! - Maximum filter length: 4096 bytes
//! - Maximum nesting depth: 32 levels

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum allowed length of a SCIM filter expression (bytes).
pub const MAX_FILTER_LENGTH: usize = 4096;

/// Maximum allowed nesting depth of parenthesised groups.
pub const MAX_FILTER_DEPTH: usize = 32;

/// A parsed SCIM filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterNode {
    /// A single predicate (e.g., `userName eq "bjensen"`)
    Terminal(TerminalNode),
    /// Two sub-expressions joined by `and` / `or`
    Branch(BranchNode),
}

impl FilterNode {
    /// Create a terminal node
    pub fn terminal(
        attribute_path: impl Into<String>,
        operator: CompareOp,
        value: Option<&str>,
    ) -> Self {
        FilterNode::Terminal(TerminalNode {
            attribute_path: attribute_path.into(),
            operator,
            value: value.map(String::from),
        })
    }

    /// Create a branch node
    pub fn branch(operator: LogicalOp, left: FilterNode, right: FilterNode) -> Self {
        FilterNode::Branch(BranchNode {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// Visit every terminal node, left to right.
    pub fn terminals(&self) -> Vec<&TerminalNode> {
        let mut out = Vec::new();
        self.collect_terminals(&mut out);
        out
    }

    fn collect_terminals<'a>(&'a self, out: &mut Vec<&'a TerminalNode>) {
        match self {
            FilterNode::Terminal(t) => out.push(t),
            FilterNode::Branch(b) => {
                b.left.collect_terminals(out);
                b.right.collect_terminals(out);
            }
        }
    }
}

impl fmt::Display for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterNode::Terminal(t) => write!(f, "{}", t),
            FilterNode::Branch(b) => {
                // Left-deep trees re-parse identically without parentheses on
                // the left; a branch on the right needs them.
                write!(f, "{} {} ", b.left, b.operator)?;
                match b.right.as_ref() {
                    FilterNode::Branch(_) => write!(f, "({})", b.right),
                    FilterNode::Terminal(_) => write!(f, "{}", b.right),
                }
            }
        }
    }
}

/// A predicate on one attribute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalNode {
    /// Attribute path as written (e.g., `name.familyName`)
    pub attribute_path: String,
    /// Comparison operator
    pub operator: CompareOp,
    /// Comparison value with quotes stripped; `None` only for `pr`
    pub value: Option<String>,
}

impl fmt::Display for TerminalNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.attribute_path, self.operator)?;
        if let Some(value) = &self.value {
            let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
            write!(f, " \"{}\"", escaped)?;
        }
        Ok(())
    }
}

/// Two operands joined by a logical operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchNode {
    pub operator: LogicalOp,
    pub left: Box<FilterNode>,
    pub right: Box<FilterNode>,
}

/// Logical operators joining two filter operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    fn from_keyword(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("and") {
            Some(LogicalOp::And)
        } else if s.eq_ignore_ascii_case("or") {
            Some(LogicalOp::Or)
        } else {
            None
        }
    }
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOp::And => write!(f, "and"),
            LogicalOp::Or => write!(f, "or"),
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Contains
    Co,
    /// Starts with
    Sw,
    /// Ends with
    Ew,
    /// Greater than
    Gt,
    /// Greater than or equal
    Ge,
    /// Less than
    Lt,
    /// Less than or equal
    Le,
    /// Present (has a value)
    Pr,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Co => "co",
            CompareOp::Sw => "sw",
            CompareOp::Ew => "ew",
            CompareOp::Gt => "gt",
            CompareOp::Ge => "ge",
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
            CompareOp::Pr => "pr",
        };
        write!(f, "{}", s)
    }
}

impl CompareOp {
    fn from_keyword(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "eq" => Some(CompareOp::Eq),
            "ne" => Some(CompareOp::Ne),
            "co" => Some(CompareOp::Co),
            "sw" => Some(CompareOp::Sw),
            "ew" => Some(CompareOp::Ew),
            "gt" => Some(CompareOp::Gt),
            "ge" => Some(CompareOp::Ge),
            "lt" => Some(CompareOp::Lt),
            "le" => Some(CompareOp::Le),
            "pr" => Some(CompareOp::Pr),
            _ => None,
        }
    }

    /// Whether the operator takes a comparison value.
    pub fn takes_value(&self) -> bool {
        !matches!(self, CompareOp::Pr)
    }
}

fn is_keyword(s: &str) -> bool {
    CompareOp::from_keyword(s).is_some() || LogicalOp::from_keyword(s).is_some()
}

/// Filter parsing error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterParseError {
    pub message: String,
    pub position: usize,
}

impl FilterParseError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for FilterParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at position {}", self.message, self.position)
    }
}

impl std::error::Error for FilterParseError {}

/// Parse a SCIM filter expression.
///
/// # Errors
///
/// Returns an error if the filter is empty or too long, nests too deeply,
/// has an unterminated quoted literal, unbalanced parentheses, an unknown
/// operator, a missing value, or a branch keyword that is not between two
/// operands.
///
/// # Examples
///
/// ```
/// use scim_ldap_bridge::scim::filter::{parse_filter, CompareOp, FilterNode};
///
/// let filter = parse_filter("userName eq \"bjensen\"").unwrap();
/// assert_eq!(filter, FilterNode::terminal("userName", CompareOp::Eq, Some("bjensen")));
/// ```
pub fn parse_filter(input: &str) -> Result<FilterNode, FilterParseError> {
    if input.len() > MAX_FILTER_LENGTH {
        return Err(FilterParseError::new(
            format!(
                "Filter exceeds maximum length ({} bytes, max {})",
                input.len(),
                MAX_FILTER_LENGTH
            ),
            0,
        ));
    }

    parse_expression(input, 0, 0)
}

fn parse_expression(
    input: &str,
    offset: usize,
    depth: usize,
) -> Result<FilterNode, FilterParseError> {
    if depth > MAX_FILTER_DEPTH {
        return Err(FilterParseError::new(
            format!(
                "Filter exceeds maximum nesting depth ({})",
                MAX_FILTER_DEPTH
            ),
            offset,
        ));
    }

    let mut scanner = Scanner::new(input, offset);
    let mut current: Option<FilterNode> = None;
    let mut pending: Option<(LogicalOp, usize)> = None;

    loop {
        scanner.skip_spaces();
        if scanner.at_end() {
            break;
        }

        let start = scanner.absolute();
        let operand = if scanner.peek() == Some('(') {
            let (inner, inner_offset) = scanner.take_group()?;
            parse_expression(inner, inner_offset, depth + 1)?
        } else {
            let Some(token) = scanner.next_token()? else {
                break;
            };

            if !token.quoted
                && let Some(op) = LogicalOp::from_keyword(&token.text)
            {
                if current.is_none() || pending.is_some() {
                    return Err(FilterParseError::new(
                        format!("'{}' must appear between two expressions", op),
                        start,
                    ));
                }
                pending = Some((op, start));
                continue;
            }

            scanner.parse_predicate(token)?
        };

        current = Some(match (current.take(), pending.take()) {
            (None, None) => operand,
            (Some(left), Some((op, _))) => FilterNode::branch(op, left, operand),
            (Some(_), None) => {
                return Err(FilterParseError::new(
                    "Expected 'and' or 'or' between expressions",
                    start,
                ));
            }
            (None, Some((op, pos))) => {
                return Err(FilterParseError::new(
                    format!("'{}' must appear between two expressions", op),
                    pos,
                ));
            }
        });
    }

    if let Some((op, pos)) = pending {
        return Err(FilterParseError::new(
            format!("'{}' must be followed by an expression", op),
            pos,
        ));
    }

    current.ok_or_else(|| FilterParseError::new("Empty filter expression", offset))
}

// =============================================================================
// Scanner
// =============================================================================

struct Token {
    /// Token text with quotes removed and escapes resolved
    text: String,
    /// Whether any part of the token was quoted
    quoted: bool,
    /// Absolute start position
    start: usize,
}

struct Scanner<'a> {
    input: &'a str,
    offset: usize,
    position: usize,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str, offset: usize) -> Self {
        Self {
            input,
            offset,
            position: 0,
        }
    }

    fn absolute(&self) -> usize {
        self.offset + self.position
    }

    fn at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.position += c.len_utf8();
        Some(c)
    }

    fn skip_spaces(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.advance();
        }
    }

    /// Consume a balanced `( ... )` group and return its inner text.
    ///
    /// Parentheses inside a quoted literal do not count towards nesting.
    fn take_group(&mut self) -> Result<(&'a str, usize), FilterParseError> {
        let open = self.absolute();
        self.advance();
        let inner_start = self.position;

        let mut depth = 1usize;
        let mut in_quotes = false;

        while let Some(c) = self.advance() {
            match c {
                '\\' => {
                    self.advance();
                }
                '"' => in_quotes = !in_quotes,
                '(' if !in_quotes => depth += 1,
                ')' if !in_quotes => {
                    depth -= 1;
                    if depth == 0 {
                        let inner_end = self.position - 1;
                        return Ok((
                            &self.input[inner_start..inner_end],
                            self.offset + inner_start,
                        ));
                    }
                }
                _ => {}
            }
        }

        if in_quotes {
            return Err(FilterParseError::new("Unterminated string", open));
        }
        Err(FilterParseError::new("Unbalanced parentheses", open))
    }

    /// Read up to the next unquoted, unescaped space.
    fn next_token(&mut self) -> Result<Option<Token>, FilterParseError> {
        self.skip_spaces();
        if self.at_end() {
            return Ok(None);
        }

        let start = self.absolute();
        let mut text = String::new();
        let mut quoted = false;
        let mut in_quotes = false;

        while let Some(c) = self.peek() {
            if c.is_whitespace() && !in_quotes {
                break;
            }
            self.advance();
            match c {
                '\\' => match self.advance() {
                    Some(escaped @ ('"' | '\\')) => text.push(escaped),
                    Some(other) => {
                        text.push('\\');
                        text.push(other);
                    }
                    None => text.push('\\'),
                },
                '"' => {
                    in_quotes = !in_quotes;
                    quoted = true;
                }
                '(' | ')' if !in_quotes => {
                    return Err(FilterParseError::new(
                        "Unbalanced parentheses",
                        self.absolute() - 1,
                    ));
                }
                _ => text.push(c),
            }
        }

        if in_quotes {
            return Err(FilterParseError::new("Unterminated string", start));
        }

        Ok(Some(Token {
            text,
            quoted,
            start,
        }))
    }

    // predicate = ATTRPATH "pr" | ATTRPATH compareOp VALUE
    fn parse_predicate(&mut self, attribute: Token) -> Result<FilterNode, FilterParseError> {
        if attribute.quoted || attribute.text.is_empty() {
            return Err(FilterParseError::new(
                "Expected attribute name",
                attribute.start,
            ));
        }

        let op_token = self.next_token()?.ok_or_else(|| {
            FilterParseError::new(
                format!("Expected operator after '{}'", attribute.text),
                self.absolute(),
            )
        })?;

        let op = CompareOp::from_keyword(&op_token.text)
            .filter(|_| !op_token.quoted)
            .ok_or_else(|| {
                FilterParseError::new(
                    format!("Unknown operator: '{}'", op_token.text),
                    op_token.start,
                )
            })?;

        if !op.takes_value() {
            return Ok(FilterNode::terminal(attribute.text, op, None));
        }

        self.skip_spaces();
        let value_position = self.position;
        let value = self.next_token()?.ok_or_else(|| {
            FilterParseError::new(
                format!("Expected value after '{}'", op),
                self.absolute(),
            )
        })?;

        // A keyword where the value should be means the value was omitted:
        // read the predicate as a presence test. A `pr` there belongs to
        // this predicate; any other keyword is handed back.
        if !value.quoted && is_keyword(&value.text) {
            if CompareOp::from_keyword(&value.text) != Some(CompareOp::Pr) {
                self.position = value_position;
            }
            return Ok(FilterNode::terminal(attribute.text, CompareOp::Pr, None));
        }

        Ok(FilterNode::terminal(
            attribute.text,
            op,
            Some(value.text.as_str()),
        ))
    }
}

// =============================================================================
// Tests
// =============================================================================
