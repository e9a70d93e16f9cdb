//! Test language of the `expression` selector.
//!
//! Grammar:
//! ```text
//! Expr    ::= AllOf ( '||' AllOf )*
//! AllOf   ::= Clause ( '&&' Clause )*
//! Clause  ::= Key Operator Literal
//! Key     ::= identifier ( '.' segment )*
//! Operator::= '=' | '!='
//! Literal ::= QuotedString | BareWord
//! ```
//!
//! Keys are looked up through a caller-supplied function; see
//! [`crate::builtin::selectors::ExpressionSelector`] for the request keys.

use cocoon_types::SitemapError;

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Alternatives joined by `||`; each is a list of clauses joined by `&&`.
    pub any_of: Vec<Vec<Clause>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub key: String,
    pub operator: Operator,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
}

/// Parse a test expression. An empty expression is always true.
pub fn parse_condition(input: &str) -> Result<Condition, SitemapError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Condition { any_of: Vec::new() });
    }

    let mut any_of = Vec::new();
    for alternative in trimmed.split("||") {
        let clauses = alternative
            .split("&&")
            .map(|part| parse_clause(part.trim(), input))
            .collect::<Result<Vec<_>, _>>()?;
        any_of.push(clauses);
    }
    Ok(Condition { any_of })
}

fn parse_clause(input: &str, whole: &str) -> Result<Clause, SitemapError> {
    if input.is_empty() {
        return Err(make_error(whole, "empty clause"));
    }

    let (key_end, operator, op_len) = find_operator(input)
        .ok_or_else(|| make_error(whole, &format!("no operator in '{input}'")))?;

    let key = input[..key_end].trim().to_string();
    if key.is_empty() {
        return Err(make_error(whole, "missing key before operator"));
    }
    let mut segments = key.split('.');
    let head = segments.next().unwrap_or_default();
    if head.is_empty() || !head.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(make_error(whole, &format!("invalid key '{key}'")));
    }
    // Names after the first dot may carry dashes (header names).
    if segments.any(|seg| seg.is_empty()) {
        return Err(make_error(whole, &format!("invalid key '{key}'")));
    }

    let raw_value = input[key_end + op_len..].trim();
    if raw_value.is_empty() {
        return Err(make_error(whole, &format!("missing value in '{input}'")));
    }

    Ok(Clause {
        key,
        operator,
        value: strip_quotes(raw_value),
    })
}

fn find_operator(input: &str) -> Option<(usize, Operator, usize)> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i += 1;
            }
            b'!' if bytes.get(i + 1) == Some(&b'=') => return Some((i, Operator::NotEq, 2)),
            b'=' => return Some((i, Operator::Eq, 1)),
            _ => i += 1,
        }
    }
    None
}

fn strip_quotes(s: &str) -> String {
    let bytes = s.as_bytes();
    if s.len() >= 2
        && ((bytes[0] == b'"' && bytes[s.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[s.len() - 1] == b'\''))
    {
        return s[1..s.len() - 1].to_string();
    }
    s.to_string()
}

fn make_error(expression: &str, msg: &str) -> SitemapError {
    SitemapError::PatternInvalid {
        pattern: expression.to_string(),
        message: format!("condition parse error: {msg}"),
    }
}

/// Evaluate against `resolve`, which maps a key to its value (missing keys
/// resolve to the empty string).
pub fn evaluate_condition(cond: &Condition, resolve: &dyn Fn(&str) -> String) -> bool {
    if cond.any_of.is_empty() {
        return true;
    }
    cond.any_of.iter().any(|clauses| {
        clauses.iter().all(|clause| {
            let actual = resolve(&clause.key);
            match clause.operator {
                Operator::Eq => actual == clause.value,
                Operator::NotEq => actual != clause.value,
            }
        })
    })
}
