//! Attribute value template (AVT) splitting.
//!
//! An AVT like `attr-{$x}-end` decomposes into literal and expression
//! parts that are evaluated independently and concatenated at runtime.
//! Doubled braces (`{{`, `}}`) in literal segments collapse to single
//! braces; a lone unmatched brace is a syntax error.

use crate::ast::Expr;
use crate::error::XPathError;
use crate::parser::parse_expression;

#[derive(Debug, Clone, PartialEq)]
pub enum AvtPart {
    Literal(String),
    Expr(Expr),
}

/// A parsed attribute value template.
#[derive(Debug, Clone, PartialEq)]
pub struct Avt(pub Vec<AvtPart>);

impl Avt {
    /// The constant value, when no expression part is present.
    pub fn as_literal(&self) -> Option<String> {
        let mut out = String::new();
        for part in &self.0 {
            match part {
                AvtPart::Literal(s) => out.push_str(s),
                AvtPart::Expr(_) => return None,
            }
        }
        Some(out)
    }

    /// Wrap a plain string as a constant AVT.
    pub fn literal(s: &str) -> Avt {
        Avt(vec![AvtPart::Literal(s.to_string())])
    }
}

pub fn parse_avt(input: &str) -> Result<Avt, XPathError> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                if chars.peek() == Some(&'{') {
                    chars.next();
                    literal.push('{');
                    continue;
                }
                if !literal.is_empty() {
                    parts.push(AvtPart::Literal(std::mem::take(&mut literal)));
                }
                let expr_text = take_expression(input, &mut chars)?;
                parts.push(AvtPart::Expr(parse_expression(&expr_text)?));
            }
            '}' => {
                if chars.peek() == Some(&'}') {
                    chars.next();
                    literal.push('}');
                } else {
                    return Err(XPathError::AvtSyntax(
                        input.to_string(),
                        "unmatched '}' outside an expression".to_string(),
                    ));
                }
            }
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        parts.push(AvtPart::Literal(literal));
    }
    Ok(Avt(parts))
}

/// Consume characters up to the `}` closing an expression segment,
/// respecting string literals (a quoted `}` does not terminate).
fn take_expression(
    input: &str,
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Result<String, XPathError> {
    let mut text = String::new();
    let mut quote: Option<char> = None;

    for c in chars.by_ref() {
        match quote {
            Some(q) => {
                text.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '}' => return Ok(text),
                '\'' | '"' => {
                    quote = Some(c);
                    text.push(c);
                }
                other => text.push(other),
            },
        }
    }
    Err(XPathError::AvtSyntax(
        input.to_string(),
        "unterminated '{' expression".to_string(),
    ))
}
