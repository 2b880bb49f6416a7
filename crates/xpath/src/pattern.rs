//! The XSLT `match` pattern grammar.
//!
//! A pattern is a union of path patterns. Each path pattern is a chain of
//! child/attribute steps (optionally separated by `//`, meaning "any number
//! of intervening ancestors") ending in the step the matched node itself
//! must satisfy. That final step's structural test is the pattern's
//! *kernel*: the discriminator the dispatch compiler partitions templates
//! by.

use crate::ast::{Expr, NodeTest, NodeTypeTest};
use crate::error::XPathError;
use crate::parser::{self, ws};
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::tag,
    character::complete::multispace0,
    combinator::{map, opt},
    multi::{many0, separated_list1},
    sequence::{pair, preceded},
};
use std::fmt;

/// A parsed match pattern: a union of location path patterns.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub alternatives: Vec<PathPattern>,
    text: String,
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// A single location path within a pattern, e.g. `doc//section/para[1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    pub is_absolute: bool,
    pub steps: Vec<PatternStep>,
}

/// The axes legal in match patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternAxis {
    Child,
    Attribute,
}

/// One location step of a path pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternStep {
    pub axis: PatternAxis,
    pub node_test: NodeTest,
    pub predicates: Vec<Expr>,
    /// True when this step was separated from the previous one by `//`:
    /// any number of ancestors may intervene.
    pub ancestor_gap: bool,
}

/// The minimal structural test of a pattern's last step, used to partition
/// templates for dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Kernel {
    /// Matches the document root only (`/`).
    Root,
    /// An element name test.
    Element(String),
    /// The element wildcard (`*`).
    AnyElement,
    /// An attribute name test (`@id`).
    Attribute(String),
    /// The attribute wildcard (`@*`).
    AnyAttribute,
    Text,
    Comment,
    ProcessingInstruction,
    /// `node()`: any node kind.
    AnyNode,
}

impl PathPattern {
    /// The kernel of this path pattern.
    pub fn kernel(&self) -> Kernel {
        let Some(last) = self.steps.last() else {
            return Kernel::Root;
        };
        match (&last.axis, &last.node_test) {
            (PatternAxis::Attribute, NodeTest::Name(n)) => Kernel::Attribute(n.clone()),
            (PatternAxis::Attribute, _) => Kernel::AnyAttribute,
            (PatternAxis::Child, NodeTest::Name(n)) => Kernel::Element(n.clone()),
            (PatternAxis::Child, NodeTest::Wildcard) => Kernel::AnyElement,
            (PatternAxis::Child, NodeTest::NodeType(t)) => match t {
                NodeTypeTest::Text => Kernel::Text,
                NodeTypeTest::Comment => Kernel::Comment,
                NodeTypeTest::ProcessingInstruction => Kernel::ProcessingInstruction,
                NodeTypeTest::Node => Kernel::AnyNode,
            },
        }
    }

    /// Whether the pattern is nothing but its kernel: a single relative
    /// step with no predicates (or the bare `/`). Such a pattern matches
    /// unconditionally once the kernel has been established and becomes
    /// the default target of its test sequence.
    pub fn is_kernel_only(&self) -> bool {
        match self.steps.as_slice() {
            [] => true, // "/"
            [only] => !self.is_absolute && only.predicates.is_empty() && !only.ancestor_gap,
            _ => false,
        }
    }

    /// The XSLT default priority derived from the pattern's shape.
    pub fn default_priority(&self) -> f64 {
        if !self.is_kernel_only() {
            return 0.5;
        }
        match self.steps.first() {
            None => 0.5, // "/"
            Some(step) => match &step.node_test {
                NodeTest::Name(_) => 0.0,
                NodeTest::Wildcard | NodeTest::NodeType(_) => -0.5,
            },
        }
    }
}

// --- Parser ---

pub fn parse_pattern(text: &str) -> Result<Pattern, XPathError> {
    match pattern_parser(text.trim()) {
        Ok(("", alternatives)) => Ok(Pattern {
            alternatives,
            text: text.to_string(),
        }),
        Ok((rem, _)) => Err(XPathError::PatternParse(
            text.to_string(),
            format!("unconsumed input: '{}'", rem),
        )),
        Err(e) => Err(XPathError::PatternParse(text.to_string(), e.to_string())),
    }
}

fn step_parser(input: &str) -> IResult<&str, PatternStep> {
    // `@name` and `attribute::name` are the same step, as are `name` and
    // `child::name`; those two axes are all the pattern grammar allows.
    let (i, (node_test, axis)) = alt((
        map(
            preceded(alt((tag("@"), tag("attribute::"))), parser::node_test),
            |nt| (nt, PatternAxis::Attribute),
        ),
        map(preceded(opt(tag("child::")), parser::node_test), |nt| {
            (nt, PatternAxis::Child)
        }),
    ))
    .parse(input)?;
    let (i, predicates) = many0(parser::predicate).parse(i)?;
    Ok((
        i,
        PatternStep {
            axis,
            node_test,
            predicates,
            ancestor_gap: false,
        },
    ))
}

fn path_parser(input: &str) -> IResult<&str, PathPattern> {
    // A leading "//" anchors at the root but allows any depth below it,
    // which is the same as not being absolute at all.
    let lead: IResult<&str, &str> = preceded(tag("//"), multispace0).parse(input);
    if let Ok((rem, _)) = lead {
        let (rem, pattern) = relative_path(rem)?;
        return Ok((rem, pattern));
    }

    let lead: IResult<&str, &str> = preceded(tag("/"), multispace0).parse(input);
    let (input, is_absolute) = match lead {
        Ok((rem, _)) => (rem, true),
        Err(_) => (input, false),
    };

    if is_absolute {
        // `/` alone, or `/step/step...`
        match relative_path(input) {
            Ok((rem, mut pattern)) => {
                pattern.is_absolute = true;
                Ok((rem, pattern))
            }
            Err(_) => Ok((
                input,
                PathPattern {
                    is_absolute: true,
                    steps: vec![],
                },
            )),
        }
    } else {
        relative_path(input)
    }
}

fn relative_path(input: &str) -> IResult<&str, PathPattern> {
    let (i, first) = step_parser(input)?;
    let mut steps = vec![first];
    let (i, remainder) = many0(pair(ws(alt((tag("//"), tag("/")))), step_parser)).parse(i)?;
    for (sep, mut next) in remainder {
        next.ancestor_gap = sep == "//";
        steps.push(next);
    }
    Ok((
        i,
        PathPattern {
            is_absolute: false,
            steps,
        },
    ))
}

fn pattern_parser(input: &str) -> IResult<&str, Vec<PathPattern>> {
    separated_list1(ws(tag("|")), path_parser).parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_parsing() {
        assert!(parse_pattern("foo").is_ok());
        assert!(parse_pattern("foo/bar").is_ok());
        assert!(parse_pattern("/").is_ok());
        assert!(parse_pattern("/*").is_ok());
        assert!(parse_pattern("/root/item").is_ok());
        assert!(parse_pattern("foo|bar").is_ok());
        assert!(parse_pattern("text()").is_ok());
        assert!(parse_pattern("@id").is_ok());
        assert!(parse_pattern("*").is_ok());
        assert!(parse_pattern("foo/*/@id").is_ok());
        assert!(parse_pattern("doc//para").is_ok());
        assert!(parse_pattern("item[@kind = 'a']").is_ok());
    }

    #[test]
    fn test_whitespace_around_separators() {
        let p = parse_pattern("para | note").unwrap();
        assert_eq!(p.alternatives.len(), 2);
        assert_eq!(p.alternatives[1].kernel(), Kernel::Element("note".into()));

        let p = parse_pattern("doc // para").unwrap();
        assert!(p.alternatives[0].steps[1].ancestor_gap);

        let p = parse_pattern("doc / section / para | @id").unwrap();
        assert_eq!(p.alternatives[0].steps.len(), 3);
        assert_eq!(p.alternatives[1].kernel(), Kernel::Attribute("id".into()));
    }

    #[test]
    fn test_explicit_axis_spellings() {
        let spelled = parse_pattern("child::para").unwrap();
        let abbreviated = parse_pattern("para").unwrap();
        assert_eq!(spelled.alternatives, abbreviated.alternatives);

        let attr = parse_pattern("attribute::id").unwrap();
        assert_eq!(attr.alternatives[0].kernel(), Kernel::Attribute("id".into()));
    }

    #[test]
    fn test_kernel_extraction() {
        let p = parse_pattern("doc/section/para").unwrap();
        assert_eq!(p.alternatives[0].kernel(), Kernel::Element("para".into()));

        let p = parse_pattern("@id").unwrap();
        assert_eq!(p.alternatives[0].kernel(), Kernel::Attribute("id".into()));

        let p = parse_pattern("/").unwrap();
        assert_eq!(p.alternatives[0].kernel(), Kernel::Root);

        let p = parse_pattern("text()").unwrap();
        assert_eq!(p.alternatives[0].kernel(), Kernel::Text);

        let p = parse_pattern("*").unwrap();
        assert_eq!(p.alternatives[0].kernel(), Kernel::AnyElement);
    }

    #[test]
    fn test_union_alternatives() {
        let p = parse_pattern("para|note|item").unwrap();
        assert_eq!(p.alternatives.len(), 3);
        assert_eq!(p.alternatives[1].kernel(), Kernel::Element("note".into()));
    }

    #[test]
    fn test_ancestor_gap_flag() {
        let p = parse_pattern("doc//para").unwrap();
        let steps = &p.alternatives[0].steps;
        assert!(!steps[0].ancestor_gap);
        assert!(steps[1].ancestor_gap);
    }

    #[test]
    fn test_default_priorities() {
        // Kernel-only name test.
        let p = parse_pattern("para").unwrap();
        assert_eq!(p.alternatives[0].default_priority(), 0.0);
        // Wildcard and node-type kernels.
        assert_eq!(
            parse_pattern("*").unwrap().alternatives[0].default_priority(),
            -0.5
        );
        assert_eq!(
            parse_pattern("text()").unwrap().alternatives[0].default_priority(),
            -0.5
        );
        // Structurally refined patterns.
        assert_eq!(
            parse_pattern("doc/para").unwrap().alternatives[0].default_priority(),
            0.5
        );
        assert_eq!(
            parse_pattern("para[1]").unwrap().alternatives[0].default_priority(),
            0.5
        );
    }

    #[test]
    fn test_kernel_only() {
        assert!(parse_pattern("para").unwrap().alternatives[0].is_kernel_only());
        assert!(parse_pattern("/").unwrap().alternatives[0].is_kernel_only());
        assert!(!parse_pattern("doc/para").unwrap().alternatives[0].is_kernel_only());
        assert!(!parse_pattern("/para").unwrap().alternatives[0].is_kernel_only());
        assert!(!parse_pattern("para[1]").unwrap().alternatives[0].is_kernel_only());
    }
}
