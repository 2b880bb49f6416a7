//! Recursive-descent parser for the XPath 1.0 expression language.
//!
//! Binary operators are handled one precedence level at a time: each
//! level folds a left-associative chain over the next-tighter level,
//! driven by a token table. The tables also carry the XML-escaped
//! spellings (`&lt;`, `&gt;`) relational operators keep when an
//! attribute value reaches us unexpanded.

use super::ast::*;
use crate::error::XPathError;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{map, opt, peek, recognize},
    multi::{many0, separated_list0},
    number::complete::double,
    sequence::{delimited, pair, preceded, terminated},
};

pub fn parse_expression(input: &str) -> Result<Expr, XPathError> {
    match expression(input.trim()) {
        Ok(("", expr)) => Ok(expr),
        Ok((rem, _)) => Err(XPathError::ExprParse(
            input.to_string(),
            format!("unconsumed input: '{}'", rem),
        )),
        Err(e) => Err(XPathError::ExprParse(input.to_string(), e.to_string())),
    }
}

/// Skip whitespace on both sides of `inner`.
pub(crate) fn ws<'a, F, O, E>(inner: F) -> impl Parser<&'a str, Output = O, Error = E>
where
    F: Parser<&'a str, Output = O, Error = E>,
    E: nom::error::ParseError<&'a str>,
{
    delimited(multispace0, inner, multispace0)
}

// Operator tables, one per precedence level, tightest binding last.
// Within a table a token must precede its own prefixes.
const OR_OPS: &[(&str, BinaryOp)] = &[("or", BinaryOp::Or)];
const AND_OPS: &[(&str, BinaryOp)] = &[("and", BinaryOp::And)];
const EQUALITY_OPS: &[(&str, BinaryOp)] = &[
    ("!=", BinaryOp::NotEquals),
    ("=", BinaryOp::Equals),
];
const RELATIONAL_OPS: &[(&str, BinaryOp)] = &[
    ("<=", BinaryOp::LessThanOrEqual),
    ("&lt;=", BinaryOp::LessThanOrEqual),
    (">=", BinaryOp::GreaterThanOrEqual),
    ("&gt;=", BinaryOp::GreaterThanOrEqual),
    ("<", BinaryOp::LessThan),
    ("&lt;", BinaryOp::LessThan),
    (">", BinaryOp::GreaterThan),
    ("&gt;", BinaryOp::GreaterThan),
];
const ADDITIVE_OPS: &[(&str, BinaryOp)] = &[("+", BinaryOp::Plus), ("-", BinaryOp::Minus)];
const MULTIPLICATIVE_OPS: &[(&str, BinaryOp)] = &[
    ("*", BinaryOp::Multiply),
    ("div", BinaryOp::Divide),
    ("mod", BinaryOp::Modulo),
];
const UNION_OPS: &[(&str, BinaryOp)] = &[("|", BinaryOp::Union)];

/// One operator out of `ops`, surrounding whitespace included.
fn operator<'a>(
    input: &'a str,
    ops: &'static [(&'static str, BinaryOp)],
) -> IResult<&'a str, BinaryOp> {
    let (rest, _) = multispace0(input)?;
    for &(token, op) in ops {
        if let Some(after) = rest.strip_prefix(token) {
            let (after, _) = multispace0(after)?;
            return Ok((after, op));
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Tag,
    )))
}

/// Fold `operand (op operand)*` into a left-leaning tree.
fn binary_chain<'a>(
    input: &'a str,
    operand: fn(&'a str) -> IResult<&'a str, Expr>,
    ops: &'static [(&'static str, BinaryOp)],
) -> IResult<&'a str, Expr> {
    let (mut rest, mut expr) = operand(input)?;
    while let Ok((after_op, op)) = operator(rest, ops) {
        let (after_rhs, right) = operand(after_op)?;
        expr = Expr::Binary {
            left: Box::new(expr),
            op,
            right: Box::new(right),
        };
        rest = after_rhs;
    }
    Ok((rest, expr))
}

fn expression(input: &str) -> IResult<&str, Expr> {
    binary_chain(input, and_expr, OR_OPS)
}

fn and_expr(input: &str) -> IResult<&str, Expr> {
    binary_chain(input, equality_expr, AND_OPS)
}

fn equality_expr(input: &str) -> IResult<&str, Expr> {
    binary_chain(input, relational_expr, EQUALITY_OPS)
}

fn relational_expr(input: &str) -> IResult<&str, Expr> {
    binary_chain(input, additive_expr, RELATIONAL_OPS)
}

fn additive_expr(input: &str) -> IResult<&str, Expr> {
    binary_chain(input, multiplicative_expr, ADDITIVE_OPS)
}

fn multiplicative_expr(input: &str) -> IResult<&str, Expr> {
    binary_chain(input, unary_expr, MULTIPLICATIVE_OPS)
}

// `-` nests (`--x` is minus minus x) and binds looser than `|`.
fn unary_expr(input: &str) -> IResult<&str, Expr> {
    let (i, minus) = opt(ws(char('-'))).parse(input)?;
    if minus.is_some() {
        map(unary_expr, |e| Expr::Negate(Box::new(e))).parse(i)
    } else {
        union_expr(i)
    }
}

fn union_expr(input: &str) -> IResult<&str, Expr> {
    binary_chain(input, path_expr, UNION_OPS)
}

/// `/` or `//` between steps; true means the `//` abbreviation.
fn path_sep(input: &str) -> IResult<&str, bool> {
    alt((map(tag("//"), |_| true), map(tag("/"), |_| false))).parse(input)
}

/// A path, or a primary expression extended with steps (`$var/foo`).
/// Primaries get the first look: `position()` must reach the function
/// parser before the step parser claims `position` as a name test.
fn path_expr(input: &str) -> IResult<&str, Expr> {
    let (i, base) = alt((filter_expr, map(location_path, Expr::Path))).parse(input)?;
    let (i, tail) = many0(pair(ws(path_sep), step)).parse(i)?;
    if tail.is_empty() {
        return Ok((i, base));
    }

    let (start, is_absolute, mut steps) = match base {
        Expr::Path(path) => (path.start, path.is_absolute, path.steps),
        other => (Some(Box::new(other)), false, Vec::new()),
    };
    for (gap, next) in tail {
        if gap {
            steps.push(Step::descendant_or_self_node());
        }
        steps.push(next);
    }
    Ok((
        i,
        Expr::Path(LocationPath {
            start,
            is_absolute,
            steps,
        }),
    ))
}

/// A primary expression, possibly refined by predicates: `$set[3]`,
/// `key('k', 'v')[2]`.
fn filter_expr(input: &str) -> IResult<&str, Expr> {
    let (i, base) = primary_expr(input)?;
    let (i, predicates) = many0(predicate).parse(i)?;
    let expr = if predicates.is_empty() {
        base
    } else {
        Expr::Filter {
            base: Box::new(base),
            predicates,
        }
    };
    Ok((i, expr))
}

fn primary_expr(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        map(preceded(char('$'), q_name), Expr::Variable),
        map(double, Expr::Number),
        map(string_literal, Expr::Literal),
        function_call,
        delimited(ws(char('(')), expression, ws(char(')'))),
    )))
    .parse(input)
}

fn quoted<'a>(
    mark: char,
) -> impl Parser<&'a str, Output = &'a str, Error = nom::error::Error<&'a str>> {
    delimited(char(mark), take_while(move |c| c != mark), char(mark))
}

fn string_literal(input: &str) -> IResult<&str, String> {
    map(alt((quoted('\''), quoted('"'))), |s: &str| s.to_string()).parse(input)
}

fn nc_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || matches!(c, '-' | '_' | '.')),
    ))
    .parse(input)
}

fn q_name(input: &str) -> IResult<&str, String> {
    map(
        recognize(pair(nc_name, opt(preceded(char(':'), nc_name)))),
        |s: &str| s.to_string(),
    )
    .parse(input)
}

const NODE_TYPE_NAMES: &[(&str, NodeTypeTest)] = &[
    ("text", NodeTypeTest::Text),
    ("node", NodeTypeTest::Node),
    ("comment", NodeTypeTest::Comment),
    ("processing-instruction", NodeTypeTest::ProcessingInstruction),
];

fn node_type_test(input: &str) -> IResult<&str, NodeTest> {
    let (i, name) = terminated(nc_name, pair(ws(char('(')), char(')'))).parse(input)?;
    match NODE_TYPE_NAMES.iter().find(|(n, _)| *n == name) {
        Some(&(_, test)) => Ok((i, NodeTest::NodeType(test))),
        None => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        ))),
    }
}

pub fn node_test(input: &str) -> IResult<&str, NodeTest> {
    alt((
        map(tag("*"), |_| NodeTest::Wildcard),
        node_type_test,
        map(q_name, NodeTest::Name),
    ))
    .parse(input)
}

/// An explicit axis prefix, `name::`. Resolving the name after the fact
/// keeps prefix-shadowing (`descendant` vs `descendant-or-self`) out of
/// the grammar.
fn axis(input: &str) -> IResult<&str, Axis> {
    let (i, name) = terminated(nc_name, tag("::")).parse(input)?;
    let axis = match name {
        "child" => Axis::Child,
        "descendant" => Axis::Descendant,
        "descendant-or-self" => Axis::DescendantOrSelf,
        "attribute" => Axis::Attribute,
        "parent" => Axis::Parent,
        "ancestor" => Axis::Ancestor,
        "ancestor-or-self" => Axis::AncestorOrSelf,
        "self" => Axis::SelfAxis,
        "following-sibling" => Axis::FollowingSibling,
        "preceding-sibling" => Axis::PrecedingSibling,
        "following" => Axis::Following,
        "preceding" => Axis::Preceding,
        _ => {
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )));
        }
    };
    Ok((i, axis))
}

pub fn predicate(input: &str) -> IResult<&str, Expr> {
    delimited(ws(char('[')), expression, ws(char(']'))).parse(input)
}

fn step(input: &str) -> IResult<&str, Step> {
    let (i, (axis, node_test)) = alt((
        map(tag(".."), |_| {
            (Axis::Parent, NodeTest::NodeType(NodeTypeTest::Node))
        }),
        map(tag("."), |_| {
            (Axis::SelfAxis, NodeTest::NodeType(NodeTypeTest::Node))
        }),
        map(preceded(char('@'), node_test), |nt| (Axis::Attribute, nt)),
        map(pair(opt(axis), node_test), |(ax, nt)| {
            (ax.unwrap_or(Axis::Child), nt)
        }),
    ))
    .parse(input)?;
    let (i, predicates) = many0(predicate).parse(i)?;
    Ok((
        i,
        Step {
            axis,
            node_test,
            predicates,
        },
    ))
}

/// A root anchor (if any) and the first step. Steps after the first are
/// folded on by [`path_expr`], which owns the separator loop.
fn location_path(input: &str) -> IResult<&str, LocationPath> {
    let (i, anchor) = opt(path_sep).parse(input)?;
    let (i, steps) = match anchor {
        // Leading `//` abbreviates /descendant-or-self::node()/.
        Some(true) => {
            let (i, first) = step(i)?;
            (i, vec![Step::descendant_or_self_node(), first])
        }
        // `/` alone is a valid path; a following step is optional.
        Some(false) => match step(i) {
            Ok((i, first)) => (i, vec![first]),
            Err(_) => (i, Vec::new()),
        },
        None => {
            let (i, first) = step(i)?;
            (i, vec![first])
        }
    };
    Ok((
        i,
        LocationPath {
            start: None,
            is_absolute: anchor.is_some(),
            steps,
        },
    ))
}

fn function_call(input: &str) -> IResult<&str, Expr> {
    // A QName followed by `(`; the lookahead keeps a plain step name
    // (`foo` in `foo/bar`) from being taken as a function.
    let (i, name) = q_name(input)?;
    let (i, _) = peek(ws(char('('))).parse(i)?;

    // text() and friends are node tests; the step parser owns them.
    if NODE_TYPE_NAMES.iter().any(|(n, _)| *n == name) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }

    let (i, args) = preceded(
        multispace0,
        delimited(
            char('('),
            separated_list0(ws(char(',')), expression),
            char(')'),
        ),
    )
    .parse(i)?;
    Ok((i, Expr::FunctionCall { name, args }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_step(name: &str) -> Step {
        Step {
            axis: Axis::Child,
            node_test: NodeTest::Name(name.into()),
            predicates: vec![],
        }
    }

    #[test]
    fn test_parse_simple_path() {
        let result = parse_expression("foo/bar").unwrap();
        assert_eq!(
            result,
            Expr::Path(LocationPath {
                start: None,
                is_absolute: false,
                steps: vec![name_step("foo"), name_step("bar")],
            })
        );
    }

    #[test]
    fn test_parse_unary_minus() {
        let result = parse_expression("-5").unwrap();
        assert_eq!(result, Expr::Negate(Box::new(Expr::Number(5.0))));

        let result2 = parse_expression("10 - -5").unwrap();
        if let Expr::Binary { left, op, right } = result2 {
            assert_eq!(op, BinaryOp::Minus);
            assert_eq!(*left, Expr::Number(10.0));
            assert_eq!(*right, Expr::Negate(Box::new(Expr::Number(5.0))));
        } else {
            panic!("expected Binary");
        }
    }

    #[test]
    fn test_parse_nested_negation() {
        let result = parse_expression("--5").unwrap();
        assert_eq!(
            result,
            Expr::Negate(Box::new(Expr::Negate(Box::new(Expr::Number(5.0)))))
        );
    }

    #[test]
    fn test_parse_axes() {
        let result = parse_expression("following-sibling::foo").unwrap();
        if let Expr::Path(lp) = result {
            assert_eq!(lp.steps[0].axis, Axis::FollowingSibling);
        } else {
            panic!("expected path");
        }

        let result = parse_expression("ancestor-or-self::*").unwrap();
        if let Expr::Path(lp) = result {
            assert_eq!(lp.steps[0].axis, Axis::AncestorOrSelf);
            assert_eq!(lp.steps[0].node_test, NodeTest::Wildcard);
        } else {
            panic!("expected path");
        }
    }

    #[test]
    fn test_parse_path_starting_with_variable() {
        let result = parse_expression("$myVar/foo/bar").unwrap();
        assert_eq!(
            result,
            Expr::Path(LocationPath {
                start: Some(Box::new(Expr::Variable("myVar".to_string()))),
                is_absolute: false,
                steps: vec![name_step("foo"), name_step("bar")],
            })
        );
    }

    #[test]
    fn test_parse_filter_expression() {
        let result = parse_expression("$set[3]").unwrap();
        assert_eq!(
            result,
            Expr::Filter {
                base: Box::new(Expr::Variable("set".to_string())),
                predicates: vec![Expr::Number(3.0)],
            }
        );
    }

    #[test]
    fn test_parse_predicate() {
        let result = parse_expression("foo[@id = 'a']").unwrap();
        let attr_path = LocationPath {
            start: None,
            is_absolute: false,
            steps: vec![Step {
                axis: Axis::Attribute,
                node_test: NodeTest::Name("id".into()),
                predicates: vec![],
            }],
        };
        assert_eq!(
            result,
            Expr::Path(LocationPath {
                start: None,
                is_absolute: false,
                steps: vec![Step {
                    axis: Axis::Child,
                    node_test: NodeTest::Name("foo".into()),
                    predicates: vec![Expr::Binary {
                        left: Box::new(Expr::Path(attr_path)),
                        op: BinaryOp::Equals,
                        right: Box::new(Expr::Literal("a".into())),
                    }],
                }],
            })
        );
    }

    #[test]
    fn test_parse_function_in_predicate() {
        let result = parse_expression("para[position()=1]").unwrap();
        if let Expr::Path(lp) = result {
            assert_eq!(lp.steps.len(), 1);
            assert_eq!(lp.steps[0].predicates.len(), 1);
            assert!(matches!(lp.steps[0].predicates[0], Expr::Binary { .. }));
        } else {
            panic!("expected path");
        }
    }

    #[test]
    fn test_parse_abbreviated_steps() {
        let result = parse_expression(".").unwrap();
        if let Expr::Path(lp) = result {
            assert!(lp.steps[0].is_self_node());
        } else {
            panic!("expected path for '.'");
        }

        let result = parse_expression("../foo").unwrap();
        if let Expr::Path(lp) = result {
            assert_eq!(lp.steps[0].axis, Axis::Parent);
            assert_eq!(lp.steps[1].node_test, NodeTest::Name("foo".into()));
        } else {
            panic!("expected path for '../foo'");
        }
    }

    #[test]
    fn test_parse_spaced_path_separators() {
        assert_eq!(
            parse_expression("foo / bar").unwrap(),
            parse_expression("foo/bar").unwrap()
        );
        assert_eq!(
            parse_expression("doc // para").unwrap(),
            parse_expression("doc//para").unwrap()
        );
    }

    #[test]
    fn test_parse_operator_precedence() {
        let result = parse_expression("1 + 2 * 3").unwrap();
        assert_eq!(
            result,
            Expr::Binary {
                left: Box::new(Expr::Number(1.0)),
                op: BinaryOp::Plus,
                right: Box::new(Expr::Binary {
                    left: Box::new(Expr::Number(2.0)),
                    op: BinaryOp::Multiply,
                    right: Box::new(Expr::Number(3.0)),
                }),
            }
        );
    }

    #[test]
    fn test_parse_boolean_precedence() {
        // `or` binds looser than `and`.
        let result = parse_expression("a or b and c").unwrap();
        if let Expr::Binary { op, right, .. } = result {
            assert_eq!(op, BinaryOp::Or);
            assert!(matches!(
                *right,
                Expr::Binary { op: BinaryOp::And, .. }
            ));
        } else {
            panic!("expected Binary");
        }
    }

    #[test]
    fn test_parse_descendant_or_self() {
        let result = parse_expression("//foo").unwrap();
        assert_eq!(
            result,
            Expr::Path(LocationPath {
                start: None,
                is_absolute: true,
                steps: vec![Step::descendant_or_self_node(), name_step("foo")],
            })
        );
    }

    #[test]
    fn test_parse_union() {
        let result = parse_expression("para|note").unwrap();
        assert!(matches!(
            result,
            Expr::Binary { op: BinaryOp::Union, .. }
        ));
    }

    #[test]
    fn test_parse_xml_entities_in_relational_expr() {
        let result = parse_expression("a &lt; b").unwrap();
        if let Expr::Binary { op, .. } = result {
            assert_eq!(op, BinaryOp::LessThan);
        } else {
            panic!("expected Binary");
        }

        let result2 = parse_expression("a &gt;= b").unwrap();
        if let Expr::Binary { op, .. } = result2 {
            assert_eq!(op, BinaryOp::GreaterThanOrEqual);
        } else {
            panic!("expected Binary");
        }
    }
}
