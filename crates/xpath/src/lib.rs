//! XPath 1.0 front end for the xsltc compiler.
//!
//! This crate owns the syntax only: the expression AST and its `nom`
//! parser, the XSLT match-pattern grammar, and attribute-value-template
//! splitting. Types, coercions and code generation live in
//! `xsltc-compiler`.

pub mod ast;
pub mod avt;
pub mod error;
pub mod parser;
pub mod pattern;

pub use ast::{Axis, BinaryOp, Expr, LocationPath, NodeTest, NodeTypeTest, Step};
pub use avt::{Avt, AvtPart, parse_avt};
pub use error::XPathError;
pub use parser::parse_expression;
pub use pattern::{Kernel, Pattern, PathPattern, PatternAxis, PatternStep, parse_pattern};
