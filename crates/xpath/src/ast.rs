//! The Abstract Syntax Tree for XPath 1.0 expressions.

/// An XPath expression as parsed, before any type is assigned.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(String),
    Number(f64),
    Path(LocationPath),
    Variable(String),
    FunctionCall {
        name: String,
        args: Vec<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    /// Unary minus.
    Negate(Box<Expr>),
    /// A primary expression refined by predicates, e.g. `$set[3]` or
    /// `key('k', 'v')[@kind = 'a']`.
    Filter {
        base: Box<Expr>,
        predicates: Vec<Expr>,
    },
}

impl Expr {
    /// The constant string value, if this is a string literal.
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Expr::Literal(s) => Some(s),
            _ => None,
        }
    }
}

/// A binary operator used in an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Logical
    Or,
    And,
    // Equality
    Equals,
    NotEquals,
    // Relational
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    // Additive
    Plus,
    Minus,
    // Multiplicative
    Multiply,
    Divide,
    Modulo,
    // Set
    Union,
}

/// A full location path, like `/doc/item`, `ancestor::x/child::y[1]` or
/// `$var/item`.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationPath {
    /// An optional starting expression, for paths like `$var/foo` or
    /// `key('k', 'v')/bar`. When `None` the path starts from the context
    /// node or the root.
    pub start: Option<Box<Expr>>,
    /// True when the path is anchored at the document root.
    pub is_absolute: bool,
    pub steps: Vec<Step>,
}

/// One step of a location path.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub node_test: NodeTest,
    pub predicates: Vec<Expr>,
}

impl Step {
    /// The `descendant-or-self::node()` step the `//` abbreviation expands
    /// to.
    pub fn descendant_or_self_node() -> Step {
        Step {
            axis: Axis::DescendantOrSelf,
            node_test: NodeTest::NodeType(NodeTypeTest::Node),
            predicates: vec![],
        }
    }

    /// Whether this is the `.` abbreviation (`self::node()` without
    /// predicates).
    pub fn is_self_node(&self) -> bool {
        self.axis == Axis::SelfAxis
            && self.node_test == NodeTest::NodeType(NodeTypeTest::Node)
            && self.predicates.is_empty()
    }
}

/// The axis of movement from the context node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Attribute,
    Parent,
    Ancestor,
    AncestorOrSelf,
    SelfAxis,
    FollowingSibling,
    PrecedingSibling,
    Following,
    Preceding,
}

/// A test applied to the nodes of an axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    /// A qualified name test (e.g. `foo`, `xsl:if`).
    Name(String),
    /// The wildcard test (`*`).
    Wildcard,
    /// A node-type test (e.g. `text()`, `node()`).
    NodeType(NodeTypeTest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTypeTest {
    Text,
    Node,
    Comment,
    ProcessingInstruction,
}
