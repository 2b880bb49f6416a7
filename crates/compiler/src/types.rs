//! The internal type system: the value types expressions carry, the
//! enumerated coercions between them, and overload resolution for the
//! built-in operators.
//!
//! The type set is richer than XPath's four value types so that generated
//! code can stay unboxed: numbers split into `Int` and `Real`, single nodes
//! are distinguished from node-sets, result-tree fragments from both, and
//! `Reference` is the boxed escape hatch used for template parameters whose
//! type cannot be known at their declaration site.

use std::fmt;
use thiserror::Error;

use xsltc_emit::RuntimeFn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Boolean,
    Int,
    Real,
    String,
    Node,
    NodeSet,
    ResultTree,
    /// A boxed value of runtime-determined type.
    Reference,
    /// No value (an instruction, not an expression).
    Void,
    /// An opaque extension value; participates in no coercion.
    Object,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::Boolean => "boolean",
            Type::Int => "integer",
            Type::Real => "real",
            Type::String => "string",
            Type::Node => "node",
            Type::NodeSet => "node-set",
            Type::ResultTree => "result-tree",
            Type::Reference => "reference",
            Type::Void => "void",
            Type::Object => "object",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TypeError {
    #[error("operator '{op}' cannot be applied to {left} and {right}")]
    UnresolvableOperator {
        op: &'static str,
        left: Type,
        right: Type,
    },

    #[error("no conversion from {from} to {to}")]
    NoConversion { from: Type, to: Type },

    #[error("unknown function '{0}()'")]
    UnknownFunction(String),

    #[error("'{name}()' expects {expected} argument(s), got {got}")]
    WrongArity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("reference to undeclared variable '${0}'")]
    UndeclaredVariable(String),

    #[error("expression must evaluate to a node-set, found {0}")]
    NotANodeSet(Type),

    #[error("argument to '{0}()' must be a literal string")]
    ConstantRequired(&'static str),
}

/// One directional conversion of the coercion table. Each variant has a
/// fixed code shape the expression translator emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    IntToReal,
    RealToInt,
    IntToString,
    RealToString,
    IntToBoolean,
    RealToBoolean,
    BooleanToString,
    StringToBoolean,
    StringToReal,
    NodeSetToBoolean,
    NodeSetToString,
    NodeSetToReal,
    NodeSetToNode,
    NodeToString,
    NodeToReal,
    NodeToBoolean,
    NodeToNodeSet,
    ResultTreeToString,
    ResultTreeToReal,
    ResultTreeToBoolean,
    /// Box an unboxed value into a reference.
    Box(Type),
    /// Runtime-checked unbox of a reference.
    Unbox(Type),
}

impl Coercion {
    /// The runtime calls implementing this conversion, in emission order.
    /// An empty slice means the conversion needs no code (the value's
    /// presence alone decides it, e.g. a node used as a boolean).
    pub fn runtime_calls(self) -> &'static [RuntimeFn] {
        match self {
            Coercion::IntToReal => &[RuntimeFn::IntToReal],
            Coercion::RealToInt => &[RuntimeFn::RealToInt],
            Coercion::IntToString => &[RuntimeFn::IntToString],
            Coercion::RealToString => &[RuntimeFn::RealToString],
            Coercion::IntToBoolean => &[RuntimeFn::IntToBoolean],
            Coercion::RealToBoolean => &[RuntimeFn::RealToBoolean],
            Coercion::BooleanToString => &[RuntimeFn::BooleanToString],
            Coercion::StringToBoolean => &[RuntimeFn::StringToBoolean],
            Coercion::StringToReal => &[RuntimeFn::StringToReal],
            Coercion::NodeSetToBoolean => &[RuntimeFn::NodeSetToBoolean],
            Coercion::NodeSetToString => &[RuntimeFn::NodeSetToString],
            Coercion::NodeSetToReal => &[RuntimeFn::NodeSetToReal],
            Coercion::NodeSetToNode => &[RuntimeFn::NodeSetToNode],
            Coercion::NodeToString => &[RuntimeFn::NodeToString],
            Coercion::NodeToReal => &[RuntimeFn::NodeToReal],
            // A node in hand always exists.
            Coercion::NodeToBoolean => &[],
            Coercion::NodeToNodeSet => &[RuntimeFn::SingletonIterator],
            Coercion::ResultTreeToString => &[RuntimeFn::ResultTreeToString],
            Coercion::ResultTreeToReal => &[RuntimeFn::ResultTreeToReal],
            // A fragment always exists.
            Coercion::ResultTreeToBoolean => &[],
            Coercion::Box(ty) => match ty {
                Type::Int => &[RuntimeFn::BoxInt],
                Type::Real => &[RuntimeFn::BoxReal],
                Type::Boolean => &[RuntimeFn::BoxBoolean],
                Type::String => &[RuntimeFn::BoxString],
                Type::NodeSet => &[RuntimeFn::BoxNodeSet],
                Type::Node => &[RuntimeFn::BoxNode],
                Type::ResultTree => &[RuntimeFn::BoxResultTree],
                _ => &[],
            },
            Coercion::Unbox(ty) => match ty {
                Type::Int => &[RuntimeFn::UnboxInt],
                Type::Real => &[RuntimeFn::UnboxReal],
                Type::Boolean => &[RuntimeFn::UnboxBoolean],
                Type::String => &[RuntimeFn::UnboxString],
                Type::NodeSet => &[RuntimeFn::UnboxNodeSet],
                _ => &[],
            },
        }
    }

    /// Whether the conversion discards the distinction between the value
    /// being true and being false when the target is boolean. Conversions
    /// of this kind always produce `true` and exist only so existence
    /// tests type-check.
    pub fn is_always_true(self) -> bool {
        matches!(self, Coercion::NodeToBoolean | Coercion::ResultTreeToBoolean)
    }
}

/// Look up the single-step coercion from one type to another.
///
/// The table is deliberately closed: absent pairs are type errors, not
/// chained conversions. In particular there is no `String` to `Int`
/// entry, so integer-literal arithmetic against a string resolves to the
/// real-typed operator signature instead.
pub fn coercion(from: Type, to: Type) -> Option<Coercion> {
    use Type::*;
    let c = match (from, to) {
        (Int, Real) => Coercion::IntToReal,
        (Real, Int) => Coercion::RealToInt,
        (Int, String) => Coercion::IntToString,
        (Real, String) => Coercion::RealToString,
        (Int, Boolean) => Coercion::IntToBoolean,
        (Real, Boolean) => Coercion::RealToBoolean,
        (Boolean, String) => Coercion::BooleanToString,
        (String, Boolean) => Coercion::StringToBoolean,
        (String, Real) => Coercion::StringToReal,
        (NodeSet, Boolean) => Coercion::NodeSetToBoolean,
        (NodeSet, String) => Coercion::NodeSetToString,
        (NodeSet, Real) => Coercion::NodeSetToReal,
        (NodeSet, Node) => Coercion::NodeSetToNode,
        (Node, String) => Coercion::NodeToString,
        (Node, Real) => Coercion::NodeToReal,
        (Node, Boolean) => Coercion::NodeToBoolean,
        (Node, NodeSet) => Coercion::NodeToNodeSet,
        (ResultTree, String) => Coercion::ResultTreeToString,
        (ResultTree, Real) => Coercion::ResultTreeToReal,
        (ResultTree, Boolean) => Coercion::ResultTreeToBoolean,
        (Int | Real | Boolean | String | NodeSet | Node | ResultTree, Reference) => {
            Coercion::Box(from)
        }
        (Reference, Int | Real | Boolean | String | NodeSet) => Coercion::Unbox(to),
        _ => return None,
    };
    Some(c)
}

/// Conversion distance: 0 for identity, 1 for a table entry, none
/// otherwise.
pub fn distance(from: Type, to: Type) -> Option<u32> {
    if from == to {
        return Some(0);
    }
    coercion(from, to).map(|_| 1)
}

/// One overload of a built-in binary operator.
#[derive(Debug, Clone, Copy)]
pub struct OpSig {
    pub left: Type,
    pub right: Type,
    pub ret: Type,
}

const fn sig(left: Type, right: Type, ret: Type) -> OpSig {
    OpSig { left, right, ret }
}

use Type as T;

pub const ADD_SIGS: &[OpSig] = &[sig(T::Int, T::Int, T::Int), sig(T::Real, T::Real, T::Real)];
pub const MUL_SIGS: &[OpSig] = &[sig(T::Int, T::Int, T::Int), sig(T::Real, T::Real, T::Real)];
// XPath `div` is real division even over integers.
pub const DIV_SIGS: &[OpSig] = &[sig(T::Real, T::Real, T::Real)];
pub const MOD_SIGS: &[OpSig] = &[sig(T::Int, T::Int, T::Int), sig(T::Real, T::Real, T::Real)];

/// Equality overloads. Node-set comparisons are existential; signatures
/// are normalized to put the node-set on the left, the checker mirrors
/// the operator when the operands arrive swapped.
pub const EQUALITY_SIGS: &[OpSig] = &[
    sig(T::Int, T::Int, T::Boolean),
    sig(T::Real, T::Real, T::Boolean),
    sig(T::Boolean, T::Boolean, T::Boolean),
    sig(T::String, T::String, T::Boolean),
    sig(T::NodeSet, T::NodeSet, T::Boolean),
    sig(T::NodeSet, T::String, T::Boolean),
    sig(T::NodeSet, T::Real, T::Boolean),
    sig(T::Reference, T::Reference, T::Boolean),
];

/// Relational overloads. String pairs are absent on purpose: `'a' < 'b'`
/// resolves through `StringToReal` to the real comparison, which is the
/// XPath 1.0 rule. The same rule keeps a node-set/string pair out of the
/// table: a non-node-set relational operand always compares as a number,
/// so node-set comparisons against strings resolve to the real overload.
pub const RELATIONAL_SIGS: &[OpSig] = &[
    sig(T::Int, T::Int, T::Boolean),
    sig(T::Real, T::Real, T::Boolean),
    sig(T::NodeSet, T::NodeSet, T::Boolean),
    sig(T::NodeSet, T::Real, T::Boolean),
    sig(T::Reference, T::Reference, T::Boolean),
];

/// Pick the best overload for an operand pair: an exact match wins
/// outright, otherwise the signature with the minimum summed conversion
/// distance. Ties resolve to the earlier table entry.
pub fn resolve_binary(sigs: &'static [OpSig], left: Type, right: Type) -> Option<&'static OpSig> {
    let mut best: Option<(&OpSig, u32)> = None;
    for candidate in sigs {
        let Some(dl) = distance(left, candidate.left) else {
            continue;
        };
        let Some(dr) = distance(right, candidate.right) else {
            continue;
        };
        let total = dl + dr;
        if total == 0 {
            return Some(candidate);
        }
        match best {
            Some((_, d)) if d <= total => {}
            _ => best = Some((candidate, total)),
        }
    }
    best.map(|(s, _)| s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use Type::*;

    /// Every non-identity pair either has a coercion or is a type error;
    /// the decision must be total and self-consistent with `distance`.
    #[test]
    fn test_coercion_table_consistency() {
        let all = [
            Boolean, Int, Real, String, Node, NodeSet, ResultTree, Reference, Void, Object,
        ];
        for from in all {
            for to in all {
                match distance(from, to) {
                    Some(0) => assert_eq!(from, to),
                    Some(1) => assert!(coercion(from, to).is_some()),
                    Some(_) => panic!("distance beyond one step"),
                    None => assert!(coercion(from, to).is_none() && from != to),
                }
            }
        }
    }

    #[test]
    fn test_void_and_object_are_isolated() {
        for other in [Boolean, Int, Real, String, Node, NodeSet, ResultTree, Reference] {
            assert!(coercion(Void, other).is_none());
            assert!(coercion(other, Void).is_none());
            assert!(coercion(Object, other).is_none());
            assert!(coercion(other, Object).is_none());
        }
    }

    #[test]
    fn test_no_string_to_int() {
        assert!(coercion(String, Int).is_none());
    }

    /// `1 + "2"`: no string-to-integer entry, so the real overload wins
    /// with one conversion on each side.
    #[test]
    fn test_int_plus_string_resolves_to_real() {
        let sig = resolve_binary(ADD_SIGS, Int, String).unwrap();
        assert_eq!(sig.ret, Real);
        assert_eq!((sig.left, sig.right), (Real, Real));
    }

    #[test]
    fn test_exact_match_beats_conversions() {
        let sig = resolve_binary(EQUALITY_SIGS, NodeSet, String).unwrap();
        assert_eq!((sig.left, sig.right), (NodeSet, String));
    }

    #[test]
    fn test_unresolvable_pair() {
        assert!(resolve_binary(ADD_SIGS, Object, Int).is_none());
    }

    #[test]
    fn test_string_relational_goes_numeric() {
        let sig = resolve_binary(RELATIONAL_SIGS, String, String).unwrap();
        assert_eq!((sig.left, sig.right), (Real, Real));
    }

    /// A node-set compared against a string relationally must convert
    /// the string side to a number, unlike equality which compares the
    /// string values.
    #[test]
    fn test_node_set_relational_against_string_goes_numeric() {
        let sig = resolve_binary(RELATIONAL_SIGS, NodeSet, String).unwrap();
        assert_eq!((sig.left, sig.right), (NodeSet, Real));
    }
}
