//! Type checking: rebuilding untyped XPath syntax into a typed expression
//! tree.
//!
//! Rather than annotating the parse tree in place, checking constructs a
//! parallel `TypedExpr` tree. Every node caches its result type, every
//! implicit conversion becomes an explicit `Cast` node, and every operator
//! is resolved to one concrete overload, so translation downstream is a
//! mechanical walk with no type decisions left to make.

use std::collections::HashMap;

use crate::symbols::{CoreFn, FnDecl, Params, SymbolTable};
use crate::types::{
    self, Coercion, OpSig, Type, TypeError, ADD_SIGS, DIV_SIGS, EQUALITY_SIGS, MOD_SIGS, MUL_SIGS,
    RELATIONAL_SIGS,
};
use xsltc_emit::{ArithOp, CmpOp, NumKind};
use xsltc_xpath::{Axis, BinaryOp, Expr, LocationPath, NodeTest};

/// Where variable types come from during checking. Local scopes shadow
/// globals.
pub trait VarTypes {
    fn local_type(&self, name: &str) -> Option<Type>;
    fn global_type(&self, name: &str) -> Option<Type>;
}

/// The checking environment: function signatures plus variable types.
pub struct TypeEnv<'a> {
    pub symbols: &'a SymbolTable,
    pub vars: &'a dyn VarTypes,
}

/// A [`VarTypes`] with globals only, used while the global declarations
/// themselves are being ordered and typed.
pub struct GlobalVars<'a> {
    pub globals: &'a HashMap<String, Type>,
}

impl VarTypes for GlobalVars<'_> {
    fn local_type(&self, _name: &str) -> Option<Type> {
        None
    }

    fn global_type(&self, name: &str) -> Option<Type> {
        self.globals.get(name).copied()
    }
}

// --- The typed tree ---

/// Which concrete comparison a resolved (in)equality uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpKind {
    Int,
    Real,
    Boolean,
    String,
    NodeSetString,
    NodeSetReal,
    NodeSetNodeSet,
    Reference,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedExpr {
    IntLit(i64),
    RealLit(f64),
    StrLit(String),
    BoolLit(bool),
    /// The context node.
    CurrentNode,
    LocalRef {
        name: String,
        ty: Type,
    },
    GlobalRef {
        name: String,
        ty: Type,
    },
    /// An explicit conversion synthesized during checking.
    Cast {
        shape: Coercion,
        to: Type,
        expr: Box<TypedExpr>,
    },
    Arith {
        op: ArithOp,
        kind: NumKind,
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
    },
    Neg {
        kind: NumKind,
        expr: Box<TypedExpr>,
    },
    Compare {
        op: CmpOp,
        kind: CmpKind,
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
    },
    And {
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
    },
    Or {
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
    },
    Not(Box<TypedExpr>),
    Position,
    Last,
    Call {
        func: CoreFn,
        args: Vec<TypedExpr>,
        ty: Type,
    },
    Path(TypedPath),
    /// A set union; every operand is node-set typed.
    Union(Vec<TypedExpr>),
    /// A non-path node-set refined by predicates.
    Filter {
        base: Box<TypedExpr>,
        predicates: Vec<TypedPredicate>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedPath {
    pub start: PathStart,
    pub steps: Vec<TypedStep>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathStart {
    /// Relative to the context node.
    Current,
    /// Anchored at the document root.
    Root,
    /// Starting from the node-set an expression produces.
    Expr(Box<TypedExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedStep {
    pub axis: Axis,
    pub node_test: NodeTest,
    pub predicates: Vec<TypedPredicate>,
}

/// A predicate, classified by the type of its expression: numeric
/// predicates select by context position, everything else is a truth
/// test.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedPredicate {
    Position(Box<TypedExpr>),
    Boolean(Box<TypedExpr>),
}

impl TypedExpr {
    /// The cached static type of this expression.
    pub fn ty(&self) -> Type {
        match self {
            TypedExpr::IntLit(_) | TypedExpr::Position | TypedExpr::Last => Type::Int,
            TypedExpr::RealLit(_) => Type::Real,
            TypedExpr::StrLit(_) => Type::String,
            TypedExpr::BoolLit(_)
            | TypedExpr::Compare { .. }
            | TypedExpr::And { .. }
            | TypedExpr::Or { .. }
            | TypedExpr::Not(_) => Type::Boolean,
            TypedExpr::CurrentNode => Type::Node,
            TypedExpr::LocalRef { ty, .. } | TypedExpr::GlobalRef { ty, .. } => *ty,
            TypedExpr::Cast { to, .. } => *to,
            TypedExpr::Arith { kind, .. } | TypedExpr::Neg { kind, .. } => match kind {
                NumKind::Int => Type::Int,
                NumKind::Real => Type::Real,
            },
            TypedExpr::Call { ty, .. } => *ty,
            TypedExpr::Path(_) | TypedExpr::Union(_) | TypedExpr::Filter { .. } => Type::NodeSet,
        }
    }
}

/// Names of the local variables an expression references, in first-use
/// order. Used to decide what a predicate closure must capture.
pub fn local_refs(expr: &TypedExpr) -> Vec<String> {
    fn walk(e: &TypedExpr, out: &mut Vec<String>) {
        match e {
            TypedExpr::LocalRef { name, .. } => {
                if !out.iter().any(|n| n == name) {
                    out.push(name.clone());
                }
            }
            TypedExpr::Cast { expr, .. } | TypedExpr::Neg { expr, .. } | TypedExpr::Not(expr) => {
                walk(expr, out)
            }
            TypedExpr::Arith { left, right, .. }
            | TypedExpr::Compare { left, right, .. }
            | TypedExpr::And { left, right }
            | TypedExpr::Or { left, right } => {
                walk(left, out);
                walk(right, out);
            }
            TypedExpr::Call { args, .. } => args.iter().for_each(|a| walk(a, out)),
            TypedExpr::Union(parts) => parts.iter().for_each(|p| walk(p, out)),
            TypedExpr::Path(path) => {
                if let PathStart::Expr(e) = &path.start {
                    walk(e, out);
                }
                for step in &path.steps {
                    walk_predicates(&step.predicates, out);
                }
            }
            TypedExpr::Filter { base, predicates } => {
                walk(base, out);
                walk_predicates(predicates, out);
            }
            _ => {}
        }
    }
    fn walk_predicates(preds: &[TypedPredicate], out: &mut Vec<String>) {
        for pred in preds {
            match pred {
                TypedPredicate::Position(e) | TypedPredicate::Boolean(e) => walk(e, out),
            }
        }
    }
    let mut out = Vec::new();
    walk(expr, &mut out);
    out
}

// --- Coercion ---

/// Convert an expression to `to`, inserting a `Cast` node when the types
/// differ. Integer literals fold into their converted form directly.
pub fn coerce(expr: TypedExpr, to: Type) -> Result<TypedExpr, TypeError> {
    let from = expr.ty();
    if from == to {
        return Ok(expr);
    }
    let shape = types::coercion(from, to).ok_or(TypeError::NoConversion { from, to })?;
    if let TypedExpr::IntLit(i) = expr {
        match to {
            Type::Real => return Ok(TypedExpr::RealLit(i as f64)),
            Type::String => return Ok(TypedExpr::StrLit(i.to_string())),
            _ => {}
        }
    }
    Ok(TypedExpr::Cast {
        shape,
        to,
        expr: Box::new(expr),
    })
}

// --- Checking ---

pub fn check_expr(expr: &Expr, env: &TypeEnv<'_>) -> Result<TypedExpr, TypeError> {
    match expr {
        Expr::Literal(s) => Ok(TypedExpr::StrLit(s.clone())),
        Expr::Number(n) => Ok(number_literal(*n)),
        Expr::Variable(name) => check_variable(name, env),
        Expr::Negate(inner) => check_negate(inner, env),
        Expr::Binary { left, op, right } => check_binary(left, *op, right, env),
        Expr::FunctionCall { name, args } => check_call(name, args, env),
        Expr::Path(path) => check_path(path, env),
        Expr::Filter { base, predicates } => {
            let base = coerce(check_expr(base, env)?, Type::NodeSet)?;
            let predicates = check_predicates(predicates, env)?;
            Ok(TypedExpr::Filter {
                base: Box::new(base),
                predicates,
            })
        }
    }
}

/// XPath has one number type; splitting integral literals out lets the
/// common cases (positional predicates, counters) stay on integer
/// instructions.
fn number_literal(n: f64) -> TypedExpr {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < (i64::MAX as f64) {
        TypedExpr::IntLit(n as i64)
    } else {
        TypedExpr::RealLit(n)
    }
}

fn check_variable(name: &str, env: &TypeEnv<'_>) -> Result<TypedExpr, TypeError> {
    if let Some(ty) = env.vars.local_type(name) {
        return Ok(TypedExpr::LocalRef {
            name: name.to_string(),
            ty,
        });
    }
    if let Some(ty) = env.vars.global_type(name) {
        return Ok(TypedExpr::GlobalRef {
            name: name.to_string(),
            ty,
        });
    }
    Err(TypeError::UndeclaredVariable(name.to_string()))
}

fn check_negate(inner: &Expr, env: &TypeEnv<'_>) -> Result<TypedExpr, TypeError> {
    let inner = check_expr(inner, env)?;
    let (kind, inner) = match inner.ty() {
        Type::Int => (NumKind::Int, inner),
        _ => (NumKind::Real, coerce(inner, Type::Real)?),
    };
    Ok(TypedExpr::Neg {
        kind,
        expr: Box::new(inner),
    })
}

fn check_binary(
    left: &Expr,
    op: BinaryOp,
    right: &Expr,
    env: &TypeEnv<'_>,
) -> Result<TypedExpr, TypeError> {
    match op {
        BinaryOp::And | BinaryOp::Or => {
            let l = coerce(check_expr(left, env)?, Type::Boolean)?;
            let r = coerce(check_expr(right, env)?, Type::Boolean)?;
            let (left, right) = (Box::new(l), Box::new(r));
            Ok(match op {
                BinaryOp::And => TypedExpr::And { left, right },
                _ => TypedExpr::Or { left, right },
            })
        }
        BinaryOp::Union => {
            let mut parts = Vec::new();
            collect_union(left, env, &mut parts)?;
            collect_union(right, env, &mut parts)?;
            Ok(TypedExpr::Union(parts))
        }
        BinaryOp::Plus => check_arith(left, right, env, "+", ArithOp::Add, ADD_SIGS),
        BinaryOp::Minus => check_arith(left, right, env, "-", ArithOp::Sub, ADD_SIGS),
        BinaryOp::Multiply => check_arith(left, right, env, "*", ArithOp::Mul, MUL_SIGS),
        BinaryOp::Divide => check_arith(left, right, env, "div", ArithOp::Div, DIV_SIGS),
        BinaryOp::Modulo => check_arith(left, right, env, "mod", ArithOp::Mod, MOD_SIGS),
        BinaryOp::Equals => check_compare(left, right, env, "=", CmpOp::Eq, EQUALITY_SIGS),
        BinaryOp::NotEquals => check_compare(left, right, env, "!=", CmpOp::Ne, EQUALITY_SIGS),
        BinaryOp::LessThan => check_compare(left, right, env, "<", CmpOp::Lt, RELATIONAL_SIGS),
        BinaryOp::LessThanOrEqual => {
            check_compare(left, right, env, "<=", CmpOp::Le, RELATIONAL_SIGS)
        }
        BinaryOp::GreaterThan => check_compare(left, right, env, ">", CmpOp::Gt, RELATIONAL_SIGS),
        BinaryOp::GreaterThanOrEqual => {
            check_compare(left, right, env, ">=", CmpOp::Ge, RELATIONAL_SIGS)
        }
    }
}

fn collect_union(
    expr: &Expr,
    env: &TypeEnv<'_>,
    parts: &mut Vec<TypedExpr>,
) -> Result<(), TypeError> {
    if let Expr::Binary {
        left,
        op: BinaryOp::Union,
        right,
    } = expr
    {
        collect_union(left, env, parts)?;
        collect_union(right, env, parts)?;
        return Ok(());
    }
    let part = check_expr(expr, env)?;
    let ty = part.ty();
    if types::distance(ty, Type::NodeSet).is_none() {
        return Err(TypeError::NotANodeSet(ty));
    }
    parts.push(coerce(part, Type::NodeSet)?);
    Ok(())
}

fn check_arith(
    left: &Expr,
    right: &Expr,
    env: &TypeEnv<'_>,
    name: &'static str,
    op: ArithOp,
    sigs: &'static [OpSig],
) -> Result<TypedExpr, TypeError> {
    let l = check_expr(left, env)?;
    let r = check_expr(right, env)?;
    let sig = types::resolve_binary(sigs, l.ty(), r.ty()).ok_or(
        TypeError::UnresolvableOperator {
            op: name,
            left: l.ty(),
            right: r.ty(),
        },
    )?;
    let kind = match sig.ret {
        Type::Int => NumKind::Int,
        _ => NumKind::Real,
    };
    Ok(TypedExpr::Arith {
        op,
        kind,
        left: Box::new(coerce(l, sig.left)?),
        right: Box::new(coerce(r, sig.right)?),
    })
}

fn check_compare(
    left: &Expr,
    right: &Expr,
    env: &TypeEnv<'_>,
    name: &'static str,
    op: CmpOp,
    sigs: &'static [OpSig],
) -> Result<TypedExpr, TypeError> {
    let mut l = check_expr(left, env)?;
    let mut r = check_expr(right, env)?;
    let mut op = op;
    // Signatures keep the node-set on the left; a swap mirrors the
    // operator so existential comparison semantics survive.
    if r.ty() == Type::NodeSet && l.ty() != Type::NodeSet {
        std::mem::swap(&mut l, &mut r);
        op = op.mirror();
    }
    let sig = types::resolve_binary(sigs, l.ty(), r.ty()).ok_or(
        TypeError::UnresolvableOperator {
            op: name,
            left: l.ty(),
            right: r.ty(),
        },
    )?;
    let kind = match (sig.left, sig.right) {
        (Type::Int, Type::Int) => CmpKind::Int,
        (Type::Real, Type::Real) => CmpKind::Real,
        (Type::Boolean, Type::Boolean) => CmpKind::Boolean,
        (Type::String, Type::String) => CmpKind::String,
        (Type::NodeSet, Type::String) => CmpKind::NodeSetString,
        (Type::NodeSet, Type::Real) => CmpKind::NodeSetReal,
        (Type::NodeSet, Type::NodeSet) => CmpKind::NodeSetNodeSet,
        _ => CmpKind::Reference,
    };
    Ok(TypedExpr::Compare {
        op,
        kind,
        left: Box::new(coerce(l, sig.left)?),
        right: Box::new(coerce(r, sig.right)?),
    })
}

fn check_call(name: &str, args: &[Expr], env: &TypeEnv<'_>) -> Result<TypedExpr, TypeError> {
    // Functions with their own typing or folding rules.
    match name {
        "true" => return constant_call(name, args, TypedExpr::BoolLit(true)),
        "false" => return constant_call(name, args, TypedExpr::BoolLit(false)),
        "position" => return constant_call(name, args, TypedExpr::Position),
        "last" => return constant_call(name, args, TypedExpr::Last),
        "current" => return constant_call(name, args, TypedExpr::CurrentNode),
        "not" => {
            let arg = single_arg(name, args)?;
            let arg = coerce(check_expr(arg, env)?, Type::Boolean)?;
            return Ok(TypedExpr::Not(Box::new(arg)));
        }
        "boolean" => {
            let arg = single_arg(name, args)?;
            return coerce(check_expr(arg, env)?, Type::Boolean);
        }
        "string" => return optional_context_arg(name, args, env, Type::String),
        "number" => return optional_context_arg(name, args, env, Type::Real),
        "function-available" => {
            let probe = literal_arg(args).ok_or(TypeError::ConstantRequired(
                "function-available",
            ))?;
            return Ok(TypedExpr::BoolLit(env.symbols.function_available(probe)));
        }
        "element-available" => {
            let probe =
                literal_arg(args).ok_or(TypeError::ConstantRequired("element-available"))?;
            return Ok(TypedExpr::BoolLit(env.symbols.element_available(probe)));
        }
        _ => {}
    }

    let decl: &FnDecl = env
        .symbols
        .function(name)
        .ok_or_else(|| TypeError::UnknownFunction(name.to_string()))?;

    let mut checked = Vec::with_capacity(args.len().max(1));
    match decl.params {
        Params::Fixed(params) => {
            if args.len() != params.len() {
                return Err(arity_error(name, params.len().to_string(), args.len()));
            }
            for (arg, &ty) in args.iter().zip(params) {
                checked.push(coerce(check_expr(arg, env)?, ty)?);
            }
        }
        Params::Optional { required, optional } => {
            let min = required.len();
            let max = min + optional.len();
            if args.len() < min || args.len() > max {
                return Err(arity_error(name, format!("{min} to {max}"), args.len()));
            }
            let param_types = required.iter().chain(optional.iter());
            for (arg, &ty) in args.iter().zip(param_types.clone()) {
                checked.push(coerce(check_expr(arg, env)?, ty)?);
            }
            // A missing trailing optional defaults to the context node.
            if args.len() == min {
                if let Some(&ty) = optional.first() {
                    checked.push(coerce(TypedExpr::CurrentNode, ty)?);
                }
            }
        }
        Params::Variadic { min, each } => {
            if args.len() < min {
                return Err(arity_error(name, format!("at least {min}"), args.len()));
            }
            for arg in args {
                checked.push(coerce(check_expr(arg, env)?, each)?);
            }
        }
    }

    Ok(TypedExpr::Call {
        func: decl.func,
        args: checked,
        ty: decl.ret,
    })
}

fn constant_call(name: &str, args: &[Expr], result: TypedExpr) -> Result<TypedExpr, TypeError> {
    if !args.is_empty() {
        return Err(arity_error(name, "0".to_string(), args.len()));
    }
    Ok(result)
}

fn single_arg<'a>(name: &str, args: &'a [Expr]) -> Result<&'a Expr, TypeError> {
    match args {
        [one] => Ok(one),
        _ => Err(arity_error(name, "1".to_string(), args.len())),
    }
}

/// `string()` / `number()` with no argument convert the context node.
fn optional_context_arg(
    name: &str,
    args: &[Expr],
    env: &TypeEnv<'_>,
    to: Type,
) -> Result<TypedExpr, TypeError> {
    match args {
        [] => coerce(TypedExpr::CurrentNode, to),
        [one] => coerce(check_expr(one, env)?, to),
        _ => Err(arity_error(name, "0 or 1".to_string(), args.len())),
    }
}

fn literal_arg(args: &[Expr]) -> Option<&str> {
    match args {
        [one] => one.as_literal(),
        _ => None,
    }
}

fn arity_error(name: &str, expected: String, got: usize) -> TypeError {
    TypeError::WrongArity {
        name: name.to_string(),
        expected,
        got,
    }
}

fn check_path(path: &LocationPath, env: &TypeEnv<'_>) -> Result<TypedExpr, TypeError> {
    // The bare `.` is the context node itself, not a one-step traversal.
    if path.start.is_none() && !path.is_absolute {
        if let [only] = path.steps.as_slice() {
            if only.is_self_node() {
                return Ok(TypedExpr::CurrentNode);
            }
        }
    }

    let start = match &path.start {
        Some(expr) => {
            let start = coerce(check_expr(expr, env)?, Type::NodeSet)?;
            PathStart::Expr(Box::new(start))
        }
        None if path.is_absolute => PathStart::Root,
        None => PathStart::Current,
    };

    let mut steps = Vec::with_capacity(path.steps.len());
    for step in &path.steps {
        steps.push(TypedStep {
            axis: step.axis,
            node_test: step.node_test.clone(),
            predicates: check_predicates(&step.predicates, env)?,
        });
    }

    Ok(TypedExpr::Path(TypedPath { start, steps }))
}

/// Classify each predicate: numeric expressions select by position,
/// everything else is coerced to a truth test.
///
/// A numeric predicate that itself reads `position()` or `last()` (such
/// as `[last()]`) cannot be evaluated outside the node list it filters,
/// so it is rewritten into the equivalent `position() = expr` truth test
/// and compiled as a closure with the proper context.
pub fn check_predicates(
    predicates: &[Expr],
    env: &TypeEnv<'_>,
) -> Result<Vec<TypedPredicate>, TypeError> {
    predicates
        .iter()
        .map(|pred| {
            let checked = check_expr(pred, env)?;
            Ok(match checked.ty() {
                Type::Int | Type::Real if reads_context_position(&checked) => {
                    TypedPredicate::Boolean(Box::new(TypedExpr::Compare {
                        op: CmpOp::Eq,
                        kind: CmpKind::Int,
                        left: Box::new(TypedExpr::Position),
                        right: Box::new(coerce(checked, Type::Int)?),
                    }))
                }
                Type::Int => TypedPredicate::Position(Box::new(checked)),
                Type::Real => TypedPredicate::Position(Box::new(coerce(checked, Type::Int)?)),
                _ => TypedPredicate::Boolean(Box::new(coerce(checked, Type::Boolean)?)),
            })
        })
        .collect()
}

/// Whether an expression reads the context position or size at its own
/// level (nested predicates have their own context and do not count).
fn reads_context_position(expr: &TypedExpr) -> bool {
    match expr {
        TypedExpr::Position | TypedExpr::Last => true,
        TypedExpr::Cast { expr, .. } | TypedExpr::Neg { expr, .. } | TypedExpr::Not(expr) => {
            reads_context_position(expr)
        }
        TypedExpr::Arith { left, right, .. }
        | TypedExpr::Compare { left, right, .. }
        | TypedExpr::And { left, right }
        | TypedExpr::Or { left, right } => {
            reads_context_position(left) || reads_context_position(right)
        }
        TypedExpr::Call { args, .. } => args.iter().any(reads_context_position),
        TypedExpr::Union(parts) => parts.iter().any(reads_context_position),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xsltc_xpath::parse_expression;

    struct NoVars;

    impl VarTypes for NoVars {
        fn local_type(&self, _: &str) -> Option<Type> {
            None
        }
        fn global_type(&self, _: &str) -> Option<Type> {
            None
        }
    }

    fn check(text: &str) -> Result<TypedExpr, TypeError> {
        let symbols = SymbolTable::core();
        let env = TypeEnv {
            symbols: &symbols,
            vars: &NoVars,
        };
        check_expr(&parse_expression(text).unwrap(), &env)
    }

    #[test]
    fn test_int_plus_string_is_real() {
        let e = check("1 + \"2\"").unwrap();
        assert_eq!(e.ty(), Type::Real);
        let TypedExpr::Arith { left, right, kind, .. } = e else {
            panic!("expected arithmetic node");
        };
        assert_eq!(kind, NumKind::Real);
        // The integer literal folds; the string gets a runtime parse.
        assert_eq!(*left, TypedExpr::RealLit(1.0));
        assert!(matches!(
            *right,
            TypedExpr::Cast { shape: Coercion::StringToReal, .. }
        ));
    }

    #[test]
    fn test_int_plus_int_stays_int() {
        let e = check("1 + 2").unwrap();
        assert_eq!(e.ty(), Type::Int);
    }

    #[test]
    fn test_div_always_real() {
        assert_eq!(check("4 div 2").unwrap().ty(), Type::Real);
    }

    #[test]
    fn test_existential_comparison_swaps_and_mirrors() {
        let e = check("3 < item").unwrap();
        let TypedExpr::Compare { op, kind, left, .. } = e else {
            panic!("expected comparison");
        };
        assert_eq!(op, CmpOp::Gt);
        assert_eq!(kind, CmpKind::NodeSetReal);
        assert_eq!(left.ty(), Type::NodeSet);
    }

    /// Relational operators never compare string values; the string side
    /// of a node-set comparison is parsed as a number.
    #[test]
    fn test_relational_node_set_against_string_goes_numeric() {
        let e = check("item < '42'").unwrap();
        let TypedExpr::Compare { kind, right, .. } = e else {
            panic!("expected comparison");
        };
        assert_eq!(kind, CmpKind::NodeSetReal);
        assert!(matches!(
            *right,
            TypedExpr::Cast { shape: Coercion::StringToReal, .. }
        ));
    }

    #[test]
    fn test_true_false_fold_to_literals() {
        assert_eq!(check("true()").unwrap(), TypedExpr::BoolLit(true));
        assert_eq!(check("false()").unwrap(), TypedExpr::BoolLit(false));
    }

    #[test]
    fn test_capability_probes_fold() {
        assert_eq!(
            check("function-available('concat')").unwrap(),
            TypedExpr::BoolLit(true)
        );
        assert_eq!(
            check("function-available('ext:magic')").unwrap(),
            TypedExpr::BoolLit(false)
        );
        assert_eq!(
            check("element-available('xsl:for-each')").unwrap(),
            TypedExpr::BoolLit(true)
        );
        assert!(matches!(
            check("function-available(name())"),
            Err(TypeError::ConstantRequired(_))
        ));
    }

    #[test]
    fn test_not_becomes_negation_node() {
        let e = check("not(item)").unwrap();
        let TypedExpr::Not(inner) = e else {
            panic!("expected negation");
        };
        assert_eq!(inner.ty(), Type::Boolean);
    }

    #[test]
    fn test_context_dot_is_a_node() {
        assert_eq!(check(".").unwrap(), TypedExpr::CurrentNode);
        // string() with no argument converts the context node.
        let e = check("string()").unwrap();
        assert!(matches!(
            e,
            TypedExpr::Cast { shape: Coercion::NodeToString, .. }
        ));
    }

    #[test]
    fn test_undeclared_variable_rejected() {
        assert!(matches!(
            check("$nope + 1"),
            Err(TypeError::UndeclaredVariable(_))
        ));
    }

    #[test]
    fn test_unknown_function_rejected() {
        assert!(matches!(
            check("document('x')"),
            Err(TypeError::UnknownFunction(_))
        ));
    }

    #[test]
    fn test_predicate_classification() {
        let TypedExpr::Path(path) = check("item[2][@kind = 'a']").unwrap() else {
            panic!("expected path");
        };
        let preds = &path.steps[0].predicates;
        assert!(matches!(preds[0], TypedPredicate::Position(_)));
        assert!(matches!(preds[1], TypedPredicate::Boolean(_)));
    }

    #[test]
    fn test_union_flattens() {
        let TypedExpr::Union(parts) = check("a | b | c").unwrap() else {
            panic!("expected union");
        };
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn test_union_of_non_node_set_rejected() {
        assert!(matches!(
            check("a | 3"),
            Err(TypeError::NotANodeSet(Type::Int))
        ));
    }

    #[test]
    fn test_concat_variadic() {
        let e = check("concat('a', 'b', 1)").unwrap();
        let TypedExpr::Call { func, args, ty } = e else {
            panic!("expected call");
        };
        assert_eq!(func, CoreFn::Concat);
        assert_eq!(args.len(), 3);
        assert_eq!(ty, Type::String);
        // The numeric argument folded to its string form.
        assert_eq!(args[2], TypedExpr::StrLit("1".to_string()));
    }

    #[test]
    fn test_capture_discovery_ordered_and_deduplicated() {
        let symbols = SymbolTable::core();
        struct TwoLocals;
        impl VarTypes for TwoLocals {
            fn local_type(&self, name: &str) -> Option<Type> {
                matches!(name, "a" | "b").then_some(Type::String)
            }
            fn global_type(&self, _: &str) -> Option<Type> {
                None
            }
        }
        let env = TypeEnv {
            symbols: &symbols,
            vars: &TwoLocals,
        };
        let e = check_expr(
            &parse_expression("concat($a, $b, $a)").unwrap(),
            &env,
        )
        .unwrap();
        assert_eq!(local_refs(&e), vec!["a".to_string(), "b".to_string()]);
    }
}
