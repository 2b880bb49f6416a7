//! Expression translation.
//!
//! Value-producing expressions translate to stack code directly. Boolean
//! expressions translate *desynthesized*: no value is materialized;
//! instead the expression becomes branches collected into a true and a
//! false flow list, and the consuming construct decides where each
//! continuation lands. `synthesize_boolean` converts back to a stack
//! value at the few places one is genuinely needed.

use crate::codegen::path;
use crate::context::{CodegenCtx, PositionSource};
use crate::error::CompileError;
use crate::symbols::CoreFn;
use crate::typed::{CmpKind, TypedExpr};
use crate::types::Type;
use xsltc_emit::{Cond, Flow, FlowList, Instr, MethodBody, RuntimeFn};
use xsltc_xpath::{Avt, AvtPart};

/// Translate an expression, leaving its value on the stack.
pub fn translate(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    expr: &TypedExpr,
) -> Result<(), CompileError> {
    match expr {
        TypedExpr::IntLit(i) => body.emit(Instr::PushInt(*i)),
        TypedExpr::RealLit(r) => body.emit(Instr::PushReal(*r)),
        TypedExpr::StrLit(s) => {
            let idx = ctx.program.intern(s);
            body.emit(Instr::PushStr(idx));
        }
        TypedExpr::BoolLit(b) => body.emit(Instr::PushBool(*b)),
        TypedExpr::CurrentNode => body.emit(Instr::LoadLocal(ctx.current_node)),
        TypedExpr::LocalRef { name, .. } => {
            let binding = ctx
                .lookup_local(name)
                .ok_or_else(|| CompileError::Unresolved {
                    what: "variable",
                    name: name.clone(),
                })?;
            body.emit(Instr::LoadLocal(binding.slot));
        }
        TypedExpr::GlobalRef { name, .. } => {
            let binding = ctx
                .globals
                .get(name)
                .ok_or_else(|| CompileError::Unresolved {
                    what: "variable",
                    name: name.clone(),
                })?;
            body.emit(Instr::LoadGlobal(binding.index));
        }
        TypedExpr::Cast { shape, expr, .. } => {
            translate(ctx, body, expr)?;
            if shape.is_always_true() {
                // Existence is all the conversion asks.
                body.emit(Instr::Pop);
                body.emit(Instr::PushBool(true));
            } else {
                for call in shape.runtime_calls() {
                    body.emit(Instr::CallRuntime(*call));
                }
            }
        }
        TypedExpr::Arith { op, kind, left, right } => {
            translate(ctx, body, left)?;
            translate(ctx, body, right)?;
            body.emit(Instr::Arith(*op, *kind));
        }
        TypedExpr::Neg { kind, expr } => {
            translate(ctx, body, expr)?;
            body.emit(Instr::Neg(*kind));
        }
        TypedExpr::Position => match ctx.position {
            PositionSource::Iterator(slot) => {
                body.emit(Instr::LoadLocal(slot));
                body.emit(Instr::CallRuntime(RuntimeFn::IteratorPosition));
            }
            PositionSource::Slots { position, .. } => body.emit(Instr::LoadLocal(position)),
        },
        TypedExpr::Last => match ctx.position {
            PositionSource::Iterator(slot) => {
                body.emit(Instr::LoadLocal(slot));
                body.emit(Instr::CallRuntime(RuntimeFn::IteratorLast));
            }
            PositionSource::Slots { last, .. } => body.emit(Instr::LoadLocal(last)),
        },
        TypedExpr::Call { func, args, .. } => translate_call(ctx, body, *func, args)?,
        TypedExpr::Path(p) => path::translate_path(ctx, body, p)?,
        TypedExpr::Union(parts) => {
            let mut first = true;
            for part in parts {
                translate(ctx, body, part)?;
                if !first {
                    body.emit(Instr::CallRuntime(RuntimeFn::UnionIterator));
                }
                first = false;
            }
        }
        TypedExpr::Filter { base, predicates } => {
            translate(ctx, body, base)?;
            path::apply_predicates(ctx, body, predicates)?;
        }
        // Boolean connectives have no value form of their own; go through
        // the flow-list representation and materialize the result.
        TypedExpr::Compare { .. } | TypedExpr::And { .. } | TypedExpr::Or { .. }
        | TypedExpr::Not(_) => {
            let flow = translate_desynth(ctx, body, expr)?;
            synthesize_boolean(body, flow)?;
        }
    }
    Ok(())
}

fn translate_call(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    func: CoreFn,
    args: &[TypedExpr],
) -> Result<(), CompileError> {
    for arg in args {
        translate(ctx, body, arg)?;
    }
    let call = match func {
        CoreFn::Count => RuntimeFn::CountNodes,
        CoreFn::Sum => RuntimeFn::SumNodes,
        CoreFn::Name => {
            body.emit(Instr::CallRuntime(RuntimeFn::NodeSetToNode));
            RuntimeFn::GetNodeName
        }
        CoreFn::StringLength => RuntimeFn::StringLength,
        CoreFn::Concat => RuntimeFn::ConcatStrings(args.len() as u8),
        CoreFn::Contains => RuntimeFn::Contains,
        CoreFn::StartsWith => RuntimeFn::StartsWith,
        CoreFn::Substring => RuntimeFn::Substring(args.len() as u8),
        CoreFn::SubstringBefore => RuntimeFn::SubstringBefore,
        CoreFn::SubstringAfter => RuntimeFn::SubstringAfter,
        CoreFn::NormalizeSpace => RuntimeFn::NormalizeSpace,
        CoreFn::Translate => RuntimeFn::Translate,
        CoreFn::Floor => RuntimeFn::Floor,
        CoreFn::Ceiling => RuntimeFn::Ceiling,
        CoreFn::Round => RuntimeFn::Round,
        CoreFn::Lang => RuntimeFn::Lang,
        CoreFn::GenerateId => {
            body.emit(Instr::CallRuntime(RuntimeFn::NodeSetToNode));
            RuntimeFn::GenerateId
        }
        CoreFn::Key => RuntimeFn::KeyLookup,
        CoreFn::Id => RuntimeFn::IdLookup,
    };
    body.emit(Instr::CallRuntime(call));
    Ok(())
}

/// Translate a boolean expression into control flow. No value is left on
/// the stack; the result is the pair of flow lists. Control never falls
/// through past the emitted code: every outcome is a pending branch in
/// one of the two lists.
pub fn translate_desynth(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    expr: &TypedExpr,
) -> Result<Flow, CompileError> {
    match expr {
        TypedExpr::BoolLit(true) => {
            let mut flow = Flow::new();
            flow.true_list.add(body.jump());
            Ok(flow)
        }
        TypedExpr::BoolLit(false) => {
            let mut flow = Flow::new();
            flow.false_list.add(body.jump());
            Ok(flow)
        }
        TypedExpr::Not(inner) => Ok(translate_desynth(ctx, body, inner)?.negate()),
        TypedExpr::And { left, right } => {
            // A constant guard decides the conjunction at compile time;
            // the dead operand is never emitted.
            match left.as_ref() {
                TypedExpr::BoolLit(false) => return translate_desynth(ctx, body, left),
                TypedExpr::BoolLit(true) => return translate_desynth(ctx, body, right),
                _ => {}
            }
            let left_flow = translate_desynth(ctx, body, left)?;
            let right_start = body.here();
            left_flow.true_list.backpatch(body, right_start)?;
            let right_flow = translate_desynth(ctx, body, right)?;
            let mut flow = Flow::new();
            flow.true_list = right_flow.true_list;
            flow.false_list = left_flow.false_list;
            flow.false_list.merge(right_flow.false_list);
            Ok(flow)
        }
        TypedExpr::Or { left, right } => {
            match left.as_ref() {
                TypedExpr::BoolLit(true) => return translate_desynth(ctx, body, left),
                TypedExpr::BoolLit(false) => return translate_desynth(ctx, body, right),
                _ => {}
            }
            let left_flow = translate_desynth(ctx, body, left)?;
            // The left true continuation routes through one shared jump so
            // both operands' true lists can end up at the same target.
            let skip_label = body.here();
            let skip = body.jump();
            left_flow.true_list.backpatch(body, skip_label)?;
            let right_start = body.here();
            left_flow.false_list.backpatch(body, right_start)?;
            let right_flow = translate_desynth(ctx, body, right)?;
            let mut flow = Flow::new();
            flow.true_list = right_flow.true_list;
            flow.true_list.add(skip);
            flow.false_list = right_flow.false_list;
            Ok(flow)
        }
        TypedExpr::Compare { op, kind, left, right } => {
            translate(ctx, body, left)?;
            translate(ctx, body, right)?;
            let cond = match kind {
                CmpKind::Int => Cond::Cmp(*op, xsltc_emit::NumKind::Int),
                CmpKind::Real => Cond::Cmp(*op, xsltc_emit::NumKind::Real),
                // Booleans compare as their 0/1 encoding.
                CmpKind::Boolean => Cond::Cmp(*op, xsltc_emit::NumKind::Int),
                CmpKind::String => {
                    body.emit(Instr::CallRuntime(RuntimeFn::StringEq));
                    if *op == xsltc_emit::CmpOp::Eq {
                        Cond::True
                    } else {
                        Cond::False
                    }
                }
                CmpKind::NodeSetString => {
                    body.emit(Instr::CallRuntime(RuntimeFn::NodeSetCmpString(*op)));
                    Cond::True
                }
                CmpKind::NodeSetReal => {
                    body.emit(Instr::CallRuntime(RuntimeFn::NodeSetCmpReal(*op)));
                    Cond::True
                }
                CmpKind::NodeSetNodeSet => {
                    body.emit(Instr::CallRuntime(RuntimeFn::NodeSetCmpNodeSet(*op)));
                    Cond::True
                }
                CmpKind::Reference => {
                    body.emit(Instr::CallRuntime(RuntimeFn::ReferenceCmp(*op)));
                    Cond::True
                }
            };
            let mut flow = Flow::new();
            flow.true_list.add(body.branch(cond));
            flow.false_list.add(body.jump());
            Ok(flow)
        }
        // Conversions that can only be true still evaluate their operand,
        // then jump straight to the true continuation.
        TypedExpr::Cast { shape, expr, .. } if shape.is_always_true() => {
            translate(ctx, body, expr)?;
            body.emit(Instr::Pop);
            let mut flow = Flow::new();
            flow.true_list.add(body.jump());
            Ok(flow)
        }
        // Anything else is a boolean-valued computation: evaluate it and
        // branch on the value.
        other => {
            translate(ctx, body, other)?;
            let mut flow = Flow::new();
            flow.true_list.add(body.branch(Cond::True));
            flow.false_list.add(body.jump());
            Ok(flow)
        }
    }
}

/// Materialize a desynthesized result as a boolean on the stack.
pub fn synthesize_boolean(body: &mut MethodBody, flow: Flow) -> Result<(), CompileError> {
    let true_target = body.here();
    flow.true_list.backpatch(body, true_target)?;
    body.emit(Instr::PushBool(true));
    let done = body.jump();
    let false_target = body.here();
    flow.false_list.backpatch(body, false_target)?;
    body.emit(Instr::PushBool(false));
    let end = body.here();
    body.backpatch(done, end)?;
    Ok(())
}

/// Evaluate a boolean expression and add its false continuations to
/// `false_list`, with the true path falling through.
pub fn translate_guard(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    expr: &TypedExpr,
    false_list: &mut FlowList,
) -> Result<(), CompileError> {
    let flow = translate_desynth(ctx, body, expr)?;
    let fallthrough = body.here();
    flow.true_list.backpatch(body, fallthrough)?;
    false_list.merge(flow.false_list);
    Ok(())
}

/// Translate an attribute value template, leaving one string on the
/// stack.
pub fn translate_avt(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    avt: &Avt,
) -> Result<(), CompileError> {
    if avt.0.is_empty() {
        let idx = ctx.program.intern("");
        body.emit(Instr::PushStr(idx));
        return Ok(());
    }
    for part in &avt.0 {
        match part {
            AvtPart::Literal(s) => {
                let idx = ctx.program.intern(s);
                body.emit(Instr::PushStr(idx));
            }
            AvtPart::Expr(e) => {
                let typed = super::check_coerced(ctx, e, Type::String)?;
                translate(ctx, body, &typed)?;
            }
        }
    }
    if avt.0.len() > 1 {
        body.emit(Instr::CallRuntime(RuntimeFn::ConcatStrings(avt.0.len() as u8)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::check;
    use crate::context::testing::Fixture;
    use xsltc_xpath::parse_expression;

    fn contains_call(body: &MethodBody, call: RuntimeFn) -> bool {
        body.instrs()
            .iter()
            .any(|i| matches!(i, Instr::CallRuntime(c) if *c == call))
    }

    fn translate_text(fixture: &mut Fixture, text: &str) -> MethodBody {
        let (mut ctx, mut body) = fixture.template_frame();
        let typed = check(&ctx, &parse_expression(text).unwrap()).unwrap();
        translate(&mut ctx, &mut body, &typed).unwrap();
        body.emit(Instr::Return);
        assert_eq!(body.dangling(), 0, "all placeholders must be resolved");
        body
    }

    #[test]
    fn test_and_short_circuit_skips_dead_operand() {
        let mut fixture = Fixture::new();
        let body = translate_text(&mut fixture, "false() and contains('a', 'b')");
        assert!(!contains_call(&body, RuntimeFn::Contains));
    }

    #[test]
    fn test_or_short_circuit_skips_dead_operand() {
        let mut fixture = Fixture::new();
        let body = translate_text(&mut fixture, "true() or starts-with('a', 'b')");
        assert!(!contains_call(&body, RuntimeFn::StartsWith));
    }

    #[test]
    fn test_live_operands_both_emitted() {
        let mut fixture = Fixture::new();
        let body = translate_text(
            &mut fixture,
            "contains('a', 'b') or starts-with('a', 'b')",
        );
        assert!(contains_call(&body, RuntimeFn::Contains));
        assert!(contains_call(&body, RuntimeFn::StartsWith));
    }

    #[test]
    fn test_synthesized_boolean_pushes_both_outcomes() {
        let mut fixture = Fixture::new();
        let body = translate_text(&mut fixture, "1 < 2");
        let pushes: Vec<_> = body
            .instrs()
            .iter()
            .filter(|i| matches!(i, Instr::PushBool(_)))
            .collect();
        assert_eq!(pushes.len(), 2);
    }

    #[test]
    fn test_existence_test_needs_no_comparison() {
        let mut fixture = Fixture::new();
        // boolean(path) compiles to the node-set emptiness runtime test.
        let body = translate_text(&mut fixture, "boolean(item)");
        assert!(contains_call(&body, RuntimeFn::NodeSetToBoolean));
    }

    #[test]
    fn test_avt_concatenates_parts() {
        let mut fixture = Fixture::new();
        let (mut ctx, mut body) = fixture.template_frame();
        let avt = xsltc_xpath::parse_avt("h{1 + 1}x").unwrap();
        translate_avt(&mut ctx, &mut body, &avt).unwrap();
        body.emit(Instr::Return);
        assert!(contains_call(&body, RuntimeFn::ConcatStrings(3)));
    }

    #[test]
    fn test_single_literal_avt_is_one_push() {
        let mut fixture = Fixture::new();
        let (mut ctx, mut body) = fixture.template_frame();
        let avt = xsltc_xpath::parse_avt("plain").unwrap();
        translate_avt(&mut ctx, &mut body, &avt).unwrap();
        assert_eq!(body.instrs().len(), 1);
        assert!(matches!(body.instrs()[0], Instr::PushStr(_)));
    }
}
