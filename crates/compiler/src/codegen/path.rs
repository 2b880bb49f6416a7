//! Location path translation: composing runtime iterators step by step,
//! restoring document order where composition can break it, and turning
//! predicates into position filters or compiled closure methods.

use crate::codegen::expr::{translate, synthesize_boolean, translate_desynth};
use crate::context::{CodegenCtx, LocalBinding, PositionSource};
use crate::error::CompileError;
use crate::typed::{self, PathStart, TypedExpr, TypedPath, TypedPredicate, TypedStep};
use xsltc_emit::{
    AxisKind, Instr, MethodBody, MethodId, MethodSig, NodeKind, RuntimeFn, Slot,
};
use xsltc_xpath::{Axis, NodeTest, NodeTypeTest};

pub fn translate_path(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    path: &TypedPath,
) -> Result<(), CompileError> {
    match &path.start {
        PathStart::Current | PathStart::Root => {
            let push_start = |body: &mut MethodBody, ctx: &CodegenCtx<'_>| {
                body.emit(Instr::LoadLocal(ctx.current_node));
                if matches!(path.start, PathStart::Root) {
                    body.emit(Instr::CallRuntime(RuntimeFn::GetRoot));
                }
            };
            let Some((first, rest)) = path.steps.split_first() else {
                // A bare `/`: the singleton root.
                push_start(body, ctx);
                body.emit(Instr::CallRuntime(RuntimeFn::SingletonIterator));
                return Ok(());
            };
            emit_step(ctx, body, first)?;
            push_start(body, ctx);
            body.emit(Instr::CallRuntime(RuntimeFn::SetStartNode));
            let mut prev = axis_kind(first.axis);
            for step in rest {
                combine_step(ctx, body, step, &mut prev)?;
            }
        }
        PathStart::Expr(base) => {
            translate(ctx, body, base)?;
            // The base set comes from elsewhere (a variable, a key
            // lookup); nothing is known about how its nodes relate, so
            // the first composed step is pessimistic about ordering.
            let mut prev: Option<AxisKind> = None;
            for step in &path.steps {
                emit_step(ctx, body, step)?;
                body.emit(Instr::CallRuntime(RuntimeFn::StepIterator));
                let next = axis_kind(step.axis);
                let normalize = match prev {
                    None => next != AxisKind::SelfAxis,
                    Some(p) => needs_order_normalize(p, next),
                };
                if normalize {
                    body.emit(Instr::CallRuntime(RuntimeFn::OrderNormalize));
                }
                prev = Some(next);
            }
        }
    }
    Ok(())
}

fn combine_step(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    step: &TypedStep,
    prev: &mut AxisKind,
) -> Result<(), CompileError> {
    emit_step(ctx, body, step)?;
    body.emit(Instr::CallRuntime(RuntimeFn::StepIterator));
    let next = axis_kind(step.axis);
    if needs_order_normalize(*prev, next) {
        body.emit(Instr::CallRuntime(RuntimeFn::OrderNormalize));
    }
    *prev = next;
    Ok(())
}

/// Emit an unstarted iterator for one step, its predicates already
/// attached. As the prototype of a `StepIterator` composition the filters
/// re-apply per context node, which is what predicate scoping requires.
fn emit_step(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    step: &TypedStep,
) -> Result<(), CompileError> {
    let axis = axis_kind(step.axis);
    match &step.node_test {
        NodeTest::Name(name) => {
            let idx = ctx.program.intern(name);
            body.emit(Instr::PushStr(idx));
            body.emit(Instr::CallRuntime(RuntimeFn::NamedAxisIterator(axis)));
        }
        // `*` selects the principal node kind: attributes on the
        // attribute axis, elements everywhere else.
        NodeTest::Wildcard if axis == AxisKind::Attribute => {
            body.emit(Instr::CallRuntime(RuntimeFn::AxisIterator(axis)));
        }
        NodeTest::Wildcard => {
            body.emit(Instr::CallRuntime(RuntimeFn::TypedAxisIterator(
                axis,
                NodeKind::Element,
            )));
        }
        NodeTest::NodeType(NodeTypeTest::Node) => {
            body.emit(Instr::CallRuntime(RuntimeFn::AxisIterator(axis)));
        }
        NodeTest::NodeType(t) => {
            let kind = match t {
                NodeTypeTest::Text => NodeKind::Text,
                NodeTypeTest::Comment => NodeKind::Comment,
                _ => NodeKind::ProcessingInstruction,
            };
            body.emit(Instr::CallRuntime(RuntimeFn::TypedAxisIterator(axis, kind)));
        }
    }
    apply_predicates(ctx, body, &step.predicates)
}

/// Refine the iterator on top of the stack with a predicate list.
pub fn apply_predicates(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    predicates: &[TypedPredicate],
) -> Result<(), CompileError> {
    for predicate in predicates {
        match predicate {
            TypedPredicate::Position(index) => {
                translate(ctx, body, index)?;
                body.emit(Instr::CallRuntime(RuntimeFn::PositionFilter));
            }
            TypedPredicate::Boolean(test) => {
                let (method, captures) = compile_predicate_method(ctx, test)?;
                for (_, binding) in &captures {
                    body.emit(Instr::LoadLocal(binding.slot));
                }
                body.emit(Instr::PushMethod(method));
                body.emit(Instr::CallRuntime(RuntimeFn::FilterIterator(
                    captures.len() as u8,
                )));
            }
        }
    }
    Ok(())
}

/// Compile a predicate into its own boolean method. The method receives
/// `(node, position, last)` followed by one slot per captured local; the
/// returned bindings say which enclosing-frame slots to pass.
pub fn compile_predicate_method(
    ctx: &mut CodegenCtx<'_>,
    test: &TypedExpr,
) -> Result<(MethodId, Vec<(String, LocalBinding)>), CompileError> {
    let mut captures = Vec::new();
    for name in typed::local_refs(test) {
        let binding = ctx
            .lookup_local(&name)
            .ok_or_else(|| CompileError::Unresolved {
                what: "variable",
                name: name.clone(),
            })?;
        captures.push((name, binding));
    }

    let name = ctx.aux_method_name("predicate");
    let param_slots = 3 + captures.len() as u16;
    let method = ctx.program.declare_method(
        &name,
        MethodSig {
            param_slots,
            returns: true,
        },
    );

    let mut aux = MethodBody::new(param_slots);
    let saved = ctx.enter_frame(
        Slot(0),
        PositionSource::Slots {
            position: Slot(1),
            last: Slot(2),
        },
    );
    for (i, (name, binding)) in captures.iter().enumerate() {
        ctx.declare_local(
            name,
            LocalBinding {
                ty: binding.ty,
                slot: Slot(3 + i as u16),
            },
        );
    }
    let result = (|| -> Result<(), CompileError> {
        let flow = translate_desynth(ctx, &mut aux, test)?;
        synthesize_boolean(&mut aux, flow)?;
        aux.emit(Instr::Return);
        Ok(())
    })();
    ctx.leave_frame(saved);
    result?;
    ctx.program.define_method(method, aux)?;
    Ok((method, captures))
}

fn axis_kind(axis: Axis) -> AxisKind {
    match axis {
        Axis::Child => AxisKind::Child,
        Axis::Descendant => AxisKind::Descendant,
        Axis::DescendantOrSelf => AxisKind::DescendantOrSelf,
        Axis::Attribute => AxisKind::Attribute,
        Axis::Parent => AxisKind::Parent,
        Axis::Ancestor => AxisKind::Ancestor,
        Axis::AncestorOrSelf => AxisKind::AncestorOrSelf,
        Axis::SelfAxis => AxisKind::SelfAxis,
        Axis::FollowingSibling => AxisKind::FollowingSibling,
        Axis::PrecedingSibling => AxisKind::PrecedingSibling,
        Axis::Following => AxisKind::Following,
        Axis::Preceding => AxisKind::Preceding,
    }
}

/// Whether composing `next` onto results produced by `prev` can emit
/// duplicates or leave document order. The table is conservative: it
/// only skips normalization for compositions that are order-safe for
/// every document.
fn needs_order_normalize(prev: AxisKind, next: AxisKind) -> bool {
    use AxisKind::*;
    match (prev, next) {
        // Upward and reverse steps can reach one node from many origins
        // and yield their results climbing backwards.
        (Parent | Ancestor | AncestorOrSelf | Preceding | PrecedingSibling, _) => true,
        (_, Parent | Ancestor | AncestorOrSelf | Preceding | PrecedingSibling) => true,
        // Descendant sets of nodes that can nest overlap.
        (Descendant | DescendantOrSelf, Descendant | DescendantOrSelf | Following) => true,
        (Following | FollowingSibling, Following | FollowingSibling) => true,
        _ => false,
    }
}
