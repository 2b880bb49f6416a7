//! Match-pattern checking and test code generation.
//!
//! A pattern test starts from a candidate node and walks *upward*: the
//! dispatch machinery has already established the last step's kernel, so
//! what remains is that step's predicates, the chain of ancestor steps,
//! and the optional root anchor. The generated test falls through on a
//! match and jumps into the returned false list otherwise.

use crate::codegen::path::compile_predicate_method;
use crate::context::CodegenCtx;
use crate::error::CompileError;
use crate::typed::{self, CmpKind, TypeEnv, TypedExpr, TypedPredicate};
use crate::types::TypeError;
use xsltc_emit::{
    CmpOp, Cond, FlowList, Instr, MethodBody, NodeKind, NumKind, RuntimeFn, Slot,
};
use xsltc_xpath::{Kernel, NodeTest, NodeTypeTest, PathPattern, PatternAxis};

/// One checked path pattern with its resolved priority. Equality is
/// structural, so differently spelled but equivalent patterns compare
/// equal once checked.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedPathPattern {
    pub kernel: Kernel,
    pub is_absolute: bool,
    pub steps: Vec<TypedPatternStep>,
    pub priority: f64,
    /// Whether the pattern matches whenever its kernel does. Such an
    /// entry ends its test sequence: nothing below it is reachable.
    pub unconditional: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedPatternStep {
    pub axis: PatternAxis,
    pub node_test: NodeTest,
    pub predicates: Vec<TypedPredicate>,
    pub ancestor_gap: bool,
}

pub fn check_path_pattern(
    pattern: &PathPattern,
    env: &TypeEnv<'_>,
    explicit_priority: Option<f64>,
) -> Result<TypedPathPattern, TypeError> {
    let mut steps = Vec::with_capacity(pattern.steps.len());
    for step in &pattern.steps {
        let mut predicates = typed::check_predicates(&step.predicates, env)?;
        // Patterns have no driving iterator; positional predicates become
        // truth tests evaluated with sibling-derived context.
        for predicate in &mut predicates {
            if let TypedPredicate::Position(index) = predicate {
                *predicate = TypedPredicate::Boolean(Box::new(TypedExpr::Compare {
                    op: CmpOp::Eq,
                    kind: CmpKind::Int,
                    left: Box::new(TypedExpr::Position),
                    right: std::mem::replace(index, Box::new(TypedExpr::IntLit(0))),
                }));
            }
        }
        steps.push(TypedPatternStep {
            axis: step.axis,
            node_test: step.node_test.clone(),
            predicates,
            ancestor_gap: step.ancestor_gap,
        });
    }
    Ok(TypedPathPattern {
        kernel: pattern.kernel(),
        is_absolute: pattern.is_absolute,
        steps,
        priority: explicit_priority.unwrap_or_else(|| pattern.default_priority()),
        unconditional: pattern.is_kernel_only(),
    })
}

/// Emit the test for a pattern whose kernel the caller has already
/// checked. Fall-through means the node matches.
pub fn translate_pattern_test(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    pattern: &TypedPathPattern,
    node_slot: Slot,
) -> Result<FlowList, CompileError> {
    pattern_test(ctx, body, pattern, node_slot, false)
}

/// Emit a self-contained test including the kernel itself, for contexts
/// with no dispatch discrimination (key match methods).
pub fn translate_full_pattern_test(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    pattern: &TypedPathPattern,
    node_slot: Slot,
) -> Result<FlowList, CompileError> {
    pattern_test(ctx, body, pattern, node_slot, true)
}

fn pattern_test(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    pattern: &TypedPathPattern,
    node_slot: Slot,
    include_kernel: bool,
) -> Result<FlowList, CompileError> {
    let mut fail = FlowList::new();

    let Some((last, ancestors)) = pattern.steps.split_last() else {
        // The bare `/` pattern.
        if include_kernel {
            body.emit(Instr::LoadLocal(node_slot));
            body.emit(Instr::CallRuntime(RuntimeFn::GetNodeType));
            body.emit(Instr::PushInt(NodeKind::Root.code()));
            fail.add(body.branch(Cond::Cmp(CmpOp::Ne, NumKind::Int)));
        }
        return Ok(fail);
    };

    if include_kernel {
        fail.merge(emit_step_test(ctx, body, last, node_slot)?);
    } else {
        fail.merge(emit_step_predicates(ctx, body, last, node_slot)?);
    }

    if ancestors.is_empty() && !pattern.is_absolute {
        return Ok(fail);
    }

    // Walk the ancestor chain. `current` climbs from the candidate node.
    let current = body.alloc_local();
    body.emit(Instr::LoadLocal(node_slot));
    body.emit(Instr::StoreLocal(current));

    // The gap separator before step i+1 governs how step i is reached.
    let mut gap_above = last.ancestor_gap;
    for step in ancestors.iter().rev() {
        if gap_above {
            // `a//b`: climb until some ancestor satisfies the step, fail
            // when the chain runs out.
            let climb = body.here();
            body.emit(Instr::LoadLocal(current));
            body.emit(Instr::CallRuntime(RuntimeFn::GetParent));
            body.emit(Instr::StoreLocal(current));
            body.emit(Instr::LoadLocal(current));
            fail.add(body.branch(Cond::IsNull));
            let retry = emit_step_test(ctx, body, step, current)?;
            retry.backpatch(body, climb)?;
        } else {
            body.emit(Instr::LoadLocal(current));
            body.emit(Instr::CallRuntime(RuntimeFn::GetParent));
            body.emit(Instr::StoreLocal(current));
            body.emit(Instr::LoadLocal(current));
            fail.add(body.branch(Cond::IsNull));
            fail.merge(emit_step_test(ctx, body, step, current)?);
        }
        gap_above = step.ancestor_gap;
    }

    if pattern.is_absolute {
        // The first step's node must sit directly under the root.
        body.emit(Instr::LoadLocal(current));
        body.emit(Instr::CallRuntime(RuntimeFn::GetParent));
        body.emit(Instr::StoreLocal(current));
        body.emit(Instr::LoadLocal(current));
        fail.add(body.branch(Cond::IsNull));
        body.emit(Instr::LoadLocal(current));
        body.emit(Instr::CallRuntime(RuntimeFn::GetNodeType));
        body.emit(Instr::PushInt(NodeKind::Root.code()));
        fail.add(body.branch(Cond::Cmp(CmpOp::Ne, NumKind::Int)));
    }

    body.release_local(current)?;
    Ok(fail)
}

/// The structural test of one pattern step against the node in `slot`,
/// predicates included.
fn emit_step_test(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    step: &TypedPatternStep,
    slot: Slot,
) -> Result<FlowList, CompileError> {
    let mut fail = FlowList::new();
    let require_kind = |body: &mut MethodBody, fail: &mut FlowList, kind: NodeKind| {
        body.emit(Instr::LoadLocal(slot));
        body.emit(Instr::CallRuntime(RuntimeFn::GetNodeType));
        body.emit(Instr::PushInt(kind.code()));
        fail.add(body.branch(Cond::Cmp(CmpOp::Ne, NumKind::Int)));
    };
    let require_name = |ctx: &mut CodegenCtx<'_>,
                        body: &mut MethodBody,
                        fail: &mut FlowList,
                        name: &str| {
        body.emit(Instr::LoadLocal(slot));
        body.emit(Instr::CallRuntime(RuntimeFn::GetNodeName));
        let idx = ctx.program.intern(name);
        body.emit(Instr::PushStr(idx));
        body.emit(Instr::CallRuntime(RuntimeFn::StringEq));
        fail.add(body.branch(Cond::False));
    };

    match (step.axis, &step.node_test) {
        (PatternAxis::Attribute, NodeTest::Name(name)) => {
            require_kind(body, &mut fail, NodeKind::Attribute);
            require_name(ctx, body, &mut fail, name);
        }
        (PatternAxis::Attribute, _) => require_kind(body, &mut fail, NodeKind::Attribute),
        (PatternAxis::Child, NodeTest::Name(name)) => {
            require_kind(body, &mut fail, NodeKind::Element);
            require_name(ctx, body, &mut fail, name);
        }
        (PatternAxis::Child, NodeTest::Wildcard) => {
            require_kind(body, &mut fail, NodeKind::Element)
        }
        (PatternAxis::Child, NodeTest::NodeType(t)) => match t {
            NodeTypeTest::Text => require_kind(body, &mut fail, NodeKind::Text),
            NodeTypeTest::Comment => require_kind(body, &mut fail, NodeKind::Comment),
            NodeTypeTest::ProcessingInstruction => {
                require_kind(body, &mut fail, NodeKind::ProcessingInstruction)
            }
            // `node()` matches anything reachable on the child axis.
            NodeTypeTest::Node => {
                body.emit(Instr::LoadLocal(slot));
                body.emit(Instr::CallRuntime(RuntimeFn::GetNodeType));
                body.emit(Instr::PushInt(NodeKind::Attribute.code()));
                fail.add(body.branch(Cond::Cmp(CmpOp::Eq, NumKind::Int)));
                body.emit(Instr::LoadLocal(slot));
                body.emit(Instr::CallRuntime(RuntimeFn::GetNodeType));
                body.emit(Instr::PushInt(NodeKind::Root.code()));
                fail.add(body.branch(Cond::Cmp(CmpOp::Eq, NumKind::Int)));
            }
        },
    }

    fail.merge(emit_step_predicates(ctx, body, step, slot)?);
    Ok(fail)
}

/// Evaluate a step's predicates against the node in `slot` through
/// compiled predicate methods.
fn emit_step_predicates(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    step: &TypedPatternStep,
    slot: Slot,
) -> Result<FlowList, CompileError> {
    let mut fail = FlowList::new();
    for predicate in &step.predicates {
        let TypedPredicate::Boolean(test) = predicate else {
            // check_path_pattern rewrites every positional predicate.
            continue;
        };
        let (method, captures) = compile_predicate_method(ctx, test)?;
        debug_assert!(captures.is_empty(), "patterns cannot see template locals");
        body.emit(Instr::LoadLocal(slot));
        body.emit(Instr::PushMethod(method));
        body.emit(Instr::CallRuntime(RuntimeFn::CallPredicate));
        fail.add(body.branch(Cond::False));
    }
    Ok(fail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::Fixture;
    use crate::symbols::SymbolTable;
    use crate::typed::GlobalVars;
    use std::collections::HashMap;
    use xsltc_xpath::parse_pattern;

    fn checked(text: &str) -> TypedPathPattern {
        let symbols = SymbolTable::core();
        let globals = HashMap::new();
        let env = TypeEnv {
            symbols: &symbols,
            vars: &GlobalVars { globals: &globals },
        };
        let pattern = parse_pattern(text).unwrap();
        check_path_pattern(&pattern.alternatives[0], &env, None).unwrap()
    }

    fn calls(body: &MethodBody) -> Vec<RuntimeFn> {
        body.instrs()
            .iter()
            .filter_map(|i| match i {
                Instr::CallRuntime(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    /// Emit a pattern test and close it off so placeholder accounting can
    /// be asserted.
    fn emit_test(fixture: &mut Fixture, pattern: &TypedPathPattern, full: bool) -> MethodBody {
        let (mut ctx, mut body) = fixture.template_frame();
        let fail = if full {
            translate_full_pattern_test(&mut ctx, &mut body, pattern, Slot(0)).unwrap()
        } else {
            translate_pattern_test(&mut ctx, &mut body, pattern, Slot(0)).unwrap()
        };
        body.emit(Instr::Return);
        let miss = body.here();
        fail.backpatch(&mut body, miss).unwrap();
        body.emit(Instr::Return);
        assert_eq!(body.dangling(), 0);
        body
    }

    #[test]
    fn test_parent_chain_walks_upward() {
        let mut fixture = Fixture::new();
        let pattern = checked("doc/section/para");
        let body = emit_test(&mut fixture, &pattern, false);
        let parent_calls = calls(&body)
            .iter()
            .filter(|c| **c == RuntimeFn::GetParent)
            .count();
        assert_eq!(parent_calls, 2);
        assert!(calls(&body).contains(&RuntimeFn::StringEq));
    }

    #[test]
    fn test_kernel_only_pattern_emits_no_test() {
        let mut fixture = Fixture::new();
        let pattern = checked("para");
        assert!(pattern.unconditional);
        let (mut ctx, mut body) = fixture.template_frame();
        let fail = translate_pattern_test(&mut ctx, &mut body, &pattern, Slot(0)).unwrap();
        assert!(fail.is_empty());
        assert!(body.instrs().is_empty());
    }

    #[test]
    fn test_ancestor_gap_retries_upward() {
        let mut fixture = Fixture::new();
        let pattern = checked("doc//para");
        let body = emit_test(&mut fixture, &pattern, false);
        // A retrying climb jumps backwards; find a branch whose target
        // precedes it.
        let has_backward = body.instrs().iter().enumerate().any(|(i, instr)| match instr {
            Instr::Branch { target: Some(l), .. } | Instr::Jump { target: Some(l) } => l.0 < i,
            _ => false,
        });
        assert!(has_backward);
    }

    #[test]
    fn test_absolute_pattern_checks_root_anchor() {
        let mut fixture = Fixture::new();
        let pattern = checked("/doc");
        assert!(!pattern.unconditional);
        let body = emit_test(&mut fixture, &pattern, false);
        assert!(body
            .instrs()
            .iter()
            .any(|i| matches!(i, Instr::PushInt(code) if *code == NodeKind::Root.code())));
    }

    #[test]
    fn test_full_test_includes_kernel() {
        let mut fixture = Fixture::new();
        let pattern = checked("para");
        let body = emit_test(&mut fixture, &pattern, true);
        let calls = calls(&body);
        assert!(calls.contains(&RuntimeFn::GetNodeType));
        assert!(calls.contains(&RuntimeFn::StringEq));
    }

    #[test]
    fn test_pattern_predicate_uses_call_predicate() {
        let mut fixture = Fixture::new();
        let pattern = checked("item[@kind = 'a']");
        let body = emit_test(&mut fixture, &pattern, false);
        assert!(calls(&body).contains(&RuntimeFn::CallPredicate));
        assert!(fixture.program.find_method("predicate$0").is_some());
    }

    #[test]
    fn test_positional_pattern_predicate_rewritten() {
        let pattern = checked("para[1]");
        assert!(matches!(
            pattern.steps[0].predicates[0],
            TypedPredicate::Boolean(_)
        ));
    }
}
