//! Per-mode template dispatch.
//!
//! Each mode compiles into one dispatch method taking a node iterator.
//! The method drains the iterator and, per node, discriminates on node
//! kind (and element/attribute name) to reach a short test sequence: the
//! mode's candidate templates in decreasing precedence and priority.
//! First matching pattern wins; exhausting a sequence falls back to the
//! built-in rule for that node kind.

use std::collections::BTreeMap;

use crate::context::{CodegenCtx, PositionSource};
use crate::error::CompileError;
use crate::pattern::{self, TypedPathPattern};
use xsltc_emit::{
    AxisKind, CmpOp, Cond, Instr, Label, MethodBody, MethodId, NodeKind, NumKind, RuntimeFn, Slot,
};
use xsltc_xpath::Kernel;

/// One dispatch candidate: a template method paired with one checked
/// pattern alternative. Templates with union patterns contribute one
/// candidate per alternative, all sharing the method.
#[derive(Debug, Clone)]
pub struct ModeTemplate {
    pub method: MethodId,
    pub pattern: TypedPathPattern,
    /// Source text of the pattern alternative, for conflict reporting.
    pub text: String,
    pub precedence: usize,
    /// Document order across the whole stylesheet, for tie-breaking.
    pub position: usize,
}

/// Order candidates the way dispatch tries them: higher import
/// precedence first, then higher priority, later declaration winning
/// remaining ties.
fn sort_candidates<'a>(templates: &'a [ModeTemplate]) -> Vec<&'a ModeTemplate> {
    let mut sorted: Vec<&ModeTemplate> = templates.iter().collect();
    sorted.sort_by(|a, b| {
        b.precedence
            .cmp(&a.precedence)
            .then(b.pattern.priority.total_cmp(&a.pattern.priority))
            .then(b.position.cmp(&a.position))
    });
    sorted
}

/// Two templates at the same precedence and priority matching the same
/// pattern have no defined winner. Patterns are compared by checked
/// shape, so equivalent spellings still collide.
pub fn detect_conflicts(templates: &[ModeTemplate]) -> Result<(), CompileError> {
    let sorted = sort_candidates(templates);
    for (i, a) in sorted.iter().enumerate() {
        for b in &sorted[i + 1..] {
            // Candidates are grouped by (precedence, priority).
            if a.precedence != b.precedence || a.pattern.priority != b.pattern.priority {
                break;
            }
            if a.pattern == b.pattern && a.method != b.method {
                return Err(CompileError::Redefinition {
                    what: "template matching",
                    name: a.text.clone(),
                });
            }
        }
    }
    Ok(())
}

/// The fallback behavior when no template in a sequence matches.
#[derive(Clone, Copy)]
enum Builtin {
    /// Re-dispatch the node's children (elements and the root).
    Children,
    /// Emit the node's string value (text nodes and attributes).
    Value,
    /// Produce nothing (comments and processing instructions).
    Nothing,
}

/// Candidates bucketed by the node kinds and names they can match.
/// `*` patterns join every named element bucket; `node()` additionally
/// reaches text, comments and processing instructions, but never
/// attributes or the root.
#[derive(Default)]
struct Groups<'a> {
    named_elements: BTreeMap<&'a str, Vec<&'a ModeTemplate>>,
    generic_elements: Vec<&'a ModeTemplate>,
    named_attributes: BTreeMap<&'a str, Vec<&'a ModeTemplate>>,
    generic_attributes: Vec<&'a ModeTemplate>,
    text: Vec<&'a ModeTemplate>,
    comment: Vec<&'a ModeTemplate>,
    pi: Vec<&'a ModeTemplate>,
    root: Vec<&'a ModeTemplate>,
}

impl<'a> Groups<'a> {
    fn build(sorted: &[&'a ModeTemplate]) -> Groups<'a> {
        let mut groups = Groups::default();
        for candidate in sorted {
            match &candidate.pattern.kernel {
                Kernel::Element(name) => {
                    groups.named_elements.entry(name).or_default();
                }
                Kernel::Attribute(name) => {
                    groups.named_attributes.entry(name).or_default();
                }
                _ => {}
            }
        }
        for candidate in sorted {
            match &candidate.pattern.kernel {
                Kernel::Element(name) => {
                    if let Some(seq) = groups.named_elements.get_mut(name.as_str()) {
                        seq.push(candidate);
                    }
                }
                Kernel::AnyElement => {
                    for seq in groups.named_elements.values_mut() {
                        seq.push(candidate);
                    }
                    groups.generic_elements.push(candidate);
                }
                Kernel::AnyNode => {
                    for seq in groups.named_elements.values_mut() {
                        seq.push(candidate);
                    }
                    groups.generic_elements.push(candidate);
                    groups.text.push(candidate);
                    groups.comment.push(candidate);
                    groups.pi.push(candidate);
                }
                Kernel::Attribute(name) => {
                    if let Some(seq) = groups.named_attributes.get_mut(name.as_str()) {
                        seq.push(candidate);
                    }
                }
                Kernel::AnyAttribute => {
                    for seq in groups.named_attributes.values_mut() {
                        seq.push(candidate);
                    }
                    groups.generic_attributes.push(candidate);
                }
                Kernel::Text => groups.text.push(candidate),
                Kernel::Comment => groups.comment.push(candidate),
                Kernel::ProcessingInstruction => groups.pi.push(candidate),
                Kernel::Root => groups.root.push(candidate),
            }
        }
        groups
    }
}

/// Define `method` as the dispatch loop for the given candidates.
///
/// `recurse` is the method built-in rules re-dispatch children through;
/// for a mode's main dispatch that is the method itself, for an import
/// window it is the mode's full dispatch (built-in rules are not scoped
/// by apply-imports).
pub fn compile_mode_dispatch(
    ctx: &mut CodegenCtx<'_>,
    method: MethodId,
    recurse: MethodId,
    templates: &[ModeTemplate],
) -> Result<(), CompileError> {
    let sorted = sort_candidates(templates);
    let groups = Groups::build(&sorted);

    let mut body = MethodBody::new(1);
    let iter = Slot(0);
    let node = body.alloc_local();
    let kind = body.alloc_local();
    let name = body.alloc_local();

    let loop_start = body.here();
    body.emit(Instr::LoadLocal(iter));
    body.emit(Instr::CallRuntime(RuntimeFn::IteratorNext));
    body.emit(Instr::StoreLocal(node));
    body.emit(Instr::LoadLocal(node));
    let exit = body.branch(Cond::IsNull);
    body.emit(Instr::LoadLocal(node));
    body.emit(Instr::CallRuntime(RuntimeFn::GetNodeType));
    body.emit(Instr::StoreLocal(kind));

    let saved = ctx.enter_frame(node, PositionSource::Iterator(iter));
    let result = (|| -> Result<(), CompileError> {
        // Elements.
        body.emit(Instr::LoadLocal(kind));
        body.emit(Instr::PushInt(NodeKind::Element.code()));
        let miss = body.branch(Cond::Cmp(CmpOp::Ne, NumKind::Int));
        if !groups.named_elements.is_empty() {
            body.emit(Instr::LoadLocal(node));
            body.emit(Instr::CallRuntime(RuntimeFn::GetNodeName));
            body.emit(Instr::StoreLocal(name));
            for (elem_name, seq) in &groups.named_elements {
                body.emit(Instr::LoadLocal(name));
                let idx = ctx.program.intern(elem_name);
                body.emit(Instr::PushStr(idx));
                body.emit(Instr::CallRuntime(RuntimeFn::StringEq));
                let other = body.branch(Cond::False);
                emit_test_seq(
                    ctx, &mut body, seq, node, iter, loop_start, Builtin::Children, recurse,
                )?;
                let next = body.here();
                body.backpatch(other, next)?;
            }
        }
        emit_test_seq(
            ctx,
            &mut body,
            &groups.generic_elements,
            node,
            iter,
            loop_start,
            Builtin::Children,
            recurse,
        )?;
        let next = body.here();
        body.backpatch(miss, next)?;

        // Text.
        body.emit(Instr::LoadLocal(kind));
        body.emit(Instr::PushInt(NodeKind::Text.code()));
        let miss = body.branch(Cond::Cmp(CmpOp::Ne, NumKind::Int));
        emit_test_seq(
            ctx, &mut body, &groups.text, node, iter, loop_start, Builtin::Value, recurse,
        )?;
        let next = body.here();
        body.backpatch(miss, next)?;

        // Comments.
        body.emit(Instr::LoadLocal(kind));
        body.emit(Instr::PushInt(NodeKind::Comment.code()));
        let miss = body.branch(Cond::Cmp(CmpOp::Ne, NumKind::Int));
        emit_test_seq(
            ctx, &mut body, &groups.comment, node, iter, loop_start, Builtin::Nothing, recurse,
        )?;
        let next = body.here();
        body.backpatch(miss, next)?;

        // Processing instructions.
        body.emit(Instr::LoadLocal(kind));
        body.emit(Instr::PushInt(NodeKind::ProcessingInstruction.code()));
        let miss = body.branch(Cond::Cmp(CmpOp::Ne, NumKind::Int));
        emit_test_seq(
            ctx, &mut body, &groups.pi, node, iter, loop_start, Builtin::Nothing, recurse,
        )?;
        let next = body.here();
        body.backpatch(miss, next)?;

        // The root, seen only through the initial singleton iterator.
        body.emit(Instr::LoadLocal(kind));
        body.emit(Instr::PushInt(NodeKind::Root.code()));
        let miss = body.branch(Cond::Cmp(CmpOp::Ne, NumKind::Int));
        emit_test_seq(
            ctx, &mut body, &groups.root, node, iter, loop_start, Builtin::Children, recurse,
        )?;
        let next = body.here();
        body.backpatch(miss, next)?;

        // Attributes.
        body.emit(Instr::LoadLocal(kind));
        body.emit(Instr::PushInt(NodeKind::Attribute.code()));
        let miss = body.branch(Cond::Cmp(CmpOp::Ne, NumKind::Int));
        if !groups.named_attributes.is_empty() {
            body.emit(Instr::LoadLocal(node));
            body.emit(Instr::CallRuntime(RuntimeFn::GetNodeName));
            body.emit(Instr::StoreLocal(name));
            for (attr_name, seq) in &groups.named_attributes {
                body.emit(Instr::LoadLocal(name));
                let idx = ctx.program.intern(attr_name);
                body.emit(Instr::PushStr(idx));
                body.emit(Instr::CallRuntime(RuntimeFn::StringEq));
                let other = body.branch(Cond::False);
                emit_test_seq(
                    ctx, &mut body, seq, node, iter, loop_start, Builtin::Value, recurse,
                )?;
                let next = body.here();
                body.backpatch(other, next)?;
            }
        }
        emit_test_seq(
            ctx,
            &mut body,
            &groups.generic_attributes,
            node,
            iter,
            loop_start,
            Builtin::Value,
            recurse,
        )?;
        let next = body.here();
        body.backpatch(miss, next)?;

        // Any other kind contributes nothing.
        let skip = body.jump();
        body.backpatch(skip, loop_start)?;
        Ok(())
    })();
    ctx.leave_frame(saved);
    result?;

    let end = body.here();
    body.backpatch(exit, end)?;
    body.release_local(name)?;
    body.release_local(kind)?;
    body.release_local(node)?;
    body.emit(Instr::Return);
    ctx.program.define_method(method, body)?;
    Ok(())
}

/// Emit one test sequence: try each candidate in order, invoking the
/// first whose pattern matches, then continue the dispatch loop. An
/// unconditional candidate ends the sequence; nothing after it could
/// ever be reached.
#[allow(clippy::too_many_arguments)]
fn emit_test_seq(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    seq: &[&ModeTemplate],
    node: Slot,
    iter: Slot,
    loop_start: Label,
    builtin: Builtin,
    recurse: MethodId,
) -> Result<(), CompileError> {
    for candidate in seq {
        if candidate.pattern.unconditional {
            emit_template_call(body, candidate.method, node, iter, loop_start)?;
            return Ok(());
        }
        let fail = pattern::translate_pattern_test(ctx, body, &candidate.pattern, node)?;
        emit_template_call(body, candidate.method, node, iter, loop_start)?;
        let next = body.here();
        fail.backpatch(body, next)?;
    }

    match builtin {
        Builtin::Children => {
            body.emit(Instr::CallRuntime(RuntimeFn::AxisIterator(AxisKind::Child)));
            body.emit(Instr::LoadLocal(node));
            body.emit(Instr::CallRuntime(RuntimeFn::SetStartNode));
            body.emit(Instr::CallMethod(recurse));
        }
        Builtin::Value => {
            body.emit(Instr::LoadLocal(node));
            body.emit(Instr::CallRuntime(RuntimeFn::StringValueOf));
            body.emit(Instr::CallRuntime(RuntimeFn::Characters));
        }
        Builtin::Nothing => {}
    }
    let done = body.jump();
    body.backpatch(done, loop_start)?;
    Ok(())
}

fn emit_template_call(
    body: &mut MethodBody,
    method: MethodId,
    node: Slot,
    iter: Slot,
    loop_start: Label,
) -> Result<(), CompileError> {
    body.emit(Instr::LoadLocal(node));
    body.emit(Instr::LoadLocal(iter));
    body.emit(Instr::CallMethod(method));
    let done = body.jump();
    body.backpatch(done, loop_start)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::Fixture;
    use crate::symbols::SymbolTable;
    use crate::typed::{GlobalVars, TypeEnv};
    use std::collections::HashMap;
    use xsltc_emit::MethodSig;
    use xsltc_xpath::parse_pattern;

    fn candidate(
        fixture: &mut Fixture,
        text: &str,
        precedence: usize,
        position: usize,
    ) -> ModeTemplate {
        let symbols = SymbolTable::core();
        let globals = HashMap::new();
        let env = TypeEnv {
            symbols: &symbols,
            vars: &GlobalVars { globals: &globals },
        };
        let parsed = parse_pattern(text).unwrap();
        let pattern =
            crate::pattern::check_path_pattern(&parsed.alternatives[0], &env, None).unwrap();
        let method = fixture.program.declare_method(
            &format!("template${position}"),
            MethodSig { param_slots: 2, returns: false },
        );
        let mut body = MethodBody::new(2);
        body.emit(Instr::Return);
        fixture.program.define_method(method, body).unwrap();
        ModeTemplate {
            method,
            pattern,
            text: text.to_string(),
            precedence,
            position,
        }
    }

    fn dispatch_instrs(fixture: &Fixture, id: MethodId) -> Vec<Instr> {
        fixture.program.method(id).body().unwrap().instrs().to_vec()
    }

    #[test]
    fn test_named_template_beats_wildcard() {
        let mut fixture = Fixture::new();
        let named = candidate(&mut fixture, "para", 0, 0);
        let wild = candidate(&mut fixture, "*", 0, 1);
        let dispatch = fixture
            .program
            .declare_method("mode$default", MethodSig { param_slots: 1, returns: false });
        let templates = vec![named.clone(), wild.clone()];
        {
            let (mut ctx, _) = fixture.template_frame();
            compile_mode_dispatch(&mut ctx, dispatch, dispatch, &templates).unwrap();
        }
        let instrs = dispatch_instrs(&fixture, dispatch);
        let named_at = instrs
            .iter()
            .position(|i| matches!(i, Instr::CallMethod(m) if *m == named.method));
        let wild_at = instrs
            .iter()
            .position(|i| matches!(i, Instr::CallMethod(m) if *m == wild.method));
        assert!(named_at.unwrap() < wild_at.unwrap());
        assert!(instrs
            .iter()
            .any(|i| matches!(i, Instr::CallRuntime(RuntimeFn::StringEq))));
    }

    #[test]
    fn test_unconditional_candidate_cuts_the_sequence() {
        let mut fixture = Fixture::new();
        // Same kernel; the second has higher priority (0.5 via explicit
        // attribute would, but here the conditional one wins priority) so
        // the kernel-only entry is tried after it and ends the chain.
        let conditional = candidate(&mut fixture, "doc/para", 0, 0);
        let plain = candidate(&mut fixture, "para", 0, 1);
        let lower = ModeTemplate {
            pattern: TypedPathPattern {
                priority: -10.0,
                ..conditional.pattern.clone()
            },
            ..candidate(&mut fixture, "doc/para", 0, 2)
        };
        let dispatch = fixture
            .program
            .declare_method("mode$default", MethodSig { param_slots: 1, returns: false });
        let templates = vec![conditional.clone(), plain.clone(), lower.clone()];
        {
            let (mut ctx, _) = fixture.template_frame();
            compile_mode_dispatch(&mut ctx, dispatch, dispatch, &templates).unwrap();
        }
        let instrs = dispatch_instrs(&fixture, dispatch);
        assert!(instrs
            .iter()
            .any(|i| matches!(i, Instr::CallMethod(m) if *m == conditional.method)));
        assert!(instrs
            .iter()
            .any(|i| matches!(i, Instr::CallMethod(m) if *m == plain.method)));
        // Shadowed by the unconditional entry above it.
        assert!(!instrs
            .iter()
            .any(|i| matches!(i, Instr::CallMethod(m) if *m == lower.method)));
    }

    #[test]
    fn test_higher_precedence_tried_first() {
        let mut fixture = Fixture::new();
        let imported = candidate(&mut fixture, "para", 0, 0);
        let importing = candidate(&mut fixture, "para[1]", 1, 1);
        let dispatch = fixture
            .program
            .declare_method("mode$default", MethodSig { param_slots: 1, returns: false });
        let templates = vec![imported.clone(), importing.clone()];
        {
            let (mut ctx, _) = fixture.template_frame();
            compile_mode_dispatch(&mut ctx, dispatch, dispatch, &templates).unwrap();
        }
        let instrs = dispatch_instrs(&fixture, dispatch);
        let high = instrs
            .iter()
            .position(|i| matches!(i, Instr::CallMethod(m) if *m == importing.method));
        let low = instrs
            .iter()
            .position(|i| matches!(i, Instr::CallMethod(m) if *m == imported.method));
        assert!(high.unwrap() < low.unwrap());
    }

    #[test]
    fn test_builtin_text_rule_emits_string_value() {
        let mut fixture = Fixture::new();
        let dispatch = fixture
            .program
            .declare_method("mode$default", MethodSig { param_slots: 1, returns: false });
        {
            let (mut ctx, _) = fixture.template_frame();
            compile_mode_dispatch(&mut ctx, dispatch, dispatch, &[]).unwrap();
        }
        let instrs = dispatch_instrs(&fixture, dispatch);
        assert!(instrs
            .iter()
            .any(|i| matches!(i, Instr::CallRuntime(RuntimeFn::StringValueOf))));
        // Element built-in recurses into this dispatch.
        assert!(instrs
            .iter()
            .any(|i| matches!(i, Instr::CallMethod(m) if *m == dispatch)));
    }

    #[test]
    fn test_equal_candidates_conflict() {
        let mut fixture = Fixture::new();
        let a = candidate(&mut fixture, "para", 0, 0);
        let b = candidate(&mut fixture, "para", 0, 1);
        let err = detect_conflicts(&[a, b]).unwrap_err();
        assert!(matches!(
            err,
            CompileError::Redefinition { what: "template matching", .. }
        ));
    }

    #[test]
    fn test_equivalent_spellings_conflict() {
        let mut fixture = Fixture::new();
        let a = candidate(&mut fixture, "para", 0, 0);
        let b = candidate(&mut fixture, "child::para", 0, 1);
        let err = detect_conflicts(&[a, b]).unwrap_err();
        assert!(matches!(
            err,
            CompileError::Redefinition { what: "template matching", .. }
        ));
    }

    #[test]
    fn test_distinct_patterns_do_not_conflict() {
        let mut fixture = Fixture::new();
        let a = candidate(&mut fixture, "para", 0, 0);
        let b = candidate(&mut fixture, "item", 0, 1);
        detect_conflicts(&[a, b]).unwrap();
    }
}
