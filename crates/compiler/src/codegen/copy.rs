//! `xsl:copy` and `xsl:copy-of`.

use crate::codegen::literals::expand_attribute_sets;
use crate::codegen::{check, translate_body};
use crate::context::CodegenCtx;
use crate::error::CompileError;
use crate::instr::Body;
use crate::typed;
use crate::types::Type;
use xsltc_emit::{CmpOp, Cond, Instr, MethodBody, NodeKind, NumKind, RuntimeFn};
use xsltc_xpath::Expr;

/// `xsl:copy`: a shallow copy of the context node with the body as its
/// content. What that means depends on the node kind, decided at
/// runtime: elements get a fresh start/end tag pair around the body, the
/// root contributes nothing but its content, and every other kind copies
/// itself and has no content.
pub fn translate_copy(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    use_attribute_sets: &[String],
    content: &Body,
) -> Result<(), CompileError> {
    let kind_slot = body.alloc_local();
    body.emit(Instr::LoadLocal(ctx.current_node));
    body.emit(Instr::CallRuntime(RuntimeFn::GetNodeType));
    body.emit(Instr::StoreLocal(kind_slot));

    body.emit(Instr::LoadLocal(kind_slot));
    body.emit(Instr::PushInt(NodeKind::Element.code()));
    let not_element = body.branch(Cond::Cmp(CmpOp::Ne, NumKind::Int));

    let name_slot = body.alloc_local();
    body.emit(Instr::LoadLocal(ctx.current_node));
    body.emit(Instr::CallRuntime(RuntimeFn::GetNodeName));
    body.emit(Instr::StoreLocal(name_slot));
    body.emit(Instr::LoadLocal(name_slot));
    body.emit(Instr::CallRuntime(RuntimeFn::StartElement));
    expand_attribute_sets(ctx, body, use_attribute_sets, &mut Vec::new())?;
    translate_body(ctx, body, content)?;
    body.emit(Instr::LoadLocal(name_slot));
    body.emit(Instr::CallRuntime(RuntimeFn::EndElement));
    body.release_local(name_slot)?;
    let element_done = body.jump();

    let root_check = body.here();
    body.backpatch(not_element, root_check)?;
    body.emit(Instr::LoadLocal(kind_slot));
    body.emit(Instr::PushInt(NodeKind::Root.code()));
    let not_root = body.branch(Cond::Cmp(CmpOp::Ne, NumKind::Int));
    translate_body(ctx, body, content)?;
    let root_done = body.jump();

    let plain_copy = body.here();
    body.backpatch(not_root, plain_copy)?;
    body.emit(Instr::LoadLocal(ctx.current_node));
    body.emit(Instr::CallRuntime(RuntimeFn::ShallowCopy));

    let end = body.here();
    body.backpatch(element_done, end)?;
    body.backpatch(root_done, end)?;
    body.release_local(kind_slot)?;
    Ok(())
}

/// `xsl:copy-of`: deep copy by value type. Node-sets copy every node
/// with its subtree, fragments replay, everything else degrades to its
/// string value as character data.
pub fn translate_copy_of(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    select: &Expr,
) -> Result<(), CompileError> {
    let value = check(ctx, select)?;
    match value.ty() {
        Type::NodeSet => {
            super::expr::translate(ctx, body, &value)?;
            let iter_slot = body.alloc_local();
            body.emit(Instr::StoreLocal(iter_slot));
            let node_slot = body.alloc_local();
            let loop_start = body.here();
            body.emit(Instr::LoadLocal(iter_slot));
            body.emit(Instr::CallRuntime(RuntimeFn::IteratorNext));
            body.emit(Instr::StoreLocal(node_slot));
            body.emit(Instr::LoadLocal(node_slot));
            let exit = body.branch(Cond::IsNull);
            body.emit(Instr::LoadLocal(node_slot));
            body.emit(Instr::CallRuntime(RuntimeFn::DeepCopy));
            let back = body.jump();
            body.backpatch(back, loop_start)?;
            let end = body.here();
            body.backpatch(exit, end)?;
            body.release_local(node_slot)?;
            body.release_local(iter_slot)?;
        }
        Type::Node => {
            super::expr::translate(ctx, body, &value)?;
            body.emit(Instr::CallRuntime(RuntimeFn::DeepCopy));
        }
        Type::ResultTree => {
            super::expr::translate(ctx, body, &value)?;
            body.emit(Instr::CallRuntime(RuntimeFn::CopyResultTree));
        }
        _ => {
            let value = typed::coerce(value, Type::String)?;
            super::expr::translate(ctx, body, &value)?;
            body.emit(Instr::CallRuntime(RuntimeFn::Characters));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::Fixture;
    use xsltc_xpath::parse_expression;

    fn calls(body: &MethodBody) -> Vec<RuntimeFn> {
        body.instrs()
            .iter()
            .filter_map(|i| match i {
                Instr::CallRuntime(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_copy_of_node_set_deep_copies_each_node() {
        let mut fixture = Fixture::new();
        let (mut ctx, mut body) = fixture.template_frame();
        translate_copy_of(&mut ctx, &mut body, &parse_expression("item").unwrap()).unwrap();
        body.emit(Instr::Return);
        assert_eq!(body.dangling(), 0);
        assert!(calls(&body).contains(&RuntimeFn::DeepCopy));
    }

    #[test]
    fn test_copy_of_scalar_degrades_to_text() {
        let mut fixture = Fixture::new();
        let (mut ctx, mut body) = fixture.template_frame();
        translate_copy_of(&mut ctx, &mut body, &parse_expression("1 + 2").unwrap()).unwrap();
        let calls = calls(&body);
        assert!(calls.contains(&RuntimeFn::Characters));
        assert!(!calls.contains(&RuntimeFn::DeepCopy));
    }

    #[test]
    fn test_copy_dispatches_on_node_kind() {
        let mut fixture = Fixture::new();
        let (mut ctx, mut body) = fixture.template_frame();
        translate_copy(&mut ctx, &mut body, &[], &Body::default()).unwrap();
        body.emit(Instr::Return);
        assert_eq!(body.dangling(), 0);
        let calls = calls(&body);
        assert!(calls.contains(&RuntimeFn::StartElement));
        assert!(calls.contains(&RuntimeFn::ShallowCopy));
    }
}
