//! `xsl:for-each`: an explicit iterator-driven loop over the selected
//! node-set, with `xsl:sort` keys compiled into extractor methods.

use crate::codegen::{check_coerced, translate_body};
use crate::context::{CodegenCtx, PositionSource};
use crate::error::CompileError;
use crate::instr::{Body, SortDataType, SortKey, SortOrder};
use crate::types::Type;
use xsltc_emit::{Cond, Instr, MethodBody, MethodId, MethodSig, RuntimeFn, Slot};
use xsltc_xpath::Expr;

pub fn translate_for_each(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    select: &Expr,
    sorts: &[SortKey],
    content: &Body,
) -> Result<(), CompileError> {
    let select = check_coerced(ctx, select, Type::NodeSet)?;
    super::expr::translate(ctx, body, &select)?;
    apply_sorts(ctx, body, sorts)?;

    let iter_slot = body.alloc_local();
    body.emit(Instr::StoreLocal(iter_slot));
    let node_slot = body.alloc_local();

    let loop_start = body.here();
    body.emit(Instr::LoadLocal(iter_slot));
    body.emit(Instr::CallRuntime(RuntimeFn::IteratorNext));
    body.emit(Instr::StoreLocal(node_slot));
    body.emit(Instr::LoadLocal(node_slot));
    let exit = body.branch(Cond::IsNull);

    // Inside the loop the selected node is the context node and the loop
    // iterator supplies position() and last().
    let saved_node = ctx.current_node;
    let saved_position = ctx.position;
    ctx.current_node = node_slot;
    ctx.position = PositionSource::Iterator(iter_slot);
    let result = translate_body(ctx, body, content);
    ctx.current_node = saved_node;
    ctx.position = saved_position;
    result?;

    let back = body.jump();
    body.backpatch(back, loop_start)?;
    let end = body.here();
    body.backpatch(exit, end)?;

    body.release_local(node_slot)?;
    body.release_local(iter_slot)?;
    Ok(())
}

/// Wrap the iterator on top of the stack in a sorting iterator. Each key
/// becomes an extractor method the runtime calls per node; keys are
/// passed most significant first.
pub fn apply_sorts(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    sorts: &[SortKey],
) -> Result<(), CompileError> {
    if sorts.is_empty() {
        return Ok(());
    }
    for sort in sorts {
        let method = compile_sort_key_method(ctx, &sort.select)?;
        body.emit(Instr::PushMethod(method));
        let order = ctx.program.intern(match sort.order {
            SortOrder::Ascending => "ascending",
            SortOrder::Descending => "descending",
        });
        body.emit(Instr::PushStr(order));
        let data_type = ctx.program.intern(match sort.data_type {
            SortDataType::Text => "text",
            SortDataType::Number => "number",
        });
        body.emit(Instr::PushStr(data_type));
    }
    body.emit(Instr::CallRuntime(RuntimeFn::SortIterator(sorts.len() as u8)));
    Ok(())
}

/// Compile a sort key expression into a `(node, position, last) -> str`
/// extractor. The select is checked inside the extractor's own frame, so
/// template locals are out of scope for sort keys.
fn compile_sort_key_method(
    ctx: &mut CodegenCtx<'_>,
    select: &Expr,
) -> Result<MethodId, CompileError> {
    let name = ctx.aux_method_name("sortkey");
    let method = ctx.program.declare_method(
        &name,
        MethodSig {
            param_slots: 3,
            returns: true,
        },
    );

    let mut aux = MethodBody::new(3);
    let saved = ctx.enter_frame(
        Slot(0),
        PositionSource::Slots {
            position: Slot(1),
            last: Slot(2),
        },
    );
    let result = (|| -> Result<(), CompileError> {
        let key = check_coerced(ctx, select, Type::String)?;
        super::expr::translate(ctx, &mut aux, &key)?;
        aux.emit(Instr::Return);
        Ok(())
    })();
    ctx.leave_frame(saved);
    result?;
    ctx.program.define_method(method, aux)?;
    Ok(method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::Fixture;
    use crate::instr::XsltInstruction;
    use xsltc_xpath::parse_expression;

    #[test]
    fn test_loop_shape_and_balanced_placeholders() {
        let mut fixture = Fixture::new();
        let (mut ctx, mut body) = fixture.template_frame();
        let content = Body(vec![XsltInstruction::ValueOf {
            select: parse_expression(".").unwrap(),
        }]);
        translate_for_each(
            &mut ctx,
            &mut body,
            &parse_expression("item").unwrap(),
            &[],
            &content,
        )
        .unwrap();
        body.emit(Instr::Return);
        assert_eq!(body.dangling(), 0);
        assert!(body
            .instrs()
            .iter()
            .any(|i| matches!(i, Instr::CallRuntime(RuntimeFn::IteratorNext))));
    }

    #[test]
    fn test_sort_keys_compile_to_extractor_methods() {
        let mut fixture = Fixture::new();
        let (mut ctx, mut body) = fixture.template_frame();
        let sorts = vec![
            SortKey {
                select: parse_expression("@name").unwrap(),
                order: SortOrder::Ascending,
                data_type: SortDataType::Text,
            },
            SortKey {
                select: parse_expression("@age").unwrap(),
                order: SortOrder::Descending,
                data_type: SortDataType::Number,
            },
        ];
        translate_for_each(
            &mut ctx,
            &mut body,
            &parse_expression("person").unwrap(),
            &sorts,
            &Body::default(),
        )
        .unwrap();
        body.emit(Instr::Return);
        assert!(body
            .instrs()
            .iter()
            .any(|i| matches!(i, Instr::CallRuntime(RuntimeFn::SortIterator(2)))));
        assert!(fixture.program.find_method("sortkey$0").is_some());
        assert!(fixture.program.find_method("sortkey$1").is_some());
    }

    #[test]
    fn test_position_inside_loop_reads_loop_iterator() {
        let mut fixture = Fixture::new();
        let (mut ctx, mut body) = fixture.template_frame();
        let content = Body(vec![XsltInstruction::ValueOf {
            select: parse_expression("position()").unwrap(),
        }]);
        translate_for_each(
            &mut ctx,
            &mut body,
            &parse_expression("item").unwrap(),
            &[],
            &content,
        )
        .unwrap();
        body.emit(Instr::Return);
        // The loop iterator landed in slot 2; position() must read it,
        // not the template's own iterator in slot 1.
        assert!(body.instrs().windows(2).any(|w| matches!(
            w,
            [Instr::LoadLocal(Slot(2)), Instr::CallRuntime(RuntimeFn::IteratorPosition)]
        )));
    }
}
