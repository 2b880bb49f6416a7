//! `xsl:if` and `xsl:choose`: conditional bodies driven directly by flow
//! lists, with no boolean ever materialized.

use crate::codegen::expr::translate_guard;
use crate::codegen::translate_body;
use crate::context::CodegenCtx;
use crate::error::CompileError;
use crate::instr::{Body, When};
use crate::types::Type;
use xsltc_emit::{FlowList, MethodBody};
use xsltc_xpath::Expr;

pub fn translate_if(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    test: &Expr,
    content: &Body,
) -> Result<(), CompileError> {
    let test = super::check_coerced(ctx, test, Type::Boolean)?;
    let mut skip = FlowList::new();
    translate_guard(ctx, body, &test, &mut skip)?;
    translate_body(ctx, body, content)?;
    let end = body.here();
    skip.backpatch(body, end)?;
    Ok(())
}

pub fn translate_choose(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    whens: &[When],
    otherwise: Option<&Body>,
) -> Result<(), CompileError> {
    let mut exits = FlowList::new();
    for when in whens {
        let test = super::check_coerced(ctx, &when.test, Type::Boolean)?;
        let mut next_branch = FlowList::new();
        translate_guard(ctx, body, &test, &mut next_branch)?;
        translate_body(ctx, body, &when.body)?;
        exits.add(body.jump());
        let next = body.here();
        next_branch.backpatch(body, next)?;
    }
    if let Some(content) = otherwise {
        translate_body(ctx, body, content)?;
    }
    let end = body.here();
    exits.backpatch(body, end)?;
    Ok(())
}
