//! Template invocation: `xsl:apply-templates`, `xsl:apply-imports` and
//! `xsl:call-template`. All three route through generated methods; mode
//! dispatch methods are built in [`crate::mode`], this module emits the
//! call sites.

use crate::codegen::for_each::apply_sorts;
use crate::codegen::variables::{close_param_frame, open_param_frame};
use crate::context::{CodegenCtx, PositionSource};
use crate::error::CompileError;
use crate::instr::{SortKey, WithParam};
use crate::types::Type;
use xsltc_emit::{AxisKind, Instr, MethodBody, RuntimeFn};
use xsltc_xpath::Expr;

pub fn translate_apply_templates(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    select: Option<&Expr>,
    mode: &Option<String>,
    sorts: &[SortKey],
    params: &[WithParam],
) -> Result<(), CompileError> {
    let dispatch = *ctx
        .modes
        .get(mode)
        .ok_or_else(|| CompileError::Unresolved {
            what: "mode",
            name: mode.clone().unwrap_or_else(|| "#default".to_string()),
        })?;

    if !params.is_empty() {
        open_param_frame(ctx, body, params)?;
    }

    match select {
        Some(expr) => {
            let selected = super::check_coerced(ctx, expr, Type::NodeSet)?;
            super::expr::translate(ctx, body, &selected)?;
        }
        None => {
            // The default node list: all children of the context node.
            body.emit(Instr::CallRuntime(RuntimeFn::AxisIterator(AxisKind::Child)));
            body.emit(Instr::LoadLocal(ctx.current_node));
            body.emit(Instr::CallRuntime(RuntimeFn::SetStartNode));
        }
    }
    apply_sorts(ctx, body, sorts)?;
    body.emit(Instr::CallMethod(dispatch));

    if !params.is_empty() {
        close_param_frame(body);
    }
    Ok(())
}

/// `xsl:apply-imports`: redispatch the context node against the part of
/// the current mode with lower import precedence than the calling
/// template.
pub fn translate_apply_imports(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
) -> Result<(), CompileError> {
    let key = (ctx.mode.clone(), ctx.precedence);
    let dispatch = *ctx
        .import_modes
        .get(&key)
        .ok_or_else(|| CompileError::Unresolved {
            what: "import dispatch for mode",
            name: key.0.unwrap_or_else(|| "#default".to_string()),
        })?;
    body.emit(Instr::LoadLocal(ctx.current_node));
    body.emit(Instr::CallRuntime(RuntimeFn::SingletonIterator));
    body.emit(Instr::CallMethod(dispatch));
    Ok(())
}

pub fn translate_call_template(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    name: &str,
    params: &[WithParam],
) -> Result<(), CompileError> {
    let target = *ctx
        .named_templates
        .get(name)
        .ok_or_else(|| CompileError::Unresolved {
            what: "template",
            name: name.to_string(),
        })?;

    if !params.is_empty() {
        open_param_frame(ctx, body, params)?;
    }
    body.emit(Instr::LoadLocal(ctx.current_node));
    match ctx.position {
        PositionSource::Iterator(slot) => body.emit(Instr::LoadLocal(slot)),
        // No live iterator in this frame; the callee sees a singleton
        // context list.
        PositionSource::Slots { .. } => {
            body.emit(Instr::LoadLocal(ctx.current_node));
            body.emit(Instr::CallRuntime(RuntimeFn::SingletonIterator));
        }
    }
    body.emit(Instr::CallMethod(target));
    if !params.is_empty() {
        close_param_frame(body);
    }
    Ok(())
}
