//! Code generation: translating checked stylesheet constructs into
//! abstract stack instructions.
//!
//! Each instruction family lives in its own module; this module holds the
//! dispatcher and the helpers they share.

pub mod control_flow;
pub mod copy;
pub mod dispatch;
pub mod expr;
pub mod for_each;
pub mod literals;
pub mod path;
pub mod variables;

use crate::context::CodegenCtx;
use crate::error::CompileError;
use crate::instr::{Body, XsltInstruction};
use crate::typed::{self, TypeEnv, TypedExpr};
use crate::types::Type;
use xsltc_emit::{Instr, MethodBody, RuntimeFn};
use xsltc_xpath::Expr;

/// Type-check an expression against the current frame's variables.
pub fn check(ctx: &CodegenCtx<'_>, expr: &Expr) -> Result<TypedExpr, CompileError> {
    let env = TypeEnv {
        symbols: ctx.symbols,
        vars: ctx,
    };
    Ok(typed::check_expr(expr, &env)?)
}

/// Type-check and convert to a required type in one go.
pub fn check_coerced(
    ctx: &CodegenCtx<'_>,
    expr: &Expr,
    to: Type,
) -> Result<TypedExpr, CompileError> {
    let checked = check(ctx, expr)?;
    Ok(typed::coerce(checked, to)?)
}

/// Translate an instruction sequence in a fresh local scope.
pub fn translate_body(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    content: &Body,
) -> Result<(), CompileError> {
    ctx.push_scope();
    for instruction in &content.0 {
        translate_instruction(ctx, body, instruction)?;
    }
    ctx.pop_scope(body)?;
    Ok(())
}

pub fn translate_instruction(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    instruction: &XsltInstruction,
) -> Result<(), CompileError> {
    match instruction {
        XsltInstruction::Text(text) => literals::translate_text(ctx, body, text),
        XsltInstruction::ValueOf { select } => literals::translate_value_of(ctx, body, select),
        XsltInstruction::If { test, body: content } => {
            control_flow::translate_if(ctx, body, test, content)
        }
        XsltInstruction::Choose { whens, otherwise } => {
            control_flow::translate_choose(ctx, body, whens, otherwise.as_ref())
        }
        XsltInstruction::ForEach { select, sorts, body: content } => {
            for_each::translate_for_each(ctx, body, select, sorts, content)
        }
        XsltInstruction::ApplyTemplates { select, mode, sorts, params } => {
            dispatch::translate_apply_templates(ctx, body, select.as_ref(), mode, sorts, params)
        }
        XsltInstruction::ApplyImports => dispatch::translate_apply_imports(ctx, body),
        XsltInstruction::CallTemplate { name, params, .. } => {
            dispatch::translate_call_template(ctx, body, name, params)
        }
        XsltInstruction::LocalVariable { name, value } => {
            variables::translate_local_variable(ctx, body, name, value)
        }
        XsltInstruction::LocalParam { name, default } => {
            variables::translate_local_param(ctx, body, name, default.as_ref())
        }
        XsltInstruction::LiteralElement { name, attrs, use_attribute_sets, body: content } => {
            literals::translate_literal_element(ctx, body, name, attrs, use_attribute_sets, content)
        }
        XsltInstruction::Element { name, use_attribute_sets, body: content } => {
            literals::translate_element(ctx, body, name, use_attribute_sets, content)
        }
        XsltInstruction::Attribute { name, body: content } => {
            literals::translate_attribute(ctx, body, name, content)
        }
        XsltInstruction::Comment { body: content } => {
            literals::translate_comment(ctx, body, content)
        }
        XsltInstruction::ProcessingInstruction { name, body: content } => {
            literals::translate_pi(ctx, body, name, content)
        }
        XsltInstruction::Message { body: content, terminate } => {
            literals::translate_message(ctx, body, content, *terminate)
        }
        XsltInstruction::Copy { use_attribute_sets, body: content } => {
            copy::translate_copy(ctx, body, use_attribute_sets, content)
        }
        XsltInstruction::CopyOf { select } => copy::translate_copy_of(ctx, body, select),
        XsltInstruction::Unsupported { name, fallbacks, location } => {
            if fallbacks.is_empty() {
                ctx.reporter.warning(
                    format!("unsupported element '{name}' compiled to a runtime failure"),
                    Some(*location),
                );
                let message = format!("'{name}' is not supported");
                let idx = ctx.program.intern(&message);
                body.emit(Instr::PushStr(idx));
                body.emit(Instr::CallRuntime(RuntimeFn::RaiseError));
                Ok(())
            } else {
                for fallback in fallbacks {
                    translate_body(ctx, body, fallback)?;
                }
                Ok(())
            }
        }
    }
}

/// Push the string a body produces. A body whose content is a
/// compile-time constant becomes a plain string push; anything else runs
/// under a capturing output handler.
pub fn emit_body_as_string(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    content: &Body,
) -> Result<(), CompileError> {
    if let Some(text) = content.constant_text() {
        let idx = ctx.program.intern(&text);
        body.emit(Instr::PushStr(idx));
        return Ok(());
    }
    body.emit(Instr::CallRuntime(RuntimeFn::StartCapture));
    translate_body(ctx, body, content)?;
    body.emit(Instr::CallRuntime(RuntimeFn::EndCapture));
    Ok(())
}
