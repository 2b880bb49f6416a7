//! Variable and parameter binding: local slots for `xsl:variable`,
//! runtime parameter frames for `xsl:param` and `xsl:with-param`.
//!
//! Parameters cross method boundaries by name, so their values travel
//! boxed as references; locals stay unboxed in the type their value
//! expression produced.

use crate::codegen::translate_body;
use crate::context::{CodegenCtx, LocalBinding};
use crate::error::CompileError;
use crate::instr::{VarValue, WithParam};
use crate::types::{Coercion, Type};
use xsltc_emit::{Cond, Instr, MethodBody, RuntimeFn};

/// Emit the value of a variable, parameter default or `with-param`,
/// leaving it on the stack; returns its static type. A content body
/// evaluates under a capturing handler into a result-tree fragment.
pub fn emit_value(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    value: &VarValue,
) -> Result<Type, CompileError> {
    match value {
        VarValue::Select(expr) => {
            let typed = super::check(ctx, expr)?;
            let ty = typed.ty();
            super::expr::translate(ctx, body, &typed)?;
            Ok(ty)
        }
        VarValue::Tree(content) => {
            body.emit(Instr::CallRuntime(RuntimeFn::StartCapture));
            translate_body(ctx, body, content)?;
            body.emit(Instr::CallRuntime(RuntimeFn::EndCapture));
            Ok(Type::ResultTree)
        }
    }
}

/// Box the value on top of the stack for reference-typed transport.
pub fn emit_box(body: &mut MethodBody, ty: Type) {
    for call in Coercion::Box(ty).runtime_calls() {
        body.emit(Instr::CallRuntime(*call));
    }
}

pub fn translate_local_variable(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    name: &str,
    value: &VarValue,
) -> Result<(), CompileError> {
    let ty = emit_value(ctx, body, value)?;
    let slot = body.alloc_local();
    body.emit(Instr::StoreLocal(slot));
    ctx.declare_local(name, LocalBinding { ty, slot });
    Ok(())
}

/// An `xsl:param`: take the caller-supplied value if one arrived in the
/// parameter frame, fall back to the default otherwise. The binding is
/// reference-typed either way; uses unbox on demand.
pub fn translate_local_param(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    name: &str,
    default: Option<&VarValue>,
) -> Result<(), CompileError> {
    let slot = body.alloc_local();
    let idx = ctx.program.intern(name);
    body.emit(Instr::PushStr(idx));
    body.emit(Instr::CallRuntime(RuntimeFn::LookupParam));
    body.emit(Instr::StoreLocal(slot));
    body.emit(Instr::LoadLocal(slot));
    let supplied = body.branch(Cond::NotNull);

    match default {
        Some(value) => {
            let ty = emit_value(ctx, body, value)?;
            emit_box(body, ty);
        }
        None => {
            let empty = ctx.program.intern("");
            body.emit(Instr::PushStr(empty));
            body.emit(Instr::CallRuntime(RuntimeFn::BoxString));
        }
    }
    body.emit(Instr::StoreLocal(slot));

    let end = body.here();
    body.backpatch(supplied, end)?;
    ctx.declare_local(
        name,
        LocalBinding {
            ty: Type::Reference,
            slot,
        },
    );
    Ok(())
}

/// Open a parameter frame and fill it from `xsl:with-param` bindings.
/// The caller must balance it with [`close_param_frame`] after the call.
pub fn open_param_frame(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    params: &[WithParam],
) -> Result<(), CompileError> {
    body.emit(Instr::CallRuntime(RuntimeFn::PushParamFrame));
    for param in params {
        let idx = ctx.program.intern(&param.name);
        body.emit(Instr::PushStr(idx));
        let ty = emit_value(ctx, body, &param.value)?;
        emit_box(body, ty);
        body.emit(Instr::CallRuntime(RuntimeFn::SetParam));
    }
    Ok(())
}

pub fn close_param_frame(body: &mut MethodBody) {
    body.emit(Instr::CallRuntime(RuntimeFn::PopParamFrame));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::check;
    use crate::context::testing::Fixture;
    use xsltc_xpath::parse_expression;

    #[test]
    fn test_local_variable_declares_typed_binding() {
        let mut fixture = Fixture::new();
        let (mut ctx, mut body) = fixture.template_frame();
        translate_local_variable(
            &mut ctx,
            &mut body,
            "n",
            &VarValue::Select(parse_expression("1 + 2").unwrap()),
        )
        .unwrap();
        let binding = ctx.lookup_local("n").unwrap();
        assert_eq!(binding.ty, Type::Int);

        // A later expression sees the unboxed integer directly.
        let typed = check(&ctx, &parse_expression("$n + 1").unwrap()).unwrap();
        assert_eq!(typed.ty(), Type::Int);
    }

    #[test]
    fn test_param_binding_is_reference_typed() {
        let mut fixture = Fixture::new();
        let (mut ctx, mut body) = fixture.template_frame();
        translate_local_param(
            &mut ctx,
            &mut body,
            "p",
            Some(&VarValue::Select(parse_expression("'x'").unwrap())),
        )
        .unwrap();
        assert_eq!(ctx.lookup_local("p").unwrap().ty, Type::Reference);
        body.emit(Instr::Return);
        assert_eq!(body.dangling(), 0);
        // The default path boxes its string before storing.
        assert!(body
            .instrs()
            .iter()
            .any(|i| matches!(i, Instr::CallRuntime(RuntimeFn::BoxString))));
    }

    #[test]
    fn test_with_param_values_travel_boxed() {
        let mut fixture = Fixture::new();
        let (mut ctx, mut body) = fixture.template_frame();
        let params = vec![WithParam {
            name: "count".to_string(),
            value: VarValue::Select(parse_expression("3").unwrap()),
        }];
        open_param_frame(&mut ctx, &mut body, &params).unwrap();
        close_param_frame(&mut body);
        let calls: Vec<_> = body
            .instrs()
            .iter()
            .filter_map(|i| match i {
                Instr::CallRuntime(c) => Some(*c),
                _ => None,
            })
            .collect();
        assert_eq!(
            calls,
            vec![
                RuntimeFn::PushParamFrame,
                RuntimeFn::BoxInt,
                RuntimeFn::SetParam,
                RuntimeFn::PopParamFrame
            ]
        );
    }
}
