//! Output-producing instructions: text, value-of, element and attribute
//! constructors, comments, processing instructions and messages.

use crate::codegen::expr::{translate, translate_avt};
use crate::codegen::{check_coerced, emit_body_as_string, translate_body};
use crate::context::CodegenCtx;
use crate::error::CompileError;
use crate::instr::Body;
use crate::types::Type;
use xsltc_emit::{Instr, MethodBody, RuntimeFn};
use xsltc_xpath::{Avt, Expr};

pub fn translate_text(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    text: &str,
) -> Result<(), CompileError> {
    let idx = ctx.program.intern(text);
    body.emit(Instr::PushStr(idx));
    body.emit(Instr::CallRuntime(RuntimeFn::Characters));
    Ok(())
}

pub fn translate_value_of(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    select: &Expr,
) -> Result<(), CompileError> {
    let value = check_coerced(ctx, select, Type::String)?;
    translate(ctx, body, &value)?;
    body.emit(Instr::CallRuntime(RuntimeFn::Characters));
    Ok(())
}

pub fn translate_literal_element(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    name: &str,
    attrs: &[(String, Avt)],
    use_attribute_sets: &[String],
    content: &Body,
) -> Result<(), CompileError> {
    let idx = ctx.program.intern(name);
    body.emit(Instr::PushStr(idx));
    body.emit(Instr::CallRuntime(RuntimeFn::StartElement));
    expand_attribute_sets(ctx, body, use_attribute_sets, &mut Vec::new())?;
    for (attr_name, value) in attrs {
        let name_idx = ctx.program.intern(attr_name);
        body.emit(Instr::PushStr(name_idx));
        translate_avt(ctx, body, value)?;
        body.emit(Instr::CallRuntime(RuntimeFn::AddAttribute));
    }
    translate_body(ctx, body, content)?;
    body.emit(Instr::PushStr(idx));
    body.emit(Instr::CallRuntime(RuntimeFn::EndElement));
    Ok(())
}

/// `xsl:element`: the name is computed once and reused for both tags.
pub fn translate_element(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    name: &Avt,
    use_attribute_sets: &[String],
    content: &Body,
) -> Result<(), CompileError> {
    let name_slot = body.alloc_local();
    translate_avt(ctx, body, name)?;
    body.emit(Instr::StoreLocal(name_slot));
    body.emit(Instr::LoadLocal(name_slot));
    body.emit(Instr::CallRuntime(RuntimeFn::StartElement));
    expand_attribute_sets(ctx, body, use_attribute_sets, &mut Vec::new())?;
    translate_body(ctx, body, content)?;
    body.emit(Instr::LoadLocal(name_slot));
    body.emit(Instr::CallRuntime(RuntimeFn::EndElement));
    body.release_local(name_slot)?;
    Ok(())
}

pub fn translate_attribute(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    name: &Avt,
    content: &Body,
) -> Result<(), CompileError> {
    translate_avt(ctx, body, name)?;
    emit_body_as_string(ctx, body, content)?;
    body.emit(Instr::CallRuntime(RuntimeFn::AddAttribute));
    Ok(())
}

pub fn translate_comment(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    content: &Body,
) -> Result<(), CompileError> {
    emit_body_as_string(ctx, body, content)?;
    body.emit(Instr::CallRuntime(RuntimeFn::Comment));
    Ok(())
}

pub fn translate_pi(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    name: &Avt,
    content: &Body,
) -> Result<(), CompileError> {
    translate_avt(ctx, body, name)?;
    emit_body_as_string(ctx, body, content)?;
    body.emit(Instr::CallRuntime(RuntimeFn::ProcessingInstruction));
    Ok(())
}

pub fn translate_message(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    content: &Body,
    terminate: bool,
) -> Result<(), CompileError> {
    emit_body_as_string(ctx, body, content)?;
    body.emit(Instr::CallRuntime(RuntimeFn::Message(terminate)));
    Ok(())
}

/// Emit the attributes of the named attribute sets, depth-first through
/// their own `use-attribute-sets`, before any directly written
/// attribute.
pub fn expand_attribute_sets(
    ctx: &mut CodegenCtx<'_>,
    body: &mut MethodBody,
    names: &[String],
    visiting: &mut Vec<String>,
) -> Result<(), CompileError> {
    for name in names {
        if visiting.iter().any(|n| n == name) {
            return Err(CompileError::CircularAttributeSet(name.clone()));
        }
        let sets = ctx.attribute_sets;
        let set = sets.get(name).ok_or_else(|| CompileError::Unresolved {
            what: "attribute-set",
            name: name.clone(),
        })?;
        visiting.push(name.clone());
        expand_attribute_sets(ctx, body, &set.use_sets, visiting)?;
        for (attr_name, value) in &set.attributes {
            translate_avt(ctx, body, attr_name)?;
            emit_body_as_string(ctx, body, value)?;
            body.emit(Instr::CallRuntime(RuntimeFn::AddAttribute));
        }
        visiting.pop();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::Fixture;
    use crate::instr::XsltInstruction;
    use xsltc_xpath::parse_avt;

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
    fn test_constant_comment_skips_capturing() {
        let mut fixture = Fixture::new();
        let (mut ctx, mut body) = fixture.template_frame();
        let content = Body(vec![XsltInstruction::Text("generated".to_string())]);
        translate_comment(&mut ctx, &mut body, &content).unwrap();
        assert_eq!(calls(&body), vec![RuntimeFn::Comment]);
    }

    #[test]
    fn test_dynamic_comment_captures_output() {
        let mut fixture = Fixture::new();
        let (mut ctx, mut body) = fixture.template_frame();
        let content = Body(vec![XsltInstruction::ValueOf {
            select: xsltc_xpath::parse_expression(".").unwrap(),
        }]);
        translate_comment(&mut ctx, &mut body, &content).unwrap();
        let calls = calls(&body);
        assert_eq!(calls.first(), Some(&RuntimeFn::StartCapture));
        assert!(calls.contains(&RuntimeFn::EndCapture));
        assert_eq!(calls.last(), Some(&RuntimeFn::Comment));
    }

    #[test]
    fn test_literal_element_brackets_its_content() {
        let mut fixture = Fixture::new();
        let (mut ctx, mut body) = fixture.template_frame();
        let content = Body(vec![XsltInstruction::Text("x".to_string())]);
        let attrs = vec![("class".to_string(), parse_avt("c-{1}").unwrap())];
        translate_literal_element(&mut ctx, &mut body, "div", &attrs, &[], &content).unwrap();
        let calls = calls(&body);
        assert_eq!(calls.first(), Some(&RuntimeFn::StartElement));
        assert_eq!(calls.last(), Some(&RuntimeFn::EndElement));
        assert!(calls.contains(&RuntimeFn::AddAttribute));
    }

    #[test]
    fn test_unknown_attribute_set_is_an_error() {
        let mut fixture = Fixture::new();
        let (mut ctx, mut body) = fixture.template_frame();
        let err = translate_literal_element(
            &mut ctx,
            &mut body,
            "div",
            &[],
            &["missing".to_string()],
            &Body::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CompileError::Unresolved { what: "attribute-set", .. }
        ));
    }
}
