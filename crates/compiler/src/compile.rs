//! The compilation driver: stylesheet text in, loadable program out.
//!
//! Compilation is staged so that every method id exists before any body
//! is generated: globals are ordered and bound, then template, dispatch,
//! key and entry methods are declared, then bodies are filled in. A
//! top-level declaration that fails to compile is reported and replaced
//! by a runtime-failure stub; only problems that poison the whole
//! program (unreadable XML, circular globals) abort compilation.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::codegen::{self, variables};
use crate::context::{CodegenCtx, GlobalBinding, PositionSource};
use crate::error::{CompileError, Diagnostic, ErrorReporter, Severity};
use crate::instr::{Body, VarValue, WithParam, XsltInstruction};
use crate::mode::{self, ModeTemplate};
use crate::pattern::{self, TypedPathPattern};
use crate::stylesheet::{
    self, GlobalDecl, NoLoader, Stylesheet, StylesheetLoader, Template,
};
use crate::symbols::SymbolTable;
use crate::typed::{self, GlobalVars, TypeEnv};
use crate::types::Type;
use xsltc_emit::{
    Cond, Instr, KeyIndex, MethodBody, MethodId, MethodSig, Program, RuntimeFn, Slot,
};

/// A compiled stylesheet: the program plus everything the compiler had
/// to say about it.
pub struct CompiledStylesheet {
    pub program: Program,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompiledStylesheet {
    /// Whether the program can be loaded. Errors degrade individual
    /// constructs to runtime failures but leave the rest usable.
    pub fn is_usable(&self) -> bool {
        self.diagnostics.iter().all(|d| d.severity < Severity::Fatal)
    }
}

pub fn compile(source: &str) -> Result<CompiledStylesheet, CompileError> {
    compile_with_loader(source, &NoLoader)
}

pub fn compile_with_loader(
    source: &str,
    loader: &dyn StylesheetLoader,
) -> Result<CompiledStylesheet, CompileError> {
    let mut reporter = ErrorReporter::new();
    let sheet = stylesheet::load_stylesheet(source, loader, &mut reporter)?;
    let symbols = SymbolTable::core();
    let mut program = Program::new();

    // Globals: shadowing, then dependency order, then slots and types.
    let ordered = stylesheet::order_globals(stylesheet::effective_globals(&sheet.globals)?)?;
    let mut globals: HashMap<String, GlobalBinding> = HashMap::new();
    let mut global_types: HashMap<String, Type> = HashMap::new();
    let mut stubbed_globals: HashSet<String> = HashSet::new();
    for decl in &ordered {
        let ty = if decl.is_param {
            Type::Reference
        } else {
            match global_value_type(decl, &symbols, &global_types) {
                Ok(ty) => ty,
                Err(err) => {
                    reporter.error(
                        format!("global variable '{}': {err}", decl.name),
                        Some(decl.location),
                    );
                    stubbed_globals.insert(decl.name.clone());
                    Type::String
                }
            }
        };
        let index = program.alloc_global();
        globals.insert(decl.name.clone(), GlobalBinding { ty, index });
        global_types.insert(decl.name.clone(), ty);
    }

    // Declare every method before generating any body.
    let template_sig = MethodSig {
        param_slots: 2,
        returns: false,
    };
    let dispatch_sig = MethodSig {
        param_slots: 1,
        returns: false,
    };

    let mut named_templates: HashMap<String, MethodId> = HashMap::new();
    let mut named_precedence: HashMap<String, usize> = HashMap::new();
    let mut template_methods: Vec<MethodId> = Vec::with_capacity(sheet.templates.len());
    for template in &sheet.templates {
        let method_name = match &template.name {
            Some(name) => format!("template${name}"),
            None => format!("template${}", template.position),
        };
        let method = program.declare_method(&method_name, template_sig);
        template_methods.push(method);
        if let Some(name) = &template.name {
            match named_precedence.get(name) {
                Some(p) if *p == template.precedence => {
                    reporter.error(
                        format!("duplicate template name '{name}'"),
                        Some(template.location),
                    );
                }
                Some(p) if *p > template.precedence => {}
                _ => {
                    named_precedence.insert(name.clone(), template.precedence);
                    named_templates.insert(name.clone(), method);
                }
            }
        }
    }

    let mut mode_names: BTreeSet<Option<String>> = BTreeSet::new();
    mode_names.insert(None);
    let mut imports_used: BTreeSet<(Option<String>, usize)> = BTreeSet::new();
    for template in &sheet.templates {
        if template.pattern.is_some() {
            mode_names.insert(template.mode.clone());
        }
        let mut uses_imports = false;
        scan_body(&template.body, &mut mode_names, &mut uses_imports);
        for (_, default) in &template.params {
            if let Some(VarValue::Tree(body)) = default {
                scan_body(body, &mut mode_names, &mut uses_imports);
            }
        }
        if uses_imports {
            imports_used.insert((template.mode.clone(), template.precedence));
        }
    }
    for decl in &ordered {
        if let Some(VarValue::Tree(body)) = &decl.value {
            let mut unused = false;
            scan_body(body, &mut mode_names, &mut unused);
        }
    }

    let mut modes: HashMap<Option<String>, MethodId> = HashMap::new();
    for mode_name in &mode_names {
        let method_name = match mode_name {
            Some(name) => format!("mode${name}"),
            None => "mode$default".to_string(),
        };
        modes.insert(
            mode_name.clone(),
            program.declare_method(&method_name, dispatch_sig),
        );
    }

    let mut import_modes: HashMap<(Option<String>, usize), MethodId> = HashMap::new();
    for key in &imports_used {
        let base = key.0.as_deref().unwrap_or("default");
        let method_name = format!("mode${base}$imports{}", key.1);
        import_modes.insert(key.clone(), program.declare_method(&method_name, dispatch_sig));
    }

    let init_method = program.declare_method(
        "init$globals",
        MethodSig {
            param_slots: 1,
            returns: false,
        },
    );
    let entry_method = program.declare_method(
        "main",
        MethodSig {
            param_slots: 1,
            returns: false,
        },
    );

    // Check match patterns into dispatch candidates.
    let mut candidates: HashMap<Option<String>, Vec<ModeTemplate>> = HashMap::new();
    for mode_name in &mode_names {
        candidates.insert(mode_name.clone(), Vec::new());
    }
    for (i, template) in sheet.templates.iter().enumerate() {
        let Some(parsed) = &template.pattern else {
            continue;
        };
        for alternative in &parsed.alternatives {
            let env = TypeEnv {
                symbols: &symbols,
                vars: &GlobalVars {
                    globals: &global_types,
                },
            };
            match pattern::check_path_pattern(alternative, &env, template.priority) {
                Ok(checked) => {
                    candidates
                        .entry(template.mode.clone())
                        .or_default()
                        .push(ModeTemplate {
                            method: template_methods[i],
                            pattern: checked,
                            text: parsed.to_string(),
                            precedence: template.precedence,
                            position: template.position,
                        });
                }
                Err(err) => reporter.error(
                    format!("match pattern '{parsed}': {err}"),
                    Some(template.location),
                ),
            }
        }
    }

    // Key declarations become a match method and a value-extractor
    // method pair.
    for key in &sheet.keys {
        match compile_key(
            key,
            &mut program,
            &symbols,
            &mut reporter,
            &globals,
            &named_templates,
            &modes,
            &import_modes,
            &sheet,
            &global_types,
        ) {
            Ok(index) => program.add_key(index),
            Err(err) => reporter.error(format!("key '{}': {err}", key.name), Some(key.location)),
        }
    }

    // Template bodies, each behind its own error boundary.
    for (i, template) in sheet.templates.iter().enumerate() {
        let result = compile_template(
            template,
            template_methods[i],
            &mut program,
            &symbols,
            &mut reporter,
            &globals,
            &named_templates,
            &modes,
            &import_modes,
            &sheet,
        );
        if let Err(err) = result {
            reporter.error(format!("{err}"), Some(template.location));
        }
    }

    // Dispatch methods, full and import-restricted.
    for mode_name in &mode_names {
        let seq = &candidates[mode_name];
        if let Err(err) = mode::detect_conflicts(seq) {
            reporter.error(format!("{err}"), None);
        }
        let method = modes[mode_name];
        let mut ctx = CodegenCtx::new(
            &mut program,
            &symbols,
            &mut reporter,
            &globals,
            &named_templates,
            &modes,
            &import_modes,
            &sheet.attribute_sets,
            Slot(0),
            PositionSource::Iterator(Slot(0)),
        );
        mode::compile_mode_dispatch(&mut ctx, method, method, seq)?;
    }
    for (key, method) in &import_modes {
        let full = modes[&key.0];
        let window: Vec<ModeTemplate> = candidates[&key.0]
            .iter()
            .filter(|c| c.precedence < key.1)
            .cloned()
            .collect();
        let mut ctx = CodegenCtx::new(
            &mut program,
            &symbols,
            &mut reporter,
            &globals,
            &named_templates,
            &modes,
            &import_modes,
            &sheet.attribute_sets,
            Slot(0),
            PositionSource::Iterator(Slot(0)),
        );
        mode::compile_mode_dispatch(&mut ctx, *method, full, &window)?;
    }

    compile_global_init(
        init_method,
        &ordered,
        &stubbed_globals,
        &mut program,
        &symbols,
        &mut reporter,
        &globals,
        &named_templates,
        &modes,
        &import_modes,
        &sheet,
    )?;

    // The entry point: bind globals, then dispatch the root in the
    // default mode.
    let mut entry = MethodBody::new(1);
    entry.emit(Instr::LoadLocal(Slot(0)));
    entry.emit(Instr::CallMethod(init_method));
    entry.emit(Instr::LoadLocal(Slot(0)));
    entry.emit(Instr::CallRuntime(RuntimeFn::SingletonIterator));
    entry.emit(Instr::CallMethod(modes[&None]));
    entry.emit(Instr::Return);
    program.define_method(entry_method, entry)?;
    program.set_entry(entry_method);

    // Any method a failed declaration left without a body becomes a
    // runtime failure.
    let undefined: Vec<(MethodId, MethodSig)> = program
        .methods()
        .iter()
        .enumerate()
        .filter(|(_, m)| m.body().is_none())
        .map(|(i, m)| (MethodId(i as u32), m.sig))
        .collect();
    for (id, sig) in undefined {
        let msg = program.intern("this part of the stylesheet failed to compile");
        let mut stub = MethodBody::new(sig.param_slots);
        stub.emit(Instr::PushStr(msg));
        stub.emit(Instr::CallRuntime(RuntimeFn::RaiseError));
        if sig.returns {
            let empty = program.intern("");
            stub.emit(Instr::PushStr(empty));
        }
        stub.emit(Instr::Return);
        program.define_method(id, stub)?;
    }
    program.finish()?;

    Ok(CompiledStylesheet {
        program,
        diagnostics: reporter.into_diagnostics(),
    })
}

/// The static type a global variable's value will have.
fn global_value_type(
    decl: &GlobalDecl,
    symbols: &SymbolTable,
    global_types: &HashMap<String, Type>,
) -> Result<Type, CompileError> {
    match &decl.value {
        Some(VarValue::Select(expr)) => {
            let env = TypeEnv {
                symbols,
                vars: &GlobalVars {
                    globals: global_types,
                },
            };
            Ok(typed::check_expr(expr, &env)?.ty())
        }
        Some(VarValue::Tree(_)) => Ok(Type::ResultTree),
        None => Ok(Type::String),
    }
}

#[allow(clippy::too_many_arguments)]
fn compile_template(
    template: &Template,
    method: MethodId,
    program: &mut Program,
    symbols: &SymbolTable,
    reporter: &mut ErrorReporter,
    globals: &HashMap<String, GlobalBinding>,
    named_templates: &HashMap<String, MethodId>,
    modes: &HashMap<Option<String>, MethodId>,
    import_modes: &HashMap<(Option<String>, usize), MethodId>,
    sheet: &Stylesheet,
) -> Result<(), CompileError> {
    let mut body = MethodBody::new(2);
    let mut ctx = CodegenCtx::new(
        program,
        symbols,
        reporter,
        globals,
        named_templates,
        modes,
        import_modes,
        &sheet.attribute_sets,
        Slot(0),
        PositionSource::Iterator(Slot(1)),
    );
    ctx.mode = template.mode.clone();
    ctx.precedence = template.precedence;

    ctx.push_scope();
    for (name, default) in &template.params {
        variables::translate_local_param(&mut ctx, &mut body, name, default.as_ref())?;
    }
    for instruction in &template.body.0 {
        codegen::translate_instruction(&mut ctx, &mut body, instruction)?;
    }
    ctx.pop_scope(&mut body)?;
    body.emit(Instr::Return);
    program.define_method(method, body)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn compile_key(
    key: &crate::instr::KeyDecl,
    program: &mut Program,
    symbols: &SymbolTable,
    reporter: &mut ErrorReporter,
    globals: &HashMap<String, GlobalBinding>,
    named_templates: &HashMap<String, MethodId>,
    modes: &HashMap<Option<String>, MethodId>,
    import_modes: &HashMap<(Option<String>, usize), MethodId>,
    sheet: &Stylesheet,
    global_types: &HashMap<String, Type>,
) -> Result<KeyIndex, CompileError> {
    let mut checked_alternatives: Vec<TypedPathPattern> = Vec::new();
    for alternative in &key.pattern.alternatives {
        let env = TypeEnv {
            symbols,
            vars: &GlobalVars {
                globals: global_types,
            },
        };
        checked_alternatives.push(pattern::check_path_pattern(alternative, &env, None)?);
    }

    let match_method = program.declare_method(
        &format!("key${}$match", key.name),
        MethodSig {
            param_slots: 1,
            returns: true,
        },
    );
    let use_method = program.declare_method(
        &format!("key${}$use", key.name),
        MethodSig {
            param_slots: 3,
            returns: true,
        },
    );
    let name_idx = program.intern(&key.name);

    let mut ctx = CodegenCtx::new(
        program,
        symbols,
        reporter,
        globals,
        named_templates,
        modes,
        import_modes,
        &sheet.attribute_sets,
        Slot(0),
        PositionSource::Iterator(Slot(0)),
    );

    // match: true when any alternative matches the node in slot 0.
    let mut body = MethodBody::new(1);
    for alternative in &checked_alternatives {
        let fail = pattern::translate_full_pattern_test(&mut ctx, &mut body, alternative, Slot(0))?;
        body.emit(Instr::PushBool(true));
        body.emit(Instr::Return);
        let next = body.here();
        fail.backpatch(&mut body, next)?;
    }
    body.emit(Instr::PushBool(false));
    body.emit(Instr::Return);
    ctx.program.define_method(match_method, body)?;

    // use: the key value of the node, as a string.
    let mut body = MethodBody::new(3);
    let saved = ctx.enter_frame(
        Slot(0),
        PositionSource::Slots {
            position: Slot(1),
            last: Slot(2),
        },
    );
    let result = (|| -> Result<(), CompileError> {
        let value = codegen::check_coerced(&ctx, &key.use_expr, Type::String)?;
        codegen::expr::translate(&mut ctx, &mut body, &value)?;
        body.emit(Instr::Return);
        Ok(())
    })();
    ctx.leave_frame(saved);
    result?;
    ctx.program.define_method(use_method, body)?;

    Ok(KeyIndex {
        name: name_idx,
        match_method,
        use_method,
    })
}

/// The `init$globals` method: evaluate every global in dependency order
/// into its frame slot. Parameters consult the externally supplied
/// parameter bindings first and fall back to their defaults.
#[allow(clippy::too_many_arguments)]
fn compile_global_init(
    method: MethodId,
    ordered: &[&GlobalDecl],
    stubbed: &HashSet<String>,
    program: &mut Program,
    symbols: &SymbolTable,
    reporter: &mut ErrorReporter,
    globals: &HashMap<String, GlobalBinding>,
    named_templates: &HashMap<String, MethodId>,
    modes: &HashMap<Option<String>, MethodId>,
    import_modes: &HashMap<(Option<String>, usize), MethodId>,
    sheet: &Stylesheet,
) -> Result<(), CompileError> {
    let mut body = MethodBody::new(1);
    let iter = body.alloc_local();
    body.emit(Instr::LoadLocal(Slot(0)));
    body.emit(Instr::CallRuntime(RuntimeFn::SingletonIterator));
    body.emit(Instr::StoreLocal(iter));

    let mut ctx = CodegenCtx::new(
        program,
        symbols,
        reporter,
        globals,
        named_templates,
        modes,
        import_modes,
        &sheet.attribute_sets,
        Slot(0),
        PositionSource::Iterator(iter),
    );

    let tmp = body.alloc_local();
    for decl in ordered {
        let binding = ctx.globals[&decl.name];
        if stubbed.contains(&decl.name) {
            let empty = ctx.program.intern("");
            body.emit(Instr::PushStr(empty));
            body.emit(Instr::StoreGlobal(binding.index));
            continue;
        }
        if decl.is_param {
            let idx = ctx.program.intern(&decl.name);
            body.emit(Instr::PushStr(idx));
            body.emit(Instr::CallRuntime(RuntimeFn::LookupParam));
            body.emit(Instr::StoreLocal(tmp));
            body.emit(Instr::LoadLocal(tmp));
            let supplied = body.branch(Cond::NotNull);
            match &decl.value {
                Some(value) => {
                    let ty = variables::emit_value(&mut ctx, &mut body, value)?;
                    variables::emit_box(&mut body, ty);
                }
                None => {
                    let empty = ctx.program.intern("");
                    body.emit(Instr::PushStr(empty));
                    body.emit(Instr::CallRuntime(RuntimeFn::BoxString));
                }
            }
            body.emit(Instr::StoreLocal(tmp));
            let end = body.here();
            body.backpatch(supplied, end)?;
            body.emit(Instr::LoadLocal(tmp));
            body.emit(Instr::StoreGlobal(binding.index));
        } else {
            let empty = VarValue::Tree(Body(Vec::new()));
            let value = decl.value.as_ref().unwrap_or(&empty);
            variables::emit_value(&mut ctx, &mut body, value)?;
            body.emit(Instr::StoreGlobal(binding.index));
        }
    }
    body.release_local(tmp)?;
    body.release_local(iter)?;
    body.emit(Instr::Return);
    ctx.program.define_method(method, body)?;
    Ok(())
}

/// Walk every nested body of an instruction tree, collecting the modes
/// `xsl:apply-templates` dispatches into and whether `xsl:apply-imports`
/// occurs.
fn scan_body(body: &Body, modes: &mut BTreeSet<Option<String>>, uses_imports: &mut bool) {
    for instruction in &body.0 {
        scan_instruction(instruction, modes, uses_imports);
    }
}

fn scan_value(value: &VarValue, modes: &mut BTreeSet<Option<String>>, uses_imports: &mut bool) {
    if let VarValue::Tree(body) = value {
        scan_body(body, modes, uses_imports);
    }
}

fn scan_params(
    params: &[WithParam],
    modes: &mut BTreeSet<Option<String>>,
    uses_imports: &mut bool,
) {
    for param in params {
        scan_value(&param.value, modes, uses_imports);
    }
}

fn scan_instruction(
    instruction: &XsltInstruction,
    modes: &mut BTreeSet<Option<String>>,
    uses_imports: &mut bool,
) {
    match instruction {
        XsltInstruction::ApplyTemplates { mode, params, .. } => {
            modes.insert(mode.clone());
            scan_params(params, modes, uses_imports);
        }
        XsltInstruction::ApplyImports => *uses_imports = true,
        XsltInstruction::CallTemplate { params, .. } => scan_params(params, modes, uses_imports),
        XsltInstruction::If { body, .. }
        | XsltInstruction::ForEach { body, .. }
        | XsltInstruction::LiteralElement { body, .. }
        | XsltInstruction::Element { body, .. }
        | XsltInstruction::Attribute { body, .. }
        | XsltInstruction::Comment { body }
        | XsltInstruction::ProcessingInstruction { body, .. }
        | XsltInstruction::Message { body, .. }
        | XsltInstruction::Copy { body, .. } => scan_body(body, modes, uses_imports),
        XsltInstruction::Choose { whens, otherwise } => {
            for when in whens {
                scan_body(&when.body, modes, uses_imports);
            }
            if let Some(body) = otherwise {
                scan_body(body, modes, uses_imports);
            }
        }
        XsltInstruction::LocalVariable { value, .. } => scan_value(value, modes, uses_imports),
        XsltInstruction::LocalParam { default, .. } => {
            if let Some(value) = default {
                scan_value(value, modes, uses_imports);
            }
        }
        XsltInstruction::Unsupported { fallbacks, .. } => {
            for fallback in fallbacks {
                scan_body(fallback, modes, uses_imports);
            }
        }
        XsltInstruction::Text(_)
        | XsltInstruction::ValueOf { .. }
        | XsltInstruction::CopyOf { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(body: &str) -> String {
        format!(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">{body}</xsl:stylesheet>"#
        )
    }

    #[test]
    fn test_minimal_stylesheet_compiles() {
        let compiled = compile(&wrap(
            r#"<xsl:template match="/"><html><xsl:apply-templates/></html></xsl:template>
               <xsl:template match="para"><p><xsl:value-of select="."/></p></xsl:template>"#,
        ))
        .unwrap();
        assert!(compiled.is_usable());
        assert!(compiled.diagnostics.is_empty());
        let program = &compiled.program;
        assert!(program.entry().is_some());
        assert!(program.find_method("mode$default").is_some());
        assert!(program.find_method("init$globals").is_some());
        assert_eq!(program.entry(), program.find_method("main"));
    }

    #[test]
    fn test_failed_template_becomes_stub() {
        let compiled = compile(&wrap(
            r#"<xsl:template match="a"><xsl:value-of select="$nope"/></xsl:template>
               <xsl:template match="b"><ok/></xsl:template>"#,
        ))
        .unwrap();
        assert!(compiled
            .diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error));
        // The broken template's method exists and raises at runtime.
        let program = &compiled.program;
        let id = program.find_method("template$0").unwrap();
        let instrs = program.method(id).body().unwrap().instrs();
        assert!(instrs
            .iter()
            .any(|i| matches!(i, Instr::CallRuntime(RuntimeFn::RaiseError))));
        program.finish().unwrap();
    }

    #[test]
    fn test_key_declaration_produces_method_pair() {
        let compiled = compile(&wrap(
            r#"<xsl:key name="by-id" match="item" use="@id"/>
               <xsl:template match="/"><x/></xsl:template>"#,
        ))
        .unwrap();
        let program = &compiled.program;
        assert_eq!(program.keys().len(), 1);
        assert!(program.find_method("key$by-id$match").is_some());
        assert!(program.find_method("key$by-id$use").is_some());
        let key = program.keys()[0];
        assert_eq!(program.constant(key.name), "by-id");
        assert!(program.method(key.match_method).sig.returns);
    }

    #[test]
    fn test_global_param_consults_supplied_bindings() {
        let compiled = compile(&wrap(
            r#"<xsl:param name="lang" select="'en'"/>
               <xsl:template match="/"><xsl:value-of select="$lang"/></xsl:template>"#,
        ))
        .unwrap();
        let program = &compiled.program;
        let init = program.find_method("init$globals").unwrap();
        let instrs = program.method(init).body().unwrap().instrs();
        assert!(instrs
            .iter()
            .any(|i| matches!(i, Instr::CallRuntime(RuntimeFn::LookupParam))));
        assert!(instrs
            .iter()
            .any(|i| matches!(i, Instr::StoreGlobal(0))));
    }

    #[test]
    fn test_mode_referenced_without_templates_gets_builtin_dispatch() {
        let compiled = compile(&wrap(
            r#"<xsl:template match="/"><xsl:apply-templates mode="toc"/></xsl:template>"#,
        ))
        .unwrap();
        assert!(compiled.program.find_method("mode$toc").is_some());
    }

    #[test]
    fn test_apply_imports_gets_restricted_dispatch() {
        let compiled = compile(&wrap(
            r#"<xsl:template match="a"><xsl:apply-imports/></xsl:template>"#,
        ))
        .unwrap();
        assert!(compiled.program.find_method("mode$default$imports0").is_some());
    }

    #[test]
    fn test_conflicting_templates_are_reported() {
        let compiled = compile(&wrap(
            r#"<xsl:template match="para"><a/></xsl:template>
               <xsl:template match="para"><b/></xsl:template>"#,
        ))
        .unwrap();
        assert!(compiled
            .diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error && d.message.contains("para")));
    }
}
