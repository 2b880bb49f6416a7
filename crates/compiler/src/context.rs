//! The code-generation context: everything translation needs to know
//! about its surroundings, passed explicitly instead of living in
//! globals.
//!
//! One context exists per method being generated. Compiling an auxiliary
//! method mid-expression (a predicate closure, a sort key extractor)
//! swaps the per-frame state out with [`CodegenCtx::enter_frame`] and
//! restores it afterwards; the program-wide tables stay shared.

use std::collections::HashMap;

use crate::error::ErrorReporter;
use crate::stylesheet::AttributeSet;
use crate::symbols::SymbolTable;
use crate::typed::VarTypes;
use crate::types::Type;
use xsltc_emit::{MethodBody, MethodId, Program, Slot};

/// A compiled global variable or parameter.
#[derive(Debug, Clone, Copy)]
pub struct GlobalBinding {
    pub ty: Type,
    pub index: u16,
}

/// A local variable visible in the current frame.
#[derive(Debug, Clone, Copy)]
pub struct LocalBinding {
    pub ty: Type,
    pub slot: Slot,
}

/// Where `position()` and `last()` come from in the current frame.
#[derive(Debug, Clone, Copy)]
pub enum PositionSource {
    /// The live iterator driving the current context node list.
    Iterator(Slot),
    /// Precomputed values, as in predicate closure methods.
    Slots { position: Slot, last: Slot },
}

/// Saved per-frame state across an auxiliary-method compilation.
pub struct SavedFrame {
    current_node: Slot,
    position: PositionSource,
    scopes: Vec<Vec<(String, LocalBinding)>>,
}

pub struct CodegenCtx<'a> {
    pub program: &'a mut Program,
    pub symbols: &'a SymbolTable,
    pub reporter: &'a mut ErrorReporter,
    pub globals: &'a HashMap<String, GlobalBinding>,
    pub named_templates: &'a HashMap<String, MethodId>,
    /// Dispatch method of each mode.
    pub modes: &'a HashMap<Option<String>, MethodId>,
    /// Dispatch methods restricted to precedences below a template's own,
    /// keyed by (mode, calling precedence). Only built where
    /// `xsl:apply-imports` occurs.
    pub import_modes: &'a HashMap<(Option<String>, usize), MethodId>,
    pub attribute_sets: &'a HashMap<String, AttributeSet>,
    /// Import precedence of the template being compiled.
    pub precedence: usize,
    /// Mode of the template being compiled.
    pub mode: Option<String>,
    pub current_node: Slot,
    pub position: PositionSource,
    scopes: Vec<Vec<(String, LocalBinding)>>,
    aux_counter: u32,
}

impl<'a> CodegenCtx<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        program: &'a mut Program,
        symbols: &'a SymbolTable,
        reporter: &'a mut ErrorReporter,
        globals: &'a HashMap<String, GlobalBinding>,
        named_templates: &'a HashMap<String, MethodId>,
        modes: &'a HashMap<Option<String>, MethodId>,
        import_modes: &'a HashMap<(Option<String>, usize), MethodId>,
        attribute_sets: &'a HashMap<String, AttributeSet>,
        current_node: Slot,
        position: PositionSource,
    ) -> Self {
        CodegenCtx {
            program,
            symbols,
            reporter,
            globals,
            named_templates,
            modes,
            import_modes,
            attribute_sets,
            precedence: 0,
            mode: None,
            current_node,
            position,
            scopes: vec![Vec::new()],
            aux_counter: 0,
        }
    }

    // --- Local scopes ---

    pub fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    /// Close the innermost scope, releasing its slots for reuse.
    pub fn pop_scope(&mut self, body: &mut MethodBody) -> Result<(), xsltc_emit::EmitError> {
        if let Some(scope) = self.scopes.pop() {
            for (_, binding) in scope.into_iter().rev() {
                body.release_local(binding.slot)?;
            }
        }
        Ok(())
    }

    pub fn declare_local(&mut self, name: &str, binding: LocalBinding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((name.to_string(), binding));
        }
    }

    pub fn lookup_local(&self, name: &str) -> Option<LocalBinding> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(n, _)| n == name)
            .map(|(_, b)| *b)
    }

    // --- Frame switching for auxiliary methods ---

    /// Begin generating into a different frame (an auxiliary method).
    /// Local scopes start empty; the caller declares the method's own
    /// parameters.
    pub fn enter_frame(&mut self, current_node: Slot, position: PositionSource) -> SavedFrame {
        let saved = SavedFrame {
            current_node: self.current_node,
            position: self.position,
            scopes: std::mem::take(&mut self.scopes),
        };
        self.current_node = current_node;
        self.position = position;
        self.scopes = vec![Vec::new()];
        saved
    }

    pub fn leave_frame(&mut self, saved: SavedFrame) {
        self.current_node = saved.current_node;
        self.position = saved.position;
        self.scopes = saved.scopes;
    }

    /// A fresh name for a generated helper method.
    pub fn aux_method_name(&mut self, kind: &str) -> String {
        let n = self.aux_counter;
        self.aux_counter += 1;
        format!("{kind}${n}")
    }
}

impl VarTypes for CodegenCtx<'_> {
    fn local_type(&self, name: &str) -> Option<Type> {
        self.lookup_local(name).map(|b| b.ty)
    }

    fn global_type(&self, name: &str) -> Option<Type> {
        self.globals.get(name).map(|b| b.ty)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixture for code-generation unit tests.

    use super::*;
    use xsltc_emit::MethodBody;

    pub struct Fixture {
        pub program: Program,
        pub symbols: SymbolTable,
        pub reporter: ErrorReporter,
        pub globals: HashMap<String, GlobalBinding>,
        pub named_templates: HashMap<String, MethodId>,
        pub modes: HashMap<Option<String>, MethodId>,
        pub import_modes: HashMap<(Option<String>, usize), MethodId>,
        pub attribute_sets: HashMap<String, AttributeSet>,
    }

    impl Fixture {
        pub fn new() -> Self {
            Fixture {
                program: Program::new(),
                symbols: SymbolTable::core(),
                reporter: ErrorReporter::new(),
                globals: HashMap::new(),
                named_templates: HashMap::new(),
                modes: HashMap::new(),
                import_modes: HashMap::new(),
                attribute_sets: HashMap::new(),
            }
        }

        /// A context and body shaped like a template method: the context
        /// node in slot 0, the driving iterator in slot 1.
        pub fn template_frame(&mut self) -> (CodegenCtx<'_>, MethodBody) {
            let ctx = CodegenCtx::new(
                &mut self.program,
                &self.symbols,
                &mut self.reporter,
                &self.globals,
                &self.named_templates,
                &self.modes,
                &self.import_modes,
                &self.attribute_sets,
                Slot(0),
                PositionSource::Iterator(Slot(1)),
            );
            (ctx, MethodBody::new(2))
        }
    }
}
