//! The assembled program ("translet"): a constant pool, a set of generated
//! methods, declared key indexes, and an entry point.

use std::collections::HashMap;

use crate::body::MethodBody;
use crate::error::EmitError;
use crate::instr::{ConstIdx, MethodId};

/// Calling discipline of a generated method.
///
/// A caller pushes `param_slots` arguments; the callee receives them in
/// locals `0..param_slots`. A method with `returns` leaves one value on the
/// caller's stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSig {
    pub param_slots: u16,
    pub returns: bool,
}

#[derive(Debug)]
pub struct Method {
    pub name: String,
    pub sig: MethodSig,
    body: Option<MethodBody>,
}

impl Method {
    pub fn body(&self) -> Option<&MethodBody> {
        self.body.as_ref()
    }
}

/// A key-index declaration carried by the program: the runtime builds the
/// index by matching every node against `match_method` and extracting the
/// key value with `use_method`.
#[derive(Debug, Clone, Copy)]
pub struct KeyIndex {
    pub name: ConstIdx,
    pub match_method: MethodId,
    pub use_method: MethodId,
}

/// The loadable output artifact.
#[derive(Debug, Default)]
pub struct Program {
    constants: Vec<String>,
    constant_map: HashMap<String, ConstIdx>,
    methods: Vec<Method>,
    keys: Vec<KeyIndex>,
    entry: Option<MethodId>,
    global_slots: u16,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }

    /// Intern a string into the constant pool, deduplicated.
    pub fn intern(&mut self, s: &str) -> ConstIdx {
        if let Some(idx) = self.constant_map.get(s) {
            return *idx;
        }
        let idx = ConstIdx(self.constants.len() as u32);
        self.constants.push(s.to_string());
        self.constant_map.insert(s.to_string(), idx);
        idx
    }

    pub fn constant(&self, idx: ConstIdx) -> &str {
        &self.constants[idx.0 as usize]
    }

    /// Reserve an id for a method whose body comes later (forward
    /// references between generated methods need this).
    pub fn declare_method(&mut self, name: &str, sig: MethodSig) -> MethodId {
        let id = MethodId(self.methods.len() as u32);
        self.methods.push(Method {
            name: name.to_string(),
            sig,
            body: None,
        });
        id
    }

    /// Attach a finished body to a declared method.
    pub fn define_method(&mut self, id: MethodId, body: MethodBody) -> Result<(), EmitError> {
        let method = &mut self.methods[id.0 as usize];
        body.finish(&method.name)?;
        if method.body.is_some() {
            return Err(EmitError::RedefinedMethod(id.0 as usize));
        }
        method.body = Some(body);
        Ok(())
    }

    pub fn method(&self, id: MethodId) -> &Method {
        &self.methods[id.0 as usize]
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn find_method(&self, name: &str) -> Option<MethodId> {
        self.methods
            .iter()
            .position(|m| m.name == name)
            .map(|i| MethodId(i as u32))
    }

    pub fn add_key(&mut self, key: KeyIndex) {
        self.keys.push(key);
    }

    pub fn keys(&self) -> &[KeyIndex] {
        &self.keys
    }

    pub fn set_entry(&mut self, id: MethodId) {
        self.entry = Some(id);
    }

    pub fn entry(&self) -> Option<MethodId> {
        self.entry
    }

    /// Reserve one global-frame slot; returns its index.
    pub fn alloc_global(&mut self) -> u16 {
        let idx = self.global_slots;
        self.global_slots += 1;
        idx
    }

    pub fn global_slots(&self) -> u16 {
        self.global_slots
    }

    /// Final validation: every declared method has a body.
    pub fn finish(&self) -> Result<(), EmitError> {
        for (i, m) in self.methods.iter().enumerate() {
            if m.body.is_none() {
                return Err(EmitError::UndefinedMethod(i));
            }
        }
        Ok(())
    }
}
