//! Method bodies under construction: instruction append, branch placeholder
//! reservation and backpatching, and scoped local-slot allocation.

use crate::error::EmitError;
use crate::instr::{Cond, Instr};

/// Position of an instruction within a method body, used as a jump target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(pub usize);

/// A reserved, not-yet-targeted branch or jump instruction.
///
/// Every handle must be backpatched exactly once before the body is
/// finished; [`MethodBody::finish`] rejects dangling placeholders and
/// [`MethodBody::backpatch`] rejects double patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchHandle(pub(crate) usize);

/// A local variable slot in the generated frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot(pub u16);

/// A method body being generated.
#[derive(Debug)]
pub struct MethodBody {
    instrs: Vec<Instr>,
    /// Slots below this index are parameters and are never recycled.
    param_slots: u16,
    next_slot: u16,
    free_slots: Vec<u16>,
    max_slots: u16,
}

impl MethodBody {
    /// Start a body whose first `param_slots` locals are filled by the
    /// caller.
    pub fn new(param_slots: u16) -> Self {
        MethodBody {
            instrs: Vec::new(),
            param_slots,
            next_slot: param_slots,
            free_slots: Vec::new(),
            max_slots: param_slots,
        }
    }

    pub fn emit(&mut self, instr: Instr) {
        debug_assert!(
            !matches!(instr, Instr::Branch { .. } | Instr::Jump { .. }),
            "control flow must go through branch()/jump()"
        );
        self.instrs.push(instr);
    }

    /// The label of the next instruction to be appended.
    pub fn here(&self) -> Label {
        Label(self.instrs.len())
    }

    /// Reserve a conditional-branch placeholder.
    pub fn branch(&mut self, cond: Cond) -> BranchHandle {
        let handle = BranchHandle(self.instrs.len());
        self.instrs.push(Instr::Branch { cond, target: None });
        handle
    }

    /// Reserve an unconditional-jump placeholder.
    pub fn jump(&mut self) -> BranchHandle {
        let handle = BranchHandle(self.instrs.len());
        self.instrs.push(Instr::Jump { target: None });
        handle
    }

    /// Give a placeholder its concrete target. Patching the same handle
    /// twice is a code-generation defect and is rejected.
    pub fn backpatch(&mut self, handle: BranchHandle, label: Label) -> Result<(), EmitError> {
        if label.0 > self.instrs.len() {
            return Err(EmitError::LabelOutOfRange(label.0));
        }
        match self.instrs.get_mut(handle.0) {
            Some(Instr::Branch { target, .. }) | Some(Instr::Jump { target }) => {
                if target.is_some() {
                    return Err(EmitError::DoublePatch(handle.0));
                }
                *target = Some(label);
                Ok(())
            }
            _ => Err(EmitError::NotABranch(handle.0)),
        }
    }

    /// Allocate a local slot, reusing released ones first.
    pub fn alloc_local(&mut self) -> Slot {
        if let Some(idx) = self.free_slots.pop() {
            return Slot(idx);
        }
        let idx = self.next_slot;
        self.next_slot += 1;
        if self.next_slot > self.max_slots {
            self.max_slots = self.next_slot;
        }
        Slot(idx)
    }

    /// Release a slot once the construct that needed it is done.
    pub fn release_local(&mut self, slot: Slot) -> Result<(), EmitError> {
        let idx = slot.0;
        if idx < self.param_slots || idx >= self.next_slot || self.free_slots.contains(&idx) {
            return Err(EmitError::BadSlotRelease(idx));
        }
        self.free_slots.push(idx);
        Ok(())
    }

    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    pub fn param_slots(&self) -> u16 {
        self.param_slots
    }

    pub fn max_slots(&self) -> u16 {
        self.max_slots
    }

    /// Count of placeholders still awaiting a target.
    pub fn dangling(&self) -> usize {
        self.instrs
            .iter()
            .filter(|i| {
                matches!(
                    i,
                    Instr::Branch { target: None, .. } | Instr::Jump { target: None }
                )
            })
            .count()
    }

    /// Validate the body: every placeholder patched exactly once.
    pub fn finish(&self, method_name: &str) -> Result<(), EmitError> {
        let count = self.dangling();
        if count > 0 {
            return Err(EmitError::DanglingPlaceholders {
                method: method_name.to_string(),
                count,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::{Cond, Instr};

    #[test]
    fn test_backpatch_exactly_once() {
        let mut body = MethodBody::new(0);
        body.emit(Instr::PushBool(true));
        let b = body.branch(Cond::True);
        body.emit(Instr::PushInt(1));
        let target = body.here();
        body.backpatch(b, target).unwrap();
        assert_eq!(body.dangling(), 0);
        assert_eq!(
            body.backpatch(b, target),
            Err(EmitError::DoublePatch(1))
        );
    }

    #[test]
    fn test_finish_rejects_dangling() {
        let mut body = MethodBody::new(0);
        let _ = body.jump();
        let err = body.finish("m").unwrap_err();
        assert_eq!(
            err,
            EmitError::DanglingPlaceholders {
                method: "m".to_string(),
                count: 1
            }
        );
    }

    #[test]
    fn test_slot_reuse_is_stack_like() {
        let mut body = MethodBody::new(2);
        let a = body.alloc_local();
        let b = body.alloc_local();
        assert_eq!((a, b), (Slot(2), Slot(3)));
        body.release_local(b).unwrap();
        let c = body.alloc_local();
        assert_eq!(c, Slot(3));
        assert_eq!(body.max_slots(), 4);
    }

    #[test]
    fn test_param_slot_release_rejected() {
        let mut body = MethodBody::new(1);
        assert_eq!(
            body.release_local(Slot(0)),
            Err(EmitError::BadSlotRelease(0))
        );
    }
}
