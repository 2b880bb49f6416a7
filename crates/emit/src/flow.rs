//! Flow lists: ordered collections of pending branch placeholders.
//!
//! A boolean expression compiled "desynthesized" does not leave a value on
//! the stack; it leaves two flow lists behind, one holding every jump taken
//! when the expression is true and one for when it is false. The consuming
//! construct decides where each continuation goes. Append and merge are
//! list concatenation; resolution targets every held placeholder at once.

use crate::body::{BranchHandle, Label, MethodBody};
use crate::error::EmitError;

/// A list of not-yet-targeted branch placeholders sharing one eventual
/// destination.
#[derive(Debug, Default)]
pub struct FlowList {
    handles: Vec<BranchHandle>,
}

impl FlowList {
    pub fn new() -> Self {
        FlowList::default()
    }

    pub fn add(&mut self, handle: BranchHandle) {
        self.handles.push(handle);
    }

    /// Concatenate another list into this one, consuming it.
    pub fn merge(&mut self, other: FlowList) {
        self.handles.extend(other.handles);
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Patch every held placeholder to `label`, consuming the list.
    pub fn backpatch(self, body: &mut MethodBody, label: Label) -> Result<(), EmitError> {
        for handle in self.handles {
            body.backpatch(handle, label)?;
        }
        Ok(())
    }
}

/// The pair of flow lists a desynthesized boolean expression produces.
#[derive(Debug, Default)]
pub struct Flow {
    pub true_list: FlowList,
    pub false_list: FlowList,
}

impl Flow {
    pub fn new() -> Self {
        Flow::default()
    }

    /// Swap the true and false continuations (negation).
    pub fn negate(self) -> Flow {
        Flow {
            true_list: self.false_list,
            false_list: self.true_list,
        }
    }
}
