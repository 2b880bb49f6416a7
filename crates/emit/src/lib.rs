//! The code-emission backend for the xsltc compiler.
//!
//! The compiler core never writes bytes. It *requests* instructions through
//! the types in this crate: it appends abstract instructions to a
//! [`MethodBody`], reserves branch placeholders, backpatches them to labels,
//! and allocates local slots with a scoped discipline. The assembled
//! [`Program`] is the loadable "translet" artifact; its binary encoding is
//! out of scope here.

pub mod body;
pub mod error;
pub mod flow;
pub mod instr;
pub mod program;

pub use body::{BranchHandle, Label, MethodBody, Slot};
pub use error::EmitError;
pub use flow::{Flow, FlowList};
pub use instr::{
    ArithOp, AxisKind, CmpOp, Cond, ConstIdx, Instr, MethodId, NodeKind, NumKind, RuntimeFn,
};
pub use program::{KeyIndex, Method, MethodSig, Program};
