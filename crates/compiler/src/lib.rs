//! The xsltc compiler core: XSLT stylesheets into stack-machine
//! programs.
//!
//! Compilation runs in phases: [`reader`] turns stylesheet XML into
//! instruction trees, [`stylesheet`] flattens the import tree and orders
//! global declarations, [`typed`] assigns static types and coercions to
//! XPath expressions, and [`codegen`] lowers everything into the
//! abstract instructions of `xsltc-emit`. Template dispatch compiles per
//! mode in [`mode`], match patterns into upward node tests in
//! [`pattern`]. The [`compile`] module drives the whole pipeline.

pub mod codegen;
pub mod compile;
pub mod context;
pub mod error;
pub mod instr;
pub mod mode;
pub mod pattern;
pub mod reader;
pub mod stylesheet;
pub mod symbols;
pub mod typed;
pub mod types;

pub use compile::{CompiledStylesheet, compile, compile_with_loader};
pub use error::{CompileError, Diagnostic, ErrorReporter, Location, Severity};
pub use stylesheet::{NoLoader, StylesheetLoader};
pub use types::{Type, TypeError};
