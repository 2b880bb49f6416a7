//! xsltc: an XSLT 1.0 compiler targeting an abstract stack machine.
//!
//! The crate compiles stylesheet text into a [`Program`](emit::Program):
//! a constant pool, generated methods (template bodies, per-mode
//! dispatch loops, key index extractors, predicate closures) and an
//! entry point. Executing the program against a source document is a
//! runtime concern and out of scope here.
//!
//! ```no_run
//! let compiled = xsltc::compile(
//!     r#"<xsl:stylesheet version="1.0"
//!            xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
//!          <xsl:template match="/"><xsl:apply-templates/></xsl:template>
//!        </xsl:stylesheet>"#,
//! )?;
//! for diagnostic in &compiled.diagnostics {
//!     eprintln!("{diagnostic}");
//! }
//! # Ok::<(), xsltc::CompileError>(())
//! ```

pub use xsltc_compiler::{
    CompileError, CompiledStylesheet, Diagnostic, Location, NoLoader, Severity, StylesheetLoader,
    Type, TypeError, compile, compile_with_loader,
};

pub use xsltc_emit as emit;
pub use xsltc_xpath as xpath;
