//! Compilation errors and the diagnostic reporter.
//!
//! Two error channels exist. `CompileError` is the hard-failure type that
//! aborts whatever unit it occurs in. The `ErrorReporter` collects
//! `Diagnostic`s across the whole run so a single compilation can surface
//! every problem it finds; a failed top-level declaration is reported and
//! replaced by a runtime-failure stub instead of aborting its siblings.

use std::fmt;
use thiserror::Error;

use crate::types::TypeError;
use xsltc_emit::EmitError;
use xsltc_xpath::XPathError;

/// A position in stylesheet source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.col)
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("XML parsing failed: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error(transparent)]
    XPath(#[from] XPathError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("internal code-generation error: {0}")]
    Emit(#[from] EmitError),

    #[error("{message} ({location})")]
    Structure { message: String, location: Location },

    #[error("conflicting definitions of {what} '{name}'")]
    Redefinition { what: &'static str, name: String },

    #[error("circular reference involving variable '{0}'")]
    CircularVariable(String),

    #[error("circular use-attribute-sets involving '{0}'")]
    CircularAttributeSet(String),

    #[error("reference to undefined {what} '{name}'")]
    Unresolved { what: &'static str, name: String },

    #[error("cannot load stylesheet '{href}': {message}")]
    Loader { href: String, message: String },

    #[error("compilation failed: {0}")]
    Fatal(String),
}

/// How bad a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Compilation continues; output is usable.
    Warning,
    /// The affected construct was replaced by a runtime failure stub; the
    /// rest of the output is usable.
    Error,
    /// No usable output.
    Fatal,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub location: Option<Location>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal error",
        };
        match self.location {
            Some(loc) => write!(f, "{kind}: {} ({loc})", self.message),
            None => write!(f, "{kind}: {}", self.message),
        }
    }
}

/// Accumulates diagnostics over a whole compilation run.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    diagnostics: Vec<Diagnostic>,
}

impl ErrorReporter {
    pub fn new() -> Self {
        ErrorReporter::default()
    }

    pub fn warning(&mut self, message: impl Into<String>, location: Option<Location>) {
        let message = message.into();
        log::warn!("{message}");
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            message,
            location,
        });
    }

    pub fn error(&mut self, message: impl Into<String>, location: Option<Location>) {
        let message = message.into();
        log::error!("{message}");
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            message,
            location,
        });
    }

    pub fn fatal(&mut self, message: impl Into<String>, location: Option<Location>) {
        let message = message.into();
        log::error!("{message}");
        self.diagnostics.push(Diagnostic {
            severity: Severity::Fatal,
            message,
            location,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity >= Severity::Error)
    }

    pub fn has_fatal(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Fatal)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}
