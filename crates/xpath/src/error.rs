use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XPathError {
    #[error("XPath parse error in '{0}': {1}")]
    ExprParse(String, String),

    #[error("Pattern parse error in '{0}': {1}")]
    PatternParse(String, String),

    #[error("Attribute value template error in '{0}': {1}")]
    AvtSyntax(String, String),
}
