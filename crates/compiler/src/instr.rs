//! The instruction-level syntax tree of a stylesheet: what template and
//! global-variable bodies contain after XML reading, before code
//! generation.

use crate::error::Location;
use xsltc_xpath::{Avt, Expr, Pattern};

/// A sequence of instructions forming one body (template content, the
/// content of a `when`, an element constructor, ...).
#[derive(Debug, Clone, Default)]
pub struct Body(pub Vec<XsltInstruction>);

impl Body {
    /// The constant string this body produces, when it consists of text
    /// instructions only. Used to skip output capturing for comments,
    /// processing instructions and messages with fixed content.
    pub fn constant_text(&self) -> Option<String> {
        let mut out = String::new();
        for instr in &self.0 {
            match instr {
                XsltInstruction::Text(t) => out.push_str(t),
                _ => return None,
            }
        }
        Some(out)
    }
}

/// A variable or parameter value: either a select expression or a body
/// producing a result-tree fragment.
#[derive(Debug, Clone)]
pub enum VarValue {
    Select(Expr),
    Tree(Body),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDataType {
    Text,
    Number,
}

#[derive(Debug, Clone)]
pub struct SortKey {
    pub select: Expr,
    pub order: SortOrder,
    pub data_type: SortDataType,
}

#[derive(Debug, Clone)]
pub struct WithParam {
    pub name: String,
    pub value: VarValue,
}

#[derive(Debug, Clone)]
pub struct When {
    pub test: Expr,
    pub body: Body,
}

#[derive(Debug, Clone)]
pub enum XsltInstruction {
    /// Literal character data.
    Text(String),
    /// `xsl:value-of`.
    ValueOf { select: Expr },
    /// `xsl:if`.
    If { test: Expr, body: Body },
    /// `xsl:choose` with its `when` branches and optional `otherwise`.
    Choose {
        whens: Vec<When>,
        otherwise: Option<Body>,
    },
    /// `xsl:for-each`.
    ForEach {
        select: Expr,
        sorts: Vec<SortKey>,
        body: Body,
    },
    /// `xsl:apply-templates`.
    ApplyTemplates {
        select: Option<Expr>,
        mode: Option<String>,
        sorts: Vec<SortKey>,
        params: Vec<WithParam>,
    },
    /// `xsl:apply-imports`.
    ApplyImports,
    /// `xsl:call-template`.
    CallTemplate {
        name: String,
        params: Vec<WithParam>,
        location: Location,
    },
    /// `xsl:variable` in template content.
    LocalVariable { name: String, value: VarValue },
    /// `xsl:param` at the start of a template.
    LocalParam {
        name: String,
        default: Option<VarValue>,
    },
    /// A literal result element with attribute value templates.
    LiteralElement {
        name: String,
        attrs: Vec<(String, Avt)>,
        use_attribute_sets: Vec<String>,
        body: Body,
    },
    /// `xsl:element` with a computed name.
    Element {
        name: Avt,
        use_attribute_sets: Vec<String>,
        body: Body,
    },
    /// `xsl:attribute`.
    Attribute { name: Avt, body: Body },
    /// `xsl:comment`.
    Comment { body: Body },
    /// `xsl:processing-instruction`.
    ProcessingInstruction { name: Avt, body: Body },
    /// `xsl:message`.
    Message { body: Body, terminate: bool },
    /// `xsl:copy`.
    Copy {
        use_attribute_sets: Vec<String>,
        body: Body,
    },
    /// `xsl:copy-of`.
    CopyOf { select: Expr },
    /// An extension element with no implementation. Compiles to its
    /// `xsl:fallback` content when present, to a runtime failure
    /// otherwise.
    Unsupported {
        name: String,
        fallbacks: Vec<Body>,
        location: Location,
    },
}

/// A key declaration (`xsl:key`).
#[derive(Debug, Clone)]
pub struct KeyDecl {
    pub name: String,
    pub pattern: Pattern,
    pub use_expr: Expr,
    pub location: Location,
}

/// Visit every XPath expression an instruction body contains, including
/// those nested in inner bodies and attribute value templates.
pub fn visit_exprs(body: &Body, f: &mut impl FnMut(&Expr)) {
    for instr in &body.0 {
        visit_instruction_exprs(instr, f);
    }
}

fn visit_value_exprs(value: &VarValue, f: &mut impl FnMut(&Expr)) {
    match value {
        VarValue::Select(e) => f(e),
        VarValue::Tree(b) => visit_exprs(b, f),
    }
}

fn visit_avt_exprs(avt: &Avt, f: &mut impl FnMut(&Expr)) {
    for part in &avt.0 {
        if let xsltc_xpath::AvtPart::Expr(e) = part {
            f(e);
        }
    }
}

fn visit_instruction_exprs(instr: &XsltInstruction, f: &mut impl FnMut(&Expr)) {
    match instr {
        XsltInstruction::Text(_) | XsltInstruction::ApplyImports => {}
        XsltInstruction::ValueOf { select } | XsltInstruction::CopyOf { select } => f(select),
        XsltInstruction::If { test, body } => {
            f(test);
            visit_exprs(body, f);
        }
        XsltInstruction::Choose { whens, otherwise } => {
            for when in whens {
                f(&when.test);
                visit_exprs(&when.body, f);
            }
            if let Some(body) = otherwise {
                visit_exprs(body, f);
            }
        }
        XsltInstruction::ForEach { select, sorts, body } => {
            f(select);
            for sort in sorts {
                f(&sort.select);
            }
            visit_exprs(body, f);
        }
        XsltInstruction::ApplyTemplates { select, sorts, params, .. } => {
            if let Some(select) = select {
                f(select);
            }
            for sort in sorts {
                f(&sort.select);
            }
            for param in params {
                visit_value_exprs(&param.value, f);
            }
        }
        XsltInstruction::CallTemplate { params, .. } => {
            for param in params {
                visit_value_exprs(&param.value, f);
            }
        }
        XsltInstruction::LocalVariable { value, .. } => visit_value_exprs(value, f),
        XsltInstruction::LocalParam { default, .. } => {
            if let Some(value) = default {
                visit_value_exprs(value, f);
            }
        }
        XsltInstruction::LiteralElement { attrs, body, .. } => {
            for (_, avt) in attrs {
                visit_avt_exprs(avt, f);
            }
            visit_exprs(body, f);
        }
        XsltInstruction::Element { name, body, .. } => {
            visit_avt_exprs(name, f);
            visit_exprs(body, f);
        }
        XsltInstruction::Attribute { name, body }
        | XsltInstruction::ProcessingInstruction { name, body } => {
            visit_avt_exprs(name, f);
            visit_exprs(body, f);
        }
        XsltInstruction::Comment { body }
        | XsltInstruction::Message { body, .. }
        | XsltInstruction::Copy { body, .. } => visit_exprs(body, f),
        XsltInstruction::Unsupported { fallbacks, .. } => {
            for fallback in fallbacks {
                visit_exprs(fallback, f);
            }
        }
    }
}

/// Collect the names of every variable an expression references,
/// including inside predicates and nested calls. Used for global
/// dependency ordering.
pub fn expr_variable_refs(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Literal(_) | Expr::Number(_) => {}
        Expr::Variable(name) => {
            if !out.iter().any(|n| n == name) {
                out.push(name.clone());
            }
        }
        Expr::Negate(inner) => expr_variable_refs(inner, out),
        Expr::Binary { left, right, .. } => {
            expr_variable_refs(left, out);
            expr_variable_refs(right, out);
        }
        Expr::FunctionCall { args, .. } => {
            for arg in args {
                expr_variable_refs(arg, out);
            }
        }
        Expr::Path(path) => {
            if let Some(start) = &path.start {
                expr_variable_refs(start, out);
            }
            for step in &path.steps {
                for pred in &step.predicates {
                    expr_variable_refs(pred, out);
                }
            }
        }
        Expr::Filter { base, predicates } => {
            expr_variable_refs(base, out);
            for pred in predicates {
                expr_variable_refs(pred, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xsltc_xpath::parse_expression;

    #[test]
    fn test_constant_text_detection() {
        let body = Body(vec![
            XsltInstruction::Text("a".to_string()),
            XsltInstruction::Text("b".to_string()),
        ]);
        assert_eq!(body.constant_text().as_deref(), Some("ab"));

        let dynamic = Body(vec![XsltInstruction::ValueOf {
            select: parse_expression(".").unwrap(),
        }]);
        assert_eq!(dynamic.constant_text(), None);
    }

    #[test]
    fn test_variable_ref_collection() {
        let expr = parse_expression("$a + count(item[@id = $b])").unwrap();
        let mut refs = Vec::new();
        expr_variable_refs(&expr, &mut refs);
        assert_eq!(refs, vec!["a".to_string(), "b".to_string()]);
    }
}
