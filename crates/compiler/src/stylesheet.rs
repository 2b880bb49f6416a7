//! The stylesheet model: top-level declarations gathered across the
//! import tree, with import precedence assigned per sheet.
//!
//! Precedence numbering follows the import tree bottom-up: a sheet's
//! imports are loaded first and get lower numbers, the importing sheet
//! itself a higher one. Included sheets dissolve into the including
//! sheet and share its precedence.

use std::collections::HashMap;

use crate::error::{CompileError, ErrorReporter, Location};
use crate::instr::{self, Body, KeyDecl, VarValue};
use crate::reader::{self, ParsedSheet};
use xsltc_xpath::{Avt, Pattern};

#[derive(Debug)]
pub struct Template {
    pub name: Option<String>,
    pub pattern: Option<Pattern>,
    pub mode: Option<String>,
    pub priority: Option<f64>,
    /// Declared parameters in order, with optional defaults.
    pub params: Vec<(String, Option<VarValue>)>,
    pub body: Body,
    pub precedence: usize,
    /// Declaration order across the whole import tree.
    pub position: usize,
    pub location: Location,
}

#[derive(Debug)]
pub struct GlobalDecl {
    pub name: String,
    /// `None` for a parameter with no default.
    pub value: Option<VarValue>,
    pub is_param: bool,
    pub precedence: usize,
    pub position: usize,
    pub location: Location,
}

#[derive(Debug)]
pub struct AttributeSet {
    pub attributes: Vec<(Avt, Body)>,
    pub use_sets: Vec<String>,
    pub location: Location,
}

/// Resolves `xsl:import`/`xsl:include` references to stylesheet text.
pub trait StylesheetLoader {
    fn load(&self, href: &str) -> Result<String, CompileError>;
}

/// The default loader: refuses every reference.
pub struct NoLoader;

impl StylesheetLoader for NoLoader {
    fn load(&self, href: &str) -> Result<String, CompileError> {
        Err(CompileError::Loader {
            href: href.to_string(),
            message: "no stylesheet loader configured".to_string(),
        })
    }
}

/// Every declaration of the import tree, flattened.
#[derive(Debug, Default)]
pub struct Stylesheet {
    pub templates: Vec<Template>,
    pub globals: Vec<GlobalDecl>,
    pub keys: Vec<KeyDecl>,
    pub attribute_sets: HashMap<String, AttributeSet>,
    /// The precedence of the outermost sheet, the highest assigned.
    pub top_precedence: usize,
}

pub fn load_stylesheet(
    source: &str,
    loader: &dyn StylesheetLoader,
    reporter: &mut ErrorReporter,
) -> Result<Stylesheet, CompileError> {
    let mut sheet = Stylesheet::default();
    let mut state = LoadState {
        loader,
        next_precedence: 0,
        next_position: 0,
        loading: Vec::new(),
    };
    sheet.top_precedence = load_tree(source, &mut state, &mut sheet, reporter)?;
    Ok(sheet)
}

struct LoadState<'a> {
    loader: &'a dyn StylesheetLoader,
    next_precedence: usize,
    next_position: usize,
    loading: Vec<String>,
}

fn load_tree(
    source: &str,
    state: &mut LoadState<'_>,
    sheet: &mut Stylesheet,
    reporter: &mut ErrorReporter,
) -> Result<usize, CompileError> {
    let mut parsed = reader::parse_stylesheet(source, reporter)?;
    resolve_includes(&mut parsed, state, reporter)?;

    for href in std::mem::take(&mut parsed.imports) {
        enter(state, &href)?;
        let text = state.loader.load(&href)?;
        load_tree(&text, state, sheet, reporter)?;
        state.loading.pop();
    }

    let precedence = state.next_precedence;
    state.next_precedence += 1;

    for mut template in parsed.templates {
        template.precedence = precedence;
        template.position = state.next_position;
        state.next_position += 1;
        sheet.templates.push(template);
    }
    for mut global in parsed.globals {
        global.precedence = precedence;
        global.position = state.next_position;
        state.next_position += 1;
        sheet.globals.push(global);
    }
    sheet.keys.extend(parsed.keys);
    for (name, set) in parsed.attribute_sets {
        // Later definitions of an attribute set extend earlier ones.
        match sheet.attribute_sets.get_mut(&name) {
            Some(existing) => {
                existing.attributes.extend(set.attributes);
                existing.use_sets.extend(set.use_sets);
            }
            None => {
                sheet.attribute_sets.insert(name, set);
            }
        }
    }
    Ok(precedence)
}

/// Splice every included sheet's declarations into `parsed`. Imports of
/// an included sheet become imports of the including one.
fn resolve_includes(
    parsed: &mut ParsedSheet,
    state: &mut LoadState<'_>,
    reporter: &mut ErrorReporter,
) -> Result<(), CompileError> {
    for href in std::mem::take(&mut parsed.includes) {
        enter(state, &href)?;
        let text = state.loader.load(&href)?;
        let mut inner = reader::parse_stylesheet(&text, reporter)?;
        resolve_includes(&mut inner, state, reporter)?;
        state.loading.pop();

        parsed.imports.extend(inner.imports);
        parsed.templates.extend(inner.templates);
        parsed.globals.extend(inner.globals);
        parsed.keys.extend(inner.keys);
        parsed.attribute_sets.extend(inner.attribute_sets);
    }
    Ok(())
}

fn enter(state: &mut LoadState<'_>, href: &str) -> Result<(), CompileError> {
    if state.loading.iter().any(|h| h == href) {
        return Err(CompileError::Loader {
            href: href.to_string(),
            message: "circular import or include".to_string(),
        });
    }
    state.loading.push(href.to_string());
    Ok(())
}

/// Resolve shadowing between same-named globals: the highest precedence
/// wins; two at the same precedence are a redefinition. The survivors
/// come back in declaration order.
pub fn effective_globals(globals: &[GlobalDecl]) -> Result<Vec<&GlobalDecl>, CompileError> {
    let mut by_name: HashMap<&str, &GlobalDecl> = HashMap::new();
    for global in globals {
        match by_name.get(global.name.as_str()) {
            Some(existing) if existing.precedence == global.precedence => {
                return Err(CompileError::Redefinition {
                    what: "global variable",
                    name: global.name.clone(),
                });
            }
            Some(existing) if existing.precedence > global.precedence => {}
            _ => {
                by_name.insert(&global.name, global);
            }
        }
    }
    let mut survivors: Vec<&GlobalDecl> = by_name.into_values().collect();
    survivors.sort_by_key(|g| g.position);
    Ok(survivors)
}

/// Order globals so that every one is emitted after the globals its
/// value reads. Kahn's algorithm; a leftover node means a reference
/// cycle.
pub fn order_globals<'a>(
    globals: Vec<&'a GlobalDecl>,
) -> Result<Vec<&'a GlobalDecl>, CompileError> {
    let index: HashMap<&str, usize> = globals
        .iter()
        .enumerate()
        .map(|(i, g)| (g.name.as_str(), i))
        .collect();

    let mut deps: Vec<Vec<usize>> = vec![Vec::new(); globals.len()];
    let mut pending: Vec<usize> = vec![0; globals.len()];
    for (i, global) in globals.iter().enumerate() {
        for name in value_variable_refs(global.value.as_ref()) {
            if let Some(&dep) = index.get(name.as_str()) {
                if dep != i {
                    deps[dep].push(i);
                    pending[i] += 1;
                }
            }
        }
    }

    let mut ready: Vec<usize> = (0..globals.len()).filter(|&i| pending[i] == 0).collect();
    // Among independent globals, keep declaration order.
    ready.sort_by_key(|&i| std::cmp::Reverse(globals[i].position));

    let mut ordered = Vec::with_capacity(globals.len());
    while let Some(i) = ready.pop() {
        ordered.push(globals[i]);
        for &user in &deps[i] {
            pending[user] -= 1;
            if pending[user] == 0 {
                ready.push(user);
            }
        }
        ready.sort_by_key(|&i| std::cmp::Reverse(globals[i].position));
    }

    if ordered.len() != globals.len() {
        let stuck = (0..globals.len())
            .find(|&i| pending[i] > 0)
            .map(|i| globals[i].name.clone())
            .unwrap_or_default();
        return Err(CompileError::CircularVariable(stuck));
    }
    Ok(ordered)
}

/// Variable names a global's value reads. Top-level values can only see
/// other globals, so every reference counts as a dependency.
fn value_variable_refs(value: Option<&VarValue>) -> Vec<String> {
    let mut names = Vec::new();
    match value {
        Some(VarValue::Select(expr)) => instr::expr_variable_refs(expr, &mut names),
        Some(VarValue::Tree(body)) => {
            instr::visit_exprs(body, &mut |expr| instr::expr_variable_refs(expr, &mut names));
        }
        None => {}
    }
    names.sort();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MapLoader(HashMap<&'static str, &'static str>);

    impl StylesheetLoader for MapLoader {
        fn load(&self, href: &str) -> Result<String, CompileError> {
            self.0
                .get(href)
                .map(|s| s.to_string())
                .ok_or_else(|| CompileError::Loader {
                    href: href.to_string(),
                    message: "not found".to_string(),
                })
        }
    }

    fn sheet_with(imports: &[(&'static str, &'static str)], source: &str) -> Stylesheet {
        let loader = MapLoader(imports.iter().copied().collect());
        let mut reporter = ErrorReporter::new();
        load_stylesheet(source, &loader, &mut reporter).unwrap()
    }

    const WRAP: (&str, &str) = (
        r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">"#,
        "</xsl:stylesheet>",
    );

    fn wrap(body: &str) -> String {
        format!("{}{body}{}", WRAP.0, WRAP.1)
    }

    #[test]
    fn test_imported_templates_get_lower_precedence() {
        let imported = wrap(r#"<xsl:template match="a"><x/></xsl:template>"#);
        let importing = wrap(
            r#"<xsl:import href="lib.xsl"/><xsl:template match="a"><y/></xsl:template>"#,
        );
        let sheet = sheet_with(
            &[("lib.xsl", Box::leak(imported.into_boxed_str()))],
            &importing,
        );
        assert_eq!(sheet.templates.len(), 2);
        assert_eq!(sheet.templates[0].precedence, 0);
        assert_eq!(sheet.templates[1].precedence, 1);
        assert_eq!(sheet.top_precedence, 1);
    }

    #[test]
    fn test_included_templates_share_precedence() {
        let included = wrap(r#"<xsl:template match="b"><x/></xsl:template>"#);
        let including = wrap(
            r#"<xsl:include href="part.xsl"/><xsl:template match="a"><y/></xsl:template>"#,
        );
        let sheet = sheet_with(
            &[("part.xsl", Box::leak(included.into_boxed_str()))],
            &including,
        );
        assert_eq!(sheet.templates.len(), 2);
        assert!(sheet.templates.iter().all(|t| t.precedence == 0));
    }

    #[test]
    fn test_circular_include_is_detected() {
        let a = wrap(r#"<xsl:include href="b.xsl"/>"#);
        let b = wrap(r#"<xsl:include href="a.xsl"/>"#);
        let loader = MapLoader(
            [
                ("a.xsl", Box::leak(a.clone().into_boxed_str()) as &str),
                ("b.xsl", Box::leak(b.into_boxed_str()) as &str),
            ]
            .into_iter()
            .collect(),
        );
        let mut reporter = ErrorReporter::new();
        let err = load_stylesheet(&a, &loader, &mut reporter).unwrap_err();
        assert!(matches!(err, CompileError::Loader { .. }));
    }

    fn global(name: &str, select: Option<&str>, precedence: usize, position: usize) -> GlobalDecl {
        GlobalDecl {
            name: name.to_string(),
            value: select.map(|s| VarValue::Select(xsltc_xpath::parse_expression(s).unwrap())),
            is_param: false,
            precedence,
            position,
            location: Location { line: 1, col: 1 },
        }
    }

    #[test]
    fn test_higher_precedence_global_shadows() {
        let globals = vec![global("x", Some("1"), 0, 0), global("x", Some("2"), 1, 1)];
        let effective = effective_globals(&globals).unwrap();
        assert_eq!(effective.len(), 1);
        assert_eq!(effective[0].precedence, 1);
    }

    #[test]
    fn test_equal_precedence_global_redefinition() {
        let globals = vec![global("x", Some("1"), 0, 0), global("x", Some("2"), 0, 1)];
        let err = effective_globals(&globals).unwrap_err();
        assert!(matches!(
            err,
            CompileError::Redefinition { what: "global variable", .. }
        ));
    }

    #[test]
    fn test_globals_ordered_by_dependency() {
        let globals = vec![
            global("a", Some("$b + 1"), 0, 0),
            global("b", Some("2"), 0, 1),
        ];
        let ordered = order_globals(globals.iter().collect()).unwrap();
        assert_eq!(ordered[0].name, "b");
        assert_eq!(ordered[1].name, "a");
    }

    #[test]
    fn test_global_reference_cycle_is_an_error() {
        let globals = vec![
            global("a", Some("$b"), 0, 0),
            global("b", Some("$a"), 0, 1),
        ];
        let err = order_globals(globals.iter().collect()).unwrap_err();
        assert!(matches!(err, CompileError::CircularVariable(_)));
    }
}
