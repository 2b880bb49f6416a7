//! Reading one stylesheet document into declarations and instruction
//! trees.
//!
//! Structural problems (a missing required attribute, a stray `xsl:when`)
//! abort the sheet; merely unsupported declarations like `xsl:output`
//! are reported as warnings and skipped.

use roxmltree::{Document, Node};

use crate::error::{CompileError, ErrorReporter, Location};
use crate::instr::{
    Body, KeyDecl, SortDataType, SortKey, SortOrder, VarValue, When, WithParam, XsltInstruction,
};
use crate::stylesheet::{AttributeSet, GlobalDecl, Template};
use xsltc_xpath::{parse_avt, parse_expression, parse_pattern};

pub const XSL_NS: &str = "http://www.w3.org/1999/XSL/Transform";

/// One document's declarations, before import precedence is known.
#[derive(Debug, Default)]
pub struct ParsedSheet {
    pub imports: Vec<String>,
    pub includes: Vec<String>,
    pub templates: Vec<Template>,
    pub globals: Vec<GlobalDecl>,
    pub keys: Vec<KeyDecl>,
    pub attribute_sets: Vec<(String, AttributeSet)>,
}

pub fn parse_stylesheet(
    source: &str,
    reporter: &mut ErrorReporter,
) -> Result<ParsedSheet, CompileError> {
    let doc = Document::parse(source)?;
    let root = doc.root_element();
    let mut reader = Reader {
        doc: &doc,
        reporter,
    };

    if is_xsl(root, "stylesheet") || is_xsl(root, "transform") {
        match root.attribute("version") {
            None => reader
                .reporter
                .warning("stylesheet has no version attribute", Some(reader.location(root))),
            Some("1.0") => {}
            Some(other) => reader.reporter.warning(
                format!("stylesheet version {other} treated as 1.0"),
                Some(reader.location(root)),
            ),
        }
        reader.parse_top_level(root)
    } else {
        // Simplified syntax: the document element is the body of a
        // template matching the root.
        let location = reader.location(root);
        let body = Body(vec![reader.parse_literal_element(root)?]);
        let mut sheet = ParsedSheet::default();
        sheet.templates.push(Template {
            name: None,
            pattern: Some(parse_pattern("/")?),
            mode: None,
            priority: None,
            params: Vec::new(),
            body,
            precedence: 0,
            position: 0,
            location,
        });
        Ok(sheet)
    }
}

fn is_xsl(node: Node<'_, '_>, name: &str) -> bool {
    node.is_element()
        && node.tag_name().namespace() == Some(XSL_NS)
        && node.tag_name().name() == name
}

fn xsl_name<'a>(node: Node<'a, '_>) -> Option<&'a str> {
    if node.is_element() && node.tag_name().namespace() == Some(XSL_NS) {
        Some(node.tag_name().name())
    } else {
        None
    }
}

fn split_names(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

struct Reader<'a, 'input> {
    doc: &'a Document<'input>,
    reporter: &'a mut ErrorReporter,
}

impl<'a, 'input> Reader<'a, 'input> {
    fn location(&self, node: Node<'_, '_>) -> Location {
        let pos = self.doc.text_pos_at(node.range().start);
        Location {
            line: pos.row,
            col: pos.col,
        }
    }

    fn structure(&self, node: Node<'_, '_>, message: impl Into<String>) -> CompileError {
        CompileError::Structure {
            message: message.into(),
            location: self.location(node),
        }
    }

    fn required_attr(&self, node: Node<'a, 'input>, name: &str) -> Result<&'a str, CompileError> {
        node.attribute(name).ok_or_else(|| {
            self.structure(
                node,
                format!("xsl:{} requires a {name} attribute", node.tag_name().name()),
            )
        })
    }

    fn parse_top_level(&mut self, root: Node<'a, 'input>) -> Result<ParsedSheet, CompileError> {
        let mut sheet = ParsedSheet::default();
        let mut imports_done = false;
        for child in root.children() {
            if child.is_text() {
                if !child.text().unwrap_or("").trim().is_empty() {
                    return Err(self.structure(child, "text is not allowed at the top level"));
                }
                continue;
            }
            if !child.is_element() {
                continue;
            }
            let Some(name) = xsl_name(child) else {
                if child.tag_name().namespace().is_none() {
                    self.reporter.warning(
                        format!(
                            "ignoring top-level element '{}' in no namespace",
                            child.tag_name().name()
                        ),
                        Some(self.location(child)),
                    );
                }
                continue;
            };
            if name != "import" {
                imports_done = true;
            }
            match name {
                "import" => {
                    if imports_done {
                        return Err(self.structure(
                            child,
                            "xsl:import must precede every other declaration",
                        ));
                    }
                    sheet
                        .imports
                        .push(self.required_attr(child, "href")?.to_string());
                }
                "include" => {
                    sheet
                        .includes
                        .push(self.required_attr(child, "href")?.to_string());
                }
                "template" => sheet.templates.push(self.parse_template(child)?),
                "variable" | "param" => {
                    let value = self.parse_value(child)?;
                    sheet.globals.push(GlobalDecl {
                        name: self.required_attr(child, "name")?.to_string(),
                        value: if name == "variable" {
                            // A variable with no select and no content is
                            // the empty string.
                            Some(value.unwrap_or(VarValue::Tree(Body::default())))
                        } else {
                            value
                        },
                        is_param: name == "param",
                        precedence: 0,
                        position: 0,
                        location: self.location(child),
                    });
                }
                "key" => {
                    sheet.keys.push(KeyDecl {
                        name: self.required_attr(child, "name")?.to_string(),
                        pattern: parse_pattern(self.required_attr(child, "match")?)?,
                        use_expr: parse_expression(self.required_attr(child, "use")?)?,
                        location: self.location(child),
                    });
                }
                "attribute-set" => {
                    let set_name = self.required_attr(child, "name")?.to_string();
                    sheet
                        .attribute_sets
                        .push((set_name, self.parse_attribute_set(child)?));
                }
                "output" | "strip-space" | "preserve-space" | "decimal-format"
                | "namespace-alias" => {
                    self.reporter.warning(
                        format!("xsl:{name} is not supported and was ignored"),
                        Some(self.location(child)),
                    );
                }
                other => {
                    self.reporter.warning(
                        format!("unknown top-level element xsl:{other} was ignored"),
                        Some(self.location(child)),
                    );
                }
            }
        }
        Ok(sheet)
    }

    fn parse_template(&mut self, node: Node<'a, 'input>) -> Result<Template, CompileError> {
        let name = node.attribute("name").map(str::to_string);
        let pattern = node.attribute("match").map(parse_pattern).transpose()?;
        if name.is_none() && pattern.is_none() {
            return Err(self.structure(node, "xsl:template requires a match pattern or a name"));
        }
        let priority = node
            .attribute("priority")
            .map(|p| {
                p.parse::<f64>()
                    .map_err(|_| self.structure(node, format!("invalid priority '{p}'")))
            })
            .transpose()?;

        let mut params = Vec::new();
        let mut instructions = Vec::new();
        let mut in_params = true;
        for child in node.children() {
            if in_params && is_xsl(child, "param") {
                let param_name = self.required_attr(child, "name")?.to_string();
                params.push((param_name, self.parse_value(child)?));
                continue;
            }
            if child.is_element() || !child.text().unwrap_or("").trim().is_empty() {
                in_params = false;
            }
            self.parse_node(child, &mut instructions)?;
        }

        Ok(Template {
            name,
            pattern,
            mode: node.attribute("mode").map(str::to_string),
            priority,
            params,
            body: Body(instructions),
            precedence: 0,
            position: 0,
            location: self.location(node),
        })
    }

    fn parse_attribute_set(
        &mut self,
        node: Node<'a, 'input>,
    ) -> Result<AttributeSet, CompileError> {
        let mut attributes = Vec::new();
        for child in node.children() {
            if child.is_text() && child.text().unwrap_or("").trim().is_empty() {
                continue;
            }
            if !is_xsl(child, "attribute") {
                return Err(
                    self.structure(child, "xsl:attribute-set may only contain xsl:attribute")
                );
            }
            let attr_name = parse_avt(self.required_attr(child, "name")?)?;
            attributes.push((attr_name, self.parse_body(child)?));
        }
        Ok(AttributeSet {
            attributes,
            use_sets: node
                .attribute("use-attribute-sets")
                .map(split_names)
                .unwrap_or_default(),
            location: self.location(node),
        })
    }

    /// The value of a variable-like element: `select` wins over content.
    fn parse_value(&mut self, node: Node<'a, 'input>) -> Result<Option<VarValue>, CompileError> {
        if let Some(select) = node.attribute("select") {
            if node.children().any(|c| c.is_element()) {
                self.reporter.warning(
                    format!(
                        "content of xsl:{} ignored because it has a select attribute",
                        node.tag_name().name()
                    ),
                    Some(self.location(node)),
                );
            }
            return Ok(Some(VarValue::Select(parse_expression(select)?)));
        }
        let body = self.parse_body(node)?;
        if body.0.is_empty() {
            Ok(None)
        } else {
            Ok(Some(VarValue::Tree(body)))
        }
    }

    fn parse_body(&mut self, node: Node<'a, 'input>) -> Result<Body, CompileError> {
        let mut instructions = Vec::new();
        for child in node.children() {
            self.parse_node(child, &mut instructions)?;
        }
        Ok(Body(instructions))
    }

    fn parse_node(
        &mut self,
        node: Node<'a, 'input>,
        out: &mut Vec<XsltInstruction>,
    ) -> Result<(), CompileError> {
        if node.is_text() {
            let text = node.text().unwrap_or("");
            if !text.trim().is_empty() {
                out.push(XsltInstruction::Text(text.to_string()));
            }
            return Ok(());
        }
        if !node.is_element() {
            return Ok(());
        }
        let Some(name) = xsl_name(node) else {
            out.push(self.parse_literal_element(node)?);
            return Ok(());
        };
        match name {
            "text" => {
                // Inside xsl:text even pure whitespace is significant.
                out.push(XsltInstruction::Text(
                    node.text().unwrap_or("").to_string(),
                ));
            }
            "value-of" => {
                out.push(XsltInstruction::ValueOf {
                    select: parse_expression(self.required_attr(node, "select")?)?,
                });
            }
            "if" => {
                out.push(XsltInstruction::If {
                    test: parse_expression(self.required_attr(node, "test")?)?,
                    body: self.parse_body(node)?,
                });
            }
            "choose" => out.push(self.parse_choose(node)?),
            "for-each" => {
                let select = parse_expression(self.required_attr(node, "select")?)?;
                let (sorts, body) = self.parse_sorted_body(node)?;
                out.push(XsltInstruction::ForEach {
                    select,
                    sorts,
                    body,
                });
            }
            "apply-templates" => {
                let select = node
                    .attribute("select")
                    .map(parse_expression)
                    .transpose()?;
                let (sorts, params) = self.parse_invocation_children(node)?;
                out.push(XsltInstruction::ApplyTemplates {
                    select,
                    mode: node.attribute("mode").map(str::to_string),
                    sorts,
                    params,
                });
            }
            "apply-imports" => out.push(XsltInstruction::ApplyImports),
            "call-template" => {
                let (sorts, params) = self.parse_invocation_children(node)?;
                if !sorts.is_empty() {
                    return Err(self.structure(node, "xsl:call-template cannot contain xsl:sort"));
                }
                out.push(XsltInstruction::CallTemplate {
                    name: self.required_attr(node, "name")?.to_string(),
                    params,
                    location: self.location(node),
                });
            }
            "variable" => {
                let value = self
                    .parse_value(node)?
                    .unwrap_or(VarValue::Tree(Body::default()));
                out.push(XsltInstruction::LocalVariable {
                    name: self.required_attr(node, "name")?.to_string(),
                    value,
                });
            }
            "param" => {
                return Err(self.structure(
                    node,
                    "xsl:param is only allowed at the start of a template",
                ));
            }
            "element" => {
                out.push(XsltInstruction::Element {
                    name: parse_avt(self.required_attr(node, "name")?)?,
                    use_attribute_sets: node
                        .attribute("use-attribute-sets")
                        .map(split_names)
                        .unwrap_or_default(),
                    body: self.parse_body(node)?,
                });
            }
            "attribute" => {
                out.push(XsltInstruction::Attribute {
                    name: parse_avt(self.required_attr(node, "name")?)?,
                    body: self.parse_body(node)?,
                });
            }
            "comment" => out.push(XsltInstruction::Comment {
                body: self.parse_body(node)?,
            }),
            "processing-instruction" => {
                out.push(XsltInstruction::ProcessingInstruction {
                    name: parse_avt(self.required_attr(node, "name")?)?,
                    body: self.parse_body(node)?,
                });
            }
            "message" => out.push(XsltInstruction::Message {
                body: self.parse_body(node)?,
                terminate: node.attribute("terminate") == Some("yes"),
            }),
            "copy" => out.push(XsltInstruction::Copy {
                use_attribute_sets: node
                    .attribute("use-attribute-sets")
                    .map(split_names)
                    .unwrap_or_default(),
                body: self.parse_body(node)?,
            }),
            "copy-of" => out.push(XsltInstruction::CopyOf {
                select: parse_expression(self.required_attr(node, "select")?)?,
            }),
            "sort" => {
                return Err(self.structure(
                    node,
                    "xsl:sort is only allowed at the start of xsl:for-each or xsl:apply-templates",
                ));
            }
            "with-param" => {
                return Err(self.structure(
                    node,
                    "xsl:with-param is only allowed in xsl:apply-templates or xsl:call-template",
                ));
            }
            "fallback" => {}
            other => {
                let mut fallbacks = Vec::new();
                for child in node.children() {
                    if is_xsl(child, "fallback") {
                        fallbacks.push(self.parse_body(child)?);
                    }
                }
                out.push(XsltInstruction::Unsupported {
                    name: format!("xsl:{other}"),
                    fallbacks,
                    location: self.location(node),
                });
            }
        }
        Ok(())
    }

    fn parse_choose(&mut self, node: Node<'a, 'input>) -> Result<XsltInstruction, CompileError> {
        let mut whens = Vec::new();
        let mut otherwise: Option<Body> = None;
        for child in node.children() {
            if child.is_text() {
                if !child.text().unwrap_or("").trim().is_empty() {
                    return Err(self.structure(child, "text is not allowed inside xsl:choose"));
                }
                continue;
            }
            if !child.is_element() {
                continue;
            }
            if is_xsl(child, "when") {
                if otherwise.is_some() {
                    return Err(self.structure(child, "xsl:when after xsl:otherwise"));
                }
                whens.push(When {
                    test: parse_expression(self.required_attr(child, "test")?)?,
                    body: self.parse_body(child)?,
                });
            } else if is_xsl(child, "otherwise") {
                if otherwise.is_some() {
                    return Err(self.structure(child, "multiple xsl:otherwise branches"));
                }
                otherwise = Some(self.parse_body(child)?);
            } else {
                return Err(self.structure(
                    child,
                    "xsl:choose may only contain xsl:when and xsl:otherwise",
                ));
            }
        }
        if whens.is_empty() {
            return Err(self.structure(node, "xsl:choose requires at least one xsl:when"));
        }
        Ok(XsltInstruction::Choose { whens, otherwise })
    }

    /// Leading `xsl:sort` children, then the remaining body.
    fn parse_sorted_body(
        &mut self,
        node: Node<'a, 'input>,
    ) -> Result<(Vec<SortKey>, Body), CompileError> {
        let mut sorts = Vec::new();
        let mut instructions = Vec::new();
        let mut in_sorts = true;
        for child in node.children() {
            if in_sorts && is_xsl(child, "sort") {
                sorts.push(self.parse_sort(child)?);
                continue;
            }
            if child.is_element() || !child.text().unwrap_or("").trim().is_empty() {
                in_sorts = false;
            }
            self.parse_node(child, &mut instructions)?;
        }
        Ok((sorts, Body(instructions)))
    }

    /// `xsl:sort` and `xsl:with-param` children of an invocation.
    fn parse_invocation_children(
        &mut self,
        node: Node<'a, 'input>,
    ) -> Result<(Vec<SortKey>, Vec<WithParam>), CompileError> {
        let mut sorts = Vec::new();
        let mut params = Vec::new();
        for child in node.children() {
            if child.is_text() {
                if !child.text().unwrap_or("").trim().is_empty() {
                    return Err(self.structure(
                        child,
                        format!("text is not allowed inside xsl:{}", node.tag_name().name()),
                    ));
                }
                continue;
            }
            if !child.is_element() {
                continue;
            }
            if is_xsl(child, "sort") {
                sorts.push(self.parse_sort(child)?);
            } else if is_xsl(child, "with-param") {
                let name = self.required_attr(child, "name")?.to_string();
                let value = self
                    .parse_value(child)?
                    .unwrap_or(VarValue::Tree(Body::default()));
                params.push(WithParam { name, value });
            } else {
                return Err(self.structure(
                    child,
                    format!(
                        "xsl:{} may only contain xsl:sort and xsl:with-param",
                        node.tag_name().name()
                    ),
                ));
            }
        }
        Ok((sorts, params))
    }

    fn parse_sort(&mut self, node: Node<'a, 'input>) -> Result<SortKey, CompileError> {
        let select = match node.attribute("select") {
            Some(s) => parse_expression(s)?,
            None => parse_expression(".")?,
        };
        let order = match node.attribute("order") {
            None | Some("ascending") => SortOrder::Ascending,
            Some("descending") => SortOrder::Descending,
            Some(other) => {
                self.reporter.warning(
                    format!("unsupported sort order '{other}', using ascending"),
                    Some(self.location(node)),
                );
                SortOrder::Ascending
            }
        };
        let data_type = match node.attribute("data-type") {
            None | Some("text") => SortDataType::Text,
            Some("number") => SortDataType::Number,
            Some(other) => {
                self.reporter.warning(
                    format!("unsupported sort data-type '{other}', using text"),
                    Some(self.location(node)),
                );
                SortDataType::Text
            }
        };
        Ok(SortKey {
            select,
            order,
            data_type,
        })
    }

    fn parse_literal_element(
        &mut self,
        node: Node<'a, 'input>,
    ) -> Result<XsltInstruction, CompileError> {
        let name = self.qualified_name(node);
        let mut attrs = Vec::new();
        let mut use_sets = Vec::new();
        for attr in node.attributes() {
            if attr.namespace() == Some(XSL_NS) {
                match attr.name() {
                    "use-attribute-sets" => use_sets = split_names(attr.value()),
                    "version" | "extension-element-prefixes" | "exclude-result-prefixes" => {}
                    other => self.reporter.warning(
                        format!("ignoring attribute xsl:{other} on a literal result element"),
                        Some(self.location(node)),
                    ),
                }
                continue;
            }
            attrs.push((attr.name().to_string(), parse_avt(attr.value())?));
        }
        Ok(XsltInstruction::LiteralElement {
            name,
            attrs,
            use_attribute_sets: use_sets,
            body: self.parse_body(node)?,
        })
    }

    fn qualified_name(&self, node: Node<'_, '_>) -> String {
        let tag = node.tag_name();
        match tag.namespace().and_then(|ns| node.lookup_prefix(ns)) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}:{}", tag.name()),
            _ => tag.name().to_string(),
        }
    }
}
