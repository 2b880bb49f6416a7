//! The signature table for the XPath core function library, plus the
//! capability answers behind `function-available()` and
//! `element-available()`.

use std::collections::HashMap;

use crate::types::Type;

/// Identity of a supported built-in function, assigned during type
/// checking and mapped to runtime calls during translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreFn {
    Count,
    Sum,
    Name,
    StringLength,
    Concat,
    Contains,
    StartsWith,
    Substring,
    SubstringBefore,
    SubstringAfter,
    NormalizeSpace,
    Translate,
    Floor,
    Ceiling,
    Round,
    Lang,
    GenerateId,
    Key,
    Id,
}

/// Parameter discipline of a function signature.
#[derive(Debug, Clone, Copy)]
pub enum Params {
    Fixed(&'static [Type]),
    /// Required parameters followed by optional ones. A missing optional
    /// defaults to the context node, converted to the parameter type.
    Optional {
        required: &'static [Type],
        optional: &'static [Type],
    },
    /// At least `min` parameters, all of one type.
    Variadic { min: usize, each: Type },
}

#[derive(Debug, Clone, Copy)]
pub struct FnDecl {
    pub func: CoreFn,
    pub params: Params,
    pub ret: Type,
}

/// The compile-time symbol table: core-function signatures and the sets of
/// names the capability probes answer for.
#[derive(Debug)]
pub struct SymbolTable {
    functions: HashMap<&'static str, FnDecl>,
}

/// Function names answered `true` by `function-available()` that are not
/// ordinary table entries (they are rewritten during type checking).
const SPECIAL_FUNCTIONS: &[&str] = &[
    "boolean",
    "string",
    "number",
    "not",
    "true",
    "false",
    "position",
    "last",
    "current",
    "function-available",
    "element-available",
];

/// Instruction names answered `true` by `element-available()`.
const AVAILABLE_ELEMENTS: &[&str] = &[
    "apply-imports",
    "apply-templates",
    "attribute",
    "call-template",
    "choose",
    "comment",
    "copy",
    "copy-of",
    "element",
    "for-each",
    "if",
    "message",
    "otherwise",
    "param",
    "processing-instruction",
    "text",
    "value-of",
    "variable",
    "when",
];

impl SymbolTable {
    pub fn core() -> Self {
        use CoreFn::*;
        use Type::*;
        let mut functions = HashMap::new();
        let mut decl = |name, func, params, ret| {
            functions.insert(name, FnDecl { func, params, ret });
        };

        decl("count", Count, Params::Fixed(&[NodeSet]), Int);
        decl("sum", Sum, Params::Fixed(&[NodeSet]), Real);
        decl(
            "name",
            Name,
            Params::Optional {
                required: &[],
                optional: &[NodeSet],
            },
            String,
        );
        decl(
            "string-length",
            StringLength,
            Params::Optional {
                required: &[],
                optional: &[String],
            },
            Int,
        );
        decl(
            "concat",
            Concat,
            Params::Variadic {
                min: 2,
                each: String,
            },
            String,
        );
        decl(
            "contains",
            Contains,
            Params::Fixed(&[String, String]),
            Boolean,
        );
        decl(
            "starts-with",
            StartsWith,
            Params::Fixed(&[String, String]),
            Boolean,
        );
        decl(
            "substring",
            Substring,
            Params::Optional {
                required: &[String, Real],
                optional: &[Real],
            },
            String,
        );
        decl(
            "substring-before",
            SubstringBefore,
            Params::Fixed(&[String, String]),
            String,
        );
        decl(
            "substring-after",
            SubstringAfter,
            Params::Fixed(&[String, String]),
            String,
        );
        decl(
            "normalize-space",
            NormalizeSpace,
            Params::Optional {
                required: &[],
                optional: &[String],
            },
            String,
        );
        decl(
            "translate",
            Translate,
            Params::Fixed(&[String, String, String]),
            String,
        );
        decl("floor", Floor, Params::Fixed(&[Real]), Real);
        decl("ceiling", Ceiling, Params::Fixed(&[Real]), Real);
        decl("round", Round, Params::Fixed(&[Real]), Real);
        decl("lang", Lang, Params::Fixed(&[String]), Boolean);
        decl(
            "generate-id",
            GenerateId,
            Params::Optional {
                required: &[],
                optional: &[NodeSet],
            },
            String,
        );
        decl("key", Key, Params::Fixed(&[String, String]), NodeSet);
        decl("id", Id, Params::Fixed(&[String]), NodeSet);

        SymbolTable { functions }
    }

    pub fn function(&self, name: &str) -> Option<&FnDecl> {
        self.functions.get(name)
    }

    /// Answer for `function-available('name')`, folded to a constant at
    /// compile time.
    pub fn function_available(&self, name: &str) -> bool {
        // Prefixed names are extension functions, none of which exist.
        if name.contains(':') {
            return false;
        }
        self.functions.contains_key(name) || SPECIAL_FUNCTIONS.contains(&name)
    }

    /// Answer for `element-available('name')`, folded to a constant at
    /// compile time. Only names in the XSLT namespace can be available.
    pub fn element_available(&self, name: &str) -> bool {
        let local = match name.split_once(':') {
            Some((_, local)) => local,
            None => name,
        };
        AVAILABLE_ELEMENTS.contains(&local)
    }
}
