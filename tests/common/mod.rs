use std::collections::HashMap;

use xsltc::{CompileError, StylesheetLoader};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn wrap(body: &str) -> String {
    format!(
        r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">{body}</xsl:stylesheet>"#
    )
}

/// An in-memory loader for import/include tests.
pub struct MapLoader(pub HashMap<String, String>);

impl MapLoader {
    pub fn new(entries: &[(&str, String)]) -> Self {
        MapLoader(
            entries
                .iter()
                .map(|(href, text)| (href.to_string(), text.clone()))
                .collect(),
        )
    }
}

impl StylesheetLoader for MapLoader {
    fn load(&self, href: &str) -> Result<String, CompileError> {
        self.0
            .get(href)
            .cloned()
            .ok_or_else(|| CompileError::Loader {
                href: href.to_string(),
                message: "not found".to_string(),
            })
    }
}
