use anyhow::{Context, Result};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

/// Renders the generated text files. Output is plain text, so values are
/// inserted without HTML escaping.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);
        Self { handlebars }
    }

    pub fn register_template(&mut self, name: &str, template: &str) -> Result<()> {
        self.handlebars
            .register_template_string(name, template)
            .with_context(|| format!("Failed to register template: {name}"))
    }

    pub fn render_registered<T: Serialize>(&self, template_name: &str, data: &T) -> Result<String> {
        debug!("Rendering template: {}", template_name);
        self.handlebars
            .render(template_name, data)
            .with_context(|| format!("Failed to render registered template: {template_name}"))
    }

    pub fn render_string<T: Serialize>(&self, template: &str, data: &T) -> Result<String> {
        self.handlebars
            .render_template(template, data)
            .with_context(|| format!("Failed to render template: {template}"))
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_values_are_not_escaped() {
        let engine = TemplateEngine::new();
        let out = engine
            .render_string("password: {{hash}}", &json!({ "hash": "$6$a/b.c&<d>" }))
            .unwrap();
        assert_eq!(out, "password: $6$a/b.c&<d>");
    }

    #[test]
    fn test_missing_variable_is_an_error() {
        let engine = TemplateEngine::new();
        assert!(engine.render_string("{{missing}}", &json!({})).is_err());
    }

    #[test]
    fn test_registered_template() {
        let mut engine = TemplateEngine::new();
        engine.register_template("greeting", "hello {{name}}\n").unwrap();
        let out = engine.render_registered("greeting", &json!({ "name": "world" })).unwrap();
        assert_eq!(out, "hello world\n");
    }
}
