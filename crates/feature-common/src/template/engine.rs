//! Template engine for manifest rendering

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

use super::error::TemplateError;
use super::filters;

/// Template engine with strict undefined handling and the manifest helpers
/// registered as both filters and functions
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Create a new template engine
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);

        env.add_filter("replace_char", filters::replace_char);
        env.add_function("replace_char", filters::replace_char);
        env.add_filter("base64_encode", filters::base64_encode);
        env.add_filter("base64_decode", filters::base64_decode);
        env.add_filter("required", filters::required);

        Self { env }
    }

    /// Render a template string with the given context
    ///
    /// # Errors
    ///
    /// Returns `TemplateError` if the template syntax is invalid, a referenced
    /// variable is undefined, or a filter fails.
    pub fn render<C: Serialize>(&self, template: &str, ctx: &C) -> Result<String, TemplateError> {
        self.env
            .render_str(template, ctx)
            .map_err(TemplateError::from)
    }
}
