//! Manifest templating built on minijinja
//!
//! Templates use the default `{{ ... }}` / `{% ... %}` syntax and are rendered
//! against a feature's data bag. Undefined variables are errors.

mod engine;
mod error;
pub mod filters;

pub use engine::TemplateEngine;
pub use error::TemplateError;
