//! Template error types

use std::fmt;

/// Errors that can occur during template operations
#[derive(Debug)]
pub enum TemplateError {
    /// Template rendering failed
    Render(minijinja::Error),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Render(e) => write!(f, "template render error: {:#}", e),
        }
    }
}

impl std::error::Error for TemplateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Render(e) => Some(e),
        }
    }
}

impl From<minijinja::Error> for TemplateError {
    fn from(err: minijinja::Error) -> Self {
        Self::Render(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use minijinja::ErrorKind;

    #[test]
    fn test_render_error_display() {
        let err = TemplateError::from(minijinja::Error::new(
            ErrorKind::UndefinedError,
            "Namespace is undefined",
        ));
        assert!(err.to_string().starts_with("template render error"));
        assert!(err.to_string().contains("Namespace is undefined"));
    }
}
