use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Unresolved type `{type_name}` for {context}")]
    UnresolvedType { type_name: String, context: String },

    #[error("Cyclic structure: nesting exceeded {limit} levels")]
    CyclicStructure { limit: usize },

    #[error("Missing identity: `{type_name}` has no populated `_id` member")]
    MissingIdentity { type_name: String },

    #[error("Build failed with {} error(s)", count_errors(.diagnostics))]
    BuildFailed { diagnostics: Vec<Diagnostic> },

    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DriverError>;

/// Severity of a build diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Note,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Note => f.write_str("note"),
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

/// A single message produced while building an access layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// Source unit or file the diagnostic points at, when known.
    pub file: Option<String>,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            file: None,
            line: None,
            column: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(message)
        }
    }

    pub fn at(mut self, file: impl Into<String>, line: usize, column: usize) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        match (&self.file, self.line, self.column) {
            (Some(file), Some(line), Some(column)) => write!(f, " --> {file}:{line}:{column}"),
            (Some(file), _, _) => write!(f, " --> {file}"),
            _ => Ok(()),
        }
    }
}

fn count_errors(diagnostics: &[Diagnostic]) -> usize {
    diagnostics.iter().filter(|d| d.is_error()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_display_with_location() {
        let diag = Diagnostic::error("cannot find type `Foo`").at("src/ctx.rs", 12, 5);
        assert_eq!(
            diag.to_string(),
            "error: cannot find type `Foo` --> src/ctx.rs:12:5"
        );
    }

    #[test]
    fn test_build_failed_counts_only_errors() {
        let err = DriverError::BuildFailed {
            diagnostics: vec![
                Diagnostic::warning("unused import"),
                Diagnostic::error("mismatched types"),
                Diagnostic::error("unresolved import"),
            ],
        };
        assert_eq!(err.to_string(), "Build failed with 2 error(s)");
    }
}
