//! Error types for tel

use std::fmt;

/// Errors that can occur while loading taxonomy definitions
#[derive(Debug)]
pub enum ParseError {
    /// IO error reading file
    Io {
        path: String,
        source: std::io::Error,
    },
    /// YAML deserialization error
    Yaml {
        source: serde_yaml::Error,
    },
    /// A taxon definition violates a model invariant
    Taxon {
        slug: String,
        message: String,
    },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Io { path, source } => {
                write!(f, "Failed to read '{}': {}", path, source)
            }
            ParseError::Yaml { source } => {
                write!(f, "Invalid YAML: {}", source)
            }
            ParseError::Taxon { slug, message } => {
                write!(f, "Invalid taxon '{}': {}", slug, message)
            }
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::Io { source, .. } => Some(source),
            ParseError::Yaml { source } => Some(source),
            ParseError::Taxon { .. } => None,
        }
    }
}

impl From<serde_yaml::Error> for ParseError {
    fn from(err: serde_yaml::Error) -> Self {
        ParseError::Yaml { source: err }
    }
}

/// Errors produced while compiling a TEL expression
#[derive(Debug)]
pub enum CompileError {
    /// The expression text could not be parsed
    Syntax {
        message: String,
        position: usize,
        line: usize,
        expression: String,
    },
    /// One or more validation errors; each entry carries its own location
    Validation {
        errors: Vec<String>,
    },
    /// Taxon references nest deeper than the supported limit (cycles included)
    MaxDepth {
        limit: usize,
    },
    /// An invariant of the compiler itself was violated
    Internal {
        message: String,
    },
}

impl CompileError {
    pub fn syntax(
        message: impl Into<String>,
        position: usize,
        line: usize,
        expression: impl Into<String>,
    ) -> Self {
        CompileError::Syntax {
            message: message.into(),
            position,
            line,
            expression: expression.into(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Syntax { message, position, line, expression } => {
                write!(
                    f,
                    "{}. Occurred at position {}, line {} in expression \"{}\"",
                    message, position, line, expression
                )
            }
            CompileError::Validation { errors } => {
                write!(f, "{}", errors.join("\n"))
            }
            CompileError::MaxDepth { limit } => {
                write!(f, "Reached maximum depth of taxon references ({}).", limit)
            }
            CompileError::Internal { message } => {
                write!(f, "Internal compiler error: {}", message)
            }
        }
    }
}

impl std::error::Error for CompileError {}
