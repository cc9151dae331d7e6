use thiserror::Error;

/// Errors raised by attribute storage on caller mistakes
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttributeError {
    #[error("Invalid attribute key '{0}': only letters, digits, '.' and '_' are allowed")]
    InvalidKey(String),

    #[error("Attribute '{0}' is not set")]
    Missing(String),

    #[error("Attribute '{key}' holds a {found} value, expected {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Monitor '{0}' is not composite and cannot carry inheritable attributes")]
    NotComposite(String),
}

/// Errors raised when parsing monitor levels
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LevelError {
    #[error("Invalid monitor level '{0}' (expected debug, info or essential)")]
    Invalid(String),
}

/// Errors reported by processor plugins
///
/// The engine logs these and carries on; they never reach instrumented code.
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Processor failed: {0}")]
    Failed(String),

    #[error("Processor unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors recorded while decomposing attribute values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecomposeError {
    #[error("Failed to read property '{property}' of {type_name}: {reason}")]
    Property {
        type_name: String,
        property: String,
        reason: String,
    },

    #[error("Failed to inspect {type_name}: {reason}")]
    Inspection { type_name: String, reason: String },
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("Unknown processor '{0}' referenced by a processor group")]
    UnknownProcessor(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
