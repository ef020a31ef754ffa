//! Error types for evalcache
//!
//! All modules use `EvalResult<T>` as their return type. Errors raised while
//! forcing a node propagate synchronously and are never retried internally.

use std::path::PathBuf;
use thiserror::Error;

/// Boxed error produced by a producer body
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for evalcache operations
pub type EvalResult<T> = Result<T, EvalError>;

/// All errors that can occur in evalcache
#[derive(Error, Debug)]
pub enum EvalError {
    // Fingerprint errors
    #[error("No fingerprint encoder registered for type `{type_name}`")]
    UnsupportedType { type_name: String },

    #[error("Function `{function}` declares no definition to fold into its fingerprint")]
    MissingDefinition { function: String },

    // Graph errors
    #[error("Operand `{label}` was never bound and cannot be forced")]
    UnresolvedOperand { label: String },

    #[error("Cyclic graph detected at {at}")]
    CyclicGraph { at: String },

    #[error("Placeholder `{label}` is already bound")]
    AlreadyBound { label: String },

    #[error("Node is not a placeholder")]
    NotPlaceholder,

    // Evaluation errors raised by builtin operations
    #[error("Unsupported operand types for {op}: {lhs} and {rhs}")]
    OperandTypes {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("Unsupported operand type for {op}: {found}")]
    UnaryOperandType { op: &'static str, found: &'static str },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Integer overflow in {op}")]
    Overflow { op: &'static str },

    #[error("`{type_name}` has no attribute `{name}`")]
    AttributeNotFound { type_name: String, name: String },

    #[error("Index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("`{found}` cannot be indexed by `{index}`")]
    NotSubscriptable {
        found: &'static str,
        index: &'static str,
    },

    #[error("`{found}` is not iterable")]
    NotIterable { found: &'static str },

    #[error("Expected {expected} elements to unpack, found {found}")]
    Unpack { expected: usize, found: usize },

    #[error("`{found}` is not callable")]
    NotCallable { found: &'static str },

    #[error("Missing argument {position} for `{function}`")]
    MissingArgument { function: String, position: String },

    #[error("Expected {expected} for `{function}` argument {position}, found {found}")]
    ArgumentType {
        function: String,
        position: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Producer `{function}` failed: {source}")]
    Callee {
        function: String,
        #[source]
        source: BoxError,
    },

    // File adapter errors
    #[error("Parameter `{field}` not found among the operands of `{function}`")]
    FieldNotFound { function: String, field: String },

    #[error("Parameter `{field}` of `{function}` must be a path string, found {found}")]
    FieldType {
        function: String,
        field: String,
        found: &'static str,
    },

    // Storage errors
    #[error("Storage error: {context}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Store at {root} uses the {found} layout, expected {expected}")]
    LayoutMismatch {
        root: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Value of type `{type_name}` cannot be stored persistently")]
    Unstorable { type_name: &'static str },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl EvalError {
    /// Create a storage error with context
    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }

    /// Wrap an error returned by a producer body
    pub fn callee(function: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Callee {
            function: function.into(),
            source: source.into(),
        }
    }

    /// Whether the error came from the persistent store rather than the graph
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. } | Self::LayoutMismatch { .. } | Self::Unstorable { .. }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::UnsupportedType { .. } => {
                Some("Register an encoder with EngineBuilder::register_encoder")
            }
            Self::LayoutMismatch { .. } => {
                Some("Open the store with its own layout or run: evalcache destroy")
            }
            Self::FieldNotFound { .. } => {
                Some("Declare the producer's parameters with LazyFn::params")
            }
            Self::CyclicGraph { .. } => Some("Check placeholder bindings for loops"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = EvalError::UnsupportedType {
            type_name: "Socket".to_string(),
        };
        assert!(err.to_string().contains("`Socket`"));
    }

    #[test]
    fn error_hint() {
        let err = EvalError::FieldNotFound {
            function: "render".to_string(),
            field: "path".to_string(),
        };
        assert!(err.hint().unwrap().contains("params"));
        assert_eq!(EvalError::DivisionByZero.hint(), None);
    }

    #[test]
    fn callee_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = EvalError::callee("fib", io);
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "boom");
    }

    #[test]
    fn storage_classification() {
        let err = EvalError::storage("x", std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(err.is_storage());
        assert!(!EvalError::DivisionByZero.is_storage());
    }
}
