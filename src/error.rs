use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ContextError>;

/// Source error raised by user code (factories, providers, disposers).
///
/// Held behind an `Arc` so `ContextError` stays `Clone`: a pending singleton
/// construction hands the same outcome to every caller awaiting it.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

fn share(err: anyhow::Error) -> SharedError {
    let boxed: Box<dyn std::error::Error + Send + Sync + 'static> = err.into();
    Arc::from(boxed)
}

#[derive(Debug, Clone, Error)]
pub enum ContextError {
    #[error("The key '{key}' is not bound to any value in context {context}{}", format_path(.resolution_path))]
    BindingNotFound {
        key: String,
        context: String,
        resolution_path: Vec<String>,
    },

    #[error("Invalid binding key '{key}': {reason}")]
    InvalidBindingKey { key: String, reason: String },

    #[error("Binding '{key}' is already of type {existing}, cannot change it to {requested}")]
    ConflictingBindingType {
        key: String,
        existing: String,
        requested: String,
    },

    #[error("Invalid target for binding '{key}': {reason}")]
    InvalidBindingTarget { key: String, reason: String },

    #[error("Binding '{key}' is locked in context {context}")]
    BindingLocked { key: String, context: String },

    #[error("Circular dependency detected: {}", .chain.join(" --> "))]
    CircularDependency { chain: Vec<String> },

    #[error("Cannot get '{key}' synchronously: the value can only be resolved asynchronously")]
    AsyncResolutionNotAllowed { key: String },

    #[error("Cannot resolve injected arguments for {target}.{member}: the key '{key}' is not bound")]
    InjectionResolution {
        target: String,
        member: String,
        key: String,
    },

    #[error("Invalid injection for {target}.{member}: {reason}")]
    InvalidInjection {
        target: String,
        member: String,
        reason: String,
    },

    #[error("Property '{path}' is not found on the value of '{key}'")]
    PropertyNotFound { key: String, path: String },

    #[error("Value of '{key}' is not of type {expected}")]
    TypeMismatch { key: String, expected: String },

    #[error("Context {context} is closed")]
    ContextClosed { context: String },

    #[error("Resolution of '{key}' failed: {source}")]
    Factory {
        key: String,
        #[source]
        source: SharedError,
    },

    #[error("Closing context {context} failed: {}", .failures.join("; "))]
    DisposalFailed {
        context: String,
        failures: Vec<String>,
    },

    #[error(transparent)]
    External(SharedError),
}

fn format_path(path: &[String]) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!(" (resolution path: {})", path.join(" --> "))
    }
}

impl ContextError {
    pub fn not_found(
        key: impl Into<String>,
        context: impl Into<String>,
        resolution_path: Vec<String>,
    ) -> Self {
        Self::BindingNotFound {
            key: key.into(),
            context: context.into(),
            resolution_path,
        }
    }

    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidBindingKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn type_mismatch<T: ?Sized>(key: impl Into<String>) -> Self {
        Self::TypeMismatch {
            key: key.into(),
            expected: std::any::type_name::<T>().to_string(),
        }
    }

    pub fn closed(context: impl Into<String>) -> Self {
        Self::ContextClosed {
            context: context.into(),
        }
    }

    /// Wrap an arbitrary user error raised while resolving `key`.
    ///
    /// Errors that already are container errors keep their kind.
    pub fn from_factory(key: &str, err: anyhow::Error) -> Self {
        match err.downcast::<ContextError>() {
            Ok(ContextError::External(source)) => Self::Factory {
                key: key.to_string(),
                source,
            },
            Ok(inner) => inner,
            Err(other) => Self::Factory {
                key: key.to_string(),
                source: share(other),
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::BindingNotFound { .. })
    }
}

impl From<anyhow::Error> for ContextError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ContextError>() {
            Ok(inner) => inner,
            Err(other) => Self::External(share(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circular_dependency_message_lists_chain() {
        let err = ContextError::CircularDependency {
            chain: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Circular dependency detected: a --> b --> a");
    }

    #[test]
    fn test_factory_error_keeps_container_kind() {
        let inner = ContextError::AsyncResolutionNotAllowed { key: "x".into() };
        let err = ContextError::from_factory("y", anyhow::Error::new(inner));
        assert!(matches!(err, ContextError::AsyncResolutionNotAllowed { key } if key == "x"));

        let err = ContextError::from_factory("y", anyhow::anyhow!("boom"));
        match err {
            ContextError::Factory { key, source } => {
                assert_eq!(key, "y");
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_not_found_message_includes_path() {
        let err = ContextError::not_found("b", "app", vec!["a".into(), "b".into()]);
        assert_eq!(
            err.to_string(),
            "The key 'b' is not bound to any value in context app (resolution path: a --> b)"
        );
    }
}
