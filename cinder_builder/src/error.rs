//! Build errors.
//!
//! These are the failures a method compile reports to its caller. Misuse
//! of the builder API itself (re-appending a builder, merging VM states of
//! different shapes, fallthrough from a builder that never comes back) is a
//! client defect and panics instead; see the `# Panics` sections.

use thiserror::Error;

/// Failure while building a method.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A call target is still unknown after the resolver had its chance.
    #[error("unresolved function `{name}`")]
    UnresolvedFunction { name: String },

    /// A target feature was required and has no static fallback.
    #[error("target does not support {feature}")]
    UnsupportedCapability { feature: &'static str },

    #[error("local `{name}` is not defined")]
    UndefinedLocal { name: String },

    #[error("type `{name}` is not defined")]
    UnknownType { name: String },

    #[error("type `{aggregate}` has no field `{field}`")]
    UnknownField { aggregate: String, field: String },

    /// The client's IL generation reported failure.
    #[error("building IL for `{method}` failed")]
    BodyFailed { method: String },

    /// The connected graph did not pass verification.
    #[error("malformed IL graph: {0}")]
    MalformedGraph(String),

    /// Writing the IL listing failed.
    #[error("failed to write IL listing")]
    Dump(#[from] std::io::Error),
}

impl BuildError {
    pub fn undefined_local(name: &str) -> Self {
        BuildError::UndefinedLocal {
            name: name.to_owned(),
        }
    }

    pub fn unknown_type(name: &str) -> Self {
        BuildError::UnknownType {
            name: name.to_owned(),
        }
    }

    pub fn unknown_field(aggregate: &str, field: &str) -> Self {
        BuildError::UnknownField {
            aggregate: aggregate.to_owned(),
            field: field.to_owned(),
        }
    }
}

/// Result alias used throughout the builder.
pub type BuildResult<T> = Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            BuildError::undefined_local("x").to_string(),
            "local `x` is not defined"
        );
        assert_eq!(
            BuildError::unknown_field("Frame", "pc").to_string(),
            "type `Frame` has no field `pc`"
        );
        assert_eq!(
            BuildError::UnsupportedCapability {
                feature: "atomic add"
            }
            .to_string(),
            "target does not support atomic add"
        );
    }

    #[test]
    fn test_io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: BuildError = io.into();
        assert!(matches!(err, BuildError::Dump(_)));
    }
}
