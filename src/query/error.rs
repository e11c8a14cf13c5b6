//! Error types raised while evaluating query expressions.
//!
//! Message wording here is part of the public contract: mappings surface
//! these strings verbatim to users, and `catch`/`or` are the only constructs
//! that recover them.

use crate::value::{TypeError, Value, ValueKind};

/// The name rule enforced on registered functions and methods.
pub const NAME_PATTERN: &str = "^[a-z0-9]+(_[a-z0-9]+)*$";

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Type(#[from] TypeError),

    /// A failure prefixed with the annotation of the node that raised it.
    #[error("{annotation}: {source}")]
    Annotated {
        annotation: String,
        #[source]
        source: Box<QueryError>,
    },

    /// Arithmetic over operands that cannot degrade to a shared numeric kind.
    #[error("cannot {op} types {left_kind} (from {left}) and {right_kind} (from {right})")]
    BadOperands {
        op: &'static str,
        left_kind: ValueKind,
        left: String,
        right_kind: ValueKind,
        right: String,
    },

    /// Ordered comparison over operands of differing or unordered kinds.
    #[error("cannot compare types {left_kind} (from {left}) and {right_kind} (from {right})")]
    Incomparable {
        left_kind: ValueKind,
        left: String,
        right_kind: ValueKind,
        right: String,
    },

    #[error("{annotation}: attempted to divide by zero")]
    DivideByZero { annotation: String },

    #[error("unrecognised function '{0}'")]
    UnknownFunction(String),

    #[error("unrecognised method '{0}'")]
    UnknownMethod(String),

    #[error("map {0} was not found")]
    UnknownMap(String),

    #[error("variable {0} undefined")]
    UnknownVariable(String),

    #[error("{kind} name '{name}' does not match the required regular expression /{pattern}/")]
    BadName {
        kind: &'static str,
        name: String,
        pattern: &'static str,
    },

    #[error("conflicting {kind} name: {name}")]
    ConflictingName { kind: &'static str, name: String },

    /// A failure carrying a best-effort replacement value. Consumers may
    /// extract the partial value or surface the error.
    #[error("{source}")]
    Recoverable {
        recovered: Value,
        #[source]
        source: Box<QueryError>,
    },

    #[error("{0}")]
    Message(String),
}

impl QueryError {
    pub fn message(msg: impl Into<String>) -> Self {
        QueryError::Message(msg.into())
    }

    /// Prefix this error with an annotation, unless it is already annotated
    /// or the annotation is empty.
    pub fn at(self, annotation: impl Into<String>) -> Self {
        let annotation = annotation.into();
        if annotation.is_empty() || matches!(self, QueryError::Annotated { .. }) {
            return self;
        }
        QueryError::Annotated {
            annotation,
            source: Box::new(self),
        }
    }

    /// Unwrap a recoverable error into its best-effort value, or keep the
    /// error as-is.
    pub fn recover(self) -> Result<Value, QueryError> {
        match self {
            QueryError::Recoverable { recovered, .. } => Ok(recovered),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotation_is_not_stacked() {
        let err = QueryError::message("value is null").at("field `this.a`");
        assert_eq!(err.to_string(), "field `this.a`: value is null");
        let err = err.at("outer");
        assert_eq!(err.to_string(), "field `this.a`: value is null");
    }

    #[test]
    fn recoverable_unwraps_to_value() {
        let err = QueryError::Recoverable {
            recovered: Value::from(3i64),
            source: Box::new(QueryError::message("boom")),
        };
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.recover().unwrap(), Value::from(3i64));
    }
}
