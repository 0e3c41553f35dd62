//! Settled query results and the errors captured into them.

use serde_json::Value;
use thiserror::Error;

use super::transport::TransportError;

/// Error stored in a settled query result.
///
/// Query errors are never raised to the caller; they travel in
/// [`QueryResult::error`] and from there into the coordinator's snapshot.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),

    /// The payload carried an `errors` field.
    #[error("response contained errors: {0}")]
    Response(Value),

    /// The payload carried neither `data` nor `errors`.
    #[error("response contained neither data nor errors")]
    Malformed,
}

/// A settled cache value: exactly one of `data` and `error` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub data: Option<Value>,
    pub error: Option<QueryError>,
}

impl QueryResult {
    pub const fn success(data: Value) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    pub const fn failure(error: QueryError) -> Self {
        Self {
            data: None,
            error: Some(error),
        }
    }

    /// Interprets a transport outcome.
    ///
    /// A payload with `errors` settles as [`QueryError::Response`] rather than
    /// as a rejection; a transport failure settles as [`QueryError::Transport`].
    pub fn from_response(outcome: Result<Value, TransportError>) -> Self {
        let mut payload = match outcome {
            Ok(payload) => payload,
            Err(e) => return Self::failure(e.into()),
        };

        match payload.get("errors") {
            Some(errors) if !errors.is_null() => {
                return Self::failure(QueryError::Response(errors.clone()));
            }
            _ => {}
        }

        match payload.get_mut("data").map(Value::take) {
            Some(data) => Self::success(data),
            None => Self::failure(QueryError::Malformed),
        }
    }

    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
