use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::protocol::term::{render_annotated, Frame};

/// Errors surfaced by the driver.
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    /// Transport lifecycle failure: DNS, connect, handshake, EOF, send.
    /// Poisons the connection.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Decode failure on the reader path.
    #[error("Read error: {0}")]
    ReadError(String),

    /// Server-reported error, scoped to a single query.
    #[error("{0}")]
    DatabaseError(DbError),
}

/// Classes of server-reported errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The server believes this driver misbehaved.
    BrokenClient,
    /// The query failed to compile.
    BadQuery,
    /// The query failed at runtime.
    Runtime,
    /// The server sent something this driver cannot interpret.
    UnexpectedResponse,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::BrokenClient => write!(f, "Client error"),
            ErrorCode::BadQuery => write!(f, "Compile error"),
            ErrorCode::Runtime => write!(f, "Runtime error"),
            ErrorCode::UnexpectedResponse => write!(f, "Unexpected response"),
        }
    }
}

/// A server-reported error for one query.
///
/// When the originating term is known, the display form appends it with
/// the offending subterm wrapped in `HERE(..)` as located by the
/// backtrace.
#[derive(Debug, Clone)]
pub struct DbError {
    pub code: ErrorCode,
    pub message: String,
    pub term: Option<Value>,
    pub backtrace: Option<Vec<Frame>>,
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(term) = &self.term {
            let frames = self.backtrace.as_deref().unwrap_or(&[]);
            write!(f, "\n    in {}", render_annotated(term, frames))?;
        }
        Ok(())
    }
}

impl std::error::Error for DbError {}

impl From<DbError> for DriverError {
    fn from(err: DbError) -> Self {
        DriverError::DatabaseError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn connection_error_message() {
        let err = DriverError::ConnectionError("ERROR bad auth".to_string());
        assert_eq!(err.to_string(), "Connection error: ERROR bad auth");
    }

    #[test]
    fn read_error_message() {
        let err = DriverError::ReadError("frame too large".to_string());
        assert_eq!(err.to_string(), "Read error: frame too large");
    }

    #[test]
    fn db_error_without_term() {
        let err = DbError {
            code: ErrorCode::BadQuery,
            message: "expected 2 arguments".to_string(),
            term: None,
            backtrace: None,
        };
        assert_eq!(err.to_string(), "Compile error: expected 2 arguments");
    }

    #[test]
    fn db_error_renders_annotated_term() {
        let err = DbError {
            code: ErrorCode::Runtime,
            message: "divide by zero".to_string(),
            term: Some(json!([21, [[24, [2, 0]], 0], {}])),
            backtrace: Some(vec![Frame::Pos(0), Frame::Pos(1)]),
        };
        let rendered = err.to_string();
        assert!(rendered.starts_with("Runtime error: divide by zero\n    in "));
        assert!(rendered.contains("HERE(0)"));
    }

    #[test]
    fn db_error_converts_to_driver_error() {
        let err: DriverError = DbError {
            code: ErrorCode::Runtime,
            message: "boom".to_string(),
            term: None,
            backtrace: None,
        }
        .into();
        assert!(matches!(err, DriverError::DatabaseError(_)));
        assert_eq!(err.to_string(), "Runtime error: boom");
    }
}
