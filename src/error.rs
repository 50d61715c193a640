//! Error types for the driver.
//!
//! Server-reported errors carry the full ErrorResponse field set and are
//! classified by their SQLSTATE class. Transport and protocol failures mark
//! the connection unusable.

use std::fmt;

/// Error type for driver operations.
#[derive(Debug)]
pub enum PgError {
    /// I/O failure on the underlying stream. The connection is closed.
    Io(std::io::Error),
    /// A read or write exceeded `socket_timeout`. The connection is closed.
    Timeout,
    /// Malformed framing, unexpected message, or a violated protocol
    /// invariant. The connection is unusable.
    Protocol(String),
    /// Authentication failed or the server requested an unsupported method.
    Auth(String),
    /// Server-reported error (`ErrorResponse`).
    Database(Box<ServerError>),
    /// Misuse of the client API: operation on a closed cursor or connection,
    /// parameter count mismatch, unsupported paramstyle usage.
    Interface(String),
    /// An execute was attempted while the transaction is in the failed
    /// state; only rollback is permitted.
    InFailedTransaction,
}

impl fmt::Display for PgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PgError::Io(e) => write!(f, "I/O error: {}", e),
            PgError::Timeout => write!(f, "socket timeout"),
            PgError::Protocol(e) => write!(f, "protocol error: {}", e),
            PgError::Auth(e) => write!(f, "authentication error: {}", e),
            PgError::Database(e) => write!(f, "{}: {} ({})", e.severity, e.message, e.code),
            PgError::Interface(e) => write!(f, "interface error: {}", e),
            PgError::InFailedTransaction => {
                write!(f, "current transaction is aborted, only rollback is permitted")
            }
        }
    }
}

impl std::error::Error for PgError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PgError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PgError {
    fn from(e: std::io::Error) -> Self {
        PgError::Io(e)
    }
}

/// Result type for driver operations.
pub type PgResult<T> = Result<T, PgError>;

/// Classification of a server error by the class part of its SQLSTATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    /// Class 23: integrity constraint violation.
    Integrity,
    /// Classes 42, 26, 2D: syntax errors, invalid names, invalid
    /// transaction termination.
    Programming,
    /// Class 22: data exception (division by zero, invalid text
    /// representation, ...).
    Data,
    /// Classes 53, 57, 58: resource exhaustion, operator intervention
    /// (including query cancellation), system errors.
    Operational,
    /// Class XX: internal server error.
    Internal,
    /// Any other class.
    Other,
}

/// The decoded field set of an `ErrorResponse` or `NoticeResponse`.
///
/// Severity, SQLSTATE code, and message are always present; everything else
/// is optional per the protocol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerError {
    pub severity: String,
    /// Five-character SQLSTATE.
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub position: Option<String>,
    pub internal_position: Option<String>,
    pub internal_query: Option<String>,
    pub where_: Option<String>,
    pub schema_name: Option<String>,
    pub table_name: Option<String>,
    pub column_name: Option<String>,
    pub datatype_name: Option<String>,
    pub constraint_name: Option<String>,
    pub file: Option<String>,
    pub line: Option<String>,
    pub routine: Option<String>,
}

impl ServerError {
    /// Classify by SQLSTATE class (the first two characters).
    pub fn kind(&self) -> DatabaseErrorKind {
        match self.code.get(..2) {
            Some("23") => DatabaseErrorKind::Integrity,
            Some("42") | Some("26") | Some("2D") => DatabaseErrorKind::Programming,
            Some("22") => DatabaseErrorKind::Data,
            Some("53") | Some("57") | Some("58") => DatabaseErrorKind::Operational,
            Some("XX") => DatabaseErrorKind::Internal,
            _ => DatabaseErrorKind::Other,
        }
    }
}

impl From<ServerError> for PgError {
    fn from(e: ServerError) -> Self {
        PgError::Database(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err_with_code(code: &str) -> ServerError {
        ServerError {
            severity: "ERROR".to_string(),
            code: code.to_string(),
            message: "boom".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_sqlstate_classification() {
        assert_eq!(err_with_code("23505").kind(), DatabaseErrorKind::Integrity);
        assert_eq!(err_with_code("42601").kind(), DatabaseErrorKind::Programming);
        assert_eq!(err_with_code("26000").kind(), DatabaseErrorKind::Programming);
        assert_eq!(err_with_code("2D000").kind(), DatabaseErrorKind::Programming);
        assert_eq!(err_with_code("22012").kind(), DatabaseErrorKind::Data);
        assert_eq!(err_with_code("57014").kind(), DatabaseErrorKind::Operational);
        assert_eq!(err_with_code("53200").kind(), DatabaseErrorKind::Operational);
        assert_eq!(err_with_code("XX000").kind(), DatabaseErrorKind::Internal);
        assert_eq!(err_with_code("0A000").kind(), DatabaseErrorKind::Other);
    }

    #[test]
    fn test_display_includes_sqlstate() {
        let e = PgError::from(err_with_code("22012"));
        let rendered = e.to_string();
        assert!(rendered.contains("22012"));
        assert!(rendered.contains("boom"));
    }
}
