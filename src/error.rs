//! Driver error types
//!
//! Every fallible operation in the crate returns [`ReqlError`]. The variants
//! follow who is at fault:
//!
//! - `Driver`: the client side (misuse, closed connection, malformed frames,
//!   unexpected handshake replies). Never carries a term.
//! - `Auth`: credentials rejected or protocol mismatch during the handshake.
//! - `Client` / `Compile` / `Runtime`: the server rejected or failed a query;
//!   these carry the query term and the backtrace into it.
//! - `Timeout`: a bounded wait expired. The waiter or cursor stays usable.
//!
//! `ReqlError` is `Clone` so a single fatal failure can be handed to every
//! waiter that was outstanding on the connection.

use crate::network::protocol::Frame;
use crate::reql::printer::QueryPrinter;
use crate::reql::Term;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ReqlError {
    #[error("{0}")]
    Driver(String),

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    Client(QueryError),

    #[error("{0}")]
    Compile(QueryError),

    #[error("{error}")]
    Runtime {
        kind: RuntimeErrorKind,
        error: QueryError,
    },

    #[error("{0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, ReqlError>;

impl ReqlError {
    pub fn driver<S: Into<String>>(message: S) -> Self {
        ReqlError::Driver(message.into())
    }

    pub fn connection_closed() -> Self {
        ReqlError::Driver("Connection is closed.".to_string())
    }

    pub fn timeout() -> Self {
        ReqlError::Timeout("Operation timed out.".to_string())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ReqlError::Timeout(_))
    }

    /// The bare message, without the rendered query.
    pub fn message(&self) -> &str {
        match self {
            ReqlError::Driver(m) | ReqlError::Auth(m) | ReqlError::Timeout(m) => m,
            ReqlError::Client(e) | ReqlError::Compile(e) => &e.message,
            ReqlError::Runtime { error, .. } => &error.message,
        }
    }

    /// The server-side error payload, if this is a query error.
    pub fn query_error(&self) -> Option<&QueryError> {
        match self {
            ReqlError::Client(e) | ReqlError::Compile(e) => Some(e),
            ReqlError::Runtime { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ReqlError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => ReqlError::connection_closed(),
            _ => ReqlError::Driver(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for ReqlError {
    fn from(e: serde_json::Error) -> Self {
        ReqlError::Driver(format!("Malformed JSON: {}", e))
    }
}

/// A failed query: the server's message, the query, and the path to the
/// sub-term the server blamed.
#[derive(Debug, Clone)]
pub struct QueryError {
    pub message: String,
    pub term: Option<Arc<Term>>,
    pub frames: Vec<Frame>,
}

impl QueryError {
    pub fn new<S: Into<String>>(message: S, term: Option<Arc<Term>>, frames: Vec<Frame>) -> Self {
        Self {
            message: message.into(),
            term,
            frames,
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.term {
            Some(term) => {
                let printer = QueryPrinter::new(term, &self.frames);
                write!(f, "{} in:\n{}", self.message, printer.print_query())?;
                let carrots = printer.print_carrots();
                if !carrots.is_empty() {
                    write!(f, "\n{}", carrots)?;
                }
                Ok(())
            }
            None => write!(f, "{}", self.message),
        }
    }
}

/// Sub-classification of runtime errors, from the response's `e` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    Internal,
    ResourceLimit,
    QueryLogic,
    NonExistence,
    OpFailed,
    OpIndeterminate,
    User,
    Permission,
    Unknown(i64),
}

impl RuntimeErrorKind {
    pub fn from_code(code: i64) -> Self {
        match code {
            1_000_000 => RuntimeErrorKind::Internal,
            2_000_000 => RuntimeErrorKind::ResourceLimit,
            3_000_000 => RuntimeErrorKind::QueryLogic,
            3_100_000 => RuntimeErrorKind::NonExistence,
            4_100_000 => RuntimeErrorKind::OpFailed,
            4_200_000 => RuntimeErrorKind::OpIndeterminate,
            5_000_000 => RuntimeErrorKind::User,
            6_000_000 => RuntimeErrorKind::Permission,
            other => RuntimeErrorKind::Unknown(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reql::Term;

    #[test]
    fn test_driver_error_message() {
        let err = ReqlError::connection_closed();
        assert_eq!(err.to_string(), "Connection is closed.");
        assert!(err.query_error().is_none());
    }

    #[test]
    fn test_io_eof_maps_to_closed() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(ReqlError::from(io).message(), "Connection is closed.");
    }

    #[test]
    fn test_runtime_kind_codes() {
        assert_eq!(RuntimeErrorKind::from_code(3_100_000), RuntimeErrorKind::NonExistence);
        assert_eq!(RuntimeErrorKind::from_code(42), RuntimeErrorKind::Unknown(42));
    }

    #[test]
    fn test_query_error_renders_query() {
        let term = Arc::new(Term::db("blog").table("posts"));
        let err = ReqlError::Runtime {
            kind: RuntimeErrorKind::OpFailed,
            error: QueryError::new("Table `blog.posts` does not exist.", Some(term), vec![]),
        };
        let rendered = err.to_string();
        assert!(rendered.starts_with("Table `blog.posts` does not exist. in:\n"));
        assert!(rendered.contains(r#"r.db("blog").table("posts")"#));
        assert!(rendered.ends_with('^'));
    }
}
