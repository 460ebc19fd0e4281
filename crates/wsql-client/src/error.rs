//! Client error types.
//!
//! Every failure surfaced by this crate is an [`Error`] carrying a
//! [`Category`], the numeric MySQL error code and a message. The category
//! set mirrors the DB-API taxonomy:
//!
//! ```text
//! Warning
//! InterfaceError
//! DatabaseError
//! ├── DataError
//! ├── OperationalError
//! ├── IntegrityError
//! ├── InternalError
//! ├── ProgrammingError
//! └── NotSupportedError
//! ```
//!
//! Server and wire errors are turned into values by the classifier in
//! [`crate::classify`]. Errors raised by the client itself, before any
//! network access, carry code `-1`.

use std::fmt;

use mysql_protocol::codes::{CR_SERVER_GONE_ERROR, CR_SERVER_LOST, CR_SOCKET_CREATE_ERROR, ER_LOCK_DEADLOCK};
use thiserror::Error;

/// Code used for errors that have no MySQL error number.
pub const CLIENT_ERROR_CODE: i32 = -1;

/// Error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Important warnings such as data truncation.
    Warning,
    /// Errors in the client interface rather than the database.
    InterfaceError,
    /// Problems with the processed data.
    DataError,
    /// Errors related to the database's operation, not necessarily under
    /// the caller's control.
    OperationalError,
    /// Relational integrity violations.
    IntegrityError,
    /// The database hit an internal error, or the client lost sync.
    InternalError,
    /// Errors in the SQL or in how the API was used.
    ProgrammingError,
    /// The requested feature is not supported.
    NotSupportedError,
}

impl Category {
    /// The category's name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Warning => "Warning",
            Self::InterfaceError => "InterfaceError",
            Self::DataError => "DataError",
            Self::OperationalError => "OperationalError",
            Self::IntegrityError => "IntegrityError",
            Self::InternalError => "InternalError",
            Self::ProgrammingError => "ProgrammingError",
            Self::NotSupportedError => "NotSupportedError",
        }
    }

    /// Whether the category is one of the `DatabaseError` sub-kinds.
    #[must_use]
    pub const fn is_database_error(self) -> bool {
        !matches!(self, Self::Warning | Self::InterfaceError)
    }

    /// Whether the category is an error at all (everything except Warning).
    #[must_use]
    pub const fn is_error(self) -> bool {
        !matches!(self, Self::Warning)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A classified client or server error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("({code}) {message}")]
pub struct Error {
    category: Category,
    code: i32,
    message: String,
}

impl Error {
    /// Create an error with an explicit category.
    pub fn new(category: Category, code: i32, message: impl Into<String>) -> Self {
        Self {
            category,
            code,
            message: message.into(),
        }
    }

    pub(crate) fn programming(message: impl Into<String>) -> Self {
        Self::new(Category::ProgrammingError, CLIENT_ERROR_CODE, message)
    }

    pub(crate) fn interface(message: impl Into<String>) -> Self {
        Self::new(Category::InterfaceError, CLIENT_ERROR_CODE, message)
    }

    pub(crate) fn not_supported(message: impl Into<String>) -> Self {
        Self::new(Category::NotSupportedError, CLIENT_ERROR_CODE, message)
    }

    pub(crate) fn not_initialized() -> Self {
        Self::new(
            Category::InternalError,
            CLIENT_ERROR_CODE,
            "server not initialized",
        )
    }

    /// The error category.
    #[must_use]
    pub fn category(&self) -> Category {
        self.category
    }

    /// MySQL error number, or `-1` for client-side usage errors.
    #[must_use]
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the error belongs to the `DatabaseError` family.
    #[must_use]
    pub fn is_database_error(&self) -> bool {
        self.category.is_database_error()
    }

    /// Whether retrying the operation (possibly on a fresh connection) may
    /// succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        is_retryable_code(self.code)
    }

    /// Whether the error is a deadlock reported by the server.
    #[must_use]
    pub fn is_deadlock(&self) -> bool {
        is_deadlock_code(self.code)
    }

    /// Whether the error means the connection to the server was lost.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        is_connection_lost_code(self.code)
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Socket, host lookup, connect and lost-connection failures, plus deadlocks.
#[must_use]
pub fn is_retryable_code(code: i32) -> bool {
    (i32::from(CR_SOCKET_CREATE_ERROR)..=i32::from(CR_SERVER_GONE_ERROR)).contains(&code)
        || code == i32::from(CR_SERVER_LOST)
        || is_deadlock_code(code)
}

/// `ER_LOCK_DEADLOCK`.
#[must_use]
pub fn is_deadlock_code(code: i32) -> bool {
    code == i32::from(ER_LOCK_DEADLOCK)
}

/// `CR_SERVER_GONE_ERROR` or `CR_SERVER_LOST`.
#[must_use]
pub fn is_connection_lost_code(code: i32) -> bool {
    code == i32::from(CR_SERVER_GONE_ERROR) || code == i32::from(CR_SERVER_LOST)
}
