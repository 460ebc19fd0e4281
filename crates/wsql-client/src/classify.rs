//! Error classification.
//!
//! Maps the last error code recorded on a session to an [`Error`] value.
//! The mapping is a static code table refined by a numeric-range fallback:
//! codes below 1000 are internal, everything else without an entry is
//! operational. Classifying a connection-lost code also marks the session
//! disconnected, which is how liveness tracking learns about dead sockets.

use std::collections::HashMap;

use mysql_protocol::codes::*;
use once_cell::sync::Lazy;

use crate::error::{CLIENT_ERROR_CODE, Category, Error, is_connection_lost_code};
use crate::runtime;

/// Where the classifier reads the last error from.
pub trait ErrorSource {
    /// Last recorded error number, `0` when none.
    fn last_error_code(&self) -> u16;

    /// Message recorded with the last error.
    fn last_error_message(&self) -> &str;

    /// Called when the recorded code means the connection is gone.
    fn mark_disconnected(&mut self);
}

static CATEGORY_TABLE: &[(u16, Category)] = &[
    (ER_DB_CREATE_EXISTS, Category::ProgrammingError),
    (ER_SYNTAX_ERROR, Category::ProgrammingError),
    (ER_PARSE_ERROR, Category::ProgrammingError),
    (ER_NO_SUCH_TABLE, Category::ProgrammingError),
    (ER_BAD_TABLE_ERROR, Category::ProgrammingError),
    (ER_BAD_DB_ERROR, Category::ProgrammingError),
    (ER_WRONG_DB_NAME, Category::ProgrammingError),
    (ER_WRONG_TABLE_NAME, Category::ProgrammingError),
    (ER_FIELD_SPECIFIED_TWICE, Category::ProgrammingError),
    (ER_DUP_FIELDNAME, Category::ProgrammingError),
    (ER_INVALID_GROUP_FUNC_USE, Category::ProgrammingError),
    (ER_UNSUPPORTED_EXTENSION, Category::ProgrammingError),
    (ER_TABLE_MUST_HAVE_COLUMNS, Category::ProgrammingError),
    (ER_CANT_DO_THIS_DURING_AN_TRANSACTION, Category::ProgrammingError),
    (ER_WARN_DATA_TRUNCATED, Category::DataError),
    (ER_WARN_NULL_TO_NOTNULL, Category::DataError),
    (ER_WARN_DATA_OUT_OF_RANGE, Category::DataError),
    (ER_NO_DEFAULT, Category::DataError),
    (ER_PRIMARY_CANT_HAVE_NULL, Category::DataError),
    (ER_DATA_TOO_LONG, Category::DataError),
    (ER_DATETIME_FUNCTION_OVERFLOW, Category::DataError),
    (ER_DUP_ENTRY, Category::IntegrityError),
    (ER_NO_REFERENCED_ROW, Category::IntegrityError),
    (ER_NO_REFERENCED_ROW_2, Category::IntegrityError),
    (ER_ROW_IS_REFERENCED, Category::IntegrityError),
    (ER_ROW_IS_REFERENCED_2, Category::IntegrityError),
    (ER_CANNOT_ADD_FOREIGN, Category::IntegrityError),
    (ER_WARNING_NOT_COMPLETE_ROLLBACK, Category::NotSupportedError),
    (ER_NOT_SUPPORTED_YET, Category::NotSupportedError),
    (ER_FEATURE_DISABLED, Category::NotSupportedError),
    (ER_UNKNOWN_STORAGE_ENGINE, Category::NotSupportedError),
    (CR_AUTH_PLUGIN_CANNOT_LOAD, Category::NotSupportedError),
];

pub(crate) static CATEGORY_INDEX: Lazy<HashMap<u16, Category>> =
    Lazy::new(|| CATEGORY_TABLE.iter().copied().collect());

/// Category for an error number, without the zero and out-of-range checks.
#[must_use]
pub fn category_for_code(code: u16) -> Category {
    if let Some(category) = CATEGORY_INDEX.get(&code) {
        return *category;
    }
    if code < ER_ERROR_FIRST {
        Category::InternalError
    } else {
        Category::OperationalError
    }
}

/// Build the error for the last failure recorded on `source`.
///
/// `None` stands for an operation that failed before a session existed.
pub fn classify(source: Option<&mut dyn ErrorSource>) -> Error {
    let source = match source {
        Some(source) if runtime::is_initialized() => source,
        _ => return Error::not_initialized(),
    };

    let code = source.last_error_code();
    if is_connection_lost_code(i32::from(code)) {
        source.mark_disconnected();
    }

    if code == 0 {
        return Error::interface("unknown error");
    }
    if code > CR_MAX_ERROR {
        return Error::new(Category::InterfaceError, CLIENT_ERROR_CODE, "error totally whack");
    }

    let category = category_for_code(code);
    tracing::debug!(code, category = %category, "classified error");
    Error::new(category, i32::from(code), source.last_error_message())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Recorded {
        code: u16,
        message: String,
        connected: bool,
    }

    impl Recorded {
        fn new(code: u16, message: &str) -> Self {
            runtime::ensure_initialized().unwrap();
            Self {
                code,
                message: message.to_string(),
                connected: true,
            }
        }
    }

    impl ErrorSource for Recorded {
        fn last_error_code(&self) -> u16 {
            self.code
        }

        fn last_error_message(&self) -> &str {
            &self.message
        }

        fn mark_disconnected(&mut self) {
            self.connected = false;
        }
    }

    #[test]
    fn test_table_lookup() {
        let mut source = Recorded::new(ER_DUP_ENTRY, "Duplicate entry '1' for key 'PRIMARY'");
        let err = classify(Some(&mut source));
        assert_eq!(err.category(), Category::IntegrityError);
        assert_eq!(err.code(), 1062);
        assert_eq!(err.message(), "Duplicate entry '1' for key 'PRIMARY'");
        assert!(source.connected);
    }

    #[test]
    fn test_every_table_entry_is_reachable() {
        for &(code, category) in CATEGORY_TABLE {
            assert_eq!(category_for_code(code), category, "code {code}");
        }
    }

    #[test]
    fn test_unloadable_auth_plugin_is_not_supported() {
        let mut source = Recorded::new(
            CR_AUTH_PLUGIN_CANNOT_LOAD,
            "Authentication plugin 'sha256_password' is not supported",
        );
        let err = classify(Some(&mut source));
        assert_eq!(err.category(), Category::NotSupportedError);
        assert_eq!(err.code(), 2059);
        assert!(source.connected);
    }

    #[test]
    fn test_range_fallback() {
        assert_eq!(category_for_code(999), Category::InternalError);
        assert_eq!(category_for_code(ER_LOCK_WAIT_TIMEOUT), Category::OperationalError);
        assert_eq!(category_for_code(CR_COMMANDS_OUT_OF_SYNC), Category::OperationalError);
    }

    #[test]
    fn test_zero_is_unknown() {
        let mut source = Recorded::new(0, "");
        let err = classify(Some(&mut source));
        assert_eq!(err.category(), Category::InterfaceError);
        assert_eq!(err.code(), -1);
        assert_eq!(err.message(), "unknown error");
    }

    #[test]
    fn test_out_of_range_code() {
        let mut source = Recorded::new(3000, "whatever");
        let err = classify(Some(&mut source));
        assert_eq!(err.category(), Category::InterfaceError);
        assert_eq!(err.code(), -1);
        assert_eq!(err.message(), "error totally whack");
    }

    #[test]
    fn test_connection_lost_marks_disconnected() {
        let mut source = Recorded::new(CR_SERVER_LOST, "Lost connection to MySQL server during query");
        let err = classify(Some(&mut source));
        assert!(!source.connected);
        assert!(err.is_connection_lost());
        assert!(err.is_retryable());
        assert_eq!(err.category(), Category::OperationalError);

        let mut source = Recorded::new(CR_SERVER_GONE_ERROR, "MySQL server has gone away");
        classify(Some(&mut source));
        assert!(!source.connected);
    }

    #[test]
    fn test_deadlock() {
        let mut source = Recorded::new(ER_LOCK_DEADLOCK, "Deadlock found when trying to get lock");
        let err = classify(Some(&mut source));
        assert_eq!(err.category(), Category::OperationalError);
        assert!(err.is_deadlock());
        assert!(err.is_retryable());
        assert!(source.connected);
    }

    #[test]
    fn test_without_session() {
        let err = classify(None);
        assert_eq!(err.category(), Category::InternalError);
        assert_eq!(err.code(), -1);
        assert_eq!(err.message(), "server not initialized");
    }
}
