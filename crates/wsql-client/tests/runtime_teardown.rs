//! Runtime Teardown Tests
//!
//! Teardown is process-wide and irreversible, so these checks live in their
//! own test binary and run as a single test.
//!
//! ```bash
//! cargo test -p wsql-client --test runtime_teardown
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use wsql_client::error::CLIENT_ERROR_CODE;
use wsql_client::{Category, ConnectOptions, Session, SessionState, runtime};
use wsql_testing::{MockMySqlServer, MockResponse};

#[test]
fn test_teardown_is_final() {
    let server = MockMySqlServer::builder()
        .with_response("SELECT * FROM gone", MockResponse::error(1146, "Table 'shop.gone' doesn't exist"))
        .build()
        .unwrap();
    let options = ConnectOptions::new()
        .host(server.host())
        .port(server.port())
        .user("app");

    let mut open = Session::open(&options).unwrap();
    assert!(runtime::is_initialized());

    runtime::teardown();
    assert!(!runtime::is_initialized());
    // A second teardown is harmless.
    runtime::teardown();

    // New connections are refused.
    let mut session = Session::new();
    let err = session.connect(&options).unwrap_err();
    assert_eq!(err.category(), Category::InternalError);
    assert_eq!(err.code(), CLIENT_ERROR_CODE);
    assert_eq!(err.message(), "server not initialized");
    assert_eq!(session.state(), SessionState::Unopened);
    assert!(runtime::ensure_initialized().is_err());

    // Sessions opened earlier keep their socket, but failures can no longer
    // be classified.
    open.ping(None).unwrap();
    let err = open.query("SELECT * FROM gone").unwrap_err();
    assert_eq!(err.category(), Category::InternalError);
    assert_eq!(err.message(), "server not initialized");
    assert_eq!(open.errno(), 1146);

    open.close().unwrap();
}
