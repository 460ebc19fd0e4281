//! Session Lifecycle and Command Tests
//!
//! These tests drive a blocking [`Session`] against the in-process mock
//! server from `wsql-testing`: connect and authentication, the command
//! surface, liveness tracking and close.
//!
//! ```bash
//! cargo test -p wsql-client --test session_lifecycle
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use mysql_protocol::codes;
use wsql_client::{CapabilityFlags, Category, ConnectOptions, ServerOption, ServerWarning, Session, SessionState, StatusFlags};
use wsql_testing::{MockColumn, MockMySqlServer, MockResponse, MockServerBuilder};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn builder() -> MockServerBuilder {
    init_tracing();
    MockMySqlServer::builder().with_user("app", "secret")
}

fn options(server: &MockMySqlServer) -> ConnectOptions {
    ConnectOptions::new()
        .host(server.host())
        .port(server.port())
        .user("app")
        .password("secret")
}

/// Wait for the server to see `count` open connections.
fn wait_for_connections(server: &MockMySqlServer, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while server.connection_count() != count {
        assert!(Instant::now() < deadline, "server still has {} connections", server.connection_count());
        std::thread::sleep(Duration::from_millis(5));
    }
}

// =============================================================================
// Connect
// =============================================================================

#[test]
fn test_connect_reports_server_details() {
    let server = builder().with_server_version("8.0.36-lifecycle").build().unwrap();
    let session = Session::open(&options(&server)).expect("connect");

    assert_eq!(session.state(), SessionState::Connected);
    assert!(session.is_open());
    assert!(!session.closed());
    assert_eq!(session.server_info().unwrap(), "8.0.36-lifecycle");
    assert_eq!(session.proto_info().unwrap(), 10);
    assert_eq!(session.thread_id().unwrap(), 1);
    assert_eq!(session.host_info().unwrap(), "127.0.0.1 via TCP/IP");
    assert_eq!(session.port().unwrap(), server.port());
    assert_eq!(session.charset(), "utf8mb4");
    assert!(session.autocommit());
    assert_eq!(session.errno(), 0);

    let client_flag = session.client_flag().unwrap();
    assert!(client_flag.contains(CapabilityFlags::PROTOCOL_41));
    assert!(!client_flag.contains(CapabilityFlags::DEPRECATE_EOF));
    assert!(session
        .server_capabilities()
        .unwrap()
        .contains(CapabilityFlags::DEPRECATE_EOF));
    assert!(session.server_status().unwrap().contains(StatusFlags::AUTOCOMMIT));
    assert_eq!(server.connection_count(), 1);
}

#[test]
fn test_wrong_password_leaves_session_unopened() {
    let server = builder().build().unwrap();
    let mut session = Session::new();

    let err = session
        .connect(&options(&server).password("wrong"))
        .unwrap_err();
    assert_eq!(err.category(), Category::OperationalError);
    assert_eq!(err.code(), i32::from(codes::ER_ACCESS_DENIED_ERROR));
    assert!(err.message().starts_with("Access denied for user 'app'"));
    assert_eq!(session.errno(), codes::ER_ACCESS_DENIED_ERROR);
    assert_eq!(session.sqlstate(), "28000");
    assert_eq!(session.state(), SessionState::Unopened);

    // The same session may try again.
    session.connect(&options(&server)).expect("second connect");
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.errno(), 0);
}

#[test]
fn test_unknown_database() {
    let server = builder().with_databases(["shop"]).build().unwrap();
    let err = Session::open(&options(&server).database("missing")).unwrap_err();
    assert_eq!(err.category(), Category::ProgrammingError);
    assert_eq!(err.code(), i32::from(codes::ER_BAD_DB_ERROR));
    assert_eq!(err.message(), "Unknown database 'missing'");

    let session = Session::open(&options(&server).database("shop")).unwrap();
    assert!(session.is_connected());
}

#[test]
fn test_connection_refused() {
    init_tracing();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut session = Session::new();
    let err = session
        .connect(&ConnectOptions::new().host("127.0.0.1").port(port).user("app"))
        .unwrap_err();
    assert_eq!(err.category(), Category::OperationalError);
    assert_eq!(err.code(), i32::from(codes::CR_CONN_HOST_ERROR));
    assert!(err.message().starts_with("Can't connect to MySQL server"));
    assert_eq!(session.state(), SessionState::Unopened);
}

#[test]
fn test_greeting_error_is_reported() {
    let server = builder().with_greeting_error(1040, "Too many connections").build().unwrap();
    let err = Session::open(&options(&server)).unwrap_err();
    assert_eq!(err.code(), 1040);
    assert_eq!(err.message(), "Too many connections");
    assert_eq!(err.category(), Category::OperationalError);
}

#[test]
fn test_connect_twice_is_rejected() {
    let server = builder().build().unwrap();
    let mut session = Session::open(&options(&server)).unwrap();
    let err = session.connect(&options(&server)).unwrap_err();
    assert_eq!(err.category(), Category::ProgrammingError);
    assert_eq!(err.message(), "the connection is already open");
    assert!(session.is_connected());
}

#[test]
fn test_native_auth_switch() {
    let server = builder().with_auth_switch("mysql_native_password").build().unwrap();
    let session = Session::open(&options(&server)).expect("connect after auth switch");
    assert!(session.is_connected());
}

#[test]
fn test_unsupported_auth_plugin() {
    let server = builder().with_auth_switch("sha256_password").build().unwrap();
    let err = Session::open(&options(&server)).unwrap_err();
    assert_eq!(err.category(), Category::NotSupportedError);
    assert_eq!(err.code(), i32::from(codes::CR_AUTH_PLUGIN_CANNOT_LOAD));
    assert_eq!(err.message(), "Authentication plugin 'sha256_password' is not supported");
}

#[test]
fn test_init_command_runs_first() {
    let server = builder().build().unwrap();
    let _session = Session::open(&options(&server).init_command("SET time_zone = '+00:00'")).unwrap();
    assert_eq!(server.queries(), vec!["SET time_zone = '+00:00'".to_string()]);
}

#[test]
fn test_failing_init_command_fails_connect() {
    let server = builder()
        .with_response("SET bogus = 1", MockResponse::error(1193, "Unknown system variable 'bogus'"))
        .build()
        .unwrap();
    let mut session = Session::new();
    let err = session
        .connect(&options(&server).init_command("SET bogus = 1"))
        .unwrap_err();
    assert_eq!(err.code(), 1193);
    assert_eq!(session.state(), SessionState::Unopened);
}

// =============================================================================
// Statements
// =============================================================================

#[test]
fn test_ok_packet_metadata() {
    let server = builder()
        .with_response(
            "INSERT INTO items (name) VALUES ('pen')",
            MockResponse::inserted(42).with_warnings(1).with_info("Records: 1  Duplicates: 0  Warnings: 1"),
        )
        .build()
        .unwrap();
    let mut session = Session::open(&options(&server)).unwrap();

    session.query("INSERT INTO items (name) VALUES ('pen')").unwrap();
    assert_eq!(session.affected_rows(), 1);
    assert_eq!(session.insert_id(), 42);
    assert_eq!(session.warning_count(), 1);
    assert_eq!(session.info().as_deref(), Some("Records: 1  Duplicates: 0  Warnings: 1"));
    assert_eq!(session.field_count(), 0);
    assert!(session.get_result(false).unwrap().is_none());

    session.query("DELETE FROM nothing").unwrap();
    assert_eq!(session.affected_rows(), 0);
    assert_eq!(session.info(), None);
}

#[test]
fn test_server_errors_are_classified() {
    let server = builder()
        .with_response(
            "INSERT INTO t VALUES (1)",
            MockResponse::error_with_state(1062, "23000", "Duplicate entry '1' for key 'PRIMARY'"),
        )
        .with_response(
            "SELEC 1",
            MockResponse::error_with_state(1064, "42000", "You have an error in your SQL syntax"),
        )
        .with_response("SELECT * FROM gone", MockResponse::error_with_state(1146, "42S02", "Table 'gone' doesn't exist"))
        .build()
        .unwrap();
    let mut session = Session::open(&options(&server)).unwrap();

    let err = session.query("INSERT INTO t VALUES (1)").unwrap_err();
    assert_eq!(err.category(), Category::IntegrityError);
    assert_eq!(err.code(), 1062);
    assert_eq!(session.errno(), 1062);
    assert_eq!(session.sqlstate(), "23000");
    assert_eq!(session.error(), "Duplicate entry '1' for key 'PRIMARY'");

    let err = session.query("SELEC 1").unwrap_err();
    assert_eq!(err.category(), Category::ProgrammingError);

    let err = session.query("SELECT * FROM gone").unwrap_err();
    assert_eq!(err.category(), Category::ProgrammingError);
    assert!(err.is_database_error());

    // A server error does not disturb the connection.
    assert_eq!(session.state(), SessionState::Connected);
    session.query("SELECT 1").unwrap();
    assert_eq!(session.errno(), 0);
}

#[test]
fn test_commands_out_of_sync() {
    let server = builder()
        .with_response(
            "SELECT 1",
            MockResponse::rows(vec![MockColumn::long("1")], vec![vec![Some("1")]]),
        )
        .build()
        .unwrap();
    let mut session = Session::open(&options(&server)).unwrap();

    session.query("SELECT 1").unwrap();
    assert_eq!(session.field_count(), 1);
    let err = session.query("SELECT 1").unwrap_err();
    assert_eq!(err.code(), i32::from(codes::CR_COMMANDS_OUT_OF_SYNC));
    assert_eq!(err.category(), Category::OperationalError);

    // The pending result is still readable.
    let mut result = session.get_result(false).unwrap().expect("result");
    assert_eq!(result.fetch_row().unwrap().unwrap().get_str(0).as_deref(), Some("1"));
    session.ping(None).unwrap();
}

#[test]
fn test_show_warnings() {
    let server = builder()
        .with_response("INSERT INTO t VALUES ('toolong')", MockResponse::affected(1).with_warnings(1))
        .with_warning("Warning", 1265, "Data truncated for column 'a' at row 1")
        .build()
        .unwrap();
    let mut session = Session::open(&options(&server)).unwrap();

    session.query("INSERT INTO t VALUES ('toolong')").unwrap();
    assert_eq!(session.warning_count(), 1);
    let warnings = session.show_warnings().unwrap();
    assert_eq!(
        warnings,
        vec![ServerWarning {
            level: "Warning".to_string(),
            code: 1265,
            message: "Data truncated for column 'a' at row 1".to_string(),
        }]
    );
    assert_eq!(session.field_count(), 0);
    session.ping(None).unwrap();
}

// =============================================================================
// Commands
// =============================================================================

#[test]
fn test_select_db() {
    let server = builder().with_databases(["shop", "archive"]).build().unwrap();
    let mut session = Session::open(&options(&server)).unwrap();

    session.select_db("archive").unwrap();
    let err = session.select_db("nope").unwrap_err();
    assert_eq!(err.code(), i32::from(codes::ER_BAD_DB_ERROR));
    assert_eq!(err.category(), Category::ProgrammingError);
}

#[test]
fn test_autocommit_and_transactions() {
    let server = builder().build().unwrap();
    let mut session = Session::open(&options(&server)).unwrap();

    session.set_autocommit(false).unwrap();
    assert!(!session.autocommit());
    assert!(!session.server_status().unwrap().contains(StatusFlags::AUTOCOMMIT));
    session.commit().unwrap();
    session.rollback().unwrap();
    session.set_autocommit(true).unwrap();
    assert!(session.autocommit());

    assert_eq!(
        server.queries(),
        vec!["SET AUTOCOMMIT=0", "COMMIT", "ROLLBACK", "SET AUTOCOMMIT=1"]
    );
}

#[test]
fn test_set_charset() {
    let server = builder().build().unwrap();
    let mut session = Session::open(&options(&server)).unwrap();

    session.set_charset("latin1").unwrap();
    assert_eq!(session.charset(), "latin1");
    // Setting the current charset again is a no-op.
    session.set_charset("latin1").unwrap();
    assert_eq!(server.queries(), vec!["SET NAMES latin1"]);

    let err = session.set_charset("klingon").unwrap_err();
    assert_eq!(err.code(), i32::from(codes::CR_CANT_READ_CHARSET));
    assert_eq!(session.charset(), "latin1");
}

#[test]
fn test_sql_mode_changes_escaping() {
    let server = builder().build().unwrap();
    let mut session = Session::open(&options(&server)).unwrap();

    assert_eq!(session.escape(b"it's"), b"it\\'s".to_vec());
    session.set_sql_mode("ANSI_QUOTES,NO_BACKSLASH_ESCAPES").unwrap();
    assert!(session
        .server_status()
        .unwrap()
        .contains(StatusFlags::NO_BACKSLASH_ESCAPES));
    assert_eq!(session.escape(b"it's"), b"it''s".to_vec());
    assert_eq!(session.quote(b"a\\b"), b"'a\\b'".to_vec());
    assert_eq!(
        server.queries(),
        vec!["SET SESSION sql_mode='ANSI_QUOTES,NO_BACKSLASH_ESCAPES'"]
    );
}

#[test]
fn test_stat_and_admin_commands() {
    let server = builder().build().unwrap();
    let mut session = Session::open(&options(&server)).unwrap();

    assert!(session.stat().unwrap().starts_with("Uptime: 42"));
    session.set_server_option(ServerOption::MultiStatementsOn).unwrap();
    session.set_server_option(ServerOption::MultiStatementsOff).unwrap();
    session.dump_debug_info().unwrap();
    session.shutdown().unwrap();
    assert!(session.is_connected());
}

#[test]
fn test_change_user() {
    let server = builder()
        .with_user("report", "r3port")
        .with_databases(["shop"])
        .build()
        .unwrap();
    let mut session = Session::open(&options(&server)).unwrap();

    session.change_user("report", "r3port", Some("shop")).unwrap();
    assert!(session.is_connected());

    let err = session.change_user("report", "wrong", None).unwrap_err();
    assert_eq!(err.code(), i32::from(codes::ER_ACCESS_DENIED_ERROR));
}

#[test]
fn test_kill_unknown_thread() {
    let server = builder().build().unwrap();
    let mut session = Session::open(&options(&server)).unwrap();
    let err = session.kill(9999).unwrap_err();
    assert_eq!(err.code(), 1094);
    assert_eq!(err.message(), "Unknown thread id: 9999");
    assert_eq!(err.category(), Category::OperationalError);
}

// =============================================================================
// Liveness
// =============================================================================

#[test]
fn test_kill_other_session_marks_it_disconnected() {
    let server = builder().build().unwrap();
    let mut killer = Session::open(&options(&server)).unwrap();
    let mut victim = Session::open(&options(&server)).unwrap();
    wait_for_connections(&server, 2);

    killer.kill(victim.thread_id().unwrap()).unwrap();
    wait_for_connections(&server, 1);

    let err = victim.ping(None).unwrap_err();
    assert!(err.is_connection_lost(), "unexpected error {err:?}");
    assert_eq!(victim.state(), SessionState::Disconnected);
    assert!(victim.is_open());
    assert!(!victim.is_connected());

    // Without a socket every command now reports the server gone.
    let err = victim.query("SELECT 1").unwrap_err();
    assert_eq!(err.code(), i32::from(codes::CR_SERVER_GONE_ERROR));
    assert!(killer.is_connected());
}

#[test]
fn test_killing_own_connection() {
    let server = builder().build().unwrap();
    let mut session = Session::open(&options(&server)).unwrap();
    let err = session.kill(session.thread_id().unwrap()).unwrap_err();
    assert!(err.is_connection_lost());
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[test]
fn test_disconnect_during_query() {
    let server = builder()
        .with_response("SELECT SLEEP(100)", MockResponse::Disconnect)
        .build()
        .unwrap();
    let mut session = Session::open(&options(&server)).unwrap();

    let err = session.query("SELECT SLEEP(100)").unwrap_err();
    assert_eq!(err.code(), i32::from(codes::CR_SERVER_LOST));
    assert_eq!(err.category(), Category::OperationalError);
    assert_eq!(session.sqlstate(), "08S01");
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[test]
fn test_ping_reconnects_when_enabled() {
    let server = builder().build().unwrap();
    let mut session = Session::open(&options(&server)).unwrap();
    session.ping(None).unwrap();
    assert_eq!(session.thread_id().unwrap(), 1);

    server.disconnect_all();
    let err = session.ping(Some(false)).unwrap_err();
    assert!(err.is_connection_lost());
    assert_eq!(session.state(), SessionState::Disconnected);

    session.ping(Some(true)).expect("ping with reconnect");
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.thread_id().unwrap(), 2);
    assert_eq!(server.accepted_count(), 2);
}

#[test]
fn test_failed_reconnect_stays_disconnected() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);
    let server = builder()
        .with_response(
            "SET time_zone = '+00:00'",
            MockResponse::custom(move |_| {
                if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    MockResponse::ok()
                } else {
                    MockResponse::error(1040, "Too many connections")
                }
            }),
        )
        .build()
        .unwrap();
    let mut session = Session::open(&options(&server).init_command("SET time_zone = '+00:00'")).unwrap();

    server.disconnect_all();
    let err = session.ping(Some(false)).unwrap_err();
    assert!(err.is_connection_lost());
    assert_eq!(session.state(), SessionState::Disconnected);

    let err = session.ping(Some(true)).unwrap_err();
    assert_eq!(err.code(), 1040);
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.is_connected());
    assert!(session.fd().is_none());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn test_ping_without_reconnect_stays_down() {
    let server = builder().build().unwrap();
    let mut session = Session::open(&options(&server)).unwrap();

    server.disconnect_all();
    assert!(session.ping(None).is_err());
    assert!(session.ping(None).is_err());
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(server.accepted_count(), 1);
}

// =============================================================================
// Close
// =============================================================================

#[test]
fn test_close_releases_connection() {
    let server = builder().build().unwrap();
    let mut session = Session::open(&options(&server)).unwrap();
    wait_for_connections(&server, 1);

    session.close().unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    wait_for_connections(&server, 0);

    let err = session.close().unwrap_err();
    assert_eq!(err.message(), "closing a closed connection");
    let err = session.query("SELECT 1").unwrap_err();
    assert_eq!(err.category(), Category::ProgrammingError);
    assert_eq!(err.message(), "the connection is closed");
    let err = session.connect(&options(&server)).unwrap_err();
    assert_eq!(err.message(), "the connection is closed");
}

#[test]
fn test_drop_releases_connection() {
    let server = builder().build().unwrap();
    {
        let _session = Session::open(&options(&server)).unwrap();
        wait_for_connections(&server, 1);
    }
    wait_for_connections(&server, 0);
}
