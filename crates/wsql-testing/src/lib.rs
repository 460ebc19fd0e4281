//! # wsql-testing
//!
//! Test infrastructure for the wsql MySQL client.
//!
//! ## Features
//!
//! - In-process mock MySQL server (no database required)
//! - Canned table fixtures
//!
//! ## Mock Server Example
//!
//! ```rust,ignore
//! use wsql_testing::{MockColumn, MockMySqlServer, MockResponse};
//!
//! #[test]
//! fn test_with_mock_server() {
//!     let server = MockMySqlServer::builder()
//!         .with_response(
//!             "SELECT id, name FROM users WHERE id = 1",
//!             MockResponse::rows(
//!                 vec![MockColumn::long("id"), MockColumn::varchar("name", 50)],
//!                 vec![vec![Some("1"), Some("Alice")]],
//!             ),
//!         )
//!         .build()
//!         .unwrap();
//!
//!     // Connect your client to server.host():server.port()
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock_server;

pub use fixtures::TableFixture;
pub use mock_server::{
    DEFAULT_SERVER_VERSION, MockColumn, MockMySqlServer, MockResponse, MockServerBuilder, MockServerConfig,
    MockServerError,
};
