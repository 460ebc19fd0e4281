//! # wsql-client
//!
//! MySQL client session layer: connection lifecycle, statements, buffered
//! and streamed result sets, and a classified error taxonomy.
//!
//! Every operation exists in a blocking form. Connect, query, select_db and
//! next_result also have a two-phase non-blocking form (`begin_*` then
//! `poll_*`) for callers that drive their own readiness loop; no threads or
//! async runtime are involved.
//!
//! ## Session lifecycle
//!
//! ```text
//! Unopened ──connect──▶ Connected ⇄ Disconnected ──close / drop──▶ Closed
//! ```
//!
//! A failed connect leaves the session unopened. A connection-lost error
//! (2006, 2013) moves an open session to `Disconnected`; any later command
//! that completes without one moves it back. `Closed` is terminal.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wsql_client::{ConnectOptions, Session};
//!
//! fn main() -> Result<(), wsql_client::Error> {
//!     let options = ConnectOptions::new()
//!         .host("db.internal")
//!         .user("app")
//!         .password("secret")
//!         .database("shop");
//!     let mut session = Session::open(&options)?;
//!
//!     session.query("SELECT id, name FROM customers")?;
//!     if let Some(result) = session.get_result(false)? {
//!         for row in result {
//!             let row = row?;
//!             println!("{:?} {:?}", row.get_str(0), row.get_str(1));
//!         }
//!     }
//!     session.close()
//! }
//! ```
//!
//! ## Errors
//!
//! Failures surface as [`Error`] values carrying a [`Category`], the MySQL
//! error code and its message. Server and client codes are mapped to a
//! category through a static table with a numeric-range fallback; see
//! [`classify`].

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod classify;
pub mod config;
pub mod error;
pub mod field;
pub mod result;
pub mod row;
pub mod runtime;
pub mod session;
pub mod state;

mod inner;
#[cfg(feature = "nonblocking")]
mod nonblocking;
mod ops;
mod option_file;

pub use classify::{ErrorSource, category_for_code, classify};
pub use config::{ConnectOptions, DEFAULT_HOST, DEFAULT_PORT, SslOptions};
pub use error::{Category, Error, Result, is_connection_lost_code, is_deadlock_code, is_retryable_code};
pub use field::{ColumnDescription, Field};
pub use mysql_protocol::{CapabilityFlags, Charset, ServerOption, StatusFlags};
pub use result::{ResultStream, RowOffset};
pub use row::Row;
pub use session::{ServerWarning, Session};
pub use state::{AsyncStatus, Interest, OpKind, SessionState};
