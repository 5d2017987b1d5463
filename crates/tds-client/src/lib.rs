//! # tds-client
//!
//! Async client core for the Tabular Data Stream protocol: sending a
//! request and walking its response.
//!
//! The crate sits on top of an authenticated transport. Login, TLS and
//! pooling are handled elsewhere; what it provides is everything between a
//! request going out and the last token of its response coming back:
//!
//! - **Result navigation**: a response may hold any mix of result sets and
//!   update counts. [`Statement::advance_result`] and
//!   [`Statement::advance_row`] walk them in wire order.
//! - **Row cache**: rows are fetched in batches of the fetch size, which can
//!   change between batches without losing rows.
//! - **Warnings**: informational messages and non-fatal errors collect on a
//!   [`WarningChain`]; the first fatal error is raised once, after the rows
//!   that preceded it.
//! - **Large objects**: [`Blob`] and [`Clob`] give positional, one-based
//!   access to large values, read lazily from the chunks decoded off the
//!   wire.
//! - **Cancellation and timeouts**: a [`CancelHandle`] can stop the request
//!   in flight from any task; a command timeout does the same on its own.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tds_client::{Config, Connection};
//!
//! let config = Config::from_connection_string("Packet Size=8192;Fetch Size=500")?;
//! let conn = Connection::new(transport, config)?;
//!
//! let mut stmt = conn.statement();
//! if stmt.execute_sql("SELECT id, name FROM users WHERE active = @p1", &[&true]).await? {
//!     while stmt.advance_row().await? {
//!         let id: Option<i32> = stmt.get(0)?;
//!         let name: Option<String> = stmt.string(1)?;
//!     }
//! }
//! for warning in stmt.warnings() {
//!     tracing::info!(number = warning.number, "{}", warning.message);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cancel;
pub mod config;
pub mod connection;
pub mod error;
pub mod lob;
pub mod output;
pub mod row;
mod row_cache;
pub mod state;
pub mod statement;
mod stream;
pub mod warnings;

pub use cancel::CancelHandle;
pub use config::Config;
pub use connection::Connection;
pub use error::{Error, Result};
pub use lob::{Blob, BlobStream, Clob, ClobChars};
pub use output::OutputHandler;
pub use row::Row;
pub use state::ResultState;
pub use statement::Statement;
pub use warnings::WarningChain;

// Re-export the protocol and type items that appear in this crate's API
pub use tds_protocol::{
    ColumnDescriptor, ColumnMetadata, ColumnValue, MessageKind, OutputParameter, Request,
    RpcParam, RpcRequest, ServerMessage,
};
pub use tds_types::{FromSql, ToSql, TypeError};
