//! # tds-testing
//!
//! Test infrastructure for the TDS client.
//!
//! - [`TokenStream`] encodes response tokens: column metadata, rows with
//!   in-row, PLP and textptr values, messages, end tokens and output
//!   parameters.
//! - [`MockTdsServer`] answers requests over an in-memory duplex stream,
//!   with control over packet size, unterminated messages and attention
//!   acknowledgement.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tds_testing::{MockColumn, MockTdsServer, ScalarValue, TokenStream};
//!
//! let columns = [MockColumn::int("id"), MockColumn::nvarchar("name", 50)];
//! let tokens = TokenStream::new()
//!     .colmetadata(&columns)
//!     .row(&columns, &[ScalarValue::Int(1), ScalarValue::string("Alice")])
//!     .done_count(1)
//!     .build();
//!
//! let (transport, mut server) = MockTdsServer::pair();
//! tokio::spawn(async move { server.respond(tokens).await });
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock_server;
pub mod tokens;

pub use mock_server::{MockServerError, MockTdsServer, RecordedRequest};
pub use tokens::{MockColumn, ScalarValue, TokenStream, attention_ack, utf16_bytes};
