//! Shared setup for the scripted-server tests.

#![allow(dead_code)]

use tds_client::{Config, Connection};
use tds_testing::{MockColumn, MockTdsServer, ScalarValue, TokenStream};

/// A client connection wired to a scripted server.
pub fn connect(config: Config) -> (Connection, MockTdsServer) {
    let (transport, server) = MockTdsServer::pair();
    let conn = Connection::new(transport, config).unwrap();
    (conn, server)
}

/// A single INT column named `id`.
pub fn id_column() -> [MockColumn; 1] {
    [MockColumn::int("id")]
}

/// Result set of `count` rows numbered from 1, with its final DONE.
pub fn numbered_rows(count: i32) -> TokenStream {
    let columns = id_column();
    let rows: Vec<Vec<ScalarValue>> = (1..=count).map(|i| vec![ScalarValue::Int(i)]).collect();
    TokenStream::new()
        .colmetadata(&columns)
        .rows(&columns, &rows)
}

/// Log to the test output when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
