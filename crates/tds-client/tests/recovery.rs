//! Connection sharing and recovery after protocol errors and abandoned
//! statements.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::{connect, id_column, numbered_rows};
use std::time::Duration;

use tds_client::{Config, Error, Request};
use tds_testing::{ScalarValue, TokenStream};

#[tokio::test]
async fn test_protocol_confusion_leaves_connection_reusable() {
    let (conn, mut server) = connect(Config::new());
    let server = tokio::spawn(async move {
        let columns = id_column();
        let tokens = TokenStream::new()
            .colmetadata(&columns)
            .row(&columns, &[ScalarValue::Int(1)])
            // a tag nothing knows how to skip
            .raw(&[0x42, 0x00, 0x00])
            .done_count(1)
            .build();
        server.respond(tokens).await?;
        server.respond(numbered_rows(1).done_count(1).build()).await
    });

    let mut stmt = conn.statement();
    assert!(stmt.execute(Request::batch("SELECT id FROM t")).await.unwrap());
    let err = stmt.advance_row().await.unwrap_err();
    assert!(matches!(err, Error::ProtocolConfusion { tag: 0x42 }));
    assert!(err.is_protocol_error());
    assert!(!conn.is_busy());
    assert!(matches!(stmt.advance_result().await, Err(Error::Unusable)));

    assert!(stmt.execute(Request::batch("SELECT id FROM t")).await.unwrap());
    assert!(stmt.advance_row().await.unwrap());
    assert_eq!(stmt.get::<i32>(0).unwrap(), Some(1));
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_metadata_inside_result_set_is_confusion() {
    let (conn, mut server) = connect(Config::new());
    let columns = id_column();
    let tokens = TokenStream::new()
        .colmetadata(&columns)
        .row(&columns, &[ScalarValue::Int(1)])
        .colmetadata(&columns)
        .done_count(1)
        .build();
    let server = tokio::spawn(async move { server.respond(tokens).await });

    let mut stmt = conn.statement();
    assert!(stmt.execute(Request::batch("SELECT id FROM t")).await.unwrap());
    assert!(matches!(
        stmt.load_remaining().await,
        Err(Error::ProtocolConfusion { tag: 0x81 })
    ));
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_undecodable_data_before_attention_acknowledgement() {
    let (conn, mut server) = connect(Config::new().fetch_size(1));
    let server = tokio::spawn(async move {
        server.recv().await?;
        server.send_part(&numbered_rows(3).build(), false).await?;
        server.acknowledge_attention(&[0x42, 0x00, 0x00]).await?;
        server.respond(TokenStream::new().done_count(4).build()).await
    });

    let mut stmt = conn.statement();
    assert!(stmt.execute(Request::batch("SELECT id FROM t")).await.unwrap());
    assert!(stmt.advance_row().await.unwrap());
    assert!(stmt.cancel_handle().cancel().await.unwrap());
    assert!(stmt.advance_row().await.unwrap_err().is_canceled());
    assert!(!conn.is_busy());

    let executed = tokio::time::timeout(
        Duration::from_secs(3),
        stmt.execute(Request::batch("DELETE FROM t")),
    )
    .await
    .expect("dispatch after skipping to the acknowledgement hung");
    assert!(!executed.unwrap());
    assert_eq!(stmt.update_count(), 4);
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_dropped_statement_with_undecodable_tail_after_cancel() {
    let (conn, mut server) = connect(Config::new().fetch_size(1));
    let server = tokio::spawn(async move {
        server.recv().await?;
        server.send_part(&numbered_rows(3).build(), false).await?;
        server.acknowledge_attention(&[0x42, 0x00, 0x00]).await?;
        server.respond(numbered_rows(1).done_count(1).build()).await
    });

    let mut first = conn.statement();
    assert!(first.execute(Request::batch("SELECT id FROM t")).await.unwrap());
    assert!(first.cancel_handle().cancel().await.unwrap());
    drop(first);

    let mut second = conn.statement();
    let executed = tokio::time::timeout(
        Duration::from_secs(3),
        second.execute(Request::batch("SELECT id FROM t")),
    )
    .await
    .expect("dispatch after a dropped, canceled statement hung");
    assert!(executed.unwrap());
    assert!(second.advance_row().await.unwrap());
    assert_eq!(second.get::<i32>(0).unwrap(), Some(1));
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_statements_take_turns_on_the_connection() {
    let (conn, mut server) = connect(Config::new().fetch_size(1));
    let server = tokio::spawn(async move {
        server.respond(numbered_rows(5).done_count(5).build()).await?;
        server.respond(numbered_rows(2).done_count(2).build()).await
    });

    let mut first = conn.statement();
    let mut second = conn.statement();
    assert!(first.execute(Request::batch("SELECT id FROM a")).await.unwrap());
    assert!(first.advance_row().await.unwrap());
    assert!(conn.is_busy());
    assert!(matches!(
        second.try_dispatch(Request::batch("SELECT id FROM b")).await,
        Err(Error::ConnectionBusy)
    ));

    // dropping the reader frees the connection; its leftovers are drained
    drop(first);
    assert!(!conn.is_busy());
    second
        .try_dispatch(Request::batch("SELECT id FROM b"))
        .await
        .unwrap();
    assert!(second.advance_result().await.unwrap());
    let mut seen = Vec::new();
    while second.advance_row().await.unwrap() {
        seen.push(second.get::<i32>(0).unwrap().unwrap());
    }
    assert_eq!(seen, vec![1, 2]);

    let request = server.await.unwrap().unwrap();
    assert_eq!(request.sql().unwrap(), "SELECT id FROM b");
}

#[tokio::test]
async fn test_close_skips_the_rest_of_the_response() {
    let (conn, mut server) = connect(Config::new().fetch_size(1));
    let server = tokio::spawn(async move {
        server.respond(numbered_rows(3).done_count(3).build()).await
    });

    let mut stmt = conn.statement();
    assert!(stmt.execute(Request::batch("SELECT id FROM t")).await.unwrap());
    assert!(conn.is_busy());
    stmt.close().await.unwrap();
    assert!(!conn.is_busy());
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_closed_transport_is_reported() {
    let (conn, server) = connect(Config::new());
    drop(server);

    let mut stmt = conn.statement();
    let err = stmt.execute(Request::batch("SELECT 1")).await.unwrap_err();
    assert!(err.is_connection_fatal());
}
