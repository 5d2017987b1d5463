//! Cancellation and command timeouts.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::time::Duration;

use common::{connect, init_tracing, numbered_rows};
use tds_client::{Config, Error, Request};
use tds_testing::{TokenStream, attention_ack};

#[tokio::test]
async fn test_cancel_mid_fetch_raises_query_canceled() {
    init_tracing();
    let (conn, mut server) = connect(Config::new().fetch_size(2));
    let server = tokio::spawn(async move {
        server.recv().await?;
        // rows in flight, message not finished
        server.send_part(&numbered_rows(5).build(), false).await?;
        server.acknowledge_attention(&[]).await?;
        server.respond(TokenStream::new().done_count(0).build()).await
    });

    let mut stmt = conn.statement();
    assert!(stmt.execute(Request::batch("SELECT id FROM big")).await.unwrap());
    assert!(stmt.advance_row().await.unwrap());

    let handle = stmt.cancel_handle();
    assert!(handle.cancel().await.unwrap());
    assert!(handle.is_cancelling());

    // the cached second row is not handed out
    let err = stmt.advance_row().await.unwrap_err();
    assert!(matches!(err, Error::QueryCanceled { timed_out: false }));
    assert!(err.is_canceled());
    assert!(!stmt.advance_row().await.unwrap());
    assert!(!stmt.advance_result().await.unwrap());

    // the connection is clean again
    assert!(!handle.cancel().await.unwrap());
    assert!(!stmt.execute(Request::batch("SELECT 1")).await.unwrap());
    assert_eq!(stmt.update_count(), 0);
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cancel_drains_tokens_sent_before_the_acknowledgement() {
    let (conn, mut server) = connect(Config::new());
    let server = tokio::spawn(async move {
        server.recv().await?;
        server.send_part(&numbered_rows(2).build(), false).await?;
        let pending = TokenStream::new().info(5701, "late").build();
        server.acknowledge_attention(&pending).await?;
        server.respond(TokenStream::new().done_count(0).build()).await
    });

    let mut stmt = conn.statement();
    assert!(stmt.execute(Request::batch("SELECT id FROM big")).await.unwrap());
    assert!(stmt.cancel_handle().cancel().await.unwrap());
    assert!(stmt.advance_row().await.unwrap_err().is_canceled());

    assert!(!stmt.execute(Request::batch("SELECT 1")).await.unwrap());
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_dropped_canceled_statement_frees_the_connection() {
    let (conn, mut server) = connect(Config::new());
    let server = tokio::spawn(async move {
        server.recv().await?;
        server.send_part(&numbered_rows(5).build(), false).await?;
        server.acknowledge_attention(&[]).await?;
        server.respond(TokenStream::new().done_count(1).build()).await
    });

    let mut first = conn.statement();
    assert!(first.execute(Request::batch("SELECT id FROM big")).await.unwrap());
    assert!(first.advance_row().await.unwrap());
    assert!(first.cancel_handle().cancel().await.unwrap());
    drop(first);

    // the acknowledgement ends the message the rows were part of
    let mut second = conn.statement();
    let executed = tokio::time::timeout(
        Duration::from_secs(3),
        second.execute(Request::batch("UPDATE t SET x = 1")),
    )
    .await
    .expect("dispatch after a dropped, canceled statement hung");
    assert!(!executed.unwrap());
    assert_eq!(second.update_count(), 1);

    let request = server.await.unwrap().unwrap();
    assert_eq!(request.sql().unwrap(), "UPDATE t SET x = 1");
}

#[tokio::test]
async fn test_cancel_racing_the_final_done() {
    let (conn, mut server) = connect(Config::new().fetch_size(10));
    let server = tokio::spawn(async move {
        server.recv().await?;
        server.send_part(&numbered_rows(2).build(), false).await?;
        let attention = server.recv().await?;
        assert!(attention.is_attention());
        // the batch finished before the attention was seen
        server.send(TokenStream::new().done_count(2).build()).await?;
        server.send(attention_ack()).await?;
        server.respond(TokenStream::new().done_count(0).build()).await
    });

    let mut stmt = conn.statement();
    assert!(stmt.execute(Request::batch("SELECT id FROM t")).await.unwrap());
    let handle = stmt.cancel_handle();
    let (first, canceled) = tokio::join!(stmt.advance_row(), handle.cancel());
    assert!(canceled.unwrap());
    assert!(first.unwrap());
    assert!(!conn.is_busy());
    assert!(!handle.is_cancelling());

    assert!(stmt.advance_row().await.unwrap());
    assert_eq!(stmt.get::<i32>(0).unwrap(), Some(2));
    assert!(!stmt.advance_row().await.unwrap());

    let executed = tokio::time::timeout(
        Duration::from_secs(3),
        stmt.execute(Request::batch("SELECT 1")),
    )
    .await
    .expect("dispatch after a late cancel hung");
    assert!(!executed.unwrap());
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cancel_without_request_in_flight_is_a_no_op() {
    let (conn, _server) = connect(Config::new());
    assert!(!conn.cancel_handle().cancel().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_command_timeout_cancels_request() {
    let (conn, mut server) = connect(Config::new().command_timeout(Duration::from_secs(5)));
    let server = tokio::spawn(async move {
        server.recv().await?;
        server.acknowledge_attention(&[]).await?;
        server.respond(TokenStream::new().done_count(3).build()).await
    });

    let mut stmt = conn.statement();
    let err = stmt
        .execute(Request::batch("WAITFOR DELAY '01:00'"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::QueryCanceled { timed_out: true }));
    assert!(!conn.is_busy());

    assert!(!stmt.execute(Request::batch("UPDATE t SET x = 1")).await.unwrap());
    assert_eq!(stmt.update_count(), 3);
    server.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_statement_timeout_overrides_config() {
    let (conn, mut server) = connect(Config::new());
    let server = tokio::spawn(async move {
        server.recv().await?;
        server.acknowledge_attention(&[]).await
    });

    let mut stmt = conn.statement();
    stmt.set_timeout(Some(Duration::from_millis(250)));
    let err = stmt
        .execute(Request::batch("WAITFOR DELAY '01:00'"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::QueryCanceled { timed_out: true }));
    server.await.unwrap().unwrap();
}
