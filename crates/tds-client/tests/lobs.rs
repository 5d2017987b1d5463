//! Large-object columns read through a statement.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::connect;
use tds_client::{Config, Error, Request};
use tds_testing::{MockColumn, ScalarValue, TokenStream};

fn lob_columns() -> [MockColumn; 2] {
    [
        // odd chunk sizes split UTF-16 code units across chunks
        MockColumn::nvarchar_max("doc").with_chunk_size(3),
        MockColumn::varbinary_max("data").with_chunk_size(4),
    ]
}

fn lob_rows() -> TokenStream {
    let columns = lob_columns();
    TokenStream::new().colmetadata(&columns).rows(
        &columns,
        &[
            vec![
                ScalarValue::string("héllo wörld"),
                ScalarValue::Binary((0u8..20).collect()),
            ],
            vec![ScalarValue::Null, ScalarValue::Null],
            vec![ScalarValue::string(""), ScalarValue::Binary(Vec::new())],
        ],
    )
}

#[tokio::test]
async fn test_lob_positions_are_one_based() {
    let (conn, mut server) = connect(Config::new());
    let server = tokio::spawn(async move { server.respond(lob_rows().done_count(3).build()).await });

    let mut stmt = conn.statement();
    assert!(stmt.execute(Request::batch("SELECT doc, data FROM files")).await.unwrap());
    assert!(stmt.advance_row().await.unwrap());

    let clob = stmt.clob(0).unwrap().unwrap();
    assert_eq!(clob.length().unwrap(), 11);
    assert_eq!(clob.sub_string(1, 5).unwrap(), "héllo");
    assert_eq!(clob.sub_string(9, 100).unwrap(), "rld");
    assert_eq!(clob.sub_string(12, 1).unwrap(), "");
    assert!(matches!(
        clob.sub_string(0, 1),
        Err(Error::LobRange { position: 0, .. })
    ));
    assert_eq!(clob.chars().collect::<String>(), "héllo wörld");

    let blob = stmt.blob(1).unwrap().unwrap();
    assert_eq!(blob.length(), 20);
    assert_eq!(blob.bytes(5, 3).unwrap(), vec![4, 5, 6]);
    assert_eq!(blob.bytes(21, 5).unwrap(), Vec::<u8>::new());
    assert!(matches!(
        blob.bytes(22, 1),
        Err(Error::LobRange { position: 22, length: 20, .. })
    ));
    // chunks come through as they were sent
    assert_eq!(blob.stream().count(), 5);

    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_null_lob_differs_from_empty_lob() {
    let (conn, mut server) = connect(Config::new());
    let server = tokio::spawn(async move { server.respond(lob_rows().done_count(3).build()).await });

    let mut stmt = conn.statement();
    assert!(stmt.execute(Request::batch("SELECT doc, data FROM files")).await.unwrap());
    assert!(stmt.advance_row().await.unwrap());
    assert!(stmt.clob(0).unwrap().is_some());
    assert!(!stmt.was_null());

    assert!(stmt.advance_row().await.unwrap());
    assert!(stmt.clob(0).unwrap().is_none());
    assert!(stmt.was_null());
    assert!(stmt.blob(1).unwrap().is_none());
    assert!(stmt.was_null());

    assert!(stmt.advance_row().await.unwrap());
    let empty = stmt.clob(0).unwrap().unwrap();
    assert!(!stmt.was_null());
    assert_eq!(empty.length().unwrap(), 0);
    assert_eq!(stmt.blob(1).unwrap().unwrap().length(), 0);
    assert!(!stmt.was_null());
    assert_eq!(stmt.string(0).unwrap().as_deref(), Some(""));

    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_lob_outlives_its_row_and_can_be_modified() {
    let (conn, mut server) = connect(Config::new().fetch_size(1));
    let server = tokio::spawn(async move { server.respond(lob_rows().done_count(3).build()).await });

    let mut stmt = conn.statement();
    assert!(stmt.execute(Request::batch("SELECT doc, data FROM files")).await.unwrap());
    assert!(stmt.advance_row().await.unwrap());
    let mut clob = stmt.clob(0).unwrap().unwrap();
    let mut blob = stmt.blob(1).unwrap().unwrap();

    // move past the row; the values are snapshots
    while stmt.advance_row().await.unwrap() {}

    assert_eq!(clob.set_string(7, "there").unwrap(), 5);
    assert_eq!(clob.text().unwrap(), "héllo there");
    assert_eq!(clob.set_string(12, "!").unwrap(), 1);
    assert_eq!(clob.length().unwrap(), 12);
    clob.truncate(5).unwrap();
    assert_eq!(clob.text().unwrap(), "héllo");
    assert!(clob.truncate(6).is_err());

    assert_eq!(blob.set_bytes(19, &[9, 9, 9]).unwrap(), 3);
    assert_eq!(blob.length(), 21);
    assert_eq!(blob.bytes(18, 10).unwrap(), vec![17, 9, 9, 9]);
    assert!(matches!(blob.truncate(25), Err(Error::LobRange { .. })));
    blob.truncate(2).unwrap();
    assert_eq!(blob.to_bytes().as_ref(), &[0, 1]);

    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_legacy_text_and_image_columns() {
    let (conn, mut server) = connect(Config::new());
    let columns = [
        MockColumn::text("notes"),
        MockColumn::ntext("title"),
        MockColumn::image("thumb"),
    ];
    let tokens = TokenStream::new()
        .colmetadata(&columns)
        .row(
            &columns,
            &[
                ScalarValue::string("café"),
                ScalarValue::string("naïve"),
                ScalarValue::Binary(vec![0xFF, 0xD8, 0xFF]),
            ],
        )
        .done_count(1)
        .build();
    let server = tokio::spawn(async move { server.respond(tokens).await });

    let mut stmt = conn.statement();
    assert!(stmt.execute(Request::batch("SELECT notes, title, thumb FROM legacy")).await.unwrap());
    assert!(stmt.advance_row().await.unwrap());

    assert_eq!(stmt.clob(0).unwrap().unwrap().text().unwrap(), "café");
    assert_eq!(stmt.clob(1).unwrap().unwrap().length().unwrap(), 5);
    let thumb = stmt.blob(2).unwrap().unwrap();
    assert_eq!(thumb.bytes(1, 2).unwrap(), vec![0xFF, 0xD8]);

    // an image column is not character data
    assert!(matches!(stmt.clob(2), Err(Error::Type(_))));
    server.await.unwrap().unwrap();
}
