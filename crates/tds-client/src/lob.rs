//! Large object values.
//!
//! [`Blob`] and [`Clob`] wrap the chunks a large-object column arrived in.
//! Nothing is copied until positional access needs a contiguous buffer;
//! streaming access ([`Blob::stream`], [`Clob::chars`]) walks the chunks
//! directly. A value is a snapshot of its row: it stays valid after the
//! statement moves on.
//!
//! Positions are 1-based. A position may point one past the end (an empty
//! read, or an append) but never further; truncating to a length larger
//! than the current one is an error.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tokio::io::AsyncReadExt;
//!
//! if let Some(blob) = statement.blob(0)? {
//!     let header = blob.bytes(1, 16)?;
//!     let mut file = tokio::fs::File::create("output.bin").await?;
//!     tokio::io::copy(&mut blob.stream(), &mut file).await?;
//! }
//! ```

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use encoding_rs::{CoderResult, Decoder, Encoding, UTF_8, UTF_16LE};
use once_cell::sync::OnceCell;
use tds_protocol::{LobKind, LobValue};
use tds_types::{TypeError, lob_to_string};
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::{Error, Result};

/// Validate a 1-based position against the current length and return the
/// zero-based offset.
fn offset(operation: &'static str, position: u64, length: u64) -> Result<usize> {
    let out_of_range = || Error::LobRange {
        operation,
        position,
        length,
    };
    if position < 1 || position > length + 1 {
        return Err(out_of_range());
    }
    usize::try_from(position - 1).map_err(|_| out_of_range())
}

fn check_truncate(new_length: u64, length: u64) -> Result<usize> {
    if new_length > length {
        return Err(Error::LobRange {
            operation: "truncate",
            position: new_length,
            length,
        });
    }
    // new_length <= length, which came from an in-memory buffer
    Ok(new_length as usize)
}

/// Binary large object.
#[derive(Debug, Clone)]
pub struct Blob {
    source: LobValue,
    data: OnceCell<Vec<u8>>,
    /// `data` was written to and no longer matches `source`.
    modified: bool,
}

impl Blob {
    /// Wrap a large-object value as received from the wire.
    #[must_use]
    pub fn from_lob(source: LobValue) -> Self {
        Self {
            source,
            data: OnceCell::new(),
            modified: false,
        }
    }

    /// Wrap an in-row binary value.
    #[must_use]
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self::from_lob(LobValue::new(LobKind::Binary, vec![bytes]))
    }

    /// Current length in bytes.
    #[must_use]
    pub fn length(&self) -> u64 {
        match self.data.get() {
            Some(data) => data.len() as u64,
            None => self.source.byte_len(),
        }
    }

    fn data(&self) -> &[u8] {
        self.data.get_or_init(|| self.source.to_bytes().to_vec())
    }

    fn modify<R>(&mut self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        let mut data = match self.data.take() {
            Some(data) => data,
            None => self.source.to_bytes().to_vec(),
        };
        let result = f(&mut data);
        self.data = OnceCell::from(data);
        self.modified = true;
        result
    }

    /// Read up to `length` bytes starting at the 1-based `position`.
    ///
    /// Reading past the end returns only the bytes that exist.
    pub fn bytes(&self, position: u64, length: usize) -> Result<Vec<u8>> {
        let start = offset("bytes", position, self.length())?;
        let data = self.data();
        let end = start.saturating_add(length).min(data.len());
        Ok(data[start..end].to_vec())
    }

    /// Write `bytes` at the 1-based `position`, extending the value if the
    /// write runs past its end. Returns the number of bytes written.
    pub fn set_bytes(&mut self, position: u64, bytes: &[u8]) -> Result<usize> {
        let start = offset("set_bytes", position, self.length())?;
        self.modify(|data| {
            let end = start + bytes.len();
            if end > data.len() {
                data.resize(end, 0);
            }
            data[start..end].copy_from_slice(bytes);
        });
        Ok(bytes.len())
    }

    /// Cut the value down to `length` bytes.
    pub fn truncate(&mut self, length: u64) -> Result<()> {
        let length = check_truncate(length, self.length())?;
        self.modify(|data| data.truncate(length));
        Ok(())
    }

    /// Stream the value chunk by chunk.
    ///
    /// Each call starts a new pass from the first byte. Until the value is
    /// modified the chunks are the ones received from the wire.
    #[must_use]
    pub fn stream(&self) -> BlobStream {
        let chunks = match self.data.get() {
            Some(data) if self.modified => VecDeque::from([Bytes::copy_from_slice(data)]),
            _ => self.source.chunks().iter().cloned().collect(),
        };
        BlobStream { chunks }
    }

    /// The whole value as one buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        match self.data.get() {
            Some(data) if self.modified => Bytes::copy_from_slice(data),
            _ => self.source.to_bytes(),
        }
    }
}

/// Single-pass reader over a [`Blob`].
///
/// Implements [`AsyncRead`] for copying into any writer and [`Iterator`]
/// over the wire chunks, which are yielded without copying.
#[derive(Debug)]
pub struct BlobStream {
    chunks: VecDeque<Bytes>,
}

impl BlobStream {
    /// Bytes not yet read.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }
}

impl Iterator for BlobStream {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        loop {
            let chunk = self.chunks.pop_front()?;
            if !chunk.is_empty() {
                return Some(chunk);
            }
        }
    }
}

impl AsyncRead for BlobStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        while let Some(front) = this.chunks.front_mut() {
            if front.is_empty() {
                this.chunks.pop_front();
                continue;
            }
            let n = front.len().min(buf.remaining());
            buf.put_slice(&front[..n]);
            front.advance(n);
            break;
        }
        Poll::Ready(Ok(()))
    }
}

/// Character large object.
///
/// Lengths and positions count characters, not bytes.
#[derive(Debug, Clone)]
pub struct Clob {
    source: LobValue,
    chars: OnceCell<Vec<char>>,
    modified: bool,
}

impl Clob {
    /// Wrap a character large-object value as received from the wire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Type`] for binary values.
    pub fn from_lob(source: LobValue) -> Result<Self> {
        if source.kind() == LobKind::Binary {
            return Err(Error::Type(TypeError::TypeMismatch {
                expected: "text",
                actual: "IMAGE",
            }));
        }
        Ok(Self {
            source,
            chars: OnceCell::new(),
            modified: false,
        })
    }

    /// Wrap an in-row string.
    #[must_use]
    pub fn from_string(text: &str) -> Self {
        Self {
            source: LobValue::new(LobKind::Unicode, Vec::new()),
            chars: OnceCell::from(text.chars().collect::<Vec<_>>()),
            modified: true,
        }
    }

    fn realized(&self) -> Result<&[char]> {
        let chars = self
            .chars
            .get_or_try_init(|| lob_to_string(&self.source).map(|s| s.chars().collect()))?;
        Ok(chars.as_slice())
    }

    fn modify<R>(&mut self, f: impl FnOnce(&mut Vec<char>) -> R) -> Result<R> {
        let mut chars = match self.chars.take() {
            Some(chars) => chars,
            None => lob_to_string(&self.source)?.chars().collect(),
        };
        let result = f(&mut chars);
        self.chars = OnceCell::from(chars);
        self.modified = true;
        Ok(result)
    }

    /// Current length in characters.
    pub fn length(&self) -> Result<u64> {
        Ok(self.realized()?.len() as u64)
    }

    /// Read up to `length` characters starting at the 1-based `position`.
    pub fn sub_string(&self, position: u64, length: usize) -> Result<String> {
        let chars = self.realized()?;
        let start = offset("sub_string", position, chars.len() as u64)?;
        let end = start.saturating_add(length).min(chars.len());
        Ok(chars[start..end].iter().collect())
    }

    /// Write `text` at the 1-based `position`, extending the value if the
    /// write runs past its end. Returns the number of characters written.
    pub fn set_string(&mut self, position: u64, text: &str) -> Result<usize> {
        let start = offset("set_string", position, self.length()?)?;
        let new: Vec<char> = text.chars().collect();
        self.modify(|chars| {
            let end = start + new.len();
            let overlap = end.min(chars.len());
            chars.splice(start..overlap, new.iter().copied());
        })?;
        Ok(new.len())
    }

    /// Cut the value down to `length` characters.
    pub fn truncate(&mut self, length: u64) -> Result<()> {
        let length = check_truncate(length, self.length()?)?;
        self.modify(|chars| chars.truncate(length))
    }

    /// The whole value as a string.
    pub fn text(&self) -> Result<String> {
        Ok(self.realized()?.iter().collect())
    }

    /// Decode the value lazily, chunk by chunk.
    ///
    /// Each call starts a new pass. Invalid sequences decode to U+FFFD
    /// rather than failing.
    #[must_use]
    pub fn chars(&self) -> ClobChars {
        match self.chars.get() {
            Some(chars) if self.modified => {
                let text: String = chars.iter().collect();
                ClobChars::new(vec![Bytes::from(text)], UTF_8)
            }
            _ => {
                let encoding = match self.source.kind() {
                    LobKind::SingleByte(encoding) => encoding,
                    LobKind::Unicode | LobKind::Binary => UTF_16LE,
                };
                ClobChars::new(self.source.chunks().to_vec(), encoding)
            }
        }
    }
}

/// Lazy character iterator over a [`Clob`].
pub struct ClobChars {
    chunks: std::vec::IntoIter<Bytes>,
    decoder: Decoder,
    decoded: String,
    pos: usize,
    finished: bool,
}

impl ClobChars {
    fn new(chunks: Vec<Bytes>, encoding: &'static Encoding) -> Self {
        Self {
            chunks: chunks.into_iter(),
            decoder: encoding.new_decoder_without_bom_handling(),
            decoded: String::new(),
            pos: 0,
            finished: false,
        }
    }
}

impl Iterator for ClobChars {
    type Item = char;

    fn next(&mut self) -> Option<char> {
        loop {
            if let Some(c) = self.decoded[self.pos..].chars().next() {
                self.pos += c.len_utf8();
                return Some(c);
            }
            if self.finished {
                return None;
            }

            self.decoded.clear();
            self.pos = 0;
            let chunk = self.chunks.next().unwrap_or_default();
            // the decoder holds back a split code unit until the next chunk
            let last = self.chunks.len() == 0;
            self.finished = last;
            let mut input = &chunk[..];
            loop {
                let needed = self
                    .decoder
                    .max_utf8_buffer_length(input.len())
                    .unwrap_or(input.len() * 3 + 4);
                self.decoded.reserve(needed.max(4));
                let (result, read, _) = self.decoder.decode_to_string(input, &mut self.decoded, last);
                input = &input[read..];
                match result {
                    CoderResult::InputEmpty => break,
                    CoderResult::OutputFull => {}
                }
            }
        }
    }
}

impl std::fmt::Debug for ClobChars {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClobChars")
            .field("chunks_left", &self.chunks.len())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tokio::io::AsyncReadExt;

    fn chunked(data: &[u8], split: usize) -> Blob {
        let split = split.min(data.len());
        Blob::from_lob(LobValue::new(
            LobKind::Binary,
            vec![
                Bytes::copy_from_slice(&data[..split]),
                Bytes::copy_from_slice(&data[split..]),
            ],
        ))
    }

    fn utf16_clob(text: &str, split: usize) -> Clob {
        let bytes: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
        let split = split.min(bytes.len());
        Clob::from_lob(LobValue::new(
            LobKind::Unicode,
            vec![
                Bytes::copy_from_slice(&bytes[..split]),
                Bytes::copy_from_slice(&bytes[split..]),
            ],
        ))
        .unwrap()
    }

    #[test]
    fn test_blob_reads_across_chunks() {
        let blob = chunked(b"hello world", 4);
        assert_eq!(blob.length(), 11);
        assert_eq!(blob.bytes(1, 11).unwrap(), b"hello world");
        assert_eq!(blob.bytes(3, 4).unwrap(), b"llo ");
        assert_eq!(blob.bytes(10, 100).unwrap(), b"ld");
        assert_eq!(blob.bytes(12, 5).unwrap(), b"");
    }

    #[test]
    fn test_blob_position_errors() {
        let blob = chunked(b"abc", 1);
        assert!(matches!(
            blob.bytes(0, 1),
            Err(Error::LobRange { operation: "bytes", position: 0, length: 3 })
        ));
        assert!(matches!(blob.bytes(5, 1), Err(Error::LobRange { .. })));
    }

    #[test]
    fn test_blob_writes() {
        let mut blob = chunked(b"abcdef", 3);
        assert_eq!(blob.set_bytes(3, b"XY").unwrap(), 2);
        assert_eq!(blob.to_bytes(), Bytes::from_static(b"abXYef"));
        blob.set_bytes(6, b"123").unwrap();
        assert_eq!(blob.to_bytes(), Bytes::from_static(b"abXYe123"));
        blob.set_bytes(9, b"!").unwrap();
        assert_eq!(blob.length(), 9);
        assert!(matches!(blob.set_bytes(11, b"gap"), Err(Error::LobRange { .. })));
    }

    #[test]
    fn test_blob_truncate() {
        let mut blob = chunked(b"abcdef", 2);
        assert!(matches!(blob.truncate(7), Err(Error::LobRange { operation: "truncate", .. })));
        blob.truncate(2).unwrap();
        assert_eq!(blob.length(), 2);
        assert_eq!(blob.bytes(1, 10).unwrap(), b"ab");
        blob.truncate(0).unwrap();
        assert_eq!(blob.bytes(1, 1).unwrap(), b"");
    }

    #[test]
    fn test_blob_stream_restarts() {
        let blob = chunked(b"abcdef", 2);
        let mut first = blob.stream();
        assert_eq!(first.next().unwrap(), Bytes::from_static(b"ab"));
        let all: Vec<Bytes> = blob.stream().collect();
        assert_eq!(all, [Bytes::from_static(b"ab"), Bytes::from_static(b"cdef")]);
        assert_eq!(first.remaining(), 4);
    }

    #[test]
    fn test_blob_stream_keeps_wire_chunks_until_modified() {
        let mut blob = chunked(b"abcdef", 2);
        assert_eq!(blob.bytes(2, 3).unwrap(), b"bcd");
        assert_eq!(blob.stream().count(), 2);
        assert_eq!(blob.to_bytes(), Bytes::from_static(b"abcdef"));

        blob.set_bytes(1, b"X").unwrap();
        let all: Vec<Bytes> = blob.stream().collect();
        assert_eq!(all, [Bytes::from_static(b"Xbcdef")]);
        assert_eq!(blob.to_bytes(), Bytes::from_static(b"Xbcdef"));
    }

    #[tokio::test]
    async fn test_blob_async_read() {
        let mut blob = chunked(&[7u8; 100], 33);
        blob.set_bytes(101, &[1]).unwrap();
        let mut out = Vec::new();
        blob.stream().read_to_end(&mut out).await.unwrap();
        assert_eq!(out.len(), 101);
        assert_eq!(out[100], 1);

        let mut small = [0u8; 8];
        let mut stream = chunked(b"0123456789", 3).stream();
        let n = stream.read(&mut small).await.unwrap();
        assert_eq!(&small[..n], b"012");
    }

    #[test]
    fn test_clob_counts_chars() {
        let clob = utf16_clob("añ😀b", 5);
        assert_eq!(clob.length().unwrap(), 4);
        assert_eq!(clob.sub_string(2, 2).unwrap(), "ñ😀");
        assert_eq!(clob.chars().collect::<String>(), "añ😀b");
    }

    #[test]
    fn test_clob_chars_decode_long_chunks() {
        let text = "ü".repeat(10_000);
        let clob = utf16_clob(&text, 9_999);
        assert_eq!(clob.sub_string(1, 1).unwrap(), "ü");
        assert_eq!(clob.chars().count(), 10_000);
        assert!(clob.chars().all(|c| c == 'ü'));
    }

    #[test]
    fn test_clob_edits() {
        let mut clob = Clob::from_string("hello");
        assert_eq!(clob.set_string(5, "o world").unwrap(), 7);
        assert_eq!(clob.text().unwrap(), "hello world");
        clob.truncate(5).unwrap();
        assert_eq!(clob.chars().collect::<String>(), "hello");
        assert!(matches!(clob.sub_string(7, 1), Err(Error::LobRange { .. })));
        assert!(matches!(clob.truncate(6), Err(Error::LobRange { .. })));
    }

    #[test]
    fn test_single_byte_clob() {
        let lob = LobValue::new(
            LobKind::SingleByte(encoding_rs::WINDOWS_1252),
            vec![Bytes::from_static(b"caf"), Bytes::from_static(&[0xE9])],
        );
        let clob = Clob::from_lob(lob).unwrap();
        assert_eq!(clob.chars().collect::<String>(), "café");
        assert_eq!(clob.length().unwrap(), 4);
    }

    #[test]
    fn test_binary_is_not_a_clob() {
        let lob = LobValue::new(LobKind::Binary, vec![]);
        assert!(matches!(Clob::from_lob(lob), Err(Error::Type(_))));
    }

    proptest! {
        #[test]
        fn blob_position_law(data in proptest::collection::vec(any::<u8>(), 0..512), split in 0usize..512) {
            let mut blob = chunked(&data, split);
            let len = data.len() as u64;
            prop_assert_eq!(blob.bytes(1, data.len()).unwrap(), data.clone());
            let past_end = blob.bytes(len + 2, 1).is_err();
            prop_assert!(past_end);
            blob.truncate(len / 2).unwrap();
            prop_assert_eq!(blob.length(), len / 2);
            prop_assert_eq!(blob.bytes(1, data.len() / 2).unwrap(), data[..data.len() / 2].to_vec());
        }

        #[test]
        fn clob_chars_match_text(text in "\\PC{0,40}", split in 0usize..100) {
            let clob = utf16_clob(&text, split);
            prop_assert_eq!(clob.chars().collect::<String>(), text.clone());
            prop_assert_eq!(clob.text().unwrap(), text);
        }
    }
}
