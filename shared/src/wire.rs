//! Message framing.
//!
//! A message is an ordered list of byte-string fields joined with [`FIELD_SEPARATOR`]. On the wire
//! the message body is followed by [`MESSAGE_TERMINATOR`]. There is no escaping and no length
//! prefix, so a field must never contain the separator itself.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::{FIELD_SEPARATOR, MAX_MESSAGE_SIZE, MESSAGE_TERMINATOR, READ_CHUNK_SIZE};

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("connection closed before the message was complete")]
    UnexpectedEof,
    #[error("message exceeds {MAX_MESSAGE_SIZE} bytes")]
    TooLarge,
    #[error("no data received for {0:?}")]
    Idle(Duration),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Joins fields into a message body. The last field is not followed by a separator.
pub fn encode<T: AsRef<[u8]>>(fields: &[T]) -> Vec<u8> {
    let len = fields.iter().map(|f| f.as_ref().len()).sum::<usize>()
        + fields.len().saturating_sub(1) * FIELD_SEPARATOR.len();

    let mut body = Vec::with_capacity(len);
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            body.extend_from_slice(&FIELD_SEPARATOR);
        }
        body.extend_from_slice(field.as_ref());
    }

    body
}

/// Splits a message body into its fields.
///
/// The separator is not escaped. A binary field (keyfile content, a password) that happens to
/// contain `B2 EA C0` is split into several fields here. Callers whose last argument is binary
/// can rejoin the tail with [`join_tail`]; anything else is a known limitation of the format.
pub fn split_fields(body: &[u8]) -> Vec<Vec<u8>> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i + FIELD_SEPARATOR.len() <= body.len() {
        if body[i..i + FIELD_SEPARATOR.len()] == FIELD_SEPARATOR {
            fields.push(body[start..i].to_vec());
            i += FIELD_SEPARATOR.len();
            start = i;
        } else {
            i += 1;
        }
    }
    fields.push(body[start..].to_vec());

    fields
}

/// Reverses a split of trailing fields, restoring a binary last argument.
pub fn join_tail(fields: &[Vec<u8>]) -> Vec<u8> {
    encode(fields)
}

/// Reads one message from the stream in [`READ_CHUNK_SIZE`] chunks, until the terminator is seen.
///
/// Returns the bytes strictly before the terminator. Bytes after it are discarded since every
/// connection carries exactly one message per direction.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, WireError> {
    read_chunks(reader, None).await
}

/// Like [`read_message`], but gives up with [`WireError::Idle`] when a single chunk read waits
/// longer than `idle`. A slow peer that keeps sending stays connected however long the message is.
pub async fn read_message_idle<R: AsyncRead + Unpin>(reader: &mut R, idle: Duration) -> Result<Vec<u8>, WireError> {
    read_chunks(reader, Some(idle)).await
}

async fn read_chunks<R: AsyncRead + Unpin>(reader: &mut R, idle: Option<Duration>) -> Result<Vec<u8>, WireError> {
    let mut data: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        let read = match idle {
            Some(idle) => tokio::time::timeout(idle, reader.read(&mut chunk))
                .await
                .map_err(|_| WireError::Idle(idle))??,
            None => reader.read(&mut chunk).await?,
        };
        if read == 0 {
            return Err(WireError::UnexpectedEof);
        }

        // the terminator may straddle the previous chunk, so search from a bit before it
        let search_from = data.len().saturating_sub(MESSAGE_TERMINATOR.len() - 1);
        data.extend_from_slice(&chunk[..read]);

        if let Some(pos) = find_terminator(&data[search_from..]) {
            data.truncate(search_from + pos);
            return Ok(data);
        }

        if data.len() > MAX_MESSAGE_SIZE {
            return Err(WireError::TooLarge);
        }
    }
}

/// Writes a message body followed by the terminator.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<(), WireError> {
    writer.write_all(body).await?;
    writer.write_all(&MESSAGE_TERMINATOR).await?;
    writer.flush().await?;
    Ok(())
}

fn find_terminator(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(MESSAGE_TERMINATOR.len())
        .position(|w| w == MESSAGE_TERMINATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_does_not_terminate_last_field() {
        let body = encode(&[b"foo".as_slice(), b"bar"]);
        assert_eq!(body, b"foo\xB2\xEA\xC0bar");

        assert_eq!(encode(&[b"single"]), b"single");
    }

    #[test]
    fn split_keeps_empty_fields() {
        let fields: Vec<&[u8]> = vec![b"", b"", b"GET"];
        assert_eq!(split_fields(&encode(&fields)), vec![b"".to_vec(), b"".to_vec(), b"GET".to_vec()]);
        assert_eq!(split_fields(b""), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn split_recovers_binary_fields() {
        let fields = vec![vec![0u8, 0xB2, 0xEA], vec![0xC0, 0xFF], b"NEWG".to_vec(), vec![0xB2]];
        assert_eq!(split_fields(&encode(&fields)), fields);
    }

    #[test]
    fn join_tail_restores_separator_inside_last_field() {
        let keyfile = [1u8, 0xB2, 0xEA, 0xC0, 2];
        let body = encode(&[b"new".as_slice(), &keyfile]);
        let fields = split_fields(&body);
        assert_eq!(fields.len(), 3);
        assert_eq!(join_tail(&fields[1..]), keyfile);
    }

    #[tokio::test]
    async fn read_handles_terminator_across_chunks() {
        // every offset moves the terminator across a different chunk boundary
        for len in 0..3 * READ_CHUNK_SIZE {
            let body: Vec<u8> = (0..len).map(|i| (i % 200) as u8).collect();
            let mut framed = body.clone();
            framed.extend_from_slice(&MESSAGE_TERMINATOR);

            let mut reader = framed.as_slice();
            assert_eq!(read_message(&mut reader).await.unwrap(), body, "body length {len}");
        }
    }

    #[tokio::test]
    async fn read_discards_trailing_bytes() {
        let mut framed = b"hello".to_vec();
        framed.extend_from_slice(&MESSAGE_TERMINATOR);
        framed.extend_from_slice(b"garbage");

        let mut reader = framed.as_slice();
        assert_eq!(read_message(&mut reader).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn read_fails_without_terminator() {
        let mut reader = b"no end in sight".as_slice();
        assert!(matches!(read_message(&mut reader).await, Err(WireError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn write_then_read_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let body = encode(&[b"pw".as_slice(), b"", b"FIND", b"mail"]);

        let writer = tokio::spawn(async move { write_message(&mut a, &body).await });
        let received = read_message(&mut b).await.unwrap();
        writer.await.unwrap().unwrap();

        assert_eq!(split_fields(&received), vec![b"pw".to_vec(), vec![], b"FIND".to_vec(), b"mail".to_vec()]);
    }

    #[tokio::test]
    async fn idle_limit_applies_per_chunk() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        let idle = Duration::from_millis(200);

        // ten chunks 50ms apart take well over the idle limit in total
        let writer = tokio::spawn(async move {
            for _ in 0..10 {
                tx.write_all(&[b'x'; READ_CHUNK_SIZE]).await.unwrap();
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            tx.write_all(&MESSAGE_TERMINATOR).await.unwrap();
            tx
        });

        let body = read_message_idle(&mut rx, idle).await.unwrap();
        assert_eq!(body.len(), 10 * READ_CHUNK_SIZE);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn idle_limit_stops_a_stalled_peer() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        tx.write_all(b"half a mess").await.unwrap();

        let err = read_message_idle(&mut rx, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, WireError::Idle(_)));
        drop(tx);
    }
}
