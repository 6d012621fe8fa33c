//! pydevd wire protocol codec
//!
//! Every message is a single line of three tab-separated fields:
//! ```text
//! <command id>\t<sequence>\t<payload>\n
//! ```
//! The debuggee percent-encodes payloads, so a payload never contains a raw
//! newline.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::Error;

/// Upper bound for one message; large collections can get long but not this long
const MAX_LINE: usize = 64 * 1024 * 1024;

/// One decoded protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: u32,
    pub seq: u64,
    /// Percent-decoded payload
    pub payload: String,
}

/// Read the next message from the stream
///
/// Returns `Ok(None)` on a clean end of stream.
pub async fn read_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<Message>, Error> {
    match read_line_bounded(reader, MAX_LINE).await? {
        Some(line) => parse_message(&line).map(Some),
        None => Ok(None),
    }
}

/// Read one line, failing once `limit` bytes pass without a newline
async fn read_line_bounded<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    limit: usize,
) -> Result<Option<String>, Error> {
    let mut buf = Vec::new();
    let bytes_read = reader
        .take(limit as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;

    if bytes_read == 0 {
        return Ok(None);
    }
    if buf.len() > limit {
        return Err(Error::Protocol(format!("message exceeds {} bytes", limit)));
    }

    String::from_utf8(buf)
        .map(Some)
        .map_err(|e| Error::Protocol(format!("invalid UTF-8 on the wire: {}", e)))
}

/// Write one message and flush
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<(), Error> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Parse a raw line into a message
pub fn parse_message(line: &str) -> Result<Message, Error> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut parts = line.splitn(3, '\t');

    let command = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Protocol(format!("bad command id in '{}'", line)))?;
    let seq = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Protocol(format!("bad sequence number in '{}'", line)))?;
    let payload = decode(parts.next().unwrap_or(""));

    Ok(Message {
        command,
        seq,
        payload,
    })
}

/// Format a message line, including the trailing newline
pub fn format_message(command: u32, seq: u64, payload: &str) -> String {
    format!("{}\t{}\t{}\n", command, seq, payload)
}

/// Percent-decode a field; `+` stands for a space
pub fn decode(text: &str) -> String {
    let spaced = text.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| spaced.clone())
}

/// Encode an expression or value for a payload field
///
/// Newlines become `@LINE@`, which the debuggee turns back into newlines
/// after unquoting.
pub fn encode(text: &str) -> String {
    urlencoding::encode(&text.replace('\n', "@LINE@")).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_read_message() {
        let data = b"501\t1\tPY-1.0.0\n106\t3\t";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        let first = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(first.command, 501);
        assert_eq!(first.seq, 1);
        assert_eq!(first.payload, "PY-1.0.0");

        // Final line without a newline still parses
        let second = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(second.command, 106);
        assert_eq!(second.payload, "");

        assert!(read_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_rejects_garbage() {
        let mut reader = BufReader::new(Cursor::new(b"hello world\n".to_vec()));
        assert!(matches!(
            read_message(&mut reader).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_line_stops_at_limit() {
        // Endless input with no newline
        let mut reader = BufReader::new(tokio::io::repeat(b'x'));
        let result = read_line_bounded(&mut reader, 4096).await;
        assert!(matches!(result, Err(Error::Protocol(_))));

        let mut reader = BufReader::new(Cursor::new(b"111\t3\tabc\n".to_vec()));
        assert!(read_line_bounded(&mut reader, 9).await.is_err());
        let mut reader = BufReader::new(Cursor::new(b"111\t3\tabc\n".to_vec()));
        assert_eq!(
            read_line_bounded(&mut reader, 10).await.unwrap().as_deref(),
            Some("111\t3\tabc\n")
        );
    }

    #[tokio::test]
    async fn test_write_message() {
        let mut output = Vec::new();
        write_message(&mut output, &format_message(111, 5, "a\tb"))
            .await
            .unwrap();
        assert_eq!(output, b"111\t5\ta\tb\n");
    }

    #[test]
    fn test_payload_is_decoded() {
        let msg = parse_message("116\t2\t%3Cxml%3E+hi%3C%2Fxml%3E\r\n").unwrap();
        assert_eq!(msg.payload, "<xml> hi</xml>");
    }

    #[test]
    fn test_encode_expression() {
        assert_eq!(encode("a = 1\nb"), "a%20%3D%201%40LINE%40b");
        assert_eq!(decode(&encode("x\ty")), "x\ty");
    }
}
