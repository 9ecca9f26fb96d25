//! Server-sent event decoding for streaming providers
//!
//! Vendors push their answers as `text/event-stream` bodies. [`SseLines`]
//! splits the raw byte stream into lines (tolerating chunk boundaries that
//! fall inside a line or inside a multi-byte character), and [`SseEvents`]
//! groups those lines into `event:`/`data:` blocks separated by blank lines.

use crate::error::{ChatError, Result};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Line reader over a streaming HTTP body
pub struct SseLines {
    stream: ByteStream,
    buffer: Vec<u8>,
    exhausted: bool,
}

impl SseLines {
    /// Wrap a byte stream, typically `response.bytes_stream()`
    pub fn new(stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            stream: Box::pin(stream),
            buffer: Vec::new(),
            exhausted: false,
        }
    }

    /// Next line without its terminator, or `None` once the body is exhausted
    ///
    /// # Errors
    ///
    /// Returns a provider error if reading the body fails.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }

            if self.exhausted {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let rest = std::mem::take(&mut self.buffer);
                return Ok(Some(String::from_utf8_lossy(&rest).into_owned()));
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    return Err(ChatError::Provider(format!("Stream read failed: {}", e)).into())
                }
                None => self.exhausted = true,
            }
        }
    }
}

/// A single dispatched event block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
}

/// Event reader built on [`SseLines`]
pub struct SseEvents {
    lines: SseLines,
}

impl SseEvents {
    /// Wrap a byte stream, typically `response.bytes_stream()`
    pub fn new(stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            lines: SseLines::new(stream),
        }
    }

    /// Next complete event, or `None` once the body is exhausted
    pub async fn next_event(&mut self) -> Result<Option<SseEvent>> {
        let mut event_type: Option<String> = None;
        let mut data_lines: Vec<String> = Vec::new();

        while let Some(line) = self.lines.next_line().await? {
            if line.is_empty() {
                if event_type.is_some() || !data_lines.is_empty() {
                    return Ok(Some(SseEvent {
                        event: event_type,
                        data: data_lines.join("\n"),
                    }));
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            if let Some(value) = line.strip_prefix("data:") {
                data_lines.push(value.trim_start().to_string());
            } else if let Some(value) = line.strip_prefix("event:") {
                event_type = Some(value.trim().to_string());
            }
            // id: and retry: are not used by any vendor we talk to
        }

        if event_type.is_some() || !data_lines.is_empty() {
            return Ok(Some(SseEvent {
                event: event_type,
                data: data_lines.join("\n"),
            }));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = reqwest::Result<Bytes>> + Send {
        futures::stream::iter(
            parts
                .iter()
                .map(|p| Ok::<Bytes, reqwest::Error>(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_lines_across_chunk_boundaries() {
        let mut lines = SseLines::new(chunks(&[b"data: one\r\nda", b"ta: two\n", b"tail"]));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("data: one"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("data: two"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("tail"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lines_split_multibyte_character() {
        let text = "data: 你好\n".as_bytes();
        let (head, tail) = text.split_at(8);
        let head: &'static [u8] = Box::leak(head.to_vec().into_boxed_slice());
        let tail: &'static [u8] = Box::leak(tail.to_vec().into_boxed_slice());
        let mut lines = SseLines::new(chunks(&[head, tail]));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("data: 你好"));
    }

    #[tokio::test]
    async fn test_events_grouped_by_blank_line() {
        let body: &'static [u8] = b": keepalive\n\n\
            event: conversation.message.delta\ndata: {\"content\":\"hi\"}\n\n\
            event: done\ndata: \"[DONE]\"\n";
        let mut events = SseEvents::new(chunks(&[body]));

        let first = events.next_event().await.unwrap().unwrap();
        assert_eq!(first.event.as_deref(), Some("conversation.message.delta"));
        assert_eq!(first.data, "{\"content\":\"hi\"}");

        let second = events.next_event().await.unwrap().unwrap();
        assert_eq!(second.event.as_deref(), Some("done"));

        assert_eq!(events.next_event().await.unwrap(), None);
    }
}
