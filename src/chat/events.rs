//! Events emitted by a conversational turn
//!
//! A streaming turn emits, in order: the persisted user message, a stream
//! start marker, zero or more chunks, and exactly one of `stream_end` or
//! `error`. Serialized with a `type` discriminator for the push channel.

use crate::providers::StreamControl;
use crate::storage::ChatMessage;

use serde::Serialize;

/// One event of a streaming turn
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// The user's message as persisted
    UserMessage { message: ChatMessage },
    /// Provider invocation is starting with the named model
    StreamStart { model: String, model_id: i64 },
    /// Incremental answer text
    StreamChunk { text: String },
    /// Successful completion; the assistant message is persisted
    StreamEnd { message_id: i64, full_text: String },
    /// Terminal failure
    Error { error: String },
}

impl TurnEvent {
    /// Whether this event ends the turn
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StreamEnd { .. } | Self::Error { .. })
    }
}

/// Receiver of turn events
///
/// Returning [`StreamControl::Stop`] asks the turn to stop relaying; the turn
/// then unwinds as cancelled.
pub trait TurnSink: Send {
    fn send(&mut self, event: TurnEvent) -> StreamControl;
}

impl<F> TurnSink for F
where
    F: FnMut(TurnEvent) -> StreamControl + Send,
{
    fn send(&mut self, event: TurnEvent) -> StreamControl {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_with_type_tag() {
        let chunk = serde_json::to_value(TurnEvent::StreamChunk { text: "hi".into() }).unwrap();
        assert_eq!(chunk, serde_json::json!({"type": "stream_chunk", "text": "hi"}));

        let end = serde_json::to_value(TurnEvent::StreamEnd {
            message_id: 3,
            full_text: "hi".into(),
        })
        .unwrap();
        assert_eq!(
            end,
            serde_json::json!({"type": "stream_end", "message_id": 3, "full_text": "hi"})
        );
    }

    #[test]
    fn test_terminal_events() {
        assert!(TurnEvent::Error { error: "x".into() }.is_terminal());
        assert!(!TurnEvent::StreamChunk { text: "x".into() }.is_terminal());
    }

    #[test]
    fn test_closure_is_a_sink() {
        let mut seen = Vec::new();
        let mut sink = |event: TurnEvent| {
            seen.push(event);
            StreamControl::Continue
        };
        assert_eq!(
            TurnSink::send(&mut sink, TurnEvent::Error { error: "e".into() }),
            StreamControl::Continue
        );
        assert_eq!(seen.len(), 1);
    }
}
