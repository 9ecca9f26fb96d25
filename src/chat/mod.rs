//! Conversational turns
//!
//! [`ChatService`] runs one turn at a time per call: it persists the user
//! message, replays session history to the selected provider, relays the
//! answer to a [`TurnSink`], and writes the assistant message and usage record.

pub mod events;
pub mod orchestrator;

pub use events::{TurnEvent, TurnSink};
pub use orchestrator::{
    ChatService, PreparedTurn, TurnOutcome, TurnReply, TurnRequest, TurnState,
};
