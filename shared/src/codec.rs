//! Text codec for [`Message`].
//!
//! Decoding goes through a JSON tokenizer first and only then into the typed
//! message, so an unknown `"type"` can be told apart from a broken payload.
//! Neither case panics; callers drop the message and log it.

use crate::protocol::Message;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("payload has no message type")]
    MissingKind,
    #[error("unknown message type {0:?}")]
    UnknownKind(String),
}

impl DecodeError {
    /// Unknown kinds are expected from newer peers and are not faults.
    pub fn is_forward_compatible(&self) -> bool {
        matches!(self, DecodeError::UnknownKind(_))
    }
}

#[derive(Debug, Error)]
#[error("failed to encode message: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

pub fn encode(message: &Message) -> Result<String, EncodeError> {
    Ok(serde_json::to_string(message)?)
}

pub fn decode(payload: &str) -> Result<Message, DecodeError> {
    let value: Value =
        serde_json::from_str(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingKind)?;

    if !Message::KINDS.contains(&kind) {
        return Err(DecodeError::UnknownKind(kind.to_string()));
    }

    let message: Message =
        serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    if let Message::FullSnapshot(snapshot) = &message {
        let grid = &snapshot.grid;
        if !grid.is_well_formed() {
            return Err(DecodeError::Malformed(format!(
                "grid is {}x{} but carries {} cells",
                grid.width,
                grid.height,
                grid.cells.len()
            )));
        }
    }

    Ok(message)
}
