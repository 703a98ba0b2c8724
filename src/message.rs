//! Room names and chat messages, plus their transport encoding.
//!
//! ## Wire format
//! Messages cross the bus as JSON objects with camelCase keys:
//! `id`, `text`, `roomId`, `senderId`, `timestamp` (RFC 3339, UTC).
//! Decoding re-checks the text invariant so a malformed peer cannot put an
//! empty message into a store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::identity::SessionId;

// ---------------------------------------------------------------------------
// RoomName
// ---------------------------------------------------------------------------

/// A trimmed, non-empty room name. Any two contexts using the same name share
/// a bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomName(String);

impl RoomName {
    /// Trim `raw` and reject it if nothing is left.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ChatError::InvalidInput("room name is empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomName {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RoomName {
    type Error = ChatError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<RoomName> for String {
    fn from(room: RoomName) -> Self {
        room.0
    }
}

// ---------------------------------------------------------------------------
// ChatMessage
// ---------------------------------------------------------------------------

/// Trim user text, rejecting empty or whitespace-only input.
pub fn normalize_text(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ChatError::InvalidInput("message text is empty".to_string()));
    }
    Ok(trimmed.to_string())
}

/// One chat line, stamped at send time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    id: Uuid,
    text: String,
    room_id: RoomName,
    sender_id: SessionId,
    timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Build a message from user input with a fresh id and the current time.
    pub fn compose(room_id: RoomName, sender_id: SessionId, text: &str) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            text: normalize_text(text)?,
            room_id,
            sender_id,
            timestamp: Utc::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn room_id(&self) -> &RoomName {
        &self.room_id
    }

    pub fn sender_id(&self) -> &SessionId {
        &self.sender_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Whether `session` authored this message.
    pub fn is_from(&self, session: &SessionId) -> bool {
        &self.sender_id == session
    }

    /// Local wall-clock `HH:MM` of the send time.
    pub fn display_time(&self) -> String {
        self.timestamp.with_timezone(&Local).format("%H:%M").to_string()
    }

    /// Encode for the bus.
    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a bus payload, re-validating the text.
    pub fn from_wire(payload: &str) -> Result<Self> {
        let message: Self = serde_json::from_str(payload)?;
        if message.text.trim().is_empty() {
            return Err(ChatError::InvalidInput(format!(
                "message {} has empty text",
                message.id
            )));
        }
        Ok(message)
    }
}
