//! Room session controller: identity + channel + store behind one contract.
//!
//! ## State machine
//! `Idle → enter_room → Active → leave_room → Idle`. A failed entry (no random
//! source, bus unavailable) moves the controller to `Unavailable`; entering
//! again retries. One active room per controller: entering another room
//! leaves the current one first.
//!
//! ## Send path
//! `send` publishes to the bus and appends to the local store. The bus never
//! hands a publisher its own message, so the local append is the only copy the
//! sender sees.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bus::{RoomChannel, RoomTransport};
use crate::error::{ChatError, Result};
use crate::identity::{SessionId, SessionIdentity};
use crate::message::{ChatMessage, RoomName};
use crate::store::{MessageStore, ObserverId};

/// Where a [`RoomController`] is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Active(RoomName),
    /// The last entry attempt failed; the reason is kept for display.
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// RoomSession
// ---------------------------------------------------------------------------

/// An open binding to one room. Owns its channel and message store; both are
/// released when the session is closed or dropped.
pub struct RoomSession {
    room: RoomName,
    session_id: SessionId,
    channel: Box<dyn RoomChannel>,
    store: MessageStore,
}

impl RoomSession {
    /// Open a channel to `room` and route inbound messages into a fresh store.
    pub fn open(room: RoomName, session_id: SessionId, transport: &dyn RoomTransport) -> Result<Self> {
        let mut channel = transport.open(&room)?;
        let store = MessageStore::new();

        let inbound = store.clone();
        channel.on_message(Box::new(move |message: ChatMessage| {
            // The bus already filters our publishes; this guards transports
            // that do not.
            if message.is_from(&session_id) {
                debug!(id = %message.id(), "ignoring own message from bus");
                return;
            }
            inbound.append(message);
        }));

        info!(room = %room, session = %session_id.short(), "entered room");
        Ok(Self {
            room,
            session_id,
            channel,
            store,
        })
    }

    pub fn room(&self) -> &RoomName {
        &self.room
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Compose, publish and locally append a message.
    ///
    /// Whitespace-only text is rejected with [`ChatError::InvalidInput`] and
    /// leaves the store untouched.
    pub fn send(&self, text: &str) -> Result<ChatMessage> {
        if self.channel.is_closed() {
            return Err(ChatError::NotInRoom);
        }
        let message = ChatMessage::compose(self.room.clone(), self.session_id, text)?;
        self.channel.publish(&message)?;
        self.store.append(message.clone());
        Ok(message)
    }

    /// Snapshot of the room history as seen by this session.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.store.all()
    }

    /// Register a callback for every message appended from now on, local or
    /// inbound.
    pub fn observe<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        self.store.observe(callback)
    }

    pub fn unobserve(&self, id: ObserverId) -> bool {
        self.store.unobserve(id)
    }

    /// Shared handle to the underlying store.
    pub fn store(&self) -> MessageStore {
        self.store.clone()
    }

    fn close(&mut self) {
        if self.channel.is_closed() {
            return;
        }
        self.channel.close();
        self.store.discard();
        info!(room = %self.room, session = %self.session_id.short(), "left room");
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for RoomSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomSession")
            .field("room", &self.room)
            .field("session_id", &self.session_id)
            .field("messages", &self.store.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RoomController
// ---------------------------------------------------------------------------

/// Per-context controller. Identity and transport are passed in explicitly so
/// the controller can be exercised in isolation.
pub struct RoomController {
    identity: Arc<SessionIdentity>,
    transport: Arc<dyn RoomTransport>,
    active: Option<RoomSession>,
    unavailable: Option<String>,
}

impl RoomController {
    pub fn new(identity: Arc<SessionIdentity>, transport: Arc<dyn RoomTransport>) -> Self {
        Self {
            identity,
            transport,
            active: None,
            unavailable: None,
        }
    }

    /// This context's participant id, generated on first use.
    pub fn current_session_id(&self) -> Result<SessionId> {
        self.identity.identity()
    }

    /// Enter `name`, leaving any other active room first.
    ///
    /// An empty name is rejected without touching the current state. Entering
    /// the room that is already active returns the existing session.
    pub fn enter_room(&mut self, name: &str) -> Result<&RoomSession> {
        let room = RoomName::parse(name)?;

        if self.active.as_ref().is_some_and(|s| s.room() == &room) {
            return self.active.as_ref().ok_or(ChatError::NotInRoom);
        }
        self.leave_room();

        let opened = self
            .identity
            .identity()
            .and_then(|id| RoomSession::open(room.clone(), id, self.transport.as_ref()));
        match opened {
            Ok(session) => {
                self.unavailable = None;
                Ok(&*self.active.insert(session))
            }
            Err(err) => {
                warn!(room = %room, "room unavailable: {err}");
                self.unavailable = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Leave the active room, discarding its history. Safe to call repeatedly.
    ///
    /// Returns the room that was left, or `None` if there was none.
    pub fn leave_room(&mut self) -> Option<RoomName> {
        let mut session = self.active.take()?;
        let room = session.room().clone();
        session.close();
        Some(room)
    }

    /// Send on the active room; [`ChatError::NotInRoom`] when idle.
    pub fn send(&self, text: &str) -> Result<ChatMessage> {
        self.active.as_ref().ok_or(ChatError::NotInRoom)?.send(text)
    }

    /// History of the active room, empty when idle.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.active
            .as_ref()
            .map(RoomSession::messages)
            .unwrap_or_default()
    }

    pub fn session(&self) -> Option<&RoomSession> {
        self.active.as_ref()
    }

    pub fn state(&self) -> ControllerState {
        match (&self.active, &self.unavailable) {
            (Some(session), _) => ControllerState::Active(session.room().clone()),
            (None, Some(reason)) => ControllerState::Unavailable(reason.clone()),
            (None, None) => ControllerState::Idle,
        }
    }
}

impl fmt::Debug for RoomController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomController")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish()
    }
}
