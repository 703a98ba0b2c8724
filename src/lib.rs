//! Anonymous, ephemeral, room-scoped messaging between contexts that share an
//! in-process bus.
//!
//! ## Design
//! Each context owns a [`session::RoomController`] built from an explicit
//! [`identity::SessionIdentity`] and a [`bus::RoomTransport`]. Entering a room
//! opens one channel on the bus and a fresh [`store::MessageStore`]; leaving
//! closes the channel and discards the store. Nothing is persisted.
//!
//! [`generation`] and [`audio`] are independent of the messaging core and are
//! only used by the command line.

pub mod audio;
pub mod bus;
pub mod cli;
pub mod config;
pub mod error;
pub mod generation;
pub mod identity;
pub mod message;
pub mod session;
pub mod store;

pub use bus::{LocalBus, RoomChannel, RoomTransport};
pub use error::{ChatError, Result};
pub use identity::{SessionId, SessionIdentity};
pub use message::{ChatMessage, RoomName};
pub use session::{ControllerState, RoomController, RoomSession};
pub use store::MessageStore;
