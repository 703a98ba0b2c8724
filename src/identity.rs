//! Session identity: one random identifier per execution context.
//!
//! A [`SessionIdentity`] is the context-scoped state object. The identifier is
//! drawn lazily on the first [`SessionIdentity::identity`] call and stays fixed
//! for the lifetime of that object. Nothing is persisted; a new
//! `SessionIdentity` (a reload) is a new participant.

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock, PoisonError};

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChatError, Result};

/// Length of the abbreviated id shown to users.
pub const SHORT_ID_LEN: usize = 8;

/// Anonymous participant identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Draw a fresh v4 identifier from `rng`.
    ///
    /// Fails with [`ChatError::EnvironmentUnsupported`] when the source cannot
    /// produce bytes.
    pub fn from_rng<R: RngCore + ?Sized>(rng: &mut R) -> Result<Self> {
        let mut bytes = [0u8; 16];
        rng.try_fill_bytes(&mut bytes)
            .map_err(|e| ChatError::EnvironmentUnsupported(format!("random source failed: {e}")))?;
        Ok(Self(uuid::Builder::from_random_bytes(bytes).into_uuid()))
    }

    /// Draw a fresh identifier from the operating system RNG.
    pub fn random() -> Result<Self> {
        Self::from_rng(&mut OsRng)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// First eight characters, the "anonymous ID" rendered next to messages.
    pub fn short(&self) -> String {
        self.0.hyphenated().to_string()[..SHORT_ID_LEN].to_string()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for SessionId {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| ChatError::InvalidInput(format!("bad session id '{s}': {e}")))
    }
}

/// Lazily-initialised, context-scoped identity.
pub struct SessionIdentity {
    id: OnceLock<SessionId>,
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl SessionIdentity {
    /// Identity backed by the operating system RNG.
    pub fn new() -> Self {
        Self::with_rng(OsRng)
    }

    /// Identity backed by a caller-supplied random source.
    pub fn with_rng<R: RngCore + Send + 'static>(rng: R) -> Self {
        Self {
            id: OnceLock::new(),
            rng: Mutex::new(Box::new(rng)),
        }
    }

    /// Return this context's identifier, generating it on first use.
    pub fn identity(&self) -> Result<SessionId> {
        if let Some(id) = self.id.get() {
            return Ok(*id);
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have won the race while we waited for the rng.
        if let Some(id) = self.id.get() {
            return Ok(*id);
        }
        let fresh = SessionId::from_rng(&mut **rng)?;
        Ok(*self.id.get_or_init(|| fresh))
    }

    /// The identifier if it has already been generated.
    pub fn peek(&self) -> Option<SessionId> {
        self.id.get().copied()
    }
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionIdentity")
            .field("id", &self.peek())
            .finish_non_exhaustive()
    }
}
