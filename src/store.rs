//! Per-session, append-only message log with observer callbacks.
//!
//! A [`MessageStore`] is cheap to clone; every clone points at the same log.
//! Observers are invoked after the lock is released, so they may read the
//! store (for example to re-render the whole history).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::message::ChatMessage;

/// Callback fired once per appended message.
pub type Observer = Arc<dyn Fn(&ChatMessage) + Send + Sync>;

/// Handle returned by [`MessageStore::observe`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
struct StoreInner {
    messages: Vec<ChatMessage>,
    observers: Vec<(ObserverId, Observer)>,
    next_observer: u64,
}

#[derive(Clone, Default)]
pub struct MessageStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push `message` at the end and notify observers.
    pub fn append(&self, message: ChatMessage) {
        let observers: Vec<Observer> = {
            let mut inner = self.lock();
            inner.messages.push(message.clone());
            inner.observers.iter().map(|(_, o)| Arc::clone(o)).collect()
        };
        for observer in observers {
            observer(&message);
        }
    }

    /// Snapshot of the log in insertion order.
    pub fn all(&self) -> Vec<ChatMessage> {
        self.lock().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().messages.is_empty()
    }

    pub fn observe<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = ObserverId(inner.next_observer);
        inner.next_observer += 1;
        inner.observers.push((id, Arc::new(callback)));
        id
    }

    /// Remove an observer. Returns `false` if it was not registered.
    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut inner = self.lock();
        let before = inner.observers.len();
        inner.observers.retain(|(oid, _)| *oid != id);
        inner.observers.len() != before
    }

    /// Drop every message and observer. Used when the owning session ends.
    pub(crate) fn discard(&self) {
        let mut inner = self.lock();
        inner.messages.clear();
        inner.observers.clear();
    }
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MessageStore")
            .field("messages", &inner.messages.len())
            .field("observers", &inner.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SessionId;
    use crate::message::RoomName;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn msg(text: &str) -> ChatMessage {
        ChatMessage::compose(
            RoomName::parse("lounge").unwrap(),
            SessionId::random().unwrap(),
            text,
        )
        .unwrap()
    }

    #[test]
    fn test_new_store_is_empty() {
        let store = MessageStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
        assert!(store.all().is_empty());
    }

    #[test]
    fn test_append_preserves_insertion_order() {
        let store = MessageStore::new();
        for i in 0..5 {
            store.append(msg(&format!("m{i}")));
        }
        let texts: Vec<String> = store.all().iter().map(|m| m.text().to_string()).collect();
        assert_eq!(texts, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn test_append_does_not_deduplicate() {
        let store = MessageStore::new();
        let m = msg("twice");
        store.append(m.clone());
        store.append(m);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_all_is_repeatable() {
        let store = MessageStore::new();
        store.append(msg("a"));
        assert_eq!(store.all(), store.all());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_clones_share_log() {
        let store = MessageStore::new();
        let other = store.clone();
        store.append(msg("shared"));
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn test_observer_fires_per_append() {
        let store = MessageStore::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        store.observe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        store.append(msg("one"));
        store.append(msg("two"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_observer_can_read_store() {
        let store = MessageStore::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let (reader, sink) = (store.clone(), seen.clone());
        store.observe(move |_| {
            sink.store(reader.len(), Ordering::SeqCst);
        });
        store.append(msg("x"));
        store.append(msg("y"));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unobserve_stops_notifications() {
        let store = MessageStore::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = store.observe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        store.append(msg("before"));
        assert!(store.unobserve(id));
        store.append(msg("after"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!store.unobserve(id));
    }

    #[test]
    fn test_discard_clears_messages_and_observers() {
        let store = MessageStore::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        store.observe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        store.append(msg("gone"));
        store.discard();
        assert!(store.is_empty());
        store.append(msg("late"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
