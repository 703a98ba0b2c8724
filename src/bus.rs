//! Room channel: a named, process-wide broadcast bus.
//!
//! ## Design
//! - [`RoomTransport`] opens a [`RoomChannel`] bound to a room name. Any two
//!   channels opened with the same name are peers on one bus.
//! - [`LocalBus`] is the in-process transport: `Arc<Mutex<HashMap<String, Topic>>>`
//!   where each topic owns a `tokio::sync::broadcast` sender.
//! - Every [`ChannelHandle`] carries a random endpoint id. Envelopes are tagged
//!   with the publisher's endpoint so a handle never hears itself.
//! - Payloads are the JSON wire form of [`ChatMessage`]; the bus never looks
//!   inside them.
//!
//! ## Lifecycle
//! 1. `open(room)` registers a peer and subscribes before returning, so every
//!    later publish on that room reaches the new handle.
//! 2. `on_message(cb)` spawns one listener task per handle.
//! 3. `close()` (or drop) clears the callback under the delivery lock, aborts
//!    the listener and unregisters the peer. The topic is removed when its last
//!    peer leaves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::message::{ChatMessage, RoomName};

/// Broadcast buffer per room (messages in flight before a slow peer lags).
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Inbound message callback, invoked in arrival order.
pub type MessageCallback = Box<dyn FnMut(ChatMessage) + Send>;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// One endpoint bound to a room bus.
pub trait RoomChannel: Send {
    fn room(&self) -> &RoomName;

    /// Broadcast to every other endpoint on the bus. Fire-and-forget.
    fn publish(&self, message: &ChatMessage) -> Result<()>;

    /// Install the inbound callback, replacing any previous one.
    fn on_message(&mut self, callback: MessageCallback);

    /// Unregister and release the bus. After this returns no callback runs.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Something that can bind endpoints to named rooms.
pub trait RoomTransport: Send + Sync {
    fn open(&self, room: &RoomName) -> Result<Box<dyn RoomChannel>>;
}

// ---------------------------------------------------------------------------
// LocalBus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Envelope {
    origin: Uuid,
    payload: Arc<str>,
}

struct Topic {
    tx: broadcast::Sender<Envelope>,
    peers: usize,
}

struct BusInner {
    topics: Mutex<HashMap<String, Topic>>,
    capacity: usize,
    shut_down: AtomicBool,
}

/// In-process room bus shared by every context that holds a clone.
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<BusInner>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Bus whose rooms buffer up to `capacity` messages per slow peer.
    /// A capacity of zero is bumped to one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: Mutex::new(HashMap::new()),
                capacity: capacity.max(1),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, Topic>> {
        self.inner.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind a new endpoint to `room`.
    ///
    /// Fails with [`ChatError::TransportUnavailable`] after [`shutdown`](Self::shutdown)
    /// or when called outside a tokio runtime.
    pub fn join(&self, room: &RoomName) -> Result<ChannelHandle> {
        if self.is_shut_down() {
            return Err(ChatError::TransportUnavailable(
                "bus has been shut down".to_string(),
            ));
        }
        let runtime = Handle::try_current().map_err(|_| {
            ChatError::TransportUnavailable("no async runtime to deliver messages on".to_string())
        })?;

        let (tx, rx) = {
            let mut topics = self.topics();
            let topic = topics.entry(room.as_str().to_string()).or_insert_with(|| {
                info!(room = %room, "room topic created");
                let (tx, _rx) = broadcast::channel(self.inner.capacity);
                Topic { tx, peers: 0 }
            });
            topic.peers += 1;
            (topic.tx.clone(), topic.tx.subscribe())
        };

        let endpoint = Uuid::new_v4();
        debug!(room = %room, %endpoint, "endpoint joined");
        Ok(ChannelHandle {
            bus: self.clone(),
            room: room.clone(),
            endpoint,
            tx,
            rx: Some(rx),
            delivery: Arc::new(Mutex::new(None)),
            listener: None,
            runtime,
            closed: false,
        })
    }

    fn release(&self, room: &RoomName) {
        let mut topics = self.topics();
        if let Some(topic) = topics.get_mut(room.as_str()) {
            topic.peers = topic.peers.saturating_sub(1);
            if topic.peers == 0 {
                topics.remove(room.as_str());
                info!(room = %room, "room topic removed");
            }
        }
    }

    /// Number of open endpoints bound to `room`.
    pub fn peer_count(&self, room: &str) -> usize {
        self.topics().get(room).map(|t| t.peers).unwrap_or(0)
    }

    /// Number of rooms with at least one open endpoint.
    pub fn room_count(&self) -> usize {
        self.topics().len()
    }

    /// Refuse new endpoints and publishes from now on.
    pub fn shutdown(&self) {
        if !self.inner.shut_down.swap(true, Ordering::SeqCst) {
            info!("room bus shut down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBus")
            .field("rooms", &self.room_count())
            .field("capacity", &self.inner.capacity)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl RoomTransport for LocalBus {
    fn open(&self, room: &RoomName) -> Result<Box<dyn RoomChannel>> {
        Ok(Box::new(self.join(room)?))
    }
}

// ---------------------------------------------------------------------------
// ChannelHandle
// ---------------------------------------------------------------------------

type DeliverySlot = Arc<Mutex<Option<MessageCallback>>>;

/// A [`LocalBus`] endpoint. Released on [`close`](RoomChannel::close) or drop.
pub struct ChannelHandle {
    bus: LocalBus,
    room: RoomName,
    endpoint: Uuid,
    tx: broadcast::Sender<Envelope>,
    rx: Option<broadcast::Receiver<Envelope>>,
    delivery: DeliverySlot,
    listener: Option<JoinHandle<()>>,
    runtime: Handle,
    closed: bool,
}

impl ChannelHandle {
    pub fn endpoint(&self) -> Uuid {
        self.endpoint
    }
}

impl RoomChannel for ChannelHandle {
    fn room(&self) -> &RoomName {
        &self.room
    }

    fn publish(&self, message: &ChatMessage) -> Result<()> {
        if self.closed {
            return Err(ChatError::TransportUnavailable(format!(
                "channel for '{}' is closed",
                self.room
            )));
        }
        if self.bus.is_shut_down() {
            return Err(ChatError::TransportUnavailable(
                "bus has been shut down".to_string(),
            ));
        }
        let envelope = Envelope {
            origin: self.endpoint,
            payload: Arc::from(message.to_wire()?),
        };
        // Our own receiver counts towards the total; it filters the echo.
        match self.tx.send(envelope) {
            Ok(receivers) => debug!(
                room = %self.room,
                id = %message.id(),
                receivers,
                "published"
            ),
            Err(_) => debug!(room = %self.room, id = %message.id(), "published with no listeners"),
        }
        Ok(())
    }

    fn on_message(&mut self, callback: MessageCallback) {
        if self.closed {
            warn!(room = %self.room, "on_message on a closed channel ignored");
            return;
        }
        *self.delivery.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
        if self.listener.is_none() {
            if let Some(rx) = self.rx.take() {
                self.listener = Some(self.runtime.spawn(listen(
                    rx,
                    self.endpoint,
                    self.room.clone(),
                    Arc::clone(&self.delivery),
                )));
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Waits for an in-flight callback to finish before clearing it.
        self.delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.rx = None;
        self.bus.release(&self.room);
        debug!(room = %self.room, endpoint = %self.endpoint, "endpoint closed");
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drain `rx`, skipping our own envelopes, until the topic closes or the
/// callback is cleared.
async fn listen(
    mut rx: broadcast::Receiver<Envelope>,
    endpoint: Uuid,
    room: RoomName,
    delivery: DeliverySlot,
) {
    loop {
        match rx.recv().await {
            Ok(envelope) => {
                if envelope.origin == endpoint {
                    continue;
                }
                let message = match ChatMessage::from_wire(&envelope.payload) {
                    Ok(message) => message,
                    Err(err) => {
                        warn!(room = %room, "dropping undecodable payload: {err}");
                        continue;
                    }
                };
                let mut slot = delivery.lock().unwrap_or_else(PoisonError::into_inner);
                match slot.as_mut() {
                    Some(callback) => {
                        debug!(room = %room, id = %message.id(), "delivering");
                        callback(message);
                    }
                    None => break,
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(room = %room, skipped, "listener lagged; continuing with newest messages");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SessionId;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn room(name: &str) -> RoomName {
        RoomName::parse(name).unwrap()
    }

    fn msg(room_name: &str, text: &str) -> ChatMessage {
        ChatMessage::compose(room(room_name), SessionId::random().unwrap(), text).unwrap()
    }

    fn forward(handle: &mut ChannelHandle) -> mpsc::UnboundedReceiver<ChatMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        handle.on_message(Box::new(move |m| {
            let _ = tx.send(m);
        }));
        rx
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_join_registers_peer() {
        let bus = LocalBus::new();
        let _a = bus.join(&room("lounge")).unwrap();
        let _b = bus.join(&room("lounge")).unwrap();
        assert_eq!(bus.peer_count("lounge"), 2);
        assert_eq!(bus.room_count(), 1);
    }

    #[tokio::test]
    async fn test_close_releases_and_removes_topic() {
        let bus = LocalBus::new();
        let mut a = bus.join(&room("lounge")).unwrap();
        let b = bus.join(&room("lounge")).unwrap();
        a.close();
        assert_eq!(bus.peer_count("lounge"), 1);
        drop(b);
        assert_eq!(bus.peer_count("lounge"), 0);
        assert_eq!(bus.room_count(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let bus = LocalBus::new();
        let mut a = bus.join(&room("lounge")).unwrap();
        let _b = bus.join(&room("lounge")).unwrap();
        a.close();
        a.close();
        assert!(a.is_closed());
        assert_eq!(bus.peer_count("lounge"), 1);
    }

    #[tokio::test]
    async fn test_peer_receives_publish() {
        let bus = LocalBus::new();
        let a = bus.join(&room("lounge")).unwrap();
        let mut b = bus.join(&room("lounge")).unwrap();
        let mut inbox = forward(&mut b);
        let sent = msg("lounge", "hi");
        a.publish(&sent).unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, sent);
    }

    #[tokio::test]
    async fn test_publisher_does_not_hear_itself() {
        let bus = LocalBus::new();
        let mut a = bus.join(&room("lounge")).unwrap();
        let _b = bus.join(&room("lounge")).unwrap();
        let mut inbox = forward(&mut a);
        a.publish(&msg("lounge", "echo?")).unwrap();
        settle().await;
        assert!(inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let bus = LocalBus::new();
        let alpha = bus.join(&room("alpha")).unwrap();
        let mut beta = bus.join(&room("beta")).unwrap();
        let mut inbox = forward(&mut beta);
        alpha.publish(&msg("alpha", "secret")).unwrap();
        settle().await;
        assert!(inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_arrival_order_preserved() {
        let bus = LocalBus::new();
        let a = bus.join(&room("lounge")).unwrap();
        let mut b = bus.join(&room("lounge")).unwrap();
        let mut inbox = forward(&mut b);
        for i in 0..10 {
            a.publish(&msg("lounge", &format!("n{i}"))).unwrap();
        }
        for i in 0..10 {
            let got = tokio::time::timeout(Duration::from_secs(1), inbox.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(got.text(), format!("n{i}"));
        }
    }

    #[tokio::test]
    async fn test_no_delivery_after_close() {
        let bus = LocalBus::new();
        let a = bus.join(&room("lounge")).unwrap();
        let mut b = bus.join(&room("lounge")).unwrap();
        let mut inbox = forward(&mut b);
        b.close();
        a.publish(&msg("lounge", "too late")).unwrap();
        settle().await;
        assert!(inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_peers_is_ok() {
        let bus = LocalBus::new();
        let a = bus.join(&room("empty")).unwrap();
        assert!(a.publish(&msg("empty", "anyone?")).is_ok());
    }

    #[tokio::test]
    async fn test_publish_after_close_fails() {
        let bus = LocalBus::new();
        let mut a = bus.join(&room("lounge")).unwrap();
        a.close();
        let err = a.publish(&msg("lounge", "x")).unwrap_err();
        assert!(matches!(err, ChatError::TransportUnavailable(_)));
    }

    #[tokio::test]
    async fn test_shutdown_refuses_open_and_publish() {
        let bus = LocalBus::new();
        let a = bus.join(&room("lounge")).unwrap();
        bus.shutdown();
        assert!(matches!(
            bus.join(&room("lounge")),
            Err(ChatError::TransportUnavailable(_))
        ));
        assert!(matches!(
            a.publish(&msg("lounge", "x")),
            Err(ChatError::TransportUnavailable(_))
        ));
    }

    #[test]
    fn test_join_outside_runtime_is_transport_unavailable() {
        let bus = LocalBus::new();
        assert!(matches!(
            bus.join(&room("lounge")),
            Err(ChatError::TransportUnavailable(_))
        ));
        assert_eq!(bus.room_count(), 0);
    }

    #[tokio::test]
    async fn test_on_message_replaces_callback() {
        let bus = LocalBus::new();
        let a = bus.join(&room("lounge")).unwrap();
        let mut b = bus.join(&room("lounge")).unwrap();
        let mut first = forward(&mut b);
        let mut second = forward(&mut b);
        a.publish(&msg("lounge", "who gets it")).unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), second.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.text(), "who gets it");
        assert!(first.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_lagged_listener_keeps_running() {
        let bus = LocalBus::with_capacity(2);
        let a = bus.join(&room("lounge")).unwrap();
        let mut b = bus.join(&room("lounge")).unwrap();
        let mut inbox = forward(&mut b);
        // Nothing yields between publishes, so b falls behind.
        for i in 0..8 {
            a.publish(&msg("lounge", &format!("burst{i}"))).unwrap();
        }
        let got = tokio::time::timeout(Duration::from_secs(1), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(got.text().starts_with("burst"));
        a.publish(&msg("lounge", "after lag")).unwrap();
        let mut last = got;
        while let Ok(Some(m)) =
            tokio::time::timeout(Duration::from_millis(200), inbox.recv()).await
        {
            last = m;
        }
        assert_eq!(last.text(), "after lag");
    }
}
