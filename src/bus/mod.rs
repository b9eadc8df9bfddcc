//! Bounded message bus decoupling channels, sessions, and renderers.
//!
//! Three independent FIFO queues (inbound, outbound, stream) with
//! many-producer/many-consumer semantics. `publish` blocks once a queue is
//! full (backpressure, not an error) and `consume` blocks until a message
//! arrives or the supplied token is cancelled.

pub mod events;

pub use events::{InboundMessage, OutboundMessage, StreamEvent, StreamEventKind};

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{PalaverError, Result};

/// Default queue capacity; publishing past it blocks the publisher.
pub const BUS_CAPACITY: usize = 100;

/// Handler invoked for inbound messages addressed to a channel.
pub type InboundHandler = Arc<
    dyn Fn(InboundMessage) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync,
>;

/// One bounded queue with a shared receiver side.
struct Queue<T> {
    tx: RwLock<Option<mpsc::Sender<T>>>,
    rx: Mutex<mpsc::Receiver<T>>,
}

impl<T> Queue<T> {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: RwLock::new(Some(tx)),
            rx: Mutex::new(rx),
        }
    }

    async fn publish(&self, message: T) -> Result<()> {
        let sender = self
            .tx
            .read()
            .expect("sender lock poisoned")
            .clone();
        let Some(sender) = sender else {
            return Err(PalaverError::BusClosed);
        };
        sender.send(message).await.map_err(|_| PalaverError::BusClosed)
    }

    /// Blocks until a message is available or `token` fires. Returns `None`
    /// on cancellation or when the queue is closed and drained.
    async fn consume(&self, token: &CancellationToken) -> Option<T> {
        tokio::select! {
            _ = token.cancelled() => None,
            message = async {
                let mut rx = self.rx.lock().await;
                rx.recv().await
            } => message,
        }
    }

    /// Drop the sender side. A consumer parked in `recv` wakes with `None`
    /// once buffered messages drain; close itself never waits on the
    /// receiver lock, so a parked consumer cannot block it.
    fn close(&self) {
        self.tx.write().expect("sender lock poisoned").take();
    }
}

/// The process-wide message bus.
pub struct MessageBus {
    inbound: Queue<InboundMessage>,
    outbound: Queue<OutboundMessage>,
    stream: Queue<StreamEvent>,
    handlers: RwLock<HashMap<String, InboundHandler>>,
    closed: AtomicBool,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_capacity(BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inbound: Queue::new(capacity),
            outbound: Queue::new(capacity),
            stream: Queue::new(capacity),
            handlers: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn publish_inbound(&self, message: InboundMessage) -> Result<()> {
        self.inbound.publish(message).await
    }

    pub async fn consume_inbound(&self, token: &CancellationToken) -> Option<InboundMessage> {
        self.inbound.consume(token).await
    }

    pub async fn publish_outbound(&self, message: OutboundMessage) -> Result<()> {
        self.outbound.publish(message).await
    }

    pub async fn consume_outbound(&self, token: &CancellationToken) -> Option<OutboundMessage> {
        self.outbound.consume(token).await
    }

    /// Publish a streaming progress event, stamping a timestamp when the
    /// producer supplied none.
    pub async fn publish_stream(&self, mut event: StreamEvent) -> Result<()> {
        if event.timestamp.is_none() {
            event.timestamp = Some(Utc::now());
        }
        self.stream.publish(event).await
    }

    pub async fn consume_stream(&self, token: &CancellationToken) -> Option<StreamEvent> {
        self.stream.consume(token).await
    }

    /// Register the inbound handler for a channel id, replacing any previous
    /// registration.
    pub fn register_handler(&self, channel: impl Into<String>, handler: InboundHandler) {
        let mut handlers = self.handlers.write().expect("handler lock poisoned");
        handlers.insert(channel.into(), handler);
    }

    pub fn handler(&self, channel: &str) -> Option<InboundHandler> {
        let handlers = self.handlers.read().expect("handler lock poisoned");
        handlers.get(channel).cloned()
    }

    /// Close all three queues. Idempotent and non-blocking even while
    /// consumers sit in `consume`; pending messages may still be drained,
    /// further publishes fail with `BusClosed`.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("closing message bus");
        self.inbound.close();
        self.outbound.close();
        self.stream.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_then_consume_preserves_order() {
        let bus = MessageBus::new();
        let token = CancellationToken::new();
        for i in 0..5 {
            bus.publish_inbound(InboundMessage::new("term", "u", "c", format!("m{i}")))
                .await
                .unwrap();
        }
        for i in 0..5 {
            let msg = bus.consume_inbound(&token).await.unwrap();
            assert_eq!(msg.content, format!("m{i}"));
        }
    }

    #[tokio::test]
    async fn full_queue_blocks_publisher_until_consume() {
        let bus = Arc::new(MessageBus::with_capacity(2));
        for _ in 0..2 {
            bus.publish_outbound(OutboundMessage::default()).await.unwrap();
        }

        let blocked = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.publish_outbound(OutboundMessage::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished(), "third publish should block at capacity 2");

        let token = CancellationToken::new();
        bus.consume_outbound(&token).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("publish should unblock after a consume")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_consume_returns_none_promptly() {
        let bus = MessageBus::new();
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let got = tokio::time::timeout(Duration::from_secs(1), bus.consume_stream(&token))
            .await
            .expect("consume should return promptly after cancellation");
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_fails_later_publishes() {
        let bus = MessageBus::new();
        bus.close().await;
        bus.close().await;
        let err = bus
            .publish_inbound(InboundMessage::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PalaverError::BusClosed));
    }

    #[tokio::test]
    async fn close_wakes_consumers_parked_without_cancellation() {
        let bus = Arc::new(MessageBus::new());
        let parked = {
            let bus = bus.clone();
            tokio::spawn(async move {
                let token = CancellationToken::new();
                bus.consume_inbound(&token).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(1), bus.close())
            .await
            .expect("close must not wait for parked consumers");
        let got = tokio::time::timeout(Duration::from_secs(1), parked)
            .await
            .expect("parked consume should return after close")
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn stream_publish_stamps_missing_timestamp() {
        let bus = MessageBus::new();
        let token = CancellationToken::new();
        bus.publish_stream(StreamEvent::new("term", "c", "term:c", StreamEventKind::Start))
            .await
            .unwrap();
        let event = bus.consume_stream(&token).await.unwrap();
        assert!(event.timestamp.is_some());
    }

    #[tokio::test]
    async fn handler_registry_is_independent_of_queues() {
        let bus = MessageBus::new();
        assert!(bus.handler("term").is_none());
        bus.register_handler(
            "term",
            Arc::new(|_msg| Box::pin(async { Ok(()) })),
        );
        assert!(bus.handler("term").is_some());
        assert!(bus.handler("other").is_none());
    }
}
