use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use parlor_types::models::Message;

/// Topic every new-message event is published on. Events are routed to a
/// channel per subscriber at delivery time, not at publish time.
pub const MESSAGE_TOPIC: &str = "message.created";

/// In-process publish/subscribe bus for realtime events. Created once at
/// startup, handed to whoever publishes or subscribes, and closed on shutdown.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for the message topic; every subscriber sees every event
    message_tx: broadcast::Sender<Message>,

    /// Cancelled when the bus closes; ends every open subscription
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(capacity: usize) -> Self {
        let (message_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(DispatcherInner {
                message_tx,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Publish a new message. Returns how many subscribers were reached.
    /// Nobody listening is not an error.
    pub fn publish(&self, message: Message) -> usize {
        if self.is_closed() {
            debug!("Dropping publish on closed bus for message {}", message.id);
            return 0;
        }
        match self.inner.message_tx.send(message) {
            Ok(n) => n,
            Err(_) => {
                debug!("No subscribers on {}", MESSAGE_TOPIC);
                0
            }
        }
    }

    /// Subscribe to the message topic. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.inner.message_tx.subscribe()
    }

    /// Close the bus. Open subscription streams end after this.
    pub fn close(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!("Closing realtime bus ({} receivers)", self.inner.message_tx.receiver_count());
            self.inner.shutdown.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Token cancelled when the bus closes.
    pub fn closed(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }
}
