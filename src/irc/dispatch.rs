//! Command-keyed routing of inbound messages.
//!
//! Each command has at most one consumer, fed through its own bounded
//! channel. Messages whose command has no live consumer go to the unhandled
//! sequence. Delivery awaits channel capacity, so a slow consumer applies
//! backpressure to the reader instead of losing messages.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::commands::normalize;
use super::error::DispatchError;
use super::message::Message;

/// Where a message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Routed,
    Unhandled,
    /// Nobody is listening on the unhandled sequence anymore.
    Dropped,
}

#[derive(Debug)]
pub struct DispatchTable {
    routes: RwLock<HashMap<String, mpsc::Sender<Message>>>,
    capacity: usize,
}

impl DispatchTable {
    /// `capacity` is the buffer size of each per-command channel.
    pub fn new(capacity: usize) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register the consumer for `command`.
    ///
    /// Fails if a live consumer already exists. An entry whose receiver has
    /// been dropped is replaced.
    pub fn route(&self, command: &str) -> Result<mpsc::Receiver<Message>, DispatchError> {
        self.route_with_capacity(command, self.capacity)
    }

    pub fn route_with_capacity(
        &self,
        command: &str,
        capacity: usize,
    ) -> Result<mpsc::Receiver<Message>, DispatchError> {
        let key = normalize(command);
        let mut routes = self.routes.write();
        if routes.get(&key).is_some_and(|tx| !tx.is_closed()) {
            return Err(DispatchError::AlreadyRouted(key));
        }
        let (tx, rx) = mpsc::channel(capacity.max(1));
        routes.insert(key, tx);
        Ok(rx)
    }

    /// Remove the entry for `command`. Later messages fall through to the
    /// unhandled sequence.
    pub fn unroute(&self, command: &str) -> bool {
        self.routes.write().remove(&normalize(command)).is_some()
    }

    #[cfg(test)]
    fn is_routed(&self, command: &str) -> bool {
        self.lookup(&normalize(command)).is_some()
    }

    fn lookup(&self, key: &str) -> Option<mpsc::Sender<Message>> {
        self.routes.read().get(key).cloned()
    }

    fn remove_if_closed(&self, key: &str) {
        let mut routes = self.routes.write();
        if routes.get(key).is_some_and(|tx| tx.is_closed()) {
            routes.remove(key);
        }
    }

    /// Deliver `message` to its command's consumer, or to `unhandled`.
    pub async fn dispatch(&self, message: Message, unhandled: &mpsc::Sender<Message>) -> Delivery {
        let key = normalize(&message.command);

        let message = match self.lookup(&key) {
            Some(route) => match route.send(message).await {
                Ok(()) => return Delivery::Routed,
                Err(mpsc::error::SendError(message)) => {
                    tracing::debug!(command = %key, "consumer went away, removing route");
                    self.remove_if_closed(&key);
                    message
                }
            },
            None => message,
        };

        match unhandled.send(message).await {
            Ok(()) => Delivery::Unhandled,
            Err(_) => Delivery::Dropped,
        }
    }
}
