//! Outbound channel to a connected client

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use lodestone::{ClientId, TreePacket};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Client {0} is no longer connected")]
    Closed(ClientId),

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] lodestone_api::WireError),

    #[error("Transport failure: {0}")]
    Io(#[from] std::io::Error),
}

/// How the host reaches a client.
///
/// Implementations wrap whatever connection the embedding server keeps.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Deliver a freshly built command tree.
    async fn send_tree(&self, client: ClientId, packet: &TreePacket) -> Result<(), TransportError>;

    /// Deliver feedback text, such as a command failure.
    async fn send_message(&self, client: ClientId, message: &str) -> Result<(), TransportError>;
}

/// Keeps everything sent, per client. For tests and local tooling.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    trees: Mutex<HashMap<ClientId, Vec<TreePacket>>>,
    messages: Mutex<HashMap<ClientId, Vec<String>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trees(&self, client: ClientId) -> Vec<TreePacket> {
        self.trees
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&client)
            .cloned()
            .unwrap_or_default()
    }

    pub fn last_tree(&self, client: ClientId) -> Option<TreePacket> {
        self.trees(client).pop()
    }

    pub fn messages(&self, client: ClientId) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&client)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ClientTransport for MemoryTransport {
    async fn send_tree(&self, client: ClientId, packet: &TreePacket) -> Result<(), TransportError> {
        self.trees
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(client)
            .or_default()
            .push(packet.clone());
        Ok(())
    }

    async fn send_message(&self, client: ClientId, message: &str) -> Result<(), TransportError> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(client)
            .or_default()
            .push(message.to_string());
        Ok(())
    }
}
