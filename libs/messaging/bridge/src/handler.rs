//! Consumer-facing message handlers

use crate::error::HandlerError;
use async_trait::async_trait;
use codec::{Message, MessageType, StatusMap};
use dashmap::DashMap;
use std::sync::Arc;

/// What a handler did with a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Processed,
    /// Status entries to merge into a StatusResponse
    Status(StatusMap),
}

/// Invoked once per validated, deduplicated inbound message of a registered type
///
/// `Ok` confirms the message (Signal: a Confirmation is sent back; mailbox
/// entries move to `confirmed`). `Err` sends nothing back and moves a mailbox
/// entry to `failed` with the error text as reason.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<HandlerOutcome, HandlerError>;
}

/// One handler per message type; registering again replaces the previous one
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<MessageType, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, message_type: MessageType, handler: Arc<dyn MessageHandler>) {
        if self.handlers.insert(message_type, handler).is_some() {
            tracing::debug!(%message_type, "Replaced message handler");
        }
    }

    pub fn get(&self, message_type: MessageType) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(&message_type).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, message_type: MessageType) -> bool {
        self.handlers.contains_key(&message_type)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered: Vec<MessageType> = self.handlers.iter().map(|entry| *entry.key()).collect();
        f.debug_struct("HandlerRegistry")
            .field("registered", &registered)
            .finish()
    }
}
