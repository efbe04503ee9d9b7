//! Chat between matched profiles.

use std::sync::Arc;

use super::Engine;
use crate::chat::{thread_id, thread_topic, ChatMessage, ChatSubscription};
use crate::error::{Error, Result};
use crate::profile::require_active;
use crate::storage::{Entity, StoreExt};
use crate::sync::{EnvelopeHandler, SyncEnvelope};

impl Engine {
    /// Send a message to a match
    ///
    /// Fails with [`Error::NotMatched`] unless the pair has an active match;
    /// nothing is stored in that case.
    pub fn send_message(&self, sender: &str, recipient: &str, body: &str) -> Result<ChatMessage> {
        require_active(self.store.as_ref(), sender)?;
        require_active(self.store.as_ref(), recipient)?;
        if !self.detector.is_active_match(sender, recipient)? {
            return Err(Error::NotMatched);
        }

        let message = ChatMessage::new(
            sender,
            recipient,
            body,
            crate::time::now_timestamp_millis(),
        );
        message.validate(self.config.max_message_length)?;

        self.store.save(&message)?;
        self.publish(&message, Some(message.topic()));
        // No live subscribers is fine
        let _ = self.chat_tx.send(message.clone());

        tracing::info!(thread = %message.thread_id(), id = %message.id, "Message sent");
        Ok(message)
    }

    /// Every stored message between two profiles, oldest first
    pub fn messages_between(&self, x: &str, y: &str) -> Result<Vec<ChatMessage>> {
        let mut messages: Vec<ChatMessage> =
            self.store.load_all(&format!("{}:", thread_id(x, y)))?;
        messages.sort_by(|m, n| m.at.cmp(&n.at).then_with(|| m.id.cmp(&n.id)));
        Ok(messages)
    }

    /// Mark a received message as delivered
    pub fn mark_delivered(&self, recipient: &str, sender: &str, id: &str) -> Result<ChatMessage> {
        self.set_message_flags(recipient, sender, id, false)
    }

    /// Mark a received message as read (implies delivered)
    pub fn mark_read(&self, recipient: &str, sender: &str, id: &str) -> Result<ChatMessage> {
        self.set_message_flags(recipient, sender, id, true)
    }

    fn set_message_flags(
        &self,
        recipient: &str,
        sender: &str,
        id: &str,
        read: bool,
    ) -> Result<ChatMessage> {
        let key = format!("{}:{}", thread_id(recipient, sender), id);
        let Some(stored) = self.store.load::<ChatMessage>(&key)? else {
            return Err(Error::MessageNotFound);
        };
        if stored.recipient_id != recipient {
            return Err(Error::MessageNotFound);
        }

        let mut update = stored.clone();
        update.delivered = true;
        update.read = update.read || read;

        match self.store.save(&update)?.into_written() {
            Some(written) => {
                self.publish(&written, Some(written.topic()));
                tracing::debug!(key = %written.key(), read = written.read, "Message flags updated");
                Ok(written)
            }
            None => Ok(stored),
        }
    }

    /// Follow a chat thread live
    ///
    /// Delivers messages sent locally and messages arriving from other
    /// replicas, each exactly once. If the live topic cannot be joined the
    /// feed still carries everything applied by [`Engine::sync_now`].
    pub async fn subscribe_chat<F>(&self, x: &str, y: &str, handler: F) -> Result<ChatSubscription>
    where
        F: FnMut(ChatMessage) + Send + 'static,
    {
        if !self.detector.is_active_match(x, y)? {
            return Err(Error::NotMatched);
        }

        let feed = self.chat_tx.subscribe();
        let topic = thread_topic(x, y);

        let engine = self.clone();
        let on_envelope: EnvelopeHandler = Arc::new(move |envelope: SyncEnvelope| {
            if let Err(e) = engine.apply_envelope(&envelope) {
                tracing::warn!(key = %envelope.key, "Rejected live envelope: {}", e);
            }
        });

        let listener = match self.replicator.bridge().subscribe(&topic, on_envelope).await {
            Ok(listener) => Some(listener),
            Err(e) => {
                tracing::warn!(topic = %topic, "Live topic unavailable, relying on pulls: {}", e);
                None
            }
        };

        Ok(ChatSubscription::spawn(thread_id(x, y), feed, listener, handler))
    }
}
