//! Scoped cache of per-turn handlers.
//!
//! Card accumulation and chunk animation must survive across multiple
//! discrete event deliveries for the same turn, so handlers are keyed by
//! (conversation, chat) and live here between events. The registry is owned
//! by the pipeline that creates it — there is no process-wide global — and
//! the turn-completion path owns disposal, otherwise abandoned turns would
//! leak handlers.

use std::collections::HashMap;

use chatstream_protocol::ChatId;
use chatstream_protocol::ConversationId;
use tracing::debug;

use crate::cards::CardsHandler;
use crate::chunk_animator::ChunkAnimator;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    pub conversation_id: ConversationId,
    pub chat_id: ChatId,
}

impl HandlerKey {
    pub fn new(conversation_id: ConversationId, chat_id: ChatId) -> Self {
        Self {
            conversation_id,
            chat_id,
        }
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    animators: HashMap<HandlerKey, ChunkAnimator>,
    cards: HashMap<HandlerKey, CardsHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lazily create the animator for a turn.
    pub fn animator(&mut self, key: &HandlerKey) -> &mut ChunkAnimator {
        self.animators.entry(key.clone()).or_default()
    }

    /// Lazily create the cards handler for a turn.
    pub fn cards(&mut self, key: &HandlerKey) -> &mut CardsHandler {
        self.cards.entry(key.clone()).or_default()
    }

    /// The animator for a turn, if one was ever created.
    pub fn existing_animator(&mut self, key: &HandlerKey) -> Option<&mut ChunkAnimator> {
        self.animators.get_mut(key)
    }

    /// Tear down both handlers for one turn. Called from the same place
    /// that marks the turn complete or cleared.
    pub fn dispose(&mut self, key: &HandlerKey) {
        if self.animators.remove(key).is_some() || self.cards.remove(key).is_some() {
            debug!(chat_id = %key.chat_id, "disposed per-turn handlers");
        }
    }

    /// Full teardown on session clear.
    pub fn clear(&mut self) {
        self.animators.clear();
        self.cards.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.animators.is_empty() && self.cards.is_empty()
    }
}
