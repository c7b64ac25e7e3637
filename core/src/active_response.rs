//! Live projection of the currently streaming turn.
//!
//! Consumers that want partial-response data distinct from the finalized
//! history log observe this state. A typed fold over [`TurnMessage`]
//! updates it; text and card ordering are delegated to the per-turn
//! handlers in the registry. Only fields whose value actually changed are
//! written back and reported, so downstream re-computation is never
//! triggered spuriously.

use chatstream_protocol::ChatId;
use chatstream_protocol::ConversationId;
use chatstream_protocol::protocol::AudioChunk;
use chatstream_protocol::protocol::Card;
use chatstream_protocol::protocol::Chunk;
use chatstream_protocol::protocol::ProgressUpdate;
use chatstream_protocol::protocol::TurnMessage;
use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use strum_macros::Display;
use tracing::warn;

use crate::registry::HandlerKey;
use crate::registry::HandlerRegistry;

/// Execution progress of one workflow node, last-write-wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeEvent {
    pub node_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveResponse {
    pub chat_id: ChatId,
    pub user_id: Option<String>,
    pub message_source: Option<String>,
    pub message_chunks: Vec<Chunk>,
    pub progress: Option<ProgressUpdate>,
    pub json_data: Vec<Value>,
    pub action_suggestion: Option<Vec<String>>,
    pub text: Option<String>,
    pub cards: Vec<Card>,
    pub questions: Option<Vec<String>>,
    pub audio_chunk: Option<AudioChunk>,
    pub node_event: Option<NodeEvent>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ActiveResponse {
    fn new(chat_id: ChatId, user_id: Option<String>, message_source: Option<String>) -> Self {
        Self {
            chat_id,
            user_id,
            message_source,
            message_chunks: Vec::new(),
            progress: None,
            json_data: Vec::new(),
            action_suggestion: None,
            text: None,
            cards: Vec::new(),
            questions: None,
            audio_chunk: None,
            node_event: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }
}

/// Field identifiers reported by [`ActiveResponseTracker::apply`] when a
/// message actually changed the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ChangedField {
    MessageChunks,
    Progress,
    JsonData,
    ActionSuggestion,
    Text,
    Cards,
    Questions,
    AudioChunk,
    NodeEvent,
}

/// Owns the live projection plus the per-turn handler registry, so the
/// lifecycle boundary that completes or clears a turn also tears its
/// handlers down.
pub struct ActiveResponseTracker {
    conversation_id: ConversationId,
    registry: HandlerRegistry,
    current: Option<ActiveResponse>,
}

impl ActiveResponseTracker {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            registry: HandlerRegistry::new(),
            current: None,
        }
    }

    fn key(&self, chat_id: &ChatId) -> HandlerKey {
        HandlerKey::new(self.conversation_id.clone(), chat_id.clone())
    }

    /// Begin a streaming turn. Resets the keyed animator so an instance
    /// reused across turns starts from a clean reveal.
    pub fn start(
        &mut self,
        chat_id: ChatId,
        user_id: Option<String>,
        message_source: Option<String>,
    ) {
        let key = self.key(&chat_id);
        self.registry.animator(&key).reset();
        self.current = Some(ActiveResponse::new(chat_id, user_id, message_source));
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn snapshot(&self) -> Option<ActiveResponse> {
        self.current.clone()
    }

    /// Fold one streamed message into the projection. Returns the fields
    /// that changed; an empty vec means the message was redundant.
    pub fn apply(&mut self, message: TurnMessage) -> Vec<ChangedField> {
        let Some(chat_id) = self.current.as_ref().map(|s| s.chat_id.clone()) else {
            warn!(%message, "dropping turn message with no active response");
            return Vec::new();
        };
        let key = self.key(&chat_id);
        let mut changed = Vec::new();

        match message {
            TurnMessage::MessageChunk { chunk } => {
                let animator = self.registry.animator(&key);
                animator.add_chunk(chunk);
                let chunks = animator.chunks();
                let state = self.state_mut();
                if state.message_chunks != chunks {
                    state.message_chunks = chunks;
                    changed.push(ChangedField::MessageChunks);
                }
            }
            TurnMessage::CardsMessage { cards } => {
                let handler = self.registry.cards(&key);
                handler.add_cards(cards);
                let cards = handler.cards();
                let state = self.state_mut();
                if state.cards != cards {
                    state.cards = cards;
                    changed.push(ChangedField::Cards);
                }
            }
            TurnMessage::ProgressUpdate(progress) => {
                let state = self.state_mut();
                if state.progress.as_ref() != Some(&progress) {
                    state.progress = Some(progress);
                    changed.push(ChangedField::Progress);
                }
            }
            TurnMessage::ActionSuggestion { actions } => {
                let state = self.state_mut();
                if state.action_suggestion.as_ref() != Some(&actions) {
                    state.action_suggestion = Some(actions);
                    changed.push(ChangedField::ActionSuggestion);
                }
            }
            TurnMessage::TextMessage { text } => {
                let state = self.state_mut();
                if state.text.as_deref() != Some(text.as_str()) {
                    state.text = Some(text);
                    changed.push(ChangedField::Text);
                }
            }
            TurnMessage::JsonData { data } => {
                // The one append-accumulated field.
                let state = self.state_mut();
                state.json_data.push(data);
                changed.push(ChangedField::JsonData);
            }
            TurnMessage::Questions { questions } => {
                let state = self.state_mut();
                if state.questions.as_ref() != Some(&questions) {
                    state.questions = Some(questions);
                    changed.push(ChangedField::Questions);
                }
            }
            TurnMessage::AudioChunk(audio) => {
                let state = self.state_mut();
                if state.audio_chunk.as_ref() != Some(&audio) {
                    state.audio_chunk = Some(audio);
                    changed.push(ChangedField::AudioChunk);
                }
            }
            TurnMessage::NodeExecutionEvent { node_id, status } => {
                let event = NodeEvent { node_id, status };
                let state = self.state_mut();
                if state.node_event.as_ref() != Some(&event) {
                    state.node_event = Some(event);
                    changed.push(ChangedField::NodeEvent);
                }
            }
        }
        changed
    }

    fn state_mut(&mut self) -> &mut ActiveResponse {
        // Callers checked `current` before building the key.
        match self.current.as_mut() {
            Some(state) => state,
            None => unreachable!("active response checked above"),
        }
    }

    /// Commit the next paced chunk of the current turn, if one is ready.
    pub fn commit_next_chunk(&mut self) -> Option<Chunk> {
        let chat_id = self.current.as_ref()?.chat_id.clone();
        let key = self.key(&chat_id);
        self.registry.existing_animator(&key)?.commit_next()
    }

    /// True when the current turn's animation cannot advance right now.
    pub fn animation_idle(&mut self) -> bool {
        let Some(chat_id) = self.current.as_ref().map(|s| s.chat_id.clone()) else {
            return true;
        };
        let key = self.key(&chat_id);
        match self.registry.existing_animator(&key) {
            Some(animator) => animator.is_idle(),
            None => true,
        }
    }

    /// Finalize the named turn: run its animator's gap check and, when that
    /// turn is the active projection, stamp the end time. A completion for
    /// some other chat must not touch the projection that superseded it.
    /// Returns the missing chunk indices for diagnostics.
    pub fn complete(&mut self, chat_id: &ChatId) -> Vec<u32> {
        let key = self.key(chat_id);
        let missing = match self.registry.existing_animator(&key) {
            Some(animator) => animator.mark_conversation_complete(),
            None => Vec::new(),
        };
        if let Some(state) = self.current.as_mut() {
            if &state.chat_id == chat_id {
                state.ended_at = Some(Utc::now());
            }
        }
        missing
    }

    /// Full reset when the UI dismisses the turn: drop the projection and
    /// tear down its per-turn handlers.
    pub fn clear(&mut self) {
        if let Some(state) = self.current.take() {
            let key = self.key(&state.chat_id);
            self.registry.dispose(&key);
        }
    }

    /// Session-wide teardown.
    pub fn clear_all(&mut self) {
        self.current = None;
        self.registry.clear();
    }
}
