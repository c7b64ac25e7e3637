//! Append-only, subscribable log of conversation turns: the single source
//! of truth the rendering layer observes.
//!
//! The log is owned exclusively by the manager. Every read accessor returns
//! a defensive copy, so callers can never mutate internal state through a
//! returned reference; every mutation emits change notifications to the
//! current subscribers.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;

use chatstream_protocol::ChatId;
use chatstream_protocol::ConversationId;
use chatstream_protocol::new_turn_id;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use strum_macros::Display;
use tracing::debug;
use tracing::warn;

use crate::component_loader::ComponentHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StreamingState {
    Idle,
    #[default]
    Streaming,
    Complete,
}

/// Immutable once appended.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UserMessage {
    pub id: String,
    pub chat_id: ChatId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// One UI component attached to a response. Created once; props and
/// metadata never mutate afterwards — fresh data flows through the
/// component data store instead.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ComponentEntry {
    pub id: String,
    pub component_type: String,
    pub component_url: String,
    pub node_id: String,
    pub chat_id: ChatId,
    #[serde(default)]
    pub props: Value,
    #[serde(default)]
    pub metadata: Value,
    /// Resolved handle. Serializes as a placeholder marker; debug exports
    /// must not drag the live instance along.
    #[serde(default, skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub handle: Option<ComponentHandle>,
}

/// Mutable tail of the log: streaming state transitions and component
/// appends. Component order is append order — that is the rendering order
/// and is never re-sorted.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AssistantResponse {
    pub id: String,
    pub chat_id: ChatId,
    pub streaming_state: StreamingState,
    pub components: Vec<ComponentEntry>,
    pub timestamp: DateTime<Utc>,
}

/// One entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Display)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Turn {
    UserMessage(UserMessage),
    AssistantResponse(AssistantResponse),
}

impl Turn {
    pub fn id(&self) -> &str {
        match self {
            Turn::UserMessage(m) => &m.id,
            Turn::AssistantResponse(r) => &r.id,
        }
    }

    pub fn chat_id(&self) -> &ChatId {
        match self {
            Turn::UserMessage(m) => &m.chat_id,
            Turn::AssistantResponse(r) => &r.chat_id,
        }
    }
}

/// Field-level last-write-wins update for an assistant response.
#[derive(Debug, Clone, Default)]
pub struct ResponseUpdate {
    pub streaming_state: Option<StreamingState>,
    pub components: Option<Vec<ComponentEntry>>,
}

/// Generic update applicable to any turn kind; fields that do not exist on
/// the target variant are ignored.
#[derive(Debug, Clone, Default)]
pub struct EntryUpdate {
    pub content: Option<String>,
    pub metadata: Option<Value>,
    pub streaming_state: Option<StreamingState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum HistoryEventKind {
    Init,
    Added,
    Updated,
    Cleared,
    Changed,
}

/// Notification delivered to subscribers. `Added`/`Updated` carry a
/// snapshot of the affected turn; every mutation is followed by a bare
/// `Changed`.
#[derive(Debug, Clone)]
pub struct HistoryEvent {
    pub kind: HistoryEventKind,
    pub turn: Option<Turn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct HistorySubscription {
    pub id: SubscriptionId,
    pub events: async_channel::Receiver<HistoryEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionMeta {
    pub conversation_id: Option<ConversationId>,
    pub user_id: Option<String>,
    pub chat_id: Option<ChatId>,
}

#[derive(Default)]
struct HistoryState {
    turns: Vec<Turn>,
    meta: SessionMeta,
    subscribers: Vec<(SubscriptionId, async_channel::Sender<HistoryEvent>)>,
    next_subscription: u64,
}

#[derive(Default)]
pub struct HistoryManager {
    state: Mutex<HistoryState>,
}

impl HistoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HistoryState> {
        // The log holds plain data; a panicked writer cannot leave a
        // half-applied turn behind, so a poisoned lock is recoverable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set session metadata. Independent of `clear`.
    pub fn init(
        &self,
        conversation_id: ConversationId,
        user_id: Option<String>,
        chat_id: Option<ChatId>,
    ) {
        let mut state = self.lock();
        state.meta = SessionMeta {
            conversation_id: Some(conversation_id),
            user_id,
            chat_id,
        };
        emit(&mut state, HistoryEventKind::Init, None);
        emit(&mut state, HistoryEventKind::Changed, None);
    }

    pub fn session_meta(&self) -> SessionMeta {
        self.lock().meta.clone()
    }

    /// Append a user message. The chat id comes from the caller when the
    /// transport supplied one, otherwise a fresh id is minted.
    pub fn add_user_message(
        &self,
        content: &str,
        chat_id: Option<ChatId>,
        metadata: Option<Value>,
    ) -> UserMessage {
        let message = UserMessage {
            id: new_turn_id("msg"),
            chat_id: chat_id.unwrap_or_default(),
            content: content.to_string(),
            timestamp: Utc::now(),
            metadata,
        };
        let mut state = self.lock();
        state.turns.push(Turn::UserMessage(message.clone()));
        let snapshot = Turn::UserMessage(message.clone());
        emit(&mut state, HistoryEventKind::Added, Some(snapshot));
        emit(&mut state, HistoryEventKind::Changed, None);
        message
    }

    /// Append an assistant response, defaulting to `Streaming`.
    pub fn add_response(
        &self,
        chat_id: ChatId,
        streaming_state: Option<StreamingState>,
        components: Vec<ComponentEntry>,
    ) -> AssistantResponse {
        let response = AssistantResponse {
            id: new_turn_id("resp"),
            chat_id,
            streaming_state: streaming_state.unwrap_or_default(),
            components,
            timestamp: Utc::now(),
        };
        let mut state = self.lock();
        state.turns.push(Turn::AssistantResponse(response.clone()));
        let snapshot = Turn::AssistantResponse(response.clone());
        emit(&mut state, HistoryEventKind::Added, Some(snapshot));
        emit(&mut state, HistoryEventKind::Changed, None);
        response
    }

    /// Shallow-merge `update` into the response with this id. Unknown ids
    /// are a logged no-op returning `None`; callers must check the result.
    pub fn update_response(&self, id: &str, update: ResponseUpdate) -> Option<AssistantResponse> {
        let mut state = self.lock();
        let Some(response) = state.turns.iter_mut().find_map(|t| match t {
            Turn::AssistantResponse(r) if r.id == id => Some(r),
            _ => None,
        }) else {
            warn!(id, "update_response: no response with this id");
            return None;
        };
        if let Some(streaming_state) = update.streaming_state {
            response.streaming_state = streaming_state;
        }
        if let Some(components) = update.components {
            response.components = components;
        }
        let snapshot = response.clone();
        let turn = Turn::AssistantResponse(snapshot.clone());
        emit(&mut state, HistoryEventKind::Updated, Some(turn));
        emit(&mut state, HistoryEventKind::Changed, None);
        Some(snapshot)
    }

    pub fn set_streaming_state(
        &self,
        id: &str,
        streaming_state: StreamingState,
    ) -> Option<AssistantResponse> {
        self.update_response(
            id,
            ResponseUpdate {
                streaming_state: Some(streaming_state),
                ..Default::default()
            },
        )
    }

    /// Append a component entry to a response. Returns `None` when the
    /// response id is unknown; `Some(false)` when an entry for the same
    /// node was already attached (replayed `COMPONENT_INIT`), `Some(true)`
    /// on append.
    pub fn add_component_to_response(&self, response_id: &str, entry: ComponentEntry) -> Option<bool> {
        let mut state = self.lock();
        let Some(response) = state.turns.iter_mut().find_map(|t| match t {
            Turn::AssistantResponse(r) if r.id == response_id => Some(r),
            _ => None,
        }) else {
            warn!(response_id, "add_component_to_response: no response with this id");
            return None;
        };
        if response.components.iter().any(|c| c.node_id == entry.node_id) {
            debug!(
                response_id,
                node_id = entry.node_id,
                "skipping duplicate component for node"
            );
            return Some(false);
        }
        response.components.push(entry);
        let turn = Turn::AssistantResponse(response.clone());
        emit(&mut state, HistoryEventKind::Updated, Some(turn));
        emit(&mut state, HistoryEventKind::Changed, None);
        Some(true)
    }

    /// Generic update over any turn kind; same not-found semantics as
    /// `update_response`. Fields that do not apply to the target variant
    /// are ignored.
    pub fn update_entry(&self, id: &str, update: EntryUpdate) -> Option<Turn> {
        let mut state = self.lock();
        let Some(turn) = state.turns.iter_mut().find(|t| t.id() == id) else {
            warn!(id, "update_entry: no turn with this id");
            return None;
        };
        match turn {
            Turn::UserMessage(message) => {
                if let Some(content) = update.content {
                    message.content = content;
                }
                if let Some(metadata) = update.metadata {
                    message.metadata = Some(metadata);
                }
            }
            Turn::AssistantResponse(response) => {
                if let Some(streaming_state) = update.streaming_state {
                    response.streaming_state = streaming_state;
                }
            }
        }
        let snapshot = turn.clone();
        emit(&mut state, HistoryEventKind::Updated, Some(snapshot.clone()));
        emit(&mut state, HistoryEventKind::Changed, None);
        Some(snapshot)
    }

    /// Full ordered log, as a copy.
    pub fn history(&self) -> Vec<Turn> {
        self.lock().turns.clone()
    }

    pub fn get(&self, id: &str) -> Option<Turn> {
        self.lock().turns.iter().find(|t| t.id() == id).cloned()
    }

    pub fn responses(&self) -> Vec<AssistantResponse> {
        self.lock()
            .turns
            .iter()
            .filter_map(|t| match t {
                Turn::AssistantResponse(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn user_messages(&self) -> Vec<UserMessage> {
        self.lock()
            .turns
            .iter()
            .filter_map(|t| match t {
                Turn::UserMessage(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    /// The most recent response for a chat id. At most one response per
    /// chat is active at a time; the latest one is the live turn.
    pub fn response_by_chat_id(&self, chat_id: &ChatId) -> Option<AssistantResponse> {
        self.lock()
            .turns
            .iter()
            .rev()
            .find_map(|t| match t {
                Turn::AssistantResponse(r) if &r.chat_id == chat_id => Some(r.clone()),
                _ => None,
            })
    }

    /// Every component across all responses, keyed by response id.
    pub fn all_components(&self) -> HashMap<String, Vec<ComponentEntry>> {
        self.lock()
            .turns
            .iter()
            .filter_map(|t| match t {
                Turn::AssistantResponse(r) if !r.components.is_empty() => {
                    Some((r.id.clone(), r.components.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Register a subscriber. A closed receiver is pruned at the next emit
    /// and never blocks delivery to the others.
    pub fn subscribe(&self) -> HistorySubscription {
        let mut state = self.lock();
        let id = SubscriptionId(state.next_subscription);
        state.next_subscription += 1;
        let (tx, rx) = async_channel::unbounded();
        state.subscribers.push((id, tx));
        HistorySubscription { id, events: rx }
    }

    /// Idempotent; unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().subscribers.retain(|(sub_id, _)| *sub_id != id);
    }

    /// Empty the turn log. Session metadata set via `init` survives.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.turns.clear();
        emit(&mut state, HistoryEventKind::Cleared, None);
        emit(&mut state, HistoryEventKind::Changed, None);
    }

    /// Debug/export serialization. Resolved component handles appear as
    /// placeholder markers.
    pub fn to_json(&self) -> crate::Result<Value> {
        Ok(serde_json::to_value(self.history())?)
    }
}

fn emit(state: &mut HistoryState, kind: HistoryEventKind, turn: Option<Turn>) {
    let event = HistoryEvent { kind, turn };
    state.subscribers.retain(|(id, tx)| {
        if tx.try_send(event.clone()).is_err() {
            debug!(?id, "pruning closed history subscriber");
            false
        } else {
            true
        }
    });
}
