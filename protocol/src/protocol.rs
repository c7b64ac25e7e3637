//! Defines the protocol for a chatstream session between a client and a
//! server.
//!
//! The server pushes [`ServerEvent`]s (an EQ in spirit: the client never
//! acks them); the client sends fire-and-forget [`OutboundCommand`]s back.
//! Per-turn streamed payloads arrive as [`TurnMessage`]s discriminated by
//! `__typename`.

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use strum_macros::Display;

use crate::ChatId;

/// Lifecycle states reported by the server-side workflow engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowError,
    Thinking,
    Responding,
    Waiting,
    Complete,
    Error,
}

/// How a newly named template relates to the currently active one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Display, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TemplateMode {
    /// Replace the active template, keeping the stack depth.
    #[default]
    Switch,
    /// Push on top of the active template.
    Stack,
    /// Drop the whole stack and start over with this template.
    Replace,
}

/// Optional workflow metadata attached to `WORKFLOW_STATE` events.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_mode: Option<TemplateMode>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Description of a remote UI component the server wants instantiated.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// Component type name, e.g. `"Card"`. `type` on the wire.
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub component_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ComponentSpec {
    /// Components may declare themselves focusable via metadata; the client
    /// then routes subsequent input at them.
    pub fn is_focusable(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("focusable"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Event pushed by the server over the transport, already JSON-decoded.
///
/// `id`, where present, is an idempotency key: once an event with a given id
/// has been fully processed, later deliveries of the same id are dropped.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Display)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerEvent {
    /// The transport is connected and the server accepted the session.
    SessionReady,

    /// Instantiate a named component and attach it to a response.
    #[serde(rename_all = "camelCase")]
    ComponentInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_id: Option<ChatId>,
        node_id: String,
        component: ComponentSpec,
    },

    /// New data for a previously initialized component.
    #[serde(rename_all = "camelCase")]
    ComponentData {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        chat_id: ChatId,
        node_id: String,
        data: Value,
    },

    /// Tear down a previously initialized component.
    #[serde(rename_all = "camelCase")]
    ComponentRemove {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        chat_id: ChatId,
        node_id: String,
        component: ComponentSpec,
    },

    /// Workflow lifecycle transition for one turn.
    #[serde(rename_all = "camelCase")]
    WorkflowState {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        state: Option<WorkflowState>,
        chat_id: ChatId,
        #[serde(default)]
        workflow_id: String,
        #[serde(default)]
        workflow_run_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<WorkflowMetadata>,
    },
}

impl ServerEvent {
    /// The idempotency key, when the server attached one.
    pub fn idempotency_key(&self) -> Option<&str> {
        match self {
            ServerEvent::SessionReady => None,
            ServerEvent::ComponentInit { id, .. }
            | ServerEvent::ComponentData { id, .. }
            | ServerEvent::ComponentRemove { id, .. }
            | ServerEvent::WorkflowState { id, .. } => id.as_deref(),
        }
    }
}

/// One indexed fragment of a streamed text response.
///
/// Chunks for a turn form a conceptually complete sequence `0..N-1`; arrival
/// order is not guaranteed to match index order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Chunk {
    pub index: u32,
    pub text: String,
}

/// A structured, orderable, deduplicable UI payload item.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Card {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Sort key, transmitted as a string. Missing or unparsable indices sort
    /// last.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
}

impl Card {
    /// Sort key used for ordering within a turn. The sentinel pushes cards
    /// without a usable index behind every explicitly indexed card.
    pub const UNINDEXED_SORT_KEY: i64 = 999;

    pub fn sort_key(&self) -> i64 {
        self.index
            .as_deref()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(Self::UNINDEXED_SORT_KEY)
    }
}

/// Coarse progress report shown while a turn is streaming.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f32>,
}

/// One frame of streamed audio.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioChunk {
    /// Base64-encoded audio payload.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Per-turn streamed message payload, discriminated by `__typename`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Display)]
#[serde(tag = "__typename", rename_all = "PascalCase")]
pub enum TurnMessage {
    /// One indexed fragment of the streamed text body.
    MessageChunk { chunk: Chunk },

    /// A batch of cards; accumulated with id dedup and index ordering.
    #[serde(rename_all = "camelCase")]
    CardsMessage { cards: Vec<Card> },

    ProgressUpdate(ProgressUpdate),

    /// Suggested follow-up actions.
    #[serde(rename_all = "camelCase")]
    ActionSuggestion { actions: Vec<String> },

    /// Whole-message plain text (as opposed to indexed chunks).
    #[serde(rename_all = "camelCase")]
    TextMessage { text: String },

    /// Raw structured payload; consumers accumulate these in arrival order.
    #[serde(rename_all = "camelCase")]
    JsonData { data: Value },

    /// Clarifying questions for the user.
    #[serde(rename_all = "camelCase")]
    Questions { questions: Vec<String> },

    AudioChunk(AudioChunk),

    /// Execution progress of one workflow node.
    #[serde(rename_all = "camelCase")]
    NodeExecutionEvent { node_id: String, status: String },
}

/// Command sent back to the server. Fire-and-forget: no response
/// correlation inside the client.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Display)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundCommand {
    #[serde(rename_all = "camelCase")]
    UserAction { action: String, data: Value },

    #[serde(rename_all = "camelCase")]
    ComponentReady {
        component_name: String,
        message_id: String,
    },
}
