use std::fmt::Display;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Identifies one client/server session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationId {
    uuid: Uuid,
}

impl ConversationId {
    pub fn new() -> Self {
        Self { uuid: Uuid::new_v4() }
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self {
            uuid: Uuid::parse_str(s)?,
        })
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

impl Serialize for ConversationId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(&self.uuid)
    }
}

impl<'de> Deserialize<'de> for ConversationId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        let uuid = Uuid::parse_str(&value).map_err(serde::de::Error::custom)?;
        Ok(Self { uuid })
    }
}

/// Correlates a user message with its matching assistant response. Unlike
/// [`ConversationId`] the server mints these, so arbitrary strings must
/// round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn new() -> Self {
        Self(format!("chat_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChatId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChatId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Id for one entry in the conversation log.
pub fn new_turn_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Id for one component entry attached to a response.
pub fn new_component_id() -> String {
    format!("comp_{}", Uuid::new_v4().simple())
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_default_is_not_nil() {
        let id = ConversationId::default();
        assert_ne!(id.to_string(), Uuid::nil().to_string());
    }

    #[test]
    fn chat_id_round_trips_arbitrary_strings() {
        let id: ChatId = serde_json::from_str("\"c1\"").expect("deserialize");
        assert_eq!(id, ChatId::from("c1"));
        assert_eq!(serde_json::to_string(&id).expect("serialize"), "\"c1\"");
    }

    #[test]
    fn turn_ids_are_prefixed_and_distinct() {
        let a = new_turn_id("msg");
        let b = new_turn_id("msg");
        assert!(a.starts_with("msg_"));
        assert_ne!(a, b);
    }
}
