use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatStreamErr>;

#[derive(Error, Debug)]
pub enum ChatStreamErr {
    /// The event-processing task stopped and the channel pair is closed.
    #[error("chatstream session is closed")]
    SessionClosed,

    /// A component or template could not be resolved.
    #[error("failed to resolve component `{name}` from `{url}`: {message}")]
    ComponentResolution {
        name: String,
        url: String,
        message: String,
    },

    /// Component resolution exceeded the configured budget.
    #[error("timed out resolving component `{name}` after {timeout_ms}ms")]
    ComponentResolutionTimeout { name: String, timeout_ms: u64 },

    /// A `COMPONENT_INIT` arrived without the chat id needed to correlate
    /// it to a response.
    #[error("component init for node `{node_id}` is missing a chat id")]
    MissingChatId { node_id: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
