//! Wire types for a chatstream session between a client and a server.
//!
//! The server pushes a typed event stream (workflow lifecycle, component
//! directives, session signals); per-turn message payloads carry streamed
//! text chunks, cards and other structured data. Everything here is pure
//! data: serde-serializable, no behavior beyond parsing helpers.

mod id;
pub mod protocol;

pub use id::ChatId;
pub use id::ConversationId;
pub use id::new_component_id;
pub use id::new_turn_id;
