//! Core of the chatstream client SDK: an ordered event-processing pipeline
//! that reconstructs conversation state from an unordered, asynchronous
//! stream of server events.
//!
//! The pieces, leaves first:
//!
//! - [`chunk_animator::ChunkAnimator`] reassembles out-of-order text chunks
//!   and paces their reveal.
//! - [`cards::CardsHandler`] accumulates card payloads with id dedup and
//!   stable index ordering.
//! - [`history::HistoryManager`] is the append-only, subscribable log of
//!   conversation turns.
//! - [`event_queue::EventProcessor`] drains incoming events one at a time,
//!   awaiting each event's async work, so state mutations never interleave.
//! - [`active_response::ActiveResponse`] folds per-turn streamed messages
//!   into a live projection for the rendering layer.
//! - [`session::ChatClient`] ties it together behind a submission/update
//!   queue pair.

pub mod active_response;
pub mod cards;
pub mod chunk_animator;
pub mod component_loader;
pub mod config;
pub mod data_store;
pub mod error;
pub mod event_queue;
pub mod history;
pub mod registry;
pub mod session;

pub use config::ChatStreamConfig;
pub use error::ChatStreamErr;
pub use error::Result;
pub use session::ChatClient;
pub use session::ChatClientSpawnOk;
