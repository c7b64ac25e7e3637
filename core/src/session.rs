//! Session lifecycle and the public client surface.
//!
//! [`ChatClient`] operates as a queue pair: callers send [`Op`]s in and
//! receive [`ClientUpdate`]s out. A single spawned task consumes the
//! submission queue, so every mutation of session state happens on one
//! logical thread and updates come out in a deterministic order.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_channel::Receiver;
use async_channel::Sender;
use chatstream_protocol::ChatId;
use chatstream_protocol::ConversationId;
use chatstream_protocol::protocol::Chunk;
use chatstream_protocol::protocol::OutboundCommand;
use chatstream_protocol::protocol::ServerEvent;
use chatstream_protocol::protocol::TurnMessage;
use chatstream_protocol::protocol::WorkflowState;
use serde_json::Value;
use tracing::debug;
use tracing::info;

use crate::ChatStreamConfig;
use crate::ChatStreamErr;
use crate::Result;
use crate::active_response::ActiveResponse;
use crate::active_response::ActiveResponseTracker;
use crate::active_response::ChangedField;
use crate::component_loader::ComponentResolver;
use crate::data_store::ComponentDataStore;
use crate::event_queue::EventProcessor;
use crate::event_queue::EventRouter;
use crate::history::AssistantResponse;
use crate::history::ComponentEntry;
use crate::history::HistoryManager;
use crate::history::UserMessage;

/// Submissions accepted by the session task.
#[derive(Debug, Clone)]
pub enum Op {
    /// A batch of transport events, in arrival order.
    ServerEvents(Vec<ServerEvent>),
    /// One streamed message for the in-flight turn.
    TurnMessage(TurnMessage),
    /// Record a user message in the log.
    UserMessage {
        content: String,
        chat_id: Option<ChatId>,
        metadata: Option<Value>,
    },
    /// The UI dismissed the active turn.
    ClearActiveResponse,
    /// Wipe the session: log, projection, handlers and data slots.
    ClearSession,
    Shutdown,
}

/// Updates surfaced to the embedding application.
#[derive(Debug, Clone)]
pub enum ClientUpdate {
    SessionReady,
    UserMessageAdded {
        message: UserMessage,
    },
    ResponseStarted {
        response: AssistantResponse,
    },
    ResponseCompleted {
        response: AssistantResponse,
        /// Chunk indices never received; empty for a clean turn.
        missing_chunks: Vec<u32>,
    },
    WorkflowPhase {
        chat_id: ChatId,
        state: WorkflowState,
    },
    WorkflowFailed {
        chat_id: ChatId,
    },
    ComponentAttached {
        response_id: String,
        entry: ComponentEntry,
    },
    ComponentDataUpdated {
        slot: String,
    },
    ComponentRemoved {
        slot: String,
    },
    TemplateChanged {
        name: String,
    },
    FocusRequested {
        chat_id: ChatId,
        node_id: String,
    },
    /// One chunk revealed by the pacing loop.
    ChunkCommitted {
        chunk: Chunk,
    },
    ActiveResponseChanged {
        snapshot: ActiveResponse,
        changed: Vec<ChangedField>,
    },
    ActiveResponseCleared,
    SessionCleared,
    ShutdownComplete,
}

pub(crate) const SUBMISSION_CHANNEL_CAPACITY: usize = 64;

/// Paces chunk reveals: one committed chunk per tick, stopping when the
/// animator has nothing contiguous left. `kick` is idempotent while a
/// pacing loop is running.
#[derive(Clone)]
pub struct AnimationDriver {
    tracker: Arc<Mutex<ActiveResponseTracker>>,
    updates: Sender<ClientUpdate>,
    running: Arc<AtomicBool>,
    tick: Duration,
}

impl AnimationDriver {
    pub fn new(
        tracker: Arc<Mutex<ActiveResponseTracker>>,
        updates: Sender<ClientUpdate>,
        tick: Duration,
    ) -> Self {
        Self {
            tracker,
            updates,
            running: Arc::new(AtomicBool::new(false)),
            tick,
        }
    }

    pub fn kick(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let driver = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(driver.tick).await;
                let committed = driver
                    .tracker
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .commit_next_chunk();
                let Some(chunk) = committed else {
                    driver.running.store(false, Ordering::Release);
                    // A chunk may have landed between the empty commit and
                    // the flag reset; restart rather than strand it.
                    let idle = driver
                        .tracker
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .animation_idle();
                    if !idle {
                        driver.kick();
                    }
                    return;
                };
                if driver
                    .updates
                    .try_send(ClientUpdate::ChunkCommitted { chunk })
                    .is_err()
                {
                    driver.running.store(false, Ordering::Release);
                    return;
                }
            }
        });
    }
}

/// The high-level interface to a conversation session. Send [`Op`]s,
/// receive [`ClientUpdate`]s, and read the shared state handles directly.
pub struct ChatClient {
    tx_sub: Sender<Op>,
    rx_update: Receiver<ClientUpdate>,
    tx_cmd: Sender<OutboundCommand>,
    conversation_id: ConversationId,
    history: Arc<HistoryManager>,
    data_store: Arc<ComponentDataStore>,
    tracker: Arc<Mutex<ActiveResponseTracker>>,
}

/// Wrapper returned by [`ChatClient::spawn`]: the client itself plus the
/// receiving end of the outbound command stream, which the embedding
/// transport forwards to the server.
pub struct ChatClientSpawnOk {
    pub client: ChatClient,
    pub commands: Receiver<OutboundCommand>,
    pub conversation_id: ConversationId,
}

impl ChatClient {
    pub fn spawn(
        config: ChatStreamConfig,
        resolver: Arc<dyn ComponentResolver>,
        user_id: Option<String>,
    ) -> ChatClientSpawnOk {
        let (tx_sub, rx_sub) = async_channel::bounded(SUBMISSION_CHANNEL_CAPACITY);
        let (tx_update, rx_update) = async_channel::unbounded();
        let (tx_cmd, rx_cmd) = async_channel::unbounded();

        let conversation_id = ConversationId::new();
        let history = Arc::new(HistoryManager::new());
        history.init(conversation_id.clone(), user_id, None);
        let data_store = Arc::new(ComponentDataStore::new());
        let tracker = Arc::new(Mutex::new(ActiveResponseTracker::new(
            conversation_id.clone(),
        )));

        let animation = AnimationDriver::new(
            Arc::clone(&tracker),
            tx_update.clone(),
            config.animation_tick,
        );
        let router = EventRouter::new(
            config,
            Arc::clone(&history),
            Arc::clone(&data_store),
            resolver,
            Arc::clone(&tracker),
            tx_update.clone(),
            animation,
        );
        let processor = EventProcessor::new(router);

        info!(%conversation_id, "chat session started");
        // Runs until Op::Shutdown or the submission channel closes.
        tokio::spawn(submission_loop(processor, rx_sub, tx_update));

        ChatClientSpawnOk {
            client: ChatClient {
                tx_sub,
                rx_update,
                tx_cmd,
                conversation_id: conversation_id.clone(),
                history,
                data_store,
                tracker,
            },
            commands: rx_cmd,
            conversation_id,
        }
    }

    pub async fn submit(&self, op: Op) -> Result<()> {
        self.tx_sub
            .send(op)
            .await
            .map_err(|_| ChatStreamErr::SessionClosed)
    }

    /// Convenience for a single transport event.
    pub async fn submit_event(&self, event: ServerEvent) -> Result<()> {
        self.submit(Op::ServerEvents(vec![event])).await
    }

    pub async fn next_update(&self) -> Result<ClientUpdate> {
        self.rx_update
            .recv()
            .await
            .map_err(|_| ChatStreamErr::SessionClosed)
    }

    /// Forward a user-initiated component action to the server.
    pub async fn send_user_action(&self, action: &str, data: Value) -> Result<()> {
        self.tx_cmd
            .send(OutboundCommand::UserAction {
                action: action.to_string(),
                data,
            })
            .await
            .map_err(|_| ChatStreamErr::SessionClosed)
    }

    /// Acknowledge that a component finished mounting.
    pub async fn send_component_ready(&self, component_name: &str, message_id: &str) -> Result<()> {
        self.tx_cmd
            .send(OutboundCommand::ComponentReady {
                component_name: component_name.to_string(),
                message_id: message_id.to_string(),
            })
            .await
            .map_err(|_| ChatStreamErr::SessionClosed)
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn history(&self) -> &Arc<HistoryManager> {
        &self.history
    }

    pub fn data_store(&self) -> &Arc<ComponentDataStore> {
        &self.data_store
    }

    pub fn active_response(&self) -> Option<ActiveResponse> {
        self.tracker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot()
    }
}

async fn submission_loop(
    processor: EventProcessor,
    rx_sub: Receiver<Op>,
    tx_update: Sender<ClientUpdate>,
) {
    // To break out of this loop, send Op::Shutdown.
    while let Ok(op) = rx_sub.recv().await {
        debug!(?op, "submission");
        match op {
            Op::ServerEvents(events) => processor.submit(events).await,
            Op::TurnMessage(message) => processor.router().handle_turn_message(message),
            Op::UserMessage {
                content,
                chat_id,
                metadata,
            } => {
                let message = processor
                    .router()
                    .history()
                    .add_user_message(&content, chat_id, metadata);
                if tx_update
                    .try_send(ClientUpdate::UserMessageAdded { message })
                    .is_err()
                {
                    debug!("update receiver closed; dropping user message update");
                }
            }
            Op::ClearActiveResponse => processor.router().clear_active_response(),
            Op::ClearSession => {
                processor.router().clear_session();
                if tx_update.try_send(ClientUpdate::SessionCleared).is_err() {
                    debug!("update receiver closed; dropping session cleared update");
                }
            }
            Op::Shutdown => {
                info!("session shutting down");
                // Close before announcing so a submit racing the shutdown
                // fails rather than landing in a queue nobody drains.
                rx_sub.close();
                let _ = tx_update.try_send(ClientUpdate::ShutdownComplete);
                break;
            }
        }
    }
    debug!("submission loop exited");
}
