//! Sequential event processor: the ordering guarantee of the pipeline.
//!
//! Incoming server events may race, and applying one event can require
//! awaiting an external resolution. A naive map-to-concurrent-futures
//! design would interleave state mutations across those suspension points;
//! instead events land in a FIFO queue and a single drain loop awaits each
//! event's full processing before touching the next. Kicking the drain
//! while it already runs is a no-op — the running loop re-checks the queue
//! length, so newly queued items are picked up.

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use chatstream_protocol::ChatId;
use chatstream_protocol::new_component_id;
use chatstream_protocol::protocol::ComponentSpec;
use chatstream_protocol::protocol::ServerEvent;
use chatstream_protocol::protocol::TemplateMode;
use chatstream_protocol::protocol::TurnMessage;
use chatstream_protocol::protocol::WorkflowState;
use serde_json::Value;
use serde_json::json;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::ChatStreamConfig;
use crate::Result;
use crate::active_response::ActiveResponseTracker;
use crate::active_response::ChangedField;
use crate::component_loader::ComponentHandle;
use crate::component_loader::ComponentResolver;
use crate::component_loader::resolve_with_timeout;
use crate::data_store::ComponentDataStore;
use crate::data_store::slot_key;
use crate::history::ComponentEntry;
use crate::history::HistoryManager;
use crate::history::StreamingState;
use crate::session::AnimationDriver;
use crate::session::ClientUpdate;

/// Node ids with this prefix target the layout template, not a turn.
const TEMPLATE_NODE_PREFIX: &str = "template";

#[derive(Default)]
struct QueueState {
    pending: VecDeque<ServerEvent>,
    /// Ids whose events were fully processed; duplicates are dropped.
    processed: HashSet<String>,
    /// Ids currently sitting in `pending`.
    queued: HashSet<String>,
}

pub struct EventProcessor {
    state: Mutex<QueueState>,
    draining: AtomicBool,
    router: EventRouter,
}

impl EventProcessor {
    pub fn new(router: EventRouter) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            draining: AtomicBool::new(false),
            router,
        }
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue a batch (deduplicating by id against both the processed set
    /// and the currently queued set) and drain.
    pub async fn submit<I>(&self, events: I)
    where
        I: IntoIterator<Item = ServerEvent>,
    {
        {
            let mut state = self.lock();
            for event in events {
                if let Some(id) = event.idempotency_key() {
                    if state.processed.contains(id) {
                        debug!(id, %event, "dropping already-processed event");
                        continue;
                    }
                    if !state.queued.insert(id.to_string()) {
                        debug!(id, %event, "dropping already-queued event");
                        continue;
                    }
                }
                state.pending.push_back(event);
            }
        }
        self.drain().await;
    }

    async fn drain(&self) {
        loop {
            if self.draining.swap(true, Ordering::AcqRel) {
                // A drain is already running; it will observe our items.
                return;
            }
            loop {
                let next = {
                    let mut state = self.lock();
                    let event = state.pending.pop_front();
                    if let Some(id) = event.as_ref().and_then(ServerEvent::idempotency_key) {
                        let id = id.to_string();
                        state.queued.remove(&id);
                        if state.processed.contains(&id) {
                            // Enqueue-side dedup and this check straddle an
                            // await; the processed set wins.
                            debug!(%id, "skipping event processed while queued");
                            continue;
                        }
                    }
                    event
                };
                let Some(event) = next else { break };
                let key = event.idempotency_key().map(str::to_string);
                if let Err(e) = self.router.route(event).await {
                    // One bad event must not stall the rest of the turn.
                    error!(error = %e, "event processing failed");
                }
                if let Some(id) = key {
                    self.lock().processed.insert(id);
                }
            }
            self.draining.store(false, Ordering::Release);
            // Items enqueued between the final pop and the flag reset would
            // otherwise strand until the next submit.
            if self.lock().pending.is_empty() {
                return;
            }
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveTemplate {
    name: String,
    #[allow(dead_code)]
    handle: ComponentHandle,
}

/// Templates selected by the workflow, as a stack so `stack` mode can
/// layer and later modes can unwind.
#[derive(Default)]
struct TemplateStack {
    stack: Vec<ActiveTemplate>,
}

impl TemplateStack {
    fn active_name(&self) -> Option<&str> {
        self.stack.last().map(|t| t.name.as_str())
    }

    fn apply(&mut self, mode: TemplateMode, template: ActiveTemplate) {
        match mode {
            TemplateMode::Switch => {
                self.stack.pop();
                self.stack.push(template);
            }
            TemplateMode::Stack => self.stack.push(template),
            TemplateMode::Replace => {
                self.stack.clear();
                self.stack.push(template);
            }
        }
    }
}

/// Applies each event's effect against the history log, the active
/// response projection and the component data store. Invoked only from the
/// processor's drain loop, one event at a time.
pub struct EventRouter {
    config: ChatStreamConfig,
    history: Arc<HistoryManager>,
    data_store: Arc<ComponentDataStore>,
    resolver: Arc<dyn ComponentResolver>,
    tracker: Arc<Mutex<ActiveResponseTracker>>,
    /// `chat_id -> response_id`, the correlation component-attachment
    /// events rely on.
    chat_map: Mutex<HashMap<ChatId, String>>,
    templates: Mutex<TemplateStack>,
    updates: async_channel::Sender<ClientUpdate>,
    animation: AnimationDriver,
}

impl EventRouter {
    pub fn new(
        config: ChatStreamConfig,
        history: Arc<HistoryManager>,
        data_store: Arc<ComponentDataStore>,
        resolver: Arc<dyn ComponentResolver>,
        tracker: Arc<Mutex<ActiveResponseTracker>>,
        updates: async_channel::Sender<ClientUpdate>,
        animation: AnimationDriver,
    ) -> Self {
        Self {
            config,
            history,
            data_store,
            resolver,
            tracker,
            chat_map: Mutex::new(HashMap::new()),
            templates: Mutex::new(TemplateStack::default()),
            updates,
            animation,
        }
    }

    pub fn history(&self) -> &Arc<HistoryManager> {
        &self.history
    }

    fn publish(&self, update: ClientUpdate) {
        if self.updates.try_send(update).is_err() {
            debug!("update receiver closed; dropping client update");
        }
    }

    fn lock_tracker(&self) -> MutexGuard<'_, ActiveResponseTracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mapped_response(&self, chat_id: &ChatId) -> Option<String> {
        self.chat_map
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(chat_id)
            .cloned()
    }

    pub async fn route(&self, event: ServerEvent) -> Result<()> {
        match event {
            ServerEvent::SessionReady => {
                self.publish(ClientUpdate::SessionReady);
                Ok(())
            }
            ServerEvent::WorkflowState {
                state,
                chat_id,
                workflow_id,
                metadata,
                ..
            } => {
                self.handle_workflow_state(state, chat_id, workflow_id, metadata)
                    .await
            }
            ServerEvent::ComponentInit {
                chat_id,
                node_id,
                component,
                ..
            } => self.handle_component_init(chat_id, node_id, component).await,
            ServerEvent::ComponentData {
                chat_id,
                node_id,
                data,
                ..
            } => {
                let slot = slot_key(&chat_id, &node_id);
                self.data_store.update_slot(&slot, data);
                self.publish(ClientUpdate::ComponentDataUpdated { slot });
                Ok(())
            }
            ServerEvent::ComponentRemove {
                chat_id, node_id, ..
            } => {
                let slot = slot_key(&chat_id, &node_id);
                self.data_store.remove_slot(&slot);
                self.publish(ClientUpdate::ComponentRemoved { slot });
                Ok(())
            }
        }
    }

    async fn handle_workflow_state(
        &self,
        state: Option<WorkflowState>,
        chat_id: ChatId,
        workflow_id: String,
        metadata: Option<chatstream_protocol::protocol::WorkflowMetadata>,
    ) -> Result<()> {
        match state {
            Some(WorkflowState::WorkflowStarted) => {
                if let Some(meta) = &metadata {
                    if let Some(template) = &meta.template {
                        self.maybe_switch_template(
                            template,
                            meta.template_mode.unwrap_or_default(),
                        )
                        .await;
                    }
                }
                if let Some(response_id) = self.mapped_response(&chat_id) {
                    // Idempotent restart: the turn already exists, flip it
                    // back to streaming.
                    self.history
                        .set_streaming_state(&response_id, StreamingState::Streaming);
                    let mut tracker = self.lock_tracker();
                    if !tracker.is_active() {
                        let user_id = self.history.session_meta().user_id;
                        tracker.start(chat_id, user_id, Some(workflow_id));
                    }
                    return Ok(());
                }
                let response = self.history.add_response(chat_id.clone(), None, Vec::new());
                self.chat_map
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(chat_id.clone(), response.id.clone());
                {
                    let mut tracker = self.lock_tracker();
                    let user_id = self.history.session_meta().user_id;
                    tracker.start(chat_id, user_id, Some(workflow_id));
                }
                self.publish(ClientUpdate::ResponseStarted { response });
                Ok(())
            }
            Some(WorkflowState::WorkflowCompleted) => {
                let Some(response_id) = self.mapped_response(&chat_id) else {
                    warn!(%chat_id, "workflow completed for unknown chat");
                    return Ok(());
                };
                let missing_chunks = self.lock_tracker().complete(&chat_id);
                let response = self
                    .history
                    .set_streaming_state(&response_id, StreamingState::Complete);
                if let Some(response) = response {
                    self.publish(ClientUpdate::ResponseCompleted {
                        response,
                        missing_chunks,
                    });
                }
                Ok(())
            }
            Some(WorkflowState::WorkflowError) | Some(WorkflowState::Error) => {
                if let Some(response_id) = self.mapped_response(&chat_id) {
                    self.history
                        .set_streaming_state(&response_id, StreamingState::Complete);
                }
                self.publish(ClientUpdate::WorkflowFailed { chat_id });
                Ok(())
            }
            Some(state) => {
                self.publish(ClientUpdate::WorkflowPhase { chat_id, state });
                Ok(())
            }
            None => {
                debug!(%chat_id, "workflow event with no state");
                Ok(())
            }
        }
    }

    /// Resolve and adopt a template when it differs from the active one.
    /// Templates are named, not addressed; the name doubles as locator.
    async fn maybe_switch_template(&self, name: &str, mode: TemplateMode) {
        let unchanged = {
            let templates = self.templates.lock().unwrap_or_else(|e| e.into_inner());
            templates.active_name() == Some(name)
        };
        if unchanged {
            return;
        }
        match resolve_with_timeout(
            self.resolver.as_ref(),
            name,
            name,
            self.config.resolver_timeout,
        )
        .await
        {
            Ok(handle) => {
                self.templates
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .apply(
                        mode,
                        ActiveTemplate {
                            name: name.to_string(),
                            handle,
                        },
                    );
                self.publish(ClientUpdate::TemplateChanged {
                    name: name.to_string(),
                });
            }
            Err(e) => {
                error!(template = name, error = %e, "template resolution failed");
            }
        }
    }

    async fn handle_component_init(
        &self,
        chat_id: Option<ChatId>,
        node_id: String,
        component: ComponentSpec,
    ) -> Result<()> {
        if node_id.starts_with(TEMPLATE_NODE_PREFIX) {
            match resolve_with_timeout(
                self.resolver.as_ref(),
                &component.component_url,
                &component.component_type,
                self.config.resolver_timeout,
            )
            .await
            {
                Ok(handle) => {
                    self.templates
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .apply(
                            TemplateMode::Switch,
                            ActiveTemplate {
                                name: component.component_type.clone(),
                                handle,
                            },
                        );
                    self.publish(ClientUpdate::TemplateChanged {
                        name: component.component_type,
                    });
                }
                Err(e) => {
                    error!(
                        component = component.component_type,
                        error = %e,
                        "template component resolution failed"
                    );
                }
            }
            return Ok(());
        }

        let Some(chat_id) = chat_id else {
            return Err(crate::ChatStreamErr::MissingChatId { node_id });
        };

        let handle = match resolve_with_timeout(
            self.resolver.as_ref(),
            &component.component_url,
            &component.component_type,
            self.config.resolver_timeout,
        )
        .await
        {
            Ok(handle) => handle,
            Err(e) => {
                // No partial attachment: the event's whole effect is
                // abandoned and the queue continues.
                error!(
                    component = component.component_type,
                    error = %e,
                    "component resolution failed"
                );
                return Ok(());
            }
        };

        let props = component.props.clone().unwrap_or_else(|| json!({}));
        let entry = ComponentEntry {
            id: new_component_id(),
            component_type: component.component_type.clone(),
            component_url: component.component_url.clone(),
            node_id: node_id.clone(),
            chat_id: chat_id.clone(),
            props: props.clone(),
            metadata: component.metadata.clone().unwrap_or_else(|| json!({})),
            handle: Some(handle),
        };

        let Some(response_id) = self.mapped_response(&chat_id) else {
            warn!(%chat_id, node_id, "component init for chat with no mapped response");
            return Ok(());
        };
        if self.history.add_component_to_response(&response_id, entry.clone()) != Some(true) {
            return Ok(());
        }

        if !matches!(props, Value::Object(ref m) if m.is_empty()) {
            self.data_store.set_slot(&slot_key(&chat_id, &node_id), props);
        }
        if component.is_focusable() {
            self.publish(ClientUpdate::FocusRequested { chat_id, node_id });
        }
        self.publish(ClientUpdate::ComponentAttached { response_id, entry });
        Ok(())
    }

    /// Fold one streamed turn message into the live projection and surface
    /// the change. Chunk arrivals kick the pacing task.
    pub fn handle_turn_message(&self, message: TurnMessage) {
        let (changed, snapshot) = {
            let mut tracker = self.lock_tracker();
            let changed = tracker.apply(message);
            (changed, tracker.snapshot())
        };
        if changed.is_empty() {
            return;
        }
        if let Some(snapshot) = snapshot {
            let animate = changed.contains(&ChangedField::MessageChunks);
            self.publish(ClientUpdate::ActiveResponseChanged { snapshot, changed });
            if animate {
                self.animation.kick();
            }
        }
    }

    /// UI dismissed the active turn: full reset plus handler teardown.
    pub fn clear_active_response(&self) {
        self.lock_tracker().clear();
        self.publish(ClientUpdate::ActiveResponseCleared);
    }

    /// Session teardown: history, projection, handlers, data slots.
    pub fn clear_session(&self) {
        self.history.clear();
        self.lock_tracker().clear_all();
        self.data_store.clear();
        self.chat_map
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chatstream_protocol::ConversationId;
    use chatstream_protocol::protocol::Chunk;
    use pretty_assertions::assert_eq;
    use tokio::time::Instant;

    use super::*;
    use crate::active_response::ActiveResponseTracker;

    struct InstantResolver;

    #[async_trait]
    impl ComponentResolver for InstantResolver {
        async fn resolve(&self, url: &str, name: &str) -> Result<ComponentHandle> {
            Ok(ComponentHandle::new(name, url))
        }
    }

    struct SleepyResolver(Duration);

    #[async_trait]
    impl ComponentResolver for SleepyResolver {
        async fn resolve(&self, url: &str, name: &str) -> Result<ComponentHandle> {
            tokio::time::sleep(self.0).await;
            Ok(ComponentHandle::new(name, url))
        }
    }

    struct Fixture {
        processor: EventProcessor,
        updates: async_channel::Receiver<ClientUpdate>,
        history: Arc<HistoryManager>,
        data_store: Arc<ComponentDataStore>,
        tracker: Arc<Mutex<ActiveResponseTracker>>,
    }

    fn fixture(resolver: Arc<dyn ComponentResolver>) -> Fixture {
        let config = ChatStreamConfig::default();
        let (tx_update, updates) = async_channel::unbounded();
        let conversation_id = ConversationId::new();
        let history = Arc::new(HistoryManager::new());
        history.init(conversation_id.clone(), Some("u1".to_string()), None);
        let data_store = Arc::new(ComponentDataStore::new());
        let tracker = Arc::new(Mutex::new(ActiveResponseTracker::new(conversation_id)));
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
            tx_update,
            animation,
        );
        Fixture {
            processor: EventProcessor::new(router),
            updates,
            history,
            data_store,
            tracker,
        }
    }

    fn drained(updates: &async_channel::Receiver<ClientUpdate>) -> Vec<ClientUpdate> {
        let mut out = Vec::new();
        while let Ok(update) = updates.try_recv() {
            out.push(update);
        }
        out
    }

    fn started(id: &str, chat: &str) -> ServerEvent {
        ServerEvent::WorkflowState {
            id: Some(id.to_string()),
            state: Some(WorkflowState::WorkflowStarted),
            chat_id: ChatId::from(chat),
            workflow_id: "wf1".to_string(),
            workflow_run_id: "run1".to_string(),
            metadata: None,
        }
    }

    fn completed(id: &str, chat: &str) -> ServerEvent {
        ServerEvent::WorkflowState {
            id: Some(id.to_string()),
            state: Some(WorkflowState::WorkflowCompleted),
            chat_id: ChatId::from(chat),
            workflow_id: "wf1".to_string(),
            workflow_run_id: "run1".to_string(),
            metadata: None,
        }
    }

    fn init(id: &str, chat: Option<&str>, node: &str, props: Option<Value>) -> ServerEvent {
        ServerEvent::ComponentInit {
            id: Some(id.to_string()),
            chat_id: chat.map(ChatId::from),
            node_id: node.to_string(),
            component: ComponentSpec {
                component_type: "Card".to_string(),
                component_url: "/card.js".to_string(),
                props,
                metadata: None,
            },
        }
    }

    #[tokio::test]
    async fn duplicate_event_ids_process_once() {
        let f = fixture(Arc::new(InstantResolver));
        f.processor.submit([started("e1", "c1")]).await;
        f.processor.submit([started("e1", "c1")]).await;
        assert_eq!(f.history.responses().len(), 1);
        let starts = drained(&f.updates)
            .into_iter()
            .filter(|u| matches!(u, ClientUpdate::ResponseStarted { .. }))
            .count();
        assert_eq!(starts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn events_drain_sequentially_despite_slow_resolution() {
        let f = fixture(Arc::new(SleepyResolver(Duration::from_millis(100))));
        let t0 = Instant::now();
        f.processor
            .submit([
                started("e1", "c1"),
                init("e2", Some("c1"), "nodeA", None),
                init("e3", Some("c1"), "nodeB", None),
            ])
            .await;
        // Each resolution is awaited before the next event starts.
        assert!(t0.elapsed() >= Duration::from_millis(200));
        let response = f.history.responses().remove(0);
        let nodes: Vec<&str> = response.components.iter().map(|c| c.node_id.as_str()).collect();
        assert_eq!(nodes, vec!["nodeA", "nodeB"]);
    }

    #[tokio::test]
    async fn missing_chat_id_does_not_stall_the_queue() {
        let f = fixture(Arc::new(InstantResolver));
        f.processor
            .submit([
                started("e1", "c1"),
                ServerEvent::ComponentInit {
                    id: Some("e2".to_string()),
                    chat_id: None,
                    node_id: "nodeA".to_string(),
                    component: ComponentSpec {
                        component_type: "Card".to_string(),
                        ..Default::default()
                    },
                },
                init("e3", Some("c1"), "nodeB", None),
            ])
            .await;
        let response = f.history.responses().remove(0);
        assert_eq!(response.components.len(), 1);
        assert_eq!(response.components[0].node_id, "nodeB");
    }

    #[tokio::test]
    async fn replayed_component_init_attaches_once() {
        let f = fixture(Arc::new(InstantResolver));
        f.processor
            .submit([
                started("e1", "c1"),
                init("e2", Some("c1"), "nodeA", None),
                init("e3", Some("c1"), "nodeA", None),
            ])
            .await;
        assert_eq!(f.history.responses().remove(0).components.len(), 1);
    }

    #[tokio::test]
    async fn completion_marks_complete_and_reports_chunk_gaps() {
        let f = fixture(Arc::new(InstantResolver));
        f.processor.submit([started("e1", "c1")]).await;
        for index in [0, 2] {
            f.processor.router().handle_turn_message(TurnMessage::MessageChunk {
                chunk: Chunk {
                    index,
                    text: format!("part {index}"),
                },
            });
        }
        f.processor.submit([completed("e2", "c1")]).await;
        let response = f.history.responses().remove(0);
        assert_eq!(response.streaming_state, StreamingState::Complete);
        let missing = drained(&f.updates)
            .into_iter()
            .find_map(|u| match u {
                ClientUpdate::ResponseCompleted { missing_chunks, .. } => Some(missing_chunks),
                _ => None,
            })
            .expect("completion update");
        assert_eq!(missing, vec![1]);
    }

    #[tokio::test]
    async fn completing_one_chat_does_not_finalize_another() {
        let f = fixture(Arc::new(InstantResolver));
        f.processor
            .submit([started("e1", "c1"), started("e2", "c2"), completed("e3", "c1")])
            .await;

        let by_chat = |chat: &str| {
            f.history
                .response_by_chat_id(&ChatId::from(chat))
                .expect("response")
        };
        assert_eq!(by_chat("c1").streaming_state, StreamingState::Complete);
        assert_eq!(by_chat("c2").streaming_state, StreamingState::Streaming);

        // The live projection belongs to c2 and must stay open.
        let live = f
            .tracker
            .lock()
            .expect("tracker")
            .snapshot()
            .expect("active");
        assert_eq!(live.chat_id, ChatId::from("c2"));
        assert!(live.ended_at.is_none());
    }

    #[tokio::test]
    async fn restart_after_completion_reuses_the_response() {
        let f = fixture(Arc::new(InstantResolver));
        f.processor
            .submit([started("e1", "c1"), completed("e2", "c1"), started("e3", "c1")])
            .await;
        let responses = f.history.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].streaming_state, StreamingState::Streaming);
        assert!(f.tracker.lock().expect("tracker").is_active());
    }

    #[tokio::test]
    async fn template_node_switches_the_active_template() {
        let f = fixture(Arc::new(InstantResolver));
        f.processor
            .submit([ServerEvent::ComponentInit {
                id: Some("e1".to_string()),
                chat_id: None,
                node_id: "template-root".to_string(),
                component: ComponentSpec {
                    component_type: "Dashboard".to_string(),
                    component_url: "/dash.js".to_string(),
                    ..Default::default()
                },
            }])
            .await;
        let changed = drained(&f.updates).into_iter().find_map(|u| match u {
            ClientUpdate::TemplateChanged { name } => Some(name),
            _ => None,
        });
        assert_eq!(changed.as_deref(), Some("Dashboard"));
    }

    #[tokio::test]
    async fn workflow_metadata_template_resolves_once() {
        let f = fixture(Arc::new(InstantResolver));
        let with_template = |id: &str| ServerEvent::WorkflowState {
            id: Some(id.to_string()),
            state: Some(WorkflowState::WorkflowStarted),
            chat_id: ChatId::from("c1"),
            workflow_id: "wf1".to_string(),
            workflow_run_id: "run1".to_string(),
            metadata: Some(chatstream_protocol::protocol::WorkflowMetadata {
                template: Some("Dashboard".to_string()),
                ..Default::default()
            }),
        };
        f.processor.submit([with_template("e1")]).await;
        f.processor.submit([with_template("e2")]).await;
        let switches = drained(&f.updates)
            .into_iter()
            .filter(|u| matches!(u, ClientUpdate::TemplateChanged { .. }))
            .count();
        assert_eq!(switches, 1);
    }

    #[tokio::test]
    async fn component_data_merges_into_the_slot() {
        let f = fixture(Arc::new(InstantResolver));
        f.processor
            .submit([
                started("e1", "c1"),
                init("e2", Some("c1"), "nodeA", Some(json!({"a": 1}))),
                ServerEvent::ComponentData {
                    id: Some("e3".to_string()),
                    chat_id: ChatId::from("c1"),
                    node_id: "nodeA".to_string(),
                    data: json!({"b": 2}),
                },
            ])
            .await;
        let slot = slot_key(&ChatId::from("c1"), "nodeA");
        assert_eq!(f.data_store.get_slot(&slot), Some(json!({"a": 1, "b": 2})));
        f.processor
            .submit([ServerEvent::ComponentRemove {
                id: Some("e4".to_string()),
                chat_id: ChatId::from("c1"),
                node_id: "nodeA".to_string(),
                component: ComponentSpec::default(),
            }])
            .await;
        assert_eq!(f.data_store.get_slot(&slot), None);
    }

    #[tokio::test]
    async fn focusable_component_requests_focus() {
        let f = fixture(Arc::new(InstantResolver));
        f.processor
            .submit([
                started("e1", "c1"),
                ServerEvent::ComponentInit {
                    id: Some("e2".to_string()),
                    chat_id: Some(ChatId::from("c1")),
                    node_id: "nodeA".to_string(),
                    component: ComponentSpec {
                        component_type: "Form".to_string(),
                        component_url: "/form.js".to_string(),
                        metadata: Some(json!({"focusable": true})),
                        ..Default::default()
                    },
                },
            ])
            .await;
        let focused = drained(&f.updates).into_iter().any(|u| {
            matches!(
                u,
                ClientUpdate::FocusRequested { ref node_id, .. } if node_id == "nodeA"
            )
        });
        assert!(focused);
    }
}
