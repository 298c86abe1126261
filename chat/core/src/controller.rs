//! Request Controller - The Streaming Core
//!
//! The controller owns the conversation and the request lifecycle: start,
//! supersede, abort, completion. It is the only writer of
//! [`ConversationState`]; surfaces read published snapshots and dispatch
//! [`ChatIntent`]s.
//!
//! # Sessions
//!
//! Each send or regenerate starts a [`RequestSession`]. The network work runs
//! in a spawned task that opens the stream, decodes it and forwards
//! [`SessionEvent`]s over a bounded channel. The controller applies an event
//! only if it comes from the active session and that session's token has not
//! been cancelled, so a superseded or aborted session can never write into
//! the transcript even if its transport is still delivering bytes.
//!
//! ```text
//!   send / regenerate                      spawned session task
//!   ─────────────────▶ start_session ──▶  open_stream ─▶ decode_deltas
//!                          │                   │
//!                          │ token             │ SessionEvent (mpsc)
//!                          ▼                   ▼
//!                      RequestSession ◀── poll_streaming / next_update
//!                          │
//!                          ▼ apply (id + token check)
//!                    ConversationState ──▶ watch::Sender<ConversationSnapshot>
//! ```
//!
//! There is no ambient cancellation handle: the token lives in the session
//! value and is cancelled through the controller only.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use crate::backend::ChatBackend;
use crate::config::{ChatConfig, DEFAULT_GREETING, DEFAULT_STOP_MARKER};
use crate::conversation::ConversationState;
use crate::events::ChatIntent;
use crate::messages::{ChatState, ConversationSnapshot, HistoryEntry, MessageId};
use crate::registry::{ModelDescriptor, ModelRegistry, RegistryError};
use crate::streaming::decode_deltas;

/// Events buffered between a session task and the controller
const SESSION_CHANNEL_CAPACITY: usize = 64;

/// Controller errors
///
/// Conflicting requests (send or regenerate while loading) are not errors;
/// those calls return `false` and leave the conversation unchanged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// No message with this id is in the conversation
    #[error("Unknown message: {0}")]
    UnknownMessage(MessageId),

    /// Regeneration targets must be user messages
    #[error("Message {0} is not a user message")]
    NotAUserMessage(MessageId),

    /// Model lookup failed
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The operation is not allowed while a request is in progress
    #[error("A request is in progress")]
    Busy,
}

/// Controller settings taken from configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Greeting the conversation opens with
    pub greeting: String,
    /// Text appended to a response when it is stopped
    pub stop_marker: String,
    /// Model selected at startup
    pub default_model: String,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from(&ChatConfig::default())
    }
}

impl From<&ChatConfig> for ControllerSettings {
    fn from(config: &ChatConfig) -> Self {
        Self {
            greeting: config.greeting.clone(),
            stop_marker: config.stop_marker.clone(),
            default_model: config.default_model.clone(),
        }
    }
}

impl ControllerSettings {
    /// Settings with the built-in greeting and stop marker
    pub fn with_model(default_model: impl Into<String>) -> Self {
        Self {
            greeting: DEFAULT_GREETING.to_string(),
            stop_marker: DEFAULT_STOP_MARKER.to_string(),
            default_model: default_model.into(),
        }
    }
}

/// Request session identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session_{}", self.0)
    }
}

/// What a session task reports to the controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// The provider accepted the request and the body is streaming
    Opened,
    /// Next decoded text fragment
    Delta(String),
    /// The stream ended normally
    Finished,
    /// The request or the stream failed; the text is the failure detail
    Failed(String),
}

impl SessionEvent {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed(_))
    }
}

/// One in-flight streaming call
#[derive(Debug)]
pub struct RequestSession {
    id: SessionId,
    token: CancellationToken,
    /// Assistant message the response streams into, once the stream opened
    target: Option<MessageId>,
    events: mpsc::Receiver<(SessionId, SessionEvent)>,
    response: String,
    delta_count: u32,
    started_at: Instant,
}

impl RequestSession {
    /// Session identifier
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Message the response streams into, if the stream has opened
    pub fn target(&self) -> Option<&MessageId> {
        self.target.as_ref()
    }

    /// Text received so far
    pub fn response(&self) -> &str {
        &self.response
    }

    /// Whether the session has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for RequestSession {
    fn drop(&mut self) {
        // Stops the session task even if the controller itself is dropped
        self.token.cancel();
    }
}

/// The request controller
///
/// `send`, `send_text` and `regenerate` spawn the session task, so they must
/// be called from within a tokio runtime.
pub struct ChatController<B: ChatBackend> {
    /// Provider transport
    backend: Arc<B>,
    /// Model lookup
    registry: ModelRegistry,
    /// Greeting, stop marker, default model
    settings: ControllerSettings,
    /// The conversation, mutated only here
    conversation: ConversationState,
    /// The active session, if any
    session: Option<RequestSession>,
    /// Next session id
    next_session: u64,
    /// Snapshot channel to surfaces
    updates: watch::Sender<ConversationSnapshot>,
}

impl<B: ChatBackend + 'static> ChatController<B> {
    /// Create a controller
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Registry` if the default model is not
    /// registered.
    pub fn new(
        backend: B,
        registry: ModelRegistry,
        settings: ControllerSettings,
    ) -> Result<Self, ControllerError> {
        registry.get(&settings.default_model)?;

        let conversation =
            ConversationState::new(settings.greeting.clone(), settings.default_model.clone());
        let (updates, _) = watch::channel(conversation.snapshot());

        tracing::info!(
            backend = backend.name(),
            model = %settings.default_model,
            models = registry.len(),
            "Chat controller created"
        );

        Ok(Self {
            backend: Arc::new(backend),
            registry,
            settings,
            conversation,
            session: None,
            next_session: 0,
            updates,
        })
    }

    /// Create a controller from configuration, building the registry
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Registry` if the default model is not
    /// registered.
    pub fn from_config(backend: B, config: &ChatConfig) -> Result<Self, ControllerError> {
        Self::new(
            backend,
            ModelRegistry::from_config(config),
            ControllerSettings::from(config),
        )
    }

    /// Read-only view of the conversation
    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    /// The model registry
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Whether a request session is active
    pub fn is_loading(&self) -> bool {
        self.session.is_some()
    }

    /// Current operational state
    pub fn state(&self) -> ChatState {
        self.conversation.state()
    }

    /// The active session, if any
    pub fn active_session(&self) -> Option<&RequestSession> {
        self.session.as_ref()
    }

    /// Current snapshot
    pub fn snapshot(&self) -> ConversationSnapshot {
        self.updates.borrow().clone()
    }

    /// Subscribe to snapshots; the receiver starts at the current one
    pub fn subscribe(&self) -> watch::Receiver<ConversationSnapshot> {
        self.updates.subscribe()
    }

    /// Snapshots as a stream, starting with the current one
    pub fn updates(&self) -> WatchStream<ConversationSnapshot> {
        WatchStream::new(self.updates.subscribe())
    }

    /// Apply a surface intent
    ///
    /// Returns whether the intent changed anything.
    ///
    /// # Errors
    ///
    /// Propagates errors from `regenerate` and `set_model`.
    pub fn dispatch(&mut self, intent: ChatIntent) -> Result<bool, ControllerError> {
        tracing::debug!(intent = intent.name(), "Dispatching intent");
        match intent {
            ChatIntent::Send { prompt: Some(prompt) } => Ok(self.send_text(&prompt)),
            ChatIntent::Send { prompt: None } => Ok(self.send()),
            ChatIntent::Regenerate { message_id } => self.regenerate(&message_id),
            ChatIntent::Abort => Ok(self.abort()),
            ChatIntent::SetModel { model_id } => self.set_model(&model_id).map(|()| true),
            ChatIntent::SetInput { text } => {
                self.set_input(text);
                Ok(true)
            }
        }
    }

    /// Replace the input field contents
    pub fn set_input(&mut self, text: impl Into<String>) {
        self.conversation.set_input(text);
        self.publish();
    }

    /// Send the input field contents
    ///
    /// Returns false without changing anything if the input is blank or a
    /// request is already active.
    pub fn send(&mut self) -> bool {
        let prompt = self.conversation.input().to_string();
        self.send_text(&prompt)
    }

    /// Send a prompt
    ///
    /// Appends the user message, clears the input field and starts a session
    /// over the full history. Returns false without changing anything if the
    /// prompt is blank or a request is already active.
    pub fn send_text(&mut self, prompt: &str) -> bool {
        if prompt.trim().is_empty() {
            return false;
        }
        if self.is_loading() {
            tracing::debug!("Send ignored, request in progress");
            return false;
        }

        let message_id = self.conversation.push_user(prompt);
        self.conversation.take_input();
        tracing::debug!(message_id = %message_id, len = prompt.len(), "User message added");

        let history = self.conversation.history();
        self.start_session(history);
        self.publish();
        true
    }

    /// Regenerate the answer to a user message
    ///
    /// Drops the trailing assistant message if there is one after the target,
    /// then streams a new answer from the history up to the target. Returns
    /// `Ok(false)` without changing anything if a request is already active.
    ///
    /// Exchanges after an earlier target are kept and the new answer is
    /// appended at the end of the log; see
    /// [`ConversationState::truncate_for_regenerate`].
    ///
    /// # Errors
    ///
    /// Returns `UnknownMessage` or `NotAUserMessage` for an invalid target.
    pub fn regenerate(&mut self, target: &MessageId) -> Result<bool, ControllerError> {
        if self.is_loading() {
            tracing::debug!("Regenerate ignored, request in progress");
            return Ok(false);
        }

        match self.conversation.get(target) {
            None => return Err(ControllerError::UnknownMessage(target.clone())),
            Some(msg) if !msg.is_user() => {
                return Err(ControllerError::NotAUserMessage(target.clone()))
            }
            Some(_) => {}
        }

        let history = self
            .conversation
            .truncate_for_regenerate(target)
            .ok_or_else(|| ControllerError::UnknownMessage(target.clone()))?;

        tracing::debug!(target = %target, history = history.len(), "Regenerating response");
        self.start_session(history);
        self.publish();
        Ok(true)
    }

    /// Stop the active session
    ///
    /// Cancels the session token, appends the stop marker once to the
    /// in-progress message and returns to `Ready`. If no text has arrived yet
    /// the message holds only the marker, without its leading spacing; if the
    /// stream had not opened yet that becomes its own assistant message. Returns false
    /// if no session was active.
    pub fn abort(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        session.token.cancel();

        let marker = &self.settings.stop_marker;
        let marked = match session.target {
            Some(ref target) => {
                // An empty placeholder gets the marker without leading spacing
                let empty = self
                    .conversation
                    .get(target)
                    .is_some_and(|m| m.content.is_empty());
                let text = if empty { marker.trim_start() } else { marker.as_str() };
                let appended = self.conversation.append_to(target, text);
                self.conversation.finish(target);
                appended
            }
            None => false,
        };
        if !marked {
            self.conversation.push_assistant(marker.trim_start());
        }

        tracing::info!(
            session = %session.id,
            deltas = session.delta_count,
            chars = session.response.len(),
            elapsed_ms = session.started_at.elapsed().as_millis() as u64,
            "Session aborted"
        );

        self.conversation.set_state(ChatState::Ready);
        self.publish();
        true
    }

    /// Switch the model used by subsequent requests
    ///
    /// # Errors
    ///
    /// Returns `Busy` while a request is active and `Registry` for unknown
    /// ids; the state is unchanged in both cases.
    pub fn set_model(&mut self, model_id: &str) -> Result<(), ControllerError> {
        if self.is_loading() {
            return Err(ControllerError::Busy);
        }
        self.registry.get(model_id)?;

        tracing::info!(from = %self.conversation.active_model(), to = %model_id, "Model changed");
        self.conversation.set_model(model_id);
        self.publish();
        Ok(())
    }

    /// Apply every session event that is ready, without waiting
    ///
    /// Call this regularly from a surface loop. Returns true if there was
    /// activity.
    pub fn poll_streaming(&mut self) -> bool {
        let events: Vec<(SessionId, SessionEvent)> = {
            let Some(session) = self.session.as_mut() else {
                return false;
            };

            let mut collected = Vec::new();
            loop {
                match session.events.try_recv() {
                    Ok(item) => {
                        let terminal = item.1.is_terminal();
                        collected.push(item);
                        if terminal {
                            break;
                        }
                    }
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        collected.push((session.id, lost_session()));
                        break;
                    }
                }
            }
            collected
        };

        let mut activity = false;
        for (id, event) in events {
            activity |= self.apply(id, event);
        }
        activity
    }

    /// Wait for the next session event and apply it
    ///
    /// Returns false immediately if no session is active.
    pub async fn next_update(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        let (id, event) = match session.events.recv().await {
            Some(item) => item,
            None => (session.id, lost_session()),
        };
        self.apply(id, event)
    }

    /// Drive the active session to completion
    pub async fn wait_idle(&mut self) {
        while self.is_loading() {
            self.next_update().await;
        }
    }

    /// Start a session over `history`, superseding any active one
    fn start_session(&mut self, history: Vec<HistoryEntry>) {
        if let Some(previous) = self.session.take() {
            previous.token.cancel();
            if let Some(ref target) = previous.target {
                self.conversation.finish(target);
            }
            tracing::debug!(session = %previous.id, "Session superseded");
        }

        let model = match self.registry.get(self.conversation.active_model()) {
            Ok(model) => model.clone(),
            Err(e) => {
                self.conversation.push_assistant(format!("Error: {e}"));
                self.conversation.set_state(ChatState::Ready);
                return;
            }
        };

        self.next_session += 1;
        let id = SessionId(self.next_session);
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);

        tracing::info!(
            session = %id,
            model = %model.id,
            messages = history.len(),
            "Starting session"
        );

        tokio::spawn(run_session(
            Arc::clone(&self.backend),
            model,
            history,
            id,
            token.clone(),
            tx,
        ));

        self.session = Some(RequestSession {
            id,
            token,
            target: None,
            events: rx,
            response: String::new(),
            delta_count: 0,
            started_at: Instant::now(),
        });
        self.conversation.set_state(ChatState::Thinking);
    }

    /// Apply one session event
    ///
    /// Events from anything but the active, uncancelled session are dropped.
    fn apply(&mut self, id: SessionId, event: SessionEvent) -> bool {
        let Some(session) = self.session.as_mut() else {
            tracing::trace!(session = %id, "Dropping event, no active session");
            return false;
        };
        if session.id != id || session.token.is_cancelled() {
            tracing::trace!(session = %id, active = %session.id, "Dropping stale session event");
            return false;
        }

        match event {
            SessionEvent::Opened => {
                let target = self.conversation.start_assistant();
                tracing::debug!(session = %id, target = %target, "Stream opened");
                session.target = Some(target);
                self.conversation.set_state(ChatState::Responding);
            }
            SessionEvent::Delta(text) => {
                let target = match session.target {
                    Some(ref target) => target.clone(),
                    None => {
                        let target = self.conversation.start_assistant();
                        session.target = Some(target.clone());
                        target
                    }
                };
                session.response.push_str(&text);
                session.delta_count += 1;
                self.conversation.append_to(&target, &text);
                self.conversation.set_state(ChatState::Responding);
            }
            SessionEvent::Finished => {
                let target = match session.target {
                    Some(ref target) => target.clone(),
                    None => self.conversation.start_assistant(),
                };
                self.conversation.finish(&target);
                tracing::info!(
                    session = %id,
                    deltas = session.delta_count,
                    chars = session.response.len(),
                    elapsed_ms = session.started_at.elapsed().as_millis() as u64,
                    "Session complete"
                );
                self.end_session();
            }
            SessionEvent::Failed(detail) => {
                if let Some(ref target) = session.target {
                    self.conversation.finish(target);
                }
                tracing::warn!(
                    session = %id,
                    deltas = session.delta_count,
                    error = %detail,
                    "Session failed"
                );
                self.conversation.push_assistant(format!("Error: {detail}"));
                self.end_session();
            }
        }

        self.publish();
        true
    }

    fn end_session(&mut self) {
        self.session = None;
        self.conversation.set_state(ChatState::Ready);
    }

    fn publish(&self) {
        self.updates.send_replace(self.conversation.snapshot());
    }
}

fn lost_session() -> SessionEvent {
    SessionEvent::Failed("Session ended unexpectedly".to_string())
}

/// Body of a session task
///
/// Every exit path after cancellation is silent: the controller has already
/// recorded the outcome.
async fn run_session<B: ChatBackend>(
    backend: Arc<B>,
    model: ModelDescriptor,
    history: Vec<HistoryEntry>,
    id: SessionId,
    token: CancellationToken,
    tx: mpsc::Sender<(SessionId, SessionEvent)>,
) {
    let opened = tokio::select! {
        biased;
        () = token.cancelled() => return,
        result = backend.open_stream(&model, &history) => result,
    };

    let bytes = match opened {
        Ok(bytes) => bytes,
        Err(e) => {
            if !token.is_cancelled() {
                let _ = tx.send((id, SessionEvent::Failed(e.to_string()))).await;
            }
            return;
        }
    };

    if token.is_cancelled() || tx.send((id, SessionEvent::Opened)).await.is_err() {
        return;
    }

    let mut deltas = decode_deltas(bytes, Arc::clone(model.adapter()));
    loop {
        if token.is_cancelled() {
            tracing::debug!(session = %id, "Session task cancelled");
            return;
        }

        let next = tokio::select! {
            biased;
            () = token.cancelled() => return,
            next = deltas.next() => next,
        };

        let event = match next {
            Some(Ok(text)) => SessionEvent::Delta(text),
            Some(Err(e)) => SessionEvent::Failed(e.to_string()),
            None => SessionEvent::Finished,
        };
        let terminal = event.is_terminal();
        if tx.send((id, event)).await.is_err() || terminal {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, ByteStream};
    use crate::config::ModelConfig;
    use crate::messages::MessageRole;
    use crate::registry::{ModelDescriptor, OpenAiCompatible};
    use async_trait::async_trait;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    type Feed = mpsc::UnboundedSender<Result<Bytes, BackendError>>;

    /// Backend that hands out prepared responses in order
    #[derive(Default)]
    struct ScriptedBackend {
        responses: Mutex<VecDeque<Result<ByteStream, BackendError>>>,
        requests: Mutex<Vec<(String, Vec<HistoryEntry>)>>,
    }

    impl ScriptedBackend {
        /// Queue a response whose body is fed by the returned sender
        fn stream(&self) -> Feed {
            let (tx, rx) = mpsc::unbounded_channel();
            self.responses
                .lock()
                .unwrap()
                .push_back(Ok(UnboundedReceiverStream::new(rx).boxed()));
            tx
        }

        fn fail(&self, err: BackendError) {
            self.responses.lock().unwrap().push_back(Err(err));
        }
    }

    #[async_trait]
    impl ChatBackend for Arc<ScriptedBackend> {
        fn name(&self) -> &str {
            "Scripted"
        }

        async fn open_stream(
            &self,
            model: &ModelDescriptor,
            history: &[HistoryEntry],
        ) -> Result<ByteStream, BackendError> {
            self.requests
                .lock()
                .unwrap()
                .push((model.id.clone(), history.to_vec()));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::Request("no scripted response".into())))
        }
    }

    fn record(text: &str) -> Bytes {
        let json = serde_json::json!({"choices": [{"delta": {"content": text}}]});
        Bytes::from(format!("data: {json}\n\n"))
    }

    fn done() -> Bytes {
        Bytes::from_static(b"data: [DONE]\n\n")
    }

    fn registry() -> ModelRegistry {
        let adapter: Arc<dyn crate::registry::ProviderAdapter> = Arc::new(OpenAiCompatible);
        ModelRegistry::from_descriptors([
            ModelDescriptor::new(
                &ModelConfig::new("alpha", "Alpha", "http://alpha.test", "alpha-1"),
                Arc::clone(&adapter),
            ),
            ModelDescriptor::new(
                &ModelConfig::new("beta", "Beta", "http://beta.test", "beta-1"),
                adapter,
            ),
        ])
    }

    fn controller() -> (ChatController<Arc<ScriptedBackend>>, Arc<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend::default());
        let controller = ChatController::new(
            Arc::clone(&backend),
            registry(),
            ControllerSettings::with_model("alpha"),
        )
        .unwrap();
        (controller, backend)
    }

    fn contents(controller: &ChatController<Arc<ScriptedBackend>>) -> Vec<String> {
        controller
            .conversation()
            .messages()
            .iter()
            .map(|m| m.content.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_unknown_default_model_rejected() {
        let result = ChatController::new(
            Arc::new(ScriptedBackend::default()),
            registry(),
            ControllerSettings::with_model("gamma"),
        );
        assert!(matches!(
            result,
            Err(ControllerError::Registry(RegistryError::UnknownModel(_)))
        ));
    }

    #[tokio::test]
    async fn test_send_streams_response() {
        let (mut controller, backend) = controller();
        let feed = backend.stream();
        feed.send(Ok(record("Hi"))).unwrap();
        feed.send(Ok(record(" there"))).unwrap();
        feed.send(Ok(done())).unwrap();

        controller.set_input("Hello");
        assert!(controller.send());
        assert!(controller.is_loading());
        assert_eq!(controller.state(), ChatState::Thinking);
        assert_eq!(controller.conversation().input(), "");

        controller.wait_idle().await;

        let messages = controller.conversation().messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, MessageRole::User);
        assert_eq!(messages[1].content, "Hello");
        assert_eq!(messages[2].role, MessageRole::Assistant);
        assert_eq!(messages[2].content, "Hi there");
        assert!(!messages[2].streaming);
        assert!(!controller.is_loading());
        assert_eq!(controller.state(), ChatState::Ready);

        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[0].0, "alpha");
        assert_eq!(requests[0].1.len(), 2);
        assert_eq!(requests[0].1[1].content, "Hello");
    }

    #[tokio::test]
    async fn test_send_blank_is_noop() {
        let (mut controller, _backend) = controller();
        assert!(!controller.send_text("   \n"));
        assert!(!controller.send());
        assert_eq!(controller.conversation().messages().len(), 1);
        assert!(!controller.is_loading());
    }

    #[tokio::test]
    async fn test_send_and_regenerate_noop_while_loading() {
        let (mut controller, backend) = controller();
        let _feed = backend.stream();

        assert!(controller.send_text("first"));
        assert!(controller.next_update().await);
        let before = contents(&controller);
        let user = controller.conversation().messages()[1].id.clone();

        assert!(!controller.send_text("second"));
        assert_eq!(controller.regenerate(&user), Ok(false));
        assert_eq!(contents(&controller), before);
        assert_eq!(backend.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_finish_reason_without_done_clears_loading() {
        let (mut controller, backend) = controller();
        let feed = backend.stream();
        feed.send(Ok(Bytes::from_static(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Bye\"},\"finish_reason\":\"stop\"}]}\n\n",
        )))
        .unwrap();
        // Stream stays open; the finish reason alone ends the session

        controller.send_text("Hi");
        controller.wait_idle().await;

        assert!(!controller.is_loading());
        assert_eq!(contents(&controller).last().unwrap(), "Bye");
        drop(feed);
    }

    #[tokio::test]
    async fn test_malformed_records_skipped() {
        let (mut controller, backend) = controller();
        let feed = backend.stream();
        feed.send(Ok(Bytes::from_static(b"data: not-json\n\n"))).unwrap();
        feed.send(Ok(record("ok"))).unwrap();
        drop(feed);

        controller.send_text("Hi");
        controller.wait_idle().await;

        let messages = controller.conversation().messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].content, "ok");
    }

    #[tokio::test]
    async fn test_empty_stream_leaves_empty_message() {
        let (mut controller, backend) = controller();
        let feed = backend.stream();
        feed.send(Ok(done())).unwrap();

        controller.send_text("Hi");
        controller.wait_idle().await;

        let last = controller.conversation().messages().last().unwrap().clone();
        assert!(last.is_assistant());
        assert_eq!(last.content, "");
        assert!(!last.streaming);
    }

    #[tokio::test]
    async fn test_done_ends_session_while_connection_open() {
        let (mut controller, backend) = controller();
        let feed = backend.stream();
        feed.send(Ok(record("Hi"))).unwrap();
        feed.send(Ok(done())).unwrap();

        controller.send_text("Hello");
        tokio::time::timeout(std::time::Duration::from_secs(2), controller.wait_idle())
            .await
            .expect("session should end at [DONE]");

        assert!(!controller.is_loading());
        assert_eq!(controller.state(), ChatState::Ready);

        // Bytes after the sentinel never reach the finished answer
        feed.send(Ok(record(" after-done"))).ok();
        assert!(!controller.poll_streaming());
        assert_eq!(contents(&controller).last().unwrap(), "Hi");
        assert_eq!(controller.conversation().messages().len(), 3);
    }

    #[tokio::test]
    async fn test_abort_after_open_without_text() {
        let (mut controller, backend) = controller();
        let _feed = backend.stream();

        controller.send_text("Hi");
        // Opened only; no delta yet
        assert!(controller.next_update().await);
        assert!(controller.abort());

        let messages = controller.conversation().messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].content, DEFAULT_STOP_MARKER.trim_start());
        assert!(!messages[2].streaming);
    }

    #[tokio::test]
    async fn test_abort_appends_marker_once() {
        let (mut controller, backend) = controller();
        let feed = backend.stream();
        feed.send(Ok(record("Partial"))).unwrap();

        controller.send_text("Tell me a story");
        // Opened, then the delta
        assert!(controller.next_update().await);
        assert!(controller.next_update().await);
        assert_eq!(contents(&controller).last().unwrap(), "Partial");

        assert!(controller.abort());
        feed.send(Ok(record(" more"))).ok();
        assert!(!controller.abort());
        assert!(!controller.poll_streaming());
        assert!(!controller.next_update().await);

        let last = controller.conversation().messages().last().unwrap().clone();
        assert_eq!(last.content, format!("Partial{DEFAULT_STOP_MARKER}"));
        assert!(!last.streaming);
        assert!(!controller.is_loading());
        assert_eq!(controller.state(), ChatState::Ready);
    }

    #[tokio::test]
    async fn test_abort_before_open_adds_marker_message() {
        let (mut controller, backend) = controller();
        let _feed = backend.stream();

        controller.send_text("Hi");
        assert!(controller.abort());

        let messages = controller.conversation().messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].content, DEFAULT_STOP_MARKER.trim_start());
        assert!(!controller.is_loading());
    }

    #[tokio::test]
    async fn test_abort_without_session_is_noop() {
        let (mut controller, _backend) = controller();
        assert!(!controller.abort());
        assert_eq!(controller.conversation().messages().len(), 1);
    }

    #[tokio::test]
    async fn test_open_failure_adds_error_message() {
        let (mut controller, backend) = controller();
        backend.fail(BackendError::Status {
            status: 401,
            body: "invalid key".to_string(),
        });

        controller.send_text("Hi");
        controller.wait_idle().await;

        let messages = controller.conversation().messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].content, "Error: 401: invalid key");
        assert!(!controller.is_loading());
    }

    #[tokio::test]
    async fn test_mid_stream_failure_keeps_partial_text() {
        let (mut controller, backend) = controller();
        let feed = backend.stream();
        feed.send(Ok(record("Half"))).unwrap();
        feed.send(Err(BackendError::Stream("reset".to_string()))).unwrap();

        controller.send_text("Hi");
        controller.wait_idle().await;

        assert_eq!(
            contents(&controller)[2..].to_vec(),
            vec!["Half".to_string(), "Error: Stream interrupted: reset".to_string()]
        );
        assert!(controller.conversation().messages().iter().all(|m| !m.streaming));
    }

    #[tokio::test]
    async fn test_regenerate_replaces_trailing_answer() {
        let (mut controller, backend) = controller();
        let feed = backend.stream();
        feed.send(Ok(record("Old"))).unwrap();
        feed.send(Ok(done())).unwrap();
        controller.send_text("Question");
        controller.wait_idle().await;
        let len_before = controller.conversation().messages().len();
        let question = controller.conversation().messages()[1].id.clone();

        let feed = backend.stream();
        feed.send(Ok(record("New"))).unwrap();
        feed.send(Ok(done())).unwrap();
        assert_eq!(controller.regenerate(&question), Ok(true));
        assert_eq!(controller.conversation().messages().len(), len_before - 1);
        controller.wait_idle().await;

        assert_eq!(controller.conversation().messages().len(), len_before);
        assert_eq!(contents(&controller).last().unwrap(), "New");
        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[1].1.last().unwrap().content, "Question");
    }

    #[tokio::test]
    async fn test_regenerate_rejects_invalid_targets() {
        let (mut controller, _backend) = controller();
        let greeting = controller.conversation().messages()[0].id.clone();
        let missing = MessageId::new();

        assert_eq!(
            controller.regenerate(&greeting),
            Err(ControllerError::NotAUserMessage(greeting.clone()))
        );
        assert_eq!(
            controller.regenerate(&missing),
            Err(ControllerError::UnknownMessage(missing.clone()))
        );
        assert!(!controller.is_loading());
    }

    #[tokio::test]
    async fn test_supersede_discards_previous_session() {
        let (mut controller, backend) = controller();
        let first = backend.stream();
        first.send(Ok(record("first"))).unwrap();
        controller.send_text("One");
        assert!(controller.next_update().await);
        assert!(controller.next_update().await);
        let first_session = controller.active_session().unwrap().id();

        let second = backend.stream();
        let history = controller.conversation().history();
        controller.start_session(history);

        first.send(Ok(record(" late"))).ok();
        assert!(!controller.apply(first_session, SessionEvent::Delta(" stale".into())));

        second.send(Ok(record("second"))).unwrap();
        second.send(Ok(done())).unwrap();
        controller.wait_idle().await;

        let all = contents(&controller).concat();
        assert!(!all.contains("late"));
        assert!(!all.contains("stale"));
        assert_eq!(contents(&controller).last().unwrap(), "second");
        assert!(controller.conversation().messages().iter().all(|m| !m.streaming));
    }

    #[tokio::test]
    async fn test_abort_then_send_shows_only_new_session() {
        let (mut controller, backend) = controller();
        let first = backend.stream();
        controller.send_text("One");
        assert!(controller.next_update().await);
        controller.abort();

        let second = backend.stream();
        second.send(Ok(record("fresh"))).unwrap();
        second.send(Ok(done())).unwrap();
        controller.send_text("Two");
        first.send(Ok(record("ghost"))).ok();
        controller.wait_idle().await;

        assert!(!contents(&controller).concat().contains("ghost"));
        assert_eq!(contents(&controller).last().unwrap(), "fresh");
    }

    #[tokio::test]
    async fn test_set_model() {
        let (mut controller, backend) = controller();
        assert_eq!(controller.set_model("beta"), Ok(()));
        assert_eq!(controller.snapshot().active_model, "beta");
        assert!(matches!(
            controller.set_model("gamma"),
            Err(ControllerError::Registry(_))
        ));

        let _feed = backend.stream();
        controller.send_text("Hi");
        assert!(controller.next_update().await);
        assert_eq!(controller.set_model("alpha"), Err(ControllerError::Busy));
        assert_eq!(controller.conversation().active_model(), "beta");
        assert_eq!(backend.requests.lock().unwrap()[0].0, "beta");
    }

    #[tokio::test]
    async fn test_snapshots_published() {
        let (mut controller, backend) = controller();
        let mut rx = controller.subscribe();
        let feed = backend.stream();
        feed.send(Ok(record("Yo"))).unwrap();
        feed.send(Ok(done())).unwrap();

        controller.send_text("Hi");
        assert!(rx.has_changed().unwrap());
        let snap = rx.borrow_and_update().clone();
        assert!(snap.loading);
        assert_eq!(snap.messages.len(), 2);

        controller.wait_idle().await;
        let snap = rx.borrow_and_update().clone();
        assert!(!snap.loading);
        assert_eq!(snap.last().unwrap().content, "Yo");
    }

    #[tokio::test]
    async fn test_dispatch_intents() {
        let (mut controller, backend) = controller();
        let _feed = backend.stream();

        assert_eq!(
            controller.dispatch(ChatIntent::SetInput { text: "Hi".into() }),
            Ok(true)
        );
        assert_eq!(controller.dispatch(ChatIntent::Send { prompt: None }), Ok(true));
        assert_eq!(controller.dispatch(ChatIntent::Abort), Ok(true));
        assert_eq!(controller.dispatch(ChatIntent::Abort), Ok(false));
        assert_eq!(
            controller.dispatch(ChatIntent::SetModel { model_id: "beta".into() }),
            Ok(true)
        );
    }

    #[tokio::test]
    async fn test_poll_streaming_drains_ready_events() {
        let (mut controller, backend) = controller();
        let feed = backend.stream();
        feed.send(Ok(record("a"))).unwrap();
        feed.send(Ok(record("b"))).unwrap();
        feed.send(Ok(done())).unwrap();

        controller.send_text("Hi");
        while controller.is_loading() {
            tokio::task::yield_now().await;
            controller.poll_streaming();
        }
        assert_eq!(contents(&controller).last().unwrap(), "ab");
    }
}
