//! The per-conversation turn orchestrator.
//!
//! One [`ChatSession`] drives the turn-taking protocol for one
//! conversation: persist the user message, open the relay stream, fold
//! streamed deltas into an assistant placeholder, persist the final
//! assistant message, reconcile state on error. The phase guard refuses a
//! second submission while a turn is in flight, so there is never more than
//! one relay stream per conversation.

use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::StreamExt;

use crate::relay::sse::{Frame, FrameBuffer, delta_text};
use crate::relay::{ChatMessage, Role};
use crate::store::Message;

use super::backend::{ChatBackend, ClientError};

/// Identifier of a UI entry.
///
/// Optimistic entries start `Pending` with a locally generated correlation
/// id and are reconciled to `Confirmed` once the server assigns one; the
/// match is always by correlation id, never by position.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EntryId {
    /// Locally generated, not yet persisted.
    Pending(u64),
    /// Server-assigned message id.
    Confirmed(String),
}

impl EntryId {
    /// Whether this entry has been confirmed by the server.
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }
}

/// One message as rendered by the UI.
#[derive(Clone, Debug)]
pub struct ChatEntry {
    /// Pending or confirmed identity.
    pub id: EntryId,
    /// Message author.
    pub role: Role,
    /// Message text; replaced wholesale on every streamed delta.
    pub content: String,
    /// Model tag for assistant turns.
    pub model_used: Option<String>,
}

/// Phase of the current turn.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TurnPhase {
    /// No turn in flight; submissions are accepted.
    Idle,
    /// Persisting the user message.
    UserPersisting,
    /// Relaying the completion stream.
    Streaming,
    /// Persisting the accumulated assistant message.
    AssistantPersisting,
}

/// Result of a submission.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TurnOutcome {
    /// The turn ran to completion.
    Completed,
    /// A turn was already in flight; the submission was ignored.
    RejectedBusy,
    /// The input was empty after trimming; ignored.
    RejectedEmpty,
    /// The turn aborted; see [`ChatSession::last_error`].
    Failed,
}

/// Mutable session state behind the lock.
#[derive(Debug, Default)]
struct SessionState {
    entries: Vec<ChatEntry>,
    phase: Option<TurnPhase>,
    next_temp: u64,
    last_error: Option<String>,
    needs_refresh: bool,
}

impl SessionState {
    fn phase(&self) -> TurnPhase {
        self.phase.unwrap_or(TurnPhase::Idle)
    }

    fn push_pending(&mut self, role: Role, content: String, model_used: Option<String>) -> u64 {
        let temp = self.next_temp;
        self.next_temp += 1;
        self.entries.push(ChatEntry {
            id: EntryId::Pending(temp),
            role,
            content,
            model_used,
        });
        temp
    }

    fn entry_mut(&mut self, temp: u64) -> Option<&mut ChatEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.id == EntryId::Pending(temp))
    }

    fn confirm(&mut self, temp: u64, saved: &Message) {
        if let Some(entry) = self.entry_mut(temp) {
            entry.id = EntryId::Confirmed(saved.id.clone());
            entry.content = saved.content.clone();
            entry.model_used = saved.model_used.clone();
        }
    }

    fn set_content(&mut self, temp: u64, content: String) {
        if let Some(entry) = self.entry_mut(temp) {
            entry.content = content;
        }
    }

    fn remove(&mut self, temp: u64) {
        self.entries.retain(|entry| entry.id != EntryId::Pending(temp));
    }

    fn fail(&mut self, message: String) {
        self.last_error = Some(message);
        self.phase = Some(TurnPhase::Idle);
    }
}

/// Turn orchestrator for one conversation.
pub struct ChatSession {
    conversation_id: String,
    state: Mutex<SessionState>,
}

impl ChatSession {
    /// Create an empty session for a conversation.
    #[must_use]
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self::load(conversation_id, Vec::new())
    }

    /// Create a session pre-populated with persisted history.
    #[must_use]
    pub fn load(conversation_id: impl Into<String>, messages: Vec<Message>) -> Self {
        let entries = messages
            .into_iter()
            .map(|message| ChatEntry {
                id: EntryId::Confirmed(message.id),
                role: message.role,
                content: message.content,
                model_used: message.model_used,
            })
            .collect();

        Self {
            conversation_id: conversation_id.into(),
            state: Mutex::new(SessionState {
                entries,
                ..SessionState::default()
            }),
        }
    }

    /// The conversation this session drives.
    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Snapshot of the rendered entries.
    #[must_use]
    pub fn entries(&self) -> Vec<ChatEntry> {
        self.lock().entries.clone()
    }

    /// Current turn phase.
    #[must_use]
    pub fn phase(&self) -> TurnPhase {
        self.lock().phase()
    }

    /// The error from the last failed turn, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// Whether the conversation list should be refreshed, clearing the
    /// flag. Set after a turn persists an assistant message, since the
    /// append bumps the conversation's recency.
    pub fn take_needs_refresh(&self) -> bool {
        std::mem::take(&mut self.lock().needs_refresh)
    }

    /// Run one full turn: persist the user message, stream the completion,
    /// persist the assistant message.
    ///
    /// Empty input and submissions while a turn is in flight are rejected
    /// without side effects. On failure at any step the turn aborts, partial
    /// assistant content is discarded from the entries, and the error is
    /// recorded; no partial assistant message is ever persisted. Persistence
    /// failure of the user message aborts before any upstream call is made.
    pub async fn submit<B>(&self, backend: &B, model: &str, input: &str) -> TurnOutcome
    where
        B: ChatBackend + ?Sized,
    {
        let text = input.trim().to_string();
        if text.is_empty() {
            return TurnOutcome::RejectedEmpty;
        }

        // Phase guard and optimistic user entry, atomically.
        let user_temp = {
            let mut state = self.lock();
            if state.phase() != TurnPhase::Idle {
                return TurnOutcome::RejectedBusy;
            }
            state.phase = Some(TurnPhase::UserPersisting);
            state.last_error = None;
            state.push_pending(Role::User, text.clone(), None)
        };

        let saved_user = match backend
            .append_message(&self.conversation_id, Role::User, &text, None)
            .await
        {
            Ok(message) => message,
            Err(e) => {
                // The optimistic entry stays visible; the turn aborts
                // before the upstream model is ever called.
                self.lock().fail(format!("Failed to save message: {e}"));
                return TurnOutcome::Failed;
            }
        };

        let (assistant_temp, history) = {
            let mut state = self.lock();
            state.confirm(user_temp, &saved_user);
            let history: Vec<ChatMessage> = state
                .entries
                .iter()
                .map(|entry| ChatMessage::new(entry.role, entry.content.clone()))
                .collect();
            let temp =
                state.push_pending(Role::Assistant, String::new(), Some(model.to_string()));
            state.phase = Some(TurnPhase::Streaming);
            (temp, history)
        };

        let mut stream = match backend
            .open_stream(&self.conversation_id, model, &history)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                self.abort(assistant_temp, e.to_string());
                return TurnOutcome::Failed;
            }
        };

        let mut frames = FrameBuffer::new();
        let mut accumulated = String::new();
        let mut finished = false;
        'stream: while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.abort(assistant_temp, format!("Stream error: {e}"));
                    return TurnOutcome::Failed;
                }
            };
            for frame in frames.push(&bytes) {
                match frame {
                    Frame::Done => {
                        finished = true;
                        break 'stream;
                    }
                    Frame::Data(payload) => {
                        if let Some(delta) = delta_text(&payload) {
                            accumulated.push_str(&delta);
                            self.lock().set_content(assistant_temp, accumulated.clone());
                        }
                    }
                }
            }
        }
        if !finished {
            // The stream ended without the sentinel; flush a trailing
            // unterminated frame.
            if let Some(Frame::Data(payload)) = frames.finish() {
                if let Some(delta) = delta_text(&payload) {
                    accumulated.push_str(&delta);
                    self.lock().set_content(assistant_temp, accumulated.clone());
                }
            }
        }

        if accumulated.is_empty() {
            let mut state = self.lock();
            state.remove(assistant_temp);
            state.phase = Some(TurnPhase::Idle);
            return TurnOutcome::Completed;
        }

        self.lock().phase = Some(TurnPhase::AssistantPersisting);
        match backend
            .append_message(
                &self.conversation_id,
                Role::Assistant,
                &accumulated,
                Some(model),
            )
            .await
        {
            Ok(saved) => {
                let mut state = self.lock();
                state.confirm(assistant_temp, &saved);
                state.needs_refresh = true;
                state.phase = Some(TurnPhase::Idle);
                TurnOutcome::Completed
            }
            Err(e) => {
                self.abort(assistant_temp, format!("Failed to save response: {e}"));
                TurnOutcome::Failed
            }
        }
    }

    /// Drop the assistant placeholder and record a turn failure.
    fn abort(&self, assistant_temp: u64, message: String) {
        let mut state = self.lock();
        state.remove(assistant_temp);
        state.fail(message);
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::Utc;
    use futures::StreamExt;
    use tokio::sync::Semaphore;

    use crate::client::backend::{ByteStream, ChatBackend, ClientError};
    use crate::relay::{ChatMessage, Role};
    use crate::store::Message;

    use super::{ChatSession, EntryId, TurnOutcome, TurnPhase};

    fn delta_frame(text: &str) -> Result<Vec<u8>, String> {
        Ok(format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":\"{text}\"}}}}]}}\n"
        )
        .into_bytes())
    }

    fn done_frame() -> Result<Vec<u8>, String> {
        Ok(b"data: [DONE]\n".to_vec())
    }

    /// Scripted backend: canned stream chunks, optional failures, and a
    /// gate that holds the stream open until released.
    struct MockBackend {
        chunks: Vec<Result<Vec<u8>, String>>,
        fail_user_persist: bool,
        fail_assistant_persist: bool,
        fail_open: bool,
        gate: Option<Arc<Semaphore>>,
        appended: Mutex<Vec<(Role, String, Option<String>)>>,
        histories: Mutex<Vec<Vec<ChatMessage>>>,
        next_id: AtomicUsize,
    }

    impl MockBackend {
        fn with_chunks(chunks: Vec<Result<Vec<u8>, String>>) -> Self {
            Self {
                chunks,
                fail_user_persist: false,
                fail_assistant_persist: false,
                fail_open: false,
                gate: None,
                appended: Mutex::new(Vec::new()),
                histories: Mutex::new(Vec::new()),
                next_id: AtomicUsize::new(1),
            }
        }

        fn appended(&self) -> Vec<(Role, String, Option<String>)> {
            self.appended.lock().unwrap().clone()
        }

        fn open_calls(&self) -> usize {
            self.histories.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatBackend for MockBackend {
        async fn append_message(
            &self,
            conversation_id: &str,
            role: Role,
            content: &str,
            model_used: Option<&str>,
        ) -> Result<Message, ClientError> {
            let should_fail = match role {
                Role::User => self.fail_user_persist,
                _ => self.fail_assistant_persist,
            };
            if should_fail {
                return Err(ClientError::Api {
                    status: 500,
                    message: "Internal server error".to_string(),
                });
            }

            self.appended.lock().unwrap().push((
                role,
                content.to_string(),
                model_used.map(str::to_string),
            ));
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(Message {
                id: format!("srv-{n}"),
                conversation_id: conversation_id.to_string(),
                role,
                content: content.to_string(),
                model_used: model_used.map(str::to_string),
                created_at: Utc::now(),
            })
        }

        async fn open_stream(
            &self,
            _conversation_id: &str,
            _model: &str,
            messages: &[ChatMessage],
        ) -> Result<ByteStream, ClientError> {
            if self.fail_open {
                return Err(ClientError::Api {
                    status: 502,
                    message: "Upstream error (429): rate limited".to_string(),
                });
            }
            self.histories.lock().unwrap().push(messages.to_vec());

            let chunks: Vec<Result<Bytes, ClientError>> = self
                .chunks
                .iter()
                .map(|chunk| match chunk {
                    Ok(bytes) => Ok(Bytes::from(bytes.clone())),
                    Err(message) => Err(ClientError::Stream(message.clone())),
                })
                .collect();
            let body = futures::stream::iter(chunks);

            match &self.gate {
                Some(gate) => {
                    let gate = Arc::clone(gate);
                    let gated = futures::stream::once(async move {
                        let _permit = gate.acquire().await;
                    })
                    .filter_map(|()| async { None })
                    .chain(body);
                    Ok(gated.boxed())
                }
                None => Ok(body.boxed()),
            }
        }
    }

    #[tokio::test]
    async fn test_turn_accumulates_and_persists() {
        let backend = MockBackend::with_chunks(vec![
            delta_frame("Hel"),
            delta_frame("lo"),
            done_frame(),
        ]);
        let session = ChatSession::new("c1");

        let outcome = session.submit(&backend, "openai/gpt-4o-mini", "Hi").await;
        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(session.phase(), TurnPhase::Idle);
        assert!(session.take_needs_refresh());

        let appended = backend.appended();
        assert_eq!(appended.len(), 2);
        assert_eq!(appended[0], (Role::User, "Hi".to_string(), None));
        assert_eq!(
            appended[1],
            (
                Role::Assistant,
                "Hello".to_string(),
                Some("openai/gpt-4o-mini".to_string())
            )
        );

        let entries = session.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|entry| entry.id.is_confirmed()));
        assert_eq!(entries[1].content, "Hello");
        assert_eq!(entries[1].id, EntryId::Confirmed("srv-2".to_string()));
    }

    #[tokio::test]
    async fn test_history_includes_persisted_user_turn() {
        let backend = MockBackend::with_chunks(vec![delta_frame("ok"), done_frame()]);
        let session = ChatSession::load(
            "c1",
            vec![Message {
                id: "srv-0".to_string(),
                conversation_id: "c1".to_string(),
                role: Role::Assistant,
                content: "Earlier reply".to_string(),
                model_used: None,
                created_at: Utc::now(),
            }],
        );

        session.submit(&backend, "m", "follow-up").await;

        let histories = backend.histories.lock().unwrap();
        assert_eq!(histories.len(), 1);
        // Prior history plus the just-persisted user turn, no placeholder.
        assert_eq!(histories[0].len(), 2);
        assert_eq!(histories[0][1].content, "follow-up");
        assert_eq!(histories[0][1].role, Role::User);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let backend = MockBackend::with_chunks(vec![
            delta_frame("Hel"),
            Ok(b"data: this is not json\n".to_vec()),
            delta_frame("lo"),
            done_frame(),
        ]);
        let session = ChatSession::new("c1");

        assert_eq!(session.submit(&backend, "m", "Hi").await, TurnOutcome::Completed);
        assert_eq!(backend.appended()[1].1, "Hello");
    }

    #[tokio::test]
    async fn test_user_persist_failure_aborts_before_upstream() {
        let mut backend = MockBackend::with_chunks(vec![done_frame()]);
        backend.fail_user_persist = true;
        let session = ChatSession::new("c1");

        assert_eq!(session.submit(&backend, "m", "Hi").await, TurnOutcome::Failed);
        assert_eq!(backend.open_calls(), 0);
        assert!(session.last_error().is_some());
        assert_eq!(session.phase(), TurnPhase::Idle);

        // The optimistic entry remains visible, still pending.
        let entries = session.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, EntryId::Pending(0));
    }

    #[tokio::test]
    async fn test_open_failure_discards_placeholder() {
        let mut backend = MockBackend::with_chunks(vec![]);
        backend.fail_open = true;
        let session = ChatSession::new("c1");

        assert_eq!(session.submit(&backend, "m", "Hi").await, TurnOutcome::Failed);

        // Only the persisted user message survives; the upstream error text
        // is surfaced for diagnosis.
        let entries = session.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].role, Role::User);
        assert!(session.last_error().unwrap().contains("rate limited"));
        assert_eq!(backend.appended().len(), 1);
    }

    #[tokio::test]
    async fn test_mid_stream_error_discards_partial_content() {
        let backend = MockBackend::with_chunks(vec![
            delta_frame("partial answ"),
            Err("connection reset".to_string()),
        ]);
        let session = ChatSession::new("c1");

        assert_eq!(session.submit(&backend, "m", "Hi").await, TurnOutcome::Failed);

        // No partial assistant message is persisted or left in the entries.
        let appended = backend.appended();
        assert_eq!(appended.len(), 1);
        assert_eq!(appended[0].0, Role::User);
        assert_eq!(session.entries().len(), 1);
        assert!(session.last_error().unwrap().contains("connection reset"));
        assert!(!session.take_needs_refresh());
    }

    #[tokio::test]
    async fn test_assistant_persist_failure_discards_placeholder() {
        let mut backend =
            MockBackend::with_chunks(vec![delta_frame("Hello"), done_frame()]);
        backend.fail_assistant_persist = true;
        let session = ChatSession::new("c1");

        assert_eq!(session.submit(&backend, "m", "Hi").await, TurnOutcome::Failed);
        assert_eq!(session.entries().len(), 1);
        assert_eq!(session.phase(), TurnPhase::Idle);
    }

    #[tokio::test]
    async fn test_empty_stream_persists_nothing() {
        let backend = MockBackend::with_chunks(vec![done_frame()]);
        let session = ChatSession::new("c1");

        assert_eq!(session.submit(&backend, "m", "Hi").await, TurnOutcome::Completed);
        assert_eq!(backend.appended().len(), 1);
        assert_eq!(session.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let backend = MockBackend::with_chunks(vec![]);
        let session = ChatSession::new("c1");

        assert_eq!(session.submit(&backend, "m", "   ").await, TurnOutcome::RejectedEmpty);
        assert!(session.entries().is_empty());
        assert_eq!(backend.open_calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_submission_rejected() {
        let mut backend =
            MockBackend::with_chunks(vec![delta_frame("Hello"), done_frame()]);
        let gate = Arc::new(Semaphore::new(0));
        backend.gate = Some(Arc::clone(&gate));

        let backend = Arc::new(backend);
        let session = Arc::new(ChatSession::new("c1"));

        let first = {
            let session = Arc::clone(&session);
            let backend = Arc::clone(&backend);
            tokio::spawn(async move { session.submit(&*backend, "m", "first").await })
        };

        // Let the first turn reach the streaming phase, held by the gate.
        while session.phase() != TurnPhase::Streaming {
            tokio::task::yield_now().await;
        }

        let second = session.submit(&*backend, "m", "second").await;
        assert_eq!(second, TurnOutcome::RejectedBusy);

        gate.add_permits(1);
        assert_eq!(first.await.unwrap(), TurnOutcome::Completed);

        // Exactly one assistant message resulted from the two submissions.
        let assistants = backend
            .appended()
            .iter()
            .filter(|(role, _, _)| *role == Role::Assistant)
            .count();
        assert_eq!(assistants, 1);
        assert_eq!(backend.open_calls(), 1);
    }
}
