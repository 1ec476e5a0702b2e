use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hookwright_provider::{event_stream, BackendError, GenerationBackend};
use hookwright_schema::{ConversationMessage, GenerationEvent, Transcript};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::{GenerationContext, HookIdGenerator, Step};

pub const EMPTY_QUERY_MESSAGE: &str = "Please enter a prompt before generating.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerateError {
    #[error("query is empty")]
    EmptyQuery,
    #[error("a generation is already in progress")]
    AlreadyGenerating,
}

/// What callers observe. Published through a watch channel after every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub transcript: Transcript,
    pub is_generating: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Fail the attempt when no event arrives for this long.
    pub idle_timeout: Option<Duration>,
}

/// How an attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Finished,
    Failed(String),
    /// Cancelled by the caller or superseded by a newer attempt.
    Cancelled,
}

pub struct GenerationTask {
    attempt: u64,
    handle: JoinHandle<AttemptOutcome>,
}

impl GenerationTask {
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub async fn wait(self) -> AttemptOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(attempt = self.attempt, error = %e, "generation task aborted");
                AttemptOutcome::Failed(format!("generation task aborted: {e}"))
            }
        }
    }
}

struct ActiveAttempt {
    id: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct Attempts {
    active: Option<ActiveAttempt>,
    last_id: u64,
}

struct SessionInner {
    backend: Arc<dyn GenerationBackend>,
    options: SessionOptions,
    state: watch::Sender<SessionSnapshot>,
    hook_ids: HookIdGenerator,
    attempts: Mutex<Attempts>,
    pending_bookmarks: Mutex<HashSet<String>>,
}

/// A transcript plus at most one running generation against a backend.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct GenerationSession {
    inner: Arc<SessionInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl GenerationSession {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self::with_options(backend, SessionOptions::default())
    }

    pub fn with_options(backend: Arc<dyn GenerationBackend>, options: SessionOptions) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self {
            inner: Arc::new(SessionInner {
                backend,
                options,
                state,
                hook_ids: HookIdGenerator::new(),
                attempts: Mutex::new(Attempts::default()),
                pending_bookmarks: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    /// Starts a new attempt on the tokio runtime.
    ///
    /// A blank query records a user-visible error and never reaches the
    /// backend. A call while another attempt is still generating is
    /// rejected. An attempt that already reported completion but whose
    /// stream is still open is superseded.
    pub fn generate(&self, query: &str) -> Result<GenerationTask, GenerateError> {
        let query = query.trim();
        if query.is_empty() {
            self.inner
                .state
                .send_modify(|s| s.last_error = Some(EMPTY_QUERY_MESSAGE.to_string()));
            return Err(GenerateError::EmptyQuery);
        }

        let (attempt, token) = {
            let mut attempts = lock(&self.inner.attempts);
            if self.inner.state.borrow().is_generating {
                return Err(GenerateError::AlreadyGenerating);
            }
            if let Some(previous) = attempts.active.take() {
                tracing::debug!(attempt = previous.id, "superseding finished attempt");
                previous.token.cancel();
            }
            attempts.last_id += 1;
            let attempt = attempts.last_id;
            let token = CancellationToken::new();
            attempts.active = Some(ActiveAttempt {
                id: attempt,
                token: token.clone(),
            });
            self.inner.state.send_modify(|s| {
                s.transcript.messages.retain(|m| !m.is_placeholder);
                s.is_generating = true;
                s.last_error = None;
            });
            (attempt, token)
        };

        let session = self.clone();
        let query = query.to_string();
        let handle = tokio::spawn(async move { session.run_attempt(attempt, query, token).await });
        Ok(GenerationTask { attempt, handle })
    }

    /// Aborts the active attempt. Safe to call when nothing is running.
    pub fn cancel(&self) {
        let mut attempts = lock(&self.inner.attempts);
        let Some(active) = attempts.active.take() else {
            return;
        };
        active.token.cancel();
        self.inner.state.send_modify(|s| {
            s.transcript.messages.retain(|m| !m.is_placeholder);
            s.is_generating = false;
        });
        tracing::info!(attempt = active.id, "generation cancelled");
    }

    /// Cancels any active attempt and empties the transcript.
    pub fn clear(&self) {
        self.cancel();
        self.inner.state.send_modify(|s| s.transcript.clear());
    }

    /// Bookmarks a finalized hook through the backend.
    ///
    /// Returns `Ok(false)` without calling the backend when the hook is
    /// unknown, already bookmarked, or already being bookmarked. The flag
    /// is only set after the backend accepted the bookmark.
    pub async fn bookmark(&self, hook_id: &str) -> Result<bool, BackendError> {
        let content = {
            let state = self.inner.state.borrow();
            match state.transcript.hook(hook_id) {
                Some(hook) if !hook.is_bookmarked => hook.content.clone(),
                _ => return Ok(false),
            }
        };
        if !lock(&self.inner.pending_bookmarks).insert(hook_id.to_string()) {
            return Ok(false);
        }

        let result = self.inner.backend.bookmark_hook(&content).await;
        lock(&self.inner.pending_bookmarks).remove(hook_id);
        if let Err(e) = result {
            tracing::warn!(hook_id, error = %e, "bookmark failed");
            return Err(e);
        }

        let mut flipped = false;
        self.inner.state.send_modify(|s| {
            if let Some(hook) = s.transcript.hook_mut(hook_id) {
                flipped = !hook.is_bookmarked;
                hook.is_bookmarked = true;
            }
        });
        Ok(flipped)
    }

    /// Applies `f` only while `attempt` is still the active one.
    fn update(&self, attempt: u64, f: impl FnOnce(&mut SessionSnapshot)) -> bool {
        let attempts = lock(&self.inner.attempts);
        if attempts.active.as_ref().map(|a| a.id) != Some(attempt) {
            return false;
        }
        self.inner.state.send_modify(f);
        true
    }

    /// Applies `f` and retires the attempt.
    fn finish(&self, attempt: u64, f: impl FnOnce(&mut SessionSnapshot)) -> bool {
        let mut attempts = lock(&self.inner.attempts);
        if attempts.active.as_ref().map(|a| a.id) != Some(attempt) {
            return false;
        }
        attempts.active = None;
        self.inner.state.send_modify(f);
        true
    }

    fn fail(&self, attempt: u64, ctx: &mut GenerationContext, message: String) -> AttemptOutcome {
        let recorded = self.finish(attempt, |s| {
            ctx.drop_placeholder(&mut s.transcript);
            s.is_generating = false;
            s.last_error = Some(message.clone());
        });
        if recorded {
            tracing::error!(attempt, error = %message, "generation failed");
            AttemptOutcome::Failed(message)
        } else {
            AttemptOutcome::Cancelled
        }
    }

    async fn run_attempt(&self, attempt: u64, query: String, token: CancellationToken) -> AttemptOutcome {
        tracing::info!(attempt, query_len = query.len(), "generation started");
        let mut ctx = GenerationContext::new();

        let opened = tokio::select! {
            _ = token.cancelled() => return AttemptOutcome::Cancelled,
            opened = self.inner.backend.open_stream(&query) => opened,
        };
        let body = match opened {
            Ok(body) => body,
            Err(e) => return self.fail(attempt, &mut ctx, e.to_string()),
        };

        let accepted = self.update(attempt, |s| {
            s.transcript.messages.push(ConversationMessage::user(query.as_str()));
        });
        if !accepted {
            return AttemptOutcome::Cancelled;
        }

        let events = event_stream(body);
        tokio::pin!(events);

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return AttemptOutcome::Cancelled,
                next = next_event(&mut events, self.inner.options.idle_timeout) => next,
            };

            let event = match next {
                None => break,
                Some(Ok(event)) => event,
                Some(Err(BackendError::Idle(_))) if ctx.is_completed() => {
                    tracing::debug!(attempt, "closing idle stream after completion");
                    break;
                }
                Some(Err(e)) => return self.fail(attempt, &mut ctx, e.to_string()),
            };

            let mut step = Step::Continue;
            let applied = self.update(attempt, |s| {
                step = ctx.apply(&mut s.transcript, &self.inner.hook_ids, event);
                if step == Step::Completed {
                    s.is_generating = false;
                }
            });
            if !applied {
                return AttemptOutcome::Cancelled;
            }
            match step {
                Step::Continue => {}
                Step::Completed => tracing::info!(attempt, "generation completed"),
                Step::Failed(message) => return self.fail(attempt, &mut ctx, message),
            }
        }

        let finished = self.finish(attempt, |s| {
            ctx.drop_placeholder(&mut s.transcript);
            s.is_generating = false;
        });
        if !finished {
            return AttemptOutcome::Cancelled;
        }
        if !ctx.is_completed() {
            tracing::warn!(attempt, "generation stream ended without completion event");
        }
        tracing::debug!(attempt, "generation stream closed");
        AttemptOutcome::Finished
    }
}

async fn next_event<S>(
    events: &mut std::pin::Pin<&mut S>,
    idle_timeout: Option<Duration>,
) -> Option<Result<GenerationEvent, BackendError>>
where
    S: Stream<Item = Result<GenerationEvent, BackendError>>,
{
    match idle_timeout {
        None => events.next().await,
        Some(limit) => match tokio::time::timeout(limit, events.next()).await {
            Ok(next) => next,
            Err(_) => Some(Err(BackendError::Idle(limit.as_secs()))),
        },
    }
}
