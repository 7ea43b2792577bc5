//! Async operation tracking
//!
//! A [`PendingOperation`] pairs the panel's immediate acknowledgement with a
//! lazily polled completion. The first [`PendingOperation::wait`] drives the
//! poll loop; every later or concurrent caller gets the same memoized
//! outcome without touching the panel again.

use crate::wait::{WaitConfig, WaitError, poll_until};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

type ProbeFn<C> = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<Option<C>>> + Send + Sync>;

struct Completion<C> {
    label: String,
    config: WaitConfig,
    probe: Option<ProbeFn<C>>,
    outcome: OnceCell<Result<C, WaitError>>,
}

/// An issued remote operation whose completion is observed by polling.
pub struct PendingOperation<I, C> {
    response: I,
    completion: Arc<Completion<C>>,
}

impl<I: Clone, C> Clone for PendingOperation<I, C> {
    fn clone(&self) -> Self {
        Self {
            response: self.response.clone(),
            completion: Arc::clone(&self.completion),
        }
    }
}

impl<I, C> std::fmt::Debug for PendingOperation<I, C>
where
    I: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOperation")
            .field("label", &self.completion.label)
            .field("response", &self.response)
            .field("settled", &self.completion.outcome.initialized())
            .finish()
    }
}

impl<I, C> PendingOperation<I, C>
where
    C: Clone + Send + Sync + 'static,
{
    /// Run `action` now and arm a completion check for later.
    ///
    /// Errors from `action` are returned here; nothing is polled for them.
    /// `predicate` returns `Ok(true)` when the probed state is terminal,
    /// `Ok(false)` to keep polling and `Err` for a business failure.
    pub async fn issue<A, AF, P, PF, Pred>(
        label: impl Into<String>,
        config: WaitConfig,
        action: A,
        probe: P,
        predicate: Pred,
    ) -> anyhow::Result<Self>
    where
        A: FnOnce() -> AF,
        AF: Future<Output = anyhow::Result<I>>,
        P: Fn() -> PF + Send + Sync + 'static,
        PF: Future<Output = anyhow::Result<C>> + Send + 'static,
        Pred: Fn(&C) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        let response = action().await?;

        let predicate = Arc::new(predicate);
        let probe: ProbeFn<C> = Box::new(move || {
            let state = probe();
            let predicate = Arc::clone(&predicate);
            Box::pin(async move {
                let state = state.await?;
                Ok(predicate(&state)?.then_some(state))
            })
        });

        Ok(Self {
            response,
            completion: Arc::new(Completion {
                label: label.into(),
                config,
                probe: Some(probe),
                outcome: OnceCell::new(),
            }),
        })
    }

    /// An operation that completed synchronously.
    pub fn ready(label: impl Into<String>, response: I, completion: C) -> Self {
        Self {
            response,
            completion: Arc::new(Completion {
                label: label.into(),
                config: WaitConfig::default(),
                probe: None,
                outcome: OnceCell::new_with(Some(Ok(completion))),
            }),
        }
    }

    /// The immediate acknowledgement returned by the action.
    pub fn response(&self) -> &I {
        &self.response
    }

    pub fn label(&self) -> &str {
        &self.completion.label
    }

    /// Whether a terminal outcome has been recorded.
    pub fn is_settled(&self) -> bool {
        self.completion.outcome.initialized()
    }

    /// Await the terminal outcome, polling on the first call only.
    pub async fn wait(&self) -> Result<C, WaitError> {
        let completion = &self.completion;
        completion
            .outcome
            .get_or_init(|| async {
                match &completion.probe {
                    Some(probe) => poll_until(&completion.config, &completion.label, probe).await,
                    None => Err(WaitError::Failed {
                        resource: completion.label.clone(),
                        message: "operation has no completion probe".to_string(),
                    }),
                }
            })
            .await
            .clone()
    }
}
