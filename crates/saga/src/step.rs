use std::borrow::Cow;
use std::future::Future;

use futures::FutureExt;
use futures::future::BoxFuture;

type ForwardFn<T> = Box<dyn FnOnce(Vec<T>) -> BoxFuture<'static, anyhow::Result<T>> + Send>;
type UndoFn<T> = Box<dyn FnOnce(T) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// One forward action in a saga.
///
/// The action receives the results of every step that already succeeded, in
/// order, so a later step can use ids produced by earlier ones. Whether the
/// action is idempotent is the caller's business.
pub struct Step<T> {
    name: Cow<'static, str>,
    action: ForwardFn<T>,
}

impl<T: Send + 'static> Step<T> {
    pub fn new<F, Fut>(name: impl Into<Cow<'static, str>>, action: F) -> Self
    where
        F: FnOnce(Vec<T>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Box::new(move |done| action(done).boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> (Cow<'static, str>, ForwardFn<T>) {
        (self.name, self.action)
    }
}

impl<T> core::fmt::Debug for Step<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Undo action for one step, called with that step's result.
pub struct Compensation<T> {
    action: UndoFn<T>,
}

impl<T: Send + 'static> Compensation<T> {
    pub fn new<F, Fut>(action: F) -> Self
    where
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            action: Box::new(move |result| action(result).boxed()),
        }
    }

    pub(crate) async fn invoke(self, result: T) -> anyhow::Result<()> {
        (self.action)(result).await
    }
}

impl<T> core::fmt::Debug for Compensation<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Compensation").finish_non_exhaustive()
    }
}

/// A step that finished, as recorded in a [`SagaRun`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedStep<T> {
    pub index: usize,
    pub name: Cow<'static, str>,
    pub result: T,
}

/// Bookkeeping for a single executor invocation.
///
/// Created when a run starts and dropped when it returns. It is never shared
/// between runs and never persisted, so a crash mid-run leaves only whatever
/// compensations had already finished.
#[derive(Debug)]
pub struct SagaRun<T> {
    completed: Vec<CompletedStep<T>>,
}

impl<T: Clone> SagaRun<T> {
    pub(crate) fn new() -> Self {
        Self {
            completed: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, index: usize, name: Cow<'static, str>, result: T) {
        self.completed.push(CompletedStep {
            index,
            name,
            result,
        });
    }

    /// Owned snapshot of the results so far, in completion order.
    pub fn results(&self) -> Vec<T> {
        self.completed.iter().map(|c| c.result.clone()).collect()
    }

    pub fn completed(&self) -> &[CompletedStep<T>] {
        &self.completed
    }

    pub(crate) fn into_completed(self) -> Vec<CompletedStep<T>> {
        self.completed
    }
}
