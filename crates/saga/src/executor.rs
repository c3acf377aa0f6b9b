//! Sequential operation executor with reverse-order compensation.
//!
//! The storage driver underneath offers no multi-statement transactions, so
//! "all or nothing" is approximated: steps run one after another, and when
//! one fails the compensations of the steps that already succeeded run in
//! reverse order. This is best-effort compensating execution, not a
//! transaction. A crash between a step succeeding and its compensation
//! running cannot be recovered here.

use std::borrow::Cow;

use thiserror::Error;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::step::{CompletedStep, Compensation, SagaRun, Step};

/// A compensation that itself failed during rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationFailure {
    pub index: usize,
    pub step: Cow<'static, str>,
    pub error: String,
}

/// What happened during the rollback pass of a failed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompensationReport {
    /// Compensations that were invoked (successful or not).
    pub attempted: usize,
    /// Succeeded steps that had no compensation attached.
    pub skipped: usize,
    pub failures: Vec<CompensationFailure>,
}

impl CompensationReport {
    /// True when every attempted compensation succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("saga '{saga}' has no steps")]
    EmptyPlan { saga: String },

    #[error("saga '{saga}' has {compensations} compensation slots for {steps} steps")]
    PlanMismatch {
        saga: String,
        steps: usize,
        compensations: usize,
    },

    /// A forward step failed. `cause` is that step's own error, never a
    /// compensation error.
    #[error("saga '{saga}' failed at step {index} ('{step}'): {cause}")]
    StepFailed {
        saga: String,
        index: usize,
        step: Cow<'static, str>,
        #[source]
        cause: anyhow::Error,
        compensation: CompensationReport,
    },
}

impl ExecutionError {
    /// The original step failure, if this error came from a step.
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            ExecutionError::StepFailed { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Consume the error, returning the original step failure.
    pub fn into_cause(self) -> Option<anyhow::Error> {
        match self {
            ExecutionError::StepFailed { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Index and name of the step that failed.
    pub fn failed_step(&self) -> Option<(usize, &str)> {
        match self {
            ExecutionError::StepFailed { index, step, .. } => Some((*index, step.as_ref())),
            _ => None,
        }
    }

    pub fn compensation(&self) -> Option<&CompensationReport> {
        match self {
            ExecutionError::StepFailed { compensation, .. } => Some(compensation),
            _ => None,
        }
    }
}

/// Runs ordered steps and unwinds succeeded ones on failure.
///
/// Stateless apart from its name: every call to [`run`](Self::run) owns its
/// own [`SagaRun`], so one executor may be shared across concurrent requests.
#[derive(Debug, Clone)]
pub struct SequentialOperationExecutor {
    name: Cow<'static, str>,
}

impl SequentialOperationExecutor {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `steps` in order and return the last step's result.
    ///
    /// `compensations[i]` undoes `steps[i]`; `None` (or a missing trailing
    /// slot) means that step has nothing to undo. Pass an empty vector to
    /// run without compensation.
    pub async fn run<T>(
        &self,
        steps: Vec<Step<T>>,
        compensations: Vec<Option<Compensation<T>>>,
    ) -> Result<T, ExecutionError>
    where
        T: Clone + Send + 'static,
    {
        let mut results = self.run_all(steps, compensations).await?;
        results.pop().ok_or_else(|| ExecutionError::EmptyPlan {
            saga: self.name.to_string(),
        })
    }

    /// Like [`run`](Self::run) but returns every step's result in order.
    pub async fn run_all<T>(
        &self,
        steps: Vec<Step<T>>,
        compensations: Vec<Option<Compensation<T>>>,
    ) -> Result<Vec<T>, ExecutionError>
    where
        T: Clone + Send + 'static,
    {
        if steps.is_empty() {
            return Err(ExecutionError::EmptyPlan {
                saga: self.name.to_string(),
            });
        }
        if compensations.len() > steps.len() {
            return Err(ExecutionError::PlanMismatch {
                saga: self.name.to_string(),
                steps: steps.len(),
                compensations: compensations.len(),
            });
        }

        let span = info_span!("saga", saga = %self.name, steps = steps.len());
        self.execute(steps, compensations).instrument(span).await
    }

    async fn execute<T>(
        &self,
        steps: Vec<Step<T>>,
        compensations: Vec<Option<Compensation<T>>>,
    ) -> Result<Vec<T>, ExecutionError>
    where
        T: Clone + Send + 'static,
    {
        let mut run = SagaRun::new();
        let mut undo_slots = compensations.into_iter();
        // Parallel to `run.completed`: the compensation for each succeeded step.
        let mut armed: Vec<Option<Compensation<T>>> = Vec::new();

        for (index, step) in steps.into_iter().enumerate() {
            let compensation = undo_slots.next().flatten();
            let (name, action) = step.into_parts();

            debug!(index, step = %name, "running step");
            match action(run.results()).await {
                Ok(result) => {
                    run.record(index, name, result);
                    armed.push(compensation);
                }
                Err(cause) => {
                    warn!(index, step = %name, error = %cause, "step failed; compensating");
                    let compensation = compensate(run.into_completed(), armed).await;
                    return Err(ExecutionError::StepFailed {
                        saga: self.name.to_string(),
                        index,
                        step: name,
                        cause,
                        compensation,
                    });
                }
            }
        }

        info!(completed = run.completed().len(), "saga completed");
        Ok(run.results())
    }
}

/// Undo succeeded steps, newest first. Never stops early.
async fn compensate<T>(
    completed: Vec<CompletedStep<T>>,
    armed: Vec<Option<Compensation<T>>>,
) -> CompensationReport
where
    T: Send + 'static,
{
    let mut report = CompensationReport::default();

    for (done, compensation) in completed.into_iter().rev().zip(armed.into_iter().rev()) {
        let Some(compensation) = compensation else {
            report.skipped += 1;
            continue;
        };

        report.attempted += 1;
        debug!(index = done.index, step = %done.name, "compensating step");
        if let Err(err) = compensation.invoke(done.result).await {
            error!(
                index = done.index,
                step = %done.name,
                error = %err,
                "compensation failed; partial state may remain"
            );
            report.failures.push(CompensationFailure {
                index: done.index,
                step: done.name,
                error: format!("{err:#}"),
            });
        }
    }

    report
}

/// Fluent builder pairing each step with its optional compensation.
pub struct Saga<T> {
    executor: SequentialOperationExecutor,
    steps: Vec<Step<T>>,
    compensations: Vec<Option<Compensation<T>>>,
}

impl<T: Clone + Send + 'static> Saga<T> {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            executor: SequentialOperationExecutor::new(name),
            steps: Vec::new(),
            compensations: Vec::new(),
        }
    }

    /// Add a step with nothing to undo.
    pub fn step<F, Fut>(mut self, name: impl Into<Cow<'static, str>>, action: F) -> Self
    where
        F: FnOnce(Vec<T>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.steps.push(Step::new(name, action));
        self.compensations.push(None);
        self
    }

    /// Add a step whose effect `undo` reverses if a later step fails.
    pub fn compensated_step<F, Fut, U, UFut>(
        mut self,
        name: impl Into<Cow<'static, str>>,
        action: F,
        undo: U,
    ) -> Self
    where
        F: FnOnce(Vec<T>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<T>> + Send + 'static,
        U: FnOnce(T) -> UFut + Send + 'static,
        UFut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.steps.push(Step::new(name, action));
        self.compensations.push(Some(Compensation::new(undo)));
        self
    }

    pub async fn run(self) -> Result<T, ExecutionError> {
        self.executor.run(self.steps, self.compensations).await
    }

    pub async fn run_all(self) -> Result<Vec<T>, ExecutionError> {
        self.executor.run_all(self.steps, self.compensations).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, thiserror::Error, PartialEq, Eq)]
    #[error("{0}")]
    struct Boom(&'static str);

    /// Shared journal of everything the steps and compensations did.
    #[derive(Clone, Default)]
    struct Journal(Arc<Mutex<Vec<String>>>);

    impl Journal {
        fn push(&self, entry: impl Into<String>) {
            self.0.lock().unwrap().push(entry.into());
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    fn ok_step(journal: &Journal, name: &'static str, value: i64) -> Step<i64> {
        let journal = journal.clone();
        Step::new(name, move |_| async move {
            journal.push(format!("run {name}"));
            Ok(value)
        })
    }

    fn failing_step(journal: &Journal, name: &'static str) -> Step<i64> {
        let journal = journal.clone();
        Step::new(name, move |_| async move {
            journal.push(format!("run {name}"));
            Err(anyhow::Error::new(Boom("s3 exploded")))
        })
    }

    fn undo(journal: &Journal, name: &'static str) -> Option<Compensation<i64>> {
        let journal = journal.clone();
        Some(Compensation::new(move |result: i64| async move {
            journal.push(format!("undo {name}({result})"));
            Ok(())
        }))
    }

    fn broken_undo(journal: &Journal, name: &'static str) -> Option<Compensation<i64>> {
        let journal = journal.clone();
        Some(Compensation::new(move |_result: i64| async move {
            journal.push(format!("undo {name} failed"));
            Err(anyhow::Error::new(Boom("compensation exploded")))
        }))
    }

    #[tokio::test]
    async fn returns_last_result_on_success() {
        let journal = Journal::default();
        let executor = SequentialOperationExecutor::new("happy");

        let result = executor
            .run(
                vec![ok_step(&journal, "s1", 1), ok_step(&journal, "s2", 2)],
                vec![undo(&journal, "c1"), undo(&journal, "c2")],
            )
            .await
            .unwrap();

        assert_eq!(result, 2);
        assert_eq!(journal.entries(), vec!["run s1", "run s2"]);
    }

    #[tokio::test]
    async fn later_steps_see_earlier_results() {
        let executor = SequentialOperationExecutor::new("chained");
        let results = executor
            .run_all(
                vec![
                    Step::new("seed", |_| async { Ok(10) }),
                    Step::new("double", |done: Vec<i64>| async move { Ok(done[0] * 2) }),
                    Step::new("sum", |done: Vec<i64>| async move { Ok(done.iter().sum()) }),
                ],
                vec![],
            )
            .await
            .unwrap();

        assert_eq!(results, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn compensates_succeeded_steps_in_reverse_and_rethrows_original() {
        let journal = Journal::default();
        let executor = SequentialOperationExecutor::new("three_steps");

        let err = executor
            .run(
                vec![
                    ok_step(&journal, "s1", 1),
                    ok_step(&journal, "s2", 2),
                    failing_step(&journal, "s3"),
                ],
                vec![undo(&journal, "c1"), undo(&journal, "c2"), undo(&journal, "c3")],
            )
            .await
            .unwrap_err();

        assert_eq!(
            journal.entries(),
            vec!["run s1", "run s2", "run s3", "undo c2(2)", "undo c1(1)"]
        );
        assert_eq!(err.failed_step(), Some((2, "s3")));
        assert_eq!(err.cause().unwrap().downcast_ref::<Boom>(), Some(&Boom("s3 exploded")));
        let report = err.compensation().unwrap();
        assert_eq!(report.attempted, 2);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn failing_compensation_does_not_stop_rollback_or_mask_cause() {
        let journal = Journal::default();
        let executor = SequentialOperationExecutor::new("messy_rollback");

        let err = executor
            .run(
                vec![
                    ok_step(&journal, "s1", 1),
                    ok_step(&journal, "s2", 2),
                    failing_step(&journal, "s3"),
                ],
                vec![undo(&journal, "c1"), broken_undo(&journal, "c2"), undo(&journal, "c3")],
            )
            .await
            .unwrap_err();

        assert_eq!(
            journal.entries(),
            vec!["run s1", "run s2", "run s3", "undo c2 failed", "undo c1(1)"]
        );
        assert_eq!(err.cause().unwrap().to_string(), "s3 exploded");

        let report = err.compensation().unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 1);
        assert_eq!(report.failures[0].step, "s2");
        assert!(report.failures[0].error.contains("compensation exploded"));
    }

    #[tokio::test]
    async fn no_step_runs_after_a_failure() {
        let journal = Journal::default();
        let executor = SequentialOperationExecutor::new("stop_early");

        let err = executor
            .run(
                vec![
                    failing_step(&journal, "s1"),
                    ok_step(&journal, "s2", 2),
                ],
                vec![undo(&journal, "c1"), undo(&journal, "c2")],
            )
            .await
            .unwrap_err();

        assert_eq!(journal.entries(), vec!["run s1"]);
        assert_eq!(err.failed_step(), Some((0, "s1")));
        assert_eq!(err.compensation().unwrap().attempted, 0);
    }

    #[tokio::test]
    async fn missing_and_none_slots_are_skipped() {
        let journal = Journal::default();
        let executor = SequentialOperationExecutor::new("sparse");

        let err = executor
            .run(
                vec![
                    ok_step(&journal, "s1", 1),
                    ok_step(&journal, "s2", 2),
                    ok_step(&journal, "s3", 3),
                    failing_step(&journal, "s4"),
                ],
                vec![undo(&journal, "c1"), None],
            )
            .await
            .unwrap_err();

        assert_eq!(
            journal.entries(),
            vec!["run s1", "run s2", "run s3", "run s4", "undo c1(1)"]
        );
        let report = err.compensation().unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn rejects_bad_plans_before_running_anything() {
        let journal = Journal::default();
        let executor = SequentialOperationExecutor::new("bad_plan");

        let empty = executor.run::<i64>(vec![], vec![]).await.unwrap_err();
        assert!(matches!(empty, ExecutionError::EmptyPlan { .. }));

        let mismatch = executor
            .run(
                vec![ok_step(&journal, "s1", 1)],
                vec![undo(&journal, "c1"), undo(&journal, "c2")],
            )
            .await
            .unwrap_err();
        assert!(matches!(
            mismatch,
            ExecutionError::PlanMismatch { steps: 1, compensations: 2, .. }
        ));
        assert!(journal.entries().is_empty());
    }

    #[tokio::test]
    async fn error_source_is_the_step_error() {
        let journal = Journal::default();
        let err = SequentialOperationExecutor::new("sourced")
            .run(vec![failing_step(&journal, "only")], vec![])
            .await
            .unwrap_err();

        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "s3 exploded");
        assert!(err.to_string().contains("step 0 ('only')"));
    }

    #[tokio::test]
    async fn builder_pairs_steps_with_compensations() {
        let journal = Journal::default();
        let (j1, j2, j3) = (journal.clone(), journal.clone(), journal.clone());

        let err = Saga::<i64>::new("built")
            .compensated_step("reserve", |_| async { Ok(5) }, move |v: i64| async move {
                j1.push(format!("release {v}"));
                Ok(())
            })
            .step("notify", move |_| async move {
                j2.push("notify");
                Ok(0)
            })
            .step("charge", move |_| async move {
                j3.push("charge");
                Err::<i64, _>(anyhow::anyhow!("card declined"))
            })
            .run()
            .await
            .unwrap_err();

        assert_eq!(journal.entries(), vec!["notify", "charge", "release 5"]);
        assert_eq!(err.into_cause().unwrap().to_string(), "card declined");
    }

    #[tokio::test]
    async fn concurrent_runs_do_not_share_bookkeeping() {
        let executor = Arc::new(SequentialOperationExecutor::new("shared"));

        let handles: Vec<_> = (0..8i64)
            .map(|n| {
                let executor = executor.clone();
                tokio::spawn(async move {
                    executor
                        .run_all(
                            vec![
                                Step::new("a", move |_| async move { Ok(n) }),
                                Step::new("b", |done: Vec<i64>| async move {
                                    tokio::task::yield_now().await;
                                    Ok(done.len() as i64)
                                }),
                            ],
                            vec![],
                        )
                        .await
                })
            })
            .collect();

        for (n, handle) in handles.into_iter().enumerate() {
            let results = handle.await.unwrap().unwrap();
            assert_eq!(results, vec![n as i64, 1]);
        }
    }
}
