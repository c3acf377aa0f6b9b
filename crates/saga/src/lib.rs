//! `taskforge-saga`: ordered multi-write execution with compensation.
//!
//! Stands in for database transactions on a driver that has none:
//! - [`SequentialOperationExecutor`] runs dependent steps in order and, on
//!   failure, undoes succeeded ones newest-first
//! - [`RelationalCreateOrchestrator`] covers the common "parent then children"
//!   shape and leaves rollback of the parent to the caller
//!
//! Neither is a transaction. Both are best-effort: a crash mid-run leaves
//! whatever had been written.

pub mod executor;
pub mod relational;
pub mod step;
pub mod timeout;

pub use executor::{
    CompensationFailure, CompensationReport, ExecutionError, Saga, SequentialOperationExecutor,
};
pub use relational::{
    CreatePhase, Related, RelationalCreateError, RelationalCreateOrchestrator, RollbackOutcome,
};
pub use step::{CompletedStep, Compensation, SagaRun, Step};
pub use timeout::{StepTimedOut, with_timeout};
