//! Multi-entity write flows.
//!
//! Each flow is a chain of independent store writes coordinated by
//! `taskforge-saga`; every storage call is bounded by
//! [`CoreConfig::step_timeout`](crate::config::CoreConfig).

mod invitation;
mod registration;

pub use invitation::{InvitationRejected, InviteMember};
pub use registration::{OrganizationSetup, RegisterOwner, Registration};

use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use taskforge_auth::{AuthzError, PermissionEngine};
use taskforge_core::DomainError;
use taskforge_saga::{ExecutionError, RelationalCreateError, StepTimedOut, with_timeout};

use crate::config::CoreConfig;
use crate::store::{InMemoryStore, StoreError, StoreMembershipLookup, UserRecord};

#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Validation(#[from] DomainError),

    #[error(transparent)]
    Unauthorized(#[from] AuthzError),

    #[error("write flow failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("registration failed: {0}")]
    Registration(#[from] RelationalCreateError<UserRecord>),

    /// A single bounded store call outside any saga.
    #[error("storage call failed: {0:#}")]
    Step(anyhow::Error),

    /// A saga finished but its results were not in the expected shape.
    #[error("inconsistent flow result: {0}")]
    Inconsistent(String),
}

/// First error of type `E` in `err`'s source chain, `err` included.
fn find_in_chain<'a, E>(err: &'a (dyn StdError + 'static)) -> Option<&'a E>
where
    E: StdError + 'static,
{
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(found) = e.downcast_ref::<E>() {
            return Some(found);
        }
        current = e.source();
    }
    None
}

fn store_status(err: &StoreError) -> u16 {
    match err {
        StoreError::Unavailable(_) => 503,
        StoreError::UniqueViolation { .. } | StoreError::Conflict { .. } => 409,
        StoreError::NotFound { .. } => 404,
    }
}

fn cause_status(err: &(dyn StdError + 'static)) -> u16 {
    if let Some(rejected) = find_in_chain::<InvitationRejected>(err) {
        return rejected.status_code();
    }
    if let Some(store) = find_in_chain::<StoreError>(err) {
        return store_status(store);
    }
    if find_in_chain::<StepTimedOut>(err).is_some() {
        return 504;
    }
    500
}

impl FlowError {
    /// Conventional HTTP status for the error.
    pub fn status_code(&self) -> u16 {
        match self {
            FlowError::Validation(DomainError::NotFound { .. }) => 404,
            FlowError::Validation(DomainError::Conflict(_)) => 409,
            FlowError::Validation(_) => 422,
            FlowError::Unauthorized(e) => e.status_code(),
            FlowError::Execution(_) | FlowError::Registration(_) => cause_status(self),
            FlowError::Step(e) => cause_status(e.as_ref()),
            FlowError::Inconsistent(_) => 500,
        }
    }

    /// The storage error at the root of this failure, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            FlowError::Step(e) => find_in_chain(e.as_ref()),
            other => find_in_chain(other),
        }
    }

    pub fn invitation_rejection(&self) -> Option<&InvitationRejected> {
        match self {
            FlowError::Step(e) => find_in_chain(e.as_ref()),
            other => find_in_chain(other),
        }
    }

    pub fn timed_out(&self) -> bool {
        match self {
            FlowError::Step(e) => find_in_chain::<StepTimedOut>(e.as_ref()).is_some(),
            other => find_in_chain::<StepTimedOut>(other).is_some(),
        }
    }
}

/// Entry point for the write flows, sharing one store, one permission engine
/// and one configuration.
#[derive(Debug, Clone)]
pub struct Flows {
    store: Arc<InMemoryStore>,
    engine: PermissionEngine<StoreMembershipLookup>,
    config: CoreConfig,
}

impl Flows {
    pub fn new(store: Arc<InMemoryStore>, config: CoreConfig) -> Self {
        let engine = PermissionEngine::new(StoreMembershipLookup::new(store.clone()));
        Self {
            store,
            engine,
            config,
        }
    }

    pub fn store(&self) -> &Arc<InMemoryStore> {
        &self.store
    }

    pub fn engine(&self) -> &PermissionEngine<StoreMembershipLookup> {
        &self.engine
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Run one store call outside a saga, bounded by the step timeout.
    async fn bounded<T, F>(&self, call: F) -> Result<T, FlowError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        with_timeout(self.config.step_timeout, async { Ok(call.await?) })
            .await
            .map_err(FlowError::Step)
    }
}
