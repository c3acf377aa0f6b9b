//! Two-phase "create parent, then children that reference it".
//!
//! State machine for one call:
//!
//! ```text
//! NotStarted -> MainCreated -> Complete
//!                          \-> MainCreatedRelatedFailed
//! ```
//!
//! If the related phase fails, the main entity stays persisted unless the
//! caller opted into [`RelationalCreateOrchestrator::create_with_relations_or_rollback`].
//! There is no silent cleanup.

use std::borrow::Cow;
use std::fmt::Debug;
use std::future::{Future, Ready};

use thiserror::Error;
use tracing::{Instrument, debug, error, info_span, warn};

/// Progress of a single orchestrated call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatePhase {
    NotStarted,
    MainCreated,
    Complete,
    MainCreatedRelatedFailed,
}

/// Both halves of a successful relational create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Related<M, R> {
    pub main: M,
    pub related: R,
}

/// Whether the main entity was cleaned up after the related phase failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// No rollback was supplied; the main entity is an orphan.
    NotConfigured,
    RolledBack,
    /// The rollback ran and failed; the main entity is probably still there.
    RollbackFailed(String),
}

#[derive(Debug, Error)]
pub enum RelationalCreateError<M: Debug> {
    /// Nothing was created.
    #[error("'{operation}': creating the main entity failed: {cause}")]
    MainFailed {
        operation: String,
        #[source]
        cause: anyhow::Error,
    },

    /// The main entity was created; `main` is what `create_main` returned.
    #[error("'{operation}': creating related entities failed after the main entity was created: {cause}")]
    RelatedFailed {
        operation: String,
        main: M,
        #[source]
        cause: anyhow::Error,
        rollback: RollbackOutcome,
    },
}

impl<M: Debug> RelationalCreateError<M> {
    pub fn cause(&self) -> &anyhow::Error {
        match self {
            RelationalCreateError::MainFailed { cause, .. }
            | RelationalCreateError::RelatedFailed { cause, .. } => cause,
        }
    }

    pub fn into_cause(self) -> anyhow::Error {
        match self {
            RelationalCreateError::MainFailed { cause, .. }
            | RelationalCreateError::RelatedFailed { cause, .. } => cause,
        }
    }

    /// Terminal phase the call stopped in.
    pub fn phase(&self) -> CreatePhase {
        match self {
            RelationalCreateError::MainFailed { .. } => CreatePhase::NotStarted,
            RelationalCreateError::RelatedFailed { .. } => CreatePhase::MainCreatedRelatedFailed,
        }
    }

    /// The persisted main entity, if the failure happened after it was created.
    pub fn main(&self) -> Option<&M> {
        match self {
            RelationalCreateError::RelatedFailed { main, .. } => Some(main),
            RelationalCreateError::MainFailed { .. } => None,
        }
    }

    /// True when a main entity was left behind without cleanup.
    pub fn is_orphan(&self) -> bool {
        matches!(
            self,
            RelationalCreateError::RelatedFailed { rollback, .. }
                if *rollback != RollbackOutcome::RolledBack
        )
    }
}

type NoRollback<M> = fn(M) -> Ready<anyhow::Result<()>>;

/// Runs the create-main / create-related pair for one named operation.
#[derive(Debug, Clone)]
pub struct RelationalCreateOrchestrator {
    operation: Cow<'static, str>,
}

impl RelationalCreateOrchestrator {
    pub fn new(operation: impl Into<Cow<'static, str>>) -> Self {
        Self {
            operation: operation.into(),
        }
    }

    /// Create the main entity, then the related one.
    ///
    /// If `create_related` fails the main entity is **not** removed; the
    /// error carries it so the caller can decide what to do.
    pub async fn create_with_relations<M, R, FM, FutM, FR, FutR>(
        &self,
        create_main: FM,
        create_related: FR,
    ) -> Result<Related<M, R>, RelationalCreateError<M>>
    where
        M: Clone + Debug,
        FM: FnOnce() -> FutM,
        FutM: Future<Output = anyhow::Result<M>>,
        FR: FnOnce(M) -> FutR,
        FutR: Future<Output = anyhow::Result<R>>,
    {
        self.orchestrate(create_main, create_related, None::<NoRollback<M>>)
            .await
    }

    /// Same as [`create_with_relations`](Self::create_with_relations), but
    /// runs `rollback_main` on the main entity if the related phase fails.
    ///
    /// A failing rollback is logged and reported in the error; the related
    /// failure is still the cause surfaced.
    pub async fn create_with_relations_or_rollback<M, R, FM, FutM, FR, FutR, FB, FutB>(
        &self,
        create_main: FM,
        create_related: FR,
        rollback_main: FB,
    ) -> Result<Related<M, R>, RelationalCreateError<M>>
    where
        M: Clone + Debug,
        FM: FnOnce() -> FutM,
        FutM: Future<Output = anyhow::Result<M>>,
        FR: FnOnce(M) -> FutR,
        FutR: Future<Output = anyhow::Result<R>>,
        FB: FnOnce(M) -> FutB,
        FutB: Future<Output = anyhow::Result<()>>,
    {
        self.orchestrate(create_main, create_related, Some(rollback_main))
            .await
    }

    async fn orchestrate<M, R, FM, FutM, FR, FutR, FB, FutB>(
        &self,
        create_main: FM,
        create_related: FR,
        rollback_main: Option<FB>,
    ) -> Result<Related<M, R>, RelationalCreateError<M>>
    where
        M: Clone + Debug,
        FM: FnOnce() -> FutM,
        FutM: Future<Output = anyhow::Result<M>>,
        FR: FnOnce(M) -> FutR,
        FutR: Future<Output = anyhow::Result<R>>,
        FB: FnOnce(M) -> FutB,
        FutB: Future<Output = anyhow::Result<()>>,
    {
        let span = info_span!("relational_create", operation = %self.operation);
        async move {
            let mut phase = CreatePhase::NotStarted;

            let main = match create_main().await {
                Ok(main) => main,
                Err(cause) => {
                    warn!(?phase, error = %cause, "main entity creation failed");
                    return Err(RelationalCreateError::MainFailed {
                        operation: self.operation.to_string(),
                        cause,
                    });
                }
            };
            phase = CreatePhase::MainCreated;
            debug!(?phase, ?main, "main entity created");

            match create_related(main.clone()).await {
                Ok(related) => {
                    phase = CreatePhase::Complete;
                    debug!(?phase, "related entities created");
                    Ok(Related { main, related })
                }
                Err(cause) => {
                    phase = CreatePhase::MainCreatedRelatedFailed;
                    let rollback = match rollback_main {
                        None => {
                            warn!(
                                ?phase,
                                ?main,
                                error = %cause,
                                "related creation failed; main entity left in place"
                            );
                            RollbackOutcome::NotConfigured
                        }
                        Some(rollback) => match rollback(main.clone()).await {
                            Ok(()) => {
                                warn!(?phase, ?main, error = %cause, "related creation failed; main entity rolled back");
                                RollbackOutcome::RolledBack
                            }
                            Err(rollback_err) => {
                                error!(
                                    ?phase,
                                    ?main,
                                    error = %cause,
                                    rollback_error = %rollback_err,
                                    "related creation failed and main entity rollback failed"
                                );
                                RollbackOutcome::RollbackFailed(format!("{rollback_err:#}"))
                            }
                        },
                    };

                    Err(RelationalCreateError::RelatedFailed {
                        operation: self.operation.to_string(),
                        main,
                        cause,
                        rollback,
                    })
                }
            }
        }
        .instrument(span)
        .await
    }
}
