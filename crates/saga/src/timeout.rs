//! Caller-side bound for a single step.
//!
//! The executor never times anything out on its own: a hanging step hangs
//! the saga. Wrap the step's future here to turn a stall into an ordinary
//! step failure, which then triggers compensation like any other error.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("step did not finish within {limit:?}")]
pub struct StepTimedOut {
    pub limit: Duration,
}

/// Await `fut`, failing with [`StepTimedOut`] after `limit`.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::Error::new(StepTimedOut { limit })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SequentialOperationExecutor, Step};

    #[tokio::test]
    async fn passes_through_fast_results() {
        let value = with_timeout(Duration::from_secs(1), async { Ok::<_, anyhow::Error>(3) })
            .await
            .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_step_becomes_step_failure() {
        let limit = Duration::from_millis(50);
        let err = SequentialOperationExecutor::new("stalled")
            .run(
                vec![
                    Step::new("fast", |_| async { Ok(1u8) }),
                    Step::new("stuck", move |_| {
                        with_timeout(limit, async {
                            std::future::pending::<()>().await;
                            Ok(2u8)
                        })
                    }),
                ],
                vec![],
            )
            .await
            .unwrap_err();

        assert_eq!(err.failed_step(), Some((1, "stuck")));
        assert_eq!(
            err.cause().unwrap().downcast_ref::<StepTimedOut>(),
            Some(&StepTimedOut { limit })
        );
    }
}
