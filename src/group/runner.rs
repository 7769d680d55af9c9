//! # Run a single invocation of user code.
//!
//! Both group tasks and periodic callbacks go through [`run_guarded`], which
//! bounds the invocation by an optional deadline and converts panics into
//! [`TaskError::Fatal`] so the scheduler never unwinds.
//!
//! ## Rules
//! - A deadline of `None` or zero means "no deadline".
//! - Deadline expiry drops the invocation future and yields [`TaskError::Timeout`].
//! - Cancellation is **not** handled here; callers race this future against
//!   their own cancellation token.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::time;

use crate::error::TaskError;

/// Executes `fut` once, with optional deadline and panic isolation.
pub(crate) async fn run_guarded<T, Fut>(fut: Fut, deadline: Option<Duration>) -> Result<T, TaskError>
where
    Fut: Future<Output = Result<T, TaskError>>,
{
    let guarded = AssertUnwindSafe(fut).catch_unwind();

    let res = match deadline.filter(|d| *d > Duration::ZERO) {
        Some(dur) => match time::timeout(dur, guarded).await {
            Ok(r) => r,
            Err(_elapsed) => return Err(TaskError::Timeout { timeout: dur }),
        },
        None => guarded.await,
    };

    res.unwrap_or_else(|panic| {
        Err(TaskError::Fatal {
            error: panic_message(panic.as_ref()),
        })
    })
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ok_passes_through() {
        let r = run_guarded(async { Ok::<_, TaskError>(7) }, None).await;
        assert_eq!(r.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_panic_becomes_fatal() {
        let broken = true;
        let r = run_guarded(
            async move {
                if broken {
                    panic!("lens cap on");
                }
                Ok::<(), TaskError>(())
            },
            None,
        )
        .await;
        match r {
            Err(TaskError::Fatal { error }) => assert!(error.contains("lens cap on")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_is_timeout() {
        let r: Result<(), TaskError> = run_guarded(
            async {
                time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            Some(Duration::from_millis(100)),
        )
        .await;
        assert!(matches!(r, Err(TaskError::Timeout { timeout }) if timeout == Duration::from_millis(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_deadline_is_unbounded() {
        let r = run_guarded(
            async {
                time::sleep(Duration::from_secs(5)).await;
                Ok::<_, TaskError>(())
            },
            Some(Duration::ZERO),
        )
        .await;
        assert!(r.is_ok());
    }
}
