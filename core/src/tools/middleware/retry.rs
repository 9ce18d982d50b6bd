//! Retry with exponential back-off. Only errors the predicate deems
//! transient are retried; back-off sleeps are jittered and cancellable, so
//! a stopping session never waits out a delay schedule.

use std::sync::Arc;

use rand::Rng;

use crate::config::RetryConfig;
use crate::error::StewardErr;
use crate::tools::ExecutionContext;
use crate::tools::Executor;
use crate::tools::MiddlewareFn;

pub type RetryPredicate = Arc<dyn Fn(&StewardErr) -> bool + Send + Sync>;

pub fn middleware(config: RetryConfig, predicate: Option<RetryPredicate>) -> MiddlewareFn {
    let predicate = predicate.unwrap_or_else(|| Arc::new(StewardErr::is_transient));
    Arc::new(move |next: Executor| {
        let config = config.clone();
        let predicate = Arc::clone(&predicate);
        Arc::new(move |ctx: ExecutionContext| {
            let next = Arc::clone(&next);
            let config = config.clone();
            let predicate = Arc::clone(&predicate);
            Box::pin(async move {
                loop {
                    let attempt = ctx.attempt();
                    match next(ctx.clone()).await {
                        Ok(result) => return Ok(result),
                        Err(err) => {
                            if attempt >= config.max_attempts || !predicate(&err) {
                                if attempt > 1 {
                                    return Err(StewardErr::RetryLimit {
                                        attempts: attempt,
                                        last: err.to_string(),
                                    });
                                }
                                return Err(err);
                            }
                            let delay = backoff_delay(&config, attempt);
                            tracing::debug!(
                                tool = %ctx.tool_name,
                                attempt,
                                ?delay,
                                error = %err,
                                "transient tool error, backing off"
                            );
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = ctx.cancel.cancelled() => return Err(StewardErr::Cancelled),
                            }
                            ctx.bump_attempt();
                        }
                    }
                }
            })
        })
    })
}

/// `initial * multiplier^(attempt-1)`, capped, then jittered uniformly in
/// `[base·(1-j), base·(1+j)]`.
fn backoff_delay(config: &RetryConfig, attempt: u32) -> std::time::Duration {
    let base = config.initial_delay.as_secs_f64() * config.multiplier.powi(attempt as i32 - 1);
    let base = base.min(config.max_delay.as_secs_f64());
    let jittered = if config.jitter > 0.0 {
        let low = base * (1.0 - config.jitter);
        let high = base * (1.0 + config.jitter);
        rand::rng().random_range(low..=high)
    } else {
        base
    };
    std::time::Duration::from_secs_f64(jittered.max(0.0))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use std::time::Instant;

    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::tools::Tool;
    use crate::tools::compose;
    use async_trait::async_trait;
    use steward_protocol::ToolResult;

    struct NullTool;

    #[async_trait]
    impl Tool for NullTool {
        fn name(&self) -> &str {
            "null"
        }
        fn description(&self) -> &str {
            ""
        }
        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _params: serde_json::Value) -> ToolResult {
            ToolResult::ok()
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(
            CancellationToken::new(),
            Arc::new(NullTool),
            None,
            "c1".to_string(),
            json!({}),
        )
    }

    fn flaky_executor(fail_times: u32) -> Executor {
        let failures = Arc::new(AtomicU32::new(fail_times));
        Arc::new(move |ctx: ExecutionContext| {
            let failures = Arc::clone(&failures);
            Box::pin(async move {
                if failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    n.checked_sub(1)
                }).is_ok()
                {
                    return Err(StewardErr::Transient("socket timeout".to_string()));
                }
                Ok(ToolResult::ok().with_data("attempt", json!(ctx.attempt())))
            })
        })
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            multiplier: 1.0,
            max_delay: Duration::from_millis(1),
            jitter: 0.0,
        }
    }

    #[tokio::test]
    async fn two_timeouts_then_success_lands_on_attempt_three() {
        let chain = [middleware(fast_config(3), None)];
        let executor = compose(flaky_executor(2), &chain);
        let result = executor(ctx()).await.expect("should succeed");
        assert_eq!(result.data["attempt"], json!(3));
    }

    #[tokio::test]
    async fn exhausted_attempts_surface_retry_limit() {
        let chain = [middleware(fast_config(2), None)];
        let executor = compose(flaky_executor(5), &chain);
        let err = executor(ctx()).await.expect_err("must fail");
        assert!(matches!(err, StewardErr::RetryLimit { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let chain = [middleware(fast_config(5), None)];
        let executor = compose(
            Arc::new(|_ctx: ExecutionContext| {
                Box::pin(async move {
                    Err(StewardErr::Model("bad request".to_string()))
                })
            }),
            &chain,
        );
        let err = executor(ctx()).await.expect_err("must fail");
        assert!(matches!(err, StewardErr::Model(_)));
    }

    #[tokio::test]
    async fn backoff_sleep_is_interrupted_by_cancellation() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_secs(30),
            multiplier: 1.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
        };
        let chain = [middleware(config, None)];
        let executor = compose(flaky_executor(5), &chain);
        let ctx = ctx();
        let cancelled_at: Arc<std::sync::Mutex<Option<Instant>>> =
            Arc::new(std::sync::Mutex::new(None));
        let marker = Arc::clone(&cancelled_at);
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if let Ok(mut guard) = marker.lock() {
                *guard = Some(Instant::now());
            }
            cancel.cancel();
        });
        let err = executor(ctx).await.expect_err("must cancel");
        assert!(matches!(err, StewardErr::Cancelled));
        // Must bail out of the 30s sleep within 50ms of cancellation.
        let cancelled_at = cancelled_at
            .lock()
            .expect("lock")
            .expect("cancellation fired");
        let lag = cancelled_at.elapsed();
        assert!(lag < Duration::from_millis(50), "cancellation lag {lag:?}");
    }

    #[test]
    fn delay_grows_and_caps() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(300),
            jitter: 0.0,
        };
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&config, 3), Duration::from_millis(300));
        assert_eq!(backoff_delay(&config, 4), Duration::from_millis(300));
    }
}
