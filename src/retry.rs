use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Policy;

pub fn new_backoff() -> ExponentialBuilder {
    ExponentialBuilder::new()
        .with_jitter()
        .with_min_delay(Duration::from_millis(500))
        .with_max_delay(Duration::from_secs(10))
}

/// Backoff for foreground host sessions (uploads, downloads, repairs).
pub fn new_backoff_session(policy: &Policy) -> ExponentialBuilder {
    new_backoff()
        .with_min_delay(Duration::from_millis(policy.retry_min_delay_ms))
        .with_max_times(policy.retry_max_times)
}

pub fn notify<E: std::fmt::Debug>(action: &str) -> impl FnMut(&E, Duration) {
    move |e, d| {
        warn!("Retrying {} due to {:?} after {:?}", action, e, d);
    }
}

pub fn retryable<E>(
    cancel_token: CancellationToken,
    mut transient: impl FnMut(&E) -> bool,
) -> impl FnMut(&E) -> bool {
    move |e| !cancel_token.is_cancelled() && transient(e)
}

pub async fn retry<T, E, F, Fut>(
    operation: F,
    action: &str,
    backoff: ExponentialBuilder,
    cancel_token: CancellationToken,
    transient: impl FnMut(&E) -> bool,
) -> Result<T, E>
where
    E: std::fmt::Debug,
    Fut: Future<Output = Result<T, E>>,
    F: FnMut() -> Fut,
{
    operation
        .retry(backoff)
        .notify(notify(action))
        .when(retryable(cancel_token, transient))
        .await
}
