use {
    crate::fetch::FetchError,
    serde::Deserialize,
    std::{future::Future, time::Duration},
    tokio::time::sleep,
    tracing::warn,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: usize,
    #[serde(with = "humantime_serde")]
    pub period: Duration,
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self {
            attempts: 3,
            period: Duration::from_millis(500),
        }
    }
}

/// Retries the fetch while the store reports transient errors.
#[inline]
pub async fn ok_or_retry<T, F, Fut>(policy: RetryPolicy, mut f: F) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt: usize = 0;
    loop {
        attempt = attempt.saturating_add(1);
        let err = match f().await {
            Ok(x) => break Ok(x),
            Err(err) => err,
        };
        if !err.kind.is_transient() || attempt >= policy.attempts {
            break Err(err);
        }
        warn!(error = %err, attempt, "fetch failed, will retry");
        sleep(policy.period).await;
    }
}
