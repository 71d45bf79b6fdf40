//! Service-specific tests
//!
//! Process controller tests spawn real `/bin/sh` children and are unix-only.


/// Common test utilities for services
pub mod common {
    use std::future::Future;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Upper bound for operations expected to finish promptly
    pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Run an async operation, panicking if it outlives `TEST_TIMEOUT`
    pub async fn with_timeout<T, F>(future: F) -> T
    where
        F: Future<Output = T>,
    {
        timeout(TEST_TIMEOUT, future)
            .await
            .expect("operation did not complete within the test timeout")
    }
}
