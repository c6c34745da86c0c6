//! Polling assertions for asynchronous state.

use std::time::Duration;

/// Polls `condition` every 10ms until it returns true or `timeout`
/// elapses. Returns whether the condition became true.
pub async fn assert_eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
