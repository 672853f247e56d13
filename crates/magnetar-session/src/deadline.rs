//! Deadline wrapper for transfer engine calls.
//!
//! Every network call into the engine runs under the configured timeout so
//! one unresponsive external call cannot stall the dispatcher, the event
//! listener, or the reconciliation sweep.

use std::future::Future;
use std::time::Duration;

use anyhow::anyhow;
use tokio::time::timeout;

/// Run an engine call under the given deadline; expiry maps to an error.
pub(crate) async fn bounded<T>(
    deadline: Duration,
    call: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    match timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("engine call deadline exceeded")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_calls_map_to_an_error() {
        let hung = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert_eq!(
            hung.expect_err("deadline fires").to_string(),
            "engine call deadline exceeded"
        );

        let prompt = bounded(Duration::from_millis(10), async { Ok(7) }).await;
        assert_eq!(prompt.expect("prompt call passes through"), 7);
    }
}
