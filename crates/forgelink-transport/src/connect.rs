use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::stream::PipeStream;

/// Pause between attempts while the worker has not created its endpoint yet.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Connect to the endpoint once.
pub async fn connect(endpoint: &Endpoint) -> Result<PipeStream> {
    #[cfg(unix)]
    {
        crate::uds::connect(endpoint).await
    }
    #[cfg(windows)]
    {
        crate::named_pipe::connect(endpoint).await
    }
}

/// Connect to the endpoint, retrying until it appears or `timeout` elapses.
///
/// Only "not there yet" failures are retried; anything else is returned at
/// once. The overall deadline also bounds a single hanging attempt.
pub async fn connect_with_timeout(
    endpoint: &Endpoint,
    timeout: Duration,
    retry_interval: Duration,
) -> Result<PipeStream> {
    let deadline = Instant::now() + timeout;
    let timed_out = || TransportError::Timeout {
        address: endpoint.address(),
        timeout,
    };

    let mut attempts = 0u32;
    loop {
        attempts = attempts.saturating_add(1);
        let attempt = tokio::time::timeout_at(deadline, connect(endpoint)).await;
        match attempt {
            Ok(Ok(stream)) => {
                debug!(endpoint = endpoint.name(), attempts, "endpoint connected");
                return Ok(stream);
            }
            Ok(Err(err)) if err.is_retryable() => {
                trace!(endpoint = endpoint.name(), attempts, error = %err, "endpoint not ready");
            }
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(timed_out()),
        }

        if Instant::now() + retry_interval >= deadline {
            tokio::time::sleep_until(deadline).await;
            return Err(timed_out());
        }
        tokio::time::sleep(retry_interval).await;
    }
}
