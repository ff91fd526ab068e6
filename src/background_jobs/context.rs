use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Context provided to a job for one run.
#[derive(Clone)]
pub struct JobContext {
    /// Cancelled when the process shuts down.
    pub cancellation_token: CancellationToken,

    /// What started this run: `"schedule"` or `"manual"`.
    pub triggered_by: &'static str,
}

impl JobContext {
    pub fn new(cancellation_token: CancellationToken, triggered_by: &'static str) -> Self {
        Self {
            cancellation_token,
            triggered_by,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Sleep for `duration`, returning early (with `false`) on cancellation.
    pub async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancellation_token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
