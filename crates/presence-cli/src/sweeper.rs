use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::engine::PresenceEngine;

/// Periodic expire + decay + cleanup pass, owned by whoever started it.
///
/// The first sweep runs immediately. Dropping the scheduler cancels it;
/// `stop` also waits for an in-flight sweep to finish.
pub struct SweepScheduler {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SweepScheduler {
    pub fn start(engine: PresenceEngine, every: Duration) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval_secs = every.as_secs(), "sweep scheduler started");
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = engine.sweep().await;
                        tracing::debug!(?report, "scheduled sweep");
                    }
                }
            }
            tracing::info!("sweep scheduler stopped");
        });
        Self {
            token,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            tracing::warn!("sweep scheduler task failed: {e}");
        }
    }
}

impl Drop for SweepScheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
