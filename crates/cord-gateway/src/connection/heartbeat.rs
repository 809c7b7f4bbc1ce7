//! Heartbeat task supervision

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument, Span};

const MIN_INTERVAL: Duration = Duration::from_millis(1);
const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// A running heartbeat loop and the token that stops it
pub(crate) struct HeartbeatTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HeartbeatTask {
    /// Run `beat` every `interval`, first tick one interval from now, until
    /// `parent` is cancelled, the task is stopped, or `beat` breaks.
    pub(crate) fn spawn<F, Fut>(
        interval: Duration,
        parent: &CancellationToken,
        span: Span,
        mut beat: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let interval = interval.clamp(MIN_INTERVAL, MAX_INTERVAL);
        let cancel = parent.child_token();
        let token = cancel.clone();

        let handle = tokio::spawn(
            async move {
                let now = Instant::now();
                let mut ticker =
                    time::interval_at(now.checked_add(interval).unwrap_or(now), interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                debug!(interval_ms = interval.as_millis() as u64, "Heartbeat started");

                loop {
                    tokio::select! {
                        biased;
                        () = token.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    let flow = tokio::select! {
                        biased;
                        () = token.cancelled() => break,
                        flow = beat() => flow,
                    };
                    if flow.is_break() {
                        break;
                    }
                }

                debug!("Heartbeat stopped");
            }
            .instrument(span),
        );

        Self { cancel, handle }
    }

    /// Cancel the loop and wait for it to exit
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                warn!("Heartbeat task panicked");
            }
        }
    }
}
