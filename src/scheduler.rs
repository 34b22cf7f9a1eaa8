//! Background timer that refreshes the token pair ahead of expiry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};

use crate::refresh::RefreshCoordinator;
use crate::session::{SessionContext, TimerHandle};

/// Periodically drives the [`RefreshCoordinator`] while a session is active.
///
/// `start` is idempotent: a second call replaces the running timer rather
/// than adding one. The timer is cancelled synchronously by `stop` and by
/// every session teardown.
#[derive(Clone)]
pub struct RefreshScheduler {
    ctx: Arc<SessionContext>,
    coordinator: RefreshCoordinator,
}

impl std::fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("interval", &self.ctx.config.refresh_interval)
            .field("running", &self.is_running())
            .finish()
    }
}

impl RefreshScheduler {
    pub(crate) fn new(ctx: Arc<SessionContext>, coordinator: RefreshCoordinator) -> Self {
        Self { ctx, coordinator }
    }

    /// Start (or restart) the timer. Requires a Tokio runtime; outside one
    /// the call is logged and ignored.
    pub fn start(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No Tokio runtime, preemptive refresh disabled");
            return;
        };

        let period = self.ctx.config.refresh_interval;
        let reset = Arc::new(Notify::new());
        let task = runtime.spawn(tick_loop(
            self.ctx.clone(),
            self.coordinator.clone(),
            period,
            reset.clone(),
        ));

        self.ctx.install_timer(TimerHandle {
            task: task.abort_handle(),
            reset,
        });
        tracing::debug!(interval_secs = period.as_secs(), "Preemptive refresh started");
    }

    pub fn stop(&self) {
        self.ctx.stop_timer();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.ctx.timer_running()
    }
}

async fn tick_loop(
    ctx: Arc<SessionContext>,
    coordinator: RefreshCoordinator,
    period: Duration,
    reset: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = reset.notified() => {
                ticker.reset();
                continue;
            }
        }

        if !ctx.store.authenticated() {
            continue;
        }

        // Failures already tear the session down (and abort this task).
        if let Err(e) = coordinator.refresh().await {
            tracing::warn!(error = %e, "Preemptive token refresh failed");
        }
    }
}
