//! Single-flight refresh of the access/refresh token pair.
//!
//! At most one refresh exchange is in flight per session. Callers arriving
//! while it runs share its outcome instead of issuing their own request,
//! so a burst of expired requests costs exactly one network round trip.
//! A failed exchange ends the session; it is never retried here.
//!
//! The exchange runs on its own task: a caller that is cancelled (e.g. the
//! scheduler tick aborted by logout) never leaves a half-driven flight
//! behind. Flights are tagged with the session generation, and a caller
//! from a newer session never joins a flight of an ended one.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;

use crate::error::RefreshError;
use crate::session::{EndReason, SessionContext};

struct Flight {
    generation: u64,
    outcome: Shared<BoxFuture<'static, Result<(), RefreshError>>>,
}

struct Inner {
    ctx: Arc<SessionContext>,
    in_flight: Mutex<Option<Flight>>,
}

/// Cloneable handle; clones share the same in-flight slot.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("in_flight", &self.is_in_flight())
            .finish()
    }
}

impl RefreshCoordinator {
    pub(crate) fn new(ctx: Arc<SessionContext>) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx,
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Refresh the token pair, joining the exchange already in flight if any.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError::NoCredential`] without touching the network
    /// when no refresh token is stored, or [`RefreshError::Rejected`] when
    /// the exchange fails. Both end the session before returning.
    pub async fn refresh(&self) -> Result<(), RefreshError> {
        let outcome = {
            let mut slot = self.inner.in_flight.lock();
            let generation = self.inner.ctx.generation();
            match slot.as_ref().map(|f| (f.generation, f.outcome.clone())) {
                Some((current, outcome)) if current == generation => {
                    tracing::debug!("Joining in-flight token refresh");
                    outcome
                }
                stale => {
                    if stale.is_some() {
                        tracing::debug!("Abandoning token refresh of an ended session");
                    }
                    let outcome = Inner::spawn(self.inner.clone(), generation);
                    *slot = Some(Flight {
                        generation,
                        outcome: outcome.clone(),
                    });
                    outcome
                }
            }
        };
        outcome.await
    }

    /// Whether an exchange for the current session is running.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        let generation = self.inner.ctx.generation();
        self.inner
            .in_flight
            .lock()
            .as_ref()
            .is_some_and(|f| f.generation == generation)
    }
}

impl Inner {
    fn spawn(
        inner: Arc<Self>,
        generation: u64,
    ) -> Shared<BoxFuture<'static, Result<(), RefreshError>>> {
        let task = tokio::spawn(async move {
            let outcome = inner.exchange(generation).await;
            // Settled: the next caller starts a fresh attempt.
            let mut slot = inner.in_flight.lock();
            if slot.as_ref().is_some_and(|f| f.generation == generation) {
                slot.take();
            }
            outcome
        });

        async move {
            task.await.unwrap_or_else(|e| {
                tracing::error!(error = %e, "Token refresh task failed");
                Err(RefreshError::Rejected(format!("refresh task failed: {e}")))
            })
        }
        .boxed()
        .shared()
    }

    async fn exchange(&self, generation: u64) -> Result<(), RefreshError> {
        let ctx = &self.ctx;
        if ctx.generation() != generation {
            return Err(RefreshError::Rejected("session ended during refresh".into()));
        }

        let Some(refresh_token) = ctx.store.refresh_token() else {
            tracing::warn!("Token refresh requested without a refresh credential");
            ctx.terminate(EndReason::SessionExpired);
            return Err(RefreshError::NoCredential);
        };

        ctx.begin_refresh();

        let failure = match ctx.api.refresh_dyn(&refresh_token).await {
            Ok(pair) => match ctx.commit_refresh(generation, &refresh_token, pair) {
                Ok(true) => {
                    tracing::info!("Access token refreshed");
                    ctx.reset_timer();
                    return Ok(());
                }
                Ok(false) => {
                    return Err(RefreshError::Rejected("session ended during refresh".into()));
                }
                Err(e) => e.to_string(),
            },
            Err(e) => e.to_string(),
        };

        tracing::error!(error = %failure, "Token refresh failed, ending session");
        if ctx.is_current(generation, &refresh_token) {
            ctx.terminate(EndReason::SessionExpired);
        }
        Err(RefreshError::Rejected(failure))
    }
}
