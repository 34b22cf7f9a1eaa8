use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::AbortHandle;

use super::lifecycle::SessionState;
use super::navigator::{EndReason, Navigator, sign_in_location};
use crate::api::SessionApiDyn;
use crate::config::SessionConfig;
use crate::error::Error;
use crate::events::{EventBus, Topic};
use crate::store::{SessionPatch, SessionStore};
use crate::types::{Identity, LoginResponse, RefreshToken, TokenPair};

/// Running preemptive-refresh task.
pub(crate) struct TimerHandle {
    pub(crate) task: AbortHandle,
    pub(crate) reset: Arc<Notify>,
}

/// Everything one session instance shares between the facade, the
/// refresh coordinator, the scheduler and the interceptor chain.
///
/// Lock order: `state` before the store's internal lock. Neither is held
/// while publishing events or awaiting.
///
/// `generation` identifies one login attempt or session. It only changes
/// under the `state` lock, when a session or a pending login is ended, so
/// work started for an older generation can recognize itself as stale.
pub(crate) struct SessionContext {
    pub(crate) config: SessionConfig,
    pub(crate) store: SessionStore,
    pub(crate) events: EventBus,
    pub(crate) api: Arc<dyn SessionApiDyn>,
    navigator: Arc<dyn Navigator>,
    state: Mutex<SessionState>,
    generation: AtomicU64,
    timer: Mutex<Option<TimerHandle>>,
}

impl SessionContext {
    pub(crate) fn new(
        config: SessionConfig,
        store: SessionStore,
        events: EventBus,
        api: Arc<dyn SessionApiDyn>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let state = if store.authenticated() {
            SessionState::Authenticated
        } else {
            SessionState::LoggedOut
        };
        Self {
            config,
            store,
            events,
            api,
            navigator,
            state: Mutex::new(state),
            generation: AtomicU64::new(0),
            timer: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn advance_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Move along a lifecycle edge.
    pub(crate) fn transition(&self, next: SessionState) -> Result<SessionState, Error> {
        let mut state = self.state.lock();
        Self::step(&mut state, next)
    }

    fn step(state: &mut SessionState, next: SessionState) -> Result<SessionState, Error> {
        let prev = *state;
        if !prev.can_transition(next) {
            return Err(Error::InvalidState(format!("{prev:?} -> {next:?}")));
        }
        *state = next;
        tracing::debug!(from = ?prev, to = ?next, "Session state changed");
        Ok(prev)
    }

    /// `LoggedOut → Authenticating`; returns the generation of the attempt.
    pub(crate) fn begin_login(&self) -> Result<u64, Error> {
        let mut state = self.state.lock();
        Self::step(&mut state, SessionState::Authenticating)?;
        Ok(self.generation())
    }

    /// Back to `LoggedOut` after a failed login, unless the attempt was
    /// already cancelled (and possibly superseded by a newer one).
    pub(crate) fn abort_login(&self, generation: u64) {
        let mut state = self.state.lock();
        if *state == SessionState::Authenticating && self.generation() == generation {
            let _ = Self::step(&mut state, SessionState::LoggedOut);
        }
    }

    /// Cancel a pending login so its response is dropped.
    /// Returns `false` when no login was pending.
    pub(crate) fn cancel_login(&self) -> bool {
        let mut state = self.state.lock();
        if *state != SessionState::Authenticating {
            return false;
        }
        self.advance_generation();
        let _ = Self::step(&mut state, SessionState::LoggedOut);
        true
    }

    /// Persist a successful login and enter `Authenticated`.
    pub(crate) fn establish(
        &self,
        generation: u64,
        response: LoginResponse,
    ) -> Result<(), Error> {
        let access = response.token.ok_or_else(|| {
            Error::CredentialRejected("login response did not include a token".into())
        })?;
        let refresh = response
            .refresh
            .ok_or_else(|| Error::Decode("login response is missing a refresh credential".into()))?;

        let mut state = self.state.lock();
        if *state != SessionState::Authenticating || self.generation() != generation {
            return Err(Error::InvalidState("login cancelled before it completed".into()));
        }

        let mut patch = SessionPatch::new()
            .tokens(TokenPair { access, refresh })
            .manager(response.user.is_manager);
        if let Some(permissions) = response.user.permissions {
            patch = patch.permissions(Some(permissions));
        }
        self.store.write(patch)?;
        Self::step(&mut state, SessionState::Authenticated)?;
        Ok(())
    }

    /// `Authenticated → Refreshing`. Other states are left alone.
    pub(crate) fn begin_refresh(&self) {
        let mut state = self.state.lock();
        if *state == SessionState::Authenticated {
            let _ = Self::step(&mut state, SessionState::Refreshing);
        }
    }

    /// Store the refreshed pair if the session that asked for it still
    /// exists. Returns `false` when the result was discarded.
    pub(crate) fn commit_refresh(
        &self,
        generation: u64,
        used: &RefreshToken,
        pair: TokenPair,
    ) -> Result<bool, Error> {
        let mut state = self.state.lock();
        if !state.is_active() || !self.is_current(generation, used) {
            tracing::debug!(state = ?*state, "Discarding refresh result for an ended session");
            return Ok(false);
        }
        self.store.write(SessionPatch::new().tokens(pair))?;
        if *state == SessionState::Refreshing {
            Self::step(&mut state, SessionState::Authenticated)?;
        }
        Ok(true)
    }

    /// Whether `used` is still the stored refresh credential of session
    /// `generation`.
    pub(crate) fn is_current(&self, generation: u64, used: &RefreshToken) -> bool {
        self.generation() == generation && self.store.refresh_token().as_ref() == Some(used)
    }

    /// Cache the manager flag and permissions from an identity response.
    /// Returns `false` when the session ended before the response arrived.
    pub(crate) fn update_identity(&self, identity: &Identity) -> Result<bool, Error> {
        let state = self.state.lock();
        if !state.is_active() {
            tracing::debug!(state = ?*state, "Discarding identity for an ended session");
            return Ok(false);
        }
        let mut patch = SessionPatch::new().manager(identity.is_manager);
        if let Some(permissions) = &identity.permissions {
            patch = patch.permissions(Some(permissions.iter().cloned()));
        }
        self.store.write(patch)?;
        Ok(true)
    }

    /// Tear the session down: stop the timer, clear the store, enter
    /// `LoggedOut`, broadcast once and force navigation to sign-in.
    ///
    /// No-op (beyond the cleanup) when there is no session to end, so a
    /// teardown racing another teardown broadcasts only once.
    pub(crate) fn terminate(&self, reason: EndReason) {
        {
            let mut state = self.state.lock();
            if state.is_active() {
                let _ = Self::step(&mut state, SessionState::TerminatingSession);
            }
            if *state != SessionState::TerminatingSession {
                return;
            }

            self.advance_generation();
            self.stop_timer();
            if let Err(e) = self.store.clear() {
                tracing::error!(error = %e, "Failed to persist session teardown");
            }
            let _ = Self::step(&mut state, SessionState::LoggedOut);
        }

        tracing::info!(reason = reason.as_str(), "Session ended");
        self.events.publish(Topic::SessionChanged);
        self.navigator
            .redirect_to_sign_in(&sign_in_location(&self.config.sign_in_path, reason));
    }

    /// Replace the running refresh timer, cancelling any previous one.
    pub(crate) fn install_timer(&self, handle: TimerHandle) {
        if let Some(old) = self.timer.lock().replace(handle) {
            old.task.abort();
        }
    }

    pub(crate) fn stop_timer(&self) {
        if let Some(old) = self.timer.lock().take() {
            old.task.abort();
            tracing::debug!("Preemptive refresh stopped");
        }
    }

    pub(crate) fn timer_running(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|t| !t.task.is_finished())
    }

    /// Push the next preemptive tick a full interval out.
    pub(crate) fn reset_timer(&self) {
        if let Some(timer) = self.timer.lock().as_ref() {
            timer.reset.notify_one();
        }
    }
}
