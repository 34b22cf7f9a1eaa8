//! In-process fakes shared by the session, refresh and scheduler tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::StatusCode;

use super::{Navigator, SessionContext};
use crate::api::SessionApi;
use crate::config::SessionConfig;
use crate::error::{ApiError, Error};
use crate::events::EventBus;
use crate::store::{SessionPatch, SessionStore};
use crate::types::{AccessToken, Credentials, LoginResponse, LoginUser, RefreshToken, TokenPair};

#[derive(Default)]
struct FakeState {
    login_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
}

/// Scripted [`SessionApi`]. Refresh number `n` issues `a{n+1}`/`r{n+1}`,
/// so the pair installed by login (`a1`/`r1`) is followed by `a2`/`r2`.
#[derive(Clone, Default)]
pub(crate) struct FakeApi {
    state: Arc<FakeState>,
    login_delay: Duration,
    refresh_delay: Duration,
    fail_refresh: bool,
    fail_logout: bool,
    reject_login: bool,
    manager: bool,
}

impl FakeApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_login_delay(mut self, delay: Duration) -> Self {
        self.login_delay = delay;
        self
    }

    pub(crate) fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub(crate) fn failing_refresh(mut self) -> Self {
        self.fail_refresh = true;
        self
    }

    pub(crate) fn failing_logout(mut self) -> Self {
        self.fail_logout = true;
        self
    }

    pub(crate) fn rejecting_login(mut self) -> Self {
        self.reject_login = true;
        self
    }

    pub(crate) fn manager(mut self) -> Self {
        self.manager = true;
        self
    }

    pub(crate) fn login_calls(&self) -> usize {
        self.state.login_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn logout_calls(&self) -> usize {
        self.state.logout_calls.load(Ordering::SeqCst)
    }
}

impl SessionApi for FakeApi {
    async fn login(&self, _credentials: &Credentials) -> Result<LoginResponse, Error> {
        self.state.login_calls.fetch_add(1, Ordering::SeqCst);
        if !self.login_delay.is_zero() {
            tokio::time::sleep(self.login_delay).await;
        }
        if self.reject_login {
            return Err(Error::CredentialRejected("Invalid email or password".into()));
        }
        Ok(LoginResponse {
            token: Some(AccessToken::from("a1".to_string())),
            refresh: Some(RefreshToken::from("r1".to_string())),
            user: LoginUser {
                is_manager: self.manager,
                permissions: Some(vec!["view_menu".to_string()]),
            },
        })
    }

    async fn refresh(&self, _refresh_token: &RefreshToken) -> Result<TokenPair, Error> {
        let n = self.state.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        if self.fail_refresh {
            let body = r#"{"detail":"Token is invalid or expired"}"#;
            return Err(ApiError::new(StatusCode::UNAUTHORIZED, body).into());
        }
        Ok(TokenPair::new(format!("a{}", n + 1), format!("r{}", n + 1)))
    }

    async fn logout(&self, _access_token: &AccessToken) -> Result<(), Error> {
        self.state.logout_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_logout {
            return Err(ApiError::new(StatusCode::BAD_GATEWAY, "").into());
        }
        Ok(())
    }
}

/// Navigator that remembers every forced redirect.
#[derive(Clone, Default)]
pub(crate) struct RecordingNavigator {
    redirects: Arc<Mutex<Vec<String>>>,
}

impl RecordingNavigator {
    pub(crate) fn redirects(&self) -> Vec<String> {
        self.redirects.lock().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn redirect_to_sign_in(&self, location: &str) {
        self.redirects.lock().push(location.to_string());
    }
}

pub(crate) fn test_config() -> SessionConfig {
    SessionConfig::new("http://localhost".parse().unwrap())
}

/// Context whose store already holds the `a1`/`r1` pair.
pub(crate) fn logged_in_context(api: FakeApi) -> (Arc<SessionContext>, RecordingNavigator) {
    logged_in_context_with(test_config(), api)
}

pub(crate) fn logged_in_context_with(
    config: SessionConfig,
    api: FakeApi,
) -> (Arc<SessionContext>, RecordingNavigator) {
    let store = SessionStore::in_memory();
    store
        .write(
            SessionPatch::new()
                .tokens(TokenPair::new("a1", "r1"))
                .permissions(Some(["view_menu"])),
        )
        .unwrap();

    let navigator = RecordingNavigator::default();
    let ctx = SessionContext::new(
        config,
        store,
        EventBus::new(),
        Arc::new(api),
        Arc::new(navigator.clone()),
    );
    (Arc::new(ctx), navigator)
}
