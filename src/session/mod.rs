//! Session facade: the one entry point the application talks to.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use tabla_session::{Credentials, Session, SessionConfig, Topic};
//!
//! let session = Session::new(SessionConfig::from_env()?)?;
//! let _guard = session.subscribe(Topic::SessionChanged, || println!("auth changed"));
//!
//! session.login(&Credentials::new("manager@tabla.ma", "secret")).await?;
//! let menus: serde_json::Value = session.api().get_json("/api/v1/bo/menus/").await?;
//! if session.can("reservation", "delete") { /* show the button */ }
//! session.logout().await;
//! ```

mod context;
mod lifecycle;
mod navigator;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

pub(crate) use context::{SessionContext, TimerHandle};
pub use lifecycle::SessionState;
pub use navigator::{EndReason, LogNavigator, Navigator};

use crate::api::{AuthClient, SessionApi, SessionApiDyn};
use crate::config::SessionConfig;
use crate::error::{Error, RefreshError};
use crate::events::{EventBus, Subscription, Topic};
use crate::http::ApiClient;
use crate::permissions::AccessControl;
use crate::refresh::RefreshCoordinator;
use crate::scheduler::RefreshScheduler;
use crate::store::{SessionPatch, SessionRecord, SessionStore};
use crate::types::{Credentials, Identity, TenantId};

/// Result of [`Session::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub authenticated: bool,
    /// Where a route guard should send the user when not authenticated.
    pub redirect_to: Option<String>,
}

/// Builder for [`Session`] with pluggable collaborators.
///
/// Defaults: store from [`SessionConfig::session_file`] (or memory), HTTP
/// exchanges via [`AuthClient`], [`LogNavigator`], a fresh [`EventBus`].
#[must_use]
pub struct SessionBuilder {
    config: SessionConfig,
    store: Option<SessionStore>,
    api: Option<Arc<dyn SessionApiDyn>>,
    navigator: Arc<dyn Navigator>,
    events: EventBus,
    http: reqwest::Client,
}

impl SessionBuilder {
    fn new(config: SessionConfig) -> Self {
        Self {
            config,
            store: None,
            api: None,
            navigator: Arc::new(LogNavigator),
            events: EventBus::new(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the login/refresh/logout transport.
    pub fn with_session_api(mut self, api: impl SessionApi) -> Self {
        let api: Arc<dyn SessionApiDyn> = Arc::new(api);
        self.api = Some(api);
        self
    }

    pub fn with_navigator(mut self, navigator: impl Navigator) -> Self {
        self.navigator = Arc::new(navigator);
        self
    }

    /// Share an existing broadcaster (e.g. one the UI already listens on).
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::Store`] if a configured session file cannot be read,
    /// or [`Error::Config`] if one is configured without file storage support.
    pub fn build(self) -> Result<Session, Error> {
        let store = match self.store {
            Some(store) => store,
            None => Self::default_store(&self.config)?,
        };
        let api: Arc<dyn SessionApiDyn> = match self.api {
            Some(api) => api,
            None => Arc::new(
                AuthClient::new(self.config.clone()).with_http_client(self.http.clone()),
            ),
        };

        let ctx = Arc::new(SessionContext::new(
            self.config,
            store,
            self.events,
            api,
            self.navigator,
        ));
        let coordinator = RefreshCoordinator::new(ctx.clone());
        let scheduler = RefreshScheduler::new(ctx.clone(), coordinator.clone());
        let api = ApiClient::new(self.http, ctx.clone(), coordinator.clone());

        Ok(Session {
            ctx,
            coordinator,
            scheduler,
            api,
        })
    }

    #[cfg(feature = "file-store")]
    fn default_store(config: &SessionConfig) -> Result<SessionStore, Error> {
        match config.session_file() {
            Some(path) => SessionStore::load(crate::store::FileBackend::new(path)),
            None => Ok(SessionStore::in_memory()),
        }
    }

    #[cfg(not(feature = "file-store"))]
    fn default_store(config: &SessionConfig) -> Result<SessionStore, Error> {
        match config.session_file() {
            Some(_) => Err(Error::Config(
                "TABLA_SESSION_FILE requires the `file-store` feature".into(),
            )),
            None => Ok(SessionStore::in_memory()),
        }
    }
}

/// Client-side session for the Tabla API.
///
/// Dropping the session stops its refresh timer.
pub struct Session {
    ctx: Arc<SessionContext>,
    coordinator: RefreshCoordinator,
    scheduler: RefreshScheduler,
    api: ApiClient,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.ctx.stop_timer();
    }
}

impl Session {
    /// Session with default collaborators.
    ///
    /// # Errors
    ///
    /// See [`SessionBuilder::build`].
    pub fn new(config: SessionConfig) -> Result<Self, Error> {
        Self::builder(config).build()
    }

    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    /// Authenticate and start the session.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] unless currently logged out.
    /// - [`Error::CredentialRejected`] for bad credentials; the session
    ///   stays logged out.
    /// - Transport and store errors from the login exchange.
    pub async fn login(&self, credentials: &Credentials) -> Result<(), Error> {
        let generation = self.ctx.begin_login()?;

        let established = match self.ctx.api.login_dyn(credentials).await {
            Ok(response) => self.ctx.establish(generation, response),
            Err(e) => Err(e),
        };

        if let Err(e) = established {
            tracing::warn!(error = %e, "Login failed");
            self.ctx.abort_login(generation);
            return Err(e);
        }

        self.scheduler.start();
        tracing::info!(email = %credentials.email, "Login successful");
        self.ctx.events.publish(Topic::SessionChanged);
        Ok(())
    }

    /// End the session locally, notifying the backend best-effort.
    ///
    /// Never fails: the user is logged out locally whatever the server says.
    /// A login still waiting for its response is cancelled and its result
    /// dropped.
    pub async fn logout(&self) {
        // Cancel the timer before anything can suspend.
        self.scheduler.stop();

        if self.ctx.cancel_login() {
            tracing::info!("Pending login cancelled");
            if let Err(e) = self.ctx.store.clear() {
                tracing::error!(error = %e, "Failed to clear session store");
            }
            return;
        }

        if self.ctx.state().is_active() {
            let _ = self.ctx.transition(SessionState::TerminatingSession);
        }
        if self.ctx.state() != SessionState::TerminatingSession {
            if let Err(e) = self.ctx.store.clear() {
                tracing::error!(error = %e, "Failed to clear session store");
            }
            return;
        }

        if let Some(token) = self.ctx.store.access_token() {
            if let Err(e) = self.ctx.api.logout_dyn(&token).await {
                tracing::warn!(error = %e, "Logout request failed, clearing session anyway");
            }
        }

        self.ctx.terminate(EndReason::LoggedOut);
    }

    /// Whether a session is established; redirect hint otherwise.
    #[must_use]
    pub fn check(&self) -> CheckOutcome {
        if self.ctx.store.authenticated() {
            CheckOutcome {
                authenticated: true,
                redirect_to: None,
            }
        } else {
            CheckOutcome {
                authenticated: false,
                redirect_to: Some(navigator::sign_in_location(
                    &self.ctx.config.sign_in_path,
                    EndReason::NotAuthenticated,
                )),
            }
        }
    }

    /// Fetch the current identity and refresh the cached manager flag and
    /// permission set from it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAuthenticated`] without a session, otherwise any
    /// error from the identity call.
    pub async fn get_identity(&self) -> Result<Identity, Error> {
        if !self.ctx.store.authenticated() {
            return Err(Error::NotAuthenticated);
        }

        let identity: Identity = self.api.get_json(&self.ctx.config.identity_path).await?;

        // The session may have ended while the request was in flight.
        self.ctx.update_identity(&identity)?;
        Ok(identity)
    }

    /// Cached permission tokens; empty when none are cached.
    #[must_use]
    pub fn get_permissions(&self) -> Vec<String> {
        self.ctx
            .store
            .read()
            .permissions()
            .map(|p| p.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Refresh the token pair now (single-flight).
    ///
    /// # Errors
    ///
    /// See [`RefreshCoordinator::refresh`].
    pub async fn refresh(&self) -> Result<(), RefreshError> {
        self.coordinator.refresh().await
    }

    /// Restart the refresh timer for a session restored from storage.
    pub fn resume(&self) {
        if self.ctx.state().is_active() {
            self.scheduler.start();
        }
    }

    /// Switch (or clear) the active tenant and broadcast the change.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the change cannot be persisted.
    pub fn set_tenant(&self, tenant: Option<TenantId>) -> Result<(), Error> {
        self.ctx.store.write(SessionPatch::new().tenant_id(tenant))?;
        self.ctx.events.publish(Topic::TenantChanged);
        Ok(())
    }

    /// Store the CSRF cookie value sent as `X-CSRFToken` on every request.
    /// It outlives logout, like the cookie it mirrors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the change cannot be persisted.
    pub fn set_csrf_token(&self, token: Option<String>) -> Result<(), Error> {
        self.ctx.store.write(SessionPatch::new().csrf_token(token))
    }

    #[must_use]
    pub fn can(&self, resource: &str, action: &str) -> bool {
        crate::permissions::can(&self.ctx.store.read(), resource, action)
    }

    #[must_use]
    pub fn access_control(&self) -> AccessControl {
        AccessControl::new(self.ctx.clone())
    }

    pub fn subscribe(
        &self,
        topic: Topic,
        handler: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        self.ctx.events.subscribe(topic, handler)
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    /// Interceptor-backed client for business API calls.
    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    #[must_use]
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    #[must_use]
    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.ctx.state()
    }

    #[must_use]
    pub fn record(&self) -> SessionRecord {
        self.ctx.store.read()
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.ctx.config
    }
}

#[cfg(test)]
mod tests;
