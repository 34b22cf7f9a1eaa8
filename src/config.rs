use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;
use url::Url;

use crate::error::Error;

/// Session layer configuration.
///
/// Required field (`base_url`) is a constructor parameter. Everything else
/// has a default matching the Tabla back-office API and can be overridden
/// with `with_*` methods.
///
/// ```rust,ignore
/// use tabla_session::SessionConfig;
///
/// let config = SessionConfig::new("https://api.dev.tabla.ma".parse()?)
///     .with_refresh_interval(std::time::Duration::from_secs(120));
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SessionConfig {
    pub(crate) base_url: Url,
    pub(crate) login_path: String,
    pub(crate) refresh_path: String,
    pub(crate) logout_path: String,
    pub(crate) identity_path: String,
    pub(crate) tenant_header: String,
    pub(crate) refresh_interval: Duration,
    pub(crate) auth_failure_statuses: Vec<StatusCode>,
    pub(crate) sign_in_path: String,
    pub(crate) session_file: Option<PathBuf>,
}

/// Custom status the API uses to signal an expired session.
pub const SESSION_EXPIRED: StatusCode = StatusCode::LENGTH_REQUIRED;

impl SessionConfig {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            login_path: "/api/v1/bo/managers/login/".into(),
            refresh_path: "/api/v1/auth/token/refresh/".into(),
            logout_path: "/api/v1/auth/logout/".into(),
            identity_path: "/api/v1/bo/restaurants/users/me/".into(),
            tenant_header: "X-Restaurant-ID".into(),
            refresh_interval: Duration::from_secs(5 * 60),
            auth_failure_statuses: vec![
                StatusCode::UNAUTHORIZED,
                StatusCode::FORBIDDEN,
                SESSION_EXPIRED,
            ],
            sign_in_path: "/sign-in".into(),
            session_file: None,
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `TABLA_API_URL`: API base URL
    ///
    /// # Optional env vars
    /// - `TABLA_LOGIN_PATH`, `TABLA_REFRESH_PATH`, `TABLA_LOGOUT_PATH`,
    ///   `TABLA_IDENTITY_PATH`: endpoint path overrides
    /// - `TABLA_TENANT_HEADER`: tenant header name
    /// - `TABLA_REFRESH_INTERVAL_SECS`: preemptive refresh period
    /// - `TABLA_AUTH_FAILURE_STATUSES`: comma-separated status codes that trigger refresh
    /// - `TABLA_SIGN_IN_PATH`: location to redirect to when the session ends
    /// - `TABLA_SESSION_FILE`: persist the session record to this JSON file
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required variable is missing or a value is invalid.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let base_url: Url = lookup("TABLA_API_URL")
            .ok_or_else(|| Error::Config("TABLA_API_URL is required".into()))?
            .parse()
            .map_err(|e| Error::Config(format!("TABLA_API_URL: {e}")))?;

        let mut config = Self::new(base_url);

        if let Some(path) = lookup("TABLA_LOGIN_PATH") {
            config = config.with_login_path(path);
        }
        if let Some(path) = lookup("TABLA_REFRESH_PATH") {
            config = config.with_refresh_path(path);
        }
        if let Some(path) = lookup("TABLA_LOGOUT_PATH") {
            config = config.with_logout_path(path);
        }
        if let Some(path) = lookup("TABLA_IDENTITY_PATH") {
            config = config.with_identity_path(path);
        }
        if let Some(header) = lookup("TABLA_TENANT_HEADER") {
            config = config.with_tenant_header(header);
        }
        if let Some(secs) = lookup("TABLA_REFRESH_INTERVAL_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("TABLA_REFRESH_INTERVAL_SECS: {e}")))?;
            if secs == 0 {
                return Err(Error::Config(
                    "TABLA_REFRESH_INTERVAL_SECS must be greater than zero".into(),
                ));
            }
            config = config.with_refresh_interval(Duration::from_secs(secs));
        }
        if let Some(codes) = lookup("TABLA_AUTH_FAILURE_STATUSES") {
            let statuses = codes
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<u16>()
                        .ok()
                        .and_then(|code| StatusCode::from_u16(code).ok())
                        .ok_or_else(|| {
                            let msg = format!("TABLA_AUTH_FAILURE_STATUSES: invalid status {s:?}");
                            Error::Config(msg)
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            config = config.with_auth_failure_statuses(statuses);
        }
        if let Some(path) = lookup("TABLA_SIGN_IN_PATH") {
            config = config.with_sign_in_path(path);
        }
        if let Some(file) = lookup("TABLA_SESSION_FILE") {
            config = config.with_session_file(file);
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    #[must_use]
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    #[must_use]
    pub fn with_logout_path(mut self, path: impl Into<String>) -> Self {
        self.logout_path = path.into();
        self
    }

    #[must_use]
    pub fn with_identity_path(mut self, path: impl Into<String>) -> Self {
        self.identity_path = path.into();
        self
    }

    #[must_use]
    pub fn with_tenant_header(mut self, header: impl Into<String>) -> Self {
        self.tenant_header = header.into();
        self
    }

    /// Override the preemptive refresh period (default: 5 minutes).
    #[must_use]
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Override which response statuses are treated as an expired session
    /// (default: 401, 403, 411).
    #[must_use]
    pub fn with_auth_failure_statuses(mut self, statuses: Vec<StatusCode>) -> Self {
        self.auth_failure_statuses = statuses;
        self
    }

    #[must_use]
    pub fn with_sign_in_path(mut self, path: impl Into<String>) -> Self {
        self.sign_in_path = path.into();
        self
    }

    /// Persist the session record to a JSON file instead of memory.
    #[must_use]
    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    #[must_use]
    pub fn tenant_header(&self) -> &str {
        &self.tenant_header
    }

    #[must_use]
    pub fn sign_in_path(&self) -> &str {
        &self.sign_in_path
    }

    #[must_use]
    pub fn session_file(&self) -> Option<&std::path::Path> {
        self.session_file.as_deref()
    }

    #[must_use]
    pub fn is_auth_failure(&self, status: StatusCode) -> bool {
        self.auth_failure_statuses.contains(&status)
    }

    /// Resolve an API path against the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the joined URL is invalid.
    pub fn endpoint(&self, path: &str) -> Result<Url, Error> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("invalid endpoint {path:?}: {e}")))
    }
}
