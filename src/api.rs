use std::future::Future;

use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde::Serialize;

use crate::config::SessionConfig;
use crate::error::{ApiError, Error};
use crate::types::{
    AccessToken, Credentials, LoginResponse, RefreshResponse, RefreshToken, TokenPair,
};

/// Credential exchanges against the backend.
///
/// [`AuthClient`] is the HTTP implementation; tests and alternative
/// transports can provide their own.
///
/// # Example
///
/// ```rust,ignore
/// impl SessionApi for StaticApi {
///     async fn login(&self, _: &Credentials) -> Result<LoginResponse, Error> { .. }
///     async fn refresh(&self, _: &RefreshToken) -> Result<TokenPair, Error> {
///         Ok(TokenPair::new("access", "refresh"))
///     }
///     async fn logout(&self, _: &AccessToken) -> Result<(), Error> { Ok(()) }
/// }
/// ```
pub trait SessionApi: Send + Sync + 'static {
    /// Exchange credentials for a token pair and the caller's identity flags.
    fn login(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<LoginResponse, Error>> + Send;

    /// Exchange a refresh token for a new token pair.
    fn refresh(
        &self,
        refresh_token: &RefreshToken,
    ) -> impl Future<Output = Result<TokenPair, Error>> + Send;

    /// Notify the backend that the session is over. Best-effort.
    fn logout(&self, access_token: &AccessToken) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Object-safe wrapper for SessionApi (needed for Arc<dyn>).
pub(crate) trait SessionApiDyn: Send + Sync {
    fn login_dyn<'a>(&'a self, credentials: &'a Credentials)
    -> BoxFuture<'a, Result<LoginResponse, Error>>;

    fn refresh_dyn<'a>(
        &'a self,
        refresh_token: &'a RefreshToken,
    ) -> BoxFuture<'a, Result<TokenPair, Error>>;

    fn logout_dyn<'a>(&'a self, access_token: &'a AccessToken) -> BoxFuture<'a, Result<(), Error>>;
}

impl<T: SessionApi> SessionApiDyn for T {
    fn login_dyn<'a>(
        &'a self,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, Result<LoginResponse, Error>> {
        Box::pin(self.login(credentials))
    }

    fn refresh_dyn<'a>(
        &'a self,
        refresh_token: &'a RefreshToken,
    ) -> BoxFuture<'a, Result<TokenPair, Error>> {
        Box::pin(self.refresh(refresh_token))
    }

    fn logout_dyn<'a>(&'a self, access_token: &'a AccessToken) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(self.logout(access_token))
    }
}

/// HTTP client for the login, refresh and logout endpoints.
///
/// These calls bypass the interceptor chain: a rejected refresh must never
/// trigger another refresh.
#[derive(Debug, Clone)]
pub struct AuthClient {
    config: SessionConfig,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

impl AuthClient {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Checks HTTP response status; returns the response on success or an
    /// [`ApiError`] carrying the formatted message.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::new(status, body))
    }
}

impl SessionApi for AuthClient {
    /// # Errors
    ///
    /// Returns [`Error::CredentialRejected`] for a refused login or a
    /// response without a token, [`Error::Api`] for other error statuses,
    /// and [`Error::Http`] on network failure.
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, Error> {
        let response = self
            .http
            .post(self.config.endpoint(&self.config.login_path)?)
            .json(credentials)
            .send()
            .await?;

        let response = Self::ensure_success(response).await.map_err(|e| {
            if matches!(
                e.status,
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            ) {
                Error::CredentialRejected(e.message)
            } else {
                Error::Api(e)
            }
        })?;

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| Error::Decode(format!("login response: {e}")))?;

        if body.token.is_none() {
            return Err(Error::CredentialRejected(
                "login response did not include a token".into(),
            ));
        }
        Ok(body)
    }

    /// # Errors
    ///
    /// Returns [`Error::Api`] if the refresh token is rejected,
    /// [`Error::Decode`] for a response missing either token, and
    /// [`Error::Http`] on network failure.
    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<TokenPair, Error> {
        let response = self
            .http
            .post(self.config.endpoint(&self.config.refresh_path)?)
            .json(&RefreshRequest {
                refresh: refresh_token.as_str(),
            })
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        response
            .json::<RefreshResponse>()
            .await
            .map_err(|e| Error::Decode(format!("refresh response: {e}")))?
            .into_pair()
            .ok_or_else(|| Error::Decode("refresh response is missing a token".into()))
    }

    async fn logout(&self, access_token: &AccessToken) -> Result<(), Error> {
        let response = self
            .http
            .post(self.config.endpoint(&self.config.logout_path)?)
            .bearer_auth(access_token.as_str())
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }
}
