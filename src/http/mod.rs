//! Business API client with the session interceptors.
//!
//! Request stage: attach the bearer token and tenant header from the
//! current session record (no I/O).
//!
//! Response stage: an authorization failure drives one refresh through the
//! [`RefreshCoordinator`] and re-issues the request exactly once. A second
//! authorization failure is returned as-is. Other error responses are
//! turned into [`ApiError`]s with a readable message.

mod format;

use std::sync::Arc;

use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use format::format_error_message;

use crate::error::{ApiError, Error};
use crate::refresh::RefreshCoordinator;
use crate::session::SessionContext;
use crate::types::AccessToken;

const CSRF_HEADER: &str = "X-CSRFToken";

/// A re-issuable description of one API call.
#[derive(Debug, Clone)]
#[must_use]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    headers: HeaderMap,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Attach a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if `body` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, Error> {
        self.body = Some(serde_json::to_value(body).map_err(|e| Error::Decode(e.to_string()))?);
        Ok(self)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Successful API response, fully buffered.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ApiResponse {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the body is not valid UTF-8.
    pub fn text(&self) -> Result<&str, Error> {
        std::str::from_utf8(&self.body).map_err(|e| Error::Decode(e.to_string()))
    }

    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the body does not deserialize into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Total row count advertised by list endpoints via `X-Total-Count`.
    #[must_use]
    pub fn total_count(&self) -> Option<u64> {
        self.headers
            .get("x-total-count")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }
}

/// HTTP client that carries the session's credentials.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    ctx: Arc<SessionContext>,
    coordinator: RefreshCoordinator,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.ctx.config.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub(crate) fn new(
        http: reqwest::Client,
        ctx: Arc<SessionContext>,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self {
            http,
            ctx,
            coordinator,
        }
    }

    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn get(&self, path: &str) -> Result<ApiResponse, Error> {
        self.send(ApiRequest::new(Method::GET, path)).await
    }

    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn delete(&self, path: &str) -> Result<ApiResponse, Error> {
        self.send(ApiRequest::new(Method::DELETE, path)).await
    }

    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<ApiResponse, Error> {
        self.send(ApiRequest::new(Method::POST, path).json(body)?).await
    }

    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<ApiResponse, Error> {
        self.send(ApiRequest::new(Method::PUT, path).json(body)?).await
    }

    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn patch<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<ApiResponse, Error> {
        self.send(ApiRequest::new(Method::PATCH, path).json(body)?).await
    }

    /// GET `path` and deserialize the body.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`]; also [`Error::Decode`] for an unexpected body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        self.get(path).await?.json()
    }

    /// Issue `request` through the interceptor chain.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthorized`] if authorization failed and could not be
    ///   recovered, or failed again after the single retry.
    /// - [`Error::Api`] for any other non-success status.
    /// - [`Error::Http`] on network failure.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, Error> {
        let (sent_with, response) = self.dispatch(&request).await?;
        let status = response.status();
        if !self.ctx.config.is_auth_failure(status) {
            return Self::finish(response).await;
        }

        let original = Self::unauthorized(response).await;
        tracing::debug!(
            status = status.as_u16(),
            method = %request.method,
            path = %request.path,
            "Authorization failure, attempting recovery"
        );

        // Another caller already swapped the token: retry with it directly.
        let current = self.ctx.store.access_token();
        let refreshed_elsewhere = sent_with.is_some() && current.is_some() && current != sent_with;

        if !refreshed_elsewhere {
            if let Err(e) = self.coordinator.refresh().await {
                tracing::warn!(
                    status = status.as_u16(),
                    error = %e,
                    "Authorization failure not recoverable"
                );
                return Err(original);
            }
        }

        let (_, retry) = self.dispatch(&request).await?;
        if self.ctx.config.is_auth_failure(retry.status()) {
            tracing::warn!(
                status = retry.status().as_u16(),
                path = %request.path,
                "Authorization failure after refresh, giving up"
            );
            return Err(Self::unauthorized(retry).await);
        }
        Self::finish(retry).await
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
    ) -> Result<(Option<AccessToken>, reqwest::Response), Error> {
        let url = self.ctx.config.endpoint(&request.path)?;
        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .header(ACCEPT, "application/json")
            .header("x-requested-with", "XMLHttpRequest")
            .headers(request.headers.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let (builder, token) = self.attach_session(builder);
        Ok((token, builder.send().await?))
    }

    /// Request stage: bearer token, tenant and CSRF headers from the current
    /// record.
    fn attach_session(
        &self,
        mut builder: reqwest::RequestBuilder,
    ) -> (reqwest::RequestBuilder, Option<AccessToken>) {
        let record = self.ctx.store.read();

        let token = record.access_token().cloned();
        if let Some(token) = &token {
            builder = builder.bearer_auth(token.as_str());
        }

        if let Some(tenant) = record.tenant_id() {
            let name = self.ctx.config.tenant_header.as_str();
            match HeaderValue::from_str(&tenant.0) {
                Ok(value) => builder = builder.header(name, value),
                Err(_) => tracing::warn!("Tenant id is not a valid header value, omitting"),
            }
        }

        if let Some(csrf) = record.csrf_token() {
            match HeaderValue::from_str(csrf) {
                Ok(value) => builder = builder.header(CSRF_HEADER, value),
                Err(_) => tracing::warn!("CSRF token is not a valid header value, omitting"),
            }
        }

        (builder, token)
    }

    async fn finish(response: reqwest::Response) -> Result<ApiResponse, Error> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        if status.is_success() {
            return Ok(ApiResponse {
                status,
                headers,
                body,
            });
        }
        let body = String::from_utf8_lossy(&body).into_owned();
        Err(ApiError::new(status, body).into())
    }

    async fn unauthorized(response: reqwest::Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Error::Unauthorized {
            status: status.as_u16(),
            message: format_error_message(status, &body),
        }
    }
}
