use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

/// Short-lived bearer token attached to every authorized request.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
#[serde(transparent)]
pub struct AccessToken(pub String);

/// Longer-lived token used only to obtain a new access token.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
#[serde(transparent)]
pub struct RefreshToken(pub String);

impl AccessToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl RefreshToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Token values stay out of logs and panic messages.
impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(..)")
    }
}

impl std::fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RefreshToken(..)")
    }
}

/// Active organizational scope (the selected restaurant), sent as a header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct TenantId(pub String);

/// Access/refresh pair. Always written and cleared together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access: AccessToken,
    pub refresh: RefreshToken,
}

impl TokenPair {
    #[must_use]
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: AccessToken(access.into()),
            refresh: RefreshToken(refresh.into()),
        }
    }
}

/// Login form credentials.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Body of a login exchange response.
///
/// `token` missing means the backend refused the login.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct LoginResponse {
    #[serde(default)]
    pub token: Option<AccessToken>,
    #[serde(default)]
    pub refresh: Option<RefreshToken>,
    #[serde(default)]
    pub user: LoginUser,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[non_exhaustive]
pub struct LoginUser {
    #[serde(default)]
    pub is_manager: bool,
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
}

/// Body of a refresh exchange response. Both members are required.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RefreshResponse {
    pub(crate) access: Option<AccessToken>,
    pub(crate) refresh: Option<RefreshToken>,
}

impl RefreshResponse {
    pub(crate) fn into_pair(self) -> Option<TokenPair> {
        Some(TokenPair {
            access: self.access?,
            refresh: self.refresh?,
        })
    }
}

/// Identity returned by the "who am I" endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Identity {
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
    #[serde(default)]
    pub is_manager: bool,
    /// Remaining profile fields, passed through untouched.
    #[serde(flatten)]
    pub profile: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_debug_is_redacted() {
        let pair = TokenPair::new("secret-access", "secret-refresh");
        let rendered = format!("{pair:?}");
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("a@b.c", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("a@b.c"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn login_response_without_token_parses() {
        let resp: LoginResponse = serde_json::from_str(r#"{"detail":"bad"}"#).unwrap();
        assert!(resp.token.is_none());
        assert!(!resp.user.is_manager);
    }

    #[test]
    fn refresh_response_requires_both_tokens() {
        let full: RefreshResponse =
            serde_json::from_str(r#"{"access":"a2","refresh":"r2"}"#).unwrap();
        assert_eq!(full.into_pair(), Some(TokenPair::new("a2", "r2")));

        let partial: RefreshResponse = serde_json::from_str(r#"{"refresh":"r2"}"#).unwrap();
        assert!(partial.into_pair().is_none());
    }

    #[test]
    fn identity_keeps_profile_fields() {
        let identity: Identity = serde_json::from_str(
            r#"{"permissions":["view_menu"],"is_manager":false,"first_name":"Sara"}"#,
        )
        .unwrap();
        assert_eq!(identity.permissions, Some(vec!["view_menu".to_string()]));
        assert_eq!(identity.profile["first_name"], "Sara");
    }

    #[test]
    fn tenant_id_from_string() {
        let tenant = TenantId::from("42".to_string());
        assert_eq!(tenant.to_string(), "42");
    }
}
