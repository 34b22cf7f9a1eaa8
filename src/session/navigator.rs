/// Forced-navigation boundary.
///
/// Called when a session ends so the application can send the user to
/// the sign-in surface. Plug the app router in here.
pub trait Navigator: Send + Sync + 'static {
    /// `location` is the sign-in path with a `reason` query parameter.
    fn redirect_to_sign_in(&self, location: &str);
}

/// Default navigator: records the redirect in the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn redirect_to_sign_in(&self, location: &str) {
        tracing::info!(location = %location, "Redirecting to sign-in");
    }
}

impl<F> Navigator for F
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn redirect_to_sign_in(&self, location: &str) {
        self(location);
    }
}

/// Why the user is being sent to the sign-in surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Refresh failed or no refresh credential was available.
    SessionExpired,
    /// Explicit user logout.
    LoggedOut,
    /// `check()` found no session.
    NotAuthenticated,
}

impl EndReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionExpired => "session_expired",
            Self::LoggedOut => "logged_out",
            Self::NotAuthenticated => "not_authenticated",
        }
    }
}

/// `<sign_in_path>?reason=<code>`, URL-encoded.
pub(crate) fn sign_in_location(sign_in_path: &str, reason: EndReason) -> String {
    let encoded = urlencoding::encode(reason.as_str());
    format!("{sign_in_path}?reason={encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_carries_reason() {
        assert_eq!(
            sign_in_location("/sign-in", EndReason::SessionExpired),
            "/sign-in?reason=session_expired"
        );
    }

    #[test]
    fn closures_are_navigators() {
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let nav = move |location: &str| sink.lock().push(location.to_string());
        nav.redirect_to_sign_in("/sign-in");
        assert_eq!(seen.lock().as_slice(), ["/sign-in".to_string()]);
    }
}
