/// Session lifecycle.
///
/// - `LoggedOut` → `Authenticating` on login
/// - `Authenticating` → `Authenticated` | `LoggedOut`
/// - `Authenticated` → `Refreshing` (timer or auth failure) | `TerminatingSession` (logout)
/// - `Refreshing` → `Authenticated` | `TerminatingSession`
/// - `TerminatingSession` → `LoggedOut`, always
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    LoggedOut,
    Authenticating,
    Authenticated,
    Refreshing,
    TerminatingSession,
}

impl SessionState {
    /// Whether `self → next` is an edge of the lifecycle.
    #[must_use]
    pub fn can_transition(self, next: Self) -> bool {
        use SessionState::{
            Authenticated, Authenticating, LoggedOut, Refreshing, TerminatingSession,
        };

        matches!(
            (self, next),
            (LoggedOut, Authenticating)
                | (Authenticating, Authenticated | LoggedOut)
                | (Authenticated, Refreshing | TerminatingSession)
                | (Refreshing, Authenticated | TerminatingSession)
                | (TerminatingSession, LoggedOut)
        )
    }

    /// A token pair is expected to be in the store.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Authenticated | Self::Refreshing)
    }
}
