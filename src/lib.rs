#![doc = include_str!("../README.md")]

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod permissions;
pub mod refresh;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod types;

// Re-exports for convenient access
pub use api::{AuthClient, SessionApi};
pub use config::{SESSION_EXPIRED, SessionConfig};
pub use error::{ApiError, Error, RefreshError};
pub use events::{EventBus, Subscription, Topic};
pub use http::{ApiClient, ApiRequest, ApiResponse, format_error_message};
pub use permissions::{AccessControl, map_action};
pub use refresh::RefreshCoordinator;
pub use scheduler::RefreshScheduler;
pub use session::{
    CheckOutcome, EndReason, LogNavigator, Navigator, Session, SessionBuilder, SessionState,
};
#[cfg(feature = "file-store")]
pub use store::FileBackend;
pub use store::{MemoryBackend, SessionPatch, SessionRecord, SessionStore, StorageBackend};
pub use types::{
    AccessToken, Credentials, Identity, LoginResponse, LoginUser, RefreshToken, TenantId,
    TokenPair,
};
