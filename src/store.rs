//! Durable session record.
//!
//! The record is held in memory behind a lock and mirrored to a
//! [`StorageBackend`] under fixed keys. Every mutation is persisted as one
//! batch before the in-memory copy is swapped, so readers never observe a
//! half-applied write (in particular, never a new access token paired with
//! an old refresh token).

use std::collections::{BTreeSet, HashMap};

use parking_lot::{Mutex, RwLock};

use crate::error::Error;
use crate::types::{AccessToken, RefreshToken, TenantId, TokenPair};

pub(crate) const KEY_AUTHENTICATED: &str = "isLogedIn";
pub(crate) const KEY_ACCESS: &str = "token";
pub(crate) const KEY_REFRESH: &str = "refresh";
pub(crate) const KEY_TENANT: &str = "restaurant_id";
pub(crate) const KEY_MANAGER: &str = "is_manager";
pub(crate) const KEY_PERMISSIONS: &str = "permissions";
/// Django CSRF token; application state that outlives a session.
pub(crate) const KEY_CSRF: &str = "csrftoken";

const SESSION_KEYS: [&str; 6] = [
    KEY_AUTHENTICATED,
    KEY_ACCESS,
    KEY_REFRESH,
    KEY_TENANT,
    KEY_MANAGER,
    KEY_PERMISSIONS,
];

/// One pending key change: `Some` sets the value, `None` removes the key.
pub type Change = (&'static str, Option<String>);

/// String key/value persistence underneath the session store.
///
/// `apply` must make the whole batch visible at once.
pub trait StorageBackend: Send + Sync + 'static {
    /// Read a single key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the underlying storage cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, Error>;

    /// Apply a batch of changes atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the batch cannot be persisted.
    fn apply(&self, changes: &[Change]) -> Result<(), Error>;
}

/// Process-local backend; state is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed unrelated application state, e.g. a UI language preference.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.lock().insert(key.into(), value.into());
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn apply(&self, changes: &[Change]) -> Result<(), Error> {
        let mut entries = self.entries.lock();
        for (key, value) in changes {
            match value {
                Some(v) => {
                    entries.insert((*key).to_string(), v.clone());
                }
                None => {
                    entries.remove(*key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(feature = "file-store")]
pub use file::FileBackend;

#[cfg(feature = "file-store")]
mod file {
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};

    use parking_lot::Mutex;

    use super::{Change, StorageBackend};
    use crate::error::Error;

    /// JSON-object file backend that survives restarts.
    ///
    /// Each batch rewrites a sibling temp file and renames it over the
    /// original, so a crash mid-write leaves the previous state intact.
    #[derive(Debug)]
    pub struct FileBackend {
        path: PathBuf,
        lock: Mutex<()>,
    }

    impl FileBackend {
        #[must_use]
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self {
                path: path.into(),
                lock: Mutex::new(()),
            }
        }

        #[must_use]
        pub fn path(&self) -> &Path {
            &self.path
        }

        fn load(&self) -> Result<BTreeMap<String, String>, Error> {
            match std::fs::read(&self.path) {
                Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
                Ok(bytes) => serde_json::from_slice(&bytes)
                    .map_err(|e| Error::Store(format!("{}: {e}", self.path.display()))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
                Err(e) => Err(Error::Store(format!("{}: {e}", self.path.display()))),
            }
        }
    }

    impl StorageBackend for FileBackend {
        fn get(&self, key: &str) -> Result<Option<String>, Error> {
            let _guard = self.lock.lock();
            Ok(self.load()?.remove(key))
        }

        fn apply(&self, changes: &[Change]) -> Result<(), Error> {
            let _guard = self.lock.lock();
            let mut entries = self.load()?;
            for (key, value) in changes {
                match value {
                    Some(v) => {
                        entries.insert((*key).to_string(), v.clone());
                    }
                    None => {
                        entries.remove(*key);
                    }
                }
            }

            let json = serde_json::to_vec_pretty(&entries)
                .map_err(|e| Error::Store(e.to_string()))?;
            let tmp = self.path.with_extension("tmp");
            std::fs::write(&tmp, json)
                .and_then(|()| std::fs::rename(&tmp, &self.path))
                .map_err(|e| Error::Store(format!("{}: {e}", self.path.display())))
        }
    }
}

/// Snapshot of the persisted session.
///
/// `authenticated()` holds exactly when a token pair is present; the pair
/// can only be replaced as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRecord {
    tokens: Option<TokenPair>,
    tenant_id: Option<TenantId>,
    is_manager: bool,
    permissions: Option<BTreeSet<String>>,
    csrf_token: Option<String>,
}

impl SessionRecord {
    #[must_use]
    pub fn authenticated(&self) -> bool {
        self.tokens.is_some()
    }

    #[must_use]
    pub fn tokens(&self) -> Option<&TokenPair> {
        self.tokens.as_ref()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&AccessToken> {
        self.tokens.as_ref().map(|t| &t.access)
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<&RefreshToken> {
        self.tokens.as_ref().map(|t| &t.refresh)
    }

    #[must_use]
    pub fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant_id.as_ref()
    }

    #[must_use]
    pub fn is_manager(&self) -> bool {
        self.is_manager
    }

    #[must_use]
    pub fn permissions(&self) -> Option<&BTreeSet<String>> {
        self.permissions.as_ref()
    }

    #[must_use]
    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    fn apply(&mut self, patch: SessionPatch) {
        if let Some(tokens) = patch.tokens {
            self.tokens = Some(tokens);
        }
        if let Some(tenant) = patch.tenant_id {
            self.tenant_id = tenant;
        }
        if let Some(manager) = patch.is_manager {
            self.is_manager = manager;
        }
        if let Some(permissions) = patch.permissions {
            self.permissions = permissions;
        }
        if let Some(csrf_token) = patch.csrf_token {
            self.csrf_token = csrf_token;
        }
    }

    fn to_changes(&self) -> Vec<Change> {
        let permissions = self
            .permissions
            .as_ref()
            .map(|p| serde_json::to_string(p).unwrap_or_else(|_| "[]".into()));
        vec![
            (KEY_AUTHENTICATED, self.authenticated().then(|| "true".into())),
            (KEY_ACCESS, self.access_token().map(|t| t.as_str().to_owned())),
            (KEY_REFRESH, self.refresh_token().map(|t| t.as_str().to_owned())),
            (KEY_TENANT, self.tenant_id.as_ref().map(ToString::to_string)),
            (KEY_MANAGER, self.is_manager.then(|| "true".into())),
            (KEY_PERMISSIONS, permissions),
            (KEY_CSRF, self.csrf_token.clone()),
        ]
    }

    fn from_backend(backend: &dyn StorageBackend) -> Result<Self, Error> {
        let flagged = backend.get(KEY_AUTHENTICATED)?.as_deref() == Some("true");
        let access = backend.get(KEY_ACCESS)?;
        let refresh = backend.get(KEY_REFRESH)?;

        let tokens = match (flagged, access, refresh) {
            (true, Some(access), Some(refresh)) => Some(TokenPair::new(access, refresh)),
            (true, _, _) => {
                tracing::warn!("Persisted session is missing a credential, starting logged out");
                None
            }
            _ => None,
        };

        let permissions = match backend.get(KEY_PERMISSIONS)? {
            Some(raw) => match serde_json::from_str::<BTreeSet<String>>(&raw) {
                Ok(set) => Some(set),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring unparsable persisted permissions");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            tokens,
            tenant_id: backend.get(KEY_TENANT)?.map(TenantId),
            is_manager: backend.get(KEY_MANAGER)?.as_deref() == Some("true"),
            permissions,
            csrf_token: backend.get(KEY_CSRF)?,
        })
    }
}

/// Partial update merged into the record by [`SessionStore::write`].
///
/// Credentials are carried as a [`TokenPair`], so a patch can never
/// update one half of the pair.
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct SessionPatch {
    tokens: Option<TokenPair>,
    tenant_id: Option<Option<TenantId>>,
    is_manager: Option<bool>,
    permissions: Option<Option<BTreeSet<String>>>,
    csrf_token: Option<Option<String>>,
}

impl SessionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tokens(mut self, tokens: TokenPair) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn tenant_id(mut self, tenant_id: Option<TenantId>) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn manager(mut self, is_manager: bool) -> Self {
        self.is_manager = Some(is_manager);
        self
    }

    pub fn permissions<I, S>(mut self, permissions: Option<I>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = Some(permissions.map(|p| p.into_iter().map(Into::into).collect()));
        self
    }

    pub fn csrf_token(mut self, token: Option<String>) -> Self {
        self.csrf_token = Some(token);
        self
    }
}

/// The single shared mutable session record.
pub struct SessionStore {
    record: RwLock<SessionRecord>,
    backend: Box<dyn StorageBackend>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("authenticated", &self.record.read().authenticated())
            .finish_non_exhaustive()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl SessionStore {
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            record: RwLock::new(SessionRecord::default()),
            backend: Box::new(MemoryBackend::new()),
        }
    }

    /// Restore the record persisted in `backend`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the backend cannot be read.
    pub fn load(backend: impl StorageBackend) -> Result<Self, Error> {
        let record = SessionRecord::from_backend(&backend)?;
        Ok(Self {
            record: RwLock::new(record),
            backend: Box::new(backend),
        })
    }

    /// Current snapshot.
    #[must_use]
    pub fn read(&self) -> SessionRecord {
        self.record.read().clone()
    }

    /// Merge `patch` into the record and persist it as one batch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if persisting fails; the in-memory record is
    /// left unchanged in that case.
    pub fn write(&self, patch: SessionPatch) -> Result<(), Error> {
        let mut record = self.record.write();
        let mut next = record.clone();
        next.apply(patch);
        self.backend.apply(&next.to_changes())?;
        *record = next;
        Ok(())
    }

    /// Remove every session key at once. Unrelated backend keys and the
    /// CSRF token survive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if persisting fails. The in-memory record is
    /// cleared regardless, so the process never keeps using credentials the
    /// caller asked to drop.
    pub fn clear(&self) -> Result<(), Error> {
        let mut record = self.record.write();
        *record = SessionRecord {
            csrf_token: record.csrf_token.take(),
            ..SessionRecord::default()
        };
        let changes: Vec<Change> = SESSION_KEYS.iter().map(|key| (*key, None)).collect();
        self.backend.apply(&changes)
    }

    #[must_use]
    pub fn authenticated(&self) -> bool {
        self.record.read().authenticated()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<AccessToken> {
        self.record.read().access_token().cloned()
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<RefreshToken> {
        self.record.read().refresh_token().cloned()
    }

    #[must_use]
    pub fn tenant_id(&self) -> Option<TenantId> {
        self.record.read().tenant_id().cloned()
    }
}
