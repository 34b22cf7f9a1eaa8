use std::sync::Arc;

use crate::session::SessionContext;
use crate::store::SessionRecord;

/// Map a UI action verb onto the backend's permission verb.
///
/// Unknown actions map to themselves.
#[must_use]
pub fn map_action(action: &str) -> &str {
    match action {
        "create" | "add" => "add",
        "update" | "change" => "change",
        "delete" | "remove" => "delete",
        "read" | "view" => "view",
        other => other,
    }
}

/// Decide whether `record` allows `action` on `resource`.
///
/// Managers are allowed everything. Otherwise the record must hold the
/// permission token `"<mapped action>_<resource lowercased>"`; an absent
/// permission set denies everything.
#[must_use]
pub fn can(record: &SessionRecord, resource: &str, action: &str) -> bool {
    if record.is_manager() {
        return true;
    }
    if resource.is_empty() {
        return false;
    }
    let Some(permissions) = record.permissions() else {
        return false;
    };

    let expected = format!("{}_{}", map_action(action), resource.to_lowercase());
    permissions.contains(&expected)
}

/// Evaluator bound to a live session; every call reads the current record.
#[derive(Clone)]
pub struct AccessControl {
    ctx: Arc<SessionContext>,
}

impl std::fmt::Debug for AccessControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessControl").finish_non_exhaustive()
    }
}

impl AccessControl {
    pub(crate) fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn can(&self, resource: &str, action: &str) -> bool {
        can(&self.ctx.store.read(), resource, action)
    }
}
