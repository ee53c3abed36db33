//! Staff directory lookup.
//!
//! Staff records live in the primary store and are strictly read-only
//! here. The trait seam lets tests supply an in-memory directory.

use crate::engine::AclError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sift_adapter_pg::ReadOnlyPg;

/// An external staff record: who may authenticate and what they hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffRecord {
    pub email: String,
    /// ACL tags; a NULL column reads as the empty set.
    #[serde(default)]
    pub acls: Vec<String>,
    #[serde(default)]
    pub active: bool,
}

/// Read-only lookup of staff records by normalized email.
#[async_trait]
pub trait StaffDirectory: Send + Sync {
    /// `Ok(None)` means "no such staff member"; `Err` means the lookup
    /// itself failed. Callers must not conflate the two.
    async fn lookup(&self, email: &str) -> Result<Option<StaffRecord>, AclError>;
}

/// Directory backed by the `staffs` table in the primary store.
pub struct PgStaffDirectory {
    pg: ReadOnlyPg,
}

impl PgStaffDirectory {
    pub fn new(pg: ReadOnlyPg) -> Self {
        Self { pg }
    }
}

#[async_trait]
impl StaffDirectory for PgStaffDirectory {
    async fn lookup(&self, email: &str) -> Result<Option<StaffRecord>, AclError> {
        let out = self
            .pg
            .execute_read_only(
                "SELECT email, acls, active FROM staffs WHERE lower(email) = $1",
                &[serde_json::Value::String(email.to_lowercase())],
            )
            .await
            .map_err(|e| AclError::Directory(e.to_string()))?;

        let Some(row) = out.rows.into_iter().next() else {
            return Ok(None);
        };

        serde_json::from_value(row).map(Some).map_err(|e| {
            AclError::Directory(format!("malformed staff record for lookup: {e}"))
        })
    }
}
