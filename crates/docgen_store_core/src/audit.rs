//! crates/docgen_store_core/src/audit.rs
//!
//! Helper for collaborators that audit a business action. A failed append is
//! reported as an `AuditFailure`, a type distinct from `StoreError`, so it can
//! be logged or alerted on without being mistaken for the outcome of the
//! action itself.

use tracing::{debug, error};

use crate::domain::{AuditRecord, NewAuditRecord};
use crate::ports::{AuditTrail, StoreError};

#[derive(Debug, Clone, thiserror::Error)]
#[error("Audit record '{action}' was not written: {source}")]
pub struct AuditFailure {
    pub action: String,
    #[source]
    pub source: StoreError,
}

impl AuditFailure {
    pub fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }
}

/// Appends `entry` on its own, outside any business transaction.
pub async fn record<T>(trail: &T, entry: NewAuditRecord) -> Result<AuditRecord, AuditFailure>
where
    T: AuditTrail + ?Sized,
{
    let action = entry.action.as_str().to_string();
    match trail.append(entry).await {
        Ok(record) => {
            debug!(audit_id = record.id, action = %action, "audit record appended");
            Ok(record)
        }
        Err(source) => {
            error!(action = %action, error = %source, "failed to append audit record");
            Err(AuditFailure { action, source })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuditAction, EntityRef, Pagination};
    use crate::ports::StoreResult;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct UnavailableTrail;

    #[async_trait]
    impl AuditTrail for UnavailableTrail {
        async fn append(&self, _record: NewAuditRecord) -> StoreResult<AuditRecord> {
            Err(StoreError::StorageUnavailable("connection refused".into()))
        }

        async fn list_audit_by_account(
            &self,
            _account_id: Uuid,
            _page: Pagination,
        ) -> StoreResult<Vec<AuditRecord>> {
            Ok(Vec::new())
        }

        async fn list_audit(&self, _page: Pagination) -> StoreResult<Vec<AuditRecord>> {
            Ok(Vec::new())
        }

        async fn list_audit_by_action(
            &self,
            _action: &str,
            _page: Pagination,
        ) -> StoreResult<Vec<AuditRecord>> {
            Ok(Vec::new())
        }

        async fn find_by_request_context(&self, _id: &str) -> StoreResult<Vec<AuditRecord>> {
            Ok(Vec::new())
        }

        async fn find_audit_by_entity(
            &self,
            _entity: &EntityRef,
            _page: Pagination,
        ) -> StoreResult<Vec<AuditRecord>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn failed_append_surfaces_as_audit_failure() {
        let entry = NewAuditRecord::new(AuditAction::new("generate_email").unwrap());
        let failure = record(&UnavailableTrail, entry).await.unwrap_err();

        assert_eq!(failure.action, "generate_email");
        assert!(failure.is_retryable());
        assert!(failure.to_string().contains("generate_email"));
    }
}
