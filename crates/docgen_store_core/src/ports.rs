//! crates/docgen_store_core/src/ports.rs
//!
//! Defines the storage contracts (traits) that the API layer and other
//! collaborators call. These traits form the boundary of the hexagonal
//! architecture: the in-memory store and the Postgres adapter both sit behind
//! them, and no relation is reachable any other way.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{
    Account, AccountRemoval, AuditRecord, Document, EntityRef, NewAccount, NewAuditRecord,
    NewDocument, Pagination, Role,
};

//=========================================================================================
// Store Error and Result Types
//=========================================================================================

/// The error taxonomy shared by every store operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Malformed or out-of-enumeration input. Never retried.
    #[error("Validation failed: {0}")]
    Validation(String),
    /// A uniqueness violation; the caller must pick another identifying value.
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Item not found: {0}")]
    NotFound(String),
    /// Transient infrastructure failure. The only retryable class.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::StorageUnavailable(_))
    }
}

/// A convenience type alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

//=========================================================================================
// Store Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fails with `Conflict` when the username or email is already taken.
    async fn create_account(&self, account: NewAccount) -> StoreResult<Account>;

    async fn find_account_by_id(&self, account_id: Uuid) -> StoreResult<Account>;

    async fn find_account_by_username(&self, username: &str) -> StoreResult<Account>;

    /// The lookup email is normalized the same way registration normalizes it.
    async fn find_account_by_email(&self, email: &str) -> StoreResult<Account>;

    async fn update_account_role(&self, account_id: Uuid, role: Role) -> StoreResult<Account>;

    /// Removes the account, every document it owns, and detaches its audit
    /// records, all in one atomic step.
    async fn delete_account(&self, account_id: Uuid) -> StoreResult<AccountRemoval>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fails with `NotFound` when `account_id` does not name an existing account.
    async fn create_document(
        &self,
        account_id: Uuid,
        document: NewDocument,
    ) -> StoreResult<Document>;

    /// Reads one document, scoped to its owner.
    async fn find_document(&self, account_id: Uuid, document_id: Uuid) -> StoreResult<Document>;

    /// Most recent first.
    async fn list_documents_by_account(
        &self,
        account_id: Uuid,
        page: Pagination,
    ) -> StoreResult<Vec<Document>>;

    /// Most recent first, across every account.
    async fn list_all_documents(&self, page: Pagination) -> StoreResult<Vec<Document>>;

    async fn count_documents_by_account(&self, account_id: Uuid) -> StoreResult<u64>;
}

#[async_trait]
pub trait AuditTrail: Send + Sync {
    /// Appends one write-once record. Only fails with `StorageUnavailable`;
    /// an absent or unknown account is stored as no account.
    async fn append(&self, record: NewAuditRecord) -> StoreResult<AuditRecord>;

    /// Most recent first.
    async fn list_audit_by_account(
        &self,
        account_id: Uuid,
        page: Pagination,
    ) -> StoreResult<Vec<AuditRecord>>;

    /// Most recent first.
    async fn list_audit(&self, page: Pagination) -> StoreResult<Vec<AuditRecord>>;

    /// Most recent first.
    async fn list_audit_by_action(
        &self,
        action: &str,
        page: Pagination,
    ) -> StoreResult<Vec<AuditRecord>>;

    /// Every record of one request context, oldest first.
    async fn find_by_request_context(
        &self,
        request_context_id: &str,
    ) -> StoreResult<Vec<AuditRecord>>;

    /// Most recent first.
    async fn find_audit_by_entity(
        &self,
        entity: &EntityRef,
        page: Pagination,
    ) -> StoreResult<Vec<AuditRecord>>;
}

/// The full persistence surface.
pub trait Store: AccountStore + DocumentStore + AuditTrail {}

impl<T: AccountStore + DocumentStore + AuditTrail> Store for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailability_is_retryable() {
        assert!(StoreError::StorageUnavailable("pool timed out".into()).is_retryable());
        for err in [
            StoreError::Validation("x".into()),
            StoreError::Conflict("x".into()),
            StoreError::NotFound("x".into()),
        ] {
            assert!(!err.is_retryable());
        }
    }
}
