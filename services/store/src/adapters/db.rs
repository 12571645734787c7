//! services/store/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of
//! the store ports from the `core` crate. It handles all interactions with
//! PostgreSQL using `sqlx`. Queries are checked at runtime rather than with the
//! `query!` macros so the crate builds without a live database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docgen_store_core::domain::{
    normalize_email, strip_nul, Account, AccountRemoval, AuditAction, AuditRecord, DocType, Document,
    EntityKind, EntityRef, NewAccount, NewAuditRecord, NewDocument, Pagination, Role, Structure,
    Tone,
};
use docgen_store_core::ports::{AccountStore, AuditTrail, DocumentStore, StoreError, StoreResult};
use docgen_store_core::CredentialHash;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A Postgres-backed store that implements every store port.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new `PgStore` over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool sized from the configuration.
    pub async fn connect(config: &Config) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Applies the embedded schema (relations, indexes, triggers).
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

//=========================================================================================
// Error Classification
//=========================================================================================

/// Maps a Postgres SQLSTATE onto the store error taxonomy.
fn classify_database_error(
    code: Option<&str>,
    constraint: Option<&str>,
    message: &str,
) -> StoreError {
    match code {
        Some("23505") => StoreError::Conflict(match constraint {
            Some("accounts_username_key") => "username is already taken".to_string(),
            Some("accounts_email_key") => "email is already registered".to_string(),
            _ => message.to_string(),
        }),
        Some("23503") => StoreError::NotFound(message.to_string()),
        Some("23502" | "23514" | "22001" | "22021" | "22P02") => {
            StoreError::Validation(message.to_string())
        }
        _ => StoreError::StorageUnavailable(message.to_string()),
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
        sqlx::Error::Database(db) => {
            classify_database_error(db.code().as_deref(), db.constraint(), db.message())
        }
        other => StoreError::StorageUnavailable(other.to_string()),
    }
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23503"),
        _ => false,
    }
}

fn corrupt_row(table: &str, err: StoreError) -> StoreError {
    StoreError::StorageUnavailable(format!("corrupt {} row: {}", table, err))
}

fn limit_offset(page: Pagination) -> (i64, i64) {
    (
        i64::from(page.limit()),
        i64::try_from(page.offset()).unwrap_or(i64::MAX),
    )
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct AccountRecord {
    id: Uuid,
    username: String,
    email: String,
    credential_hash: String,
    role: String,
    created_at: DateTime<Utc>,
}
impl AccountRecord {
    fn to_domain(self) -> StoreResult<Account> {
        Ok(Account {
            id: self.id,
            username: self.username,
            email: self.email,
            credential_hash: CredentialHash::from_phc(&self.credential_hash)
                .map_err(|e| corrupt_row("accounts", e))?,
            role: self
                .role
                .parse::<Role>()
                .map_err(|e| corrupt_row("accounts", e))?,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct DocumentRecord {
    id: Uuid,
    account_id: Uuid,
    doc_type: String,
    title: Option<String>,
    prompt_input: Option<String>,
    content: String,
    tone: String,
    structure: Option<String>,
    created_at: DateTime<Utc>,
}
impl DocumentRecord {
    fn to_domain(self) -> StoreResult<Document> {
        let doc_type = self
            .doc_type
            .parse::<DocType>()
            .map_err(|e| corrupt_row("documents", e))?;
        let tone = self
            .tone
            .parse::<Tone>()
            .map_err(|e| corrupt_row("documents", e))?;
        let structure = self
            .structure
            .as_deref()
            .map(|s| s.parse::<Structure>())
            .transpose()
            .map_err(|e| corrupt_row("documents", e))?;
        Ok(Document {
            id: self.id,
            account_id: self.account_id,
            doc_type,
            title: self.title,
            prompt_input: self.prompt_input,
            content: self.content,
            tone,
            structure,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct AuditRecordRow {
    id: i64,
    account_id: Option<Uuid>,
    action: String,
    entity_type: Option<String>,
    entity_id: Option<Uuid>,
    request_context_id: Option<String>,
    details: Option<String>,
    created_at: DateTime<Utc>,
}
impl AuditRecordRow {
    fn to_domain(self) -> StoreResult<AuditRecord> {
        let entity = match (self.entity_type, self.entity_id) {
            (Some(kind), Some(id)) => Some(EntityRef::new(EntityKind::from(kind.as_str()), id)),
            _ => None,
        };
        Ok(AuditRecord {
            id: self.id,
            account_id: self.account_id,
            action: AuditAction::new(&self.action).map_err(|e| corrupt_row("audit_records", e))?,
            entity,
            request_context_id: self.request_context_id,
            details: self.details,
            created_at: self.created_at,
        })
    }
}

fn audit_rows(rows: Vec<AuditRecordRow>) -> StoreResult<Vec<AuditRecord>> {
    rows.into_iter().map(AuditRecordRow::to_domain).collect()
}

fn document_rows(rows: Vec<DocumentRecord>) -> StoreResult<Vec<Document>> {
    rows.into_iter().map(DocumentRecord::to_domain).collect()
}

//=========================================================================================
// `AccountStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl AccountStore for PgStore {
    async fn create_account(&self, account: NewAccount) -> StoreResult<Account> {
        let record = sqlx::query_as::<_, AccountRecord>(
            "INSERT INTO accounts (username, email, credential_hash, role) VALUES ($1, $2, $3, $4) \
             RETURNING id, username, email, credential_hash, role, created_at",
        )
        .bind(account.username())
        .bind(account.email())
        .bind(account.credential_hash().as_str())
        .bind(account.role().as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(account_id = %record.id, "account created");
        record.to_domain()
    }

    async fn find_account_by_id(&self, account_id: Uuid) -> StoreResult<Account> {
        sqlx::query_as::<_, AccountRecord>(
            "SELECT id, username, email, credential_hash, role, created_at FROM accounts WHERE id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| StoreError::NotFound(format!("Account {} not found", account_id)))?
        .to_domain()
    }

    async fn find_account_by_username(&self, username: &str) -> StoreResult<Account> {
        sqlx::query_as::<_, AccountRecord>(
            "SELECT id, username, email, credential_hash, role, created_at FROM accounts WHERE username = $1",
        )
        .bind(username.trim())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| StoreError::NotFound(format!("Account '{}' not found", username)))?
        .to_domain()
    }

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Account> {
        let not_found = || StoreError::NotFound(format!("Account with email '{}' not found", email));
        let normalized = normalize_email(email).map_err(|_| not_found())?;
        sqlx::query_as::<_, AccountRecord>(
            "SELECT id, username, email, credential_hash, role, created_at FROM accounts WHERE email = $1",
        )
        .bind(&normalized)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(not_found)?
        .to_domain()
    }

    async fn update_account_role(&self, account_id: Uuid, role: Role) -> StoreResult<Account> {
        let record = sqlx::query_as::<_, AccountRecord>(
            "UPDATE accounts SET role = $1 WHERE id = $2 \
             RETURNING id, username, email, credential_hash, role, created_at",
        )
        .bind(role.as_str())
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| StoreError::NotFound(format!("Account {} not found", account_id)))?;

        info!(account_id = %account_id, role = %role, "account role updated");
        record.to_domain()
    }

    async fn delete_account(&self, account_id: Uuid) -> StoreResult<AccountRemoval> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Locking the row blocks concurrent inserts that reference it until
        // the deletion commits; they then fail their foreign key check.
        let locked = sqlx::query_scalar::<_, Uuid>("SELECT id FROM accounts WHERE id = $1 FOR UPDATE")
            .bind(account_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if locked.is_none() {
            return Err(StoreError::NotFound(format!("Account {} not found", account_id)));
        }

        // Owned documents are deleted with their account.
        let documents_removed = sqlx::query("DELETE FROM documents WHERE account_id = $1")
            .bind(account_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        // Associated audit records are kept. ON DELETE SET NULL clears their
        // account once the account row is gone; the append-only trigger only
        // permits that change for accounts that no longer exist.
        let audit_records_detached = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM audit_records WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .max(0) as u64;

        sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(account_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        info!(
            account_id = %account_id,
            documents_removed,
            audit_records_detached,
            "account deleted"
        );
        Ok(AccountRemoval {
            documents_removed,
            audit_records_detached,
        })
    }
}

//=========================================================================================
// `DocumentStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl DocumentStore for PgStore {
    async fn create_document(
        &self,
        account_id: Uuid,
        document: NewDocument,
    ) -> StoreResult<Document> {
        sqlx::query_as::<_, DocumentRecord>(
            "INSERT INTO documents (account_id, doc_type, title, prompt_input, content, tone, structure) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id, account_id, doc_type, title, prompt_input, content, tone, structure, created_at",
        )
        .bind(account_id)
        .bind(document.doc_type().as_str())
        .bind(document.title())
        .bind(document.prompt_input())
        .bind(document.content())
        .bind(document.tone().as_str())
        .bind(document.structure().map(|s| s.as_str()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match map_sqlx_error(e) {
            StoreError::NotFound(_) => StoreError::NotFound(format!("Account {} not found", account_id)),
            other => other,
        })?
        .to_domain()
    }

    async fn find_document(&self, account_id: Uuid, document_id: Uuid) -> StoreResult<Document> {
        sqlx::query_as::<_, DocumentRecord>(
            "SELECT id, account_id, doc_type, title, prompt_input, content, tone, structure, created_at \
             FROM documents WHERE id = $1 AND account_id = $2",
        )
        .bind(document_id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| StoreError::NotFound(format!("Document {} not found", document_id)))?
        .to_domain()
    }

    async fn list_documents_by_account(
        &self,
        account_id: Uuid,
        page: Pagination,
    ) -> StoreResult<Vec<Document>> {
        let (limit, offset) = limit_offset(page);
        let records = sqlx::query_as::<_, DocumentRecord>(
            "SELECT id, account_id, doc_type, title, prompt_input, content, tone, structure, created_at \
             FROM documents WHERE account_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
        )
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        document_rows(records)
    }

    async fn list_all_documents(&self, page: Pagination) -> StoreResult<Vec<Document>> {
        let (limit, offset) = limit_offset(page);
        let records = sqlx::query_as::<_, DocumentRecord>(
            "SELECT id, account_id, doc_type, title, prompt_input, content, tone, structure, created_at \
             FROM documents ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        document_rows(records)
    }

    async fn count_documents_by_account(&self, account_id: Uuid) -> StoreResult<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM documents WHERE account_id = $1")
            .bind(account_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(count.max(0) as u64)
    }
}

//=========================================================================================
// `AuditTrail` Trait Implementation
//=========================================================================================

impl PgStore {
    async fn insert_audit(
        &self,
        account_id: Option<Uuid>,
        record: &NewAuditRecord,
    ) -> Result<AuditRecordRow, sqlx::Error> {
        // The sub-select degrades an unknown account to NULL instead of
        // tripping the foreign key.
        sqlx::query_as::<_, AuditRecordRow>(
            "INSERT INTO audit_records \
             (account_id, action, entity_type, entity_id, request_context_id, details) \
             VALUES ((SELECT id FROM accounts WHERE id = $1), $2, $3, $4, $5, $6) \
             RETURNING id, account_id, action, entity_type, entity_id, request_context_id, details, created_at",
        )
        .bind(account_id)
        .bind(record.action.as_str())
        .bind(record.entity.as_ref().map(|e| e.kind.as_str()))
        .bind(record.entity.as_ref().map(|e| e.id))
        .bind(record.request_context_id.as_deref())
        .bind(record.details.as_deref())
        .fetch_one(&self.pool)
        .await
    }
}

#[async_trait]
impl AuditTrail for PgStore {
    async fn append(&self, record: NewAuditRecord) -> StoreResult<AuditRecord> {
        let record = record.normalized();
        let row = match self.insert_audit(record.account_id, &record).await {
            // The account was deleted between the sub-select and the foreign
            // key check.
            Err(e) if is_foreign_key_violation(&e) => self.insert_audit(None, &record).await,
            other => other,
        }
        .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

        if row.account_id.is_none() {
            if let Some(requested) = record.account_id {
                warn!(
                    account_id = %requested,
                    action = %record.action,
                    "audit record references an unknown account; storing it without one"
                );
            }
        }
        row.to_domain()
    }

    async fn list_audit_by_account(
        &self,
        account_id: Uuid,
        page: Pagination,
    ) -> StoreResult<Vec<AuditRecord>> {
        let (limit, offset) = limit_offset(page);
        let rows = sqlx::query_as::<_, AuditRecordRow>(
            "SELECT id, account_id, action, entity_type, entity_id, request_context_id, details, created_at \
             FROM audit_records WHERE account_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
        )
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        audit_rows(rows)
    }

    async fn list_audit(&self, page: Pagination) -> StoreResult<Vec<AuditRecord>> {
        let (limit, offset) = limit_offset(page);
        let rows = sqlx::query_as::<_, AuditRecordRow>(
            "SELECT id, account_id, action, entity_type, entity_id, request_context_id, details, created_at \
             FROM audit_records ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        audit_rows(rows)
    }

    async fn list_audit_by_action(
        &self,
        action: &str,
        page: Pagination,
    ) -> StoreResult<Vec<AuditRecord>> {
        let Some(action) = AuditAction::lookup_key(action) else {
            return Ok(Vec::new());
        };
        let (limit, offset) = limit_offset(page);
        let rows = sqlx::query_as::<_, AuditRecordRow>(
            "SELECT id, account_id, action, entity_type, entity_id, request_context_id, details, created_at \
             FROM audit_records WHERE action = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
        )
        .bind(action)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        audit_rows(rows)
    }

    async fn find_by_request_context(
        &self,
        request_context_id: &str,
    ) -> StoreResult<Vec<AuditRecord>> {
        let rows = sqlx::query_as::<_, AuditRecordRow>(
            "SELECT id, account_id, action, entity_type, entity_id, request_context_id, details, created_at \
             FROM audit_records WHERE request_context_id = $1 \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(strip_nul(request_context_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        audit_rows(rows)
    }

    async fn find_audit_by_entity(
        &self,
        entity: &EntityRef,
        page: Pagination,
    ) -> StoreResult<Vec<AuditRecord>> {
        let entity = EntityRef::new(entity.kind.clone(), entity.id);
        let (limit, offset) = limit_offset(page);
        let rows = sqlx::query_as::<_, AuditRecordRow>(
            "SELECT id, account_id, action, entity_type, entity_id, request_context_id, details, created_at \
             FROM audit_records WHERE entity_type = $1 AND entity_id = $2 \
             ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4",
        )
        .bind(entity.kind.as_str())
        .bind(entity.id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        audit_rows(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violations_name_the_taken_identifier() {
        let err = classify_database_error(Some("23505"), Some("accounts_email_key"), "duplicate key");
        assert_eq!(err, StoreError::Conflict("email is already registered".into()));

        let err = classify_database_error(Some("23505"), Some("accounts_username_key"), "duplicate key");
        assert_eq!(err, StoreError::Conflict("username is already taken".into()));
    }

    #[test]
    fn integrity_and_check_violations_map_to_caller_errors() {
        assert!(matches!(
            classify_database_error(Some("23503"), Some("documents_account_id_fkey"), "fk"),
            StoreError::NotFound(_)
        ));
        for code in ["23514", "22001", "22021", "22P02", "23502"] {
            assert!(matches!(
                classify_database_error(Some(code), None, "bad input"),
                StoreError::Validation(_)
            ));
        }
    }

    #[test]
    fn everything_else_is_retryable_unavailability() {
        for code in [Some("08006"), Some("57P01"), Some("40001"), None] {
            let err = classify_database_error(code, None, "connection lost");
            assert!(err.is_retryable(), "{:?} should be retryable", code);
        }
        assert!(map_sqlx_error(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn pagination_binds_as_signed_integers() {
        assert_eq!(limit_offset(Pagination::new(25, 50)), (25, 50));
        assert_eq!(limit_offset(Pagination::new(10, u64::MAX)), (10, i64::MAX));
    }
}
