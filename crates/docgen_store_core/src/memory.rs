//! crates/docgen_store_core/src/memory.rs
//!
//! An in-process implementation of every store port. All relations live behind
//! one `RwLock`, which makes uniqueness checks and cascading deletes atomic
//! with respect to concurrent readers. Each access pattern has its own ordered
//! index, mirroring the indexes declared in the Postgres schema.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{
    normalize_email, strip_nul, Account, AccountRemoval, AuditAction, AuditRecord, Document,
    EntityRef, NewAccount, NewAuditRecord, NewDocument, Pagination, Role,
};
use crate::ports::{AccountStore, AuditTrail, DocumentStore, StoreError, StoreResult};

/// Newest-first ordering key: creation time, then insertion sequence.
type Recency = Reverse<(DateTime<Utc>, u64)>;

fn recency(created_at: DateTime<Utc>, seq: u64) -> Recency {
    Reverse((created_at, seq))
}

/// The smallest `Recency`, i.e. the start of a newest-first scan.
fn newest() -> Recency {
    Reverse((DateTime::<Utc>::MAX_UTC, u64::MAX))
}

#[derive(Default)]
struct Tables {
    next_seq: u64,
    last_stamp: Option<DateTime<Utc>>,

    accounts: HashMap<Uuid, Account>,
    accounts_by_username: HashMap<String, Uuid>,
    accounts_by_email: HashMap<String, Uuid>,

    documents: HashMap<Uuid, Document>,
    documents_by_account: BTreeMap<(Uuid, Recency), Uuid>,
    documents_by_created: BTreeMap<Recency, Uuid>,

    audit_records: BTreeMap<u64, AuditRecord>,
    audit_by_account: BTreeSet<(Uuid, Recency)>,
    audit_by_created: BTreeSet<Recency>,
    audit_by_action: BTreeSet<(String, Recency)>,
    audit_by_context: BTreeSet<(String, DateTime<Utc>, u64)>,
    audit_by_entity: BTreeSet<(String, Uuid, Recency)>,
}

impl Tables {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// The current time, never earlier than any previous stamp.
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = match self.last_stamp {
            Some(last) => Utc::now().max(last),
            None => Utc::now(),
        };
        self.last_stamp = Some(now);
        now
    }

    fn audit_page(&self, seqs: impl Iterator<Item = u64>, page: Pagination) -> Vec<AuditRecord> {
        seqs.skip(offset(page))
            .take(page.limit() as usize)
            .filter_map(|seq| self.audit_records.get(&seq).cloned())
            .collect()
    }

    fn document_page<'a>(
        &self,
        ids: impl Iterator<Item = &'a Uuid>,
        page: Pagination,
    ) -> Vec<Document> {
        ids.skip(offset(page))
            .take(page.limit() as usize)
            .filter_map(|id| self.documents.get(id).cloned())
            .collect()
    }
}

fn offset(page: Pagination) -> usize {
    usize::try_from(page.offset()).unwrap_or(usize::MAX)
}

//=========================================================================================
// The Store Struct
//=========================================================================================

/// A store that keeps every relation in memory.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::StorageUnavailable("in-memory store is poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::StorageUnavailable("in-memory store is poisoned".to_string()))
    }
}

//=========================================================================================
// `AccountStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl AccountStore for InMemoryStore {
    async fn create_account(&self, account: NewAccount) -> StoreResult<Account> {
        let mut tables = self.write()?;

        if tables.accounts_by_username.contains_key(account.username()) {
            return Err(StoreError::Conflict(format!(
                "username '{}' is already taken",
                account.username()
            )));
        }
        if tables.accounts_by_email.contains_key(account.email()) {
            return Err(StoreError::Conflict(format!(
                "email '{}' is already registered",
                account.email()
            )));
        }

        let created_at = tables.stamp();
        let created = Account {
            id: Uuid::new_v4(),
            username: account.username().to_string(),
            email: account.email().to_string(),
            credential_hash: account.credential_hash().clone(),
            role: account.role(),
            created_at,
        };
        tables
            .accounts_by_username
            .insert(created.username.clone(), created.id);
        tables
            .accounts_by_email
            .insert(created.email.clone(), created.id);
        tables.accounts.insert(created.id, created.clone());

        debug!(account_id = %created.id, "account created");
        Ok(created)
    }

    async fn find_account_by_id(&self, account_id: Uuid) -> StoreResult<Account> {
        self.read()?
            .accounts
            .get(&account_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Account {} not found", account_id)))
    }

    async fn find_account_by_username(&self, username: &str) -> StoreResult<Account> {
        let tables = self.read()?;
        tables
            .accounts_by_username
            .get(username.trim())
            .and_then(|id| tables.accounts.get(id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Account '{}' not found", username)))
    }

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Account> {
        let not_found = || StoreError::NotFound(format!("Account with email '{}' not found", email));
        let email = normalize_email(email).map_err(|_| not_found())?;
        let tables = self.read()?;
        tables
            .accounts_by_email
            .get(&email)
            .and_then(|id| tables.accounts.get(id))
            .cloned()
            .ok_or_else(not_found)
    }

    async fn update_account_role(&self, account_id: Uuid, role: Role) -> StoreResult<Account> {
        let mut tables = self.write()?;
        let account = tables
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| StoreError::NotFound(format!("Account {} not found", account_id)))?;
        account.role = role;
        Ok(account.clone())
    }

    async fn delete_account(&self, account_id: Uuid) -> StoreResult<AccountRemoval> {
        let mut tables = self.write()?;
        let account = tables
            .accounts
            .remove(&account_id)
            .ok_or_else(|| StoreError::NotFound(format!("Account {} not found", account_id)))?;
        tables.accounts_by_username.remove(&account.username);
        tables.accounts_by_email.remove(&account.email);

        // Owned documents go with their account.
        let owned: Vec<(Recency, Uuid)> = tables
            .documents_by_account
            .range((account_id, newest())..)
            .take_while(|((owner, _), _)| *owner == account_id)
            .map(|((_, key), id)| (*key, *id))
            .collect();
        for (key, document_id) in &owned {
            tables.documents_by_account.remove(&(account_id, *key));
            tables.documents_by_created.remove(key);
            tables.documents.remove(document_id);
        }

        // Associated audit records stay, without their account.
        let associated: Vec<Recency> = tables
            .audit_by_account
            .range((account_id, newest())..)
            .take_while(|(owner, _)| *owner == account_id)
            .map(|(_, key)| *key)
            .collect();
        for key in &associated {
            tables.audit_by_account.remove(&(account_id, *key));
            let Reverse((_, seq)) = *key;
            if let Some(record) = tables.audit_records.get_mut(&seq) {
                record.account_id = None;
            }
        }

        let removal = AccountRemoval {
            documents_removed: owned.len() as u64,
            audit_records_detached: associated.len() as u64,
        };
        debug!(
            account_id = %account_id,
            documents_removed = removal.documents_removed,
            audit_records_detached = removal.audit_records_detached,
            "account deleted"
        );
        Ok(removal)
    }
}

//=========================================================================================
// `DocumentStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn create_document(
        &self,
        account_id: Uuid,
        document: NewDocument,
    ) -> StoreResult<Document> {
        let mut tables = self.write()?;
        if !tables.accounts.contains_key(&account_id) {
            return Err(StoreError::NotFound(format!(
                "Account {} not found",
                account_id
            )));
        }

        let created_at = tables.stamp();
        let created = Document {
            id: Uuid::new_v4(),
            account_id,
            doc_type: document.doc_type(),
            title: document.title().map(str::to_string),
            prompt_input: document.prompt_input().map(str::to_string),
            content: document.content().to_string(),
            tone: document.tone(),
            structure: document.structure(),
            created_at,
        };
        let seq = tables.next_seq();
        let key = recency(created.created_at, seq);
        tables.documents_by_account.insert((account_id, key), created.id);
        tables.documents_by_created.insert(key, created.id);
        tables.documents.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_document(&self, account_id: Uuid, document_id: Uuid) -> StoreResult<Document> {
        self.read()?
            .documents
            .get(&document_id)
            .filter(|doc| doc.account_id == account_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Document {} not found", document_id)))
    }

    async fn list_documents_by_account(
        &self,
        account_id: Uuid,
        page: Pagination,
    ) -> StoreResult<Vec<Document>> {
        let tables = self.read()?;
        let ids = tables
            .documents_by_account
            .range((account_id, newest())..)
            .take_while(|((owner, _), _)| *owner == account_id)
            .map(|(_, id)| id);
        Ok(tables.document_page(ids, page))
    }

    async fn list_all_documents(&self, page: Pagination) -> StoreResult<Vec<Document>> {
        let tables = self.read()?;
        Ok(tables.document_page(tables.documents_by_created.values(), page))
    }

    async fn count_documents_by_account(&self, account_id: Uuid) -> StoreResult<u64> {
        let tables = self.read()?;
        let count = tables
            .documents_by_account
            .range((account_id, newest())..)
            .take_while(|((owner, _), _)| *owner == account_id)
            .count();
        Ok(count as u64)
    }
}

//=========================================================================================
// `AuditTrail` Trait Implementation
//=========================================================================================

#[async_trait]
impl AuditTrail for InMemoryStore {
    async fn append(&self, record: NewAuditRecord) -> StoreResult<AuditRecord> {
        let record = record.normalized();
        let mut tables = self.write()?;

        let account_id = match record.account_id {
            Some(id) if tables.accounts.contains_key(&id) => Some(id),
            Some(id) => {
                warn!(account_id = %id, action = %record.action, "audit record references an unknown account; storing it without one");
                None
            }
            None => None,
        };

        let seq = tables.next_seq();
        let created_at = tables.stamp();
        let created = AuditRecord {
            id: seq as i64,
            account_id,
            action: record.action,
            entity: record.entity,
            request_context_id: record.request_context_id,
            details: record.details,
            created_at,
        };
        let key = recency(created.created_at, seq);

        if let Some(id) = created.account_id {
            tables.audit_by_account.insert((id, key));
        }
        tables.audit_by_created.insert(key);
        tables
            .audit_by_action
            .insert((created.action.as_str().to_string(), key));
        if let Some(ctx) = &created.request_context_id {
            tables
                .audit_by_context
                .insert((ctx.clone(), created.created_at, seq));
        }
        if let Some(entity) = &created.entity {
            tables
                .audit_by_entity
                .insert((entity.kind.as_str().to_string(), entity.id, key));
        }
        tables.audit_records.insert(seq, created.clone());
        Ok(created)
    }

    async fn list_audit_by_account(
        &self,
        account_id: Uuid,
        page: Pagination,
    ) -> StoreResult<Vec<AuditRecord>> {
        let tables = self.read()?;
        let seqs = tables
            .audit_by_account
            .range((account_id, newest())..)
            .take_while(|(owner, _)| *owner == account_id)
            .map(|(_, Reverse((_, seq)))| *seq);
        Ok(tables.audit_page(seqs, page))
    }

    async fn list_audit(&self, page: Pagination) -> StoreResult<Vec<AuditRecord>> {
        let tables = self.read()?;
        let seqs = tables.audit_by_created.iter().map(|Reverse((_, seq))| *seq);
        Ok(tables.audit_page(seqs, page))
    }

    async fn list_audit_by_action(
        &self,
        action: &str,
        page: Pagination,
    ) -> StoreResult<Vec<AuditRecord>> {
        let Some(action) = AuditAction::lookup_key(action) else {
            return Ok(Vec::new());
        };
        let tables = self.read()?;
        let seqs = tables
            .audit_by_action
            .range((action.to_string(), newest())..)
            .take_while(|(a, _)| a == action)
            .map(|(_, Reverse((_, seq)))| *seq);
        Ok(tables.audit_page(seqs, page))
    }

    async fn find_by_request_context(
        &self,
        request_context_id: &str,
    ) -> StoreResult<Vec<AuditRecord>> {
        let request_context_id = strip_nul(request_context_id);
        let tables = self.read()?;
        let records = tables
            .audit_by_context
            .range((request_context_id.clone(), DateTime::<Utc>::MIN_UTC, 0)..)
            .take_while(|(ctx, _, _)| *ctx == request_context_id)
            .filter_map(|(_, _, seq)| tables.audit_records.get(seq).cloned())
            .collect();
        Ok(records)
    }

    async fn find_audit_by_entity(
        &self,
        entity: &EntityRef,
        page: Pagination,
    ) -> StoreResult<Vec<AuditRecord>> {
        let entity = EntityRef::new(entity.kind.clone(), entity.id);
        let tables = self.read()?;
        let kind = entity.kind.as_str().to_string();
        let seqs = tables
            .audit_by_entity
            .range((kind.clone(), entity.id, newest())..)
            .take_while(|(k, id, _)| *k == kind && *id == entity.id)
            .map(|(_, _, Reverse((_, seq)))| *seq);
        Ok(tables.audit_page(seqs, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;

    #[tokio::test]
    async fn satisfies_the_store_conformance_suite() {
        conformance::run_all(|| async { InMemoryStore::new() }).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cascades_are_atomic_for_parallel_readers() {
        for _ in 0..10 {
            conformance::readers_never_observe_a_partial_cascade(std::sync::Arc::new(
                InMemoryStore::new(),
            ))
            .await;
        }
    }

    #[tokio::test]
    async fn detached_audit_records_leave_the_account_index() {
        let store = InMemoryStore::new();
        let account = conformance::register(&store, "carol", "carol@x.com").await;
        conformance::audit(&store, Some(account.id), "login", None).await;

        store.delete_account(account.id).await.unwrap();

        let tables = store.read().unwrap();
        assert!(tables.audit_by_account.is_empty());
        assert_eq!(tables.audit_by_created.len(), 1);
        assert!(tables.documents_by_created.is_empty());
    }
}
