//! crates/docgen_store_core/src/conformance.rs
//!
//! Behavioural checks every `Store` implementation must pass. Adapter crates
//! enable the `conformance` feature and call `run_all` with a factory for
//! their store. The checks only use unique usernames/emails and never assume
//! the store starts empty, so they can run against a shared database.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use uuid::Uuid;

use crate::credentials::CredentialHash;
use crate::domain::{
    Account, AuditAction, AuditRecord, DocType, Document, EntityKind, EntityRef, NewAccount,
    NewAuditRecord, NewDocument, Pagination, Role, Structure, Tone,
};
use crate::ports::{Store, StoreError};

/// Runs every check, each against a store produced by `make_store`.
pub async fn run_all<S, F, Fut>(make_store: F)
where
    S: Store + 'static,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    duplicate_username_conflicts(&make_store().await).await;
    duplicate_email_conflicts(&make_store().await).await;
    accounts_are_found_by_each_identifier(&make_store().await).await;
    role_updates_apply_to_existing_accounts(&make_store().await).await;
    document_for_missing_account_is_not_found(&make_store().await).await;
    documents_are_listed_newest_first(&make_store().await).await;
    documents_are_scoped_to_their_owner(&make_store().await).await;
    deleting_an_account_cascades(&make_store().await).await;
    audit_append_tolerates_missing_accounts(&make_store().await).await;
    audit_listings_are_ordered(&make_store().await).await;
    action_lookups_ignore_surrounding_whitespace(&make_store().await).await;
    entity_kinds_are_stored_in_canonical_form(&make_store().await).await;
    nul_characters_never_reach_storage(&make_store().await).await;
    concurrent_registrations_have_one_winner(Arc::new(make_store().await)).await;
    concurrent_document_creation_never_outlives_deletion(Arc::new(make_store().await)).await;
    readers_never_observe_a_partial_cascade(Arc::new(make_store().await)).await;
}

//=========================================================================================
// Fixtures
//=========================================================================================

/// A name that will not collide with other runs against the same store.
pub fn unique(prefix: &str) -> String {
    format!("{}_{}", prefix, &Uuid::new_v4().simple().to_string()[..12])
}

/// One shared hash; Argon2 is slow in debug builds.
pub fn password_hash() -> CredentialHash {
    static HASH: OnceLock<CredentialHash> = OnceLock::new();
    HASH.get_or_init(|| CredentialHash::from_password("password123").unwrap())
        .clone()
}

pub async fn register<S: Store + ?Sized>(store: &S, username: &str, email: &str) -> Account {
    let hash = password_hash();
    store
        .create_account(NewAccount::new(username, email, hash).unwrap())
        .await
        .unwrap()
}

async fn register_unique<S: Store + ?Sized>(store: &S, prefix: &str) -> Account {
    let username = unique(prefix);
    let email = format!("{}@example.com", username);
    register(store, &username, &email).await
}

pub async fn generate_email<S: Store + ?Sized>(store: &S, account_id: Uuid, body: &str) -> Document {
    let doc = NewDocument::new(
        DocType::Email,
        body,
        Tone::Professional,
        Some("Follow-up"),
        Some("write a follow-up email"),
        None,
    )
    .unwrap();
    store.create_document(account_id, doc).await.unwrap()
}

pub async fn audit<S: Store + ?Sized>(
    store: &S,
    account_id: Option<Uuid>,
    action: &str,
    request_context_id: Option<&str>,
) -> AuditRecord {
    let mut entry = NewAuditRecord::new(AuditAction::new(action).unwrap());
    if let Some(id) = account_id {
        entry = entry.by_account(id);
    }
    if let Some(ctx) = request_context_id {
        entry = entry.in_context(ctx);
    }
    store.append(entry).await.unwrap()
}

fn assert_newest_first(timestamps: impl Iterator<Item = chrono::DateTime<chrono::Utc>>) {
    let timestamps: Vec<_> = timestamps.collect();
    assert!(
        timestamps.windows(2).all(|w| w[0] >= w[1]),
        "expected newest first, got {:?}",
        timestamps
    );
}

//=========================================================================================
// Account Store
//=========================================================================================

pub async fn duplicate_username_conflicts<S: Store>(store: &S) {
    let first = register_unique(store, "dupuser").await;

    let hash = password_hash();
    let second = NewAccount::new(&first.username, &format!("other.{}", first.email), hash).unwrap();
    let err = store.create_account(second).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)), "got {:?}", err);
}

pub async fn duplicate_email_conflicts<S: Store>(store: &S) {
    let first = register_unique(store, "dupmail").await;

    let hash = password_hash();
    let shouted = first.email.to_uppercase();
    let second = NewAccount::new(&unique("dupmail"), &shouted, hash).unwrap();
    let err = store.create_account(second).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)), "got {:?}", err);
}

pub async fn accounts_are_found_by_each_identifier<S: Store>(store: &S) {
    let account = register_unique(store, "lookup").await;
    assert_eq!(account.role, Role::User);

    let by_id = store.find_account_by_id(account.id).await.unwrap();
    let by_name = store.find_account_by_username(&account.username).await.unwrap();
    let by_email = store
        .find_account_by_email(&account.email.to_uppercase())
        .await
        .unwrap();
    for found in [&by_id, &by_name, &by_email] {
        assert_eq!(found.id, account.id);
        assert!(found.credential_hash.verify("password123"));
    }

    assert!(matches!(
        store.find_account_by_username(&unique("ghost")).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.find_account_by_email("ghost@nowhere.example").await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.find_account_by_id(Uuid::new_v4()).await,
        Err(StoreError::NotFound(_))
    ));
}

pub async fn role_updates_apply_to_existing_accounts<S: Store>(store: &S) {
    let account = register_unique(store, "promote").await;

    let promoted = store
        .update_account_role(account.id, Role::Admin)
        .await
        .unwrap();
    assert_eq!(promoted.role, Role::Admin);
    assert_eq!(
        store.find_account_by_id(account.id).await.unwrap().role,
        Role::Admin
    );

    assert!(matches!(
        store.update_account_role(Uuid::new_v4(), Role::Admin).await,
        Err(StoreError::NotFound(_))
    ));
}

//=========================================================================================
// Document Store
//=========================================================================================

pub async fn document_for_missing_account_is_not_found<S: Store>(store: &S) {
    let doc = NewDocument::new(DocType::Email, "Hello", Tone::Friendly, None, None, None).unwrap();
    let err = store.create_document(Uuid::new_v4(), doc).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)), "got {:?}", err);
}

pub async fn documents_are_listed_newest_first<S: Store>(store: &S) {
    let account = register_unique(store, "lister").await;
    let report = NewDocument::new(
        DocType::Report,
        "Revenue grew.",
        Tone::Formal,
        Some("Q3"),
        None,
        Some(Structure::BulletPoints),
    )
    .unwrap();
    let mut created = vec![store.create_document(account.id, report).await.unwrap()];
    for i in 0..4 {
        created.push(generate_email(store, account.id, &format!("email #{}", i)).await);
    }
    assert_eq!(created[0].structure, Some(Structure::BulletPoints));

    let listed = store
        .list_documents_by_account(account.id, Pagination::new(10, 0))
        .await
        .unwrap();
    assert_eq!(listed.len(), 5);
    assert_newest_first(listed.iter().map(|d| d.created_at));
    let mut listed_ids: Vec<Uuid> = listed.iter().map(|d| d.id).collect();
    let mut created_ids: Vec<Uuid> = created.iter().map(|d| d.id).collect();
    listed_ids.sort();
    created_ids.sort();
    assert_eq!(listed_ids, created_ids);

    let second_page = store
        .list_documents_by_account(account.id, Pagination::new(2, 2))
        .await
        .unwrap();
    assert_eq!(second_page, listed[2..4].to_vec());

    assert_eq!(store.count_documents_by_account(account.id).await.unwrap(), 5);

    let global = store.list_all_documents(Pagination::new(50, 0)).await.unwrap();
    assert!(!global.is_empty());
    assert_newest_first(global.iter().map(|d| d.created_at));
}

pub async fn documents_are_scoped_to_their_owner<S: Store>(store: &S) {
    let owner = register_unique(store, "owner").await;
    let stranger = register_unique(store, "stranger").await;
    let doc = generate_email(store, owner.id, "private").await;

    // Stored documents never change after creation.
    let found = store.find_document(owner.id, doc.id).await.unwrap();
    assert_eq!(found, doc);
    assert_eq!(found.prompt_input.as_deref(), Some("write a follow-up email"));

    assert!(matches!(
        store.find_document(stranger.id, doc.id).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(store
        .list_documents_by_account(stranger.id, Pagination::default())
        .await
        .unwrap()
        .is_empty());
}

//=========================================================================================
// Cascading Deletion
//=========================================================================================

pub async fn deleting_an_account_cascades<S: Store>(store: &S) {
    let alice = register_unique(store, "alice").await;
    let bystander = register_unique(store, "bob").await;
    let d1 = generate_email(store, alice.id, "Dear team").await;
    let kept = generate_email(store, bystander.id, "Unrelated").await;
    let entry = NewAuditRecord::new(AuditAction::new("generate_email").unwrap())
        .by_account(alice.id)
        .on_entity(EntityRef::document(d1.id));
    let record = store.append(entry).await.unwrap();
    assert_eq!(record.account_id, Some(alice.id));

    let removal = store.delete_account(alice.id).await.unwrap();
    assert_eq!(removal.documents_removed, 1);
    assert_eq!(removal.audit_records_detached, 1);

    assert!(matches!(
        store.find_document(alice.id, d1.id).await,
        Err(StoreError::NotFound(_))
    ));
    assert_eq!(store.count_documents_by_account(alice.id).await.unwrap(), 0);
    assert!(matches!(
        store.find_account_by_id(alice.id).await,
        Err(StoreError::NotFound(_))
    ));
    assert_eq!(store.find_document(bystander.id, kept.id).await.unwrap(), kept);

    let surviving = store
        .find_audit_by_entity(&EntityRef::document(d1.id), Pagination::default())
        .await
        .unwrap();
    assert_eq!(surviving.len(), 1);
    assert_eq!(surviving[0].id, record.id);
    assert_eq!(surviving[0].account_id, None);
    assert_eq!(surviving[0].action, record.action);
    assert!(store
        .list_audit_by_account(alice.id, Pagination::default())
        .await
        .unwrap()
        .is_empty());

    // The identifiers are free again.
    register(store, &alice.username, &alice.email).await;

    assert!(matches!(
        store.delete_account(alice.id).await,
        Err(StoreError::NotFound(_))
    ));
}

//=========================================================================================
// Audit Trail
//=========================================================================================

pub async fn audit_append_tolerates_missing_accounts<S: Store>(store: &S) {
    let record = audit(store, Some(Uuid::new_v4()), "login_failed", None).await;
    assert_eq!(record.account_id, None);

    let anonymous = audit(store, None, "health_probe", None).await;
    assert_eq!(anonymous.account_id, None);
    assert!(anonymous.id > record.id);
}

pub async fn audit_listings_are_ordered<S: Store>(store: &S) {
    let account = register_unique(store, "auditor").await;
    let ctx = unique("req");
    let action = unique("generate_report");

    let first = audit(store, Some(account.id), &action, Some(&ctx)).await;
    let second = audit(store, Some(account.id), "view_document", Some(&ctx)).await;
    let third = audit(store, Some(account.id), &action, Some(&ctx)).await;
    let elsewhere = audit(store, None, &action, Some(&unique("req"))).await;

    let by_account = store
        .list_audit_by_account(account.id, Pagination::default())
        .await
        .unwrap();
    let ids: Vec<i64> = by_account.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![third.id, second.id, first.id]);

    let by_action = store
        .list_audit_by_action(&action, Pagination::default())
        .await
        .unwrap();
    let ids: Vec<i64> = by_action.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![elsewhere.id, third.id, first.id]);

    let paged = store
        .list_audit_by_action(&action, Pagination::new(1, 1))
        .await
        .unwrap();
    assert_eq!(paged.len(), 1);
    assert_eq!(paged[0].id, third.id);

    let in_context = store.find_by_request_context(&ctx).await.unwrap();
    let ids: Vec<i64> = in_context.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![first.id, second.id, third.id]);

    let recent = store.list_audit(Pagination::new(100, 0)).await.unwrap();
    assert_newest_first(recent.iter().map(|r| r.created_at));
    assert!(recent.iter().any(|r| r.id == elsewhere.id));

    assert!(store
        .find_by_request_context(&unique("req"))
        .await
        .unwrap()
        .is_empty());
}

pub async fn action_lookups_ignore_surrounding_whitespace<S: Store>(store: &S) {
    let action = unique("export_report");
    let written = audit(store, None, &format!("  {}\t", action), None).await;
    assert_eq!(written.action.as_str(), action);

    let found = store
        .list_audit_by_action(&format!(" {} ", action), Pagination::default())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, written.id);

    assert!(store
        .list_audit_by_action("   ", Pagination::default())
        .await
        .unwrap()
        .is_empty());
}

pub async fn entity_kinds_are_stored_in_canonical_form<S: Store>(store: &S) {
    let id = Uuid::new_v4();
    let mut entry = NewAuditRecord::new(AuditAction::new("archive_document").unwrap());
    entry.entity = Some(EntityRef {
        kind: EntityKind::Other("document".to_string()),
        id,
    });
    let written = store.append(entry).await.unwrap();
    assert_eq!(written.entity, Some(EntityRef::document(id)));

    let found = store
        .find_audit_by_entity(&EntityRef::document(id), Pagination::default())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0], written);
}

pub async fn nul_characters_never_reach_storage<S: Store>(store: &S) {
    let account = register_unique(store, "nul").await;

    let err = NewDocument::new(DocType::Email, "hi\0there", Tone::Casual, None, None, None)
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)), "got {:?}", err);
    assert!(!err.is_retryable());
    assert!(matches!(
        AuditAction::new("generate\0email"),
        Err(StoreError::Validation(_))
    ));
    let hash = password_hash();
    assert!(matches!(
        NewAccount::new(&unique("nul"), "nul\0@example.com", hash),
        Err(StoreError::Validation(_))
    ));

    // Free text in an audit entry is stripped, never rejected.
    let ctx = unique("req");
    let entry = NewAuditRecord::new(AuditAction::new("generate_email").unwrap())
        .by_account(account.id)
        .in_context(format!("{}\0", ctx))
        .with_details("a\0b");
    let written = store.append(entry).await.unwrap();
    assert_eq!(written.details.as_deref(), Some("ab"));
    assert_eq!(written.request_context_id.as_deref(), Some(ctx.as_str()));
    assert_eq!(written.account_id, Some(account.id));

    let mut odd_kind = NewAuditRecord::new(AuditAction::new("tag").unwrap());
    odd_kind.entity = Some(EntityRef {
        kind: EntityKind::Other("tem\0plate".to_string()),
        id: Uuid::new_v4(),
    });
    let written_kind = store.append(odd_kind).await.unwrap();
    assert_eq!(
        written_kind.entity.map(|e| e.kind),
        Some(EntityKind::Other("template".to_string()))
    );

    let replay = store
        .find_by_request_context(&format!("{}\0", ctx))
        .await
        .unwrap();
    assert_eq!(replay, vec![written]);
    assert!(store
        .list_audit_by_action("generate\0email", Pagination::default())
        .await
        .unwrap()
        .is_empty());
}

//=========================================================================================
// Concurrency
//=========================================================================================

pub async fn concurrent_registrations_have_one_winner<S: Store + 'static>(store: Arc<S>) {
    let username = unique("racer");
    let email = format!("{}@example.com", username);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        let (username, email) = (username.clone(), email.clone());
        tasks.push(tokio::spawn(async move {
            let hash = password_hash();
            let account = NewAccount::new(&username, &email, hash).unwrap();
            store.create_account(account).await
        }));
    }

    let mut winners = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => winners += 1,
            Err(StoreError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }
    assert_eq!(winners, 1);
}

pub async fn concurrent_document_creation_never_outlives_deletion<S: Store + 'static>(
    store: Arc<S>,
) {
    let account_id = register_unique(store.as_ref(), "doomed").await.id;

    let mut tasks = Vec::new();
    for i in 0..16 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            let doc = NewDocument::new(
                DocType::Email,
                &format!("draft {}", i),
                Tone::Casual,
                None,
                None,
                None,
            )
            .unwrap();
            store.create_document(account_id, doc).await
        }));
    }
    store.delete_account(account_id).await.unwrap();

    for task in tasks {
        match task.await.unwrap() {
            Ok(doc) => assert!(matches!(
                store.find_document(account_id, doc.id).await,
                Err(StoreError::NotFound(_))
            )),
            Err(StoreError::NotFound(_)) => {}
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }
    assert_eq!(store.count_documents_by_account(account_id).await.unwrap(), 0);
}

/// Readers running alongside a cascading delete see either everything the
/// account owned or nothing of it.
pub async fn readers_never_observe_a_partial_cascade<S: Store + 'static>(store: Arc<S>) {
    const DOCUMENTS: usize = 6;
    const AUDIT_RECORDS: usize = 4;

    let account_id = register_unique(store.as_ref(), "cascade").await.id;
    let mut document_ids = Vec::new();
    for i in 0..DOCUMENTS {
        let doc = generate_email(store.as_ref(), account_id, &format!("body {}", i)).await;
        document_ids.push(doc.id);
    }
    for _ in 0..AUDIT_RECORDS {
        audit(store.as_ref(), Some(account_id), "generate_email", None).await;
    }
    let document_ids = Arc::new(document_ids);
    let deleted = Arc::new(AtomicBool::new(false));

    let mut readers = Vec::new();
    for _ in 0..4 {
        let store = Arc::clone(&store);
        let document_ids = Arc::clone(&document_ids);
        let deleted = Arc::clone(&deleted);
        readers.push(tokio::spawn(async move {
            loop {
                let finished = deleted.load(Ordering::SeqCst);

                let owned = store
                    .list_documents_by_account(account_id, Pagination::new(100, 0))
                    .await
                    .unwrap();
                assert!(
                    owned.len() == DOCUMENTS || owned.is_empty(),
                    "saw {} of {} documents",
                    owned.len(),
                    DOCUMENTS
                );

                let global = store.list_all_documents(Pagination::new(100, 0)).await.unwrap();
                let visible = global.iter().filter(|d| document_ids.contains(&d.id)).count();
                assert!(
                    visible == DOCUMENTS || visible == 0,
                    "saw {} of {} documents in the global listing",
                    visible,
                    DOCUMENTS
                );

                let attached = store
                    .list_audit_by_account(account_id, Pagination::new(100, 0))
                    .await
                    .unwrap();
                assert!(
                    attached.len() == AUDIT_RECORDS || attached.is_empty(),
                    "saw {} of {} attached audit records",
                    attached.len(),
                    AUDIT_RECORDS
                );

                if finished {
                    assert!(owned.is_empty() && visible == 0 && attached.is_empty());
                    break;
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    for _ in 0..3 {
        tokio::task::yield_now().await;
    }
    let removal = store.delete_account(account_id).await.unwrap();
    deleted.store(true, Ordering::SeqCst);
    assert_eq!(removal.documents_removed, DOCUMENTS as u64);
    assert_eq!(removal.audit_records_detached, AUDIT_RECORDS as u64);

    for reader in readers {
        reader.await.unwrap();
    }
}
