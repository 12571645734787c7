use docgen_store_core::{
    record, AccountStore, AuditAction, AuditTrail, CredentialHash, DocType, DocumentInput,
    DocumentStore, EntityKind, EntityRef, InMemoryStore, NewAccount, NewAuditRecord, NewDocument,
    Pagination, Role, StoreError, Tone,
};
use uuid::Uuid;

fn new_account(username: &str, email: &str) -> NewAccount {
    let hash = CredentialHash::from_password("hunter22").unwrap();
    NewAccount::new(username, email, hash).unwrap()
}

#[tokio::test]
async fn deleting_alice_removes_her_document_and_keeps_the_audit_trail() {
    let store = InMemoryStore::new();
    let u1 = store
        .create_account(new_account("alice", "a@x.com"))
        .await
        .unwrap();

    let d1 = store
        .create_document(
            u1.id,
            NewDocument::new(DocType::Email, "Hi Bob,", Tone::Professional, None, None, None)
                .unwrap(),
        )
        .await
        .unwrap();

    let entry = NewAuditRecord::new(AuditAction::new("generate_email").unwrap())
        .by_account(u1.id)
        .on_entity(EntityRef::document(d1.id))
        .in_context("req-1")
        .with_details("subject=Hi Bob");
    let audit = record(&store, entry).await.unwrap();

    store.delete_account(u1.id).await.unwrap();

    assert!(matches!(
        store.find_document(u1.id, d1.id).await,
        Err(StoreError::NotFound(_))
    ));
    let all = store.list_audit(Pagination::default()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, audit.id);
    assert_eq!(all[0].account_id, None);
    assert_eq!(all[0].entity, Some(EntityRef::document(d1.id)));
    assert_eq!(all[0].details.as_deref(), Some("subject=Hi Bob"));
    assert!(store.list_all_documents(Pagination::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn second_account_with_the_same_email_conflicts() {
    let store = InMemoryStore::new();
    store
        .create_account(new_account("user_one", "shared@x.com"))
        .await
        .unwrap();

    let err = store
        .create_account(new_account("user_two", "Shared@X.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn document_for_an_unknown_account_is_not_found() {
    let store = InMemoryStore::new();
    let input = DocumentInput {
        doc_type: Some("report".into()),
        content: Some("Summary".into()),
        tone: Some("formal".into()),
        structure: Some("detailed".into()),
        ..Default::default()
    };
    let doc = NewDocument::try_from(input).unwrap();

    let err = store.create_document(Uuid::new_v4(), doc).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn unrecognized_role_is_a_validation_error() {
    let err = "OWNER".parse::<Role>().unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let store = InMemoryStore::new();
    let admin = store
        .create_account(new_account("root", "root@x.com").with_role("admin".parse().unwrap()))
        .await
        .unwrap();
    assert_eq!(admin.role, Role::Admin);
}

#[tokio::test]
async fn request_context_replays_in_the_order_events_happened() {
    let store = InMemoryStore::new();
    let account = store
        .create_account(new_account("dana", "dana@x.com"))
        .await
        .unwrap();

    let mut appended = Vec::new();
    for action in ["login", "generate_report", "download_report", "logout"] {
        let entry = NewAuditRecord::new(AuditAction::new(action).unwrap())
            .by_account(account.id)
            .in_context("session-42");
        appended.push(store.append(entry).await.unwrap().id);
    }
    store
        .append(NewAuditRecord::new(AuditAction::new("login").unwrap()).in_context("session-43"))
        .await
        .unwrap();

    let replay: Vec<i64> = store
        .find_by_request_context("session-42")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(replay, appended);

    let newest_first: Vec<i64> = store
        .list_audit_by_account(account.id, Pagination::default())
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    let mut expected = appended.clone();
    expected.reverse();
    assert_eq!(newest_first, expected);
}

#[tokio::test]
async fn audit_entity_references_outlive_their_targets() {
    let store = InMemoryStore::new();
    let entity = EntityRef::new(EntityKind::Other("template".into()), Uuid::new_v4());

    store
        .append(
            NewAuditRecord::new(AuditAction::new("delete_template").unwrap())
                .on_entity(entity.clone()),
        )
        .await
        .unwrap();

    let found = store
        .find_audit_by_entity(&entity, Pagination::default())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].entity.as_ref().map(|e| e.kind.as_str()), Some("template"));
}
