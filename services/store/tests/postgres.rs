//! Runs the store conformance suite against a live Postgres database.
//!
//! These tests need `DATABASE_URL` to point at a disposable database:
//! `DATABASE_URL=postgres://... cargo test -p store -- --ignored`

use docgen_store_core::conformance;
use docgen_store_core::ports::{AccountStore, AuditTrail};
use docgen_store_core::{AuditAction, NewAuditRecord, Pagination};
use sqlx::postgres::PgPoolOptions;
use store_lib::adapters::PgStore;

async fn connect() -> PgStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for Postgres tests");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to DATABASE_URL");
    let store = PgStore::new(pool);
    store.run_migrations().await.expect("migrations failed");
    store
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires DATABASE_URL"]
async fn pg_store_satisfies_the_conformance_suite() {
    conformance::run_all(connect).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn documents_cannot_be_updated_in_place() {
    let store = connect().await;
    let account = conformance::register(
        &store,
        &conformance::unique("immutable"),
        &format!("{}@example.com", conformance::unique("immutable")),
    )
    .await;
    let doc = conformance::generate_email(&store, account.id, "original body").await;

    let result = sqlx::query("UPDATE documents SET content = 'rewritten' WHERE id = $1")
        .bind(doc.id)
        .execute(store.pool())
        .await;
    assert!(result.is_err(), "documents must reject UPDATE");
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn audit_records_reject_edits_and_deletes() {
    let store = connect().await;
    let record = store
        .append(
            NewAuditRecord::new(AuditAction::new("generate_email").unwrap())
                .with_details("original"),
        )
        .await
        .unwrap();

    let edit = sqlx::query("UPDATE audit_records SET details = 'tampered' WHERE id = $1")
        .bind(record.id)
        .execute(store.pool())
        .await;
    assert!(edit.is_err(), "audit records must reject edits");

    let delete = sqlx::query("DELETE FROM audit_records WHERE id = $1")
        .bind(record.id)
        .execute(store.pool())
        .await;
    assert!(delete.is_err(), "audit records must reject deletes");
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn audit_records_detach_only_when_their_account_is_deleted() {
    let store = connect().await;
    let account = conformance::register(
        &store,
        &conformance::unique("detach"),
        &format!("{}@example.com", conformance::unique("detach")),
    )
    .await;
    let action = conformance::unique("login");
    let record = conformance::audit(&store, Some(account.id), &action, None).await;

    let detach = sqlx::query("UPDATE audit_records SET account_id = NULL WHERE id = $1")
        .bind(record.id)
        .execute(store.pool())
        .await;
    assert!(detach.is_err(), "live accounts must keep their audit records");

    let removal = store.delete_account(account.id).await.unwrap();
    assert_eq!(removal.audit_records_detached, 1);
    let listed = store
        .list_audit_by_action(&action, Pagination::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, record.id);
    assert_eq!(listed[0].account_id, None);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn nul_characters_are_validation_errors_not_outages() {
    let store = connect().await;
    let account = conformance::register(
        &store,
        &conformance::unique("nulraw"),
        &format!("{}@example.com", conformance::unique("nulraw")),
    )
    .await;

    let err = sqlx::query(
        "INSERT INTO documents (account_id, doc_type, content, tone) VALUES ($1, 'email', $2, 'casual')",
    )
    .bind(account.id)
    .bind("hi\0there")
    .execute(store.pool())
    .await
    .unwrap_err();
    let code = err
        .as_database_error()
        .and_then(|e| e.code().map(|c| c.into_owned()));
    assert_eq!(code.as_deref(), Some("22021"));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn report_structure_is_checked_by_the_schema() {
    let store = connect().await;
    let account = conformance::register(
        &store,
        &conformance::unique("checks"),
        &format!("{}@example.com", conformance::unique("checks")),
    )
    .await;

    let result = sqlx::query(
        "INSERT INTO documents (account_id, doc_type, content, tone, structure) \
         VALUES ($1, 'email', 'body', 'casual', 'detailed')",
    )
    .bind(account.id)
    .execute(store.pool())
    .await;
    let err = result.unwrap_err();
    let code = err
        .as_database_error()
        .and_then(|e| e.code().map(|c| c.into_owned()));
    assert_eq!(code.as_deref(), Some("23514"));
}
