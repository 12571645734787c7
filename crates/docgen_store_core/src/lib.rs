pub mod audit;
pub mod credentials;
pub mod domain;
pub mod memory;
pub mod ports;

#[cfg(any(test, feature = "conformance"))]
pub mod conformance;

pub use audit::{record, AuditFailure};
pub use credentials::CredentialHash;
pub use domain::{
    Account, AccountRemoval, AuditAction, AuditRecord, DocType, Document, DocumentInput,
    EntityKind, EntityRef, NewAccount, NewAuditRecord, NewDocument, Pagination, Role, Structure,
    Tone,
};
pub use memory::InMemoryStore;
pub use ports::{AccountStore, AuditTrail, DocumentStore, Store, StoreError, StoreResult};
