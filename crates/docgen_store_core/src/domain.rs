//! crates/docgen_store_core/src/domain.rs
//!
//! Defines the pure, core data structures for the persistence layer.
//! These types are independent of any database; adapters map their rows
//! onto them and collaborators build the `New*` inputs before calling a store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credentials::CredentialHash;
use crate::ports::{StoreError, StoreResult};

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 50;
pub const EMAIL_MAX_LEN: usize = 255;
pub const TITLE_MAX_LEN: usize = 255;

//=========================================================================================
// Closed Enumerations
//=========================================================================================

/// Authorization role of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }
}

impl FromStr for Role {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USER" => Ok(Role::User),
            "ADMIN" => Ok(Role::Admin),
            _ => Err(StoreError::Validation(format!("unknown role '{}'", s))),
        }
    }
}

/// The kind of artifact a document is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Email,
    Report,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Email => "email",
            DocType::Report => "report",
        }
    }
}

impl FromStr for DocType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "email" => Ok(DocType::Email),
            "report" => Ok(DocType::Report),
            other => Err(StoreError::Validation(format!("unknown doc_type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Professional,
    Casual,
    Formal,
    Friendly,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Professional => "professional",
            Tone::Casual => "casual",
            Tone::Formal => "formal",
            Tone::Friendly => "friendly",
        }
    }
}

impl FromStr for Tone {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "professional" => Ok(Tone::Professional),
            "casual" => Ok(Tone::Casual),
            "formal" => Ok(Tone::Formal),
            "friendly" => Ok(Tone::Friendly),
            other => Err(StoreError::Validation(format!("unknown tone '{}'", other))),
        }
    }
}

/// Layout of a report. Only meaningful for `DocType::Report`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Structure {
    ExecutiveSummary,
    Detailed,
    BulletPoints,
}

impl Structure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Structure::ExecutiveSummary => "executive_summary",
            Structure::Detailed => "detailed",
            Structure::BulletPoints => "bullet_points",
        }
    }
}

impl FromStr for Structure {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "executive_summary" => Ok(Structure::ExecutiveSummary),
            "detailed" => Ok(Structure::Detailed),
            "bullet_points" => Ok(Structure::BulletPoints),
            other => Err(StoreError::Validation(format!("unknown structure '{}'", other))),
        }
    }
}

//=========================================================================================
// Accounts
//=========================================================================================

/// A registered identity. Identity is `id`; `username` and `email` are unique
/// but may change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub credential_hash: CredentialHash,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Validated input for account registration.
#[derive(Debug, Clone)]
pub struct NewAccount {
    username: String,
    email: String,
    credential_hash: CredentialHash,
    role: Role,
}

impl NewAccount {
    /// Validates the identifying fields. The role defaults to `Role::User`.
    pub fn new(
        username: &str,
        email: &str,
        credential_hash: CredentialHash,
    ) -> StoreResult<Self> {
        Ok(Self {
            username: validate_username(username)?,
            email: normalize_email(email)?,
            credential_hash,
            role: Role::default(),
        })
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn credential_hash(&self) -> &CredentialHash {
        &self.credential_hash
    }

    pub fn role(&self) -> Role {
        self.role
    }
}

/// What a cascading account deletion touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccountRemoval {
    pub documents_removed: u64,
    pub audit_records_detached: u64,
}

fn validate_username(username: &str) -> StoreResult<String> {
    let username = username.trim();
    let len = username.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(StoreError::Validation(format!(
            "username must be {}-{} characters",
            USERNAME_MIN_LEN, USERNAME_MAX_LEN
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(StoreError::Validation(
            "username may only contain letters, digits, '_', '.' and '-'".to_string(),
        ));
    }
    Ok(username.to_string())
}

/// Trims and lowercases an email address, rejecting anything that is not
/// shaped like `local@domain`.
pub fn normalize_email(email: &str) -> StoreResult<String> {
    let email = email.trim().to_lowercase();
    reject_nul("email", &email)?;
    if email.is_empty() || email.len() > EMAIL_MAX_LEN {
        return Err(StoreError::Validation(format!(
            "email must be 1-{} characters",
            EMAIL_MAX_LEN
        )));
    }
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(StoreError::Validation(format!("invalid email '{}'", email)));
    }
    Ok(email)
}

//=========================================================================================
// Documents
//=========================================================================================

/// An immutable generated artifact owned by exactly one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub id: Uuid,
    pub account_id: Uuid,
    pub doc_type: DocType,
    pub title: Option<String>,
    pub prompt_input: Option<String>,
    pub content: String,
    pub tone: Tone,
    pub structure: Option<Structure>,
    pub created_at: DateTime<Utc>,
}

/// Raw document fields as a collaborator receives them, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentInput {
    pub doc_type: Option<String>,
    pub content: Option<String>,
    pub tone: Option<String>,
    pub title: Option<String>,
    pub prompt_input: Option<String>,
    pub structure: Option<String>,
}

/// Validated document fields, ready to be stored for an owning account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    doc_type: DocType,
    content: String,
    tone: Tone,
    title: Option<String>,
    prompt_input: Option<String>,
    structure: Option<Structure>,
}

impl NewDocument {
    pub fn new(
        doc_type: DocType,
        content: &str,
        tone: Tone,
        title: Option<&str>,
        prompt_input: Option<&str>,
        structure: Option<Structure>,
    ) -> StoreResult<Self> {
        if content.trim().is_empty() {
            return Err(StoreError::Validation("content is required".to_string()));
        }
        reject_nul("content", content)?;
        if structure.is_some() && doc_type != DocType::Report {
            return Err(StoreError::Validation(format!(
                "structure only applies to report documents, not {}",
                doc_type
            )));
        }
        let title = title.map(str::trim).filter(|t| !t.is_empty());
        if let Some(t) = title {
            reject_nul("title", t)?;
            if t.chars().count() > TITLE_MAX_LEN {
                return Err(StoreError::Validation(format!(
                    "title must be at most {} characters",
                    TITLE_MAX_LEN
                )));
            }
        }

        Ok(Self {
            doc_type,
            content: content.to_string(),
            tone,
            title: title.map(str::to_string),
            prompt_input: prompt_input.and_then(sanitize_prompt_input),
            structure,
        })
    }

    pub fn doc_type(&self) -> DocType {
        self.doc_type
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn tone(&self) -> Tone {
        self.tone
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn prompt_input(&self) -> Option<&str> {
        self.prompt_input.as_deref()
    }

    pub fn structure(&self) -> Option<Structure> {
        self.structure
    }
}

impl TryFrom<DocumentInput> for NewDocument {
    type Error = StoreError;

    fn try_from(input: DocumentInput) -> Result<Self, Self::Error> {
        let doc_type = required(input.doc_type, "doc_type")?.parse::<DocType>()?;
        let content = required(input.content, "content")?;
        let tone = required(input.tone, "tone")?.parse::<Tone>()?;
        let structure = input
            .structure
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse::<Structure>())
            .transpose()?;

        NewDocument::new(
            doc_type,
            &content,
            tone,
            input.title.as_deref(),
            input.prompt_input.as_deref(),
            structure,
        )
    }
}

fn required(value: Option<String>, field: &str) -> StoreResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| StoreError::Validation(format!("{} is required", field)))
}

fn reject_nul(field: &str, value: &str) -> StoreResult<()> {
    if value.contains('\0') {
        return Err(StoreError::Validation(format!(
            "{} must not contain NUL characters",
            field
        )));
    }
    Ok(())
}

/// Removes NUL characters, which Postgres text columns cannot hold.
pub fn strip_nul(text: &str) -> String {
    text.replace('\0', "")
}

/// Strips control characters (keeping newlines and tabs) and surrounding
/// whitespace. Returns `None` when nothing is left.
pub fn sanitize_prompt_input(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

//=========================================================================================
// Audit Records
//=========================================================================================

/// A non-empty action label such as `generate_email`. Otherwise opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct AuditAction(String);

impl AuditAction {
    pub fn new(action: &str) -> StoreResult<Self> {
        let action = action.trim();
        if action.is_empty() {
            return Err(StoreError::Validation("audit action is required".to_string()));
        }
        reject_nul("audit action", action)?;
        Ok(Self(action.to_string()))
    }

    /// The form `action` takes when stored, for lookups. `None` means no
    /// stored action can match it.
    pub fn lookup_key(action: &str) -> Option<&str> {
        let action = action.trim();
        (!action.is_empty() && !action.contains('\0')).then_some(action)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Variant tag of a weakly referenced entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum EntityKind {
    Account,
    Document,
    Other(String),
}

impl EntityKind {
    pub fn as_str(&self) -> &str {
        match self {
            EntityKind::Account => "account",
            EntityKind::Document => "document",
            EntityKind::Other(kind) => kind,
        }
    }
}

impl From<&str> for EntityKind {
    fn from(kind: &str) -> Self {
        match strip_nul(kind).as_str() {
            "account" => EntityKind::Account,
            "document" => EntityKind::Document,
            other => EntityKind::Other(other.to_string()),
        }
    }
}

impl From<EntityKind> for String {
    fn from(kind: EntityKind) -> Self {
        kind.as_str().to_string()
    }
}

/// An identifier plus its kind. Never enforced against the referenced
/// relation: the target may be deleted while the audit record remains.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl EntityRef {
    /// `kind` is put in canonical form, so `Other("document")` becomes
    /// `Document`.
    pub fn new(kind: EntityKind, id: Uuid) -> Self {
        Self {
            kind: EntityKind::from(kind.as_str()),
            id,
        }
    }

    pub fn account(id: Uuid) -> Self {
        Self::new(EntityKind::Account, id)
    }

    pub fn document(id: Uuid) -> Self {
        Self::new(EntityKind::Document, id)
    }
}

/// An immutable log entry describing one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub id: i64,
    pub account_id: Option<Uuid>,
    pub action: AuditAction,
    pub entity: Option<EntityRef>,
    pub request_context_id: Option<String>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for `AuditTrail::append`, built fluently from the action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditRecord {
    pub account_id: Option<Uuid>,
    pub action: AuditAction,
    pub entity: Option<EntityRef>,
    pub request_context_id: Option<String>,
    pub details: Option<String>,
}

impl NewAuditRecord {
    pub fn new(action: AuditAction) -> Self {
        Self {
            account_id: None,
            action,
            entity: None,
            request_context_id: None,
            details: None,
        }
    }

    pub fn by_account(mut self, account_id: Uuid) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn on_entity(mut self, entity: EntityRef) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn in_context(mut self, request_context_id: impl Into<String>) -> Self {
        self.request_context_id = Some(request_context_id.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// The form every store persists: NUL removed from free text and the
    /// entity kind canonical.
    pub fn normalized(self) -> Self {
        Self {
            account_id: self.account_id,
            action: self.action,
            entity: self.entity.map(|e| EntityRef::new(e.kind, e.id)),
            request_context_id: self.request_context_id.map(|c| strip_nul(&c)),
            details: self.details.map(|d| strip_nul(&d)),
        }
    }
}

//=========================================================================================
// Pagination
//=========================================================================================

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Limit/offset window over an ordered listing. The limit is clamped to
/// `1..=MAX_PAGE_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    limit: u32,
    offset: u64,
}

impl Pagination {
    pub fn new(limit: u32, offset: u64) -> Self {
        Self {
            limit: limit.clamp(1, MAX_PAGE_SIZE),
            offset,
        }
    }

    /// The `page`th window (zero-based) of `per_page` items.
    pub fn page(page: u64, per_page: u32) -> Self {
        let per_page = per_page.clamp(1, MAX_PAGE_SIZE);
        Self::new(per_page, page.saturating_mul(per_page as u64))
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, 0)
    }
}

//=========================================================================================
// Display
//=========================================================================================

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash() -> CredentialHash {
        crate::conformance::password_hash()
    }

    #[test]
    fn nul_characters_are_rejected_in_validated_fields() {
        for result in [
            NewDocument::new(DocType::Email, "hi\0there", Tone::Casual, None, None, None).map(|_| ()),
            NewDocument::new(DocType::Email, "hi", Tone::Casual, Some("t\0"), None, None).map(|_| ()),
            NewAccount::new("nul_user", "a\0b@x.com", hash()).map(|_| ()),
            AuditAction::new("generate\0email").map(|_| ()),
        ] {
            assert!(matches!(result, Err(StoreError::Validation(_))));
        }
        let doc = NewDocument::new(DocType::Email, "hi", Tone::Casual, None, Some("a\0b"), None).unwrap();
        assert_eq!(doc.prompt_input(), Some("ab"));
    }

    #[test]
    fn audit_entries_are_normalized_for_storage() {
        let id = Uuid::new_v4();
        let entry = NewAuditRecord {
            entity: Some(EntityRef {
                kind: EntityKind::Other("document".into()),
                id,
            }),
            ..NewAuditRecord::new(AuditAction::new("export").unwrap())
        }
        .in_context("req\0-1")
        .with_details("a\0b")
        .normalized();

        assert_eq!(entry.entity, Some(EntityRef::document(id)));
        assert_eq!(entry.request_context_id.as_deref(), Some("req-1"));
        assert_eq!(entry.details.as_deref(), Some("ab"));
        assert_eq!(EntityRef::new(EntityKind::Other("account".into()), id).kind, EntityKind::Account);
    }

    #[test]
    fn action_lookup_key_matches_the_stored_form() {
        assert_eq!(AuditAction::lookup_key("  generate_email "), Some("generate_email"));
        assert_eq!(AuditAction::lookup_key("   "), None);
        assert_eq!(AuditAction::lookup_key("a\0b"), None);
    }

    #[test]
    fn role_parses_case_insensitively_and_rejects_unknown() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" USER ".parse::<Role>().unwrap(), Role::User);
        assert!(matches!(
            "superuser".parse::<Role>(),
            Err(StoreError::Validation(_))
        ));
        assert_eq!(Role::default(), Role::User);
    }

    #[test]
    fn enums_serialize_to_their_stored_text() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"ADMIN\"");
        assert_eq!(
            serde_json::to_string(&Structure::BulletPoints).unwrap(),
            "\"bullet_points\""
        );
        assert_eq!(
            serde_json::to_string(&EntityKind::Document).unwrap(),
            "\"document\""
        );
        for tone in [Tone::Professional, Tone::Casual, Tone::Formal, Tone::Friendly] {
            assert_eq!(tone.as_str().parse::<Tone>().unwrap(), tone);
        }
    }

    #[test]
    fn new_account_normalizes_email_and_defaults_role() {
        let account = NewAccount::new("alice", "  Alice@Example.COM ", hash()).unwrap();
        assert_eq!(account.email(), "alice@example.com");
        assert_eq!(account.role(), Role::User);
        assert_eq!(account.with_role(Role::Admin).role(), Role::Admin);
    }

    #[test]
    fn new_account_rejects_bad_identifiers() {
        for (username, email) in [
            ("al", "a@x.com"),
            ("alice smith", "a@x.com"),
            ("alice", "no-at-sign"),
            ("alice", "@x.com"),
            ("alice", "a@"),
            ("alice", "a@b@c"),
        ] {
            assert!(
                matches!(
                    NewAccount::new(username, email, hash()),
                    Err(StoreError::Validation(_))
                ),
                "{username} / {email} should be rejected"
            );
        }
    }

    #[test]
    fn document_input_requires_type_content_and_tone() {
        let full = DocumentInput {
            doc_type: Some("report".into()),
            content: Some("Q3 numbers".into()),
            tone: Some("formal".into()),
            structure: Some("executive_summary".into()),
            ..Default::default()
        };
        let doc = NewDocument::try_from(full.clone()).unwrap();
        assert_eq!(doc.structure(), Some(Structure::ExecutiveSummary));

        for missing in ["doc_type", "content", "tone"] {
            let mut input = full.clone();
            match missing {
                "doc_type" => input.doc_type = None,
                "content" => input.content = Some("   ".into()),
                _ => input.tone = None,
            }
            let err = NewDocument::try_from(input).unwrap_err();
            assert!(matches!(err, StoreError::Validation(ref m) if m.contains(missing)));
        }
    }

    #[test]
    fn document_input_rejects_values_outside_enumerations() {
        let input = DocumentInput {
            doc_type: Some("email".into()),
            content: Some("hi".into()),
            tone: Some("sarcastic".into()),
            ..Default::default()
        };
        assert!(matches!(
            NewDocument::try_from(input),
            Err(StoreError::Validation(_))
        ));

        let input = DocumentInput {
            doc_type: Some("report".into()),
            content: Some("hi".into()),
            tone: Some("casual".into()),
            structure: Some("haiku".into()),
            ..Default::default()
        };
        assert!(matches!(
            NewDocument::try_from(input),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn structure_is_rejected_on_emails() {
        let result = NewDocument::new(
            DocType::Email,
            "Hello",
            Tone::Friendly,
            None,
            None,
            Some(Structure::Detailed),
        );
        assert!(matches!(result, Err(StoreError::Validation(_))));
    }

    #[test]
    fn prompt_input_is_sanitized_and_blank_title_dropped() {
        let doc = NewDocument::new(
            DocType::Email,
            "Hello",
            Tone::Casual,
            Some("   "),
            Some("  write\u{0007} a note\n\tplease\u{0000} "),
            None,
        )
        .unwrap();
        assert_eq!(doc.title(), None);
        assert_eq!(doc.prompt_input(), Some("write a note\n\tplease"));
        assert_eq!(sanitize_prompt_input("\u{001b}  "), None);
    }

    #[test]
    fn audit_action_must_not_be_blank() {
        assert!(AuditAction::new("  ").is_err());
        assert_eq!(AuditAction::new(" generate_email ").unwrap().as_str(), "generate_email");
    }

    #[test]
    fn pagination_clamps_limit() {
        assert_eq!(Pagination::new(0, 5).limit(), 1);
        assert_eq!(Pagination::new(10_000, 0).limit(), MAX_PAGE_SIZE);
        assert_eq!(Pagination::default().limit(), DEFAULT_PAGE_SIZE);
        let third = Pagination::page(2, 25);
        assert_eq!((third.limit(), third.offset()), (25, 50));
    }
}
