// 💳 Account Entity - Registration request, stored record, change image
//
// "Email is IDENTITY, the local part is the provisioned account NAME"
//
// - AccountRequest: what the caller sends (validated, then frozen)
// - AccountRecord: what the store keeps (one per email, never updated)
// - ChangeEvent: what the store emits for every write
// - ProvisionedAccount: the sub-account derived from a record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ACCOUNT REQUEST
// ============================================================================

/// Inbound registration payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRequest {
    /// Unique identity - exactly one '@', non-empty on both sides
    pub email: String,

    #[serde(alias = "firstName")]
    pub first_name: String,

    #[serde(alias = "lastName")]
    pub last_name: String,

    #[serde(alias = "registrationDate")]
    pub registration_date: String,
}

impl AccountRequest {
    /// Parse a JSON body; the message is safe to hand back to the caller
    pub fn from_json(body: &str) -> Result<Self, String> {
        let request: AccountRequest =
            serde_json::from_str(body).map_err(|e| format!("Invalid request body: {}", e))?;
        request.validate()?;
        Ok(request)
    }

    /// Field-level checks applied after deserialization
    pub fn validate(&self) -> Result<(), String> {
        validate_email(&self.email)?;

        let fields = [
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
            ("registration_date", &self.registration_date),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(format!("Field {} must not be empty", name));
            }
        }

        Ok(())
    }

    /// Freeze into the persisted form
    pub fn into_record(self, created_at: DateTime<Utc>) -> AccountRecord {
        AccountRecord {
            email: self.email,
            first_name: self.first_name,
            last_name: self.last_name,
            registration_date: self.registration_date,
            created_at,
        }
    }
}

/// Exactly one '@' with something on each side
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.chars().any(char::is_whitespace) {
        return Err(format!("Invalid email {:?}: must not contain whitespace", email));
    }

    let at_count = email.matches('@').count();
    if at_count != 1 {
        return Err(format!(
            "Invalid email {:?}: expected exactly one '@', found {}",
            email, at_count
        ));
    }

    let (local, domain) = email.split_once('@').unwrap_or_default();
    if local.is_empty() || domain.is_empty() {
        return Err(format!("Invalid email {:?}: empty local part or domain", email));
    }

    Ok(())
}

/// Provisioned account name: everything before the first '@'
///
/// Two emails sharing a local part on different domains map to the same name;
/// the orchestrator detects that case instead of disambiguating it.
pub fn derive_account_name(email: &str) -> Option<&str> {
    match email.split_once('@') {
        Some((local, _)) if !local.is_empty() => Some(local),
        _ => None,
    }
}

// ============================================================================
// ACCOUNT RECORD
// ============================================================================

/// Persisted registration, keyed by email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub registration_date: String,

    /// Set by the store at write time
    pub created_at: DateTime<Utc>,
}

impl AccountRecord {
    pub fn account_name(&self) -> Option<&str> {
        derive_account_name(&self.email)
    }
}

// ============================================================================
// CHANGE EVENT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOperation {
    Insert,
    Modify,
    Remove,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Insert => "INSERT",
            ChangeOperation::Modify => "MODIFY",
            ChangeOperation::Remove => "REMOVE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INSERT" => Some(ChangeOperation::Insert),
            "MODIFY" => Some(ChangeOperation::Modify),
            "REMOVE" => Some(ChangeOperation::Remove),
            _ => None,
        }
    }
}

/// One write as seen on the change feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Monotonic per store, defines delivery order
    pub sequence: i64,

    pub operation: ChangeOperation,

    /// Record key (email)
    pub key: String,

    /// Full new image; absent for REMOVE
    pub new_record: Option<AccountRecord>,
}

impl ChangeEvent {
    pub fn is_insert(&self) -> bool {
        self.operation == ChangeOperation::Insert
    }
}

// ============================================================================
// PROVISIONED ACCOUNT
// ============================================================================

/// Sub-account created for one record; the provisioning back-end owns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedAccount {
    /// Derived account name, also the budget scope
    pub account_id: String,
    pub email: String,
}
