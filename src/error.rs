// ⚠️ Error Taxonomy - One enum per pipeline concern
// Registration errors return to the caller, everything else is one-way (logged + audited)

use thiserror::Error;

// ============================================================================
// TRANSIENT CLASSIFICATION
// ============================================================================

/// Errors that can tell whether retrying the same call might succeed
pub trait Transient {
    fn is_transient(&self) -> bool;
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Required key absent from the environment
    #[error("missing required configuration key {0}")]
    Missing(&'static str),

    /// Key present but unusable
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

// ============================================================================
// RECORD STORE
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store connection lock poisoned")]
    Poisoned,

    #[error("corrupt stored value in {column}: {value}")]
    Corrupt { column: &'static str, value: String },
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

// ============================================================================
// EXTERNAL BACK-ENDS (provisioning, budgets, directory, notifications)
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Throttling, timeouts, 5xx - worth retrying
    #[error("transient back-end failure: {0}")]
    Transient(String),

    /// The back-end refused the request
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("resource already exists: {0}")]
    AlreadyExists(String),
}

impl Transient for BackendError {
    fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

impl From<StoreError> for BackendError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            BackendError::Transient(err.to_string())
        } else {
            BackendError::Rejected(err.to_string())
        }
    }
}

// ============================================================================
// REGISTRATION GATE
// ============================================================================

/// Why a registration was not accepted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Rejected {
    /// Malformed input or duplicate identity - the caller must fix the request
    #[error("{0}")]
    BadRequest(String),

    /// Store failure - nothing was written, the caller may retry
    #[error("{0}")]
    InternalError(String),
}

impl Rejected {
    pub fn status_code(&self) -> u16 {
        match self {
            Rejected::BadRequest(_) => 400,
            Rejected::InternalError(_) => 500,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Rejected::BadRequest(msg) | Rejected::InternalError(msg) => msg,
        }
    }
}

// ============================================================================
// PROVISIONING ORCHESTRATOR
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProvisioningError {
    /// The change event did not carry a usable account record
    #[error("invalid account record: {0}")]
    InvalidRecord(String),

    /// Another email already owns the derived account name
    #[error("account name {name:?} is already provisioned for {existing_email}, refusing {requested_email}")]
    NameCollision {
        name: String,
        existing_email: String,
        requested_email: String,
    },

    #[error("provisioning back-end failed: {0}")]
    Backend(#[from] BackendError),
}

// ============================================================================
// GUARDRAIL MANAGER
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuardrailError {
    #[error("budget creation failed for account {account_id}: {source}")]
    BudgetCreation {
        account_id: String,
        source: BackendError,
    },

    #[error("threshold notification attachment failed for account {account_id}: {source}")]
    NotificationAttachment {
        account_id: String,
        source: BackendError,
    },
}

// ============================================================================
// GUARDRAIL MONITOR
// ============================================================================

/// A per-account failure during a sweep; the sweep moves on to the next account
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MonitorSkip {
    #[error("failed to describe budget for account {account_id}: {source}")]
    Fetch {
        account_id: String,
        source: BackendError,
    },

    #[error("failed to parse budget amount {value:?} for account {account_id}")]
    Parse { account_id: String, value: String },

    #[error("failed to send notification for account {account_id}: {source}")]
    Dispatch {
        account_id: String,
        source: BackendError,
    },
}

impl MonitorSkip {
    pub fn account_id(&self) -> &str {
        match self {
            MonitorSkip::Fetch { account_id, .. }
            | MonitorSkip::Parse { account_id, .. }
            | MonitorSkip::Dispatch { account_id, .. } => account_id,
        }
    }
}

/// A failure that prevents the whole sweep from running
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("failed to list accounts: {0}")]
    Directory(#[from] BackendError),
}
