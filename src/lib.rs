// Account Vending - Core Library
// Registration → change feed → provisioning → budget guardrail, plus the periodic monitor

pub mod app;
pub mod backends;
pub mod change_feed;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod guardrail;
pub mod monitor;
pub mod provisioning;
pub mod registration;
pub mod retry;
pub mod sandbox;

#[cfg(feature = "server")]
pub mod api;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use app::Services;
pub use backends::{
    AccountDirectory, BudgetBackend, DirectoryAccount, Notifier, ProvisionRequest,
    ProvisionedProduct, ProvisioningBackend, ProvisioningParameters,
};
pub use change_feed::FeedProcessor;
pub use config::{Config, MonitorBasis};
pub use db::{
    AuditTrail, ChangeFeed, Event, PutOutcome, RecordStore, SqliteRecordStore,
    get_events_by_type, get_events_for_entity, insert_event, setup_database,
};
pub use entities::{
    AccountRecord, AccountRequest, AlertEvent, Budget, ChangeEvent, ChangeOperation,
    ProvisionedAccount, derive_account_name,
};
pub use error::{
    BackendError, ConfigError, GuardrailError, MonitorError, MonitorSkip, ProvisioningError,
    Rejected, StoreError,
};
pub use guardrail::{GuardrailManager, GuardrailReceipt};
pub use monitor::{evaluate_threshold, GuardrailMonitor, SweepReport, ThresholdVerdict};
pub use provisioning::{BatchReport, ProvisioningOrchestrator, ProvisioningOutcome};
pub use registration::{Accepted, RegistrationGate};
pub use retry::RetryPolicy;
pub use sandbox::SandboxCloud;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
