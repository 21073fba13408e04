// 🔌 External Back-ends - Interface boundary of every collaborator outside the core
//
// Provisioning catalog, budgets service, account directory, notification channel.
// All calls are full request/response; transient failures surface as
// BackendError::Transient so callers can back off and retry.

use crate::entities::{AlertEvent, Budget, Subscriber, ThresholdNotification};
use crate::error::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// PROVISIONING
// ============================================================================

/// Named parameter set handed to the account product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningParameters {
    pub account_email: String,
    pub account_name: String,
    pub managed_organizational_unit: String,
    pub sso_user_email: String,
    pub sso_user_first_name: String,
    pub sso_user_last_name: String,
}

impl ProvisioningParameters {
    /// Key/value list in the order the product declares its parameters
    pub fn to_key_values(&self) -> Vec<(&'static str, String)> {
        vec![
            ("AccountEmail", self.account_email.clone()),
            ("AccountName", self.account_name.clone()),
            ("ManagedOrganizationalUnit", self.managed_organizational_unit.clone()),
            ("SSOUserEmail", self.sso_user_email.clone()),
            ("SSOUserFirstName", self.sso_user_first_name.clone()),
            ("SSOUserLastName", self.sso_user_last_name.clone()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub product_id: String,
    pub provisioning_artifact_id: String,

    /// Idempotency key on the back-end side: the derived account name
    pub provisioned_product_name: String,

    pub parameters: ProvisioningParameters,
}

/// What the catalog knows about an already provisioned account product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedProduct {
    pub name: String,
    pub account_email: String,
    pub product_id: String,
}

#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Look up a provisioned product by name
    async fn find_provisioned_product(
        &self,
        name: &str,
    ) -> Result<Option<ProvisionedProduct>, BackendError>;

    async fn provision_product(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ProvisionedProduct, BackendError>;
}

// ============================================================================
// BUDGETS
// ============================================================================

#[async_trait]
pub trait BudgetBackend: Send + Sync {
    /// `AlreadyExists` if a budget with the same name exists for the account
    async fn create_budget(&self, budget: &Budget) -> Result<(), BackendError>;

    /// `AlreadyExists` if an identical notification is attached
    async fn create_notification(
        &self,
        account_id: &str,
        budget_name: &str,
        notification: &ThresholdNotification,
        subscriber: &Subscriber,
    ) -> Result<(), BackendError>;

    async fn describe_budget(&self, account_id: &str, budget_name: &str) -> Result<Budget, BackendError>;
}

// ============================================================================
// ACCOUNT DIRECTORY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryAccount {
    pub id: String,
    pub email: String,
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn list_accounts(&self) -> Result<Vec<DirectoryAccount>, BackendError>;
}

// ============================================================================
// NOTIFICATION CHANNEL
// ============================================================================

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Best-effort delivery of one alert to `destination`
    async fn publish(&self, destination: &str, alert: &AlertEvent) -> Result<(), BackendError>;
}
