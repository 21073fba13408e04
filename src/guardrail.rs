// 🛡️ Guardrail Manager - Attach the monthly budget and its alarm to a new account
//
// Two calls, in order: create budget, then attach the >100% ACTUAL notification.
// Both tolerate AlreadyExists so redelivered change events converge.

use crate::backends::BudgetBackend;
use crate::config::GuardrailConfig;
use crate::entities::{Budget, Subscriber, ThresholdNotification, MONTHLY_BUDGET_NAME};
use crate::error::{BackendError, GuardrailError};
use crate::retry::RetryPolicy;
use std::sync::Arc;
use tracing::{info, instrument};

/// What ended up attached to the account
#[derive(Debug, Clone, PartialEq)]
pub struct GuardrailReceipt {
    pub account_id: String,
    pub budget_name: String,
    pub limit: String,
    pub currency: String,

    /// True when either call found the resource already in place
    pub already_present: bool,
}

pub struct GuardrailManager {
    budgets: Arc<dyn BudgetBackend>,
    config: GuardrailConfig,
    retry: RetryPolicy,
}

impl GuardrailManager {
    pub fn new(budgets: Arc<dyn BudgetBackend>, config: GuardrailConfig, retry: RetryPolicy) -> Self {
        GuardrailManager {
            budgets,
            config,
            retry,
        }
    }

    pub fn alert_topic(&self) -> &str {
        &self.config.alert_topic
    }

    /// Budget as it will be sent for `account_id`
    pub fn budget_for(&self, account_id: &str) -> Budget {
        Budget::monthly_guardrail(account_id, &self.config.budget_limit, &self.config.currency)
    }

    #[instrument(skip(self))]
    pub async fn create_guardrail(&self, account_id: &str) -> Result<GuardrailReceipt, GuardrailError> {
        let budget = self.budget_for(account_id);
        let budgets = &self.budgets;
        let budget_ref = &budget;

        let budget_existed = tolerate_existing(
            self.retry
                .run("budgets.create_budget", move || budgets.create_budget(budget_ref))
                .await,
        )
        .map_err(|source| GuardrailError::BudgetCreation {
            account_id: account_id.to_string(),
            source,
        })?;

        let notification = ThresholdNotification::actual_over_limit();
        let subscriber = Subscriber::topic(&self.config.alert_topic);
        let (notification_ref, subscriber_ref) = (&notification, &subscriber);

        let notification_existed = tolerate_existing(
            self.retry
                .run("budgets.create_notification", move || {
                    budgets.create_notification(
                        account_id,
                        MONTHLY_BUDGET_NAME,
                        notification_ref,
                        subscriber_ref,
                    )
                })
                .await,
        )
        .map_err(|source| GuardrailError::NotificationAttachment {
            account_id: account_id.to_string(),
            source,
        })?;

        let already_present = budget_existed || notification_existed;
        info!(
            limit = %self.config.budget_limit,
            currency = %self.config.currency,
            already_present,
            "guardrail in place"
        );

        Ok(GuardrailReceipt {
            account_id: account_id.to_string(),
            budget_name: MONTHLY_BUDGET_NAME.to_string(),
            limit: self.config.budget_limit.clone(),
            currency: self.config.currency.clone(),
            already_present,
        })
    }
}

/// Ok(true) when the back-end says the resource is already there
fn tolerate_existing(result: Result<(), BackendError>) -> Result<bool, BackendError> {
    match result {
        Ok(()) => Ok(false),
        Err(BackendError::AlreadyExists(_)) => Ok(true),
        Err(e) => Err(e),
    }
}
