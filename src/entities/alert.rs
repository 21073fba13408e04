// 🚨 Alert Event - Transient message for the notification channel

use serde::{Deserialize, Serialize};

pub const BUDGET_EXCEEDED_SUBJECT: &str = "Budget Exceeded";
pub const GUARDRAIL_MISSING_SUBJECT: &str = "Guardrail Missing";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub account_id: String,
    pub subject: String,
    pub message: String,
}

impl AlertEvent {
    pub fn exceeded_limit(account_id: &str) -> Self {
        AlertEvent {
            account_id: account_id.to_string(),
            subject: BUDGET_EXCEEDED_SUBJECT.to_string(),
            message: format!("The budget of account {} has exceeded the limit", account_id),
        }
    }

    pub fn exceeded_half_limit(account_id: &str) -> Self {
        AlertEvent {
            account_id: account_id.to_string(),
            subject: BUDGET_EXCEEDED_SUBJECT.to_string(),
            message: format!(
                "The budget of account {} has exceeded half of the limit",
                account_id
            ),
        }
    }

    /// Account exists but has no budget - needs out-of-band reconciliation
    pub fn guardrail_missing(account_id: &str, reason: &str) -> Self {
        AlertEvent {
            account_id: account_id.to_string(),
            subject: GUARDRAIL_MISSING_SUBJECT.to_string(),
            message: format!(
                "Account {} was provisioned but its budget guardrail could not be created: {}",
                account_id, reason
            ),
        }
    }
}
