// 💰 Budget Entity - Monthly cost guardrail for one provisioned account
// Created once at provisioning time; spend accrues externally afterwards

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every managed account carries exactly one budget with this name
pub const MONTHLY_BUDGET_NAME: &str = "MonthlyBudget";

/// Cost filter key restricting a budget to one linked account
pub const LINKED_ACCOUNT_FILTER: &str = "LinkedAccount";

// ============================================================================
// BUDGET PARTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetType {
    Cost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeUnit {
    Monthly,
}

/// Amount as reported by the budget back-end (decimal string) plus unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spend {
    pub amount: String,
    pub unit: String,
}

impl Spend {
    pub fn new(amount: impl Into<String>, unit: impl Into<String>) -> Self {
        Spend {
            amount: amount.into(),
            unit: unit.into(),
        }
    }

    /// Numeric amount; `None` for unparseable or non-finite values
    pub fn parsed_amount(&self) -> Option<f64> {
        self.amount
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimePeriod {
    /// Effectively unbounded: 2000-01-01 through 2099-12-31
    pub fn open_ended() -> Self {
        TimePeriod {
            start: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN),
            end: NaiveDate::from_ymd_opt(2099, 12, 31).unwrap_or(NaiveDate::MAX),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostTypes {
    pub include_tax: bool,
    pub include_subscription: bool,
    pub use_blended: bool,
}

// ============================================================================
// BUDGET
// ============================================================================

/// Full budget definition as sent to, and described by, the budget back-end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub account_id: String,
    pub name: String,
    pub budget_type: BudgetType,
    pub time_unit: TimeUnit,
    pub time_period: TimePeriod,
    pub cost_filters: BTreeMap<String, Vec<String>>,
    pub cost_types: CostTypes,
    pub limit: Spend,
    pub actual_spend: Spend,
}

impl Budget {
    /// The guardrail every new account gets: monthly COST budget scoped to the account
    pub fn monthly_guardrail(account_id: &str, limit_amount: &str, currency: &str) -> Self {
        let mut cost_filters = BTreeMap::new();
        cost_filters.insert(LINKED_ACCOUNT_FILTER.to_string(), vec![account_id.to_string()]);

        Budget {
            account_id: account_id.to_string(),
            name: MONTHLY_BUDGET_NAME.to_string(),
            budget_type: BudgetType::Cost,
            time_unit: TimeUnit::Monthly,
            time_period: TimePeriod::open_ended(),
            cost_filters,
            cost_types: CostTypes {
                include_tax: true,
                include_subscription: true,
                use_blended: true,
            },
            limit: Spend::new(limit_amount, currency),
            actual_spend: Spend::new("0", currency),
        }
    }
}

// ============================================================================
// THRESHOLD NOTIFICATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    Actual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComparisonOperator {
    GreaterThan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThresholdType {
    Percentage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationState {
    Alarm,
}

/// Subscription condition stored alongside a budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdNotification {
    pub notification_type: NotificationType,
    pub comparison_operator: ComparisonOperator,
    pub threshold: f64,
    pub threshold_type: ThresholdType,
    pub notification_state: NotificationState,
}

impl ThresholdNotification {
    /// Fires once actual spend passes 100% of the limit
    pub fn actual_over_limit() -> Self {
        ThresholdNotification {
            notification_type: NotificationType::Actual,
            comparison_operator: ComparisonOperator::GreaterThan,
            threshold: 100.0,
            threshold_type: ThresholdType::Percentage,
            notification_state: NotificationState::Alarm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionType {
    Sns,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub subscription_type: SubscriptionType,
    pub address: String,
}

impl Subscriber {
    pub fn topic(address: &str) -> Self {
        Subscriber {
            subscription_type: SubscriptionType::Sns,
            address: address.to_string(),
        }
    }
}
