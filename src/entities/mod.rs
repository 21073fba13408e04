// Entity Models
//
// - account: registration request, stored record, change event, provisioned account
// - budget: monthly guardrail and its threshold subscription
// - alert: message sent to the notification channel

pub mod account;
pub mod alert;
pub mod budget;

pub use account::{
    derive_account_name, validate_email, AccountRecord, AccountRequest, ChangeEvent,
    ChangeOperation, ProvisionedAccount,
};
pub use alert::{AlertEvent, BUDGET_EXCEEDED_SUBJECT, GUARDRAIL_MISSING_SUBJECT};
pub use budget::{
    Budget, BudgetType, ComparisonOperator, CostTypes, NotificationState, NotificationType, Spend,
    Subscriber, SubscriptionType, ThresholdNotification, ThresholdType, TimePeriod, TimeUnit,
    LINKED_ACCOUNT_FILTER, MONTHLY_BUDGET_NAME,
};
