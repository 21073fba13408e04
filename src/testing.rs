// Test doubles for the collaborator seams, with call counters and failure injection

use crate::backends::{
    AccountDirectory, BudgetBackend, DirectoryAccount, Notifier, ProvisionRequest,
    ProvisionedProduct, ProvisioningBackend,
};
use crate::config::{GuardrailConfig, ProvisioningConfig};
use crate::db::{PutOutcome, RecordStore, SqliteRecordStore};
use crate::entities::{
    AccountRecord, AlertEvent, Budget, ChangeEvent, ChangeOperation, Subscriber,
    ThresholdNotification,
};
use crate::error::{BackendError, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

pub const ALERT_TOPIC: &str = "arn:sandbox:alerts";

pub fn guardrail_config() -> GuardrailConfig {
    GuardrailConfig {
        budget_limit: "1000".to_string(),
        currency: "USD".to_string(),
        alert_topic: ALERT_TOPIC.to_string(),
    }
}

pub fn provisioning_config() -> ProvisioningConfig {
    ProvisioningConfig {
        product_id: "prod-sandbox".to_string(),
        provisioning_artifact_id: "pa-v1".to_string(),
        managed_organizational_unit: "Sandbox".to_string(),
    }
}

pub fn sample_record(email: &str) -> AccountRecord {
    AccountRecord {
        email: email.to_string(),
        first_name: "Test".to_string(),
        last_name: "User".to_string(),
        registration_date: "2024-04-01".to_string(),
        created_at: Utc::now(),
    }
}

pub fn insert_event(sequence: i64, email: &str) -> ChangeEvent {
    ChangeEvent {
        sequence,
        operation: ChangeOperation::Insert,
        key: email.to_string(),
        new_record: Some(sample_record(email)),
    }
}

/// Decrement a failure budget; true while failures remain
fn take_one(remaining: &AtomicU32) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn busy_error() -> StoreError {
    StoreError::Sqlite(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
        None,
    ))
}

// ============================================================================
// RECORD STORE
// ============================================================================

/// Wraps an in-memory store; fails the first `busy` writes with SQLITE_BUSY,
/// or every write when `permanent` is set
pub struct FlakyStore {
    inner: SqliteRecordStore,
    busy: AtomicU32,
    permanent: bool,
    attempts: AtomicU32,
}

impl FlakyStore {
    fn build(busy: u32, permanent: bool) -> Self {
        FlakyStore {
            inner: SqliteRecordStore::open_in_memory("account_information").unwrap(),
            busy: AtomicU32::new(busy),
            permanent,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn busy_for(failures: u32) -> Self {
        Self::build(failures, false)
    }

    pub fn failing_permanently() -> Self {
        Self::build(0, true)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn get(&self, email: &str) -> Result<Option<AccountRecord>, StoreError> {
        self.inner.get(email).await
    }

    async fn put_if_absent(&self, record: &AccountRecord) -> Result<PutOutcome, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.permanent {
            return Err(StoreError::Poisoned);
        }
        let remaining = self.busy.load(Ordering::SeqCst);
        if remaining > 0 {
            self.busy.store(remaining - 1, Ordering::SeqCst);
            return Err(busy_error());
        }
        self.inner.put_if_absent(record).await
    }
}

// ============================================================================
// PROVISIONING
// ============================================================================

#[derive(Default)]
pub struct FakeProvisioning {
    products: Mutex<BTreeMap<String, ProvisionedProduct>>,
    requests: Mutex<Vec<ProvisionRequest>>,
    fail_all: Mutex<Option<BackendError>>,
    fail_named: Mutex<HashMap<String, BackendError>>,
    transient_remaining: AtomicU32,
    timeouts_after_create: AtomicU32,
    concurrent_product: Mutex<Option<ProvisionedProduct>>,
    lookups: AtomicU32,
}

impl FakeProvisioning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_provision(&self, err: BackendError) {
        *self.fail_all.lock().unwrap() = Some(err);
    }

    pub fn fail_provision_for(&self, name: &str, err: BackendError) {
        self.fail_named.lock().unwrap().insert(name.to_string(), err);
    }

    /// Fail the next `count` provision calls before anything is created
    pub fn transient_failures(&self, count: u32) {
        self.transient_remaining.store(count, Ordering::SeqCst);
    }

    /// Create the product, then report a timeout, for the next `count` calls
    pub fn timeout_after_create(&self, count: u32) {
        self.timeouts_after_create.store(count, Ordering::SeqCst);
    }

    /// Another writer claims this product right before the next provision call
    pub fn race_with(&self, product: ProvisionedProduct) {
        *self.concurrent_product.lock().unwrap() = Some(product);
    }

    pub fn product_count(&self) -> usize {
        self.products.lock().unwrap().len()
    }

    /// Successful provisioning requests, in call order
    pub fn requests(&self) -> Vec<ProvisionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn lookups(&self) -> u32 {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProvisioningBackend for FakeProvisioning {
    async fn find_provisioned_product(&self, name: &str) -> Result<Option<ProvisionedProduct>, BackendError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.products.lock().unwrap().get(name).cloned())
    }

    async fn provision_product(&self, request: &ProvisionRequest) -> Result<ProvisionedProduct, BackendError> {
        if let Some(err) = self.fail_all.lock().unwrap().clone() {
            return Err(err);
        }
        if let Some(err) = self.fail_named.lock().unwrap().get(&request.provisioned_product_name) {
            return Err(err.clone());
        }
        if take_one(&self.transient_remaining) {
            return Err(BackendError::Transient("connection reset".into()));
        }

        let mut products = self.products.lock().unwrap();
        if let Some(winner) = self.concurrent_product.lock().unwrap().take() {
            products.insert(winner.name.clone(), winner);
        }
        if products.contains_key(&request.provisioned_product_name) {
            return Err(BackendError::AlreadyExists(request.provisioned_product_name.clone()));
        }

        let product = ProvisionedProduct {
            name: request.provisioned_product_name.clone(),
            account_email: request.parameters.account_email.clone(),
            product_id: request.product_id.clone(),
        };
        products.insert(product.name.clone(), product.clone());
        if take_one(&self.timeouts_after_create) {
            return Err(BackendError::Transient("request timed out".into()));
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(product)
    }
}

// ============================================================================
// BUDGETS
// ============================================================================

pub type RecordedNotification = (String, String, ThresholdNotification, Subscriber);

#[derive(Default)]
pub struct FakeBudgets {
    budgets: Mutex<Vec<Budget>>,
    created: Mutex<Vec<Budget>>,
    notifications: Mutex<Vec<RecordedNotification>>,
    budget_failure: Mutex<Option<BackendError>>,
    notification_failure: Mutex<Option<BackendError>>,
    describe_failures: Mutex<HashMap<String, BackendError>>,
    transient_remaining: AtomicU32,
    create_budget_calls: AtomicU32,
}

impl FakeBudgets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create_budget(&self, err: BackendError) {
        *self.budget_failure.lock().unwrap() = Some(err);
    }

    pub fn fail_create_notification(&self, err: BackendError) {
        *self.notification_failure.lock().unwrap() = Some(err);
    }

    pub fn fail_describe_for(&self, account_id: &str, err: BackendError) {
        self.describe_failures
            .lock()
            .unwrap()
            .insert(account_id.to_string(), err);
    }

    pub fn transient_budget_failures(&self, count: u32) {
        self.transient_remaining.store(count, Ordering::SeqCst);
    }

    /// Seed a budget directly, bypassing create_budget
    pub fn put_budget(&self, budget: Budget) {
        self.budgets.lock().unwrap().push(budget);
    }

    /// Budgets created through create_budget
    pub fn created_budgets(&self) -> Vec<Budget> {
        self.created.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<RecordedNotification> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn create_budget_calls(&self) -> u32 {
        self.create_budget_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BudgetBackend for FakeBudgets {
    async fn create_budget(&self, budget: &Budget) -> Result<(), BackendError> {
        self.create_budget_calls.fetch_add(1, Ordering::SeqCst);

        if take_one(&self.transient_remaining) {
            return Err(BackendError::Transient("throttled".into()));
        }
        if let Some(err) = self.budget_failure.lock().unwrap().clone() {
            return Err(err);
        }

        let mut budgets = self.budgets.lock().unwrap();
        if budgets
            .iter()
            .any(|b| b.account_id == budget.account_id && b.name == budget.name)
        {
            return Err(BackendError::AlreadyExists(budget.name.clone()));
        }
        budgets.push(budget.clone());
        self.created.lock().unwrap().push(budget.clone());
        Ok(())
    }

    async fn create_notification(
        &self,
        account_id: &str,
        budget_name: &str,
        notification: &ThresholdNotification,
        subscriber: &Subscriber,
    ) -> Result<(), BackendError> {
        if let Some(err) = self.notification_failure.lock().unwrap().clone() {
            return Err(err);
        }

        let mut notifications = self.notifications.lock().unwrap();
        if notifications
            .iter()
            .any(|(a, b, _, s)| a == account_id && b == budget_name && s == subscriber)
        {
            return Err(BackendError::AlreadyExists(format!("notification on {}", budget_name)));
        }
        notifications.push((
            account_id.to_string(),
            budget_name.to_string(),
            notification.clone(),
            subscriber.clone(),
        ));
        Ok(())
    }

    async fn describe_budget(&self, account_id: &str, budget_name: &str) -> Result<Budget, BackendError> {
        if let Some(err) = self.describe_failures.lock().unwrap().get(account_id) {
            return Err(err.clone());
        }
        self.budgets
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.account_id == account_id && b.name == budget_name)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("{} for {}", budget_name, account_id)))
    }
}

// ============================================================================
// DIRECTORY & NOTIFIER
// ============================================================================

#[derive(Default)]
pub struct FakeDirectory {
    accounts: Mutex<Vec<DirectoryAccount>>,
    failure: Mutex<Option<BackendError>>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, account_id: &str) {
        self.accounts.lock().unwrap().push(DirectoryAccount {
            id: account_id.to_string(),
            email: format!("{}@example.com", account_id),
        });
    }

    pub fn fail(&self, err: BackendError) {
        *self.failure.lock().unwrap() = Some(err);
    }
}

#[async_trait]
impl AccountDirectory for FakeDirectory {
    async fn list_accounts(&self) -> Result<Vec<DirectoryAccount>, BackendError> {
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.accounts.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    published: Mutex<Vec<(String, AlertEvent)>>,
    failing_accounts: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, account_id: &str) {
        self.failing_accounts.lock().unwrap().push(account_id.to_string());
    }

    pub fn published(&self) -> Vec<(String, AlertEvent)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(&self, destination: &str, alert: &AlertEvent) -> Result<(), BackendError> {
        if self
            .failing_accounts
            .lock()
            .unwrap()
            .contains(&alert.account_id)
        {
            return Err(BackendError::Rejected("topic unavailable".into()));
        }
        self.published
            .lock()
            .unwrap()
            .push((destination.to_string(), alert.clone()));
        Ok(())
    }
}
