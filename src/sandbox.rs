// 🧪 Sandbox Cloud - SQLite stand-in for the external back-ends
//
// Lets the whole pipeline run on one machine: provisioning catalog, budgets
// service, account directory and alert topic all live in sandbox_* tables.
// Spend never accrues by itself; set_actual_spend() moves it.

use crate::backends::{
    AccountDirectory, BudgetBackend, DirectoryAccount, Notifier, ProvisionRequest,
    ProvisionedProduct, ProvisioningBackend,
};
use crate::entities::{AlertEvent, Budget, Spend, Subscriber, ThresholdNotification};
use crate::error::{BackendError, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

fn setup_sandbox(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sandbox_products (
            name TEXT PRIMARY KEY NOT NULL,
            account_email TEXT NOT NULL,
            product_id TEXT NOT NULL,
            provisioning_artifact_id TEXT NOT NULL,
            parameters TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sandbox_budgets (
            account_id TEXT NOT NULL,
            name TEXT NOT NULL,
            definition TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (account_id, name)
        );

        CREATE TABLE IF NOT EXISTS sandbox_notifications (
            account_id TEXT NOT NULL,
            budget_name TEXT NOT NULL,
            subscriber_address TEXT NOT NULL,
            notification TEXT NOT NULL,
            subscriber TEXT NOT NULL,
            PRIMARY KEY (account_id, budget_name, subscriber_address)
        );

        CREATE TABLE IF NOT EXISTS sandbox_alerts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            destination TEXT NOT NULL,
            account_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            message TEXT NOT NULL,
            published_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Alert as recorded on the sandbox topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedAlert {
    pub destination: String,
    pub alert: AlertEvent,
    pub published_at: String,
}

#[derive(Clone)]
pub struct SandboxCloud {
    conn: Arc<Mutex<Connection>>,
}

impl SandboxCloud {
    pub fn new(conn: Connection) -> Result<Self, StoreError> {
        setup_sandbox(&conn)?;
        Ok(SandboxCloud {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::new(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::new(Connection::open_in_memory()?)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }

    fn load_budget(conn: &Connection, account_id: &str, name: &str) -> Result<Option<Budget>, StoreError> {
        let definition: Option<String> = conn
            .query_row(
                "SELECT definition FROM sandbox_budgets WHERE account_id = ?1 AND name = ?2",
                params![account_id, name],
                |row| row.get(0),
            )
            .optional()?;

        match definition {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Move the accrued spend of an account's budget
    pub fn set_actual_spend(&self, account_id: &str, budget_name: &str, amount: &str) -> Result<(), BackendError> {
        let found = self.with_conn(|conn| {
            let Some(mut budget) = Self::load_budget(conn, account_id, budget_name)? else {
                return Ok(false);
            };
            budget.actual_spend = Spend::new(amount, budget.actual_spend.unit.clone());
            conn.execute(
                "UPDATE sandbox_budgets SET definition = ?1 WHERE account_id = ?2 AND name = ?3",
                params![serde_json::to_string(&budget)?, account_id, budget_name],
            )?;
            Ok(true)
        })?;

        if found {
            Ok(())
        } else {
            Err(BackendError::NotFound(format!("budget {} for account {}", budget_name, account_id)))
        }
    }

    /// Everything published so far, oldest first
    pub fn alerts(&self) -> Result<Vec<PublishedAlert>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT destination, account_id, subject, message, published_at
                 FROM sandbox_alerts ORDER BY id ASC",
            )?;
            let alerts = stmt
                .query_map([], |row| {
                    Ok(PublishedAlert {
                        destination: row.get(0)?,
                        alert: AlertEvent {
                            account_id: row.get(1)?,
                            subject: row.get(2)?,
                            message: row.get(3)?,
                        },
                        published_at: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(alerts)
        })
    }

    pub fn notification_count(&self, account_id: &str) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM sandbox_notifications WHERE account_id = ?1",
                [account_id],
                |row| row.get(0),
            )?)
        })
    }
}

#[async_trait]
impl ProvisioningBackend for SandboxCloud {
    async fn find_provisioned_product(&self, name: &str) -> Result<Option<ProvisionedProduct>, BackendError> {
        let product = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT name, account_email, product_id FROM sandbox_products WHERE name = ?1",
                    [name],
                    |row| {
                        Ok(ProvisionedProduct {
                            name: row.get(0)?,
                            account_email: row.get(1)?,
                            product_id: row.get(2)?,
                        })
                    },
                )
                .optional()?)
        })?;
        Ok(product)
    }

    async fn provision_product(&self, request: &ProvisionRequest) -> Result<ProvisionedProduct, BackendError> {
        let parameters: serde_json::Map<String, serde_json::Value> = request
            .parameters
            .to_key_values()
            .into_iter()
            .map(|(key, value)| (key.to_string(), serde_json::Value::String(value)))
            .collect();
        let parameters = serde_json::Value::Object(parameters).to_string();

        let inserted = self.with_conn(|conn| {
            let result = conn.execute(
                "INSERT INTO sandbox_products
                    (name, account_email, product_id, provisioning_artifact_id, parameters, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    request.provisioned_product_name,
                    request.parameters.account_email,
                    request.product_id,
                    request.provisioning_artifact_id,
                    parameters,
                    Utc::now().to_rfc3339(),
                ],
            );
            match result {
                Ok(_) => Ok(true),
                Err(e) if is_constraint_violation(&e) => Ok(false),
                Err(e) => Err(e.into()),
            }
        })?;

        if !inserted {
            return Err(BackendError::AlreadyExists(format!(
                "provisioned product {}",
                request.provisioned_product_name
            )));
        }

        debug!(name = %request.provisioned_product_name, "sandbox product provisioned");
        Ok(ProvisionedProduct {
            name: request.provisioned_product_name.clone(),
            account_email: request.parameters.account_email.clone(),
            product_id: request.product_id.clone(),
        })
    }
}

#[async_trait]
impl BudgetBackend for SandboxCloud {
    async fn create_budget(&self, budget: &Budget) -> Result<(), BackendError> {
        let definition = serde_json::to_string(budget).map_err(StoreError::from)?;
        let inserted = self.with_conn(|conn| {
            match conn.execute(
                "INSERT INTO sandbox_budgets (account_id, name, definition, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![budget.account_id, budget.name, definition, Utc::now().to_rfc3339()],
            ) {
                Ok(_) => Ok(true),
                Err(e) if is_constraint_violation(&e) => Ok(false),
                Err(e) => Err(e.into()),
            }
        })?;

        if inserted {
            Ok(())
        } else {
            Err(BackendError::AlreadyExists(format!("budget {} for account {}", budget.name, budget.account_id)))
        }
    }

    async fn create_notification(
        &self,
        account_id: &str,
        budget_name: &str,
        notification: &ThresholdNotification,
        subscriber: &Subscriber,
    ) -> Result<(), BackendError> {
        let notification_json = serde_json::to_string(notification).map_err(StoreError::from)?;
        let subscriber_json = serde_json::to_string(subscriber).map_err(StoreError::from)?;

        let outcome = self.with_conn(|conn| {
            if Self::load_budget(conn, account_id, budget_name)?.is_none() {
                return Ok(None);
            }
            match conn.execute(
                "INSERT INTO sandbox_notifications
                    (account_id, budget_name, subscriber_address, notification, subscriber)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![account_id, budget_name, subscriber.address, notification_json, subscriber_json],
            ) {
                Ok(_) => Ok(Some(true)),
                Err(e) if is_constraint_violation(&e) => Ok(Some(false)),
                Err(e) => Err(e.into()),
            }
        })?;

        match outcome {
            None => Err(BackendError::NotFound(format!("budget {} for account {}", budget_name, account_id))),
            Some(false) => Err(BackendError::AlreadyExists(format!(
                "notification on {} for {}",
                budget_name, subscriber.address
            ))),
            Some(true) => Ok(()),
        }
    }

    async fn describe_budget(&self, account_id: &str, budget_name: &str) -> Result<Budget, BackendError> {
        self.with_conn(|conn| Self::load_budget(conn, account_id, budget_name))?
            .ok_or_else(|| BackendError::NotFound(format!("budget {} for account {}", budget_name, account_id)))
    }
}

#[async_trait]
impl AccountDirectory for SandboxCloud {
    async fn list_accounts(&self) -> Result<Vec<DirectoryAccount>, BackendError> {
        let accounts = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name, account_email FROM sandbox_products ORDER BY created_at, name")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(DirectoryAccount {
                        id: row.get(0)?,
                        email: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        Ok(accounts)
    }
}

#[async_trait]
impl Notifier for SandboxCloud {
    async fn publish(&self, destination: &str, alert: &AlertEvent) -> Result<(), BackendError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sandbox_alerts (destination, account_id, subject, message, published_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![destination, alert.account_id, alert.subject, alert.message, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })?;
        Ok(())
    }
}
