// 📝 Registration Gate - Validate, deduplicate and persist one account request
//
// The duplicate check IS the write: put_if_absent is atomic, so two concurrent
// registrations for the same email cannot both succeed.

use crate::db::{AuditTrail, Event, PutOutcome, RecordStore, ENTITY_ACCOUNT, EVENT_ACCOUNT_REGISTERED};
use crate::entities::{AccountRecord, AccountRequest};
use crate::error::Rejected;
use crate::retry::RetryPolicy;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

pub const ACCEPTED_MESSAGE: &str = "Account information added successfully";
pub const DUPLICATE_MESSAGE: &str = "Account information already exists";

/// Successful registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub record: AccountRecord,

    /// Change-feed position of the write that will trigger provisioning
    pub sequence: i64,

    pub message: &'static str,
}

pub struct RegistrationGate {
    store: Arc<dyn RecordStore>,
    audit: Option<Arc<dyn AuditTrail>>,
    retry: RetryPolicy,
}

impl RegistrationGate {
    pub fn new(store: Arc<dyn RecordStore>, retry: RetryPolicy) -> Self {
        RegistrationGate {
            store,
            audit: None,
            retry,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditTrail>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Raw request body in, status out
    pub async fn register_json(&self, body: &str) -> Result<Accepted, Rejected> {
        let request = AccountRequest::from_json(body).map_err(|reason| {
            warn!(%reason, "rejecting malformed registration");
            Rejected::BadRequest(reason)
        })?;
        self.register(request).await
    }

    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn register(&self, request: AccountRequest) -> Result<Accepted, Rejected> {
        request.validate().map_err(Rejected::BadRequest)?;

        let record = request.into_record(Utc::now());
        let store = &self.store;
        let record_ref = &record;

        let outcome = self
            .retry
            .run("record_store.put_if_absent", move || store.put_if_absent(record_ref))
            .await
            .map_err(|e| {
                error!(error = %e, "record store write failed");
                Rejected::InternalError(format!("Failed to store account information: {}", e))
            })?;

        match outcome {
            PutOutcome::AlreadyPresent => {
                info!("duplicate registration rejected");
                Err(Rejected::BadRequest(DUPLICATE_MESSAGE.to_string()))
            }
            PutOutcome::Inserted { sequence } => {
                info!(sequence, "account record stored");
                self.audit_registered(&record, sequence).await;
                Ok(Accepted {
                    record,
                    sequence,
                    message: ACCEPTED_MESSAGE,
                })
            }
        }
    }

    async fn audit_registered(&self, record: &AccountRecord, sequence: i64) {
        let Some(audit) = &self.audit else { return };

        let entity_id = record.account_name().unwrap_or(&record.email);
        let event = Event::new(
            EVENT_ACCOUNT_REGISTERED,
            ENTITY_ACCOUNT,
            entity_id,
            serde_json::json!({
                "email": record.email,
                "registration_date": record.registration_date,
                "sequence": sequence,
            }),
            "registration_gate",
        );

        // Audit is best effort; the record is already committed
        if let Err(e) = audit.record(event).await {
            warn!(error = %e, "failed to audit registration");
        }
    }
}
