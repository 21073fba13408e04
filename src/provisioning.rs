// 🏗️ Provisioning Orchestrator - Change event in, guarded account out
//
// INSERT → derive name → idempotency check → provision → guardrail
//
// Every event is handled in isolation: one failure never blocks the rest of
// the batch. Redelivery converges because an already provisioned product with
// the same email is treated as done, a provision retry that hits AlreadyExists
// adopts the product it created, and the guardrail step tolerates
// AlreadyExists.

use crate::backends::{
    Notifier, ProvisionRequest, ProvisionedProduct, ProvisioningBackend, ProvisioningParameters,
};
use crate::config::ProvisioningConfig;
use crate::db::{
    AuditTrail, Event, ENTITY_ACCOUNT, EVENT_ACCOUNT_PROVISIONED, EVENT_GUARDRAIL_CREATED,
    EVENT_GUARDRAIL_FAILED, EVENT_PROVISIONING_FAILED,
};
use crate::entities::{AccountRecord, AlertEvent, ChangeEvent, ChangeOperation, ProvisionedAccount};
use crate::error::{BackendError, GuardrailError, ProvisioningError};
use crate::guardrail::{GuardrailManager, GuardrailReceipt};
use crate::retry::RetryPolicy;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

const ACTOR: &str = "provisioning_orchestrator";

// ============================================================================
// OUTCOMES
// ============================================================================

/// How one change event ended
#[derive(Debug, Clone, PartialEq)]
pub enum ProvisioningOutcome {
    /// Account provisioned (now or earlier) and guardrail attached
    Guarded {
        account: ProvisionedAccount,
        receipt: GuardrailReceipt,
        newly_provisioned: bool,
    },

    /// Account exists but the budget could not be attached
    Unguarded {
        account: ProvisionedAccount,
        error: GuardrailError,
    },

    /// Not an INSERT; nothing to do
    Ignored { operation: ChangeOperation },

    /// Pipeline halted before the guardrail step
    Failed { error: ProvisioningError },
}

impl ProvisioningOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProvisioningOutcome::Guarded { .. } => "guarded",
            ProvisioningOutcome::Unguarded { .. } => "unguarded",
            ProvisioningOutcome::Ignored { .. } => "ignored",
            ProvisioningOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// (sequence, outcome) in delivery order
    pub outcomes: Vec<(i64, ProvisioningOutcome)>,
}

impl BatchReport {
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Highest sequence handled, the acknowledgement point
    pub fn last_sequence(&self) -> Option<i64> {
        self.outcomes.iter().map(|(seq, _)| *seq).max()
    }

    fn count(&self, label: &str) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.label() == label).count()
    }

    pub fn guarded(&self) -> usize {
        self.count("guarded")
    }

    pub fn unguarded(&self) -> usize {
        self.count("unguarded")
    }

    pub fn ignored(&self) -> usize {
        self.count("ignored")
    }

    pub fn failed(&self) -> usize {
        self.count("failed")
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct ProvisioningOrchestrator {
    provisioning: Arc<dyn ProvisioningBackend>,
    guardrails: GuardrailManager,
    notifier: Arc<dyn Notifier>,
    audit: Option<Arc<dyn AuditTrail>>,
    config: ProvisioningConfig,
    retry: RetryPolicy,
}

impl ProvisioningOrchestrator {
    pub fn new(
        provisioning: Arc<dyn ProvisioningBackend>,
        guardrails: GuardrailManager,
        notifier: Arc<dyn Notifier>,
        config: ProvisioningConfig,
        retry: RetryPolicy,
    ) -> Self {
        ProvisioningOrchestrator {
            provisioning,
            guardrails,
            notifier,
            audit: None,
            config,
            retry,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditTrail>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Build the catalog request for one record
    pub fn provision_request(&self, record: &AccountRecord, account_name: &str) -> ProvisionRequest {
        ProvisionRequest {
            product_id: self.config.product_id.clone(),
            provisioning_artifact_id: self.config.provisioning_artifact_id.clone(),
            provisioned_product_name: account_name.to_string(),
            parameters: ProvisioningParameters {
                account_email: record.email.clone(),
                account_name: account_name.to_string(),
                managed_organizational_unit: self.config.managed_organizational_unit.clone(),
                sso_user_email: record.email.clone(),
                sso_user_first_name: record.first_name.clone(),
                sso_user_last_name: record.last_name.clone(),
            },
        }
    }

    pub async fn handle_batch(&self, events: &[ChangeEvent]) -> BatchReport {
        let mut report = BatchReport::default();
        for event in events {
            let outcome = self.handle_event(event).await;
            report.outcomes.push((event.sequence, outcome));
        }

        info!(
            events = events.len(),
            guarded = report.guarded(),
            unguarded = report.unguarded(),
            ignored = report.ignored(),
            failed = report.failed(),
            "change batch handled"
        );
        report
    }

    #[instrument(skip(self, event), fields(sequence = event.sequence, key = %event.key))]
    pub async fn handle_event(&self, event: &ChangeEvent) -> ProvisioningOutcome {
        if !event.is_insert() {
            info!(operation = event.operation.as_str(), "ignoring non-insert change");
            return ProvisioningOutcome::Ignored {
                operation: event.operation,
            };
        }

        let (account, newly_provisioned) = match self.provision(event).await {
            Ok(provisioned) => provisioned,
            Err(error) => {
                error!(error = %error, "provisioning failed");
                self.audit(
                    EVENT_PROVISIONING_FAILED,
                    event.new_record.as_ref().and_then(|r| r.account_name()).unwrap_or(event.key.as_str()),
                    serde_json::json!({
                        "email": event.key,
                        "sequence": event.sequence,
                        "error": error.to_string(),
                    }),
                )
                .await;
                return ProvisioningOutcome::Failed { error };
            }
        };

        match self.guardrails.create_guardrail(&account.account_id).await {
            Ok(receipt) => {
                self.audit(
                    EVENT_GUARDRAIL_CREATED,
                    &account.account_id,
                    serde_json::json!({
                        "budget_name": receipt.budget_name,
                        "limit": receipt.limit,
                        "currency": receipt.currency,
                        "already_present": receipt.already_present,
                    }),
                )
                .await;
                ProvisioningOutcome::Guarded {
                    account,
                    receipt,
                    newly_provisioned,
                }
            }
            Err(error) => {
                self.mark_unguarded(&account, &error).await;
                ProvisioningOutcome::Unguarded { account, error }
            }
        }
    }

    /// Provision unless a product with the derived name already exists.
    /// Returns the account and whether it was created by this call.
    async fn provision(&self, event: &ChangeEvent) -> Result<(ProvisionedAccount, bool), ProvisioningError> {
        let record = event.new_record.as_ref().ok_or_else(|| {
            ProvisioningError::InvalidRecord(format!("INSERT event {} carries no new image", event.sequence))
        })?;

        let account_name = record.account_name().ok_or_else(|| {
            ProvisioningError::InvalidRecord(format!("cannot derive account name from {:?}", record.email))
        })?;

        let account = ProvisionedAccount {
            account_id: account_name.to_string(),
            email: record.email.clone(),
        };

        let provisioning = &self.provisioning;
        let existing = self
            .retry
            .run("provisioning.find_provisioned_product", move || {
                provisioning.find_provisioned_product(account_name)
            })
            .await?;

        if let Some(product) = existing {
            check_same_owner(&product, record)?;
            info!(account_id = account_name, "account already provisioned, skipping");
            return Ok((account, false));
        }

        let request = self.provision_request(record, account_name);
        let request_ref = &request;
        let (product, adopted) = match self
            .retry
            .run("provisioning.provision_product", move || {
                provisioning.provision_product(request_ref)
            })
            .await
        {
            Ok(product) => (product, false),
            // An earlier attempt may have created the product before failing
            Err(BackendError::AlreadyExists(reason)) => {
                let existing = self
                    .retry
                    .run("provisioning.find_provisioned_product", move || {
                        provisioning.find_provisioned_product(account_name)
                    })
                    .await?;
                let Some(product) = existing else {
                    return Err(BackendError::AlreadyExists(reason).into());
                };
                check_same_owner(&product, record)?;
                warn!(
                    account_id = account_name,
                    "provision reported AlreadyExists, adopting existing product"
                );
                (product, true)
            }
            Err(err) => return Err(err.into()),
        };

        info!(
            account_id = account_name,
            product_id = %product.product_id,
            "account provisioned"
        );
        self.audit(
            EVENT_ACCOUNT_PROVISIONED,
            account_name,
            serde_json::json!({
                "email": record.email,
                "product_id": self.config.product_id,
                "provisioning_artifact_id": self.config.provisioning_artifact_id,
                "managed_organizational_unit": self.config.managed_organizational_unit,
                "adopted": adopted,
            }),
        )
        .await;

        Ok((account, !adopted))
    }

    /// Terminal partial state: account exists without a budget
    async fn mark_unguarded(&self, account: &ProvisionedAccount, error: &GuardrailError) {
        error!(
            account_id = %account.account_id,
            error = %error,
            "guardrail creation failed, account left unguarded"
        );

        self.audit(
            EVENT_GUARDRAIL_FAILED,
            &account.account_id,
            serde_json::json!({
                "email": account.email,
                "error": error.to_string(),
            }),
        )
        .await;

        let alert = AlertEvent::guardrail_missing(&account.account_id, &error.to_string());
        let notifier = &self.notifier;
        let topic = self.guardrails.alert_topic();
        let alert_ref = &alert;
        if let Err(e) = self
            .retry
            .run("notifier.publish", move || notifier.publish(topic, alert_ref))
            .await
        {
            warn!(account_id = %account.account_id, error = %e, "failed to publish guardrail missing alert");
        }
    }

    async fn audit(&self, event_type: &str, account_id: &str, data: serde_json::Value) {
        let Some(audit) = &self.audit else { return };
        let event = Event::new(event_type, ENTITY_ACCOUNT, account_id, data, ACTOR);
        if let Err(e) = audit.record(event).await {
            warn!(event_type, account_id, error = %e, "failed to write audit event");
        }
    }
}

fn check_same_owner(product: &ProvisionedProduct, record: &AccountRecord) -> Result<(), ProvisioningError> {
    if product.account_email == record.email {
        return Ok(());
    }
    Err(ProvisioningError::NameCollision {
        name: product.name.clone(),
        existing_email: product.account_email.clone(),
        requested_email: record.email.clone(),
    })
}
