// 📈 Guardrail Monitor - Periodic sweep of every managed account's budget
//
// For each account: describe MonthlyBudget → pick amount (MonitorBasis) →
// compare with the global ceiling → dispatch at most one alert.
// Per-account failures are recorded and skipped; the sweep keeps going.

use crate::backends::{AccountDirectory, BudgetBackend, DirectoryAccount, Notifier};
use crate::config::{MonitorBasis, MonitorConfig};
use crate::entities::{AlertEvent, Budget, Spend, MONTHLY_BUDGET_NAME};
use crate::error::{MonitorError, MonitorSkip};
use crate::retry::RetryPolicy;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

// ============================================================================
// THRESHOLD POLICY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdVerdict {
    ExceededLimit,
    ExceededHalfLimit,
    WithinLimit,
}

/// First matching branch wins: L > G, then L/2 > G
pub fn evaluate_threshold(amount: f64, ceiling: f64) -> ThresholdVerdict {
    if amount > ceiling {
        ThresholdVerdict::ExceededLimit
    } else if amount / 2.0 > ceiling {
        ThresholdVerdict::ExceededHalfLimit
    } else {
        ThresholdVerdict::WithinLimit
    }
}

impl ThresholdVerdict {
    pub fn alert_for(&self, account_id: &str) -> Option<AlertEvent> {
        match self {
            ThresholdVerdict::ExceededLimit => Some(AlertEvent::exceeded_limit(account_id)),
            ThresholdVerdict::ExceededHalfLimit => Some(AlertEvent::exceeded_half_limit(account_id)),
            ThresholdVerdict::WithinLimit => None,
        }
    }
}

/// Amount the policy looks at for `basis`
pub fn monitored_spend(budget: &Budget, basis: MonitorBasis) -> &Spend {
    match basis {
        MonitorBasis::ConfiguredLimit => &budget.limit,
        MonitorBasis::ActualSpend => &budget.actual_spend,
    }
}

// ============================================================================
// SWEEP REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountEvaluation {
    pub account_id: String,
    pub amount: f64,
    pub verdict: ThresholdVerdict,
    pub alerted: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub evaluated: Vec<AccountEvaluation>,
    pub skipped: Vec<MonitorSkip>,
}

impl SweepReport {
    pub fn alerts_sent(&self) -> usize {
        self.evaluated.iter().filter(|e| e.alerted).count()
    }
}

// ============================================================================
// MONITOR
// ============================================================================

pub struct GuardrailMonitor {
    directory: Arc<dyn AccountDirectory>,
    budgets: Arc<dyn BudgetBackend>,
    notifier: Arc<dyn Notifier>,
    alert_topic: String,
    config: MonitorConfig,
    retry: RetryPolicy,
}

impl GuardrailMonitor {
    pub fn new(
        directory: Arc<dyn AccountDirectory>,
        budgets: Arc<dyn BudgetBackend>,
        notifier: Arc<dyn Notifier>,
        alert_topic: &str,
        config: MonitorConfig,
        retry: RetryPolicy,
    ) -> Self {
        GuardrailMonitor {
            directory,
            budgets,
            notifier,
            alert_topic: alert_topic.to_string(),
            config,
            retry,
        }
    }

    #[instrument(skip(self), fields(ceiling = self.config.ceiling, basis = self.config.basis.as_str()))]
    pub async fn sweep(&self) -> Result<SweepReport, MonitorError> {
        let directory = &self.directory;
        let accounts = self
            .retry
            .run("directory.list_accounts", move || directory.list_accounts())
            .await?;

        let mut report = SweepReport::default();
        for account in &accounts {
            match self.evaluate_account(account).await {
                Ok(evaluation) => report.evaluated.push(evaluation),
                Err(skip) => {
                    warn!(account_id = skip.account_id(), error = %skip, "account skipped");
                    report.skipped.push(skip);
                }
            }
        }

        info!(
            accounts = accounts.len(),
            evaluated = report.evaluated.len(),
            skipped = report.skipped.len(),
            alerts = report.alerts_sent(),
            "guardrail sweep finished"
        );
        Ok(report)
    }

    async fn evaluate_account(&self, account: &DirectoryAccount) -> Result<AccountEvaluation, MonitorSkip> {
        let account_id = account.id.as_str();
        let budgets = &self.budgets;

        let budget = self
            .retry
            .run("budgets.describe_budget", move || {
                budgets.describe_budget(account_id, MONTHLY_BUDGET_NAME)
            })
            .await
            .map_err(|source| MonitorSkip::Fetch {
                account_id: account_id.to_string(),
                source,
            })?;

        let spend = monitored_spend(&budget, self.config.basis);
        let amount = spend.parsed_amount().ok_or_else(|| MonitorSkip::Parse {
            account_id: account_id.to_string(),
            value: spend.amount.clone(),
        })?;

        let verdict = evaluate_threshold(amount, self.config.ceiling);
        let Some(alert) = verdict.alert_for(account_id) else {
            info!(account_id, amount, "budget within limit");
            return Ok(AccountEvaluation {
                account_id: account_id.to_string(),
                amount,
                verdict,
                alerted: false,
            });
        };

        let notifier = &self.notifier;
        let topic = self.alert_topic.as_str();
        let alert_ref = &alert;
        self.retry
            .run("notifier.publish", move || notifier.publish(topic, alert_ref))
            .await
            .map_err(|source| MonitorSkip::Dispatch {
                account_id: account_id.to_string(),
                source,
            })?;

        info!(account_id, amount, verdict = ?verdict, "budget alert sent");
        Ok(AccountEvaluation {
            account_id: account_id.to_string(),
            amount,
            verdict,
            alerted: true,
        })
    }

    /// Sweep on a fixed schedule until `shutdown` flips to true
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "guardrail monitor started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "guardrail sweep aborted");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("guardrail monitor stopping");
                        return;
                    }
                }
            }
        }
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::BUDGET_EXCEEDED_SUBJECT;
    use crate::error::BackendError;
    use crate::testing::{FakeBudgets, FakeDirectory, RecordingNotifier};

    const CEILING: f64 = 50000.0;

    fn monitor_config(basis: MonitorBasis) -> MonitorConfig {
        MonitorConfig {
            ceiling: CEILING,
            basis,
            interval: Duration::from_secs(3600),
        }
    }

    struct Harness {
        directory: Arc<FakeDirectory>,
        budgets: Arc<FakeBudgets>,
        notifier: Arc<RecordingNotifier>,
        monitor: GuardrailMonitor,
    }

    fn harness(basis: MonitorBasis) -> Harness {
        let directory = Arc::new(FakeDirectory::new());
        let budgets = Arc::new(FakeBudgets::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let monitor = GuardrailMonitor::new(
            directory.clone(),
            budgets.clone(),
            notifier.clone(),
            "arn:sandbox:alerts",
            monitor_config(basis),
            RetryPolicy::none(),
        );
        Harness {
            directory,
            budgets,
            notifier,
            monitor,
        }
    }

    fn with_budget(h: &Harness, account_id: &str, limit: &str, actual: &str) {
        h.directory.add(account_id);
        let mut budget = Budget::monthly_guardrail(account_id, limit, "USD");
        budget.actual_spend = Spend::new(actual, "USD");
        h.budgets.put_budget(budget);
    }

    #[test]
    fn test_threshold_policy() {
        assert_eq!(evaluate_threshold(60000.0, CEILING), ThresholdVerdict::ExceededLimit);
        assert_eq!(evaluate_threshold(20000.0, CEILING), ThresholdVerdict::WithinLimit);
        assert_eq!(evaluate_threshold(50000.0, CEILING), ThresholdVerdict::WithinLimit);

        // Exclusive branches: L/2 > G also holds, but the first branch wins
        assert_eq!(evaluate_threshold(110000.0, CEILING), ThresholdVerdict::ExceededLimit);

        // Reachable only with a negative ceiling
        assert_eq!(evaluate_threshold(-15.0, -10.0), ThresholdVerdict::ExceededHalfLimit);

        println!("✅ Threshold policy test PASSED");
    }

    #[tokio::test]
    async fn test_sweep_alerts_over_ceiling() {
        let h = harness(MonitorBasis::ConfiguredLimit);
        with_budget(&h, "alice", "60000", "0");
        with_budget(&h, "bob", "20000", "0");
        with_budget(&h, "carol", "110000", "0");

        let report = h.monitor.sweep().await.unwrap();

        assert_eq!(report.evaluated.len(), 3);
        assert!(report.skipped.is_empty());
        assert_eq!(report.alerts_sent(), 2);

        let alerts = h.notifier.published();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].0, "arn:sandbox:alerts");
        assert_eq!(alerts[0].1.subject, BUDGET_EXCEEDED_SUBJECT);
        assert_eq!(alerts[0].1.message, "The budget of account alice has exceeded the limit");
        assert_eq!(alerts[1].1.message, "The budget of account carol has exceeded the limit");
    }

    #[tokio::test]
    async fn test_fetch_failure_does_not_stop_sweep() {
        let h = harness(MonitorBasis::ConfiguredLimit);
        with_budget(&h, "alice", "60000", "0");
        h.directory.add("broken");
        with_budget(&h, "carol", "70000", "0");
        h.budgets.fail_describe_for("broken", BackendError::Rejected("access denied".into()));

        let report = h.monitor.sweep().await.unwrap();

        let ids: Vec<&str> = report.evaluated.iter().map(|e| e.account_id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "carol"]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].account_id(), "broken");
        assert!(matches!(report.skipped[0], MonitorSkip::Fetch { .. }));
        assert_eq!(h.notifier.published().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_budget_and_bad_amount_are_skipped() {
        let h = harness(MonitorBasis::ConfiguredLimit);
        h.directory.add("nobudget");
        with_budget(&h, "garbled", "lots", "0");
        with_budget(&h, "fine", "10", "0");

        let report = h.monitor.sweep().await.unwrap();

        assert_eq!(report.evaluated.len(), 1);
        assert_eq!(report.skipped.len(), 2);
        assert!(matches!(report.skipped[1], MonitorSkip::Parse { ref value, .. } if value == "lots"));
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_isolated() {
        let h = harness(MonitorBasis::ConfiguredLimit);
        with_budget(&h, "alice", "60000", "0");
        with_budget(&h, "bob", "70000", "0");
        h.notifier.fail_for("alice");

        let report = h.monitor.sweep().await.unwrap();

        assert!(matches!(report.skipped[0], MonitorSkip::Dispatch { .. }));
        assert_eq!(report.evaluated[0].account_id, "bob");
        assert!(report.evaluated[0].alerted);
    }

    #[tokio::test]
    async fn test_actual_spend_basis() {
        let h = harness(MonitorBasis::ActualSpend);
        with_budget(&h, "alice", "1000", "75000");
        with_budget(&h, "bob", "999999", "10");

        let report = h.monitor.sweep().await.unwrap();

        let alice = &report.evaluated[0];
        assert_eq!(alice.amount, 75000.0);
        assert_eq!(alice.verdict, ThresholdVerdict::ExceededLimit);
        assert_eq!(report.evaluated[1].verdict, ThresholdVerdict::WithinLimit);
        assert_eq!(h.notifier.published().len(), 1);
    }

    #[tokio::test]
    async fn test_directory_failure_aborts_sweep() {
        let h = harness(MonitorBasis::ConfiguredLimit);
        h.directory.fail(BackendError::Rejected("no org access".into()));

        let err = h.monitor.sweep().await.unwrap_err();
        assert!(matches!(err, MonitorError::Directory(_)));
        assert!(h.notifier.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweeps_on_schedule() {
        let h = harness(MonitorBasis::ConfiguredLimit);
        with_budget(&h, "alice", "60000", "0");

        let (tx, rx) = watch::channel(false);
        let notifier = h.notifier.clone();
        let monitor = Arc::new(h.monitor);
        let runner = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.run(Duration::from_secs(60), rx).await })
        };

        // First tick fires immediately, second after one interval
        tokio::time::sleep(Duration::from_secs(90)).await;
        tx.send(true).unwrap();
        runner.await.unwrap();

        assert_eq!(notifier.published().len(), 2);
    }
}
