//! Alert Dispatcher
//!
//! Runs a notification cascade: contacts in priority order (bounded
//! parallelism), channels per contact in declared order, every attempt
//! bounded by a timeout and written to the ledger before the next one
//! starts. The cascade result is read back from the ledger.

use anomaly_detector::AnomalyFinding;
use chrono::Utc;
use contacts::{ContactId, ContactSnapshot};
use escalation::CascadeId;
use ledger::{AlertLedger, AttemptOutcome, CascadeStatus, DeliveryAttempt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry::SubjectId;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapter::ChannelAdapter;
use crate::message::{AlertMessage, SubjectContext};
use crate::plan::{ContactPlan, ContactState};
use crate::DispatchError;

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Contacts notified concurrently; 1 keeps strict priority order
    pub max_parallel_contacts: usize,
    /// Upper bound on a single channel attempt (milliseconds)
    pub attempt_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_parallel_contacts: 1,
            attempt_timeout_ms: 10_000,
        }
    }
}

/// Everything needed to start a cascade
#[derive(Debug, Clone)]
pub struct CascadeRequest {
    pub cascade_id: CascadeId,
    pub finding: AnomalyFinding,
    pub context: SubjectContext,
}

/// Aggregate outcome of a cascade, rebuilt from the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeResult {
    pub cascade_id: CascadeId,
    pub subject_id: SubjectId,
    pub status: CascadeStatus,
    pub attempts: Vec<DeliveryAttempt>,
    pub contacts_reached: usize,
    pub contact_count: usize,
}

/// Cancellation flag for a running cascade
#[derive(Debug, Clone, Default)]
pub struct CascadeCanceller(Arc<AtomicBool>);

impl CascadeCanceller {
    /// Stop starting new attempts; in-flight attempts finish
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to a cascade running in the background
#[derive(Debug)]
pub struct CascadeHandle {
    cascade_id: CascadeId,
    canceller: CascadeCanceller,
    join: JoinHandle<Result<CascadeResult, DispatchError>>,
}

impl CascadeHandle {
    pub fn cascade_id(&self) -> CascadeId {
        self.cascade_id
    }

    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    pub fn canceller(&self) -> CascadeCanceller {
        self.canceller.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the cascade to finish
    pub async fn join(self) -> Result<CascadeResult, DispatchError> {
        self.join
            .await
            .map_err(|e| DispatchError::Task(e.to_string()))?
    }
}

/// Executes notification cascades through a channel adapter
#[derive(Clone)]
pub struct AlertDispatcher {
    adapter: Arc<dyn ChannelAdapter>,
    ledger: AlertLedger,
    config: DispatchConfig,
}

/// State shared by the contact tasks of one cascade
struct CascadeRun {
    cascade_id: CascadeId,
    subject_id: SubjectId,
    message: AlertMessage,
    adapter: Arc<dyn ChannelAdapter>,
    ledger: AlertLedger,
    timeout: Duration,
    canceller: CascadeCanceller,
    /// Set once a ledger write has failed for good
    ledger_failed: AtomicBool,
}

impl AlertDispatcher {
    /// Create a new dispatcher
    pub fn new(adapter: Arc<dyn ChannelAdapter>, ledger: AlertLedger, config: DispatchConfig) -> Self {
        info!("Creating alert dispatcher with config: {:?}", config);
        Self { adapter, ledger, config }
    }

    /// Start a cascade over a contact snapshot
    ///
    /// Returns once the cascade is opened in the ledger; delivery runs in a
    /// background task.
    pub async fn dispatch(
        &self,
        request: CascadeRequest,
        snapshot: ContactSnapshot,
    ) -> Result<CascadeHandle, DispatchError> {
        let subject_id = request.finding.subject_id.clone();
        if snapshot.is_empty() {
            return Err(DispatchError::NoContacts(subject_id));
        }

        self.ledger
            .record_cascade_opened(request.cascade_id, request.finding.id, subject_id.clone(), snapshot.len())
            .await?;

        let message = AlertMessage::compose(&request.finding, &request.context);
        let prefer_cellular = request.context.device_offline;
        let plans: Vec<ContactPlan> = snapshot
            .contacts()
            .iter()
            .cloned()
            .map(|c| ContactPlan::new(c, prefer_cellular))
            .collect();

        let canceller = CascadeCanceller::default();
        let run = Arc::new(CascadeRun {
            cascade_id: request.cascade_id,
            subject_id,
            message,
            adapter: self.adapter.clone(),
            ledger: self.ledger.clone(),
            timeout: Duration::from_millis(self.config.attempt_timeout_ms),
            canceller: canceller.clone(),
            ledger_failed: AtomicBool::new(false),
        });

        info!(
            cascade = %request.cascade_id,
            subject = %run.subject_id,
            contacts = plans.len(),
            degraded = prefer_cellular,
            "Cascade started"
        );

        let max_parallel = self.config.max_parallel_contacts.max(1);
        let finding_id = request.finding.id;
        let join = tokio::spawn(async move { run.execute(finding_id, plans, max_parallel).await });

        Ok(CascadeHandle {
            cascade_id: request.cascade_id,
            canceller,
            join,
        })
    }
}

impl CascadeRun {
    fn should_stop(&self) -> bool {
        self.canceller.is_cancelled() || self.ledger_failed.load(Ordering::SeqCst)
    }

    async fn execute(
        self: Arc<Self>,
        finding_id: anomaly_detector::FindingId,
        plans: Vec<ContactPlan>,
        max_parallel: usize,
    ) -> Result<CascadeResult, DispatchError> {
        let semaphore = Arc::new(Semaphore::new(max_parallel));
        let channel_counts: HashMap<ContactId, usize> =
            plans.iter().map(|p| (p.contact().id, p.channels().len())).collect();
        let contact_count = plans.len();

        let mut tasks = Vec::with_capacity(plans.len());
        for plan in plans {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| DispatchError::Task(e.to_string()))?;
            if self.should_stop() {
                debug!(cascade = %self.cascade_id, "Cascade stopping, remaining contacts skipped");
                break;
            }

            let run = self.clone();
            tasks.push(tokio::spawn(async move {
                let result = run.notify_contact(plan).await;
                drop(permit);
                result
            }));
        }

        // Every task is drained, even after one of them died
        let mut ledger_error = None;
        let mut task_error = None;
        for task in tasks {
            match task.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => ledger_error = Some(e),
                Err(e) => {
                    error!(cascade = %self.cascade_id, error = %e, "Contact task failed");
                    task_error.get_or_insert_with(|| e.to_string());
                }
            }
        }
        if let Some(e) = ledger_error {
            error!(cascade = %self.cascade_id, error = %e, "Cascade stopped by ledger failure");
            metrics::counter!("safetrail_cascades_total", "status" => "ledger_failure").increment(1);
            return Err(e);
        }
        if let Some(reason) = task_error {
            self.close_abandoned(finding_id, contact_count).await?;
            return Err(DispatchError::Task(reason));
        }

        // Rebuild the outcome from the ledger, never from local state
        let attempts = self.ledger.cascade_attempts(self.cascade_id).await?;
        let mut per_contact: HashMap<ContactId, (usize, bool)> = HashMap::new();
        for attempt in &attempts {
            let entry = per_contact.entry(attempt.contact_id).or_default();
            entry.0 += 1;
            entry.1 |= attempt.outcome == AttemptOutcome::Success;
        }

        let contacts_reached = per_contact.values().filter(|(_, ok)| *ok).count();
        let all_terminal = channel_counts.iter().all(|(id, channels)| {
            per_contact
                .get(id)
                .map(|(tried, ok)| *ok || tried >= channels)
                .unwrap_or(false)
        });

        let status = if !all_terminal {
            CascadeStatus::Abandoned
        } else if contacts_reached > 0 {
            CascadeStatus::Completed
        } else {
            CascadeStatus::CompletedWithFailures
        };

        self.ledger
            .record_cascade_closed(
                self.cascade_id,
                finding_id,
                self.subject_id.clone(),
                status,
                contacts_reached,
                contact_count,
            )
            .await?;

        metrics::counter!("safetrail_cascades_total", "status" => status.as_str()).increment(1);
        info!(
            cascade = %self.cascade_id,
            %status,
            reached = contacts_reached,
            contacts = contact_count,
            attempts = attempts.len(),
            "Cascade finished"
        );

        Ok(CascadeResult {
            cascade_id: self.cascade_id,
            subject_id: self.subject_id.clone(),
            status,
            attempts,
            contacts_reached,
            contact_count,
        })
    }

    /// Close a cascade that lost a contact task
    async fn close_abandoned(
        &self,
        finding_id: anomaly_detector::FindingId,
        contact_count: usize,
    ) -> Result<(), DispatchError> {
        let attempts = self.ledger.cascade_attempts(self.cascade_id).await?;
        let reached: HashSet<ContactId> = attempts
            .iter()
            .filter(|a| a.outcome == AttemptOutcome::Success)
            .map(|a| a.contact_id)
            .collect();

        self.ledger
            .record_cascade_closed(
                self.cascade_id,
                finding_id,
                self.subject_id.clone(),
                CascadeStatus::Abandoned,
                reached.len(),
                contact_count,
            )
            .await?;
        metrics::counter!("safetrail_cascades_total", "status" => CascadeStatus::Abandoned.as_str()).increment(1);
        warn!(cascade = %self.cascade_id, reached = reached.len(), "Cascade abandoned after task failure");
        Ok(())
    }

    /// Walk one contact's channels until success, exhaustion or stop
    async fn notify_contact(&self, mut plan: ContactPlan) -> Result<ContactState, DispatchError> {
        while !self.should_stop() {
            let Some(channel) = plan.begin_next() else {
                break;
            };

            let started_at = Utc::now();
            let sent = tokio::time::timeout(
                self.timeout,
                self.adapter.send(plan.contact(), channel, &self.message),
            )
            .await;

            let (outcome, detail) = match sent {
                Ok(Ok(())) => (AttemptOutcome::Success, None),
                Ok(Err(e)) => (AttemptOutcome::Failed, Some(e.to_string())),
                Err(_) => (
                    AttemptOutcome::TimedOut,
                    Some(format!("no response within {} ms", self.timeout.as_millis())),
                ),
            };

            let attempt = DeliveryAttempt {
                cascade_id: self.cascade_id,
                subject_id: self.subject_id.clone(),
                contact_id: plan.contact().id,
                contact_name: plan.contact().name.clone(),
                channel,
                started_at,
                completed_at: Utc::now(),
                outcome,
                detail,
            };

            metrics::counter!(
                "safetrail_attempts_total",
                "channel" => channel.as_str(),
                "outcome" => outcome.as_str()
            )
            .increment(1);

            if let Err(e) = self.ledger.record_attempt(&attempt).await {
                self.ledger_failed.store(true, Ordering::SeqCst);
                return Err(e.into());
            }

            let state = plan.complete(outcome);
            match outcome {
                AttemptOutcome::Success => {
                    debug!(cascade = %self.cascade_id, contact = %plan.contact().name, %channel, "Contact notified")
                }
                _ => warn!(
                    cascade = %self.cascade_id,
                    contact = %plan.contact().name,
                    %channel,
                    %outcome,
                    "Channel attempt failed"
                ),
            }
            if state.is_terminal() {
                break;
            }
        }
        Ok(plan.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Behaviour, ScriptedAdapter};
    use anomaly_detector::AnomalyKind;
    use async_trait::async_trait;
    use contacts::{Channel, Contact};
    use ledger::{InMemoryStore, LedgerEntry, LedgerError, LedgerQuery, LedgerRecord, LedgerStore, RetryConfig};
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    fn subject() -> SubjectId {
        SubjectId::from("TS-001")
    }

    fn contact(name: &str, rank: u32, channels: Vec<Channel>) -> Contact {
        Contact::new(subject(), name, "+910000", channels, rank)
    }

    fn request(device_offline: bool) -> CascadeRequest {
        CascadeRequest {
            cascade_id: Uuid::new_v4(),
            finding: AnomalyFinding::new(subject(), AnomalyKind::SignalDropout, 97, Utc::now(), "silent", None),
            context: SubjectContext {
                device_offline,
                ..Default::default()
            },
        }
    }

    fn dispatcher(adapter: Arc<ScriptedAdapter>, ledger: AlertLedger) -> AlertDispatcher {
        AlertDispatcher::new(adapter, ledger, DispatchConfig::default())
    }

    fn summary(result: &CascadeResult) -> Vec<(String, Channel, AttemptOutcome)> {
        result
            .attempts
            .iter()
            .map(|a| (a.contact_name.clone(), a.channel, a.outcome))
            .collect()
    }

    #[tokio::test]
    async fn test_two_contact_fallback_order() {
        let adapter = Arc::new(ScriptedAdapter::new().on("Parent", Channel::Push, Behaviour::Fail));
        let ledger = AlertLedger::in_memory(RetryConfig::default());
        let snapshot = ContactSnapshot::new(
            subject(),
            vec![
                contact("Friend", 2, vec![Channel::Push, Channel::Sms]),
                contact("Parent", 1, vec![Channel::Push, Channel::Sms]),
            ],
        );

        let handle = dispatcher(adapter, ledger.clone()).dispatch(request(false), snapshot).await.unwrap();
        let cascade_id = handle.cascade_id();
        let result = handle.join().await.unwrap();

        assert_eq!(
            summary(&result),
            vec![
                ("Parent".to_string(), Channel::Push, AttemptOutcome::Failed),
                ("Parent".to_string(), Channel::Sms, AttemptOutcome::Success),
                ("Friend".to_string(), Channel::Push, AttemptOutcome::Success),
            ]
        );
        assert_eq!(result.status, CascadeStatus::Completed);
        assert_eq!(result.contacts_reached, 2);
        assert_eq!(ledger.cascade_status(cascade_id).await.unwrap(), Some(CascadeStatus::Completed));
    }

    #[tokio::test]
    async fn test_crashed_contact_task_abandons_cascade() {
        let adapter = Arc::new(ScriptedAdapter::new().on("Parent", Channel::Push, Behaviour::Panic));
        let ledger = AlertLedger::in_memory(RetryConfig::default());
        let snapshot = ContactSnapshot::new(
            subject(),
            vec![
                contact("Parent", 1, vec![Channel::Push]),
                contact("Guide", 2, vec![Channel::Push]),
            ],
        );

        let handle = dispatcher(adapter.clone(), ledger.clone())
            .dispatch(request(false), snapshot)
            .await
            .unwrap();
        let cascade_id = handle.cascade_id();
        assert!(matches!(handle.join().await, Err(DispatchError::Task(_))));

        // The surviving contact was still notified and the cascade is closed
        assert!(adapter.calls().contains(&("Guide".to_string(), Channel::Push)));
        assert_eq!(ledger.cascade_status(cascade_id).await.unwrap(), Some(CascadeStatus::Abandoned));
        let closed = ledger
            .query(&LedgerQuery::cascade(cascade_id))
            .await
            .unwrap()
            .into_iter()
            .find_map(|e| match e.record {
                LedgerRecord::CascadeClosed { contacts_reached, .. } => Some(contacts_reached),
                _ => None,
            });
        assert_eq!(closed, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_cascade_abandons() {
        let adapter = Arc::new(
            ScriptedAdapter::new().on("Guide", Channel::Push, Behaviour::Delay(Duration::from_secs(5))),
        );
        let ledger = AlertLedger::in_memory(RetryConfig::default());
        let snapshot = ContactSnapshot::new(
            subject(),
            vec![
                contact("Parent", 1, vec![Channel::Push]),
                contact("Guide", 2, vec![Channel::Push]),
                contact("Police", 3, vec![Channel::Voice]),
            ],
        );

        let handle = dispatcher(adapter.clone(), ledger).dispatch(request(false), snapshot).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();
        let result = handle.join().await.unwrap();

        // In-flight attempt finished, nothing new started
        assert_eq!(
            summary(&result),
            vec![
                ("Parent".to_string(), Channel::Push, AttemptOutcome::Success),
                ("Guide".to_string(), Channel::Push, AttemptOutcome::Success),
            ]
        );
        assert_eq!(result.status, CascadeStatus::Abandoned);
        assert!(!adapter.calls().iter().any(|(name, _)| name == "Police"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back_to_next_channel() {
        let adapter = Arc::new(ScriptedAdapter::new().on("Parent", Channel::Push, Behaviour::Hang));
        let ledger = AlertLedger::in_memory(RetryConfig::default());
        let snapshot = ContactSnapshot::new(subject(), vec![contact("Parent", 1, vec![Channel::Push, Channel::Sms])]);

        let result = dispatcher(adapter, ledger)
            .dispatch(request(false), snapshot)
            .await
            .unwrap()
            .join()
            .await
            .unwrap();

        assert_eq!(result.attempts[0].outcome, AttemptOutcome::TimedOut);
        assert!(result.attempts[0].detail.as_deref().unwrap_or("").contains("10000 ms"));
        assert_eq!(result.attempts[1].outcome, AttemptOutcome::Success);
        assert_eq!(result.status, CascadeStatus::Completed);
    }

    #[tokio::test]
    async fn test_offline_subject_prefers_cellular() {
        let adapter = Arc::new(ScriptedAdapter::new());
        let ledger = AlertLedger::in_memory(RetryConfig::default());
        let snapshot = ContactSnapshot::new(
            subject(),
            vec![contact("Parent", 1, vec![Channel::Push, Channel::WhatsApp, Channel::Sms])],
        );

        let result = dispatcher(adapter, ledger)
            .dispatch(request(true), snapshot)
            .await
            .unwrap()
            .join()
            .await
            .unwrap();

        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.attempts[0].channel, Channel::Sms);
    }

    #[tokio::test]
    async fn test_nobody_reached_is_completed_with_failures() {
        let adapter = Arc::new(ScriptedAdapter::new().otherwise(Behaviour::Fail));
        let ledger = AlertLedger::in_memory(RetryConfig::default());
        let snapshot = ContactSnapshot::new(subject(), vec![contact("Parent", 1, vec![Channel::Push, Channel::Sms])]);

        let result = dispatcher(adapter, ledger)
            .dispatch(request(false), snapshot)
            .await
            .unwrap()
            .join()
            .await
            .unwrap();

        assert_eq!(result.attempts.len(), 2);
        assert_eq!(result.status, CascadeStatus::CompletedWithFailures);
        assert_eq!(result.contacts_reached, 0);
        assert!(result.attempts[0].detail.is_some());
    }

    #[tokio::test]
    async fn test_empty_snapshot_rejected() {
        let adapter = Arc::new(ScriptedAdapter::new());
        let ledger = AlertLedger::in_memory(RetryConfig::default());
        let result = dispatcher(adapter, ledger)
            .dispatch(request(false), ContactSnapshot::new(subject(), vec![]))
            .await;
        assert!(matches!(result, Err(DispatchError::NoContacts(_))));
    }

    /// Store that accepts `budget` appends and then fails for good
    struct ExhaustedStore {
        inner: InMemoryStore,
        budget: AtomicUsize,
    }

    #[async_trait]
    impl LedgerStore for ExhaustedStore {
        async fn append(&self, record: LedgerRecord) -> Result<LedgerEntry, LedgerError> {
            let left = self.budget.load(Ordering::SeqCst);
            if left == 0 {
                return Err(LedgerError::Unavailable("write-ahead log corrupted".to_string()));
            }
            self.budget.store(left - 1, Ordering::SeqCst);
            self.inner.append(record).await
        }

        async fn query(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, LedgerError> {
            self.inner.query(query).await
        }

        async fn len(&self) -> Result<usize, LedgerError> {
            self.inner.len().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ledger_failure_stops_cascade() {
        let adapter = Arc::new(ScriptedAdapter::new().otherwise(Behaviour::Fail));
        let store = Arc::new(ExhaustedStore {
            inner: InMemoryStore::new(),
            // Cascade opening plus one attempt
            budget: AtomicUsize::new(2),
        });
        let ledger = AlertLedger::new(store, RetryConfig::default());
        let snapshot = ContactSnapshot::new(
            subject(),
            vec![
                contact("Parent", 1, vec![Channel::Push, Channel::Sms]),
                contact("Friend", 2, vec![Channel::Push]),
            ],
        );

        let result = dispatcher(adapter.clone(), ledger)
            .dispatch(request(false), snapshot)
            .await
            .unwrap()
            .join()
            .await;

        assert!(matches!(result, Err(DispatchError::Ledger(LedgerError::Consistency { .. }))));
        // Second attempt could not be recorded; no contact after it was tried
        assert_eq!(adapter.calls().len(), 2);
    }

    fn behaviour() -> impl Strategy<Value = Behaviour> {
        prop_oneof![Just(Behaviour::Succeed), Just(Behaviour::Fail)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]
        #[test]
        fn test_cascade_contacts_everyone(
            contacts in proptest::collection::vec(
                (proptest::sample::subsequence(vec![Channel::Push, Channel::Sms, Channel::WhatsApp, Channel::Voice], 1..=4),
                 proptest::collection::vec(behaviour(), 4)),
                1..6
            ),
            parallel in 1usize..4,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            runtime.block_on(async {
                let mut adapter = ScriptedAdapter::new();
                let mut list = Vec::new();
                for (i, (channels, behaviours)) in contacts.iter().enumerate() {
                    let name = format!("contact-{i}");
                    for (channel, b) in channels.iter().zip(behaviours) {
                        adapter = adapter.on(&name, *channel, b.clone());
                    }
                    list.push(contact(&name, i as u32, channels.clone()));
                }

                let config = DispatchConfig { max_parallel_contacts: parallel, ..Default::default() };
                let ledger = AlertLedger::in_memory(RetryConfig::default());
                let dispatcher = AlertDispatcher::new(Arc::new(adapter), ledger, config);
                let result = dispatcher
                    .dispatch(request(false), ContactSnapshot::new(subject(), list.clone()))
                    .await
                    .unwrap()
                    .join()
                    .await
                    .unwrap();

                prop_assert!(result.status != CascadeStatus::Abandoned);
                for c in &list {
                    let tried: Vec<_> = result.attempts.iter().filter(|a| a.contact_id == c.id).collect();
                    prop_assert!(!tried.is_empty());
                    // Channels tried are a prefix of the declared order, each once
                    for (attempt, channel) in tried.iter().zip(&c.channels) {
                        prop_assert_eq!(attempt.channel, *channel);
                    }
                    let succeeded = tried.iter().position(|a| a.outcome == AttemptOutcome::Success);
                    match succeeded {
                        Some(i) => prop_assert_eq!(i + 1, tried.len()),
                        None => prop_assert_eq!(tried.len(), c.channels.len()),
                    }
                }
                Ok(())
            })?;
        }
    }
}
