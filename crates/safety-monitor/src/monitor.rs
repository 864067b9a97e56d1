//! Safety Monitor
//!
//! Arena of subject records, each behind its own async mutex. Everything a
//! subject goes through (ingest, panic, sweep, timer expiry, resolution) runs
//! under that subject's lock only, so subjects never wait on each other.

use anomaly_detector::{AnomalyClassifier, AnomalyFinding, FindingId, SubjectProfile};
use chrono::{DateTime, Utc};
use contacts::{Contact, ContactRegistry, RegistryError};
use dispatcher::{AlertDispatcher, CascadeHandle, CascadeRequest, ChannelAdapter, DispatchError};
use escalation::{CascadeId, EscalationPolicy, MonitorTimers, Resolution, Transition};
use ledger::{AlertLedger, CascadeStatus, LedgerEntry, LedgerError, LedgerQuery};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use telemetry::{DeviceSample, SubjectId, Zone};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::operator::{OperatorAlert, OperatorAlertKind, OperatorLog};
use crate::subject::{SubjectRecord, SubjectStatus};
use crate::MonitorError;

/// Result of ingesting a sample or a panic signal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub finding: Option<AnomalyFinding>,
    pub transition: Option<Transition>,
}

struct Inner {
    config: MonitorConfig,
    classifier: AnomalyClassifier,
    policy: EscalationPolicy,
    registry: ContactRegistry,
    ledger: AlertLedger,
    dispatcher: AlertDispatcher,
    timers: MonitorTimers,
    subjects: RwLock<HashMap<SubjectId, Arc<Mutex<SubjectRecord>>>>,
    operator_log: OperatorLog,
}

/// Safety core facade; cheap to clone
#[derive(Clone)]
pub struct SafetyMonitor {
    inner: Arc<Inner>,
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> MonitorError {
    MonitorError::StatePoisoned(e.to_string())
}

impl SafetyMonitor {
    /// Create a monitor with an in-memory ledger
    pub fn new(config: MonitorConfig, adapter: Arc<dyn ChannelAdapter>) -> Self {
        let ledger = AlertLedger::in_memory(config.retry.clone());
        Self::with_ledger(config, adapter, ledger)
    }

    /// Create a monitor over an existing ledger
    pub fn with_ledger(config: MonitorConfig, adapter: Arc<dyn ChannelAdapter>, ledger: AlertLedger) -> Self {
        info!("Creating safety monitor");
        let dispatcher = AlertDispatcher::new(adapter, ledger.clone(), config.dispatch.clone());
        Self {
            inner: Arc::new(Inner {
                classifier: AnomalyClassifier::new(config.detector.clone()),
                policy: EscalationPolicy::new(config.policy.clone()),
                registry: ContactRegistry::new(),
                ledger,
                dispatcher,
                timers: MonitorTimers::new(),
                subjects: RwLock::new(HashMap::new()),
                operator_log: OperatorLog::default(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    pub fn ledger(&self) -> &AlertLedger {
        &self.inner.ledger
    }

    fn record(&self, subject_id: &SubjectId) -> Result<Arc<Mutex<SubjectRecord>>, MonitorError> {
        let subjects = self.inner.subjects.read().map_err(poisoned)?;
        subjects
            .get(subject_id)
            .cloned()
            .ok_or_else(|| MonitorError::UnknownSubject(subject_id.clone()))
    }

    fn settle(&self, rec: &mut SubjectRecord, now: DateTime<Utc>) {
        let cooldown = chrono::Duration::seconds(self.inner.config.policy.resolution_cooldown_secs as i64);
        rec.machine.settle(now, cooldown);
    }

    fn ledger_failed(&self, subject_id: &SubjectId, cascade_id: Option<CascadeId>, e: LedgerError) -> MonitorError {
        self.inner.operator_log.raise(
            OperatorAlertKind::LedgerFailure,
            subject_id.clone(),
            cascade_id,
            format!("Ledger record lost: {}", e),
        );
        MonitorError::Ledger(e)
    }

    /// Start tracking a subject, or update its profile
    pub fn enroll(&self, subject_id: SubjectId, profile: SubjectProfile) -> Result<bool, MonitorError> {
        let created = self.inner.classifier.enroll(subject_id.clone(), profile)?;
        let mut subjects = self.inner.subjects.write().map_err(poisoned)?;
        subjects
            .entry(subject_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(SubjectRecord::new(subject_id))));
        Ok(created)
    }

    /// Stop tracking a subject; a running cascade is cancelled
    pub async fn retire(&self, subject_id: &SubjectId) -> Result<(), MonitorError> {
        let removed = {
            let mut subjects = self.inner.subjects.write().map_err(poisoned)?;
            subjects.remove(subject_id)
        };
        let record = removed.ok_or_else(|| MonitorError::UnknownSubject(subject_id.clone()))?;

        self.inner.timers.cancel(subject_id);
        if let Some(cascade) = record.lock().await.cascade.take() {
            cascade.cancel();
        }
        self.inner.classifier.retire(subject_id)?;
        self.inner.registry.remove_subject(subject_id)?;
        info!(subject = %subject_id, "Subject retired");
        Ok(())
    }

    /// Replace a subject's contact list; running cascades keep their snapshot
    pub fn set_contacts(&self, subject_id: &SubjectId, contacts: Vec<Contact>) -> Result<usize, MonitorError> {
        self.record(subject_id)?;
        Ok(self.inner.registry.replace_contacts(subject_id, contacts)?)
    }

    pub fn contacts(&self, subject_id: &SubjectId) -> Result<Vec<Contact>, MonitorError> {
        self.record(subject_id)?;
        Ok(self.inner.registry.contacts(subject_id)?)
    }

    pub fn register_restricted_zone(&self, zone: Zone) -> Result<(), MonitorError> {
        Ok(self.inner.classifier.register_restricted_zone(zone)?)
    }

    /// Accept one telemetry sample
    pub async fn ingest(&self, sample: DeviceSample) -> Result<IngestOutcome, MonitorError> {
        let now = Utc::now();
        let record = self.record(&sample.subject_id)?;
        let mut rec = record.lock().await;
        self.settle(&mut rec, now);

        let finding = self.inner.classifier.evaluate(sample.clone(), now)?;
        rec.observe(&sample);

        let transition = match &finding {
            Some(f) => Some(self.handle_finding(&mut rec, f.clone(), now).await?),
            None => None,
        };
        Ok(IngestOutcome { finding, transition })
    }

    /// Subject pressed the panic button
    pub async fn panic(&self, subject_id: &SubjectId) -> Result<IngestOutcome, MonitorError> {
        let now = Utc::now();
        let record = self.record(subject_id)?;
        let mut rec = record.lock().await;
        self.settle(&mut rec, now);

        let finding = AnomalyFinding::panic(subject_id.clone(), now, rec.last_location);
        metrics::counter!("safetrail_findings_total", "kind" => finding.kind.as_str()).increment(1);
        warn!(subject = %subject_id, "Panic signal received");

        let transition = self.handle_finding(&mut rec, finding.clone(), now).await?;
        Ok(IngestOutcome {
            finding: Some(finding),
            transition: Some(transition),
        })
    }

    /// Resolve the subject's active incident
    pub async fn resolve(&self, subject_id: &SubjectId, finding_id: FindingId) -> Result<Resolution, MonitorError> {
        let now = Utc::now();
        let record = self.record(subject_id)?;
        let mut rec = record.lock().await;
        self.settle(&mut rec, now);

        let resolution = rec.machine.resolve(finding_id, now)?;
        self.inner.timers.cancel(subject_id);
        rec.monitoring_finding = None;
        if let Some(cascade) = rec.cascade.take() {
            cascade.cancel();
            info!(subject = %subject_id, cascade = ?resolution.cascade_id, "Running cascade cancelled");
        }
        self.inner.classifier.clear_before(subject_id, now)?;

        self.inner
            .ledger
            .record_resolution(subject_id.clone(), resolution.finding_id, resolution.cascade_id, now)
            .await
            .map_err(|e| self.ledger_failed(subject_id, resolution.cascade_id, e))?;
        Ok(resolution)
    }

    /// Escalate subjects that went silent; returns findings acted on
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, MonitorError> {
        let findings = self.inner.classifier.sweep_silence(now)?;
        let mut acted = 0;
        for finding in findings {
            let Ok(record) = self.record(&finding.subject_id) else {
                continue;
            };
            let subject_id = finding.subject_id.clone();
            let mut rec = record.lock().await;
            self.settle(&mut rec, now);
            match self.handle_finding(&mut rec, finding, now).await {
                Ok(Transition::Ignored) => {}
                Ok(_) => acted += 1,
                Err(e) => warn!(subject = %subject_id, error = %e, "Silence sweep could not act on finding"),
            }
        }
        Ok(acted)
    }

    /// Run `sweep` on the configured interval until the monitor is dropped
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = Duration::from_secs(self.inner.config.sweep.sweep_interval_secs.max(1));
        info!(interval_secs = period.as_secs(), "Silence sweeper started");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let monitor = SafetyMonitor { inner };
                match monitor.sweep(Utc::now()).await {
                    Ok(0) => {}
                    Ok(acted) => info!(acted, "Silence sweep escalated subjects"),
                    Err(e) => warn!(error = %e, "Silence sweep failed"),
                }
            }
        })
    }

    /// Apply a finding to the subject's machine
    ///
    /// The new state is committed only after the ledger and dispatcher took
    /// the transition; on error the subject keeps its previous state.
    async fn handle_finding(
        &self,
        rec: &mut SubjectRecord,
        finding: AnomalyFinding,
        now: DateTime<Utc>,
    ) -> Result<Transition, MonitorError> {
        let mut machine = rec.machine.clone();
        let decision = self.inner.policy.decide(machine.state(), &finding);
        let transition = machine.apply(decision, &finding, now);

        if let Err(e) = self.carry_out(rec, &finding, transition).await {
            warn!(subject = %rec.subject_id, ?transition, error = %e, "Transition rolled back");
            return Err(e);
        }
        rec.machine = machine;
        Ok(transition)
    }

    async fn carry_out(
        &self,
        rec: &mut SubjectRecord,
        finding: &AnomalyFinding,
        transition: Transition,
    ) -> Result<(), MonitorError> {
        let ledger = &self.inner.ledger;
        let subject_id = rec.subject_id.clone();

        match transition {
            Transition::Ignored | Transition::Lapsed { .. } => {
                ledger
                    .record_finding(finding)
                    .await
                    .map_err(|e| self.ledger_failed(&subject_id, None, e))?;
            }
            Transition::MonitoringStarted { finding_id } => {
                ledger
                    .record_finding(finding)
                    .await
                    .map_err(|e| self.ledger_failed(&subject_id, None, e))?;
                rec.monitoring_finding = Some(finding.clone());
                self.schedule_expiry(subject_id, finding_id);
            }
            Transition::CascadeStarted { cascade_id, .. } => {
                ledger
                    .record_finding(finding)
                    .await
                    .map_err(|e| self.ledger_failed(&subject_id, Some(cascade_id), e))?;
                self.start_cascade(rec, finding, cascade_id).await?;
                self.inner.timers.cancel(&subject_id);
                rec.monitoring_finding = None;
            }
            Transition::MergedIntoMonitoring { finding_id, .. } => {
                ledger
                    .record_related_finding(finding_id, None, finding)
                    .await
                    .map_err(|e| self.ledger_failed(&subject_id, None, e))?;
            }
            Transition::MergedIntoCascade {
                finding_id, cascade_id, ..
            } => {
                ledger
                    .record_related_finding(finding_id, Some(cascade_id), finding)
                    .await
                    .map_err(|e| self.ledger_failed(&subject_id, Some(cascade_id), e))?;
            }
        }
        Ok(())
    }

    fn schedule_expiry(&self, subject_id: SubjectId, finding_id: FindingId) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let delay = Duration::from_secs(self.inner.config.policy.monitor_window_secs);
        let target = subject_id.clone();

        self.inner.timers.schedule(subject_id, delay, async move {
            if let Some(inner) = weak.upgrade() {
                SafetyMonitor { inner }.on_monitor_expired(&target, finding_id).await;
            }
        });
    }

    /// Monitoring window for `finding_id` ran out
    ///
    /// A cascade that cannot start leaves the subject in monitoring and
    /// re-arms the window, so the escalation is retried.
    async fn on_monitor_expired(&self, subject_id: &SubjectId, finding_id: FindingId) -> Option<Transition> {
        let record = self.record(subject_id).ok()?;
        let mut rec = record.lock().await;
        let auto_escalate = self.inner.config.policy.auto_escalate_on_expiry;

        let mut machine = rec.machine.clone();
        let transition = machine.on_monitor_expired(finding_id, auto_escalate)?;
        match transition {
            Transition::CascadeStarted { cascade_id, .. } => {
                let Some(finding) = rec.monitoring_finding.clone() else {
                    warn!(subject = %subject_id, finding = %finding_id, "Monitored finding missing at expiry");
                    return None;
                };
                info!(subject = %subject_id, finding = %finding_id, "Monitoring window expired, escalating");
                if let Err(e) = self.start_cascade(&mut rec, &finding, cascade_id).await {
                    warn!(subject = %subject_id, error = %e, "Escalation after monitoring expiry failed, window re-armed");
                    // Replaces the timer running this call; nothing below may await
                    self.schedule_expiry(subject_id.clone(), finding_id);
                    return None;
                }
                rec.monitoring_finding = None;
            }
            _ => {
                rec.monitoring_finding = None;
                info!(subject = %subject_id, finding = %finding_id, "Monitoring window expired, incident lapsed");
            }
        }
        rec.machine = machine;
        Some(transition)
    }

    async fn start_cascade(
        &self,
        rec: &mut SubjectRecord,
        finding: &AnomalyFinding,
        cascade_id: CascadeId,
    ) -> Result<(), MonitorError> {
        let subject_id = rec.subject_id.clone();
        let ledger = &self.inner.ledger;

        let snapshot = match self.inner.registry.resolve_contacts(&subject_id) {
            Ok(snapshot) => snapshot,
            Err(RegistryError::NoContacts(_)) => {
                self.inner.operator_log.raise(
                    OperatorAlertKind::NoContacts,
                    subject_id.clone(),
                    Some(cascade_id),
                    format!("{} incident could not be escalated: no contacts registered", finding.kind),
                );
                ledger
                    .record_cascade_opened(cascade_id, finding.id, subject_id.clone(), 0)
                    .await
                    .map_err(|e| self.ledger_failed(&subject_id, Some(cascade_id), e))?;
                ledger
                    .record_cascade_closed(
                        cascade_id,
                        finding.id,
                        subject_id.clone(),
                        CascadeStatus::CompletedWithFailures,
                        0,
                        0,
                    )
                    .await
                    .map_err(|e| self.ledger_failed(&subject_id, Some(cascade_id), e))?;
                metrics::counter!("safetrail_cascades_total", "status" => CascadeStatus::CompletedWithFailures.as_str())
                    .increment(1);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let dropout_gap = chrono::Duration::minutes(self.inner.config.detector.dropout_gap_minutes);
        let request = CascadeRequest {
            cascade_id,
            finding: finding.clone(),
            context: rec.dispatch_context(finding, Utc::now(), dropout_gap),
        };
        let handle = match self.inner.dispatcher.dispatch(request, snapshot).await {
            Ok(handle) => handle,
            Err(DispatchError::Ledger(e)) => return Err(self.ledger_failed(&subject_id, Some(cascade_id), e)),
            Err(e) => {
                self.inner.operator_log.raise(
                    OperatorAlertKind::DispatchFailure,
                    subject_id.clone(),
                    Some(cascade_id),
                    format!("Cascade could not start: {}", e),
                );
                return Err(e.into());
            }
        };

        rec.cascade = Some(handle.canceller());
        self.watch_cascade(subject_id, handle);
        Ok(())
    }

    /// Turn cascade outcomes that need a human into operator alerts
    fn watch_cascade(&self, subject_id: SubjectId, handle: CascadeHandle) {
        let log = self.inner.operator_log.clone();
        let cascade_id = handle.cascade_id();

        tokio::spawn(async move {
            match handle.join().await {
                Ok(result) if result.status == CascadeStatus::CompletedWithFailures => {
                    log.raise(
                        OperatorAlertKind::NobodyReached,
                        subject_id,
                        Some(cascade_id),
                        format!(
                            "None of {} contacts could be reached; incident needs manual follow-up",
                            result.contact_count
                        ),
                    );
                }
                Ok(result) => {
                    debug!(cascade = %cascade_id, status = %result.status, "Cascade closed");
                }
                Err(DispatchError::Ledger(e)) => {
                    log.raise(
                        OperatorAlertKind::LedgerFailure,
                        subject_id,
                        Some(cascade_id),
                        format!("Cascade stopped, ledger record lost: {}", e),
                    );
                }
                Err(e) => {
                    log.raise(
                        OperatorAlertKind::DispatchFailure,
                        subject_id,
                        Some(cascade_id),
                        format!("Cascade failed: {}", e),
                    );
                }
            }
        });
    }

    /// Read-only ledger query
    pub async fn query(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, MonitorError> {
        Ok(self.inner.ledger.query(query).await?)
    }

    /// Status view for dashboards
    pub async fn subject_status(&self, subject_id: &SubjectId) -> Result<SubjectStatus, MonitorError> {
        let record = self.record(subject_id)?;
        let mut rec = record.lock().await;
        self.settle(&mut rec, Utc::now());
        Ok(rec.status())
    }

    pub fn operator_alerts(&self) -> Vec<OperatorAlert> {
        self.inner.operator_log.list()
    }

    pub fn subject_count(&self) -> usize {
        self.inner.subjects.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.timers.pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anomaly_detector::AnomalyKind;
    use contacts::Channel;
    use dispatcher::mock::{Behaviour, ScriptedAdapter};
    use escalation::{EscalationError, EscalationState};
    use async_trait::async_trait;
    use ledger::{InMemoryStore, LedgerRecord, LedgerStore, RetryConfig};
    use std::sync::atomic::{AtomicBool, Ordering};
    use telemetry::{Connectivity, GeoPoint, Location};

    fn subject() -> SubjectId {
        SubjectId::from("TS-001")
    }

    fn monitor(adapter: ScriptedAdapter) -> SafetyMonitor {
        SafetyMonitor::new(MonitorConfig::default(), Arc::new(adapter))
    }

    fn sample(minutes_ago: i64, lat: f64, lng: f64) -> DeviceSample {
        DeviceSample {
            subject_id: subject(),
            timestamp: Utc::now() - chrono::Duration::minutes(minutes_ago),
            location: Some(Location::new(lat, lng, 10.0)),
            connectivity: Connectivity::Online,
            battery_level: 64,
        }
    }

    fn route_profile() -> SubjectProfile {
        SubjectProfile::new(vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 1.0)], vec![])
    }

    fn contact(name: &str, rank: u32, channels: Vec<Channel>) -> Contact {
        Contact::new(subject(), name, "+910000", channels, rank)
    }

    async fn wait_closed(monitor: &SafetyMonitor, cascade_id: CascadeId) -> CascadeStatus {
        for _ in 0..600 {
            if let Some(status) = monitor.ledger().cascade_status(cascade_id).await.unwrap() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("cascade {cascade_id} never closed");
    }

    /// Store whose writes fail while `down` is set
    struct SwitchableStore {
        inner: InMemoryStore,
        down: AtomicBool,
    }

    impl SwitchableStore {
        fn new() -> Self {
            Self {
                inner: InMemoryStore::new(),
                down: AtomicBool::new(false),
            }
        }

        fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl LedgerStore for SwitchableStore {
        async fn append(&self, record: LedgerRecord) -> Result<LedgerEntry, LedgerError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(LedgerError::Unavailable("replica unreachable".to_string()));
            }
            self.inner.append(record).await
        }

        async fn query(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, LedgerError> {
            self.inner.query(query).await
        }

        async fn len(&self) -> Result<usize, LedgerError> {
            self.inner.len().await
        }
    }

    fn monitor_over(store: Arc<SwitchableStore>, adapter: Arc<ScriptedAdapter>) -> SafetyMonitor {
        let retry = RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        };
        SafetyMonitor::with_ledger(MonitorConfig::default(), adapter, AlertLedger::new(store, retry))
    }

    fn cascade_of(outcome: &IngestOutcome) -> CascadeId {
        match outcome.transition {
            Some(Transition::CascadeStarted { cascade_id, .. }) => cascade_id,
            other => panic!("expected cascade, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dropout_escalates_and_notifies() {
        let monitor = monitor(ScriptedAdapter::new().on("Parent", Channel::Push, Behaviour::Fail));
        monitor.enroll(subject(), SubjectProfile::default()).unwrap();
        monitor
            .set_contacts(&subject(), vec![contact("Parent", 1, vec![Channel::Push, Channel::Sms])])
            .unwrap();

        assert!(monitor.ingest(sample(30, 26.1, 91.7)).await.unwrap().finding.is_none());
        let outcome = monitor.ingest(sample(10, 26.1, 91.7)).await.unwrap();

        let finding = outcome.finding.clone().unwrap();
        assert_eq!(finding.kind, AnomalyKind::SignalDropout);
        assert!(finding.confidence >= 90);
        let cascade_id = cascade_of(&outcome);

        assert_eq!(wait_closed(&monitor, cascade_id).await, CascadeStatus::Completed);
        let status = monitor.subject_status(&subject()).await.unwrap();
        assert!(matches!(status.state, EscalationState::Escalated { .. }));

        let kinds: Vec<_> = monitor
            .query(&LedgerQuery::subject(subject()))
            .await
            .unwrap()
            .iter()
            .map(|e| e.record.kind())
            .collect();
        assert_eq!(
            kinds,
            vec!["finding", "cascade_opened", "attempt", "attempt", "cascade_closed"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitoring_expiry_escalates() {
        let monitor = monitor(ScriptedAdapter::new());
        monitor.enroll(subject(), route_profile()).unwrap();
        monitor
            .set_contacts(&subject(), vec![contact("Parent", 1, vec![Channel::Sms])])
            .unwrap();

        let outcome = monitor.ingest(sample(1, 2500.0 / 111_194.93, 0.5)).await.unwrap();
        assert!(matches!(outcome.transition, Some(Transition::MonitoringStarted { .. })));
        assert_eq!(monitor.pending_timers(), 1);

        tokio::time::sleep(Duration::from_secs(601)).await;
        let status = monitor.subject_status(&subject()).await.unwrap();
        let cascade_id = status.state.cascade_id().unwrap();
        assert_eq!(wait_closed(&monitor, cascade_id).await, CascadeStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_cancels_monitoring() {
        let monitor = monitor(ScriptedAdapter::new());
        monitor.enroll(subject(), route_profile()).unwrap();

        let outcome = monitor.ingest(sample(1, 2500.0 / 111_194.93, 0.5)).await.unwrap();
        let finding_id = outcome.finding.unwrap().id;

        let resolution = monitor.resolve(&subject(), finding_id).await.unwrap();
        assert!(resolution.was_monitoring);
        assert_eq!(monitor.pending_timers(), 0);

        tokio::time::sleep(Duration::from_secs(700)).await;
        let status = monitor.subject_status(&subject()).await.unwrap();
        assert!(matches!(status.state, EscalationState::Resolved { .. }));

        let entries = monitor.query(&LedgerQuery::subject(subject())).await.unwrap();
        assert!(!entries
            .iter()
            .any(|e| matches!(e.record, LedgerRecord::CascadeOpened { .. })));
        assert!(matches!(entries.last().unwrap().record, LedgerRecord::Resolution { .. }));
    }

    #[tokio::test]
    async fn test_resolve_errors() {
        let monitor = monitor(ScriptedAdapter::new());
        monitor.enroll(subject(), SubjectProfile::default()).unwrap();

        assert!(matches!(
            monitor.resolve(&subject(), uuid::Uuid::new_v4()).await,
            Err(MonitorError::Escalation(EscalationError::NoActiveIncident(_)))
        ));

        monitor.panic(&subject()).await.unwrap();
        assert!(matches!(
            monitor.resolve(&subject(), uuid::Uuid::new_v4()).await,
            Err(MonitorError::Escalation(EscalationError::FindingMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_panic_without_contacts_raises_operator_alert() {
        let monitor = monitor(ScriptedAdapter::new());
        monitor.enroll(subject(), SubjectProfile::default()).unwrap();

        let outcome = monitor.panic(&subject()).await.unwrap();
        let cascade_id = cascade_of(&outcome);

        let alerts = monitor.operator_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, OperatorAlertKind::NoContacts);
        assert_eq!(
            monitor.ledger().cascade_status(cascade_id).await.unwrap(),
            Some(CascadeStatus::CompletedWithFailures)
        );
    }

    #[tokio::test]
    async fn test_second_panic_merges_into_cascade() {
        let monitor = monitor(ScriptedAdapter::new());
        monitor.enroll(subject(), SubjectProfile::default()).unwrap();
        monitor
            .set_contacts(&subject(), vec![contact("Parent", 1, vec![Channel::Push])])
            .unwrap();

        let first = monitor.panic(&subject()).await.unwrap();
        let cascade_id = cascade_of(&first);
        let second = monitor.panic(&subject()).await.unwrap();
        assert!(matches!(
            second.transition,
            Some(Transition::MergedIntoCascade { cascade_id: c, .. }) if c == cascade_id
        ));

        wait_closed(&monitor, cascade_id).await;
        let opened = monitor
            .query(&LedgerQuery::subject(subject()))
            .await
            .unwrap()
            .iter()
            .filter(|e| matches!(e.record, LedgerRecord::CascadeOpened { .. }))
            .count();
        assert_eq!(opened, 1);

        // Resolving with the merged finding closes the incident
        let related = second.finding.unwrap().id;
        let resolution = monitor.resolve(&subject(), related).await.unwrap();
        assert_eq!(resolution.cascade_id, Some(cascade_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolution_mid_cascade_abandons() {
        let monitor = monitor(
            ScriptedAdapter::new().on("Parent", Channel::Push, Behaviour::Delay(Duration::from_secs(5))),
        );
        monitor.enroll(subject(), SubjectProfile::default()).unwrap();
        monitor
            .set_contacts(
                &subject(),
                vec![
                    contact("Parent", 1, vec![Channel::Push]),
                    contact("Guide", 2, vec![Channel::Push]),
                ],
            )
            .unwrap();

        let outcome = monitor.panic(&subject()).await.unwrap();
        let cascade_id = cascade_of(&outcome);
        tokio::time::sleep(Duration::from_secs(1)).await;
        monitor
            .resolve(&subject(), outcome.finding.unwrap().id)
            .await
            .unwrap();

        assert_eq!(wait_closed(&monitor, cascade_id).await, CascadeStatus::Abandoned);
    }

    #[tokio::test]
    async fn test_sweep_escalates_silent_subject() {
        let monitor = monitor(ScriptedAdapter::new());
        monitor.enroll(subject(), SubjectProfile::default()).unwrap();
        monitor
            .set_contacts(&subject(), vec![contact("Parent", 1, vec![Channel::Sms])])
            .unwrap();
        monitor.ingest(sample(20, 26.1, 91.7)).await.unwrap();

        assert_eq!(monitor.sweep(Utc::now()).await.unwrap(), 1);
        assert_eq!(monitor.sweep(Utc::now()).await.unwrap(), 0);
        let status = monitor.subject_status(&subject()).await.unwrap();
        assert!(matches!(status.state, EscalationState::Escalated { .. }));
    }

    #[tokio::test]
    async fn test_ledger_outage_leaves_state_unchanged() {
        let store = Arc::new(SwitchableStore::new());
        let adapter = Arc::new(ScriptedAdapter::new());
        let monitor = monitor_over(store.clone(), adapter.clone());
        monitor.enroll(subject(), SubjectProfile::default()).unwrap();
        monitor
            .set_contacts(&subject(), vec![contact("Parent", 1, vec![Channel::Push])])
            .unwrap();

        store.set_down(true);
        assert!(matches!(
            monitor.panic(&subject()).await,
            Err(MonitorError::Ledger(_))
        ));
        let status = monitor.subject_status(&subject()).await.unwrap();
        assert_eq!(status.state, EscalationState::Normal);
        assert_eq!(monitor.operator_alerts()[0].kind, OperatorAlertKind::LedgerFailure);

        // Once the store is back the next panic opens a real cascade
        store.set_down(false);
        let outcome = monitor.panic(&subject()).await.unwrap();
        let cascade_id = cascade_of(&outcome);
        assert_eq!(wait_closed(&monitor, cascade_id).await, CascadeStatus::Completed);
        assert_eq!(adapter.calls(), vec![("Parent".to_string(), Channel::Push)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_expiry_escalation_rearms_monitoring() {
        let store = Arc::new(SwitchableStore::new());
        let adapter = Arc::new(ScriptedAdapter::new());
        let monitor = monitor_over(store.clone(), adapter.clone());
        monitor.enroll(subject(), route_profile()).unwrap();
        monitor
            .set_contacts(&subject(), vec![contact("Parent", 1, vec![Channel::Sms])])
            .unwrap();

        let outcome = monitor.ingest(sample(1, 2500.0 / 111_194.93, 0.5)).await.unwrap();
        assert!(matches!(outcome.transition, Some(Transition::MonitoringStarted { .. })));

        store.set_down(true);
        tokio::time::sleep(Duration::from_secs(601)).await;
        let status = monitor.subject_status(&subject()).await.unwrap();
        assert!(matches!(status.state, EscalationState::Monitoring { .. }));
        assert_eq!(monitor.pending_timers(), 1);
        assert!(adapter.calls().is_empty());

        store.set_down(false);
        tokio::time::sleep(Duration::from_secs(601)).await;
        let status = monitor.subject_status(&subject()).await.unwrap();
        let cascade_id = status.state.cascade_id().unwrap();
        assert_eq!(wait_closed(&monitor, cascade_id).await, CascadeStatus::Completed);
        assert_eq!(adapter.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_dropout_cascade_treats_device_as_offline() {
        let adapter = Arc::new(ScriptedAdapter::new());
        let monitor = SafetyMonitor::new(MonitorConfig::default(), adapter.clone());
        monitor.enroll(subject(), SubjectProfile::default()).unwrap();
        monitor
            .set_contacts(&subject(), vec![contact("Parent", 1, vec![Channel::Push, Channel::Sms])])
            .unwrap();
        monitor.ingest(sample(20, 26.1, 91.7)).await.unwrap();

        assert_eq!(monitor.sweep(Utc::now()).await.unwrap(), 1);
        let status = monitor.subject_status(&subject()).await.unwrap();
        let cascade_id = status.state.cascade_id().unwrap();
        assert_eq!(wait_closed(&monitor, cascade_id).await, CascadeStatus::Completed);

        // Cellular channels go first for a silent device
        assert_eq!(adapter.calls(), vec![("Parent".to_string(), Channel::Sms)]);
        let attempts = monitor.ledger().cascade_attempts(cascade_id).await.unwrap();
        assert_eq!(attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_subject_and_retire() {
        let monitor = monitor(ScriptedAdapter::new());
        assert!(matches!(
            monitor.ingest(sample(1, 0.0, 0.0)).await,
            Err(MonitorError::UnknownSubject(_))
        ));

        monitor.enroll(subject(), SubjectProfile::default()).unwrap();
        assert_eq!(monitor.subject_count(), 1);
        monitor.retire(&subject()).await.unwrap();
        assert_eq!(monitor.subject_count(), 0);
        assert!(monitor.set_contacts(&subject(), vec![]).is_err());
    }

    #[tokio::test]
    async fn test_invalid_sample_leaves_status_untouched() {
        let monitor = monitor(ScriptedAdapter::new());
        monitor.enroll(subject(), SubjectProfile::default()).unwrap();

        let mut bad = sample(1, 0.0, 0.0);
        bad.location = Some(Location::new(123.0, 0.0, 5.0));
        assert!(matches!(
            monitor.ingest(bad).await,
            Err(MonitorError::Detector(_))
        ));
        let status = monitor.subject_status(&subject()).await.unwrap();
        assert!(status.last_heartbeat.is_none());
    }
}
