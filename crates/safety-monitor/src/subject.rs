//! Subject records

use anomaly_detector::{AnomalyFinding, AnomalyKind};
use chrono::{DateTime, Duration, Utc};
use dispatcher::{CascadeCanceller, SubjectContext};
use escalation::{EscalationMachine, EscalationState};
use serde::{Deserialize, Serialize};
use telemetry::{Connectivity, DeviceSample, Location, SubjectId};

/// Mutable per-subject state owned by the monitor
#[derive(Debug)]
pub(crate) struct SubjectRecord {
    pub subject_id: SubjectId,
    pub enrolled_at: DateTime<Utc>,
    pub machine: EscalationMachine,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_location: Option<Location>,
    pub connectivity: Connectivity,
    pub battery_level: Option<u8>,
    /// Finding under observation, kept for the cascade message on expiry
    pub monitoring_finding: Option<AnomalyFinding>,
    /// Cancels the running cascade, if any
    pub cascade: Option<CascadeCanceller>,
}

impl SubjectRecord {
    pub fn new(subject_id: SubjectId) -> Self {
        Self {
            machine: EscalationMachine::new(subject_id.clone()),
            subject_id,
            enrolled_at: Utc::now(),
            last_heartbeat: None,
            last_location: None,
            connectivity: Connectivity::Online,
            battery_level: None,
            monitoring_finding: None,
            cascade: None,
        }
    }

    /// Fold an accepted sample into the status fields
    pub fn observe(&mut self, sample: &DeviceSample) {
        self.last_heartbeat = Some(sample.timestamp);
        if sample.location.is_some() {
            self.last_location = sample.location;
        }
        self.connectivity = sample.connectivity;
        self.battery_level = Some(sample.battery_level);
    }

    /// Context for a cascade raised by `finding`
    ///
    /// The device counts as offline when it said so, when the finding is a
    /// dropout, or when its last heartbeat is older than `dropout_gap`.
    pub fn dispatch_context(
        &self,
        finding: &AnomalyFinding,
        now: DateTime<Utc>,
        dropout_gap: Duration,
    ) -> SubjectContext {
        let silent = self.last_heartbeat.is_some_and(|seen| now - seen > dropout_gap);
        SubjectContext {
            device_offline: self.connectivity == Connectivity::Offline
                || finding.kind == AnomalyKind::SignalDropout
                || silent,
            location: self.last_location,
            battery_level: self.battery_level,
        }
    }

    pub fn status(&self) -> SubjectStatus {
        SubjectStatus {
            subject_id: self.subject_id.clone(),
            state: *self.machine.state(),
            incident_findings: self.machine.incident_findings().len(),
            enrolled_at: self.enrolled_at,
            last_heartbeat: self.last_heartbeat,
            last_location: self.last_location,
            connectivity: self.connectivity,
            battery_level: self.battery_level,
        }
    }
}

/// Read-only status view for dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectStatus {
    pub subject_id: SubjectId,
    pub state: EscalationState,
    /// Findings attached to the active incident
    pub incident_findings: usize,
    pub enrolled_at: DateTime<Utc>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_location: Option<Location>,
    pub connectivity: Connectivity,
    pub battery_level: Option<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_keeps_last_location() {
        let mut record = SubjectRecord::new(SubjectId::from("TS-001"));
        let mut sample = DeviceSample {
            subject_id: SubjectId::from("TS-001"),
            timestamp: Utc::now(),
            location: Some(Location::new(26.1, 91.7, 15.0)),
            connectivity: Connectivity::Online,
            battery_level: 55,
        };
        record.observe(&sample);

        sample.location = None;
        sample.connectivity = Connectivity::Offline;
        sample.battery_level = 12;
        record.observe(&sample);

        let panic = AnomalyFinding::panic(SubjectId::from("TS-001"), Utc::now(), None);
        let context = record.dispatch_context(&panic, Utc::now(), Duration::minutes(15));
        assert!(context.device_offline);
        assert_eq!(context.location, Some(Location::new(26.1, 91.7, 15.0)));
        assert_eq!(record.status().battery_level, Some(12));
    }

    #[test]
    fn test_silent_online_device_counts_as_offline() {
        let mut record = SubjectRecord::new(SubjectId::from("TS-001"));
        let now = Utc::now();
        record.observe(&DeviceSample {
            subject_id: SubjectId::from("TS-001"),
            timestamp: now - Duration::minutes(20),
            location: Some(Location::new(26.1, 91.7, 15.0)),
            connectivity: Connectivity::Online,
            battery_level: 55,
        });
        let gap = Duration::minutes(15);

        let panic = AnomalyFinding::panic(SubjectId::from("TS-001"), now, None);
        assert!(record.dispatch_context(&panic, now, gap).device_offline);
        assert!(!record
            .dispatch_context(&panic, now - Duration::minutes(10), gap)
            .device_offline);

        let dropout = AnomalyFinding::new(
            SubjectId::from("TS-001"),
            AnomalyKind::SignalDropout,
            97,
            now,
            "silent",
            None,
        );
        assert!(record
            .dispatch_context(&dropout, now - Duration::minutes(10), gap)
            .device_offline);
    }
}
