//! Anomaly Classifier
//!
//! Arena of per-subject tracks. Each track sits behind its own mutex so one
//! subject's evaluation never waits on another's; the map lock is only held
//! to look a track up.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use telemetry::{DeviceSample, SampleValidator, SampleWindow, SubjectId, Zone};
use tracing::{debug, info, warn};

use crate::config::DetectorConfig;
use crate::finding::{AnomalyFinding, AnomalyKind};
use crate::profile::SubjectProfile;
use crate::rules::{self, Candidate, RuleContext, RuleOutcome};
use crate::DetectorError;

/// Per-subject classifier state
#[derive(Debug)]
struct SubjectTrack {
    profile: SubjectProfile,
    window: SampleWindow,
    /// Location-state kinds currently latched
    latched: HashSet<AnomalyKind>,
    /// Silence sweep already reported the current gap
    silence_reported: bool,
}

impl SubjectTrack {
    fn new(profile: SubjectProfile, config: &DetectorConfig) -> Self {
        Self {
            profile,
            window: SampleWindow::new(&config.window),
            latched: HashSet::new(),
            silence_reported: false,
        }
    }
}

/// Stateful per-subject evaluator
pub struct AnomalyClassifier {
    config: DetectorConfig,
    validator: SampleValidator,
    tracks: RwLock<HashMap<SubjectId, Arc<Mutex<SubjectTrack>>>>,
    restricted: RwLock<Vec<Zone>>,
}

impl AnomalyClassifier {
    /// Create a new classifier
    pub fn new(config: DetectorConfig) -> Self {
        info!("Creating anomaly classifier with config: {:?}", config);
        Self {
            validator: SampleValidator::new(config.validation.clone()),
            config,
            tracks: RwLock::new(HashMap::new()),
            restricted: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Start tracking a subject, or replace the profile of a tracked one
    ///
    /// Returns `true` when the subject was not tracked before.
    pub fn enroll(&self, subject_id: SubjectId, profile: SubjectProfile) -> Result<bool, DetectorError> {
        let mut tracks = self.tracks.write().map_err(poisoned)?;
        if let Some(track) = tracks.get(&subject_id) {
            track.lock().map_err(poisoned)?.profile = profile;
            debug!(subject = %subject_id, "Updated subject profile");
            return Ok(false);
        }

        info!(subject = %subject_id, route_points = profile.route.len(), "Subject enrolled");
        tracks.insert(subject_id, Arc::new(Mutex::new(SubjectTrack::new(profile, &self.config))));
        Ok(true)
    }

    /// Stop tracking a subject and drop its window
    pub fn retire(&self, subject_id: &SubjectId) -> Result<(), DetectorError> {
        let mut tracks = self.tracks.write().map_err(poisoned)?;
        tracks
            .remove(subject_id)
            .map(|_| info!(subject = %subject_id, "Subject retired"))
            .ok_or_else(|| DetectorError::UnknownSubject(subject_id.clone()))
    }

    pub fn is_enrolled(&self, subject_id: &SubjectId) -> bool {
        self.tracks
            .read()
            .map(|t| t.contains_key(subject_id))
            .unwrap_or(false)
    }

    pub fn subject_count(&self) -> usize {
        self.tracks.read().map(|t| t.len()).unwrap_or(0)
    }

    /// Register a restricted polygon shared by all subjects
    pub fn register_restricted_zone(&self, zone: Zone) -> Result<(), DetectorError> {
        info!(zone = %zone.name, vertices = zone.polygon.len(), "Restricted zone registered");
        self.restricted.write().map_err(poisoned)?.push(zone);
        Ok(())
    }

    fn track(&self, subject_id: &SubjectId) -> Result<Arc<Mutex<SubjectTrack>>, DetectorError> {
        self.tracks
            .read()
            .map_err(poisoned)?
            .get(subject_id)
            .cloned()
            .ok_or_else(|| DetectorError::UnknownSubject(subject_id.clone()))
    }

    /// Evaluate one newly arrived sample
    ///
    /// Emits at most one finding. A rejected sample leaves the subject's
    /// window and latches untouched.
    pub fn evaluate(
        &self,
        sample: DeviceSample,
        now: DateTime<Utc>,
    ) -> Result<Option<AnomalyFinding>, DetectorError> {
        let track = self.track(&sample.subject_id)?;

        if let Err(e) = self.validator.validate(&sample, now) {
            metrics::counter!("safetrail_samples_total", "result" => "rejected").increment(1);
            warn!(subject = %sample.subject_id, error = %e, "Sample rejected");
            return Err(e.into());
        }

        let restricted = self.restricted.read().map_err(poisoned)?;
        let mut track = track.lock().map_err(poisoned)?;

        let previous = track.window.latest().cloned();
        if let Err(e) = track.window.push(sample) {
            metrics::counter!("safetrail_samples_total", "result" => "rejected").increment(1);
            warn!(error = %e, "Out-of-order sample rejected");
            return Err(e.into());
        }
        metrics::counter!("safetrail_samples_total", "result" => "accepted").increment(1);

        let track = &mut *track;
        let Some(current) = track.window.latest() else {
            return Ok(None);
        };

        let ctx = RuleContext {
            config: &self.config,
            profile: &track.profile,
            restricted: &restricted,
            window: &track.window,
            previous: previous.as_ref(),
            current,
        };
        let outcomes = rules::evaluate_all(&ctx);

        let already_reported = std::mem::take(&mut track.silence_reported);
        let mut winner: Option<Candidate> = None;
        for (kind, outcome) in outcomes {
            let candidate = match outcome {
                RuleOutcome::Skipped => continue,
                RuleOutcome::Clear => {
                    if track.latched.remove(&kind) {
                        debug!(subject = %current.subject_id, kind = %kind, "Condition cleared");
                    }
                    continue;
                }
                RuleOutcome::Triggered(candidate) => candidate,
            };

            if kind.is_latching() && track.latched.contains(&kind) {
                continue;
            }
            if kind == AnomalyKind::SignalDropout && already_reported {
                continue;
            }

            // Strictly greater keeps the earlier rule on ties
            let better = winner
                .as_ref()
                .map(|w| kind.severity() > w.kind.severity())
                .unwrap_or(true);
            if better {
                winner = Some(candidate);
            }
        }

        let Some(winner) = winner else {
            return Ok(None);
        };

        if winner.kind.is_latching() {
            track.latched.insert(winner.kind);
        }

        let location = track.window.latest_located().map(|(_, loc)| *loc);
        let finding = AnomalyFinding::new(
            current.subject_id.clone(),
            winner.kind,
            winner.confidence,
            current.timestamp,
            winner.evidence,
            location,
        );

        metrics::counter!("safetrail_findings_total", "kind" => finding.kind.as_str()).increment(1);
        info!(
            subject = %finding.subject_id,
            kind = %finding.kind,
            severity = %finding.severity,
            confidence = finding.confidence,
            "Anomaly detected"
        );
        Ok(Some(finding))
    }

    /// Report subjects that went silent after an online sample
    ///
    /// Each silent period is reported once; the next sample re-arms it.
    pub fn sweep_silence(&self, now: DateTime<Utc>) -> Result<Vec<AnomalyFinding>, DetectorError> {
        let tracks: Vec<_> = self.tracks.read().map_err(poisoned)?.values().cloned().collect();
        let threshold = Duration::minutes(self.config.dropout_gap_minutes);

        let mut findings = Vec::new();
        for track in tracks {
            let mut track = track.lock().map_err(poisoned)?;
            if track.silence_reported {
                continue;
            }
            // Cleared windows still remember the last sample and fix
            let Some(latest) = track.window.last_seen() else {
                continue;
            };
            let gap = now - latest.timestamp;
            if !latest.is_online() || gap <= threshold {
                continue;
            }

            let finding = AnomalyFinding::new(
                latest.subject_id.clone(),
                AnomalyKind::SignalDropout,
                rules::dropout_confidence(gap, threshold),
                now,
                format!(
                    "No telemetry for {} min after online sample at {}",
                    gap.num_minutes(),
                    latest.timestamp.format("%H:%M:%S")
                ),
                track.window.last_fix(),
            );
            track.silence_reported = true;

            metrics::counter!("safetrail_findings_total", "kind" => finding.kind.as_str()).increment(1);
            warn!(subject = %finding.subject_id, gap_min = gap.num_minutes(), "Subject silent");
            findings.push(finding);
        }
        Ok(findings)
    }

    /// Forget samples older than `instant` and release all latches
    pub fn clear_before(&self, subject_id: &SubjectId, instant: DateTime<Utc>) -> Result<usize, DetectorError> {
        let track = self.track(subject_id)?;
        let mut track = track.lock().map_err(poisoned)?;
        let dropped = track.window.clear_before(instant);
        track.latched.clear();
        debug!(subject = %subject_id, dropped, "Cleared transient window state");
        Ok(dropped)
    }

    /// Newest accepted sample for a subject
    pub fn latest_sample(&self, subject_id: &SubjectId) -> Result<Option<DeviceSample>, DetectorError> {
        let track = self.track(subject_id)?;
        let track = track.lock().map_err(poisoned)?;
        Ok(track.window.last_seen().cloned())
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> DetectorError {
    DetectorError::StatePoisoned(e.to_string())
}
