//! Detection rules
//!
//! Each rule looks at the window after the current sample has been inserted
//! and reports whether its condition holds. Rules never fabricate a
//! confidence: when the metric they need is undefined they are skipped.

use chrono::Duration;
use telemetry::geo::distance_to_polyline_m;
use telemetry::{DeviceSample, SampleWindow, Zone};

use crate::config::DetectorConfig;
use crate::finding::AnomalyKind;
use crate::profile::SubjectProfile;

/// Result of evaluating one rule
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RuleOutcome {
    /// Metric undefined for this sample
    Skipped,
    /// Condition evaluated and does not hold
    Clear,
    Triggered(Candidate),
}

/// A rule hit before precedence is applied
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Candidate {
    pub kind: AnomalyKind,
    pub confidence: u8,
    pub evidence: String,
}

impl Candidate {
    fn new(kind: AnomalyKind, confidence: u8, evidence: String) -> Self {
        Self {
            kind,
            confidence,
            evidence,
        }
    }
}

/// Inputs shared by every rule
pub(crate) struct RuleContext<'a> {
    pub config: &'a DetectorConfig,
    pub profile: &'a SubjectProfile,
    pub restricted: &'a [Zone],
    pub window: &'a SampleWindow,
    /// Newest sample before the current one
    pub previous: Option<&'a DeviceSample>,
    pub current: &'a DeviceSample,
}

/// Round a ratio-derived score into [0, 99]
pub(crate) fn scaled(score: f64) -> u8 {
    if score.is_finite() {
        score.round().clamp(0.0, 99.0) as u8
    } else {
        0
    }
}

/// Confidence for a dropout of `gap` against `threshold`
pub(crate) fn dropout_confidence(gap: Duration, threshold: Duration) -> u8 {
    let ratio = gap.num_milliseconds() as f64 / threshold.num_milliseconds().max(1) as f64;
    scaled(75.0 * ratio)
}

pub(crate) fn signal_dropout(ctx: &RuleContext<'_>) -> RuleOutcome {
    let Some(previous) = ctx.previous else {
        return RuleOutcome::Skipped;
    };
    if !previous.is_online() {
        return RuleOutcome::Clear;
    }

    let threshold = Duration::minutes(ctx.config.dropout_gap_minutes);
    let gap = ctx.current.timestamp - previous.timestamp;
    if gap <= threshold {
        return RuleOutcome::Clear;
    }

    RuleOutcome::Triggered(Candidate::new(
        AnomalyKind::SignalDropout,
        dropout_confidence(gap, threshold),
        format!(
            "No telemetry for {} min after online sample at {}",
            gap.num_minutes(),
            previous.timestamp.format("%H:%M:%S")
        ),
    ))
}

pub(crate) fn route_deviation(ctx: &RuleContext<'_>) -> RuleOutcome {
    let Some(location) = ctx.current.location else {
        return RuleOutcome::Skipped;
    };
    let Some(distance) = distance_to_polyline_m(&ctx.profile.route, &location.point()) else {
        return RuleOutcome::Skipped;
    };

    let threshold = ctx.config.route_deviation_m;
    if distance <= threshold {
        return RuleOutcome::Clear;
    }

    RuleOutcome::Triggered(Candidate::new(
        AnomalyKind::RouteDeviation,
        scaled(100.0 * (distance - threshold) / threshold),
        format!(
            "{:.0} m from declared route (threshold {:.0} m)",
            distance, threshold
        ),
    ))
}

pub(crate) fn prolonged_inactivity(ctx: &RuleContext<'_>) -> RuleOutcome {
    let Some(latest) = ctx.current.location else {
        return RuleOutcome::Skipped;
    };
    let anchor = latest.point();

    if ctx.profile.in_accommodation(&anchor) {
        return RuleOutcome::Clear;
    }

    // Walk back while the fixes stay inside the movement radius
    let mut stationary_since = ctx.current.timestamp;
    for (sample, location) in ctx.window.located().rev() {
        if location.point().distance_m(&anchor) > ctx.config.movement_epsilon_m {
            break;
        }
        stationary_since = sample.timestamp;
    }

    let threshold = Duration::minutes(ctx.config.inactivity_minutes);
    let stationary = ctx.current.timestamp - stationary_since;
    if stationary <= threshold {
        return RuleOutcome::Clear;
    }

    let ratio = stationary.num_milliseconds() as f64 / threshold.num_milliseconds().max(1) as f64;
    RuleOutcome::Triggered(Candidate::new(
        AnomalyKind::ProlongedInactivity,
        scaled(80.0 * ratio),
        format!(
            "Stationary within {:.0} m for {} min outside accommodation",
            ctx.config.movement_epsilon_m,
            stationary.num_minutes()
        ),
    ))
}

/// Ground speed between two located samples in km/h
fn segment_speed_kmh(from: &DeviceSample, to: &DeviceSample, min_interval_secs: i64) -> Option<f64> {
    let (a, b) = (from.location?, to.location?);
    let secs = (to.timestamp - from.timestamp).num_milliseconds() as f64 / 1000.0;
    if secs < min_interval_secs.max(1) as f64 {
        return None;
    }
    Some(a.point().distance_m(&b.point()) / secs * 3.6)
}

pub(crate) fn speed_anomaly(ctx: &RuleContext<'_>) -> RuleOutcome {
    if ctx.current.location.is_none() {
        return RuleOutcome::Skipped;
    }

    let mut located = ctx.window.located().rev().map(|(s, _)| s);
    // Newest located sample is the current one
    let (Some(current), Some(prior)) = (located.next(), located.next()) else {
        return RuleOutcome::Skipped;
    };

    let min_interval = ctx.config.min_speed_interval_secs;
    let Some(speed) = segment_speed_kmh(prior, current, min_interval) else {
        return RuleOutcome::Skipped;
    };

    let max = ctx.config.max_speed_kmh;
    if speed > max {
        return RuleOutcome::Triggered(Candidate::new(
            AnomalyKind::SpeedAnomaly,
            scaled(50.0 + 100.0 * (speed - max) / max),
            format!("Implausible speed {:.0} km/h (limit {:.0} km/h)", speed, max),
        ));
    }

    let previous_speed = located.next().and_then(|earlier| segment_speed_kmh(earlier, prior, min_interval));
    if let Some(previous_speed) = previous_speed {
        if previous_speed >= ctx.config.vehicle_speed_kmh && speed < ctx.config.min_moving_speed_kmh {
            let drop = 1.0 - speed / previous_speed;
            return RuleOutcome::Triggered(Candidate::new(
                AnomalyKind::SpeedAnomaly,
                scaled(60.0 + 30.0 * drop),
                format!(
                    "Abrupt stop from {:.0} km/h to {:.1} km/h",
                    previous_speed, speed
                ),
            ));
        }
    }

    RuleOutcome::Clear
}

pub(crate) fn geofence_breach(ctx: &RuleContext<'_>) -> RuleOutcome {
    let Some(location) = ctx.current.location else {
        return RuleOutcome::Skipped;
    };
    let point = location.point();

    match ctx.restricted.iter().find(|zone| zone.contains(&point)) {
        Some(zone) => {
            let depth = zone.distance_to_boundary_m(&point).unwrap_or(0.0);
            let confidence = if depth > location.accuracy_m { 99 } else { 95 };
            RuleOutcome::Triggered(Candidate::new(
                AnomalyKind::GeofenceBreach,
                confidence,
                format!("Inside restricted zone '{}' ({:.0} m from edge)", zone.name, depth),
            ))
        }
        None => RuleOutcome::Clear,
    }
}

/// Evaluate every rule in declaration order
pub(crate) fn evaluate_all(ctx: &RuleContext<'_>) -> [(AnomalyKind, RuleOutcome); 5] {
    [
        (AnomalyKind::SignalDropout, signal_dropout(ctx)),
        (AnomalyKind::RouteDeviation, route_deviation(ctx)),
        (AnomalyKind::ProlongedInactivity, prolonged_inactivity(ctx)),
        (AnomalyKind::SpeedAnomaly, speed_anomaly(ctx)),
        (AnomalyKind::GeofenceBreach, geofence_breach(ctx)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use telemetry::{Connectivity, GeoPoint, Location, SubjectId, WindowConfig};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn sample(secs: i64, lat: f64, lng: f64) -> DeviceSample {
        DeviceSample {
            subject_id: SubjectId::from("TS-001"),
            timestamp: base() + Duration::seconds(secs),
            location: Some(Location::new(lat, lng, 10.0)),
            connectivity: Connectivity::Online,
            battery_level: 70,
        }
    }

    fn run<F>(samples: Vec<DeviceSample>, profile: &SubjectProfile, zones: &[Zone], rule: F) -> RuleOutcome
    where
        F: Fn(&RuleContext<'_>) -> RuleOutcome,
    {
        let config = DetectorConfig::default();
        let mut window = SampleWindow::new(&WindowConfig::default());
        let mut previous = None;
        for s in samples {
            previous = window.latest().cloned();
            window.push(s).unwrap();
        }
        let current = window.latest().cloned().unwrap();
        let ctx = RuleContext {
            config: &config,
            profile,
            restricted: zones,
            window: &window,
            previous: previous.as_ref(),
            current: &current,
        };
        rule(&ctx)
    }

    #[test]
    fn test_scaled_caps() {
        assert_eq!(scaled(150.0), 99);
        assert_eq!(scaled(-3.0), 0);
        assert_eq!(scaled(f64::NAN), 0);
        assert_eq!(scaled(24.6), 25);
    }

    #[test]
    fn test_dropout_skipped_without_history() {
        let outcome = run(vec![sample(0, 0.0, 0.0)], &SubjectProfile::default(), &[], signal_dropout);
        assert_eq!(outcome, RuleOutcome::Skipped);
    }

    #[test]
    fn test_dropout_requires_online_previous() {
        let mut first = sample(0, 0.0, 0.0);
        first.connectivity = Connectivity::Offline;
        let outcome = run(
            vec![first, sample(20 * 60, 0.0, 0.0)],
            &SubjectProfile::default(),
            &[],
            signal_dropout,
        );
        assert_eq!(outcome, RuleOutcome::Clear);
    }

    #[test]
    fn test_route_skipped_without_route() {
        let outcome = run(vec![sample(0, 1.0, 1.0)], &SubjectProfile::default(), &[], route_deviation);
        assert_eq!(outcome, RuleOutcome::Skipped);
    }

    #[test]
    fn test_over_speed() {
        // ~1.11 km in 20 s is ~200 km/h
        let outcome = run(
            vec![sample(0, 0.0, 0.0), sample(20, 0.01, 0.0)],
            &SubjectProfile::default(),
            &[],
            speed_anomaly,
        );
        match outcome {
            RuleOutcome::Triggered(c) => {
                assert_eq!(c.kind, AnomalyKind::SpeedAnomaly);
                assert!(c.confidence >= 70 && c.confidence <= 80, "confidence {}", c.confidence);
            }
            other => panic!("expected trigger, got {other:?}"),
        }
    }

    #[test]
    fn test_abrupt_stop() {
        // 60 km/h for a minute, then standing still
        let outcome = run(
            vec![sample(0, 0.0, 0.0), sample(60, 0.009, 0.0), sample(120, 0.009, 0.0)],
            &SubjectProfile::default(),
            &[],
            speed_anomaly,
        );
        match outcome {
            RuleOutcome::Triggered(c) => assert_eq!(c.confidence, 90),
            other => panic!("expected trigger, got {other:?}"),
        }
    }

    #[test]
    fn test_short_segment_skipped() {
        let outcome = run(
            vec![sample(0, 0.0, 0.0), sample(5, 0.01, 0.0)],
            &SubjectProfile::default(),
            &[],
            speed_anomaly,
        );
        assert_eq!(outcome, RuleOutcome::Skipped);
    }

    #[test]
    fn test_inactivity_inside_accommodation() {
        let hotel = Zone::new(
            "hotel",
            vec![
                GeoPoint::new(-0.01, -0.01),
                GeoPoint::new(-0.01, 0.01),
                GeoPoint::new(0.01, 0.01),
                GeoPoint::new(0.01, -0.01),
            ],
        );
        let profile = SubjectProfile::new(vec![], vec![hotel]);
        let samples = (0..6).map(|i| sample(i * 600, 0.0, 0.0)).collect();
        assert_eq!(run(samples, &profile, &[], prolonged_inactivity), RuleOutcome::Clear);

        let samples = (0..6).map(|i| sample(i * 600, 0.0, 0.0)).collect();
        match run(samples, &SubjectProfile::default(), &[], prolonged_inactivity) {
            // 50 minutes against a 45 minute threshold
            RuleOutcome::Triggered(c) => assert_eq!(c.confidence, 89),
            other => panic!("expected trigger, got {other:?}"),
        }
    }

    #[test]
    fn test_geofence_depth_confidence() {
        let zone = Zone::new(
            "military area",
            vec![
                GeoPoint::new(0.0, 0.0),
                GeoPoint::new(0.0, 0.01),
                GeoPoint::new(0.01, 0.01),
                GeoPoint::new(0.01, 0.0),
            ],
        );
        let zones = [zone];
        match run(vec![sample(0, 0.005, 0.005)], &SubjectProfile::default(), &zones, geofence_breach) {
            RuleOutcome::Triggered(c) => assert_eq!(c.confidence, 99),
            other => panic!("expected trigger, got {other:?}"),
        }

        let mut edge = sample(0, 0.0001, 0.005);
        edge.location = Some(Location::new(0.0001, 0.005, 100.0));
        match run(vec![edge], &SubjectProfile::default(), &zones, geofence_breach) {
            RuleOutcome::Triggered(c) => assert_eq!(c.confidence, 95),
            other => panic!("expected trigger, got {other:?}"),
        }
    }
}
