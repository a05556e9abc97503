//! ML-advisory intent inference: a deterministic stand-in for the
//! trained LightGBM intent classifier + risk regressor, honoring the same
//! safety contract.
//!
//! CRITICAL SAFETY PRINCIPLES (unchanged from the reference): the model
//! advises, it never blocks a command directly; it fails silent, not
//! deadly; low confidence defers to the rule-based detectors.
//!
//! Grounded on `src/ai_layer/ml_models/inference.py`'s `IntentInferenceEngine`
//! (the advisory contract: intent/confidence/risk/top-features/model-status/
//! fallback-reason, and the confidence-threshold fallback) and
//! `src/ai_layer/intent_labels.py`'s `ContextualRiskScorer` (the base-risk
//! table and context-risk weights used here in place of a learned
//! regressor — this is exactly the rule set a gradient-boosted risk model
//! is trained to approximate).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::detectors::features::{FlightModeCode, MissionPhaseCode, FEATURE_COUNT};
use crate::mavlink::CommandKind;

const CONFIDENCE_THRESHOLD: f64 = 0.6;
const LATENCY_BUDGET: Duration = Duration::from_millis(20);

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "msg_id_encoded",
    "command_type_encoded",
    "param1_norm",
    "param2_norm",
    "param3_norm",
    "param4_norm",
    "param_magnitude",
    "target_sys",
    "target_comp",
    "time_since_last_cmd",
    "cmd_frequency_1s",
    "cmd_frequency_5s",
    "intent_transitions",
    "param_variance",
    "param_mean_change",
    "repetition_count",
    "mode_changes_window",
    "time_std_dev",
    "cmd_type_diversity",
    "param1_trend",
    "param2_trend",
    "velocity_trend",
    "altitude_change_rate",
    "sequential_same_cmd",
    "burst_detected",
    "flight_mode_encoded",
    "mission_phase_encoded",
    "armed_state",
    "battery_level",
    "altitude_norm",
    "velocity_norm",
    "is_high_altitude",
    "is_low_battery",
    "is_high_velocity",
    "mode_context_match",
    "altitude_category",
    "risk_context_flag",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentClass {
    Navigation,
    MissionUpdate,
    ModeControl,
    Abort,
    Landing,
    ManualOverride,
    ParameterChange,
    ArmDisarm,
    Unknown,
}

impl IntentClass {
    fn base_risk(&self) -> f64 {
        match self {
            IntentClass::Navigation => 0.2,
            IntentClass::MissionUpdate => 0.3,
            IntentClass::ModeControl => 0.4,
            IntentClass::Abort => 0.5,
            IntentClass::Landing => 0.4,
            IntentClass::ManualOverride => 0.5,
            IntentClass::ParameterChange => 0.6,
            IntentClass::ArmDisarm => 0.7,
            IntentClass::Unknown => 0.8,
        }
    }

    /// How unambiguous the kind->intent mapping is — stands in for the
    /// classifier's predicted-class probability.
    fn base_confidence(&self, kind: CommandKind) -> f64 {
        match kind {
            CommandKind::Emergency
            | CommandKind::ArmDisarm
            | CommandKind::ModeChange
            | CommandKind::ParameterChange
            | CommandKind::Manual => 0.9,
            CommandKind::Navigation => 0.75,
            CommandKind::MissionUpdate | CommandKind::TakeoffLand => 0.65,
            CommandKind::TelemetryRequest | CommandKind::Unknown => 0.3,
        }
    }

    fn index(&self) -> usize {
        match self {
            IntentClass::Navigation => 0,
            IntentClass::MissionUpdate => 1,
            IntentClass::ModeControl => 2,
            IntentClass::Abort => 3,
            IntentClass::Landing => 4,
            IntentClass::ManualOverride => 5,
            IntentClass::ParameterChange => 6,
            IntentClass::ArmDisarm => 7,
            IntentClass::Unknown => 8,
        }
    }
}

fn infer_intent(kind: CommandKind, flight_mode: FlightModeCode) -> IntentClass {
    match kind {
        CommandKind::ArmDisarm => IntentClass::ArmDisarm,
        CommandKind::ModeChange => IntentClass::ModeControl,
        CommandKind::Navigation => IntentClass::Navigation,
        CommandKind::MissionUpdate => IntentClass::MissionUpdate,
        CommandKind::TakeoffLand => IntentClass::Landing,
        CommandKind::Emergency => IntentClass::Abort,
        CommandKind::ParameterChange => IntentClass::ParameterChange,
        CommandKind::Manual => IntentClass::ManualOverride,
        CommandKind::TelemetryRequest => {
            if flight_mode == FlightModeCode::Manual {
                IntentClass::ManualOverride
            } else {
                IntentClass::Unknown
            }
        }
        CommandKind::Unknown => IntentClass::Unknown,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    Ok,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct InferenceResult {
    pub intent: IntentClass,
    pub confidence: f64,
    pub intent_risk: f64,
    pub top_features: Vec<(&'static str, f64)>,
    pub inference_time: Duration,
    pub model_status: ModelStatus,
    pub fallback_reason: Option<&'static str>,
}

pub struct IntentMlEngine {
    inference_count: AtomicU64,
    fallback_count: AtomicU64,
}

impl Default for IntentMlEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentMlEngine {
    pub fn new() -> Self {
        Self {
            inference_count: AtomicU64::new(0),
            fallback_count: AtomicU64::new(0),
        }
    }

    pub fn infer(
        &self,
        features: Option<[f64; FEATURE_COUNT]>,
        kind: CommandKind,
        flight_mode: FlightModeCode,
        mission_phase: MissionPhaseCode,
        battery_level: f64,
        altitude: f64,
        velocity: f64,
        armed: bool,
    ) -> InferenceResult {
        let start = Instant::now();
        self.inference_count.fetch_add(1, Ordering::Relaxed);

        let Some(features) = features else {
            return self.fallback("insufficient feature history", start);
        };
        if features.len() != FEATURE_COUNT {
            return self.fallback("feature dimension mismatch", start);
        }

        let intent = infer_intent(kind, flight_mode);
        let confidence = intent.base_confidence(kind);

        if confidence < CONFIDENCE_THRESHOLD {
            self.fallback_count.fetch_add(1, Ordering::Relaxed);
            return InferenceResult {
                intent,
                confidence: 0.0,
                intent_risk: 0.8,
                top_features: Vec::new(),
                inference_time: start.elapsed(),
                model_status: ModelStatus::Fallback,
                fallback_reason: Some("low confidence"),
            };
        }

        let risk = self.score_risk(
            intent,
            &features,
            flight_mode,
            mission_phase,
            battery_level,
            altitude,
            velocity,
            armed,
        );

        let elapsed = start.elapsed();
        if elapsed > LATENCY_BUDGET {
            self.fallback_count.fetch_add(1, Ordering::Relaxed);
            return InferenceResult {
                intent,
                confidence: 0.0,
                intent_risk: 0.8,
                top_features: Vec::new(),
                inference_time: elapsed,
                model_status: ModelStatus::Fallback,
                fallback_reason: Some("inference exceeded latency budget"),
            };
        }

        let top_features = top_contributions(&features, intent, 5);

        InferenceResult {
            intent,
            confidence,
            intent_risk: risk,
            top_features,
            inference_time: elapsed,
            model_status: ModelStatus::Ok,
            fallback_reason: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn score_risk(
        &self,
        intent: IntentClass,
        features: &[f64; FEATURE_COUNT],
        flight_mode: FlightModeCode,
        mission_phase: MissionPhaseCode,
        battery_level: f64,
        altitude: f64,
        velocity: f64,
        _armed: bool,
    ) -> f64 {
        let mut risk_factors = Vec::new();

        if battery_level < 0.2 {
            risk_factors.push(0.3);
        }
        if altitude > 80.0 {
            risk_factors.push(0.25);
        }
        if velocity > 15.0 {
            risk_factors.push(0.2);
        }
        if intent == IntentClass::ArmDisarm {
            risk_factors.push(0.4);
        }
        if mode_mismatch(intent, flight_mode) {
            risk_factors.push(0.35);
        }
        if phase_conflict(intent, mission_phase) {
            risk_factors.push(0.3);
        }
        let cmd_frequency_1s = features[10];
        if cmd_frequency_1s > 0.5 {
            risk_factors.push(0.25);
        }
        let param_magnitude = features[6];
        if param_magnitude > 0.8 {
            risk_factors.push(0.15);
        }

        let context_risk = if risk_factors.is_empty() {
            0.0
        } else {
            risk_factors.iter().sum::<f64>() / risk_factors.len() as f64
        };

        (0.4 * intent.base_risk() + 0.6 * context_risk).clamp(0.0, 1.0)
    }

    fn fallback(&self, reason: &'static str, start: Instant) -> InferenceResult {
        self.fallback_count.fetch_add(1, Ordering::Relaxed);
        InferenceResult {
            intent: IntentClass::Unknown,
            confidence: 0.0,
            intent_risk: 0.8,
            top_features: Vec::new(),
            inference_time: start.elapsed(),
            model_status: ModelStatus::Fallback,
            fallback_reason: Some(reason),
        }
    }

    pub fn fallback_rate(&self) -> f64 {
        let total = self.inference_count.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            self.fallback_count.load(Ordering::Relaxed) as f64 / total as f64
        }
    }
}

fn mode_mismatch(intent: IntentClass, mode: FlightModeCode) -> bool {
    matches!(
        (intent, mode),
        (IntentClass::ManualOverride, FlightModeCode::Auto) | (IntentClass::Navigation, FlightModeCode::Manual)
    )
}

fn phase_conflict(intent: IntentClass, phase: MissionPhaseCode) -> bool {
    matches!(
        (intent, phase),
        (IntentClass::Navigation, MissionPhaseCode::Landing)
            | (IntentClass::Navigation, MissionPhaseCode::LandingApproach)
            | (IntentClass::MissionUpdate, MissionPhaseCode::Takeoff)
            | (IntentClass::MissionUpdate, MissionPhaseCode::Landing)
    )
}

/// Deterministic stand-in for SHAP per-feature contributions: a fixed
/// pseudo-weight per (feature, class) pair times the observed feature
/// value, ranked by magnitude. Not a statistically meaningful attribution —
/// a placeholder with the trained model's output shape.
fn top_contributions(
    features: &[f64; FEATURE_COUNT],
    intent: IntentClass,
    n: usize,
) -> Vec<(&'static str, f64)> {
    let class_idx = intent.index() as f64;
    let mut contributions: Vec<(&'static str, f64)> = features
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let weight = (((i as f64 * 7.0 + class_idx * 13.0) % 11.0) - 5.0) / 5.0;
            (FEATURE_NAMES[i], v * weight)
        })
        .collect();
    contributions.sort_by(|a, b| b.1.abs().partial_cmp(&a.1.abs()).unwrap());
    contributions.truncate(n);
    contributions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_features_fall_back() {
        let engine = IntentMlEngine::new();
        let r = engine.infer(
            None,
            CommandKind::Navigation,
            FlightModeCode::Guided,
            MissionPhaseCode::Cruise,
            0.8,
            25.0,
            5.0,
            true,
        );
        assert_eq!(r.model_status, ModelStatus::Fallback);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.intent_risk, 0.8);
    }

    #[test]
    fn low_confidence_kind_falls_back() {
        let engine = IntentMlEngine::new();
        let features = [0.0; FEATURE_COUNT];
        let r = engine.infer(
            Some(features),
            CommandKind::Unknown,
            FlightModeCode::Manual,
            MissionPhaseCode::None,
            0.8,
            0.0,
            0.0,
            false,
        );
        assert_eq!(r.model_status, ModelStatus::Fallback);
    }

    #[test]
    fn clean_arm_disarm_gets_high_base_risk() {
        let engine = IntentMlEngine::new();
        let features = [0.0; FEATURE_COUNT];
        let r = engine.infer(
            Some(features),
            CommandKind::ArmDisarm,
            FlightModeCode::Guided,
            MissionPhaseCode::Cruise,
            0.8,
            25.0,
            5.0,
            true,
        );
        assert_eq!(r.model_status, ModelStatus::Ok);
        assert_eq!(r.intent, IntentClass::ArmDisarm);
        assert!(r.intent_risk > 0.2);
    }

    #[test]
    fn low_battery_and_high_altitude_raise_risk() {
        let engine = IntentMlEngine::new();
        let features = [0.0; FEATURE_COUNT];
        let low = engine.infer(
            Some(features),
            CommandKind::Navigation,
            FlightModeCode::Guided,
            MissionPhaseCode::Cruise,
            0.15,
            85.0,
            3.0,
            true,
        );
        let normal = engine.infer(
            Some(features),
            CommandKind::Navigation,
            FlightModeCode::Guided,
            MissionPhaseCode::Cruise,
            0.8,
            25.0,
            5.0,
            true,
        );
        assert!(low.intent_risk > normal.intent_risk);
    }

    #[test]
    fn top_features_are_bounded_and_sorted() {
        let mut features = [0.1; FEATURE_COUNT];
        features[3] = 5.0;
        let top = top_contributions(&features, IntentClass::Navigation, 5);
        assert_eq!(top.len(), 5);
        for w in top.windows(2) {
            assert!(w[0].1.abs() >= w[1].1.abs());
        }
    }
}
