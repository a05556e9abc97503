//! Risk-proportional decision engine: converges every layer's output into
//! one of four decision states.
//!
//! Same weights, same emergency-override floors, same severity buckets,
//! same confidence-adjustment formula as the reference aggregator this was
//! ported from. That reference reads a `behavior_result` with
//! `behavior_score` and `anomaly_level` fields from a dedicated
//! behavioral-IDS layer that never fully materialized upstream — here that
//! input is derived from `detectors::flood::FloodMetrics`
//! (`behavior_score = max(burst_score, sustained_load)`), since rate/burst
//! anomaly is the one behavioral signal this gateway actually computes.
//! Injection findings are folded in as confidence-tiered risk floors rather
//! than a sixth weighted component, so the five named weights still sum to
//! 1.0.

use crate::detectors::flood::FloodMetrics;
use crate::detectors::injection::InjectionMetrics;
use crate::detectors::intent_ml::InferenceResult;
use crate::detectors::intent_rule::IntentResult;
use crate::detectors::shadow::ShadowResult;

const WEIGHT_CRYPTO: f64 = 0.25;
const WEIGHT_INTENT: f64 = 0.15;
const WEIGHT_BEHAVIOR: f64 = 0.2;
const WEIGHT_TRAJECTORY: f64 = 0.2;
const WEIGHT_ML_INTENT: f64 = 0.2;

const ML_CONFIDENCE_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionState {
    Accept,
    Constrain,
    Hold,
    Rtl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyLevel {
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct BehaviorResult {
    pub behavior_score: f64,
    pub anomaly_level: AnomalyLevel,
    pub anomaly_features: Vec<String>,
    pub explanation: String,
}

impl From<FloodMetrics> for BehaviorResult {
    fn from(m: FloodMetrics) -> Self {
        let behavior_score = m.burst_score.max(m.sustained_load);
        let anomaly_level = if m.is_attack && m.confidence >= 0.9 {
            AnomalyLevel::High
        } else if behavior_score > 0.5 {
            AnomalyLevel::Medium
        } else if behavior_score > 0.2 {
            AnomalyLevel::Low
        } else {
            AnomalyLevel::None
        };
        let mut anomaly_features = Vec::new();
        if m.burst_score > 0.5 {
            anomaly_features.push(format!("burst_score={:.2}", m.burst_score));
        }
        if m.sustained_load > 0.5 {
            anomaly_features.push(format!("sustained_load={:.2}", m.sustained_load));
        }
        let explanation = format!(
            "rate={:.1} cmd/s, burst={:.2}, sustained={:.2}",
            m.commands_per_second, m.burst_score, m.sustained_load
        );
        Self {
            behavior_score,
            anomaly_level,
            anomaly_features,
            explanation,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContributingFactors {
    pub risk_score: f64,
    pub crypto_valid: bool,
    pub intent_match: bool,
    pub intent_confidence: f64,
    pub behavior_score: f64,
    pub anomaly_level: AnomalyLevel,
    pub trajectory_risk: f64,
    pub geofence_violation: bool,
    pub ml_intent: Option<String>,
    pub ml_confidence: Option<f64>,
    pub ml_intent_risk: Option<f64>,
    pub is_injection: bool,
    pub injection_method: &'static str,
}

#[derive(Debug, Clone)]
pub struct DecisionResult {
    pub decision: DecisionState,
    pub severity: Severity,
    pub confidence: f64,
    pub explanation: String,
    pub factors: ContributingFactors,
}

#[derive(Default)]
pub struct DecisionEngine;

impl DecisionEngine {
    pub fn new() -> Self {
        Self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn decide(
        &self,
        crypto_valid: bool,
        intent_result: &IntentResult,
        behavior_result: &BehaviorResult,
        shadow_result: &ShadowResult,
        ml_intent_result: Option<&InferenceResult>,
        injection_metrics: &InjectionMetrics,
    ) -> DecisionResult {
        let total_risk = self.aggregate_risk(crypto_valid, intent_result, behavior_result, shadow_result, ml_intent_result, injection_metrics);
        let severity = determine_severity(total_risk);
        let (decision, explanation) = self.make_decision(
            total_risk,
            severity,
            crypto_valid,
            intent_result,
            behavior_result,
            shadow_result,
            ml_intent_result,
            injection_metrics,
        );
        let confidence = calculate_confidence(intent_result.confidence, behavior_result.behavior_score, crypto_valid, ml_intent_result.map(|r| r.confidence));

        let factors = ContributingFactors {
            risk_score: total_risk,
            crypto_valid,
            intent_match: intent_result.intent_match,
            intent_confidence: intent_result.confidence,
            behavior_score: behavior_result.behavior_score,
            anomaly_level: behavior_result.anomaly_level,
            trajectory_risk: shadow_result.trajectory_risk,
            geofence_violation: shadow_result.outcome.geofence_violation,
            ml_intent: ml_intent_result.map(|r| format!("{:?}", r.intent)),
            ml_confidence: ml_intent_result.map(|r| r.confidence),
            ml_intent_risk: ml_intent_result.map(|r| r.intent_risk),
            is_injection: injection_metrics.is_injection,
            injection_method: injection_metrics.detection_method,
        };

        DecisionResult {
            decision,
            severity,
            confidence,
            explanation,
            factors,
        }
    }

    fn aggregate_risk(
        &self,
        crypto_valid: bool,
        intent_result: &IntentResult,
        behavior_result: &BehaviorResult,
        shadow_result: &ShadowResult,
        ml_intent_result: Option<&InferenceResult>,
        injection_metrics: &InjectionMetrics,
    ) -> f64 {
        let crypto_risk = if crypto_valid { 0.0 } else { 1.0 };

        let mut intent_risk = if intent_result.intent_match { 0.0 } else { 0.8 };
        if intent_result.confidence < 0.6 {
            intent_risk = intent_risk.max(0.6);
        }

        let behavior_risk = behavior_result.behavior_score;
        let trajectory_risk = shadow_result.trajectory_risk;

        let ml_intent_risk = match ml_intent_result {
            Some(ml) if ml.confidence >= ML_CONFIDENCE_THRESHOLD => ml.intent_risk,
            Some(_) => 0.5,
            None => 0.5,
        };

        let mut total = WEIGHT_CRYPTO * crypto_risk
            + WEIGHT_INTENT * intent_risk
            + WEIGHT_BEHAVIOR * behavior_risk
            + WEIGHT_TRAJECTORY * trajectory_risk
            + WEIGHT_ML_INTENT * ml_intent_risk;

        if shadow_result.outcome.geofence_violation {
            total = total.max(0.85);
        }
        if behavior_result.anomaly_level == AnomalyLevel::High {
            total = total.max(0.75);
        }
        if !crypto_valid {
            total = total.max(0.7);
        }
        if let Some(ml) = ml_intent_result {
            if ml.confidence >= ML_CONFIDENCE_THRESHOLD && ml.intent_risk > 0.8 {
                total = total.max(0.75);
            }
        }
        if injection_metrics.is_injection {
            if injection_metrics.confidence >= 0.85 {
                total = total.max(0.75);
            } else if injection_metrics.confidence >= 0.70 {
                total = total.max(0.55);
            } else if injection_metrics.confidence >= 0.60 {
                total = total.max(0.35);
            }
        }

        (total.min(1.0) * 100.0).round() / 100.0
    }

    #[allow(clippy::too_many_arguments)]
    fn make_decision(
        &self,
        risk: f64,
        severity: Severity,
        crypto_valid: bool,
        intent_result: &IntentResult,
        behavior_result: &BehaviorResult,
        shadow_result: &ShadowResult,
        ml_intent_result: Option<&InferenceResult>,
        injection_metrics: &InjectionMetrics,
    ) -> (DecisionState, String) {
        let _ = risk;
        match severity {
            Severity::Critical => {
                let mut reasons = Vec::new();
                if shadow_result.outcome.geofence_violation {
                    if let Some(ttv) = shadow_result.outcome.time_to_violation_sec {
                        reasons.push(format!("predicted geofence violation in {ttv:.1}s"));
                    }
                }
                if !crypto_valid {
                    reasons.push("crypto validation failed".to_string());
                }
                if behavior_result.anomaly_level == AnomalyLevel::High {
                    reasons.push(format!("high behavioral anomaly: {}", behavior_result.anomaly_features.join(", ")));
                }
                if injection_metrics.is_injection && injection_metrics.confidence >= 0.85 {
                    reasons.push(format!(
                        "high-confidence injection ({}, confidence={:.2})",
                        injection_metrics.detection_method, injection_metrics.confidence
                    ));
                }
                let explanation = format!("CRITICAL RISK: initiating emergency RTL. {}", reasons.join(" | "));
                (DecisionState::Rtl, explanation)
            }
            Severity::High => {
                let mut reasons = Vec::new();
                if !intent_result.intent_match {
                    reasons.push(format!("intent mismatch: {}", intent_result.reason));
                }
                if shadow_result.trajectory_risk > 0.7 {
                    reasons.push("high trajectory risk".to_string());
                }
                if behavior_result.behavior_score > 0.6 {
                    reasons.push(format!("behavioral anomaly: {}", behavior_result.explanation));
                }
                if let Some(ml) = ml_intent_result {
                    if ml.confidence >= ML_CONFIDENCE_THRESHOLD && ml.intent_risk > 0.7 {
                        reasons.push(format!("ML detected high-risk intent: {:?} (risk={:.2})", ml.intent, ml.intent_risk));
                    }
                }
                if injection_metrics.is_injection && injection_metrics.confidence >= 0.85 {
                    reasons.push(format!(
                        "injection detected via {} (confidence={:.2})",
                        injection_metrics.detection_method, injection_metrics.confidence
                    ));
                }
                let explanation = format!("HIGH RISK: command held for review. {}", reasons.join(" | "));
                (DecisionState::Hold, explanation)
            }
            Severity::Medium => {
                let mut reasons = Vec::new();
                if shadow_result.outcome.velocity_risk {
                    reasons.push("velocity limited to safe range".to_string());
                }
                if shadow_result.outcome.altitude_risk {
                    reasons.push("altitude clamped to safe bounds".to_string());
                }
                if behavior_result.behavior_score > 0.4 {
                    reasons.push("rate limited due to behavioral pattern".to_string());
                }
                if injection_metrics.is_injection {
                    reasons.push(format!(
                        "possible injection via {} (confidence={:.2})",
                        injection_metrics.detection_method, injection_metrics.confidence
                    ));
                }
                let explanation = format!("MEDIUM RISK: command constrained. {}", reasons.join(" | "));
                (DecisionState::Constrain, explanation)
            }
            Severity::Low | Severity::None => (
                DecisionState::Accept,
                "command accepted, all layers report acceptable risk".to_string(),
            ),
        }
    }
}

fn determine_severity(risk: f64) -> Severity {
    if risk < 0.3 {
        Severity::None
    } else if risk < 0.5 {
        Severity::Low
    } else if risk < 0.7 {
        Severity::Medium
    } else if risk < 0.9 {
        Severity::High
    } else {
        Severity::Critical
    }
}

fn calculate_confidence(intent_conf: f64, behavior_score: f64, crypto_valid: bool, ml_confidence: Option<f64>) -> f64 {
    let mut confidence: f64 = 0.9;
    if intent_conf < 0.6 {
        confidence -= 0.2;
    }
    if behavior_score > 0.4 && behavior_score < 0.6 {
        confidence -= 0.1;
    }
    if !crypto_valid {
        confidence -= 0.15;
    }
    if let Some(ml_conf) = ml_confidence {
        if ml_conf < 0.5 {
            confidence -= 0.1;
        } else if ml_conf > 0.85 {
            confidence += 0.05;
        }
    }
    (confidence.max(0.5) * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::intent_rule::Intent;
    use crate::detectors::shadow::{EnergyMargin, PredictedOutcome};
    use crate::vehicle::MissionPhase;

    fn clean_injection() -> InjectionMetrics {
        InjectionMetrics {
            is_injection: false,
            confidence: 0.0,
            detection_method: "none",
            explanation: "nominal".to_string(),
            unauthorized_command: false,
            parameter_anomaly: false,
            context_violation: false,
            privilege_escalation: false,
            semantic_anomaly: false,
            risk_score: 0.0,
        }
    }

    fn clean_intent() -> IntentResult {
        IntentResult {
            intent: Intent::Navigation,
            confidence: 0.9,
            intent_match: true,
            reason: "ok".to_string(),
            mission_phase: MissionPhase::Cruise,
            expected_intents: vec![Intent::Navigation],
        }
    }

    fn clean_behavior() -> BehaviorResult {
        BehaviorResult {
            behavior_score: 0.1,
            anomaly_level: AnomalyLevel::None,
            anomaly_features: vec![],
            explanation: "nominal".to_string(),
        }
    }

    fn clean_shadow() -> ShadowResult {
        ShadowResult {
            outcome: PredictedOutcome {
                geofence_violation: false,
                time_to_violation_sec: None,
                altitude_risk: false,
                velocity_risk: false,
                energy_margin: EnergyMargin::High,
                loss_of_control_risk: false,
                collision_risk: false,
            },
            trajectory_risk: 0.05,
        }
    }

    #[test]
    fn clean_inputs_are_accepted() {
        let engine = DecisionEngine::new();
        let result = engine.decide(true, &clean_intent(), &clean_behavior(), &clean_shadow(), None, &clean_injection());
        assert_eq!(result.decision, DecisionState::Accept);
        assert_eq!(result.severity, Severity::None);
    }

    #[test]
    fn crypto_failure_forces_elevated_risk() {
        let engine = DecisionEngine::new();
        let result = engine.decide(false, &clean_intent(), &clean_behavior(), &clean_shadow(), None, &clean_injection());
        assert!(result.factors.risk_score >= 0.7);
        assert_ne!(result.decision, DecisionState::Accept);
    }

    #[test]
    fn geofence_violation_forces_rtl() {
        let engine = DecisionEngine::new();
        let mut shadow = clean_shadow();
        shadow.outcome.geofence_violation = true;
        shadow.outcome.time_to_violation_sec = Some(2.5);
        shadow.trajectory_risk = 0.9;
        let result = engine.decide(true, &clean_intent(), &clean_behavior(), &shadow, None, &clean_injection());
        assert_eq!(result.decision, DecisionState::Rtl);
        assert_eq!(result.severity, Severity::Critical);
    }

    #[test]
    fn intent_mismatch_alone_holds_or_constrains() {
        let engine = DecisionEngine::new();
        let mut intent = clean_intent();
        intent.intent_match = false;
        intent.confidence = 0.9;
        let result = engine.decide(true, &intent, &clean_behavior(), &clean_shadow(), None, &clean_injection());
        assert_ne!(result.decision, DecisionState::Rtl);
        assert!(result.factors.risk_score > 0.1);
    }

    #[test]
    fn low_confidence_ml_intent_is_conservative() {
        let engine = DecisionEngine::new();
        let ml = InferenceResult {
            intent: crate::detectors::intent_ml::IntentClass::Unknown,
            confidence: 0.3,
            intent_risk: 0.9,
            top_features: vec![],
            inference_time: std::time::Duration::from_millis(1),
            model_status: crate::detectors::intent_ml::ModelStatus::Fallback,
            fallback_reason: Some("low confidence"),
        };
        let result = engine.decide(true, &clean_intent(), &clean_behavior(), &clean_shadow(), Some(&ml), &clean_injection());
        // Below ML_CONFIDENCE_THRESHOLD the 0.9 intent_risk is discarded in
        // favor of the 0.5 neutral contribution, so it must not drive the
        // decision past the Accept band even though every other layer is
        // clean and the reported risk looks high.
        assert!(result.factors.risk_score < 0.3);
        assert_eq!(result.decision, DecisionState::Accept);
    }

    #[test]
    fn high_confidence_context_violation_injection_forces_hold_or_rtl() {
        // Mirrors a disarm-in-flight style attack: crypto/intent/behavior/shadow
        // all look clean on their own, but the injection detector caught a
        // context violation at high confidence. That alone must push severity
        // to at least High so the command is held or sent to RTL, never accepted.
        let engine = DecisionEngine::new();
        let injection = InjectionMetrics {
            is_injection: true,
            confidence: 0.85,
            detection_method: "context",
            explanation: "disarm commanded while in flight".to_string(),
            unauthorized_command: false,
            parameter_anomaly: false,
            context_violation: true,
            privilege_escalation: false,
            semantic_anomaly: false,
            risk_score: 0.85,
        };
        let mut intent = clean_intent();
        intent.intent_match = false;
        let result = engine.decide(true, &intent, &clean_behavior(), &clean_shadow(), None, &injection);
        assert!(result.severity >= Severity::High);
        assert_ne!(result.decision, DecisionState::Accept);
        assert_ne!(result.decision, DecisionState::Constrain);
        assert!(result.factors.is_injection);
    }
}
