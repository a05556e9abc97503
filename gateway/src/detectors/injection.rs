//! Injection detector: stacked authorization / bounds / context /
//! privilege / semantic checks over a single parsed command.
//!
//! Grounded on `src/ai_layer/attack_detection/injection_detector.py`'s
//! `InjectionDetector`: same flight-state authorization table, same
//! parameter bounds, same dangerous-pattern list, same weighted risk score
//! and aggregation-cascade precedence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::mavlink::{CommandKind, ParsedCommand};
use crate::vehicle::{FlightMode, MissionPhase, VehicleSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightState {
    Disarmed,
    ArmedGround,
    TakingOff,
    InFlight,
    Landing,
    Emergency,
}

/// Derives the coarse flight-state bucket `injection_detector.py` keys its
/// authorization table on from the gateway's `VehicleSnapshot`.
pub fn derive_flight_state(snap: &VehicleSnapshot) -> FlightState {
    if !snap.armed {
        return FlightState::Disarmed;
    }
    if snap.mode == FlightMode::Rtl {
        return FlightState::Emergency;
    }
    match snap.mission_phase {
        MissionPhase::Takeoff => FlightState::TakingOff,
        MissionPhase::Landing => FlightState::Landing,
        MissionPhase::Idle | MissionPhase::PreFlight if snap.altitude_agl_m < 0.5 => {
            FlightState::ArmedGround
        }
        _ => FlightState::InFlight,
    }
}

fn authorized_kinds(state: FlightState) -> &'static [CommandKind] {
    use CommandKind::*;
    match state {
        FlightState::Disarmed => &[ArmDisarm, ModeChange, ParameterChange, MissionUpdate, TelemetryRequest],
        FlightState::ArmedGround => &[ArmDisarm, TakeoffLand, ModeChange, Emergency, TelemetryRequest],
        FlightState::TakingOff => &[Navigation, ModeChange, Emergency, TelemetryRequest],
        FlightState::InFlight => &[
            Navigation,
            ModeChange,
            TakeoffLand,
            Emergency,
            MissionUpdate,
            TelemetryRequest,
        ],
        FlightState::Landing => &[Navigation, TakeoffLand, Emergency, TelemetryRequest],
        FlightState::Emergency => &[Emergency, TakeoffLand, ArmDisarm, TelemetryRequest],
    }
}

/// Critical commands that require an authenticated sender (the sender
/// classifier already gates these at the transport layer; this is the
/// detector-side restatement used for risk scoring).
fn is_critical(kind: CommandKind) -> bool {
    matches!(
        kind,
        CommandKind::ArmDisarm | CommandKind::ModeChange | CommandKind::ParameterChange | CommandKind::Emergency
    )
}

/// The same bounds table the anomaly check below uses, exposed so the
/// gateway can clamp a `Constrain`ed command's parameters to the same
/// limits instead of re-deriving them.
pub fn parameter_bounds(name: &str) -> Option<(f64, f64)> {
    match name {
        "altitude" | "alt" => Some((0.0, 150.0)),
        "velocity" => Some((0.0, 25.0)),
        "latitude" | "lat" => Some((-90.0, 90.0)),
        "longitude" | "lon" => Some((-180.0, 180.0)),
        "yaw" => Some((-180.0, 180.0)),
        "pitch" => Some((-90.0, 90.0)),
        "roll" => Some((-45.0, 45.0)),
        "throttle" => Some((0.0, 1.0)),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct InjectionMetrics {
    pub is_injection: bool,
    pub confidence: f64,
    pub detection_method: &'static str,
    pub explanation: String,
    pub unauthorized_command: bool,
    pub parameter_anomaly: bool,
    pub context_violation: bool,
    pub privilege_escalation: bool,
    pub semantic_anomaly: bool,
    pub risk_score: f64,
}

pub struct InjectionDetector {
    mission_active: AtomicBool,
    stats: Mutex<Stats>,
}

#[derive(Default)]
struct Stats {
    total_commands: u64,
    detected_injections: u64,
}

impl Default for InjectionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl InjectionDetector {
    pub fn new() -> Self {
        Self {
            mission_active: AtomicBool::new(false),
            stats: Mutex::new(Stats::default()),
        }
    }

    pub fn set_mission_active(&self, active: bool) {
        self.mission_active.store(active, Ordering::Relaxed);
    }

    pub fn check(
        &self,
        command: &ParsedCommand,
        snapshot: &VehicleSnapshot,
        source_authenticated: bool,
        ml_risk_score: f64,
    ) -> InjectionMetrics {
        self.stats.lock().unwrap().total_commands += 1;
        let state = derive_flight_state(snapshot);
        let kind = command.command_kind;

        let unauthorized =
            kind != CommandKind::Unknown && !authorized_kinds(state).contains(&kind);

        let mut violations = Vec::new();
        for (name, value) in &command.params {
            if let Some((lo, hi)) = parameter_bounds(name) {
                if let Some(v) = value.as_f64() {
                    if v < lo || v > hi {
                        violations.push(format!("{name}={v} out of bounds [{lo}, {hi}]"));
                    }
                }
            }
        }
        let param_anomaly = !violations.is_empty();

        let (context_violation, context_reason) = self.check_context(kind, command, state);
        let privilege_esc = is_critical(kind) && !source_authenticated;
        let semantic_anomaly = ml_risk_score > 0.7;

        self.aggregate(
            unauthorized,
            param_anomaly,
            context_violation,
            privilege_esc,
            semantic_anomaly,
            state,
            &violations,
            &context_reason,
            ml_risk_score,
        )
    }

    fn check_context(
        &self,
        kind: CommandKind,
        command: &ParsedCommand,
        state: FlightState,
    ) -> (bool, String) {
        if kind == CommandKind::ArmDisarm && state == FlightState::InFlight {
            let arm = command.param_f64("param1").unwrap_or(1.0);
            if arm == 0.0 {
                return (true, "attempting to disarm while in flight (crash risk)".into());
            }
        }
        if kind == CommandKind::ModeChange && state == FlightState::Landing {
            return (true, "mode change during landing (unsafe)".into());
        }
        if kind == CommandKind::TakeoffLand && state == FlightState::InFlight {
            if command.param_f64("command") == Some(crate::mavlink::mav_cmd_takeoff() as f64) {
                return (true, "takeoff command while already airborne".into());
            }
        }
        if kind == CommandKind::MissionUpdate && self.mission_active.load(Ordering::Relaxed) {
            return (true, "mission upload during active mission (risky)".into());
        }
        (false, "context valid".into())
    }

    #[allow(clippy::too_many_arguments)]
    fn aggregate(
        &self,
        unauthorized: bool,
        param_anomaly: bool,
        context_violation: bool,
        privilege_esc: bool,
        semantic_anomaly: bool,
        state: FlightState,
        violations: &[String],
        context_reason: &str,
        ml_risk: f64,
    ) -> InjectionMetrics {
        let mut risk_score: f64 = 0.0;
        if unauthorized {
            risk_score += 0.3;
        }
        if param_anomaly {
            risk_score += 0.2;
        }
        if context_violation {
            risk_score += 0.3;
        }
        if privilege_esc {
            risk_score += 0.4;
        }
        if semantic_anomaly {
            risk_score += ml_risk * 0.3;
        }
        risk_score = risk_score.min(1.0);

        let (is_injection, confidence, method, explanation) = if privilege_esc
            || (context_violation && unauthorized)
        {
            (true, 0.95, "privilege_context", "critical injection".to_string())
        } else if context_violation {
            (true, 0.85, "context", context_reason.to_string())
        } else if unauthorized && param_anomaly {
            (
                true,
                0.80,
                "unauthorized_params",
                format!("unauthorized command with bad params: {}", violations.join(", ")),
            )
        } else if param_anomaly && violations.len() >= 2 {
            (
                true,
                0.70,
                "parameters",
                format!("multiple parameter violations: {}", violations.join(", ")),
            )
        } else if unauthorized {
            (
                true,
                0.65,
                "unauthorized",
                format!("command not authorized in {state:?} state"),
            )
        } else if semantic_anomaly {
            (true, 0.60, "semantic", format!("ml-based anomaly detected (risk={ml_risk:.2})"))
        } else {
            (false, 0.0, "none", "no injection detected".to_string())
        };

        if is_injection {
            self.stats.lock().unwrap().detected_injections += 1;
        }

        InjectionMetrics {
            is_injection,
            confidence,
            detection_method: method,
            explanation,
            unauthorized_command: unauthorized,
            parameter_anomaly: param_anomaly,
            context_violation,
            privilege_escalation: privilege_esc,
            semantic_anomaly,
            risk_score,
        }
    }

    pub fn reset(&self) {
        self.mission_active.store(false, Ordering::Relaxed);
        *self.stats.lock().unwrap() = Stats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mavlink::ParamValue;
    use std::collections::HashMap;

    fn cmd(kind: CommandKind, params: &[(&str, f64)]) -> ParsedCommand {
        let mut map = HashMap::new();
        for (k, v) in params {
            map.insert((*k).to_string(), ParamValue::Number(*v));
        }
        ParsedCommand {
            message_type: crate::mavlink::MessageType::CommandLong,
            message_id: 76,
            source_system: 1,
            source_component: 1,
            command_kind: kind,
            params: map,
            ingress_timestamp_ns: 0,
        }
    }

    fn snap(armed: bool, phase: MissionPhase, alt: f64) -> VehicleSnapshot {
        VehicleSnapshot {
            mode: FlightMode::Guided,
            mission_phase: phase,
            armed,
            altitude_agl_m: alt,
            horizontal_vel_ms: 0.0,
            vertical_vel_ms: 0.0,
            battery: 1.0,
            lat: 0.0,
            lon: 0.0,
        }
    }

    #[test]
    fn arm_on_ground_is_clean() {
        let d = InjectionDetector::new();
        let m = d.check(
            &cmd(CommandKind::ArmDisarm, &[("param1", 1.0)]),
            &snap(false, MissionPhase::Idle, 0.0),
            true,
            0.0,
        );
        assert!(!m.is_injection);
    }

    #[test]
    fn disarm_in_flight_is_critical_injection() {
        let d = InjectionDetector::new();
        let m = d.check(
            &cmd(CommandKind::ArmDisarm, &[("param1", 0.0)]),
            &snap(true, MissionPhase::Cruise, 50.0),
            true,
            0.0,
        );
        assert!(m.is_injection);
        assert!(m.context_violation);
        assert_eq!(m.detection_method, "context");
    }

    #[test]
    fn single_extreme_parameter_is_anomalous_but_not_injection() {
        // One out-of-bounds parameter only sets `parameter_anomaly`; the
        // aggregation cascade requires >=2 violations (or another trigger)
        // before it calls the command an injection. A single extreme
        // altitude on its own is the shadow executor's geofence/altitude
        // check to catch, not this detector's.
        let d = InjectionDetector::new();
        let m = d.check(
            &cmd(CommandKind::Navigation, &[("altitude", 500.0), ("latitude", 47.0)]),
            &snap(true, MissionPhase::Cruise, 50.0),
            true,
            0.0,
        );
        assert!(m.parameter_anomaly);
        assert!(!m.is_injection);
    }

    #[test]
    fn two_extreme_parameters_are_flagged_as_injection() {
        let d = InjectionDetector::new();
        let m = d.check(
            &cmd(CommandKind::Navigation, &[("altitude", 500.0), ("velocity", 30.0)]),
            &snap(true, MissionPhase::Cruise, 50.0),
            true,
            0.0,
        );
        assert!(m.parameter_anomaly);
        assert!(m.is_injection);
        assert_eq!(m.detection_method, "parameters");
    }

    #[test]
    fn unauthenticated_critical_command_is_privilege_escalation() {
        let d = InjectionDetector::new();
        let m = d.check(
            &cmd(CommandKind::ModeChange, &[]),
            &snap(true, MissionPhase::Cruise, 50.0),
            false,
            0.0,
        );
        assert!(m.privilege_escalation);
        assert_eq!(m.confidence, 0.95);
    }

    #[test]
    fn mode_change_during_landing_is_flagged() {
        let d = InjectionDetector::new();
        let m = d.check(
            &cmd(CommandKind::ModeChange, &[]),
            &snap(true, MissionPhase::Landing, 5.0),
            true,
            0.0,
        );
        assert!(m.is_injection);
        assert!(m.context_violation);
    }
}
