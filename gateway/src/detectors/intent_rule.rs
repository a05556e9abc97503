//! Rule-based intent firewall: infers what a command is trying to
//! achieve and checks it against what the current mission phase expects.
//!
//! Grounded on `src/ai_layer/intent_firewall.py`'s `IntentFirewall`: same
//! intent taxonomy, same phase-keyed expectation table, same confidence
//! table and match rule. Mission-phase inference itself lives on
//! `vehicle::VehicleState`/the gateway's telemetry handling rather than
//! here, since phase is a vehicle-wide concept several detectors read.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::mavlink::{CommandKind, ParsedCommand};
use crate::vehicle::{MissionPhase, VehicleSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Navigation,
    Return,
    Survey,
    Override,
    Emergency,
    ManualControl,
    Config,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct IntentResult {
    pub intent: Intent,
    pub confidence: f64,
    pub intent_match: bool,
    pub reason: String,
    pub mission_phase: MissionPhase,
    pub expected_intents: Vec<Intent>,
}

fn expected_intents(phase: MissionPhase) -> Vec<Intent> {
    use Intent::*;
    match phase {
        MissionPhase::Idle | MissionPhase::PreFlight => vec![Config, Emergency],
        MissionPhase::Takeoff => vec![Navigation, Emergency, Return],
        MissionPhase::Cruise => vec![Navigation, ManualControl, Return],
        MissionPhase::Mission => vec![Navigation, Survey, Return],
        MissionPhase::Return => vec![Return, Emergency],
        MissionPhase::Landing => vec![Emergency, Return],
    }
}

fn base_confidence(intent: Intent) -> f64 {
    match intent {
        Intent::Return => 0.95,
        Intent::Emergency => 0.95,
        Intent::ManualControl => 0.90,
        Intent::Config => 0.85,
        Intent::Navigation => 0.75,
        Intent::Survey => 0.70,
        Intent::Override => 0.65,
        Intent::Unknown => 0.30,
    }
}

pub struct IntentFirewall {
    history: Mutex<VecDeque<Intent>>,
}

impl Default for IntentFirewall {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentFirewall {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn analyze(&self, command: &ParsedCommand, snapshot: &VehicleSnapshot) -> IntentResult {
        let intent = self.infer_intent(command, snapshot);
        let mut confidence = base_confidence(intent);
        if snapshot.mode != crate::vehicle::FlightMode::Unknown {
            confidence = (confidence + 0.05).min(1.0);
        }
        if command.command_kind == CommandKind::Unknown {
            confidence *= 0.7;
        }
        let confidence = (confidence * 100.0).round() / 100.0;

        let result = self.validate(intent, confidence, snapshot.mission_phase);

        let mut hist = self.history.lock().unwrap();
        hist.push_back(intent);
        if hist.len() > 10 {
            hist.pop_front();
        }

        result
    }

    fn infer_intent(&self, command: &ParsedCommand, snapshot: &VehicleSnapshot) -> Intent {
        match command.command_kind {
            CommandKind::Emergency => Intent::Return,
            CommandKind::Manual => Intent::ManualControl,
            CommandKind::ParameterChange => Intent::Config,
            CommandKind::Navigation => {
                if self.is_abort_pattern() {
                    Intent::Override
                } else if self.is_survey_pattern(snapshot) {
                    Intent::Survey
                } else {
                    Intent::Navigation
                }
            }
            CommandKind::MissionUpdate | CommandKind::TakeoffLand => Intent::Navigation,
            CommandKind::ModeChange => match command.param_f64("custom_mode").map(|m| m as i64) {
                Some(6) => Intent::Return,
                Some(9) => Intent::Emergency,
                _ => Intent::Override,
            },
            CommandKind::ArmDisarm => {
                if !snapshot.armed {
                    Intent::Emergency
                } else {
                    Intent::Config
                }
            }
            CommandKind::TelemetryRequest | CommandKind::Unknown => Intent::Unknown,
        }
    }

    fn is_abort_pattern(&self) -> bool {
        self.history.lock().unwrap().back() == Some(&Intent::Return)
    }

    fn is_survey_pattern(&self, snapshot: &VehicleSnapshot) -> bool {
        let enough_history = self.history.lock().unwrap().len() >= 3;
        enough_history
            && snapshot.mission_phase == MissionPhase::Mission
            && snapshot.mode == crate::vehicle::FlightMode::Auto
    }

    fn validate(&self, intent: Intent, confidence: f64, phase: MissionPhase) -> IntentResult {
        let expected = expected_intents(phase);
        let mut intent_match = expected.contains(&intent) || intent == Intent::Emergency;

        let mut reason = if intent_match {
            format!("intent {intent:?} expected in {phase:?}")
        } else {
            format!("mismatch: intent {intent:?} unexpected in {phase:?}, expected {expected:?}")
        };

        if confidence < 0.6 {
            intent_match = false;
            reason.push_str(&format!(" | low confidence ({confidence})"));
        }

        IntentResult {
            intent,
            confidence,
            intent_match,
            reason,
            mission_phase: phase,
            expected_intents: expected,
        }
    }

    pub fn reset(&self) {
        self.history.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mavlink::{MessageType, ParamValue};
    use crate::vehicle::FlightMode;
    use std::collections::HashMap;

    fn cmd(kind: CommandKind, params: &[(&str, f64)]) -> ParsedCommand {
        let mut map = HashMap::new();
        for (k, v) in params {
            map.insert((*k).to_string(), ParamValue::Number(*v));
        }
        ParsedCommand {
            message_type: MessageType::CommandLong,
            message_id: 76,
            source_system: 1,
            source_component: 1,
            command_kind: kind,
            params: map,
            ingress_timestamp_ns: 0,
        }
    }

    fn snap(mode: FlightMode, phase: MissionPhase, armed: bool) -> VehicleSnapshot {
        VehicleSnapshot {
            mode,
            mission_phase: phase,
            armed,
            altitude_agl_m: 50.0,
            horizontal_vel_ms: 0.0,
            vertical_vel_ms: 0.0,
            battery: 1.0,
            lat: 0.0,
            lon: 0.0,
        }
    }

    #[test]
    fn navigation_during_mission_matches() {
        let fw = IntentFirewall::new();
        let result = fw.analyze(
            &cmd(CommandKind::Navigation, &[]),
            &snap(FlightMode::Auto, MissionPhase::Mission, true),
        );
        assert_eq!(result.intent, Intent::Navigation);
        assert!(result.intent_match);
    }

    #[test]
    fn rtl_during_mission_is_expected_return() {
        let fw = IntentFirewall::new();
        let result = fw.analyze(
            &cmd(CommandKind::Emergency, &[]),
            &snap(FlightMode::Auto, MissionPhase::Mission, true),
        );
        assert_eq!(result.intent, Intent::Return);
        assert!(result.intent_match);
    }

    #[test]
    fn config_during_mission_is_mismatch() {
        let fw = IntentFirewall::new();
        let result = fw.analyze(
            &cmd(CommandKind::ParameterChange, &[]),
            &snap(FlightMode::Auto, MissionPhase::Mission, true),
        );
        assert_eq!(result.intent, Intent::Config);
        assert!(!result.intent_match);
    }

    #[test]
    fn navigation_right_after_return_is_override() {
        let fw = IntentFirewall::new();
        let _ = fw.analyze(
            &cmd(CommandKind::Emergency, &[]),
            &snap(FlightMode::Auto, MissionPhase::Return, true),
        );
        let result = fw.analyze(
            &cmd(CommandKind::Navigation, &[]),
            &snap(FlightMode::Auto, MissionPhase::Return, true),
        );
        assert_eq!(result.intent, Intent::Override);
    }
}
