//! End-to-end scenario tests that wire classifier + authz + detectors +
//! decision engine together, the way a single incoming frame actually flows
//! through the gateway. Unit tests colocated with each module cover that
//! module in isolation; these cover what only shows up once several of them
//! run back to back.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use aegis_gateway::authz::{self, GateVerdict};
use aegis_gateway::classifier::{self, PeerIdentity};
use aegis_gateway::crypto::keys::KeyManager;
use aegis_gateway::crypto::nonce::{ReplayVerdict, ReplayWindow};
use aegis_gateway::decision::{DecisionEngine, DecisionState, Severity};
use aegis_gateway::detectors::injection::InjectionMetrics;
use aegis_gateway::detectors::shadow::{Geofence, ShadowExecutor};
use aegis_gateway::detectors::{FloodDetector, InjectionDetector, IntentFirewall};
use aegis_gateway::mavlink::{self, CommandKind, FrameParser, MessageType, ParamValue, ParsedCommand};
use aegis_gateway::vehicle::{FlightMode, MissionPhase, VehicleSnapshot};

const TRUSTED_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
const UNTRUSTED_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9));

fn in_flight_snapshot() -> VehicleSnapshot {
    VehicleSnapshot {
        mode: FlightMode::Guided,
        mission_phase: MissionPhase::Cruise,
        armed: true,
        altitude_agl_m: 50.0,
        horizontal_vel_ms: 5.0,
        vertical_vel_ms: 0.0,
        battery: 0.8,
        lat: 47.0,
        lon: -122.0,
    }
}

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

fn is_failsafe(command: &ParsedCommand) -> bool {
    match command.command_kind {
        CommandKind::Emergency => true,
        CommandKind::TakeoffLand => command.param_f64("command") != Some(mavlink::mav_cmd_takeoff() as f64),
        CommandKind::ArmDisarm => command.param_f64("param1") == Some(0.0),
        _ => false,
    }
}

/// Scenario 2: an untrusted sender's COMMAND_LONG (ARM) never reaches the FC
/// and is logged as a security event rather than silently dropped.
#[test]
fn untrusted_command_long_is_blocked_as_security_event() {
    let identity = classifier::classify(UNTRUSTED_IP, Some(TRUSTED_IP));
    assert_eq!(identity, PeerIdentity::Untrusted);

    let frame = mavlink::encode_command_long(1, 1, 1, 400, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    let parser = FrameParser::new();
    let peer = SocketAddr::new(UNTRUSTED_IP, 14550);
    let command = parser.feed(peer, &frame, 0)[0].clone().unwrap();
    assert_eq!(command.command_kind, CommandKind::ArmDisarm);

    assert_eq!(authz::check(identity, command.command_kind), GateVerdict::BlockSecurityEvent);
}

/// Scenario 3: the same nonce seen twice a second apart is accepted once and
/// rejected the second time with full replay confidence.
#[test]
fn repeated_nonce_one_second_apart_is_flagged_as_replay() {
    let window = ReplayWindow::new(64, 5.0);
    let nonce = [1u8; 12];

    let first = window.check(nonce, 1_000_000_000, 42, 1_000_000_000);
    assert_eq!(first.verdict, ReplayVerdict::Clean);

    let second = window.check(nonce, 2_000_000_000, 42, 2_000_000_000);
    assert_eq!(second.verdict, ReplayVerdict::Replay);
    assert_eq!(second.confidence, 1.0);
}

/// Scenario 5: disarming while airborne is a context violation the
/// injection detector must flag at high confidence, and that alone must push
/// the decision to hold or rtl regardless of how clean every other layer
/// looks.
#[test]
fn disarm_in_flight_forces_hold_or_rtl() {
    let snapshot = in_flight_snapshot();
    let mut params = HashMap::new();
    params.insert("param1".to_string(), ParamValue::Number(0.0));
    params.insert("command".to_string(), ParamValue::Number(400.0));
    let command = ParsedCommand {
        message_type: MessageType::CommandLong,
        message_id: 76,
        source_system: 1,
        source_component: 1,
        command_kind: CommandKind::ArmDisarm,
        params,
        ingress_timestamp_ns: 0,
    };

    let injection = InjectionDetector::new();
    let metrics = injection.check(&command, &snapshot, true, 0.0);
    assert!(metrics.is_injection);
    assert!(metrics.confidence >= 0.85);

    let intent_rule = IntentFirewall::new();
    let intent_result = intent_rule.analyze(&command, &snapshot);

    let flood = FloodDetector::new(5.0, 20.0, 50.0);
    let behavior = flood.record(0.0).into();

    let shadow = ShadowExecutor::new(Geofence {
        center_lat: 47.0,
        center_lon: -122.0,
        radius_m: 1000.0,
        min_alt_m: 0.0,
        max_alt_m: 150.0,
    });
    let shadow_result = shadow.predict(&command, &snapshot);

    let decision = DecisionEngine::new().decide(true, &intent_result, &behavior, &shadow_result, None, &metrics);
    assert!(decision.severity >= Severity::High);
    assert_ne!(decision.decision, DecisionState::Accept);
    assert_ne!(decision.decision, DecisionState::Constrain);
}

/// Scenario 6: a single extreme altitude parameter isn't enough on its own
/// for the injection detector's aggregation cascade to call it an injection
/// (that needs two or more bad parameters), but the shadow executor's
/// geofence/altitude projection catches it and the decision engine floors
/// risk into hold.
#[test]
fn extreme_altitude_navigation_is_held() {
    let snapshot = in_flight_snapshot();
    let mut params = HashMap::new();
    params.insert("lat".to_string(), ParamValue::Number(47.0));
    params.insert("lon".to_string(), ParamValue::Number(-122.0));
    params.insert("alt".to_string(), ParamValue::Number(500.0));
    let command = ParsedCommand {
        message_type: MessageType::CommandInt,
        message_id: 75,
        source_system: 1,
        source_component: 1,
        command_kind: CommandKind::Navigation,
        params,
        ingress_timestamp_ns: 0,
    };

    let shadow = ShadowExecutor::new(Geofence {
        center_lat: 47.0,
        center_lon: -122.0,
        radius_m: 1000.0,
        min_alt_m: 0.0,
        max_alt_m: 120.0,
    });
    let shadow_result = shadow.predict(&command, &snapshot);
    assert!(shadow_result.outcome.altitude_risk);
    assert!(shadow_result.outcome.geofence_violation);

    let intent_rule = IntentFirewall::new();
    let intent_result = intent_rule.analyze(&command, &snapshot);

    let flood = FloodDetector::new(5.0, 20.0, 50.0);
    let behavior = flood.record(0.0).into();

    let decision = DecisionEngine::new().decide(true, &intent_result, &behavior, &shadow_result, None, &clean_injection());
    assert!(decision.factors.risk_score >= 0.7);
    assert_eq!(decision.decision, DecisionState::Hold);
}

/// Scenario 7: once a session key is revoked, the key material is destroyed
/// immediately, so only the failsafe command kinds (rtl/land/disarm) are
/// still meaningfully admitted — ordinary navigation traffic has no way
/// through until a fresh session is issued.
#[test]
fn key_revocation_admits_only_failsafe_kinds() {
    let dir = std::env::temp_dir().join(format!(
        "aegis-gateway-revoke-test-{:?}",
        std::thread::current().id()
    ));
    let mut manager = KeyManager::load_or_provision(&dir, 1800, 1000, 300).unwrap();
    manager.revoke("scenario-7");
    assert!(manager.active_session_key().is_err());

    let parser = FrameParser::new();
    let peer = SocketAddr::new(TRUSTED_IP, 14550);

    let nav = mavlink::encode_command_long(1, 1, 1, 16, [0.0; 7]);
    let nav_cmd = parser.feed(peer, &nav, 0)[0].clone().unwrap();
    assert!(!is_failsafe(&nav_cmd));

    let rtl = mavlink::encode_command_long(3, 1, 1, mavlink::mav_cmd_rtl(), [0.0; 7]);
    let rtl_cmd = parser.feed(peer, &rtl, 0)[0].clone().unwrap();
    assert!(is_failsafe(&rtl_cmd));

    std::fs::remove_dir_all(&dir).ok();
}
