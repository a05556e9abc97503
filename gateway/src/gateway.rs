//! Ingress/egress socket loop: wires every component in
//! `lib.rs`'s module list into the single synchronous per-datagram pipeline
//! together, and owns the two UDP sockets (GCS-facing ingress,
//! FC-facing egress) plus graceful shutdown.
//!
//! Grounded on the teacher's `main()` background-task/shutdown structure
//! and `ingest()`'s layered defensive cascade (size/decode/field/signature/
//! timestamp/dedup/rate-limit/consensus/priority/persist, each an early-out
//! before the next check runs). Here the cascade is classifier -> frame
//! parser -> authorization gate -> replay window -> detectors -> decision
//! engine -> audit -> egress.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::net::UdpSocket;
use tracing::{info, warn};

use crate::admin::Metrics;
use crate::audit::{AuditLogger, CommandSummary};
use crate::authz::{self, GateVerdict};
use crate::classifier::{self, PeerIdentity};
use crate::config::Config;
use crate::crypto::keys::RiskLevel;
use crate::crypto::{self, KeyManager};
use crate::decision::{BehaviorResult, DecisionEngine, DecisionState};
use crate::detectors::features::{CommandContext, FlightModeCode, MissionPhaseCode};
use crate::detectors::shadow::{Geofence, PredictedOutcome, ShadowResult};
use crate::detectors::{FeatureExtractor, FloodDetector, InjectionDetector, IntentFirewall, IntentMlEngine, ShadowExecutor};
use crate::error::AegisError;
use crate::mavlink::{self, CommandKind, FrameParser, MessageType, ParsedCommand};
use crate::vehicle::{FlightMode, MissionPhase, VehicleSnapshot, VehicleState};

const RECV_BUF_SIZE: usize = 2048;

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

fn flight_mode_code(mode: FlightMode) -> FlightModeCode {
    match mode {
        FlightMode::Manual => FlightModeCode::Manual,
        FlightMode::Stabilize => FlightModeCode::Stabilize,
        FlightMode::Guided => FlightModeCode::Guided,
        FlightMode::Auto => FlightModeCode::Auto,
        FlightMode::Rtl => FlightModeCode::Rtl,
        FlightMode::Land => FlightModeCode::Land,
        FlightMode::Unknown => FlightModeCode::Stabilize,
    }
}

fn mission_phase_code(phase: MissionPhase) -> MissionPhaseCode {
    match phase {
        MissionPhase::Idle | MissionPhase::PreFlight => MissionPhaseCode::None,
        MissionPhase::Takeoff => MissionPhaseCode::Takeoff,
        MissionPhase::Cruise => MissionPhaseCode::Cruise,
        MissionPhase::Mission => MissionPhaseCode::Waypoint,
        MissionPhase::Return => MissionPhaseCode::Cruise,
        MissionPhase::Landing => MissionPhaseCode::Landing,
    }
}

/// Command kinds still admitted once a session key has been revoked: RTL,
/// landing, and disarm. Everything else is dropped until the key manager is
/// given a fresh session (manual reset).
fn is_failsafe_command(command: &ParsedCommand) -> bool {
    match command.command_kind {
        CommandKind::Emergency => true,
        CommandKind::TakeoffLand => command.param_f64("command") != Some(mavlink::mav_cmd_takeoff() as f64),
        CommandKind::ArmDisarm => command.param_f64("param1") == Some(0.0),
        _ => false,
    }
}

/// A 12-byte stand-in for a cryptographic nonce, derived from the command's
/// own content when the crypto envelope is disabled. Identical commands
/// hash identically, so the replay window's nonce-reuse rule still catches
/// verbatim resends; when the envelope is enabled the real envelope nonce
/// is used instead (see `Gateway::handle_datagram`).
fn content_derived_nonce(command: &ParsedCommand) -> [u8; crypto::nonce::NONCE_SIZE] {
    let hash = command.content_hash();
    let mut nonce = [0u8; crypto::nonce::NONCE_SIZE];
    nonce[4..].copy_from_slice(&hash.to_be_bytes());
    nonce
}

fn build_command_context(command: &ParsedCommand, snapshot: &VehicleSnapshot, now_ns: u64) -> CommandContext {
    CommandContext {
        msg_id: command.message_id,
        command_type_hash: command.content_hash(),
        is_position_command: matches!(
            command.message_type,
            MessageType::SetPositionTargetLocalNed | MessageType::SetPositionTargetGlobalInt | MessageType::CommandInt
        ),
        is_manual_control_command: command.message_type == MessageType::ManualControl,
        is_takeoff_command: command.command_kind == CommandKind::TakeoffLand
            && command.param_f64("command") == Some(mavlink::mav_cmd_takeoff() as f64),
        target_system: command.source_system,
        target_component: command.source_component,
        param1: command.param_f64("param1").unwrap_or(0.0),
        param2: command.param_f64("param2").unwrap_or(0.0),
        param3: command.param_f64("param3").unwrap_or(0.0),
        param4: command.param_f64("param4").unwrap_or(0.0),
        flight_mode: flight_mode_code(snapshot.mode),
        mission_phase: mission_phase_code(snapshot.mission_phase),
        armed: snapshot.armed,
        battery_level: snapshot.battery,
        altitude: snapshot.altitude_agl_m,
        velocity: snapshot.horizontal_vel_ms,
        timestamp_sec: now_ns as f64 / 1e9,
    }
}

fn neutral_shadow_result() -> ShadowResult {
    ShadowResult {
        outcome: PredictedOutcome {
            geofence_violation: false,
            time_to_violation_sec: None,
            altitude_risk: false,
            velocity_risk: false,
            energy_margin: crate::detectors::shadow::EnergyMargin::High,
            loss_of_control_risk: false,
            collision_risk: false,
        },
        trajectory_risk: 0.0,
    }
}

/// Clamps the one named parameter a `constrain` decision targets (altitude,
/// or throttle) to its configured bound and re-encodes the frame in place.
/// Message types the codec has no offset table for (the parameter-bounds
/// table only covers a handful of named fields) are forwarded unmodified -
/// a scope reduction recorded in DESIGN.md.
fn constrain_frame(frame_bytes: &[u8], command: &ParsedCommand) -> Vec<u8> {
    let candidates: &[&str] = match command.message_type {
        MessageType::CommandInt => &["alt", "lat", "lon"],
        MessageType::SetAttitudeTarget => &["throttle"],
        _ => &[],
    };

    let mut payload = match frame_bytes.get(mavlink::HEADER_LEN..frame_bytes.len().saturating_sub(2)) {
        Some(p) => p.to_vec(),
        None => return frame_bytes.to_vec(),
    };
    let mut changed = false;

    for &name in candidates {
        let (Some(value), Some((lo, hi)), Some(offset)) = (
            command.param_f64(name),
            crate::detectors::injection::parameter_bounds(name),
            mavlink::payload_field_offset(command.message_type, name),
        ) else {
            continue;
        };
        let clamped = value.clamp(lo, hi);
        if (clamped - value).abs() < f64::EPSILON {
            continue;
        }
        let Some(slot) = payload.get_mut(offset..offset + 4) else {
            continue;
        };
        if name == "lat" || name == "lon" {
            slot.copy_from_slice(&((clamped * 1e7) as i32).to_le_bytes());
        } else {
            slot.copy_from_slice(&(clamped as f32).to_le_bytes());
        }
        changed = true;
    }

    if !changed {
        return frame_bytes.to_vec();
    }
    mavlink::reencode_with_payload(frame_bytes, &payload).unwrap_or_else(|| frame_bytes.to_vec())
}

/// Reads the named telemetry-style fields this codec's simplified heartbeat
/// carries and folds them into `vehicle`. Anything the payload doesn't
/// carry is left as-is; this is deliberately lossy (only what's present
/// updates state).
fn apply_telemetry(vehicle: &VehicleState, command: &ParsedCommand) {
    if let Some(armed) = command.param_f64("armed") {
        vehicle.set_armed(armed != 0.0);
    }
    if let Some(alt) = command.param_f64("altitude").or_else(|| command.param_f64("alt")) {
        vehicle.set_altitude_agl_m(alt);
    }
    if let Some(battery) = command.param_f64("battery") {
        vehicle.set_battery(battery);
    }
    let (lat, lon) = (command.param_f64("lat"), command.param_f64("lon"));
    if let (Some(lat), Some(lon)) = (lat, lon) {
        vehicle.set_position(lat, lon);
    }
    let (vh, vz) = (command.param_f64("vh"), command.param_f64("vz"));
    if let (Some(vh), Some(vz)) = (vh, vz) {
        vehicle.set_velocity_ms(vh, vz);
    }
    if let Some(phase) = command.param_f64("mission_phase") {
        let phase = match phase as u32 {
            1 => MissionPhase::PreFlight,
            2 => MissionPhase::Takeoff,
            3 => MissionPhase::Cruise,
            4 => MissionPhase::Mission,
            5 => MissionPhase::Return,
            6 => MissionPhase::Landing,
            _ => MissionPhase::Idle,
        };
        vehicle.set_mission_phase(phase);
    }
    if let Some(mode) = command.param_f64("custom_mode") {
        let mode = match mode as u32 {
            0 => FlightMode::Manual,
            1 => FlightMode::Stabilize,
            2 => FlightMode::Auto,
            3 => FlightMode::Guided,
            4 => FlightMode::Rtl,
            5 => FlightMode::Land,
            _ => FlightMode::Unknown,
        };
        vehicle.set_mode(mode);
    }
}

/// Every long-lived collaborator the pipeline needs, owned by the single
/// task that runs `run()`. No cross-detector locks are ever held at once;
/// each detector guards only its own small window.
pub struct Gateway {
    config: Config,
    frame_parser: FrameParser,
    vehicle: VehicleState,
    key_manager: Option<KeyManager>,
    replay_window: crypto::nonce::ReplayWindow,
    flood: FloodDetector,
    injection: InjectionDetector,
    intent_rule: IntentFirewall,
    features: FeatureExtractor,
    intent_ml: IntentMlEngine,
    shadow: Option<ShadowExecutor>,
    decision_engine: DecisionEngine,
    audit: Arc<AuditLogger>,
    metrics: Arc<Metrics>,
    egress_seq: AtomicU8,
    /// Set once a peer's session key is revoked; cleared the moment a frame
    /// decrypts successfully again (e.g. after a manual key reset). While
    /// set, only failsafe command kinds reach the pipeline.
    emergency_mode: bool,
}

impl Gateway {
    pub fn new(config: Config, audit: Arc<AuditLogger>, metrics: Arc<Metrics>) -> Result<Self, AegisError> {
        let key_manager = if config.enable_crypto {
            Some(KeyManager::load_or_provision(
                config.log_dir.join("crypto"),
                config.crypto_session_lifetime_sec,
                config.crypto_max_commands_per_session,
                config.crypto_grace_period_sec,
            )?)
        } else {
            None
        };

        let shadow = if config.enable_shadow {
            Some(ShadowExecutor::new(Geofence {
                center_lat: config.shadow_geofence_center_lat.unwrap_or(0.0),
                center_lon: config.shadow_geofence_center_lon.unwrap_or(0.0),
                radius_m: config.shadow_geofence_radius_m.unwrap_or(0.0),
                min_alt_m: config.shadow_min_alt_m.unwrap_or(0.0),
                max_alt_m: config.shadow_max_alt_m.unwrap_or(0.0),
            }))
        } else {
            None
        };

        Ok(Self {
            replay_window: crypto::nonce::ReplayWindow::new(config.replay_nonce_window, config.replay_timestamp_tolerance_sec),
            flood: FloodDetector::new(config.flood_normal_threshold, config.flood_attack_threshold, config.flood_burst_threshold),
            injection: InjectionDetector::new(),
            intent_rule: IntentFirewall::new(),
            features: FeatureExtractor::new(),
            intent_ml: IntentMlEngine::new(),
            decision_engine: DecisionEngine::new(),
            vehicle: VehicleState::default(),
            key_manager,
            shadow,
            config,
            frame_parser: FrameParser::new(),
            audit,
            metrics,
            egress_seq: AtomicU8::new(0),
            emergency_mode: false,
        })
    }

    /// Binds both sockets and runs until a ctrl-c signal arrives, then
    /// drains, flushes the audit trail, and writes the session summary.
    pub async fn run(mut self) -> Result<(), AegisError> {
        let ingress_addr = SocketAddr::new(self.config.listen_host, self.config.listen_port);
        let ingress = UdpSocket::bind(ingress_addr).await.map_err(|e| AegisError::Bind {
            addr: ingress_addr.to_string(),
            source: e,
        })?;
        info!(addr = %ingress_addr, "ingress bound");

        let egress = UdpSocket::bind(SocketAddr::new(IpAddr::from([0, 0, 0, 0]), 0))
            .await
            .map_err(|e| AegisError::Bind {
                addr: "0.0.0.0:0".to_string(),
                source: e,
            })?;
        info!(fc = %SocketAddr::new(self.config.fc_ip, self.config.fc_port), "egress ready");

        let mut ingress_buf = vec![0u8; RECV_BUF_SIZE];
        let mut egress_buf = vec![0u8; RECV_BUF_SIZE];

        loop {
            tokio::select! {
                biased;

                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received, draining");
                    break;
                }

                recv = ingress.recv_from(&mut ingress_buf) => {
                    let (n, peer) = match recv {
                        Ok(v) => v,
                        Err(e) => { warn!(%e, "ingress recv failed"); continue; }
                    };
                    self.handle_datagram(&egress, peer, ingress_buf[..n].to_vec()).await;
                }

                recv = egress.recv_from(&mut egress_buf) => {
                    let (n, peer) = match recv {
                        Ok(v) => v,
                        Err(e) => { warn!(%e, "egress recv failed"); continue; }
                    };
                    self.handle_telemetry(peer, &egress_buf[..n]);
                }
            }
        }

        self.metrics.shutting_down.store(true, Ordering::Relaxed);
        match self.audit.write_session_summary() {
            Ok(path) => info!(path = %path.display(), "session summary written"),
            Err(e) => warn!(%e, "failed to write session summary"),
        }
        // `self.key_manager` (and its `ZeroizeOnDrop` session/root keys) is
        // dropped here, zeroizing key material as part of the same return.
        Ok(())
    }

    fn handle_telemetry(&self, _peer: SocketAddr, bytes: &[u8]) {
        let now = now_ns();
        for parsed in self.frame_parser.feed(SocketAddr::new(self.config.fc_ip, self.config.fc_port), bytes, now) {
            if let Ok(command) = parsed {
                apply_telemetry(&self.vehicle, &command);
            }
        }
    }

    async fn handle_datagram(&mut self, egress: &UdpSocket, peer: SocketAddr, bytes: Vec<u8>) {
        self.metrics.ingested.fetch_add(1, Ordering::Relaxed);
        let now = now_ns();

        let (plaintext, crypto_valid, envelope_nonce) = if self.config.enable_crypto {
            match self.open_envelope(&bytes, &peer) {
                Ok((pt, nonce)) => {
                    self.emergency_mode = false;
                    (pt, true, Some(nonce))
                }
                Err(kind) => {
                    self.metrics.crypto_failures.fetch_add(1, Ordering::Relaxed);
                    let _ = self.audit.log_parse_error(&peer.to_string(), &format!("crypto: {kind}"));
                    if kind == "key-revoked" {
                        if !self.emergency_mode {
                            self.emergency_mode = true;
                            warn!(%peer, "session key revoked, entering emergency mode: only rtl/land/disarm admitted");
                        }
                        // The session key is destroyed on revocation, so this
                        // and every later datagram on it can never decrypt.
                        // Treat the raw bytes as an unencrypted failsafe frame
                        // instead of dropping outright; dispatch_command still
                        // restricts admission to failsafe kinds.
                        (bytes, false, None)
                    } else {
                        return;
                    }
                }
            }
        } else {
            (bytes, true, None)
        };

        let frames = self.frame_parser.feed_framed(peer, &plaintext, now);
        for (frame_bytes, parsed) in frames {
            let command = match parsed {
                Ok(c) => c,
                Err(e) => {
                    self.metrics.parse_errors.fetch_add(1, Ordering::Relaxed);
                    let _ = self.audit.log_parse_error(&peer.to_string(), &e.to_string());
                    continue;
                }
            };
            self.dispatch_command(egress, peer, frame_bytes, command, crypto_valid, envelope_nonce, now)
                .await;
        }
    }

    /// Expects `nonce || ciphertext` as the datagram layout. AAD is the
    /// peer's address, binding the envelope to the socket it arrived on.
    fn open_envelope(&self, bytes: &[u8], peer: &SocketAddr) -> Result<(Vec<u8>, [u8; crypto::nonce::NONCE_SIZE]), &'static str> {
        let Some(manager) = self.key_manager.as_ref() else {
            return Err("crypto-disabled");
        };
        if bytes.len() < crypto::nonce::NONCE_SIZE {
            return Err("tag-mismatch");
        }
        let mut nonce = [0u8; crypto::nonce::NONCE_SIZE];
        nonce.copy_from_slice(&bytes[..crypto::nonce::NONCE_SIZE]);
        let ciphertext = &bytes[crypto::nonce::NONCE_SIZE..];
        let aad = peer.ip().to_string();
        match crypto::open_with_rotation(manager, nonce, aad.as_bytes(), ciphertext) {
            Ok(plain) => Ok((plain, nonce)),
            Err(AegisError::Crypto { kind }) => Err(match kind {
                crate::error::CryptoErrorKind::KeyRevoked => "key-revoked",
                crate::error::CryptoErrorKind::KeyExpired => "key-expired",
                _ => "tag-mismatch",
            }),
            Err(_) => Err("tag-mismatch"),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_command(
        &mut self,
        egress: &UdpSocket,
        peer: SocketAddr,
        frame_bytes: Vec<u8>,
        command: ParsedCommand,
        crypto_valid: bool,
        envelope_nonce: Option<[u8; crypto::nonce::NONCE_SIZE]>,
        now: u64,
    ) {
        let identity = classifier::classify(peer.ip(), self.config.trusted_gcs_ip);
        let source_label = match identity {
            PeerIdentity::TrustedGcs => "trusted-gcs",
            PeerIdentity::Untrusted => "untrusted",
        };
        let summary = CommandSummary::from_command(&command, source_label);

        if self.emergency_mode && !is_failsafe_command(&command) {
            self.metrics.security_events.fetch_add(1, Ordering::Relaxed);
            let _ = self
                .audit
                .log_security_event(&summary, "emergency mode active: only rtl/land/disarm admitted");
            return;
        }

        match authz::check(identity, command.command_kind) {
            GateVerdict::DropSilent => return,
            GateVerdict::BlockSecurityEvent => {
                self.metrics.security_events.fetch_add(1, Ordering::Relaxed);
                let _ = self.audit.log_security_event(&summary, "untrusted sender attempted a command-class message");
                return;
            }
            GateVerdict::Admit => {}
        }

        let nonce = envelope_nonce.unwrap_or_else(|| content_derived_nonce(&command));
        let replay = self
            .replay_window
            .check(nonce, command.ingress_timestamp_ns, command.content_hash(), now);
        if replay.verdict == crypto::nonce::ReplayVerdict::Replay {
            self.metrics.replay_events.fetch_add(1, Ordering::Relaxed);
            let _ = self.audit.log_replay_event(&summary, reason_str(replay.reason), replay.confidence);
            return;
        }

        let snapshot = self.vehicle.snapshot();
        let source_authenticated = identity == PeerIdentity::TrustedGcs && crypto_valid;

        let flood_metrics = self.flood.record(now as f64 / 1e9);
        let behavior_result: BehaviorResult = flood_metrics.into();

        let ml_result = if self.config.enable_ml {
            let ctx = build_command_context(&command, &snapshot, now);
            let features = self.features.extract(ctx);
            Some(self.intent_ml.infer(
                features,
                command.command_kind,
                flight_mode_code(snapshot.mode),
                mission_phase_code(snapshot.mission_phase),
                snapshot.battery,
                snapshot.altitude_agl_m,
                snapshot.horizontal_vel_ms,
                snapshot.armed,
            ))
        } else {
            None
        };
        let ml_risk = ml_result.as_ref().map(|r| r.intent_risk).unwrap_or(0.0);

        let injection_metrics = self.injection.check(&command, &snapshot, source_authenticated, ml_risk);
        let intent_result = self.intent_rule.analyze(&command, &snapshot);
        let shadow_result = match &self.shadow {
            Some(shadow) => shadow.predict(&command, &snapshot),
            None => neutral_shadow_result(),
        };

        let decision = self.decision_engine.decide(
            crypto_valid,
            &intent_result,
            &behavior_result,
            &shadow_result,
            ml_result.as_ref(),
            &injection_metrics,
        );

        if injection_metrics.is_injection {
            warn!(
                method = injection_metrics.detection_method,
                confidence = injection_metrics.confidence,
                "injection signal contributed to this decision"
            );
        }

        let _ = self.audit.log_decision(
            &summary,
            &decision,
            &intent_result,
            behavior_result.behavior_score,
            behavior_result.anomaly_level,
            &behavior_result.explanation,
            &shadow_result,
            crypto_valid,
        );

        let fc_addr = SocketAddr::new(self.config.fc_ip, self.config.fc_port);
        match decision.decision {
            DecisionState::Accept => {
                self.metrics.accepted.fetch_add(1, Ordering::Relaxed);
                self.forward(egress, fc_addr, &frame_bytes).await;
            }
            DecisionState::Constrain => {
                self.metrics.constrained.fetch_add(1, Ordering::Relaxed);
                let sanitized = constrain_frame(&frame_bytes, &command);
                self.forward(egress, fc_addr, &sanitized).await;
            }
            DecisionState::Hold => {
                self.metrics.held.fetch_add(1, Ordering::Relaxed);
                info!(reason = %decision.explanation, "command held for operator review, not forwarded");
            }
            DecisionState::Rtl => {
                self.metrics.rtl_triggered.fetch_add(1, Ordering::Relaxed);
                let seq = self.egress_seq.fetch_add(1, Ordering::Relaxed);
                let rtl = mavlink::encode_command_long(
                    seq,
                    command.source_system,
                    command.source_component,
                    mavlink::mav_cmd_rtl(),
                    [0.0; 7],
                );
                self.forward(egress, fc_addr, &rtl).await;
            }
        }

        if let Some(manager) = self.key_manager.as_mut() {
            manager.increment_command_counter();
            if !crypto_valid || decision.severity >= crate::decision::Severity::High {
                manager.update_risk_level(RiskLevel::High);
            }
            if let Some(reason) = manager.maybe_rotate() {
                self.metrics.key_rotations.fetch_add(1, Ordering::Relaxed);
                info!(reason, "session key rotated");
            }
        }
    }

    async fn forward(&self, egress: &UdpSocket, fc_addr: SocketAddr, bytes: &[u8]) {
        if egress.send_to(bytes, fc_addr).await.is_ok() {
            return;
        }
        if let Err(e) = egress.send_to(bytes, fc_addr).await {
            warn!(%e, "egress send failed after retry, dropping");
        }
    }
}

fn reason_str(reason: crypto::nonce::ReplayReason) -> &'static str {
    use crypto::nonce::ReplayReason::*;
    match reason {
        Clean => "clean",
        NonceReused => "nonce-reused",
        TimestampOutOfTolerance => "timestamp-out-of-tolerance",
        TimestampOutOfOrder => "timestamp-out-of-order",
        SemanticDuplicate => "semantic-duplicate",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        let mut cfg = Config::default();
        cfg.trusted_gcs_ip = Some("127.0.0.1".parse().unwrap());
        cfg.strict_mode = true;
        cfg.log_dir = std::env::temp_dir().join(format!("aegis-gateway-test-{:?}", std::thread::current().id()));
        cfg
    }

    fn test_gateway() -> Gateway {
        let cfg = test_config();
        let audit = Arc::new(AuditLogger::new(&cfg.log_dir, "test-session".to_string()).unwrap());
        let metrics = Arc::new(Metrics::new());
        Gateway::new(cfg, audit, metrics).unwrap()
    }

    #[test]
    fn content_derived_nonce_is_stable_for_equal_commands() {
        let frame = mavlink::encode_command_long(1, 1, 1, 16, [1.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let parser = FrameParser::new();
        let peer: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let c1 = parser.feed(peer, &frame, 0)[0].clone().unwrap();
        let c2 = c1.clone();
        assert_eq!(content_derived_nonce(&c1), content_derived_nonce(&c2));
    }

    #[test]
    fn constrain_frame_clamps_extreme_altitude() {
        let mut payload = vec![0u8; 30];
        payload[26..30].copy_from_slice(&500.0f32.to_le_bytes());
        let frame = mavlink::encode_frame(1, 1, 1, 75, &payload);

        let parser = FrameParser::new();
        let peer: SocketAddr = "127.0.0.1:2".parse().unwrap();
        let command = parser.feed(peer, &frame, 0)[0].clone().unwrap();
        assert_eq!(command.param_f64("alt"), Some(500.0));

        let sanitized = constrain_frame(&frame, &command);
        let parsed = parser.feed(peer, &sanitized, 0)[0].clone().unwrap();
        assert_eq!(parsed.param_f64("alt"), Some(150.0));
    }

    #[test]
    fn gateway_constructs_with_crypto_and_shadow_disabled() {
        let gw = test_gateway();
        assert!(gw.key_manager.is_none());
        assert!(gw.shadow.is_none());
        std::fs::remove_dir_all(&gw.config.log_dir).ok();
    }

    #[test]
    fn flight_mode_code_round_trips_rtl() {
        assert_eq!(flight_mode_code(FlightMode::Rtl), FlightModeCode::Rtl);
    }

    #[test]
    fn failsafe_command_classification() {
        let parser = FrameParser::new();
        let peer: SocketAddr = "127.0.0.1:3".parse().unwrap();

        let rtl = mavlink::encode_command_long(1, 1, 1, mavlink::mav_cmd_rtl(), [0.0; 7]);
        let rtl_cmd = parser.feed(peer, &rtl, 0)[0].clone().unwrap();
        assert!(is_failsafe_command(&rtl_cmd));

        let land = mavlink::encode_command_long(1, 1, 1, 21, [0.0; 7]);
        let land_cmd = parser.feed(peer, &land, 0)[0].clone().unwrap();
        assert!(is_failsafe_command(&land_cmd));

        let takeoff = mavlink::encode_command_long(1, 1, 1, mavlink::mav_cmd_takeoff(), [0.0; 7]);
        let takeoff_cmd = parser.feed(peer, &takeoff, 0)[0].clone().unwrap();
        assert!(!is_failsafe_command(&takeoff_cmd));

        let disarm = mavlink::encode_command_long(1, 1, 1, 400, [0.0; 7]);
        let disarm_cmd = parser.feed(peer, &disarm, 0)[0].clone().unwrap();
        assert!(is_failsafe_command(&disarm_cmd));

        let arm = mavlink::encode_command_long(1, 1, 1, 400, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let arm_cmd = parser.feed(peer, &arm, 0)[0].clone().unwrap();
        assert!(!is_failsafe_command(&arm_cmd));

        let waypoint = mavlink::encode_command_long(1, 1, 1, 16, [0.0; 7]);
        let waypoint_cmd = parser.feed(peer, &waypoint, 0)[0].clone().unwrap();
        assert!(!is_failsafe_command(&waypoint_cmd));
    }
}
