//! Shadow executor: short-horizon kinematic projection and
//! geofence/energy risk scoring. Not a physics simulator — a cheap
//! "what happens if we obey this" check.
//!
//! Grounded on `src/ai_layer/shadow_executor.py`'s `ShadowExecutor`: same
//! five-sample prediction horizon, same haversine geofence check, same
//! linear/dead-reckoning position prediction, same risk accumulation.

use crate::mavlink::ParsedCommand;
use crate::vehicle::VehicleSnapshot;

const EARTH_RADIUS_M: f64 = 6_371_000.0;
const HORIZON_SAMPLES_SEC: [f64; 5] = [1.0, 2.5, 5.0, 7.5, 10.0];

const MAX_HORIZONTAL_VEL_MS: f64 = 15.0;
const MAX_VERTICAL_VEL_MS: f64 = 5.0;
const CRITICAL_BATTERY: f64 = 0.20;
const LOW_BATTERY: f64 = 0.30;
const MEDIUM_BATTERY: f64 = 0.50;

#[derive(Debug, Clone, Copy)]
pub struct Geofence {
    pub center_lat: f64,
    pub center_lon: f64,
    pub radius_m: f64,
    pub min_alt_m: f64,
    pub max_alt_m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyMargin {
    High,
    Medium,
    Low,
    Critical,
}

#[derive(Debug, Clone, Copy)]
pub struct PredictedOutcome {
    pub geofence_violation: bool,
    pub time_to_violation_sec: Option<f64>,
    pub altitude_risk: bool,
    pub velocity_risk: bool,
    pub energy_margin: EnergyMargin,
    pub loss_of_control_risk: bool,
    pub collision_risk: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ShadowResult {
    pub outcome: PredictedOutcome,
    pub trajectory_risk: f64,
}

pub struct ShadowExecutor {
    geofence: Geofence,
}

impl ShadowExecutor {
    pub fn new(geofence: Geofence) -> Self {
        Self { geofence }
    }

    pub fn predict(&self, command: &ParsedCommand, snapshot: &VehicleSnapshot) -> ShadowResult {
        let mut time_to_violation = None;
        let mut violation_detected = false;
        let mut final_position = (snapshot.lat, snapshot.lon, snapshot.altitude_agl_m);

        for &t in &HORIZON_SAMPLES_SEC {
            let pos = self.predict_position(command, snapshot, t);
            final_position = pos;
            let (violated, _dist) = self.check_geofence(pos);
            if violated && time_to_violation.is_none() {
                time_to_violation = Some(t);
                violation_detected = true;
            }
        }

        let (_, _, final_alt) = final_position;
        let altitude_risk = final_alt < self.geofence.min_alt_m || final_alt > self.geofence.max_alt_m;

        let vx = command.param_f64("vx").unwrap_or(0.0);
        let vy = command.param_f64("vy").unwrap_or(0.0);
        let vz = command.param_f64("vz").unwrap_or(0.0);
        let horizontal_vel = (vx * vx + vy * vy).sqrt();
        let velocity_risk = horizontal_vel > MAX_HORIZONTAL_VEL_MS || vz.abs() > MAX_VERTICAL_VEL_MS;

        let battery = snapshot.battery;
        let energy_margin = if battery < CRITICAL_BATTERY {
            EnergyMargin::Critical
        } else if battery < LOW_BATTERY {
            EnergyMargin::Low
        } else if battery < MEDIUM_BATTERY {
            EnergyMargin::Medium
        } else {
            EnergyMargin::High
        };

        let loss_of_control_risk = velocity_risk || altitude_risk || energy_margin == EnergyMargin::Critical;
        let collision_risk = altitude_risk;

        let mut risk_score: f64 = 0.0;
        if violation_detected {
            risk_score += if time_to_violation.is_some_and(|t| t < 5.0) {
                0.5
            } else {
                0.3
            };
        }
        if altitude_risk {
            risk_score += 0.3;
        }
        if velocity_risk {
            risk_score += 0.2;
        }
        match energy_margin {
            EnergyMargin::Critical => risk_score += 0.4,
            EnergyMargin::Low => risk_score += 0.2,
            _ => {}
        }
        if loss_of_control_risk {
            risk_score += 0.3;
        }
        let trajectory_risk = (risk_score.min(1.0) * 100.0).round() / 100.0;

        ShadowResult {
            outcome: PredictedOutcome {
                geofence_violation: violation_detected,
                time_to_violation_sec: time_to_violation,
                altitude_risk,
                velocity_risk,
                energy_margin,
                loss_of_control_risk,
                collision_risk,
            },
            trajectory_risk,
        }
    }

    fn predict_position(&self, command: &ParsedCommand, snapshot: &VehicleSnapshot, t: f64) -> (f64, f64, f64) {
        if let (Some(target_lat), Some(target_lon)) = (command.param_f64("lat"), command.param_f64("lon")) {
            let target_alt = command.param_f64("alt").unwrap_or(snapshot.altitude_agl_m);
            let alpha = (t / 5.0).min(1.0);
            let lat = snapshot.lat + alpha * (target_lat - snapshot.lat);
            let lon = snapshot.lon + alpha * (target_lon - snapshot.lon);
            let alt = snapshot.altitude_agl_m + alpha * (target_alt - snapshot.altitude_agl_m);
            (lat, lon, alt)
        } else if let (Some(vx), Some(vy)) = (command.param_f64("vx"), command.param_f64("vy")) {
            let vz = command.param_f64("vz").unwrap_or(0.0);
            let meters_per_degree_lat = 111_000.0;
            let meters_per_degree_lon = 111_000.0 * snapshot.lat.to_radians().cos();
            let lat = snapshot.lat + (vy * t) / meters_per_degree_lat;
            let lon = snapshot.lon + (vx * t) / meters_per_degree_lon;
            let alt = snapshot.altitude_agl_m + vz * t;
            (lat, lon, alt)
        } else {
            (snapshot.lat, snapshot.lon, snapshot.altitude_agl_m)
        }
    }

    fn check_geofence(&self, position: (f64, f64, f64)) -> (bool, Option<f64>) {
        let (lat, lon, alt) = position;
        let dist = haversine(self.geofence.center_lat, self.geofence.center_lon, lat, lon);
        let horizontal_violation = dist > self.geofence.radius_m;
        let vertical_violation = alt < self.geofence.min_alt_m || alt > self.geofence.max_alt_m;
        let violated = horizontal_violation || vertical_violation;
        let distance_outside = if horizontal_violation {
            Some((dist - self.geofence.radius_m).max(0.0))
        } else {
            None
        };
        (violated, distance_outside)
    }
}

fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mavlink::{CommandKind, MessageType, ParamValue};
    use crate::vehicle::{FlightMode, MissionPhase};
    use std::collections::HashMap;

    fn geofence() -> Geofence {
        Geofence {
            center_lat: 47.0,
            center_lon: -122.0,
            radius_m: 300.0,
            min_alt_m: 10.0,
            max_alt_m: 120.0,
        }
    }

    fn snap(lat: f64, lon: f64, alt: f64, battery: f64) -> VehicleSnapshot {
        VehicleSnapshot {
            mode: FlightMode::Guided,
            mission_phase: MissionPhase::Cruise,
            armed: true,
            altitude_agl_m: alt,
            horizontal_vel_ms: 5.0,
            vertical_vel_ms: 0.0,
            battery,
            lat,
            lon,
        }
    }

    fn nav_cmd(lat: f64, lon: f64, alt: f64) -> ParsedCommand {
        let mut params = HashMap::new();
        params.insert("lat".into(), ParamValue::Number(lat));
        params.insert("lon".into(), ParamValue::Number(lon));
        params.insert("alt".into(), ParamValue::Number(alt));
        ParsedCommand {
            message_type: MessageType::CommandInt,
            message_id: 75,
            source_system: 1,
            source_component: 1,
            command_kind: CommandKind::Navigation,
            params,
            ingress_timestamp_ns: 0,
        }
    }

    #[test]
    fn target_within_geofence_is_safe() {
        let executor = ShadowExecutor::new(geofence());
        let result = executor.predict(&nav_cmd(47.001, -122.001, 60.0), &snap(47.0, -122.0, 50.0, 0.75));
        assert!(!result.outcome.geofence_violation);
        assert!(result.trajectory_risk < 0.3);
    }

    #[test]
    fn target_far_outside_geofence_is_flagged() {
        let executor = ShadowExecutor::new(geofence());
        let result = executor.predict(&nav_cmd(47.01, -122.01, 50.0), &snap(47.0, -122.0, 50.0, 0.75));
        assert!(result.outcome.geofence_violation);
        assert!(result.trajectory_risk > 0.0);
    }

    #[test]
    fn critical_battery_gives_critical_margin() {
        let executor = ShadowExecutor::new(geofence());
        let result = executor.predict(&nav_cmd(47.0001, -122.0001, 50.0), &snap(47.0, -122.0, 50.0, 0.1));
        assert_eq!(result.outcome.energy_margin, EnergyMargin::Critical);
        assert!(result.outcome.loss_of_control_risk);
    }

    #[test]
    fn excessive_velocity_param_is_flagged() {
        let executor = ShadowExecutor::new(geofence());
        let mut params = HashMap::new();
        params.insert("vx".into(), ParamValue::Number(30.0));
        params.insert("vy".into(), ParamValue::Number(0.0));
        let cmd = ParsedCommand {
            message_type: MessageType::SetPositionTargetLocalNed,
            message_id: 84,
            source_system: 1,
            source_component: 1,
            command_kind: CommandKind::Navigation,
            params,
            ingress_timestamp_ns: 0,
        };
        let result = executor.predict(&cmd, &snap(47.0, -122.0, 50.0, 0.75));
        assert!(result.outcome.velocity_risk);
    }
}
