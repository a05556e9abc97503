//! Gateway-side view of the aircraft's vehicle state. Single-writer:
//! only the gateway glue updates this, from telemetry seen on the return
//! path; detectors only ever read it.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightMode {
    Manual,
    Stabilize,
    Auto,
    Guided,
    Rtl,
    Land,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionPhase {
    Idle,
    PreFlight,
    Takeoff,
    Cruise,
    Mission,
    Return,
    Landing,
}

impl MissionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionPhase::Idle => "idle",
            MissionPhase::PreFlight => "pre-flight",
            MissionPhase::Takeoff => "takeoff",
            MissionPhase::Cruise => "cruise",
            MissionPhase::Mission => "mission",
            MissionPhase::Return => "return",
            MissionPhase::Landing => "landing",
        }
    }
}

/// Lock-free snapshot fields packed for cheap concurrent reads, plus a
/// small mutex-guarded enum pair for the two non-numeric fields. Mirrors
/// the teacher's pattern of plain `Atomic*` fields behind a shared `Arc`.
pub struct VehicleState {
    mode_and_phase: Mutex<(FlightMode, MissionPhase)>,
    armed: AtomicU8,
    altitude_agl_mm: AtomicU32,
    horizontal_vel_mm_s: AtomicU32,
    vertical_vel_mm_s: AtomicU32,
    battery_milli: AtomicU32,
    position_lat_e7: AtomicU64,
    position_lon_e7: AtomicU64,
}

impl Default for VehicleState {
    fn default() -> Self {
        Self {
            mode_and_phase: Mutex::new((FlightMode::Unknown, MissionPhase::Idle)),
            armed: AtomicU8::new(0),
            altitude_agl_mm: AtomicU32::new(0),
            horizontal_vel_mm_s: AtomicU32::new(0),
            vertical_vel_mm_s: AtomicU32::new(0),
            battery_milli: AtomicU32::new(1000),
            position_lat_e7: AtomicU64::new(0),
            position_lon_e7: AtomicU64::new(0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VehicleSnapshot {
    pub mode: FlightMode,
    pub mission_phase: MissionPhase,
    pub armed: bool,
    pub altitude_agl_m: f64,
    pub horizontal_vel_ms: f64,
    pub vertical_vel_ms: f64,
    pub battery: f64,
    pub lat: f64,
    pub lon: f64,
}

impl VehicleState {
    pub fn snapshot(&self) -> VehicleSnapshot {
        let (mode, phase) = *self.mode_and_phase.lock().unwrap();
        VehicleSnapshot {
            mode,
            mission_phase: phase,
            armed: self.armed.load(Ordering::Relaxed) != 0,
            altitude_agl_m: self.altitude_agl_mm.load(Ordering::Relaxed) as f64 / 1000.0,
            horizontal_vel_ms: self.horizontal_vel_mm_s.load(Ordering::Relaxed) as f64 / 1000.0,
            vertical_vel_ms: self.vertical_vel_mm_s.load(Ordering::Relaxed) as f64 / 1000.0,
            battery: self.battery_milli.load(Ordering::Relaxed) as f64 / 1000.0,
            lat: bits_to_signed_e7(self.position_lat_e7.load(Ordering::Relaxed)) as f64 / 1e7,
            lon: bits_to_signed_e7(self.position_lon_e7.load(Ordering::Relaxed)) as f64 / 1e7,
        }
    }

    pub fn set_mode(&self, mode: FlightMode) {
        self.mode_and_phase.lock().unwrap().0 = mode;
    }

    pub fn set_mission_phase(&self, phase: MissionPhase) {
        self.mode_and_phase.lock().unwrap().1 = phase;
    }

    pub fn set_armed(&self, armed: bool) {
        self.armed.store(armed as u8, Ordering::Relaxed);
    }

    pub fn set_altitude_agl_m(&self, alt: f64) {
        self.altitude_agl_mm
            .store((alt * 1000.0).clamp(0.0, u32::MAX as f64) as u32, Ordering::Relaxed);
    }

    pub fn set_velocity_ms(&self, horizontal: f64, vertical: f64) {
        self.horizontal_vel_mm_s
            .store((horizontal * 1000.0).clamp(0.0, u32::MAX as f64) as u32, Ordering::Relaxed);
        self.vertical_vel_mm_s.store(
            (vertical.abs() * 1000.0).clamp(0.0, u32::MAX as f64) as u32,
            Ordering::Relaxed,
        );
    }

    pub fn set_battery(&self, level_0_1: f64) {
        self.battery_milli
            .store((level_0_1.clamp(0.0, 1.0) * 1000.0) as u32, Ordering::Relaxed);
    }

    pub fn set_position(&self, lat: f64, lon: f64) {
        self.position_lat_e7
            .store(signed_e7_to_bits((lat * 1e7) as i64), Ordering::Relaxed);
        self.position_lon_e7
            .store(signed_e7_to_bits((lon * 1e7) as i64), Ordering::Relaxed);
    }
}

fn signed_e7_to_bits(v: i64) -> u64 {
    v as u64
}
fn bits_to_signed_e7(v: u64) -> i64 {
    v as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_unarmed_idle() {
        let vs = VehicleState::default();
        let snap = vs.snapshot();
        assert!(!snap.armed);
        assert_eq!(snap.mission_phase, MissionPhase::Idle);
    }

    #[test]
    fn setters_round_trip_through_snapshot() {
        let vs = VehicleState::default();
        vs.set_mode(FlightMode::Guided);
        vs.set_mission_phase(MissionPhase::Cruise);
        vs.set_armed(true);
        vs.set_altitude_agl_m(42.5);
        vs.set_velocity_ms(3.25, -1.5);
        vs.set_battery(0.67);
        vs.set_position(47.640420, -122.140300);

        let snap = vs.snapshot();
        assert_eq!(snap.mode, FlightMode::Guided);
        assert_eq!(snap.mission_phase, MissionPhase::Cruise);
        assert!(snap.armed);
        assert!((snap.altitude_agl_m - 42.5).abs() < 0.01);
        assert!((snap.horizontal_vel_ms - 3.25).abs() < 0.01);
        assert!((snap.vertical_vel_ms - 1.5).abs() < 0.01);
        assert!((snap.battery - 0.67).abs() < 0.01);
        assert!((snap.lat - 47.640420).abs() < 1e-5);
        assert!((snap.lon - (-122.140300)).abs() < 1e-5);
    }
}
