//! 37-dimensional windowed feature extraction feeding the ML advisory
//! inference engine.
//!
//! Grounded on `src/ai_layer/ml_models/feature_extractor.py`'s
//! `FeatureExtractorV2`: identical feature schema (10 command + 15 temporal
//! + 12 context), identical normalization constants and trend computation.

use std::collections::VecDeque;
use std::sync::Mutex;

pub const FEATURE_COUNT: usize = 37;
const WINDOW_SIZE: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightModeCode {
    Manual,
    Stabilize,
    Guided,
    Auto,
    Rtl,
    Land,
    Loiter,
}

impl FlightModeCode {
    fn index(&self) -> u32 {
        match self {
            FlightModeCode::Manual => 0,
            FlightModeCode::Stabilize => 1,
            FlightModeCode::Guided => 2,
            FlightModeCode::Auto => 3,
            FlightModeCode::Rtl => 4,
            FlightModeCode::Land => 5,
            FlightModeCode::Loiter => 6,
        }
    }
}
const FLIGHT_MODE_COUNT: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionPhaseCode {
    None,
    Takeoff,
    Cruise,
    Waypoint,
    LandingApproach,
    Landing,
}

impl MissionPhaseCode {
    fn index(&self) -> u32 {
        match self {
            MissionPhaseCode::None => 0,
            MissionPhaseCode::Takeoff => 1,
            MissionPhaseCode::Cruise => 2,
            MissionPhaseCode::Waypoint => 3,
            MissionPhaseCode::LandingApproach => 4,
            MissionPhaseCode::Landing => 5,
        }
    }
}
const MISSION_PHASE_COUNT: u32 = 6;

/// Complete context a command is observed under, mirroring
/// `CommandContext` in the Python reference.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub msg_id: u32,
    pub command_type_hash: u64,
    pub is_position_command: bool,
    pub is_manual_control_command: bool,
    pub is_takeoff_command: bool,
    pub target_system: u8,
    pub target_component: u8,
    pub param1: f64,
    pub param2: f64,
    pub param3: f64,
    pub param4: f64,
    pub flight_mode: FlightModeCode,
    pub mission_phase: MissionPhaseCode,
    pub armed: bool,
    pub battery_level: f64,
    pub altitude: f64,
    pub velocity: f64,
    pub timestamp_sec: f64,
}

pub struct FeatureExtractor {
    window: Mutex<VecDeque<CommandContext>>,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(WINDOW_SIZE)),
        }
    }

    /// Appends `ctx` to the window and extracts a 37-feature vector, or
    /// `None` if fewer than 2 commands are buffered.
    pub fn extract(&self, ctx: CommandContext) -> Option<[f64; FEATURE_COUNT]> {
        let mut window = self.window.lock().unwrap();
        window.push_back(ctx);
        if window.len() > WINDOW_SIZE {
            window.pop_front();
        }
        if window.len() < 2 {
            return None;
        }

        let items: Vec<&CommandContext> = window.iter().collect();
        let cmd = command_features(&items);
        let temporal = temporal_features(&items);
        let ctx_features = context_features(items.last().unwrap());

        let mut out = [0.0f64; FEATURE_COUNT];
        out[0..10].copy_from_slice(&cmd);
        out[10..25].copy_from_slice(&temporal);
        out[25..37].copy_from_slice(&ctx_features);
        Some(out)
    }

    pub fn reset(&self) {
        self.window.lock().unwrap().clear();
    }
}

fn command_features(window: &[&CommandContext]) -> [f64; 10] {
    let ctx = window.last().unwrap();
    let msg_id_norm = ctx.msg_id as f64 / 300.0;
    let cmd_type_hash = (ctx.command_type_hash % 1000) as f64 / 1000.0;

    let param1_norm = (ctx.param1 / 100.0).clamp(-1.0, 1.0);
    let param2_norm = (ctx.param2 / 100.0).clamp(-1.0, 1.0);
    let param3_norm = (ctx.param3 / 100.0).clamp(-1.0, 1.0);
    let param4_norm = (ctx.param4 / 100.0).clamp(-1.0, 1.0);

    let param_mag = (ctx.param1.powi(2) + ctx.param2.powi(2) + ctx.param3.powi(2) + ctx.param4.powi(2)).sqrt();
    let param_mag_norm = (param_mag / 200.0).clamp(0.0, 1.0);

    let target_sys_norm = ctx.target_system as f64 / 255.0;
    let target_comp_norm = ctx.target_component as f64 / 255.0;

    let time_delta_norm = if window.len() >= 2 {
        let prev = window[window.len() - 2];
        ((ctx.timestamp_sec - prev.timestamp_sec) / 5.0).clamp(0.0, 1.0)
    } else {
        0.0
    };

    [
        msg_id_norm,
        cmd_type_hash,
        param1_norm,
        param2_norm,
        param3_norm,
        param4_norm,
        param_mag_norm,
        target_sys_norm,
        target_comp_norm,
        time_delta_norm,
    ]
}

fn temporal_features(window: &[&CommandContext]) -> [f64; 15] {
    let n = window.len();
    if n < 2 {
        return [0.0; 15];
    }

    let timestamps: Vec<f64> = window.iter().map(|c| c.timestamp_sec).collect();
    let last_ts = *timestamps.last().unwrap();

    let recent_1s = timestamps.iter().filter(|&&t| last_ts - t <= 1.0).count() as f64;
    let cmd_freq_1s = (recent_1s / 10.0).clamp(0.0, 1.0);

    let recent_5s = timestamps.iter().filter(|&&t| last_ts - t <= 5.0).count() as f64;
    let cmd_freq_5s = (recent_5s / 50.0).clamp(0.0, 1.0);

    let mode_changes = (1..n).filter(|&i| window[i].flight_mode != window[i - 1].flight_mode).count();
    let intent_transitions = (mode_changes as f64 / 5.0).clamp(0.0, 1.0);

    let param1_values: Vec<f64> = window.iter().map(|c| c.param1).collect();
    let param_var = variance(&param1_values);
    let param_var_norm = (param_var / 100.0).clamp(0.0, 1.0);

    let param_changes: Vec<f64> = param1_values.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let param_mean_change = if param_changes.is_empty() {
        0.0
    } else {
        (mean(&param_changes) / 50.0).clamp(0.0, 1.0)
    };

    let last_hash = window.last().unwrap().command_type_hash;
    let repetition = window.iter().filter(|c| c.command_type_hash == last_hash).count();
    let repetition_norm = (repetition as f64 / n as f64).clamp(0.0, 1.0);

    let mode_changes_norm = (mode_changes as f64 / n as f64).clamp(0.0, 1.0);

    let time_diffs: Vec<f64> = timestamps.windows(2).map(|w| w[1] - w[0]).collect();
    let time_std = std_dev(&time_diffs);
    let time_std_norm = (time_std / 2.0).clamp(0.0, 1.0);

    let unique_types: std::collections::HashSet<u64> = window.iter().map(|c| c.command_type_hash).collect();
    let cmd_diversity = unique_types.len() as f64 / n as f64;

    let param1_trend = compute_trend(&param1_values);
    let param2_values: Vec<f64> = window.iter().map(|c| c.param2).collect();
    let param2_trend = compute_trend(&param2_values);
    let velocity_values: Vec<f64> = window.iter().map(|c| c.velocity).collect();
    let velocity_trend = compute_trend(&velocity_values);

    let altitudes: Vec<f64> = window.iter().map(|c| c.altitude).collect();
    let alt_changes: Vec<f64> = altitudes.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let alt_change_rate = if alt_changes.is_empty() {
        0.0
    } else {
        (mean(&alt_changes) / 10.0).clamp(0.0, 1.0)
    };

    let sequential_same = if n >= 2 && window[n - 1].command_type_hash == window[n - 2].command_type_hash {
        1.0
    } else {
        0.0
    };

    let burst_detected = if cmd_freq_1s > 0.5 { 1.0 } else { 0.0 };

    [
        cmd_freq_1s,
        cmd_freq_5s,
        intent_transitions,
        param_var_norm,
        param_mean_change,
        repetition_norm,
        mode_changes_norm,
        time_std_norm,
        cmd_diversity,
        param1_trend,
        param2_trend,
        velocity_trend,
        alt_change_rate,
        sequential_same,
        burst_detected,
    ]
}

fn context_features(ctx: &CommandContext) -> [f64; 12] {
    let mode_encoded = ctx.flight_mode.index() as f64 / FLIGHT_MODE_COUNT as f64;
    let phase_encoded = ctx.mission_phase.index() as f64 / MISSION_PHASE_COUNT as f64;
    let armed_state = if ctx.armed { 1.0 } else { 0.0 };
    let battery = ctx.battery_level.clamp(0.0, 1.0);
    let altitude_norm = (ctx.altitude / 100.0).clamp(0.0, 1.0);
    let velocity_norm = (ctx.velocity / 20.0).clamp(0.0, 1.0);
    let is_high_altitude = if ctx.altitude > 50.0 { 1.0 } else { 0.0 };
    let is_low_battery = if ctx.battery_level < 0.2 { 1.0 } else { 0.0 };
    let is_high_velocity = if ctx.velocity > 15.0 { 1.0 } else { 0.0 };
    let mode_match = check_mode_context_match(ctx);
    let alt_category = if ctx.altitude < 5.0 {
        0.0
    } else if ctx.altitude < 30.0 {
        0.5
    } else {
        1.0
    };
    let risk_flag = if is_low_battery > 0.0 || is_high_altitude > 0.0 || is_high_velocity > 0.0 {
        1.0
    } else {
        0.0
    };

    [
        mode_encoded,
        phase_encoded,
        armed_state,
        battery,
        altitude_norm,
        velocity_norm,
        is_high_altitude,
        is_low_battery,
        is_high_velocity,
        mode_match,
        alt_category,
        risk_flag,
    ]
}

fn check_mode_context_match(ctx: &CommandContext) -> f64 {
    if ctx.flight_mode == FlightModeCode::Manual && ctx.is_position_command {
        return 0.0;
    }
    if ctx.flight_mode == FlightModeCode::Auto && ctx.is_manual_control_command {
        return 0.0;
    }
    if ctx.flight_mode == FlightModeCode::Land && ctx.is_takeoff_command {
        return 0.0;
    }
    1.0
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        0.0
    } else {
        variance(values).sqrt()
    }
}

/// Pearson correlation of `values` against their index sequence, used as a
/// cheap trend direction in [-1, 1].
fn compute_trend(values: &[f64]) -> f64 {
    if values.len() < 3 {
        return 0.0;
    }
    let n = values.len() as f64;
    let xs: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    let x_mean = mean(&xs);
    let y_mean = mean(values);

    let mut cov = 0.0;
    let mut x_var = 0.0;
    let mut y_var = 0.0;
    for i in 0..values.len() {
        let dx = xs[i] - x_mean;
        let dy = values[i] - y_mean;
        cov += dx * dy;
        x_var += dx * dx;
        y_var += dy * dy;
    }
    let _ = n;
    if x_var == 0.0 || y_var == 0.0 {
        return 0.0;
    }
    (cov / (x_var.sqrt() * y_var.sqrt())).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_ctx(t: f64, param1: f64) -> CommandContext {
        CommandContext {
            msg_id: 76,
            command_type_hash: 1,
            is_position_command: false,
            is_manual_control_command: false,
            is_takeoff_command: false,
            target_system: 1,
            target_component: 1,
            param1,
            param2: 0.0,
            param3: 0.0,
            param4: 0.0,
            flight_mode: FlightModeCode::Guided,
            mission_phase: MissionPhaseCode::Cruise,
            armed: true,
            battery_level: 0.8,
            altitude: 25.0,
            velocity: 5.0,
            timestamp_sec: t,
        }
    }

    #[test]
    fn first_command_returns_none() {
        let extractor = FeatureExtractor::new();
        assert!(extractor.extract(basic_ctx(0.0, 1.0)).is_none());
    }

    #[test]
    fn second_command_returns_full_vector() {
        let extractor = FeatureExtractor::new();
        extractor.extract(basic_ctx(0.0, 1.0));
        let features = extractor.extract(basic_ctx(0.5, 2.0)).unwrap();
        assert_eq!(features.len(), FEATURE_COUNT);
        assert!(features.iter().all(|f| f.is_finite()));
    }

    #[test]
    fn window_is_bounded_at_seven() {
        let extractor = FeatureExtractor::new();
        for i in 0..20 {
            extractor.extract(basic_ctx(i as f64 * 0.5, i as f64));
        }
        assert_eq!(extractor.window.lock().unwrap().len(), WINDOW_SIZE);
    }

    #[test]
    fn increasing_param_gives_positive_trend() {
        let extractor = FeatureExtractor::new();
        let mut last = None;
        for i in 0..6 {
            last = extractor.extract(basic_ctx(i as f64 * 0.5, i as f64 * 10.0));
        }
        let features = last.unwrap();
        assert!(features[19] > 0.5); // param1_trend index within temporal block
    }

    #[test]
    fn all_outputs_bounded() {
        let extractor = FeatureExtractor::new();
        let mut last = None;
        for i in 0..10 {
            last = extractor.extract(basic_ctx(i as f64 * 0.1, 1000.0));
        }
        let features = last.unwrap();
        for f in features {
            assert!((-1.0..=1.0).contains(&f));
        }
    }
}
