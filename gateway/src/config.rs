//! Configuration loading: a flat `key=value`-per-line file (dotted keys),
//! with an optional `AEGIS_CONFIG` env override for the file path.

use crate::error::AegisError;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_host: IpAddr,
    pub listen_port: u16,
    pub fc_ip: IpAddr,
    pub fc_port: u16,
    pub trusted_gcs_ip: Option<IpAddr>,
    pub strict_mode: bool,

    pub enable_crypto: bool,
    pub enable_ml: bool,
    pub enable_shadow: bool,

    pub flood_normal_threshold: f64,
    pub flood_attack_threshold: f64,
    pub flood_burst_threshold: f64,

    pub replay_nonce_window: usize,
    pub replay_timestamp_tolerance_sec: f64,

    pub crypto_session_lifetime_sec: u64,
    pub crypto_max_commands_per_session: u64,
    pub crypto_grace_period_sec: u64,

    pub log_dir: std::path::PathBuf,

    pub shadow_geofence_center_lat: Option<f64>,
    pub shadow_geofence_center_lon: Option<f64>,
    pub shadow_geofence_radius_m: Option<f64>,
    pub shadow_min_alt_m: Option<f64>,
    pub shadow_max_alt_m: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".parse().unwrap(),
            listen_port: 14560,
            fc_ip: "127.0.0.1".parse().unwrap(),
            fc_port: 14550,
            trusted_gcs_ip: None,
            strict_mode: true,

            enable_crypto: false,
            enable_ml: false,
            enable_shadow: false,

            flood_normal_threshold: 5.0,
            flood_attack_threshold: 20.0,
            flood_burst_threshold: 50.0,

            replay_nonce_window: 10_000,
            replay_timestamp_tolerance_sec: 30.0,

            crypto_session_lifetime_sec: 1800,
            crypto_max_commands_per_session: 1000,
            crypto_grace_period_sec: 300,

            log_dir: std::path::PathBuf::from("."),

            shadow_geofence_center_lat: None,
            shadow_geofence_center_lon: None,
            shadow_geofence_radius_m: None,
            shadow_min_alt_m: None,
            shadow_max_alt_m: None,
        }
    }
}

impl Config {
    pub fn load_default_path() -> Result<Self, AegisError> {
        let path = std::env::var("AEGIS_CONFIG").unwrap_or_else(|_| "aegis.conf".to_string());
        if Path::new(&path).exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, AegisError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AegisError::Config(format!("cannot read config: {e}")))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, AegisError> {
        let mut kv: HashMap<String, String> = HashMap::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                AegisError::Config(format!("line {}: expected key=value", lineno + 1))
            })?;
            kv.insert(key.trim().to_string(), value.trim().to_string());
        }

        let mut cfg = Config::default();
        let get = |k: &str| kv.get(k).map(|s| s.as_str());

        if let Some(v) = get("network.listen_host") {
            cfg.listen_host = v
                .parse()
                .map_err(|_| AegisError::Config(format!("invalid network.listen_host: {v}")))?;
        }
        if let Some(v) = get("network.listen_port") {
            cfg.listen_port = v
                .parse()
                .map_err(|_| AegisError::Config(format!("invalid network.listen_port: {v}")))?;
        }
        if let Some(v) = get("network.fc_ip") {
            cfg.fc_ip = v
                .parse()
                .map_err(|_| AegisError::Config(format!("invalid network.fc_ip: {v}")))?;
        }
        if let Some(v) = get("network.fc_port") {
            cfg.fc_port = v
                .parse()
                .map_err(|_| AegisError::Config(format!("invalid network.fc_port: {v}")))?;
        }
        if let Some(v) = get("network.trusted_gcs_ip") {
            cfg.trusted_gcs_ip = Some(
                v.parse()
                    .map_err(|_| AegisError::Config(format!("invalid network.trusted_gcs_ip: {v}")))?,
            );
        }
        if let Some(v) = get("network.strict_mode") {
            cfg.strict_mode = parse_bool(v)?;
        }

        if let Some(v) = get("security.enable_crypto") {
            cfg.enable_crypto = parse_bool(v)?;
        }
        if let Some(v) = get("security.enable_ml") {
            cfg.enable_ml = parse_bool(v)?;
        }
        if let Some(v) = get("security.enable_shadow") {
            cfg.enable_shadow = parse_bool(v)?;
        }

        if let Some(v) = get("detectors.flood.normal_threshold") {
            cfg.flood_normal_threshold = parse_f64("detectors.flood.normal_threshold", v)?;
        }
        if let Some(v) = get("detectors.flood.attack_threshold") {
            cfg.flood_attack_threshold = parse_f64("detectors.flood.attack_threshold", v)?;
        }
        if let Some(v) = get("detectors.flood.burst_threshold") {
            cfg.flood_burst_threshold = parse_f64("detectors.flood.burst_threshold", v)?;
        }

        if let Some(v) = get("detectors.replay.nonce_window") {
            cfg.replay_nonce_window = v
                .parse()
                .map_err(|_| AegisError::Config(format!("invalid detectors.replay.nonce_window: {v}")))?;
        }
        if let Some(v) = get("detectors.replay.timestamp_tolerance_sec") {
            cfg.replay_timestamp_tolerance_sec =
                parse_f64("detectors.replay.timestamp_tolerance_sec", v)?;
        }

        if let Some(v) = get("crypto.session_lifetime_sec") {
            cfg.crypto_session_lifetime_sec = v
                .parse()
                .map_err(|_| AegisError::Config(format!("invalid crypto.session_lifetime_sec: {v}")))?;
        }
        if let Some(v) = get("crypto.max_commands_per_session") {
            cfg.crypto_max_commands_per_session = v.parse().map_err(|_| {
                AegisError::Config(format!("invalid crypto.max_commands_per_session: {v}"))
            })?;
        }
        if let Some(v) = get("crypto.grace_period_sec") {
            cfg.crypto_grace_period_sec = v
                .parse()
                .map_err(|_| AegisError::Config(format!("invalid crypto.grace_period_sec: {v}")))?;
        }

        if let Some(v) = get("logging.log_dir") {
            cfg.log_dir = std::path::PathBuf::from(v);
        }

        if let Some(v) = get("shadow.geofence_center_lat") {
            cfg.shadow_geofence_center_lat = Some(parse_f64("shadow.geofence_center_lat", v)?);
        }
        if let Some(v) = get("shadow.geofence_center_lon") {
            cfg.shadow_geofence_center_lon = Some(parse_f64("shadow.geofence_center_lon", v)?);
        }
        if let Some(v) = get("shadow.geofence_radius_m") {
            cfg.shadow_geofence_radius_m = Some(parse_f64("shadow.geofence_radius_m", v)?);
        }
        if let Some(v) = get("shadow.min_alt_m") {
            cfg.shadow_min_alt_m = Some(parse_f64("shadow.min_alt_m", v)?);
        }
        if let Some(v) = get("shadow.max_alt_m") {
            cfg.shadow_max_alt_m = Some(parse_f64("shadow.max_alt_m", v)?);
        }

        if cfg.strict_mode && cfg.trusted_gcs_ip.is_none() {
            return Err(AegisError::Config(
                "network.trusted_gcs_ip is required in strict mode".into(),
            ));
        }

        if cfg.enable_shadow
            && (cfg.shadow_geofence_center_lat.is_none()
                || cfg.shadow_geofence_center_lon.is_none()
                || cfg.shadow_geofence_radius_m.is_none()
                || cfg.shadow_min_alt_m.is_none()
                || cfg.shadow_max_alt_m.is_none())
        {
            return Err(AegisError::Config(
                "shadow.* geofence keys are required when security.enable_shadow is true".into(),
            ));
        }

        Ok(cfg)
    }
}

fn parse_bool(v: &str) -> Result<bool, AegisError> {
    match v.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(AegisError::Config(format!("invalid boolean: {other}"))),
    }
}

fn parse_f64(key: &str, v: &str) -> Result<f64, AegisError> {
    v.parse()
        .map_err(|_| AegisError::Config(format!("invalid {key}: {v}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fail_strict_mode_without_trusted_gcs() {
        let err = Config::parse("").unwrap_err();
        assert!(matches!(err, AegisError::Config(_)));
    }

    #[test]
    fn minimal_valid_config_parses() {
        let cfg = Config::parse("network.trusted_gcs_ip=10.0.0.5\n").unwrap();
        assert_eq!(cfg.trusted_gcs_ip, Some("10.0.0.5".parse().unwrap()));
        assert_eq!(cfg.listen_port, 14560);
        assert_eq!(cfg.fc_port, 14550);
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let text = "# a comment\n\nnetwork.trusted_gcs_ip=10.0.0.5\n  # trailing\n";
        let cfg = Config::parse(text).unwrap();
        assert_eq!(cfg.trusted_gcs_ip, Some("10.0.0.5".parse().unwrap()));
    }

    #[test]
    fn overrides_apply() {
        let text = "\
network.trusted_gcs_ip=10.0.0.5
network.listen_port=15000
detectors.flood.normal_threshold=7.5
security.enable_shadow=true
shadow.geofence_center_lat=47.0
shadow.geofence_center_lon=-122.0
shadow.geofence_radius_m=500
shadow.min_alt_m=10
shadow.max_alt_m=120
";
        let cfg = Config::parse(text).unwrap();
        assert_eq!(cfg.listen_port, 15000);
        assert_eq!(cfg.flood_normal_threshold, 7.5);
        assert!(cfg.enable_shadow);
    }

    #[test]
    fn shadow_enabled_without_geofence_keys_is_rejected() {
        let text = "network.trusted_gcs_ip=10.0.0.5\nsecurity.enable_shadow=true\n";
        let err = Config::parse(text).unwrap_err();
        assert!(matches!(err, AegisError::Config(_)));
    }

    #[test]
    fn malformed_line_is_rejected() {
        let text = "network.trusted_gcs_ip=10.0.0.5\nnotakeyvalue\n";
        assert!(Config::parse(text).is_err());
    }
}
