//! Configuration Vault – reads/writes `~/.rotoscan/config.toml`.

use rotoscan_runtime::PipelineConfig;
use rotoscan_types::HeightAxis;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted scanner configuration stored in `~/.rotoscan/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Distance of the rotation axis from the scan origin, in metres.
    #[serde(default = "default_z_offset")]
    pub z_offset_m: f64,

    /// Seconds the turntable takes for half a turn.
    #[serde(default = "default_half_turn_seconds")]
    pub half_turn_seconds: f64,

    /// Scanner frame rate.
    #[serde(default = "default_scan_frequency")]
    pub scan_frequency_hz: f64,

    /// Sweep angle past which a session stops by itself.
    #[serde(default = "default_auto_stop_deg")]
    pub auto_stop_deg: f64,

    #[serde(default)]
    pub separate_models: bool,

    /// Directory session logs are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Session log holding the reference profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_log: Option<PathBuf>,

    #[serde(default)]
    pub reference_frame: usize,

    /// Capture the n-th received frame as reference instead of loading one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_capture_frame: Option<u64>,

    #[serde(default)]
    pub height_axis: HeightAxis,

    #[serde(default = "default_difference_threshold")]
    pub difference_threshold: f64,

    #[serde(default)]
    pub restrict_to_difference: bool,
}

fn default_z_offset() -> f64 {
    0.04
}
fn default_half_turn_seconds() -> f64 {
    41.0
}
fn default_scan_frequency() -> f64 {
    49.5
}
fn default_auto_stop_deg() -> f64 {
    181.0
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("3d_res")
}
fn default_difference_threshold() -> f64 {
    0.05
}

impl Default for Config {
    fn default() -> Self {
        Self {
            z_offset_m: default_z_offset(),
            half_turn_seconds: default_half_turn_seconds(),
            scan_frequency_hz: default_scan_frequency(),
            auto_stop_deg: default_auto_stop_deg(),
            separate_models: false,
            output_dir: default_output_dir(),
            reference_log: None,
            reference_frame: 0,
            reference_capture_frame: None,
            height_axis: HeightAxis::default(),
            difference_threshold: default_difference_threshold(),
            restrict_to_difference: false,
        }
    }
}

impl Config {
    /// Check the values the sweep geometry divides by or compares against.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.half_turn_seconds > 0.0) {
            return Err(format!("half_turn_seconds must be positive, got {}", self.half_turn_seconds));
        }
        if !(self.scan_frequency_hz > 0.0) {
            return Err(format!("scan_frequency_hz must be positive, got {}", self.scan_frequency_hz));
        }
        if !self.z_offset_m.is_finite() {
            return Err("z_offset_m must be finite".to_string());
        }
        if !(self.auto_stop_deg.is_finite() && self.auto_stop_deg > 0.0) {
            return Err(format!("auto_stop_deg must be positive and finite, got {}", self.auto_stop_deg));
        }
        if !(self.difference_threshold >= 0.0) {
            return Err(format!(
                "difference_threshold must not be negative, got {}",
                self.difference_threshold
            ));
        }
        Ok(())
    }

    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            z_offset_m: self.z_offset_m,
            half_turn_seconds: self.half_turn_seconds,
            scan_frequency_hz: self.scan_frequency_hz,
            auto_stop_deg: self.auto_stop_deg,
            separate_models: self.separate_models,
            output_dir: self.output_dir.clone(),
            reference_log: self.reference_log.clone(),
            reference_frame: self.reference_frame,
            reference_capture_frame: self.reference_capture_frame,
            height_axis: self.height_axis,
            difference_threshold: self.difference_threshold,
            restrict_to_difference: self.restrict_to_difference,
        }
    }
}

/// Return the path to `~/.rotoscan/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rotoscan").join("config.toml")
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Load `path` (or the default location), falling back to defaults with the
/// environment overrides applied when the file is absent.
pub fn resolve(path: Option<&Path>) -> Result<Config, String> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    let cfg = match load_from(&path)? {
        Some(cfg) => cfg,
        None => {
            let mut cfg = Config::default();
            apply_env_overrides(&mut cfg);
            cfg
        }
    };
    cfg.validate()?;
    Ok(cfg)
}

/// Apply `ROTOSCAN_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROTOSCAN_Z_OFFSET` | `z_offset_m` |
/// | `ROTOSCAN_OUTPUT_DIR` | `output_dir` |
/// | `ROTOSCAN_SEPARATE_MODELS` | `separate_models` |
/// | `ROTOSCAN_DIFF_THRESHOLD` | `difference_threshold` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides_from(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("ROTOSCAN_Z_OFFSET")
        && let Ok(z) = v.trim().parse::<f64>()
    {
        cfg.z_offset_m = z;
    }
    if let Some(v) = lookup("ROTOSCAN_OUTPUT_DIR")
        && !v.is_empty()
    {
        cfg.output_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("ROTOSCAN_SEPARATE_MODELS")
        && let Some(flag) = parse_flag(&v)
    {
        cfg.separate_models = flag;
    }
    if let Some(v) = lookup("ROTOSCAN_DIFF_THRESHOLD")
        && let Ok(t) = v.trim().parse::<f64>()
    {
        cfg.difference_threshold = t;
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Save the config to a specific path, creating its directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config::default();
        save_to(&cfg, &path).expect("save");

        let raw = fs::read_to_string(&path).expect("read");
        let loaded: Config = toml::from_str(&raw).expect("parse");
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.height_axis, HeightAxis::Y);
        assert!(!raw.contains("reference_log"));
    }

    #[test]
    fn partial_file_uses_field_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            z_offset_m = 0.1
            height_axis = "z"
            reference_capture_frame = 5
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.z_offset_m, 0.1);
        assert_eq!(cfg.height_axis, HeightAxis::Z);
        assert_eq!(cfg.reference_capture_frame, Some(5));
        assert_eq!(cfg.half_turn_seconds, 41.0);
        assert_eq!(cfg.scan_frequency_hz, 49.5);
        assert_eq!(cfg.output_dir, PathBuf::from("3d_res"));
    }

    #[test]
    fn config_path_points_to_rotoscan_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".rotoscan"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "z_offset_m = \"far\"").expect("write");
        let err = load_from(&path).expect_err("must fail");
        assert!(err.contains("Failed to parse config"));
    }

    #[test]
    fn overrides_replace_fields() {
        let mut cfg = Config::default();
        apply_overrides_from(
            &mut cfg,
            lookup(&[
                ("ROTOSCAN_Z_OFFSET", "0.1"),
                ("ROTOSCAN_OUTPUT_DIR", "/tmp/scans"),
                ("ROTOSCAN_SEPARATE_MODELS", "true"),
                ("ROTOSCAN_DIFF_THRESHOLD", "0.2"),
            ]),
        );
        assert_eq!(cfg.z_offset_m, 0.1);
        assert_eq!(cfg.output_dir, PathBuf::from("/tmp/scans"));
        assert!(cfg.separate_models);
        assert_eq!(cfg.difference_threshold, 0.2);
    }

    #[test]
    fn overrides_ignore_invalid_values() {
        let mut cfg = Config::default();
        apply_overrides_from(
            &mut cfg,
            lookup(&[
                ("ROTOSCAN_Z_OFFSET", "high"),
                ("ROTOSCAN_SEPARATE_MODELS", "maybe"),
                ("ROTOSCAN_OUTPUT_DIR", ""),
            ]),
        );
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn validate_rejects_degenerate_sweep() {
        assert!(Config::default().validate().is_ok());
        let cfg = Config {
            scan_frequency_hz: 0.0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = Config {
            half_turn_seconds: f64::NAN,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_unusable_auto_stop() {
        for auto_stop_deg in [f64::NAN, f64::INFINITY, 0.0, -10.0] {
            let cfg = Config {
                auto_stop_deg,
                ..Config::default()
            };
            let err = cfg.validate().expect_err("must fail");
            assert!(err.contains("auto_stop_deg"), "{err}");
        }
    }

    #[test]
    fn resolve_rejects_nan_auto_stop_from_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "auto_stop_deg = nan").expect("write");
        let err = resolve(Some(&path)).expect_err("must fail");
        assert!(err.contains("auto_stop_deg"), "{err}");
    }

    #[test]
    fn pipeline_config_carries_every_field() {
        let cfg = Config {
            separate_models: true,
            reference_frame: 3,
            restrict_to_difference: true,
            ..Config::default()
        };
        let pipeline = cfg.to_pipeline_config();
        assert!(pipeline.separate_models);
        assert_eq!(pipeline.reference_frame, 3);
        assert!(pipeline.restrict_to_difference);
        assert_eq!(pipeline.log_name().stem(), "pcl_3d-zofs_4-piangle_41-fre_495");
    }
}
