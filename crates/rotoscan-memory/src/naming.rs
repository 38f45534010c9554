//! Deterministic session log naming.
//!
//! The identifier encodes the three parameters that shape a sweep, so a
//! rerun with identical configuration lands on the same file:
//!
//! ```text
//! pcl_3d-zofs_<z_offset in cm>-piangle_<half-turn seconds>-fre_<frequency × 10>[-model_<n>].db
//! ```
//!
//! # Example
//!
//! ```rust
//! use rotoscan_memory::naming::LogName;
//!
//! let name = LogName::from_params(0.04, 41.0, 49.5);
//! assert_eq!(name.stem(), "pcl_3d-zofs_4-piangle_41-fre_495");
//! assert_eq!(name.file_name(Some(2)), "pcl_3d-zofs_4-piangle_41-fre_495-model_2.db");
//! ```

/// File extension of session logs.
pub const LOG_EXTENSION: &str = "db";

/// Integer-encoded sweep parameters identifying a session log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogName {
    pub z_offset_cm: i64,
    pub half_turn_seconds: i64,
    pub frequency_decihz: i64,
}

impl LogName {
    /// Encode the sweep parameters.  Each value is rounded to the nearest
    /// integer after scaling so float noise never changes the name.
    pub fn from_params(z_offset_m: f64, half_turn_seconds: f64, scan_frequency_hz: f64) -> Self {
        Self {
            z_offset_cm: (z_offset_m * 100.0).round() as i64,
            half_turn_seconds: half_turn_seconds.round() as i64,
            frequency_decihz: (scan_frequency_hz * 10.0).round() as i64,
        }
    }

    pub fn stem(&self) -> String {
        format!(
            "pcl_3d-zofs_{}-piangle_{}-fre_{}",
            self.z_offset_cm, self.half_turn_seconds, self.frequency_decihz
        )
    }

    /// File name of the log; `model` is set in multi-model mode.
    pub fn file_name(&self, model: Option<u32>) -> String {
        match model {
            Some(n) => format!("{}-model_{n}.{LOG_EXTENSION}", self.stem()),
            None => format!("{}.{LOG_EXTENSION}", self.stem()),
        }
    }
}

impl std::fmt::Display for LogName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.stem())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_configuration_gives_identical_name() {
        let a = LogName::from_params(0.04, 41.0, 49.5);
        let b = LogName::from_params(4.0 * 0.01, 41.0, 49.5);
        assert_eq!(a, b);
        assert_eq!(a.file_name(None), b.file_name(None));
    }

    #[test]
    fn scaled_values_are_rounded() {
        // 0.29 * 100 = 28.999999999999996
        let name = LogName::from_params(0.29, 41.0, 49.5);
        assert_eq!(name.z_offset_cm, 29);
        assert_eq!(name.frequency_decihz, 495);
    }

    #[test]
    fn different_parameters_give_different_names() {
        let base = LogName::from_params(0.04, 41.0, 49.5);
        assert_ne!(base, LogName::from_params(0.10, 41.0, 49.5));
        assert_ne!(base, LogName::from_params(0.04, 30.0, 49.5));
        assert_ne!(base, LogName::from_params(0.04, 41.0, 10.0));
    }

    #[test]
    fn single_model_file_name_has_no_suffix() {
        let name = LogName::from_params(0.0, 41.0, 49.5);
        assert_eq!(name.file_name(None), "pcl_3d-zofs_0-piangle_41-fre_495.db");
        assert_eq!(name.to_string(), "pcl_3d-zofs_0-piangle_41-fre_495");
    }
}
