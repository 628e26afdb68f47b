use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::driver::{DriverSettings, Pacing, default_workflow};
use crate::matcher::MatchPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Contact spreadsheet, rewritten after every processed row.
    pub sheet_path: PathBuf,
    pub coordinates_path: PathBuf,
    /// Where the recorder writes reference templates.
    pub templates_dir: PathBuf,
    /// Screenshots saved when a verification finally fails.
    pub debug_dir: PathBuf,
    pub log_dir: PathBuf,
    pub phone_column: String,
    pub status_column: String,
    pub threshold: f64,
    pub max_retries: u32,
    pub failure_limit: u32,
    pub required_steps: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sheet_path: PathBuf::from("phone.xlsx"),
            coordinates_path: PathBuf::from("coordinates.json"),
            templates_dir: PathBuf::from("templates"),
            debug_dir: PathBuf::from("debug_screenshots"),
            log_dir: PathBuf::from("logs"),
            phone_column: "phone".into(),
            status_column: "status".into(),
            threshold: 0.6,
            max_retries: 2,
            failure_limit: 2,
            required_steps: 5,
            min_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(6),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source, falling back to
    /// [`Config::default`] for anything unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let path = |name: &str, default: PathBuf| lookup(name).map(PathBuf::from).unwrap_or(default);

        let threshold = parsed(&lookup, "BECKON_THRESHOLD", defaults.threshold)?;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(invalid("BECKON_THRESHOLD", threshold, "must be within 0.0..=1.0"));
        }

        let max_retries = parsed(&lookup, "BECKON_MAX_RETRIES", defaults.max_retries)?;
        if max_retries == 0 {
            return Err(invalid("BECKON_MAX_RETRIES", max_retries, "at least one attempt required"));
        }

        let failure_limit = parsed(&lookup, "BECKON_FAILURE_LIMIT", defaults.failure_limit)?;
        if failure_limit == 0 {
            return Err(invalid("BECKON_FAILURE_LIMIT", failure_limit, "must be positive"));
        }

        let required_steps = parsed(&lookup, "BECKON_REQUIRED_STEPS", defaults.required_steps)?;
        if required_steps == 0 || required_steps > default_workflow().len() {
            return Err(invalid(
                "BECKON_REQUIRED_STEPS",
                required_steps,
                "must be between 1 and the number of workflow steps",
            ));
        }

        let min_delay = seconds(&lookup, "BECKON_MIN_DELAY_SECS", defaults.min_delay)?;
        let max_delay = seconds(&lookup, "BECKON_MAX_DELAY_SECS", defaults.max_delay)?;
        if max_delay < min_delay {
            return Err(ConfigError::Inconsistent(format!(
                "delay range {min_delay:?}..{max_delay:?} is empty"
            )));
        }

        Ok(Config {
            sheet_path: path("BECKON_SHEET", defaults.sheet_path),
            coordinates_path: path("BECKON_COORDINATES", defaults.coordinates_path),
            templates_dir: path("BECKON_TEMPLATES_DIR", defaults.templates_dir),
            debug_dir: path("BECKON_DEBUG_DIR", defaults.debug_dir),
            log_dir: path("BECKON_LOG_DIR", defaults.log_dir),
            phone_column: lookup("BECKON_PHONE_COLUMN").unwrap_or(defaults.phone_column),
            status_column: lookup("BECKON_STATUS_COLUMN").unwrap_or(defaults.status_column),
            threshold,
            max_retries,
            failure_limit,
            required_steps,
            min_delay,
            max_delay,
        })
    }

    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy {
            threshold: self.threshold,
            max_retries: self.max_retries,
            ..MatchPolicy::default()
        }
    }

    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            workflow: default_workflow().into_iter().take(self.required_steps).collect(),
            failure_limit: self.failure_limit,
            pacing: Pacing {
                pre_check: self.min_delay..=self.max_delay,
                ..Pacing::default()
            },
        }
    }
}

fn parsed<T, F>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
            name: name.into(),
            value: raw,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Fractional seconds; negative, non-finite and out-of-range values are
/// rejected rather than reaching `Duration`.
fn seconds<F>(lookup: &F, name: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs = parsed(lookup, name, default.as_secs_f64())?;
    Duration::try_from_secs_f64(secs).map_err(|e| invalid(name, secs, &e.to_string()))
}

fn invalid(name: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.sheet_path, PathBuf::from("phone.xlsx"));
        assert_eq!(config.coordinates_path, PathBuf::from("coordinates.json"));
        assert_eq!(config.threshold, 0.6);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.failure_limit, 2);
        assert_eq!(config.required_steps, 5);
        assert_eq!(config.min_delay, Duration::from_secs(3));
        assert_eq!(config.max_delay, Duration::from_secs(6));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("BECKON_SHEET", "/tmp/contacts.xlsx"),
            ("BECKON_THRESHOLD", "0.75"),
            ("BECKON_MAX_RETRIES", "4"),
            ("BECKON_PHONE_COLUMN", "mobile"),
            ("BECKON_MIN_DELAY_SECS", "0.5"),
            ("BECKON_MAX_DELAY_SECS", "1"),
        ]))
        .unwrap();
        assert_eq!(config.sheet_path, PathBuf::from("/tmp/contacts.xlsx"));
        assert_eq!(config.threshold, 0.75);
        assert_eq!(config.max_retries, 4);
        assert_eq!(config.phone_column, "mobile");
        assert_eq!(config.min_delay, Duration::from_millis(500));

        let policy = config.match_policy();
        assert_eq!(policy.threshold, 0.75);
        assert_eq!(policy.max_retries, 4);
    }

    #[test]
    fn test_required_steps_truncates_workflow() {
        let config = Config::from_lookup(lookup_from(&[("BECKON_REQUIRED_STEPS", "4")])).unwrap();
        let settings = config.driver_settings();
        let labels: Vec<_> = settings.workflow.iter().map(|s| s.label).collect();
        assert_eq!(labels, ["add-button", "input-field", "add-confirm", "send-invite"]);
        assert_eq!(settings.failure_limit, 2);
    }

    #[test]
    fn test_rejects_unparsable_threshold() {
        let err = Config::from_lookup(lookup_from(&[("BECKON_THRESHOLD", "high")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref name, .. } if name == "BECKON_THRESHOLD"));
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        assert!(Config::from_lookup(lookup_from(&[("BECKON_THRESHOLD", "1.5")])).is_err());
    }

    #[test]
    fn test_rejects_zero_retries() {
        assert!(Config::from_lookup(lookup_from(&[("BECKON_MAX_RETRIES", "0")])).is_err());
    }

    #[test]
    fn test_rejects_inverted_delay_range() {
        let err = Config::from_lookup(lookup_from(&[
            ("BECKON_MIN_DELAY_SECS", "5"),
            ("BECKON_MAX_DELAY_SECS", "2"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(_)));
    }

    #[test]
    fn test_rejects_unrepresentable_delays() {
        for (name, value) in [
            ("BECKON_MAX_DELAY_SECS", "inf"),
            ("BECKON_MIN_DELAY_SECS", "NaN"),
            ("BECKON_MAX_DELAY_SECS", "1e30"),
            ("BECKON_MIN_DELAY_SECS", "-1"),
        ] {
            let err = Config::from_lookup(lookup_from(&[(name, value)])).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { name: ref n, .. } if n == name),
                "{name}={value}: {err}"
            );
        }
    }

    #[test]
    fn test_rejects_too_many_required_steps() {
        assert!(Config::from_lookup(lookup_from(&[("BECKON_REQUIRED_STEPS", "9")])).is_err());
    }
}
