//! Per-controller configuration.
//!
//! A [`Config`] starts from its defaults, is optionally read from a JSON file,
//! and is finally overridden by environment variables named after the
//! controller, e.g. `REGISTRY_CONTROLLER_CLASSNAME` for the `registry-controller`
//! prefix. Keys are the lowercased field names in both sources, so a file
//! holds `{ "classname": "blue" }`.

use std::collections::HashMap;
use std::time::Duration;

use ::config::{Environment, File, FileFormat};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Wait before a requeue when a reconciliation asks for one without a delay.
pub const DEFAULT_REQUEUE_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Owners annotated with another controller class are ignored.
    #[serde(rename = "classname")]
    pub class_name: String,
    /// Distinct owners reconciled at the same time.
    #[serde(rename = "concurrentreconciles")]
    pub concurrent_reconciles: usize,
    /// Children of one owner applied at the same time.
    #[serde(rename = "applyworkers")]
    pub apply_workers: usize,
    #[serde(rename = "requeuewait", with = "seconds")]
    pub requeue_wait: Duration,
    #[serde(rename = "reconciletimeout", with = "seconds")]
    pub reconcile_timeout: Duration,
    /// Name written to the `operator` label of every child.
    #[serde(rename = "operatorname")]
    pub operator_name: String,
    /// Written to the `operator/version` annotation of pod templates.
    #[serde(rename = "operatorversion")]
    pub operator_version: String,
    /// Directory holding the configuration templates of the components.
    pub templates: Option<Utf8PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            class_name: String::new(),
            concurrent_reconciles: 1,
            apply_workers: 4,
            requeue_wait: DEFAULT_REQUEUE_WAIT,
            reconcile_timeout: Duration::from_secs(60),
            operator_name: String::from("harbor-operator"),
            operator_version: env!("CARGO_PKG_VERSION").to_string(),
            templates: None,
        }
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// `registry-controller` becomes `REGISTRY_CONTROLLER`.
fn env_prefix(prefix: &str) -> String {
    prefix
        .chars()
        .map(|c| match c {
            '-' | '.' | ' ' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

impl Config {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(prefix: &str, path: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        Self::load_from(prefix, path, None)
    }

    /// Like [`Config::load`], reading variables from `env` instead of the
    /// process environment when it is given.
    pub fn load_from(
        prefix: &str,
        path: Option<&Utf8Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::new(path.as_str(), FileFormat::Json));
        }

        let prefix = env_prefix(prefix);
        builder = builder.add_source(
            Environment::with_prefix(&prefix)
                .try_parsing(true)
                .source(env.map(|env| env.into_iter().collect())),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate(&prefix)?;

        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    fn validate(&self, prefix: &str) -> Result<(), ConfigError> {
        if self.concurrent_reconciles == 0 {
            return Err(ConfigError::InvalidValue {
                variable: format!("{prefix}_CONCURRENTRECONCILES"),
                value: String::from("0"),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let config = Config::load_from("portal", None, env(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.requeue_wait, Duration::from_secs(2));
        assert_eq!(config.concurrent_reconciles, 1);
        assert!(config.class_name.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let vars = env(&[
            ("REGISTRY_CONTROLLER_CLASSNAME", "blue"),
            ("REGISTRY_CONTROLLER_CONCURRENTRECONCILES", "8"),
            ("REGISTRY_CONTROLLER_REQUEUEWAIT", "0.5"),
            ("PORTAL_CLASSNAME", "red"),
        ]);

        let config = Config::load_from("registry-controller", None, vars).unwrap();

        assert_eq!(config.class_name, "blue");
        assert_eq!(config.concurrent_reconciles, 8);
        assert_eq!(config.requeue_wait, Duration::from_millis(500));
    }

    #[test]
    fn test_invalid_override() {
        let vars = env(&[("PORTAL_APPLYWORKERS", "many")]);
        let error = Config::load_from("portal", None, vars).unwrap_err();
        assert!(matches!(error, ConfigError::Source(_)));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let vars = env(&[("PORTAL_CONCURRENTRECONCILES", "0")]);
        let error = Config::load_from("portal", None, vars).unwrap_err();

        assert!(matches!(
            error,
            ConfigError::InvalidValue { ref variable, .. } if variable == "PORTAL_CONCURRENTRECONCILES"
        ));
    }

    #[test]
    fn test_env_wins_over_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{ "classname": "green", "reconciletimeout": 5, "applyworkers": 2, "templates": "/srv/templates" }}"#
        )
        .unwrap();

        let path = Utf8Path::from_path(file.path()).unwrap();
        let vars = env(&[("JOBSERVICE_APPLYWORKERS", "6")]);
        let config = Config::load_from("jobservice", Some(path), vars).unwrap();

        assert_eq!(config.class_name, "green");
        assert_eq!(config.reconcile_timeout, Duration::from_secs(5));
        assert_eq!(config.apply_workers, 6);
        assert_eq!(config.requeue_wait, DEFAULT_REQUEUE_WAIT);
        assert_eq!(config.templates.as_deref(), Some(Utf8Path::new("/srv/templates")));
    }

    #[test]
    fn test_missing_file() {
        let path = Utf8Path::new("/nonexistent/config.json");
        let error = Config::load_from("portal", Some(path), env(&[])).unwrap_err();
        assert!(matches!(error, ConfigError::Source(_)));
    }
}
