//! Run settings
//!
//! Profiles fix their stages and thresholds in code. The settings here only
//! describe *where* and *how* traffic is sent: target service, TLS policy,
//! client timeout, artifact root and driver resolution.
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML
//! file, `DOCLOAD_*` environment variables. The CLI applies its own flags on
//! top of the loaded value.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LoadTestError, Result};

/// Environment variable prefix (`DOCLOAD_BASE_URL`, `DOCLOAD_SEED`, ...)
pub const ENV_PREFIX: &str = "DOCLOAD";

/// Settings shared by every profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Base URL of documentos-service
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Accept the self-signed certificate of test environments
    #[serde(default = "default_insecure_skip_tls_verify")]
    pub insecure_skip_tls_verify: bool,

    /// Client-side request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Directory result artifacts are written under
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Driver schedule resolution in milliseconds
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,

    /// Seed for subject/format sampling; entropy when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_base_url() -> String {
    "https://documentos.universidad.localhost".to_string()
}

fn default_insecure_skip_tls_verify() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_results_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_tick_millis() -> u64 {
    100
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            insecure_skip_tls_verify: default_insecure_skip_tls_verify(),
            request_timeout_secs: default_request_timeout_secs(),
            results_dir: default_results_dir(),
            tick_millis: default_tick_millis(),
            seed: None,
        }
    }
}

impl RunSettings {
    /// Load settings from an optional TOML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX).try_parsing(true),
        );

        let settings: RunSettings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(LoadTestError::InvalidSettings(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.tick_millis == 0 {
            return Err(LoadTestError::InvalidSettings(
                "tick_millis must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(LoadTestError::InvalidSettings(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = RunSettings::default();
        assert!(settings.validate().is_ok());
        assert!(settings.insecure_skip_tls_verify);
        assert_eq!(settings.tick(), Duration::from_millis(100));
        assert_eq!(settings.base_url(), "https://documentos.universidad.localhost");
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "base_url = \"http://127.0.0.1:5000/\"").unwrap();
        writeln!(file, "request_timeout_secs = 5").unwrap();
        writeln!(file, "seed = 7").unwrap();

        let settings = RunSettings::load(Some(file.path())).unwrap();
        assert_eq!(settings.base_url(), "http://127.0.0.1:5000");
        assert_eq!(settings.request_timeout(), Duration::from_secs(5));
        assert_eq!(settings.seed, Some(7));
        // Untouched keys keep their defaults
        assert_eq!(settings.tick_millis, 100);
        assert!(settings.insecure_skip_tls_verify);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = RunSettings::load(Some(Path::new("/nonexistent/docload.toml")));
        assert!(matches!(result, Err(LoadTestError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let settings = RunSettings {
            base_url: "documentos.localhost".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(LoadTestError::InvalidSettings(_))
        ));

        let settings = RunSettings {
            tick_millis: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
