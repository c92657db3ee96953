// SPDX-License-Identifier: MIT OR Apache-2.0
//! Runner settings persisted as RON.
//!
//! ```ron
//! RunnerSettings(
//!     version: 1,
//!     log_filter: "pinflow=info",
//!     executor: ExecutorConfig(
//!         mode: Parallel,
//!         node_timeout: Some((secs: 30, nanos: 0)),
//!         max_concurrency: None,
//!     ),
//! )
//! ```

use crate::error::RunnerError;
use pinflow_graph::ExecutorConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current settings format version
pub const SETTINGS_FORMAT_VERSION: u32 = 1;

/// Log filter used when neither `RUST_LOG` nor the settings give one
pub const DEFAULT_LOG_FILTER: &str = "pinflow=info";

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// Complete runner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Settings format version
    pub version: u32,
    /// `tracing_subscriber::EnvFilter` directives
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Executor settings
    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_FORMAT_VERSION,
            log_filter: default_log_filter(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl RunnerSettings {
    /// Parse settings from RON text
    pub fn from_ron(content: &str) -> Result<Self, RunnerError> {
        let settings: RunnerSettings = ron::from_str(content)?;

        // Version check
        if settings.version > SETTINGS_FORMAT_VERSION {
            return Err(RunnerError::UnsupportedSettings {
                found: settings.version,
                supported: SETTINGS_FORMAT_VERSION,
            });
        }

        Ok(settings)
    }

    /// Encode as pretty RON text
    pub fn to_ron(&self) -> Result<String, RunnerError> {
        let config = ron::ser::PrettyConfig::default()
            .struct_names(true)
            .enumerate_arrays(false);
        Ok(ron::ser::to_string_pretty(self, config)?)
    }

    /// Load settings from a file
    pub fn load(path: &Path) -> Result<Self, RunnerError> {
        let content = std::fs::read_to_string(path).map_err(|e| RunnerError::io(path, e))?;
        let settings = Self::from_ron(&content)?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> Result<(), RunnerError> {
        let content = self.to_ron()?;
        std::fs::write(path, content).map_err(|e| RunnerError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinflow_graph::ExecutionMode;
    use std::time::Duration;

    #[test]
    fn test_default_settings() {
        let settings = RunnerSettings::default();
        assert_eq!(settings.version, SETTINGS_FORMAT_VERSION);
        assert_eq!(settings.log_filter, "pinflow=info");
        assert_eq!(settings.executor.mode, ExecutionMode::Sequential);
    }

    #[test]
    fn test_serialization() {
        let mut settings = RunnerSettings::default();
        settings.executor.mode = ExecutionMode::Parallel;
        settings.executor.node_timeout = Some(Duration::from_millis(1500));
        settings.executor.max_concurrency = Some(4);

        let ron_str = settings.to_ron().unwrap();
        assert!(ron_str.contains("RunnerSettings("));
        let loaded = RunnerSettings::from_ron(&ron_str).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let loaded = RunnerSettings::from_ron("(version: 1)").unwrap();
        assert_eq!(loaded, RunnerSettings::default());

        let loaded =
            RunnerSettings::from_ron("(version: 1, executor: (mode: Parallel))").unwrap();
        assert_eq!(loaded.executor.mode, ExecutionMode::Parallel);
        assert_eq!(loaded.executor.node_timeout, None);
    }

    #[test]
    fn test_newer_version_rejected() {
        let err = RunnerSettings::from_ron("(version: 99)").unwrap_err();
        assert!(matches!(
            err,
            RunnerError::UnsupportedSettings { found: 99, .. }
        ));
    }

    #[test]
    fn test_invalid_ron() {
        let err = RunnerSettings::from_ron("(version: ").unwrap_err();
        assert!(matches!(err, RunnerError::SettingsParse(_)));
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!(
            "pinflow-settings-{}-save-load.ron",
            std::process::id()
        ));
        let mut settings = RunnerSettings::default();
        settings.log_filter = "pinflow=debug".into();
        settings.save(&path).unwrap();
        let loaded = RunnerSettings::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, settings);

        let err = RunnerSettings::load(&path).unwrap_err();
        assert!(matches!(err, RunnerError::Io { .. }));
    }
}
