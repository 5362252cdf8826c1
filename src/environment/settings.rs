//! Configuration Variables
//!
//! Settings are layered: built-in defaults, then an optional YAML file,
//! then environment variables. Empty variables count as unset.
//!
//! # Settings File Resolution
//!
//! The YAML file is located in the following order:
//! 1. `$CRYORUNNER_CONFIG`
//! 2. Production path: `cryorunner.yaml` next to the executable
//! 3. Current working directory: `cryorunner.yaml`

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::kind::AssessKind;

pub const CRYOASSESS_ENV_ACTIVATION: &str = "CRYOASSESS_ENV_ACTIVATION";
pub const CONDA_ACTIVATION_CMD: &str = "CONDA_ACTIVATION_CMD";
pub const CRYOASSESS_HOME: &str = "CRYOASSESS_HOME";
pub const CRYOASSESS_MODEL_MIC: &str = "CRYOASSESS_MODEL_MIC";
pub const CRYOASSESS_MODEL_2D: &str = "CRYOASSESS_MODEL_2D";
pub const CRYOASSESS_TOOL_DIR: &str = "CRYOASSESS_TOOL_DIR";
pub const CRYORUNNER_CONFIG: &str = "CRYORUNNER_CONFIG";

/// Installation root used when `CRYOASSESS_HOME` is unset.
pub const DEFAULT_INSTALL_ROOT: &str = "software/em";

const CONFIG_FILE_NAME: &str = "cryorunner.yaml";

/// Lazily-initialized path to the settings file.
pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    // Priority 1: explicit override
    if let Some(path) = non_empty(std::env::var(CRYORUNNER_CONFIG).ok()) {
        info!("Using settings from ${}: {}", CRYORUNNER_CONFIG, path);
        return PathBuf::from(path);
    }

    // Priority 2: production install (next to executable)
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let prod_path = exe_dir.join(CONFIG_FILE_NAME);
            if prod_path.exists() {
                info!("Using production settings: {}", prod_path.display());
                return prod_path;
            }
        }
    }

    // Priority 3: current working directory
    let cwd_path = PathBuf::from(CONFIG_FILE_NAME);
    debug!("Using CWD settings: {}", cwd_path.display());
    cwd_path
});

/// Raw configuration values, before any path is resolved.
///
/// # Example YAML Format
///
/// ```yaml
/// activation: conda activate cryoassess-1.0.0
/// conda_activation: eval "$(/opt/miniconda3/bin/conda shell.bash hook)"
/// install_root: /opt/scipion/software/em
/// micrograph_model: cryoassess-models/micassess_051419.h5
/// class_model: /data/models/2dassess_062119.h5
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Command that enters the isolated runtime (e.g. `conda activate ...`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation: Option<String>,

    /// Conda shell hook evaluated before `activation`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conda_activation: Option<String>,

    /// Root directory of the tool installation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_root: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub micrograph_model: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_model: Option<PathBuf>,

    /// Directory holding the `micassess`/`2dassess` executables
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_dir: Option<PathBuf>,
}

impl Settings {
    /// Loads settings from the default file location and the process environment.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Loads settings from `path` (or the default location) and the process environment.
    ///
    /// An explicitly given file must exist; the default one is optional.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None if CONFIG_PATH.exists() => Self::from_file(&CONFIG_PATH)?,
            None => Self::default(),
        };
        settings.apply_lookup(|name| std::env::var(name).ok());
        Ok(settings)
    }

    /// Parses a YAML settings file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let settings: Settings = serde_yaml::from_str(&content)?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Builds settings from a variable lookup only.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        settings.apply_lookup(lookup);
        settings
    }

    /// Overrides fields with any non-empty variable returned by `lookup`.
    pub fn apply_lookup<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| non_empty(lookup(name));

        if let Some(v) = get(CRYOASSESS_ENV_ACTIVATION) {
            self.activation = Some(v);
        }
        if let Some(v) = get(CONDA_ACTIVATION_CMD) {
            self.conda_activation = Some(v);
        }
        if let Some(v) = get(CRYOASSESS_HOME) {
            self.install_root = Some(PathBuf::from(v));
        }
        if let Some(v) = get(CRYOASSESS_MODEL_MIC) {
            self.micrograph_model = Some(PathBuf::from(v));
        }
        if let Some(v) = get(CRYOASSESS_MODEL_2D) {
            self.class_model = Some(PathBuf::from(v));
        }
        if let Some(v) = get(CRYOASSESS_TOOL_DIR) {
            self.tool_dir = Some(PathBuf::from(v));
        }
    }

    /// Installation root, falling back to [`DEFAULT_INSTALL_ROOT`].
    pub fn install_root(&self) -> PathBuf {
        self.install_root
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_INSTALL_ROOT))
    }

    /// Model path as configured (unresolved), falling back to the kind's default.
    pub fn model_setting(&self, kind: AssessKind) -> PathBuf {
        let configured = match kind {
            AssessKind::Micrograph => self.micrograph_model.as_ref(),
            AssessKind::TwoDClass => self.class_model.as_ref(),
        };
        configured
            .cloned()
            .unwrap_or_else(|| PathBuf::from(kind.default_model()))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(|_| None);
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.install_root(), PathBuf::from("software/em"));
        assert_eq!(
            settings.model_setting(AssessKind::Micrograph),
            PathBuf::from("cryoassess-models/micassess_051419.h5")
        );
    }

    #[test]
    fn test_lookup_overrides() {
        let settings = Settings::from_lookup(lookup_from(&[
            (CRYOASSESS_ENV_ACTIVATION, "conda activate cryoassess-1.0.0"),
            (CRYOASSESS_HOME, "/opt/em"),
            (CRYOASSESS_MODEL_2D, "/models/2d.h5"),
        ]));

        assert_eq!(
            settings.activation.as_deref(),
            Some("conda activate cryoassess-1.0.0")
        );
        assert_eq!(settings.install_root(), PathBuf::from("/opt/em"));
        assert_eq!(
            settings.model_setting(AssessKind::TwoDClass),
            PathBuf::from("/models/2d.h5")
        );
    }

    #[test]
    fn test_empty_variable_is_unset() {
        let settings = Settings::from_lookup(lookup_from(&[
            (CRYOASSESS_ENV_ACTIVATION, "   "),
            (CRYOASSESS_HOME, ""),
        ]));
        assert!(settings.activation.is_none());
        assert!(settings.install_root.is_none());
    }

    #[test]
    fn test_file_then_environment() {
        use tempfile::tempdir;

        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("cryorunner.yaml");
        fs::write(
            &path,
            "activation: conda activate from-file\ninstall_root: /from/file\n",
        )
        .unwrap();

        let mut settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.activation.as_deref(), Some("conda activate from-file"));

        settings.apply_lookup(lookup_from(&[(CRYOASSESS_HOME, "/from/env")]));
        assert_eq!(settings.install_root(), PathBuf::from("/from/env"));
        assert_eq!(settings.activation.as_deref(), Some("conda activate from-file"));
    }

    #[test]
    fn test_from_file_rejects_bad_yaml() {
        use tempfile::tempdir;

        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("bad.yaml");
        fs::write(&path, "install_root: [unterminated").unwrap();

        assert!(Settings::from_file(&path).is_err());
    }

    #[test]
    fn test_load_from_missing_explicit_file() {
        let result = Settings::load_from(Some(Path::new("/nonexistent/cryorunner.yaml")));
        assert!(result.is_err());
    }
}
