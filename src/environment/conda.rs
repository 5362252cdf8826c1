//! Conda Environment Resolution
//!
//! Turns [`Settings`] into an [`EnvironmentConfig`]: the activation prefix,
//! the installation root and the absolute model paths for each
//! [`AssessKind`].
//!
//! # Activation
//!
//! The command line run for a batch is
//! `{conda_activation} && {activation} && {program} ...`.
//! When no activation is configured the tool is expected on the system
//! PATH. This works, but risks mixing the tool's Python runtime with
//! whatever else is installed and is not recommended.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info, warn};
use serde::Serialize;

use super::settings::Settings;
use crate::error::{AssessError, Result};
use crate::kind::AssessKind;

/// Supported cryoassess releases.
pub const VERSIONS: &[&str] = &["1.0.0"];

/// Release installed when none is requested.
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Upstream repository of the classifier.
pub const UPSTREAM_URL: &str = "https://github.com/cianfrocco-lab/Automatic-cryoEM-preprocessing.git";

/// Variables stripped from the subprocess environment.
///
/// An inherited PYTHONPATH leaks the caller's packages into the conda env.
const STRIPPED_VARS: &[&str] = &["PYTHONPATH"];

/// Conda environment name for a release.
pub fn env_name(version: &str) -> String {
    format!("cryoassess-{}", version)
}

/// Recommended activation command for the default release.
pub fn default_activation() -> String {
    format!("conda activate {}", env_name(DEFAULT_VERSION))
}

/// Fully resolved environment. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentConfig {
    activation: Option<String>,
    install_root: PathBuf,
    models: BTreeMap<AssessKind, PathBuf>,
    tool_dir: Option<PathBuf>,
}

impl EnvironmentConfig {
    /// Shell prefix entering the runtime, if any.
    pub fn activation_prefix(&self) -> Option<&str> {
        self.activation.as_deref()
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    /// Returns the model for `kind`, re-checking that it is still on disk.
    pub fn model_path(&self, kind: AssessKind) -> Result<&Path> {
        let path = self.models.get(&kind).ok_or_else(|| {
            AssessError::Configuration(format!(
                "No model resolved for {} (set {})",
                kind.label(),
                kind.model_var()
            ))
        })?;

        if !path.is_file() {
            return Err(AssessError::Configuration(format!(
                "Model file for {} not found: {} (set {})",
                kind.label(),
                path.display(),
                kind.model_var()
            )));
        }

        Ok(path)
    }

    /// Program invoked for `kind`.
    pub fn program(&self, kind: AssessKind) -> String {
        match self.tool_dir {
            Some(ref dir) => dir.join(kind.subcommand()).display().to_string(),
            None => kind.subcommand().to_string(),
        }
    }

    /// Variables to unset in the subprocess environment.
    pub fn unset_vars(&self) -> Vec<String> {
        STRIPPED_VARS.iter().map(|v| v.to_string()).collect()
    }
}

/// Resolves the environment, checking the models of `kinds` only.
///
/// # Errors
///
/// Returns [`AssessError::Configuration`] if a requested model or the
/// configured tool directory is missing. Nothing is spawned.
pub fn resolve(settings: &Settings, kinds: &[AssessKind]) -> Result<EnvironmentConfig> {
    let install_root = settings.install_root();
    debug!("Installation root: {}", install_root.display());

    let activation = activation_command(settings);
    match activation {
        Some(ref cmd) => info!("Activation: {}", cmd),
        None => {
            warn!("No activation command configured - expecting cryoassess on the system PATH");
            warn!("  This is not recommended; set {}", super::settings::CRYOASSESS_ENV_ACTIVATION);
            warn!("  Suggested: {}", default_activation());
        }
    }

    let mut models = BTreeMap::new();
    for kind in AssessKind::ALL {
        let path = resolve_against(&install_root, &settings.model_setting(kind));
        if kinds.contains(&kind) && !path.is_file() {
            return Err(AssessError::Configuration(format!(
                "Model file for {} not found: {} (set {})",
                kind.label(),
                path.display(),
                kind.model_var()
            )));
        }
        debug!("Model for {}: {}", kind, path.display());
        models.insert(kind, path);
    }

    let tool_dir = settings
        .tool_dir
        .as_ref()
        .map(|dir| resolve_against(&install_root, dir));

    if let Some(ref dir) = tool_dir {
        for kind in kinds {
            let program = dir.join(kind.subcommand());
            if !program.is_file() {
                return Err(AssessError::Configuration(format!(
                    "Tool '{}' not found in {}",
                    kind.subcommand(),
                    dir.display()
                )));
            }
        }
    } else if activation.is_none() {
        for kind in kinds {
            if find_on_path(kind.subcommand()).is_none() {
                warn!("'{}' is not on the system PATH", kind.subcommand());
            }
        }
    }

    Ok(EnvironmentConfig {
        activation,
        install_root,
        models,
        tool_dir,
    })
}

/// Resolves the environment, requiring every model to be present.
pub fn resolve_all(settings: &Settings) -> Result<EnvironmentConfig> {
    resolve(settings, &AssessKind::ALL)
}

/// Joins conda hook and environment activation.
fn activation_command(settings: &Settings) -> Option<String> {
    let parts: Vec<&str> = [
        settings.conda_activation.as_deref(),
        settings.activation.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(|s| s.trim().trim_end_matches("&&").trim_end_matches(';').trim())
    .filter(|s| !s.is_empty())
    .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" && "))
    }
}

fn resolve_against(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Looks a program up on the system PATH.
pub fn find_on_path(program: &str) -> Option<PathBuf> {
    let output = Command::new("which").arg(program).output().ok()?;
    if !output.status.success() {
        return None;
    }

    let path_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if path_str.is_empty() {
        None
    } else {
        Some(PathBuf::from(path_str))
    }
}

/// Renders the shell commands that install a cryoassess release.
///
/// The conda env gets the pinned CUDA stack the upstream models were
/// trained with; the package is installed in editable mode from a
/// checkout under the current directory. A marker file named
/// `cryoassess_{version}_installed` is touched on success.
///
/// # Example
///
/// ```
/// use cryorunner::environment::{conda::install_script, Settings};
///
/// let script = install_script("1.0.0", &Settings::default()).unwrap();
/// assert!(script.contains("conda create -y -n cryoassess-1.0.0"));
/// ```
pub fn install_script(version: &str, settings: &Settings) -> Result<String> {
    if !VERSIONS.contains(&version) {
        return Err(AssessError::InvalidParameter(format!(
            "Unsupported cryoassess version '{}' (supported: {})",
            version,
            VERSIONS.join(", ")
        )));
    }

    let env = env_name(version);
    let mut lines = Vec::new();

    match settings.conda_activation.as_deref().map(str::trim) {
        Some(hook) if !hook.is_empty() => lines.push(hook.to_string()),
        _ => lines.push("# conda must already be on PATH".to_string()),
    }

    lines.push(format!(
        "conda create -y -n {} -c anaconda python=3.6 pyqt=5 cudnn=7.1.2 intel-openmp=2019.4",
        env
    ));
    lines.push(format!("conda activate {}", env));
    lines.push(format!(
        "git clone {} cryoassess-master && cd cryoassess-master && git checkout master && cd ..",
        UPSTREAM_URL
    ));
    lines.push("pip install -e cryoassess-master[gpu]".to_string());
    lines.push(format!("touch cryoassess_{}_installed", version));

    let mut script = String::from("#!/bin/bash\nset -e\n");
    for line in lines {
        script.push_str(&line);
        script.push('\n');
    }
    Ok(script)
}
