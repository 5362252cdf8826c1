//! Environment Management Module
//!
//! Resolves how the external classifier is invoked: the conda activation
//! prefix, the installation root and the pretrained model files.

pub mod conda;
pub mod settings;

pub use conda::{install_script, resolve, resolve_all, EnvironmentConfig};
pub use settings::{Settings, CONFIG_PATH};
