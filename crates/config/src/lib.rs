//! Configuration loading, env substitution, overrides, and validation.
//!
//! Config files: `tabwire.toml` or `tabwire.json`, searched in `./` then the
//! user config directory (`~/.config/tabwire/` on Linux).
//!
//! Supports `${ENV_VAR}` substitution in the raw file and `TABWIRE_*`
//! environment overrides applied after parsing.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config, resolve},
    schema::{PeerConfig, ServerConfig, TabwireConfig},
    tabwire_transport::Framing,
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
