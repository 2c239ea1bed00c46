use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::TabwireConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["tabwire.toml", "tabwire.json"];

/// Load config from the given path (TOML or JSON, by extension).
pub fn load_config(path: &Path) -> Result<TabwireConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./tabwire.{toml,json}` (project-local)
/// 2. `<user config dir>/tabwire.{toml,json}`
///
/// Returns `TabwireConfig::default()` if no file is found or it fails to load.
pub fn discover_and_load() -> TabwireConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    TabwireConfig::default()
}

/// Load the effective configuration.
///
/// An explicit path must load successfully; discovery falls back to defaults.
/// Environment overrides are applied last.
pub fn resolve(explicit: Option<&Path>) -> Result<TabwireConfig> {
    let mut config = match explicit {
        Some(path) => load_config(path)?,
        None => discover_and_load(),
    };
    apply_env_overrides(&mut config)?;
    Ok(config)
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/tabwire/` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "tabwire").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> Result<TabwireConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    let parse_err = |message: String| Error::Parse {
        path: path.to_path_buf(),
        message,
    };

    match ext {
        "toml" => toml::from_str(raw).map_err(|e| parse_err(e.to_string())),
        "json" => serde_json::from_str(raw).map_err(|e| parse_err(e.to_string())),
        _ => Err(Error::UnsupportedFormat(ext.to_string())),
    }
}

// ── Environment overrides ───────────────────────────────────────────────────

/// Apply `TABWIRE_*` environment variables on top of a loaded config.
pub fn apply_env_overrides(config: &mut TabwireConfig) -> Result<()> {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

fn apply_env_overrides_with(
    config: &mut TabwireConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(v) = lookup("TABWIRE_PEER_HOST") {
        config.peer.host = v;
    }
    if let Some(v) = lookup("TABWIRE_PEER_PORT") {
        config.peer.port = parse_override("TABWIRE_PEER_PORT", &v)?;
    }
    if let Some(v) = lookup("TABWIRE_FRAMING") {
        config.server.framing = parse_override("TABWIRE_FRAMING", &v)?;
    }
    if let Some(v) = lookup("TABWIRE_STRICT_PEER") {
        config.server.strict_peer = parse_bool("TABWIRE_STRICT_PEER", &v)?;
    }
    if let Some(v) = lookup("TABWIRE_REQUEST_TIMEOUT_MS") {
        config.peer.request_timeout_ms = parse_override("TABWIRE_REQUEST_TIMEOUT_MS", &v)?;
    }
    if let Some(v) = lookup("TABWIRE_HANDSHAKE_TIMEOUT_MS") {
        config.peer.handshake_timeout_ms = parse_override("TABWIRE_HANDSHAKE_TIMEOUT_MS", &v)?;
    }
    Ok(())
}

fn parse_override<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| Error::InvalidOverride {
        name,
        value: value.to_string(),
    })
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidOverride {
            name,
            value: value.to_string(),
        }),
    }
}
