use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest
/// priority. Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("/etc/pideck/config.yaml"));
    paths.push(PathBuf::from("/etc/pideck/config.yml"));

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/pideck/config.yaml"));
        paths.push(home.join(".config/pideck/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("pideck/config.yaml"));
        paths.push(cfg.join("pideck/config.yml"));
    }

    paths.push(PathBuf::from(".pideck/config.yaml"));
    paths.push(PathBuf::from(".pideck/config.yml"));
    paths.push(PathBuf::from(".pideck.yaml"));
    paths.push(PathBuf::from(".pideck.yml"));

    paths
}

/// Load configuration by merging every discovered YAML layer, an optional
/// explicit path (`--config`), and then environment variable overrides
/// (`PIDECK_LISTEN`, `PIDECK_STATE_DIR`, `PIDECK_ALLOWED_ROOTS`), in that
/// priority order.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let mut config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty())
    {
        Config::default()
    } else {
        serde_yaml::from_value(merged).context("deserializing merged config")?
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Environment variables win over every file layer — same precedence order
/// as the CLI flags that shadow them in `pideck`'s root binary.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(addr) = std::env::var("PIDECK_LISTEN") {
        debug!(addr, "overriding listen_addr from PIDECK_LISTEN");
        config.listen_addr = addr;
    }
    if let Ok(dir) = std::env::var("PIDECK_STATE_DIR") {
        debug!(dir, "overriding state_dir from PIDECK_STATE_DIR");
        config.state_dir = PathBuf::from(dir);
    }
    if let Ok(roots) = std::env::var("PIDECK_ALLOWED_ROOTS") {
        config.allowed_roots = roots
            .split(':')
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
    }
}

/// Deep-merge `src` into `dst`; `src` wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}
