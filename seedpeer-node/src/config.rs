//! Load config from file and environment, then apply command-line overrides.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::debug;
use seedpeer_core::{NodeConfig, PeerAddr};
use serde::Deserialize;

/// Node configuration. File: ~/.config/seedpeer/config.toml or /etc/seedpeer/config.toml.
/// Env overrides: SEEDPEER_LISTEN_ADDR, SEEDPEER_PRIVATE_KEY, SEEDPEER_INITIAL_PEER_LIST.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listen address (default 0.0.0.0:0, any free port).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Hex-encoded 32 byte secret key. A new one is generated when absent.
    #[serde(default)]
    pub private_key: Option<String>,
    /// Seed addresses, tried in order.
    #[serde(default)]
    pub initial_peer_list: Vec<String>,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 0))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            private_key: None,
            initial_peer_list: Vec::new(),
        }
    }
}

impl Config {
    /// Command-line values win over everything loaded before.
    pub fn apply_overrides(
        &mut self,
        private_key: Option<String>,
        initial_peer_list: Option<&str>,
        listen_addr: Option<SocketAddr>,
    ) {
        if let Some(k) = private_key {
            self.private_key = Some(k);
        }
        if let Some(list) = initial_peer_list {
            self.initial_peer_list = split_peer_list(list);
        }
        if let Some(addr) = listen_addr {
            self.listen_addr = addr;
        }
    }

    /// Validate key material and seed addresses. Any failure stops startup.
    pub fn node_config(&self) -> anyhow::Result<NodeConfig> {
        let secret_key = match self.private_key.as_deref().map(str::trim) {
            Some(hex_key) if !hex_key.is_empty() => hex::decode(hex_key)
                .context("while parsing provided private key hex string")?,
            _ => Vec::new(),
        };
        for address in &self.initial_peer_list {
            address
                .parse::<PeerAddr>()
                .with_context(|| format!("invalid initial peer address {address:?}"))?;
        }
        Ok(NodeConfig {
            secret_key,
            initial_peers: self.initial_peer_list.clone(),
            listen_addr: self.listen_addr,
            ..NodeConfig::default()
        })
    }
}

/// Comma separated list, blanks dropped.
pub fn split_peer_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load config: merge default, then config file (if present), then env vars.
/// A file that exists but does not parse, or a bad env value, is an error.
pub fn load() -> anyhow::Result<Config> {
    load_from(&config_paths(), |key| std::env::var(key).ok())
}

fn load_from(paths: &[PathBuf], var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
    let mut c = match paths.iter().find(|p| p.exists()) {
        Some(p) => read_file(p)?,
        None => Config::default(),
    };
    apply_env(&mut c, var)?;
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
    if let Some(s) = var("SEEDPEER_LISTEN_ADDR") {
        c.listen_addr = s
            .parse()
            .with_context(|| format!("invalid SEEDPEER_LISTEN_ADDR {s:?}"))?;
    }
    if let Some(s) = var("SEEDPEER_PRIVATE_KEY") {
        c.private_key = Some(s);
    }
    if let Some(s) = var("SEEDPEER_INITIAL_PEER_LIST") {
        c.initial_peer_list = split_peer_list(&s);
    }
    Ok(())
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/seedpeer/config.toml"));
    }
    out.push(PathBuf::from("/etc/seedpeer/config.toml"));
    out
}

fn read_file(path: &Path) -> anyhow::Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let c = toml::from_str(&text)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    debug!("loaded config from {}", path.display());
    Ok(c)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn file_fields_default_when_missing() {
        let c: Config = toml::from_str("").unwrap();
        assert_eq!(c.listen_addr, default_listen_addr());
        assert!(c.private_key.is_none());
        assert!(c.initial_peer_list.is_empty());

        let c: Config = toml::from_str(
            r#"
            listen_addr = "127.0.0.1:4001"
            initial_peer_list = ["/ip4/10.0.0.1/tcp/4001/p2p/aa"]
            "#,
        )
        .unwrap();
        assert_eq!(c.listen_addr, "127.0.0.1:4001".parse::<SocketAddr>().unwrap());
        assert_eq!(c.initial_peer_list.len(), 1);
    }

    #[test]
    fn unknown_file_keys_rejected() {
        assert!(toml::from_str::<Config>("proxy_port = 3128").is_err());
    }

    #[test]
    fn env_then_cli_precedence() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SEEDPEER_LISTEN_ADDR", "127.0.0.1:5000"),
            ("SEEDPEER_INITIAL_PEER_LIST", "/a, /b,,"),
            ("SEEDPEER_PRIVATE_KEY", "abcd"),
        ]);
        let mut c = Config::default();
        apply_env(&mut c, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(c.listen_addr.port(), 5000);
        assert_eq!(c.initial_peer_list, vec!["/a", "/b"]);
        assert_eq!(c.private_key.as_deref(), Some("abcd"));

        c.apply_overrides(None, Some("/c"), None);
        assert_eq!(c.initial_peer_list, vec!["/c"]);
        assert_eq!(c.private_key.as_deref(), Some("abcd"));
        assert_eq!(c.listen_addr.port(), 5000);
    }

    #[test]
    fn bad_env_listen_addr_is_an_error() {
        let mut c = Config::default();
        let err = apply_env(&mut c, |k| (k == "SEEDPEER_LISTEN_ADDR").then(|| "nope".to_string()))
            .unwrap_err();
        assert!(format!("{err:#}").contains("SEEDPEER_LISTEN_ADDR"));
    }

    fn temp_config(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "seedpeer-config-{}-{}.toml",
            std::process::id(),
            rand::random::<u64>()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn load_reads_first_existing_file_then_env() {
        let missing = std::env::temp_dir().join("seedpeer-config-does-not-exist.toml");
        let file = temp_config(&format!("private_key = \"{}\"\n", "11".repeat(32)));
        let c = load_from(&[missing.clone(), file.clone()], |k| {
            (k == "SEEDPEER_INITIAL_PEER_LIST").then(|| "/x".to_string())
        })
        .unwrap();
        assert_eq!(c.private_key, Some("11".repeat(32)));
        assert_eq!(c.initial_peer_list, vec!["/x"]);

        let c = load_from(&[missing], |_| None).unwrap();
        assert!(c.private_key.is_none());
        std::fs::remove_file(file).unwrap();
    }

    #[test]
    fn malformed_config_file_stops_loading() {
        let misspelled = temp_config(&format!(
            "private_key = \"{}\"\ninitial_peers = [\"/ip4/10.0.0.1/tcp/1\"]\n",
            "11".repeat(32)
        ));
        let err = load_from(&[misspelled.clone()], |_| None).unwrap_err();
        assert!(format!("{err:#}").contains(&misspelled.display().to_string()));

        let broken = temp_config("listen_addr = ");
        assert!(load_from(&[broken.clone()], |_| None).is_err());

        std::fs::remove_file(misspelled).unwrap();
        std::fs::remove_file(broken).unwrap();
    }

    #[test]
    fn node_config_validates_key_and_seeds() {
        let id = seedpeer_core::Keypair::generate().peer_id();
        let mut c = Config {
            private_key: Some(hex::encode([9u8; 32])),
            initial_peer_list: vec![format!("/ip4/10.0.0.1/tcp/4001/p2p/{id}")],
            ..Config::default()
        };
        let nc = c.node_config().unwrap();
        assert_eq!(nc.secret_key, vec![9u8; 32]);
        assert_eq!(nc.initial_peers, c.initial_peer_list);

        c.private_key = Some("not hex".to_string());
        assert!(c.node_config().is_err());

        c.private_key = None;
        c.initial_peer_list.push("/ip4/10.0.0.2/tcp/4001".to_string());
        let err = c.node_config().unwrap_err();
        assert!(format!("{err:#}").contains("/ip4/10.0.0.2/tcp/4001"));
    }

    #[test]
    fn split_peer_list_trims_and_drops_blanks() {
        assert!(split_peer_list("").is_empty());
        assert_eq!(split_peer_list(" /x ,/y"), vec!["/x", "/y"]);
    }
}
