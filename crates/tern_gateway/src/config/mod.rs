#![forbid(unsafe_code)]

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tracing::info;

/// Parse the `--bind` flag, `ws://ip:port`.
///
/// The host must be an IP literal (IPv6 bracketed); the gateway binds a
/// listener here, so there is nothing for a DNS name to resolve against.
pub fn parse_bind_endpoint(s: &str) -> Result<SocketAddr, String> {
	let hostport = s
		.trim()
		.strip_prefix("ws://")
		.ok_or_else(|| format!("bind endpoint must look like ws://ip:port, got: {s}"))?;

	if hostport.contains(['/', '?', '#']) {
		return Err(format!("bind endpoint must not carry a path or query: {s}"));
	}

	let addr: SocketAddr = hostport
		.parse()
		.map_err(|_| format!("bind host must be an ip:port literal (IPv6 bracketed, e.g. ws://[::1]:4600): {s}"))?;

	if addr.port() == 0 {
		return Err(format!("bind port must be nonzero: {s}"));
	}

	Ok(addr)
}

/// Default config path: `~/.tern/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".tern").join("config.toml"))
}

/// Load the gateway config from TOML and env overrides.
pub fn load_gateway_config_from_path(path: &Path) -> anyhow::Result<GatewayConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = GatewayConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Gateway config (v1).
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
	pub server: ServerSettings,
	pub persistence: PersistenceSettings,
	pub presence: PresenceSettings,
}

#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
	/// MySQL-protocol database URL for the durable store.
	pub database_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PresenceSettings {
	/// Valkey/Redis URL for the presence KV.
	pub valkey_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,

	#[serde(default)]
	presence: FilePresenceSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	metrics_bind: Option<String>,
	health_bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePresenceSettings {
	valkey_url: Option<String>,
}

impl GatewayConfig {
	fn from_file(file: FileConfig) -> Self {
		Self {
			server: ServerSettings {
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
			},
			persistence: PersistenceSettings {
				database_url: file.persistence.database_url.filter(|s| !s.trim().is_empty()),
			},
			presence: PresenceSettings {
				valkey_url: file.presence.valkey_url.filter(|s| !s.trim().is_empty()),
			},
		}
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut GatewayConfig) {
	if let Ok(v) = std::env::var("TERN_DATABASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.persistence.database_url = Some(v);
			info!("persistence: database_url overridden by env");
		}
	}

	if let Ok(v) = std::env::var("TERN_VALKEY_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.presence.valkey_url = Some(v);
			info!("presence: valkey_url overridden by env");
		}
	}

	if let Ok(v) = std::env::var("TERN_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("TERN_HEALTH_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.health_bind = Some(v);
			info!("server config: health_bind overridden by env");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bind_endpoint_accepts_ip_literals() {
		let addr = parse_bind_endpoint("ws://127.0.0.1:4600").expect("ipv4");
		assert_eq!(addr.port(), 4600);
		assert!(addr.ip().is_loopback());

		let addr = parse_bind_endpoint("ws://[::1]:4600").expect("ipv6");
		assert!(addr.is_ipv6());
	}

	#[test]
	fn bind_endpoint_rejects_everything_else() {
		for bad in [
			"",
			"127.0.0.1:4600",
			"wss://127.0.0.1:4600",
			"ws://127.0.0.1",
			"ws://127.0.0.1:0",
			"ws://gateway.internal:4600",
			"ws://::1:4600",
			"ws://127.0.0.1:4600/ws",
			"ws://127.0.0.1:4600?x=1",
		] {
			assert!(parse_bind_endpoint(bad).is_err(), "expected rejection for {bad:?}");
		}
	}
}
