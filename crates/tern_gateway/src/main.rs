#![forbid(unsafe_code)]

mod config;
mod server;
mod util;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tern_store::{MySqlStore, ValkeyPresenceStore};

use crate::server::connection::handle_connection;
use crate::server::gateway::Gateway;
use crate::server::health::{HealthState, spawn_health_server};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: tern_gateway [--bind ws://host:port]\n\
\n\
Options:\n\
\t--bind   Bind endpoint (default: ws://127.0.0.1:4600)\n\
\t        Format: ws://host:port; clients upgrade on /ws or /gateway\n\
\t--help  Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> SocketAddr {
	let mut bind_endpoint = "ws://127.0.0.1:4600".to_string();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected ws://host:port)");
					usage_and_exit();
				}
				bind_endpoint = v;
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	config::parse_bind_endpoint(&bind_endpoint).unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	})
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tern_gateway=debug".to_string());

	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false))
		.init();
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let bind_addr = parse_args();

	let config_path = config::default_config_path()?;
	let cfg = config::load_gateway_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded gateway config (toml + env overrides)");

	init_metrics(cfg.server.metrics_bind.as_deref());

	let health_state = HealthState::new();
	if let Some(bind) = cfg.server.health_bind.as_deref() {
		match bind.parse::<SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let database_url = cfg
		.persistence
		.database_url
		.as_deref()
		.context("no database_url configured (set [persistence] database_url or TERN_DATABASE_URL)")?;
	let store = MySqlStore::connect(database_url).await.context("connect durable store")?;
	store.ping().await.context("probe durable store")?;
	info!("durable store ready");

	let valkey_url = cfg
		.presence
		.valkey_url
		.as_deref()
		.context("no valkey_url configured (set [presence] valkey_url or TERN_VALKEY_URL)")?;
	let presence = ValkeyPresenceStore::connect(valkey_url).await.context("connect presence store")?;
	presence.ping().await.context("probe presence store")?;
	info!("presence store ready");

	let gateway = Gateway::new(Arc::new(store), Arc::new(presence));

	let listener = TcpListener::bind(bind_addr)
		.await
		.with_context(|| format!("bind {bind_addr}"))?;
	info!(bind = %bind_addr, "gateway listening (upgrade on /ws or /gateway)");

	health_state.mark_ready();

	let mut next_conn_id: u64 = 1;

	loop {
		let (stream, remote) = match listener.accept().await {
			Ok(accepted) => accepted,
			Err(e) => {
				warn!(error = %e, "accept failed");
				continue;
			}
		};

		let conn_id = next_conn_id;
		next_conn_id += 1;
		metrics::counter!("tern_gateway_connections_total").increment(1);
		info!(conn_id, remote = %remote, "accepted connection");

		let gateway = gateway.clone();
		tokio::spawn(async move {
			if let Err(e) = handle_connection(conn_id, stream, gateway).await {
				warn!(conn_id, error = %e, "connection handler exited with error");
			}
		});
	}
}
