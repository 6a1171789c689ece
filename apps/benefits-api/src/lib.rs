pub mod routes;
pub mod state;

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use color_eyre::eyre::{self, WrapErr};
use tokio::{net::TcpListener, sync::watch};
use tracing_subscriber::EnvFilter;

use crate::state::AppState;
use benefits_config::Config;

#[derive(Debug, Parser)]
#[command(
	version = benefits_cli::VERSION,
	rename_all = "kebab",
	styles = benefits_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
}

/// Listen addresses of the public and the admin router.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Binds {
	pub http: SocketAddr,
	pub admin: SocketAddr,
}
impl Binds {
	/// The admin router never leaves loopback; the public one only with `bind_localhost_only = false`.
	pub fn from_config(config: &Config) -> eyre::Result<Self> {
		let http: SocketAddr = config
			.service
			.http_bind
			.parse()
			.wrap_err_with(|| format!("Invalid service.http_bind {:?}.", config.service.http_bind))?;
		let admin: SocketAddr = config.service.admin_bind.parse().wrap_err_with(|| {
			format!("Invalid service.admin_bind {:?}.", config.service.admin_bind)
		})?;

		if config.security.bind_localhost_only && !http.ip().is_loopback() {
			eyre::bail!("service.http_bind must be a loopback address when bind_localhost_only is true.");
		}
		if !admin.ip().is_loopback() {
			eyre::bail!("service.admin_bind must be a loopback address.");
		}
		if http == admin {
			eyre::bail!("service.http_bind and service.admin_bind must differ.");
		}

		Ok(Self { http, admin })
	}
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = benefits_config::load(&args.config)?;

	init_tracing(&config);

	let binds = Binds::from_config(&config)?;

	tracing::info!(
		router_mode = %config.router.mode,
		default_model = %config.router.default_model,
		models = config.router.models.len(),
		collection = %config.storage.qdrant.collection,
		top_k = config.retrieval.top_k,
		"Starting benefits API."
	);

	let state = AppState::new(config).await?;
	let http_listener = TcpListener::bind(binds.http).await?;

	tracing::info!(http_addr = %binds.http, "HTTP server listening.");

	let admin_listener = TcpListener::bind(binds.admin).await?;

	tracing::info!(admin_addr = %binds.admin, "Admin server listening.");

	let (shutdown_tx, shutdown_rx) = watch::channel(false);

	tokio::spawn(async move {
		shutdown_signal().await;

		let _ = shutdown_tx.send(true);
	});

	let http_server = axum::serve(http_listener, routes::router(state.clone()))
		.with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));
	let admin_server = axum::serve(admin_listener, routes::admin_router(state))
		.with_graceful_shutdown(wait_for_shutdown(shutdown_rx));

	tokio::try_join!(async { http_server.await }, async { admin_server.await })?;

	tracing::info!("Benefits API stopped.");

	Ok(())
}

fn init_tracing(config: &Config) {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
	// A dropped sender also ends the wait.
	let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(err) = tokio::signal::ctrl_c().await {
			tracing::warn!(error = %err, "Failed to listen for Ctrl+C.");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			Ok(mut signal) => {
				signal.recv().await;
			},
			Err(err) => {
				tracing::warn!(error = %err, "Failed to listen for SIGTERM.");
				std::future::pending::<()>().await;
			},
		}
	};
	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => tracing::info!("Received Ctrl+C. Draining connections."),
		_ = terminate => tracing::info!("Received SIGTERM. Draining connections."),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn config_with_binds(http: &str, admin: &str, localhost_only: bool) -> Config {
		let mut config: Config = toml::from_str(include_str!("../../../benefits.example.toml"))
			.expect("example config parses");

		config.service.http_bind = http.to_string();
		config.service.admin_bind = admin.to_string();
		config.security.bind_localhost_only = localhost_only;

		config
	}

	#[test]
	fn loopback_binds_are_accepted() {
		let binds = Binds::from_config(&config_with_binds("127.0.0.1:8089", "127.0.0.1:8090", true))
			.expect("loopback binds");

		assert_eq!(binds.http.port(), 8089);
		assert_eq!(binds.admin.port(), 8090);
	}

	#[test]
	fn public_bind_needs_localhost_only_disabled() {
		let err = Binds::from_config(&config_with_binds("0.0.0.0:8089", "127.0.0.1:8090", true))
			.expect_err("public bind");

		assert!(err.to_string().contains("bind_localhost_only"));
		assert!(
			Binds::from_config(&config_with_binds("0.0.0.0:8089", "127.0.0.1:8090", false)).is_ok()
		);
	}

	#[test]
	fn admin_router_stays_on_loopback() {
		let err = Binds::from_config(&config_with_binds("127.0.0.1:8089", "0.0.0.0:8090", false))
			.expect_err("public admin bind");

		assert!(err.to_string().contains("admin_bind"));
	}

	#[test]
	fn malformed_and_shared_binds_are_rejected() {
		assert!(Binds::from_config(&config_with_binds("localhost", "127.0.0.1:8090", true)).is_err());
		assert!(
			Binds::from_config(&config_with_binds("127.0.0.1:8089", "127.0.0.1:8089", true)).is_err()
		);
	}
}
