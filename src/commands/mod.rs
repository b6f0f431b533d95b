pub mod request;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::cli::Cli;
use crate::config::Config;
use crate::configurator::SignerConfigurator;
use crate::handler::{SignRequestHandler, UpdateListener};
use crate::popup::{origin_of, BrowserLauncher, PopupCommunicator};
use crate::signer::DefaultSignerFactory;
use crate::storage::{FileStore, KeyValueStore, ScopedStore, ADDRESSES_KEY, SCOPE};

/// RFC 3339 time of the last successful connect.
pub const CONNECTED_AT_KEY: &str = "ConnectedAt";

/// Everything a command needs, wired from CLI flags + config.
pub struct Session {
	pub config: Config,
	pub store: ScopedStore,
	pub handler: SignRequestHandler,
}

/// Apply CLI overrides on top of the config file.
pub fn resolve_config(cli: &Cli, mut config: Config) -> Config {
	if let Some(url) = &cli.popup_url {
		config.popup.url = url.clone();
	}
	if let Some(origin) = &cli.origin {
		config.app.origin = origin.clone();
	}
	if let Some(url) = &cli.rpc_url {
		config.extension.rpc_url = url.clone();
	}
	config
}

pub fn open_session(cli: &Cli) -> Result<Session> {
	let config = resolve_config(cli, Config::load()?);
	let store = ScopedStore::new(SCOPE, Arc::new(FileStore::new(Config::session_path()?)));
	store.stamp_version()?;

	let launcher = BrowserLauncher::new(
		&config.popup.url,
		config.popup.bridge_port,
		Duration::from_secs(config.popup.connect_timeout_secs),
		config.app.clone(),
	)?;
	let popup = Arc::new(PopupCommunicator::new(
		Arc::new(launcher),
		origin_of(&config.popup.url)?,
		config.app.origin.clone(),
	));
	let factory = Arc::new(DefaultSignerFactory::new(config.clone()).on_wallet_link(Arc::new(|url: &str| {
		if let Err(e) = print_qr(url) {
			tracing::warn!("could not render wallet-link qr code: {e}");
		}
	})));
	let configurator = Arc::new(SignerConfigurator::new(Arc::new(store.clone()), popup, factory)?);
	let listener = Arc::new(CliListener { store: store.clone() });

	Ok(Session {
		config,
		store,
		handler: SignRequestHandler::new(configurator, listener),
	})
}

/// Render `url` as a terminal QR code on stderr.
fn print_qr(url: &str) -> Result<()> {
	let code = qrcode::QrCode::new(url)?;
	let rendered = code
		.render::<char>()
		.quiet_zone(false)
		.module_dimensions(2, 1)
		.build();
	eprintln!("{rendered}");
	eprintln!();
	eprintln!("Scan with your mobile wallet: {url}");
	Ok(())
}

/// Accounts cached by the last successful connect.
pub fn cached_accounts(store: &dyn KeyValueStore) -> Result<Vec<String>> {
	match store.get(ADDRESSES_KEY)? {
		Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
			tracing::warn!("ignoring unreadable account cache: {e}");
			Vec::new()
		})),
		None => Ok(Vec::new()),
	}
}

pub fn cache_accounts(store: &dyn KeyValueStore, accounts: &[String]) -> Result<()> {
	store.set(ADDRESSES_KEY, &serde_json::to_string(accounts)?)?;
	store.set(CONNECTED_AT_KEY, &chrono::Utc::now().to_rfc3339())?;
	Ok(())
}

/// Keeps the on-disk account cache in step with the session.
struct CliListener {
	store: ScopedStore,
}

impl UpdateListener for CliListener {
	fn on_connect(&self) {
		tracing::debug!("session connected");
	}

	fn on_reset_connection(&self) {
		tracing::info!("session reset, clearing cached accounts");
		for key in [ADDRESSES_KEY, CONNECTED_AT_KEY] {
			if let Err(e) = self.store.remove(key) {
				tracing::warn!("could not clear {key}: {e}");
			}
		}
	}
}
