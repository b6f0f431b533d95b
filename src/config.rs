use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	pub app: AppConfig,
	pub popup: PopupConfig,
	pub extension: ExtensionConfig,
	pub walletlink: WalletLinkConfig,
}

/// How the calling application presents itself to the popup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
	pub name: String,
	pub logo_url: Option<String>,
	pub chain_ids: Vec<u64>,
	/// Origin announced to the popup after it starts listening.
	pub origin: String,
	pub smart_wallet_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopupConfig {
	pub url: String,
	/// Localhost port for the popup bridge; 0 picks a free one.
	pub bridge_port: u16,
	/// How long to wait for the opened popup to connect back.
	pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionConfig {
	pub rpc_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletLinkConfig {
	pub relay_url: String,
	pub link_url: String,
}

impl Default for AppConfig {
	fn default() -> Self {
		Self {
			name: "DApp".into(),
			logo_url: None,
			chain_ids: Vec::new(),
			origin: "http://localhost".into(),
			smart_wallet_only: false,
		}
	}
}

impl Default for PopupConfig {
	fn default() -> Self {
		Self {
			url: "https://keys.coinbase.com/connect".into(),
			bridge_port: 0,
			connect_timeout_secs: 120,
		}
	}
}

impl Default for ExtensionConfig {
	fn default() -> Self {
		Self {
			rpc_url: "http://127.0.0.1:8545".into(),
		}
	}
}

impl Default for WalletLinkConfig {
	fn default() -> Self {
		Self {
			relay_url: "https://www.walletlink.org/rpc".into(),
			link_url: "https://www.walletlink.org".into(),
		}
	}
}

impl Config {
	/// Directory where CLI state is stored (~/.popup-signer/).
	pub fn dir() -> anyhow::Result<PathBuf> {
		let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("could not determine home directory"))?;
		Ok(home.join(".popup-signer"))
	}

	/// Path to the config file.
	pub fn path() -> anyhow::Result<PathBuf> {
		Ok(Self::dir()?.join("config.toml"))
	}

	/// Path to the persisted session entries.
	pub fn session_path() -> anyhow::Result<PathBuf> {
		Ok(Self::dir()?.join("session.toml"))
	}

	/// Load config from disk, falling back to defaults if no file exists.
	pub fn load() -> anyhow::Result<Self> {
		Self::load_from(&Self::path()?)
	}

	pub fn load_from(path: &std::path::Path) -> anyhow::Result<Self> {
		if path.exists() {
			let content = std::fs::read_to_string(path)?;
			Ok(toml::from_str(&content)?)
		} else {
			Ok(Self::default())
		}
	}

	/// Persist the current config to disk, creating the directory if needed.
	pub fn save_to(&self, path: &std::path::Path) -> anyhow::Result<()> {
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		std::fs::write(path, toml::to_string_pretty(self)?)?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_sensible() {
		let c = Config::default();
		assert_eq!(c.app.name, "DApp");
		assert_eq!(c.app.origin, "http://localhost");
		assert!(c.app.chain_ids.is_empty());
		assert_eq!(c.popup.bridge_port, 0);
		assert_eq!(c.popup.url, "https://keys.coinbase.com/connect");
	}

	#[test]
	fn partial_file_fills_in_defaults() {
		let parsed: Config = toml::from_str(
			r#"
			[app]
			name = "Shop"
			chain_ids = [8453]

			[extension]
			rpc_url = "http://127.0.0.1:9545"
			"#,
		)
		.unwrap();
		assert_eq!(parsed.app.name, "Shop");
		assert_eq!(parsed.app.chain_ids, vec![8453]);
		assert_eq!(parsed.app.origin, "http://localhost");
		assert_eq!(parsed.extension.rpc_url, "http://127.0.0.1:9545");
		assert_eq!(parsed.popup.connect_timeout_secs, 120);
	}

	#[test]
	fn file_roundtrip() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.toml");
		assert_eq!(Config::load_from(&path).unwrap().app.name, "DApp");

		let mut c = Config::default();
		c.app.logo_url = Some("https://shop.example/logo.png".into());
		c.popup.bridge_port = 7777;
		c.save_to(&path).unwrap();

		let loaded = Config::load_from(&path).unwrap();
		assert_eq!(loaded.app.logo_url.as_deref(), Some("https://shop.example/logo.png"));
		assert_eq!(loaded.popup.bridge_port, 7777);
	}
}
