//! Wallet-link signer: pairs with a mobile wallet through a relay. The
//! popup shows the pairing link as a QR code; an optional observer gets the
//! same link so a front end can show it too.

use std::sync::Arc;

use reqwest::Url;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{parse_accounts, Signer};
use crate::config::WalletLinkConfig;
use crate::error::{Error, Result};
use crate::message::RequestArguments;
use crate::popup::PopupCommunicator;
use crate::protocol::SignerType;
use crate::rpc::RpcClient;

pub const SESSION_HEADER: &str = "X-WalletLink-Session";
pub const KEY_HEADER: &str = "X-WalletLink-Key";

/// Called with each new pairing link.
pub type LinkObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// Pairing identity shared with the mobile wallet through the QR code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletLinkSession {
	pub id: String,
	pub secret: String,
}

impl WalletLinkSession {
	pub fn random() -> Self {
		let id: [u8; 16] = rand::random();
		let secret: [u8; 32] = rand::random();
		Self {
			id: hex::encode(id),
			secret: hex::encode(secret),
		}
	}

	/// Relay key: SHA-256 of `"<id>, <secret> WalletLink"`, hex encoded.
	pub fn key(&self) -> String {
		let digest = Sha256::digest(format!("{}, {} WalletLink", self.id, self.secret).as_bytes());
		hex::encode(digest)
	}

	/// Deep link encoded in the QR code.
	pub fn link_url(&self, link_base: &str, relay_url: &str) -> Result<String> {
		let mut scratch = Url::parse("http://localhost").map_err(|e| Error::Internal(e.to_string()))?;
		scratch
			.query_pairs_mut()
			.append_pair("parent-id", "")
			.append_pair("id", &self.id)
			.append_pair("secret", &self.secret)
			.append_pair("server", relay_url)
			.append_pair("v", "1");
		let query = scratch.query().unwrap_or_default();
		Ok(format!("{}/#/link?{query}", link_base.trim_end_matches('/')))
	}
}

pub struct WalletLinkSigner {
	rpc: RpcClient,
}

impl WalletLinkSigner {
	/// Start a pairing session and hand its link to the popup and to
	/// `observer`.
	pub fn new(
		popup: &Arc<PopupCommunicator>,
		config: &WalletLinkConfig,
		observer: Option<&LinkObserver>,
	) -> Result<Self> {
		let session = WalletLinkSession::random();
		let url = session.link_url(&config.link_url, &config.relay_url)?;
		tracing::info!(session = %session.id, %url, "wallet-link session created");

		popup.provide_wallet_link_url(url.clone());
		if let Some(observer) = observer {
			observer(&url);
		}

		let rpc = RpcClient::new(&config.relay_url)
			.with_header(SESSION_HEADER, session.id.clone())
			.with_header(KEY_HEADER, session.key());
		Ok(Self { rpc })
	}
}

#[async_trait::async_trait]
impl Signer for WalletLinkSigner {
	fn signer_type(&self) -> SignerType {
		SignerType::Walletlink
	}

	async fn handshake(&self) -> Result<Vec<String>> {
		let accounts = self.rpc.call(&RequestArguments::method("eth_requestAccounts")).await?;
		parse_accounts(accounts)
	}

	async fn request(&self, args: &RequestArguments) -> Result<Value> {
		self.rpc.call(args).await
	}
}
