//! Request dispatch: gates every signing-related request on an authorized
//! session and runs the connect flow for `eth_requestAccounts`.

use std::sync::Arc;

use serde_json::Value;

use crate::configurator::SignerConfigurator;
use crate::error::{Error, Result};
use crate::message::RequestArguments;
use crate::protocol::SignerType;

pub const REQUEST_ACCOUNTS: &str = "eth_requestAccounts";

/// Methods that need an authenticated signer. Capability queries are gated
/// like everything else here.
pub const METHODS_REQUIRING_SIGNER: &[&str] = &[
	"eth_requestAccounts",
	"eth_sign",
	"eth_ecRecover",
	"personal_sign",
	"personal_ecRecover",
	"eth_signTransaction",
	"eth_sendTransaction",
	"eth_signTypedData_v1",
	"eth_signTypedData_v2",
	"eth_signTypedData_v3",
	"eth_signTypedData_v4",
	"eth_signTypedData",
	"wallet_addEthereumChain",
	"wallet_switchEthereumChain",
	"wallet_watchAsset",
	"wallet_getCapabilities",
	"wallet_sendCalls",
	"wallet_getCallsStatus",
];

/// Session notifications for whoever owns the account cache.
pub trait UpdateListener: Send + Sync {
	/// Accounts are available.
	fn on_connect(&self);

	/// The session is gone; drop any cached accounts.
	fn on_reset_connection(&self);
}

pub struct SignRequestHandler {
	configurator: Arc<SignerConfigurator>,
	listener: Arc<dyn UpdateListener>,
}

impl SignRequestHandler {
	pub fn new(configurator: Arc<SignerConfigurator>, listener: Arc<dyn UpdateListener>) -> Self {
		Self { configurator, listener }
	}

	pub fn configurator(&self) -> &Arc<SignerConfigurator> {
		&self.configurator
	}

	pub fn can_handle_request(&self, request: &RequestArguments) -> bool {
		METHODS_REQUIRING_SIGNER.contains(&request.method.as_str())
	}

	/// Serve `request` for a session whose cached accounts are `accounts`.
	pub async fn handle_request(&self, request: &RequestArguments, accounts: &[String]) -> Result<Value> {
		if request.method == REQUEST_ACCOUNTS {
			let accounts = self.request_accounts(accounts).await?;
			return Ok(serde_json::to_value(accounts)?);
		}

		let result = self.forward(request, accounts).await;
		if let Err(e) = &result {
			if e.is_unauthorized() {
				tracing::info!(method = %request.method, "unauthorized, resetting session");
				self.reset_session();
			}
		}
		result
	}

	async fn forward(&self, request: &RequestArguments, accounts: &[String]) -> Result<Value> {
		if accounts.is_empty() {
			return Err(Error::unauthorized());
		}
		let Some(signer) = self.configurator.active_signer().await? else {
			return Err(Error::unauthorized());
		};
		tracing::debug!(method = %request.method, signer_type = %signer.signer_type(), "forwarding");
		signer.request(request).await
	}

	async fn request_accounts(&self, accounts: &[String]) -> Result<Vec<String>> {
		if !accounts.is_empty() {
			self.listener.on_connect();
			return Ok(accounts.to_vec());
		}

		if let Err(e) = self.configurator.complete_signer_type_selection().await {
			tracing::info!("signer selection failed: {e}");
			return Err(e);
		}

		match self.connect_signer().await {
			Ok(accounts) => {
				if self.configurator.signer_type() == Some(SignerType::Walletlink) {
					if let Err(e) = self.configurator.popup().wallet_link_qr_scanned() {
						tracing::warn!("could not confirm qr scan to popup: {e}");
					}
				}
				tracing::info!(count = accounts.len(), "connected");
				self.listener.on_connect();
				Ok(accounts)
			}
			Err(e) => {
				tracing::warn!("connect failed: {e}");
				if self.configurator.signer_type() == Some(SignerType::Walletlink) {
					self.configurator.popup().disconnect();
					self.reset_session();
				} else if e.is_unauthorized() {
					self.reset_session();
				}
				Err(e)
			}
		}
	}

	async fn connect_signer(&self) -> Result<Vec<String>> {
		let signer = self.configurator.init_signer().await?;
		let accounts = if signer.signer_type() == SignerType::Walletlink {
			// The pairing waits on the user; closing the popup gives up on it.
			let popup = self.configurator.popup();
			tokio::select! {
				biased;
				accounts = self.configurator.handshake() => accounts?,
				_ = popup.closed() => {
					tracing::info!("popup closed during wallet-link pairing");
					return Err(Error::SelectionAborted);
				}
			}
		} else {
			self.configurator.handshake().await?
		};
		if accounts.is_empty() {
			return Err(Error::Internal("Failed to get accounts".into()));
		}
		Ok(accounts)
	}

	/// Close the popup, forget the signer and tell the listener.
	pub fn on_disconnect(&self) {
		self.configurator.popup().disconnect();
		self.reset_session();
	}

	fn reset_session(&self) {
		if let Err(e) = self.configurator.on_disconnect() {
			tracing::warn!("could not clear signer selection: {e}");
		}
		self.listener.on_reset_connection();
	}
}
