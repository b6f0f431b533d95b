pub mod extension;
pub mod scw;
pub mod walletlink;

use std::sync::Arc;

use serde_json::Value;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::RequestArguments;
use crate::popup::PopupCommunicator;
use crate::protocol::SignerType;

/// A backend that holds the user's keys somewhere else (popup wallet,
/// mobile app, local endpoint) and answers provider requests for them.
#[async_trait::async_trait]
pub trait Signer: Send + Sync {
	fn signer_type(&self) -> SignerType;

	/// Establish the session and return the authorized accounts.
	async fn handshake(&self) -> Result<Vec<String>>;

	/// Forward one provider request. A 4100 error means the backend no
	/// longer considers the session authorized.
	async fn request(&self, args: &RequestArguments) -> Result<Value>;
}

/// Builds the concrete signer for a selected type.
pub trait SignerFactory: Send + Sync {
	fn create(&self, signer_type: SignerType, popup: &Arc<PopupCommunicator>) -> Result<Arc<dyn Signer>>;
}

/// Builds the signers shipped with this crate from the loaded config.
pub struct DefaultSignerFactory {
	config: Config,
	wallet_link_observer: Option<walletlink::LinkObserver>,
}

impl DefaultSignerFactory {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			wallet_link_observer: None,
		}
	}

	/// Also hand every wallet-link pairing link to `observer`.
	pub fn on_wallet_link(mut self, observer: walletlink::LinkObserver) -> Self {
		self.wallet_link_observer = Some(observer);
		self
	}
}

impl SignerFactory for DefaultSignerFactory {
	fn create(&self, signer_type: SignerType, popup: &Arc<PopupCommunicator>) -> Result<Arc<dyn Signer>> {
		let signer: Arc<dyn Signer> = match signer_type {
			SignerType::Scw => Arc::new(scw::ScwSigner::new(Arc::clone(popup))),
			SignerType::Extension => Arc::new(extension::ExtensionSigner::new(&self.config.extension.rpc_url)),
			SignerType::Walletlink => Arc::new(walletlink::WalletLinkSigner::new(
				popup,
				&self.config.walletlink,
				self.wallet_link_observer.as_ref(),
			)?),
		};
		Ok(signer)
	}
}

/// Interpret a handshake result as a list of address strings.
pub fn parse_accounts(value: Value) -> Result<Vec<String>> {
	let Value::Array(items) = value else {
		return Err(Error::Internal("Failed to get accounts".into()));
	};
	items
		.into_iter()
		.map(|item| match item {
			Value::String(s) => Ok(s),
			_ => Err(Error::Internal("Failed to get accounts".into())),
		})
		.collect()
}
