use std::sync::Arc;

use serde_json::Value;

use super::{parse_accounts, Signer};
use crate::error::Result;
use crate::message::RequestArguments;
use crate::popup::PopupCommunicator;
use crate::protocol::SignerType;

/// Smart-wallet signer: the popup itself holds the passkey and answers
/// every request forwarded over the popup channel.
pub struct ScwSigner {
	popup: Arc<PopupCommunicator>,
}

impl ScwSigner {
	pub fn new(popup: Arc<PopupCommunicator>) -> Self {
		Self { popup }
	}
}

#[async_trait::async_trait]
impl Signer for ScwSigner {
	fn signer_type(&self) -> SignerType {
		SignerType::Scw
	}

	async fn handshake(&self) -> Result<Vec<String>> {
		let accounts = self.popup.request(&RequestArguments::method("eth_requestAccounts")).await?;
		parse_accounts(accounts)
	}

	async fn request(&self, args: &RequestArguments) -> Result<Value> {
		self.popup.request(args).await
	}
}
