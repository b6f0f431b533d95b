use serde_json::Value;

use super::{parse_accounts, Signer};
use crate::error::Result;
use crate::message::RequestArguments;
use crate::protocol::SignerType;
use crate::rpc::RpcClient;

/// Signer backed by a locally reachable wallet endpoint that speaks
/// JSON-RPC. Construction has no side effects.
pub struct ExtensionSigner {
	rpc: RpcClient,
}

impl ExtensionSigner {
	pub fn new(rpc_url: &str) -> Self {
		Self {
			rpc: RpcClient::new(rpc_url),
		}
	}
}

#[async_trait::async_trait]
impl Signer for ExtensionSigner {
	fn signer_type(&self) -> SignerType {
		SignerType::Extension
	}

	async fn handshake(&self) -> Result<Vec<String>> {
		let accounts = self.rpc.call(&RequestArguments::method("eth_requestAccounts")).await?;
		parse_accounts(accounts)
	}

	async fn request(&self, args: &RequestArguments) -> Result<Value> {
		self.rpc.call(args).await
	}
}
