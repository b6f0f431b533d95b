use clap::{Parser, Subcommand, ValueEnum};

use crate::protocol::SignerType;

#[derive(Parser)]
#[command(
	name = "popup-signer",
	about = "Keyless wallet requests through a popup-selected signer.",
	version
)]
pub struct Cli {
	/// Verbose logging (RUST_LOG overrides).
	#[arg(long, short, global = true)]
	pub verbose: bool,

	/// Override the popup page URL.
	#[arg(long, global = true)]
	pub popup_url: Option<String>,

	/// Override the origin announced to the popup.
	#[arg(long, global = true)]
	pub origin: Option<String>,

	/// Override the extension signer's JSON-RPC endpoint.
	#[arg(long, global = true)]
	pub rpc_url: Option<String>,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SignerArg {
	Scw,
	Walletlink,
	Extension,
}

impl From<SignerArg> for SignerType {
	fn from(arg: SignerArg) -> Self {
		match arg {
			SignerArg::Scw => SignerType::Scw,
			SignerArg::Walletlink => SignerType::Walletlink,
			SignerArg::Extension => SignerType::Extension,
		}
	}
}

#[derive(Subcommand)]
pub enum Command {
	/// Connect a signer (opens the popup if none is selected yet).
	Connect,

	/// Send a provider request through the active signer.
	Request {
		/// JSON-RPC method, e.g. personal_sign.
		method: String,

		/// Params as a JSON value, e.g. '["0xdeadbeef", "0xabc..."]'.
		params: Option<String>,
	},

	/// Choose the signer backend without opening the popup.
	Select {
		signer: SignerArg,
	},

	/// Show the selected signer and cached accounts.
	Status,

	/// Forget the signer selection and cached accounts.
	Disconnect,
}
