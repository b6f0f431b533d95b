use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// EIP-1193 / JSON-RPC error codes surfaced to callers.
pub mod codes {
	pub const USER_REJECTED: i64 = 4001;
	pub const UNAUTHORIZED: i64 = 4100;
	pub const INTERNAL: i64 = -32603;
}

#[derive(Debug, Error)]
pub enum Error {
	/// No active signer, no connected accounts, or the signer itself
	/// reported that the session is no longer authorized.
	#[error("unauthorized: {0}")]
	Unauthorized(String),

	/// The popup closed before the user picked a signer.
	#[error("signer selection aborted: popup closed")]
	SelectionAborted,

	/// The popup closed or stopped answering while a request was pending.
	#[error("timed out: {0}")]
	Timeout(String),

	#[error("channel closed")]
	ChannelClosed,

	#[error("internal error: {0}")]
	Internal(String),

	#[error("invalid message: {0}")]
	InvalidMessage(String),

	/// Error reported by the active signer, passed through unchanged.
	#[error("rpc error {code}: {message}")]
	Rpc { code: i64, message: String },

	#[error("storage error: {0}")]
	Storage(String),

	#[error(transparent)]
	Http(#[from] reqwest::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl Error {
	pub fn unauthorized() -> Self {
		Self::Unauthorized("Must call 'eth_requestAccounts' before other methods".into())
	}

	/// Numeric code reported to JSON-RPC callers.
	pub fn code(&self) -> i64 {
		match self {
			Self::Unauthorized(_) => codes::UNAUTHORIZED,
			Self::SelectionAborted => codes::USER_REJECTED,
			Self::Rpc { code, .. } => *code,
			_ => codes::INTERNAL,
		}
	}

	/// True for our own precondition failure and for a signer-reported
	/// deauthorization (code 4100).
	pub fn is_unauthorized(&self) -> bool {
		self.code() == codes::UNAUTHORIZED
	}

	/// True when the failure came from the popup going away.
	pub fn is_popup_closed(&self) -> bool {
		matches!(self, Self::SelectionAborted | Self::Timeout(_) | Self::ChannelClosed)
	}
}
