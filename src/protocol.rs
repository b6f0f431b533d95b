//! Config messages: the negotiation vocabulary spoken with the popup.
//!
//! Every config message is a [`Message`] of type `"config"` carrying an
//! `event` object. The event's `type` comes from one of three families
//! (popup setup, signer selection, wallet-link setup) and decides the shape
//! of its optional `value`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::message::{Message, MessageId};

pub const CONFIG_TYPE: &str = "config";

/// Backend the user picked in the popup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerType {
	Scw,
	Walletlink,
	Extension,
}

impl SignerType {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Scw => "scw",
			Self::Walletlink => "walletlink",
			Self::Extension => "extension",
		}
	}
}

impl fmt::Display for SignerType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for SignerType {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"scw" => Ok(Self::Scw),
			"walletlink" => Ok(Self::Walletlink),
			"extension" => Ok(Self::Extension),
			other => Err(Error::InvalidMessage(format!("unknown signer type {other:?}"))),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFamily {
	PopupSetup,
	SignerConfig,
	WalletLink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum ConfigEvent {
	// -- popup setup --
	/// popup -> caller: the popup is listening.
	PopupListenerAdded,
	/// caller -> popup: the caller's origin, sent before anything else.
	DappOriginMessage(String),
	/// popup -> caller: the popup window is going away.
	PopupUnload,

	// -- signer selection --
	/// popup -> caller: the user picked a backend.
	SignerTypeSelected(SignerType),

	// -- wallet-link setup --
	/// popup -> caller: the popup wants a wallet-link URL to show as a QR.
	RequestWalletLinkUrl,
	/// caller -> popup: the wallet-link URL.
	WalletLinkUrl(String),
	/// caller -> popup: the QR code was scanned; the popup may close.
	WalletLinkQrScanned,
}

impl ConfigEvent {
	pub fn family(&self) -> EventFamily {
		match self {
			Self::PopupListenerAdded | Self::DappOriginMessage(_) | Self::PopupUnload => {
				EventFamily::PopupSetup
			}
			Self::SignerTypeSelected(_) => EventFamily::SignerConfig,
			Self::RequestWalletLinkUrl | Self::WalletLinkUrl(_) | Self::WalletLinkQrScanned => {
				EventFamily::WalletLink
			}
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigMessage {
	pub id: MessageId,
	pub event: ConfigEvent,
}

impl ConfigMessage {
	pub fn new(event: ConfigEvent) -> Self {
		Self {
			id: MessageId::random(),
			event,
		}
	}

	pub fn into_message(self) -> Result<Message> {
		let mut msg = Message::new(CONFIG_TYPE).with("event", serde_json::to_value(&self.event)?);
		msg.id = self.id;
		Ok(msg)
	}
}

impl TryFrom<&Message> for ConfigMessage {
	type Error = Error;

	fn try_from(msg: &Message) -> Result<Self> {
		if !is_config_message(msg) {
			return Err(Error::InvalidMessage(format!(
				"message {} of type {:?} is not a config message",
				msg.id, msg.kind
			)));
		}
		let event = msg.get("event").cloned().unwrap_or(Value::Null);
		let event = serde_json::from_value(event)
			.map_err(|e| Error::InvalidMessage(format!("bad config event in {}: {e}", msg.id)))?;
		Ok(Self {
			id: msg.id.clone(),
			event,
		})
	}
}

/// Shape guard: type is `"config"` and an `event` field is present.
pub fn is_config_message(msg: &Message) -> bool {
	msg.kind == CONFIG_TYPE && msg.body.contains_key("event")
}
