//! In-process adapter: the far end of the link is a [`PeerEnd`] driven by
//! the caller (tests, or an embedded popup implementation).

use serde_json::Value;
use tokio::sync::mpsc;

use super::{Frame, Link};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::protocol::{ConfigEvent, ConfigMessage};

/// Create a connected pair. `peer_origin` is the origin the peer speaks
/// from and the only target origin it will accept frames for.
pub fn pair(peer_origin: &str) -> (Link, PeerEnd) {
	let (to_peer, from_caller) = mpsc::unbounded_channel();
	let (to_caller, from_peer) = mpsc::unbounded_channel();
	let link = Link {
		outbound: to_peer,
		inbound: from_peer,
	};
	let peer = PeerEnd {
		origin: peer_origin.to_owned(),
		tx: to_caller,
		rx: from_caller,
	};
	(link, peer)
}

pub struct PeerEnd {
	origin: String,
	tx: mpsc::UnboundedSender<Frame>,
	rx: mpsc::UnboundedReceiver<Frame>,
}

impl PeerEnd {
	pub fn origin(&self) -> &str {
		&self.origin
	}

	pub fn send_value(&self, payload: Value) -> Result<()> {
		self.send_value_from(&self.origin.clone(), payload)
	}

	/// Send with a forged origin.
	pub fn send_value_from(&self, origin: &str, payload: Value) -> Result<()> {
		self.tx
			.send(Frame {
				origin: origin.to_owned(),
				payload,
			})
			.map_err(|_| Error::ChannelClosed)
	}

	pub fn send(&self, msg: &Message) -> Result<()> {
		self.send_value(serde_json::to_value(msg)?)
	}

	pub fn send_event(&self, event: ConfigEvent) -> Result<()> {
		self.send(&ConfigMessage::new(event).into_message()?)
	}

	/// Next frame addressed to this peer's origin; frames targeted at any
	/// other origin are discarded. `None` once the caller side is gone.
	pub async fn recv(&mut self) -> Option<Message> {
		while let Some(frame) = self.rx.recv().await {
			if frame.origin != self.origin {
				tracing::warn!(target = %frame.origin, "peer discarding frame for another origin");
				continue;
			}
			match serde_json::from_value(frame.payload) {
				Ok(msg) => return Some(msg),
				Err(e) => tracing::warn!("peer discarding malformed frame: {e}"),
			}
		}
		None
	}

	/// Next config event, skipping any other traffic.
	pub async fn recv_event(&mut self) -> Option<ConfigEvent> {
		loop {
			let msg = self.recv().await?;
			if let Ok(config) = ConfigMessage::try_from(&msg) {
				return Some(config.event);
			}
		}
	}
}
