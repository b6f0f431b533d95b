//! Localhost WebSocket bridge between this process and a browser popup.
//!
//! The popup page is told the bridge URL and connects back to it. Only a
//! handshake whose `Origin` header equals the popup origin is accepted; the
//! resulting socket is pumped into a [`Link`]. The socket closing is how the
//! rest of the crate learns that the popup window went away.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use super::{Frame, Link};
use crate::error::{Error, Result};

pub struct WebSocketBridge {
	listener: TcpListener,
	popup_origin: String,
}

impl WebSocketBridge {
	/// Bind on 127.0.0.1. Port 0 picks an ephemeral port.
	pub async fn bind(port: u16, popup_origin: impl Into<String>) -> Result<Self> {
		let listener = TcpListener::bind(("127.0.0.1", port)).await?;
		Ok(Self {
			listener,
			popup_origin: popup_origin.into(),
		})
	}

	pub fn local_addr(&self) -> Result<SocketAddr> {
		Ok(self.listener.local_addr()?)
	}

	/// The `ws://` URL the popup should connect to.
	pub fn url(&self) -> Result<String> {
		Ok(format!("ws://{}", self.local_addr()?))
	}

	/// Wait up to `timeout` for the popup to connect, then start pumping.
	pub async fn accept(self, timeout: Duration) -> Result<Link> {
		let ws = tokio::time::timeout(timeout, self.accept_verified())
			.await
			.map_err(|_| Error::Timeout(format!("popup did not connect within {}s", timeout.as_secs())))??;
		Ok(pump(ws, self.popup_origin))
	}

	async fn accept_verified(&self) -> Result<WebSocketStream<TcpStream>> {
		loop {
			let (stream, peer) = self.listener.accept().await?;
			let expected = self.popup_origin.clone();
			let check = move |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
				let origin = req
					.headers()
					.get("origin")
					.and_then(|v| v.to_str().ok())
					.unwrap_or_default();
				if origin == expected {
					Ok(resp)
				} else {
					tracing::warn!(%origin, %expected, "refusing bridge connection");
					let mut err = ErrorResponse::new(Some("origin not allowed".into()));
					*err.status_mut() = StatusCode::FORBIDDEN;
					Err(err)
				}
			};
			match accept_hdr_async(stream, check).await {
				Ok(ws) => {
					tracing::info!(%peer, "popup connected to bridge");
					return Ok(ws);
				}
				Err(e) => tracing::warn!(%peer, "bridge handshake failed: {e}"),
			}
		}
	}
}

fn pump(ws: WebSocketStream<TcpStream>, popup_origin: String) -> Link {
	let (mut sink, mut stream) = ws.split();
	let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
	let (inbound_tx, inbound) = mpsc::unbounded_channel::<Frame>();

	let origin = popup_origin.clone();
	tokio::spawn(async move {
		while let Some(msg) = stream.next().await {
			match msg {
				Ok(WsMessage::Text(text)) => match serde_json::from_str(&text) {
					Ok(payload) => {
						let frame = Frame {
							origin: origin.clone(),
							payload,
						};
						if inbound_tx.send(frame).is_err() {
							break;
						}
					}
					Err(e) => tracing::warn!("bridge dropping non-JSON frame: {e}"),
				},
				Ok(WsMessage::Close(_)) => break,
				Ok(_) => {}
				Err(e) => {
					tracing::warn!("bridge read error: {e}");
					break;
				}
			}
		}
		tracing::info!("popup disconnected from bridge");
	});

	tokio::spawn(async move {
		while let Some(frame) = outbound_rx.recv().await {
			if frame.origin != popup_origin {
				tracing::warn!(target = %frame.origin, "bridge refusing frame for another origin");
				continue;
			}
			let text = frame.payload.to_string();
			if let Err(e) = sink.send(WsMessage::Text(text)).await {
				tracing::warn!("bridge write error: {e}");
				return;
			}
		}
		let _ = sink.send(WsMessage::Close(None)).await;
	});

	Link { outbound, inbound }
}

#[cfg(test)]
mod tests {
	use tokio_tungstenite::connect_async;
	use tokio_tungstenite::tungstenite::client::IntoClientRequest;
	use tokio_tungstenite::tungstenite::http::HeaderValue;

	use super::*;

	const POPUP: &str = "https://keys.example";

	type Client = WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

	async fn dial(url: &str, origin: &'static str) -> tokio_tungstenite::tungstenite::Result<Client> {
		let mut req = url.into_client_request()?;
		req.headers_mut().insert("Origin", HeaderValue::from_static(origin));
		connect_async(req).await.map(|(ws, _)| ws)
	}

	#[tokio::test]
	async fn only_the_popup_origin_gets_a_link() {
		let bridge = WebSocketBridge::bind(0, POPUP).await.unwrap();
		let url = bridge.url().unwrap();
		let accepted = tokio::spawn(bridge.accept(Duration::from_secs(5)));

		match dial(&url, "https://evil.example").await {
			Err(tokio_tungstenite::tungstenite::Error::Http(resp)) => {
				assert_eq!(resp.status(), StatusCode::FORBIDDEN)
			}
			other => panic!("foreign origin was not refused: {:?}", other.map(|_| ())),
		}

		let mut ws = dial(&url, POPUP).await.unwrap();
		let mut link = accepted.await.unwrap().unwrap();

		ws.send(WsMessage::Text(r#"{"id":"1","type":"config"}"#.to_string())).await.unwrap();
		let frame = link.inbound.recv().await.unwrap();
		assert_eq!(frame.origin, POPUP);
		assert_eq!(frame.payload["id"], "1");

		link.outbound
			.send(Frame {
				origin: POPUP.into(),
				payload: serde_json::json!({"id": "2", "type": "rpc"}),
			})
			.unwrap();
		match ws.next().await.unwrap().unwrap() {
			WsMessage::Text(text) => assert!(text.contains(r#""id":"2""#)),
			other => panic!("unexpected frame {other:?}"),
		}
	}

	#[tokio::test]
	async fn bridge_url_uses_bound_port() {
		let bridge = WebSocketBridge::bind(0, "https://keys.example").await.unwrap();
		let addr = bridge.local_addr().unwrap();
		assert_ne!(addr.port(), 0);
		assert_eq!(bridge.url().unwrap(), format!("ws://127.0.0.1:{}", addr.port()));
	}

	#[tokio::test]
	async fn accept_times_out_without_popup() {
		let bridge = WebSocketBridge::bind(0, "https://keys.example").await.unwrap();
		let err = bridge.accept(Duration::from_millis(20)).await.err().unwrap();
		assert!(matches!(err, Error::Timeout(_)));
	}
}
