//! The popup communicator: owns at most one popup instance and runs the
//! config handshake over its [`Channel`].
//!
//! Lifecycle: `Closed -> Opening -> Ready -> Closed`. An instance is opened
//! on first use, becomes ready when the popup reports
//! [`ConfigEvent::PopupListenerAdded`] (answered at once with
//! [`ConfigEvent::DappOriginMessage`]), and is closed by
//! [`ConfigEvent::PopupUnload`], by the popup disconnecting, or by
//! [`PopupCommunicator::disconnect`]. Closing wakes every waiter with a
//! terminal error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use serde_json::Value;
use tokio::sync::watch;

use crate::channel::websocket::WebSocketBridge;
use crate::channel::{Channel, Flow, Link};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::message::{Message, RequestArguments};
use crate::protocol::{is_config_message, ConfigEvent, ConfigMessage, EventFamily, SignerType};

/// Opens a fresh popup instance and returns the link to it.
#[async_trait]
pub trait PopupLauncher: Send + Sync {
	async fn launch(&self) -> Result<Link>;
}

/// `scheme://host[:port]` of `url`.
pub fn origin_of(url: &str) -> Result<String> {
	let parsed = Url::parse(url).map_err(|e| Error::Internal(format!("invalid popup url {url:?}: {e}")))?;
	Ok(parsed.origin().ascii_serialization())
}

/// Opens the popup page in the user's browser and bridges it back over a
/// localhost WebSocket.
pub struct BrowserLauncher {
	popup_url: Url,
	bridge_port: u16,
	connect_timeout: Duration,
	app: AppConfig,
}

impl BrowserLauncher {
	pub fn new(popup_url: &str, bridge_port: u16, connect_timeout: Duration, app: AppConfig) -> Result<Self> {
		let popup_url =
			Url::parse(popup_url).map_err(|e| Error::Internal(format!("invalid popup url {popup_url:?}: {e}")))?;
		Ok(Self {
			popup_url,
			bridge_port,
			connect_timeout,
			app,
		})
	}

	fn launch_url(&self, bridge_url: &str) -> Url {
		let mut url = self.popup_url.clone();
		{
			let mut query = url.query_pairs_mut();
			query.append_pair("bridge", bridge_url);
			query.append_pair("origin", &self.app.origin);
			query.append_pair("app", &self.app.name);
			if let Some(logo) = &self.app.logo_url {
				query.append_pair("logo", logo);
			}
			if !self.app.chain_ids.is_empty() {
				let chains: Vec<String> = self.app.chain_ids.iter().map(u64::to_string).collect();
				query.append_pair("chains", &chains.join(","));
			}
			if self.app.smart_wallet_only {
				query.append_pair("smartWalletOnly", "true");
			}
		}
		url
	}
}

#[async_trait]
impl PopupLauncher for BrowserLauncher {
	async fn launch(&self) -> Result<Link> {
		let bridge = WebSocketBridge::bind(self.bridge_port, self.popup_url.origin().ascii_serialization()).await?;
		let url = self.launch_url(&bridge.url()?);
		tracing::info!(%url, "opening popup");
		opener::open(url.as_str()).map_err(|e| Error::Internal(format!("could not open browser: {e}")))?;
		bridge.accept(self.connect_timeout).await
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupState {
	Closed,
	Opening,
	Ready,
}

#[derive(Default)]
struct WalletLinkExchange {
	url: Option<String>,
	requested: bool,
}

struct Shared {
	dapp_origin: String,
	ready: watch::Sender<bool>,
	selection: watch::Sender<Option<SignerType>>,
	wallet_link: Mutex<WalletLinkExchange>,
}

impl Shared {
	/// Config traffic from the popup. Runs on the channel's pump.
	fn on_config(&self, channel: &Weak<Channel>, msg: &Message) -> Flow {
		let Some(channel) = channel.upgrade() else {
			return Flow::Unsubscribe;
		};
		let event = match ConfigMessage::try_from(msg) {
			Ok(config) => config.event,
			Err(e) => {
				tracing::warn!("rejecting config message: {e}");
				return Flow::Keep;
			}
		};
		let family = event.family();
		tracing::debug!(?family, ?event, "config event");

		match family {
			EventFamily::PopupSetup => self.on_setup(&channel, event),
			EventFamily::SignerConfig => self.on_signer_config(event),
			EventFamily::WalletLink => self.on_wallet_link(&channel, event),
		}
	}

	fn on_setup(&self, channel: &Channel, event: ConfigEvent) -> Flow {
		match event {
			ConfigEvent::PopupListenerAdded => {
				let origin = ConfigEvent::DappOriginMessage(self.dapp_origin.clone());
				if let Err(e) = send_event(channel, origin) {
					tracing::warn!("could not announce origin: {e}");
					return Flow::Keep;
				}
				self.ready.send_replace(true);
			}
			ConfigEvent::PopupUnload => {
				tracing::info!("popup unloaded");
				channel.close();
				return Flow::Unsubscribe;
			}
			other => tracing::debug!(?other, "ignoring caller-bound event from popup"),
		}
		Flow::Keep
	}

	fn on_signer_config(&self, event: ConfigEvent) -> Flow {
		if let ConfigEvent::SignerTypeSelected(signer_type) = event {
			tracing::info!(%signer_type, "signer type selected in popup");
			self.selection.send_replace(Some(signer_type));
		}
		Flow::Keep
	}

	fn on_wallet_link(&self, channel: &Channel, event: ConfigEvent) -> Flow {
		match event {
			ConfigEvent::RequestWalletLinkUrl => {
				self.selection.send_if_modified(|selected| {
					if selected.is_none() {
						*selected = Some(SignerType::Walletlink);
						true
					} else {
						false
					}
				});
				let url = {
					let mut exchange = self.wallet_link.lock();
					exchange.requested = true;
					exchange.url.clone()
				};
				if let Some(url) = url {
					self.answer_wallet_link_request(channel, url);
				}
			}
			other => tracing::debug!(?other, "ignoring caller-bound event from popup"),
		}
		Flow::Keep
	}

	fn answer_wallet_link_request(&self, channel: &Channel, url: String) {
		match send_event(channel, ConfigEvent::WalletLinkUrl(url)) {
			Ok(()) => self.wallet_link.lock().requested = false,
			Err(e) => tracing::warn!("could not send wallet-link url: {e}"),
		}
	}
}

fn send_event(channel: &Channel, event: ConfigEvent) -> Result<()> {
	channel.send(&ConfigMessage::new(event).into_message()?)
}

pub struct PopupCommunicator {
	launcher: Arc<dyn PopupLauncher>,
	popup_origin: String,
	shared: Arc<Shared>,
	current: Mutex<Option<Arc<Channel>>>,
	open_lock: tokio::sync::Mutex<()>,
	opening: AtomicBool,
}

impl PopupCommunicator {
	pub fn new(launcher: Arc<dyn PopupLauncher>, popup_origin: impl Into<String>, dapp_origin: impl Into<String>) -> Self {
		Self {
			launcher,
			popup_origin: popup_origin.into(),
			shared: Arc::new(Shared {
				dapp_origin: dapp_origin.into(),
				ready: watch::channel(false).0,
				selection: watch::channel(None).0,
				wallet_link: Mutex::new(WalletLinkExchange::default()),
			}),
			current: Mutex::new(None),
			open_lock: tokio::sync::Mutex::new(()),
			opening: AtomicBool::new(false),
		}
	}

	pub fn state(&self) -> PopupState {
		if self.opening.load(Ordering::SeqCst) {
			return PopupState::Opening;
		}
		match self.live_channel() {
			Some(_) => PopupState::Ready,
			None => PopupState::Closed,
		}
	}

	fn live_channel(&self) -> Option<Arc<Channel>> {
		self.current.lock().as_ref().filter(|c| !c.is_closed()).cloned()
	}

	/// Return the ready popup, opening one if none is open. Concurrent
	/// callers share a single instance.
	pub async fn connect(&self) -> Result<Arc<Channel>> {
		let _open = self.open_lock.lock().await;
		if let Some(channel) = self.live_channel() {
			return Ok(channel);
		}

		self.opening.store(true, Ordering::SeqCst);
		let result = self.open().await;
		self.opening.store(false, Ordering::SeqCst);

		let channel = result?;
		*self.current.lock() = Some(Arc::clone(&channel));
		tracing::info!(origin = %self.popup_origin, "popup ready");
		Ok(channel)
	}

	async fn open(&self) -> Result<Arc<Channel>> {
		let link = self.launcher.launch().await?;
		let channel = Channel::new(self.popup_origin.clone(), link);

		self.shared.ready.send_replace(false);
		self.shared.selection.send_replace(None);
		self.shared.wallet_link.lock().requested = false;

		let shared = Arc::clone(&self.shared);
		let weak = Arc::downgrade(&channel);
		channel.subscribe(is_config_message, move |msg| shared.on_config(&weak, msg));
		channel.start();

		let mut ready = self.shared.ready.subscribe();
		let became_ready = tokio::select! {
			biased;
			r = ready.wait_for(|ready| *ready) => r.is_ok(),
			_ = channel.closed() => false,
		};
		if !became_ready {
			return Err(Error::SelectionAborted);
		}
		Ok(channel)
	}

	/// Open the popup if needed and wait for the user to pick a signer.
	///
	/// Fails with [`Error::SelectionAborted`] if the popup closes first.
	pub async fn select_signer_type(&self) -> Result<SignerType> {
		self.shared.selection.send_replace(None);
		let channel = self.connect().await?;
		let mut selection = self.shared.selection.subscribe();

		let selected = tokio::select! {
			biased;
			s = selection.wait_for(Option::is_some) => s.ok().and_then(|s| *s),
			_ = channel.closed() => None,
		};
		selected.ok_or(Error::SelectionAborted)
	}

	/// Forward an RPC request through the popup and wait for its answer.
	///
	/// Fails with [`Error::Timeout`] if the popup closes before answering,
	/// including before it ever became ready.
	pub async fn request(&self, args: &RequestArguments) -> Result<Value> {
		let channel = self.connect().await.map_err(|e| match e {
			Error::SelectionAborted => Error::Timeout(format!("popup closed before {} was sent", args.method)),
			other => other,
		})?;
		let reply = channel.request(&Message::rpc_request(args)?).await?;
		reply.into_rpc_result()
	}

	/// Hand over the wallet-link URL. It is sent as soon as the popup has
	/// asked for it, which may already have happened.
	pub fn provide_wallet_link_url(&self, url: impl Into<String>) {
		let url = url.into();
		let requested = {
			let mut exchange = self.shared.wallet_link.lock();
			exchange.url = Some(url.clone());
			exchange.requested
		};
		if requested {
			if let Some(channel) = self.live_channel() {
				self.shared.answer_wallet_link_request(&channel, url);
			}
		}
	}

	/// Resolves when the popup that is open right now closes. Pending forever
	/// when no popup is open.
	pub async fn closed(&self) {
		match self.live_channel() {
			Some(channel) => channel.closed().await,
			None => std::future::pending().await,
		}
	}

	/// Tell the popup the QR code was scanned so it can close itself.
	pub fn wallet_link_qr_scanned(&self) -> Result<()> {
		match self.live_channel() {
			Some(channel) => send_event(&channel, ConfigEvent::WalletLinkQrScanned),
			None => {
				tracing::debug!("no popup open to notify of qr scan");
				Ok(())
			}
		}
	}

	/// Close the popup channel. Safe to call repeatedly.
	pub fn disconnect(&self) {
		if let Some(channel) = self.current.lock().take() {
			tracing::info!("disconnecting popup");
			channel.close();
		}
		*self.shared.wallet_link.lock() = WalletLinkExchange::default();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::MemoryLauncher;

	const POPUP: &str = "https://keys.example";
	const DAPP: &str = "http://localhost:3000";

	fn communicator() -> (Arc<PopupCommunicator>, MemoryLauncher) {
		let launcher = MemoryLauncher::new(POPUP);
		let popup = PopupCommunicator::new(Arc::new(launcher.clone()), POPUP, DAPP);
		(Arc::new(popup), launcher)
	}

	#[test]
	fn origin_strips_path_and_query() {
		assert_eq!(origin_of("https://keys.example/connect?x=1").unwrap(), "https://keys.example");
		assert_eq!(origin_of("http://localhost:8080/p").unwrap(), "http://localhost:8080");
		assert!(origin_of("not a url").is_err());
	}

	#[test]
	fn launch_url_carries_bridge_and_app_info() {
		let app = AppConfig {
			name: "Demo".into(),
			chain_ids: vec![1, 8453],
			..AppConfig::default()
		};
		let launcher = BrowserLauncher::new("https://keys.example/connect", 0, Duration::from_secs(1), app).unwrap();
		let url = launcher.launch_url("ws://127.0.0.1:9999");
		let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
		assert!(pairs.contains(&("bridge".into(), "ws://127.0.0.1:9999".into())));
		assert!(pairs.contains(&("app".into(), "Demo".into())));
		assert!(pairs.contains(&("chains".into(), "1,8453".into())));
		assert_eq!(url.path(), "/connect");
	}

	#[tokio::test]
	async fn handshake_announces_origin_then_selects() {
		let (popup, launcher) = communicator();
		assert_eq!(popup.state(), PopupState::Closed);

		let task = {
			let popup = Arc::clone(&popup);
			tokio::spawn(async move { popup.select_signer_type().await })
		};

		let mut peer = launcher.next_peer().await;
		peer.send_event(ConfigEvent::PopupListenerAdded).unwrap();
		assert_eq!(
			peer.recv_event().await,
			Some(ConfigEvent::DappOriginMessage(DAPP.into()))
		);
		peer.send_event(ConfigEvent::SignerTypeSelected(SignerType::Scw)).unwrap();

		assert_eq!(task.await.unwrap().unwrap(), SignerType::Scw);
		assert_eq!(popup.state(), PopupState::Ready);
		assert_eq!(launcher.launches(), 1);
	}

	#[tokio::test]
	async fn closing_popup_aborts_pending_selection() {
		let (popup, launcher) = communicator();
		let task = {
			let popup = Arc::clone(&popup);
			tokio::spawn(async move { popup.select_signer_type().await })
		};

		let mut peer = launcher.next_peer().await;
		peer.send_event(ConfigEvent::PopupListenerAdded).unwrap();
		let _ = peer.recv_event().await;
		drop(peer);

		assert!(matches!(task.await.unwrap(), Err(Error::SelectionAborted)));
		assert_eq!(popup.state(), PopupState::Closed);
	}

	#[tokio::test]
	async fn popup_unload_before_ready_aborts() {
		let (popup, launcher) = communicator();
		let task = {
			let popup = Arc::clone(&popup);
			tokio::spawn(async move { popup.select_signer_type().await })
		};

		let peer = launcher.next_peer().await;
		peer.send_event(ConfigEvent::PopupUnload).unwrap();

		assert!(matches!(task.await.unwrap(), Err(Error::SelectionAborted)));
	}

	#[tokio::test]
	async fn request_times_out_when_popup_closes_before_ready() {
		let (popup, launcher) = communicator();
		let task = {
			let popup = Arc::clone(&popup);
			tokio::spawn(async move { popup.request(&RequestArguments::method("eth_requestAccounts")).await })
		};

		drop(launcher.next_peer().await);

		assert!(matches!(task.await.unwrap(), Err(Error::Timeout(_))));
	}

	#[tokio::test]
	async fn closed_tracks_the_open_popup() {
		let (popup, launcher) = communicator();
		let opened = {
			let popup = Arc::clone(&popup);
			tokio::spawn(async move { popup.connect().await.map(|_| ()) })
		};
		let mut peer = launcher.next_peer().await;
		peer.send_event(ConfigEvent::PopupListenerAdded).unwrap();
		let _ = peer.recv_event().await;
		opened.await.unwrap().unwrap();

		let waiter = {
			let popup = Arc::clone(&popup);
			tokio::spawn(async move { popup.closed().await })
		};
		tokio::task::yield_now().await;
		assert!(!waiter.is_finished());

		peer.send_event(ConfigEvent::PopupUnload).unwrap();
		tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
	}

	#[tokio::test]
	async fn wallet_link_request_is_answered_once_url_is_known() {
		let (popup, launcher) = communicator();
		let task = {
			let popup = Arc::clone(&popup);
			tokio::spawn(async move { popup.select_signer_type().await })
		};

		let mut peer = launcher.next_peer().await;
		peer.send_event(ConfigEvent::PopupListenerAdded).unwrap();
		let _ = peer.recv_event().await;
		peer.send_event(ConfigEvent::RequestWalletLinkUrl).unwrap();

		// The request alone resolves the selection to wallet-link.
		assert_eq!(task.await.unwrap().unwrap(), SignerType::Walletlink);

		popup.provide_wallet_link_url("https://link.example/#/link?id=1");
		assert_eq!(
			peer.recv_event().await,
			Some(ConfigEvent::WalletLinkUrl("https://link.example/#/link?id=1".into()))
		);

		popup.wallet_link_qr_scanned().unwrap();
		assert_eq!(peer.recv_event().await, Some(ConfigEvent::WalletLinkQrScanned));
	}

	#[tokio::test]
	async fn concurrent_connects_share_one_instance() {
		let (popup, launcher) = communicator();
		let a = {
			let popup = Arc::clone(&popup);
			tokio::spawn(async move { popup.connect().await.map(|_| ()) })
		};
		let b = {
			let popup = Arc::clone(&popup);
			tokio::spawn(async move { popup.connect().await.map(|_| ()) })
		};

		let mut peer = launcher.next_peer().await;
		peer.send_event(ConfigEvent::PopupListenerAdded).unwrap();
		let _ = peer.recv_event().await;

		a.await.unwrap().unwrap();
		b.await.unwrap().unwrap();
		assert_eq!(launcher.launches(), 1);
	}

	#[tokio::test]
	async fn rpc_requests_are_forwarded_and_disconnect_is_idempotent() {
		let (popup, launcher) = communicator();
		let task = {
			let popup = Arc::clone(&popup);
			tokio::spawn(async move { popup.request(&RequestArguments::method("eth_chainId")).await })
		};

		let mut peer = launcher.next_peer().await;
		peer.send_event(ConfigEvent::PopupListenerAdded).unwrap();
		let _ = peer.recv_event().await;
		let req = peer.recv().await.unwrap();
		assert_eq!(req.kind, "rpc");
		assert_eq!(req.get("request").unwrap()["method"], "eth_chainId");
		peer.send(&req.reply().with("response", serde_json::json!({"result": "0x2105"})))
			.unwrap();

		assert_eq!(task.await.unwrap().unwrap(), serde_json::json!("0x2105"));

		popup.disconnect();
		popup.disconnect();
		assert_eq!(popup.state(), PopupState::Closed);
		assert!(peer.recv().await.is_none());
	}
}
