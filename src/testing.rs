//! Test doubles for the popup, the signers and the update listener.
//!
//! - [`MemoryLauncher`]: launches in-process popups; the test drives each
//!   one through the [`PeerEnd`] it receives from [`MemoryLauncher::next_peer`]
//! - [`FakeSigner`] / [`FakeSignerFactory`]: scripted signers
//! - [`RecordingListener`]: counts listener notifications

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::channel::memory::{self, PeerEnd};
use crate::channel::Link;
use crate::error::{Error, Result};
use crate::handler::UpdateListener;
use crate::message::RequestArguments;
use crate::popup::{PopupCommunicator, PopupLauncher};
use crate::protocol::SignerType;
use crate::signer::{Signer, SignerFactory};

pub const FAKE_WALLET_LINK_URL: &str = "https://link.example/#/link?id=fake";

#[derive(Clone)]
pub struct MemoryLauncher {
	origin: String,
	peers_tx: mpsc::UnboundedSender<PeerEnd>,
	peers_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<PeerEnd>>>,
	launches: Arc<AtomicUsize>,
}

impl MemoryLauncher {
	pub fn new(origin: &str) -> Self {
		let (peers_tx, peers_rx) = mpsc::unbounded_channel();
		Self {
			origin: origin.to_owned(),
			peers_tx,
			peers_rx: Arc::new(tokio::sync::Mutex::new(peers_rx)),
			launches: Arc::new(AtomicUsize::new(0)),
		}
	}

	/// The popup end of the next launched instance.
	pub async fn next_peer(&self) -> PeerEnd {
		self.peers_rx
			.lock()
			.await
			.recv()
			.await
			.expect("launcher dropped")
	}

	pub fn launches(&self) -> usize {
		self.launches.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl PopupLauncher for MemoryLauncher {
	async fn launch(&self) -> Result<Link> {
		self.launches.fetch_add(1, Ordering::SeqCst);
		let (link, peer) = memory::pair(&self.origin);
		self.peers_tx.send(peer).map_err(|_| Error::ChannelClosed)?;
		Ok(link)
	}
}

#[derive(Debug, Clone)]
pub struct Failure {
	pub code: i64,
	pub message: String,
}

impl Failure {
	pub fn new(code: i64, message: &str) -> Self {
		Self {
			code,
			message: message.to_owned(),
		}
	}

	fn to_error(&self) -> Error {
		Error::Rpc {
			code: self.code,
			message: self.message.clone(),
		}
	}
}

pub struct FakeSigner {
	signer_type: SignerType,
	accounts: Value,
	handshake_failure: Option<Failure>,
	request_failure: Option<Failure>,
	stall_handshakes: bool,
	handshakes: AtomicUsize,
	requests: Mutex<Vec<RequestArguments>>,
}

impl FakeSigner {
	pub fn handshakes(&self) -> usize {
		self.handshakes.load(Ordering::SeqCst)
	}

	pub fn requests(&self) -> Vec<RequestArguments> {
		self.requests.lock().clone()
	}
}

#[async_trait]
impl Signer for FakeSigner {
	fn signer_type(&self) -> SignerType {
		self.signer_type
	}

	async fn handshake(&self) -> Result<Vec<String>> {
		self.handshakes.fetch_add(1, Ordering::SeqCst);
		tokio::task::yield_now().await;
		if self.stall_handshakes {
			std::future::pending::<()>().await;
		}
		if let Some(failure) = &self.handshake_failure {
			return Err(failure.to_error());
		}
		crate::signer::parse_accounts(self.accounts.clone())
	}

	async fn request(&self, args: &RequestArguments) -> Result<Value> {
		self.requests.lock().push(args.clone());
		if let Some(failure) = &self.request_failure {
			return Err(failure.to_error());
		}
		Ok(json!({"method": args.method, "params": args.params}))
	}
}

/// Builds [`FakeSigner`]s. A wallet-link signer hands
/// [`FAKE_WALLET_LINK_URL`] to the popup on construction, like the real one.
pub struct FakeSignerFactory {
	accounts: Mutex<Value>,
	handshake_failure: Mutex<Option<Failure>>,
	request_failure: Mutex<Option<Failure>>,
	stall_handshakes: AtomicBool,
	created: Mutex<Vec<Arc<FakeSigner>>>,
}

impl FakeSignerFactory {
	pub fn new(accounts: Vec<String>) -> Self {
		Self {
			accounts: Mutex::new(json!(accounts)),
			handshake_failure: Mutex::new(None),
			request_failure: Mutex::new(None),
			stall_handshakes: AtomicBool::new(false),
			created: Mutex::new(Vec::new()),
		}
	}

	/// Make handshakes return `value` as the raw account list.
	pub fn set_raw_accounts(&self, value: Value) {
		*self.accounts.lock() = value;
	}

	pub fn fail_handshakes(&self, failure: Failure) {
		*self.handshake_failure.lock() = Some(failure);
	}

	/// Handshakes never complete, like a QR code nobody scans.
	pub fn stall_handshakes(&self) {
		self.stall_handshakes.store(true, Ordering::SeqCst);
	}

	pub fn fail_requests(&self, failure: Failure) {
		*self.request_failure.lock() = Some(failure);
	}

	pub fn created(&self) -> usize {
		self.created.lock().len()
	}

	pub fn last_signer(&self) -> Option<Arc<FakeSigner>> {
		self.created.lock().last().cloned()
	}
}

impl SignerFactory for FakeSignerFactory {
	fn create(&self, signer_type: SignerType, popup: &Arc<PopupCommunicator>) -> Result<Arc<dyn Signer>> {
		if signer_type == SignerType::Walletlink {
			popup.provide_wallet_link_url(FAKE_WALLET_LINK_URL);
		}
		let signer = Arc::new(FakeSigner {
			signer_type,
			accounts: self.accounts.lock().clone(),
			handshake_failure: self.handshake_failure.lock().clone(),
			request_failure: self.request_failure.lock().clone(),
			stall_handshakes: self.stall_handshakes.load(Ordering::SeqCst),
			handshakes: AtomicUsize::new(0),
			requests: Mutex::new(Vec::new()),
		});
		self.created.lock().push(Arc::clone(&signer));
		Ok(signer)
	}
}

#[derive(Default)]
pub struct RecordingListener {
	connects: AtomicUsize,
	resets: AtomicUsize,
}

impl RecordingListener {
	pub fn connects(&self) -> usize {
		self.connects.load(Ordering::SeqCst)
	}

	pub fn resets(&self) -> usize {
		self.resets.load(Ordering::SeqCst)
	}
}

impl UpdateListener for RecordingListener {
	fn on_connect(&self) {
		self.connects.fetch_add(1, Ordering::SeqCst);
	}

	fn on_reset_connection(&self) {
		self.resets.fetch_add(1, Ordering::SeqCst);
	}
}
