//! End-to-end connect flows: handler, configurator and popup wired over an
//! in-process popup and a file-backed session store.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use popup_signer::channel::memory::PeerEnd;
use popup_signer::configurator::SignerConfigurator;
use popup_signer::handler::{SignRequestHandler, REQUEST_ACCOUNTS};
use popup_signer::message::RequestArguments;
use popup_signer::popup::PopupCommunicator;
use popup_signer::protocol::{ConfigEvent, SignerType};
use popup_signer::storage::{FileStore, KeyValueStore, ScopedStore, SCOPE, SIGNER_TYPE_KEY};
use popup_signer::testing::{Failure, FakeSignerFactory, MemoryLauncher, RecordingListener, FAKE_WALLET_LINK_URL};
use popup_signer::Error;

const POPUP: &str = "https://keys.example";
const DAPP: &str = "http://localhost:3000";
const ACCOUNT: &str = "0xABCDEF0123456789ABCDEF0123456789ABCDEF01";

struct Dapp {
	_dir: TempDir,
	store: ScopedStore,
	launcher: MemoryLauncher,
	factory: Arc<FakeSignerFactory>,
	listener: Arc<RecordingListener>,
	handler: SignRequestHandler,
}

fn session_store(path: &Path) -> ScopedStore {
	ScopedStore::new(SCOPE, Arc::new(FileStore::new(path)))
}

fn dapp(persisted: Option<&str>) -> Dapp {
	let dir = tempfile::tempdir().unwrap();
	let store = session_store(&dir.path().join("session.toml"));
	if let Some(v) = persisted {
		store.set(SIGNER_TYPE_KEY, v).unwrap();
	}

	let launcher = MemoryLauncher::new(POPUP);
	let popup = Arc::new(PopupCommunicator::new(Arc::new(launcher.clone()), POPUP, DAPP));
	let factory = Arc::new(FakeSignerFactory::new(vec![ACCOUNT.into()]));
	let configurator = Arc::new(SignerConfigurator::new(Arc::new(store.clone()), popup, factory.clone()).unwrap());
	let listener = Arc::new(RecordingListener::default());
	let handler = SignRequestHandler::new(configurator, listener.clone());
	Dapp {
		_dir: dir,
		store,
		launcher,
		factory,
		listener,
		handler,
	}
}

/// Complete the popup's setup handshake and return its end of the link.
async fn popup_ready(launcher: &MemoryLauncher) -> PeerEnd {
	let mut peer = launcher.next_peer().await;
	peer.send_event(ConfigEvent::PopupListenerAdded).unwrap();
	assert_eq!(peer.recv_event().await, Some(ConfigEvent::DappOriginMessage(DAPP.into())));
	peer
}

async fn request_accounts(handler: &SignRequestHandler) -> popup_signer::Result<serde_json::Value> {
	handler
		.handle_request(&RequestArguments::method(REQUEST_ACCOUNTS), &[])
		.await
}

#[tokio::test]
async fn fresh_session_selects_scw_in_popup() {
	let d = dapp(None);

	let (result, _peer) = tokio::join!(request_accounts(&d.handler), async {
		let peer = popup_ready(&d.launcher).await;
		peer.send_event(ConfigEvent::SignerTypeSelected(SignerType::Scw)).unwrap();
		peer
	});

	assert_eq!(result.unwrap(), json!([ACCOUNT]));
	assert_eq!(d.listener.connects(), 1);
	assert_eq!(d.launcher.launches(), 1);
	assert_eq!(d.store.get(SIGNER_TYPE_KEY).unwrap().as_deref(), Some("scw"));
}

#[tokio::test]
async fn selection_survives_restart() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("session.toml");
	session_store(&path).set(SIGNER_TYPE_KEY, "extension").unwrap();

	// A later run: fresh objects over the same file, accounts from the cache.
	let reopened = session_store(&path);
	let launcher = MemoryLauncher::new(POPUP);
	let popup = Arc::new(PopupCommunicator::new(Arc::new(launcher.clone()), POPUP, DAPP));
	let factory = Arc::new(FakeSignerFactory::new(vec![ACCOUNT.into()]));
	let configurator = SignerConfigurator::new(Arc::new(reopened), popup, factory.clone()).unwrap();
	assert_eq!(configurator.signer_type(), Some(SignerType::Extension));

	let listener = Arc::new(RecordingListener::default());
	let handler = SignRequestHandler::new(Arc::new(configurator), listener.clone());
	let request = RequestArguments::new("personal_sign", json!(["0xdeadbeef", ACCOUNT]));
	let result = handler.handle_request(&request, &[ACCOUNT.into()]).await.unwrap();

	assert_eq!(result["method"], "personal_sign");
	assert_eq!(factory.last_signer().unwrap().requests(), vec![request]);
	assert_eq!(listener.resets(), 0);
	assert_eq!(launcher.launches(), 0);
	assert_eq!(session_store(&path).get(SIGNER_TYPE_KEY).unwrap().as_deref(), Some("extension"));
}

#[tokio::test]
async fn persisted_extension_never_opens_popup() {
	let d = dapp(Some("extension"));

	let result = request_accounts(&d.handler).await.unwrap();

	assert_eq!(result, json!([ACCOUNT]));
	assert_eq!(d.launcher.launches(), 0);
	assert_eq!(d.factory.last_signer().unwrap().handshakes(), 1);
	assert_eq!(d.listener.connects(), 1);
}

#[tokio::test]
async fn wallet_link_handshake_failure_tears_everything_down() {
	let d = dapp(None);
	d.factory.fail_handshakes(Failure::new(4001, "User rejected"));

	let (result, mut peer) = tokio::join!(request_accounts(&d.handler), async {
		let mut peer = popup_ready(&d.launcher).await;
		peer.send_event(ConfigEvent::RequestWalletLinkUrl).unwrap();
		assert_eq!(peer.recv_event().await, Some(ConfigEvent::WalletLinkUrl(FAKE_WALLET_LINK_URL.into())));
		peer
	});

	match result.unwrap_err() {
		Error::Rpc { code, message } => {
			assert_eq!(code, 4001);
			assert_eq!(message, "User rejected");
		}
		other => panic!("unexpected error: {other:?}"),
	}
	assert_eq!(d.listener.resets(), 1);
	assert_eq!(d.listener.connects(), 0);
	assert_eq!(d.store.get(SIGNER_TYPE_KEY).unwrap(), None);

	let closed = tokio::time::timeout(Duration::from_secs(1), peer.recv()).await.unwrap();
	assert!(closed.is_none(), "popup link should be closed");
}

#[tokio::test]
async fn closing_popup_during_wallet_link_pairing_fails() {
	let d = dapp(None);
	d.factory.stall_handshakes();

	let flow = async {
		tokio::join!(request_accounts(&d.handler), async {
			let mut peer = popup_ready(&d.launcher).await;
			peer.send_event(ConfigEvent::RequestWalletLinkUrl).unwrap();
			assert_eq!(peer.recv_event().await, Some(ConfigEvent::WalletLinkUrl(FAKE_WALLET_LINK_URL.into())));
			peer.send_event(ConfigEvent::PopupUnload).unwrap();
		})
	};
	let (result, _) = tokio::time::timeout(Duration::from_secs(5), flow).await.unwrap();

	assert!(matches!(result.unwrap_err(), Error::SelectionAborted));
	assert_eq!(d.listener.resets(), 1);
	assert_eq!(d.listener.connects(), 0);
	assert_eq!(d.store.get(SIGNER_TYPE_KEY).unwrap(), None);
}

#[tokio::test]
async fn wallet_link_success_confirms_scan() {
	let d = dapp(None);

	let (result, mut peer) = tokio::join!(request_accounts(&d.handler), async {
		let peer = popup_ready(&d.launcher).await;
		peer.send_event(ConfigEvent::RequestWalletLinkUrl).unwrap();
		peer
	});

	assert_eq!(result.unwrap(), json!([ACCOUNT]));
	assert_eq!(peer.recv_event().await, Some(ConfigEvent::WalletLinkUrl(FAKE_WALLET_LINK_URL.into())));
	assert_eq!(peer.recv_event().await, Some(ConfigEvent::WalletLinkQrScanned));
	assert_eq!(d.store.get(SIGNER_TYPE_KEY).unwrap().as_deref(), Some("walletlink"));
}

#[tokio::test]
async fn closing_popup_during_selection_fails() {
	let d = dapp(None);

	let (result, _) = tokio::join!(request_accounts(&d.handler), async {
		let peer = popup_ready(&d.launcher).await;
		peer.send_event(ConfigEvent::PopupUnload).unwrap();
	});

	assert!(matches!(result.unwrap_err(), Error::SelectionAborted));
	assert_eq!(d.listener.connects(), 0);
	assert_eq!(d.store.get(SIGNER_TYPE_KEY).unwrap(), None);
	assert_eq!(d.factory.created(), 0);
}

#[tokio::test]
async fn popup_vanishing_before_setup_fails() {
	let d = dapp(None);

	let (result, _) = tokio::join!(request_accounts(&d.handler), async {
		drop(d.launcher.next_peer().await);
	});

	assert!(matches!(result.unwrap_err(), Error::SelectionAborted));
}

#[tokio::test]
async fn concurrent_connects_share_one_popup() {
	let d = dapp(None);

	let (first, second, _peer) = tokio::join!(request_accounts(&d.handler), request_accounts(&d.handler), async {
		let peer = popup_ready(&d.launcher).await;
		peer.send_event(ConfigEvent::SignerTypeSelected(SignerType::Scw)).unwrap();
		peer
	});

	assert_eq!(first.unwrap(), json!([ACCOUNT]));
	assert_eq!(second.unwrap(), json!([ACCOUNT]));
	assert_eq!(d.launcher.launches(), 1);
	assert_eq!(d.factory.created(), 1);
	assert_eq!(d.factory.last_signer().unwrap().handshakes(), 1);
	assert_eq!(d.listener.connects(), 2);
}

#[tokio::test]
async fn disconnect_then_reconnect_asks_again() {
	let d = dapp(Some("scw"));
	request_accounts(&d.handler).await.unwrap();

	d.handler.on_disconnect();
	assert_eq!(d.store.get(SIGNER_TYPE_KEY).unwrap(), None);
	assert_eq!(d.listener.resets(), 1);

	let (result, _peer) = tokio::join!(request_accounts(&d.handler), async {
		let peer = popup_ready(&d.launcher).await;
		peer.send_event(ConfigEvent::SignerTypeSelected(SignerType::Extension)).unwrap();
		peer
	});
	assert_eq!(result.unwrap(), json!([ACCOUNT]));
	assert_eq!(d.store.get(SIGNER_TYPE_KEY).unwrap().as_deref(), Some("extension"));
}
