//! Decides which signer backend is active and keeps that decision across
//! runs.
//!
//! State moves `Unknown -> Known(type) -> Ready(type, signer)`. The type is
//! restored from the store at construction, chosen in the popup otherwise,
//! and forgotten again by [`SignerConfigurator::on_disconnect`].

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::popup::PopupCommunicator;
use crate::protocol::SignerType;
use crate::signer::{Signer, SignerFactory};
use crate::storage::{KeyValueStore, SIGNER_TYPE_KEY};

#[derive(Clone)]
enum SignerState {
	Unknown,
	Known(SignerType),
	Ready {
		signer_type: SignerType,
		signer: Arc<dyn Signer>,
		accounts: Option<Vec<String>>,
	},
}

impl SignerState {
	fn signer_type(&self) -> Option<SignerType> {
		match self {
			Self::Unknown => None,
			Self::Known(t) | Self::Ready { signer_type: t, .. } => Some(*t),
		}
	}
}

pub struct SignerConfigurator {
	store: Arc<dyn KeyValueStore>,
	popup: Arc<PopupCommunicator>,
	factory: Arc<dyn SignerFactory>,
	state: Mutex<SignerState>,
	/// Serialises selection, initialisation and handshake.
	transition: tokio::sync::Mutex<()>,
}

impl SignerConfigurator {
	pub fn new(
		store: Arc<dyn KeyValueStore>,
		popup: Arc<PopupCommunicator>,
		factory: Arc<dyn SignerFactory>,
	) -> Result<Self> {
		let state = match store.get(SIGNER_TYPE_KEY)? {
			None => SignerState::Unknown,
			Some(raw) => match raw.parse::<SignerType>() {
				Ok(t) => {
					tracing::debug!(signer_type = %t, "restored signer selection");
					SignerState::Known(t)
				}
				Err(_) => {
					tracing::warn!(value = %raw, "discarding unreadable signer selection");
					store.remove(SIGNER_TYPE_KEY)?;
					SignerState::Unknown
				}
			},
		};
		Ok(Self {
			store,
			popup,
			factory,
			state: Mutex::new(state),
			transition: tokio::sync::Mutex::new(()),
		})
	}

	pub fn popup(&self) -> &Arc<PopupCommunicator> {
		&self.popup
	}

	pub fn signer_type(&self) -> Option<SignerType> {
		self.state.lock().signer_type()
	}

	/// The signer for the known type, built on first use. A type restored
	/// from storage is enough; no handshake is run here.
	pub async fn active_signer(&self) -> Result<Option<Arc<dyn Signer>>> {
		if self.signer_type().is_none() {
			return Ok(None);
		}
		self.init_signer().await.map(Some)
	}

	/// Ask the popup for a signer type unless one is already known. May wait
	/// as long as the user takes to choose.
	pub async fn complete_signer_type_selection(&self) -> Result<SignerType> {
		let _transition = self.transition.lock().await;
		if let Some(t) = self.signer_type() {
			return Ok(t);
		}

		let selected = self.popup.select_signer_type().await?;
		self.persist(selected)?;
		Ok(selected)
	}

	/// Record `signer_type` without asking the popup.
	pub async fn set_signer_type(&self, signer_type: SignerType) -> Result<()> {
		let _transition = self.transition.lock().await;
		if self.signer_type() == Some(signer_type) {
			return Ok(());
		}
		self.persist(signer_type)
	}

	fn persist(&self, signer_type: SignerType) -> Result<()> {
		self.store.set(SIGNER_TYPE_KEY, signer_type.as_str())?;
		*self.state.lock() = SignerState::Known(signer_type);
		tracing::info!(%signer_type, "signer type selected");
		Ok(())
	}

	/// Build the signer for the known type, or reuse the one already built.
	pub async fn init_signer(&self) -> Result<Arc<dyn Signer>> {
		let _transition = self.transition.lock().await;
		self.init_signer_locked()
	}

	fn init_signer_locked(&self) -> Result<Arc<dyn Signer>> {
		let mut state = self.state.lock();
		let signer_type = match &*state {
			SignerState::Unknown => return Err(Error::Internal("no signer type selected".into())),
			SignerState::Ready { signer, .. } => return Ok(Arc::clone(signer)),
			SignerState::Known(t) => *t,
		};

		let signer = self.factory.create(signer_type, &self.popup)?;
		*state = SignerState::Ready {
			signer_type,
			signer: Arc::clone(&signer),
			accounts: None,
		};
		tracing::debug!(%signer_type, "signer initialised");
		Ok(signer)
	}

	/// Run the signer handshake once; later callers get the same accounts.
	pub async fn handshake(&self) -> Result<Vec<String>> {
		let _transition = self.transition.lock().await;
		if let SignerState::Ready {
			accounts: Some(accounts),
			..
		} = &*self.state.lock()
		{
			return Ok(accounts.clone());
		}

		let signer = self.init_signer_locked()?;
		let accounts = signer.handshake().await?;

		if let SignerState::Ready {
			signer: current,
			accounts: cached,
			..
		} = &mut *self.state.lock()
		{
			if Arc::ptr_eq(current, &signer) {
				*cached = Some(accounts.clone());
			}
		}
		Ok(accounts)
	}

	/// Forget the selection and drop the active signer.
	pub fn on_disconnect(&self) -> Result<()> {
		*self.state.lock() = SignerState::Unknown;
		self.store.remove(SIGNER_TYPE_KEY)?;
		tracing::info!("signer selection cleared");
		Ok(())
	}
}
