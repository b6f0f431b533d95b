//! Injected key-value persistence.
//!
//! The selection record and the CLI's account cache live behind the
//! [`KeyValueStore`] capability so the configurator never touches a global.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};

pub const SCOPE: &str = "popup-signer";
pub const SIGNER_TYPE_KEY: &str = "SignerType";
pub const ADDRESSES_KEY: &str = "Addresses";
pub const VERSION_KEY: &str = "VERSION";

pub trait KeyValueStore: Send + Sync {
	fn get(&self, key: &str) -> Result<Option<String>>;
	fn set(&self, key: &str, value: &str) -> Result<()>;
	fn remove(&self, key: &str) -> Result<()>;
}

/// Prefixes every key with `-<scope>:` so several tenants can share one
/// backing store.
#[derive(Clone)]
pub struct ScopedStore {
	scope: String,
	inner: Arc<dyn KeyValueStore>,
}

impl ScopedStore {
	pub fn new(scope: impl Into<String>, inner: Arc<dyn KeyValueStore>) -> Self {
		Self {
			scope: scope.into(),
			inner,
		}
	}

	fn scoped(&self, key: &str) -> String {
		format!("-{}:{}", self.scope, key)
	}

	/// Record the running crate version.
	pub fn stamp_version(&self) -> Result<()> {
		self.set(VERSION_KEY, env!("CARGO_PKG_VERSION"))
	}
}

impl KeyValueStore for ScopedStore {
	fn get(&self, key: &str) -> Result<Option<String>> {
		self.inner.get(&self.scoped(key))
	}

	fn set(&self, key: &str, value: &str) -> Result<()> {
		self.inner.set(&self.scoped(key), value)
	}

	fn remove(&self, key: &str) -> Result<()> {
		self.inner.remove(&self.scoped(key))
	}
}

#[derive(Default)]
pub struct MemoryStore {
	entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

impl KeyValueStore for MemoryStore {
	fn get(&self, key: &str) -> Result<Option<String>> {
		Ok(self.entries.lock().get(key).cloned())
	}

	fn set(&self, key: &str, value: &str) -> Result<()> {
		self.entries.lock().insert(key.to_owned(), value.to_owned());
		Ok(())
	}

	fn remove(&self, key: &str) -> Result<()> {
		self.entries.lock().remove(key);
		Ok(())
	}
}

/// A flat string map kept in a TOML file, rewritten on every change.
pub struct FileStore {
	path: PathBuf,
	lock: Mutex<()>,
}

impl FileStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			lock: Mutex::new(()),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load(&self) -> Result<BTreeMap<String, String>> {
		if !self.path.exists() {
			return Ok(BTreeMap::new());
		}
		let content = std::fs::read_to_string(&self.path)?;
		toml::from_str(&content).map_err(|e| Error::Storage(format!("{}: {e}", self.path.display())))
	}

	fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
		if let Some(parent) = self.path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let content = toml::to_string_pretty(entries).map_err(|e| Error::Storage(e.to_string()))?;
		std::fs::write(&self.path, content)?;
		Ok(())
	}
}

impl KeyValueStore for FileStore {
	fn get(&self, key: &str) -> Result<Option<String>> {
		let _guard = self.lock.lock();
		Ok(self.load()?.remove(key))
	}

	fn set(&self, key: &str, value: &str) -> Result<()> {
		let _guard = self.lock.lock();
		let mut entries = self.load()?;
		entries.insert(key.to_owned(), value.to_owned());
		self.save(&entries)
	}

	fn remove(&self, key: &str) -> Result<()> {
		let _guard = self.lock.lock();
		let mut entries = self.load()?;
		if entries.remove(key).is_some() {
			self.save(&entries)?;
		}
		Ok(())
	}
}
