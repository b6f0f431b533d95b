//! Route wallet requests to one of several signer backends, chosen once
//! per session in a browser popup and remembered across runs.

pub mod channel;
pub mod cli;
pub mod commands;
pub mod config;
pub mod configurator;
pub mod error;
pub mod handler;
pub mod logging;
pub mod message;
pub mod popup;
pub mod protocol;
pub mod rpc;
pub mod signer;
pub mod storage;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, Result};
