use anyhow::{bail, Result};

use super::{cache_accounts, cached_accounts, Session, CONNECTED_AT_KEY};
use crate::handler::REQUEST_ACCOUNTS;
use crate::message::RequestArguments;
use crate::popup::origin_of;
use crate::protocol::SignerType;
use crate::storage::{KeyValueStore, VERSION_KEY};

pub async fn connect(session: &Session) -> Result<()> {
	let cached = cached_accounts(&session.store)?;
	if cached.is_empty() && session.handler.configurator().signer_type().is_none() {
		eprintln!("Opening popup to choose a signer...");
	}

	let result = match session
		.handler
		.handle_request(&RequestArguments::method(REQUEST_ACCOUNTS), &cached)
		.await
	{
		Ok(result) => result,
		Err(e) if e.is_popup_closed() => bail!("Popup closed before the wallet connected ({e})"),
		Err(e) => return Err(e.into()),
	};
	let accounts: Vec<String> = serde_json::from_value(result)?;
	cache_accounts(&session.store, &accounts)?;

	let signer = session
		.handler
		.configurator()
		.signer_type()
		.map(|t| t.to_string())
		.unwrap_or_else(|| "unknown".into());
	println!("Connected via {signer}");
	for account in &accounts {
		println!("  {account}");
	}
	Ok(())
}

pub async fn select(session: &Session, signer_type: SignerType) -> Result<()> {
	session.handler.configurator().set_signer_type(signer_type).await?;
	println!("Signer set to: {signer_type}");
	Ok(())
}

pub fn disconnect(session: &Session) -> Result<()> {
	session.handler.on_disconnect();
	println!("Disconnected.");
	Ok(())
}

pub fn show_status(session: &Session) -> Result<()> {
	let signer = session
		.handler
		.configurator()
		.signer_type()
		.map(|t| t.to_string())
		.unwrap_or_else(|| "not selected".into());
	let accounts = cached_accounts(&session.store)?;
	let version = session.store.get(VERSION_KEY)?.unwrap_or_else(|| "unknown".into());

	println!("Signer");
	println!("  Type:     {signer}");
	if accounts.is_empty() {
		println!("  Accounts: not connected");
	} else {
		println!("  Accounts: {}", accounts.join(", "));
	}
	if let Some(at) = session.store.get(CONNECTED_AT_KEY)? {
		match chrono::DateTime::parse_from_rfc3339(&at) {
			Ok(t) => println!("  Since:    {}", t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")),
			Err(_) => println!("  Since:    {at}"),
		}
	}
	println!("Popup");
	println!("  URL:      {}", session.config.popup.url);
	println!("  Origin:   {}", origin_of(&session.config.popup.url)?);
	println!("  App:      {} ({})", session.config.app.name, session.config.app.origin);
	println!("Version:    {version}");
	Ok(())
}
