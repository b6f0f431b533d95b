use anyhow::{bail, Result};
use serde_json::Value;

use super::{cached_accounts, Session};
use crate::message::RequestArguments;

pub async fn run(session: &Session, method: &str, params: Option<&str>) -> Result<()> {
	let params = match params {
		Some(raw) => serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("params must be JSON: {e}"))?,
		None => Value::Null,
	};
	let request = RequestArguments::new(method, params);

	// Router boundary: anything the signer does not gate is not ours.
	if !session.handler.can_handle_request(&request) {
		bail!("{method} does not go through a signer; send it to a node instead");
	}

	let accounts = cached_accounts(&session.store)?;
	let result = session.handler.handle_request(&request, &accounts).await?;
	println!("{}", serde_json::to_string_pretty(&result)?);
	Ok(())
}
