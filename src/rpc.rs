use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};

use crate::error::Result;
use crate::message::{RequestArguments, RpcResponse};

/// Raw JSON-RPC 2.0 over HTTP, as spoken by the extension endpoint and the
/// wallet-link relay.
pub struct RpcClient {
	url: String,
	http: reqwest::Client,
	headers: Vec<(&'static str, String)>,
	next_id: AtomicU64,
}

impl RpcClient {
	pub fn new(url: &str) -> Self {
		Self {
			url: url.to_owned(),
			http: reqwest::Client::new(),
			headers: Vec::new(),
			next_id: AtomicU64::new(1),
		}
	}

	/// Attach a header to every call.
	pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
		self.headers.push((name, value.into()));
		self
	}

	/// Build the request body for `args`.
	pub fn body(&self, args: &RequestArguments) -> Value {
		let params = match &args.params {
			Value::Null => json!([]),
			other => other.clone(),
		};
		json!({
			"id": self.next_id.fetch_add(1, Ordering::Relaxed),
			"jsonrpc": "2.0",
			"method": args.method,
			"params": params,
		})
	}

	/// Send `args` and return the result, or the endpoint's error as
	/// [`crate::Error::Rpc`].
	pub async fn call(&self, args: &RequestArguments) -> Result<Value> {
		let body = self.body(args);
		tracing::debug!(url = %self.url, method = %args.method, "rpc call");

		let mut req = self.http.post(&self.url).json(&body);
		for (name, value) in &self.headers {
			req = req.header(*name, value);
		}
		let resp: RpcResponse = req.send().await?.error_for_status()?.json().await?;
		resp.into_result()
	}
}
