//! Wire envelope shared by every frame exchanged with the popup.
//!
//! A message is a JSON object with an `id` and a `type`; the remaining
//! fields depend on the type. A response reuses the `id` of the request it
//! answers, which is how [`crate::channel::Channel::request`] pairs them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub const RPC_TYPE: &str = "rpc";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
	/// Fresh 128-bit id, hex encoded.
	pub fn random() -> Self {
		let bytes: [u8; 16] = rand::random();
		Self(hex::encode(bytes))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<&str> for MessageId {
	fn from(s: &str) -> Self {
		Self(s.to_owned())
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
	pub id: MessageId,
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(flatten)]
	pub body: Map<String, Value>,
}

impl Message {
	pub fn new(kind: impl Into<String>) -> Self {
		Self {
			id: MessageId::random(),
			kind: kind.into(),
			body: Map::new(),
		}
	}

	/// Add a payload field.
	pub fn with(mut self, key: &str, value: Value) -> Self {
		self.body.insert(key.to_owned(), value);
		self
	}

	/// A response to `self`: same id, same type, new payload.
	pub fn reply(&self) -> Self {
		Self {
			id: self.id.clone(),
			kind: self.kind.clone(),
			body: Map::new(),
		}
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.body.get(key)
	}

	/// Wrap an RPC request for forwarding over the popup channel.
	pub fn rpc_request(args: &RequestArguments) -> Result<Self> {
		Ok(Self::new(RPC_TYPE).with("request", serde_json::to_value(args)?))
	}

	/// Unpack an RPC response frame into the result value or the error the
	/// popup reported for it.
	pub fn into_rpc_result(mut self) -> Result<Value> {
		let response = self
			.body
			.remove("response")
			.ok_or_else(|| Error::InvalidMessage(format!("rpc reply {} has no response", self.id)))?;
		let response: RpcResponse = serde_json::from_value(response)?;
		response.into_result()
	}
}

/// The `{method, params}` pair every provider request carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestArguments {
	pub method: String,
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub params: Value,
}

impl RequestArguments {
	pub fn new(method: impl Into<String>, params: Value) -> Self {
		Self {
			method: method.into(),
			params,
		}
	}

	pub fn method(method: impl Into<String>) -> Self {
		Self::new(method, Value::Null)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
	pub code: i64,
	pub message: String,
}

/// Result-or-error half of an RPC exchange, shared by the popup channel and
/// the HTTP JSON-RPC endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<RpcErrorBody>,
}

impl RpcResponse {
	pub fn into_result(self) -> Result<Value> {
		match (self.result, self.error) {
			(_, Some(err)) => Err(Error::Rpc {
				code: err.code,
				message: err.message,
			}),
			(Some(result), None) => Ok(result),
			(None, None) => Ok(Value::Null),
		}
	}
}
