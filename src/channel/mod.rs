//! Bidirectional message channel to an isolated context.
//!
//! A [`Channel`] sits on top of a [`Link`], a pair of unbounded queues of
//! [`Frame`]s supplied by an adapter ([`memory`] for in-process peers,
//! [`websocket`] for a browser popup). The channel:
//!
//! - stamps every outbound frame with the verified target origin and drops
//!   inbound frames from any other origin
//! - pairs responses with pending requests by message id
//! - hands unsolicited messages to subscribers in arrival order
//! - fails every pending request and drops every subscriber once the link
//!   goes away, so nothing waits on a closed popup

pub mod memory;
pub mod websocket;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{Error, Result};
use crate::message::{Message, MessageId};

/// One JSON payload plus the origin it is addressed to (outbound) or came
/// from (inbound).
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
	pub origin: String,
	pub payload: Value,
}

/// The adapter side of a channel.
pub struct Link {
	pub outbound: mpsc::UnboundedSender<Frame>,
	pub inbound: mpsc::UnboundedReceiver<Frame>,
}

/// Returned by a subscription handler after each delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
	Keep,
	Unsubscribe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SubscriptionId(u64);

type Predicate = Arc<dyn Fn(&Message) -> bool + Send + Sync>;
type Handler = Arc<Mutex<dyn FnMut(&Message) -> Flow + Send>>;
type PendingMap = Mutex<HashMap<MessageId, oneshot::Sender<Message>>>;

struct Subscriber {
	id: SubscriptionId,
	predicate: Predicate,
	handler: Handler,
}

struct Shared {
	target_origin: String,
	pending: PendingMap,
	subscribers: Mutex<Vec<Subscriber>>,
	next_subscription: AtomicU64,
	closed: watch::Sender<bool>,
}

impl Shared {
	fn deliver(&self, msg: Message) {
		if let Some(waiter) = self.pending.lock().remove(&msg.id) {
			tracing::debug!(id = %msg.id, "response correlated");
			let _ = waiter.send(msg);
			return;
		}

		// Snapshot so handlers can subscribe or send without holding the lock.
		let snapshot: Vec<(SubscriptionId, Predicate, Handler)> = self
			.subscribers
			.lock()
			.iter()
			.map(|s| (s.id, Arc::clone(&s.predicate), Arc::clone(&s.handler)))
			.collect();

		let mut done = Vec::new();
		let mut matched = false;
		for (id, predicate, handler) in snapshot {
			if !predicate(&msg) {
				continue;
			}
			matched = true;
			if (&mut *handler.lock())(&msg) == Flow::Unsubscribe {
				done.push(id);
			}
		}

		if !matched {
			tracing::debug!(id = %msg.id, kind = %msg.kind, "unsolicited message ignored");
		}
		if !done.is_empty() {
			self.subscribers.lock().retain(|s| !done.contains(&s.id));
		}
	}

	fn shutdown(&self) {
		if self.closed.send_replace(true) {
			return;
		}
		let pending = std::mem::take(&mut *self.pending.lock());
		let subscribers = std::mem::take(&mut *self.subscribers.lock());
		tracing::debug!(
			pending = pending.len(),
			subscribers = subscribers.len(),
			"channel closed"
		);
	}
}

pub struct Channel {
	shared: Arc<Shared>,
	outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
	inbound: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
}

impl Channel {
	/// Wire a channel to `link`, accepting traffic only from `target_origin`,
	/// and start pumping inbound frames. Must be called inside a tokio runtime.
	pub fn open(target_origin: impl Into<String>, link: Link) -> Arc<Self> {
		let channel = Self::new(target_origin, link);
		channel.start();
		channel
	}

	/// Like [`Channel::open`] but idle until [`Channel::start`], so
	/// subscribers can be registered before the first frame is delivered.
	pub fn new(target_origin: impl Into<String>, link: Link) -> Arc<Self> {
		let Link { outbound, inbound } = link;
		let (closed, _) = watch::channel(false);
		Arc::new(Self {
			shared: Arc::new(Shared {
				target_origin: target_origin.into(),
				pending: Mutex::new(HashMap::new()),
				subscribers: Mutex::new(Vec::new()),
				next_subscription: AtomicU64::new(0),
				closed,
			}),
			outbound: Mutex::new(Some(outbound)),
			inbound: Mutex::new(Some(inbound)),
		})
	}

	/// Spawn the inbound pump. Later calls are no-ops.
	pub fn start(&self) {
		let Some(mut inbound) = self.inbound.lock().take() else {
			return;
		};
		let mut closed_rx = self.shared.closed.subscribe();
		let pump = Arc::clone(&self.shared);
		tokio::spawn(async move {
			loop {
				tokio::select! {
					frame = inbound.recv() => {
						let Some(frame) = frame else { break };
						if frame.origin != pump.target_origin {
							tracing::warn!(
								expected = %pump.target_origin,
								actual = %frame.origin,
								"dropping frame from unexpected origin"
							);
							continue;
						}
						match serde_json::from_value::<Message>(frame.payload) {
							Ok(msg) => pump.deliver(msg),
							Err(e) => tracing::warn!("dropping malformed frame: {e}"),
						}
					}
					_ = closed_rx.wait_for(|closed| *closed) => break,
				}
			}
			pump.shutdown();
		});
	}

	pub fn target_origin(&self) -> &str {
		&self.shared.target_origin
	}

	pub fn is_closed(&self) -> bool {
		*self.shared.closed.borrow()
	}

	/// Resolves once the channel has closed, from either side.
	pub async fn closed(&self) {
		let mut rx = self.shared.closed.subscribe();
		let _ = rx.wait_for(|closed| *closed).await;
	}

	/// Deliver `msg` without waiting for an answer.
	pub fn send(&self, msg: &Message) -> Result<()> {
		if self.is_closed() {
			return Err(Error::ChannelClosed);
		}
		let payload = serde_json::to_value(msg)?;
		let guard = self.outbound.lock();
		let tx = guard.as_ref().ok_or(Error::ChannelClosed)?;
		tracing::debug!(id = %msg.id, kind = %msg.kind, "sending");
		tx.send(Frame {
			origin: self.shared.target_origin.clone(),
			payload,
		})
		.map_err(|_| Error::ChannelClosed)
	}

	/// Send `msg` and wait for the message that carries the same id.
	///
	/// Fails with [`Error::Timeout`] if the channel closes first.
	pub async fn request(&self, msg: &Message) -> Result<Message> {
		let (tx, rx) = oneshot::channel();
		self.shared.pending.lock().insert(msg.id.clone(), tx);
		let guard = CancelGuard {
			id: msg.id.clone(),
			shared: Arc::clone(&self.shared),
		};

		if let Err(e) = self.send(msg) {
			drop(guard);
			return Err(e);
		}
		if self.is_closed() {
			return Err(Error::Timeout(format!("popup closed before replying to {}", msg.id)));
		}

		ResponseFuture { rx, guard }.await
	}

	/// Register `handler` for unsolicited messages matching `predicate`. The
	/// handler drops itself by returning [`Flow::Unsubscribe`].
	pub fn subscribe<P, H>(&self, predicate: P, handler: H)
	where
		P: Fn(&Message) -> bool + Send + Sync + 'static,
		H: FnMut(&Message) -> Flow + Send + 'static,
	{
		let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
		let mut subscribers = self.shared.subscribers.lock();
		// shutdown drains under this same lock.
		if self.is_closed() {
			return;
		}
		subscribers.push(Subscriber {
			id,
			predicate: Arc::new(predicate),
			handler: Arc::new(Mutex::new(handler)),
		});
	}

	/// Tear the channel down. Idempotent.
	pub fn close(&self) {
		self.outbound.lock().take();
		self.shared.shutdown();
	}
}

impl Drop for Channel {
	fn drop(&mut self) {
		self.shared.shutdown();
	}
}

/// Removes the pending entry when a request future is dropped early.
struct CancelGuard {
	id: MessageId,
	shared: Arc<Shared>,
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		self.shared.pending.lock().remove(&self.id);
	}
}

struct ResponseFuture {
	rx: oneshot::Receiver<Message>,
	guard: CancelGuard,
}

impl Future for ResponseFuture {
	type Output = Result<Message>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(Ok(msg)) => Poll::Ready(Ok(msg)),
			Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Timeout(format!(
				"popup closed before replying to {}",
				self.guard.id
			)))),
			Poll::Pending => Poll::Pending,
		}
	}
}
