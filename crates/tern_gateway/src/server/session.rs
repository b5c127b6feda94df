#![forbid(unsafe_code)]

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{error, warn};

use tern_domain::{Activity, ChannelId, ConversationId, PresenceStatus, ServerId, SessionId, UserBrief, UserId};
use tern_protocol::{EventType, Frame, OpCode, encode_frame};

/// Read deadline; refreshed only by application-level heartbeats and
/// transport keepalive pongs. Other inbound traffic does not extend it.
pub const READ_DEADLINE: Duration = Duration::from_secs(60);

/// Keepalive ping period (read deadline x 9/10).
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(54);

/// Deadline for a single transport write.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Bounded outbound queue depth per session.
pub const SEND_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct SessionState {
	outbound: Option<mpsc::Sender<String>>,

	identified: bool,
	user_id: Option<UserId>,
	user: Option<UserBrief>,

	status: PresenceStatus,
	activity: Option<Activity>,

	focused_channel: Option<ChannelId>,
	focused_server: Option<ServerId>,
	focused_conversation: Option<ConversationId>,

	servers: HashSet<ServerId>,
	conversations: HashSet<ConversationId>,
}

/// One connected client.
///
/// The reader and writer tasks live in `connection`; everything they share
/// sits behind this session's own lock. The hub holds the `Arc` and is the
/// only component that mutates cross-session state.
#[derive(Debug)]
pub struct Session {
	session_id: SessionId,
	state: RwLock<SessionState>,
}

impl Session {
	/// New unidentified session feeding the given outbound queue.
	pub fn new(outbound: mpsc::Sender<String>) -> Self {
		Self {
			session_id: SessionId::generate(),
			state: RwLock::new(SessionState {
				outbound: Some(outbound),
				..SessionState::default()
			}),
		}
	}

	pub fn session_id(&self) -> SessionId {
		self.session_id
	}

	/// Enqueue a frame without blocking. A full queue drops the frame rather
	/// than stalling fan-out; a closed session swallows the send.
	pub async fn send(&self, frame: &Frame) {
		let text = match encode_frame(frame) {
			Ok(text) => text,
			Err(err) => {
				error!(session_id = %self.session_id, error = %err, "failed to encode outbound frame");
				return;
			}
		};

		let state = self.state.read().await;
		let Some(outbound) = state.outbound.as_ref() else {
			return;
		};

		match outbound.try_send(text) {
			Ok(()) => {
				metrics::counter!("tern_gateway_frames_out_total").increment(1);
			}
			Err(mpsc::error::TrySendError::Full(_)) => {
				metrics::counter!("tern_gateway_send_queue_dropped_total").increment(1);
				warn!(session_id = %self.session_id, "send queue full; dropping frame");
			}
			Err(mpsc::error::TrySendError::Closed(_)) => {}
		}
	}

	pub async fn send_dispatch<T: Serialize>(&self, event: EventType, payload: &T) {
		match Frame::dispatch(event, payload) {
			Ok(frame) => self.send(&frame).await,
			Err(err) => {
				error!(session_id = %self.session_id, event = %event, error = %err, "failed to build dispatch frame");
			}
		}
	}

	pub async fn send_error(&self, code: u16, message: &str) {
		self.send(&Frame::error(code, message)).await;
	}

	/// Nonce-correlated acknowledgement; the nonce is omitted when the client
	/// did not supply one.
	pub async fn send_ack(&self, nonce: Option<&str>, data: Value) {
		let frame = Frame {
			op: OpCode::Dispatch.as_u8(),
			d: Some(data),
			t: None,
			nonce: nonce.map(str::to_string),
		};
		self.send(&frame).await;
	}

	/// Close the outbound queue. Subsequent sends are no-ops and the writer
	/// task drains whatever is already queued, then exits.
	pub async fn close(&self) {
		self.state.write().await.outbound.take();
	}

	pub async fn is_identified(&self) -> bool {
		self.state.read().await.identified
	}

	/// The bound user, if identified.
	pub async fn identity(&self) -> Option<(UserId, UserBrief)> {
		let state = self.state.read().await;
		match (state.user_id, state.user.as_ref()) {
			(Some(user_id), Some(user)) => Some((user_id, user.clone())),
			_ => None,
		}
	}

	pub async fn user_id(&self) -> Option<UserId> {
		self.state.read().await.user_id
	}

	/// Bind the session to a user. Returns false if already bound; the
	/// binding is immutable for the session's lifetime.
	pub(crate) async fn bind_identity(&self, user_id: UserId, user: UserBrief) -> bool {
		let mut state = self.state.write().await;
		if state.identified {
			return false;
		}
		state.identified = true;
		state.user_id = Some(user_id);
		state.user = Some(user);
		true
	}

	#[allow(dead_code)]
	pub async fn status(&self) -> PresenceStatus {
		self.state.read().await.status
	}

	pub async fn set_status(&self, status: PresenceStatus) {
		self.state.write().await.status = status;
	}

	#[allow(dead_code)]
	pub async fn activity(&self) -> Option<Activity> {
		self.state.read().await.activity.clone()
	}

	pub async fn set_activity(&self, activity: Option<Activity>) {
		self.state.write().await.activity = activity;
	}

	pub async fn set_focus(
		&self,
		channel: Option<ChannelId>,
		server: Option<ServerId>,
		conversation: Option<ConversationId>,
	) {
		let mut state = self.state.write().await;
		state.focused_channel = channel;
		state.focused_server = server;
		state.focused_conversation = conversation;
	}

	pub async fn is_focused_on_channel(&self, channel_id: ChannelId) -> bool {
		self.state.read().await.focused_channel == Some(channel_id)
	}

	pub async fn is_focused_on_conversation(&self, conversation_id: ConversationId) -> bool {
		self.state.read().await.focused_conversation == Some(conversation_id)
	}

	pub(crate) async fn subscribe_server(&self, server_id: ServerId) {
		self.state.write().await.servers.insert(server_id);
	}

	/// Drops the subscription and, with it, any focus pointing into the
	/// server (stale focus would keep earning full payloads after an
	/// unsubscribe/resubscribe race).
	pub(crate) async fn unsubscribe_server(&self, server_id: ServerId) {
		let mut state = self.state.write().await;
		state.servers.remove(&server_id);
		if state.focused_server == Some(server_id) {
			state.focused_server = None;
			state.focused_channel = None;
		}
	}

	pub async fn is_in_server(&self, server_id: ServerId) -> bool {
		self.state.read().await.servers.contains(&server_id)
	}

	pub(crate) async fn subscribe_conversation(&self, conversation_id: ConversationId) {
		self.state.write().await.conversations.insert(conversation_id);
	}

	pub(crate) async fn unsubscribe_conversation(&self, conversation_id: ConversationId) {
		let mut state = self.state.write().await;
		state.conversations.remove(&conversation_id);
		if state.focused_conversation == Some(conversation_id) {
			state.focused_conversation = None;
		}
	}

	pub async fn is_in_conversation(&self, conversation_id: ConversationId) -> bool {
		self.state.read().await.conversations.contains(&conversation_id)
	}

	pub async fn server_ids(&self) -> Vec<ServerId> {
		self.state.read().await.servers.iter().copied().collect()
	}

	pub async fn conversation_ids(&self) -> Vec<ConversationId> {
		self.state.read().await.conversations.iter().copied().collect()
	}
}
