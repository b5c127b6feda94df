#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use tern_domain::{ChannelId, ConversationId, ServerId, SessionId, UserBrief, UserId};
use tern_protocol::EventType;
use tern_protocol::payloads::{
	ChannelMessageNotifyPayload, ChannelMessagePayload, DmMessageNotifyPayload, DmMessagePayload, TypingPayload,
};

use crate::server::session::Session;

/// What `unregister` observed, reported to the caller so presence side
/// effects (store I/O) happen outside the hub lock.
#[derive(Debug, Default)]
pub struct UnregisterOutcome {
	/// False when the session was already gone (unregister is idempotent).
	pub removed: bool,
	/// Set when this was the user's last session; the caller transitions
	/// presence to offline and broadcasts it.
	pub offline_user: Option<UserId>,
}

#[derive(Default)]
struct HubIndex {
	all: HashMap<SessionId, Arc<Session>>,
	by_user: HashMap<UserId, HashMap<SessionId, Arc<Session>>>,
	by_server: HashMap<ServerId, HashMap<SessionId, Arc<Session>>>,
	by_conversation: HashMap<ConversationId, HashMap<SessionId, Arc<Session>>>,
}

/// Process-wide session registry and the single mutation point for
/// cross-session state.
///
/// All index mutations happen under one lock; read paths copy the relevant
/// session set out before iterating, so fan-out runs unlocked and a session
/// closed mid-dispatch just swallows its sends.
#[derive(Clone)]
pub struct Hub {
	inner: Arc<RwLock<HubIndex>>,
}

impl Hub {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(RwLock::new(HubIndex::default())),
		}
	}

	/// Track a freshly accepted, still unidentified session.
	pub async fn register(&self, session: Arc<Session>) {
		let session_id = session.session_id();
		self.inner.write().await.all.insert(session_id, session);
		debug!(session_id = %session_id, "session registered");
	}

	/// Bind a session to its user after successful authentication and index
	/// it under `by_user`.
	pub async fn register_identified(&self, session: &Arc<Session>, user_id: UserId, user: UserBrief) {
		if !session.bind_identity(user_id, user).await {
			warn!(session_id = %session.session_id(), "session already bound; ignoring re-bind");
			return;
		}

		let mut inner = self.inner.write().await;
		inner
			.by_user
			.entry(user_id)
			.or_default()
			.insert(session.session_id(), Arc::clone(session));
	}

	pub async fn subscribe_to_server(&self, session: &Arc<Session>, server_id: ServerId) {
		session.subscribe_server(server_id).await;

		let mut inner = self.inner.write().await;
		inner
			.by_server
			.entry(server_id)
			.or_default()
			.insert(session.session_id(), Arc::clone(session));
	}

	pub async fn unsubscribe_from_server(&self, session: &Arc<Session>, server_id: ServerId) {
		session.unsubscribe_server(server_id).await;

		let mut inner = self.inner.write().await;
		if let Some(sessions) = inner.by_server.get_mut(&server_id) {
			sessions.remove(&session.session_id());
			if sessions.is_empty() {
				inner.by_server.remove(&server_id);
			}
		}
	}

	pub async fn subscribe_to_conversation(&self, session: &Arc<Session>, conversation_id: ConversationId) {
		session.subscribe_conversation(conversation_id).await;

		let mut inner = self.inner.write().await;
		inner
			.by_conversation
			.entry(conversation_id)
			.or_default()
			.insert(session.session_id(), Arc::clone(session));
	}

	pub async fn unsubscribe_from_conversation(&self, session: &Arc<Session>, conversation_id: ConversationId) {
		session.unsubscribe_conversation(conversation_id).await;

		let mut inner = self.inner.write().await;
		if let Some(sessions) = inner.by_conversation.get_mut(&conversation_id) {
			sessions.remove(&session.session_id());
			if sessions.is_empty() {
				inner.by_conversation.remove(&conversation_id);
			}
		}
	}

	/// Remove a session from every index and close its send queue. The
	/// single teardown path; safe to call more than once.
	pub async fn unregister(&self, session: &Arc<Session>) -> UnregisterOutcome {
		let session_id = session.session_id();
		let user_id = session.user_id().await;
		let servers = session.server_ids().await;
		let conversations = session.conversation_ids().await;

		let mut outcome = UnregisterOutcome::default();
		{
			let mut inner = self.inner.write().await;
			if inner.all.remove(&session_id).is_none() {
				return outcome;
			}
			outcome.removed = true;

			if let Some(user_id) = user_id {
				if let Some(sessions) = inner.by_user.get_mut(&user_id) {
					sessions.remove(&session_id);
					if sessions.is_empty() {
						inner.by_user.remove(&user_id);
						outcome.offline_user = Some(user_id);
					}
				}
			}

			for server_id in servers {
				if let Some(sessions) = inner.by_server.get_mut(&server_id) {
					sessions.remove(&session_id);
					if sessions.is_empty() {
						inner.by_server.remove(&server_id);
					}
				}
			}

			for conversation_id in conversations {
				if let Some(sessions) = inner.by_conversation.get_mut(&conversation_id) {
					sessions.remove(&session_id);
					if sessions.is_empty() {
						inner.by_conversation.remove(&conversation_id);
					}
				}
			}
		}

		session.close().await;
		debug!(session_id = %session_id, "session unregistered");
		outcome
	}

	#[allow(dead_code)]
	pub async fn session_count(&self) -> usize {
		self.inner.read().await.all.len()
	}

	#[allow(dead_code)]
	pub async fn contains_session(&self, session_id: SessionId) -> bool {
		self.inner.read().await.all.contains_key(&session_id)
	}

	#[allow(dead_code)]
	pub async fn is_user_online(&self, user_id: UserId) -> bool {
		self.inner
			.read()
			.await
			.by_user
			.get(&user_id)
			.is_some_and(|sessions| !sessions.is_empty())
	}

	/// Snapshot of a user's sessions.
	pub async fn user_sessions(&self, user_id: UserId) -> Vec<Arc<Session>> {
		let inner = self.inner.read().await;
		inner
			.by_user
			.get(&user_id)
			.map(|sessions| sessions.values().cloned().collect())
			.unwrap_or_default()
	}

	/// Snapshot of a server's subscribed sessions.
	pub async fn server_sessions(&self, server_id: ServerId) -> Vec<Arc<Session>> {
		let inner = self.inner.read().await;
		inner
			.by_server
			.get(&server_id)
			.map(|sessions| sessions.values().cloned().collect())
			.unwrap_or_default()
	}

	/// Snapshot of a conversation's subscribed sessions.
	pub async fn conversation_sessions(&self, conversation_id: ConversationId) -> Vec<Arc<Session>> {
		let inner = self.inner.read().await;
		inner
			.by_conversation
			.get(&conversation_id)
			.map(|sessions| sessions.values().cloned().collect())
			.unwrap_or_default()
	}

	pub async fn dispatch_to_user<T: Serialize>(&self, user_id: UserId, event: EventType, payload: &T) {
		for session in self.user_sessions(user_id).await {
			session.send_dispatch(event, payload).await;
		}
	}

	pub async fn dispatch_to_server<T: Serialize>(&self, server_id: ServerId, event: EventType, payload: &T) {
		for session in self.server_sessions(server_id).await {
			session.send_dispatch(event, payload).await;
		}
	}

	pub async fn dispatch_to_conversation<T: Serialize>(
		&self,
		conversation_id: ConversationId,
		event: EventType,
		payload: &T,
	) {
		for session in self.conversation_sessions(conversation_id).await {
			session.send_dispatch(event, payload).await;
		}
	}

	/// Focus-aware channel-message fan-out: recipients focused on the channel
	/// get the full payload, everyone else in the server gets the ids-only
	/// notify variant.
	pub async fn dispatch_channel_message(
		&self,
		server_id: ServerId,
		channel_id: ChannelId,
		full: &ChannelMessagePayload,
	) {
		let notify = ChannelMessageNotifyPayload {
			channel_id,
			server_id,
			message_id: full.id,
			author_id: full.author_id,
		};

		for session in self.server_sessions(server_id).await {
			if session.is_focused_on_channel(channel_id).await {
				session.send_dispatch(EventType::ChannelMessageCreate, full).await;
			} else {
				session.send_dispatch(EventType::ChannelMessageNotify, &notify).await;
			}
		}
	}

	/// Focus-aware DM fan-out, mirroring [`Hub::dispatch_channel_message`].
	pub async fn dispatch_dm_message(&self, conversation_id: ConversationId, full: &DmMessagePayload) {
		let notify = DmMessageNotifyPayload {
			conversation_id,
			message_id: full.id,
			author_id: full.author_id,
		};

		for session in self.conversation_sessions(conversation_id).await {
			if session.is_focused_on_conversation(conversation_id).await {
				session.send_dispatch(EventType::DmMessageCreate, full).await;
			} else {
				session.send_dispatch(EventType::DmMessageNotify, &notify).await;
			}
		}
	}

	/// Typing indicators go only to sessions focused on the channel; other
	/// subscribers hear nothing.
	pub async fn dispatch_typing_to_channel(
		&self,
		server_id: ServerId,
		channel_id: ChannelId,
		event: EventType,
		payload: &TypingPayload,
	) {
		for session in self.server_sessions(server_id).await {
			if session.is_focused_on_channel(channel_id).await {
				session.send_dispatch(event, payload).await;
			}
		}
	}

	/// Typing indicators go only to sessions focused on the conversation.
	pub async fn dispatch_typing_to_conversation(
		&self,
		conversation_id: ConversationId,
		event: EventType,
		payload: &TypingPayload,
	) {
		for session in self.conversation_sessions(conversation_id).await {
			if session.is_focused_on_conversation(conversation_id).await {
				session.send_dispatch(event, payload).await;
			}
		}
	}
}

impl Default for Hub {
	fn default() -> Self {
		Self::new()
	}
}
