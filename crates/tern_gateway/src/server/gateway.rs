#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use tern_domain::{Activity, ChannelId, ConversationId, Presence, PresenceStatus, ServerId, UserBrief, UserId};
use tern_protocol::EventType;
use tern_protocol::payloads::{
	ChannelMessagePayload, DmCreatePayload, DmMessagePayload, DmParticipantAddPayload, DmParticipantLeftPayload,
	FriendAcceptedPayload, FriendRemovePayload, FriendRequestPayload, PresenceUpdatePayload, ServerMemberAddPayload,
	ServerMemberRemovePayload, UserUpdatePayload, UserWithPresence,
};
use tern_store::{DurableStore, PresenceStore, StoreError};

use crate::server::hub::Hub;
use crate::server::session::Session;
use crate::util::time::unix_secs_now;

/// The gateway handle: hub plus the two stores.
///
/// Constructed once at startup and handed to the accept loop and to REST
/// collaborators; the notifier entry points live here as methods, so there is
/// no process-global hub to reach for.
#[derive(Clone)]
pub struct Gateway {
	hub: Hub,
	store: Arc<dyn DurableStore>,
	presence: Arc<dyn PresenceStore>,
}

impl Gateway {
	pub fn new(store: Arc<dyn DurableStore>, presence: Arc<dyn PresenceStore>) -> Self {
		Self {
			hub: Hub::new(),
			store,
			presence,
		}
	}

	pub fn hub(&self) -> &Hub {
		&self.hub
	}

	pub(crate) fn store(&self) -> &Arc<dyn DurableStore> {
		&self.store
	}

	pub(crate) fn presence(&self) -> &Arc<dyn PresenceStore> {
		&self.presence
	}

	/// Full teardown for a closed connection: drop the session from every
	/// index, and when it was the user's last session, transition presence
	/// to offline and tell everyone who could see them.
	pub async fn handle_disconnect(&self, session: &Arc<Session>) {
		let session_id = session.session_id();
		let outcome = self.hub.unregister(session).await;
		if !outcome.removed {
			return;
		}

		if let Some(user_id) = outcome.offline_user {
			if let Err(err) = self.presence.delete(user_id).await {
				warn!(user_id = %user_id, error = %err, "failed to clear presence on disconnect");
			}
			self.broadcast_presence_change(user_id, PresenceStatus::Offline, None).await;
		}

		info!(session_id = %session_id, "session disconnected");
	}

	/// Announce a presence change to every server and conversation the user
	/// participates in. Best-effort: lookup failures are logged, not surfaced.
	pub(crate) async fn broadcast_presence_change(
		&self,
		user_id: UserId,
		status: PresenceStatus,
		activity: Option<Activity>,
	) {
		let payload = PresenceUpdatePayload {
			user_id,
			status,
			activity,
		};

		match self.store.server_memberships(user_id).await {
			Ok(server_ids) => {
				for server_id in server_ids {
					self.hub.dispatch_to_server(server_id, EventType::PresenceUpdate, &payload).await;
				}
			}
			Err(err) => warn!(user_id = %user_id, error = %err, "presence broadcast: membership lookup failed"),
		}

		match self.store.conversation_participations(user_id).await {
			Ok(conversation_ids) => {
				for conversation_id in conversation_ids {
					self.hub
						.dispatch_to_conversation(conversation_id, EventType::PresenceUpdate, &payload)
						.await;
				}
			}
			Err(err) => warn!(user_id = %user_id, error = %err, "presence broadcast: participation lookup failed"),
		}
	}

	/// Pre-load the session's fan-out subscriptions from the durable store.
	/// Runs inline on the Identify path.
	pub(crate) async fn load_user_subscriptions(
		&self,
		session: &Arc<Session>,
		user_id: UserId,
	) -> Result<(), StoreError> {
		for server_id in self.store.server_memberships(user_id).await? {
			self.hub.subscribe_to_server(session, server_id).await;
		}

		for conversation_id in self.store.conversation_participations(user_id).await? {
			self.hub.subscribe_to_conversation(session, conversation_id).await;
		}

		Ok(())
	}

	/// Everyone the client needs to know about up front: friends, the other
	/// participants of their conversations, and the other members of their
	/// servers, each with current presence (absent presence reads offline).
	pub(crate) async fn load_relevant_users(&self, user_id: UserId) -> Vec<UserWithPresence> {
		let mut relevant: BTreeSet<UserId> = BTreeSet::new();

		match self.store.friend_ids(user_id).await {
			Ok(ids) => relevant.extend(ids),
			Err(err) => warn!(user_id = %user_id, error = %err, "relevant users: friend lookup failed"),
		}

		match self.store.conversation_participations(user_id).await {
			Ok(conversation_ids) => match self.store.conversation_co_participants(&conversation_ids, user_id).await {
				Ok(ids) => relevant.extend(ids),
				Err(err) => warn!(user_id = %user_id, error = %err, "relevant users: co-participant lookup failed"),
			},
			Err(err) => warn!(user_id = %user_id, error = %err, "relevant users: participation lookup failed"),
		}

		match self.store.server_memberships(user_id).await {
			Ok(server_ids) => match self.store.server_co_members(&server_ids, user_id).await {
				Ok(ids) => relevant.extend(ids),
				Err(err) => warn!(user_id = %user_id, error = %err, "relevant users: co-member lookup failed"),
			},
			Err(err) => warn!(user_id = %user_id, error = %err, "relevant users: membership lookup failed"),
		}

		if relevant.is_empty() {
			return Vec::new();
		}

		let ids: Vec<UserId> = relevant.into_iter().collect();
		let users = match self.store.users_by_ids(&ids).await {
			Ok(users) => users,
			Err(err) => {
				warn!(user_id = %user_id, error = %err, "relevant users: batch user fetch failed");
				return Vec::new();
			}
		};

		let presences = match self.presence.get_many(&ids).await {
			Ok(presences) => presences,
			Err(err) => {
				warn!(user_id = %user_id, error = %err, "relevant users: batch presence fetch failed");
				Default::default()
			}
		};

		users
			.into_iter()
			.map(|user| UserWithPresence {
				presence: presences.get(&user.id).cloned(),
				id: user.id,
				username: user.username,
				domain: user.domain,
				profile_pic_url: user.profile_pic_url,
			})
			.collect()
	}

	/// Write the user's presence record, refreshing its TTL.
	pub(crate) async fn write_presence(&self, user_id: UserId, status: PresenceStatus, activity: Option<Activity>) {
		let record = Presence {
			status,
			activity,
			updated_at: unix_secs_now(),
		};
		if let Err(err) = self.presence.set(user_id, &record).await {
			warn!(user_id = %user_id, error = %err, "failed to write presence record");
		}
	}
}

/// Entry points for REST collaborators, invoked after their own durable
/// writes succeed. All of them are best-effort fan-out: nothing here can fail
/// a caller's request.
#[allow(dead_code)]
impl Gateway {
	pub async fn notify_channel_message(&self, server_id: ServerId, channel_id: ChannelId, payload: &ChannelMessagePayload) {
		self.hub.dispatch_channel_message(server_id, channel_id, payload).await;
	}

	pub async fn notify_dm_message(&self, conversation_id: ConversationId, payload: &DmMessagePayload) {
		self.hub.dispatch_dm_message(conversation_id, payload).await;
	}

	pub async fn notify_user_update(&self, user_id: UserId, fields: Value) {
		let payload = UserUpdatePayload { user_id, fields };
		self.hub.dispatch_to_user(user_id, EventType::UserUpdate, &payload).await;
	}

	pub async fn notify_server_update(&self, server_id: ServerId, payload: Value) {
		self.hub.dispatch_to_server(server_id, EventType::ServerUpdate, &payload).await;
	}

	pub async fn notify_server_member_add(&self, server_id: ServerId, user: UserBrief) {
		let payload = ServerMemberAddPayload { server_id, user };
		self.hub.dispatch_to_server(server_id, EventType::ServerMemberAdd, &payload).await;
	}

	/// The departed user's sessions hear the event too, then stop receiving
	/// the server's traffic.
	pub async fn notify_server_member_remove(&self, server_id: ServerId, user_id: UserId) {
		let payload = ServerMemberRemovePayload { server_id, user_id };
		self.hub.dispatch_to_server(server_id, EventType::ServerMemberRemove, &payload).await;

		for session in self.hub.user_sessions(user_id).await {
			self.hub.unsubscribe_from_server(&session, server_id).await;
		}
	}

	pub async fn notify_server_member_update(&self, server_id: ServerId, payload: Value) {
		self.hub.dispatch_to_server(server_id, EventType::ServerMemberUpdate, &payload).await;
	}

	pub async fn notify_channel_create(&self, server_id: ServerId, payload: Value) {
		self.hub.dispatch_to_server(server_id, EventType::ChannelCreate, &payload).await;
	}

	pub async fn notify_channel_update(&self, server_id: ServerId, payload: Value) {
		self.hub.dispatch_to_server(server_id, EventType::ChannelUpdate, &payload).await;
	}

	pub async fn notify_channel_delete(&self, server_id: ServerId, payload: Value) {
		self.hub.dispatch_to_server(server_id, EventType::ChannelDelete, &payload).await;
	}

	/// Announce a new conversation to every participant and subscribe their
	/// live sessions so subsequent traffic reaches them without a reconnect.
	/// Late-connecting sessions pick the subscription up at Identify.
	pub async fn notify_new_group_dm(&self, conversation: &DmCreatePayload, participant_ids: &[UserId]) {
		for &participant_id in participant_ids {
			self.hub.dispatch_to_user(participant_id, EventType::DmCreate, conversation).await;

			for session in self.hub.user_sessions(participant_id).await {
				self.hub.subscribe_to_conversation(&session, conversation.conversation_id).await;
			}
		}
	}

	pub async fn notify_dm_participant_add(&self, conversation_id: ConversationId, user: UserBrief) {
		let user_id = user.id;
		let payload = DmParticipantAddPayload { conversation_id, user };
		self.hub
			.dispatch_to_conversation(conversation_id, EventType::DmParticipantAdd, &payload)
			.await;

		for session in self.hub.user_sessions(user_id).await {
			self.hub.subscribe_to_conversation(&session, conversation_id).await;
		}
	}

	pub async fn notify_dm_participant_left(&self, conversation_id: ConversationId, user_id: UserId) {
		let payload = DmParticipantLeftPayload { conversation_id, user_id };
		self.hub
			.dispatch_to_conversation(conversation_id, EventType::DmParticipantLeft, &payload)
			.await;

		for session in self.hub.user_sessions(user_id).await {
			self.hub.unsubscribe_from_conversation(&session, conversation_id).await;
		}
	}

	pub async fn notify_friend_request(&self, receiver_id: UserId, payload: FriendRequestPayload) {
		self.hub.dispatch_to_user(receiver_id, EventType::FriendRequestCreate, &payload).await;
	}

	/// On accept, both sides learn about the friendship and its conversation;
	/// the original requester also gets the accepting user's brief. Every
	/// live session of both users is subscribed to the new conversation.
	pub async fn notify_friend_accepted(
		&self,
		user: &UserBrief,
		friend: &UserBrief,
		friendship_id: Uuid,
		conversation_id: ConversationId,
	) {
		self.hub
			.dispatch_to_user(
				friend.id,
				EventType::FriendRequestAccepted,
				&FriendAcceptedPayload {
					friendship_id,
					conversation_id,
					user: Some(user.clone()),
				},
			)
			.await;

		let dm = DmCreatePayload {
			conversation_id,
			name: String::new(),
			is_group: false,
			participants: vec![user.clone(), friend.clone()],
			created_by: None,
		};
		self.hub.dispatch_to_user(user.id, EventType::DmCreate, &dm).await;
		self.hub.dispatch_to_user(friend.id, EventType::DmCreate, &dm).await;

		for user_id in [user.id, friend.id] {
			for session in self.hub.user_sessions(user_id).await {
				self.hub.subscribe_to_conversation(&session, conversation_id).await;
			}
		}
	}

	pub async fn notify_friend_removed(&self, user_id: UserId, friend_id: UserId) {
		self.hub
			.dispatch_to_user(user_id, EventType::FriendRemove, &FriendRemovePayload { user_id: friend_id })
			.await;
		self.hub
			.dispatch_to_user(friend_id, EventType::FriendRemove, &FriendRemovePayload { user_id })
			.await;
	}
}
