#![forbid(unsafe_code)]

//! In-memory store implementations backing tests and local development.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;

use tern_domain::{ChannelId, ConversationId, MessageId, Presence, ServerId, UserId};

use crate::durable::DurableStore;
use crate::entities::{ChannelMessageRecord, DirectMessageRecord, NewChannelMessage, NewDirectMessage, UserRecord};
use crate::error::StoreError;
use crate::presence::{PRESENCE_TTL_SECS, PresenceStore};

#[derive(Debug, Clone)]
struct ParticipantRow {
	conversation_id: ConversationId,
	user_id: UserId,
	last_read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
	users: HashMap<UserId, UserRecord>,
	tokens: HashMap<String, (UserId, i64)>,
	server_members: Vec<(ServerId, UserId)>,
	channels: Vec<(ChannelId, ServerId)>,
	channel_messages: HashMap<MessageId, ChannelMessageRecord>,
	dm_participants: Vec<ParticipantRow>,
	direct_messages: HashMap<MessageId, DirectMessageRecord>,
	friendships: Vec<(UserId, UserId, ConversationId)>,
}

/// Durable store kept entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
	inner: Mutex<MemoryInner>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn add_user(&self, user: UserRecord) {
		self.inner.lock().await.users.insert(user.id, user);
	}

	/// Register a token; `expires_at` is unix seconds.
	pub async fn add_token(&self, token: impl Into<String>, user_id: UserId, expires_at: i64) {
		self.inner.lock().await.tokens.insert(token.into(), (user_id, expires_at));
	}

	pub async fn add_server_member(&self, server_id: ServerId, user_id: UserId) {
		self.inner.lock().await.server_members.push((server_id, user_id));
	}

	pub async fn add_channel(&self, channel_id: ChannelId, server_id: ServerId) {
		self.inner.lock().await.channels.push((channel_id, server_id));
	}

	pub async fn add_dm_participant(&self, conversation_id: ConversationId, user_id: UserId) {
		self.inner.lock().await.dm_participants.push(ParticipantRow {
			conversation_id,
			user_id,
			last_read_at: None,
		});
	}

	pub async fn add_friendship(&self, user1: UserId, user2: UserId, conversation_id: ConversationId) {
		let (a, b) = if user1.to_string() < user2.to_string() {
			(user1, user2)
		} else {
			(user2, user1)
		};
		self.inner.lock().await.friendships.push((a, b, conversation_id));
	}

	/// Test hook: the caller's read marker in a conversation.
	pub async fn last_read_at(&self, conversation_id: ConversationId, user_id: UserId) -> Option<DateTime<Utc>> {
		self.inner
			.lock()
			.await
			.dm_participants
			.iter()
			.find(|row| row.conversation_id == conversation_id && row.user_id == user_id)
			.and_then(|row| row.last_read_at)
	}

	/// Test hook: a persisted channel message by id.
	pub async fn channel_message(&self, id: MessageId) -> Option<ChannelMessageRecord> {
		self.inner.lock().await.channel_messages.get(&id).cloned()
	}

	/// Test hook: a persisted direct message by id.
	pub async fn direct_message(&self, id: MessageId) -> Option<DirectMessageRecord> {
		self.inner.lock().await.direct_messages.get(&id).cloned()
	}
}

#[async_trait]
impl DurableStore for MemoryStore {
	async fn resolve_token(&self, token: &str) -> Result<Option<UserId>, StoreError> {
		let inner = self.inner.lock().await;
		let now = Utc::now().timestamp();
		Ok(inner
			.tokens
			.get(token)
			.filter(|(_, expires_at)| *expires_at > now)
			.map(|(user_id, _)| *user_id))
	}

	async fn user_by_id(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
		Ok(self.inner.lock().await.users.get(&id).cloned())
	}

	async fn users_by_ids(&self, ids: &[UserId]) -> Result<Vec<UserRecord>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(ids.iter().filter_map(|id| inner.users.get(id).cloned()).collect())
	}

	async fn server_memberships(&self, user_id: UserId) -> Result<Vec<ServerId>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner
			.server_members
			.iter()
			.filter(|(_, member)| *member == user_id)
			.map(|(server_id, _)| *server_id)
			.collect())
	}

	async fn conversation_participations(&self, user_id: UserId) -> Result<Vec<ConversationId>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner
			.dm_participants
			.iter()
			.filter(|row| row.user_id == user_id)
			.map(|row| row.conversation_id)
			.collect())
	}

	async fn friend_ids(&self, user_id: UserId) -> Result<Vec<UserId>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner
			.friendships
			.iter()
			.filter_map(|(user1, user2, _)| {
				if *user1 == user_id {
					Some(*user2)
				} else if *user2 == user_id {
					Some(*user1)
				} else {
					None
				}
			})
			.collect())
	}

	async fn conversation_co_participants(
		&self,
		conversation_ids: &[ConversationId],
		exclude: UserId,
	) -> Result<Vec<UserId>, StoreError> {
		let inner = self.inner.lock().await;
		let mut out = Vec::new();
		for row in &inner.dm_participants {
			if row.user_id != exclude && conversation_ids.contains(&row.conversation_id) && !out.contains(&row.user_id) {
				out.push(row.user_id);
			}
		}
		Ok(out)
	}

	async fn server_co_members(&self, server_ids: &[ServerId], exclude: UserId) -> Result<Vec<UserId>, StoreError> {
		let inner = self.inner.lock().await;
		let mut out = Vec::new();
		for (server_id, member) in &inner.server_members {
			if *member != exclude && server_ids.contains(server_id) && !out.contains(member) {
				out.push(*member);
			}
		}
		Ok(out)
	}

	async fn channel_in_server(&self, channel_id: ChannelId, server_id: ServerId) -> Result<bool, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner.channels.iter().any(|(c, s)| *c == channel_id && *s == server_id))
	}

	async fn insert_channel_message(&self, new: NewChannelMessage) -> Result<ChannelMessageRecord, StoreError> {
		let record = ChannelMessageRecord {
			id: MessageId::generate(),
			channel_id: new.channel_id,
			author_id: new.author_id,
			content: new.content,
			attachments: new.attachments,
			reply_to_id: new.reply_to_id,
			created_at: Utc::now(),
			edited_at: None,
		};
		self.inner.lock().await.channel_messages.insert(record.id, record.clone());
		Ok(record)
	}

	async fn insert_direct_message(&self, new: NewDirectMessage) -> Result<DirectMessageRecord, StoreError> {
		let record = DirectMessageRecord {
			id: MessageId::generate(),
			conversation_id: new.conversation_id,
			author_id: new.author_id,
			content: new.content,
			attachments: new.attachments,
			reply_to_id: new.reply_to_id,
			created_at: Utc::now(),
			edited_at: None,
		};
		self.inner.lock().await.direct_messages.insert(record.id, record.clone());
		Ok(record)
	}

	async fn update_channel_message(
		&self,
		id: MessageId,
		channel_id: ChannelId,
		author_id: UserId,
		content: &str,
		edited_at: DateTime<Utc>,
	) -> Result<u64, StoreError> {
		let mut inner = self.inner.lock().await;
		match inner.channel_messages.get_mut(&id) {
			Some(record) if record.channel_id == channel_id && record.author_id == author_id => {
				record.content = content.to_string();
				record.edited_at = Some(edited_at);
				Ok(1)
			}
			_ => Ok(0),
		}
	}

	async fn update_direct_message(
		&self,
		id: MessageId,
		conversation_id: ConversationId,
		author_id: UserId,
		content: &str,
		edited_at: DateTime<Utc>,
	) -> Result<u64, StoreError> {
		let mut inner = self.inner.lock().await;
		match inner.direct_messages.get_mut(&id) {
			Some(record) if record.conversation_id == conversation_id && record.author_id == author_id => {
				record.content = content.to_string();
				record.edited_at = Some(edited_at);
				Ok(1)
			}
			_ => Ok(0),
		}
	}

	async fn delete_channel_message(
		&self,
		id: MessageId,
		channel_id: ChannelId,
		author_id: UserId,
	) -> Result<u64, StoreError> {
		let mut inner = self.inner.lock().await;
		let matches = inner
			.channel_messages
			.get(&id)
			.is_some_and(|record| record.channel_id == channel_id && record.author_id == author_id);
		if matches {
			inner.channel_messages.remove(&id);
			Ok(1)
		} else {
			Ok(0)
		}
	}

	async fn delete_direct_message(
		&self,
		id: MessageId,
		conversation_id: ConversationId,
		author_id: UserId,
	) -> Result<u64, StoreError> {
		let mut inner = self.inner.lock().await;
		let matches = inner
			.direct_messages
			.get(&id)
			.is_some_and(|record| record.conversation_id == conversation_id && record.author_id == author_id);
		if matches {
			inner.direct_messages.remove(&id);
			Ok(1)
		} else {
			Ok(0)
		}
	}

	async fn mark_conversation_read(
		&self,
		conversation_id: ConversationId,
		user_id: UserId,
		read_at: DateTime<Utc>,
	) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		for row in &mut inner.dm_participants {
			if row.conversation_id == conversation_id && row.user_id == user_id {
				row.last_read_at = Some(read_at);
			}
		}
		Ok(())
	}
}

/// Presence store kept in process memory, honoring the TTL against the tokio
/// clock (so tests can pause and advance time).
#[derive(Debug, Default)]
pub struct MemoryPresenceStore {
	inner: Mutex<HashMap<UserId, (Presence, Instant)>>,
}

impl MemoryPresenceStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn deadline() -> Instant {
		Instant::now() + Duration::from_secs(PRESENCE_TTL_SECS)
	}
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
	async fn set(&self, user_id: UserId, presence: &Presence) -> Result<(), StoreError> {
		self.inner.lock().await.insert(user_id, (presence.clone(), Self::deadline()));
		Ok(())
	}

	async fn refresh(&self, user_id: UserId) -> Result<(), StoreError> {
		if let Some((_, expires)) = self.inner.lock().await.get_mut(&user_id) {
			*expires = Self::deadline();
		}
		Ok(())
	}

	async fn delete(&self, user_id: UserId) -> Result<(), StoreError> {
		self.inner.lock().await.remove(&user_id);
		Ok(())
	}

	async fn get(&self, user_id: UserId) -> Result<Option<Presence>, StoreError> {
		let now = Instant::now();
		Ok(self
			.inner
			.lock()
			.await
			.get(&user_id)
			.filter(|(_, expires)| *expires > now)
			.map(|(presence, _)| presence.clone()))
	}

	async fn get_many(&self, user_ids: &[UserId]) -> Result<HashMap<UserId, Presence>, StoreError> {
		let now = Instant::now();
		let inner = self.inner.lock().await;
		Ok(user_ids
			.iter()
			.filter_map(|id| {
				inner
					.get(id)
					.filter(|(_, expires)| *expires > now)
					.map(|(presence, _)| (*id, presence.clone()))
			})
			.collect())
	}
}
