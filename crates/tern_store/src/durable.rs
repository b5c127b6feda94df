#![forbid(unsafe_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tern_domain::{ChannelId, ConversationId, MessageId, ServerId, UserId};

use crate::entities::{ChannelMessageRecord, DirectMessageRecord, NewChannelMessage, NewDirectMessage, UserRecord};
use crate::error::StoreError;

/// Membership, participation, and message persistence consumed by the gateway.
///
/// Edit/delete operations are scoped to `(message, container, author)` and
/// report the number of rows they touched; zero means the target is absent or
/// not owned by the caller, and the gateway answers 4004 without needing a
/// separate existence probe.
#[async_trait]
pub trait DurableStore: Send + Sync {
	/// Resolve an auth token to its user, honoring token expiry.
	async fn resolve_token(&self, token: &str) -> Result<Option<UserId>, StoreError>;

	async fn user_by_id(&self, id: UserId) -> Result<Option<UserRecord>, StoreError>;

	async fn users_by_ids(&self, ids: &[UserId]) -> Result<Vec<UserRecord>, StoreError>;

	/// Servers the user is a member of.
	async fn server_memberships(&self, user_id: UserId) -> Result<Vec<ServerId>, StoreError>;

	/// Conversations the user participates in.
	async fn conversation_participations(&self, user_id: UserId) -> Result<Vec<ConversationId>, StoreError>;

	/// The other side of every friendship involving the user.
	async fn friend_ids(&self, user_id: UserId) -> Result<Vec<UserId>, StoreError>;

	/// Other participants across the given conversations.
	async fn conversation_co_participants(
		&self,
		conversation_ids: &[ConversationId],
		exclude: UserId,
	) -> Result<Vec<UserId>, StoreError>;

	/// Other members across the given servers.
	async fn server_co_members(&self, server_ids: &[ServerId], exclude: UserId) -> Result<Vec<UserId>, StoreError>;

	/// Whether the channel exists under the given server.
	async fn channel_in_server(&self, channel_id: ChannelId, server_id: ServerId) -> Result<bool, StoreError>;

	async fn insert_channel_message(&self, new: NewChannelMessage) -> Result<ChannelMessageRecord, StoreError>;

	async fn insert_direct_message(&self, new: NewDirectMessage) -> Result<DirectMessageRecord, StoreError>;

	/// Returns rows affected (0 = not found or not the author).
	async fn update_channel_message(
		&self,
		id: MessageId,
		channel_id: ChannelId,
		author_id: UserId,
		content: &str,
		edited_at: DateTime<Utc>,
	) -> Result<u64, StoreError>;

	/// Returns rows affected (0 = not found or not the author).
	async fn update_direct_message(
		&self,
		id: MessageId,
		conversation_id: ConversationId,
		author_id: UserId,
		content: &str,
		edited_at: DateTime<Utc>,
	) -> Result<u64, StoreError>;

	/// Hard delete. Returns rows affected (0 = not found or not the author).
	async fn delete_channel_message(
		&self,
		id: MessageId,
		channel_id: ChannelId,
		author_id: UserId,
	) -> Result<u64, StoreError>;

	/// Hard delete. Returns rows affected (0 = not found or not the author).
	async fn delete_direct_message(
		&self,
		id: MessageId,
		conversation_id: ConversationId,
		author_id: UserId,
	) -> Result<u64, StoreError>;

	/// Advance the caller's read marker in a conversation.
	async fn mark_conversation_read(
		&self,
		conversation_id: ConversationId,
		user_id: UserId,
		read_at: DateTime<Utc>,
	) -> Result<(), StoreError>;
}
