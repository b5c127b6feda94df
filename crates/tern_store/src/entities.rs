#![forbid(unsafe_code)]

//! Persisted entities as the gateway consumes them. Column layout is owned by
//! the durable store; these are the projections the gateway reads and writes.

use chrono::{DateTime, Utc};
use serde_json::Value;

use tern_domain::{ChannelId, ConversationId, MessageId, UserBrief, UserId};

/// A user row, minus credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
	pub id: UserId,
	pub username: String,
	pub domain: String,
	pub email: String,
	pub profile_pic_url: String,
}

impl UserRecord {
	/// Public projection embedded in gateway payloads.
	pub fn brief(&self) -> UserBrief {
		UserBrief {
			id: self.id,
			username: self.username.clone(),
			domain: self.domain.clone(),
			profile_pic_url: self.profile_pic_url.clone(),
			email: self.email.clone(),
		}
	}
}

/// Insert shape for a channel message; id and timestamps are store-assigned.
#[derive(Debug, Clone)]
pub struct NewChannelMessage {
	pub channel_id: ChannelId,
	pub author_id: UserId,
	pub content: String,
	pub attachments: Vec<Value>,
	pub reply_to_id: Option<MessageId>,
}

/// A persisted channel message.
#[derive(Debug, Clone)]
pub struct ChannelMessageRecord {
	pub id: MessageId,
	pub channel_id: ChannelId,
	pub author_id: UserId,
	pub content: String,
	pub attachments: Vec<Value>,
	pub reply_to_id: Option<MessageId>,
	pub created_at: DateTime<Utc>,
	pub edited_at: Option<DateTime<Utc>>,
}

/// Insert shape for a direct message; id and timestamps are store-assigned.
#[derive(Debug, Clone)]
pub struct NewDirectMessage {
	pub conversation_id: ConversationId,
	pub author_id: UserId,
	pub content: String,
	pub attachments: Vec<Value>,
	pub reply_to_id: Option<MessageId>,
}

/// A persisted direct message.
#[derive(Debug, Clone)]
pub struct DirectMessageRecord {
	pub id: MessageId,
	pub conversation_id: ConversationId,
	pub author_id: UserId,
	pub content: String,
	pub attachments: Vec<Value>,
	pub reply_to_id: Option<MessageId>,
	pub created_at: DateTime<Utc>,
	pub edited_at: Option<DateTime<Utc>>,
}
