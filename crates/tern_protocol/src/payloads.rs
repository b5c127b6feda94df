#![forbid(unsafe_code)]

//! Payload shapes carried in the `d` field of gateway frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use tern_domain::{Activity, ChannelId, ConversationId, MessageId, Presence, PresenceStatus, ServerId, UserBrief, UserId};

/// Application error reply body (`op = Dispatch`, no event tag).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
	pub code: u16,
	pub message: String,
}

/// Client -> server: authenticate the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
	#[serde(default)]
	pub token: String,
}

/// Server -> client: initial state after a successful Identify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyPayload {
	pub user: UserBrief,
	pub session_id: String,
	pub users: Vec<UserWithPresence>,
}

/// A user projection with their current presence, embedded in `Ready`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserWithPresence {
	pub id: UserId,
	pub username: String,
	pub domain: String,
	#[serde(rename = "profilePicURL", default, skip_serializing_if = "String::is_empty")]
	pub profile_pic_url: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub presence: Option<Presence>,
}

/// Server -> client: heartbeat acknowledgement with the server clock (unix millis).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeartbeatAckPayload {
	pub ts: i64,
}

/// Client -> server: the channel/server/conversation the user is viewing.
/// All fields absent means unfocused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusPayload {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub channel_id: Option<ChannelId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub server_id: Option<ServerId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub conversation_id: Option<ConversationId>,
}

/// Client -> server: requested presence change. The status arrives as free
/// text and is validated against [`PresenceStatus`] by the handler.
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceUpdateRequest {
	#[serde(default)]
	pub status: String,
	#[serde(default)]
	pub activity: Option<Activity>,
}

/// Server -> clients: broadcast presence change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceUpdatePayload {
	pub user_id: UserId,
	pub status: PresenceStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub activity: Option<Activity>,
}

/// Typing indicator. Clients send the target ids; the gateway stamps the
/// sender before fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingPayload {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub channel_id: Option<ChannelId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub server_id: Option<ServerId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub conversation_id: Option<ConversationId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<UserId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user: Option<UserBrief>,
}

/// Full channel-message event payload, built from persisted fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessagePayload {
	pub id: MessageId,
	pub channel_id: ChannelId,
	pub server_id: ServerId,
	pub author_id: UserId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub author: Option<UserBrief>,
	pub content: String,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub attachments: Vec<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reply_to_id: Option<MessageId>,
	/// Present on create dispatches; update dispatches carry only ids,
	/// content, and `edited_at`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub created_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub edited_at: Option<DateTime<Utc>>,
}

/// Full direct-message event payload, built from persisted fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmMessagePayload {
	pub id: MessageId,
	pub conversation_id: ConversationId,
	pub author_id: UserId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub author: Option<UserBrief>,
	pub content: String,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub attachments: Vec<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reply_to_id: Option<MessageId>,
	/// Present on create dispatches; update dispatches carry only ids,
	/// content, and `edited_at`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub created_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub edited_at: Option<DateTime<Utc>>,
}

/// Ids-only variant delivered to unfocused channel recipients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChannelMessageNotifyPayload {
	pub channel_id: ChannelId,
	pub server_id: ServerId,
	pub message_id: MessageId,
	pub author_id: UserId,
}

/// Ids-only variant delivered to unfocused DM recipients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DmMessageNotifyPayload {
	pub conversation_id: ConversationId,
	pub message_id: MessageId,
	pub author_id: UserId,
}

/// Client -> server: create a channel message.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelMessageCreate {
	pub channel_id: ChannelId,
	pub server_id: ServerId,
	#[serde(default)]
	pub content: String,
	#[serde(default)]
	pub attachments: Vec<Value>,
	#[serde(default)]
	pub reply_to_id: Option<MessageId>,
}

/// Client -> server: create a direct message.
#[derive(Debug, Clone, Deserialize)]
pub struct DmMessageCreate {
	pub conversation_id: ConversationId,
	#[serde(default)]
	pub content: String,
	#[serde(default)]
	pub attachments: Vec<Value>,
	#[serde(default)]
	pub reply_to_id: Option<MessageId>,
}

/// Message-create request; the target kind is inferred from which id the
/// client supplied (`channel_id` + `server_id` vs `conversation_id`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageCreateRequest {
	Channel(ChannelMessageCreate),
	Dm(DmMessageCreate),
}

/// Client -> server: edit a channel message the caller authored.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelMessageEdit {
	pub id: MessageId,
	pub channel_id: ChannelId,
	pub server_id: ServerId,
	#[serde(default)]
	pub content: String,
}

/// Client -> server: edit a direct message the caller authored.
#[derive(Debug, Clone, Deserialize)]
pub struct DmMessageEdit {
	pub id: MessageId,
	pub conversation_id: ConversationId,
	#[serde(default)]
	pub content: String,
}

/// Message-edit request, target kind inferred like [`MessageCreateRequest`].
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageEditRequest {
	Channel(ChannelMessageEdit),
	Dm(DmMessageEdit),
}

/// Message deletion; also the dispatched `*_MESSAGE_DELETE` payload (ids only).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MessageDeletePayload {
	pub message_id: MessageId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub channel_id: Option<ChannelId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub server_id: Option<ServerId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub conversation_id: Option<ConversationId>,
}

/// Client -> server: mark a conversation read up to a message.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MessageAckRequest {
	#[serde(default)]
	pub channel_id: Option<ChannelId>,
	#[serde(default)]
	pub conversation_id: Option<ConversationId>,
	pub message_id: MessageId,
}

/// Server -> clients: read-state change within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageAckEvent {
	pub user_id: UserId,
	pub conversation_id: ConversationId,
	pub message_id: MessageId,
	pub read_at: DateTime<Utc>,
}

/// `USER_UPDATE` dispatch body; `fields` is the REST collaborator's document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserUpdatePayload {
	pub user_id: UserId,
	pub fields: Value,
}

/// `SERVER_MEMBER_ADD` dispatch body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerMemberAddPayload {
	pub server_id: ServerId,
	pub user: UserBrief,
}

/// `SERVER_MEMBER_REMOVE` dispatch body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ServerMemberRemovePayload {
	pub server_id: ServerId,
	pub user_id: UserId,
}

/// `DM_CREATE` dispatch body for new conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmCreatePayload {
	pub conversation_id: ConversationId,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub name: String,
	pub is_group: bool,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub participants: Vec<UserBrief>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub created_by: Option<UserBrief>,
}

/// `DM_PARTICIPANT_ADD` dispatch body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmParticipantAddPayload {
	pub conversation_id: ConversationId,
	pub user: UserBrief,
}

/// `DM_PARTICIPANT_LEFT` dispatch body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DmParticipantLeftPayload {
	pub conversation_id: ConversationId,
	pub user_id: UserId,
}

/// `FRIEND_REQUEST_CREATE` dispatch body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendRequestPayload {
	pub id: Uuid,
	pub sender_id: UserId,
	pub created_at: DateTime<Utc>,
	pub sender: UserBrief,
}

/// `FRIEND_REQUEST_ACCEPTED` dispatch body. `user` is the accepting side and
/// is present only on the frame sent to the original requester.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendAcceptedPayload {
	pub friendship_id: Uuid,
	pub conversation_id: ConversationId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user: Option<UserBrief>,
}

/// `FRIEND_REMOVE` dispatch body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FriendRemovePayload {
	pub user_id: UserId,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn message_create_request_infers_target_kind() {
		let channel: MessageCreateRequest = serde_json::from_value(serde_json::json!({
			"channel_id": "11111111-1111-4111-8111-111111111111",
			"server_id": "22222222-2222-4222-8222-222222222222",
			"content": "hi",
		}))
		.expect("channel create");
		assert!(matches!(channel, MessageCreateRequest::Channel(_)));

		let dm: MessageCreateRequest = serde_json::from_value(serde_json::json!({
			"conversation_id": "33333333-3333-4333-8333-333333333333",
			"content": "hey",
		}))
		.expect("dm create");
		assert!(matches!(dm, MessageCreateRequest::Dm(_)));

		let neither = serde_json::from_value::<MessageCreateRequest>(serde_json::json!({"content": "hi"}));
		assert!(neither.is_err());
	}

	#[test]
	fn message_edit_request_infers_target_kind() {
		let edit: MessageEditRequest = serde_json::from_value(serde_json::json!({
			"id": "44444444-4444-4444-8444-444444444444",
			"conversation_id": "33333333-3333-4333-8333-333333333333",
			"content": "fixed",
		}))
		.expect("dm edit");
		assert!(matches!(edit, MessageEditRequest::Dm(_)));
	}

	#[test]
	fn full_message_payload_omits_absent_fields() {
		let payload = ChannelMessagePayload {
			id: MessageId::generate(),
			channel_id: ChannelId::generate(),
			server_id: ServerId::generate(),
			author_id: UserId::generate(),
			author: None,
			content: "hello".to_string(),
			attachments: Vec::new(),
			reply_to_id: None,
			created_at: Some(Utc::now()),
			edited_at: None,
		};

		let json = serde_json::to_value(&payload).expect("serialize");
		assert!(json.get("author").is_none());
		assert!(json.get("attachments").is_none());
		assert!(json.get("edited_at").is_none());
	}
}
