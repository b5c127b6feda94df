#![forbid(unsafe_code)]

pub mod frames;
pub mod payloads;

pub use frames::{Frame, FramingError, MAX_FRAME_SIZE, decode_frame, encode_frame, join_frames, split_frames};

/// Gateway opcodes (`op` field of every frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
	// server -> client
	Dispatch = 0,
	HeartbeatAck = 11,
	Ready = 12,
	InvalidSession = 13,

	// client -> server
	Heartbeat = 1,
	Identify = 2,
	PresenceUpdate = 3,
	FocusChange = 4,

	// bidirectional
	TypingStart = 20,
	TypingStop = 21,
	MessageCreate = 22,
	MessageEdit = 23,
	MessageDelete = 24,
	MessageAck = 25,
}

impl OpCode {
	pub const fn as_u8(self) -> u8 {
		self as u8
	}

	pub const fn from_u8(v: u8) -> Option<Self> {
		match v {
			0 => Some(OpCode::Dispatch),
			1 => Some(OpCode::Heartbeat),
			2 => Some(OpCode::Identify),
			3 => Some(OpCode::PresenceUpdate),
			4 => Some(OpCode::FocusChange),
			11 => Some(OpCode::HeartbeatAck),
			12 => Some(OpCode::Ready),
			13 => Some(OpCode::InvalidSession),
			20 => Some(OpCode::TypingStart),
			21 => Some(OpCode::TypingStop),
			22 => Some(OpCode::MessageCreate),
			23 => Some(OpCode::MessageEdit),
			24 => Some(OpCode::MessageDelete),
			25 => Some(OpCode::MessageAck),
			_ => None,
		}
	}
}

/// Event tags carried in the `t` field of `op = Dispatch` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
	// messages
	ChannelMessageCreate,
	ChannelMessageUpdate,
	ChannelMessageDelete,
	DmMessageCreate,
	DmMessageUpdate,
	DmMessageDelete,

	// lightweight notifications for unfocused recipients
	ChannelMessageNotify,
	DmMessageNotify,

	// typing
	TypingStart,
	TypingStop,

	// presence
	PresenceUpdate,

	// server events
	ServerUpdate,
	ServerMemberAdd,
	ServerMemberRemove,
	ServerMemberUpdate,
	ChannelCreate,
	ChannelUpdate,
	ChannelDelete,

	// dm events
	DmCreate,
	DmParticipantAdd,
	DmParticipantLeft,

	// user
	UserUpdate,

	// friends
	FriendRequestCreate,
	FriendRequestAccepted,
	FriendRemove,

	// read state
	MessageAck,
}

impl EventType {
	/// Stable wire tag.
	pub const fn as_str(self) -> &'static str {
		match self {
			EventType::ChannelMessageCreate => "CHANNEL_MESSAGE_CREATE",
			EventType::ChannelMessageUpdate => "CHANNEL_MESSAGE_UPDATE",
			EventType::ChannelMessageDelete => "CHANNEL_MESSAGE_DELETE",
			EventType::DmMessageCreate => "DM_MESSAGE_CREATE",
			EventType::DmMessageUpdate => "DM_MESSAGE_UPDATE",
			EventType::DmMessageDelete => "DM_MESSAGE_DELETE",
			EventType::ChannelMessageNotify => "CHANNEL_MESSAGE_NOTIFY",
			EventType::DmMessageNotify => "DM_MESSAGE_NOTIFY",
			EventType::TypingStart => "TYPING_START",
			EventType::TypingStop => "TYPING_STOP",
			EventType::PresenceUpdate => "PRESENCE_UPDATE",
			EventType::ServerUpdate => "SERVER_UPDATE",
			EventType::ServerMemberAdd => "SERVER_MEMBER_ADD",
			EventType::ServerMemberRemove => "SERVER_MEMBER_REMOVE",
			EventType::ServerMemberUpdate => "SERVER_MEMBER_UPDATE",
			EventType::ChannelCreate => "CHANNEL_CREATE",
			EventType::ChannelUpdate => "CHANNEL_UPDATE",
			EventType::ChannelDelete => "CHANNEL_DELETE",
			EventType::DmCreate => "DM_CREATE",
			EventType::DmParticipantAdd => "DM_PARTICIPANT_ADD",
			EventType::DmParticipantLeft => "DM_PARTICIPANT_LEFT",
			EventType::UserUpdate => "USER_UPDATE",
			EventType::FriendRequestCreate => "FRIEND_REQUEST_CREATE",
			EventType::FriendRequestAccepted => "FRIEND_REQUEST_ACCEPTED",
			EventType::FriendRemove => "FRIEND_REMOVE",
			EventType::MessageAck => "MESSAGE_ACK",
		}
	}
}

impl core::fmt::Display for EventType {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Application-level error codes carried in `ErrorPayload` frames.
///
/// These are not transport close codes; the connection stays open.
pub mod code {
	/// Malformed payload, missing required fields, or an invalid status value.
	pub const INVALID_PAYLOAD: u16 = 4000;
	/// Any opcode other than Identify before a successful Identify.
	pub const NOT_AUTHENTICATED: u16 = 4001;
	/// Opcode outside the protocol table.
	pub const UNKNOWN_OPCODE: u16 = 4002;
	/// Second Identify, or acting on a server/conversation the session is not subscribed to.
	pub const FORBIDDEN: u16 = 4003;
	/// Target row absent, or present but not owned by the caller.
	pub const NOT_FOUND: u16 = 4004;
	/// Durable-store failure during ingest.
	pub const INTERNAL: u16 = 5000;
}
