#![forbid(unsafe_code)]

//! Shared domain types for the tern realtime gateway.
//!
//! Everything here is pure data: typed identifiers, presence state, and the
//! public user projection carried on the wire. No I/O.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors for parsing identifiers and enums from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
	#[error("empty value")]
	Empty,
	#[error("invalid uuid: {0}")]
	InvalidUuid(String),
	#[error("unknown presence status: {0}")]
	UnknownStatus(String),
}

macro_rules! uuid_id {
	($(#[$doc:meta])* $name:ident) => {
		$(#[$doc])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(Uuid);

		impl $name {
			/// Fresh random identifier.
			pub fn generate() -> Self {
				Self(Uuid::new_v4())
			}

			pub const fn from_uuid(id: Uuid) -> Self {
				Self(id)
			}

			pub const fn as_uuid(&self) -> &Uuid {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				// `Uuid` renders hyphenated lowercase, the canonical 36-char wire form.
				fmt::Display::fmt(&self.0, f)
			}
		}

		impl FromStr for $name {
			type Err = ParseError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				let s = s.trim();
				if s.is_empty() {
					return Err(ParseError::Empty);
				}
				Uuid::parse_str(s).map(Self).map_err(|_| ParseError::InvalidUuid(s.to_string()))
			}
		}
	};
}

uuid_id!(
	/// A registered user.
	UserId
);
uuid_id!(
	/// A server (a named group of channels with a member roster).
	ServerId
);
uuid_id!(
	/// A channel within a server.
	ChannelId
);
uuid_id!(
	/// A direct-message conversation (1:1 or group).
	ConversationId
);
uuid_id!(
	/// One connected gateway session.
	SessionId
);
uuid_id!(
	/// A persisted channel or direct message.
	MessageId
);

/// User-visible presence status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
	#[default]
	Online,
	Idle,
	Dnd,
	Offline,
}

impl PresenceStatus {
	/// Stable wire identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			PresenceStatus::Online => "online",
			PresenceStatus::Idle => "idle",
			PresenceStatus::Dnd => "dnd",
			PresenceStatus::Offline => "offline",
		}
	}
}

impl fmt::Display for PresenceStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for PresenceStatus {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim() {
			"" => Err(ParseError::Empty),
			"online" => Ok(PresenceStatus::Online),
			"idle" => Ok(PresenceStatus::Idle),
			"dnd" => Ok(PresenceStatus::Dnd),
			"offline" => Ok(PresenceStatus::Offline),
			other => Err(ParseError::UnknownStatus(other.to_string())),
		}
	}
}

/// Optional start/end timestamps attached to an activity (unix millis).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityTimestamps {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub start: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub end: Option<i64>,
}

/// Rich-presence activity a user advertises alongside their status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
	#[serde(default)]
	pub small_text: String,
	#[serde(default)]
	pub large_text: String,

	#[serde(default)]
	pub details: String,
	#[serde(default)]
	pub state: String,

	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub app_name: String,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timestamps: Option<ActivityTimestamps>,
}

/// Soft-state presence record as stored in the presence KV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presence {
	pub status: PresenceStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub activity: Option<Activity>,
	/// Unix seconds of the last write.
	pub updated_at: i64,
}

/// Minimal public projection of a user, embedded in gateway payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBrief {
	pub id: UserId,
	pub username: String,
	pub domain: String,
	#[serde(rename = "profilePicURL", default, skip_serializing_if = "String::is_empty")]
	pub profile_pic_url: String,
	#[serde(default)]
	pub email: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ids_render_lowercase_hyphenated() {
		let id: UserId = "6F9619FF-8B86-D011-B42D-00C04FC964FF".parse().expect("parse");
		assert_eq!(id.to_string(), "6f9619ff-8b86-d011-b42d-00c04fc964ff");
	}

	#[test]
	fn id_parse_rejects_garbage() {
		assert_eq!("".parse::<ServerId>(), Err(ParseError::Empty));
		assert!(matches!("not-a-uuid".parse::<ServerId>(), Err(ParseError::InvalidUuid(_))));
	}

	#[test]
	fn presence_status_round_trips() {
		for s in ["online", "idle", "dnd", "offline"] {
			let parsed: PresenceStatus = s.parse().expect("valid status");
			assert_eq!(parsed.as_str(), s);
		}
		assert!(matches!("busy".parse::<PresenceStatus>(), Err(ParseError::UnknownStatus(_))));
	}

	#[test]
	fn presence_serializes_status_as_string() {
		let presence = Presence {
			status: PresenceStatus::Dnd,
			activity: None,
			updated_at: 1_700_000_000,
		};

		let json = serde_json::to_value(&presence).expect("serialize");
		assert_eq!(json["status"], "dnd");
		assert!(json.get("activity").is_none());
	}

	#[test]
	fn user_brief_uses_camel_case_profile_pic_key() {
		let brief = UserBrief {
			id: UserId::generate(),
			username: "ada".to_string(),
			domain: "ada.example".to_string(),
			profile_pic_url: "https://cdn.example/ada.png".to_string(),
			email: "ada@example.com".to_string(),
		};

		let json = serde_json::to_value(&brief).expect("serialize");
		assert!(json.get("profilePicURL").is_some());

		let empty = UserBrief {
			profile_pic_url: String::new(),
			..brief
		};
		let json = serde_json::to_value(&empty).expect("serialize");
		assert!(json.get("profilePicURL").is_none());
	}
}
