#![forbid(unsafe_code)]

use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use tern_domain::{Presence, UserId};

use crate::error::StoreError;

/// Liveness window of a presence record. A record that is not refreshed
/// within this window expires and the user reads as offline.
pub const PRESENCE_TTL_SECS: u64 = 300;

/// KV key for a user's presence record.
pub fn presence_key(user_id: UserId) -> String {
	format!("presence:{user_id}")
}

/// TTL-keyed presence map `user -> {status, activity, updated_at}`.
///
/// Liveness is the key's existence; callers refresh by resetting the TTL.
/// Presence is soft state: one lost write inside a TTL window is acceptable.
#[async_trait]
pub trait PresenceStore: Send + Sync {
	/// Write the record and reset its TTL.
	async fn set(&self, user_id: UserId, presence: &Presence) -> Result<(), StoreError>;

	/// Reset the TTL without touching the record.
	async fn refresh(&self, user_id: UserId) -> Result<(), StoreError>;

	async fn delete(&self, user_id: UserId) -> Result<(), StoreError>;

	async fn get(&self, user_id: UserId) -> Result<Option<Presence>, StoreError>;

	/// Batch fetch; absent users are simply missing from the result.
	async fn get_many(&self, user_ids: &[UserId]) -> Result<HashMap<UserId, Presence>, StoreError>;
}

/// Presence store over Valkey/Redis.
#[derive(Clone)]
pub struct ValkeyPresenceStore {
	conn: MultiplexedConnection,
}

impl ValkeyPresenceStore {
	pub async fn connect(url: &str) -> Result<Self, StoreError> {
		let client = redis::Client::open(url)?;
		let conn = client.get_multiplexed_async_connection().await?;
		Ok(Self { conn })
	}

	/// Lightweight readiness probe.
	pub async fn ping(&self) -> Result<(), StoreError> {
		let mut conn = self.conn.clone();
		let _: String = redis::cmd("PING").query_async(&mut conn).await?;
		Ok(())
	}
}

#[async_trait]
impl PresenceStore for ValkeyPresenceStore {
	async fn set(&self, user_id: UserId, presence: &Presence) -> Result<(), StoreError> {
		let payload = serde_json::to_string(presence)?;
		let mut conn = self.conn.clone();
		let _: () = conn.set_ex(presence_key(user_id), payload, PRESENCE_TTL_SECS).await?;
		Ok(())
	}

	async fn refresh(&self, user_id: UserId) -> Result<(), StoreError> {
		let mut conn = self.conn.clone();
		let _: () = conn.expire(presence_key(user_id), PRESENCE_TTL_SECS as i64).await?;
		Ok(())
	}

	async fn delete(&self, user_id: UserId) -> Result<(), StoreError> {
		let mut conn = self.conn.clone();
		let _: () = conn.del(presence_key(user_id)).await?;
		Ok(())
	}

	async fn get(&self, user_id: UserId) -> Result<Option<Presence>, StoreError> {
		let mut conn = self.conn.clone();
		let raw: Option<String> = conn.get(presence_key(user_id)).await?;
		match raw {
			Some(json) => Ok(Some(serde_json::from_str(&json)?)),
			None => Ok(None),
		}
	}

	async fn get_many(&self, user_ids: &[UserId]) -> Result<HashMap<UserId, Presence>, StoreError> {
		if user_ids.is_empty() {
			return Ok(HashMap::new());
		}

		let keys: Vec<String> = user_ids.iter().map(|id| presence_key(*id)).collect();
		let mut conn = self.conn.clone();
		let values: Vec<Option<String>> = conn.mget(keys).await?;

		let mut out = HashMap::new();
		for (user_id, value) in user_ids.iter().zip(values) {
			let Some(json) = value else {
				continue;
			};

			// A record that fails to parse is treated as absent, not fatal.
			match serde_json::from_str(&json) {
				Ok(presence) => {
					out.insert(*user_id, presence);
				}
				Err(error) => {
					tracing::warn!(user_id = %user_id, error = %error, "skipping corrupt presence record");
				}
			}
		}

		Ok(out)
	}
}
