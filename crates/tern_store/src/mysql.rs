#![forbid(unsafe_code)]

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use sqlx::mysql::{MySqlPool, MySqlRow};

use tern_domain::{ChannelId, ConversationId, MessageId, ParseError, ServerId, UserId};

use crate::durable::DurableStore;
use crate::entities::{ChannelMessageRecord, DirectMessageRecord, NewChannelMessage, NewDirectMessage, UserRecord};
use crate::error::StoreError;

/// Durable store over MySQL-protocol databases.
///
/// Identifiers are persisted as 36-char lowercase uuid strings; message ids
/// and creation timestamps are assigned here, on insert.
#[derive(Clone)]
pub struct MySqlStore {
	pool: MySqlPool,
}

impl MySqlStore {
	pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
		let pool = MySqlPool::connect(database_url).await?;
		Ok(Self { pool })
	}

	pub fn from_pool(pool: MySqlPool) -> Self {
		Self { pool }
	}

	/// Lightweight readiness probe.
	pub async fn ping(&self) -> Result<(), StoreError> {
		sqlx::query("SELECT 1").execute(&self.pool).await?;
		Ok(())
	}
}

fn parse_id<T>(raw: &str, column: &str) -> Result<T, StoreError>
where
	T: FromStr<Err = ParseError>,
{
	raw.parse().map_err(|_| StoreError::Corrupt(format!("{column}: {raw:?}")))
}

fn id_placeholders(count: usize) -> String {
	vec!["?"; count].join(", ")
}

fn attachments_column(attachments: &[Value]) -> Result<String, StoreError> {
	Ok(serde_json::to_string(attachments)?)
}

fn user_from_row(row: &MySqlRow) -> Result<UserRecord, StoreError> {
	let id: String = row.try_get("id")?;
	Ok(UserRecord {
		id: parse_id(&id, "users.id")?,
		username: row.try_get("username")?,
		domain: row.try_get("domain")?,
		email: row.try_get("email")?,
		profile_pic_url: row.try_get::<Option<String>, _>("profile_pic_url")?.unwrap_or_default(),
	})
}

#[async_trait]
impl DurableStore for MySqlStore {
	async fn resolve_token(&self, token: &str) -> Result<Option<UserId>, StoreError> {
		let row = sqlx::query("SELECT user_id FROM user_tokens WHERE token = ? AND expires_at > ?")
			.bind(token)
			.bind(Utc::now().timestamp())
			.fetch_optional(&self.pool)
			.await?;

		match row {
			Some(row) => {
				let raw: String = row.try_get("user_id")?;
				Ok(Some(parse_id(&raw, "user_tokens.user_id")?))
			}
			None => Ok(None),
		}
	}

	async fn user_by_id(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
		let row = sqlx::query("SELECT id, username, domain, email, profile_pic_url FROM users WHERE id = ?")
			.bind(id.to_string())
			.fetch_optional(&self.pool)
			.await?;

		row.as_ref().map(user_from_row).transpose()
	}

	async fn users_by_ids(&self, ids: &[UserId]) -> Result<Vec<UserRecord>, StoreError> {
		if ids.is_empty() {
			return Ok(Vec::new());
		}

		let sql = format!(
			"SELECT id, username, domain, email, profile_pic_url FROM users WHERE id IN ({})",
			id_placeholders(ids.len())
		);

		let mut query = sqlx::query(&sql);
		for id in ids {
			query = query.bind(id.to_string());
		}

		let rows = query.fetch_all(&self.pool).await?;
		rows.iter().map(user_from_row).collect()
	}

	async fn server_memberships(&self, user_id: UserId) -> Result<Vec<ServerId>, StoreError> {
		let rows = sqlx::query("SELECT server_id FROM server_members WHERE user_id = ?")
			.bind(user_id.to_string())
			.fetch_all(&self.pool)
			.await?;

		rows.iter()
			.map(|row| {
				let raw: String = row.try_get("server_id")?;
				parse_id(&raw, "server_members.server_id")
			})
			.collect()
	}

	async fn conversation_participations(&self, user_id: UserId) -> Result<Vec<ConversationId>, StoreError> {
		let rows = sqlx::query("SELECT conversation_id FROM dm_participants WHERE user_id = ?")
			.bind(user_id.to_string())
			.fetch_all(&self.pool)
			.await?;

		rows.iter()
			.map(|row| {
				let raw: String = row.try_get("conversation_id")?;
				parse_id(&raw, "dm_participants.conversation_id")
			})
			.collect()
	}

	async fn friend_ids(&self, user_id: UserId) -> Result<Vec<UserId>, StoreError> {
		let rows = sqlx::query("SELECT user1_id, user2_id FROM friendships WHERE user1_id = ? OR user2_id = ?")
			.bind(user_id.to_string())
			.bind(user_id.to_string())
			.fetch_all(&self.pool)
			.await?;

		let mut friends = Vec::with_capacity(rows.len());
		for row in &rows {
			let user1: String = row.try_get("user1_id")?;
			let user2: String = row.try_get("user2_id")?;
			let user1: UserId = parse_id(&user1, "friendships.user1_id")?;
			let user2: UserId = parse_id(&user2, "friendships.user2_id")?;
			friends.push(if user1 == user_id { user2 } else { user1 });
		}
		Ok(friends)
	}

	async fn conversation_co_participants(
		&self,
		conversation_ids: &[ConversationId],
		exclude: UserId,
	) -> Result<Vec<UserId>, StoreError> {
		if conversation_ids.is_empty() {
			return Ok(Vec::new());
		}

		let sql = format!(
			"SELECT DISTINCT user_id FROM dm_participants WHERE conversation_id IN ({}) AND user_id != ?",
			id_placeholders(conversation_ids.len())
		);

		let mut query = sqlx::query(&sql);
		for id in conversation_ids {
			query = query.bind(id.to_string());
		}
		query = query.bind(exclude.to_string());

		let rows = query.fetch_all(&self.pool).await?;
		rows.iter()
			.map(|row| {
				let raw: String = row.try_get("user_id")?;
				parse_id(&raw, "dm_participants.user_id")
			})
			.collect()
	}

	async fn server_co_members(&self, server_ids: &[ServerId], exclude: UserId) -> Result<Vec<UserId>, StoreError> {
		if server_ids.is_empty() {
			return Ok(Vec::new());
		}

		let sql = format!(
			"SELECT DISTINCT user_id FROM server_members WHERE server_id IN ({}) AND user_id != ?",
			id_placeholders(server_ids.len())
		);

		let mut query = sqlx::query(&sql);
		for id in server_ids {
			query = query.bind(id.to_string());
		}
		query = query.bind(exclude.to_string());

		let rows = query.fetch_all(&self.pool).await?;
		rows.iter()
			.map(|row| {
				let raw: String = row.try_get("user_id")?;
				parse_id(&raw, "server_members.user_id")
			})
			.collect()
	}

	async fn channel_in_server(&self, channel_id: ChannelId, server_id: ServerId) -> Result<bool, StoreError> {
		let row = sqlx::query("SELECT COUNT(*) AS cnt FROM channels WHERE id = ? AND server_id = ?")
			.bind(channel_id.to_string())
			.bind(server_id.to_string())
			.fetch_one(&self.pool)
			.await?;

		let count: i64 = row.try_get("cnt")?;
		Ok(count > 0)
	}

	async fn insert_channel_message(&self, new: NewChannelMessage) -> Result<ChannelMessageRecord, StoreError> {
		let id = MessageId::generate();
		let created_at = Utc::now();

		sqlx::query(
			"INSERT INTO channel_messages (id, channel_id, author_id, content, attachments, reply_to_id, created_at) \
			VALUES (?, ?, ?, ?, ?, ?, ?)",
		)
		.bind(id.to_string())
		.bind(new.channel_id.to_string())
		.bind(new.author_id.to_string())
		.bind(&new.content)
		.bind(attachments_column(&new.attachments)?)
		.bind(new.reply_to_id.map(|r| r.to_string()))
		.bind(created_at)
		.execute(&self.pool)
		.await?;

		Ok(ChannelMessageRecord {
			id,
			channel_id: new.channel_id,
			author_id: new.author_id,
			content: new.content,
			attachments: new.attachments,
			reply_to_id: new.reply_to_id,
			created_at,
			edited_at: None,
		})
	}

	async fn insert_direct_message(&self, new: NewDirectMessage) -> Result<DirectMessageRecord, StoreError> {
		let id = MessageId::generate();
		let created_at = Utc::now();

		sqlx::query(
			"INSERT INTO direct_messages (id, conversation_id, author_id, content, attachments, reply_to_id, created_at) \
			VALUES (?, ?, ?, ?, ?, ?, ?)",
		)
		.bind(id.to_string())
		.bind(new.conversation_id.to_string())
		.bind(new.author_id.to_string())
		.bind(&new.content)
		.bind(attachments_column(&new.attachments)?)
		.bind(new.reply_to_id.map(|r| r.to_string()))
		.bind(created_at)
		.execute(&self.pool)
		.await?;

		Ok(DirectMessageRecord {
			id,
			conversation_id: new.conversation_id,
			author_id: new.author_id,
			content: new.content,
			attachments: new.attachments,
			reply_to_id: new.reply_to_id,
			created_at,
			edited_at: None,
		})
	}

	async fn update_channel_message(
		&self,
		id: MessageId,
		channel_id: ChannelId,
		author_id: UserId,
		content: &str,
		edited_at: DateTime<Utc>,
	) -> Result<u64, StoreError> {
		let result =
			sqlx::query("UPDATE channel_messages SET content = ?, edited_at = ? WHERE id = ? AND channel_id = ? AND author_id = ?")
				.bind(content)
				.bind(edited_at)
				.bind(id.to_string())
				.bind(channel_id.to_string())
				.bind(author_id.to_string())
				.execute(&self.pool)
				.await?;

		Ok(result.rows_affected())
	}

	async fn update_direct_message(
		&self,
		id: MessageId,
		conversation_id: ConversationId,
		author_id: UserId,
		content: &str,
		edited_at: DateTime<Utc>,
	) -> Result<u64, StoreError> {
		let result = sqlx::query(
			"UPDATE direct_messages SET content = ?, edited_at = ? WHERE id = ? AND conversation_id = ? AND author_id = ?",
		)
		.bind(content)
		.bind(edited_at)
		.bind(id.to_string())
		.bind(conversation_id.to_string())
		.bind(author_id.to_string())
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected())
	}

	async fn delete_channel_message(
		&self,
		id: MessageId,
		channel_id: ChannelId,
		author_id: UserId,
	) -> Result<u64, StoreError> {
		let result = sqlx::query("DELETE FROM channel_messages WHERE id = ? AND channel_id = ? AND author_id = ?")
			.bind(id.to_string())
			.bind(channel_id.to_string())
			.bind(author_id.to_string())
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}

	async fn delete_direct_message(
		&self,
		id: MessageId,
		conversation_id: ConversationId,
		author_id: UserId,
	) -> Result<u64, StoreError> {
		let result = sqlx::query("DELETE FROM direct_messages WHERE id = ? AND conversation_id = ? AND author_id = ?")
			.bind(id.to_string())
			.bind(conversation_id.to_string())
			.bind(author_id.to_string())
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}

	async fn mark_conversation_read(
		&self,
		conversation_id: ConversationId,
		user_id: UserId,
		read_at: DateTime<Utc>,
	) -> Result<(), StoreError> {
		sqlx::query("UPDATE dm_participants SET last_read_at = ? WHERE conversation_id = ? AND user_id = ?")
			.bind(read_at)
			.bind(conversation_id.to_string())
			.bind(user_id.to_string())
			.execute(&self.pool)
			.await?;

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn placeholders_join_with_commas() {
		assert_eq!(id_placeholders(1), "?");
		assert_eq!(id_placeholders(3), "?, ?, ?");
	}

	#[test]
	fn attachments_serialize_as_a_json_array_column() {
		let attachments = vec![serde_json::json!({"url": "https://cdn.example/a.png"})];
		let column = attachments_column(&attachments).expect("serialize");
		let parsed: Vec<Value> = serde_json::from_str(&column).expect("parse");
		assert_eq!(parsed, attachments);

		assert_eq!(attachments_column(&[]).expect("serialize"), "[]");
	}
}
