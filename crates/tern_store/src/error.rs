#![forbid(unsafe_code)]

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("presence kv error: {0}")]
	Kv(#[from] redis::RedisError),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("corrupt row: {0}")]
	Corrupt(String),
}
