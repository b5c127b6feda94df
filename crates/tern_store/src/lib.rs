#![forbid(unsafe_code)]

//! Storage backends for the tern realtime gateway.
//!
//! Two abstract stores back the gateway: the [`DurableStore`] (users, tokens,
//! memberships, messages) and the TTL-keyed [`PresenceStore`]. Production
//! implementations speak MySQL (via sqlx) and Valkey/Redis; in-memory
//! implementations back tests and local development.

pub mod durable;
pub mod entities;
pub mod error;
pub mod memory;
pub mod mysql;
pub mod presence;

pub use durable::DurableStore;
pub use entities::{
	ChannelMessageRecord, DirectMessageRecord, NewChannelMessage, NewDirectMessage, UserRecord,
};
pub use error::StoreError;
pub use memory::{MemoryPresenceStore, MemoryStore};
pub use mysql::MySqlStore;
pub use presence::{PRESENCE_TTL_SECS, PresenceStore, ValkeyPresenceStore, presence_key};
