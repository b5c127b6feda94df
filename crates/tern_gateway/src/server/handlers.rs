#![forbid(unsafe_code)]

//! Opcode routing and the per-frame handlers, including the ingest path
//! (message create/edit/delete/ack). Persist first, then dispatch with
//! store-assigned ids; never the other way around.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use tern_domain::PresenceStatus;
use tern_protocol::payloads::{
	ChannelMessagePayload, DmMessagePayload, FocusPayload, HeartbeatAckPayload, IdentifyPayload, MessageAckEvent,
	MessageAckRequest, MessageCreateRequest, MessageDeletePayload, MessageEditRequest, PresenceUpdateRequest,
	ReadyPayload, TypingPayload,
};
use tern_protocol::{EventType, Frame, OpCode, code};
use tern_store::{NewChannelMessage, NewDirectMessage};

use crate::server::gateway::Gateway;
use crate::server::session::Session;
use crate::util::time::unix_ms_now;

impl Gateway {
	/// Route one decoded frame from a session's reader task.
	pub async fn handle_frame(&self, session: &Arc<Session>, frame: Frame) {
		let op = frame.opcode();

		// Only Identify is accepted before authentication.
		if op != Some(OpCode::Identify) && !session.is_identified().await {
			session.send_error(code::NOT_AUTHENTICATED, "not authenticated").await;
			return;
		}

		let Some(op) = op else {
			session.send_error(code::UNKNOWN_OPCODE, "unknown opcode").await;
			return;
		};

		match op {
			OpCode::Identify => self.handle_identify(session, &frame).await,
			OpCode::Heartbeat => self.handle_heartbeat(session).await,
			OpCode::PresenceUpdate => self.handle_presence_update(session, &frame).await,
			OpCode::FocusChange => self.handle_focus_change(session, &frame).await,
			OpCode::TypingStart => self.handle_typing(session, &frame, EventType::TypingStart).await,
			OpCode::TypingStop => self.handle_typing(session, &frame, EventType::TypingStop).await,
			OpCode::MessageCreate => self.handle_message_create(session, &frame).await,
			OpCode::MessageEdit => self.handle_message_edit(session, &frame).await,
			OpCode::MessageDelete => self.handle_message_delete(session, &frame).await,
			OpCode::MessageAck => self.handle_message_ack(session, &frame).await,

			// server-to-client opcodes have no meaning inbound
			OpCode::Dispatch | OpCode::HeartbeatAck | OpCode::Ready | OpCode::InvalidSession => {
				session.send_error(code::UNKNOWN_OPCODE, "unknown opcode").await;
			}
		}
	}

	async fn handle_identify(&self, session: &Arc<Session>, frame: &Frame) {
		if session.is_identified().await {
			session.send_error(code::FORBIDDEN, "already identified").await;
			return;
		}

		let Ok(payload) = frame.payload::<IdentifyPayload>() else {
			session.send_error(code::INVALID_PAYLOAD, "invalid payload").await;
			return;
		};

		if payload.token.is_empty() {
			session.send(&Frame::bare(OpCode::InvalidSession)).await;
			return;
		}

		let user_id = match self.store().resolve_token(&payload.token).await {
			Ok(Some(user_id)) => user_id,
			Ok(None) => {
				session.send(&Frame::bare(OpCode::InvalidSession)).await;
				return;
			}
			Err(err) => {
				warn!(session_id = %session.session_id(), error = %err, "token resolution failed");
				session.send(&Frame::bare(OpCode::InvalidSession)).await;
				return;
			}
		};

		let user = match self.store().user_by_id(user_id).await {
			Ok(Some(user)) => user,
			Ok(None) => {
				session.send(&Frame::bare(OpCode::InvalidSession)).await;
				return;
			}
			Err(err) => {
				warn!(user_id = %user_id, error = %err, "user lookup failed during identify");
				session.send(&Frame::bare(OpCode::InvalidSession)).await;
				return;
			}
		};

		let brief = user.brief();
		self.hub().register_identified(session, user_id, brief.clone()).await;

		// A partially subscribed session still receives direct-user events.
		if let Err(err) = self.load_user_subscriptions(session, user_id).await {
			warn!(user_id = %user_id, error = %err, "failed to load subscriptions");
		}

		self.write_presence(user_id, PresenceStatus::Online, None).await;

		let users = self.load_relevant_users(user_id).await;

		let ready = ReadyPayload {
			user: brief.clone(),
			session_id: session.session_id().to_string(),
			users,
		};
		match Frame::with_payload(OpCode::Ready, &ready) {
			Ok(frame) => session.send(&frame).await,
			Err(err) => {
				warn!(user_id = %user_id, error = %err, "failed to build Ready frame");
				return;
			}
		}

		self.broadcast_presence_change(user_id, PresenceStatus::Online, None).await;

		metrics::counter!("tern_gateway_identify_total").increment(1);
		info!(session_id = %session.session_id(), user_id = %user_id, username = %brief.username, "user identified");
	}

	async fn handle_heartbeat(&self, session: &Arc<Session>) {
		// Heartbeats keep the presence record alive; no broadcast.
		if let Some(user_id) = session.user_id().await {
			if let Err(err) = self.presence().refresh(user_id).await {
				warn!(user_id = %user_id, error = %err, "failed to refresh presence ttl");
			}
		}

		match Frame::with_payload(OpCode::HeartbeatAck, &HeartbeatAckPayload { ts: unix_ms_now() }) {
			Ok(frame) => session.send(&frame).await,
			Err(err) => warn!(session_id = %session.session_id(), error = %err, "failed to build heartbeat ack"),
		}
	}

	async fn handle_presence_update(&self, session: &Arc<Session>, frame: &Frame) {
		let Ok(request) = frame.payload::<PresenceUpdateRequest>() else {
			return;
		};

		let Ok(status) = request.status.parse::<PresenceStatus>() else {
			session.send_error(code::INVALID_PAYLOAD, "invalid status").await;
			return;
		};

		let Some(user_id) = session.user_id().await else {
			return;
		};

		session.set_status(status).await;
		session.set_activity(request.activity.clone()).await;

		self.write_presence(user_id, status, request.activity.clone()).await;
		self.broadcast_presence_change(user_id, status, request.activity).await;
	}

	async fn handle_focus_change(&self, session: &Arc<Session>, frame: &Frame) {
		let Ok(focus) = frame.payload::<FocusPayload>() else {
			return;
		};

		// Focus targets must be within the session's subscriptions; anything
		// else is silently dropped.
		if let Some(server_id) = focus.server_id {
			if !session.is_in_server(server_id).await {
				return;
			}
		}
		if let Some(conversation_id) = focus.conversation_id {
			if !session.is_in_conversation(conversation_id).await {
				return;
			}
		}

		session.set_focus(focus.channel_id, focus.server_id, focus.conversation_id).await;

		session
			.send_ack(
				frame.nonce.as_deref(),
				json!({
					"channel_id": focus.channel_id,
					"server_id": focus.server_id,
					"conversation_id": focus.conversation_id,
				}),
			)
			.await;
	}

	async fn handle_typing(&self, session: &Arc<Session>, frame: &Frame, event: EventType) {
		let Ok(mut payload) = frame.payload::<TypingPayload>() else {
			return;
		};

		let Some((user_id, user)) = session.identity().await else {
			return;
		};
		payload.user_id = Some(user_id);
		payload.user = Some(user);

		if let (Some(channel_id), Some(server_id)) = (payload.channel_id, payload.server_id) {
			if !session.is_in_server(server_id).await {
				return;
			}
			self.hub().dispatch_typing_to_channel(server_id, channel_id, event, &payload).await;
		} else if let Some(conversation_id) = payload.conversation_id {
			if !session.is_in_conversation(conversation_id).await {
				return;
			}
			self.hub().dispatch_typing_to_conversation(conversation_id, event, &payload).await;
		}
	}

	async fn handle_message_create(&self, session: &Arc<Session>, frame: &Frame) {
		let request: MessageCreateRequest = match frame.payload() {
			Ok(request) => request,
			Err(_) => {
				let has_target = frame
					.d
					.as_ref()
					.is_some_and(|d| d.get("channel_id").is_some() || d.get("conversation_id").is_some());
				let message = if has_target {
					"invalid payload"
				} else {
					"missing channel_id or conversation_id"
				};
				session.send_error(code::INVALID_PAYLOAD, message).await;
				return;
			}
		};

		match request {
			MessageCreateRequest::Channel(create) => self.create_channel_message(session, frame, create).await,
			MessageCreateRequest::Dm(create) => self.create_dm_message(session, frame, create).await,
		}
	}

	async fn create_channel_message(
		&self,
		session: &Arc<Session>,
		frame: &Frame,
		create: tern_protocol::payloads::ChannelMessageCreate,
	) {
		let Some((user_id, user)) = session.identity().await else {
			return;
		};

		if !session.is_in_server(create.server_id).await {
			session.send_error(code::FORBIDDEN, "not in server").await;
			return;
		}

		match self.store().channel_in_server(create.channel_id, create.server_id).await {
			Ok(true) => {}
			Ok(false) => {
				session.send_error(code::NOT_FOUND, "channel not found").await;
				return;
			}
			Err(err) => {
				warn!(user_id = %user_id, error = %err, "channel lookup failed");
				session.send_error(code::INTERNAL, "failed to create message").await;
				return;
			}
		}

		let record = match self
			.store()
			.insert_channel_message(NewChannelMessage {
				channel_id: create.channel_id,
				author_id: user_id,
				content: create.content,
				attachments: create.attachments,
				reply_to_id: create.reply_to_id,
			})
			.await
		{
			Ok(record) => record,
			Err(err) => {
				warn!(user_id = %user_id, error = %err, "failed to persist channel message");
				session.send_error(code::INTERNAL, "failed to create message").await;
				return;
			}
		};

		metrics::counter!("tern_gateway_messages_ingested_total").increment(1);

		let payload = ChannelMessagePayload {
			id: record.id,
			channel_id: record.channel_id,
			server_id: create.server_id,
			author_id: record.author_id,
			author: Some(user),
			content: record.content,
			attachments: record.attachments,
			reply_to_id: record.reply_to_id,
			created_at: Some(record.created_at),
			edited_at: None,
		};

		self.hub().dispatch_channel_message(create.server_id, create.channel_id, &payload).await;

		if let Some(nonce) = frame.nonce.as_deref() {
			session.send_ack(Some(nonce), json!({"id": record.id})).await;
		}
	}

	async fn create_dm_message(
		&self,
		session: &Arc<Session>,
		frame: &Frame,
		create: tern_protocol::payloads::DmMessageCreate,
	) {
		let Some((user_id, user)) = session.identity().await else {
			return;
		};

		if !session.is_in_conversation(create.conversation_id).await {
			session.send_error(code::FORBIDDEN, "not in conversation").await;
			return;
		}

		let record = match self
			.store()
			.insert_direct_message(NewDirectMessage {
				conversation_id: create.conversation_id,
				author_id: user_id,
				content: create.content,
				attachments: create.attachments,
				reply_to_id: create.reply_to_id,
			})
			.await
		{
			Ok(record) => record,
			Err(err) => {
				warn!(user_id = %user_id, error = %err, "failed to persist direct message");
				session.send_error(code::INTERNAL, "failed to create message").await;
				return;
			}
		};

		metrics::counter!("tern_gateway_messages_ingested_total").increment(1);

		let payload = DmMessagePayload {
			id: record.id,
			conversation_id: record.conversation_id,
			author_id: record.author_id,
			author: Some(user),
			content: record.content,
			attachments: record.attachments,
			reply_to_id: record.reply_to_id,
			created_at: Some(record.created_at),
			edited_at: None,
		};

		self.hub().dispatch_dm_message(create.conversation_id, &payload).await;

		// Sending into a conversation implies having read it.
		if let Err(err) = self
			.store()
			.mark_conversation_read(create.conversation_id, user_id, Utc::now())
			.await
		{
			warn!(user_id = %user_id, error = %err, "failed to advance sender read marker");
		}

		if let Some(nonce) = frame.nonce.as_deref() {
			session.send_ack(Some(nonce), json!({"id": record.id})).await;
		}
	}

	async fn handle_message_edit(&self, session: &Arc<Session>, frame: &Frame) {
		let Ok(request) = frame.payload::<MessageEditRequest>() else {
			session.send_error(code::INVALID_PAYLOAD, "invalid payload").await;
			return;
		};

		let Some(user_id) = session.user_id().await else {
			return;
		};

		let now = Utc::now();
		match request {
			MessageEditRequest::Channel(edit) => {
				if edit.content.is_empty() {
					session.send_error(code::INVALID_PAYLOAD, "invalid payload").await;
					return;
				}

				if !session.is_in_server(edit.server_id).await {
					session.send_error(code::FORBIDDEN, "not in server").await;
					return;
				}

				let rows = match self
					.store()
					.update_channel_message(edit.id, edit.channel_id, user_id, &edit.content, now)
					.await
				{
					Ok(rows) => rows,
					Err(err) => {
						warn!(user_id = %user_id, error = %err, "failed to persist message edit");
						session.send_error(code::INTERNAL, "failed to edit message").await;
						return;
					}
				};

				if rows == 0 {
					session.send_error(code::NOT_FOUND, "message not found or not authorized").await;
					return;
				}

				let payload = ChannelMessagePayload {
					id: edit.id,
					channel_id: edit.channel_id,
					server_id: edit.server_id,
					author_id: user_id,
					author: None,
					content: edit.content,
					attachments: Vec::new(),
					reply_to_id: None,
					created_at: None,
					edited_at: Some(now),
				};
				// Updates are not focus-filtered; everyone sees the new content.
				self.hub()
					.dispatch_to_server(edit.server_id, EventType::ChannelMessageUpdate, &payload)
					.await;
			}
			MessageEditRequest::Dm(edit) => {
				if edit.content.is_empty() {
					session.send_error(code::INVALID_PAYLOAD, "invalid payload").await;
					return;
				}

				if !session.is_in_conversation(edit.conversation_id).await {
					session.send_error(code::FORBIDDEN, "not in conversation").await;
					return;
				}

				let rows = match self
					.store()
					.update_direct_message(edit.id, edit.conversation_id, user_id, &edit.content, now)
					.await
				{
					Ok(rows) => rows,
					Err(err) => {
						warn!(user_id = %user_id, error = %err, "failed to persist message edit");
						session.send_error(code::INTERNAL, "failed to edit message").await;
						return;
					}
				};

				if rows == 0 {
					session.send_error(code::NOT_FOUND, "message not found or not authorized").await;
					return;
				}

				let payload = DmMessagePayload {
					id: edit.id,
					conversation_id: edit.conversation_id,
					author_id: user_id,
					author: None,
					content: edit.content,
					attachments: Vec::new(),
					reply_to_id: None,
					created_at: None,
					edited_at: Some(now),
				};
				self.hub()
					.dispatch_to_conversation(edit.conversation_id, EventType::DmMessageUpdate, &payload)
					.await;
			}
		}
	}

	async fn handle_message_delete(&self, session: &Arc<Session>, frame: &Frame) {
		let Ok(payload) = frame.payload::<MessageDeletePayload>() else {
			session.send_error(code::INVALID_PAYLOAD, "invalid payload").await;
			return;
		};

		let Some(user_id) = session.user_id().await else {
			return;
		};

		if let (Some(channel_id), Some(server_id)) = (payload.channel_id, payload.server_id) {
			if !session.is_in_server(server_id).await {
				session.send_error(code::FORBIDDEN, "not in server").await;
				return;
			}

			let rows = match self.store().delete_channel_message(payload.message_id, channel_id, user_id).await {
				Ok(rows) => rows,
				Err(err) => {
					warn!(user_id = %user_id, error = %err, "failed to delete channel message");
					session.send_error(code::INTERNAL, "failed to delete message").await;
					return;
				}
			};

			if rows == 0 {
				session.send_error(code::NOT_FOUND, "message not found or not authorized").await;
				return;
			}

			self.hub()
				.dispatch_to_server(server_id, EventType::ChannelMessageDelete, &payload)
				.await;
		} else if let Some(conversation_id) = payload.conversation_id {
			if !session.is_in_conversation(conversation_id).await {
				session.send_error(code::FORBIDDEN, "not in conversation").await;
				return;
			}

			let rows = match self
				.store()
				.delete_direct_message(payload.message_id, conversation_id, user_id)
				.await
			{
				Ok(rows) => rows,
				Err(err) => {
					warn!(user_id = %user_id, error = %err, "failed to delete direct message");
					session.send_error(code::INTERNAL, "failed to delete message").await;
					return;
				}
			};

			if rows == 0 {
				session.send_error(code::NOT_FOUND, "message not found or not authorized").await;
				return;
			}

			self.hub()
				.dispatch_to_conversation(conversation_id, EventType::DmMessageDelete, &payload)
				.await;
		}
	}

	async fn handle_message_ack(&self, session: &Arc<Session>, frame: &Frame) {
		let Ok(request) = frame.payload::<MessageAckRequest>() else {
			return;
		};

		// Read-state tracking exists for conversations only.
		let Some(conversation_id) = request.conversation_id else {
			return;
		};

		let Some(user_id) = session.user_id().await else {
			return;
		};

		if !session.is_in_conversation(conversation_id).await {
			return;
		}

		let now = Utc::now();
		if let Err(err) = self.store().mark_conversation_read(conversation_id, user_id, now).await {
			warn!(user_id = %user_id, error = %err, "failed to persist read marker");
		}

		let payload = MessageAckEvent {
			user_id,
			conversation_id,
			message_id: request.message_id,
			read_at: now,
		};
		self.hub()
			.dispatch_to_conversation(conversation_id, EventType::MessageAck, &payload)
			.await;
	}
}
