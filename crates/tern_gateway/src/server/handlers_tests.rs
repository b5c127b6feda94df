#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use tern_domain::{ChannelId, ConversationId, PresenceStatus, ServerId, UserId};
use tern_protocol::payloads::{
	ChannelMessagePayload, DmCreatePayload, DmMessagePayload, ErrorPayload, MessageAckEvent, PresenceUpdatePayload,
	ReadyPayload, TypingPayload,
};
use tern_protocol::{EventType, Frame, OpCode, code, decode_frame};
use tern_store::{
	DurableStore, MemoryPresenceStore, MemoryStore, NewDirectMessage, PresenceStore, UserRecord,
};

use crate::server::gateway::Gateway;
use crate::server::session::Session;

struct TestEnv {
	gateway: Gateway,
	store: Arc<MemoryStore>,
	presence: Arc<MemoryPresenceStore>,
}

fn test_env() -> TestEnv {
	let store = Arc::new(MemoryStore::new());
	let presence = Arc::new(MemoryPresenceStore::new());

	let durable: Arc<dyn DurableStore> = Arc::clone(&store) as Arc<dyn DurableStore>;
	let kv: Arc<dyn PresenceStore> = Arc::clone(&presence) as Arc<dyn PresenceStore>;

	TestEnv {
		gateway: Gateway::new(durable, kv),
		store,
		presence,
	}
}

async fn seed_user(env: &TestEnv, username: &str) -> UserRecord {
	let user = UserRecord {
		id: UserId::generate(),
		username: username.to_string(),
		domain: format!("{username}.example"),
		email: format!("{username}@example.com"),
		profile_pic_url: String::new(),
	};
	env.store.add_user(user.clone()).await;
	env.store
		.add_token(format!("tok-{username}"), user.id, chrono::Utc::now().timestamp() + 3600)
		.await;
	user
}

async fn connect(env: &TestEnv) -> (Arc<Session>, mpsc::Receiver<String>) {
	let (tx, rx) = mpsc::channel(64);
	let session = Arc::new(Session::new(tx));
	env.gateway.hub().register(Arc::clone(&session)).await;
	(session, rx)
}

fn frame(op: OpCode, d: serde_json::Value) -> Frame {
	Frame {
		op: op.as_u8(),
		d: Some(d),
		t: None,
		nonce: None,
	}
}

fn frame_with_nonce(op: OpCode, d: serde_json::Value, nonce: &str) -> Frame {
	Frame {
		nonce: Some(nonce.to_string()),
		..frame(op, d)
	}
}

async fn recv_frame(rx: &mut mpsc::Receiver<String>) -> Frame {
	let text = timeout(Duration::from_millis(250), rx.recv())
		.await
		.expect("expected a frame within timeout")
		.expect("queue open");
	decode_frame(&text).expect("valid frame")
}

fn drain(rx: &mut mpsc::Receiver<String>) {
	while rx.try_recv().is_ok() {}
}

fn assert_empty(rx: &mut mpsc::Receiver<String>) {
	assert!(rx.try_recv().is_err(), "expected no further frames");
}

async fn expect_error(rx: &mut mpsc::Receiver<String>, expected: u16) {
	let frame = recv_frame(rx).await;
	assert!(frame.is_error(), "expected an error frame, got: {frame:?}");
	let payload: ErrorPayload = frame.payload().expect("error payload");
	assert_eq!(payload.code, expected);
}

/// Identify the session, assert Ready, and drain the trailing presence
/// broadcast frames the session receives about itself.
async fn identify(env: &TestEnv, session: &Arc<Session>, rx: &mut mpsc::Receiver<String>, token: &str) -> ReadyPayload {
	env.gateway
		.handle_frame(session, frame(OpCode::Identify, json!({"token": token})))
		.await;

	let ready = recv_frame(rx).await;
	assert_eq!(ready.opcode(), Some(OpCode::Ready), "expected Ready, got: {ready:?}");
	let payload: ReadyPayload = ready.payload().expect("ready payload");
	drain(rx);
	payload
}

#[tokio::test]
async fn identify_happy_path_returns_ready_with_relevant_users() {
	let env = test_env();
	let server = ServerId::generate();
	let conversation = ConversationId::generate();

	let ada = seed_user(&env, "ada").await;
	let grace = seed_user(&env, "grace").await;
	env.store.add_server_member(server, ada.id).await;
	env.store.add_server_member(server, grace.id).await;
	env.store.add_dm_participant(conversation, ada.id).await;
	env.store.add_dm_participant(conversation, grace.id).await;
	env.store.add_friendship(ada.id, grace.id, conversation).await;

	// Grace is already online; her session will watch Ada come online.
	let (grace_session, mut grace_rx) = connect(&env).await;
	identify(&env, &grace_session, &mut grace_rx, "tok-grace").await;

	let (ada_session, mut ada_rx) = connect(&env).await;
	let ready = identify(&env, &ada_session, &mut ada_rx, "tok-ada").await;

	assert_eq!(ready.user.id, ada.id);
	assert_eq!(ready.user.username, "ada");
	assert_eq!(ready.session_id, ada_session.session_id().to_string());

	assert_eq!(ready.users.len(), 1, "grace appears once despite three relations");
	let grace_entry = &ready.users[0];
	assert_eq!(grace_entry.id, grace.id);
	let presence = grace_entry.presence.as_ref().expect("grace is online");
	assert_eq!(presence.status, PresenceStatus::Online);

	// Subscriptions were preloaded from the store.
	assert!(ada_session.is_in_server(server).await);
	assert!(ada_session.is_in_conversation(conversation).await);

	// The presence record was written with status online.
	let record = env.presence.get(ada.id).await.expect("presence read").expect("record present");
	assert_eq!(record.status, PresenceStatus::Online);

	// Grace hears about Ada coming online (server and conversation overlap
	// means she may hear it more than once).
	let update = recv_frame(&mut grace_rx).await;
	assert_eq!(update.t, Some(EventType::PresenceUpdate));
	let body: PresenceUpdatePayload = update.payload().expect("presence payload");
	assert_eq!(body.user_id, ada.id);
	assert_eq!(body.status, PresenceStatus::Online);
}

#[tokio::test]
async fn anything_but_identify_requires_authentication() {
	let env = test_env();
	let (session, mut rx) = connect(&env).await;

	env.gateway.handle_frame(&session, Frame::bare(OpCode::Heartbeat)).await;
	expect_error(&mut rx, code::NOT_AUTHENTICATED).await;

	// Unknown opcodes on an unidentified session also read as unauthenticated.
	env.gateway
		.handle_frame(&session, decode_frame(r#"{"op":99}"#).expect("decode"))
		.await;
	expect_error(&mut rx, code::NOT_AUTHENTICATED).await;
}

#[tokio::test]
async fn second_identify_is_rejected_without_state_change() {
	let env = test_env();
	let ada = seed_user(&env, "ada").await;

	let (session, mut rx) = connect(&env).await;
	identify(&env, &session, &mut rx, "tok-ada").await;

	env.gateway
		.handle_frame(&session, frame(OpCode::Identify, json!({"token": "tok-ada"})))
		.await;
	expect_error(&mut rx, code::FORBIDDEN).await;

	assert_eq!(session.user_id().await, Some(ada.id));
	assert_eq!(env.gateway.hub().user_sessions(ada.id).await.len(), 1);
}

#[tokio::test]
async fn bad_tokens_yield_invalid_session() {
	let env = test_env();
	seed_user(&env, "ada").await;

	let (session, mut rx) = connect(&env).await;

	env.gateway
		.handle_frame(&session, frame(OpCode::Identify, json!({"token": ""})))
		.await;
	assert_eq!(recv_frame(&mut rx).await.opcode(), Some(OpCode::InvalidSession));

	env.gateway
		.handle_frame(&session, frame(OpCode::Identify, json!({"token": "tok-nobody"})))
		.await;
	assert_eq!(recv_frame(&mut rx).await.opcode(), Some(OpCode::InvalidSession));

	assert!(!session.is_identified().await, "failed identify leaves the session unbound");
}

#[tokio::test]
async fn unknown_opcode_after_identify_is_4002() {
	let env = test_env();
	seed_user(&env, "ada").await;
	let (session, mut rx) = connect(&env).await;
	identify(&env, &session, &mut rx, "tok-ada").await;

	env.gateway
		.handle_frame(&session, decode_frame(r#"{"op":99,"d":{}}"#).expect("decode"))
		.await;
	expect_error(&mut rx, code::UNKNOWN_OPCODE).await;

	// Server-to-client opcodes are equally meaningless inbound.
	env.gateway.handle_frame(&session, Frame::bare(OpCode::Ready)).await;
	expect_error(&mut rx, code::UNKNOWN_OPCODE).await;
}

#[tokio::test]
async fn heartbeat_acks_with_server_time() {
	let env = test_env();
	seed_user(&env, "ada").await;
	let (session, mut rx) = connect(&env).await;
	identify(&env, &session, &mut rx, "tok-ada").await;

	env.gateway.handle_frame(&session, Frame::bare(OpCode::Heartbeat)).await;

	let ack = recv_frame(&mut rx).await;
	assert_eq!(ack.opcode(), Some(OpCode::HeartbeatAck));
	let ts = ack.d.expect("ack payload")["ts"].as_i64().expect("ts");
	assert!(ts > 0);
}

#[tokio::test]
async fn presence_update_validates_status_and_broadcasts() {
	let env = test_env();
	let server = ServerId::generate();
	let ada = seed_user(&env, "ada").await;
	let grace = seed_user(&env, "grace").await;
	env.store.add_server_member(server, ada.id).await;
	env.store.add_server_member(server, grace.id).await;

	let (grace_session, mut grace_rx) = connect(&env).await;
	identify(&env, &grace_session, &mut grace_rx, "tok-grace").await;

	let (ada_session, mut ada_rx) = connect(&env).await;
	identify(&env, &ada_session, &mut ada_rx, "tok-ada").await;
	drain(&mut grace_rx);

	env.gateway
		.handle_frame(&ada_session, frame(OpCode::PresenceUpdate, json!({"status": "busy"})))
		.await;
	expect_error(&mut ada_rx, code::INVALID_PAYLOAD).await;

	env.gateway
		.handle_frame(&ada_session, frame(OpCode::PresenceUpdate, json!({"status": "idle"})))
		.await;

	assert_eq!(ada_session.status().await, PresenceStatus::Idle);
	let record = env.presence.get(ada.id).await.expect("presence read").expect("record present");
	assert_eq!(record.status, PresenceStatus::Idle);

	let update = recv_frame(&mut grace_rx).await;
	assert_eq!(update.t, Some(EventType::PresenceUpdate));
	let body: PresenceUpdatePayload = update.payload().expect("presence payload");
	assert_eq!(body.status, PresenceStatus::Idle);
}

#[tokio::test]
async fn focus_change_checks_subscriptions_and_echoes_nonce() {
	let env = test_env();
	let server = ServerId::generate();
	let channel = ChannelId::generate();
	let ada = seed_user(&env, "ada").await;
	env.store.add_server_member(server, ada.id).await;

	let (session, mut rx) = connect(&env).await;
	identify(&env, &session, &mut rx, "tok-ada").await;

	// Focusing a conversation the session is not in is silently dropped.
	env.gateway
		.handle_frame(
			&session,
			frame(OpCode::FocusChange, json!({"conversation_id": ConversationId::generate()})),
		)
		.await;
	assert_empty(&mut rx);

	env.gateway
		.handle_frame(
			&session,
			frame_with_nonce(OpCode::FocusChange, json!({"channel_id": channel, "server_id": server}), "f-1"),
		)
		.await;

	let ack = recv_frame(&mut rx).await;
	assert_eq!(ack.nonce.as_deref(), Some("f-1"));
	assert_eq!(ack.d.expect("ack payload")["channel_id"], channel.to_string());
	assert!(session.is_focused_on_channel(channel).await);
}

#[tokio::test]
async fn channel_message_create_splits_by_focus_and_acks() {
	let env = test_env();
	let server = ServerId::generate();
	let channel = ChannelId::generate();
	let ada = seed_user(&env, "ada").await;
	let grace = seed_user(&env, "grace").await;
	env.store.add_server_member(server, ada.id).await;
	env.store.add_server_member(server, grace.id).await;
	env.store.add_channel(channel, server).await;

	let (ada_session, mut ada_rx) = connect(&env).await;
	identify(&env, &ada_session, &mut ada_rx, "tok-ada").await;
	let (grace_session, mut grace_rx) = connect(&env).await;
	identify(&env, &grace_session, &mut grace_rx, "tok-grace").await;
	drain(&mut ada_rx);

	env.gateway
		.handle_frame(
			&ada_session,
			frame_with_nonce(OpCode::FocusChange, json!({"channel_id": channel, "server_id": server}), "f-1"),
		)
		.await;
	drain(&mut ada_rx);

	env.gateway
		.handle_frame(
			&ada_session,
			frame_with_nonce(
				OpCode::MessageCreate,
				json!({"channel_id": channel, "server_id": server, "content": "hi"}),
				"n-1",
			),
		)
		.await;

	// Ada is focused on the channel: full payload, then the nonce ack.
	let full = recv_frame(&mut ada_rx).await;
	assert_eq!(full.t, Some(EventType::ChannelMessageCreate));
	let body: ChannelMessagePayload = full.payload().expect("full payload");
	assert_eq!(body.content, "hi");
	assert_eq!(body.author_id, ada.id);
	assert_eq!(body.author.as_ref().expect("author brief").username, "ada");
	assert!(body.created_at.is_some());

	let ack = recv_frame(&mut ada_rx).await;
	assert_eq!(ack.nonce.as_deref(), Some("n-1"));
	assert_eq!(ack.d.expect("ack payload")["id"], body.id.to_string());

	// Grace is unfocused: ids-only notify.
	let notify = recv_frame(&mut grace_rx).await;
	assert_eq!(notify.t, Some(EventType::ChannelMessageNotify));
	let notify_body = notify.d.expect("notify payload");
	assert_eq!(notify_body["message_id"], body.id.to_string());
	assert_eq!(notify_body["author_id"], ada.id.to_string());
	assert!(notify_body.get("content").is_none());

	// Persisted first, with the store-assigned id.
	assert!(env.store.channel_message(body.id).await.is_some());
}

#[tokio::test]
async fn channel_message_create_rejects_outsiders_and_unknown_channels() {
	let env = test_env();
	let server = ServerId::generate();
	let channel = ChannelId::generate();
	let ada = seed_user(&env, "ada").await;
	env.store.add_channel(channel, server).await;

	let (session, mut rx) = connect(&env).await;
	identify(&env, &session, &mut rx, "tok-ada").await;

	// Not a member of the server at all.
	env.gateway
		.handle_frame(
			&session,
			frame(OpCode::MessageCreate, json!({"channel_id": channel, "server_id": server, "content": "hi"})),
		)
		.await;
	expect_error(&mut rx, code::FORBIDDEN).await;

	// Member, but the channel lives elsewhere.
	env.store.add_server_member(server, ada.id).await;
	env.gateway.hub().subscribe_to_server(&session, server).await;
	env.gateway
		.handle_frame(
			&session,
			frame(
				OpCode::MessageCreate,
				json!({"channel_id": ChannelId::generate(), "server_id": server, "content": "hi"}),
			),
		)
		.await;
	expect_error(&mut rx, code::NOT_FOUND).await;

	// Neither target id present.
	env.gateway
		.handle_frame(&session, frame(OpCode::MessageCreate, json!({"content": "hi"})))
		.await;
	expect_error(&mut rx, code::INVALID_PAYLOAD).await;
}

#[tokio::test]
async fn dm_create_advances_the_senders_read_marker() {
	let env = test_env();
	let conversation = ConversationId::generate();
	let ada = seed_user(&env, "ada").await;
	let grace = seed_user(&env, "grace").await;
	env.store.add_dm_participant(conversation, ada.id).await;
	env.store.add_dm_participant(conversation, grace.id).await;

	let (ada_session, mut ada_rx) = connect(&env).await;
	identify(&env, &ada_session, &mut ada_rx, "tok-ada").await;

	env.gateway
		.handle_frame(
			&ada_session,
			frame_with_nonce(OpCode::MessageCreate, json!({"conversation_id": conversation, "content": "hey"}), "n-2"),
		)
		.await;

	// Unfocused sender still gets the notify variant plus the ack.
	let notify = recv_frame(&mut ada_rx).await;
	assert_eq!(notify.t, Some(EventType::DmMessageNotify));
	let ack = recv_frame(&mut ada_rx).await;
	assert_eq!(ack.nonce.as_deref(), Some("n-2"));

	assert!(env.store.last_read_at(conversation, ada.id).await.is_some());
	assert!(env.store.last_read_at(conversation, grace.id).await.is_none());
}

#[tokio::test]
async fn edit_by_non_author_is_rejected_and_not_dispatched() {
	let env = test_env();
	let conversation = ConversationId::generate();
	let ada = seed_user(&env, "ada").await;
	let grace = seed_user(&env, "grace").await;
	env.store.add_dm_participant(conversation, ada.id).await;
	env.store.add_dm_participant(conversation, grace.id).await;

	let message = env
		.store
		.insert_direct_message(NewDirectMessage {
			conversation_id: conversation,
			author_id: ada.id,
			content: "mine".to_string(),
			attachments: Vec::new(),
			reply_to_id: None,
		})
		.await
		.expect("insert");

	let (ada_session, mut ada_rx) = connect(&env).await;
	identify(&env, &ada_session, &mut ada_rx, "tok-ada").await;
	let (grace_session, mut grace_rx) = connect(&env).await;
	identify(&env, &grace_session, &mut grace_rx, "tok-grace").await;
	drain(&mut ada_rx);

	env.gateway
		.handle_frame(
			&grace_session,
			frame(OpCode::MessageEdit, json!({"id": message.id, "conversation_id": conversation, "content": "x"})),
		)
		.await;
	expect_error(&mut grace_rx, code::NOT_FOUND).await;

	assert_empty(&mut ada_rx);
	let stored = env.store.direct_message(message.id).await.expect("still present");
	assert_eq!(stored.content, "mine");
}

#[tokio::test]
async fn edit_by_author_dispatches_update_to_everyone() {
	let env = test_env();
	let conversation = ConversationId::generate();
	let ada = seed_user(&env, "ada").await;
	let grace = seed_user(&env, "grace").await;
	env.store.add_dm_participant(conversation, ada.id).await;
	env.store.add_dm_participant(conversation, grace.id).await;

	let message = env
		.store
		.insert_direct_message(NewDirectMessage {
			conversation_id: conversation,
			author_id: ada.id,
			content: "first".to_string(),
			attachments: Vec::new(),
			reply_to_id: None,
		})
		.await
		.expect("insert");

	let (ada_session, mut ada_rx) = connect(&env).await;
	identify(&env, &ada_session, &mut ada_rx, "tok-ada").await;
	let (grace_session, mut grace_rx) = connect(&env).await;
	identify(&env, &grace_session, &mut grace_rx, "tok-grace").await;
	drain(&mut ada_rx);

	env.gateway
		.handle_frame(
			&ada_session,
			frame(OpCode::MessageEdit, json!({"id": message.id, "conversation_id": conversation, "content": "second"})),
		)
		.await;

	// Updates are not focus-filtered: both unfocused sessions get them.
	for rx in [&mut ada_rx, &mut grace_rx] {
		let update = recv_frame(rx).await;
		assert_eq!(update.t, Some(EventType::DmMessageUpdate));
		let body: DmMessagePayload = update.payload().expect("update payload");
		assert_eq!(body.id, message.id);
		assert_eq!(body.content, "second");
		assert!(body.edited_at.is_some());
	}

	let stored = env.store.direct_message(message.id).await.expect("present");
	assert_eq!(stored.content, "second");
	assert!(stored.edited_at.is_some());
}

#[tokio::test]
async fn delete_by_author_dispatches_ids_only() {
	let env = test_env();
	let server = ServerId::generate();
	let channel = ChannelId::generate();
	let ada = seed_user(&env, "ada").await;
	env.store.add_server_member(server, ada.id).await;
	env.store.add_channel(channel, server).await;

	let (session, mut rx) = connect(&env).await;
	identify(&env, &session, &mut rx, "tok-ada").await;

	env.gateway
		.handle_frame(
			&session,
			frame(OpCode::MessageCreate, json!({"channel_id": channel, "server_id": server, "content": "oops"})),
		)
		.await;

	// The unfocused author gets the notify variant, which carries the id.
	let created = recv_frame(&mut rx).await;
	assert_eq!(created.t, Some(EventType::ChannelMessageNotify));
	let id = created.d.expect("payload")["message_id"]
		.as_str()
		.expect("message id on the wire")
		.to_string();
	drain(&mut rx);

	env.gateway
		.handle_frame(
			&session,
			frame(OpCode::MessageDelete, json!({"message_id": id, "channel_id": channel, "server_id": server})),
		)
		.await;

	let deleted = recv_frame(&mut rx).await;
	assert_eq!(deleted.t, Some(EventType::ChannelMessageDelete));
	let body = deleted.d.expect("delete payload");
	assert_eq!(body["message_id"], id);
	assert!(body.get("content").is_none());

	// Deleting it again finds nothing.
	env.gateway
		.handle_frame(
			&session,
			frame(OpCode::MessageDelete, json!({"message_id": id, "channel_id": channel, "server_id": server})),
		)
		.await;
	expect_error(&mut rx, code::NOT_FOUND).await;
}

#[tokio::test]
async fn message_ack_updates_read_state_and_broadcasts() {
	let env = test_env();
	let conversation = ConversationId::generate();
	let ada = seed_user(&env, "ada").await;
	let grace = seed_user(&env, "grace").await;
	env.store.add_dm_participant(conversation, ada.id).await;
	env.store.add_dm_participant(conversation, grace.id).await;

	let (ada_session, mut ada_rx) = connect(&env).await;
	identify(&env, &ada_session, &mut ada_rx, "tok-ada").await;
	let (grace_session, mut grace_rx) = connect(&env).await;
	identify(&env, &grace_session, &mut grace_rx, "tok-grace").await;
	drain(&mut ada_rx);

	let message_id = tern_domain::MessageId::generate();
	env.gateway
		.handle_frame(
			&grace_session,
			frame(OpCode::MessageAck, json!({"conversation_id": conversation, "message_id": message_id})),
		)
		.await;

	for rx in [&mut ada_rx, &mut grace_rx] {
		let ack = recv_frame(rx).await;
		assert_eq!(ack.t, Some(EventType::MessageAck));
		let body: MessageAckEvent = ack.payload().expect("ack payload");
		assert_eq!(body.user_id, grace.id);
		assert_eq!(body.conversation_id, conversation);
		assert_eq!(body.message_id, message_id);
	}

	assert!(env.store.last_read_at(conversation, grace.id).await.is_some());
	assert!(env.store.last_read_at(conversation, ada.id).await.is_none());
}

#[tokio::test]
async fn typing_reaches_only_focused_recipients() {
	let env = test_env();
	let conversation = ConversationId::generate();
	let ada = seed_user(&env, "ada").await;
	let grace = seed_user(&env, "grace").await;
	env.store.add_dm_participant(conversation, ada.id).await;
	env.store.add_dm_participant(conversation, grace.id).await;

	let (ada_session, mut ada_rx) = connect(&env).await;
	identify(&env, &ada_session, &mut ada_rx, "tok-ada").await;
	let (grace_session, mut grace_rx) = connect(&env).await;
	identify(&env, &grace_session, &mut grace_rx, "tok-grace").await;
	drain(&mut ada_rx);

	env.gateway
		.handle_frame(&ada_session, frame(OpCode::TypingStart, json!({"conversation_id": conversation})))
		.await;
	assert_empty(&mut grace_rx);

	env.gateway
		.handle_frame(&grace_session, frame(OpCode::FocusChange, json!({"conversation_id": conversation})))
		.await;
	drain(&mut grace_rx);

	env.gateway
		.handle_frame(&ada_session, frame(OpCode::TypingStart, json!({"conversation_id": conversation})))
		.await;

	let typing = recv_frame(&mut grace_rx).await;
	assert_eq!(typing.t, Some(EventType::TypingStart));
	let body: TypingPayload = typing.payload().expect("typing payload");
	assert_eq!(body.user_id, Some(ada.id));
	assert_eq!(body.user.as_ref().expect("sender brief").username, "ada");
}

#[tokio::test]
async fn last_session_disconnect_goes_offline_and_broadcasts() {
	let env = test_env();
	let server = ServerId::generate();
	let ada = seed_user(&env, "ada").await;
	let grace = seed_user(&env, "grace").await;
	env.store.add_server_member(server, ada.id).await;
	env.store.add_server_member(server, grace.id).await;

	let (grace_session, mut grace_rx) = connect(&env).await;
	identify(&env, &grace_session, &mut grace_rx, "tok-grace").await;
	let (ada_session, mut ada_rx) = connect(&env).await;
	identify(&env, &ada_session, &mut ada_rx, "tok-ada").await;
	drain(&mut grace_rx);

	env.gateway.handle_disconnect(&ada_session).await;

	assert!(env.presence.get(ada.id).await.expect("presence read").is_none());
	assert!(!env.gateway.hub().is_user_online(ada.id).await);

	let update = recv_frame(&mut grace_rx).await;
	assert_eq!(update.t, Some(EventType::PresenceUpdate));
	let body: PresenceUpdatePayload = update.payload().expect("presence payload");
	assert_eq!(body.user_id, ada.id);
	assert_eq!(body.status, PresenceStatus::Offline);
}

#[tokio::test]
async fn group_dm_create_subscribes_live_sessions() {
	let env = test_env();
	let ada = seed_user(&env, "ada").await;
	let grace = seed_user(&env, "grace").await;
	let offline = seed_user(&env, "lin").await;
	let conversation = ConversationId::generate();

	let (ada_session, mut ada_rx) = connect(&env).await;
	identify(&env, &ada_session, &mut ada_rx, "tok-ada").await;
	let (grace_session, mut grace_rx) = connect(&env).await;
	identify(&env, &grace_session, &mut grace_rx, "tok-grace").await;

	let payload = DmCreatePayload {
		conversation_id: conversation,
		name: "crew".to_string(),
		is_group: true,
		participants: vec![ada.brief(), grace.brief(), offline.brief()],
		created_by: Some(ada.brief()),
	};
	env.gateway
		.notify_new_group_dm(&payload, &[ada.id, grace.id, offline.id])
		.await;

	for rx in [&mut ada_rx, &mut grace_rx] {
		let created = recv_frame(rx).await;
		assert_eq!(created.t, Some(EventType::DmCreate));
		assert_eq!(created.d.expect("payload")["conversation_id"], conversation.to_string());
	}

	// Both live sessions now receive traffic in the new conversation.
	let message = DmMessagePayload {
		id: tern_domain::MessageId::generate(),
		conversation_id: conversation,
		author_id: ada.id,
		author: None,
		content: "first".to_string(),
		attachments: Vec::new(),
		reply_to_id: None,
		created_at: Some(chrono::Utc::now()),
		edited_at: None,
	};
	env.gateway.notify_dm_message(conversation, &message).await;

	assert_eq!(recv_frame(&mut ada_rx).await.t, Some(EventType::DmMessageNotify));
	assert_eq!(recv_frame(&mut grace_rx).await.t, Some(EventType::DmMessageNotify));
}

#[tokio::test]
async fn friend_accept_notifies_both_sides_and_subscribes_them() {
	let env = test_env();
	let ada = seed_user(&env, "ada").await;
	let grace = seed_user(&env, "grace").await;
	let conversation = ConversationId::generate();

	let (ada_session, mut ada_rx) = connect(&env).await;
	identify(&env, &ada_session, &mut ada_rx, "tok-ada").await;
	let (grace_session, mut grace_rx) = connect(&env).await;
	identify(&env, &grace_session, &mut grace_rx, "tok-grace").await;

	// Ada accepted; Grace sent the original request.
	env.gateway
		.notify_friend_accepted(&ada.brief(), &grace.brief(), uuid::Uuid::new_v4(), conversation)
		.await;

	let accepted = recv_frame(&mut grace_rx).await;
	assert_eq!(accepted.t, Some(EventType::FriendRequestAccepted));
	let body = accepted.d.expect("payload");
	assert_eq!(body["conversation_id"], conversation.to_string());
	assert_eq!(body["user"]["username"], "ada");

	assert_eq!(recv_frame(&mut grace_rx).await.t, Some(EventType::DmCreate));
	assert_eq!(recv_frame(&mut ada_rx).await.t, Some(EventType::DmCreate));

	assert!(ada_session.is_in_conversation(conversation).await);
	assert!(grace_session.is_in_conversation(conversation).await);
}

#[tokio::test]
async fn user_update_targets_only_that_users_sessions() {
	let env = test_env();
	let server = ServerId::generate();
	let ada = seed_user(&env, "ada").await;
	let grace = seed_user(&env, "grace").await;
	env.store.add_server_member(server, ada.id).await;
	env.store.add_server_member(server, grace.id).await;

	let (first, mut first_rx) = connect(&env).await;
	identify(&env, &first, &mut first_rx, "tok-ada").await;
	let (second, mut second_rx) = connect(&env).await;
	identify(&env, &second, &mut second_rx, "tok-ada").await;
	let (grace_session, mut grace_rx) = connect(&env).await;
	identify(&env, &grace_session, &mut grace_rx, "tok-grace").await;
	drain(&mut first_rx);
	drain(&mut second_rx);

	env.gateway.notify_user_update(ada.id, json!({"username": "ada2"})).await;

	for rx in [&mut first_rx, &mut second_rx] {
		let update = recv_frame(rx).await;
		assert_eq!(update.t, Some(EventType::UserUpdate));
		assert_eq!(update.d.expect("payload")["fields"]["username"], "ada2");
	}

	// Server-mates are not notified; they refetch through the REST surface.
	assert_empty(&mut grace_rx);
}
