#![forbid(unsafe_code)]

use serde_json::json;

use tern_protocol::{Frame, OpCode, encode_frame, join_frames};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::server::connection::refreshes_read_deadline;

fn text_frame(op: OpCode, d: serde_json::Value) -> String {
	let frame = Frame {
		op: op.as_u8(),
		d: Some(d),
		t: None,
		nonce: None,
	};
	encode_frame(&frame).expect("encode")
}

#[test]
fn keepalive_pong_refreshes_the_deadline() {
	assert!(refreshes_read_deadline(&Message::Pong(Vec::new())));
}

#[test]
fn application_heartbeat_refreshes_the_deadline() {
	let heartbeat = encode_frame(&Frame::bare(OpCode::Heartbeat)).expect("encode");
	assert!(refreshes_read_deadline(&Message::Text(heartbeat)));
}

#[test]
fn ordinary_traffic_does_not_refresh_the_deadline() {
	// A connected client that keeps talking but never heartbeats must still
	// hit the read deadline.
	for text in [
		text_frame(OpCode::PresenceUpdate, json!({"status": "idle"})),
		text_frame(OpCode::FocusChange, json!({})),
		text_frame(
			OpCode::MessageCreate,
			json!({"channel_id": "11111111-1111-4111-8111-111111111111",
				"server_id": "22222222-2222-4222-8222-222222222222", "content": "hi"}),
		),
		text_frame(OpCode::Identify, json!({"token": "T"})),
		"not json at all".to_string(),
	] {
		assert!(!refreshes_read_deadline(&Message::Text(text.clone())), "unexpected refresh for {text:?}");
	}

	// Client-initiated pings are answered by the transport but are not the
	// keepalive response the deadline waits for.
	assert!(!refreshes_read_deadline(&Message::Ping(Vec::new())));
	assert!(!refreshes_read_deadline(&Message::Binary(vec![1, 2, 3])));
}

#[test]
fn a_heartbeat_inside_a_batched_write_counts() {
	let batch = join_frames([
		text_frame(OpCode::PresenceUpdate, json!({"status": "online"})),
		encode_frame(&Frame::bare(OpCode::Heartbeat)).expect("encode"),
	]);
	assert!(refreshes_read_deadline(&Message::Text(batch)));

	let no_heartbeat = join_frames([
		text_frame(OpCode::TypingStart, json!({"conversation_id": "33333333-3333-4333-8333-333333333333"})),
		text_frame(OpCode::TypingStop, json!({"conversation_id": "33333333-3333-4333-8333-333333333333"})),
	]);
	assert!(!refreshes_read_deadline(&Message::Text(no_heartbeat)));
}
