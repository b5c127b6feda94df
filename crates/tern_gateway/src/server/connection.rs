#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, warn};

use tern_protocol::{MAX_FRAME_SIZE, OpCode, code, decode_frame, join_frames, split_frames};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::{Message, WebSocketConfig};
use tokio_tungstenite::{WebSocketStream, accept_hdr_async_with_config};

use crate::server::gateway::Gateway;
use crate::server::session::{
	KEEPALIVE_INTERVAL, READ_DEADLINE, SEND_QUEUE_CAPACITY, Session, WRITE_DEADLINE,
};

/// Accepted WebSocket upgrade paths; both are equivalent.
const UPGRADE_PATHS: [&str; 2] = ["/ws", "/gateway"];

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Drive one client connection: upgrade, register the session, run the
/// reader inline and the writer as a sibling task, then tear everything down
/// through the hub's single unregister path.
pub async fn handle_connection(conn_id: u64, stream: TcpStream, gateway: Gateway) -> anyhow::Result<()> {
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("tern_gateway_active_connections").decrement(1.0);
		}
	}

	metrics::gauge!("tern_gateway_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
		let path = request.uri().path();
		if UPGRADE_PATHS.contains(&path) {
			Ok(response)
		} else {
			let mut not_found = ErrorResponse::new(Some("not found".to_string()));
			*not_found.status_mut() = StatusCode::NOT_FOUND;
			Err(not_found)
		}
	};

	let mut ws_config = WebSocketConfig::default();
	ws_config.max_message_size = Some(MAX_FRAME_SIZE);
	ws_config.max_frame_size = Some(MAX_FRAME_SIZE);

	let ws = accept_hdr_async_with_config(stream, callback, Some(ws_config))
		.await
		.context("websocket handshake")?;

	let (ws_tx, ws_rx) = ws.split();
	let (outbound_tx, outbound_rx) = mpsc::channel::<String>(SEND_QUEUE_CAPACITY);

	let session = Arc::new(Session::new(outbound_tx));
	gateway.hub().register(Arc::clone(&session)).await;

	let writer = tokio::spawn(write_pump(conn_id, ws_tx, outbound_rx));

	let read_result = read_pump(conn_id, ws_rx, &gateway, &session).await;

	// Unregister closes the send queue, which lets the writer drain and exit.
	gateway.handle_disconnect(&session).await;
	let _ = writer.await;

	read_result
}

/// True when an inbound message counts as liveness: a transport keepalive
/// pong, or a text message carrying a valid application-level heartbeat.
/// Nothing else extends the read deadline.
pub(crate) fn refreshes_read_deadline(message: &Message) -> bool {
	match message {
		Message::Pong(_) => true,
		Message::Text(text) => split_frames(text)
			.any(|line| decode_frame(line).is_ok_and(|frame| frame.opcode() == Some(OpCode::Heartbeat))),
		_ => false,
	}
}

/// Decode inbound frames and hand them to the gateway. The read deadline is
/// extended only by heartbeats and keepalive pongs; a client that sends
/// ordinary traffic without ever heartbeating still times out.
async fn read_pump(conn_id: u64, mut ws_rx: WsSource, gateway: &Gateway, session: &Arc<Session>) -> anyhow::Result<()> {
	let mut deadline = Instant::now() + READ_DEADLINE;

	loop {
		let message = match timeout_at(deadline, ws_rx.next()).await {
			Err(_) => return Err(anyhow!("read deadline elapsed ({}s)", READ_DEADLINE.as_secs())),
			Ok(None) => return Ok(()),
			Ok(Some(Err(err))) => return Err(anyhow!(err).context("websocket read failed")),
			Ok(Some(Ok(message))) => message,
		};

		if refreshes_read_deadline(&message) {
			deadline = Instant::now() + READ_DEADLINE;
		}

		match message {
			Message::Text(text) => {
				metrics::counter!("tern_gateway_frames_in_total").increment(1);

				for line in split_frames(&text) {
					match decode_frame(line) {
						Ok(frame) => gateway.handle_frame(session, frame).await,
						Err(err) => {
							debug!(conn_id, error = %err, "dropping malformed frame");
							session.send_error(code::INVALID_PAYLOAD, "invalid message format").await;
						}
					}
				}
			}
			Message::Binary(_) => {
				session.send_error(code::INVALID_PAYLOAD, "invalid message format").await;
			}
			Message::Ping(_) | Message::Pong(_) => {}
			Message::Close(_) => return Ok(()),
			Message::Frame(_) => {}
		}
	}
}

/// Drain the session's send queue into the socket, batching queued frames
/// into one newline-joined write, and keep the transport alive with periodic
/// pings. Exits when the queue closes or a write fails.
async fn write_pump(conn_id: u64, mut ws_tx: WsSink, mut outbound: mpsc::Receiver<String>) {
	let start = tokio::time::Instant::now() + KEEPALIVE_INTERVAL;
	let mut keepalive = tokio::time::interval_at(start, KEEPALIVE_INTERVAL);

	loop {
		tokio::select! {
			queued = outbound.recv() => {
				let Some(first) = queued else {
					// Queue closed by unregister; say goodbye and stop.
					let _ = timeout(WRITE_DEADLINE, ws_tx.send(Message::Close(None))).await;
					return;
				};

				let mut batch = vec![first];
				while let Ok(next) = outbound.try_recv() {
					batch.push(next);
				}

				let text = if batch.len() == 1 {
					batch.pop().unwrap_or_default()
				} else {
					join_frames(&batch)
				};

				match timeout(WRITE_DEADLINE, ws_tx.send(Message::Text(text))).await {
					Ok(Ok(())) => {}
					Ok(Err(err)) => {
						debug!(conn_id, error = %err, "websocket write failed");
						return;
					}
					Err(_) => {
						warn!(conn_id, "write deadline elapsed");
						return;
					}
				}
			}

			_ = keepalive.tick() => {
				match timeout(WRITE_DEADLINE, ws_tx.send(Message::Ping(Vec::new()))).await {
					Ok(Ok(())) => {}
					Ok(Err(err)) => {
						debug!(conn_id, error = %err, "keepalive ping failed");
						return;
					}
					Err(_) => {
						warn!(conn_id, "write deadline elapsed on keepalive");
						return;
					}
				}
			}
		}
	}
}
