#![forbid(unsafe_code)]

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{EventType, OpCode};

/// Maximum size of a single incoming frame. Exceeding it tears the connection down.
pub const MAX_FRAME_SIZE: usize = 512 * 1024; // 512 KiB

#[derive(Debug, Error)]
pub enum FramingError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("frame has no payload")]
	MissingPayload,

	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),
}

/// One gateway frame.
///
/// `op` is kept as the raw wire byte so that frames with opcodes outside the
/// protocol table still decode; routing resolves it via [`OpCode::from_u8`]
/// and answers unknown values with error 4002.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
	pub op: u8,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub d: Option<Value>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub t: Option<EventType>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub nonce: Option<String>,
}

impl Frame {
	/// Bare frame with no payload (e.g. `InvalidSession`).
	pub fn bare(op: OpCode) -> Self {
		Self {
			op: op.as_u8(),
			d: None,
			t: None,
			nonce: None,
		}
	}

	/// Frame carrying a serialized payload.
	pub fn with_payload<T: Serialize>(op: OpCode, payload: &T) -> Result<Self, FramingError> {
		Ok(Self {
			op: op.as_u8(),
			d: Some(serde_json::to_value(payload)?),
			t: None,
			nonce: None,
		})
	}

	/// `op = Dispatch` frame tagged with an event.
	pub fn dispatch<T: Serialize>(event: EventType, payload: &T) -> Result<Self, FramingError> {
		Ok(Self {
			op: OpCode::Dispatch.as_u8(),
			d: Some(serde_json::to_value(payload)?),
			t: Some(event),
			nonce: None,
		})
	}

	/// Application-level error reply. The connection stays open.
	pub fn error(error_code: u16, message: impl Into<String>) -> Self {
		Self {
			op: OpCode::Dispatch.as_u8(),
			d: Some(serde_json::json!({
				"code": error_code,
				"message": message.into(),
			})),
			t: None,
			nonce: None,
		}
	}

	/// Nonce-correlated acknowledgement for a client request.
	pub fn ack(nonce: impl Into<String>, data: Value) -> Self {
		Self {
			op: OpCode::Dispatch.as_u8(),
			d: Some(data),
			t: None,
			nonce: Some(nonce.into()),
		}
	}

	/// Resolve the raw opcode byte against the protocol table.
	pub fn opcode(&self) -> Option<OpCode> {
		OpCode::from_u8(self.op)
	}

	/// Deserialize the payload into a concrete shape.
	pub fn payload<T: DeserializeOwned>(&self) -> Result<T, FramingError> {
		let d = self.d.as_ref().ok_or(FramingError::MissingPayload)?;
		Ok(serde_json::from_value(d.clone())?)
	}

	/// True when the frame is an error reply (`op = Dispatch`, error-shaped payload, no tag).
	pub fn is_error(&self) -> bool {
		self.t.is_none()
			&& self.op == OpCode::Dispatch.as_u8()
			&& self
				.d
				.as_ref()
				.is_some_and(|d| d.get("code").is_some() && d.get("message").is_some())
	}
}

/// Encode a frame as a single JSON text line.
pub fn encode_frame(frame: &Frame) -> Result<String, FramingError> {
	let text = serde_json::to_string(frame)?;
	if text.len() > MAX_FRAME_SIZE {
		return Err(FramingError::FrameTooLarge {
			len: text.len(),
			max: MAX_FRAME_SIZE,
		});
	}
	Ok(text)
}

/// Decode a single JSON frame, enforcing the incoming size cap.
pub fn decode_frame(text: &str) -> Result<Frame, FramingError> {
	if text.len() > MAX_FRAME_SIZE {
		return Err(FramingError::FrameTooLarge {
			len: text.len(),
			max: MAX_FRAME_SIZE,
		});
	}
	Ok(serde_json::from_str(text)?)
}

/// Join already-encoded frames into one transport write, newline-separated.
pub fn join_frames<I, S>(frames: I) -> String
where
	I: IntoIterator<Item = S>,
	S: AsRef<str>,
{
	let mut out = String::new();
	for frame in frames {
		if !out.is_empty() {
			out.push('\n');
		}
		out.push_str(frame.as_ref());
	}
	out
}

/// Split a transport read into individual frame lines.
///
/// Accepts both single-frame and newline-joined input; blank lines are skipped.
pub fn split_frames(text: &str) -> impl Iterator<Item = &str> {
	text.split('\n').map(str::trim).filter(|line| !line.is_empty())
}
