//! Wire protocol: control messages and PCM packet framing
//!
//! Two message shapes share one TCP stream: newline-terminated JSON control
//! messages, and `u32`-length-prefixed raw PCM. See [`FrameDecoder`] for how
//! a receiver tells them apart — the same ambiguous-but-workable rule the
//! protocol was distilled from.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use syncwave_dsp::PcmFrame;

use crate::error::{NetError, NetResult};

/// Newline-terminated JSON control messages exchanged in either direction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Welcome { message: String, server_time: f64 },
    Ping,
    Pong { time: f64 },
    Status { data: serde_json::Value },
    SetName { name: String },
}

impl ControlMessage {
    /// Serialize to the newline-terminated wire form.
    pub fn to_wire(&self) -> NetResult<Vec<u8>> {
        let mut json = serde_json::to_vec(self)
            .map_err(|e| NetError::MalformedControlMessage(e.to_string()))?;
        json.push(b'\n');
        Ok(json)
    }

    fn from_json_bytes(bytes: &[u8]) -> NetResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| NetError::MalformedControlMessage(e.to_string()))
    }
}

/// Frame an outgoing PCM block as `u32 length (LE) || raw bytes`.
pub fn encode_audio_packet(frame: &PcmFrame) -> Vec<u8> {
    let payload = frame.to_le_bytes();
    let mut packet = Vec::with_capacity(4 + payload.len());
    packet.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    packet.extend_from_slice(&payload);
    packet
}

/// One item produced by draining a [`FrameDecoder`].
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedItem {
    Control(ControlMessage),
    Audio(Vec<u8>),
}

/// Incremental decoder for the shared control/audio stream.
///
/// Mirrors the disambiguation the streaming plane is built around: if the
/// buffer contains a newline and the bytes up to it parse as JSON, consume
/// a control message; otherwise assume length-prefixed binary framing.
/// This is fragile by construction — a PCM block containing a `0x0A` byte
/// before any control traffic would be misread — callers that need a robust
/// framing should use a leading type-tag byte instead (see `SPEC_FULL.md`).
#[derive(Default)]
pub struct FrameDecoder {
    buffer: VecDeque<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend(data.iter().copied());
    }

    /// Drain as many complete control/audio items as the buffer currently holds.
    pub fn drain(&mut self) -> Vec<DecodedItem> {
        let mut items = Vec::new();

        loop {
            if let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let candidate: Vec<u8> = self.buffer.iter().take(newline_pos).copied().collect();
                if let Ok(message) = ControlMessage::from_json_bytes(&candidate) {
                    for _ in 0..=newline_pos {
                        self.buffer.pop_front();
                    }
                    items.push(DecodedItem::Control(message));
                    continue;
                }
            }

            if self.buffer.len() < 4 {
                break;
            }
            let len_bytes: Vec<u8> = self.buffer.iter().take(4).copied().collect();
            let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
                as usize;

            if self.buffer.len() < 4 + len {
                break;
            }

            for _ in 0..4 {
                self.buffer.pop_front();
            }
            let payload: Vec<u8> = (0..len).map(|_| self.buffer.pop_front().unwrap()).collect();
            items.push(DecodedItem::Audio(payload));
        }

        items
    }
}
