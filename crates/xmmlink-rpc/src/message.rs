use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, RpcError};

/// Transaction word of synchronous calls and their replies.
pub const SYNC_WORD: u32 = 0x1100_0100;

/// Mask selecting the fixed part of a transaction word.
const WORD_PATTERN_MASK: u32 = 0xffff_ff00;

/// Fixed part of every message: length (4) + length value (6) + command
/// value (6) + transaction word (4).
pub const HEADER_SIZE: usize = 20;

/// Echoed transaction ID value following the header of async calls.
pub const TXID_FIELD_SIZE: usize = 6;

/// Default maximum message size: 64 KiB.
pub const DEFAULT_MAX_MESSAGE: usize = 64 * 1024;

/// Integer marker followed by width 4, used by every header field.
const INT4_PREFIX: [u8; 2] = [0x02, 0x04];

/// Transaction word for async transaction `id`.
pub fn async_word(id: u8) -> u32 {
    SYNC_WORD | u32::from(id)
}

/// Transaction ID carried by an async word, if any.
pub fn async_id(word: u32) -> Option<u8> {
    let id = (word & 0xff) as u8;
    (word & WORD_PATTERN_MASK == SYNC_WORD && id != 0).then_some(id)
}

/// How an inbound message is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Reply to a synchronous call.
    Response,
    /// Acknowledgement or completion of async transaction `id`.
    Transaction(u8),
    /// Push notification.
    Unsolicited,
}

/// One message on the command channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Little-endian length prefix.
    pub length: u32,
    /// Length repeated as a big-endian value. Should match `length`.
    pub declared_length: u32,
    pub command: u32,
    pub word: u32,
    /// Everything after the fixed header.
    pub body: Bytes,
}

impl Message {
    /// Whether both length encodings agree.
    pub fn lengths_agree(&self) -> bool {
        self.length == self.declared_length
    }

    /// Route this message. Async replies with a command code at or above
    /// `ack_threshold` are treated as notifications.
    pub fn classify(&self, ack_threshold: u32) -> MessageKind {
        if self.word == SYNC_WORD {
            return MessageKind::Response;
        }
        match async_id(self.word) {
            Some(id) if self.command < ack_threshold => MessageKind::Transaction(id),
            _ => MessageKind::Unsolicited,
        }
    }
}

/// Encode an outbound message.
///
/// Wire format:
/// ```text
/// ┌──────────┬───────────────┬──────────────┬──────────┬──────────────┬──────┐
/// │ len (LE) │ 02 04 len (BE)│ 02 04 command│ word (BE)│ [02 04 txid] │ body │
/// └──────────┴───────────────┴──────────────┴──────────┴──────────────┴──────┘
/// ```
/// `len` counts every byte after the prefix itself.
pub fn encode_message(command: u32, txid: Option<u8>, body: &[u8], dst: &mut BytesMut) -> Result<()> {
    let header = HEADER_SIZE + if txid.is_some() { TXID_FIELD_SIZE } else { 0 };
    let total = header - 4 + body.len();
    let length = u32::try_from(total).map_err(|_| RpcError::MessageTooLarge {
        size: total + 4,
        max: u32::MAX as usize,
    })?;
    let word = txid.map_or(SYNC_WORD, async_word);

    dst.reserve(header + body.len());
    dst.put_u32_le(length);
    dst.put_slice(&INT4_PREFIX);
    dst.put_u32(length);
    dst.put_slice(&INT4_PREFIX);
    dst.put_u32(command);
    dst.put_u32(word);
    if let Some(id) = txid {
        dst.put_slice(&INT4_PREFIX);
        dst.put_u32(u32::from(id));
    }
    dst.put_slice(body);
    Ok(())
}

/// Decode one message from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete message yet.
/// On success, consumes the message bytes from the buffer. A malformed
/// message is consumed too, so the next call starts at the following one.
pub fn decode_message(src: &mut BytesMut, max_message: usize) -> Result<Option<Message>> {
    if src.len() < 4 {
        return Ok(None);
    }

    let length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
    let total = length as usize + 4;
    if total > max_message {
        return Err(RpcError::MessageTooLarge {
            size: total,
            max: max_message,
        });
    }
    if src.len() < total {
        return Ok(None);
    }

    let mut unit = src.split_to(total).freeze();
    if total < HEADER_SIZE {
        return Err(RpcError::MalformedMessage {
            reason: "length shorter than header",
        });
    }
    unit.advance(4);
    if unit[0..2] != INT4_PREFIX || unit[6..8] != INT4_PREFIX {
        return Err(RpcError::MalformedMessage {
            reason: "header field is not a 4-byte integer",
        });
    }
    unit.advance(2);
    let declared_length = unit.get_u32();
    unit.advance(2);
    let command = unit.get_u32();
    let word = unit.get_u32();

    Ok(Some(Message {
        length,
        declared_length,
        command,
        word,
        body: unit,
    }))
}

/// Strip the echoed transaction ID that leads async reply bodies.
pub fn strip_txid(body: &Bytes) -> Option<(u32, Bytes)> {
    if body.len() < TXID_FIELD_SIZE || body[..2] != INT4_PREFIX {
        return None;
    }
    let id = u32::from_be_bytes([body[2], body[3], body[4], body[5]]);
    Some((id, body.slice(TXID_FIELD_SIZE..)))
}
