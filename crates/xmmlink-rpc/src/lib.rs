//! Command channel for XMM7360 modems.
//!
//! Two layers:
//! - [`value`]: the tagged integer/string encoding used inside command bodies
//! - [`client`]: message framing plus the transaction manager that matches
//!   replies to calls and routes everything else to handlers
//!
//! Every message carries a little-endian length prefix, the same length as a
//! tagged integer, the command code and a transaction word. Synchronous calls
//! use [`SYNC_WORD`]; async calls carry a one-byte ID in the word's low byte
//! and get two replies, an acknowledgement and the result.

pub mod client;
pub mod error;
pub mod ids;
pub mod message;
pub mod reader;
pub mod value;
pub mod writer;

pub use client::{
    MessageSummary, RpcClient, RpcConfig, UnsolicitedHandler, DEFAULT_ACK_THRESHOLD,
    DEFAULT_CALL_TIMEOUT,
};
pub use error::{Result, RpcError, ValueError};
pub use ids::{CallId, UnsolicitedId};
pub use message::{
    async_id, async_word, decode_message, encode_message, strip_txid, Message, MessageKind,
    DEFAULT_MAX_MESSAGE, HEADER_SIZE, SYNC_WORD,
};
pub use reader::MessageReader;
pub use value::{decode_unknown, encode_int, encode_string, BodyBuilder, Value, ValueCursor};
pub use writer::MessageWriter;
