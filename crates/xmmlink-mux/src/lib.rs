//! Tagged frame codec for the modem's packet-multiplexing channel.
//!
//! Every frame is a chain of tags. Each tag carries:
//! - A 4-byte ASCII identifier (`ADBH`, `ADTH`, ...)
//! - A 2-byte little-endian tag length and a 2-byte "extra" field
//! - A 4-byte little-endian forward pointer to the next tag (0 in the last)
//!
//! The first tag also carries the frame sequence number, and its length slot
//! is overwritten with the total frame length once the last tag is in.
//!
//! On top of the codec sits the bridge: raw IP packets are wrapped in an
//! `ADBH` data tag followed by an `ADTH` trailer listing packet bounds.

pub mod bridge;
pub mod codec;
pub mod error;
pub mod relay;
pub mod tag;

pub use bridge::{
    decode_data_frame, from_frame, open_channel_frame, to_frame, DatagramBatch, SequenceCounter,
    DATAGRAM_PREAMBLE,
};
pub use codec::{
    Frame, FrameBuilder, MuxConfig, Tag, DEFAULT_MAX_FRAME, FIRST_HEADER_SIZE, TAG_HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use relay::{BridgeExit, BridgeStats, Direction, MuxBridge};
pub use tag::TagId;
