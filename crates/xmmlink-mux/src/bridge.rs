//! IP packets carried in mux data frames.
//!
//! An outbound data frame is an `ADBH` tag holding the packets, each behind a
//! 16-byte zero preamble, followed by an `ADTH` trailer: a reserved word and
//! one `(offset, length)` pair per packet. Offsets are relative to the start
//! of the frame.

use std::sync::atomic::{AtomicU8, Ordering};

use bytes::Bytes;
use tracing::debug;

use crate::codec::{read_u32_le, slice_at, Frame, FrameBuilder, MuxConfig, TAG_HEADER_SIZE};
use crate::error::{FrameError, Result};
use crate::tag::TagId;

/// Zero bytes placed in front of every outbound packet.
pub const DATAGRAM_PREAMBLE: usize = 16;

const BOUND_SIZE: usize = 8;
const TRAILER_RESERVED: usize = 4;
const OPEN_CHANNEL_ARGS: [u32; 4] = [1, 0, 0, 0];

/// Wrap one packet in a data frame.
pub fn to_frame(sequence: u8, packet: &[u8]) -> Result<Bytes> {
    let mut batch = DatagramBatch::new(sequence, &MuxConfig::default());
    batch.push(packet)?;
    batch.finish()
}

/// Extract the packets of a data frame, discarding anything else.
///
/// Frames that are not data frames, or that lack a trailer, are logged and
/// yield no packets. Bounds pointing outside the buffer are an error.
pub fn from_frame(frame: &Bytes) -> Result<Vec<Bytes>> {
    match decode_data_frame(frame) {
        Err(FrameError::UnexpectedTag {
            expected, found, ..
        }) => {
            debug!(%expected, %found, "discarding non-data mux frame");
            Ok(Vec::new())
        }
        Err(FrameError::MissingTag { expected }) => {
            debug!(%expected, "discarding mux frame without trailer");
            Ok(Vec::new())
        }
        other => other,
    }
}

/// Strict variant of [`from_frame`]: a frame that is not `ADBH` followed by
/// `ADTH` is an error.
pub fn decode_data_frame(frame: &Bytes) -> Result<Vec<Bytes>> {
    let parsed = Frame::parse(frame)?;
    parsed.expect_tag(0, TagId::ADBH)?;
    let trailer = parsed.expect_tag(1, TagId::ADTH)?;

    if trailer.payload.len() < TRAILER_RESERVED {
        return Err(FrameError::MalformedFrame {
            offset: trailer.offset + TAG_HEADER_SIZE,
            len: frame.len(),
            reason: "trailer shorter than its reserved word",
        });
    }

    let count = (trailer.payload.len() - TRAILER_RESERVED) / BOUND_SIZE;
    let mut packets = Vec::with_capacity(count);
    for i in 0..count {
        let at = TRAILER_RESERVED + i * BOUND_SIZE;
        let offset = read_u32_le(&trailer.payload, at)? as usize;
        let length = read_u32_le(&trailer.payload, at + 4)? as usize;

        let _ = slice_at(frame, offset, length)?;
        let mut region = frame.slice(offset..offset + length);

        // IP packets never start with a zero byte.
        if region.len() >= DATAGRAM_PREAMBLE && region[..DATAGRAM_PREAMBLE].iter().all(|&b| b == 0)
        {
            region = region.slice(DATAGRAM_PREAMBLE..);
        }
        packets.push(region);
    }

    debug!(
        sequence = parsed.sequence,
        packets = packets.len(),
        "decoded mux data frame"
    );
    Ok(packets)
}

/// Frame sent once to open the data channel: `ACBH` then `CMDH{1, 0, 0, 0}`.
pub fn open_channel_frame() -> Result<Bytes> {
    let args: Vec<u8> = OPEN_CHANNEL_ARGS
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .collect();

    let mut builder = FrameBuilder::new(0);
    builder
        .append_tag(TagId::ACBH, &[], 0)?
        .append_tag(TagId::CMDH, &args, 0)?;
    builder.finish()
}

/// Several packets coalesced into one data frame.
#[derive(Debug)]
pub struct DatagramBatch {
    builder: FrameBuilder,
    bounds: Vec<(u32, u32)>,
    max_frame_size: usize,
    max_packets: usize,
}

impl DatagramBatch {
    /// Start an empty batch.
    pub fn new(sequence: u8, config: &MuxConfig) -> Self {
        Self {
            builder: FrameBuilder::with_first_tag(u16::from(sequence), TagId::ADBH, &[], 0),
            bounds: Vec::new(),
            max_frame_size: config.max_frame_size,
            max_packets: config.max_packets_per_frame.max(1),
        }
    }

    /// Size of the finished frame if one more packet of `len` bytes were added.
    pub fn size_with(&self, len: usize) -> usize {
        let data_end = self.builder.len() + DATAGRAM_PREAMBLE + len;
        let aligned = (data_end + 3) & !3;
        aligned + TAG_HEADER_SIZE + TRAILER_RESERVED + (self.bounds.len() + 1) * BOUND_SIZE
    }

    /// Whether a packet of `len` bytes still fits.
    pub fn fits(&self, len: usize) -> bool {
        self.bounds.len() < self.max_packets && self.size_with(len) <= self.max_frame_size
    }

    /// Add a packet.
    pub fn push(&mut self, packet: &[u8]) -> Result<()> {
        if self.bounds.len() >= self.max_packets {
            return Err(FrameError::TooManyPackets {
                max: self.max_packets,
            });
        }
        let size = self.size_with(packet.len());
        if size > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }

        let offset = self.builder.len() as u32;
        let length = (DATAGRAM_PREAMBLE + packet.len()) as u32;
        self.builder.extend_last_tag(&[0u8; DATAGRAM_PREAMBLE])?;
        self.builder.extend_last_tag(packet)?;
        self.bounds.push((offset, length));
        Ok(())
    }

    /// Number of packets in the batch.
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Append the trailer and return the encoded frame.
    pub fn finish(mut self) -> Result<Bytes> {
        let mut trailer = Vec::with_capacity(TRAILER_RESERVED + self.bounds.len() * BOUND_SIZE);
        trailer.extend_from_slice(&0u32.to_le_bytes());
        for (offset, length) in &self.bounds {
            trailer.extend_from_slice(&offset.to_le_bytes());
            trailer.extend_from_slice(&length.to_le_bytes());
        }
        self.builder.append_tag(TagId::ADTH, &trailer, 0)?;
        self.builder.finish()
    }
}

/// One-byte wrapping frame sequence counter shared by both bridge directions.
#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU8);

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance and return the new sequence number. The first value is 1.
    pub fn advance(&self) -> u8 {
        self.0.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Last value handed out (0 before the first frame).
    pub fn current(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }
}
