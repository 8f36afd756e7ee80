use crate::tag::TagId;

/// Errors that can occur during mux frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A length or pointer in the frame points outside the received buffer.
    #[error("malformed frame at offset {offset}: {reason} (buffer is {len} bytes)")]
    MalformedFrame {
        offset: usize,
        len: usize,
        reason: &'static str,
    },

    /// A specific tag was required at a position and another one was found.
    #[error("unexpected tag {found} at offset {offset} (expected {expected})")]
    UnexpectedTag {
        expected: TagId,
        found: TagId,
        offset: usize,
    },

    /// A required tag is absent from the chain.
    #[error("missing {expected} tag")]
    MissingTag { expected: TagId },

    /// A tag payload does not fit the 16-bit tag length field.
    #[error("tag too large ({size} bytes, max {max})")]
    TagTooLarge { size: usize, max: usize },

    /// The frame would exceed the configured maximum size.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The batch already holds the configured number of packets.
    #[error("frame already carries {max} packets")]
    TooManyPackets { max: usize },

    /// `finish` was called before any tag was appended.
    #[error("frame has no tags")]
    EmptyFrame,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The endpoint reported end-of-stream.
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
