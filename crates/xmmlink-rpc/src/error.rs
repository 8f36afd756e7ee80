use std::time::Duration;

/// Errors raised by the value codec.
#[derive(Debug, thiserror::Error)]
pub enum ValueError {
    /// A string holds more elements than its declared maximum.
    #[error("value too long ({len} elements, max {max})")]
    ValueTooLong { len: usize, max: usize },

    /// Not enough bytes left for a declared field.
    #[error("truncated value at offset {offset}: need {needed} bytes, {available} available")]
    TruncatedValue {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// The leading tag byte is not a known value type.
    #[error("unknown value tag 0x{tag:02x} at offset {offset}")]
    UnknownValueTag { tag: u8, offset: usize },

    /// A known value type was found where another one was required.
    #[error("expected {expected} at offset {offset}, found tag 0x{tag:02x}")]
    UnexpectedValue {
        expected: &'static str,
        tag: u8,
        offset: usize,
    },

    /// A string's declared count disagrees with its valid and padding lengths.
    #[error("string length mismatch: count {count} != valid {valid} + padding {padding}")]
    LengthMismatch {
        count: usize,
        valid: usize,
        padding: usize,
    },

    /// Integer or element width outside the supported set.
    #[error("invalid value width {0}")]
    InvalidWidth(u8),

    /// An integer does not fit the requested width.
    #[error("integer {value:#x} does not fit in {width} bytes")]
    IntegerOverflow { value: u32, width: u8 },

    /// String data is not a whole number of elements.
    #[error("string of {len} bytes is not a multiple of element width {width}")]
    UnalignedString { len: usize, width: u8 },
}

/// Errors raised by the transaction manager.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The command channel ended before a reply arrived.
    #[error("command channel closed")]
    ChannelClosed,

    /// All 255 transaction IDs are outstanding.
    #[error("no free transaction id (255 calls outstanding)")]
    Exhausted,

    /// No reply arrived in time.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    /// The peer sent something the protocol does not allow.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// An inbound message header could not be decoded.
    #[error("malformed message: {reason}")]
    MalformedMessage { reason: &'static str },

    /// A message exceeds the configured maximum size.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Transport(#[from] xmmlink_transport::TransportError),

    #[error("rpc I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RpcError>;
