use xmmlink_rpc::{CallId, RpcError, ValueError};

/// Errors that can occur while bringing the modem up.
#[derive(Debug, thiserror::Error)]
pub enum ModemError {
    /// Command channel error.
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    /// A request body could not be encoded.
    #[error("value error: {0}")]
    Value(#[from] ValueError),

    /// The modem rejected the FCC unlock response.
    #[error("FCC unlock rejected by modem")]
    UnlockFailed,

    /// The modem refused or never confirmed a mode change.
    #[error("mode set to {requested} failed: {reason}")]
    ModeSetFailed { requested: u32, reason: String },

    /// Network attach reported failure after the retry.
    #[error("network attach failed with status {status:#x}")]
    AttachFailed { status: u32 },

    /// No IP address was negotiated.
    #[error("no IP address after {attempts} attempts")]
    NoAddress { attempts: u32 },

    /// A reply didn't have the expected layout.
    #[error("unexpected reply to {call}: {reason}")]
    BadReply { call: CallId, reason: String },

    /// The APN can't be sent to the modem.
    #[error("invalid APN: {0}")]
    InvalidApn(String),
}

impl ModemError {
    /// Whether the command channel went away.
    pub fn is_channel_closed(&self) -> bool {
        matches!(self, ModemError::Rpc(RpcError::ChannelClosed))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ModemError::Rpc(RpcError::Timeout { .. }))
    }
}

pub type Result<T> = std::result::Result<T, ModemError>;
