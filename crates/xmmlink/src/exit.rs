use std::fmt;
use std::io;

use xmmlink_modem::ModemError;
use xmmlink_mux::FrameError;
use xmmlink_rpc::RpcError;
use xmmlink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
/// A device channel closed underneath us.
pub const CHANNEL_LOST: i32 = 4;
pub const UNLOCK_FAILED: i32 = 10;
pub const ATTACH_FAILED: i32 = 11;
pub const NO_ADDRESS: i32 = 12;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    CliError::new(io_code(err.kind()), format!("{context}: {err}"))
}

fn io_code(kind: io::ErrorKind) -> i32 {
    match kind {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => TRANSPORT_ERROR,
        io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => CHANNEL_LOST,
        _ => INTERNAL,
    }
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    let code = match &err {
        TransportError::Open { source, .. } | TransportError::Tun { source, .. } => {
            match io_code(source.kind()) {
                INTERNAL => TRANSPORT_ERROR,
                code => code,
            }
        }
        TransportError::Io(source) => io_code(source.kind()),
        TransportError::NameTooLong { .. } => USAGE,
        TransportError::Unsupported(_) => TRANSPORT_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::ConnectionClosed => CliError::new(CHANNEL_LOST, format!("{context}: {err}")),
        FrameError::FrameTooLarge { .. } | FrameError::TooManyPackets { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn hex_error(err: hex::FromHexError) -> CliError {
    CliError::new(DATA_INVALID, format!("invalid hex input: {err}"))
}

pub fn rpc_error(context: &str, err: RpcError) -> CliError {
    match err {
        RpcError::Transport(err) => transport_error(context, err),
        RpcError::Io(source) => io_error(context, source),
        RpcError::ChannelClosed => CliError::new(CHANNEL_LOST, format!("{context}: {err}")),
        RpcError::Timeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        RpcError::Value(_) | RpcError::MessageTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

pub fn modem_error(context: &str, err: ModemError) -> CliError {
    match err {
        ModemError::Rpc(err) => rpc_error(context, err),
        ModemError::UnlockFailed => CliError::new(UNLOCK_FAILED, format!("{context}: {err}")),
        ModemError::AttachFailed { .. } => CliError::new(ATTACH_FAILED, format!("{context}: {err}")),
        ModemError::NoAddress { .. } => CliError::new(NO_ADDRESS, format!("{context}: {err}")),
        ModemError::Value(_) | ModemError::InvalidApn(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        ModemError::BadReply { .. } => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}
