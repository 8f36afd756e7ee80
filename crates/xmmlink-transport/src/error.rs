use std::path::PathBuf;

/// Errors that can occur while opening or driving a modem endpoint.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the device node.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to attach to (or create) a tun interface.
    #[error("failed to attach tun interface {name:?}: {source}")]
    Tun {
        name: Option<String>,
        source: std::io::Error,
    },

    /// The interface name does not fit the kernel's `IFNAMSIZ` limit.
    #[error("interface name too long ({len} bytes, max {max}): {name}")]
    NameTooLong { name: String, len: usize, max: usize },

    /// An I/O error occurred on the endpoint.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation is not available on this platform.
    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),
}

pub type Result<T> = std::result::Result<T, TransportError>;
