use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{Result, TransportError};

/// Default node of the command/control channel.
pub const DEFAULT_RPC_PATH: &str = "/dev/xmm0/rpc";

/// Default node of the packet-multiplexing channel.
pub const DEFAULT_MUX_PATH: &str = "/dev/xmm0/mux";

/// A connected modem endpoint implementing `Read` and `Write`.
///
/// Every `read` yields at most one protocol unit and every `write` submits
/// exactly one, so callers size their read buffers for the largest unit they
/// accept. On hardware this wraps the character device; in tests and
/// emulators it wraps one side of a datagram socket pair, which keeps the
/// same message boundaries.
pub struct DeviceStream {
    inner: DeviceStreamInner,
}

enum DeviceStreamInner {
    Device(File),
    #[cfg(unix)]
    Datagram(std::os::unix::net::UnixDatagram),
}

impl Read for DeviceStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            DeviceStreamInner::Device(file) => file.read(buf),
            #[cfg(unix)]
            DeviceStreamInner::Datagram(socket) => socket.recv(buf),
        }
    }
}

impl Write for DeviceStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            DeviceStreamInner::Device(file) => file.write(buf),
            #[cfg(unix)]
            DeviceStreamInner::Datagram(socket) => socket.send(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            DeviceStreamInner::Device(file) => file.flush(),
            #[cfg(unix)]
            DeviceStreamInner::Datagram(_) => Ok(()),
        }
    }
}

impl DeviceStream {
    /// Open a modem character device for synchronous read/write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut options = OpenOptions::new();
        options.read(true).write(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(libc::O_SYNC);
        }

        let file = options.open(path).map_err(|e| TransportError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(?path, "opened modem device");
        Ok(Self {
            inner: DeviceStreamInner::Device(file),
        })
    }

    /// Create a connected pair of in-memory endpoints with packet semantics.
    ///
    /// One side plays the host, the other the modem.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixDatagram::pair()?;
        Ok((
            Self {
                inner: DeviceStreamInner::Datagram(left),
            },
            Self {
                inner: DeviceStreamInner::Datagram(right),
            },
        ))
    }

    /// Try to clone this endpoint (creates a new file descriptor).
    ///
    /// The reader thread owns one clone, writers share the other.
    pub fn try_clone(&self) -> Result<Self> {
        let inner = match &self.inner {
            DeviceStreamInner::Device(file) => DeviceStreamInner::Device(file.try_clone()?),
            #[cfg(unix)]
            DeviceStreamInner::Datagram(socket) => {
                DeviceStreamInner::Datagram(socket.try_clone()?)
            }
        };
        Ok(Self { inner })
    }

    /// Shut down an in-memory endpoint so the peer observes end-of-stream.
    ///
    /// Device nodes have no notion of half-close; dropping every clone is
    /// the only way to release them, so this is a no-op there.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            DeviceStreamInner::Device(_) => Ok(()),
            #[cfg(unix)]
            DeviceStreamInner::Datagram(socket) => socket
                .shutdown(std::net::Shutdown::Both)
                .map_err(Into::into),
        }
    }

    /// Endpoint kind for diagnostics.
    pub fn kind(&self) -> &'static str {
        match &self.inner {
            DeviceStreamInner::Device(_) => "device",
            #[cfg(unix)]
            DeviceStreamInner::Datagram(_) => "datagram",
        }
    }
}

impl std::fmt::Debug for DeviceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStream")
            .field("type", &self.kind())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn pair_preserves_unit_boundaries() {
        let (mut host, mut modem) = DeviceStream::pair().unwrap();

        host.write_all(b"first").unwrap();
        host.write_all(b"second-unit").unwrap();

        let mut buf = [0u8; 64];
        let n = modem.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"first");
        let n = modem.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"second-unit");
    }

    #[test]
    fn cloned_endpoint_shares_the_channel() {
        let (host, mut modem) = DeviceStream::pair().unwrap();
        let mut writer = host.try_clone().unwrap();

        writer.write_all(b"via-clone").unwrap();

        let mut buf = [0u8; 16];
        let n = modem.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"via-clone");
        assert_eq!(host.kind(), "datagram");
    }

    #[test]
    fn shutdown_signals_end_of_stream() {
        let (host, mut modem) = DeviceStream::pair().unwrap();
        modem.shutdown().unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(modem.read(&mut buf).unwrap(), 0);
        drop(host);
    }

    #[test]
    fn open_missing_device_reports_path() {
        let path = std::env::temp_dir().join(format!(
            "xmmlink-missing-{}/rpc",
            std::process::id()
        ));
        let err = DeviceStream::open(&path).unwrap_err();
        match err {
            TransportError::Open { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn open_regular_file_reads_and_writes() {
        let dir = std::env::temp_dir().join(format!("xmmlink-open-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("node");
        std::fs::write(&path, b"abc").unwrap();

        let mut stream = DeviceStream::open(&path).unwrap();
        let mut buf = [0u8; 3];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
        assert_eq!(stream.kind(), "device");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
