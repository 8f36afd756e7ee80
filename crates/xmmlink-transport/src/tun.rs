use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;

use tracing::info;

use crate::error::{Result, TransportError};

const CLONE_DEVICE: &str = "/dev/net/tun";
const IFNAMSIZ: usize = 16;
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
const IFF_TUN: libc::c_short = 0x0001;
const IFF_NO_PI: libc::c_short = 0x1000;

#[repr(C)]
struct IfReq {
    name: [u8; IFNAMSIZ],
    flags: libc::c_short,
    _pad: [u8; 22],
}

/// A layer-3 tun interface carrying raw IP packets without packet info.
///
/// Only attaches the file handle. Bringing the link up, assigning addresses
/// and installing routes is left to the operating system tooling.
pub struct TunDevice {
    file: File,
    name: String,
}

impl TunDevice {
    /// Attach to the tun interface `name`, or let the kernel pick one.
    pub fn open(name: Option<&str>) -> Result<Self> {
        let mut req = IfReq {
            name: [0u8; IFNAMSIZ],
            flags: IFF_TUN | IFF_NO_PI,
            _pad: [0u8; 22],
        };

        if let Some(name) = name {
            let bytes = name.as_bytes();
            if bytes.len() >= IFNAMSIZ {
                return Err(TransportError::NameTooLong {
                    name: name.to_string(),
                    len: bytes.len(),
                    max: IFNAMSIZ - 1,
                });
            }
            req.name[..bytes.len()].copy_from_slice(bytes);
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(CLONE_DEVICE)
            .map_err(|e| TransportError::Tun {
                name: name.map(str::to_string),
                source: e,
            })?;

        // SAFETY: `req` is a properly sized, writable `ifreq` layout and `file`
        // is an open descriptor on the tun clone device for the whole call.
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF as _, &mut req as *mut IfReq) };
        if rc < 0 {
            return Err(TransportError::Tun {
                name: name.map(str::to_string),
                source: std::io::Error::last_os_error(),
            });
        }

        let len = req.name.iter().position(|&b| b == 0).unwrap_or(IFNAMSIZ);
        let name = String::from_utf8_lossy(&req.name[..len]).into_owned();
        info!(interface = %name, "attached tun interface");

        Ok(Self { file, name })
    }

    /// Kernel-assigned interface name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Try to clone this handle so each relay direction owns one.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            file: self.file.try_clone()?,
            name: self.name.clone(),
        })
    }
}

impl Read for TunDevice {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for TunDevice {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl std::fmt::Debug for TunDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunDevice").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overlong_interface_name() {
        let err = TunDevice::open(Some("wwan-interface-name-too-long")).unwrap_err();
        assert!(matches!(err, TransportError::NameTooLong { max: 15, .. }));
    }

    #[test]
    fn ifreq_matches_kernel_layout() {
        assert_eq!(std::mem::size_of::<IfReq>(), 40);
    }
}
