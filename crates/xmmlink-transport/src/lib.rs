//! Modem endpoint transport.
//!
//! The baseband exposes two character devices, `/dev/xmm0/rpc` and
//! `/dev/xmm0/mux`. Both have packet semantics: one `read` returns one
//! complete unit (an RPC message or a mux frame) and one `write` submits one.
//!
//! This is the lowest layer of xmmlink. Everything else builds on top of the
//! [`DeviceStream`] type provided here. Linux additionally gets [`TunDevice`],
//! a bare handle to a layer-3 tun interface used by the mux bridge.

pub mod error;
pub mod traits;

#[cfg(target_os = "linux")]
pub mod tun;

pub use error::{Result, TransportError};
pub use traits::{DeviceStream, DEFAULT_MUX_PATH, DEFAULT_RPC_PATH};

#[cfg(target_os = "linux")]
pub use tun::TunDevice;
