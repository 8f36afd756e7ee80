//! User-space control and data plane for XMM7360 cellular modems.
//!
//! The modem exposes a command channel and a packet-multiplexing channel.
//! xmmlink speaks both: it brings the modem up over the command channel and
//! relays IP packets between a tun interface and the mux channel.
//!
//! # Crate Structure
//!
//! - [`transport`]: Device endpoints and the tun handle
//! - [`mux`]: Tagged frame codec and the tun/mux bridge
//! - [`rpc`]: Value codec and the call/reply transaction manager
//! - [`modem`]: The bring-up command sequence

/// Re-export transport types.
pub mod transport {
    pub use xmmlink_transport::*;
}

/// Re-export mux types.
pub mod mux {
    pub use xmmlink_mux::*;
}

/// Re-export rpc types.
pub mod rpc {
    pub use xmmlink_rpc::*;
}

/// Re-export bring-up types.
pub mod modem {
    pub use xmmlink_modem::*;
}
