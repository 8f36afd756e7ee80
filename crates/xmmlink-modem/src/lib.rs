//! Bring-up sequence for XMM7360 modems.
//!
//! [`Modem`] drives the command channel through the steps needed before
//! packets can flow: subsystem init, FCC unlock, radio on, APN setup,
//! network attach, address retrieval and data channel setup. Each step is
//! also available on its own.

pub mod commands;
pub mod config;
pub mod error;
pub mod fcc;
pub mod netconf;
pub mod session;

#[cfg(test)]
mod testing;

pub use config::{ModemConfig, DEFAULT_DATACHANNEL_PATH};
pub use error::{ModemError, Result};
pub use fcc::{challenge_response, UnlockOutcome};
pub use netconf::{select_address, NetworkConfig};
pub use session::{BringUp, Modem, ATTACH_REJECTED, INIT_SEQUENCE};
