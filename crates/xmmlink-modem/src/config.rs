use std::time::Duration;

use xmmlink_rpc::DEFAULT_CALL_TIMEOUT;

/// Data channel the host attaches the IP session to.
pub const DEFAULT_DATACHANNEL_PATH: &str = "/sioscc/PCIE/IOSM/IPS/0";

/// Configuration for [`Modem`](crate::Modem).
#[derive(Debug, Clone)]
pub struct ModemConfig {
    /// Access point name of the carrier.
    pub apn: String,
    /// Timeout for each call.
    pub call_timeout: Duration,
    /// How long to wait for the attach-allowed indication after a
    /// rejected attach.
    pub attach_wait_timeout: Duration,
    /// Pause between address queries while none is assigned.
    pub ip_fetch_interval: Duration,
    /// Address queries before giving up. Zero is treated as one.
    pub ip_fetch_attempts: u32,
    /// Data channel named in the connect-to-datachannel call.
    pub datachannel_path: String,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            apn: String::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            attach_wait_timeout: Duration::from_secs(60),
            ip_fetch_interval: Duration::from_secs(1),
            ip_fetch_attempts: 30,
            datachannel_path: DEFAULT_DATACHANNEL_PATH.to_string(),
        }
    }
}

impl ModemConfig {
    pub fn with_apn(apn: impl Into<String>) -> Self {
        Self {
            apn: apn.into(),
            ..Self::default()
        }
    }
}
