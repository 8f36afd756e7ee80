use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, warn};
use xmmlink_rpc::{decode_unknown, CallId, Message, RpcClient, RpcError, UnsolicitedId};

use crate::commands::{self, int_at, reply_values, MODE_ONLINE};
use crate::config::ModemConfig;
use crate::error::{ModemError, Result};
use crate::fcc::{self, UnlockOutcome};
use crate::netconf::{self, NetworkConfig};

/// Subsystems opened before anything else, in order.
pub const INIT_SEQUENCE: [CallId; 7] = [
    CallId::UtaMsSmsInit,
    CallId::UtaMsCbsInit,
    CallId::UtaMsNetOpen,
    CallId::UtaMsCallCsInit,
    CallId::UtaMsCallPsInitialize,
    CallId::UtaMsSsInit,
    CallId::UtaMsSimOpenReq,
];

/// Attach status meaning "not allowed yet".
pub const ATTACH_REJECTED: u32 = 0xffff_ffff;

/// Upper bound on one pump while waiting for an indication.
const PUMP_SLICE: Duration = Duration::from_millis(200);

/// Result of a full bring-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BringUp {
    pub unlock: UnlockOutcome,
    pub network: NetworkConfig,
}

/// Drives the bring-up calls over one command channel.
#[derive(Debug)]
pub struct Modem {
    client: RpcClient,
    config: ModemConfig,
    attach_allowed: Arc<AtomicBool>,
}

impl Modem {
    /// Wrap a client. Registers the attach-allowed handler.
    pub fn new(client: RpcClient, config: ModemConfig) -> Self {
        let attach_allowed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&attach_allowed);
        client.register_unsolicited_handler(
            UnsolicitedId::UtaMsNetIsAttachAllowedIndCb,
            move |message: &Message| {
                if let Some(allowed) = attach_allowed_indication(&message.body) {
                    debug!(allowed, "attach-allowed indication");
                    flag.store(allowed, Ordering::Release);
                }
            },
        );
        Self {
            client,
            config,
            attach_allowed,
        }
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    /// Whether the network last reported that attaching is allowed.
    pub fn attach_allowed(&self) -> bool {
        self.attach_allowed.load(Ordering::Acquire)
    }

    /// Run every step, from subsystem init to data channel setup.
    pub fn bring_up(&self) -> Result<BringUp> {
        self.init()?;
        let unlock = self.unlock()?;
        self.set_mode(MODE_ONLINE)?;
        self.configure_apn()?;
        self.attach()?;
        let network = self.network_config()?;
        info!(address = %network.address, dns = ?network.dns_servers(), "network configuration");
        self.connect_datachannel()?;
        info!("modem is up");
        Ok(BringUp { unlock, network })
    }

    /// Open the modem subsystems.
    pub fn init(&self) -> Result<()> {
        for call in INIT_SEQUENCE {
            self.client.call_sync(call, &[], self.config.call_timeout)?;
            debug!(%call, "initialized");
        }
        Ok(())
    }

    pub fn unlock(&self) -> Result<UnlockOutcome> {
        let outcome = fcc::unlock(&self.client, self.config.call_timeout)?;
        info!(?outcome, "FCC lock checked");
        Ok(outcome)
    }

    /// Switch the radio mode and wait for the modem to confirm it.
    pub fn set_mode(&self, mode: u32) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        self.client
            .register_unsolicited_handler(UnsolicitedId::UtaModeSetRspCb, move |message: &Message| {
                let _ = tx.send(message.body.clone());
            });
        let result = self.request_mode(mode, &rx);
        self.client
            .unregister_unsolicited_handler(UnsolicitedId::UtaModeSetRspCb);
        result
    }

    fn request_mode(&self, mode: u32, confirmations: &mpsc::Receiver<Bytes>) -> Result<()> {
        let call = CallId::UtaModeSetReq;
        let timeout = self.config.call_timeout;
        let reply = self
            .client
            .call_async(call, &commands::mode_set_body(mode), timeout)?;
        let status = int_at(call, &reply_values(call, &reply)?, 0)?;
        if status != 0 {
            return Err(ModemError::ModeSetFailed {
                requested: mode,
                reason: format!("status {status:#x}"),
            });
        }

        let body = match confirmations.recv_timeout(timeout) {
            Ok(body) => body,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                return Err(RpcError::Timeout {
                    operation: UnsolicitedId::UtaModeSetRspCb.to_string(),
                    timeout,
                }
                .into())
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => return Err(RpcError::ChannelClosed.into()),
        };
        let callback = CallId::UtaModeSetReq;
        let reported = int_at(callback, &reply_values(callback, &body)?, 1)?;
        if reported != mode {
            return Err(ModemError::ModeSetFailed {
                requested: mode,
                reason: format!("modem reports mode {reported}, is the FCC lock still engaged?"),
            });
        }
        info!(mode, "radio mode set");
        Ok(())
    }

    /// Send the APN configuration.
    pub fn configure_apn(&self) -> Result<()> {
        let body = commands::apn_config_body(&self.config.apn)?;
        self.client.call_async(
            CallId::UtaMsCallPsAttachApnConfigReq,
            &body,
            self.config.call_timeout,
        )?;
        info!(apn = %self.config.apn, "APN configured");
        Ok(())
    }

    /// Attach to the network, retrying once after the network signals that
    /// attaching is allowed.
    pub fn attach(&self) -> Result<()> {
        let status = self.request_attach()?;
        if status != ATTACH_REJECTED {
            info!(status, "attached");
            return Ok(());
        }

        info!("attach rejected, waiting for the network to allow it");
        self.wait_for_attach_allowed()?;

        let status = self.request_attach()?;
        if status == ATTACH_REJECTED {
            warn!("attach rejected again");
            return Err(ModemError::AttachFailed { status });
        }
        info!(status, "attached on retry");
        Ok(())
    }

    fn request_attach(&self) -> Result<u32> {
        let call = CallId::UtaMsNetAttachReq;
        let reply = self.client.call_async(
            call,
            &commands::net_attach_body(),
            self.config.call_timeout,
        )?;
        int_at(call, &reply_values(call, &reply)?, 1)
    }

    fn wait_for_attach_allowed(&self) -> Result<()> {
        let timeout = self.config.attach_wait_timeout;
        let deadline = Instant::now() + timeout;
        let indication = UnsolicitedId::UtaMsNetIsAttachAllowedIndCb.code();

        while !self.attach_allowed() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RpcError::Timeout {
                    operation: "attach-allowed indication".to_string(),
                    timeout,
                }
                .into());
            }
            match self.client.pump(remaining.min(PUMP_SLICE)) {
                Ok(summary) if summary.command == indication => {
                    if attach_allowed_indication(&summary.body) == Some(true) {
                        break;
                    }
                }
                Ok(summary) => debug!(command = summary.command, "pumped"),
                Err(RpcError::Timeout { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Query the negotiated address and name servers.
    ///
    /// Retries at the configured interval until an address is assigned.
    pub fn network_config(&self) -> Result<NetworkConfig> {
        let attempts = self.config.ip_fetch_attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(network) = self.query_network()? {
                return Ok(network);
            }
            if attempt < attempts {
                info!(
                    attempt,
                    interval = ?self.config.ip_fetch_interval,
                    "no address assigned yet"
                );
                thread::sleep(self.config.ip_fetch_interval);
            }
        }
        Err(ModemError::NoAddress { attempts })
    }

    fn query_network(&self) -> Result<Option<NetworkConfig>> {
        let timeout = self.config.call_timeout;
        let body = commands::ip_query_body();

        let call = CallId::UtaMsCallPsGetNegIpAddrReq;
        let reply = self.client.call_async(call, &body, timeout)?;
        let address = netconf::address_from_reply(&reply_values(call, &reply)?)?;

        let call = CallId::UtaMsCallPsGetNegotiatedDnsReq;
        let reply = self.client.call_async(call, &body, timeout)?;
        let (dns_v4, dns_v6) = netconf::dns_from_reply(&reply_values(call, &reply)?);

        Ok(address.map(|address| NetworkConfig {
            address,
            dns_v4,
            dns_v6,
        }))
    }

    /// Route the packet session to the data channel.
    pub fn connect_datachannel(&self) -> Result<()> {
        let timeout = self.config.call_timeout;
        let connect = self.client.call_async(
            CallId::UtaMsCallPsConnectReq,
            &commands::ps_connect_body(),
            timeout,
        )?;
        let datachannel = self.client.call_sync(
            CallId::UtaRPCPsConnectToDatachannelReq,
            &commands::datachannel_body(&self.config.datachannel_path)?,
            timeout,
        )?;
        let setup = commands::connect_setup_body(&connect, &datachannel)?;
        self.client
            .call_sync(CallId::UtaRPCPSConnectSetupReq, &setup, timeout)?;
        info!(path = %self.config.datachannel_path, "data channel connected");
        Ok(())
    }
}

/// Third value of the attach-allowed indication, if present.
fn attach_allowed_indication(body: &[u8]) -> Option<bool> {
    let values = decode_unknown(body).ok()?;
    values.get(2)?.as_int().map(|allowed| allowed != 0)
}
