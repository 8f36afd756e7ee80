use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::bridge::{from_frame, open_channel_frame, DatagramBatch, SequenceCounter};
use crate::codec::MuxConfig;
use crate::error::{FrameError, Result};

/// Largest unit the modem hands back in one read.
const MUX_READ_BUFFER: usize = 64 * 1024;
/// Largest packet accepted from the tunnel.
const TUN_READ_BUFFER: usize = 64 * 1024;

/// Relay direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// tun → mux
    Uplink,
    /// mux → tun
    Downlink,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Uplink => f.write_str("uplink"),
            Direction::Downlink => f.write_str("downlink"),
        }
    }
}

/// Packet and byte counters of a running bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub packets_up: u64,
    pub bytes_up: u64,
    pub packets_down: u64,
    pub bytes_down: u64,
    /// Units discarded in either direction.
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    packets_up: AtomicU64,
    bytes_up: AtomicU64,
    packets_down: AtomicU64,
    bytes_down: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            packets_up: self.packets_up.load(Ordering::Relaxed),
            bytes_up: self.bytes_up.load(Ordering::Relaxed),
            packets_down: self.packets_down.load(Ordering::Relaxed),
            bytes_down: self.bytes_down.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Why a bridge stopped.
#[derive(Debug)]
pub struct BridgeExit {
    /// The direction that stopped first.
    pub direction: Direction,
    pub error: FrameError,
    pub stats: BridgeStats,
}

/// Relays IP packets between a tunnel interface and the mux channel.
///
/// Each direction runs on its own thread. The only state they share is the
/// frame sequence counter and the statistics.
#[derive(Debug)]
pub struct MuxBridge {
    config: MuxConfig,
    sequence: Arc<SequenceCounter>,
    counters: Arc<Counters>,
}

impl MuxBridge {
    pub fn new(config: MuxConfig) -> Self {
        Self {
            config,
            sequence: Arc::new(SequenceCounter::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Send the channel-open control frame.
    pub fn open_channel<W: Write>(&self, mux: &mut W) -> Result<()> {
        let frame = open_channel_frame()?;
        write_unit(mux, &frame)?;
        info!("mux data channel opened");
        Ok(())
    }

    /// Current counters.
    pub fn stats(&self) -> BridgeStats {
        self.counters.snapshot()
    }

    /// Run both directions until one of them stops.
    ///
    /// Malformed frames and undeliverable packets are logged and dropped; only
    /// an I/O failure or end-of-stream on either side ends the relay. The
    /// direction still running is left blocked in its read and exits when
    /// its endpoint is closed.
    pub fn run<MR, MW, TR, TW>(&self, mux_rx: MR, mux_tx: MW, tun_rx: TR, tun_tx: TW) -> BridgeExit
    where
        MR: Read + Send + 'static,
        MW: Write + Send + 'static,
        TR: Read + Send + 'static,
        TW: Write + Send + 'static,
    {
        let (exit_tx, exit_rx) = mpsc::channel();

        let uplink = {
            let exit_tx = exit_tx.clone();
            let config = self.config.clone();
            let sequence = Arc::clone(&self.sequence);
            let counters = Arc::clone(&self.counters);
            spawn_gated("mux-uplink", move || {
                let err = uplink_loop(tun_rx, mux_tx, &config, &sequence, &counters);
                let _ = exit_tx.send((Direction::Uplink, err));
            })
        };

        let downlink = {
            let counters = Arc::clone(&self.counters);
            spawn_gated("mux-downlink", move || {
                let err = downlink_loop(mux_rx, tun_tx, &counters);
                let _ = exit_tx.send((Direction::Downlink, err));
            })
        };

        let spawned = match (uplink, downlink) {
            (Ok((_, up_gate)), Ok((_, down_gate))) => {
                let _ = up_gate.send(());
                let _ = down_gate.send(());
                None
            }
            (Err(err), downlink) => {
                abandon(downlink);
                Some((Direction::Uplink, FrameError::Io(err)))
            }
            (uplink, Err(err)) => {
                abandon(uplink);
                Some((Direction::Downlink, FrameError::Io(err)))
            }
        };

        info!(
            max_frame_size = self.config.max_frame_size,
            "mux bridge running"
        );

        let (direction, error) = match spawned {
            Some(exit) => exit,
            None => exit_rx
                .recv()
                .unwrap_or((Direction::Downlink, FrameError::ConnectionClosed)),
        };

        let stats = self.counters.snapshot();
        info!(%direction, error = %error, ?stats, "mux bridge stopped");
        BridgeExit {
            direction,
            error,
            stats,
        }
    }
}

type Gated = (JoinHandle<()>, mpsc::Sender<()>);

/// Spawn a named thread that runs `body` only once its gate is opened.
/// Dropping the gate instead makes the thread return without running it.
fn spawn_gated<F>(name: &str, body: F) -> io::Result<Gated>
where
    F: FnOnce() + Send + 'static,
{
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let handle = thread::Builder::new().name(name.into()).spawn(move || {
        if gate_rx.recv().is_ok() {
            body();
        }
    })?;
    Ok((handle, gate_tx))
}

/// Stop a gated thread that never started its work.
fn abandon(started: io::Result<Gated>) {
    if let Ok((handle, gate)) = started {
        drop(gate);
        let _ = handle.join();
    }
}

fn uplink_loop<R: Read, W: Write>(
    mut tun: R,
    mut mux: W,
    config: &MuxConfig,
    sequence: &SequenceCounter,
    counters: &Counters,
) -> FrameError {
    let mut buf = vec![0u8; TUN_READ_BUFFER];
    loop {
        let n = match read_unit(&mut tun, &mut buf) {
            Ok(n) => n,
            Err(err) => return err,
        };
        let packet = &buf[..n];

        let mut batch = DatagramBatch::new(sequence.advance(), config);
        let frame = match batch.push(packet).and_then(|()| batch.finish()) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(len = n, error = %err, "dropping outbound packet");
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        if let Err(err) = write_unit(&mut mux, &frame) {
            return err;
        }
        counters.packets_up.fetch_add(1, Ordering::Relaxed);
        counters.bytes_up.fetch_add(n as u64, Ordering::Relaxed);
    }
}

fn downlink_loop<R: Read, W: Write>(mut mux: R, mut tun: W, counters: &Counters) -> FrameError {
    let mut buf = vec![0u8; MUX_READ_BUFFER];
    loop {
        let n = match read_unit(&mut mux, &mut buf) {
            Ok(n) => n,
            Err(err) => return err,
        };

        let frame = bytes::Bytes::copy_from_slice(&buf[..n]);
        let packets = match from_frame(&frame) {
            Ok(packets) => packets,
            Err(err) => {
                warn!(len = n, error = %err, "discarding malformed mux frame");
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        for packet in packets {
            if let Err(err) = write_unit(&mut tun, &packet) {
                match err {
                    FrameError::Io(ref io) if io.kind() != ErrorKind::BrokenPipe => {
                        debug!(len = packet.len(), error = %err, "tun rejected packet");
                        counters.dropped.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    _ => return err,
                }
            }
            counters.packets_down.fetch_add(1, Ordering::Relaxed);
            counters.bytes_down.fetch_add(packet.len() as u64, Ordering::Relaxed);
        }
    }
}

fn read_unit<R: Read>(src: &mut R, buf: &mut [u8]) -> Result<usize> {
    loop {
        match src.read(buf) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => return Ok(n),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
}

/// Units must reach the device in a single write.
fn write_unit<W: Write>(dst: &mut W, unit: &[u8]) -> Result<()> {
    loop {
        match dst.write(unit) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) if n == unit.len() => return dst.flush().map_err(FrameError::Io),
            Ok(n) => {
                return Err(FrameError::Io(std::io::Error::new(
                    ErrorKind::WriteZero,
                    format!("short write: {n} of {} bytes", unit.len()),
                )))
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
}
