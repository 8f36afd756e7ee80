use std::sync::{mpsc, Arc};
use std::thread;

use xmmlink_mux::{BridgeExit, MuxBridge, MuxConfig};
use xmmlink_transport::DeviceStream;

use crate::cmd::BridgeArgs;
use crate::exit::{frame_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_bridge_stats, OutputFormat};

enum Event {
    Stopped(BridgeExit),
    Interrupted,
}

pub fn run(args: BridgeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = MuxConfig {
        max_frame_size: args.max_frame_size,
        ..MuxConfig::default()
    };

    let mut mux = DeviceStream::open(&args.mux_device)
        .map_err(|err| transport_error("open mux failed", err))?;
    let mux_rx = mux
        .try_clone()
        .map_err(|err| transport_error("open mux failed", err))?;
    let (tun_rx, tun_tx) = open_tun(&args.tun)?;

    let bridge = Arc::new(MuxBridge::new(config));
    bridge
        .open_channel(&mut mux)
        .map_err(|err| frame_error("mux channel open failed", err))?;

    let (events_tx, events) = mpsc::channel();
    install_ctrlc_handler(events_tx.clone())?;
    {
        let bridge = Arc::clone(&bridge);
        thread::Builder::new()
            .name("mux-bridge".into())
            .spawn(move || {
                let exit = bridge.run(mux_rx, mux, tun_rx, tun_tx);
                let _ = events_tx.send(Event::Stopped(exit));
            })
            .map_err(|err| crate::exit::io_error("bridge start failed", err))?;
    }

    match events.recv() {
        Ok(Event::Stopped(exit)) => {
            let reason = format!("{} stopped: {}", exit.direction, exit.error);
            print_bridge_stats(&exit.stats, &reason, format);
            Err(frame_error(&format!("{} stopped", exit.direction), exit.error))
        }
        Ok(Event::Interrupted) | Err(_) => {
            print_bridge_stats(&bridge.stats(), "interrupted", format);
            Ok(SUCCESS)
        }
    }
}

#[cfg(target_os = "linux")]
fn open_tun(name: &str) -> CliResult<(xmmlink_transport::TunDevice, xmmlink_transport::TunDevice)> {
    let tun = xmmlink_transport::TunDevice::open(Some(name))
        .map_err(|err| transport_error("open tun failed", err))?;
    let tun_tx = tun
        .try_clone()
        .map_err(|err| transport_error("open tun failed", err))?;
    Ok((tun, tun_tx))
}

#[cfg(not(target_os = "linux"))]
fn open_tun(_name: &str) -> CliResult<(DeviceStream, DeviceStream)> {
    Err(transport_error(
        "open tun failed",
        xmmlink_transport::TransportError::Unsupported("tun interfaces require Linux"),
    ))
}

fn install_ctrlc_handler(events: mpsc::Sender<Event>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        let _ = events.send(Event::Interrupted);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
