use xmmlink_modem::{Modem, ModemConfig};
use xmmlink_rpc::{RpcClient, RpcConfig};

use crate::cmd::{parse_duration, UpArgs};
use crate::exit::{modem_error, rpc_error, CliResult, SUCCESS};
use crate::output::{print_bring_up, OutputFormat};

pub fn run(args: UpArgs, format: OutputFormat) -> CliResult<i32> {
    let config = modem_config(&args)?;
    let rpc_config = RpcConfig {
        call_timeout: config.call_timeout,
        ..RpcConfig::default()
    };
    let client = RpcClient::open(&args.rpc_device, rpc_config)
        .map_err(|err| rpc_error("open failed", err))?;

    let modem = Modem::new(client, config);
    let result = modem.bring_up();
    modem.client().shutdown();
    let up = result.map_err(|err| modem_error("bring-up failed", err))?;

    print_bring_up(&up, &args.apn, format);
    Ok(SUCCESS)
}

fn modem_config(args: &UpArgs) -> CliResult<ModemConfig> {
    Ok(ModemConfig {
        apn: args.apn.clone(),
        call_timeout: parse_duration(&args.timeout)?,
        attach_wait_timeout: parse_duration(&args.attach_wait)?,
        ip_fetch_interval: parse_duration(&args.ip_fetch_interval)?,
        ip_fetch_attempts: args.ip_fetch_attempts,
        datachannel_path: args.datachannel.clone(),
    })
}
