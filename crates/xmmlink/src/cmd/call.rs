use tracing::debug;
use xmmlink_rpc::{CallId, RpcClient, RpcConfig};

use crate::cmd::decode::decode_prefix;
use crate::cmd::{parse_duration, parse_hex, CallArgs};
use crate::exit::{rpc_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_values, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let command = resolve_command(&args.command)?;
    let body = parse_hex(&args.body)?;
    let timeout = parse_duration(&args.timeout)?;

    let client = RpcClient::open(&args.rpc_device, RpcConfig::default())
        .map_err(|err| rpc_error("open failed", err))?;
    let name = CallId::from_code(command).map(CallId::name);
    debug!(command, name, len = body.len(), "issuing call");

    let result = if args.no_wait {
        client.call_fire_and_forget(command, &body).map(|()| None)
    } else if args.is_async {
        client.call_async(command, &body, timeout).map(Some)
    } else {
        client.call_sync(command, &body, timeout).map(Some)
    };
    client.shutdown();

    let reply = result.map_err(|err| rpc_error("call failed", err))?;
    if let Some(reply) = reply {
        let (values, rest) = decode_prefix(&reply);
        print_values(command, name, &values, rest, format);
    }
    Ok(SUCCESS)
}

/// Accept a known command name, a `0x` hex code or a decimal code.
fn resolve_command(input: &str) -> CliResult<u32> {
    if let Some(id) = CallId::from_name(input) {
        return Ok(id.code());
    }
    let parsed = match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| CliError::new(USAGE, format!("unknown command: {input}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_by_name_or_code() {
        assert_eq!(resolve_command("UtaMsNetAttachReq").unwrap(), 0xa2);
        assert_eq!(resolve_command("0x25").unwrap(), 0x25);
        assert_eq!(resolve_command("37").unwrap(), 37);
        assert_eq!(resolve_command("UtaNoSuchReq").unwrap_err().code, USAGE);
    }
}
