use xmmlink_rpc::{Value, ValueCursor};

use crate::cmd::{parse_hex, DecodeArgs};
use crate::exit::{CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_values, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = parse_hex(&args.hex)?;
    let (values, rest) = decode_prefix(&bytes);
    print_values(0, None, &values, rest, format);
    Ok(if rest.is_some() { DATA_INVALID } else { SUCCESS })
}

/// Decode as many values as possible; the undecodable tail is returned.
pub fn decode_prefix(bytes: &[u8]) -> (Vec<Value>, Option<&[u8]>) {
    let mut cursor = ValueCursor::new(bytes);
    let mut values = Vec::new();
    while !cursor.is_empty() {
        let start = cursor.position();
        match cursor.decode_value() {
            Ok(value) => values.push(value),
            Err(_) => return (values, Some(&bytes[start..])),
        }
    }
    (values, None)
}
