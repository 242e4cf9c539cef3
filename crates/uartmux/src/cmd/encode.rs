use std::fs;

use bytes::BytesMut;
use uartmux_frame::encode_chunked;

use crate::cmd::EncodeArgs;
use crate::exit::{frame_error, io_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::print_raw;

pub fn run(args: EncodeArgs) -> CliResult<i32> {
    let payload = resolve_payload(&args)?;
    let wire = encode_payload(args.address, &payload)?;

    if args.hex_output {
        println!("{}", hex::encode(&wire));
    } else {
        print_raw(&wire);
    }
    Ok(SUCCESS)
}

fn encode_payload(address: u8, payload: &[u8]) -> CliResult<BytesMut> {
    let mut wire = BytesMut::new();
    let frames = encode_chunked(address, payload, &mut wire)
        .map_err(|err| frame_error("encode failed", err))?;
    tracing::debug!(address, frames, bytes = wire.len(), "encoded payload");
    Ok(wire)
}

fn resolve_payload(args: &EncodeArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(text) = &args.hex {
        return parse_hex(text);
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Err(CliError::new(
        USAGE,
        "one of --data, --hex or --file is required",
    ))
}

fn parse_hex(text: &str) -> CliResult<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let compact = compact
        .strip_prefix("0x")
        .or_else(|| compact.strip_prefix("0X"))
        .unwrap_or(&compact);
    hex::decode(compact).map_err(|err| CliError::new(USAGE, format!("--hex is not valid hex: {err}")))
}
