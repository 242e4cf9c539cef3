use std::io::Read;
use std::path::Path;

use uartmux_frame::{DecodeState, Decoded, Decoder};

use crate::cmd::DecodeArgs;
use crate::exit::{io_error, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_records, DecodeRecord, DecodeSummary, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let capture = read_input(&args.input)?;
    let (records, summary) = decode_capture(&capture, args.address);
    print_records(&records, &summary, format);

    if args.strict && summary.malformed > 0 {
        return Ok(DATA_INVALID);
    }
    Ok(SUCCESS)
}

fn read_input(path: &Path) -> CliResult<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .map_err(|err| io_error("failed reading stdin", err))?;
        return Ok(buf);
    }
    std::fs::read(path).map_err(|err| io_error(&format!("failed reading {}", path.display()), err))
}

/// Decode every outcome in `capture`, optionally keeping one address.
pub(crate) fn decode_capture(
    capture: &[u8],
    address: Option<u8>,
) -> (Vec<DecodeRecord>, DecodeSummary) {
    let mut decoder = Decoder::new();
    let mut src = capture;
    let mut records = Vec::new();
    let mut summary = DecodeSummary::default();

    loop {
        let decoded = decoder.decode_next(&mut src);
        match &decoded {
            Decoded::Frame(_) => summary.frames += 1,
            Decoded::Invalid(_) => summary.malformed += 1,
            Decoded::Incomplete => break,
        }
        if let Some(record) = DecodeRecord::from_decoded(&decoded) {
            if address.is_none_or(|wanted| wanted == record.address) {
                records.push(record);
            }
        }
    }

    summary.discarded = decoder.discarded();
    summary.incomplete = decoder.state() != DecodeState::AwaitStart;
    (records, summary)
}
