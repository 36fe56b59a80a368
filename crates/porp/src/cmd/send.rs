use std::fs;

use porp_frame::ACK;
use tracing::info;

use crate::cmd::{open_channel, parse_duration, parse_hex, SendArgs};
use crate::exit::{io_error, link_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT, USAGE};
use crate::output::{payload_preview, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let payload = resolve_payload(&args)?;

    let channel = open_channel(&args.port, args.baud)?;
    let reply = channel
        .send_datagram(&payload, timeout)
        .map_err(|err| link_error("send failed", err))?;

    match reply {
        Some(reply) if reply.as_ref() == ACK.as_slice() => {
            info!(size = payload.len(), "datagram acknowledged");
            if matches!(format, OutputFormat::Pretty | OutputFormat::Table) {
                println!("acknowledged: {}", payload_preview(&payload));
            }
            Ok(SUCCESS)
        }
        Some(reply) => Err(CliError::new(
            FAILURE,
            format!("unexpected reply: {:02x?}", reply.as_ref()),
        )),
        None => Err(CliError::new(TIMEOUT, "no acknowledgement")),
    }
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    let payload = if let Some(data) = &args.data {
        data.as_bytes().to_vec()
    } else if let Some(hex) = &args.hex {
        parse_hex(hex)?
    } else if let Some(path) = &args.file {
        fs::read(path).map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?
    } else {
        return Err(CliError::new(USAGE, "no payload source given"));
    };

    // An empty payload would frame as `[0x00]`, which the far side
    // classifies as a command reply rather than a datagram.
    if payload.is_empty() {
        return Err(CliError::new(USAGE, "payload must not be empty"));
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn args_with(data: Option<&str>, hex: Option<&str>) -> SendArgs {
        SendArgs {
            port: PathBuf::from("/dev/null"),
            baud: 57600,
            data: data.map(String::from),
            hex: hex.map(String::from),
            file: None,
            timeout: "2s".to_string(),
        }
    }

    #[test]
    fn data_payload_is_raw_bytes() {
        let payload = resolve_payload(&args_with(Some("hello"), None)).unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn hex_payload_is_decoded() {
        let payload = resolve_payload(&args_with(None, Some("00ff10"))).unwrap();
        assert_eq!(payload, vec![0x00, 0xFF, 0x10]);
    }

    #[test]
    fn empty_payload_is_a_usage_error() {
        let err = resolve_payload(&args_with(Some(""), None)).unwrap_err();
        assert_eq!(err.code, USAGE);
        let err = resolve_payload(&args_with(None, Some(""))).unwrap_err();
        assert_eq!(err.code, USAGE);
    }
}
