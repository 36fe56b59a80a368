use porp_frame::decode_datagram;
use tracing::{debug, warn};

use crate::cmd::{open_channel, parse_duration, ListenArgs};
use crate::exit::{frame_error, link_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_datagram, OutputFormat};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let channel = open_channel(&args.port, args.baud)?;

    let mut printed = 0usize;
    loop {
        let frame = match channel
            .recv_incoming(timeout)
            .map_err(|err| link_error("receive failed", err))?
        {
            Some(frame) => frame,
            None => {
                // Silence past the deadline. A pending --count means the
                // expected traffic never came; otherwise it is a normal
                // end of session.
                return if args.count.is_some_and(|count| printed < count) {
                    Err(CliError::new(TIMEOUT, "timed out waiting for datagrams"))
                } else {
                    debug!(printed, "listen finished");
                    Ok(SUCCESS)
                };
            }
        };

        let datagram = match decode_datagram(&frame) {
            Ok(datagram) => datagram,
            Err(err) => {
                warn!(error = %frame_error("datagram rejected", err), "skipping frame");
                continue;
            }
        };

        print_datagram(&datagram, format);
        printed = printed.saturating_add(1);

        if args.count.is_some_and(|count| printed >= count) {
            return Ok(SUCCESS);
        }
    }
}
