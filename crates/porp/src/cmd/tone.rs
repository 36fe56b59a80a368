use porp_link::{transmit_cw, transmit_off};
use tracing::info;

use crate::cmd::{open_channel, ToneArgs};
use crate::exit::{link_error, CliResult, SUCCESS};

pub fn run(args: ToneArgs) -> CliResult<i32> {
    let channel = open_channel(&args.port, args.baud)?;

    if args.off {
        transmit_off(&channel).map_err(|err| link_error("tone off failed", err))?;
        info!("carrier stopped");
    } else {
        transmit_cw(&channel, args.freq_khz).map_err(|err| link_error("tone on failed", err))?;
        info!(freq_khz = args.freq_khz, "carrier started");
    }

    Ok(SUCCESS)
}
