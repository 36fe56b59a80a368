use porp_frame::{DEFAULT_MAX_FRAME, MAX_DATAGRAM_PAYLOAD};
use porp_transport::SerialConfig;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("porp {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: porp");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target: {}-{}", std::env::consts::ARCH, std::env::consts::OS);
    println!("default_baud: {}", SerialConfig::default().baud);
    println!("max_datagram_payload: {MAX_DATAGRAM_PAYLOAD}");
    println!("frame_size_cap: {DEFAULT_MAX_FRAME}");
    println!("log_env_var: PORP_LOG");

    Ok(SUCCESS)
}
