use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};

use porp_link::{Channel, LinkConfig};
use porp_transport::{LinkStream, SerialConfig};

use crate::exit::{link_error, transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod bert;
pub mod listen;
pub mod probe;
pub mod send;
pub mod tone;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the bit-error-rate suite between two ports.
    Bert(BertArgs),
    /// Send a single datagram and require an acknowledgement.
    Send(SendArgs),
    /// Print incoming datagrams and their telemetry.
    Listen(ListenArgs),
    /// Query device identity and link quality.
    Probe(ProbeArgs),
    /// Control the CW test tone.
    Tone(ToneArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Bert(args) => bert::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Probe(args) => probe::run(args, format),
        Command::Tone(args) => tone::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PatternArg {
    Words,
    Random,
    RandomFixed,
    Solid,
    Bitsweep,
}

#[derive(Args, Debug)]
pub struct BertArgs {
    /// Sending port (serial device or socket path).
    pub src_port: PathBuf,
    /// Receiving port.
    pub dst_port: PathBuf,
    /// Serial baud rate.
    #[arg(long, default_value = "57600")]
    pub baud: u32,
    /// Channel modes to sweep (comma-separated). Empty: current mode.
    #[arg(long, value_delimiter = ',')]
    pub modes: Vec<u16>,
    /// Payload patterns to run.
    #[arg(long, value_delimiter = ',', default_values = ["words", "random"])]
    pub patterns: Vec<PatternArg>,
    /// Payloads per pattern.
    #[arg(long, default_value = "100")]
    pub limit: usize,
    /// Repetitions of the whole sweep.
    #[arg(long, default_value = "1")]
    pub repeats: usize,
    /// Random seed for the generated payloads.
    #[arg(long, default_value = "0")]
    pub seed: u64,
    /// Acknowledgement wait per datagram (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub send_timeout: String,
    /// Delivery wait per datagram at the far end.
    #[arg(long, default_value = "5s")]
    pub recv_timeout: String,
}

#[derive(Args, Debug)]
#[command(group(
    clap::ArgGroup::new("payload")
        .required(true)
        .args(["data", "hex", "file"])
))]
pub struct SendArgs {
    /// Port to send on (serial device or socket path).
    pub port: PathBuf,
    /// Serial baud rate.
    #[arg(long, default_value = "57600")]
    pub baud: u32,
    /// Raw string payload.
    #[arg(long)]
    pub data: Option<String>,
    /// Hex-encoded payload.
    #[arg(long)]
    pub hex: Option<String>,
    /// Read payload from file.
    #[arg(long)]
    pub file: Option<PathBuf>,
    /// Acknowledgement wait (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Port to listen on.
    pub port: PathBuf,
    /// Serial baud rate.
    #[arg(long, default_value = "57600")]
    pub baud: u32,
    /// Exit after printing N datagrams.
    #[arg(long)]
    pub count: Option<usize>,
    /// Give up after this long without a datagram.
    #[arg(long, default_value = "30s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Port to probe.
    pub port: PathBuf,
    /// Serial baud rate.
    #[arg(long, default_value = "57600")]
    pub baud: u32,
}

#[derive(Args, Debug)]
pub struct ToneArgs {
    /// Port of the transmitting device.
    pub port: PathBuf,
    /// Serial baud rate.
    #[arg(long, default_value = "57600")]
    pub baud: u32,
    /// Carrier frequency in kHz.
    #[arg(long, default_value = "10.0", conflicts_with = "off")]
    pub freq_khz: f64,
    /// Stop the tone instead of starting one.
    #[arg(long)]
    pub off: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Open a channel over `port`. A unix socket path gets a socket
/// connection (device emulators); anything else is treated as a serial
/// device.
pub fn open_channel(port: &Path, baud: u32) -> CliResult<Channel> {
    let stream = if is_socket(port) {
        LinkStream::connect_socket(port)
    } else {
        LinkStream::open_serial(port, SerialConfig { baud })
    }
    .map_err(|err| transport_error(&format!("open {} failed", port.display()), err))?;

    Channel::open(stream, LinkConfig::default())
        .map_err(|err| link_error(&format!("channel over {} failed", port.display()), err))
}

#[cfg(unix)]
fn is_socket(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::metadata(path)
        .map(|meta| meta.file_type().is_socket())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_socket(_path: &Path) -> bool {
    false
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}

pub fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.len() % 2 != 0 {
        return Err(CliError::new(
            USAGE,
            "hex payload must have an even number of digits",
        ));
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&cleaned[i..i + 2], 16)
                .map_err(|_| CliError::new(USAGE, format!("invalid hex payload: {input}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn parse_hex_accepts_spaced_pairs() {
        assert_eq!(parse_hex("de ad be ef").unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(parse_hex("0001").unwrap(), vec![0x00, 0x01]);
    }

    #[test]
    fn parse_hex_rejects_odd_and_bad_digits() {
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }
}
