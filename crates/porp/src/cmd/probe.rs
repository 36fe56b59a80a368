use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use porp_link::{
    get_channel_mode, get_rx_gain, get_threshold, get_version_info, query_channel_quality, Channel,
};

use crate::cmd::{open_channel, ProbeArgs};
use crate::exit::{link_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

#[derive(Serialize)]
struct ProbeOutput {
    version: String,
    channel_mode: u16,
    rx_gain: u16,
    threshold: u16,
    avg_strength: f64,
    min_strength: f64,
    detected_errors: u64,
    coding_mode: String,
}

fn probe(channel: &Channel) -> Result<ProbeOutput, porp_link::LinkError> {
    let quality = query_channel_quality(channel)?;
    Ok(ProbeOutput {
        version: get_version_info(channel)?,
        channel_mode: get_channel_mode(channel)?,
        rx_gain: get_rx_gain(channel)?,
        threshold: get_threshold(channel)?,
        avg_strength: quality.avg_strength,
        min_strength: quality.min_strength,
        detected_errors: quality.detected_errors,
        coding_mode: format!("{:#010x}", quality.coding_mode),
    })
}

pub fn run(args: ProbeArgs, format: OutputFormat) -> CliResult<i32> {
    let channel = open_channel(&args.port, args.baud)?;
    let out = probe(&channel).map_err(|err| link_error("probe failed", err))?;

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            table.add_row(vec!["version".to_string(), out.version.clone()]);
            table.add_row(vec!["channel mode".to_string(), out.channel_mode.to_string()]);
            table.add_row(vec!["rx gain".to_string(), out.rx_gain.to_string()]);
            table.add_row(vec!["threshold".to_string(), out.threshold.to_string()]);
            table.add_row(vec![
                "avg strength".to_string(),
                format!("{:.4}", out.avg_strength),
            ]);
            table.add_row(vec![
                "min strength".to_string(),
                format!("{:.4}", out.min_strength),
            ]);
            table.add_row(vec![
                "detected errors".to_string(),
                out.detected_errors.to_string(),
            ]);
            table.add_row(vec!["coding mode".to_string(), out.coding_mode.clone()]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!("version: {}", out.version);
            println!("channel mode: {}", out.channel_mode);
            println!("rx gain: {}", out.rx_gain);
            println!("threshold: {}", out.threshold);
            println!("avg strength: {:.4}", out.avg_strength);
            println!("min strength: {:.4}", out.min_strength);
            println!("detected errors: {}", out.detected_errors);
            println!("coding mode: {}", out.coding_mode);
        }
    }

    Ok(SUCCESS)
}
