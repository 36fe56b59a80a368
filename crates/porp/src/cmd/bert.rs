use porp_harness::{run_trial, PayloadPattern, TrialConfig, TrialReport};
use tracing::info;

use crate::cmd::{open_channel, parse_duration, BertArgs, PatternArg};
use crate::exit::{link_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_reports, OutputFormat};

pub fn run(args: BertArgs, format: OutputFormat) -> CliResult<i32> {
    let send_timeout = parse_duration(&args.send_timeout)?;
    let recv_timeout = parse_duration(&args.recv_timeout)?;

    let src = open_channel(&args.src_port, args.baud)?;
    let dst = open_channel(&args.dst_port, args.baud)?;

    // No modes requested: one pass in whatever mode the devices are in.
    let modes: Vec<Option<u16>> = if args.modes.is_empty() {
        vec![None]
    } else {
        args.modes.iter().copied().map(Some).collect()
    };

    let mut rows = Vec::new();
    let mut total = TrialReport::default();

    for repeat in 0..args.repeats.max(1) {
        for &mode in &modes {
            for &pattern_arg in &args.patterns {
                for pattern in expand_pattern(pattern_arg) {
                    let config = TrialConfig {
                        pattern: pattern.clone(),
                        limit: args.limit,
                        channel_mode: mode,
                        send_timeout,
                        recv_timeout,
                        seed: args.seed.wrapping_add(repeat as u64),
                    };
                    let report = run_trial(&src, &dst, &config)
                        .map_err(|err| link_error("trial failed", err))?;
                    total.merge(&report);
                    rows.push((trial_label(repeat, mode, &pattern), report));
                }
            }
        }
    }

    print_reports(&rows, &total, format);
    info!(
        attempts = total.attempts(),
        bit_errors = total.bit_errors,
        "suite finished"
    );

    Ok(if total.is_clean() { SUCCESS } else { FAILURE })
}

/// One CLI pattern name can stand for several concrete patterns; solid
/// runs both fill values because they stress opposite framing paths.
fn expand_pattern(arg: PatternArg) -> Vec<PayloadPattern> {
    match arg {
        PatternArg::Words => vec![PayloadPattern::Words],
        PatternArg::Random => vec![PayloadPattern::Random {
            min_len: 1,
            max_len: 64,
        }],
        PatternArg::RandomFixed => vec![PayloadPattern::RandomFixed { len: 64 }],
        PatternArg::Solid => vec![
            PayloadPattern::Solid { value: 0x00, len: 64 },
            PayloadPattern::Solid { value: 0xFF, len: 64 },
        ],
        PatternArg::Bitsweep => vec![PayloadPattern::BitSweep { len: 32 }],
    }
}

fn trial_label(repeat: usize, mode: Option<u16>, pattern: &PayloadPattern) -> String {
    let mode = match mode {
        Some(mode) => format!("mode {mode}"),
        None => "current mode".to_string(),
    };
    format!("#{repeat} {mode} {}", pattern.name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_expands_to_both_fill_values() {
        let patterns = expand_pattern(PatternArg::Solid);
        assert_eq!(patterns.len(), 2);
        assert!(matches!(patterns[0], PayloadPattern::Solid { value: 0x00, .. }));
        assert!(matches!(patterns[1], PayloadPattern::Solid { value: 0xFF, .. }));
    }

    #[test]
    fn labels_name_mode_and_pattern() {
        let label = trial_label(0, Some(4), &PayloadPattern::Words);
        assert_eq!(label, "#0 mode 4 words");
        let label = trial_label(1, None, &PayloadPattern::BitSweep { len: 8 });
        assert_eq!(label, "#1 current mode bitsweep");
    }
}
