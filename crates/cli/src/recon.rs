//! `tally run` / `tally validate`: config-driven POS ↔ processor reconciliation.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SubsecRound, Utc};
use clap::Subcommand;
use tally_recon::{load_csv_records, ReconConfig, ReconInput, RunOptions, SourceSystem};

use crate::exit_codes::{EXIT_RECON_DISCREPANCIES, EXIT_RECON_INVALID_CONFIG};
use crate::CliError;

#[derive(Subcommand)]
pub enum ReconCommands {
    /// Reconcile one snapshot from a TOML config file
    #[command(after_help = "\
Examples:
  tally run nightly.recon.toml
  tally run nightly.recon.toml --json
  tally run nightly.recon.toml --pos pos.csv --processor settlements.csv
  tally run nightly.recon.toml --discrepancies open-items.csv --as-of 2026-03-02T06:00:00Z")]
    Run {
        /// Path to the .recon.toml config file
        config: PathBuf,

        /// POS CSV (overrides input.pos.file)
        #[arg(long)]
        pos: Option<PathBuf>,

        /// Processor CSV (overrides input.processor.file)
        #[arg(long)]
        processor: Option<PathBuf>,

        /// Print the JSON result to stdout
        #[arg(long)]
        json: bool,

        /// Write the JSON result to a file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write discrepant pairs as CSV
        #[arg(long)]
        discrepancies: Option<PathBuf>,

        /// Write every classified pair as CSV
        #[arg(long)]
        reconciled: Option<PathBuf>,

        /// Write the per-category report as CSV
        #[arg(long)]
        report_csv: Option<PathBuf>,

        /// Snapshot identifier (default: content fingerprint)
        #[arg(long)]
        snapshot_id: Option<String>,

        /// Report timestamp, RFC 3339 (default: now)
        #[arg(long, value_parser = parse_as_of)]
        as_of: Option<DateTime<Utc>>,

        /// Partition count for parallel matching (overrides matching.partitions)
        #[arg(long)]
        partitions: Option<usize>,

        /// Log progress to stderr
        #[arg(long, short)]
        verbose: bool,
    },

    /// Validate a recon config without running
    #[command(after_help = "\
Examples:
  tally validate nightly.recon.toml")]
    Validate {
        /// Path to the .recon.toml config file
        config: PathBuf,
    },
}

impl ReconCommands {
    pub fn verbose(&self) -> bool {
        matches!(self, ReconCommands::Run { verbose: true, .. })
    }
}

pub fn cmd_recon(cmd: ReconCommands) -> Result<(), CliError> {
    match cmd {
        ReconCommands::Run {
            config,
            pos,
            processor,
            json,
            output,
            discrepancies,
            reconciled,
            report_csv,
            snapshot_id,
            as_of,
            partitions,
            verbose: _,
        } => cmd_run(RunArgs {
            config_path: config,
            pos,
            processor,
            json,
            output,
            discrepancies,
            reconciled,
            report_csv,
            snapshot_id,
            as_of,
            partitions,
        }),
        ReconCommands::Validate { config } => cmd_validate(config),
    }
}

fn parse_as_of(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected RFC 3339 timestamp: {e}"))
}

struct RunArgs {
    config_path: PathBuf,
    pos: Option<PathBuf>,
    processor: Option<PathBuf>,
    json: bool,
    output: Option<PathBuf>,
    discrepancies: Option<PathBuf>,
    reconciled: Option<PathBuf>,
    report_csv: Option<PathBuf>,
    snapshot_id: Option<String>,
    as_of: Option<DateTime<Utc>>,
    partitions: Option<usize>,
}

fn load_config(config_path: &Path) -> Result<ReconConfig, CliError> {
    let config_str = std::fs::read_to_string(config_path).map_err(|e| {
        CliError::runtime(format!("cannot read config {}: {e}", config_path.display()))
    })?;
    ReconConfig::from_toml(&config_str)
        .map_err(|e| CliError::new(EXIT_RECON_INVALID_CONFIG, e.to_string()))
}

/// Flag path as given, otherwise the config's file relative to the config's
/// directory.
fn resolve_input(
    config: &ReconConfig,
    config_path: &Path,
    side: SourceSystem,
    flag: Option<PathBuf>,
) -> Result<PathBuf, CliError> {
    if let Some(path) = flag {
        return Ok(path);
    }
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let flag_name = match side {
        SourceSystem::Pos => "--pos",
        SourceSystem::Processor => "--processor",
    };
    config
        .input
        .source(side)
        .file
        .as_deref()
        .map(|f| base_dir.join(f))
        .ok_or_else(|| {
            CliError::usage(format!("no {side} input file")).with_hint(format!(
                "set input.{}.file in the config or pass {flag_name}",
                side.as_str().to_ascii_lowercase()
            ))
        })
}

fn create(path: &Path) -> Result<BufWriter<File>, CliError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| CliError::runtime(format!("cannot create {}: {e}", path.display())))
}

fn cmd_run(args: RunArgs) -> Result<(), CliError> {
    let config = load_config(&args.config_path)?;

    if args.partitions == Some(0) {
        return Err(CliError::usage("--partitions must be at least 1"));
    }

    let mut input = ReconInput::default();
    for (side, flag) in [
        (SourceSystem::Pos, args.pos),
        (SourceSystem::Processor, args.processor),
    ] {
        let path = resolve_input(&config, &args.config_path, side, flag)?;
        log::info!("{side}: reading {}", path.display());
        let csv_data = std::fs::read_to_string(&path)
            .map_err(|e| CliError::runtime(format!("cannot read {}: {e}", path.display())))?;
        let records = load_csv_records(side, &csv_data, config.input.source(side))
            .map_err(CliError::recon)?;
        match side {
            SourceSystem::Pos => input.pos = records,
            SourceSystem::Processor => input.processor = records,
        }
    }

    let options = RunOptions {
        generated_at: args.as_of.unwrap_or_else(|| Utc::now().trunc_subsecs(0)),
        snapshot_id: args.snapshot_id,
        partitions: args.partitions,
    };

    let result = tally_recon::run(&config, &input, &options).map_err(CliError::recon)?;

    // Output
    let json_str = serde_json::to_string_pretty(&result)
        .map_err(|e| CliError::runtime(format!("JSON serialization error: {e}")))?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &json_str)
            .map_err(|e| CliError::runtime(format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if let Some(ref path) = args.report_csv {
        tally_recon::export::write_report_csv(&result.report, create(path)?)
            .map_err(CliError::recon)?;
        eprintln!("wrote {}", path.display());
    }

    if let Some(ref path) = args.discrepancies {
        tally_recon::export::write_discrepancies_csv(&result.discrepancies, create(path)?)
            .map_err(CliError::recon)?;
        eprintln!("wrote {}", path.display());
    }

    if let Some(ref path) = args.reconciled {
        tally_recon::export::write_reconciled_csv(&result.pairs, create(path)?)
            .map_err(CliError::recon)?;
        eprintln!("wrote {}", path.display());
    }

    if args.json {
        println!("{json_str}");
    }

    // Human summary to stderr
    eprintln!("{}", result.summary_text());

    if result.report.has_discrepancies() {
        let open = result.report.total_considered - result.report.matched_count;
        return Err(CliError::new(
            EXIT_RECON_DISCREPANCIES,
            format!("{open} discrepant pair(s) found"),
        ));
    }

    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let rules: Vec<String> = config
        .rules
        .order
        .iter()
        .filter(|kind| config.rules.is_enabled(**kind))
        .map(|kind| kind.to_string())
        .collect();
    eprintln!(
        "valid: '{}' (epsilon {}, window {}s, shift divisor {}, rules: {})",
        config.name,
        config.tolerance.amount_epsilon,
        config.matching.fallback_window_secs,
        config.tolerance.shift_divisor,
        rules.join(" > "),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_of_parses_rfc3339() {
        let dt = parse_as_of("2026-03-02T01:00:00-05:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-03-02T06:00:00+00:00");
        assert!(parse_as_of("yesterday").is_err());
    }

    #[test]
    fn input_resolves_relative_to_config() {
        let config = ReconConfig::from_toml("[input.pos]\nfile = \"pos.csv\"\n").unwrap();
        let path = resolve_input(&config, Path::new("/data/nightly.recon.toml"), SourceSystem::Pos, None)
            .unwrap();
        assert_eq!(path, PathBuf::from("/data/pos.csv"));

        let flag = resolve_input(
            &config,
            Path::new("/data/nightly.recon.toml"),
            SourceSystem::Pos,
            Some(PathBuf::from("other.csv")),
        )
        .unwrap();
        assert_eq!(flag, PathBuf::from("other.csv"));
    }

    #[test]
    fn missing_input_is_usage_error() {
        let config = ReconConfig::default();
        let err = resolve_input(&config, Path::new("x.toml"), SourceSystem::Processor, None)
            .unwrap_err();
        assert_eq!(err.code, crate::exit_codes::EXIT_USAGE);
        assert!(err.hint.unwrap().contains("--processor"));
    }
}
