// End-to-end tests for the `tally` binary: exit codes, the --json stdout
// contract, and CSV exports.
//
// Run with: cargo test -p tally-cli --test cli_tests -- --nocapture

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn tally() -> Command {
    Command::new(env!("CARGO_BIN_EXE_tally"))
}

const POS_CSV: &str = "\
transaction_id,card_number,amount,timestamp
T-1,GC-1,25.00,2026-03-01 09:00:00
T-2,GC-2,10.00,2026-03-01 09:05:00
";

const PROCESSOR_MATCHED: &str = "\
reference_id,card_id,amount,timestamp
T-1,GC-1,25.00,2026-03-01T09:00:02Z
T-2,GC-2,10.00,2026-03-01T09:05:01Z
";

const PROCESSOR_SHIFTED: &str = "\
reference_id,card_id,amount,timestamp
T-1,GC-1,25.00,2026-03-01T09:00:02Z
T-2,GC-2,100.00,2026-03-01T09:05:01Z
";

const CONFIG: &str = r#"
name = "cli test"

[input.pos]
file = "pos.csv"

[input.pos.columns]
reference_id = "transaction_id"
card_id = "card_number"

[input.processor]
file = "processor.csv"
"#;

/// Temp dir holding a config plus both CSVs.
fn workspace(processor_csv: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("pos.csv"), POS_CSV).unwrap();
    std::fs::write(dir.path().join("processor.csv"), processor_csv).unwrap();
    let config = dir.path().join("nightly.recon.toml");
    std::fs::write(&config, CONFIG).unwrap();
    (dir, config)
}

fn run_in(config: &Path, extra: &[&str]) -> Output {
    let mut cmd = tally();
    cmd.arg("run").arg(config).args(extra);
    cmd.output().expect("tally run")
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

// ===========================================================================
// Exit codes
// ===========================================================================

#[test]
fn clean_run_exits_zero() {
    let (_dir, config) = workspace(PROCESSOR_MATCHED);
    let out = run_in(&config, &[]);
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr(&out));
    assert!(stderr(&out).contains("2 matched"));
    assert!(out.stdout.is_empty(), "no --json, so stdout stays empty");
}

#[test]
fn discrepancies_exit_one() {
    let (_dir, config) = workspace(PROCESSOR_SHIFTED);
    let out = run_in(&config, &[]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("DECIMAL_SHIFT"), "stderr: {err}");
    assert!(err.contains("1 discrepant pair(s) found"));
}

#[test]
fn invalid_config_exits_three() {
    let (dir, _) = workspace(PROCESSOR_MATCHED);
    let bad = dir.path().join("bad.recon.toml");
    std::fs::write(&bad, "[tolerance]\namount_epsilon = -1\n").unwrap();

    let out = run_in(&bad, &[]);
    assert_eq!(out.status.code(), Some(3));
    assert!(stderr(&out).contains("amount_epsilon"));

    let out = tally().arg("validate").arg(&bad).output().unwrap();
    assert_eq!(out.status.code(), Some(3));
}

#[test]
fn missing_input_file_exits_four() {
    let (dir, config) = workspace(PROCESSOR_MATCHED);
    std::fs::remove_file(dir.path().join("processor.csv")).unwrap();
    let out = run_in(&config, &[]);
    assert_eq!(out.status.code(), Some(4));
    assert!(stderr(&out).contains("cannot read"));
}

#[test]
fn missing_column_exits_four_with_hint() {
    let (dir, config) = workspace("ref,card_id,amount,timestamp\nT-1,GC-1,25.00,2026-03-01T09:00:02Z\n");
    let out = run_in(&config, &[]);
    assert_eq!(out.status.code(), Some(4));
    let err = stderr(&out);
    assert!(err.contains("missing column 'reference_id'"), "stderr: {err}");
    assert!(err.contains("[input.processor.columns]"));
    drop(dir);
}

#[test]
fn short_row_is_counted_not_fatal() {
    let (_dir, config) = workspace(
        "reference_id,card_id,amount,timestamp\nT-1,GC-1,25.00,2026-03-01T09:00:02Z\nT-2,GC-2\n",
    );
    let out = run_in(&config, &[]);
    assert_eq!(out.status.code(), Some(1), "stderr: {}", stderr(&out));
    let err = stderr(&out);
    assert!(err.contains("1 unprocessable"), "stderr: {err}");
    assert!(err.contains("MISSING_IN_PROCESSOR"));
}

#[test]
fn verbose_logs_engine_progress() {
    let (_dir, config) = workspace(PROCESSOR_MATCHED);
    let out = tally()
        .arg("run")
        .arg(&config)
        .arg("--verbose")
        .env_remove("RUST_LOG")
        .env_remove("TALLY_LOG")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(0));
    assert!(stderr(&out).contains("normalized 2 POS / 2 processor records"));
}

#[test]
fn bad_arguments_exit_two() {
    let (_dir, config) = workspace(PROCESSOR_MATCHED);
    let out = run_in(&config, &["--as-of", "yesterday"]);
    assert_eq!(out.status.code(), Some(2));

    let out = run_in(&config, &["--partitions", "0"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn validate_reports_rule_order() {
    let (_dir, config) = workspace(PROCESSOR_MATCHED);
    let out = tally().arg("validate").arg(&config).output().unwrap();
    assert_eq!(out.status.code(), Some(0));
    let err = stderr(&out);
    assert!(err.contains("valid: 'cli test'"));
    assert!(err.contains("matched > decimal_shift > timing_mismatch"));
}

// ===========================================================================
// --json contract
// ===========================================================================

#[test]
fn json_stdout_is_single_value() {
    let (_dir, config) = workspace(PROCESSOR_SHIFTED);
    let out = run_in(
        &config,
        &["--json", "--as-of", "2026-03-02T06:00:00Z", "--snapshot-id", "snap-1"],
    );
    assert_eq!(out.status.code(), Some(1));

    let stdout = String::from_utf8_lossy(&out.stdout);
    let val: serde_json::Value = serde_json::from_str(stdout.trim())
        .unwrap_or_else(|e| panic!("stdout must be JSON: {e}\n{stdout}"));

    assert_eq!(val["config_name"], "cli test");
    assert_eq!(val["report"]["snapshot_id"], "snap-1");
    assert_eq!(val["report"]["generated_at"], "2026-03-02T06:00:00Z");
    assert_eq!(val["report"]["total_considered"], 2);
    assert_eq!(val["discrepancies"][0]["classification"], "DECIMAL_SHIFT");
    assert_eq!(val["discrepancies"][0]["delta"], 9000);
}

#[test]
fn same_as_of_gives_identical_output() {
    let (dir, config) = workspace(PROCESSOR_SHIFTED);
    let a = dir.path().join("a.json");
    let b = dir.path().join("b.json");
    let args = |p: &Path| {
        vec![
            "--as-of".to_string(),
            "2026-03-02T06:00:00Z".to_string(),
            "--output".to_string(),
            p.display().to_string(),
        ]
    };

    let arg_a = args(&a);
    let arg_b = args(&b);
    run_in(&config, &arg_a.iter().map(String::as_str).collect::<Vec<_>>());
    run_in(&config, &arg_b.iter().map(String::as_str).collect::<Vec<_>>());

    assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
}

// ===========================================================================
// Overrides and exports
// ===========================================================================

#[test]
fn flag_inputs_override_config() {
    let (dir, config) = workspace(PROCESSOR_SHIFTED);
    let fixed = dir.path().join("fixed.csv");
    std::fs::write(&fixed, PROCESSOR_MATCHED).unwrap();

    let out = run_in(&config, &["--processor", fixed.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr(&out));
}

#[test]
fn csv_exports_written() {
    let (dir, config) = workspace(PROCESSOR_SHIFTED);
    let report = dir.path().join("report.csv");
    let disc = dir.path().join("open.csv");
    let all = dir.path().join("all.csv");

    let out = run_in(
        &config,
        &[
            "--report-csv",
            report.to_str().unwrap(),
            "--discrepancies",
            disc.to_str().unwrap(),
            "--reconciled",
            all.to_str().unwrap(),
            "--partitions",
            "2",
        ],
    );
    assert_eq!(out.status.code(), Some(1));

    let report = std::fs::read_to_string(report).unwrap();
    assert_eq!(report.lines().count(), 8);
    assert!(report.contains("DECIMAL_SHIFT,1,9000,50.00"));

    let disc = std::fs::read_to_string(disc).unwrap();
    assert_eq!(disc.lines().count(), 2);
    assert!(disc.lines().nth(1).unwrap().starts_with("T-2,T-2,GC-2,1000,10000,9000,DECIMAL_SHIFT"));

    let all = std::fs::read_to_string(all).unwrap();
    assert_eq!(all.lines().count(), 3);
}
