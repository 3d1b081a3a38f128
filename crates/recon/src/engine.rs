use std::thread;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::aggregate::{Accumulator, ReconReport, SnapshotInfo};
use crate::classify::Cascade;
use crate::config::{ReconConfig, SourceConfig};
use crate::error::{ConfigurationError, ReconError};
use crate::matcher::{match_fallback, match_primary};
use crate::model::{
    ClassifiedPair, DiscrepancyRecord, MatchStats, NormalizedInput, RawRecord, ReconInput,
    Rejection, SourceSystem, Transaction,
};
use crate::normalize::normalize;
use crate::partition::partition;
use crate::tolerance::Tolerance;

/// Per-run settings that are not part of the reconciliation config.
///
/// The engine never reads the wall clock. `generated_at` is stamped into the
/// report as given, so two runs with the same options are byte-identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub generated_at: DateTime<Utc>,
    /// Overrides the content fingerprint.
    pub snapshot_id: Option<String>,
    /// Overrides `matching.partitions`.
    pub partitions: Option<usize>,
}

impl RunOptions {
    pub fn at(generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            snapshot_id: None,
            partitions: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconResult {
    pub config_name: String,
    pub report: ReconReport,
    pub match_stats: MatchStats,
    /// Every pair not classified MATCHED, canonical order.
    pub discrepancies: Vec<DiscrepancyRecord>,
    pub rejected: Vec<Rejection>,
    /// All classified pairs, canonical order.
    #[serde(skip)]
    pub pairs: Vec<ClassifiedPair>,
}

impl ReconResult {
    pub fn summary_text(&self) -> String {
        self.report.summary_lines().join("\n")
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Reconcile one snapshot.
///
/// Configuration is checked before anything else; an invalid config fails
/// the run with no partial output.
pub fn run(
    config: &ReconConfig,
    input: &ReconInput,
    options: &RunOptions,
) -> Result<ReconResult, ReconError> {
    config.validate()?;
    let partitions = options.partitions.unwrap_or(config.matching.partitions);
    if partitions == 0 {
        return Err(ConfigurationError::InvalidPartitions(0).into());
    }

    let normalized = normalize(&input.pos, &input.processor, &config.input);
    log::info!(
        "normalized {} POS / {} processor records ({} rejected)",
        normalized.pos.len(),
        normalized.processor.len(),
        normalized.rejected.len(),
    );
    if !normalized.rejected.is_empty() {
        log::warn!(
            "{} POS / {} processor record(s) unprocessable and excluded from matching",
            normalized.rejected_count(SourceSystem::Pos),
            normalized.rejected_count(SourceSystem::Processor),
        );
    }

    let snapshot_id = options
        .snapshot_id
        .clone()
        .unwrap_or_else(|| snapshot_fingerprint(&normalized));

    let tolerance = Tolerance::from_config(&config.tolerance);
    let cascade = Cascade::from_config(config);

    let mut outcome = if partitions == 1 {
        run_partition(&normalized.pos, &normalized.processor, &tolerance, &cascade)
    } else {
        run_partitioned(&normalized, partitions, &tolerance, &cascade)?
    };

    let (fallback_pairs, fallback_stats) = match_fallback(
        &outcome.residual_pos,
        &outcome.residual_processor,
        &tolerance,
        config.matching.fallback_window_secs,
    );
    outcome.stats.merge(&fallback_stats);
    for pair in cascade.classify_all(fallback_pairs) {
        outcome.accumulator.add(&pair);
        outcome.classified.push(pair);
    }

    let stats = outcome.stats;
    log::info!(
        "matched {} primary, {} fallback, {} duplicate, {} POS-only, {} processor-only",
        stats.primary,
        stats.fallback,
        stats.duplicates,
        stats.unmatched_pos,
        stats.unmatched_processor,
    );

    let mut accumulator = outcome.accumulator;
    accumulator.record_input(SourceSystem::Pos, input.pos.len());
    accumulator.record_input(SourceSystem::Processor, input.processor.len());
    for rejection in &normalized.rejected {
        accumulator.record_unprocessable(rejection.source_system);
    }

    let report = accumulator.finish(SnapshotInfo {
        snapshot_id,
        generated_at: options.generated_at,
    });

    let mut pairs = outcome.classified;
    pairs.sort_by(|a, b| a.pair.canonical_cmp(&b.pair));
    let discrepancies = pairs
        .iter()
        .filter(|p| !p.discrepancy.is_matched())
        .map(DiscrepancyRecord::from)
        .collect();

    if let Some(line) = report.summary_lines().first() {
        log::info!("{line}");
    }

    Ok(ReconResult {
        config_name: config.name.clone(),
        report,
        match_stats: stats,
        discrepancies,
        rejected: normalized.rejected,
        pairs,
    })
}

/// Primary matching, classification and accumulation for one partition.
/// Fallback-eligible leftovers are handed back for the global pass.
#[derive(Debug, Default)]
struct PartitionOutcome {
    classified: Vec<ClassifiedPair>,
    residual_pos: Vec<Transaction>,
    residual_processor: Vec<Transaction>,
    stats: MatchStats,
    accumulator: Accumulator,
}

impl PartitionOutcome {
    fn merge(mut self, other: PartitionOutcome) -> PartitionOutcome {
        self.classified.extend(other.classified);
        self.residual_pos.extend(other.residual_pos);
        self.residual_processor.extend(other.residual_processor);
        self.stats.merge(&other.stats);
        self.accumulator.merge(&other.accumulator);
        self
    }
}

fn run_partition(
    pos: &[Transaction],
    processor: &[Transaction],
    tolerance: &Tolerance,
    cascade: &Cascade,
) -> PartitionOutcome {
    let primary = match_primary(pos, processor, tolerance);
    let classified = cascade.classify_all(primary.pairs);
    let mut accumulator = Accumulator::new();
    accumulator.add_all(&classified);
    PartitionOutcome {
        classified,
        residual_pos: primary.residual_pos,
        residual_processor: primary.residual_processor,
        stats: primary.stats,
        accumulator,
    }
}

fn run_partitioned(
    normalized: &NormalizedInput,
    count: usize,
    tolerance: &Tolerance,
    cascade: &Cascade,
) -> Result<PartitionOutcome, ReconError> {
    // Never more partitions than transactions; empty ones get no worker.
    let count = count.min(normalized.pos.len() + normalized.processor.len());
    let parts: Vec<_> = partition(&normalized.pos, &normalized.processor, count)
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect();
    log::info!(
        "matching {} partition(s), sizes {:?}",
        parts.len(),
        parts.iter().map(|p| p.len()).collect::<Vec<_>>(),
    );

    let outcomes = thread::scope(|scope| {
        let handles: Vec<_> = parts
            .iter()
            .map(|part| {
                scope.spawn(move || run_partition(&part.pos, &part.processor, tolerance, cascade))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().map_err(|e| ReconError::Worker(panic_message(e.as_ref()))))
            .collect::<Result<Vec<_>, _>>()
    })?;

    Ok(outcomes
        .into_iter()
        .fold(PartitionOutcome::default(), PartitionOutcome::merge))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

// ---------------------------------------------------------------------------
// Snapshot fingerprint
// ---------------------------------------------------------------------------

/// SHA-256 over the normalized content, independent of input order.
///
/// Lines are canonical JSON per transaction, POS then processor, each side
/// sorted; rejections contribute a sorted (side, reference, reason) marker.
/// Joined by `\n`, no trailing newline.
pub fn snapshot_fingerprint(normalized: &NormalizedInput) -> String {
    let mut pos: Vec<&Transaction> = normalized.pos.iter().collect();
    pos.sort();
    let mut processor: Vec<&Transaction> = normalized.processor.iter().collect();
    processor.sort();

    let mut rejected: Vec<String> = normalized
        .rejected
        .iter()
        .map(|r| {
            format!(
                "!{}|{}|{}",
                r.source_system,
                r.reference_id.as_deref().unwrap_or(""),
                r.error
            )
        })
        .collect();
    rejected.sort();

    let lines = pos
        .into_iter()
        .chain(processor)
        .map(|tx| serde_json::to_string(tx).unwrap_or_default())
        .chain(rejected);

    let mut hasher = Sha256::new();
    for (i, line) in lines.enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        hasher.update(line.as_bytes());
    }
    format!("sha256:{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// CSV loading
// ---------------------------------------------------------------------------

/// Load one side's CSV into raw records through the source's column mapping.
///
/// `reference_id`, `amount` and `timestamp` must exist as columns; the other
/// mapped columns are read when present. No value is validated here: a short
/// row yields a record with its trailing fields absent, which the normalizer
/// then rejects.
pub fn load_csv_records(
    side: SourceSystem,
    csv_data: &str,
    source: &SourceConfig,
) -> Result<Vec<RawRecord>, ReconError> {
    let csv_err = |e: csv::Error| ReconError::Csv {
        side,
        message: e.to_string(),
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(csv_data.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let col = &source.columns;
    let find = |name: &str| headers.iter().position(|h| h == name);
    let required = |name: &str| {
        find(name).ok_or_else(|| ReconError::MissingColumn {
            side,
            column: name.into(),
        })
    };

    let reference_idx = required(&col.reference_id)?;
    let amount_idx = required(&col.amount)?;
    let timestamp_idx = required(&col.timestamp)?;
    let card_idx = find(&col.card_id);
    let batch_idx = find(&col.batch_id);
    let source_idx = find(&col.source_system);

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(csv_err)?;
        let field = |idx: Option<usize>| idx.and_then(|i| row.get(i)).map(str::to_string);
        records.push(RawRecord {
            reference_id: field(Some(reference_idx)),
            card_id: field(card_idx),
            amount: field(Some(amount_idx)),
            timestamp: field(Some(timestamp_idx)),
            batch_id: field(batch_idx),
            source_system: field(source_idx),
        });
    }

    log::debug!("{side}: loaded {} row(s)", records.len());
    Ok(records)
}
