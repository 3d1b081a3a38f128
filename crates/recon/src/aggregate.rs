use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{ClassifiedPair, DiscrepancyType, SourceSystem};

pub const DELTA_CONVENTION: &str = "processor_minus_pos";

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryTotals {
    pub count: usize,
    pub total_delta: i128,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SideTally {
    /// Raw records supplied for this side.
    pub input: usize,
    /// Normalized records that ended up in a pair.
    pub in_pairs: usize,
    pub unprocessable: usize,
    /// Sum of normalized amounts, minor units.
    pub amount_total: i128,
}

impl SideTally {
    fn merge(&mut self, other: &SideTally) {
        self.input += other.input;
        self.in_pairs += other.in_pairs;
        self.unprocessable += other.unprocessable;
        self.amount_total += other.amount_total;
    }
}

/// Running per-category totals. Partial accumulators from independent
/// partitions combine with [`Accumulator::merge`]; the result does not depend
/// on merge order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accumulator {
    categories: BTreeMap<DiscrepancyType, CategoryTotals>,
    perfectly_matched: usize,
    pos: SideTally,
    processor: SideTally,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, classified: &ClassifiedPair) {
        let totals = self.categories.entry(classified.discrepancy).or_default();
        totals.count += 1;
        totals.total_delta += classified.delta;

        if classified.pair.both().is_some() && classified.delta == 0 {
            self.perfectly_matched += 1;
        }
        if let Some(tx) = classified.pair.pos() {
            self.pos.in_pairs += 1;
            self.pos.amount_total += i128::from(tx.amount());
        }
        if let Some(tx) = classified.pair.processor() {
            self.processor.in_pairs += 1;
            self.processor.amount_total += i128::from(tx.amount());
        }
    }

    pub fn add_all<'a>(&mut self, pairs: impl IntoIterator<Item = &'a ClassifiedPair>) {
        for p in pairs {
            self.add(p);
        }
    }

    pub fn record_input(&mut self, side: SourceSystem, count: usize) {
        self.side_mut(side).input += count;
    }

    pub fn record_unprocessable(&mut self, side: SourceSystem) {
        self.side_mut(side).unprocessable += 1;
    }

    pub fn merge(&mut self, other: &Accumulator) {
        for (kind, totals) in &other.categories {
            let mine = self.categories.entry(*kind).or_default();
            mine.count += totals.count;
            mine.total_delta += totals.total_delta;
        }
        self.perfectly_matched += other.perfectly_matched;
        self.pos.merge(&other.pos);
        self.processor.merge(&other.processor);
    }

    pub fn totals(&self, kind: DiscrepancyType) -> CategoryTotals {
        self.categories.get(&kind).copied().unwrap_or_default()
    }

    fn side_mut(&mut self, side: SourceSystem) -> &mut SideTally {
        match side {
            SourceSystem::Pos => &mut self.pos,
            SourceSystem::Processor => &mut self.processor,
        }
    }

    pub fn finish(self, snapshot: SnapshotInfo) -> ReconReport {
        let total_considered: usize = self.categories.values().map(|t| t.count).sum();
        let matched_count = self.totals(DiscrepancyType::Matched).count;

        let match_rate = if total_considered == 0 {
            MatchRate::Undefined
        } else {
            MatchRate::Defined {
                value: matched_count as f64 / total_considered as f64,
            }
        };

        let categories = DiscrepancyType::ALL
            .iter()
            .map(|&kind| {
                let t = self.totals(kind);
                CategoryRow {
                    category: kind,
                    count: t.count,
                    total_amount: t.total_delta,
                    percent_of_total: match match_rate {
                        MatchRate::Undefined => None,
                        MatchRate::Defined { .. } => {
                            Some(t.count as f64 * 100.0 / total_considered as f64)
                        }
                    },
                }
            })
            .collect::<Vec<_>>();

        let net_difference = categories
            .iter()
            .filter(|r| !r.category.is_matched())
            .map(|r| r.total_amount)
            .sum::<i128>();

        ReconReport {
            snapshot_id: snapshot.snapshot_id,
            generated_at: snapshot.generated_at,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            delta_convention: DELTA_CONVENTION.to_string(),
            categories,
            total_considered,
            matched_count,
            perfectly_matched: self.perfectly_matched,
            match_rate,
            net_difference,
            unprocessable: self.pos.unprocessable + self.processor.unprocessable,
            pos: self.pos,
            processor: self.processor,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub snapshot_id: String,
    pub generated_at: DateTime<Utc>,
}

/// matched / total_considered, or an explicit flag when nothing was
/// considered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchRate {
    Defined { value: f64 },
    Undefined,
}

impl MatchRate {
    pub fn value(&self) -> Option<f64> {
        match self {
            MatchRate::Defined { value } => Some(*value),
            MatchRate::Undefined => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, MatchRate::Undefined)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryRow {
    pub category: DiscrepancyType,
    pub count: usize,
    /// Summed delta for the category, minor units.
    pub total_amount: i128,
    pub percent_of_total: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconReport {
    pub snapshot_id: String,
    pub generated_at: DateTime<Utc>,
    pub engine_version: String,
    pub delta_convention: String,
    pub categories: Vec<CategoryRow>,
    pub total_considered: usize,
    pub matched_count: usize,
    pub perfectly_matched: usize,
    pub match_rate: MatchRate,
    pub net_difference: i128,
    pub unprocessable: usize,
    pub pos: SideTally,
    pub processor: SideTally,
}

impl ReconReport {
    pub fn category(&self, kind: DiscrepancyType) -> Option<&CategoryRow> {
        self.categories.iter().find(|r| r.category == kind)
    }

    pub fn count(&self, kind: DiscrepancyType) -> usize {
        self.category(kind).map_or(0, |r| r.count)
    }

    pub fn has_discrepancies(&self) -> bool {
        self.categories
            .iter()
            .any(|r| !r.category.is_matched() && r.count > 0)
    }

    /// Human-readable summary, one line per entry.
    pub fn summary_lines(&self) -> Vec<String> {
        let rate = match self.match_rate {
            MatchRate::Defined { value } => format!("{:.2}%", value * 100.0),
            MatchRate::Undefined => "undefined".to_string(),
        };
        let mut lines = vec![format!(
            "recon {}: {} pairs, {} matched ({}), {} unprocessable",
            self.snapshot_id, self.total_considered, self.matched_count, rate, self.unprocessable,
        )];
        for row in &self.categories {
            if row.count == 0 {
                continue;
            }
            lines.push(format!(
                "  {:<22} {:>7}  delta {}",
                row.category.as_str(),
                row.count,
                format_minor(row.total_amount),
            ));
        }
        lines.push(format!(
            "net difference: {} ({})",
            format_minor(self.net_difference),
            self.delta_convention,
        ));
        lines.push(format!(
            "source totals: pos {}, processor {}, pos minus processor {}; {} perfectly matched",
            self.pos.amount_total,
            self.processor.amount_total,
            format_minor(self.pos.amount_total - self.processor.amount_total),
            self.perfectly_matched,
        ));
        lines.push(format!(
            "pos: {} in / {} paired / {} rejected; processor: {} in / {} paired / {} rejected",
            self.pos.input,
            self.pos.in_pairs,
            self.pos.unprocessable,
            self.processor.input,
            self.processor.in_pairs,
            self.processor.unprocessable,
        ));
        lines
    }
}

fn format_minor(v: i128) -> String {
    if v > 0 {
        format!("+{v}")
    } else {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MatchedPair, Transaction};
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn tx(side: SourceSystem, reference: &str, amount: i64) -> Transaction {
        Transaction::new(side, reference, "C1", amount, ts(), "B1")
    }

    fn classified(pair: MatchedPair, kind: DiscrepancyType) -> ClassifiedPair {
        let delta = pair.delta();
        ClassifiedPair { pair, discrepancy: kind, delta }
    }

    fn snapshot() -> SnapshotInfo {
        SnapshotInfo {
            snapshot_id: "test".into(),
            generated_at: ts(),
        }
    }

    fn sample() -> Vec<ClassifiedPair> {
        vec![
            classified(
                MatchedPair::primary(tx(SourceSystem::Pos, "R1", 1000), tx(SourceSystem::Processor, "R1", 1000)),
                DiscrepancyType::Matched,
            ),
            classified(
                MatchedPair::primary(tx(SourceSystem::Pos, "R2", 1000), tx(SourceSystem::Processor, "R2", 10000)),
                DiscrepancyType::DecimalShift,
            ),
            classified(
                MatchedPair::pos_only(tx(SourceSystem::Pos, "R3", 250)),
                DiscrepancyType::MissingInProcessor,
            ),
            classified(
                MatchedPair::duplicate(tx(SourceSystem::Processor, "R1", 1000)),
                DiscrepancyType::DoubleCharge,
            ),
        ]
    }

    #[test]
    fn totals_and_rate() {
        let mut acc = Accumulator::new();
        acc.add_all(&sample());
        let report = acc.finish(snapshot());

        assert_eq!(report.total_considered, 4);
        assert_eq!(report.matched_count, 1);
        assert_eq!(report.perfectly_matched, 1);
        assert_eq!(report.match_rate, MatchRate::Defined { value: 0.25 });
        assert_eq!(report.count(DiscrepancyType::DecimalShift), 1);
        assert_eq!(report.category(DiscrepancyType::DecimalShift).unwrap().total_amount, 9000);
        // 9000 - 250 + 1000
        assert_eq!(report.net_difference, 9750);
        assert_eq!(report.pos.in_pairs, 3);
        assert_eq!(report.processor.in_pairs, 3);
        assert_eq!(report.pos.amount_total, 2250);
        assert!(report.has_discrepancies());
    }

    #[test]
    fn all_categories_listed_in_order() {
        let report = Accumulator::new().finish(snapshot());
        let order: Vec<_> = report.categories.iter().map(|r| r.category).collect();
        assert_eq!(order, DiscrepancyType::ALL.to_vec());
    }

    #[test]
    fn empty_run_has_undefined_rate() {
        let report = Accumulator::new().finish(snapshot());
        assert!(report.match_rate.is_undefined());
        assert_eq!(report.match_rate.value(), None);
        assert_eq!(report.total_considered, 0);
        assert_eq!(report.net_difference, 0);
        assert!(report.categories.iter().all(|r| r.count == 0 && r.percent_of_total.is_none()));
        assert!(!report.has_discrepancies());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["match_rate"]["status"], "undefined");
    }

    #[test]
    fn percent_of_total() {
        let mut acc = Accumulator::new();
        acc.add_all(&sample());
        let report = acc.finish(snapshot());
        let matched = report.category(DiscrepancyType::Matched).unwrap();
        assert_eq!(matched.percent_of_total, Some(25.0));
        let timing = report.category(DiscrepancyType::TimingMismatch).unwrap();
        assert_eq!(timing.percent_of_total, Some(0.0));
    }

    #[test]
    fn merge_equals_single_pass() {
        let pairs = sample();
        let mut whole = Accumulator::new();
        whole.add_all(&pairs);
        whole.record_unprocessable(SourceSystem::Pos);

        let mut left = Accumulator::new();
        left.add_all(&pairs[..2]);
        let mut right = Accumulator::new();
        right.add_all(&pairs[2..]);
        right.record_unprocessable(SourceSystem::Pos);

        let mut merged = right.clone();
        merged.merge(&left);
        assert_eq!(merged, whole);

        left.merge(&right);
        assert_eq!(left, whole);
    }

    #[test]
    fn unprocessable_counted_per_side() {
        let mut acc = Accumulator::new();
        acc.record_input(SourceSystem::Processor, 3);
        acc.record_unprocessable(SourceSystem::Processor);
        acc.record_unprocessable(SourceSystem::Processor);
        let report = acc.finish(snapshot());
        assert_eq!(report.unprocessable, 2);
        assert_eq!(report.processor.input, 3);
        assert_eq!(report.processor.unprocessable, 2);
        assert_eq!(report.pos.unprocessable, 0);
    }

    #[test]
    fn summary_mentions_categories() {
        let mut acc = Accumulator::new();
        acc.add_all(&sample());
        let lines = acc.finish(snapshot()).summary_lines();
        assert!(lines[0].contains("4 pairs"));
        assert!(lines.iter().any(|l| l.contains("DECIMAL_SHIFT")));
        assert!(!lines.iter().any(|l| l.contains("TIMING_MISMATCH")));
        assert!(lines.iter().any(|l| l.contains("net difference: +9750")));
        assert!(lines.iter().any(|l| l.starts_with("source totals:")));
    }
}
