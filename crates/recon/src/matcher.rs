use std::collections::{HashMap, HashSet};

use crate::model::{MatchStats, MatchedPair, Transaction};
use crate::tolerance::Tolerance;

/// Result of primary-key matching over one set (or one partition).
///
/// `residual_*` hold the transactions whose reference_id found no
/// counterpart at all; they are what fallback matching works on.
#[derive(Debug, Clone, Default)]
pub struct PrimaryOutcome {
    pub pairs: Vec<MatchedPair>,
    pub residual_pos: Vec<Transaction>,
    pub residual_processor: Vec<Transaction>,
    pub stats: MatchStats,
}

/// Pair on reference_id through a hash index.
///
/// Inside one reference group each POS transaction (canonical order) takes
/// the unconsumed processor entry with: equivalent amount first, then the
/// smallest timestamp gap, then canonical order. Whatever is left over in a
/// group that saw at least one hit is a duplicate occurrence.
pub fn match_primary(
    pos: &[Transaction],
    processor: &[Transaction],
    tolerance: &Tolerance,
) -> PrimaryOutcome {
    let mut pos_sorted: Vec<&Transaction> = pos.iter().collect();
    pos_sorted.sort();
    let mut proc_sorted: Vec<&Transaction> = processor.iter().collect();
    proc_sorted.sort();

    let mut index: HashMap<&str, Vec<usize>> = HashMap::with_capacity(proc_sorted.len());
    for (i, p) in proc_sorted.iter().enumerate() {
        index.entry(p.reference_id()).or_default().push(i);
    }

    let mut consumed = vec![false; proc_sorted.len()];
    let mut touched: HashSet<&str> = HashSet::new();
    let mut out = PrimaryOutcome::default();

    for pos_tx in pos_sorted {
        let Some(candidates) = index.get(pos_tx.reference_id()) else {
            out.residual_pos.push(pos_tx.clone());
            continue;
        };
        touched.insert(pos_tx.reference_id());

        let best = candidates
            .iter()
            .copied()
            .filter(|&i| !consumed[i])
            .min_by_key(|&i| {
                let p = proc_sorted[i];
                let amount_rank = if tolerance.compare(pos_tx.amount(), p.amount()).is_equivalent() {
                    0
                } else {
                    1
                };
                (amount_rank, pos_tx.time_apart(p), i)
            });

        match best {
            Some(i) => {
                consumed[i] = true;
                out.stats.primary += 1;
                out.pairs
                    .push(MatchedPair::primary(pos_tx.clone(), proc_sorted[i].clone()));
            }
            None => {
                out.stats.duplicates += 1;
                out.pairs.push(MatchedPair::duplicate(pos_tx.clone()));
            }
        }
    }

    for (i, p) in proc_sorted.iter().enumerate() {
        if consumed[i] {
            continue;
        }
        if touched.contains(p.reference_id()) {
            out.stats.duplicates += 1;
            out.pairs.push(MatchedPair::duplicate((*p).clone()));
        } else {
            out.residual_processor.push((*p).clone());
        }
    }

    out
}

/// Pair leftover POS transactions with leftover processor transactions that
/// share card_id and an equivalent amount within `window_secs`.
///
/// POS transactions are served in (timestamp, reference_id) order. Among
/// qualifying candidates the smallest timestamp gap wins, then the smallest
/// reference_id. Everything still unconsumed comes back single-sided.
pub fn match_fallback(
    pos: &[Transaction],
    processor: &[Transaction],
    tolerance: &Tolerance,
    window_secs: i64,
) -> (Vec<MatchedPair>, MatchStats) {
    let mut pos_sorted: Vec<&Transaction> = pos.iter().collect();
    pos_sorted.sort_by(|a, b| {
        a.timestamp()
            .cmp(&b.timestamp())
            .then_with(|| a.reference_id().cmp(b.reference_id()))
            .then_with(|| a.cmp(b))
    });
    let mut proc_sorted: Vec<&Transaction> = processor.iter().collect();
    proc_sorted.sort();

    let mut by_card: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, p) in proc_sorted.iter().enumerate() {
        if !p.card_id().is_empty() {
            by_card.entry(p.card_id()).or_default().push(i);
        }
    }

    let mut consumed = vec![false; proc_sorted.len()];
    let mut pairs = Vec::with_capacity(pos_sorted.len() + proc_sorted.len());
    let mut stats = MatchStats::default();

    for pos_tx in pos_sorted {
        let best = by_card.get(pos_tx.card_id()).and_then(|candidates| {
            candidates
                .iter()
                .copied()
                .filter(|&i| !consumed[i])
                .filter(|&i| {
                    let p = proc_sorted[i];
                    tolerance.compare(pos_tx.amount(), p.amount()).is_equivalent()
                        && pos_tx.within_secs(p, window_secs)
                })
                .min_by_key(|&i| {
                    let p = proc_sorted[i];
                    (pos_tx.time_apart(p), p.reference_id(), i)
                })
        });

        match best {
            Some(i) => {
                consumed[i] = true;
                stats.fallback += 1;
                pairs.push(MatchedPair::fallback(pos_tx.clone(), proc_sorted[i].clone()));
            }
            None => {
                stats.unmatched_pos += 1;
                pairs.push(MatchedPair::pos_only(pos_tx.clone()));
            }
        }
    }

    for (i, p) in proc_sorted.iter().enumerate() {
        if !consumed[i] {
            stats.unmatched_processor += 1;
            pairs.push(MatchedPair::processor_only((*p).clone()));
        }
    }

    (pairs, stats)
}
