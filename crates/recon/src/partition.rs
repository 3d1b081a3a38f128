//! Split a normalized snapshot into independent matching units.
//!
//! Two transactions land in the same partition whenever they share a
//! reference_id or a non-blank card_id, transitively. Neither key can span a
//! partition boundary, so primary matching inside each partition sees the
//! same reference groups a single full run would.

use std::collections::HashMap;

use crate::model::{SourceSystem, Transaction};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub pos: Vec<Transaction>,
    pub processor: Vec<Transaction>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.pos.len() + self.processor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pos.is_empty() && self.processor.is_empty()
    }
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

#[derive(Hash, PartialEq, Eq)]
enum Key<'a> {
    Reference(&'a str),
    Card(&'a str),
}

/// Assign every transaction to one of `count` partitions.
///
/// Components are placed largest first, each onto the currently smallest
/// partition (lowest index on ties), with ties between equal-size
/// components broken by their smallest transaction. The result depends only
/// on the set of transactions, never on input order.
pub fn partition(pos: &[Transaction], processor: &[Transaction], count: usize) -> Vec<Partition> {
    let count = count.max(1);
    let all: Vec<&Transaction> = pos.iter().chain(processor.iter()).collect();

    let mut sets = DisjointSet::new(all.len());
    let mut first_seen: HashMap<Key<'_>, usize> = HashMap::with_capacity(all.len() * 2);
    for (i, tx) in all.iter().enumerate() {
        let mut keys = vec![Key::Reference(tx.reference_id())];
        if !tx.card_id().is_empty() {
            keys.push(Key::Card(tx.card_id()));
        }
        for key in keys {
            match first_seen.get(&key) {
                Some(&j) => sets.union(i, j),
                None => {
                    first_seen.insert(key, i);
                }
            }
        }
    }

    let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..all.len() {
        let root = sets.find(i);
        components.entry(root).or_default().push(i);
    }

    let mut ordered: Vec<(usize, &Transaction, Vec<usize>)> = components
        .into_values()
        .filter_map(|members| {
            let smallest = members.iter().map(|&i| all[i]).min()?;
            Some((members.len(), smallest, members))
        })
        .collect();
    ordered.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));

    let mut out = vec![Partition::default(); count];
    for (_, _, members) in ordered {
        let target = (0..count)
            .min_by_key(|&p| (out[p].len(), p))
            .unwrap_or(0);
        for i in members {
            let tx = all[i].clone();
            match tx.source_system() {
                SourceSystem::Pos => out[target].pos.push(tx),
                SourceSystem::Processor => out[target].processor.push(tx),
            }
        }
    }

    for p in &mut out {
        p.pos.sort();
        p.processor.sort();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn tx(side: SourceSystem, reference: &str, card: &str) -> Transaction {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        Transaction::new(side, reference, card, 100, ts, "")
    }

    fn find(parts: &[Partition], reference: &str) -> Vec<usize> {
        parts
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                p.pos.iter().chain(p.processor.iter()).any(|t| t.reference_id() == reference)
            })
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn shared_keys_stay_together() {
        let pos = vec![
            tx(SourceSystem::Pos, "R1", "C1"),
            tx(SourceSystem::Pos, "R2", "C2"),
            tx(SourceSystem::Pos, "R3", "C3"),
        ];
        let processor = vec![
            tx(SourceSystem::Processor, "R1", "C9"),
            // joins R2's component through C2
            tx(SourceSystem::Processor, "X7", "C2"),
            tx(SourceSystem::Processor, "R4", "C4"),
        ];
        let parts = partition(&pos, &processor, 3);
        assert_eq!(parts.len(), 3);
        assert_eq!(find(&parts, "R1").len(), 1);
        assert_eq!(find(&parts, "R2"), find(&parts, "X7"));

        let total: usize = parts.iter().map(Partition::len).sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn blank_cards_do_not_link() {
        let pos = vec![tx(SourceSystem::Pos, "R1", ""), tx(SourceSystem::Pos, "R2", "")];
        let parts = partition(&pos, &[], 2);
        assert_eq!(parts[0].len(), 1);
        assert_eq!(parts[1].len(), 1);
    }

    #[test]
    fn single_partition_holds_everything() {
        let pos = vec![tx(SourceSystem::Pos, "R1", "C1"), tx(SourceSystem::Pos, "R2", "C2")];
        let parts = partition(&pos, &[], 1);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].pos.len(), 2);
    }

    #[test]
    fn zero_is_treated_as_one() {
        assert_eq!(partition(&[], &[], 0).len(), 1);
    }

    #[test]
    fn assignment_ignores_input_order() {
        let mut pos: Vec<_> = (0..20)
            .map(|i| tx(SourceSystem::Pos, &format!("R{i}"), &format!("C{}", i % 7)))
            .collect();
        let a = partition(&pos, &[], 4);
        pos.reverse();
        let b = partition(&pos, &[], 4);
        assert_eq!(a, b);
    }
}
