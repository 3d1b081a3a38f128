use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceSystem {
    Pos,
    Processor,
}

impl SourceSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pos => "POS",
            Self::Processor => "PROCESSOR",
        }
    }
}

impl std::fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record as handed over by the retrieval layer, before validation.
///
/// Every field is optional text; the normalizer decides what is acceptable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub reference_id: Option<String>,
    pub card_id: Option<String>,
    pub amount: Option<String>,
    pub timestamp: Option<String>,
    pub batch_id: Option<String>,
    pub source_system: Option<String>,
}

/// Both sides of one snapshot, in the order the collaborator supplied them.
#[derive(Debug, Clone, Default)]
pub struct ReconInput {
    pub pos: Vec<RawRecord>,
    pub processor: Vec<RawRecord>,
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A validated, normalized record. Fields are private; once built it cannot
/// change.
///
/// The derived ordering is the canonical order used by the matcher:
/// reference_id, then timestamp, amount, card_id, batch_id, source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Transaction {
    reference_id: String,
    timestamp: DateTime<Utc>,
    amount: i64,
    card_id: String,
    batch_id: String,
    source_system: SourceSystem,
}

impl Transaction {
    pub fn new(
        source_system: SourceSystem,
        reference_id: impl Into<String>,
        card_id: impl Into<String>,
        amount: i64,
        timestamp: DateTime<Utc>,
        batch_id: impl Into<String>,
    ) -> Self {
        Self {
            reference_id: reference_id.into(),
            timestamp,
            amount,
            card_id: card_id.into(),
            batch_id: batch_id.into(),
            source_system,
        }
    }

    pub fn source_system(&self) -> SourceSystem {
        self.source_system
    }

    pub fn reference_id(&self) -> &str {
        &self.reference_id
    }

    pub fn card_id(&self) -> &str {
        &self.card_id
    }

    /// Amount in integer minor units.
    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Absolute distance between two timestamps, full precision.
    pub fn time_apart(&self, other: &Transaction) -> Duration {
        let gap = self.timestamp - other.timestamp;
        if gap < Duration::zero() {
            -gap
        } else {
            gap
        }
    }

    /// True when the timestamps are at most `window_secs` apart. Sub-second
    /// parts count: 120.001 s is outside a 120 s window.
    pub fn within_secs(&self, other: &Transaction, window_secs: i64) -> bool {
        let gap = self.time_apart(other);
        let whole = gap.num_seconds();
        whole < window_secs || (whole == window_secs && gap.subsec_nanos() == 0)
    }
}

/// A raw record that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub source_system: SourceSystem,
    /// Zero-based position in the supplied sequence.
    pub index: usize,
    pub reference_id: Option<String>,
    #[serde(serialize_with = "serialize_display")]
    pub error: ValidationError,
}

fn serialize_display<S: serde::Serializer>(
    err: &ValidationError,
    s: S,
) -> Result<S::Ok, S::Error> {
    s.collect_str(err)
}

/// Normalizer output: the two immutable sides plus everything rejected.
#[derive(Debug, Clone, Default)]
pub struct NormalizedInput {
    pub pos: Vec<Transaction>,
    pub processor: Vec<Transaction>,
    pub rejected: Vec<Rejection>,
}

impl NormalizedInput {
    pub fn rejected_count(&self, source: SourceSystem) -> usize {
        self.rejected.iter().filter(|r| r.source_system == source).count()
    }
}

// ---------------------------------------------------------------------------
// Pair matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    /// Paired on reference_id.
    Primary,
    /// Paired on card_id + amount inside the time window.
    Fallback,
    /// No counterpart.
    Unmatched,
}

impl std::fmt::Display for MatchConfidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Fallback => write!(f, "fallback"),
            Self::Unmatched => write!(f, "unmatched"),
        }
    }
}

/// Which transactions a pair holds. There is no empty variant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "sides", rename_all = "snake_case")]
pub enum Sides {
    Both { pos: Transaction, processor: Transaction },
    PosOnly { pos: Transaction },
    ProcessorOnly { processor: Transaction },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedPair {
    pub sides: Sides,
    pub confidence: MatchConfidence,
    /// Extra occurrence of an already-consumed reference_id.
    pub duplicate: bool,
}

impl MatchedPair {
    pub fn primary(pos: Transaction, processor: Transaction) -> Self {
        Self {
            sides: Sides::Both { pos, processor },
            confidence: MatchConfidence::Primary,
            duplicate: false,
        }
    }

    pub fn fallback(pos: Transaction, processor: Transaction) -> Self {
        Self {
            sides: Sides::Both { pos, processor },
            confidence: MatchConfidence::Fallback,
            duplicate: false,
        }
    }

    pub fn pos_only(pos: Transaction) -> Self {
        Self {
            sides: Sides::PosOnly { pos },
            confidence: MatchConfidence::Unmatched,
            duplicate: false,
        }
    }

    pub fn processor_only(processor: Transaction) -> Self {
        Self {
            sides: Sides::ProcessorOnly { processor },
            confidence: MatchConfidence::Unmatched,
            duplicate: false,
        }
    }

    /// A duplicate occurrence. It was found through the primary key, so it
    /// keeps primary confidence.
    pub fn duplicate(tx: Transaction) -> Self {
        let sides = match tx.source_system() {
            SourceSystem::Pos => Sides::PosOnly { pos: tx },
            SourceSystem::Processor => Sides::ProcessorOnly { processor: tx },
        };
        Self {
            sides,
            confidence: MatchConfidence::Primary,
            duplicate: true,
        }
    }

    pub fn pos(&self) -> Option<&Transaction> {
        match &self.sides {
            Sides::Both { pos, .. } | Sides::PosOnly { pos } => Some(pos),
            Sides::ProcessorOnly { .. } => None,
        }
    }

    pub fn processor(&self) -> Option<&Transaction> {
        match &self.sides {
            Sides::Both { processor, .. } | Sides::ProcessorOnly { processor } => Some(processor),
            Sides::PosOnly { .. } => None,
        }
    }

    pub fn both(&self) -> Option<(&Transaction, &Transaction)> {
        match &self.sides {
            Sides::Both { pos, processor } => Some((pos, processor)),
            _ => None,
        }
    }

    /// The reference the pair is reported under: POS side first.
    pub fn reference_id(&self) -> &str {
        match &self.sides {
            Sides::Both { pos, .. } | Sides::PosOnly { pos } => pos.reference_id(),
            Sides::ProcessorOnly { processor } => processor.reference_id(),
        }
    }

    /// processor_amount - pos_amount, absent sides counting as zero.
    /// Widened to `i128` so the difference of any two amounts is exact.
    pub fn delta(&self) -> i128 {
        let p = self.processor().map_or(0, |t| i128::from(t.amount()));
        let s = self.pos().map_or(0, |t| i128::from(t.amount()));
        p - s
    }

    /// Total order for output: reference, then sides, then flags.
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.reference_id()
            .cmp(other.reference_id())
            .then_with(|| self.sides.cmp(&other.sides))
            .then_with(|| self.confidence.cmp(&other.confidence))
            .then_with(|| self.duplicate.cmp(&other.duplicate))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchStats {
    pub primary: usize,
    pub fallback: usize,
    pub duplicates: usize,
    pub unmatched_pos: usize,
    pub unmatched_processor: usize,
}

impl MatchStats {
    pub fn merge(&mut self, other: &MatchStats) {
        self.primary += other.primary;
        self.fallback += other.fallback;
        self.duplicates += other.duplicates;
        self.unmatched_pos += other.unmatched_pos;
        self.unmatched_processor += other.unmatched_processor;
    }
}


// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancyType {
    Matched,
    MissingInProcessor,
    MissingInPos,
    AmountMismatch,
    DecimalShift,
    TimingMismatch,
    DoubleCharge,
}

impl DiscrepancyType {
    /// Every category, in report order.
    pub const ALL: [DiscrepancyType; 7] = [
        Self::Matched,
        Self::MissingInProcessor,
        Self::MissingInPos,
        Self::AmountMismatch,
        Self::DecimalShift,
        Self::TimingMismatch,
        Self::DoubleCharge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Matched => "MATCHED",
            Self::MissingInProcessor => "MISSING_IN_PROCESSOR",
            Self::MissingInPos => "MISSING_IN_POS",
            Self::AmountMismatch => "AMOUNT_MISMATCH",
            Self::DecimalShift => "DECIMAL_SHIFT",
            Self::TimingMismatch => "TIMING_MISMATCH",
            Self::DoubleCharge => "DOUBLE_CHARGE",
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched)
    }
}

impl std::fmt::Display for DiscrepancyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pair with its one and only classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedPair {
    pub pair: MatchedPair,
    pub discrepancy: DiscrepancyType,
    pub delta: i128,
}

/// Flat row for the discrepancy export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscrepancyRecord {
    pub reference_id: String,
    pub processor_reference_id: Option<String>,
    pub card_id: String,
    pub pos_amount: Option<i64>,
    pub processor_amount: Option<i64>,
    pub delta: i128,
    pub classification: DiscrepancyType,
    pub match_confidence: MatchConfidence,
    pub pos_timestamp: Option<String>,
    pub processor_timestamp: Option<String>,
}

impl From<&ClassifiedPair> for DiscrepancyRecord {
    fn from(c: &ClassifiedPair) -> Self {
        let pos = c.pair.pos();
        let processor = c.pair.processor();
        let card_id = pos
            .or(processor)
            .map(|t| t.card_id().to_string())
            .unwrap_or_default();
        Self {
            reference_id: c.pair.reference_id().to_string(),
            processor_reference_id: processor.map(|t| t.reference_id().to_string()),
            card_id,
            pos_amount: pos.map(|t| t.amount()),
            processor_amount: processor.map(|t| t.amount()),
            delta: c.delta,
            classification: c.discrepancy,
            match_confidence: c.pair.confidence,
            pos_timestamp: pos.map(|t| t.timestamp().to_rfc3339()),
            processor_timestamp: processor.map(|t| t.timestamp().to_rfc3339()),
        }
    }
}
