//! Discrepancy classification as an ordered cascade of pure rules.
//!
//! Each [`Rule`] is a predicate over one pair plus the category it assigns.
//! The cascade evaluates enabled rules in configured order and the first
//! predicate that holds decides the category.

use serde::{Deserialize, Serialize};

use crate::config::{ReconConfig, RulesConfig};
use crate::model::{ClassifiedPair, DiscrepancyType, MatchedPair, Sides};
use crate::tolerance::Tolerance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Matched,
    DecimalShift,
    TimingMismatch,
    AmountMismatch,
    DoubleCharge,
    Missing,
}

impl RuleKind {
    pub const DEFAULT_ORDER: [RuleKind; 6] = [
        Self::Matched,
        Self::DecimalShift,
        Self::TimingMismatch,
        Self::AmountMismatch,
        Self::DoubleCharge,
        Self::Missing,
    ];

    pub fn rule(self) -> Rule {
        match self {
            Self::Matched => Rule { kind: self, applies: amounts_equivalent },
            Self::DecimalShift => Rule { kind: self, applies: decimal_shift },
            Self::TimingMismatch => Rule { kind: self, applies: timing_mismatch },
            Self::AmountMismatch => Rule { kind: self, applies: amounts_differ },
            Self::DoubleCharge => Rule { kind: self, applies: flagged_duplicate },
            Self::Missing => Rule { kind: self, applies: one_side_only },
        }
    }

    /// Category this rule assigns to `pair`.
    pub fn category(self, pair: &MatchedPair) -> DiscrepancyType {
        match self {
            Self::Matched => DiscrepancyType::Matched,
            Self::DecimalShift => DiscrepancyType::DecimalShift,
            Self::TimingMismatch => DiscrepancyType::TimingMismatch,
            Self::AmountMismatch => DiscrepancyType::AmountMismatch,
            Self::DoubleCharge => DiscrepancyType::DoubleCharge,
            Self::Missing => missing_side(pair),
        }
    }
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Matched => write!(f, "matched"),
            Self::DecimalShift => write!(f, "decimal_shift"),
            Self::TimingMismatch => write!(f, "timing_mismatch"),
            Self::AmountMismatch => write!(f, "amount_mismatch"),
            Self::DoubleCharge => write!(f, "double_charge"),
            Self::Missing => write!(f, "missing"),
        }
    }
}

/// Inputs every rule predicate may consult.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext {
    pub tolerance: Tolerance,
    /// Timestamps further apart than this (seconds) are a timing problem.
    pub window_secs: i64,
}

impl RuleContext {
    pub fn from_config(config: &ReconConfig) -> Self {
        Self {
            tolerance: Tolerance::from_config(&config.tolerance),
            window_secs: config.matching.fallback_window_secs,
        }
    }
}

#[derive(Clone, Copy)]
pub struct Rule {
    pub kind: RuleKind,
    pub applies: fn(&MatchedPair, &RuleContext) -> bool,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("kind", &self.kind).finish()
    }
}

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

pub fn amounts_equivalent(pair: &MatchedPair, ctx: &RuleContext) -> bool {
    pair.both().map_or(false, |(pos, processor)| {
        ctx.tolerance
            .compare(pos.amount(), processor.amount())
            .is_equivalent()
    })
}

pub fn decimal_shift(pair: &MatchedPair, ctx: &RuleContext) -> bool {
    pair.both().map_or(false, |(pos, processor)| {
        ctx.tolerance.is_decimal_shift(pos.amount(), processor.amount())
    })
}

pub fn timing_mismatch(pair: &MatchedPair, ctx: &RuleContext) -> bool {
    pair.both().map_or(false, |(pos, processor)| {
        amounts_equivalent(pair, ctx) && !pos.within_secs(processor, ctx.window_secs)
    })
}

pub fn amounts_differ(pair: &MatchedPair, ctx: &RuleContext) -> bool {
    pair.both().is_some() && !amounts_equivalent(pair, ctx) && !decimal_shift(pair, ctx)
}

pub fn flagged_duplicate(pair: &MatchedPair, _ctx: &RuleContext) -> bool {
    pair.duplicate
}

pub fn one_side_only(pair: &MatchedPair, _ctx: &RuleContext) -> bool {
    pair.both().is_none()
}

fn missing_side(pair: &MatchedPair) -> DiscrepancyType {
    match pair.sides {
        Sides::ProcessorOnly { .. } => DiscrepancyType::MissingInPos,
        _ => DiscrepancyType::MissingInProcessor,
    }
}

// ---------------------------------------------------------------------------
// Cascade
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Cascade {
    rules: Vec<Rule>,
    ctx: RuleContext,
}

impl Cascade {
    /// Enabled rules in configured order. Expects a validated config.
    pub fn from_config(config: &ReconConfig) -> Self {
        Self::new(&config.rules, RuleContext::from_config(config))
    }

    pub fn new(rules: &RulesConfig, ctx: RuleContext) -> Self {
        let rules = rules
            .order
            .iter()
            .filter(|kind| rules.is_enabled(**kind))
            .map(|kind| kind.rule())
            .collect();
        Self { rules, ctx }
    }

    pub fn rules(&self) -> impl Iterator<Item = RuleKind> + '_ {
        self.rules.iter().map(|r| r.kind)
    }

    pub fn classify(&self, pair: MatchedPair) -> ClassifiedPair {
        let discrepancy = self
            .rules
            .iter()
            .find(|rule| (rule.applies)(&pair, &self.ctx))
            .map(|rule| rule.kind.category(&pair))
            .unwrap_or_else(|| structural_category(&pair, &self.ctx));
        let delta = pair.delta();
        ClassifiedPair {
            pair,
            discrepancy,
            delta,
        }
    }

    pub fn classify_all(&self, pairs: Vec<MatchedPair>) -> Vec<ClassifiedPair> {
        pairs.into_iter().map(|p| self.classify(p)).collect()
    }
}

/// Category implied by the pair's shape alone, used when no enabled rule
/// applies (a disabled decimal_shift rule, for one).
fn structural_category(pair: &MatchedPair, ctx: &RuleContext) -> DiscrepancyType {
    if pair.both().is_none() {
        missing_side(pair)
    } else if amounts_equivalent(pair, ctx) {
        DiscrepancyType::Matched
    } else {
        DiscrepancyType::AmountMismatch
    }
}
