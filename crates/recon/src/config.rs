use chrono::FixedOffset;
use serde::Deserialize;

use crate::classify::RuleKind;
use crate::error::ConfigurationError;
use crate::model::SourceSystem;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub tolerance: ToleranceConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub input: InputConfig,
}

fn default_name() -> String {
    "reconciliation".into()
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            tolerance: ToleranceConfig::default(),
            matching: MatchingConfig::default(),
            rules: RulesConfig::default(),
            input: InputConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tolerance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToleranceConfig {
    /// Largest difference, in minor units, still treated as equal.
    #[serde(default)]
    pub amount_epsilon: i64,
    #[serde(default = "default_shift_divisor")]
    pub shift_divisor: i64,
    /// Shifts by divisor^1 ..= divisor^max are recognized.
    #[serde(default = "default_shift_exponent")]
    pub max_shift_exponent: u32,
}

fn default_shift_divisor() -> i64 {
    10
}

fn default_shift_exponent() -> u32 {
    1
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            amount_epsilon: 0,
            shift_divisor: default_shift_divisor(),
            max_shift_exponent: default_shift_exponent(),
        }
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchingConfig {
    /// Fallback matching accepts candidates within +/- this many seconds.
    #[serde(default = "default_window_secs")]
    pub fallback_window_secs: i64,
    #[serde(default = "default_partitions")]
    pub partitions: usize,
}

fn default_window_secs() -> i64 {
    120
}

fn default_partitions() -> usize {
    1
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            fallback_window_secs: default_window_secs(),
            partitions: default_partitions(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesConfig {
    #[serde(default = "default_rule_order")]
    pub order: Vec<RuleKind>,
    #[serde(default = "enabled")]
    pub matched: bool,
    #[serde(default = "enabled")]
    pub decimal_shift: bool,
    #[serde(default = "enabled")]
    pub timing_mismatch: bool,
    #[serde(default = "enabled")]
    pub amount_mismatch: bool,
    #[serde(default = "enabled")]
    pub double_charge: bool,
    #[serde(default = "enabled")]
    pub missing: bool,
}

fn enabled() -> bool {
    true
}

fn default_rule_order() -> Vec<RuleKind> {
    RuleKind::DEFAULT_ORDER.to_vec()
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            order: default_rule_order(),
            matched: true,
            decimal_shift: true,
            timing_mismatch: true,
            amount_mismatch: true,
            double_charge: true,
            missing: true,
        }
    }
}

impl RulesConfig {
    pub fn is_enabled(&self, kind: RuleKind) -> bool {
        match kind {
            RuleKind::Matched => self.matched,
            RuleKind::DecimalShift => self.decimal_shift,
            RuleKind::TimingMismatch => self.timing_mismatch,
            RuleKind::AmountMismatch => self.amount_mismatch,
            RuleKind::DoubleCharge => self.double_charge,
            RuleKind::Missing => self.missing,
        }
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    /// Fractional digits per major unit in raw amounts. 0 = already minor units.
    #[serde(default = "default_amount_scale")]
    pub amount_scale: u32,
    #[serde(default = "SourceConfig::pos")]
    pub pos: SourceConfig,
    #[serde(default = "SourceConfig::processor")]
    pub processor: SourceConfig,
}

fn default_amount_scale() -> u32 {
    2
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            amount_scale: default_amount_scale(),
            pos: SourceConfig::pos(),
            processor: SourceConfig::processor(),
        }
    }
}

impl InputConfig {
    pub fn source(&self, source: SourceSystem) -> &SourceConfig {
        match source {
            SourceSystem::Pos => &self.pos,
            SourceSystem::Processor => &self.processor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    #[serde(default)]
    pub file: Option<String>,
    /// Offset applied to timestamps that carry no zone of their own.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub columns: ColumnMapping,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::pos()
    }
}

impl SourceConfig {
    fn pos() -> Self {
        Self {
            file: None,
            utc_offset_minutes: 0,
            columns: ColumnMapping::default(),
        }
    }

    fn processor() -> Self {
        Self::pos()
    }

    pub fn utc_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes.checked_mul(60)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnMapping {
    #[serde(default = "col_reference_id")]
    pub reference_id: String,
    #[serde(default = "col_card_id")]
    pub card_id: String,
    #[serde(default = "col_amount")]
    pub amount: String,
    #[serde(default = "col_timestamp")]
    pub timestamp: String,
    #[serde(default = "col_batch_id")]
    pub batch_id: String,
    #[serde(default = "col_source_system")]
    pub source_system: String,
}

fn col_reference_id() -> String {
    "reference_id".into()
}
fn col_card_id() -> String {
    "card_id".into()
}
fn col_amount() -> String {
    "amount".into()
}
fn col_timestamp() -> String {
    "timestamp".into()
}
fn col_batch_id() -> String {
    "batch_id".into()
}
fn col_source_system() -> String {
    "source_system".into()
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            reference_id: col_reference_id(),
            card_id: col_card_id(),
            amount: col_amount(),
            timestamp: col_timestamp(),
            batch_id: col_batch_id(),
            source_system: col_source_system(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ConfigurationError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let tol = &self.tolerance;
        if tol.amount_epsilon < 0 {
            return Err(ConfigurationError::NegativeEpsilon(tol.amount_epsilon));
        }
        if tol.shift_divisor < 2 {
            return Err(ConfigurationError::InvalidShiftDivisor(tol.shift_divisor));
        }
        if !(1..=6).contains(&tol.max_shift_exponent) {
            return Err(ConfigurationError::InvalidShiftExponent(tol.max_shift_exponent));
        }

        if self.matching.fallback_window_secs < 0 {
            return Err(ConfigurationError::NegativeWindow(
                self.matching.fallback_window_secs,
            ));
        }
        if self.matching.partitions == 0 {
            return Err(ConfigurationError::InvalidPartitions(0));
        }

        if self.input.amount_scale > 9 {
            return Err(ConfigurationError::InvalidAmountScale(self.input.amount_scale));
        }
        for side in [SourceSystem::Pos, SourceSystem::Processor] {
            let source = self.input.source(side);
            // Offsets must stay strictly inside one day.
            if source.utc_offset_minutes.abs() >= 24 * 60 || source.utc_offset().is_none() {
                return Err(ConfigurationError::InvalidUtcOffset {
                    side,
                    minutes: source.utc_offset_minutes,
                });
            }
        }

        self.validate_rules()
    }

    fn validate_rules(&self) -> Result<(), ConfigurationError> {
        let order = &self.rules.order;
        for kind in RuleKind::DEFAULT_ORDER {
            match order.iter().filter(|k| **k == kind).count() {
                0 => {
                    return Err(ConfigurationError::RuleOrder(format!(
                        "'{kind}' is missing"
                    )))
                }
                1 => {}
                _ => {
                    return Err(ConfigurationError::RuleOrder(format!(
                        "'{kind}' listed more than once"
                    )))
                }
            }
        }

        for kind in [RuleKind::Matched, RuleKind::AmountMismatch, RuleKind::Missing] {
            if !self.rules.is_enabled(kind) {
                return Err(ConfigurationError::RequiredRuleDisabled(kind));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
