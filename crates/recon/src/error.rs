use thiserror::Error;

use crate::classify::RuleKind;
use crate::model::SourceSystem;

/// Why a single raw record could not be turned into a [`crate::Transaction`].
///
/// These never abort a run. The record is excluded from matching and counted
/// as unprocessable in the report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing reference_id")]
    MissingReferenceId,
    #[error("missing amount")]
    MissingAmount,
    #[error("cannot parse amount '{0}'")]
    InvalidAmount(String),
    /// Converting to minor units would drop a non-zero sub-unit digit.
    #[error("amount '{value}' has more than {scale} significant fractional digit(s)")]
    PrecisionLoss { value: String, scale: u32 },
    #[error("amount '{0}' does not fit in 64-bit minor units")]
    AmountOutOfRange(String),
    #[error("missing timestamp")]
    MissingTimestamp,
    #[error("cannot parse timestamp '{0}'")]
    InvalidTimestamp(String),
    #[error("record claims source '{found}' but was supplied as {expected}")]
    SourceMismatch { expected: SourceSystem, found: String },
}

/// Invalid configuration. Always fails the run before any matching starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("tolerance.amount_epsilon must be >= 0, got {0}")]
    NegativeEpsilon(i64),
    #[error("matching.fallback_window_secs must be >= 0, got {0}")]
    NegativeWindow(i64),
    #[error("tolerance.shift_divisor must be >= 2, got {0}")]
    InvalidShiftDivisor(i64),
    #[error("tolerance.max_shift_exponent must be between 1 and 6, got {0}")]
    InvalidShiftExponent(u32),
    #[error("input.amount_scale must be between 0 and 9, got {0}")]
    InvalidAmountScale(u32),
    #[error("input.{side}.utc_offset_minutes out of range: {minutes}")]
    InvalidUtcOffset { side: SourceSystem, minutes: i32 },
    #[error("matching.partitions must be >= 1, got {0}")]
    InvalidPartitions(usize),
    #[error("rules.order: {0}")]
    RuleOrder(String),
    #[error("rule '{0}' cannot be disabled")]
    RequiredRuleDisabled(RuleKind),
}

/// Run-level failure. A run that returns this produced no report.
#[derive(Debug, Error)]
pub enum ReconError {
    #[error(transparent)]
    Config(#[from] ConfigurationError),
    #[error("{side} input: missing column '{column}'")]
    MissingColumn { side: SourceSystem, column: String },
    #[error("{side} input: CSV error: {message}")]
    Csv { side: SourceSystem, message: String },
    #[error("IO error: {0}")]
    Io(String),
    #[error("partition worker failed: {0}")]
    Worker(String),
}

impl From<csv::Error> for ReconError {
    fn from(e: csv::Error) -> Self {
        ReconError::Io(e.to_string())
    }
}

impl From<std::io::Error> for ReconError {
    fn from(e: std::io::Error) -> Self {
        ReconError::Io(e.to_string())
    }
}
