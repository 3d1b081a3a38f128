//! Raw record validation and canonicalization.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};

use crate::config::InputConfig;
use crate::error::ValidationError;
use crate::model::{NormalizedInput, RawRecord, Rejection, SourceSystem, Transaction};

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Validate both sides of a snapshot. Bad records are collected, never dropped.
pub fn normalize(
    pos: &[RawRecord],
    processor: &[RawRecord],
    config: &InputConfig,
) -> NormalizedInput {
    let mut out = NormalizedInput::default();

    for (side, records) in [(SourceSystem::Pos, pos), (SourceSystem::Processor, processor)] {
        let offset = config.source(side).utc_offset().unwrap_or_else(|| Utc.fix());
        for (index, raw) in records.iter().enumerate() {
            match normalize_record(side, raw, config.amount_scale, offset) {
                Ok(tx) => match side {
                    SourceSystem::Pos => out.pos.push(tx),
                    SourceSystem::Processor => out.processor.push(tx),
                },
                Err(error) => {
                    log::debug!("{side} record #{index} rejected: {error}");
                    out.rejected.push(Rejection {
                        source_system: side,
                        index,
                        reference_id: non_blank(&raw.reference_id).map(str::to_string),
                        error,
                    });
                }
            }
        }
    }

    out
}

pub fn normalize_record(
    side: SourceSystem,
    raw: &RawRecord,
    amount_scale: u32,
    offset: FixedOffset,
) -> Result<Transaction, ValidationError> {
    if let Some(claimed) = non_blank(&raw.source_system) {
        if !claimed.eq_ignore_ascii_case(side.as_str()) {
            return Err(ValidationError::SourceMismatch {
                expected: side,
                found: claimed.to_string(),
            });
        }
    }

    let reference_id = non_blank(&raw.reference_id).ok_or(ValidationError::MissingReferenceId)?;
    let amount_str = non_blank(&raw.amount).ok_or(ValidationError::MissingAmount)?;
    let amount = parse_minor_units(amount_str, amount_scale)?;
    let ts_str = non_blank(&raw.timestamp).ok_or(ValidationError::MissingTimestamp)?;
    let timestamp = parse_timestamp(ts_str, offset)?;

    Ok(Transaction::new(
        side,
        reference_id,
        non_blank(&raw.card_id).unwrap_or(""),
        amount,
        timestamp,
        non_blank(&raw.batch_id).unwrap_or(""),
    ))
}

fn non_blank(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Parse a decimal amount string into integer minor units without `f64`.
///
/// `scale` is the number of fractional digits in one major unit. Extra
/// fractional digits are accepted only when they are zeros.
pub fn parse_minor_units(input: &str, scale: u32) -> Result<i64, ValidationError> {
    let s = input.trim();
    let invalid = || ValidationError::InvalidAmount(input.to_string());
    let out_of_range = || ValidationError::AmountOutOfRange(input.to_string());

    let (negative, unsigned) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let (whole, frac) = match unsigned.split_once('.') {
        Some((w, f)) => (w, f),
        None => (unsigned, ""),
    };
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let scale_len = scale as usize;
    let (kept, dropped) = if frac.len() > scale_len {
        frac.split_at(scale_len)
    } else {
        (frac, "")
    };
    if dropped.bytes().any(|b| b != b'0') {
        return Err(ValidationError::PrecisionLoss {
            value: input.to_string(),
            scale,
        });
    }

    let mut minor: i128 = 0;
    for b in whole.bytes().chain(kept.bytes()) {
        minor = minor * 10 + i128::from(b - b'0');
        if minor > i64::MAX as i128 + 1 {
            return Err(out_of_range());
        }
    }
    for _ in kept.len()..scale_len {
        minor *= 10;
        if minor > i64::MAX as i128 + 1 {
            return Err(out_of_range());
        }
    }

    let signed = if negative { -minor } else { minor };
    i64::try_from(signed).map_err(|_| out_of_range())
}

/// Parse a timestamp to UTC. Zone-less forms are read in `offset`.
pub fn parse_timestamp(input: &str, offset: FixedOffset) -> Result<DateTime<Utc>, ValidationError> {
    let s = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| ValidationError::InvalidTimestamp(input.to_string()))?;

    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| ValidationError::InvalidTimestamp(input.to_string()))
}
