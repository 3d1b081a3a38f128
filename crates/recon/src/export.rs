//! CSV exports of a finished run. All amounts are integer minor units.

use std::io::Write;

use crate::aggregate::ReconReport;
use crate::error::ReconError;
use crate::model::{ClassifiedPair, DiscrepancyRecord, Transaction};

fn writer<W: Write>(out: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(out)
}

fn opt<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

/// One row per category, all seven always present.
pub fn write_report_csv<W: Write>(report: &ReconReport, out: W) -> Result<(), ReconError> {
    let mut wtr = writer(out);
    wtr.write_record(["category", "count", "total_amount", "percent_of_total"])?;
    for row in &report.categories {
        wtr.write_record([
            row.category.as_str().to_string(),
            row.count.to_string(),
            row.total_amount.to_string(),
            opt(row.percent_of_total.map(|p| format!("{p:.2}"))),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_discrepancies_csv<W: Write>(
    records: &[DiscrepancyRecord],
    out: W,
) -> Result<(), ReconError> {
    let mut wtr = writer(out);
    wtr.write_record([
        "reference_id",
        "processor_reference_id",
        "card_id",
        "pos_amount",
        "processor_amount",
        "delta",
        "classification",
        "match_confidence",
        "pos_timestamp",
        "processor_timestamp",
    ])?;
    for r in records {
        wtr.write_record([
            r.reference_id.clone(),
            opt(r.processor_reference_id.as_deref()),
            r.card_id.clone(),
            opt(r.pos_amount),
            opt(r.processor_amount),
            r.delta.to_string(),
            r.classification.as_str().to_string(),
            r.match_confidence.to_string(),
            opt(r.pos_timestamp.as_deref()),
            opt(r.processor_timestamp.as_deref()),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Every pair, matched or not, with both sides spelled out.
pub fn write_reconciled_csv<W: Write>(pairs: &[ClassifiedPair], out: W) -> Result<(), ReconError> {
    let mut wtr = writer(out);
    wtr.write_record([
        "classification",
        "match_confidence",
        "duplicate",
        "delta",
        "pos_reference_id",
        "pos_card_id",
        "pos_amount",
        "pos_timestamp",
        "pos_batch_id",
        "processor_reference_id",
        "processor_card_id",
        "processor_amount",
        "processor_timestamp",
        "processor_batch_id",
    ])?;

    let side = |tx: Option<&Transaction>| -> [String; 5] {
        match tx {
            Some(t) => [
                t.reference_id().to_string(),
                t.card_id().to_string(),
                t.amount().to_string(),
                t.timestamp().to_rfc3339(),
                t.batch_id().to_string(),
            ],
            None => Default::default(),
        }
    };

    for c in pairs {
        let mut record = vec![
            c.discrepancy.as_str().to_string(),
            c.pair.confidence.to_string(),
            c.pair.duplicate.to_string(),
            c.delta.to_string(),
        ];
        record.extend(side(c.pair.pos()));
        record.extend(side(c.pair.processor()));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}
