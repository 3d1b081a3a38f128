//! `tally-recon`: POS / payment-processor reconciliation engine.
//!
//! Pure engine crate: receives raw records for both sides of one snapshot,
//! returns classified pairs and an aggregate report. The only IO is the
//! optional CSV loading and export helpers, which work on strings and
//! `impl Write`.
//!
//! Pipeline: normalize → match (primary key, then fallback) → classify →
//! aggregate.

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod partition;
pub mod tolerance;

pub use aggregate::{Accumulator, MatchRate, ReconReport};
pub use classify::{Cascade, RuleKind};
pub use config::ReconConfig;
pub use engine::{load_csv_records, run, ReconResult, RunOptions};
pub use error::{ConfigurationError, ReconError, ValidationError};
pub use model::{
    DiscrepancyRecord, DiscrepancyType, MatchConfidence, MatchedPair, RawRecord, ReconInput,
    SourceSystem, Transaction,
};
pub use tolerance::{Comparison, Tolerance};
