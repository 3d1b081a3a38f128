//! CLI Exit Code Registry
//!
//! Single source of truth for `tally` exit codes. Scripts and job drivers
//! branch on these, so they are part of the shell contract.
//!
//! | Code | Meaning                                                  |
//! |------|----------------------------------------------------------|
//! | 0    | Reconciled, every pair MATCHED                           |
//! | 1    | Run completed, at least one non-matched category         |
//! | 2    | Usage error (bad arguments, no input file given)         |
//! | 3    | Invalid configuration                                    |
//! | 4    | Runtime/input error (unreadable file, bad CSV, IO)       |
//!
//! Codes 1 and 3 never mean "partial output": a run either produced its full
//! report or none at all.

use tally_recon::ReconError;

/// Success - every pair reconciled.
pub const EXIT_SUCCESS: u8 = 0;

/// Discrepancies found. Like `diff(1)`, 1 means "sides differ".
pub const EXIT_RECON_DISCREPANCIES: u8 = 1;

/// Usage error - bad arguments, missing required inputs.
pub const EXIT_USAGE: u8 = 2;

/// Config failed to parse or validate. Nothing was matched.
pub const EXIT_RECON_INVALID_CONFIG: u8 = 3;

/// Input could not be read or loaded, or the run failed at runtime.
pub const EXIT_RECON_RUNTIME: u8 = 4;

/// Map an engine error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::Config(_) => EXIT_RECON_INVALID_CONFIG,
        ReconError::MissingColumn { .. }
        | ReconError::Csv { .. }
        | ReconError::Io(_)
        | ReconError::Worker(_) => EXIT_RECON_RUNTIME,
    }
}
