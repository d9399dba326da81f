//! Errors raised while finding features.
//!
//! [`InvalidInput`] and [`FeatureFinderError`] stop a run. [`PatternRejection`] and
//! [`BlacklistViolation`] are local outcomes which callers log and move past.
use thiserror::Error;

use crate::blacklist::{CellRef, CellState};

/// A precondition on the input signal or configuration did not hold
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidInput {
    #[error("Found {found} MS1 spectra, fewer than 3 MS1 spectra cannot support trace extension")]
    TooFewSpectra { found: usize },
    #[error("Spectrum {index} is not sorted by ascending m/z")]
    UnsortedSpectrum { index: usize },
    #[error("The isotopic model has an empty elemental composition")]
    EmptyIsotopicModel,
    #[error("Invalid parameter: {0}")]
    Parameter(String),
}

/// A fatal error that stops the feature finding run
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureFinderError {
    #[error(transparent)]
    InvalidInput(#[from] InvalidInput),
    #[error("Feature finding was cancelled after {completed_apexes} apexes")]
    Cancelled { completed_apexes: usize },
}

/// Why a single pattern hypothesis was not kept
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatternRejection {
    #[error("The seed peak is already claimed by another isotope position")]
    Blacklisted,
    #[error("Only {length} consecutive isotopes were found in every peptide")]
    IsotopeRunTooShort { length: usize },
    #[error("A significant peak precedes the monoisotopic position")]
    ZerothPeak,
    #[error("The pattern is better explained by charge {alternative}")]
    MistakenCharge { alternative: i32 },
    #[error("Only {found} isotope positions are available for correlation")]
    InsufficientIsotopes { found: usize },
    #[error("The isotope intensities do not correlate with the averagine envelope")]
    AveragineCorrelation,
    #[error("Peptide channels do not correlate")]
    PeptideCorrelation,
    #[error("Peptide channels share no coincident peaks")]
    NoCoincidentPeaks,
    #[error("Too few traces could be bound to the pattern")]
    NotViable,
}

/// A claim would have moved a cell to a different isotope position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Cell {cell:?} is {current:?} and cannot be claimed for index {requested}")]
pub struct BlacklistViolation {
    pub cell: CellRef,
    pub current: CellState,
    pub requested: u32,
}
