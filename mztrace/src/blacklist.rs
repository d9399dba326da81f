//! Claim tracking over every `(scan, peak)` cell of a [`FilteredExperiment`].
//!
//! Two independent grids are used during a run. The [`TraceRegistry`] marks peaks that
//! belong to accepted mass traces, while the pattern scorer keeps its own [`Blacklist`]
//! recording which isotope position claimed each satellite peak. Cells only ever
//! tighten: white may become claimed or black, and claimed may become black.
use tracing::warn;

use crate::error::BlacklistViolation;
use crate::signal::FilteredExperiment;
use crate::trace::MassTrace;

/// The state of a single blacklist cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellState {
    #[default]
    White,
    /// Claimed by the isotope position with this index
    Claimed(u32),
    Black,
}

/// The address of a peak in a [`FilteredExperiment`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellRef {
    pub scan: usize,
    pub peak: usize,
}

impl CellRef {
    pub fn new(scan: usize, peak: usize) -> Self {
        Self { scan, peak }
    }
}

/// A flat arena of [`CellState`], addressed by `scan_offset[scan] + peak`
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    scan_offsets: Vec<usize>,
    cells: Vec<CellState>,
}

impl Blacklist {
    pub fn new(experiment: &FilteredExperiment) -> Self {
        let mut scan_offsets = Vec::with_capacity(experiment.len());
        let mut total = 0;
        for spec in experiment.iter() {
            scan_offsets.push(total);
            total += spec.len();
        }
        Self {
            scan_offsets,
            cells: vec![CellState::White; total],
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    fn offset(&self, cell: CellRef) -> usize {
        self.scan_offsets[cell.scan] + cell.peak
    }

    #[inline]
    pub fn state(&self, cell: CellRef) -> CellState {
        self.cells[self.offset(cell)]
    }

    #[inline]
    pub fn is_white(&self, cell: CellRef) -> bool {
        matches!(self.state(cell), CellState::White)
    }

    /// Whether `cell` may be used by the isotope position `index`
    #[inline]
    pub fn is_available_for(&self, cell: CellRef, index: u32) -> bool {
        match self.state(cell) {
            CellState::White => true,
            CellState::Claimed(k) => k == index,
            CellState::Black => false,
        }
    }

    /// Claim `cell` for `index`.
    ///
    /// Returns `Ok(true)` if the cell changed, `Ok(false)` if it was already claimed for
    /// `index`, and an error without touching the cell otherwise.
    pub fn claim(&mut self, cell: CellRef, index: u32) -> Result<bool, BlacklistViolation> {
        let offset = self.offset(cell);
        match self.cells[offset] {
            CellState::White => {
                self.cells[offset] = CellState::Claimed(index);
                Ok(true)
            }
            CellState::Claimed(k) if k == index => Ok(false),
            current => Err(BlacklistViolation {
                cell,
                current,
                requested: index,
            }),
        }
    }

    /// Mark `cell` as permanently unavailable
    pub fn blacken(&mut self, cell: CellRef) {
        let offset = self.offset(cell);
        self.cells[offset] = CellState::Black;
    }

    pub fn count_white(&self) -> usize {
        self.cells
            .iter()
            .filter(|c| matches!(c, CellState::White))
            .count()
    }
}

/// The mass trace extender's view of the blacklist
#[derive(Debug, Clone, Default)]
pub struct TraceRegistry {
    cells: Blacklist,
    accepted: usize,
}

impl TraceRegistry {
    pub fn new(experiment: &FilteredExperiment) -> Self {
        Self {
            cells: Blacklist::new(experiment),
            accepted: 0,
        }
    }

    #[inline]
    pub fn is_claimed(&self, cell: CellRef) -> bool {
        !self.cells.is_white(cell)
    }

    /// Record an accepted trace, removing all of its peaks from circulation
    pub fn accept(&mut self, trace: &MassTrace) {
        for cell in trace.cells() {
            if self.is_claimed(cell) {
                warn!("Trace {} re-claims {cell:?}", trace.id);
            }
            self.cells.blacken(cell);
        }
        self.accepted += 1;
    }

    pub fn accepted(&self) -> usize {
        self.accepted
    }

    pub fn unclaimed(&self) -> usize {
        self.cells.count_white()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::signal::{FilteredSpectrum, Peak};

    fn experiment() -> FilteredExperiment {
        let spectra = (0..3)
            .map(|i| FilteredSpectrum {
                source_index: i,
                rt: i as f64,
                peaks: (0..(i + 1))
                    .map(|j| Peak::new(100.0 + j as f64, 100.0, i))
                    .collect(),
            })
            .collect();
        FilteredExperiment { spectra }
    }

    #[test]
    fn test_arena() {
        let exp = experiment();
        let bl = Blacklist::new(&exp);
        assert_eq!(bl.len(), 6);
        assert_eq!(bl.offset(CellRef::new(2, 1)), 4);
        assert_eq!(bl.count_white(), 6);
    }

    #[test]
    fn test_monotonic_claims() {
        let exp = experiment();
        let mut bl = Blacklist::new(&exp);
        let cell = CellRef::new(1, 1);
        assert_eq!(bl.claim(cell, 2), Ok(true));
        assert_eq!(bl.claim(cell, 2), Ok(false));
        assert!(bl.is_available_for(cell, 2));
        assert!(!bl.is_available_for(cell, 3));

        let err = bl.claim(cell, 3).unwrap_err();
        assert_eq!(err.current, CellState::Claimed(2));
        assert_eq!(bl.state(cell), CellState::Claimed(2));

        bl.blacken(cell);
        assert!(!bl.is_available_for(cell, 2));
        assert!(bl.claim(cell, 2).is_err());
        assert_eq!(bl.state(cell), CellState::Black);
    }

    #[test]
    fn test_sibling_reuse() {
        let exp = experiment();
        let mut bl = Blacklist::new(&exp);
        let cell = CellRef::new(2, 0);
        // two channels landing on the same isotope position share the claim
        for _ in 0..2 {
            assert!(bl.is_available_for(cell, 7));
            assert!(bl.claim(cell, 7).is_ok());
        }
        assert_eq!(bl.state(cell), CellState::Claimed(7));
    }
}
