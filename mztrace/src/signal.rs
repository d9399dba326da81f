//! The in-memory LC-MS signal consumed by the feature finding pipeline.
//!
//! An [`Experiment`] is an ordered collection of [`Spectrum`] scans. Only MS1 scans
//! take part in trace detection. The [`ApexDetector`](crate::apex::ApexDetector)
//! derives a [`FilteredExperiment`] from it which all later stages index into.
use std::cmp::Ordering;

use crate::error::InvalidInput;

/// A single centroided peak.
///
/// `scan_index` is the position of the owning scan within whichever experiment
/// created the peak.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Peak {
    pub mz: f64,
    pub intensity: f64,
    pub scan_index: usize,
}

impl Peak {
    pub fn new(mz: f64, intensity: f64, scan_index: usize) -> Self {
        Self {
            mz,
            intensity,
            scan_index,
        }
    }
}

/// Find the index of the peak nearest to `mz` within `width` in a m/z-sorted slice.
///
/// When two peaks are equally distant, the lower index wins.
pub fn find_nearest(peaks: &[Peak], mz: f64, width: f64) -> Option<usize> {
    if peaks.is_empty() {
        return None;
    }
    let split = peaks.partition_point(|p| p.mz < mz);
    let mut best: Option<(usize, f64)> = None;
    if split > 0 {
        let d = (peaks[split - 1].mz - mz).abs();
        best = Some((split - 1, d));
    }
    if split < peaks.len() {
        let d = (peaks[split].mz - mz).abs();
        match best {
            Some((_, bd)) if bd <= d => {}
            _ => best = Some((split, d)),
        }
    }
    best.and_then(|(i, d)| if d <= width { Some(i) } else { None })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spectrum {
    pub index: usize,
    pub rt: f64,
    pub ms_level: u8,
    pub peaks: Vec<Peak>,
}

impl Spectrum {
    pub fn new(index: usize, rt: f64, ms_level: u8, peaks: Vec<Peak>) -> Self {
        Self {
            index,
            rt,
            ms_level,
            peaks,
        }
    }

    /// Build a spectrum from raw `(mz, intensity)` pairs, stamping each peak with `index`
    pub fn from_pairs<I: IntoIterator<Item = (f64, f64)>>(
        index: usize,
        rt: f64,
        ms_level: u8,
        pairs: I,
    ) -> Self {
        let peaks = pairs
            .into_iter()
            .map(|(mz, intensity)| Peak::new(mz, intensity, index))
            .collect();
        Self::new(index, rt, ms_level, peaks)
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn is_sorted(&self) -> bool {
        self.peaks
            .windows(2)
            .all(|w| w[0].mz.total_cmp(&w[1].mz) != Ordering::Greater)
    }

    pub fn find_nearest(&self, mz: f64, width: f64) -> Option<usize> {
        find_nearest(&self.peaks, mz, width)
    }
}

/// An ordered run of spectra, as read from an acquisition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Experiment {
    pub spectra: Vec<Spectrum>,
}

impl Experiment {
    pub fn new(spectra: Vec<Spectrum>) -> Self {
        Self { spectra }
    }

    pub fn push(&mut self, spectrum: Spectrum) {
        self.spectra.push(spectrum)
    }

    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }

    pub fn ms1(&self) -> impl Iterator<Item = &Spectrum> {
        self.spectra.iter().filter(|s| s.ms_level == 1)
    }

    pub fn ms1_count(&self) -> usize {
        self.ms1().count()
    }

    /// Check the preconditions trace detection relies upon
    pub fn validate(&self) -> Result<(), InvalidInput> {
        for spec in self.ms1() {
            if !spec.is_sorted() {
                return Err(InvalidInput::UnsortedSpectrum { index: spec.index });
            }
        }
        let found = self.ms1_count();
        if found < 3 {
            return Err(InvalidInput::TooFewSpectra { found });
        }
        Ok(())
    }
}

impl<P: IntoIterator<Item = (f64, f64)>> FromIterator<(f64, P)> for Experiment {
    /// Collect MS1 scans from `(rt, peaks)` pairs
    fn from_iter<T: IntoIterator<Item = (f64, P)>>(iter: T) -> Self {
        let spectra = iter
            .into_iter()
            .enumerate()
            .map(|(i, (rt, pairs))| Spectrum::from_pairs(i, rt, 1, pairs))
            .collect();
        Self::new(spectra)
    }
}

/// A scan of the working copy, holding only peaks that survived the noise floor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilteredSpectrum {
    /// The index of the spectrum in the source [`Experiment`]
    pub source_index: usize,
    pub rt: f64,
    pub peaks: Vec<Peak>,
}

impl FilteredSpectrum {
    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn find_nearest(&self, mz: f64, width: f64) -> Option<usize> {
        find_nearest(&self.peaks, mz, width)
    }
}

/// The noise-filtered MS1 working copy every stage after apex detection indexes into.
///
/// Peaks carry their filtered scan index in [`Peak::scan_index`], so a `(scan, peak)` pair
/// uniquely addresses a cell of the [`Blacklist`](crate::blacklist::Blacklist).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilteredExperiment {
    pub spectra: Vec<FilteredSpectrum>,
}

impl FilteredExperiment {
    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }

    pub fn peak_count(&self) -> usize {
        self.spectra.iter().map(|s| s.len()).sum()
    }

    pub fn get(&self, scan: usize) -> Option<&FilteredSpectrum> {
        self.spectra.get(scan)
    }

    pub fn peak(&self, scan: usize, peak: usize) -> &Peak {
        &self.spectra[scan].peaks[peak]
    }

    /// The first scan whose RT is not less than `rt`
    pub fn rt_begin(&self, rt: f64) -> usize {
        self.spectra.partition_point(|s| s.rt < rt)
    }

    /// One past the last scan whose RT is not greater than `rt`
    pub fn rt_end(&self, rt: f64) -> usize {
        self.spectra.partition_point(|s| s.rt <= rt)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FilteredSpectrum> {
        self.spectra.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn peaks(mzs: &[f64]) -> Vec<Peak> {
        mzs.iter().map(|mz| Peak::new(*mz, 100.0, 0)).collect()
    }

    #[test]
    fn test_find_nearest() {
        let ps = peaks(&[100.0, 100.5, 101.0]);
        assert_eq!(find_nearest(&ps, 100.4, 0.2), Some(1));
        assert_eq!(find_nearest(&ps, 100.75, 0.3), Some(1));
        assert_eq!(find_nearest(&ps, 102.0, 0.5), None);
        assert_eq!(find_nearest(&ps, 99.0, 1.0), Some(0));
        assert_eq!(find_nearest(&[], 99.0, 1.0), None);
    }

    #[test]
    fn test_validate() {
        let exp: Experiment = (0..2)
            .map(|i| (i as f64, vec![(100.0, 50.0)]))
            .collect();
        assert_eq!(exp.validate(), Err(InvalidInput::TooFewSpectra { found: 2 }));

        let mut exp: Experiment = (0..3)
            .map(|i| (i as f64, vec![(100.0, 50.0)]))
            .collect();
        assert!(exp.validate().is_ok());

        exp.spectra[1] = Spectrum::from_pairs(1, 1.0, 1, vec![(101.0, 5.0), (100.0, 5.0)]);
        assert_eq!(
            exp.validate(),
            Err(InvalidInput::UnsortedSpectrum { index: 1 })
        );
    }

    #[test]
    fn test_ms2_not_counted() {
        let mut exp: Experiment = (0..2)
            .map(|i| (i as f64, vec![(100.0, 50.0)]))
            .collect();
        exp.push(Spectrum::from_pairs(2, 2.0, 2, vec![(100.0, 50.0)]));
        assert_eq!(exp.ms1_count(), 2);
        assert!(exp.validate().is_err());
    }
}
