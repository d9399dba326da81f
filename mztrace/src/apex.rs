//! Seed selection for mass trace extension
use std::cmp::Ordering;

use tracing::debug;

use crate::blacklist::CellRef;
use crate::error::InvalidInput;
use crate::signal::{Experiment, FilteredExperiment, FilteredSpectrum, Peak};

/// A peak strong enough to seed a mass trace
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Apex {
    pub intensity: f64,
    /// The scan index in the [`FilteredExperiment`]
    pub scan: usize,
    /// The peak index within the filtered scan
    pub peak: usize,
}

impl Apex {
    pub fn cell(&self) -> CellRef {
        CellRef::new(self.scan, self.peak)
    }

    /// The order apexes are consumed in: intensity descending, then scan and peak
    /// ascending
    pub fn consumption_order(&self, other: &Self) -> Ordering {
        other
            .intensity
            .total_cmp(&self.intensity)
            .then_with(|| self.scan.cmp(&other.scan))
            .then_with(|| self.peak.cmp(&other.peak))
    }
}

/// The noise-filtered working copy of the experiment and the apexes seeded from it
#[derive(Debug, Clone, Default)]
pub struct ApexDetection {
    pub experiment: FilteredExperiment,
    /// Apexes in consumption order
    pub apexes: Vec<Apex>,
    pub candidate_peaks: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApexDetector {
    pub noise_floor: f64,
    pub snr_multiple: f64,
}

impl ApexDetector {
    pub fn new(noise_floor: f64, snr_multiple: f64) -> Self {
        Self {
            noise_floor,
            snr_multiple,
        }
    }

    pub fn apex_threshold(&self) -> f64 {
        self.noise_floor * self.snr_multiple
    }

    /// Build the filtered copy of every MS1 spectrum and the sorted apex queue.
    ///
    /// The input is never modified.
    pub fn detect(&self, experiment: &Experiment) -> Result<ApexDetection, InvalidInput> {
        experiment.validate()?;
        let threshold = self.apex_threshold();
        let mut spectra = Vec::with_capacity(experiment.ms1_count());
        let mut apexes = Vec::new();
        let mut candidate_peaks = 0;

        for (scan, spec) in experiment.ms1().enumerate() {
            let peaks: Vec<Peak> = spec
                .peaks
                .iter()
                .filter(|p| p.intensity > self.noise_floor)
                .map(|p| Peak::new(p.mz, p.intensity, scan))
                .collect();
            for (i, p) in peaks.iter().enumerate() {
                if p.intensity > threshold {
                    apexes.push(Apex {
                        intensity: p.intensity,
                        scan,
                        peak: i,
                    });
                }
            }
            candidate_peaks += peaks.len();
            spectra.push(FilteredSpectrum {
                source_index: spec.index,
                rt: spec.rt,
                peaks,
            });
        }

        apexes.sort_by(|a, b| a.consumption_order(b));
        debug!(
            "Retained {candidate_peaks} peaks from {} MS1 spectra, {} apexes",
            spectra.len(),
            apexes.len()
        );
        Ok(ApexDetection {
            experiment: FilteredExperiment { spectra },
            apexes,
            candidate_peaks,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::signal::Spectrum;

    #[test]
    fn test_min_spectra_guard() {
        let detector = ApexDetector::new(10.0, 3.0);
        for n in 0..3 {
            let exp: Experiment = (0..n).map(|i| (i as f64, vec![(100.0, 500.0)])).collect();
            let err = detector.detect(&exp).unwrap_err();
            assert!(err.to_string().contains("fewer than 3 MS1 spectra"));
        }
        let exp: Experiment = (0..3).map(|i| (i as f64, vec![(100.0, 500.0)])).collect();
        assert!(detector.detect(&exp).is_ok());
    }

    #[test]
    fn test_filter_and_order() {
        let exp: Experiment = vec![
            (0.0, vec![(100.0, 5.0), (200.0, 40.0), (300.0, 50.0)]),
            (1.0, vec![(100.0, 50.0), (200.0, 20.0)]),
            (2.0, vec![(150.0, 50.0), (250.0, 80.0)]),
        ]
        .into_iter()
        .collect();
        let det = ApexDetector::new(10.0, 3.0).detect(&exp).unwrap();
        assert_eq!(det.candidate_peaks, 6);
        assert_eq!(det.experiment.spectra[0].peaks.len(), 2);
        assert_eq!(det.experiment.spectra[0].peaks[0].mz, 200.0);

        let order: Vec<_> = det.apexes.iter().map(|a| (a.scan, a.peak)).collect();
        // equal intensities fall back to scan then peak index
        assert_eq!(order, vec![(2, 1), (0, 1), (1, 0), (2, 0), (0, 0)]);
    }

    #[test]
    fn test_ms2_skipped() {
        let mut exp: Experiment = (0..3).map(|i| (i as f64, vec![(100.0, 500.0)])).collect();
        exp.spectra
            .insert(1, Spectrum::from_pairs(9, 0.5, 2, vec![(100.0, 1e6)]));
        let det = ApexDetector::new(10.0, 3.0).detect(&exp).unwrap();
        assert_eq!(det.experiment.len(), 3);
        assert_eq!(det.apexes.len(), 3);
        assert_eq!(det.experiment.spectra[2].source_index, 2);
    }
}
