use std::iter::Sum;
use std::ops::{Add, AddAssign};

use mztrace::PipelineCounts;
use tracing::info;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ProgressRecord {
    pub spectra_read: usize,
    pub ms1_spectra: usize,
    pub ms1_peaks: usize,
    pub profile_spectra: usize,
    pub apexes: usize,
    pub traces: usize,
    pub hypotheses: usize,
    pub clusters: usize,
    pub features: usize,
}

impl ProgressRecord {
    /// Fold the stage counts of a feature finding run into this record
    pub fn with_counts(mut self, counts: &PipelineCounts) -> Self {
        self.apexes += counts.apexes;
        self.traces += counts.traces;
        self.hypotheses += counts.hypotheses;
        self.clusters += counts.clusters;
        self.features += counts.features;
        self
    }

    pub fn log(&self) {
        info!(
            "Spectra Read: {} | MS1 Spectra: {} (Picked from profile: {})",
            self.spectra_read, self.ms1_spectra, self.profile_spectra
        );
        info!("MS1 Peaks: {}", self.ms1_peaks);
        info!("Apexes: {} | Mass Traces: {}", self.apexes, self.traces);
        info!(
            "Hypotheses: {} | Clusters: {}",
            self.hypotheses, self.clusters
        );
        info!("Features: {}", self.features);
    }
}

impl Add for ProgressRecord {
    type Output = ProgressRecord;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for ProgressRecord {
    fn add_assign(&mut self, rhs: Self) {
        self.spectra_read += rhs.spectra_read;
        self.ms1_spectra += rhs.ms1_spectra;
        self.ms1_peaks += rhs.ms1_peaks;
        self.profile_spectra += rhs.profile_spectra;
        self.apexes += rhs.apexes;
        self.traces += rhs.traces;
        self.hypotheses += rhs.hypotheses;
        self.clusters += rhs.clusters;
        self.features += rhs.features;
    }
}

impl Sum for ProgressRecord {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(ProgressRecord::default(), |acc, x| acc + x)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sum() {
        let a = ProgressRecord {
            ms1_spectra: 1,
            ms1_peaks: 20,
            ..Default::default()
        };
        let b = ProgressRecord {
            ms1_spectra: 1,
            ms1_peaks: 5,
            profile_spectra: 1,
            ..Default::default()
        };
        let total: ProgressRecord = [a, b].into_iter().sum();
        assert_eq!(total.ms1_spectra, 2);
        assert_eq!(total.ms1_peaks, 25);
        assert_eq!(total.profile_spectra, 1);

        let counts = PipelineCounts {
            traces: 7,
            features: 2,
            ..Default::default()
        };
        let total = total.with_counts(&counts);
        assert_eq!(total.traces, 7);
        assert_eq!(total.features, 2);
        assert_eq!(total.ms1_peaks, 25);
    }
}
