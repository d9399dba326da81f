//! Configuration for the feature finding pipeline
use mzpeaks::Tolerance;

use crate::charge::ChargeRange;
use crate::error::InvalidInput;
use crate::isotopic_model::AveragineType;

/// When to stop extending a mass trace in one RT direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TraceTerminationCriterion {
    /// Stop after too many consecutive scans without a matching peak
    #[default]
    Outlier,
    /// Stop once the fraction of scans with a matching peak drops too low
    SampleRate,
}

/// How a mass trace's intensity is summarized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum QuantMethod {
    #[default]
    Area,
    Median,
    MaxHeight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum MassErrorUnit {
    #[default]
    PPM,
    Da,
}

/// Every tunable of the pipeline, grouped by the stage that reads it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FeatureFinderParams {
    /// The m/z tolerance used to initialize a trace's m/z standard deviation
    pub mass_error_ppm: f64,
    /// Peaks at or below this intensity are dropped before anything else happens
    pub noise_threshold_int: f64,
    /// The multiple of `noise_threshold_int` a peak must exceed to seed a trace
    pub chrom_peak_snr: f64,
    pub trace_termination_criterion: TraceTerminationCriterion,
    /// The number of consecutive misses tolerated in outlier mode
    pub trace_termination_outliers: usize,
    pub min_sample_rate: f64,
    /// The number of scans visited in one direction before the sample rate is checked
    pub min_scans_to_check: usize,
    /// The minimum RT span of an accepted trace, in seconds
    pub min_trace_length: f64,
    /// The maximum RT span of an accepted trace, a negative value disables the cap
    pub max_trace_length: f64,
    pub reestimate_mt_sd: bool,
    pub quant_method: QuantMethod,

    pub charge_lower_bound: i32,
    pub charge_upper_bound: i32,
    pub isotopes_per_peptide_min: usize,
    pub isotopes_per_peptide_max: usize,
    pub peptide_similarity: f64,
    pub averagine_similarity: f64,
    pub averagine_similarity_scaling: f64,
    /// The RT half-width around each seed peak searched for satellite peaks
    pub rt_band: f64,
    pub mz_tolerance: f64,
    pub mz_unit: MassErrorUnit,
    pub averagine_type: AveragineType,
    /// Mass offsets of the co-eluting peptide channels, in Daltons
    pub mass_shifts: Vec<f64>,
    pub local_rt_range: f64,
    pub local_mz_range: f64,

    /// The width of a mass bucket, in Daltons
    pub mass_tolerance: f64,
    pub max_mass: f64,
    pub sparse_charge_penalty: f64,
    pub min_feature_score: f64,
}

impl Default for FeatureFinderParams {
    fn default() -> Self {
        Self {
            mass_error_ppm: 20.0,
            noise_threshold_int: 10.0,
            chrom_peak_snr: 3.0,
            trace_termination_criterion: TraceTerminationCriterion::Outlier,
            trace_termination_outliers: 5,
            min_sample_rate: 0.5,
            min_scans_to_check: 5,
            min_trace_length: 5.0,
            max_trace_length: -1.0,
            reestimate_mt_sd: true,
            quant_method: QuantMethod::Area,
            charge_lower_bound: 1,
            charge_upper_bound: 4,
            isotopes_per_peptide_min: 3,
            isotopes_per_peptide_max: 6,
            peptide_similarity: 0.5,
            averagine_similarity: 0.4,
            averagine_similarity_scaling: 0.95,
            rt_band: 0.0,
            mz_tolerance: 10.0,
            mz_unit: MassErrorUnit::PPM,
            averagine_type: AveragineType::Peptide,
            mass_shifts: Vec::new(),
            local_rt_range: 10.0,
            local_mz_range: 6.5,
            mass_tolerance: 1.5,
            max_mass: 100000.0,
            sparse_charge_penalty: 0.5,
            min_feature_score: 0.0,
        }
    }
}

impl FeatureFinderParams {
    pub fn charge_range(&self) -> ChargeRange {
        (self.charge_lower_bound, self.charge_upper_bound)
    }

    pub fn mz_tolerance(&self) -> Tolerance {
        match self.mz_unit {
            MassErrorUnit::PPM => Tolerance::PPM(self.mz_tolerance),
            MassErrorUnit::Da => Tolerance::Da(self.mz_tolerance),
        }
    }

    /// The channel offsets scored by the pattern scorer. A singlet is a single
    /// channel with no offset.
    pub fn channel_shifts(&self) -> Vec<f64> {
        if self.mass_shifts.is_empty() {
            vec![0.0]
        } else {
            self.mass_shifts.clone()
        }
    }

    pub fn is_singlet(&self) -> bool {
        self.mass_shifts.len() < 2
    }

    /// The averagine correlation threshold, pulled towards 1 for singlets
    pub fn effective_averagine_similarity(&self) -> f64 {
        if self.is_singlet() {
            self.averagine_similarity
                + self.averagine_similarity_scaling * (1.0 - self.averagine_similarity)
        } else {
            self.averagine_similarity
        }
    }

    pub fn validate(&self) -> Result<(), InvalidInput> {
        let fail = |msg: String| Err(InvalidInput::Parameter(msg));
        if self.charge_lower_bound < 1 || self.charge_upper_bound < self.charge_lower_bound {
            return fail(format!(
                "charge range {}-{} must be positive and ascending",
                self.charge_lower_bound, self.charge_upper_bound
            ));
        }
        if self.isotopes_per_peptide_min == 0
            || self.isotopes_per_peptide_min > self.isotopes_per_peptide_max
        {
            return fail(format!(
                "isotopes per peptide {}-{} must be non-zero and ascending",
                self.isotopes_per_peptide_min, self.isotopes_per_peptide_max
            ));
        }
        for (name, value) in [
            ("peptide_similarity", self.peptide_similarity),
            ("averagine_similarity", self.averagine_similarity),
            ("averagine_similarity_scaling", self.averagine_similarity_scaling),
            ("min_sample_rate", self.min_sample_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return fail(format!("{name} = {value} must lie in [0, 1]"));
            }
        }
        for (name, value) in [
            ("mass_error_ppm", self.mass_error_ppm),
            ("mz_tolerance", self.mz_tolerance),
            ("mass_tolerance", self.mass_tolerance),
            ("local_mz_range", self.local_mz_range),
            ("local_rt_range", self.local_rt_range),
        ] {
            if value.is_nan() || value <= 0.0 {
                return fail(format!("{name} = {value} must be positive"));
            }
        }
        if self.rt_band < 0.0 || self.noise_threshold_int < 0.0 {
            return fail("rt_band and noise_threshold_int must not be negative".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let params = FeatureFinderParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.charge_range(), (1, 4));
        assert_eq!(params.channel_shifts(), vec![0.0]);
        assert!((params.effective_averagine_similarity() - 0.97).abs() < 1e-9);
    }

    #[test]
    fn test_invalid() {
        let mut params = FeatureFinderParams {
            charge_lower_bound: 5,
            ..Default::default()
        };
        assert!(matches!(params.validate(), Err(InvalidInput::Parameter(_))));
        params.charge_lower_bound = 1;
        params.isotopes_per_peptide_min = 0;
        assert!(params.validate().is_err());
        params.isotopes_per_peptide_min = 3;
        params.peptide_similarity = 1.5;
        assert!(params.validate().is_err());
        params.peptide_similarity = 0.5;
        params.mz_tolerance = 0.0;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_tolerance() {
        let mut params = FeatureFinderParams::default();
        assert!(matches!(params.mz_tolerance(), Tolerance::PPM(x) if x == 10.0));
        params.mz_unit = MassErrorUnit::Da;
        params.mz_tolerance = 0.01;
        assert!(matches!(params.mz_tolerance(), Tolerance::Da(x) if x == 0.01));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_partial_json() {
        let params: FeatureFinderParams =
            serde_json::from_str(r#"{"charge_upper_bound": 6, "quant_method": "max_height"}"#)
                .unwrap();
        assert_eq!(params.charge_upper_bound, 6);
        assert_eq!(params.quant_method, QuantMethod::MaxHeight);
        assert_eq!(params.mass_error_ppm, 20.0);
    }
}
