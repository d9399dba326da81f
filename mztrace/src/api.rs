//! High level API for running the feature finding pipeline
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::debug;

use crate::apex::ApexDetector;
use crate::blacklist::{Blacklist, TraceRegistry};
use crate::charge::ChargeRange;
use crate::dependency_graph::HypothesisDependenceGraph;
use crate::emitter::{Feature, FeatureEmitter};
use crate::error::FeatureFinderError;
use crate::hypothesis::FeatureHypothesis;
use crate::isotopic_model::AveragineType;
use crate::mass_bucket::MassBuckets;
use crate::params::{FeatureFinderParams, MassErrorUnit, QuantMethod};
use crate::pattern::PatternScorer;
use crate::signal::Experiment;
use crate::trace::{MassTrace, MassTraceExtender};

/// How many items passed through each stage of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineCounts {
    pub spectra: usize,
    pub candidate_peaks: usize,
    pub apexes: usize,
    pub traces: usize,
    pub hypotheses: usize,
    pub clusters: usize,
    pub features: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FeatureFinderOutput {
    pub traces: Vec<MassTrace>,
    /// The hypotheses that survived resolution, when requested
    pub hypotheses: Option<Vec<FeatureHypothesis>>,
    pub features: Vec<Feature>,
    pub counts: PipelineCounts,
}

#[derive(Debug, Clone, Default)]
pub struct FeatureFinderBuilder {
    params: FeatureFinderParams,
    cancel: Option<Arc<AtomicBool>>,
    keep_hypotheses: bool,
}

impl FeatureFinderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params(&mut self, params: FeatureFinderParams) -> &mut Self {
        self.params = params;
        self
    }

    pub fn charge_range(&mut self, charge_range: ChargeRange) -> &mut Self {
        self.params.charge_lower_bound = charge_range.0;
        self.params.charge_upper_bound = charge_range.1;
        self
    }

    pub fn mass_error_ppm(&mut self, value: f64) -> &mut Self {
        self.params.mass_error_ppm = value;
        self
    }

    pub fn noise_threshold(&mut self, value: f64) -> &mut Self {
        self.params.noise_threshold_int = value;
        self
    }

    pub fn averagine(&mut self, value: AveragineType) -> &mut Self {
        self.params.averagine_type = value;
        self
    }

    pub fn quant_method(&mut self, value: QuantMethod) -> &mut Self {
        self.params.quant_method = value;
        self
    }

    pub fn mz_tolerance(&mut self, value: f64, unit: MassErrorUnit) -> &mut Self {
        self.params.mz_tolerance = value;
        self.params.mz_unit = unit;
        self
    }

    pub fn mass_shifts(&mut self, value: Vec<f64>) -> &mut Self {
        self.params.mass_shifts = value;
        self
    }

    pub fn keep_hypotheses(&mut self, value: bool) -> &mut Self {
        self.keep_hypotheses = value;
        self
    }

    pub fn cancellation(&mut self, flag: Arc<AtomicBool>) -> &mut Self {
        self.cancel = Some(flag);
        self
    }

    pub fn build(&self) -> FeatureFinder {
        FeatureFinder {
            params: self.params.clone(),
            cancel: self.cancel.clone(),
            keep_hypotheses: self.keep_hypotheses,
        }
    }
}

/// Runs apex detection, trace extension, pattern scoring, hypothesis resolution
/// and feature emission over an [`Experiment`]
#[derive(Debug, Clone, Default)]
pub struct FeatureFinder {
    pub params: FeatureFinderParams,
    cancel: Option<Arc<AtomicBool>>,
    keep_hypotheses: bool,
}

impl FeatureFinder {
    pub fn new(params: FeatureFinderParams) -> Self {
        Self {
            params,
            cancel: None,
            keep_hypotheses: false,
        }
    }

    pub fn builder() -> FeatureFinderBuilder {
        FeatureFinderBuilder::default()
    }

    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn find_features(
        &self,
        experiment: &Experiment,
    ) -> Result<FeatureFinderOutput, FeatureFinderError> {
        let params = &self.params;
        params.validate()?;
        let mut model = params.averagine_type.caching_model()?;
        let mut counts = PipelineCounts::default();

        let detection = ApexDetector::new(params.noise_threshold_int, params.chrom_peak_snr)
            .detect(experiment)?;
        counts.spectra = detection.experiment.len();
        counts.candidate_peaks = detection.candidate_peaks;
        counts.apexes = detection.apexes.len();

        let mut registry = TraceRegistry::new(&detection.experiment);
        let extender = MassTraceExtender::from(params);
        let traces = extender.detect_traces(
            &detection.experiment,
            &detection.apexes,
            &mut registry,
            self.cancel.as_deref(),
        )?;
        counts.traces = traces.len();

        let scorer = PatternScorer::new(&detection.experiment, &traces, params);
        let mut blacklist = Blacklist::new(&detection.experiment);
        let mut hypotheses = scorer.find_hypotheses(&mut blacklist, &mut model);
        counts.hypotheses = hypotheses.len();

        let mut buckets = MassBuckets::from_hypotheses(&hypotheses, params.mass_tolerance);
        buckets.merge_sparse();
        buckets.remove_artifacts();
        buckets.apply_charge_weights(&mut hypotheses, params.sparse_charge_penalty);
        let surviving = buckets.surviving();

        let mut graph = HypothesisDependenceGraph::with_capacity(surviving.len());
        for hypothesis in hypotheses.into_iter() {
            if surviving.binary_search(&hypothesis.id).is_ok() {
                graph.add_hypothesis(hypothesis);
            }
        }
        let solutions = graph.solutions(
            &traces,
            params.isotopes_per_peptide_min,
            params.min_feature_score,
        );
        counts.clusters = solutions.len();
        let mut resolved: Vec<FeatureHypothesis> =
            solutions.into_iter().flat_map(|(_, s)| s).collect();
        resolved.sort_by_key(|h| h.id);

        let features = FeatureEmitter::new(params.quant_method).emit(&resolved, &traces);
        counts.features = features.len();
        debug!("{counts:?}");

        Ok(FeatureFinderOutput {
            traces,
            hypotheses: self.keep_hypotheses.then_some(resolved),
            features,
            counts,
        })
    }
}

/// Find features in `experiment` with `params`
pub fn find_features(
    experiment: &Experiment,
    params: FeatureFinderParams,
) -> Result<Vec<Feature>, FeatureFinderError> {
    FeatureFinder::new(params)
        .find_features(experiment)
        .map(|output| output.features)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::InvalidInput;

    #[test]
    fn test_builder() {
        let finder = FeatureFinder::builder()
            .charge_range((2, 5))
            .mass_error_ppm(10.0)
            .keep_hypotheses(true)
            .build();
        assert_eq!(finder.params.charge_range(), (2, 5));
        assert_eq!(finder.params.mass_error_ppm, 10.0);
        assert!(finder.keep_hypotheses);
    }

    #[test]
    fn test_rejects_bad_params() {
        let finder = FeatureFinder::builder().charge_range((4, 2)).build();
        let exp: Experiment = (0..5).map(|i| (i as f64, vec![(100.0, 500.0)])).collect();
        match finder.find_features(&exp) {
            Err(FeatureFinderError::InvalidInput(InvalidInput::Parameter(_))) => {}
            other => panic!("Expected a parameter error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_signal() {
        let exp: Experiment = (0..5).map(|i| (i as f64, Vec::<(f64, f64)>::new())).collect();
        let output = FeatureFinder::default().find_features(&exp).unwrap();
        assert_eq!(output.counts.spectra, 5);
        assert!(output.features.is_empty());
        assert!(output.hypotheses.is_none());
    }
}
