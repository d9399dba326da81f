//! Charge-resolved isotopic pattern hypotheses assembled from mass traces
use std::collections::HashSet;

use crate::isotopic_model::{NEUTRON_SHIFT, PROTON};
use crate::trace::MassTrace;

/// The scoring type used throughout hypothesis resolution. Larger is better.
pub type ScoreType = f64;

/// A mass trace standing in for one isotope position of one peptide channel
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TraceBinding {
    pub peptide: usize,
    pub isotope: usize,
    /// The id of the bound [`MassTrace`]
    pub trace: usize,
    /// This binding's share of the feature score
    pub score: ScoreType,
}

/// The sub-scores a hypothesis was accepted with
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ComponentScores {
    /// The fraction of the isotope ladder found in every channel
    pub charge: ScoreType,
    pub mz: ScoreType,
    pub rt: ScoreType,
    pub intensity: ScoreType,
    /// The weakest averagine correlation over all channels
    pub averagine: ScoreType,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureHypothesis {
    pub id: usize,
    pub charge: i32,
    /// The channel mass offsets of the pattern this hypothesis was built from
    pub mass_shifts: Vec<f64>,
    pub isotopes_per_peptide_max: usize,
    /// The id of the seed [`MassTrace`], the monoisotopic trace of the first channel
    pub seed: usize,
    pub bindings: Vec<TraceBinding>,
    pub scores: ComponentScores,
    pub charge_weight: ScoreType,
    pub feature_score: ScoreType,
    pub monoisotopic_mz: f64,
    pub rt_start: f64,
    pub rt_end: f64,
    pub fwhm_start: f64,
    pub fwhm_end: f64,
}

impl FeatureHypothesis {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        charge: i32,
        mass_shifts: Vec<f64>,
        isotopes_per_peptide_max: usize,
        seed: usize,
        bindings: Vec<TraceBinding>,
        scores: ComponentScores,
        traces: &[MassTrace],
    ) -> Self {
        let mut this = Self {
            id,
            charge,
            mass_shifts,
            isotopes_per_peptide_max,
            seed,
            bindings,
            scores,
            charge_weight: 1.0,
            feature_score: 0.0,
            monoisotopic_mz: traces[seed].centroid_mz,
            rt_start: 0.0,
            rt_end: 0.0,
            fwhm_start: 0.0,
            fwhm_end: 0.0,
        };
        this.update(traces);
        this
    }

    /// The neutral mass implied by the seed trace
    pub fn mass(&self) -> f64 {
        (self.monoisotopic_mz - PROTON) * self.charge.abs() as f64
    }

    pub fn channels(&self) -> usize {
        self.mass_shifts.len().max(1)
    }

    pub fn trace_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.bindings.iter().map(|b| b.trace)
    }

    pub fn contains_trace(&self, trace: usize) -> bool {
        self.bindings.iter().any(|b| b.trace == trace)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// The binding with the lowest isotope index of the given channel
    pub fn first_binding(&self, peptide: usize) -> Option<&TraceBinding> {
        self.bindings
            .iter()
            .filter(|b| b.peptide == peptide)
            .min_by_key(|b| b.isotope)
    }

    /// The monoisotopic m/z estimated from the first remaining trace of the first channel
    pub fn estimated_monoisotopic_mz(&self, traces: &[MassTrace]) -> f64 {
        match self.first_binding(0) {
            Some(b) => {
                traces[b.trace].centroid_mz
                    - b.isotope as f64 * NEUTRON_SHIFT / self.charge.abs() as f64
            }
            None => self.monoisotopic_mz,
        }
    }

    pub fn set_charge_weight(&mut self, weight: ScoreType) {
        self.charge_weight = weight;
        self.update_score();
    }

    fn update_score(&mut self) {
        self.feature_score =
            self.charge_weight * self.bindings.iter().map(|b| b.score).sum::<f64>();
    }

    fn update(&mut self, traces: &[MassTrace]) {
        self.update_score();
        let mut rt_start = f64::INFINITY;
        let mut rt_end = f64::NEG_INFINITY;
        let mut fwhm_start = f64::INFINITY;
        let mut fwhm_end = f64::NEG_INFINITY;
        for b in self.bindings.iter() {
            let t = &traces[b.trace];
            rt_start = rt_start.min(t.rt_start());
            rt_end = rt_end.max(t.rt_end());
            let (fs, fe) = t.fwhm_bounds();
            fwhm_start = fwhm_start.min(fs);
            fwhm_end = fwhm_end.max(fe);
        }
        if self.bindings.is_empty() {
            rt_start = 0.0;
            rt_end = 0.0;
            fwhm_start = 0.0;
            fwhm_end = 0.0;
        }
        self.rt_start = rt_start;
        self.rt_end = rt_end;
        self.fwhm_start = fwhm_start;
        self.fwhm_end = fwhm_end;
    }

    /// Drop every binding to a trace in `removed`, recomputing the feature score and
    /// ranges. Returns the number of bindings dropped.
    pub fn remove_traces(&mut self, removed: &HashSet<usize>, traces: &[MassTrace]) -> usize {
        let before = self.bindings.len();
        self.bindings.retain(|b| !removed.contains(&b.trace));
        let dropped = before - self.bindings.len();
        if dropped > 0 {
            self.update(traces);
        }
        dropped
    }

    /// Whether every channel still has at least `min_isotopes` bound traces
    pub fn is_viable(&self, min_isotopes: usize) -> bool {
        (0..self.channels()).all(|p| {
            self.bindings.iter().filter(|b| b.peptide == p).count() >= min_isotopes
        })
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::blacklist::CellRef;
    use crate::signal::Peak;
    use crate::trace::{MassTrace, TracePoint};

    /// A synthetic trace spanning `rt_start..=rt_start + 4` at `mz`
    pub(crate) fn make_trace(id: usize, mz: f64, rt_start: f64, intensity: f64) -> MassTrace {
        let points = (0..5)
            .map(|i| TracePoint {
                rt: rt_start + i as f64,
                cell: CellRef::new(i, id),
                peak: Peak::new(mz, intensity * [0.25, 0.75, 1.0, 0.75, 0.25][i], i),
            })
            .collect();
        MassTrace {
            id,
            points,
            centroid_mz: mz,
            centroid_sd: 0.001,
            centroid_rt: rt_start + 2.0,
            quality: 1.0,
            fwhm: None,
            area: intensity * 3.0,
            median_intensity: intensity * 0.75,
            max_intensity: intensity,
        }
    }

    pub(crate) fn make_hypothesis(
        id: usize,
        charge: i32,
        seed: usize,
        bound: &[(usize, f64)],
        traces: &[MassTrace],
    ) -> FeatureHypothesis {
        let bindings = bound
            .iter()
            .enumerate()
            .map(|(i, (trace, score))| TraceBinding {
                peptide: 0,
                isotope: i,
                trace: *trace,
                score: *score,
            })
            .collect();
        FeatureHypothesis::new(
            id,
            charge,
            vec![0.0],
            6,
            seed,
            bindings,
            ComponentScores::default(),
            traces,
        )
    }

    #[test]
    fn test_remove_traces() {
        let traces: Vec<_> = (0..4)
            .map(|i| make_trace(i, 500.0 + i as f64 * 0.5, i as f64, 100.0))
            .collect();
        let mut hyp = make_hypothesis(0, 2, 0, &[(0, 0.4), (1, 0.3), (2, 0.2), (3, 0.1)], &traces);
        assert!((hyp.feature_score - 1.0).abs() < 1e-12);
        assert_eq!(hyp.rt_start, 0.0);
        assert_eq!(hyp.rt_end, 7.0);
        assert!((hyp.mass() - (500.0 - PROTON) * 2.0).abs() < 1e-9);

        let removed: HashSet<usize> = [0, 3].into_iter().collect();
        assert_eq!(hyp.remove_traces(&removed, &traces), 2);
        assert!((hyp.feature_score - 0.5).abs() < 1e-12);
        assert_eq!(hyp.rt_start, 1.0);
        assert!(!hyp.is_viable(3));
        assert!(hyp.is_viable(2));

        let mono = hyp.estimated_monoisotopic_mz(&traces);
        assert!((mono - (500.5 - NEUTRON_SHIFT / 2.0)).abs() < 1e-9);

        hyp.set_charge_weight(0.5);
        assert!((hyp.feature_score - 0.25).abs() < 1e-12);
    }
}
