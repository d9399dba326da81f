//! Conversion of resolved hypotheses into feature records
use crate::hypothesis::{FeatureHypothesis, ScoreType};
use crate::isotopic_model::{NEUTRON_SHIFT, PROTON};
use crate::params::QuantMethod;
use crate::trace::{MassTrace, TracePoint};

/// A charge-resolved LC-MS feature
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Feature {
    pub monoisotopic_mass: f64,
    pub charge: i32,
    pub rt_start: f64,
    pub rt_end: f64,
    pub mz_start: f64,
    pub mz_end: f64,
    /// The summed intensity of every constituent trace
    pub quantitative_value: f64,
    pub quality_score: ScoreType,
    pub constituent_trace_ids: Vec<usize>,
    /// The RT of the most intense point among the constituent traces
    pub apex_rt: f64,
    /// The summed trace intensity of each peptide channel
    pub channel_quantities: Vec<f64>,
}

impl Feature {
    pub fn monoisotopic_mz(&self) -> f64 {
        self.mz_start
    }

    pub fn rt_width(&self) -> f64 {
        self.rt_end - self.rt_start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FeatureEmitter {
    pub quant_method: QuantMethod,
}

impl FeatureEmitter {
    pub fn new(quant_method: QuantMethod) -> Self {
        Self { quant_method }
    }

    pub fn emit_one(&self, hypothesis: &FeatureHypothesis, traces: &[MassTrace]) -> Feature {
        let z = hypothesis.charge.abs() as f64;
        let mono_mz = hypothesis.estimated_monoisotopic_mz(traces);
        let max_shift = hypothesis.mass_shifts.iter().copied().fold(0.0, f64::max);
        let mz_end =
            mono_mz + (max_shift + hypothesis.isotopes_per_peptide_max as f64 * NEUTRON_SHIFT) / z;

        let mut rt_start = f64::INFINITY;
        let mut rt_end = f64::NEG_INFINITY;
        let mut channel_quantities = vec![0.0; hypothesis.channels()];
        let mut constituent_trace_ids = Vec::with_capacity(hypothesis.len());
        for binding in hypothesis.bindings.iter() {
            let trace = &traces[binding.trace];
            rt_start = rt_start.min(trace.rt_start());
            rt_end = rt_end.max(trace.rt_end());
            if let Some(q) = channel_quantities.get_mut(binding.peptide) {
                *q += trace.intensity(self.quant_method);
            }
            constituent_trace_ids.push(binding.trace);
        }
        if constituent_trace_ids.is_empty() {
            rt_start = hypothesis.rt_start;
            rt_end = hypothesis.rt_end;
        }

        let apex_rt = hypothesis
            .bindings
            .iter()
            .filter_map(|b| traces[b.trace].apex())
            .fold(None, |best: Option<&TracePoint>, p| match best {
                Some(b) if b.intensity() >= p.intensity() => Some(b),
                _ => Some(p),
            })
            .or_else(|| traces.get(hypothesis.seed).and_then(|t| t.apex()))
            .map(|p| p.rt)
            .unwrap_or(rt_start);

        Feature {
            monoisotopic_mass: (mono_mz - PROTON) * z,
            charge: hypothesis.charge,
            rt_start,
            rt_end,
            mz_start: mono_mz,
            mz_end,
            quantitative_value: channel_quantities.iter().sum(),
            quality_score: hypothesis.feature_score,
            constituent_trace_ids,
            apex_rt,
            channel_quantities,
        }
    }

    /// Emit one feature per hypothesis in ascending `(rt_start, monoisotopic_mass)` order
    pub fn emit(&self, hypotheses: &[FeatureHypothesis], traces: &[MassTrace]) -> Vec<Feature> {
        let mut features: Vec<Feature> = hypotheses
            .iter()
            .map(|h| self.emit_one(h, traces))
            .collect();
        features.sort_by(|a, b| {
            a.rt_start
                .total_cmp(&b.rt_start)
                .then_with(|| a.monoisotopic_mass.total_cmp(&b.monoisotopic_mass))
        });
        features
    }
}
