//! Mass trace extension.
//!
//! A [`MassTrace`] is grown from an [`Apex`] by walking backward and forward in RT,
//! re-centering the m/z window on the running intensity-weighted centroid after every
//! accepted peak. Traces are only written into the [`TraceRegistry`] once accepted, so
//! an extension that is abandoned part way leaves no trace behind.
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use tracing::{debug, trace};

use crate::apex::Apex;
use crate::blacklist::{CellRef, TraceRegistry};
use crate::error::FeatureFinderError;
use crate::params::{FeatureFinderParams, QuantMethod, TraceTerminationCriterion};
use crate::signal::{FilteredExperiment, Peak};
use crate::stats::{median, update_weighted_sd_robust, IterativeWeightedMean};

/// A peak of a mass trace together with where it came from
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TracePoint {
    pub rt: f64,
    pub cell: CellRef,
    pub peak: Peak,
}

impl TracePoint {
    pub fn mz(&self) -> f64 {
        self.peak.mz
    }

    pub fn intensity(&self) -> f64 {
        self.peak.intensity
    }
}

/// The full width at half maximum of a trace's elution profile
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Fwhm {
    pub start_index: usize,
    pub end_index: usize,
    pub rt_start: f64,
    pub rt_end: f64,
}

impl Fwhm {
    pub fn width(&self) -> f64 {
        self.rt_end - self.rt_start
    }

    /// Locate the half-maximum crossings around the most intense point, interpolating
    /// linearly between the points on either side of each crossing.
    pub fn estimate(rts: &[f64], intensities: &[f64]) -> Option<Self> {
        if rts.is_empty() || rts.len() != intensities.len() {
            return None;
        }
        let (apex, max) = intensities
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, v)| {
                if v > bv {
                    (i, v)
                } else {
                    (bi, bv)
                }
            });
        let half = max / 2.0;

        let mut left = apex;
        while left > 0 && intensities[left - 1] >= half {
            left -= 1;
        }
        let rt_start = if left > 0 {
            interpolate(
                rts[left - 1],
                intensities[left - 1],
                rts[left],
                intensities[left],
                half,
            )
        } else {
            rts[0]
        };

        let n = intensities.len();
        let mut right = apex;
        while right + 1 < n && intensities[right + 1] >= half {
            right += 1;
        }
        let rt_end = if right + 1 < n {
            interpolate(
                rts[right],
                intensities[right],
                rts[right + 1],
                intensities[right + 1],
                half,
            )
        } else {
            rts[n - 1]
        };

        Some(Self {
            start_index: left,
            end_index: right,
            rt_start,
            rt_end,
        })
    }
}

fn interpolate(x0: f64, y0: f64, x1: f64, y1: f64, y: f64) -> f64 {
    let dy = y1 - y0;
    if dy.abs() <= f64::EPSILON {
        (x0 + x1) / 2.0
    } else {
        x0 + (y - y0) * (x1 - x0) / dy
    }
}

/// An accepted mass trace. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MassTrace {
    pub id: usize,
    /// The member peaks in ascending RT order
    pub points: Vec<TracePoint>,
    pub centroid_mz: f64,
    pub centroid_sd: f64,
    pub centroid_rt: f64,
    pub quality: f64,
    pub fwhm: Option<Fwhm>,
    pub area: f64,
    pub median_intensity: f64,
    pub max_intensity: f64,
}

impl MassTrace {
    fn from_points(
        id: usize,
        points: Vec<TracePoint>,
        centroid_mz: f64,
        centroid_sd: f64,
        quality: f64,
    ) -> Self {
        let rts: Vec<f64> = points.iter().map(|p| p.rt).collect();
        let ints: Vec<f64> = points.iter().map(|p| p.intensity()).collect();
        let total: f64 = ints.iter().sum();
        let centroid_rt = if total > 0.0 {
            rts.iter().zip(ints.iter()).map(|(r, i)| r * i).sum::<f64>() / total
        } else {
            rts.first().copied().unwrap_or_default()
        };
        let area = if points.len() < 2 {
            total
        } else {
            rts.windows(2)
                .zip(ints.windows(2))
                .map(|(r, i)| (r[1] - r[0]) * (i[0] + i[1]) / 2.0)
                .sum()
        };
        Self {
            id,
            fwhm: Fwhm::estimate(&rts, &ints),
            median_intensity: median(&ints),
            max_intensity: ints.iter().copied().fold(0.0, f64::max),
            area,
            centroid_rt,
            centroid_mz,
            centroid_sd,
            quality,
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn rt_start(&self) -> f64 {
        self.points.first().map(|p| p.rt).unwrap_or_default()
    }

    pub fn rt_end(&self) -> f64 {
        self.points.last().map(|p| p.rt).unwrap_or_default()
    }

    pub fn rt_range(&self) -> f64 {
        self.rt_end() - self.rt_start()
    }

    /// The RT bounds of the FWHM, or of the whole trace when no FWHM could be estimated
    pub fn fwhm_bounds(&self) -> (f64, f64) {
        match self.fwhm {
            Some(f) => (f.rt_start, f.rt_end),
            None => (self.rt_start(), self.rt_end()),
        }
    }

    /// The points between the FWHM borders, inclusive
    pub fn fwhm_points(&self) -> &[TracePoint] {
        match self.fwhm {
            Some(f) => &self.points[f.start_index..=f.end_index],
            None => &self.points,
        }
    }

    pub fn apex(&self) -> Option<&TracePoint> {
        self.points
            .iter()
            .fold(None, |best: Option<&TracePoint>, p| match best {
                Some(b) if b.intensity() >= p.intensity() => Some(b),
                _ => Some(p),
            })
    }

    pub fn cells(&self) -> impl Iterator<Item = CellRef> + '_ {
        self.points.iter().map(|p| p.cell)
    }

    pub fn intensity(&self, method: QuantMethod) -> f64 {
        match method {
            QuantMethod::Area => self.area,
            QuantMethod::Median => self.median_intensity,
            QuantMethod::MaxHeight => self.max_intensity,
        }
    }
}

/// Per-direction walk state
#[derive(Debug, Default, Clone, Copy)]
struct Walk {
    active: bool,
    hits: usize,
    scans: usize,
    consecutive_misses: usize,
}

/// Builds [`MassTrace`]s from apexes, consulting a [`TraceRegistry`] for peaks
/// already claimed.
#[derive(Debug, Clone)]
pub struct MassTraceExtender {
    pub mass_error_ppm: f64,
    pub criterion: TraceTerminationCriterion,
    pub outlier_cutoff: usize,
    pub min_sample_rate: f64,
    pub min_scans_to_check: usize,
    pub min_trace_length: f64,
    pub max_trace_length: f64,
    pub reestimate_sd: bool,
}

impl Default for MassTraceExtender {
    fn default() -> Self {
        Self::from(&FeatureFinderParams::default())
    }
}

impl From<&FeatureFinderParams> for MassTraceExtender {
    fn from(params: &FeatureFinderParams) -> Self {
        Self {
            mass_error_ppm: params.mass_error_ppm,
            criterion: params.trace_termination_criterion,
            outlier_cutoff: params.trace_termination_outliers,
            min_sample_rate: params.min_sample_rate,
            min_scans_to_check: params.min_scans_to_check,
            min_trace_length: params.min_trace_length,
            max_trace_length: params.max_trace_length,
            reestimate_sd: params.reestimate_mt_sd,
        }
    }
}

impl MassTraceExtender {
    fn should_stop(&self, this: &Walk, other: &Walk) -> bool {
        match self.criterion {
            TraceTerminationCriterion::Outlier => this.consecutive_misses > self.outlier_cutoff,
            TraceTerminationCriterion::SampleRate => {
                if this.scans >= self.min_scans_to_check {
                    let rate =
                        (this.hits + other.hits + 1) as f64 / (this.scans + other.scans + 1) as f64;
                    rate < self.min_sample_rate
                } else {
                    false
                }
            }
        }
    }

    pub fn is_acceptable(&self, rt_range: f64, quality: f64) -> bool {
        rt_range >= self.min_trace_length
            && (self.max_trace_length < 0.0 || rt_range <= self.max_trace_length)
            && quality >= self.min_sample_rate
    }

    /// Try to take the next step from `scan`, returning the point to add if one matches
    fn step(
        &self,
        experiment: &FilteredExperiment,
        registry: &TraceRegistry,
        scan: usize,
        centroid_mz: f64,
        sd: f64,
        walk: &mut Walk,
    ) -> Option<TracePoint> {
        let spec = &experiment.spectra[scan];
        walk.scans += 1;
        // An empty scan is a miss like any other
        let width = 3.0 * sd;
        let hit = spec
            .find_nearest(centroid_mz, width)
            .map(|i| (i, CellRef::new(scan, i)))
            .filter(|(_, cell)| !registry.is_claimed(*cell));
        match hit {
            Some((i, cell)) => {
                walk.hits += 1;
                walk.consecutive_misses = 0;
                Some(TracePoint {
                    rt: spec.rt,
                    cell,
                    peak: spec.peaks[i],
                })
            }
            None => {
                walk.consecutive_misses += 1;
                None
            }
        }
    }

    /// Extend a single apex into a trace.
    ///
    /// Returns `None` when the apex is already claimed or the trace fails the acceptance
    /// test. The registry is only read.
    pub fn extend(
        &self,
        experiment: &FilteredExperiment,
        registry: &TraceRegistry,
        apex: &Apex,
        id: usize,
    ) -> Option<MassTrace> {
        if registry.is_claimed(apex.cell()) {
            return None;
        }
        let seed = *experiment.peak(apex.scan, apex.peak);
        let mut centroid = IterativeWeightedMean::new(seed.mz, seed.intensity);
        let mut sd = seed.mz * self.mass_error_ppm * 1e-6;
        let mut weight_sum = seed.intensity;

        let mut backward: Vec<TracePoint> = Vec::new();
        let mut forward: Vec<TracePoint> = Vec::new();

        let mut down = Walk {
            active: apex.scan > 0,
            ..Default::default()
        };
        let mut up = Walk {
            active: apex.scan + 1 < experiment.len(),
            ..Default::default()
        };
        let mut down_scan = apex.scan;
        let mut up_scan = apex.scan;

        let mut absorb = |point: &TracePoint, centroid: &mut IterativeWeightedMean, sd: &mut f64| {
            centroid.add(point.mz(), point.intensity());
            if self.reestimate_sd {
                if let Some(v) = update_weighted_sd_robust(
                    *sd,
                    weight_sum,
                    point.mz(),
                    point.intensity(),
                    centroid.mean,
                ) {
                    *sd = v;
                }
            }
            weight_sum += point.intensity();
        };

        while down.active || up.active {
            if down.active {
                down_scan -= 1;
                if let Some(point) =
                    self.step(experiment, registry, down_scan, centroid.mean, sd, &mut down)
                {
                    absorb(&point, &mut centroid, &mut sd);
                    backward.push(point);
                }
                if down_scan == 0 || self.should_stop(&down, &up) {
                    down.active = false;
                }
            }
            if up.active {
                up_scan += 1;
                if let Some(point) =
                    self.step(experiment, registry, up_scan, centroid.mean, sd, &mut up)
                {
                    absorb(&point, &mut centroid, &mut sd);
                    forward.push(point);
                }
                if up_scan + 1 >= experiment.len() || self.should_stop(&up, &down) {
                    up.active = false;
                }
            }
        }

        let size = backward.len() + forward.len() + 1;
        let spanned = (down.scans + up.scans + 1)
            .saturating_sub(down.consecutive_misses + up.consecutive_misses)
            .max(1);
        let quality = size as f64 / spanned as f64;

        let mut points = backward;
        points.reverse();
        points.push(TracePoint {
            rt: experiment.spectra[apex.scan].rt,
            cell: apex.cell(),
            peak: seed,
        });
        points.extend(forward);

        let rt_range = points.last().map(|p| p.rt).unwrap_or_default()
            - points.first().map(|p| p.rt).unwrap_or_default();
        if !self.is_acceptable(rt_range, quality) {
            trace!(
                "Rejected trace at {:0.4} from {apex:?}: RT range {rt_range:0.3}, quality {quality:0.3}",
                centroid.mean
            );
            return None;
        }
        Some(MassTrace::from_points(id, points, centroid.mean, sd, quality))
    }

    /// Consume the apex queue in order, accepting traces into `registry` as they are built.
    ///
    /// `cancel` is checked between apexes.
    pub fn detect_traces(
        &self,
        experiment: &FilteredExperiment,
        apexes: &[Apex],
        registry: &mut TraceRegistry,
        cancel: Option<&AtomicBool>,
    ) -> Result<Vec<MassTrace>, FeatureFinderError> {
        let mut traces = Vec::new();
        for (i, apex) in apexes.iter().enumerate() {
            if cancel.is_some_and(|c| c.load(AtomicOrdering::Relaxed)) {
                return Err(FeatureFinderError::Cancelled {
                    completed_apexes: i,
                });
            }
            if let Some(trace) = self.extend(experiment, registry, apex, traces.len()) {
                registry.accept(&trace);
                traces.push(trace);
            }
        }
        debug!(
            "Accepted {} mass traces from {} apexes",
            traces.len(),
            apexes.len()
        );
        Ok(traces)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::apex::ApexDetector;
    use crate::signal::Experiment;

    macro_rules! assert_is_close {
        ($t1:expr, $t2:expr, $tol:expr, $label:literal) => {
            assert!(
                ($t1 - $t2).abs() < $tol,
                "Observed {} {}, expected {}, difference {}",
                $label,
                $t1,
                $t2,
                $t1 - $t2,
            );
        };
    }

    /// A single trace at m/z 500 present in scans 2..=7, with a weak off-target peak
    /// filling every scan
    fn boundary_experiment() -> Experiment {
        (0..10)
            .map(|i| {
                let mut peaks = Vec::new();
                if (2..=7).contains(&i) {
                    let x = i as f64 - 4.5;
                    peaks.push((500.0 + 0.0005 * (i % 2) as f64, 1000.0 * (-x * x / 8.0).exp()));
                }
                peaks.push((900.0, 20.0));
                (i as f64, peaks)
            })
            .collect()
    }

    fn extender(min_trace_length: f64) -> MassTraceExtender {
        MassTraceExtender {
            min_trace_length,
            ..Default::default()
        }
    }

    #[test]
    fn test_boundary_inclusive() {
        let exp = boundary_experiment();
        let det = ApexDetector::new(10.0, 3.0).detect(&exp).unwrap();
        let registry = TraceRegistry::new(&det.experiment);
        let apex = det.apexes[0];

        let trace = extender(5.0)
            .extend(&det.experiment, &registry, &apex, 0)
            .unwrap();
        assert_eq!(trace.len(), 6);
        assert_is_close!(trace.rt_range(), 5.0, 1e-12, "rt range");
        assert_is_close!(trace.quality, 1.0, 1e-12, "quality");

        assert!(extender(5.0 + 1e-6)
            .extend(&det.experiment, &registry, &apex, 0)
            .is_none());
        assert!(MassTraceExtender {
            max_trace_length: 4.0,
            ..extender(1.0)
        }
        .extend(&det.experiment, &registry, &apex, 0)
        .is_none());
    }

    #[test]
    fn test_trace_summaries() {
        let exp = boundary_experiment();
        let det = ApexDetector::new(10.0, 3.0).detect(&exp).unwrap();
        let mut registry = TraceRegistry::new(&det.experiment);
        let traces = extender(5.0)
            .detect_traces(&det.experiment, &det.apexes, &mut registry, None)
            .unwrap();
        assert_eq!(traces.len(), 1);
        let trace = &traces[0];

        let total: f64 = trace.points.iter().map(|p| p.intensity()).sum();
        let expected: f64 = trace.points.iter().map(|p| p.mz() * p.intensity()).sum::<f64>() / total;
        assert_is_close!(trace.centroid_mz, expected, 1e-9, "centroid");
        assert_is_close!(trace.centroid_rt, 4.5, 1e-9, "centroid rt");
        assert!(trace.points.windows(2).all(|w| w[0].rt < w[1].rt));

        let fwhm = trace.fwhm.unwrap();
        assert!(fwhm.rt_start > 2.0 && fwhm.rt_start < 4.0);
        assert_is_close!(fwhm.rt_end - 4.5, 4.5 - fwhm.rt_start, 1e-9, "symmetry");
        assert_eq!(trace.intensity(QuantMethod::MaxHeight), trace.max_intensity);
        assert!(trace.intensity(QuantMethod::Area) > 0.0);
        assert_eq!(registry.accepted(), 1);
    }

    #[test]
    fn test_extension_idempotent() {
        let exp = boundary_experiment();
        let det = ApexDetector::new(10.0, 3.0).detect(&exp).unwrap();
        let mut registry = TraceRegistry::new(&det.experiment);
        let ext = extender(5.0);
        let apex = det.apexes[0];
        let first = ext.extend(&det.experiment, &registry, &apex, 0).unwrap();
        let again = ext.extend(&det.experiment, &registry, &apex, 0).unwrap();
        assert_eq!(first, again);

        registry.accept(&first);
        for apex in det.apexes.iter() {
            assert!(ext.extend(&det.experiment, &registry, apex, 1).is_none());
        }
    }

    #[test]
    fn test_cancellation() {
        let exp = boundary_experiment();
        let det = ApexDetector::new(10.0, 3.0).detect(&exp).unwrap();
        let mut registry = TraceRegistry::new(&det.experiment);
        let flag = AtomicBool::new(true);
        let err = extender(5.0)
            .detect_traces(&det.experiment, &det.apexes, &mut registry, Some(&flag))
            .unwrap_err();
        assert_eq!(err, FeatureFinderError::Cancelled { completed_apexes: 0 });
        assert_eq!(registry.accepted(), 0);
        assert_eq!(registry.unclaimed(), det.experiment.peak_count());
    }

    /// The trace of [`boundary_experiment`] in a run of `n_scans` with nothing else in it
    fn sparse_experiment(n_scans: usize) -> Experiment {
        (0..n_scans)
            .map(|i| {
                let mut peaks = Vec::new();
                if (2..=7).contains(&i) {
                    let x = i as f64 - 4.5;
                    peaks.push((500.0 + 0.0005 * (i % 2) as f64, 1000.0 * (-x * x / 8.0).exp()));
                }
                (i as f64, peaks)
            })
            .collect()
    }

    #[test]
    fn test_trailing_empty_scans() {
        for criterion in [
            TraceTerminationCriterion::Outlier,
            TraceTerminationCriterion::SampleRate,
        ] {
            for n_scans in [10, 12, 20, 60] {
                let exp = sparse_experiment(n_scans);
                let det = ApexDetector::new(10.0, 3.0).detect(&exp).unwrap();
                let registry = TraceRegistry::new(&det.experiment);
                let ext = MassTraceExtender {
                    criterion,
                    ..extender(5.0)
                };
                let trace = ext
                    .extend(&det.experiment, &registry, &det.apexes[0], 0)
                    .unwrap_or_else(|| panic!("{criterion:?} lost the trace in {n_scans} scans"));
                assert_eq!(trace.len(), 6);
                assert_is_close!(trace.quality, 1.0, 1e-12, "quality");
            }
        }
    }

    #[test]
    fn test_gap_terminates_trace() {
        // the same trace again at half height after a gap of 8 empty scans
        let exp: Experiment = (0..24)
            .map(|i| {
                let (center, scale) = if i < 12 { (4.5, 1000.0) } else { (18.5, 500.0) };
                let x = i as f64 - center;
                let peaks = if x.abs() < 3.0 {
                    vec![(500.0 + 0.0005 * (i % 2) as f64, scale * (-x * x / 8.0).exp())]
                } else {
                    Vec::new()
                };
                (i as f64, peaks)
            })
            .collect();
        let det = ApexDetector::new(10.0, 3.0).detect(&exp).unwrap();
        let mut registry = TraceRegistry::new(&det.experiment);
        let traces = extender(5.0)
            .detect_traces(&det.experiment, &det.apexes, &mut registry, None)
            .unwrap();
        assert_eq!(traces.len(), 2);
        assert_is_close!(traces[0].rt_start(), 2.0, 1e-12, "first start");
        assert_is_close!(traces[0].rt_end(), 7.0, 1e-12, "first end");
        assert_is_close!(traces[1].rt_start(), 16.0, 1e-12, "second start");
        assert_is_close!(traces[1].rt_end(), 21.0, 1e-12, "second end");
        assert!(traces.iter().all(|t| t.len() == 6));
    }

    #[test]
    fn test_sample_rate_mode() {
        let exp: Experiment = (0..12)
            .map(|i| {
                let peaks = if i % 3 == 0 || (4..=6).contains(&i) {
                    vec![(500.0, 1000.0 - (i as f64 - 5.0).abs())]
                } else {
                    vec![(700.0, 15.0)]
                };
                (i as f64, peaks)
            })
            .collect();
        let det = ApexDetector::new(10.0, 3.0).detect(&exp).unwrap();
        let registry = TraceRegistry::new(&det.experiment);
        let ext = MassTraceExtender {
            criterion: TraceTerminationCriterion::SampleRate,
            min_scans_to_check: 2,
            min_sample_rate: 0.5,
            ..extender(1.0)
        };
        let trace = ext.extend(&det.experiment, &registry, &det.apexes[0], 0).unwrap();
        assert!(trace.quality >= 0.5);
        assert!(trace.len() >= 3);
    }
}
