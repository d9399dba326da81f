//! Isotopic pattern scoring.
//!
//! Each accepted [`MassTrace`] is tried as the monoisotopic trace of the first peptide
//! channel of a [`MultiplexPattern`] at every charge state. Raw satellite peaks are
//! collected for every isotope position and checked against the averagine envelope and
//! across channels. Patterns that pass are turned into [`FeatureHypothesis`] instances by
//! binding nearby mass traces to each isotope position. Finally the satellites of every
//! accepted pattern are claimed in the pattern [`Blacklist`].
use std::collections::{BTreeMap, HashMap, HashSet};

use itertools::Itertools;
use mzpeaks::Tolerance;
use tracing::{debug, trace, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::blacklist::{Blacklist, CellRef, CellState};
use crate::charge::ChargeRangeIter;
use crate::error::PatternRejection;
use crate::hypothesis::{ComponentScores, FeatureHypothesis, ScoreType, TraceBinding};
use crate::isotopic_model::{CachingIsotopicModel, NEUTRON_SHIFT, PROTON};
use crate::params::FeatureFinderParams;
use crate::signal::FilteredExperiment;
use crate::stats::{cosine, pearson, spearman};
use crate::trace::MassTrace;

/// A peak counts as significant in the zeroth peak and charge checks above this
/// fraction of the monoisotopic peak's intensity
const SIGNIFICANT_PEAK_RATIO: f64 = 0.3;

/// Stop binding traces to a channel after this many consecutive isotopes went unbound
const MAX_CONSECUTIVE_BINDING_MISSES: usize = 3;

/// The m/z offsets at which peaks of a charged multiplet are expected, relative to the
/// monoisotopic peak of the first channel.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiplexPattern {
    pub charge: i32,
    /// Channel mass offsets in Daltons, relative to the first channel
    pub mass_shifts: Vec<f64>,
    pub isotopes: usize,
}

impl MultiplexPattern {
    pub fn new(charge: i32, mass_shifts: &[f64], isotopes: usize) -> Self {
        let base = mass_shifts.first().copied().unwrap_or_default();
        let mass_shifts = if mass_shifts.is_empty() {
            vec![0.0]
        } else {
            mass_shifts.iter().map(|s| s - base).collect()
        };
        Self {
            charge,
            mass_shifts,
            isotopes,
        }
    }

    pub fn peptides(&self) -> usize {
        self.mass_shifts.len()
    }

    #[inline]
    pub fn shift(&self, peptide: usize, isotope: usize) -> f64 {
        (self.mass_shifts[peptide] + isotope as f64 * NEUTRON_SHIFT) / self.charge.abs() as f64
    }

    #[inline]
    pub fn shift_index(&self, peptide: usize, isotope: usize) -> usize {
        peptide * self.isotopes + isotope
    }

    pub fn len(&self) -> usize {
        self.peptides() * self.isotopes
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The widest m/z offset of the pattern
    pub fn max_shift(&self) -> f64 {
        let top = self.mass_shifts.iter().copied().fold(0.0, f64::max);
        (top + self.isotopes as f64 * NEUTRON_SHIFT) / self.charge.abs() as f64
    }
}

/// A raw peak supporting one isotope position of a pattern
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Satellite {
    /// The scan of the seed trace peak this satellite was found around
    pub seed_scan: usize,
    pub cell: CellRef,
    pub rt: f64,
    pub mz: f64,
    pub intensity: f64,
}

/// Satellites grouped by isotope position, indexed by [`MultiplexPattern::shift_index`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SatelliteSet {
    pub by_index: Vec<Vec<Satellite>>,
}

impl SatelliteSet {
    pub fn get(&self, index: usize) -> &[Satellite] {
        &self.by_index[index]
    }

    pub fn contains_cell(&self, cell: CellRef) -> bool {
        self.by_index
            .iter()
            .any(|sats| sats.iter().any(|s| s.cell == cell))
    }

    pub fn len(&self) -> usize {
        self.by_index.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A pattern that passed every check, waiting to be claimed
#[derive(Debug, Clone)]
pub struct ScoredPattern {
    pub pattern: MultiplexPattern,
    pub satellites: SatelliteSet,
    pub bindings: Vec<TraceBinding>,
    pub scores: ComponentScores,
}

fn tolerance_width(tolerance: &Tolerance, mz: f64) -> f64 {
    match tolerance {
        Tolerance::PPM(ppm) => mz * ppm * 1e-6,
        Tolerance::Da(da) => *da,
    }
}

/// The largest cosine of `observed` against `envelope` over the first few alignments
fn best_offset_cosine(observed: &[f64], envelope: &[f64]) -> f64 {
    let top = observed.iter().copied().fold(0.0, f64::max);
    if top <= 0.0 || observed.len() > envelope.len() {
        return 0.0;
    }
    let normed: Vec<f64> = observed.iter().map(|v| v / top).collect();
    let last = (envelope.len() - observed.len()).min(2);
    (0..=last)
        .map(|o| cosine(&normed, &envelope[o..o + normed.len()]))
        .fold(0.0, f64::max)
}

/// Scores isotopic patterns around each mass trace
#[derive(Debug)]
pub struct PatternScorer<'a> {
    experiment: &'a FilteredExperiment,
    traces: &'a [MassTrace],
    params: &'a FeatureFinderParams,
    tolerance: Tolerance,
    /// Trace indices in ascending m/z order, ties by id
    by_mz: Vec<usize>,
}

impl<'a> PatternScorer<'a> {
    pub fn new(
        experiment: &'a FilteredExperiment,
        traces: &'a [MassTrace],
        params: &'a FeatureFinderParams,
    ) -> Self {
        let mut by_mz: Vec<usize> = (0..traces.len()).collect();
        by_mz.sort_by(|a, b| {
            traces[*a]
                .centroid_mz
                .total_cmp(&traces[*b].centroid_mz)
                .then_with(|| traces[*a].id.cmp(&traces[*b].id))
        });
        Self {
            experiment,
            traces,
            params,
            tolerance: params.mz_tolerance(),
            by_mz,
        }
    }

    #[inline]
    fn width(&self, mz: f64) -> f64 {
        tolerance_width(&self.tolerance, mz)
    }

    /// The traces within the local RT and m/z neighborhood of `seed`, in ascending m/z order
    pub fn local_window(&self, seed: &MassTrace, max_shift: f64) -> Vec<usize> {
        let low = seed.centroid_mz - self.params.local_mz_range;
        let high = seed.centroid_mz + self.params.local_mz_range.max(max_shift + 1.0);
        let start = self
            .by_mz
            .partition_point(|i| self.traces[*i].centroid_mz < low);
        self.by_mz[start..]
            .iter()
            .copied()
            .take_while(|i| self.traces[*i].centroid_mz <= high)
            .filter(|i| {
                *i != seed.id
                    && (self.traces[*i].centroid_rt - seed.centroid_rt).abs()
                        <= self.params.local_rt_range
            })
            .collect()
    }

    pub fn collect_satellites(
        &self,
        seed: &MassTrace,
        pattern: &MultiplexPattern,
        blacklist: &Blacklist,
    ) -> SatelliteSet {
        let mut by_index = vec![Vec::new(); pattern.len()];
        let mut seen: Vec<HashSet<CellRef>> = vec![HashSet::new(); pattern.len()];
        let band = self.params.rt_band;
        for point in seed.points.iter() {
            let begin = self.experiment.rt_begin(point.rt - band);
            let end = self.experiment.rt_end(point.rt + band);
            for scan in begin..end {
                let spec = &self.experiment.spectra[scan];
                for p in 0..pattern.peptides() {
                    for i in 0..pattern.isotopes {
                        let idx = pattern.shift_index(p, i);
                        let target = point.mz() + pattern.shift(p, i);
                        if let Some(j) = spec.find_nearest(target, self.width(target)) {
                            let cell = CellRef::new(scan, j);
                            if blacklist.is_available_for(cell, idx as u32) && seen[idx].insert(cell)
                            {
                                let peak = &spec.peaks[j];
                                by_index[idx].push(Satellite {
                                    seed_scan: point.cell.scan,
                                    cell,
                                    rt: spec.rt,
                                    mz: peak.mz,
                                    intensity: peak.intensity,
                                });
                            }
                        }
                    }
                }
            }
        }
        SatelliteSet { by_index }
    }

    /// The number of consecutive isotope positions, from the monoisotopic peak, with
    /// satellites in every channel
    pub fn isotope_run_length(&self, pattern: &MultiplexPattern, satellites: &SatelliteSet) -> usize {
        (0..pattern.isotopes)
            .take_while(|i| {
                (0..pattern.peptides())
                    .all(|p| !satellites.get(pattern.shift_index(p, *i)).is_empty())
            })
            .count()
    }

    /// Reject patterns missing their true monoisotopic peak or better explained by a
    /// higher charge state
    pub fn check_monoisotopic_and_charge(
        &self,
        seed: &MassTrace,
        pattern: &MultiplexPattern,
        satellites: &SatelliteSet,
    ) -> Result<(), PatternRejection> {
        let apex = match seed.apex() {
            Some(apex) => apex,
            None => return Err(PatternRejection::NotViable),
        };
        let spec = &self.experiment.spectra[apex.cell.scan];
        let threshold = apex.intensity() * SIGNIFICANT_PEAK_RATIO;
        let significant = |mz: f64| -> Option<CellRef> {
            spec.find_nearest(mz, 2.0 * self.width(mz))
                .filter(|j| spec.peaks[*j].intensity > threshold)
                .map(|j| CellRef::new(apex.cell.scan, j))
        };

        let z = pattern.charge.abs();
        let sign = pattern.charge.signum();
        for p in 0..pattern.peptides() {
            let s0 = pattern.shift(p, 0);
            let s1 = pattern.shift(p, 1);
            if let Some(cell) = significant(apex.mz() + 2.0 * s0 - s1) {
                if !satellites.contains_cell(cell) {
                    return Err(PatternRejection::ZerothPeak);
                }
            }
            let alternatives: Vec<(i32, f64)> = match z {
                1 => (2..=6)
                    .map(|c| {
                        let c_ = c as f64;
                        (c, s0 * (c_ - 1.0) / c_ + s1 / c_)
                    })
                    .collect(),
                2 => vec![(4, s0 / 2.0 + s1 / 2.0), (6, 2.0 * s0 / 3.0 + s1 / 3.0)],
                3 => vec![(6, s0 / 2.0 + s1 / 2.0)],
                _ => Vec::new(),
            };
            for (alternative, offset) in alternatives {
                if significant(apex.mz() + offset).is_some() {
                    return Err(PatternRejection::MistakenCharge {
                        alternative: alternative * sign,
                    });
                }
            }
        }
        Ok(())
    }

    /// Correlate each channel's mean isotope intensities with its averagine envelope,
    /// returning the weakest Pearson correlation
    pub fn averagine_correlation(
        &self,
        pattern: &MultiplexPattern,
        satellites: &SatelliteSet,
        envelopes: &[Vec<f64>],
    ) -> Result<ScoreType, PatternRejection> {
        let threshold = self.params.effective_averagine_similarity();
        let mut worst: ScoreType = 1.0;
        for (p, envelope) in envelopes.iter().enumerate().take(pattern.peptides()) {
            let n = (0..pattern.isotopes)
                .take_while(|i| !satellites.get(pattern.shift_index(p, *i)).is_empty())
                .count();
            if n < self.params.isotopes_per_peptide_min {
                return Err(PatternRejection::InsufficientIsotopes { found: n });
            }
            let per_isotope: Vec<BTreeMap<usize, f64>> = (0..n)
                .map(|i| {
                    let mut acc: BTreeMap<usize, f64> = BTreeMap::new();
                    for s in satellites.get(pattern.shift_index(p, i)) {
                        *acc.entry(s.seed_scan).or_default() += s.intensity;
                    }
                    acc
                })
                .collect();
            let mut common: Vec<usize> = per_isotope[0]
                .keys()
                .copied()
                .filter(|k| per_isotope.iter().all(|m| m.contains_key(k)))
                .collect();
            common.sort_unstable();
            let observed: Vec<f64> = per_isotope
                .iter()
                .map(|m| {
                    if common.is_empty() {
                        m.values().sum::<f64>() / m.len() as f64
                    } else {
                        common.iter().map(|k| m[k]).sum::<f64>() / common.len() as f64
                    }
                })
                .collect();
            let expected = &envelope[..n];
            let r = pearson(&observed, expected);
            let rho = spearman(&observed, expected);
            if r < threshold || rho < threshold {
                trace!("Averagine correlation {r:0.3}/{rho:0.3} below {threshold:0.3}");
                return Err(PatternRejection::AveragineCorrelation);
            }
            worst = worst.min(r);
        }
        Ok(worst)
    }

    /// Correlate the coincident satellite intensities of every pair of channels
    pub fn peptide_correlation(
        &self,
        pattern: &MultiplexPattern,
        satellites: &SatelliteSet,
        length: usize,
    ) -> Result<(), PatternRejection> {
        let threshold = self.params.peptide_similarity;
        for (a, b) in (0..pattern.peptides()).tuple_combinations() {
            let mut x = Vec::new();
            let mut y = Vec::new();
            for i in 0..length {
                let by_scan: HashMap<usize, f64> = satellites
                    .get(pattern.shift_index(b, i))
                    .iter()
                    .map(|s| (s.cell.scan, s.intensity))
                    .collect();
                for s in satellites.get(pattern.shift_index(a, i)) {
                    if let Some(v) = by_scan.get(&s.cell.scan) {
                        x.push(s.intensity);
                        y.push(*v);
                    }
                }
            }
            if x.is_empty() {
                return Err(PatternRejection::NoCoincidentPeaks);
            }
            if pearson(&x, &y) < threshold || spearman(&x, &y) < threshold {
                return Err(PatternRejection::PeptideCorrelation);
            }
        }
        Ok(())
    }

    /// The cosine similarity of two traces' intensities at the scans both cover within
    /// their FWHM
    pub fn rt_score(&self, a: &MassTrace, b: &MassTrace) -> ScoreType {
        let a_points: HashMap<usize, f64> = a
            .fwhm_points()
            .iter()
            .map(|p| (p.cell.scan, p.intensity()))
            .collect();
        let mut x = Vec::new();
        let mut y = Vec::new();
        for p in b.fwhm_points() {
            if let Some(v) = a_points.get(&p.cell.scan) {
                x.push(*v);
                y.push(p.intensity());
            }
        }
        cosine(&x, &y)
    }

    /// A Gaussian score for the m/z distance between two traces around the expected shift
    pub fn mz_score(&self, seed: &MassTrace, other: &MassTrace, shift: f64) -> ScoreType {
        let sigma = (seed.centroid_sd.powi(2) + other.centroid_sd.powi(2)).sqrt();
        let diff = other.centroid_mz - (seed.centroid_mz + shift);
        if sigma <= 0.0 || diff.abs() > 3.0 * sigma {
            return 0.0;
        }
        (-diff * diff / (2.0 * sigma * sigma)).exp()
    }

    /// Bind the best local trace to each isotope position of each channel
    pub fn bind_traces(
        &self,
        seed: &MassTrace,
        pattern: &MultiplexPattern,
        envelopes: &[Vec<f64>],
        window: &[usize],
    ) -> (Vec<TraceBinding>, ComponentScores) {
        let quant = self.params.quant_method;
        let seed_intensity = seed.intensity(quant);
        // (peptide, isotope, trace, intensity, pair score)
        let mut chosen: Vec<(usize, usize, usize, f64, f64)> =
            vec![(0, 0, seed.id, seed_intensity, 1.0)];
        let mut used: HashSet<usize> = HashSet::from([seed.id]);
        let mut mz_scores = Vec::new();
        let mut rt_scores = Vec::new();
        let mut intensity_score = 0.0;

        for (p, envelope) in envelopes.iter().enumerate().take(pattern.peptides()) {
            let mut observed = vec![0.0; pattern.isotopes];
            let start = if p == 0 {
                observed[0] = seed_intensity;
                1
            } else {
                0
            };
            let mut misses = 0;
            for i in start..pattern.isotopes {
                let shift = pattern.shift(p, i);
                let mut best: Option<(usize, f64, f64, f64, f64)> = None;
                for t in window.iter().copied() {
                    if used.contains(&t) {
                        continue;
                    }
                    let trace = &self.traces[t];
                    let mz_score = self.mz_score(seed, trace, shift);
                    if mz_score <= 0.0 {
                        continue;
                    }
                    let rt_score = self.rt_score(seed, trace);
                    if rt_score <= 0.0 {
                        continue;
                    }
                    let t_int = trace.intensity(quant);
                    let mut hyp = observed[..=i].to_vec();
                    hyp[i] = t_int;
                    let int_score = best_offset_cosine(&hyp, envelope);
                    if int_score <= 0.0 {
                        continue;
                    }
                    let pair = (rt_score.ln() + mz_score.ln() + int_score.ln()).exp();
                    if best.map(|b| pair > b.1).unwrap_or(true) {
                        best = Some((t, pair, t_int, mz_score, rt_score));
                    }
                }
                match best {
                    Some((t, pair, t_int, mz_score, rt_score)) => {
                        observed[i] = t_int;
                        used.insert(t);
                        chosen.push((p, i, t, t_int, pair));
                        mz_scores.push(mz_score);
                        rt_scores.push(rt_score);
                        misses = 0;
                    }
                    None => {
                        misses += 1;
                        if misses >= MAX_CONSECUTIVE_BINDING_MISSES {
                            break;
                        }
                    }
                }
            }
            if p == 0 {
                let last = observed.iter().rposition(|v| *v > 0.0).unwrap_or(0);
                intensity_score = best_offset_cosine(&observed[..=last], envelope);
            }
        }

        let total: f64 = chosen.iter().map(|c| c.3).sum();
        let bindings = chosen
            .iter()
            .map(|(peptide, isotope, trace, intensity, pair)| TraceBinding {
                peptide: *peptide,
                isotope: *isotope,
                trace: *trace,
                score: if total > 0.0 {
                    intensity * pair / total
                } else {
                    0.0
                },
            })
            .collect();
        let mean_or_one = |v: &[f64]| {
            if v.is_empty() {
                1.0
            } else {
                v.iter().sum::<f64>() / v.len() as f64
            }
        };
        let scores = ComponentScores {
            charge: 0.0,
            mz: mean_or_one(&mz_scores),
            rt: mean_or_one(&rt_scores),
            intensity: intensity_score,
            averagine: 0.0,
        };
        (bindings, scores)
    }

    /// Run every check for one seed and charge state without touching shared state
    pub fn score_charge(
        &self,
        seed: &MassTrace,
        pattern: &MultiplexPattern,
        blacklist: &Blacklist,
        envelopes: &[Vec<f64>],
        window: &[usize],
    ) -> Result<ScoredPattern, PatternRejection> {
        let satellites = self.collect_satellites(seed, pattern, blacklist);
        let length = self.isotope_run_length(pattern, &satellites);
        if length < self.params.isotopes_per_peptide_min {
            return Err(PatternRejection::IsotopeRunTooShort { length });
        }
        self.check_monoisotopic_and_charge(seed, pattern, &satellites)?;
        let averagine = self.averagine_correlation(pattern, &satellites, envelopes)?;
        if pattern.peptides() > 1 {
            self.peptide_correlation(pattern, &satellites, length)?;
        }
        let (bindings, mut scores) = self.bind_traces(seed, pattern, envelopes, window);
        let viable = (0..pattern.peptides()).all(|p| {
            bindings.iter().filter(|b| b.peptide == p).count()
                >= self.params.isotopes_per_peptide_min
        });
        if !viable {
            return Err(PatternRejection::NotViable);
        }
        scores.charge = length as f64 / pattern.isotopes as f64;
        scores.averagine = averagine;
        Ok(ScoredPattern {
            pattern: pattern.clone(),
            satellites,
            bindings,
            scores,
        })
    }

    /// Claim the satellites of an accepted pattern, and the peaks nearest their
    /// expected m/z across the satellites' RT span widened by twice the RT band
    pub fn claim(&self, seed: &MassTrace, scored: &ScoredPattern, blacklist: &mut Blacklist) {
        let pattern = &scored.pattern;
        let band = 2.0 * self.params.rt_band;
        for p in 0..pattern.peptides() {
            for i in 0..pattern.isotopes {
                let idx = pattern.shift_index(p, i);
                let sats = scored.satellites.get(idx);
                if sats.is_empty() {
                    continue;
                }
                for s in sats {
                    if let Err(err) = blacklist.claim(s.cell, idx as u32) {
                        warn!("Conflicting satellite claim: {err}");
                    }
                }
                let lo = sats.iter().map(|s| s.rt).fold(f64::INFINITY, f64::min) - band;
                let hi = sats.iter().map(|s| s.rt).fold(f64::NEG_INFINITY, f64::max) + band;
                let target = seed.centroid_mz + pattern.shift(p, i);
                let width = self.width(target);
                for scan in self.experiment.rt_begin(lo)..self.experiment.rt_end(hi) {
                    if let Some(j) = self.experiment.spectra[scan].find_nearest(target, width) {
                        let cell = CellRef::new(scan, j);
                        if blacklist.is_white(cell) {
                            let _ = blacklist.claim(cell, idx as u32);
                        }
                    }
                }
            }
        }
    }

    /// Whether every satellite of `scored` can still be claimed for its isotope position
    pub fn is_claimable(&self, scored: &ScoredPattern, blacklist: &Blacklist) -> bool {
        let mut owners: HashMap<CellRef, u32> = HashMap::new();
        scored
            .satellites
            .by_index
            .iter()
            .enumerate()
            .all(|(idx, sats)| {
                let idx = idx as u32;
                sats.iter().all(|s| {
                    blacklist.is_available_for(s.cell, idx)
                        && *owners.entry(s.cell).or_insert(idx) == idx
                })
            })
    }

    /// Score `scored` again against the current `blacklist` if a pattern claimed since
    /// took any of its satellites
    fn revalidate(
        &self,
        seed: &MassTrace,
        scored: ScoredPattern,
        blacklist: &Blacklist,
        envelopes: &[Vec<f64>],
        window: &[usize],
    ) -> Result<ScoredPattern, PatternRejection> {
        if self.is_claimable(&scored, blacklist) {
            return Ok(scored);
        }
        trace!(
            "Seed {}: satellites of charge {} were claimed, rescoring",
            seed.id,
            scored.pattern.charge
        );
        let rescored = self.score_charge(seed, &scored.pattern, blacklist, envelopes, window)?;
        if self.is_claimable(&rescored, blacklist) {
            Ok(rescored)
        } else {
            Err(PatternRejection::Blacklisted)
        }
    }

    fn seed_is_claimed(&self, seed: &MassTrace, blacklist: &Blacklist) -> bool {
        match seed.apex() {
            Some(apex) => matches!(blacklist.state(apex.cell), CellState::Claimed(k) if k > 0)
                || matches!(blacklist.state(apex.cell), CellState::Black),
            None => true,
        }
    }

    /// Build hypotheses from every trace, claiming satellites in the pattern blacklist as
    /// patterns are accepted.
    pub fn find_hypotheses(
        &self,
        blacklist: &mut Blacklist,
        model: &mut CachingIsotopicModel<'_>,
    ) -> Vec<FeatureHypothesis> {
        let params = self.params;
        let shifts = params.channel_shifts();
        let patterns: Vec<MultiplexPattern> =
            ChargeRangeIter::from(params.charge_range())
                .map(|z| MultiplexPattern::new(z, &shifts, params.isotopes_per_peptide_max))
                .collect();
        let widest = patterns.iter().map(|p| p.max_shift()).fold(0.0, f64::max);

        let mut hypotheses = Vec::new();
        let mut rejected = 0usize;
        for seed_index in self.by_mz.iter().copied() {
            let seed = &self.traces[seed_index];
            if self.seed_is_claimed(seed, blacklist) {
                trace!("Seed {}: {}", seed.id, PatternRejection::Blacklisted);
                rejected += 1;
                continue;
            }
            let window = self.local_window(seed, widest);
            let candidates: Vec<&MultiplexPattern> = patterns
                .iter()
                .filter(|p| (seed.centroid_mz - PROTON) * (p.charge.abs() as f64) <= params.max_mass)
                .collect();
            let envelopes: Vec<Vec<Vec<f64>>> = candidates
                .iter()
                .map(|pattern| {
                    (0..pattern.peptides())
                        .map(|p| {
                            model.envelope(
                                seed.centroid_mz + pattern.shift(p, 0),
                                pattern.charge,
                                pattern.isotopes,
                            )
                        })
                        .collect()
                })
                .collect();

            let shared: &Blacklist = blacklist;
            #[cfg(feature = "parallel")]
            let results: Vec<Result<ScoredPattern, PatternRejection>> = candidates
                .par_iter()
                .zip(envelopes.par_iter())
                .map(|(pattern, env)| self.score_charge(seed, pattern, shared, env, &window))
                .collect();
            #[cfg(not(feature = "parallel"))]
            let results: Vec<Result<ScoredPattern, PatternRejection>> = candidates
                .iter()
                .zip(envelopes.iter())
                .map(|(pattern, env)| self.score_charge(seed, pattern, shared, env, &window))
                .collect();

            for (result, env) in results.into_iter().zip(envelopes.iter()) {
                let result = result
                    .and_then(|scored| self.revalidate(seed, scored, blacklist, env, &window));
                match result {
                    Ok(scored) => {
                        self.claim(seed, &scored, blacklist);
                        let hypothesis = FeatureHypothesis::new(
                            hypotheses.len(),
                            scored.pattern.charge,
                            scored.pattern.mass_shifts.clone(),
                            scored.pattern.isotopes,
                            seed.id,
                            scored.bindings,
                            scored.scores,
                            self.traces,
                        );
                        hypotheses.push(hypothesis);
                    }
                    Err(reason) => {
                        trace!("Seed {}: {reason}", seed.id);
                        rejected += 1;
                    }
                }
            }
        }
        debug!(
            "Built {} hypotheses from {} traces, {rejected} candidates rejected",
            hypotheses.len(),
            self.traces.len()
        );
        hypotheses
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hypothesis::test::make_trace;
    use crate::signal::{FilteredSpectrum, Peak};

    #[test]
    fn test_pattern_shifts() {
        let pattern = MultiplexPattern::new(2, &[0.0, 8.0142], 4);
        assert_eq!(pattern.peptides(), 2);
        assert_eq!(pattern.len(), 8);
        assert!((pattern.shift(0, 1) - NEUTRON_SHIFT / 2.0).abs() < 1e-12);
        assert!((pattern.shift(1, 0) - 4.0071).abs() < 1e-12);
        assert_eq!(pattern.shift_index(1, 2), 6);

        let singlet = MultiplexPattern::new(3, &[], 6);
        assert_eq!(singlet.peptides(), 1);
        assert!((singlet.max_shift() - 2.0 * NEUTRON_SHIFT).abs() < 1e-12);
    }

    #[test]
    fn test_best_offset_cosine() {
        let env = [1.0, 0.8, 0.4, 0.1];
        assert!((best_offset_cosine(&[10.0, 8.0, 4.0], &env) - 1.0).abs() < 1e-12);
        assert!((best_offset_cosine(&[8.0, 4.0, 1.0], &env) - 1.0).abs() < 1e-12);
        assert_eq!(best_offset_cosine(&[0.0, 0.0], &env), 0.0);
    }

    #[test]
    fn test_tolerance_width() {
        assert!((tolerance_width(&Tolerance::PPM(10.0), 1000.0) - 0.01).abs() < 1e-12);
        assert_eq!(tolerance_width(&Tolerance::Da(0.02), 1000.0), 0.02);
    }

    fn satellite(seed_scan: usize, peak: usize, intensity: f64) -> Satellite {
        Satellite {
            seed_scan,
            cell: CellRef::new(seed_scan, peak),
            rt: seed_scan as f64,
            mz: 500.0,
            intensity,
        }
    }

    #[test]
    fn test_averagine_correlation_disjoint_scans() {
        let experiment = FilteredExperiment::default();
        let params = FeatureFinderParams::default();
        let scorer = PatternScorer::new(&experiment, &[], &params);
        let pattern = MultiplexPattern::new(2, &[], 6);
        let mut by_index = vec![Vec::new(); pattern.len()];
        by_index[0] = vec![satellite(0, 0, 100.0), satellite(1, 0, 300.0)];
        by_index[1] = vec![satellite(2, 1, 100.0)];
        by_index[2] = vec![satellite(3, 2, 40.0), satellite(4, 2, 60.0)];
        let satellites = SatelliteSet { by_index };
        let envelopes = vec![vec![1.0, 0.5, 0.25, 0.1, 0.0, 0.0]];

        let r = scorer
            .averagine_correlation(&pattern, &satellites, &envelopes)
            .unwrap();
        assert!((r - 1.0).abs() < 1e-9, "{r}");
        let again = scorer
            .averagine_correlation(&pattern, &satellites, &envelopes)
            .unwrap();
        assert_eq!(r.to_bits(), again.to_bits());
    }

    #[test]
    fn test_overlapping_charges_on_one_seed() {
        // the second isotope of 1+ is the third isotope of 2+
        let experiment = FilteredExperiment {
            spectra: (0..5)
                .map(|i| FilteredSpectrum {
                    source_index: i,
                    rt: i as f64,
                    peaks: vec![
                        Peak::new(500.0, 100.0, i),
                        Peak::new(500.0 + NEUTRON_SHIFT, 50.0, i),
                    ],
                })
                .collect(),
        };
        let traces = vec![make_trace(0, 500.0, 0.0, 100.0)];
        let params = FeatureFinderParams::default();
        let scorer = PatternScorer::new(&experiment, &traces, &params);
        let seed = &traces[0];
        let mut blacklist = Blacklist::new(&experiment);

        let scored: Vec<ScoredPattern> = [1, 2]
            .into_iter()
            .map(|z| {
                let pattern = MultiplexPattern::new(z, &[], 6);
                let satellites = scorer.collect_satellites(seed, &pattern, &blacklist);
                ScoredPattern {
                    pattern,
                    satellites,
                    bindings: Vec::new(),
                    scores: ComponentScores::default(),
                }
            })
            .collect();
        let shared = CellRef::new(2, 1);
        assert!(scored[0].satellites.get(1).iter().any(|s| s.cell == shared));
        assert!(scored[1].satellites.get(2).iter().any(|s| s.cell == shared));
        assert!(scored.iter().all(|s| scorer.is_claimable(s, &blacklist)));

        scorer.claim(seed, &scored[0], &mut blacklist);
        assert_eq!(blacklist.state(shared), CellState::Claimed(1));
        assert!(!scorer.is_claimable(&scored[1], &blacklist));

        let envelopes = vec![vec![1.0, 0.6, 0.3, 0.1, 0.0, 0.0]];
        let outcome = scorer.revalidate(seed, scored[1].clone(), &blacklist, &envelopes, &[]);
        assert!(
            matches!(outcome, Err(PatternRejection::IsotopeRunTooShort { length: 1 })),
            "{outcome:?}"
        );
        assert_eq!(blacklist.state(shared), CellState::Claimed(1));
    }
}
