//! Online aggregation and correlation measures shared by the trace and pattern stages
use std::cmp::Ordering;

/// An incrementally updated intensity-weighted mean.
///
/// The update multiplies the running mean by a ratio of correction terms rather than
/// re-dividing sums, so the value depends on the order peaks are added in. Peaks must
/// be added in the same order on every run to reproduce the same centroid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterativeWeightedMean {
    pub mean: f64,
    pub weight_counter: f64,
    pub weight_denom: f64,
}

impl IterativeWeightedMean {
    pub fn new(value: f64, weight: f64) -> Self {
        Self {
            mean: value,
            weight_counter: weight * value,
            weight_denom: weight,
        }
    }

    pub fn add(&mut self, value: f64, weight: f64) {
        let counter = 1.0 + (weight * value) / self.weight_counter;
        let denom = 1.0 + weight / self.weight_denom;
        self.mean *= counter / denom;
        self.weight_counter *= counter;
        self.weight_denom *= denom;
    }
}

/// Combine the prior weighted standard deviation with a new observation in log space.
///
/// Returns `None` when the update would be degenerate, in which case the prior estimate
/// should be kept.
pub fn update_weighted_sd_robust(
    sd: f64,
    last_weight_sum: f64,
    mz: f64,
    intensity: f64,
    mean: f64,
) -> Option<f64> {
    let d1 = last_weight_sum.ln() + 2.0 * sd.ln();
    let d2 = intensity.ln() + 2.0 * (mz - mean).abs().ln();
    let numer = (d1.exp() + d2.exp()).sqrt();
    let result = numer / (last_weight_sum + intensity).sqrt();
    if result.is_finite() && result > f64::EPSILON {
        Some(result)
    } else {
        None
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// The median of `values`, averaging the middle pair for even lengths
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 {
        return 0.0;
    }
    let mx = mean(x);
    let my = mean(y);
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y.iter()) {
        let dx = a - mx;
        let dy = b - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    let denom = (sxx * syy).sqrt();
    if denom <= 0.0 || !denom.is_finite() {
        0.0
    } else {
        sxy / denom
    }
}

/// Fractional ranks, ties receive the mean of the ranks they span
pub fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|a, b| {
        values[*a]
            .total_cmp(&values[*b])
            .then_with(|| a.cmp(b))
    });
    let mut out = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len()
            && values[order[j + 1]].total_cmp(&values[order[i]]) == Ordering::Equal
        {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            out[order[k]] = rank;
        }
        i = j + 1;
    }
    out
}

pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 {
        return 0.0;
    }
    pearson(&ranks(x), &ranks(y))
}

pub fn cosine(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0;
    let mut nx = 0.0;
    let mut ny = 0.0;
    for (a, b) in x.iter().zip(y.iter()) {
        dot += a * b;
        nx += a * a;
        ny += b * b;
    }
    let denom = (nx * ny).sqrt();
    if denom <= 0.0 || !denom.is_finite() {
        0.0
    } else {
        dot / denom
    }
}
