//! Grouping of hypotheses by neutral mass.
//!
//! Hypotheses of the same analyte observed at several charge states land in the same
//! [`MassBucket`]. The buckets are used to fold sparse observations into their
//! neighbours, to discard harmonic and charge-off-by-n artifacts, and to demote
//! hypotheses whose mass was not seen across a continuous run of charge states.
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use tracing::{debug, trace};

use crate::hypothesis::{FeatureHypothesis, ScoreType};
use crate::isotopic_model::NEUTRON_SHIFT;

/// Two FWHM ranges overlap when the shared span covers at least this fraction of
/// either one
const FWHM_OVERLAP_RATIO: f64 = 0.7;

/// Whether two RT ranges overlap by at least [`FWHM_OVERLAP_RATIO`] of either range
pub fn fwhm_borders_overlap(a: (f64, f64), b: (f64, f64)) -> bool {
    if a.0 > b.1 || b.0 > a.1 {
        return false;
    }
    let shared = a.1.min(b.1) - a.0.max(b.0);
    let covers = |r: (f64, f64)| {
        let width = r.1 - r.0;
        width <= 0.0 || shared / width >= FWHM_OVERLAP_RATIO
    };
    covers(a) || covers(b)
}

/// The map key of a [`MassBucket`]. The serial number keeps buckets with identical
/// masses apart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketKey {
    pub mass: f64,
    pub serial: usize,
}

impl Eq for BucketKey {}

impl PartialOrd for BucketKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BucketKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.mass
            .total_cmp(&other.mass)
            .then_with(|| self.serial.cmp(&other.serial))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketMember {
    pub hypothesis: usize,
    pub mass: f64,
    pub charge: i32,
    pub fwhm: (f64, f64),
    pub score: ScoreType,
}

impl From<&FeatureHypothesis> for BucketMember {
    fn from(hyp: &FeatureHypothesis) -> Self {
        Self {
            hypothesis: hyp.id,
            mass: hyp.mass(),
            charge: hyp.charge,
            fwhm: (hyp.fwhm_start, hyp.fwhm_end),
            score: hyp.feature_score,
        }
    }
}

/// The hypotheses sharing one neutral mass
#[derive(Debug, Clone, PartialEq)]
pub struct MassBucket {
    /// The median mass of the members
    pub mass: f64,
    pub members: Vec<BucketMember>,
    pub fwhm_border: (f64, f64),
    pub combined_score: ScoreType,
}

impl MassBucket {
    pub fn new(member: BucketMember) -> Self {
        Self {
            mass: member.mass,
            fwhm_border: member.fwhm,
            combined_score: member.score,
            members: vec![member],
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn charges(&self) -> BTreeSet<i32> {
        self.members.iter().map(|m| m.charge).collect()
    }

    pub fn add(&mut self, member: BucketMember) {
        self.fwhm_border = (
            self.fwhm_border.0.min(member.fwhm.0),
            self.fwhm_border.1.max(member.fwhm.1),
        );
        self.combined_score += member.score;
        self.members.push(member);
    }

    /// Drop every member with the given charge, returning how many were removed
    pub fn remove_charge(&mut self, charge: i32) -> usize {
        let before = self.members.len();
        self.members.retain(|m| m.charge != charge);
        let removed = before - self.members.len();
        if removed > 0 {
            self.combined_score = self.members.iter().map(|m| m.score).sum();
            let mut it = self.members.iter();
            if let Some(first) = it.next() {
                self.fwhm_border = it.fold(first.fwhm, |acc, m| {
                    (acc.0.min(m.fwhm.0), acc.1.max(m.fwhm.1))
                });
            }
        }
        removed
    }

    /// Recompute the median mass, returning `true` when it changed
    pub fn update_mass(&mut self) -> bool {
        let mut masses: Vec<f64> = self.members.iter().map(|m| m.mass).collect();
        if masses.is_empty() {
            return false;
        }
        masses.sort_by(|a, b| a.total_cmp(b));
        let n = masses.len();
        let median = if n % 2 == 0 {
            (masses[n / 2 - 1] + masses[n / 2]) / 2.0
        } else {
            masses[n / 2]
        };
        if median != self.mass {
            self.mass = median;
            true
        } else {
            false
        }
    }

    /// Whether at least three consecutive charge states were observed
    pub fn has_continuous_charges(&self) -> bool {
        let charges: Vec<i32> = self.charges().into_iter().collect();
        charges
            .windows(3)
            .any(|w| w[1] == w[0] + 1 && w[2] == w[1] + 1)
    }

    fn is_sparse(&self) -> bool {
        self.len() == 1 || self.charges().len() == 1
    }
}

/// An ordered map from median mass to [`MassBucket`]
#[derive(Debug, Clone, Default)]
pub struct MassBuckets {
    buckets: BTreeMap<BucketKey, MassBucket>,
    mass_tolerance: f64,
    next_serial: usize,
}

impl MassBuckets {
    pub fn new(mass_tolerance: f64) -> Self {
        Self {
            buckets: BTreeMap::new(),
            mass_tolerance,
            next_serial: 0,
        }
    }

    /// Bucket every hypothesis in order
    pub fn from_hypotheses(hypotheses: &[FeatureHypothesis], mass_tolerance: f64) -> Self {
        let mut this = Self::new(mass_tolerance);
        for hyp in hypotheses {
            this.add(BucketMember::from(hyp));
        }
        this
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MassBucket> {
        self.buckets.values()
    }

    fn insert_new(&mut self, bucket: MassBucket) -> BucketKey {
        let key = BucketKey {
            mass: bucket.mass,
            serial: self.next_serial,
        };
        self.next_serial += 1;
        self.buckets.insert(key, bucket);
        key
    }

    /// The keys of every bucket with a mass within the tolerance of `mass`
    fn keys_near(&self, mass: f64) -> Vec<BucketKey> {
        let lo = BucketKey {
            mass: mass - self.mass_tolerance,
            serial: 0,
        };
        let hi = BucketKey {
            mass: mass + self.mass_tolerance,
            serial: usize::MAX,
        };
        self.buckets.range(lo..=hi).map(|(k, _)| *k).collect()
    }

    /// Re-insert the bucket under its new median if it changed
    fn rekey(&mut self, key: BucketKey) -> BucketKey {
        let Some(mut bucket) = self.buckets.remove(&key) else {
            return key;
        };
        let new_key = if bucket.update_mass() {
            BucketKey {
                mass: bucket.mass,
                serial: key.serial,
            }
        } else {
            key
        };
        self.buckets.insert(new_key, bucket);
        new_key
    }

    /// Join the nearest bucket within tolerance whose FWHM border overlaps the
    /// member's, or open a new one.
    pub fn add(&mut self, member: BucketMember) {
        let target = self
            .keys_near(member.mass)
            .into_iter()
            .filter(|k| fwhm_borders_overlap(member.fwhm, self.buckets[k].fwhm_border))
            .min_by(|a, b| {
                (a.mass - member.mass)
                    .abs()
                    .total_cmp(&(b.mass - member.mass).abs())
            });
        match target {
            Some(key) => {
                if let Some(bucket) = self.buckets.get_mut(&key) {
                    bucket.add(member);
                }
                self.rekey(key);
            }
            None => {
                self.insert_new(MassBucket::new(member));
            }
        }
    }

    fn next_key_after(&self, cursor: Option<BucketKey>) -> Option<BucketKey> {
        match cursor {
            Some(c) => self
                .buckets
                .range((Bound::Excluded(c), Bound::Unbounded))
                .next()
                .map(|(k, _)| *k),
            None => self.buckets.keys().next().copied(),
        }
    }

    /// Fold buckets holding a single hypothesis or a single charge state into the
    /// closest overlapping neighbour within tolerance. Buckets with no such neighbour
    /// are kept.
    pub fn merge_sparse(&mut self) {
        let mut cursor = None;
        let mut merged = 0;
        while let Some(key) = self.next_key_after(cursor) {
            cursor = Some(key);
            let bucket = &self.buckets[&key];
            if !bucket.is_sparse() {
                continue;
            }
            let border = bucket.fwhm_border;
            let tol = self.mass_tolerance;
            let prev = self
                .buckets
                .range(..key)
                .next_back()
                .filter(|(k, b)| {
                    key.mass - k.mass <= tol && fwhm_borders_overlap(border, b.fwhm_border)
                })
                .map(|(k, _)| *k);
            let next = self
                .buckets
                .range((Bound::Excluded(key), Bound::Unbounded))
                .next()
                .filter(|(k, b)| {
                    k.mass - key.mass <= tol && fwhm_borders_overlap(border, b.fwhm_border)
                })
                .map(|(k, _)| *k);
            let destination = match (prev, next) {
                (Some(p), Some(n)) => {
                    if key.mass - p.mass < n.mass - key.mass {
                        Some(p)
                    } else {
                        Some(n)
                    }
                }
                (p, n) => p.or(n),
            };
            if let Some(dest) = destination {
                if let Some(bucket) = self.buckets.remove(&key) {
                    if let Some(target) = self.buckets.get_mut(&dest) {
                        for member in bucket.members {
                            target.add(member);
                        }
                    }
                    self.rekey(dest);
                    merged += 1;
                }
            }
        }
        debug!("Merged {merged} sparse mass buckets, {} remain", self.len());
    }

    /// Whether a bucket scoring higher than `key` with an overlapping FWHM border lies
    /// within tolerance of `mass`
    fn dominated_near(&self, key: BucketKey, mass: f64) -> bool {
        let current = &self.buckets[&key];
        self.keys_near(mass).into_iter().any(|k| {
            let other = &self.buckets[&k];
            k != key
                && other.combined_score > current.combined_score
                && fwhm_borders_overlap(other.fwhm_border, current.fwhm_border)
        })
    }

    fn is_harmonic(&self, key: BucketKey) -> bool {
        for offset in -2..=2 {
            let mass = key.mass + offset as f64 * NEUTRON_SHIFT;
            for factor in 2..=6 {
                let factor = factor as f64;
                if self.dominated_near(key, mass / factor) || self.dominated_near(key, mass * factor)
                {
                    return true;
                }
            }
        }
        false
    }

    /// Discard harmonic buckets and members whose charge state is off by one to four
    /// from a stronger bucket's interpretation of the same signal.
    pub fn remove_artifacts(&mut self) {
        let mut cursor = None;
        let mut removed = 0;
        while let Some(key) = self.next_key_after(cursor) {
            cursor = Some(key);
            if self.is_harmonic(key) {
                trace!("Mass {:0.3} is a harmonic artifact", key.mass);
                self.buckets.remove(&key);
                removed += 1;
                continue;
            }

            let mut is_artifact = false;
            let mut changed = false;
            let charges = self.buckets[&key].charges();
            'charges: for charge in charges {
                for off in 1..=4 {
                    for sign in [-1, 1] {
                        let alternative = charge + sign * off;
                        if alternative <= 1 {
                            continue;
                        }
                        let mass = key.mass / charge as f64 * alternative as f64;
                        if !self.dominated_near(key, mass) {
                            continue;
                        }
                        if self.buckets[&key].len() == 1 {
                            is_artifact = true;
                            break 'charges;
                        }
                        if let Some(bucket) = self.buckets.get_mut(&key) {
                            bucket.remove_charge(charge);
                            changed = true;
                            if bucket.len() < 2 {
                                is_artifact = true;
                                break 'charges;
                            }
                        }
                        continue 'charges;
                    }
                }
            }
            if is_artifact {
                trace!("Mass {:0.3} is a charge state artifact", key.mass);
                self.buckets.remove(&key);
                removed += 1;
            } else if changed {
                cursor = Some(self.rekey(key));
            }
        }
        debug!("Removed {removed} artifact mass buckets, {} remain", self.len());
    }

    /// The ids of every hypothesis still held by a bucket, in ascending order
    pub fn surviving(&self) -> Vec<usize> {
        let mut ids: Vec<usize> = self
            .buckets
            .values()
            .flat_map(|b| b.members.iter().map(|m| m.hypothesis))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Set the charge weight of every hypothesis in a bucket lacking a continuous
    /// charge run to `penalty`
    pub fn apply_charge_weights(&self, hypotheses: &mut [FeatureHypothesis], penalty: ScoreType) {
        for bucket in self.buckets.values() {
            if bucket.has_continuous_charges() {
                continue;
            }
            for member in bucket.members.iter() {
                if let Some(hyp) = hypotheses.iter_mut().find(|h| h.id == member.hypothesis) {
                    hyp.set_charge_weight(penalty);
                }
            }
        }
    }
}
