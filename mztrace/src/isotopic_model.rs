/*! Isotopic models for generating theoretical isotopic envelopes */
use std::cmp::Ordering;
use std::collections::btree_map::{self, BTreeMap, Entry as BEntry};
use std::collections::hash_map::{self, HashMap};
use std::hash;

#[doc(hidden)]
pub use chemical_elements::isotopic_pattern::{
    BafflingRecursiveIsotopicPatternGenerator, TheoreticalIsotopicPattern,
};

use chemical_elements::{
    neutral_mass, ChemicalComposition, ElementSpecification, PROTON as _PROTON,
};

use num_traits::Float;
use tracing::trace;

use crate::error::InvalidInput;

pub(crate) fn isclose<T: Float>(a: T, b: T, delta: T) -> bool {
    (a - b).abs() < delta
}

/// The mass of H+, a hydrogen atom minus an electron
pub const PROTON: f64 = _PROTON;

/// The mass difference between isotopes `C[13]` and `C[12]`. Not precisely universal, but the
/// majority of expected applications are carbon-based
pub const NEUTRON_SHIFT: f64 = 1.0033548378;

const ISOTOPIC_SHIFT: [f64; 10] = [
    NEUTRON_SHIFT / 1.0,
    NEUTRON_SHIFT / 2.0,
    NEUTRON_SHIFT / 3.0,
    NEUTRON_SHIFT / 4.0,
    NEUTRON_SHIFT / 5.0,
    NEUTRON_SHIFT / 6.0,
    NEUTRON_SHIFT / 7.0,
    NEUTRON_SHIFT / 8.0,
    NEUTRON_SHIFT / 9.0,
    NEUTRON_SHIFT / 10.0,
];

/// Get the m/z difference between isotopic peaks at a given charge state
#[inline(always)]
pub fn isotopic_shift(charge: i32) -> f64 {
    if charge > 0 && charge < 11 {
        ISOTOPIC_SHIFT[(charge - 1) as usize]
    } else {
        NEUTRON_SHIFT / charge as f64
    }
}

/// A fractional elemental composition with non-ordinal element counts used to represent
/// "averaged" chemical compositions.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FractionalComposition<'a>(HashMap<ElementSpecification<'a>, f64>);

impl<'a> FromIterator<(ElementSpecification<'a>, f64)> for FractionalComposition<'a> {
    fn from_iter<T: IntoIterator<Item = (ElementSpecification<'a>, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FractionalComposition<'a> {
    #[inline]
    pub fn new(composition: HashMap<ElementSpecification<'a>, f64>) -> Self {
        Self(composition)
    }

    /// Parse element symbols, failing on the first one that is not recognized
    pub fn from_symbols(parts: &[(&'static str, f64)]) -> Result<Self, InvalidInput> {
        parts
            .iter()
            .map(|(sym, count)| {
                ElementSpecification::parse(sym)
                    .map(|e| (e, *count))
                    .map_err(|_| InvalidInput::Parameter(format!("unknown element {sym}")))
            })
            .collect()
    }

    #[inline]
    pub fn get<Q>(&self, k: &Q) -> Option<&f64>
    where
        ElementSpecification<'a>: std::borrow::Borrow<Q>,
        Q: hash::Hash + Eq + ?Sized,
    {
        self.0.get(k)
    }

    #[inline]
    pub fn iter(&self) -> hash_map::Iter<'_, ElementSpecification<'a>, f64> {
        self.0.iter()
    }

    #[inline]
    pub fn mass(&self) -> f64 {
        self.iter()
            .map(|(e, c)| e.element.most_abundant_mass * *c)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A model for converting an m/z and a theoretical charge state into a theoretical
/// isotopic pattern based upon an "average monomer" and linear extension.
///
/// This is an implementation of Senko's Averagine [^1]
///
/// # References
/// [^1]: Senko M, Beu S, McLafferty F: Determination of Monoisotopic Masses and Ion
///       Populations for Large Biomolecules from Resolved Isotopic Distributions.
///       Journal of the American Society for Mass Spectrometry 1995, 6:229-233
///       <https://doi.org/10.1016/1044-0305(95)00017-8>
#[derive(Debug, Clone)]
pub struct IsotopicModel<'lifespan> {
    /// The "average" monomer composition
    pub base_composition: FractionalComposition<'lifespan>,
    /// The mass of the average monomer to interpolate with
    pub base_mass: f64,
    hydrogen: ElementSpecification<'lifespan>,
    generator: BafflingRecursiveIsotopicPatternGenerator<'lifespan>,
}

impl PartialEq for IsotopicModel<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.base_composition == other.base_composition
    }
}

impl<'lifespan: 'transient, 'transient> IsotopicModel<'lifespan> {
    /// Create a new [`IsotopicModel`] from a fractional composition
    pub fn new(base_composition: FractionalComposition<'lifespan>) -> Result<Self, InvalidInput> {
        if base_composition.is_empty() {
            return Err(InvalidInput::EmptyIsotopicModel);
        }
        let hydrogen = ElementSpecification::parse("H")
            .map_err(|_| InvalidInput::Parameter("unknown element H".to_string()))?;
        Ok(Self {
            base_mass: base_composition.mass(),
            base_composition,
            hydrogen,
            generator: BafflingRecursiveIsotopicPatternGenerator::new(),
        })
    }

    pub fn scale(
        &self,
        mz: f64,
        charge: i32,
        charge_carrier: f64,
    ) -> ChemicalComposition<'transient> {
        let neutral = neutral_mass(mz, charge, charge_carrier);
        let scale = neutral / self.base_mass;

        let mut scaled = ChemicalComposition::new();
        for (elt, count) in self.base_composition.iter() {
            scaled.set(*elt, (*count * scale).round() as i32);
        }
        let scaled_mass = scaled.mass();
        let delta = (scaled_mass - neutral).round() as i32;
        let hydrogens = scaled[&self.hydrogen];
        if hydrogens > delta {
            scaled[&self.hydrogen] -= delta;
        } else {
            scaled[&self.hydrogen] = 0;
        }
        scaled
    }

    /// Generate a theoretical isotopic pattern whose first peak lies at `mz`
    pub fn isotopic_cluster(
        &mut self,
        mz: f64,
        charge: i32,
        charge_carrier: f64,
        truncate_after: f64,
        ignore_below: f64,
    ) -> TheoreticalIsotopicPattern {
        let composition = self.scale(mz, charge, charge_carrier);
        let peaks = self
            .generator
            .isotopic_variants(composition, 0, charge, charge_carrier);
        let peaks = TheoreticalIsotopicPattern::from(peaks);
        let diff = mz - peaks.origin;
        peaks
            .truncate_after(truncate_after)
            .ignore_below(ignore_below)
            .shift(diff)
    }
}

#[doc(hidden)]
#[derive(Debug, Clone, Copy)]
pub struct IsotopicPatternSpec {
    pub mz: f64,
    pub charge: i32,
    pub charge_carrier: f64,
    pub truncate_after: f64,
    pub ignore_below: f64,
}

impl PartialOrd for IsotopicPatternSpec {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IsotopicPatternSpec {
    fn cmp(&self, other: &Self) -> Ordering {
        self.charge
            .cmp(&other.charge)
            .then_with(|| self.mz.total_cmp(&other.mz))
            .then_with(|| self.truncate_after.total_cmp(&other.truncate_after))
            .then_with(|| self.ignore_below.total_cmp(&other.ignore_below))
            .then_with(|| self.charge_carrier.total_cmp(&other.charge_carrier))
    }
}

impl PartialEq for IsotopicPatternSpec {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        isclose(self.mz, other.mz, 1e-6)
            && self.charge == other.charge
            && isclose(self.charge_carrier, other.charge_carrier, 1e-6)
            && isclose(self.truncate_after, other.truncate_after, 1e-6)
            && isclose(self.ignore_below, other.ignore_below, 1e-6)
    }
}

impl Eq for IsotopicPatternSpec {}

/// A wrapper around [`IsotopicModel`] which includes a cache over isotopic patterns,
/// mapping similar m/z values with the same charge and parameters to a previously calculated
/// pattern if one exists, otherwise computing a new pattern and saving it in the cache.
#[derive(Debug, Clone)]
pub struct CachingIsotopicModel<'lifespan> {
    cache_truncation: f64,
    inner: IsotopicModel<'lifespan>,
    cache: BTreeMap<IsotopicPatternSpec, TheoreticalIsotopicPattern>,
}

impl<'lifespan> CachingIsotopicModel<'lifespan> {
    pub fn new(inner: IsotopicModel<'lifespan>, cache_truncation: f64) -> Self {
        Self {
            inner,
            cache: BTreeMap::new(),
            cache_truncation,
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, IsotopicPatternSpec, TheoreticalIsotopicPattern> {
        self.cache.iter()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    #[inline(always)]
    fn truncate_mz(&self, mz: f64) -> f64 {
        (mz / self.cache_truncation).round() * self.cache_truncation
    }

    pub fn make_cache_key(
        &self,
        mz: f64,
        charge: i32,
        charge_carrier: f64,
        truncate_after: f64,
        ignore_below: f64,
    ) -> IsotopicPatternSpec {
        IsotopicPatternSpec {
            mz: self.truncate_mz(mz),
            charge,
            charge_carrier,
            truncate_after,
            ignore_below,
        }
    }

    pub fn isotopic_cluster(
        &mut self,
        mz: f64,
        charge: i32,
        charge_carrier: f64,
        truncate_after: f64,
        ignore_below: f64,
    ) -> TheoreticalIsotopicPattern {
        let key = self.make_cache_key(mz, charge, charge_carrier, truncate_after, ignore_below);
        match self.cache.entry(key) {
            BEntry::Occupied(ent) => {
                let res = ent.get();
                let offset = mz - res.origin;
                res.clone_shifted(offset)
            }
            BEntry::Vacant(ent) => {
                trace!("Generating isotopic pattern for {key:?}");
                let res = self.inner.isotopic_cluster(
                    key.mz,
                    charge,
                    charge_carrier,
                    truncate_after,
                    ignore_below,
                );
                let offset = mz - res.origin;
                ent.insert(res).clone_shifted(offset)
            }
        }
    }

    /// The first `n` relative abundances of the envelope whose monoisotopic peak lies
    /// at `mz`, normalized so the most abundant peak is 1 and zero padded past the
    /// end of the pattern.
    pub fn envelope(&mut self, mz: f64, charge: i32, n: usize) -> Vec<f64> {
        let tid = self.isotopic_cluster(mz, charge.abs(), PROTON, 0.999, 0.0);
        let mut out: Vec<f64> = tid.peaks.iter().take(n).map(|p| p.intensity).collect();
        out.resize(n, 0.0);
        let top = out.iter().copied().fold(0.0, f64::max);
        if top > 0.0 {
            out.iter_mut().for_each(|v| *v /= top);
        }
        out
    }
}

/// The named average monomer models available for envelope generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AveragineType {
    #[default]
    #[cfg_attr(feature = "serde", serde(alias = "peptide"))]
    Peptide,
    #[cfg_attr(feature = "serde", serde(alias = "rna", alias = "RNA"))]
    Rna,
    #[cfg_attr(feature = "serde", serde(alias = "dna", alias = "DNA"))]
    Dna,
}

impl AveragineType {
    pub fn composition_parts(&self) -> &'static [(&'static str, f64)] {
        match self {
            AveragineType::Peptide => &[
                ("H", 7.7583),
                ("C", 4.9384),
                ("S", 0.0417),
                ("O", 1.4773),
                ("N", 1.3577),
            ],
            AveragineType::Rna => &[
                ("C", 9.5),
                ("H", 10.75),
                ("N", 3.75),
                ("O", 7.0),
                ("P", 1.0),
            ],
            AveragineType::Dna => &[
                ("C", 9.75),
                ("H", 12.25),
                ("N", 3.75),
                ("O", 6.0),
                ("P", 1.0),
            ],
        }
    }

    pub fn model(&self) -> Result<IsotopicModel<'static>, InvalidInput> {
        IsotopicModel::new(FractionalComposition::from_symbols(
            self.composition_parts(),
        )?)
    }

    pub fn caching_model(&self) -> Result<CachingIsotopicModel<'static>, InvalidInput> {
        Ok(CachingIsotopicModel::new(self.model()?, 1.0))
    }
}
