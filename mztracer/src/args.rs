use std::fmt::Display;
use std::num::ParseIntError;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use mztrace::charge::ChargeRange;
use mztrace::isotopic_model::AveragineType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgAveragine {
    #[default]
    Peptide,
    Rna,
    Dna,
}

impl From<ArgAveragine> for AveragineType {
    fn from(value: ArgAveragine) -> Self {
        match value {
            ArgAveragine::Peptide => AveragineType::Peptide,
            ArgAveragine::Rna => AveragineType::Rna,
            ArgAveragine::Dna => AveragineType::Dna,
        }
    }
}

impl Display for ArgAveragine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A charge range given as `low-high` or just `high`, in which case `low` is 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgChargeRange(pub i32, pub i32);

impl Default for ArgChargeRange {
    fn default() -> Self {
        Self(1, 4)
    }
}

impl FromStr for ArgChargeRange {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            Some((low, high)) => Ok(Self(low.trim().parse()?, high.trim().parse()?)),
            None => Ok(Self(1, s.trim().parse()?)),
        }
    }
}

impl Display for ArgChargeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.0, self.1)
    }
}

impl From<ArgChargeRange> for ChargeRange {
    fn from(value: ArgChargeRange) -> Self {
        (value.0, value.1)
    }
}

pub(crate) fn non_negative_float(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|e| e.to_string())?;
    if value < 0.0 {
        Err(format!("`{s}` is less than zero"))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_charge_range() -> Result<(), ParseIntError> {
        let z: ArgChargeRange = "2-6".parse()?;
        assert_eq!(z, ArgChargeRange(2, 6));
        let z: ArgChargeRange = "5".parse()?;
        assert_eq!(z, ArgChargeRange(1, 5));
        assert_eq!(z.to_string(), "1-5");
        assert!("a-3".parse::<ArgChargeRange>().is_err());
        let z: ChargeRange = ArgChargeRange(3, 4).into();
        assert_eq!(z, (3, 4));
        Ok(())
    }

    #[test]
    fn test_non_negative() {
        assert_eq!(non_negative_float("2.5"), Ok(2.5));
        assert!(non_negative_float("-1").is_err());
        assert!(non_negative_float("x").is_err());
    }

    #[test]
    fn test_averagine() {
        let a: AveragineType = ArgAveragine::Rna.into();
        assert_eq!(a, AveragineType::Rna);
        assert_eq!(ArgAveragine::default().to_string(), "Peptide");
    }
}
