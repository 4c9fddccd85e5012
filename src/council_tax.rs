//! Council-tax band estimation from EPC floor area.
//!
//! This is a heuristic, not a lookup against the valuation register: bands
//! are derived purely from `total_floor_area`. The thresholds are a tunable
//! table (`EPC_COUNCIL_TAX_THRESHOLDS`).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::AppError;

/// Council-tax band A..H. Ordering follows the band letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CouncilTaxBand {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
}

impl CouncilTaxBand {
    pub const ALL: [CouncilTaxBand; 8] = [
        CouncilTaxBand::A,
        CouncilTaxBand::B,
        CouncilTaxBand::C,
        CouncilTaxBand::D,
        CouncilTaxBand::E,
        CouncilTaxBand::F,
        CouncilTaxBand::G,
        CouncilTaxBand::H,
    ];

    pub fn letter(self) -> char {
        match self {
            CouncilTaxBand::A => 'A',
            CouncilTaxBand::B => 'B',
            CouncilTaxBand::C => 'C',
            CouncilTaxBand::D => 'D',
            CouncilTaxBand::E => 'E',
            CouncilTaxBand::F => 'F',
            CouncilTaxBand::G => 'G',
            CouncilTaxBand::H => 'H',
        }
    }
}

impl fmt::Display for CouncilTaxBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Upper bounds (exclusive, m²) for bands A..G; anything at or above the last is H.
pub const DEFAULT_THRESHOLDS: [f64; 7] = [40.0, 52.0, 69.0, 88.0, 120.0, 160.0, 320.0];

#[derive(Debug, Clone, PartialEq)]
pub struct CouncilTaxEstimator {
    thresholds: [f64; 7],
}

impl Default for CouncilTaxEstimator {
    fn default() -> Self {
        Self {
            thresholds: DEFAULT_THRESHOLDS,
        }
    }
}

impl CouncilTaxEstimator {
    /// Builds an estimator from seven strictly increasing, positive thresholds.
    pub fn new(thresholds: &[f64]) -> Result<Self, AppError> {
        let thresholds: [f64; 7] = thresholds.try_into().map_err(|_| {
            AppError::BadRequest(format!(
                "council-tax table needs 7 thresholds, got {}",
                thresholds.len()
            ))
        })?;

        if thresholds.iter().any(|t| !t.is_finite() || *t <= 0.0) {
            return Err(AppError::BadRequest(
                "council-tax thresholds must be positive numbers".to_string(),
            ));
        }
        if thresholds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(AppError::BadRequest(
                "council-tax thresholds must be strictly increasing".to_string(),
            ));
        }

        Ok(Self { thresholds })
    }

    /// Parses a comma-separated table such as `"40,52,69,88,120,160,320"`.
    pub fn parse(table: &str) -> Result<Self, AppError> {
        let values = table
            .split(',')
            .map(|part| {
                part.trim().parse::<f64>().map_err(|_| {
                    AppError::BadRequest(format!("invalid council-tax threshold '{}'", part.trim()))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(&values)
    }

    pub fn thresholds(&self) -> &[f64; 7] {
        &self.thresholds
    }

    /// Estimates the band for a floor area in m².
    ///
    /// `None`, zero (the index's "unknown"), negative and non-finite areas
    /// yield `None`.
    pub fn estimate(&self, area: Option<f64>) -> Option<CouncilTaxBand> {
        let area = area.filter(|a| a.is_finite() && *a > 0.0)?;
        let band = self
            .thresholds
            .iter()
            .position(|limit| area < *limit)
            .map(|idx| CouncilTaxBand::ALL[idx])
            .unwrap_or(CouncilTaxBand::H);
        Some(band)
    }
}
