use crate::{error::MinimizerError, minimize::random::CmaRandom};
use ndarray::prelude::*;
use rand_distr::{Distribution, Uniform};

/// Per-coordinate box constraints; either side of a coordinate may be absent.
///
/// Infinite values given to the constructors are stored as absent, so a side
/// that is `None` is never clipped.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    lower: Vec<Option<f64>>,
    upper: Vec<Option<f64>>,
}

impl Bounds {
    /// Build from `(lower, upper)` pairs, one per dimension.
    pub fn new(pairs: Vec<(Option<f64>, Option<f64>)>) -> Result<Self, MinimizerError> {
        if pairs.is_empty() {
            return Err(MinimizerError::InvalidDimension);
        }

        let (lower, upper): (Vec<_>, Vec<_>) = pairs
            .into_iter()
            .map(|(lo, hi)| (finite_or_none(lo), finite_or_none(hi)))
            .unzip();

        for (i, (lo, hi)) in lower.iter().zip(upper.iter()).enumerate() {
            if lo.is_some_and(f64::is_nan) || hi.is_some_and(f64::is_nan) {
                return Err(MinimizerError::InvalidBounds(format!(
                    "NaN bound in dimension {}",
                    i
                )));
            }
            if let (Some(lo), Some(hi)) = (lo, hi) {
                if lo > hi {
                    return Err(MinimizerError::InvalidBounds(format!(
                        "lower bound {} exceeds upper bound {} in dimension {}",
                        lo, hi, i
                    )));
                }
            }
        }

        Ok(Self { lower, upper })
    }

    /// Build from dense arrays; `±inf` marks an open side.
    pub fn from_arrays(
        lower: ArrayView1<f64>,
        upper: ArrayView1<f64>,
    ) -> Result<Self, MinimizerError> {
        if lower.len() != upper.len() {
            return Err(MinimizerError::InvalidBounds(
                "Bounds vectors must have same length".to_string(),
            ));
        }
        Bounds::new(
            lower
                .iter()
                .zip(upper.iter())
                .map(|(&lo, &hi)| (Some(lo), Some(hi)))
                .collect(),
        )
    }

    pub fn unbounded(dimension: usize) -> Self {
        Self {
            lower: vec![None; dimension],
            upper: vec![None; dimension],
        }
    }

    pub fn dimension(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self, i: usize) -> Option<f64> {
        self.lower[i]
    }

    pub fn upper(&self, i: usize) -> Option<f64> {
        self.upper[i]
    }

    pub fn is_bounded(&self) -> bool {
        self.lower.iter().chain(self.upper.iter()).any(Option::is_some)
    }

    /// Move every coordinate onto its closest feasible value.
    pub fn clip(&self, x: &mut Array1<f64>) {
        for (i, xi) in x.iter_mut().enumerate() {
            if let Some(lo) = self.lower[i] {
                if *xi < lo {
                    *xi = lo;
                }
            }
            if let Some(hi) = self.upper[i] {
                if *xi > hi {
                    *xi = hi;
                }
            }
        }
    }

    pub fn contains(&self, x: ArrayView1<f64>) -> bool {
        x.len() == self.dimension()
            && x.iter().enumerate().all(|(i, &xi)| {
                self.lower[i].is_none_or(|lo| xi >= lo) && self.upper[i].is_none_or(|hi| xi <= hi)
            })
    }

    /// Width of the box along each coordinate, `None` when a side is open.
    pub fn widths(&self) -> Vec<Option<f64>> {
        self.lower
            .iter()
            .zip(self.upper.iter())
            .map(|(lo, hi)| match (lo, hi) {
                (Some(lo), Some(hi)) => Some(hi - lo),
                _ => None,
            })
            .collect()
    }

    /// Validate a supplied starting point, or draw one from `random`.
    ///
    /// Drawn coordinates are uniform on closed intervals, one unit inside a
    /// single finite side, and zero when both sides are open.
    pub fn initial_guess(
        &self,
        guess: Option<&Array1<f64>>,
        random: &mut CmaRandom,
    ) -> Result<Array1<f64>, MinimizerError> {
        if let Some(guess) = guess {
            if guess.len() != self.dimension() {
                return Err(MinimizerError::InvalidParameters(
                    "Initial x dimension mismatch".to_string(),
                ));
            }
            if guess.iter().any(|v| !v.is_finite()) {
                return Err(MinimizerError::InvalidParameters(
                    "Initial x must be finite".to_string(),
                ));
            }
            if !self.contains(guess.view()) {
                return Err(MinimizerError::InfeasibleStartingPoint);
            }
            return Ok(guess.clone());
        }

        let mut x = Array1::zeros(self.dimension());
        for i in 0..self.dimension() {
            x[i] = match (self.lower[i], self.upper[i]) {
                (Some(lo), Some(hi)) => {
                    let dist = Uniform::new_inclusive(lo, hi).map_err(|e| {
                        MinimizerError::InvalidBounds(format!("dimension {}: {:?}", i, e))
                    })?;
                    dist.sample(random.rng_mut())
                }
                (Some(lo), None) => lo + random.uniform(),
                (None, Some(hi)) => hi - random.uniform(),
                (None, None) => 0.0,
            };
        }
        Ok(x)
    }
}

fn finite_or_none(bound: Option<f64>) -> Option<f64> {
    bound.filter(|b| !b.is_infinite())
}
