use crate::error::MinimizerError;
use ndarray::prelude::*;

/// Largest tolerated ratio between the extreme eigenvalues of C.
pub const MAX_CONDITION: f64 = 1e14;
/// Axis ratio `max(D) / min(D)` at which the run is considered degenerate.
pub const MAX_AXIS_RATIO: f64 = 1e7;
/// Covariance resets allowed before a numerical failure becomes fatal.
pub const MAX_RECOVERIES: usize = 3;

const NEG_MIN_RESIDUAL_VARIANCE: f64 = 0.66;
const NEG_ALPHA_OLD: f64 = 0.5;

/// Default population size `4 + ⌊3 ln n⌋`.
pub fn default_lambda(dimension: usize) -> usize {
    4 + (3.0 * (dimension.max(1) as f64).ln()).floor() as usize
}

/// Strategy constants of one run, fixed once `n` and `λ` are known.
#[derive(Clone, Debug)]
pub struct Parameters {
    pub dimension: usize,
    pub lambda: usize,
    pub mu: usize,
    pub weights: Array1<f64>,
    pub mu_eff: f64,
    pub cs: f64,
    pub cc: f64,
    pub c1: f64,
    pub cmu: f64,
    pub damps: f64,
    pub chi_n: f64,

    // Active covariance update, zero when disabled
    pub neg_ccov: f64,
    pub neg_min_residual_variance: f64,
    pub neg_alpha_old: f64,

    /// Generations between two eigendecompositions
    pub eigen_gap: usize,

    // Stop conditions
    pub stop_tol_x: f64,
    pub stop_tol_up_x: f64,
    pub stop_tol_fun: f64,
    pub stop_tol_hist_fun: f64,
    pub history_size: usize,
}

impl Parameters {
    pub fn new(
        dimension: usize,
        lambda: usize,
        max_iterations: usize,
        max_sigma: f64,
        accuracy: f64,
        active: bool,
    ) -> Result<Self, MinimizerError> {
        if dimension == 0 {
            return Err(MinimizerError::InvalidDimension);
        }
        if lambda < 2 {
            return Err(MinimizerError::InvalidParameters(format!(
                "population size must be at least 2, got {}",
                lambda
            )));
        }
        if !(max_sigma.is_finite() && max_sigma > 0.0) {
            return Err(MinimizerError::InvalidStepSize);
        }
        if !(accuracy.is_finite() && accuracy > 0.0) {
            return Err(MinimizerError::InvalidParameters(format!(
                "accuracy must be positive and finite, got {}",
                accuracy
            )));
        }

        let n = dimension as f64;
        let mu = lambda / 2;

        let mut weights = Array1::from_shape_fn(mu, |i| {
            (mu as f64 + 0.5).ln() - ((i + 1) as f64).ln()
        });
        let sum: f64 = weights.sum();
        weights /= sum;
        let mu_eff = 1.0 / weights.iter().map(|w| w * w).sum::<f64>();

        let cc = (4.0 + mu_eff / n) / (n + 4.0 + 2.0 * mu_eff / n);
        let cs = (mu_eff + 2.0) / (n + mu_eff + 3.0);
        let damps = (1.0 + 2.0 * (0.0_f64).max(((mu_eff - 1.0) / (n + 1.0)).sqrt() - 1.0))
            * (0.3_f64).max(1.0 - n / (1e-6 + max_iterations as f64))
            + cs;
        let c1 = 2.0 / ((n + 1.3).powi(2) + mu_eff);
        let cmu = (1.0 - c1).min(2.0 * (mu_eff - 2.0 + 1.0 / mu_eff) / ((n + 2.0).powi(2) + mu_eff));
        let chi_n = n.sqrt() * (1.0 - 1.0 / (4.0 * n) + 1.0 / (21.0 * n * n));

        let neg_ccov = if active {
            (1.0 - cmu) * 0.25 * mu_eff / ((n + 2.0).powf(1.5) + 2.0 * mu_eff)
        } else {
            0.0
        };

        let eigen_gap = (1.0 / ((c1 + cmu + neg_ccov) * n * 10.0)).floor().max(1.0) as usize;

        Ok(Self {
            dimension,
            lambda,
            mu,
            weights,
            mu_eff,
            cs,
            cc,
            c1,
            cmu,
            damps,
            chi_n,
            neg_ccov,
            neg_min_residual_variance: NEG_MIN_RESIDUAL_VARIANCE,
            neg_alpha_old: NEG_ALPHA_OLD,
            eigen_gap,
            stop_tol_x: 1e-11 * accuracy * max_sigma,
            stop_tol_up_x: 1e3 * max_sigma,
            stop_tol_fun: 1e-12 * accuracy,
            stop_tol_hist_fun: 1e-13 * accuracy,
            history_size: 10 + (30.0 * n / lambda as f64) as usize,
        })
    }

    pub fn is_active(&self) -> bool {
        self.neg_ccov > 0.0
    }
}
