use crate::{error::MinimizerError, minimize::eigen::symmetric_eigen};
use log::debug;
use ndarray::prelude::*;

use super::parameters::MAX_CONDITION;

/// Gaussian search distribution `N(mean, σ² C)` with its cached factorization.
#[derive(Clone, Debug)]
pub struct DistributionState {
    pub mean: Array1<f64>,
    pub sigma: f64,
    pub initial_sigma: f64,

    pub c: Array2<f64>,
    pub b: Array2<f64>, // eigenvectors
    pub d: Array1<f64>, // sqrt of eigenvalues
    pub bd: Array2<f64>,

    pub pc: Array1<f64>, // path for C
    pub ps: Array1<f64>, // path for sigma

    pub eigen_generation: usize,
    pub eigen_uptodate: bool,
}

impl DistributionState {
    /// Start at `x0` with per-coordinate initial standard deviations `sigmas`.
    ///
    /// The global step size is the geometric mean of `sigmas`; the remaining
    /// anisotropy goes into a diagonal C, so `σ · D` reproduces `sigmas`.
    pub fn new(x0: Array1<f64>, sigmas: &Array1<f64>) -> Result<Self, MinimizerError> {
        let n = x0.len();
        if n == 0 {
            return Err(MinimizerError::InvalidDimension);
        }
        if sigmas.len() != n {
            return Err(MinimizerError::InvalidParameters(format!(
                "Initial sigma has {} entries, expected {}",
                sigmas.len(),
                n
            )));
        }
        if sigmas.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(MinimizerError::InvalidStepSize);
        }

        let sigma = (sigmas.mapv(f64::ln).sum() / n as f64).exp();
        let d = sigmas / sigma;
        let c = Array2::from_diag(&d.mapv(|v| v * v));
        let bd = Array2::from_diag(&d);

        Ok(Self {
            mean: x0,
            sigma,
            initial_sigma: sigma,
            c,
            b: Array2::eye(n),
            d,
            bd,
            pc: Array1::zeros(n),
            ps: Array1::zeros(n),
            eigen_generation: 0,
            eigen_uptodate: true,
        })
    }

    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    /// Refresh `B`, `D` and `BD` from `C` when stale and due, or when forced.
    ///
    /// Returns `true` when a decomposition took place. Materially negative or
    /// non-finite spectra are reported as errors; tiny negative eigenvalues
    /// are clamped and the diagonal of C is lifted to keep the condition
    /// number below `MAX_CONDITION`.
    pub fn update_eigensystem(
        &mut self,
        generation: usize,
        eigen_gap: usize,
        force: bool,
    ) -> Result<bool, MinimizerError> {
        if !force
            && (self.eigen_uptodate || generation.saturating_sub(self.eigen_generation) < eigen_gap)
        {
            return Ok(false);
        }

        let n = self.dimension();
        for i in 0..n {
            for j in i + 1..n {
                self.c[[j, i]] = self.c[[i, j]];
            }
        }
        if self.c.iter().any(|v| !v.is_finite()) {
            return Err(MinimizerError::NumericalError(
                "Covariance matrix has non-finite entries".to_string(),
            ));
        }

        let (mut eigenvalues, eigenvectors) = symmetric_eigen(self.c.view())?;

        let min_eig = eigenvalues[0];
        let max_eig = eigenvalues[n - 1];
        if !(min_eig.is_finite() && max_eig.is_finite()) {
            return Err(MinimizerError::NumericalError(
                "Non-finite eigenvalue encountered".to_string(),
            ));
        }
        if max_eig <= 0.0 || min_eig < -1e-12 * max_eig.max(1.0) {
            return Err(MinimizerError::NumericalError(format!(
                "Covariance matrix is not positive definite: eigenvalues in [{:e}, {:e}]",
                min_eig, max_eig
            )));
        }

        if min_eig <= 0.0 {
            let lift = max_eig / MAX_CONDITION;
            eigenvalues.mapv_inplace(|v| v.max(0.0) + lift);
            self.add_to_diagonal(lift);
        }

        let min_eig = eigenvalues[0];
        let max_eig = eigenvalues[n - 1];
        if max_eig > MAX_CONDITION * min_eig {
            let lift = max_eig / MAX_CONDITION - min_eig;
            eigenvalues += lift;
            self.add_to_diagonal(lift);
        }

        self.d = eigenvalues.mapv(f64::sqrt);
        self.b = eigenvectors;
        self.bd = &self.b * &self.d;

        self.eigen_generation = generation;
        self.eigen_uptodate = true;

        debug!(
            "eigensystem refreshed at generation {}: axis ratio {:e}",
            generation,
            self.axis_ratio()
        );

        Ok(true)
    }

    fn add_to_diagonal(&mut self, value: f64) {
        self.c.diag_mut().mapv_inplace(|v| v + value);
    }

    /// Replace C by a scaled identity and clear both evolution paths.
    ///
    /// The scale is the mean variance `trace(C) / n` when usable, otherwise 1.
    /// A broken step size is restored to its initial value.
    pub fn reset(&mut self) {
        let n = self.dimension();
        let scale = self.c.diag().sum() / n as f64;
        let scale = if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            1.0
        };

        self.c = Array2::eye(n) * scale;
        self.b = Array2::eye(n);
        self.d = Array1::from_elem(n, scale.sqrt());
        self.bd = Array2::eye(n) * scale.sqrt();
        self.pc.fill(0.0);
        self.ps.fill(0.0);
        self.eigen_uptodate = true;

        if !self.sigma_is_valid() {
            self.sigma = self.initial_sigma;
        }
    }

    pub fn sigma_is_valid(&self) -> bool {
        self.sigma.is_finite() && self.sigma > 0.0
    }

    pub fn is_finite(&self) -> bool {
        self.sigma_is_valid()
            && self.mean.iter().all(|v| v.is_finite())
            && self.c.iter().all(|v| v.is_finite())
    }

    /// `max(D) / min(D)`, the square root of the condition number of C.
    pub fn axis_ratio(&self) -> f64 {
        let min_d = self.d.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        let max_d = self.d.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        if min_d > 0.0 {
            max_d / min_d
        } else {
            f64::INFINITY
        }
    }

    pub fn condition_number(&self) -> f64 {
        self.axis_ratio().powi(2)
    }
}

#[cfg(test)]
mod distribution_tests {
    use super::*;
    use float_cmp::{F64Margin, approx_eq};

    fn margin() -> F64Margin {
        F64Margin {
            epsilon: 1e-12,
            ulps: 4,
        }
    }

    mod initialization_tests {
        use super::*;

        #[test]
        fn test_scalar_sigma() {
            let state = DistributionState::new(array![1.0, 2.0, 3.0], &array![0.5, 0.5, 0.5])
                .unwrap();
            assert!(approx_eq!(f64, state.sigma, 0.5, margin()));
            assert_eq!(state.initial_sigma, state.sigma);
            for (i, &d) in state.d.iter().enumerate() {
                assert!(approx_eq!(f64, d, 1.0, margin()));
                assert!(approx_eq!(f64, state.c[[i, i]], 1.0, margin()));
            }
            assert_eq!(state.b, Array2::eye(3));
            assert_eq!(state.pc, Array1::zeros(3));
            assert_eq!(state.ps, Array1::zeros(3));
            assert_eq!(state.mean, array![1.0, 2.0, 3.0]);
        }

        #[test]
        fn test_per_dimension_sigma_uses_geometric_mean() {
            let sigmas = array![1.0, 4.0];
            let state = DistributionState::new(array![0.0, 0.0], &sigmas).unwrap();
            assert!(approx_eq!(f64, state.sigma, 2.0, margin()));
            for i in 0..2 {
                assert!(approx_eq!(f64, state.sigma * state.d[i], sigmas[i], margin()));
                assert!(approx_eq!(
                    f64,
                    state.sigma * state.sigma * state.c[[i, i]],
                    sigmas[i] * sigmas[i],
                    margin()
                ));
            }
            assert_eq!(state.c[[0, 1]], 0.0);
            assert!(approx_eq!(f64, state.axis_ratio(), 4.0, margin()));
        }

        #[test]
        fn test_invalid_inputs() {
            assert_eq!(
                DistributionState::new(Array1::zeros(0), &Array1::zeros(0)).unwrap_err(),
                MinimizerError::InvalidDimension
            );
            assert!(matches!(
                DistributionState::new(array![0.0, 0.0], &array![1.0]),
                Err(MinimizerError::InvalidParameters(_))
            ));
            assert_eq!(
                DistributionState::new(array![0.0], &array![0.0]).unwrap_err(),
                MinimizerError::InvalidStepSize
            );
        }
    }

    mod eigensystem_tests {
        use super::*;

        fn state_with(c: Array2<f64>) -> DistributionState {
            let n = c.nrows();
            let mut state =
                DistributionState::new(Array1::zeros(n), &Array1::from_elem(n, 1.0)).unwrap();
            state.c = c;
            state.eigen_uptodate = false;
            state
        }

        #[test]
        fn test_decomposition_reproduces_c() {
            let c = array![[2.0, 1.0, 0.0], [1.0, 2.0, 0.5], [0.0, 0.5, 1.0]];
            let mut state = state_with(c.clone());
            assert!(state.update_eigensystem(1, 1, false).unwrap());
            assert!(state.eigen_uptodate);
            assert_eq!(state.eigen_generation, 1);

            let r = state.bd.dot(&state.bd.t());
            for (x, y) in r.iter().zip(c.iter()) {
                assert!((x - y).abs() < 1e-10);
            }
            for w in state.d.windows(2) {
                assert!(w[0] <= w[1]);
            }
        }

        #[test]
        fn test_symmetrizes_from_upper_triangle() {
            let mut state = state_with(array![[2.0, 1.0], [0.0, 2.0]]);
            state.update_eigensystem(1, 1, true).unwrap();
            assert_eq!(state.c[[1, 0]], 1.0);
            assert!(approx_eq!(f64, state.d[0], 1.0, F64Margin { epsilon: 1e-10, ulps: 4 }));
            assert!(approx_eq!(
                f64,
                state.d[1],
                3.0_f64.sqrt(),
                F64Margin { epsilon: 1e-10, ulps: 4 }
            ));
        }

        #[test]
        fn test_lazy_refresh() {
            let mut state = state_with(array![[2.0, 0.0], [0.0, 1.0]]);
            // Not due yet
            assert!(!state.update_eigensystem(2, 5, false).unwrap());
            assert!(!state.eigen_uptodate);
            // Forced
            assert!(state.update_eigensystem(2, 5, true).unwrap());
            // Up to date
            assert!(!state.update_eigensystem(3, 1, false).unwrap());
            state.eigen_uptodate = false;
            assert!(!state.update_eigensystem(6, 5, false).unwrap());
            assert!(state.update_eigensystem(7, 5, false).unwrap());
        }

        #[test]
        fn test_rejects_indefinite_matrix() {
            let mut state = state_with(array![[1.0, 2.0], [2.0, 1.0]]);
            assert!(matches!(
                state.update_eigensystem(1, 1, true),
                Err(MinimizerError::NumericalError(_))
            ));
        }

        #[test]
        fn test_rejects_non_finite_matrix() {
            let mut state = state_with(array![[1.0, f64::NAN], [0.0, 1.0]]);
            let err = state.update_eigensystem(1, 1, true).unwrap_err();
            assert!(err.is_numerical());
        }

        #[test]
        fn test_rejects_collapsed_matrix() {
            let mut state = state_with(Array2::zeros((2, 2)));
            assert!(state.update_eigensystem(1, 1, true).is_err());
        }

        #[test]
        fn test_condition_ceiling() {
            let mut state = state_with(array![[1e-20, 0.0], [0.0, 1.0]]);
            state.update_eigensystem(1, 1, true).unwrap();
            assert!(state.condition_number() <= MAX_CONDITION * (1.0 + 1e-9));
            assert!(state.c[[0, 0]] > 0.99e-14);
            assert!(state.d.iter().all(|&d| d > 0.0));
        }

        #[test]
        fn test_clamps_tiny_negative_eigenvalue() {
            let mut state = state_with(array![[-1e-16, 0.0], [0.0, 1.0]]);
            state.update_eigensystem(1, 1, true).unwrap();
            assert!(state.d.iter().all(|&d| d > 0.0));
            assert!(state.c[[0, 0]] > 0.0);
        }
    }

    mod recovery_tests {
        use super::*;

        #[test]
        fn test_reset_to_scaled_identity() {
            let mut state =
                DistributionState::new(array![0.0, 0.0], &array![1.0, 1.0]).unwrap();
            state.c = array![[2.0, 0.7], [0.7, 4.0]];
            state.pc = array![1.0, 2.0];
            state.ps = array![3.0, 4.0];
            state.sigma = 0.1;
            state.reset();

            assert_eq!(state.c, Array2::eye(2) * 3.0);
            assert_eq!(state.b, Array2::eye(2));
            assert!(approx_eq!(f64, state.d[0], 3.0_f64.sqrt(), margin()));
            assert_eq!(state.pc, Array1::zeros(2));
            assert_eq!(state.ps, Array1::zeros(2));
            // A healthy sigma is kept
            assert_eq!(state.sigma, 0.1);
            assert!(state.is_finite());
        }

        #[test]
        fn test_reset_broken_state() {
            let mut state =
                DistributionState::new(array![0.0, 0.0], &array![0.5, 0.5]).unwrap();
            state.c[[0, 0]] = f64::NAN;
            state.sigma = f64::INFINITY;
            assert!(!state.is_finite());
            state.reset();

            assert_eq!(state.c, Array2::eye(2));
            assert_eq!(state.sigma, state.initial_sigma);
            assert!(state.is_finite());
            assert_eq!(state.axis_ratio(), 1.0);
        }
    }
}
