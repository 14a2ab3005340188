use crate::{
    error::MinimizerError,
    minimize::{Terminate, parameters::default_lambda},
};
use ndarray::prelude::*;
use std::fmt;

/// Initial step size, either shared by all coordinates or one per coordinate.
#[derive(Debug, Clone, PartialEq)]
pub enum Sigma {
    Scalar(f64),
    PerDim(Array1<f64>),
}

impl Sigma {
    /// Expand to one entry per coordinate, validating every entry.
    pub fn to_vector(&self, dimension: usize) -> Result<Array1<f64>, MinimizerError> {
        let sigmas = match self {
            Sigma::Scalar(s) => Array1::from_elem(dimension, *s),
            Sigma::PerDim(v) => {
                if v.len() != dimension {
                    return Err(MinimizerError::InvalidParameters(format!(
                        "Initial sigma has {} entries, expected {}",
                        v.len(),
                        dimension
                    )));
                }
                v.clone()
            }
        };
        if sigmas.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(MinimizerError::InvalidStepSize);
        }
        Ok(sigmas)
    }
}

impl Default for Sigma {
    fn default() -> Self {
        Sigma::Scalar(0.3)
    }
}

impl From<f64> for Sigma {
    fn from(s: f64) -> Self {
        Sigma::Scalar(s)
    }
}

impl From<Array1<f64>> for Sigma {
    fn from(v: Array1<f64>) -> Self {
        Sigma::PerDim(v)
    }
}

impl From<Vec<f64>> for Sigma {
    fn from(v: Vec<f64>) -> Self {
        Sigma::PerDim(Array1::from_vec(v))
    }
}

/// Run configuration for [`CmaEs`](crate::minimize::CmaEs).
///
/// ```
/// use cmakit::minimize::CmaesOptions;
/// use ndarray::array;
///
/// let options = CmaesOptions::new()
///     .with_initial_x(array![5.0, 5.0])
///     .with_sigma(1.0)
///     .with_popsize(20)
///     .with_stop_fitness(1e-10)
///     .with_max_evaluations(50_000)
///     .with_seed(42);
/// assert_eq!(options.popsize(2), 20);
/// ```
#[derive(Clone)]
pub struct CmaesOptions {
    pub initial_x: Option<Array1<f64>>,
    pub input_sigma: Sigma,
    pub popsize: Option<usize>,
    pub max_evaluations: usize,
    pub max_iterations: usize,
    pub accuracy: f64,
    pub stop_fitness: Option<f64>,
    pub is_terminate: Option<Box<dyn Terminate>>,
    pub seed: Option<u64>,
    pub run_id: i64,
    pub active_cma: bool,
}

impl Default for CmaesOptions {
    fn default() -> Self {
        Self {
            initial_x: None,
            input_sigma: Sigma::default(),
            popsize: None,
            max_evaluations: 100_000,
            max_iterations: 100_000,
            accuracy: 1.0,
            stop_fitness: None,
            is_terminate: None,
            seed: None,
            run_id: 0,
            active_cma: false,
        }
    }
}

impl CmaesOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_x(mut self, x: Array1<f64>) -> Self {
        self.initial_x = Some(x);
        self
    }

    pub fn with_sigma<S: Into<Sigma>>(mut self, sigma: S) -> Self {
        self.input_sigma = sigma.into();
        self
    }

    pub fn with_popsize(mut self, popsize: usize) -> Self {
        self.popsize = Some(popsize);
        self
    }

    pub fn with_max_evaluations(mut self, max_evaluations: usize) -> Self {
        self.max_evaluations = max_evaluations;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Values above 1.0 relax the convergence tolerances.
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = accuracy;
        self
    }

    pub fn with_stop_fitness(mut self, stop_fitness: f64) -> Self {
        self.stop_fitness = Some(stop_fitness);
        self
    }

    pub fn with_terminate<T: Terminate + 'static>(mut self, is_terminate: T) -> Self {
        self.is_terminate = Some(Box::new(is_terminate));
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_run_id(mut self, run_id: i64) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_active_cma(mut self, active: bool) -> Self {
        self.active_cma = active;
        self
    }

    /// Population size for a problem of the given dimension.
    pub fn popsize(&self, dimension: usize) -> usize {
        self.popsize.unwrap_or_else(|| default_lambda(dimension))
    }

    /// Checks that do not depend on the problem dimension.
    pub fn validate(&self) -> Result<(), MinimizerError> {
        if self.popsize.is_some_and(|p| p < 2) {
            return Err(MinimizerError::InvalidParameters(
                "population size must be at least 2".to_string(),
            ));
        }
        if self.max_evaluations == 0 {
            return Err(MinimizerError::InvalidParameters(
                "max_evaluations must be positive".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(MinimizerError::InvalidParameters(
                "max_iterations must be positive".to_string(),
            ));
        }
        if !(self.accuracy.is_finite() && self.accuracy > 0.0) {
            return Err(MinimizerError::InvalidParameters(format!(
                "accuracy must be positive and finite, got {}",
                self.accuracy
            )));
        }
        if self.stop_fitness.is_some_and(f64::is_nan) {
            return Err(MinimizerError::InvalidParameters(
                "stop_fitness must not be NaN".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for CmaesOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CmaesOptions")
            .field("initial_x", &self.initial_x)
            .field("input_sigma", &self.input_sigma)
            .field("popsize", &self.popsize)
            .field("max_evaluations", &self.max_evaluations)
            .field("max_iterations", &self.max_iterations)
            .field("accuracy", &self.accuracy)
            .field("stop_fitness", &self.stop_fitness)
            .field("is_terminate", &self.is_terminate.is_some())
            .field("seed", &self.seed)
            .field("run_id", &self.run_id)
            .field("active_cma", &self.active_cma)
            .finish()
    }
}

#[cfg(test)]
mod options_tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = CmaesOptions::default();
        assert_eq!(options.input_sigma, Sigma::Scalar(0.3));
        assert_eq!(options.max_evaluations, 100_000);
        assert_eq!(options.max_iterations, 100_000);
        assert_eq!(options.accuracy, 1.0);
        assert_eq!(options.run_id, 0);
        assert!(options.stop_fitness.is_none());
        assert!(options.is_terminate.is_none());
        assert!(!options.active_cma);
        assert_eq!(options.popsize(2), 6);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let options = CmaesOptions::new()
            .with_initial_x(array![1.0, 2.0])
            .with_sigma(vec![0.1, 0.2])
            .with_popsize(12)
            .with_max_evaluations(500)
            .with_max_iterations(50)
            .with_accuracy(2.0)
            .with_stop_fitness(-1.0)
            .with_terminate(|_: i64, _: usize, _: f64| false)
            .with_seed(9)
            .with_run_id(3)
            .with_active_cma(true);

        assert_eq!(options.initial_x, Some(array![1.0, 2.0]));
        assert_eq!(options.input_sigma, Sigma::PerDim(array![0.1, 0.2]));
        assert_eq!(options.popsize(2), 12);
        assert_eq!(options.max_evaluations, 500);
        assert_eq!(options.max_iterations, 50);
        assert_eq!(options.accuracy, 2.0);
        assert_eq!(options.stop_fitness, Some(-1.0));
        assert!(options.is_terminate.is_some());
        assert_eq!(options.seed, Some(9));
        assert_eq!(options.run_id, 3);
        assert!(options.active_cma);
        assert!(options.validate().is_ok());

        // Boxed callback survives cloning
        let cloned = options.clone();
        assert!(cloned.is_terminate.is_some());
        assert!(format!("{:?}", cloned).contains("is_terminate: true"));
    }

    #[test]
    fn test_sigma_to_vector() {
        assert_eq!(
            Sigma::Scalar(0.5).to_vector(3).unwrap(),
            array![0.5, 0.5, 0.5]
        );
        assert_eq!(
            Sigma::from(array![1.0, 2.0]).to_vector(2).unwrap(),
            array![1.0, 2.0]
        );
        assert!(matches!(
            Sigma::from(vec![1.0, 2.0]).to_vector(3),
            Err(MinimizerError::InvalidParameters(_))
        ));
        assert_eq!(
            Sigma::Scalar(0.0).to_vector(2).unwrap_err(),
            MinimizerError::InvalidStepSize
        );
        assert_eq!(
            Sigma::from(vec![1.0, -1.0]).to_vector(2).unwrap_err(),
            MinimizerError::InvalidStepSize
        );
        assert_eq!(
            Sigma::Scalar(f64::INFINITY).to_vector(1).unwrap_err(),
            MinimizerError::InvalidStepSize
        );
    }

    #[test]
    fn test_validate() {
        assert!(CmaesOptions::new().with_popsize(1).validate().is_err());
        assert!(CmaesOptions::new().with_max_evaluations(0).validate().is_err());
        assert!(CmaesOptions::new().with_max_iterations(0).validate().is_err());
        assert!(CmaesOptions::new().with_accuracy(0.0).validate().is_err());
        assert!(CmaesOptions::new().with_accuracy(-1.0).validate().is_err());
        assert!(
            CmaesOptions::new()
                .with_stop_fitness(f64::NAN)
                .validate()
                .is_err()
        );
        assert!(
            CmaesOptions::new()
                .with_stop_fitness(f64::NEG_INFINITY)
                .validate()
                .is_ok()
        );
    }
}
