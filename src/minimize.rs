use crate::error::MinimizerError;
use dyn_clone::DynClone;
use ndarray::prelude::*;
use std::fmt;

pub mod bounds;
pub mod cma_es;
pub mod distribution;
pub mod eigen;
pub mod evaluator;
pub mod options;
pub mod parameters;
pub mod random;
pub mod sampler;
pub mod termination;

pub use self::bounds::Bounds;
pub use self::cma_es::{CmaEs, CmaesResult, minimize};
pub use self::options::{CmaesOptions, Sigma};
pub use self::parameters::Parameters;
pub use self::random::CmaRandom;
pub use self::termination::StopReason;

// Define a trait for the objective function
pub trait ObjFn: DynClone {
    fn call(&mut self, x: &Array1<f64>) -> Result<f64, MinimizerError>;
}
dyn_clone::clone_trait_object!(ObjFn);

// Plain closures never fail on their own; panics are caught by the evaluator
impl<F> ObjFn for F
where
    F: FnMut(&Array1<f64>) -> f64 + Clone,
{
    fn call(&mut self, x: &Array1<f64>) -> Result<f64, MinimizerError> {
        Ok(self(x))
    }
}

/// Wrapper for objectives that report their own failures.
///
/// ```
/// use cmakit::minimize::{FallibleFn, ObjFn};
/// use ndarray::array;
///
/// let mut f = FallibleFn::new(|x: &ndarray::Array1<f64>| {
///     if x[0] < 0.0 {
///         Err("negative input")
///     } else {
///         Ok(x[0].sqrt())
///     }
/// });
/// assert_eq!(f.call(&array![4.0]).unwrap(), 2.0);
/// assert!(f.call(&array![-1.0]).is_err());
/// ```
#[derive(Clone)]
pub struct FallibleFn<F>(pub F);

impl<F> FallibleFn<F> {
    pub fn new(f: F) -> Self {
        FallibleFn(f)
    }
}

impl<F, E> ObjFn for FallibleFn<F>
where
    F: FnMut(&Array1<f64>) -> Result<f64, E> + Clone,
    E: fmt::Display,
{
    fn call(&mut self, x: &Array1<f64>) -> Result<f64, MinimizerError> {
        (self.0)(x).map_err(|e| MinimizerError::FunctionEvaluationError(e.to_string()))
    }
}

/// Cancellation callback, asked once per generation with
/// `(run_id, iterations, best fitness so far)`.
pub trait Terminate: DynClone {
    fn is_terminate(&mut self, run_id: i64, iterations: usize, best: f64) -> bool;
}
dyn_clone::clone_trait_object!(Terminate);

impl<F> Terminate for F
where
    F: FnMut(i64, usize, f64) -> bool + Clone,
{
    fn is_terminate(&mut self, run_id: i64, iterations: usize, best: f64) -> bool {
        self(run_id, iterations, best)
    }
}

pub trait MinimizerResult<T> {
    fn xmin(&self) -> Option<T>;
    fn fmin(&self) -> f64;
    fn fn_evals(&self) -> usize;
    fn iters(&self) -> usize;
    fn converged(&self) -> bool;
}

/// Outer product `a bᵀ`
pub(crate) fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    Array2::from_shape_fn((a.len(), b.len()), |(i, j)| a[i] * b[j])
}

#[cfg(test)]
mod minimize_tests {
    use super::*;

    #[test]
    fn test_closure_objective() {
        let mut f = |x: &Array1<f64>| x.iter().map(|v| v * v).sum::<f64>();
        assert_eq!(ObjFn::call(&mut f, &array![1.0, 2.0]).unwrap(), 5.0);
    }

    #[test]
    fn test_stateful_closure_objective() {
        let mut calls = 0;
        let mut f = move |x: &Array1<f64>| {
            calls += 1;
            x[0] + calls as f64
        };
        assert_eq!(ObjFn::call(&mut f, &array![0.0]).unwrap(), 1.0);
        assert_eq!(ObjFn::call(&mut f, &array![0.0]).unwrap(), 2.0);
    }

    #[test]
    fn test_fallible_objective() {
        let mut f = FallibleFn::new(|x: &Array1<f64>| {
            if x[0] > 1.0 {
                Err(format!("{} out of domain", x[0]))
            } else {
                Ok(x[0])
            }
        });
        assert_eq!(f.call(&array![0.5]).unwrap(), 0.5);
        assert_eq!(
            f.call(&array![2.0]).unwrap_err(),
            MinimizerError::FunctionEvaluationError("2 out of domain".to_string())
        );
    }

    #[test]
    fn test_boxed_objective_clone() {
        let f: Box<dyn ObjFn> = Box::new(|x: &Array1<f64>| 2.0 * x[0]);
        let mut g = f.clone();
        assert_eq!(g.call(&array![3.0]).unwrap(), 6.0);
    }

    #[test]
    fn test_terminate_closure() {
        let mut t = |run_id: i64, iterations: usize, best: f64| {
            run_id == 7 && iterations > 2 && best < 1.0
        };
        assert!(!t.is_terminate(7, 1, 0.0));
        assert!(t.is_terminate(7, 3, 0.5));
        assert!(!t.is_terminate(0, 3, 0.5));
    }

    #[test]
    fn test_outer_product() {
        let a = array![1.0, 2.0];
        let b = array![3.0, 4.0];
        let result = outer(&a, &b);

        assert_eq!(result[[0, 0]], 3.0);
        assert_eq!(result[[0, 1]], 4.0);
        assert_eq!(result[[1, 0]], 6.0);
        assert_eq!(result[[1, 1]], 8.0);
    }
}
