use crate::{error::MinimizerError, minimize::ObjFn};
use log::warn;
use ndarray::prelude::*;
use std::panic::{self, AssertUnwindSafe};

/// Run `f`, turning a panic into an error message.
pub(crate) fn guarded<T, F: FnOnce() -> T>(f: F) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        if let Some(msg) = payload.downcast_ref::<&str>() {
            msg.to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "unknown panic payload".to_string()
        }
    })
}

/// Evaluate the objective once.
///
/// Errors, panics, `NaN` and `-inf` are objective faults. `+inf` is passed
/// through and simply ranks last.
pub fn evaluate_one(f: &mut dyn ObjFn, x: &Array1<f64>) -> Result<f64, MinimizerError> {
    let value = guarded(|| f.call(x)).map_err(|msg| {
        MinimizerError::FunctionEvaluationError(format!("objective panicked: {}", msg))
    })??;

    if value.is_nan() {
        return Err(MinimizerError::FunctionEvaluationError(
            "objective returned NaN".to_string(),
        ));
    }
    if value == f64::NEG_INFINITY {
        return Err(MinimizerError::FunctionEvaluationError(
            "objective returned -inf".to_string(),
        ));
    }
    Ok(value)
}

/// Sequentially evaluate `candidates` into `fitness`.
///
/// Returns the number of completed evaluations, or the fault together with
/// the number completed before it.
pub fn evaluate(
    f: &mut dyn ObjFn,
    candidates: &[Array1<f64>],
    fitness: &mut [f64],
) -> Result<usize, (MinimizerError, usize)> {
    for (k, x) in candidates.iter().enumerate() {
        match evaluate_one(f, x) {
            Ok(value) => fitness[k] = value,
            Err(e) => {
                warn!("objective fault at candidate {}: {}", k, e);
                return Err((e, k));
            }
        }
    }
    Ok(candidates.len())
}

#[cfg(test)]
mod evaluator_tests {
    use super::*;
    use crate::minimize::FallibleFn;
    use std::{cell::RefCell, rc::Rc};

    fn candidates() -> Vec<Array1<f64>> {
        vec![array![1.0], array![2.0], array![3.0], array![4.0]]
    }

    #[test]
    fn test_all_evaluated_in_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut f = |x: &Array1<f64>| x[0] * 10.0;
        let mut fitness = vec![0.0; 4];
        assert_eq!(evaluate(&mut f, &candidates(), &mut fitness), Ok(4));
        assert_eq!(fitness, vec![10.0, 20.0, 30.0, 40.0]);

        // Order is observable through a stateful objective
        let log = Rc::clone(&seen);
        let mut g = FallibleFn::new(move |x: &Array1<f64>| {
            log.borrow_mut().push(x[0]);
            Ok::<f64, String>(0.0)
        });
        evaluate(&mut g, &candidates(), &mut fitness).unwrap();
        assert_eq!(*seen.borrow(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_error_stops_evaluation() {
        let mut f = FallibleFn::new(|x: &Array1<f64>| {
            if x[0] > 2.5 {
                Err("out of domain")
            } else {
                Ok(x[0])
            }
        });
        let mut fitness = vec![0.0; 4];
        let (err, completed) = evaluate(&mut f, &candidates(), &mut fitness).unwrap_err();
        assert_eq!(completed, 2);
        assert_eq!(
            err,
            MinimizerError::FunctionEvaluationError("out of domain".to_string())
        );
    }

    #[test]
    fn test_panic_is_caught() {
        let mut f = |x: &Array1<f64>| {
            if x[0] > 1.5 {
                panic!("boom");
            }
            x[0]
        };
        let mut fitness = vec![0.0; 4];
        let (err, completed) = evaluate(&mut f, &candidates(), &mut fitness).unwrap_err();
        assert_eq!(completed, 1);
        match err {
            MinimizerError::FunctionEvaluationError(msg) => assert!(msg.contains("boom")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_values() {
        let mut nan = |_: &Array1<f64>| f64::NAN;
        assert!(evaluate_one(&mut nan, &array![0.0]).is_err());

        let mut neg_inf = |_: &Array1<f64>| f64::NEG_INFINITY;
        assert!(evaluate_one(&mut neg_inf, &array![0.0]).is_err());

        let mut pos_inf = |_: &Array1<f64>| f64::INFINITY;
        assert_eq!(evaluate_one(&mut pos_inf, &array![0.0]), Ok(f64::INFINITY));
    }

    #[test]
    fn test_guarded() {
        assert_eq!(guarded(|| 3), Ok(3));
        let err = guarded(|| -> i32 { panic!("{} went wrong", "it") }).unwrap_err();
        assert_eq!(err, "it went wrong");
    }
}
