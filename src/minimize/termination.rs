use crate::minimize::{
    Terminate,
    distribution::DistributionState,
    evaluator::guarded,
    options::CmaesOptions,
    parameters::{MAX_AXIS_RATIO, Parameters},
    sampler::Generation,
};
use log::warn;
use std::{collections::VecDeque, fmt};

/// Why a run stopped. `code()` gives a stable integer; non-positive codes are failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    MaxEvaluations,
    MaxIterations,
    TargetReached,
    Cancelled,
    TolX,
    TolFun,
    TolHistFun,
    ConditionNumber,
    Fault,
    Diverged,
    NumericalFailure,
    InvalidConfiguration,
}

impl StopReason {
    pub fn code(&self) -> i32 {
        match self {
            StopReason::MaxEvaluations => 1,
            StopReason::MaxIterations => 2,
            StopReason::TargetReached => 3,
            StopReason::Cancelled => 4,
            StopReason::TolX => 5,
            StopReason::TolFun => 6,
            StopReason::TolHistFun => 7,
            StopReason::ConditionNumber => 8,
            StopReason::Fault => -1,
            StopReason::Diverged => -2,
            StopReason::NumericalFailure => -3,
            StopReason::InvalidConfiguration => -4,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code() > 0
    }

    /// Stops caused by the distribution contracting or stagnating.
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            StopReason::TolX
                | StopReason::TolFun
                | StopReason::TolHistFun
                | StopReason::ConditionNumber
        )
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            StopReason::MaxEvaluations => "MaxFunEvals: maximum function evaluations reached",
            StopReason::MaxIterations => "MaxIter: maximum iterations reached",
            StopReason::TargetReached => "Target fitness reached",
            StopReason::Cancelled => "Cancelled by callback",
            StopReason::TolX => "TolX: object variable changes below tolerance",
            StopReason::TolFun => "TolFun: function value differences too small",
            StopReason::TolHistFun => "TolFunHist: history of function value changes too small",
            StopReason::ConditionNumber => "ConditionNumber: covariance matrix ill-conditioned",
            StopReason::Fault => "Fault: objective function failed",
            StopReason::Diverged => "TolUpX: standard deviation increased too much",
            StopReason::NumericalFailure => "Numerical failure of the search distribution",
            StopReason::InvalidConfiguration => "Invalid configuration",
        };
        write!(f, "{}", msg)
    }
}

/// Stop-condition bookkeeping, evaluated once per generation.
#[derive(Clone)]
pub struct TerminationMonitor {
    max_evaluations: usize,
    max_iterations: usize,
    stop_fitness: Option<f64>,
    is_terminate: Option<Box<dyn Terminate>>,
    run_id: i64,

    stop_tol_x: f64,
    stop_tol_up_x: f64,
    stop_tol_fun: f64,
    stop_tol_hist_fun: f64,

    // Best fitness of each generation, newest first
    history: VecDeque<f64>,
    history_size: usize,

    reason: Option<StopReason>,
}

impl TerminationMonitor {
    pub fn new(params: &Parameters, options: &CmaesOptions) -> Self {
        Self {
            max_evaluations: options.max_evaluations,
            max_iterations: options.max_iterations,
            stop_fitness: options.stop_fitness,
            is_terminate: options.is_terminate.clone(),
            run_id: options.run_id,
            stop_tol_x: params.stop_tol_x,
            stop_tol_up_x: params.stop_tol_up_x,
            stop_tol_fun: params.stop_tol_fun,
            stop_tol_hist_fun: params.stop_tol_hist_fun,
            history: VecDeque::with_capacity(params.history_size),
            history_size: params.history_size,
            reason: None,
        }
    }

    pub fn reason(&self) -> Option<StopReason> {
        self.reason
    }

    /// Enter the stopped state; the first reason recorded wins.
    pub fn stop(&mut self, reason: StopReason) -> StopReason {
        *self.reason.get_or_insert(reason)
    }

    pub fn record(&mut self, generation_best: f64) {
        self.history.push_front(generation_best);
        self.history.truncate(self.history_size);
    }

    pub fn history_range(&self) -> Option<(f64, f64)> {
        if self.history.is_empty() {
            return None;
        }
        Some(
            self.history
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &val| {
                    (min.min(val), max.max(val))
                }),
        )
    }

    /// Check all stop conditions in priority order.
    ///
    /// Budgets come first, then the fitness target, the cancellation
    /// callback, and finally the degeneracy tests on the distribution.
    pub fn check(
        &mut self,
        evaluations: usize,
        iterations: usize,
        best: f64,
        state: &DistributionState,
        generation: &Generation,
    ) -> Option<StopReason> {
        if self.reason.is_some() {
            return self.reason;
        }

        if evaluations >= self.max_evaluations {
            return Some(self.stop(StopReason::MaxEvaluations));
        }
        if iterations >= self.max_iterations {
            return Some(self.stop(StopReason::MaxIterations));
        }
        if self.stop_fitness.is_some_and(|target| best <= target) {
            return Some(self.stop(StopReason::TargetReached));
        }

        if let Some(is_terminate) = self.is_terminate.as_mut() {
            let run_id = self.run_id;
            match guarded(|| is_terminate.is_terminate(run_id, iterations, best)) {
                Ok(true) => return Some(self.stop(StopReason::Cancelled)),
                Ok(false) => {}
                Err(msg) => {
                    warn!("termination callback panicked: {}", msg);
                    return Some(self.stop(StopReason::Fault));
                }
            }
        }

        let degenerate = self.degeneracy(iterations, state, generation)?;
        let reason = if degenerate.is_converged() && !best.is_finite() {
            StopReason::NumericalFailure
        } else {
            degenerate
        };
        Some(self.stop(reason))
    }

    fn degeneracy(
        &self,
        iterations: usize,
        state: &DistributionState,
        generation: &Generation,
    ) -> Option<StopReason> {
        let n = state.dimension();
        let sigma = state.sigma;

        let tol_x = (0..n).all(|i| {
            sigma * state.pc[i].abs().max(state.c[[i, i]].sqrt()) < self.stop_tol_x
        });
        if tol_x {
            return Some(StopReason::TolX);
        }

        if (0..n).any(|i| sigma * state.c[[i, i]].sqrt() > self.stop_tol_up_x) {
            return Some(StopReason::Diverged);
        }

        let (gen_min, gen_max) = generation.fitness_range();
        if let Some((hist_min, hist_max)) = self.history_range() {
            if iterations > 2 && gen_max.max(hist_max) - gen_min.min(hist_min) < self.stop_tol_fun
            {
                return Some(StopReason::TolFun);
            }
            if self.history.len() >= self.history_size
                && hist_max - hist_min < self.stop_tol_hist_fun
            {
                return Some(StopReason::TolHistFun);
            }
        }

        if state.axis_ratio() > MAX_AXIS_RATIO {
            return Some(StopReason::ConditionNumber);
        }

        None
    }
}

impl fmt::Debug for TerminationMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminationMonitor")
            .field("max_evaluations", &self.max_evaluations)
            .field("max_iterations", &self.max_iterations)
            .field("stop_fitness", &self.stop_fitness)
            .field("history", &self.history)
            .field("reason", &self.reason)
            .finish()
    }
}
