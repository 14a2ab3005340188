use crate::{
    error::MinimizerError,
    minimize::{
        MinimizerResult, ObjFn,
        bounds::Bounds,
        distribution::DistributionState,
        evaluator,
        options::CmaesOptions,
        outer,
        parameters::{MAX_RECOVERIES, Parameters},
        random::CmaRandom,
        sampler::{self, Generation},
        termination::{StopReason, TerminationMonitor},
    },
};
use log::{debug, info, trace, warn};
use ndarray::prelude::*;
use std::fmt;

/// Result of CMA-ES optimization
#[derive(Debug, Clone)]
pub struct CmaesResult {
    pub xmin: Option<Array1<f64>>,
    pub fmin: f64,
    pub fn_evals: usize,
    pub iters: usize,
    pub stop_reason: StopReason,
    pub success: bool,
    pub final_sigma: f64,
    pub condition_number: f64,
    /// Best fitness found so far, one entry per generation
    pub history: Vec<f64>,
    pub error: Option<MinimizerError>,
}

impl CmaesResult {
    /// Result of a run that produced no usable point.
    pub fn failure(
        stop_reason: StopReason,
        fn_evals: usize,
        iters: usize,
        error: Option<MinimizerError>,
    ) -> Self {
        Self {
            xmin: None,
            fmin: f64::MAX,
            fn_evals,
            iters,
            stop_reason,
            success: false,
            final_sigma: f64::NAN,
            condition_number: f64::NAN,
            history: Vec::new(),
            error,
        }
    }

    pub fn status(&self) -> i32 {
        self.stop_reason.code()
    }
}

impl MinimizerResult<Array1<f64>> for CmaesResult {
    fn xmin(&self) -> Option<Array1<f64>> {
        self.xmin.clone()
    }
    fn fmin(&self) -> f64 {
        self.fmin
    }
    fn fn_evals(&self) -> usize {
        self.fn_evals
    }
    fn iters(&self) -> usize {
        self.iters
    }
    fn converged(&self) -> bool {
        self.success
    }
}

/// Covariance matrix adaptation evolution strategy on a box-bounded domain.
///
/// The engine can be driven to completion with [`run`](CmaEs::run), one
/// generation at a time with [`next`](CmaEs::next), or through the ask/tell
/// pair [`sample_population`](CmaEs::sample_population) and
/// [`update_distribution`](CmaEs::update_distribution) when the caller
/// evaluates candidates itself.
#[derive(Clone)]
pub struct CmaEs {
    f: Box<dyn ObjFn>,
    bounds: Bounds,
    params: Parameters,
    random: CmaRandom,
    state: DistributionState,
    population: Generation,
    monitor: TerminationMonitor,

    generation: usize,
    count_evals: usize,
    x_best_ever: Array1<f64>,
    f_best_ever: f64,
    history: Vec<f64>,
    recoveries: usize,
    error: Option<MinimizerError>,
}

impl CmaEs {
    pub fn new<F>(
        f: F,
        bounds: Option<Bounds>,
        options: CmaesOptions,
    ) -> Result<Self, MinimizerError>
    where
        F: ObjFn + 'static,
    {
        CmaEs::new_boxed(Box::new(f), bounds, options)
    }

    /// Validate the configuration and set up the initial distribution.
    ///
    /// The dimension comes from the bounds when given, otherwise from the
    /// initial guess; one of the two is required. Without a guess the
    /// starting point is drawn inside the bounds.
    pub fn new_boxed(
        f: Box<dyn ObjFn>,
        bounds: Option<Bounds>,
        options: CmaesOptions,
    ) -> Result<Self, MinimizerError> {
        options.validate()?;

        let bounds = match (bounds, options.initial_x.as_ref()) {
            (Some(bounds), _) => bounds,
            (None, Some(x)) if !x.is_empty() => Bounds::unbounded(x.len()),
            (None, Some(_)) => return Err(MinimizerError::InvalidDimension),
            (None, None) => {
                return Err(MinimizerError::InvalidParameters(
                    "either an initial guess or bounds are required".to_string(),
                ));
            }
        };
        let dimension = bounds.dimension();

        let mut random = CmaRandom::new(options.seed);
        let x0 = bounds.initial_guess(options.initial_x.as_ref(), &mut random)?;
        let sigmas = options.input_sigma.to_vector(dimension)?;
        let max_sigma = sigmas.fold(0.0_f64, |a, &b| a.max(b));

        let params = Parameters::new(
            dimension,
            options.popsize(dimension),
            options.max_iterations,
            max_sigma,
            options.accuracy,
            options.active_cma,
        )?;
        let state = DistributionState::new(x0.clone(), &sigmas)?;
        let population = Generation::new(params.lambda, dimension);
        let monitor = TerminationMonitor::new(&params, &options);

        debug!(
            "CMA-ES run {}: n = {}, lambda = {}, mu = {}, mu_eff = {:.3}, sigma = {:e}, active = {}",
            options.run_id,
            dimension,
            params.lambda,
            params.mu,
            params.mu_eff,
            state.sigma,
            params.is_active()
        );
        debug!(
            "learning rates: cs = {:.4}, cc = {:.4}, c1 = {:.4e}, cmu = {:.4e}, damps = {:.4}, eigen gap = {}",
            params.cs, params.cc, params.c1, params.cmu, params.damps, params.eigen_gap
        );

        Ok(Self {
            f,
            bounds,
            params,
            random,
            state,
            population,
            monitor,
            generation: 0,
            count_evals: 0,
            x_best_ever: x0,
            f_best_ever: f64::INFINITY,
            history: Vec::new(),
            recoveries: 0,
            error: None,
        })
    }

    /// Draw a new generation, clipped into the bounds.
    pub fn sample_population(&mut self) -> Result<&[Array1<f64>], MinimizerError> {
        self.refresh_eigensystem()?;
        sampler::sample(
            &self.state,
            &self.bounds,
            &mut self.random,
            &mut self.population,
        );
        Ok(&self.population.arx)
    }

    /// Feed back the fitness of the last sampled generation, in sampling order.
    ///
    /// Counts one evaluation per candidate.
    pub fn update_distribution(&mut self, fitness_values: &[f64]) -> Result<(), MinimizerError> {
        if fitness_values.len() != self.params.lambda {
            return Err(MinimizerError::InvalidParameters(
                "Fitness values length mismatch".to_string(),
            ));
        }
        if let Some(v) = fitness_values
            .iter()
            .find(|v| v.is_nan() || **v == f64::NEG_INFINITY)
        {
            return Err(MinimizerError::FunctionEvaluationError(format!(
                "invalid fitness value {}",
                v
            )));
        }

        self.population.fitness.copy_from_slice(fitness_values);
        self.count_evals += self.params.lambda;
        self.tell().or_else(|e| self.recover(e))
    }

    /// Check the stop conditions; the first reason found is kept.
    pub fn test_for_termination(&mut self) -> Option<StopReason> {
        self.monitor.check(
            self.count_evals,
            self.generation,
            self.f_best_ever,
            &self.state,
            &self.population,
        )
    }

    /// Run one generation: sample, evaluate, update and check termination.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<StopReason> {
        if let Some(reason) = self.monitor.reason() {
            return Some(reason);
        }

        if let Err(e) = self.step() {
            let reason = if e.is_numerical() {
                StopReason::NumericalFailure
            } else {
                StopReason::Fault
            };
            warn!("CMA-ES stopped at generation {}: {}", self.generation, e);
            self.error = Some(e);
            return Some(self.monitor.stop(reason));
        }

        trace!(
            "generation {}: evals = {}, sigma = {:e}, best = {:e}, axis ratio = {:e}",
            self.generation,
            self.count_evals,
            self.state.sigma,
            self.f_best_ever,
            self.state.axis_ratio()
        );

        self.test_for_termination()
    }

    /// Iterate until a stop condition holds.
    pub fn run(&mut self) -> CmaesResult {
        let reason = loop {
            if let Some(reason) = self.next() {
                break reason;
            }
        };

        info!(
            "CMA-ES stopped after {} generations and {} evaluations: {} (best {:e})",
            self.generation, self.count_evals, reason, self.f_best_ever
        );

        self.result(reason)
    }

    fn result(&self, reason: StopReason) -> CmaesResult {
        if !reason.is_success() {
            return CmaesResult {
                final_sigma: self.state.sigma,
                condition_number: self.state.condition_number(),
                ..CmaesResult::failure(
                    reason,
                    self.count_evals,
                    self.generation,
                    self.error.clone(),
                )
            };
        }

        CmaesResult {
            xmin: Some(self.x_best_ever.clone()),
            fmin: self.f_best_ever,
            fn_evals: self.count_evals,
            iters: self.generation,
            stop_reason: reason,
            success: true,
            final_sigma: self.state.sigma,
            condition_number: self.state.condition_number(),
            history: self.history.clone(),
            error: None,
        }
    }

    fn step(&mut self) -> Result<(), MinimizerError> {
        self.sample_population()?;

        match evaluator::evaluate(
            &mut *self.f,
            &self.population.arx,
            &mut self.population.fitness,
        ) {
            Ok(completed) => self.count_evals += completed,
            Err((e, completed)) => {
                self.count_evals += completed;
                return Err(e);
            }
        }

        self.tell().or_else(|e| self.recover(e))
    }

    fn refresh_eigensystem(&mut self) -> Result<(), MinimizerError> {
        match self
            .state
            .update_eigensystem(self.generation, self.params.eigen_gap, false)
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_numerical() => self.recover(e),
            Err(e) => Err(e),
        }
    }

    /// Reset the distribution after a numerical breakdown, if allowed.
    fn recover(&mut self, e: MinimizerError) -> Result<(), MinimizerError> {
        if !e.is_numerical() || self.recoveries >= MAX_RECOVERIES {
            return Err(e);
        }
        self.recoveries += 1;
        warn!(
            "resetting covariance at generation {} ({}/{}): {}",
            self.generation, self.recoveries, MAX_RECOVERIES, e
        );
        self.state.reset();
        Ok(())
    }

    fn tell(&mut self) -> Result<(), MinimizerError> {
        let n = self.params.dimension;
        self.generation += 1;
        self.population.rank();

        let (best_x, best_f) = self.population.best();
        if best_f < self.f_best_ever {
            self.f_best_ever = best_f;
            self.x_best_ever = best_x.clone();
        }
        self.history.push(self.f_best_ever);
        self.monitor.record(best_f);

        // Weighted recombination of the μ best
        let x_old = self.state.mean.clone();
        let mut x_mean = Array1::zeros(n);
        for (i, &idx) in self.population.index.iter().take(self.params.mu).enumerate() {
            x_mean.scaled_add(self.params.weights[i], &self.population.arx[idx]);
        }
        self.state.mean = x_mean;

        let hsig = self.update_evolution_paths(&x_old);
        self.update_covariance_matrix(&x_old, hsig);
        self.update_step_size();
        self.state.eigen_uptodate = false;

        if !self.state.is_finite() {
            return Err(MinimizerError::NumericalError(
                "search distribution became non-finite".to_string(),
            ));
        }
        Ok(())
    }

    fn update_evolution_paths(&mut self, x_old: &Array1<f64>) -> bool {
        let p = &self.params;
        let s = &mut self.state;

        let shift = (&s.mean - x_old) / s.sigma;

        // z = D^(-1) * B^T * shift
        let z = s.b.t().dot(&shift) / &s.d;
        let bz = s.b.dot(&z);
        s.ps = (1.0 - p.cs) * &s.ps + (p.cs * (2.0 - p.cs) * p.mu_eff).sqrt() * &bz;

        let ps_norm = s.ps.dot(&s.ps).sqrt();
        let expected_norm = 1.0 - (1.0 - p.cs).powf(2.0 * self.generation as f64);
        let hsig =
            ps_norm / expected_norm.sqrt() / p.chi_n < 1.4 + 2.0 / (p.dimension as f64 + 1.0);

        let hsig_factor = if hsig { 1.0 } else { 0.0 };
        s.pc = (1.0 - p.cc) * &s.pc
            + hsig_factor * (p.cc * (2.0 - p.cc) * p.mu_eff).sqrt() * &shift;

        hsig
    }

    fn update_covariance_matrix(&mut self, x_old: &Array1<f64>, hsig: bool) {
        let negative = if self.params.is_active() {
            Some(active_update(&self.params, &self.state, &self.population))
        } else {
            None
        };

        let p = &self.params;
        let pop = &self.population;
        let s = &mut self.state;
        let n = p.dimension;

        let mut old_fac = 1.0 - p.c1 - p.cmu;
        if !hsig {
            old_fac += p.c1 * p.cc * (2.0 - p.cc);
        }
        let mut cmu = p.cmu;

        // Rank-one update
        let rank_one = outer(&s.pc, &s.pc);

        // Rank-mu update
        let mut rank_mu = Array2::zeros((n, n));
        for (i, &idx) in pop.index.iter().take(p.mu).enumerate() {
            let y = (&pop.arx[idx] - x_old) / s.sigma;
            rank_mu.scaled_add(p.weights[i], &outer(&y, &y));
        }

        let mut c = match negative {
            Some((c_neg, neg_ccov)) => {
                old_fac += p.neg_alpha_old * neg_ccov;
                cmu += (1.0 - p.neg_alpha_old) * neg_ccov;
                -neg_ccov * c_neg
            }
            None => Array2::zeros((n, n)),
        };
        c.scaled_add(old_fac, &s.c);
        c.scaled_add(p.c1, &rank_one);
        c.scaled_add(cmu, &rank_mu);
        s.c = c;
    }

    fn update_step_size(&mut self) {
        let p = &self.params;
        let s = &mut self.state;

        let ps_norm = s.ps.dot(&s.ps).sqrt();
        s.sigma *= ((ps_norm / p.chi_n - 1.0) * p.cs / p.damps).min(1.0).exp();

        // Flat fitness: the best and the ⌊0.1 + λ/4⌋-th are equal but distinct points
        let pop = &self.population;
        let k = (0.1 + p.lambda as f64 / 4.0) as usize;
        let (first, kth) = (pop.index[0], pop.index[k]);
        if pop.fitness[first] == pop.fitness[kth] && pop.arx[first] != pop.arx[kth] {
            s.sigma *= (0.2 + p.cs / p.damps).exp();
            debug!(
                "flat fitness at generation {}, increasing sigma to {:e}",
                self.generation, s.sigma
            );
        }
    }

    // Getters
    pub fn generation(&self) -> usize {
        self.generation
    }
    pub fn count_evals(&self) -> usize {
        self.count_evals
    }
    pub fn sigma(&self) -> f64 {
        self.state.sigma
    }
    pub fn x_mean(&self) -> &Array1<f64> {
        &self.state.mean
    }
    pub fn x_best_ever(&self) -> &Array1<f64> {
        &self.x_best_ever
    }
    pub fn f_best_ever(&self) -> f64 {
        self.f_best_ever
    }
    pub fn covariance_matrix(&self) -> &Array2<f64> {
        &self.state.c
    }
    pub fn axis_ratio(&self) -> f64 {
        self.state.axis_ratio()
    }
    pub fn dimension(&self) -> usize {
        self.params.dimension
    }
    pub fn lambda(&self) -> usize {
        self.params.lambda
    }
    pub fn parameters(&self) -> &Parameters {
        &self.params
    }
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.monitor.reason()
    }
    pub fn recoveries(&self) -> usize {
        self.recoveries
    }
}

/// Negative rank-μ term from the μ worst draws, with its capped learning rate.
///
/// The draws are rescaled so that their lengths appear in reverse order of
/// magnitude, and the rate is limited so that at least
/// `neg_min_residual_variance` of the variance survives in every direction.
fn active_update(
    params: &Parameters,
    state: &DistributionState,
    population: &Generation,
) -> (Array2<f64>, f64) {
    let n = params.dimension;
    let mu = params.mu;

    // Worst first
    let worst: Vec<usize> = population.index.iter().rev().take(mu).copied().collect();
    let norms: Vec<f64> = worst
        .iter()
        .map(|&k| population.arz[k].dot(&population.arz[k]).sqrt())
        .collect();

    let mut sorted: Vec<usize> = (0..mu).collect();
    sorted.sort_by(|&a, &b| norms[a].total_cmp(&norms[b]));
    let mut norm_factors = vec![0.0; mu];
    for (rank, &j) in sorted.iter().enumerate() {
        norm_factors[j] = norms[sorted[mu - 1 - rank]] / norms[j];
    }

    let weighted: f64 = norm_factors
        .iter()
        .zip(params.weights.iter())
        .map(|(a, w)| a * a * w)
        .sum();
    let neg_ccov = params
        .neg_ccov
        .min((1.0 - params.neg_min_residual_variance) / weighted);

    let mut c_neg = Array2::zeros((n, n));
    for (j, &k) in worst.iter().enumerate() {
        let v = state.bd.dot(&(&population.arz[k] * norm_factors[j]));
        c_neg.scaled_add(params.weights[j], &outer(&v, &v));
    }

    (c_neg, neg_ccov)
}

impl fmt::Debug for CmaEs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CmaEs( xmin: {:?}, fmin: {}, generations: {}, evaluations: {}, sigma: {}, stopped: {:?})",
            self.x_best_ever,
            self.f_best_ever,
            self.generation,
            self.count_evals,
            self.state.sigma,
            self.monitor.reason()
        )
    }
}

/// Minimize `f` with CMA-ES.
///
/// Never fails: configuration errors, objective faults and numerical
/// breakdowns are reported through `stop_reason` and `success`.
///
/// ```
/// use cmakit::minimize::{CmaesOptions, minimize};
/// use ndarray::{Array1, array};
///
/// let sphere = |x: &Array1<f64>| x.iter().map(|v| v * v).sum::<f64>();
/// let result = minimize(
///     sphere,
///     None,
///     CmaesOptions::new()
///         .with_initial_x(array![5.0, 5.0])
///         .with_sigma(1.0)
///         .with_stop_fitness(1e-10)
///         .with_seed(7),
/// );
/// assert!(result.success);
/// assert!(result.fmin <= 1e-10);
/// ```
pub fn minimize<F>(f: F, bounds: Option<Bounds>, options: CmaesOptions) -> CmaesResult
where
    F: ObjFn + 'static,
{
    match CmaEs::new(f, bounds, options) {
        Ok(mut cmaes) => cmaes.run(),
        Err(e) => {
            warn!("invalid CMA-ES configuration: {}", e);
            CmaesResult::failure(StopReason::InvalidConfiguration, 0, 0, Some(e))
        }
    }
}
