use crate::minimize::{bounds::Bounds, distribution::DistributionState, random::CmaRandom};
use ndarray::prelude::*;

/// Buffers of one generation: draws, candidates, fitness and ranking.
#[derive(Clone, Debug)]
pub struct Generation {
    pub arz: Vec<Array1<f64>>,
    pub arx: Vec<Array1<f64>>,
    pub fitness: Vec<f64>,
    pub index: Vec<usize>,
}

impl Generation {
    pub fn new(lambda: usize, dimension: usize) -> Self {
        Self {
            arz: vec![Array1::zeros(dimension); lambda],
            arx: vec![Array1::zeros(dimension); lambda],
            fitness: vec![f64::INFINITY; lambda],
            index: (0..lambda).collect(),
        }
    }

    pub fn lambda(&self) -> usize {
        self.arx.len()
    }

    /// Stable ascending sort of the candidates by fitness.
    pub fn rank(&mut self) {
        let fitness = &self.fitness;
        self.index = (0..fitness.len()).collect();
        self.index.sort_by(|&a, &b| fitness[a].total_cmp(&fitness[b]));
    }

    /// Fitness of the `k`-th best candidate of the last ranking.
    pub fn ranked_fitness(&self, k: usize) -> f64 {
        self.fitness[self.index[k]]
    }

    pub fn best(&self) -> (&Array1<f64>, f64) {
        let i = self.index[0];
        (&self.arx[i], self.fitness[i])
    }

    pub fn fitness_range(&self) -> (f64, f64) {
        self.fitness
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &val| {
                (min.min(val), max.max(val))
            })
    }
}

/// Fill `generation` with fresh candidates `clip(mean + σ · BD · z)`.
///
/// Draws are taken candidate by candidate, coordinates in order, so a given
/// random stream always yields the same population.
pub fn sample(
    state: &DistributionState,
    bounds: &Bounds,
    random: &mut CmaRandom,
    generation: &mut Generation,
) {
    let n = state.dimension();
    for k in 0..generation.lambda() {
        let z = Array1::from_shape_fn(n, |_| random.gauss());
        let mut x = &state.mean + &(state.sigma * state.bd.dot(&z));
        bounds.clip(&mut x);

        generation.arz[k] = z;
        generation.arx[k] = x;
    }
}
