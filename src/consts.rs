/// Return, variance and CVaR.
pub const NUMBER_OF_OPTIMIZATION_OBJECTIVES: usize = 3;

pub const FLOAT_COMPARISON_EPSILON: f64 = 1e-9;

/// Tolerance used when checking that a genotype still sits on the simplex.
pub const SIMPLEX_TOLERANCE: f64 = 1e-6;

/// Fewer aligned assets than this and the three objectives stop being meaningful.
pub const MINIMUM_ASSETS: usize = 3;

/// Below this many finite loss observations CVaR falls back to the loss standard deviation.
pub const MINIMUM_CVAR_OBSERVATIONS: usize = 20;

/// Fraction of the smaller weight moved by a single mutation.
pub const MUTATION_TRANSFER_FRACTION: f64 = 0.2;

/// Weights below this are dropped from a final composition.
pub const COMPOSITION_DUST_THRESHOLD: f64 = 0.001;

/// Range below which a front column is considered flat during normalization.
pub const NORMALIZATION_RANGE_EPSILON: f64 = 1e-10;

pub const DEFAULT_POPULATION_SIZE: usize = 100;
pub const DEFAULT_GENERATIONS: usize = 50;
pub const DEFAULT_CROSSOVER_ETA: f64 = 15.0;
pub const DEFAULT_MUTATION_ETA: f64 = 20.0;
pub const DEFAULT_CROSSOVER_PROBABILITY: f64 = 0.9;
pub const DEFAULT_MUTATION_PROBABILITY: f64 = 1.0;
pub const DEFAULT_CVAR_ALPHA: f64 = 0.05;
pub const DEFAULT_MIN_WEIGHT: f64 = 0.01;
pub const DEFAULT_MAX_WEIGHT: f64 = 0.30;

pub const DEFAULT_HYPERVOLUME_SAMPLES: usize = 10_000;
pub const HYPERVOLUME_REFERENCE_MARGIN: f64 = 0.1;
pub const DEFAULT_CONVERGENCE_WINDOW: usize = 10;
pub const DEFAULT_CONVERGENCE_THRESHOLD: f64 = 0.01;

/// Asset-count offsets probed, in order, when no exact configuration exists.
pub const LOOKUP_PROBE_OFFSETS: [i64; 5] = [0, 1, -1, 2, -2];

pub const MONTHS_PER_YEAR: f64 = 12.0;
