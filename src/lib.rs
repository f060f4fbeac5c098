pub mod backtest;
pub mod config;
pub mod consts;
pub mod docs;
pub mod evolution;
pub mod handlers;
pub mod logging;
pub mod optimizer;
pub mod portfolio;
pub mod profile;
pub mod returns;
pub mod sampling;
pub mod tuning;
pub mod web_app;

pub use evolution::portfolio_evolution::{
    EvolutionConfig, EvolutionError, EvolutionResult, EvolutionStrategy, StandardParetoEvolution,
    WeightBounds,
};
pub use optimizer::{OptimizationOutcome, OptimizationRequest, PortfolioOptimizer};
pub use profile::RiskProfile;
