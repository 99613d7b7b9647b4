//! Fund Simulation - lifecycle and performance engine for real-estate lending funds
//!
//! This library provides:
//! - Portfolio generation with zone allocation and truncated-normal loan terms
//! - A per-period lifecycle state machine (exits, defaults, reinvestment)
//! - Cash-flow projection with European and American waterfalls
//! - Performance metrics (IRR with solver fallbacks, multiples, risk, DPI/TVPI)
//! - Fund-level leverage facilities
//! - A parallel Monte Carlo driver

pub mod cashflows;
pub mod dataset;
pub mod distributions;
pub mod error;
pub mod fund;
pub mod generator;
pub mod leverage;
pub mod lifecycle;
pub mod metrics;
pub mod monte_carlo;
pub mod pipeline;
pub mod portfolio;

// Re-export commonly used types
pub use cashflows::{CashFlowLedger, CashFlowRow, FlowKey};
pub use dataset::{SuburbDataset, ZoneDataSource};
pub use error::{Result, SimulationError};
pub use fund::{Fund, FundConfig, Granularity, MarketConditions, ParameterVariation, Zone};
pub use generator::PortfolioGenerator;
pub use leverage::LeverageConfig;
pub use lifecycle::{simulate_lifecycle, LifecycleEngine, LifecycleResult};
pub use metrics::{compute_metrics, IrrMethod, IrrResult, PerformanceMetrics};
pub use monte_carlo::{MonteCarloConfig, MonteCarloResult, MonteCarloRunner};
pub use pipeline::{run, SimulationResult};
pub use portfolio::{Loan, LoanId, Portfolio};
