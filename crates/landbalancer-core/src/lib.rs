//! Land-transformation exchange balancing.
//!
//! Monte-Carlo sampling of LCA activities breaks a physical invariant: land
//! transformed *into* a state must balance land transformed *out of* it, but
//! independently sampled exchange amounts drift apart draw by draw. This
//! crate rebalances such samples per activity:
//!
//! - [`DatabaseLandBalancer`] scans a biosphere database once, classifying
//!   every elementary flow as land-in, land-out or irrelevant, then drives an
//!   [`ActivityLandBalancer`] per activity and stacks the returned sample
//!   blocks into one aggregate matrix with a flat row index.
//! - [`ActivityLandBalancer`] picks a rebalancing strategy from the
//!   activity's land exchanges, derives a closed-form symbolic parameter
//!   system whose joint stochastic evaluation keeps every draw balanced, and
//!   delegates evaluation to `landbalancer-engine`.
//! - [`ParameterNameGenerator`] supplies the collision-free parameter names
//!   every generated formula depends on.
//!
//! Activities are mutated in place during sampling (formulas staged in,
//! parameter lists swapped out) and restored unconditionally afterwards; the
//! restore runs in a drop guard so engine failures cannot corrupt the store.

use landbalancer_engine::EngineError;
use landbalancer_store::StoreError;
use thiserror::Error;

pub mod activity;
pub mod database;
pub mod names;

#[cfg(test)]
mod tests;

pub use activity::{ActivityLandBalancer, LandExchangeKind, StaticValue, Strategy};
pub use database::{DatabaseLandBalancer, LAND_IN_PATTERN, LAND_OUT_PATTERN};
pub use names::ParameterNameGenerator;

#[derive(Debug, Error)]
pub enum BalanceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("at least one term is required for this term group")]
    EmptyTermGroup,
    #[error("expected at least {needed} terms, got {got}")]
    TooFewTerms { needed: usize, got: usize },
    #[error("set_static strategy requires exactly one uncertain land exchange, found {got}")]
    SetStaticCardinality { got: usize },
    #[error("strategy has not been identified yet")]
    NotProcessed,
}
