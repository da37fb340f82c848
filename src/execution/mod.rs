// Per-user signal handling and order placement
pub mod orchestrator;

pub use orchestrator::{
    build_trade_plan, evaluate_gates, Gate, Orchestrator, TradePlan, TrailingPlan,
};
