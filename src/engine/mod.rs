//! Execution engine for sqlfleet
//!
//! The engine orchestrates:
//! 1. Planning - Compile the deployment into every node's ordered declarations
//! 2. Diffing - Show what the probes found against what is declared
//! 3. Executing - Confirm, persist the plan, converge the fleet, report

pub mod differ;
pub mod executor;
pub mod planner;

pub use executor::{ApplyOptions, execute};
pub use planner::build_plan;
