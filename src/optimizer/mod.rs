//! Route optimization: a VRP with time windows and skills.
//!
//! Two strategies share the same request/result types: the primary
//! [`solver::GuidedSearchStrategy`] (cheapest insertion + guided local
//! search, droppable visits, soft time windows) and the
//! [`heuristic::HeuristicStrategy`] (nearest neighbor + 2-opt, hard time
//! windows). [`service::OptimizationService`] wires them to the store and
//! the distance service.

pub mod assignment;
pub mod heuristic;
pub mod service;
pub mod skill_gap;
pub mod solver;
pub mod types;

pub use service::{OptimizationOutcome, OptimizationService};
