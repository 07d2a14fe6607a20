//! Join strategy planning over dataset handles.
//!
//! The planner decides between broadcast, bucketed-merge, and the flagged
//! shuffle fallback, validates keys and bucketing claims before any data
//! moves, and derives the joined result's schema and layout.

pub mod explain;
pub mod join_planner;

pub use explain::explain_join;
pub use join_planner::{
    join_output_schema, output_layout, plan_join, BroadcastSide, JoinKind, JoinPlan,
    JoinPlannerConfig, JoinSpec, PlannedJoin, PlanningContext,
};
