//! Logical dataflow plans: what is read, joined, filtered and aggregated.

pub mod builder;
pub mod common_branches;
pub mod node;

pub use builder::DataflowPlanBuilder;
pub use common_branches::find_common_branches;
pub use node::{DataflowPlan, DataflowPlanNode, MeasureAggregation, MetricExpr, NodeKind};
