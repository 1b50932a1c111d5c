//! Relational plans and their rendering to SQL text.

pub mod convert;
pub mod dialect;
pub mod instance;
pub mod plan;
pub mod render;

pub use convert::{CteSelection, DataflowToSqlConverter, SqlDataSet, SqlGenerationOptions};
pub use dialect::{Dialect, DuckDbDialect};
pub use instance::{Instance, InstanceSet};
pub use plan::{SqlCteNode, SqlExpr, SqlPlanNode, SqlQueryPlan, SqlSelectStatement};
pub use render::SqlRenderer;
