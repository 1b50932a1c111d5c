//! Relational plan: select statements over subqueries, tables and CTEs.

use serde_json::Value;

use crate::model::elements::{DatePart, TimeGranularity};
use crate::model::manifest::{AggregationType, OffsetWindow};

#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    Column {
        table: Option<String>,
        name: String,
    },
    Literal(Value),
    /// SQL written by the model author or rendered from a filter template.
    Raw(String),
    Function {
        func: SqlFunction,
        args: Vec<SqlExpr>,
    },
    Cast {
        expr: Box<SqlExpr>,
        data_type: String,
    },
    BinaryOp {
        op: SqlBinaryOperator,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },
    Aggregate {
        agg: AggregationType,
        expr: Box<SqlExpr>,
    },
    DateTrunc {
        granularity: TimeGranularity,
        expr: Box<SqlExpr>,
    },
    Extract {
        date_part: DatePart,
        expr: Box<SqlExpr>,
    },
    AddInterval {
        expr: Box<SqlExpr>,
        window: OffsetWindow,
    },
    Window {
        func: WindowFunction,
        expr: Box<SqlExpr>,
        partition_by: Vec<SqlExpr>,
        order_by: Vec<SqlExpr>,
    },
}

impl SqlExpr {
    pub fn column(table: &str, name: &str) -> Self {
        SqlExpr::Column {
            table: Some(table.to_string()),
            name: name.to_string(),
        }
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        SqlExpr::Raw(sql.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlFunction {
    Coalesce,
    NullIf,
}

/// Running aggregate over the window's ordered rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowFunction {
    Sum,
    Min,
    Max,
}

impl WindowFunction {
    /// How an already aggregated measure is re-aggregated across rows.
    pub fn for_aggregation(agg: AggregationType) -> Self {
        match agg {
            AggregationType::Min => WindowFunction::Min,
            AggregationType::Max => WindowFunction::Max,
            _ => WindowFunction::Sum,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlBinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    And,
    Eq,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: SqlExpr,
    pub alias: Option<String>,
}

/// What a FROM or JOIN reads.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlPlanNode {
    Select(Box<SqlSelectStatement>),
    /// A physical table or a CTE, referenced by name.
    Table { name: String },
}

impl SqlPlanNode {
    pub fn table(name: impl Into<String>) -> Self {
        SqlPlanNode::Table { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub source: SqlPlanNode,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlJoinType {
    Left,
    FullOuter,
    Cross,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: SqlJoinType,
    pub table: TableRef,
    pub on: Vec<SqlExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: SqlExpr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlSelectStatement {
    pub select: Vec<SelectItem>,
    pub from: TableRef,
    pub joins: Vec<Join>,
    pub filters: Vec<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<u64>,
}

impl SqlSelectStatement {
    pub fn new(from: TableRef) -> Self {
        Self {
            select: Vec::new(),
            from,
            joins: Vec::new(),
            filters: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }
}

/// A named subquery listed in the WITH clause.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCteNode {
    pub alias: String,
    pub select: SqlPlanNode,
}

/// The converted query: CTEs in dependency order, then the outer node.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQueryPlan {
    pub ctes: Vec<SqlCteNode>,
    pub root: SqlPlanNode,
}
