//! Dataflow plan nodes.
//!
//! Nodes are immutable and shared through [`Arc`]. Equality is structural: two
//! nodes are equal when their kinds and their whole parent subtrees are equal.
//! The structural hash is computed once at construction so repeated-subtree
//! detection can bucket nodes by hash instead of comparing them pairwise.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;

use crate::model::elements::{EntityReference, SemanticModelReference, TimeGranularity};
use crate::model::manifest::{AggregationType, OffsetWindow};
use crate::resolution::filter_render::WhereFilterSpec;
use crate::specs::spec::{InstanceSpec, LinkableSpec, MeasureSpec, MetricSpec, OrderBySpec};

/// A measure together with how it is aggregated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MeasureAggregation {
    pub measure: MeasureSpec,
    pub agg: AggregationType,
}

/// How a metric column is computed from its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum MetricExpr {
    /// The aggregated measure, unchanged.
    Measure(MeasureSpec),
    Ratio {
        numerator: MetricSpec,
        denominator: MetricSpec,
    },
    /// SQL over the output names of the input metrics.
    Derived { expr: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum NodeKind {
    ReadSource {
        semantic_model: SemanticModelReference,
    },
    /// Adds `metric_time` columns derived from the aggregation time dimension.
    MetricTimeTransform {
        agg_time_dimension: String,
        defined_granularity: TimeGranularity,
        offset_window: Option<OffsetWindow>,
    },
    /// Left-joins each parent after the first on the matching entity.
    JoinOnEntities {
        join_entities: Vec<EntityReference>,
    },
    WhereConstraint {
        filter: WhereFilterSpec,
    },
    FilterElements {
        include: Vec<InstanceSpec>,
    },
    AggregateMeasures {
        aggregations: Vec<MeasureAggregation>,
    },
    ComputeMetrics {
        metric: MetricSpec,
        expr: MetricExpr,
    },
    /// Full outer join of aggregated outputs on their shared group-by items.
    CombineAggregatedOutputs,
    /// Running re-aggregation of measures ordered by `order_by`.
    WindowReaggregation {
        order_by: LinkableSpec,
        partition_by: Vec<LinkableSpec>,
        aggregations: Vec<MeasureAggregation>,
    },
    OrderByLimit {
        order_by: Vec<OrderBySpec>,
        limit: Option<u64>,
    },
    WriteToResult,
}

impl NodeKind {
    pub fn description(&self) -> &'static str {
        match self {
            NodeKind::ReadSource { .. } => "Read From Semantic Model",
            NodeKind::MetricTimeTransform { .. } => "Metric Time Dimension Transform",
            NodeKind::JoinOnEntities { .. } => "Join Standard Outputs",
            NodeKind::WhereConstraint { .. } => "Constrain Output with WHERE",
            NodeKind::FilterElements { .. } => "Pass Only Elements",
            NodeKind::AggregateMeasures { .. } => "Aggregate Measures",
            NodeKind::ComputeMetrics { .. } => "Compute Metrics via Expressions",
            NodeKind::CombineAggregatedOutputs => "Combine Aggregated Outputs",
            NodeKind::WindowReaggregation { .. } => "Window Function for Metric Re-aggregation",
            NodeKind::OrderByLimit { .. } => "Order By & Limit",
            NodeKind::WriteToResult => "Write to Result",
        }
    }
}

struct NodeInner {
    kind: NodeKind,
    parents: Vec<DataflowPlanNode>,
    structural_hash: u64,
}

/// Shared handle to an immutable plan node.
#[derive(Clone)]
pub struct DataflowPlanNode(Arc<NodeInner>);

impl DataflowPlanNode {
    pub fn new(kind: NodeKind, parents: Vec<DataflowPlanNode>) -> Self {
        let mut hasher = DefaultHasher::new();
        kind.hash(&mut hasher);
        for parent in &parents {
            hasher.write_u64(parent.structural_hash());
        }
        Self(Arc::new(NodeInner {
            kind,
            parents,
            structural_hash: hasher.finish(),
        }))
    }

    pub fn leaf(kind: NodeKind) -> Self {
        Self::new(kind, Vec::new())
    }

    pub fn with_parent(kind: NodeKind, parent: DataflowPlanNode) -> Self {
        Self::new(kind, vec![parent])
    }

    pub fn kind(&self) -> &NodeKind {
        &self.0.kind
    }

    pub fn parents(&self) -> &[DataflowPlanNode] {
        &self.0.parents
    }

    pub fn structural_hash(&self) -> u64 {
        self.0.structural_hash
    }

    /// Number of nodes in the tree rooted here, counting shared subtrees once per use.
    pub fn tree_size(&self) -> usize {
        1 + self.parents().iter().map(DataflowPlanNode::tree_size).sum::<usize>()
    }

    /// Indented outline of the tree, one node per line.
    pub fn structure_text(&self) -> String {
        let mut out = String::new();
        self.write_structure(0, &mut out);
        out
    }

    fn write_structure(&self, depth: usize, out: &mut String) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(self.kind().description());
        match self.kind() {
            NodeKind::ReadSource { semantic_model } => {
                out.push_str(&format!(" [{semantic_model}]"));
            }
            NodeKind::MetricTimeTransform {
                agg_time_dimension,
                offset_window: Some(window),
                ..
            } => {
                out.push_str(&format!(
                    " [{agg_time_dimension} + {} {}]",
                    window.count, window.granularity
                ));
            }
            NodeKind::JoinOnEntities { join_entities } => {
                let names: Vec<&str> = join_entities.iter().map(|e| e.as_str()).collect();
                out.push_str(&format!(" [{}]", names.join(", ")));
            }
            NodeKind::WhereConstraint { filter } => {
                out.push_str(&format!(" [{}]", filter.where_sql));
            }
            NodeKind::ComputeMetrics { metric, .. } => {
                out.push_str(&format!(" [{}]", metric.output_name()));
            }
            _ => {}
        }
        out.push('\n');
        for parent in self.parents() {
            parent.write_structure(depth + 1, out);
        }
    }
}

impl PartialEq for DataflowPlanNode {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.structural_hash == other.0.structural_hash
                && self.0.kind == other.0.kind
                && self.0.parents == other.0.parents)
    }
}

impl Eq for DataflowPlanNode {}

impl Hash for DataflowPlanNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.structural_hash);
    }
}

impl fmt::Debug for DataflowPlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataflowPlanNode")
            .field("kind", &self.0.kind)
            .field("parents", &self.0.parents)
            .finish()
    }
}

/// A complete plan, identified by its sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataflowPlan {
    pub sink: DataflowPlanNode,
}

impl DataflowPlan {
    pub fn new(sink: DataflowPlanNode) -> Self {
        Self { sink }
    }

    pub fn structure_text(&self) -> String {
        self.sink.structure_text()
    }
}
