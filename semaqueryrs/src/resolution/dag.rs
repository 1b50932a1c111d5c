//! The resolution DAG: query, metric and measure contexts in which group-by
//! items are resolved.
//!
//! Nodes live in an arena and are addressed by [`ResolutionNodeId`]. A node's
//! parents are the nodes whose candidate specs it inherits: the query node's
//! parents are the metric nodes, a metric's parents are its input metrics or
//! its measure source.

use std::fmt;

use serde::Serialize;

use crate::error::{Result, SemaqueryError};
use crate::model::elements::{MeasureReference, MetricReference};
use crate::model::lookup::SemanticModelLookup;
use crate::model::manifest::{MetricInput, WhereFilterIntersection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResolutionNodeId(usize);

impl fmt::Display for ResolutionNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rn_{}", self.0)
    }
}

/// Where a metric appears as an input of a derived or ratio metric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MetricInputLocation {
    pub derived_metric: MetricReference,
    pub input_index: usize,
}

impl MetricInputLocation {
    pub fn metric_input<'l>(&self, lookup: &'l dyn SemanticModelLookup) -> Option<&'l MetricInput> {
        let metric = lookup.get_metric(&self.derived_metric)?;
        metric.input_metrics().get(self.input_index).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ResolutionNodeKind {
    MeasureSource {
        measure: MeasureReference,
    },
    Metric {
        metric: MetricReference,
        input_location: Option<MetricInputLocation>,
    },
    Query {
        metrics: Vec<MetricReference>,
        where_filters: WhereFilterIntersection,
    },
    NoMetricsQuery,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolutionNode {
    pub id: ResolutionNodeId,
    pub kind: ResolutionNodeKind,
    pub parents: Vec<ResolutionNodeId>,
}

impl ResolutionNode {
    /// Short label used in issue locations, e.g. `Metric('bookings')`.
    pub fn ui_description(&self) -> String {
        match &self.kind {
            ResolutionNodeKind::MeasureSource { measure } => format!("Measure('{measure}')"),
            ResolutionNodeKind::Metric { metric, .. } => format!("Metric('{metric}')"),
            ResolutionNodeKind::Query { metrics, .. } => {
                let names: Vec<String> = metrics.iter().map(|m| format!("'{m}'")).collect();
                format!("Query([{}])", names.join(", "))
            }
            ResolutionNodeKind::NoMetricsQuery => "NoMetricsQuery()".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolutionDag {
    nodes: Vec<ResolutionNode>,
    sink: ResolutionNodeId,
}

impl ResolutionDag {
    pub fn node(&self, id: ResolutionNodeId) -> &ResolutionNode {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> &[ResolutionNode] {
        &self.nodes
    }

    /// The query node every other node feeds into.
    pub fn sink_node(&self) -> ResolutionNodeId {
        self.sink
    }

    pub fn parents(&self, id: ResolutionNodeId) -> &[ResolutionNodeId] {
        &self.node(id).parents
    }

    /// Metric nodes directly feeding the query node, in query order.
    pub fn query_metric_nodes(&self) -> Vec<ResolutionNodeId> {
        self.parents(self.sink)
            .iter()
            .copied()
            .filter(|id| matches!(self.node(*id).kind, ResolutionNodeKind::Metric { .. }))
            .collect()
    }
}

/// Builds a [`ResolutionDag`] for a query. Every occurrence of a metric gets
/// its own node, so the same metric reached twice is resolved twice.
pub struct ResolutionDagBuilder<'a> {
    lookup: &'a dyn SemanticModelLookup,
    nodes: Vec<ResolutionNode>,
}

impl<'a> ResolutionDagBuilder<'a> {
    pub fn new(lookup: &'a dyn SemanticModelLookup) -> Self {
        Self {
            lookup,
            nodes: Vec::new(),
        }
    }

    pub fn build(
        mut self,
        metrics: &[MetricReference],
        where_filters: WhereFilterIntersection,
    ) -> Result<ResolutionDag> {
        let parents = if metrics.is_empty() {
            vec![self.push(ResolutionNodeKind::NoMetricsQuery, Vec::new())]
        } else {
            metrics
                .iter()
                .map(|metric| self.build_metric(metric, None))
                .collect::<Result<Vec<_>>>()?
        };
        let sink = self.push(
            ResolutionNodeKind::Query {
                metrics: metrics.to_vec(),
                where_filters,
            },
            parents,
        );
        tracing::debug!(nodes = self.nodes.len(), "built resolution dag");
        Ok(ResolutionDag {
            nodes: self.nodes,
            sink,
        })
    }

    fn build_metric(
        &mut self,
        reference: &MetricReference,
        input_location: Option<MetricInputLocation>,
    ) -> Result<ResolutionNodeId> {
        let lookup = self.lookup;
        let metric = lookup.get_metric(reference).ok_or_else(|| {
            SemaqueryError::Internal(format!("metric '{reference}' is not in the semantic model"))
        })?;

        let mut parents = Vec::new();
        for measure in metric.input_measures() {
            let measure = measure.reference();
            if lookup.get_measure(&measure).is_none() {
                return Err(SemaqueryError::Internal(format!(
                    "measure '{measure}' of metric '{reference}' is not in the semantic model"
                )));
            }
            parents.push(self.push(ResolutionNodeKind::MeasureSource { measure }, Vec::new()));
        }
        for (input_index, input) in metric.input_metrics().into_iter().enumerate() {
            let location = MetricInputLocation {
                derived_metric: reference.clone(),
                input_index,
            };
            parents.push(self.build_metric(&input.reference(), Some(location))?);
        }

        Ok(self.push(
            ResolutionNodeKind::Metric {
                metric: reference.clone(),
                input_location,
            },
            parents,
        ))
    }

    fn push(&mut self, kind: ResolutionNodeKind, parents: Vec<ResolutionNodeId>) -> ResolutionNodeId {
        let id = ResolutionNodeId(self.nodes.len());
        self.nodes.push(ResolutionNode { id, kind, parents });
        id
    }
}
