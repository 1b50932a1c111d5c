//! Dataflow plan to relational plan conversion.
//!
//! Every dataflow node becomes one select statement reading its parents as
//! aliased subqueries. Nodes chosen for CTE extraction are converted once,
//! listed in the WITH clause in dependency order, and referenced by alias
//! wherever they occur again.

use std::collections::{HashMap, HashSet};

use serde_json::json;

use crate::config::SqlConfig;
use crate::dataflow::common_branches::find_common_branches;
use crate::dataflow::node::{DataflowPlan, DataflowPlanNode, MeasureAggregation, MetricExpr, NodeKind};
use crate::error::{Result, SemaqueryError};
use crate::model::elements::{
    DatePart, EntityReference, SemanticModelReference, TimeGranularity, METRIC_TIME_ELEMENT_NAME,
};
use crate::model::lookup::SemanticModelLookup;
use crate::model::manifest::OffsetWindow;
use crate::resolution::filter_render::WhereFilterSpec;
use crate::specs::column_assoc::ColumnAssociationResolver;
use crate::specs::spec::{
    DimensionSpec, EntitySpec, GroupByMetricSpec, InstanceSpec, LinkableSpec, MeasureSpec, MetricSpec,
    OrderBySpec, TimeDimensionSpec,
};
use crate::sql::instance::{Instance, InstanceSet};
use crate::sql::plan::{
    Join, OrderItem, SelectItem, SqlBinaryOperator, SqlCteNode, SqlExpr, SqlFunction, SqlJoinType,
    SqlPlanNode, SqlQueryPlan, SqlSelectStatement, TableRef, WindowFunction,
};

/// Which dataflow nodes are extracted into CTEs.
#[derive(Debug, Clone, Default)]
pub enum CteSelection {
    /// Every node is inlined as a subquery.
    #[default]
    None,
    /// The largest subtrees occurring more than once.
    CommonBranches,
    /// Exactly these nodes, wherever they occur below the sink.
    Explicit(Vec<DataflowPlanNode>),
}

#[derive(Debug, Clone, Default)]
pub struct SqlGenerationOptions {
    pub cte_selection: CteSelection,
}

impl SqlGenerationOptions {
    pub fn from_config(config: &SqlConfig) -> Self {
        let cte_selection = if config.use_ctes_for_common_nodes {
            CteSelection::CommonBranches
        } else {
            CteSelection::None
        };
        Self { cte_selection }
    }
}

/// A converted node: the columns it exposes and the SQL producing them.
#[derive(Debug, Clone)]
pub struct SqlDataSet {
    pub instance_set: InstanceSet,
    pub node: SqlPlanNode,
}

struct ConversionState {
    start: DataflowPlanNode,
    cte_nodes: HashSet<DataflowPlanNode>,
    cte_aliases: HashMap<DataflowPlanNode, (String, InstanceSet)>,
    ctes: Vec<SqlCteNode>,
    next_subquery: usize,
    next_cte: usize,
}

pub struct DataflowToSqlConverter<'a> {
    lookup: &'a dyn SemanticModelLookup,
    column_resolver: &'a dyn ColumnAssociationResolver,
    config: &'a SqlConfig,
}

impl<'a> DataflowToSqlConverter<'a> {
    pub fn new(
        lookup: &'a dyn SemanticModelLookup,
        column_resolver: &'a dyn ColumnAssociationResolver,
        config: &'a SqlConfig,
    ) -> Self {
        Self {
            lookup,
            column_resolver,
            config,
        }
    }

    pub fn convert(&self, plan: &DataflowPlan, options: &SqlGenerationOptions) -> Result<SqlQueryPlan> {
        let cte_nodes: HashSet<DataflowPlanNode> = match &options.cte_selection {
            CteSelection::None => HashSet::new(),
            CteSelection::CommonBranches => find_common_branches(&plan.sink).into_iter().collect(),
            CteSelection::Explicit(nodes) => nodes.iter().cloned().collect(),
        };
        let mut state = ConversionState {
            start: plan.sink.clone(),
            cte_nodes,
            cte_aliases: HashMap::new(),
            ctes: Vec::new(),
            next_subquery: 0,
            next_cte: 0,
        };
        let output = self.visit(&plan.sink, &mut state)?;
        tracing::debug!(ctes = state.ctes.len(), "converted dataflow plan to SQL");
        Ok(SqlQueryPlan {
            ctes: state.ctes,
            root: output.node,
        })
    }

    fn visit(&self, node: &DataflowPlanNode, state: &mut ConversionState) -> Result<SqlDataSet> {
        if *node == state.start || !state.cte_nodes.contains(node) {
            return self.convert_node(node, state);
        }
        if let Some((alias, instance_set)) = state.cte_aliases.get(node) {
            return Ok(SqlDataSet {
                instance_set: instance_set.clone(),
                node: SqlPlanNode::table(alias.clone()),
            });
        }

        let data_set = self.convert_node(node, state)?;
        let alias = format!("{}_{}", self.config.cte_alias_prefix, state.next_cte);
        state.next_cte += 1;
        tracing::debug!(
            alias = %alias,
            node = node.kind().description(),
            "extracted common subtree into CTE"
        );
        state.ctes.push(SqlCteNode {
            alias: alias.clone(),
            select: data_set.node,
        });
        state
            .cte_aliases
            .insert(node.clone(), (alias.clone(), data_set.instance_set.clone()));
        Ok(SqlDataSet {
            instance_set: data_set.instance_set,
            node: SqlPlanNode::table(alias),
        })
    }

    fn convert_node(&self, node: &DataflowPlanNode, state: &mut ConversionState) -> Result<SqlDataSet> {
        match node.kind() {
            NodeKind::ReadSource { semantic_model } => self.convert_read_source(semantic_model, state),
            NodeKind::MetricTimeTransform {
                agg_time_dimension,
                defined_granularity,
                offset_window,
            } => {
                let parent = self.visit_parent(node, state)?;
                self.convert_metric_time(parent, agg_time_dimension, *defined_granularity, *offset_window)
            }
            NodeKind::JoinOnEntities { join_entities } => self.convert_join(node, join_entities, state),
            NodeKind::WhereConstraint { filter } => {
                let parent = self.visit_parent(node, state)?;
                Ok(convert_where(parent, filter))
            }
            NodeKind::FilterElements { include } => {
                let parent = self.visit_parent(node, state)?;
                convert_filter_elements(parent, include)
            }
            NodeKind::AggregateMeasures { aggregations } => {
                let parent = self.visit_parent(node, state)?;
                convert_aggregate(parent, aggregations)
            }
            NodeKind::ComputeMetrics { metric, expr } => {
                let parent = self.visit_parent(node, state)?;
                self.convert_compute_metric(parent, metric, expr)
            }
            NodeKind::CombineAggregatedOutputs => self.convert_combine(node, state),
            NodeKind::WindowReaggregation {
                order_by,
                partition_by,
                aggregations,
            } => {
                let parent = self.visit_parent(node, state)?;
                self.convert_window(parent, order_by, partition_by, aggregations)
            }
            NodeKind::OrderByLimit { order_by, limit } => {
                let parent = self.visit_parent(node, state)?;
                self.convert_order_by(parent, order_by, *limit)
            }
            NodeKind::WriteToResult => {
                let parent = single_parent(node)?;
                self.visit(parent, state)
            }
        }
    }

    fn visit_parent(&self, node: &DataflowPlanNode, state: &mut ConversionState) -> Result<AliasedParent> {
        let parent = single_parent(node)?;
        self.visit_aliased(parent, state)
    }

    fn visit_aliased(&self, node: &DataflowPlanNode, state: &mut ConversionState) -> Result<AliasedParent> {
        let data_set = self.visit(node, state)?;
        let alias = self.next_subquery_alias(state);
        Ok(AliasedParent {
            alias,
            instance_set: data_set.instance_set,
            node: data_set.node,
        })
    }

    fn next_subquery_alias(&self, state: &mut ConversionState) -> String {
        let alias = format!("{}_{}", self.config.subquery_alias_prefix, state.next_subquery);
        state.next_subquery += 1;
        alias
    }

    fn column_name(&self, spec: &InstanceSpec) -> String {
        self.column_resolver.resolve_spec(spec).column_name
    }

    fn convert_read_source(
        &self,
        model_ref: &SemanticModelReference,
        state: &mut ConversionState,
    ) -> Result<SqlDataSet> {
        let model = self
            .lookup
            .get_semantic_model(model_ref)
            .ok_or_else(|| SemaqueryError::Internal(format!("unknown semantic model {model_ref}")))?;
        let alias = self.next_subquery_alias(state);
        let mut output = SelectBuilder::default();

        for measure in &model.measures {
            let spec = InstanceSpec::Measure(MeasureSpec::new(&measure.name));
            output.push(self.column_name(&spec), spec, SqlExpr::raw(measure.expr()));
        }
        for entity in &model.entities {
            let spec = InstanceSpec::Linkable(LinkableSpec::Entity(EntitySpec {
                element_name: entity.name.clone(),
                entity_links: Vec::new(),
            }));
            output.push(self.column_name(&spec), spec, SqlExpr::raw(entity.expr()));
        }

        let mut link_sets: Vec<Vec<EntityReference>> = vec![Vec::new()];
        link_sets.extend(model.identifying_entities().map(|e| vec![e.reference()]));
        for links in &link_sets {
            for dimension in &model.dimensions {
                if !dimension.is_time() {
                    let spec = InstanceSpec::Linkable(LinkableSpec::Dimension(DimensionSpec {
                        element_name: dimension.name.clone(),
                        entity_links: links.clone(),
                    }));
                    output.push(self.column_name(&spec), spec, SqlExpr::raw(dimension.expr()));
                    continue;
                }
                let defined = dimension.defined_granularity();
                let source = SqlExpr::raw(dimension.expr());
                for (spec, expr) in time_columns(&dimension.name, links, defined, &source) {
                    let spec = InstanceSpec::Linkable(LinkableSpec::TimeDimension(spec));
                    output.push(self.column_name(&spec), spec, expr);
                }
            }
        }

        Ok(output.finish(TableRef {
            source: SqlPlanNode::table(model.node_relation.clone()),
            alias: Some(alias),
        }))
    }

    fn convert_metric_time(
        &self,
        parent: AliasedParent,
        agg_time_dimension: &str,
        defined: TimeGranularity,
        offset_window: Option<OffsetWindow>,
    ) -> Result<SqlDataSet> {
        let mut output = SelectBuilder::passthrough(&parent);
        let source_spec = InstanceSpec::Linkable(LinkableSpec::TimeDimension(TimeDimensionSpec {
            element_name: agg_time_dimension.to_string(),
            entity_links: Vec::new(),
            time_granularity: defined,
            date_part: None,
        }));
        let source = parent.column_for(&source_spec)?;

        match offset_window {
            Some(window) => {
                let shifted = SqlExpr::AddInterval {
                    expr: Box::new(source),
                    window,
                };
                for (spec, expr) in time_columns(METRIC_TIME_ELEMENT_NAME, &[], defined, &shifted) {
                    let spec = InstanceSpec::Linkable(LinkableSpec::TimeDimension(spec));
                    output.push(self.column_name(&spec), spec, expr);
                }
            }
            None => {
                // Unshifted metric time reuses the agg time dimension's columns.
                for (spec, _) in time_columns(agg_time_dimension, &[], defined, &SqlExpr::raw("")) {
                    let dimension_spec = InstanceSpec::Linkable(LinkableSpec::TimeDimension(spec.clone()));
                    let metric_time = InstanceSpec::Linkable(LinkableSpec::TimeDimension(TimeDimensionSpec {
                        element_name: METRIC_TIME_ELEMENT_NAME.to_string(),
                        ..spec
                    }));
                    let expr = parent.column_for(&dimension_spec)?;
                    output.push(self.column_name(&metric_time), metric_time, expr);
                }
            }
        }
        Ok(output.finish(parent.table_ref()))
    }

    fn convert_join(
        &self,
        node: &DataflowPlanNode,
        join_entities: &[EntityReference],
        state: &mut ConversionState,
    ) -> Result<SqlDataSet> {
        let (left, rights) = node.parents().split_first().ok_or_else(|| {
            SemaqueryError::Internal("join node without parents".to_string())
        })?;
        if rights.len() != join_entities.len() {
            return Err(SemaqueryError::Internal(format!(
                "join node has {} right parents but {} join entities",
                rights.len(),
                join_entities.len()
            )));
        }
        let left = self.visit_aliased(left, state)?;
        let mut output = SelectBuilder::passthrough(&left);
        let mut statement_joins = Vec::new();

        for (right, entity) in rights.iter().zip(join_entities) {
            let right = self.visit_aliased(right, state)?;
            let entity_spec = InstanceSpec::Linkable(LinkableSpec::Entity(EntitySpec {
                element_name: entity.element_name.clone(),
                entity_links: Vec::new(),
            }));
            let on = SqlExpr::BinaryOp {
                op: SqlBinaryOperator::Eq,
                left: Box::new(left.column_for(&entity_spec)?),
                right: Box::new(right.column_for(&entity_spec)?),
            };

            for instance in right.instance_set.instances() {
                let Some(spec) = joined_spec(&instance.spec, entity) else {
                    continue;
                };
                let expr = SqlExpr::column(&right.alias, &instance.column_name);
                output.push(self.column_name(&spec), spec, expr);
            }
            statement_joins.push(Join {
                join_type: SqlJoinType::Left,
                table: right.table_ref(),
                on: vec![on],
            });
        }

        let mut data_set = output.finish(left.table_ref());
        if let SqlPlanNode::Select(select) = &mut data_set.node {
            select.joins = statement_joins;
        }
        Ok(data_set)
    }

    fn convert_compute_metric(
        &self,
        parent: AliasedParent,
        metric: &MetricSpec,
        expr: &MetricExpr,
    ) -> Result<SqlDataSet> {
        let mut output = SelectBuilder::default();
        for instance in parent.instance_set.instances() {
            if matches!(instance.spec, InstanceSpec::Linkable(_)) {
                output.push(
                    instance.column_name.clone(),
                    instance.spec.clone(),
                    SqlExpr::column(&parent.alias, &instance.column_name),
                );
            }
        }

        let metric_expr = match expr {
            MetricExpr::Measure(measure) => parent.column_for(&InstanceSpec::Measure(measure.clone()))?,
            MetricExpr::Ratio {
                numerator,
                denominator,
            } => {
                let numerator = parent.column_for(&InstanceSpec::Metric(numerator.clone()))?;
                let denominator = parent.column_for(&InstanceSpec::Metric(denominator.clone()))?;
                SqlExpr::BinaryOp {
                    op: SqlBinaryOperator::Divide,
                    left: Box::new(cast_double(numerator)),
                    right: Box::new(cast_double(SqlExpr::Function {
                        func: SqlFunction::NullIf,
                        args: vec![denominator, SqlExpr::Literal(json!(0))],
                    })),
                }
            }
            MetricExpr::Derived { expr } => SqlExpr::raw(expr.clone()),
        };
        let spec = InstanceSpec::Metric(metric.clone());
        output.push(self.column_name(&spec), spec, metric_expr);
        Ok(output.finish(parent.table_ref()))
    }

    fn convert_combine(&self, node: &DataflowPlanNode, state: &mut ConversionState) -> Result<SqlDataSet> {
        let mut parents = Vec::with_capacity(node.parents().len());
        for parent in node.parents() {
            parents.push(self.visit_aliased(parent, state)?);
        }
        let (first, rest) = parents
            .split_first()
            .ok_or_else(|| SemaqueryError::Internal("combine node without parents".to_string()))?;

        let linkable: Vec<Instance> = first
            .instance_set
            .instances()
            .iter()
            .filter(|i| matches!(i.spec, InstanceSpec::Linkable(_)))
            .cloned()
            .collect();

        let mut joins = Vec::with_capacity(rest.len());
        for (index, parent) in rest.iter().enumerate() {
            let previous = &parents[..=index];
            if linkable.is_empty() {
                joins.push(Join {
                    join_type: SqlJoinType::Cross,
                    table: parent.table_ref(),
                    on: Vec::new(),
                });
                continue;
            }
            let mut on = Vec::with_capacity(linkable.len());
            for instance in &linkable {
                on.push(SqlExpr::BinaryOp {
                    op: SqlBinaryOperator::Eq,
                    left: Box::new(coalesce(previous, &instance.spec)?),
                    right: Box::new(parent.column_for(&instance.spec)?),
                });
            }
            joins.push(Join {
                join_type: SqlJoinType::FullOuter,
                table: parent.table_ref(),
                on,
            });
        }

        let mut output = SelectBuilder::default();
        for instance in &linkable {
            output.push(
                instance.column_name.clone(),
                instance.spec.clone(),
                coalesce(&parents, &instance.spec)?,
            );
        }
        for parent in &parents {
            for instance in parent.instance_set.instances() {
                if matches!(instance.spec, InstanceSpec::Metric(_)) {
                    output.push(
                        instance.column_name.clone(),
                        instance.spec.clone(),
                        SqlExpr::column(&parent.alias, &instance.column_name),
                    );
                }
            }
        }

        let mut data_set = output.finish(first.table_ref());
        if let SqlPlanNode::Select(select) = &mut data_set.node {
            select.joins = joins;
        }
        Ok(data_set)
    }

    fn convert_window(
        &self,
        parent: AliasedParent,
        order_by: &LinkableSpec,
        partition_by: &[LinkableSpec],
        aggregations: &[MeasureAggregation],
    ) -> Result<SqlDataSet> {
        let order_expr = parent.column_for(&InstanceSpec::Linkable(order_by.clone()))?;
        let mut partition_exprs = Vec::with_capacity(partition_by.len());
        for spec in partition_by {
            partition_exprs.push(parent.column_for(&InstanceSpec::Linkable(spec.clone()))?);
        }

        let mut output = SelectBuilder::default();
        for instance in parent.instance_set.instances() {
            let expr = match &instance.spec {
                InstanceSpec::Measure(measure) => {
                    match aggregations.iter().find(|a| &a.measure == measure) {
                        Some(aggregation) => SqlExpr::Window {
                            func: WindowFunction::for_aggregation(aggregation.agg),
                            expr: Box::new(SqlExpr::column(&parent.alias, &instance.column_name)),
                            partition_by: partition_exprs.clone(),
                            order_by: vec![order_expr.clone()],
                        },
                        None => SqlExpr::column(&parent.alias, &instance.column_name),
                    }
                }
                _ => SqlExpr::column(&parent.alias, &instance.column_name),
            };
            output.push(instance.column_name.clone(), instance.spec.clone(), expr);
        }
        Ok(output.finish(parent.table_ref()))
    }

    fn convert_order_by(
        &self,
        parent: AliasedParent,
        order_by: &[OrderBySpec],
        limit: Option<u64>,
    ) -> Result<SqlDataSet> {
        let mut items = Vec::with_capacity(order_by.len());
        for spec in order_by {
            let column_name = self.column_name(&spec.instance);
            if !parent
                .instance_set
                .instances()
                .iter()
                .any(|i| i.column_name == column_name)
            {
                return Err(SemaqueryError::Internal(format!(
                    "order by column {column_name} is not in the output"
                )));
            }
            items.push(OrderItem {
                expr: SqlExpr::column(&parent.alias, &column_name),
                descending: spec.descending,
            });
        }
        let mut data_set = SelectBuilder::passthrough(&parent).finish(parent.table_ref());
        if let SqlPlanNode::Select(select) = &mut data_set.node {
            select.order_by = items;
            select.limit = limit;
        }
        Ok(data_set)
    }
}

/// A converted parent together with the subquery alias it is read under.
struct AliasedParent {
    alias: String,
    instance_set: InstanceSet,
    node: SqlPlanNode,
}

impl AliasedParent {
    fn column_for(&self, spec: &InstanceSpec) -> Result<SqlExpr> {
        let instance = self.instance_set.get(spec).ok_or_else(|| {
            SemaqueryError::Internal(format!("{spec:?} is not available from {}", self.alias))
        })?;
        Ok(SqlExpr::column(&self.alias, &instance.column_name))
    }

    fn table_ref(&self) -> TableRef {
        TableRef {
            source: self.node.clone(),
            alias: Some(self.alias.clone()),
        }
    }
}

/// Accumulates select items and the instance set they produce.
#[derive(Default)]
struct SelectBuilder {
    select: Vec<SelectItem>,
    instance_set: InstanceSet,
}

impl SelectBuilder {
    fn passthrough(parent: &AliasedParent) -> Self {
        let mut builder = Self::default();
        for instance in parent.instance_set.instances() {
            builder.push(
                instance.column_name.clone(),
                instance.spec.clone(),
                SqlExpr::column(&parent.alias, &instance.column_name),
            );
        }
        builder
    }

    fn push(&mut self, column_name: String, spec: InstanceSpec, expr: SqlExpr) {
        let added = self.instance_set.push(Instance {
            spec,
            column_name: column_name.clone(),
        });
        if added {
            self.select.push(SelectItem {
                expr,
                alias: Some(column_name),
            });
        }
    }

    fn finish(self, from: TableRef) -> SqlDataSet {
        let mut statement = SqlSelectStatement::new(from);
        statement.select = self.select;
        SqlDataSet {
            instance_set: self.instance_set,
            node: SqlPlanNode::Select(Box::new(statement)),
        }
    }
}

fn single_parent(node: &DataflowPlanNode) -> Result<&DataflowPlanNode> {
    match node.parents() {
        [parent] => Ok(parent),
        parents => Err(SemaqueryError::Internal(format!(
            "{} expects one parent, found {}",
            node.kind().description(),
            parents.len()
        ))),
    }
}

fn convert_where(parent: AliasedParent, filter: &WhereFilterSpec) -> SqlDataSet {
    let mut data_set = SelectBuilder::passthrough(&parent).finish(parent.table_ref());
    if let SqlPlanNode::Select(select) = &mut data_set.node {
        select.filters.push(SqlExpr::raw(filter.where_sql.clone()));
    }
    data_set
}

fn convert_filter_elements(parent: AliasedParent, include: &[InstanceSpec]) -> Result<SqlDataSet> {
    let mut output = SelectBuilder::default();
    for spec in include {
        let instance = parent.instance_set.get(spec).ok_or_else(|| {
            SemaqueryError::Internal(format!("{spec:?} is not available to pass through"))
        })?;
        output.push(
            instance.column_name.clone(),
            spec.clone(),
            SqlExpr::column(&parent.alias, &instance.column_name),
        );
    }
    Ok(output.finish(parent.table_ref()))
}

fn convert_aggregate(parent: AliasedParent, aggregations: &[MeasureAggregation]) -> Result<SqlDataSet> {
    let mut output = SelectBuilder::default();
    let mut group_by = Vec::new();
    for (_, instance) in parent.instance_set.linkable() {
        let expr = SqlExpr::column(&parent.alias, &instance.column_name);
        group_by.push(expr.clone());
        output.push(instance.column_name.clone(), instance.spec.clone(), expr);
    }
    for aggregation in aggregations {
        let spec = InstanceSpec::Measure(aggregation.measure.clone());
        let instance = parent.instance_set.get(&spec).ok_or_else(|| {
            SemaqueryError::Internal(format!(
                "measure {} is not available to aggregate",
                aggregation.measure.element_name
            ))
        })?;
        output.push(
            instance.column_name.clone(),
            spec,
            SqlExpr::Aggregate {
                agg: aggregation.agg,
                expr: Box::new(SqlExpr::column(&parent.alias, &instance.column_name)),
            },
        );
    }
    let mut data_set = output.finish(parent.table_ref());
    if let SqlPlanNode::Select(select) = &mut data_set.node {
        select.group_by = group_by;
    }
    Ok(data_set)
}

/// How a right-side instance appears after joining through `entity`, if it does.
fn joined_spec(spec: &InstanceSpec, entity: &EntityReference) -> Option<InstanceSpec> {
    match spec {
        InstanceSpec::Measure(_) => None,
        InstanceSpec::Metric(metric) => Some(InstanceSpec::Linkable(LinkableSpec::GroupByMetric(
            GroupByMetricSpec {
                element_name: metric.element_name.clone(),
                entity_links: vec![entity.clone()],
                metric_subquery_entity_links: vec![entity.clone()],
            },
        ))),
        InstanceSpec::Linkable(linkable) => {
            if linkable.is_metric_time() || linkable.entity_links().first() == Some(entity) {
                return None;
            }
            if let LinkableSpec::Entity(e) = linkable {
                if e.entity_links.is_empty() && e.element_name == entity.element_name {
                    return None;
                }
            }
            Some(InstanceSpec::Linkable(linkable.with_entity_prefix(entity)))
        }
    }
}

/// Truncations at every grain at or above `defined`, then extractable date parts.
fn time_columns(
    element_name: &str,
    links: &[EntityReference],
    defined: TimeGranularity,
    source: &SqlExpr,
) -> Vec<(TimeDimensionSpec, SqlExpr)> {
    let mut columns = Vec::new();
    for granularity in defined.coarser_or_equal() {
        columns.push((
            TimeDimensionSpec {
                element_name: element_name.to_string(),
                entity_links: links.to_vec(),
                time_granularity: granularity,
                date_part: None,
            },
            SqlExpr::DateTrunc {
                granularity,
                expr: Box::new(source.clone()),
            },
        ));
    }
    for date_part in DatePart::ALL {
        if !date_part.is_compatible_with(defined) {
            continue;
        }
        columns.push((
            TimeDimensionSpec {
                element_name: element_name.to_string(),
                entity_links: links.to_vec(),
                time_granularity: defined,
                date_part: Some(date_part),
            },
            SqlExpr::Extract {
                date_part,
                expr: Box::new(source.clone()),
            },
        ));
    }
    columns
}

fn coalesce(parents: &[AliasedParent], spec: &InstanceSpec) -> Result<SqlExpr> {
    let mut args = Vec::with_capacity(parents.len());
    for parent in parents {
        args.push(parent.column_for(spec)?);
    }
    if args.len() == 1 {
        if let Some(single) = args.pop() {
            return Ok(single);
        }
    }
    Ok(SqlExpr::Function {
        func: SqlFunction::Coalesce,
        args,
    })
}

fn cast_double(expr: SqlExpr) -> SqlExpr {
    SqlExpr::Cast {
        expr: Box::new(expr),
        data_type: "DOUBLE".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SemaqueryConfig;
    use crate::dataflow::builder::DataflowPlanBuilder;
    use crate::model::lookup::ManifestLookup;
    use crate::model::manifest::SemanticManifest;
    use crate::naming::cache::DescriptorCache;
    use crate::resolution::parser::{QueryParser, QueryRequest};
    use crate::specs::column_assoc::DunderColumnAssociationResolver;
    use crate::sql::dialect::DuckDbDialect;
    use crate::sql::render::SqlRenderer;

    const MANIFEST: &str = r#"
semantic_models:
  - name: bookings_source
    node_relation: main.fct_bookings
    defaults: {agg_time_dimension: ds}
    entities:
      - {name: booking, type: primary}
      - {name: listing, type: foreign}
    dimensions:
      - {name: ds, type: time, time_granularity: day}
    measures:
      - {name: bookings, agg: sum, expr: "1"}
  - name: listings_source
    node_relation: main.dim_listings
    entities:
      - {name: listing, type: primary}
    dimensions:
      - {name: country, type: categorical}
metrics:
  - name: bookings
    type: simple
    type_params: {measure: bookings}
  - name: bookings_growth_2_weeks
    type: derived
    type_params:
      expr: bookings - bookings_2_weeks_ago
      metrics:
        - bookings
        - {name: bookings, alias: bookings_2_weeks_ago, offset_window: 2 weeks}
"#;

    struct Fixture {
        lookup: ManifestLookup,
        config: SemaqueryConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                lookup: ManifestLookup::new(SemanticManifest::from_yaml(MANIFEST).unwrap(), 2),
                config: SemaqueryConfig::default(),
            }
        }

        fn plan(&self, request: QueryRequest) -> DataflowPlan {
            let mut cache = DescriptorCache::new();
            let query = QueryParser::new(&self.lookup, &DunderColumnAssociationResolver, &self.config)
                .parse(&request, &mut cache)
                .unwrap();
            DataflowPlanBuilder::new(&self.lookup, &DunderColumnAssociationResolver)
                .build_plan(&query, &mut cache)
                .unwrap()
        }

        fn sql(&self, plan: &DataflowPlan, selection: CteSelection) -> String {
            let converter =
                DataflowToSqlConverter::new(&self.lookup, &DunderColumnAssociationResolver, &self.config.sql);
            let sql_plan = converter
                .convert(
                    plan,
                    &SqlGenerationOptions {
                        cte_selection: selection,
                    },
                )
                .unwrap();
            SqlRenderer::new(&DuckDbDialect).render_plan(&sql_plan)
        }
    }

    #[test]
    fn read_source_selects_measures_entities_and_truncated_time() {
        let fixture = Fixture::new();
        let plan = fixture.plan(QueryRequest::new(["bookings"]).group_by(["metric_time__month"]));
        let sql = fixture.sql(&plan, CteSelection::None);
        assert!(sql.contains("1 AS \"bookings\""));
        assert!(sql.contains("DATE_TRUNC('month', ds) AS \"booking__ds__month\""));
        assert!(sql.contains("EXTRACT(isodow FROM ds) AS \"ds__extract_dow\""));
        assert!(sql.contains("FROM \"main\".\"fct_bookings\" \"subq_0\""));
        assert!(sql.contains("SUM(\"subq_3\".\"bookings\") AS \"bookings\""));
        assert!(sql.contains("GROUP BY \"subq_3\".\"metric_time__month\""));
    }

    #[test]
    fn joins_prefix_right_side_columns() {
        let fixture = Fixture::new();
        let plan = fixture.plan(QueryRequest::new(["bookings"]).group_by(["listing__country"]));
        let sql = fixture.sql(&plan, CteSelection::None);
        assert!(sql.contains("LEFT OUTER JOIN"));
        assert!(sql.contains("AS \"listing__country\""));
        assert!(sql.contains("ON (\"subq_2\".\"listing\" = \"subq_5\".\"listing\")"));
    }

    #[test]
    fn offset_window_shifts_metric_time() {
        let fixture = Fixture::new();
        let plan = fixture.plan(
            QueryRequest::new(["bookings_growth_2_weeks"]).group_by(["metric_time__day"]),
        );
        let sql = fixture.sql(&plan, CteSelection::None);
        assert!(sql.contains("DATE_TRUNC('day', (\"subq_"));
        assert!(sql.contains("+ INTERVAL 2 week)) AS \"metric_time__day\""));
        assert!(sql.contains("FULL OUTER JOIN"));
        assert!(sql.contains("bookings - bookings_2_weeks_ago AS \"bookings_growth_2_weeks\""));
    }

    #[test]
    fn common_branches_become_ctes() {
        let fixture = Fixture::new();
        let plan = fixture.plan(
            QueryRequest::new(["bookings_growth_2_weeks"]).group_by(["metric_time__day"]),
        );
        let sql = fixture.sql(&plan, CteSelection::CommonBranches);
        assert!(sql.starts_with("WITH \"cte_0\" AS (SELECT "));
        assert_eq!(sql.matches("\"main\".\"fct_bookings\"").count(), 1);
        assert_eq!(sql.matches("FROM \"cte_0\"").count(), 2);
    }

    #[test]
    fn without_repeats_cte_mode_is_identical() {
        let fixture = Fixture::new();
        let plan = fixture.plan(QueryRequest::new(["bookings"]).group_by(["listing__country"]));
        assert_eq!(
            fixture.sql(&plan, CteSelection::None),
            fixture.sql(&plan, CteSelection::CommonBranches)
        );
    }

    #[test]
    fn start_node_is_never_extracted() {
        let fixture = Fixture::new();
        let plan = fixture.plan(QueryRequest::new(["bookings"]));
        let sql = fixture.sql(&plan, CteSelection::Explicit(vec![plan.sink.clone()]));
        assert!(!sql.starts_with("WITH"));
    }

    #[test]
    fn explicit_selection_extracts_named_nodes() {
        let fixture = Fixture::new();
        let plan = fixture.plan(QueryRequest::new(["bookings"]));
        let mut read = plan.sink.clone();
        while let Some(parent) = read.parents().first().cloned() {
            read = parent;
        }
        let sql = fixture.sql(&plan, CteSelection::Explicit(vec![read]));
        assert!(sql.starts_with("WITH \"cte_0\" AS (SELECT 1 AS \"bookings\""));
        assert!(sql.contains("FROM \"cte_0\" \"subq_1\""));
    }

    #[test]
    fn no_metric_query_groups_without_aggregates() {
        let fixture = Fixture::new();
        let plan = fixture.plan(QueryRequest::default().group_by(["listing__country"]));
        let sql = fixture.sql(&plan, CteSelection::None);
        assert!(sql.ends_with("GROUP BY \"subq_2\".\"listing__country\""));
        assert!(!sql.contains("SUM("));
    }
}
