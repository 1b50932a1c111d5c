//! Builds a dataflow plan from a resolved query.
//!
//! Each base measure becomes a read → metric-time → joins → where → filter →
//! aggregate chain. Metrics are computed on top of their aggregated inputs,
//! derived and ratio metrics combine their inputs first, and the query's
//! metrics are combined into one output.

use crate::dataflow::node::{DataflowPlan, DataflowPlanNode, MeasureAggregation, MetricExpr, NodeKind};
use crate::error::{Result, SemaqueryError};
use crate::model::elements::{EntityReference, MeasureReference, MetricReference};
use crate::model::lookup::SemanticModelLookup;
use crate::model::manifest::{MetricType, OffsetWindow, SemanticModel};
use crate::naming::cache::DescriptorCache;
use crate::resolution::filter_render::{WhereFilterSpec, WhereSpecFactory};
use crate::resolution::filter_spec::FilterLocation;
use crate::resolution::parser::QuerySpec;
use crate::specs::column_assoc::ColumnAssociationResolver;
use crate::specs::spec::{EntitySpec, InstanceSpec, LinkableSpec, MeasureSpec, MetricSpec};

/// What to compute for one metric occurrence in the plan.
#[derive(Debug, Clone)]
struct MetricRequest {
    metric: MetricReference,
    alias: Option<String>,
    group_by: Vec<LinkableSpec>,
    /// Filters inherited from the query and the consuming metrics.
    filters: Vec<WhereFilterSpec>,
    offset_window: Option<OffsetWindow>,
}

pub struct DataflowPlanBuilder<'a> {
    lookup: &'a dyn SemanticModelLookup,
    column_resolver: &'a dyn ColumnAssociationResolver,
}

impl<'a> DataflowPlanBuilder<'a> {
    pub fn new(
        lookup: &'a dyn SemanticModelLookup,
        column_resolver: &'a dyn ColumnAssociationResolver,
    ) -> Self {
        Self {
            lookup,
            column_resolver,
        }
    }

    pub fn build_plan(&self, query: &QuerySpec, cache: &mut DescriptorCache) -> Result<DataflowPlan> {
        let factory = WhereSpecFactory::new(self.column_resolver, &query.filter_resolution_lookup);
        let query_filters: Vec<WhereFilterSpec> = query.query_filter_spec.iter().cloned().collect();

        let output = if query.metric_specs.is_empty() {
            self.build_distinct_values(query, &query_filters)?
        } else {
            let mut outputs = Vec::with_capacity(query.metric_specs.len());
            for metric_spec in &query.metric_specs {
                let request = MetricRequest {
                    metric: MetricReference::new(&metric_spec.element_name),
                    alias: metric_spec.alias.clone(),
                    group_by: query.group_by_specs.clone(),
                    filters: query_filters.clone(),
                    offset_window: None,
                };
                outputs.push(self.build_metric(&request, &factory, cache)?);
            }
            combine(outputs)
        };

        let mut sink = output;
        if !query.order_by_specs.is_empty() || query.limit.is_some() {
            sink = DataflowPlanNode::with_parent(
                NodeKind::OrderByLimit {
                    order_by: query.order_by_specs.clone(),
                    limit: query.limit,
                },
                sink,
            );
        }
        let sink = DataflowPlanNode::with_parent(NodeKind::WriteToResult, sink);
        tracing::debug!(nodes = sink.tree_size(), "built dataflow plan");
        Ok(DataflowPlan::new(sink))
    }

    fn build_metric(
        &self,
        request: &MetricRequest,
        factory: &WhereSpecFactory<'_>,
        cache: &mut DescriptorCache,
    ) -> Result<DataflowPlanNode> {
        let metric = self
            .lookup
            .get_metric(&request.metric)
            .ok_or_else(|| SemaqueryError::Internal(format!("unknown metric {}", request.metric)))?;
        let location = FilterLocation::Metric(metric.reference());

        let mut filters = request.filters.clone();
        if let Some(filter) = &metric.filter {
            filters.extend(factory.create_from_where_filter_intersection(&location, filter, cache)?);
        }
        let metric_spec = MetricSpec {
            element_name: metric.name.clone(),
            alias: request.alias.clone(),
        };

        let (parent, expr) = match metric.metric_type {
            MetricType::Simple | MetricType::Cumulative => {
                let input = metric.input_measures().first().copied().ok_or_else(|| {
                    SemaqueryError::Internal(format!("metric {} has no input measure", metric.name))
                })?;
                if let Some(filter) = &input.filter {
                    filters.extend(factory.create_from_where_filter_intersection(&location, filter, cache)?);
                }
                let mut node = self.build_aggregated_measure(
                    &input.reference(),
                    &request.group_by,
                    &filters,
                    request.offset_window,
                    factory,
                    cache,
                )?;
                if metric.metric_type == MetricType::Cumulative {
                    node = self.reaggregate_over_metric_time(node, &input.reference(), &request.group_by)?;
                }
                (node, MetricExpr::Measure(MeasureSpec::new(&input.name)))
            }
            MetricType::Ratio | MetricType::Derived => {
                let mut children = Vec::new();
                let mut input_specs: Vec<MetricSpec> = Vec::new();
                for input in metric.input_metrics() {
                    let mut alias = input.alias.clone();
                    if metric.metric_type == MetricType::Ratio
                        && alias.is_none()
                        && input_specs.iter().any(|s| s.output_name() == input.name)
                    {
                        alias = Some(format!("{}_denominator", input.name));
                    }
                    let mut child_filters = filters.clone();
                    if let Some(filter) = &input.filter {
                        child_filters.extend(factory.create_from_where_filter_intersection(
                            &FilterLocation::InputMetric(input.reference()),
                            filter,
                            cache,
                        )?);
                    }
                    let child = MetricRequest {
                        metric: input.reference(),
                        alias: alias.clone(),
                        group_by: request.group_by.clone(),
                        filters: child_filters,
                        offset_window: input.offset_window.or(request.offset_window),
                    };
                    children.push(self.build_metric(&child, factory, cache)?);
                    input_specs.push(MetricSpec {
                        element_name: input.name.clone(),
                        alias,
                    });
                }
                let expr = match (metric.metric_type, input_specs.as_slice()) {
                    (MetricType::Ratio, [numerator, denominator]) => MetricExpr::Ratio {
                        numerator: numerator.clone(),
                        denominator: denominator.clone(),
                    },
                    (MetricType::Ratio, _) => {
                        return Err(SemaqueryError::Internal(format!(
                            "ratio metric {} needs a numerator and a denominator",
                            metric.name
                        )))
                    }
                    _ => MetricExpr::Derived {
                        expr: metric.type_params.expr.clone().ok_or_else(|| {
                            SemaqueryError::Internal(format!("derived metric {} has no expr", metric.name))
                        })?,
                    },
                };
                if children.is_empty() {
                    return Err(SemaqueryError::Internal(format!(
                        "metric {} has no input metrics",
                        metric.name
                    )));
                }
                (combine(children), expr)
            }
        };

        tracing::trace!(metric = %metric.name, "planned metric");
        Ok(DataflowPlanNode::with_parent(
            NodeKind::ComputeMetrics {
                metric: metric_spec,
                expr,
            },
            parent,
        ))
    }

    fn build_aggregated_measure(
        &self,
        measure_ref: &MeasureReference,
        group_by: &[LinkableSpec],
        filters: &[WhereFilterSpec],
        offset_window: Option<OffsetWindow>,
        factory: &WhereSpecFactory<'_>,
        cache: &mut DescriptorCache,
    ) -> Result<DataflowPlanNode> {
        let (model, measure) = self
            .lookup
            .get_measure(measure_ref)
            .ok_or_else(|| SemaqueryError::Internal(format!("unknown measure {measure_ref}")))?;

        let mut node = read_source(model);
        if let Some(agg_time) = model.agg_time_dimension_for(measure) {
            node = DataflowPlanNode::with_parent(
                NodeKind::MetricTimeTransform {
                    agg_time_dimension: agg_time.name.clone(),
                    defined_granularity: agg_time.defined_granularity(),
                    offset_window,
                },
                node,
            );
        }

        let mut needed: Vec<LinkableSpec> = group_by.to_vec();
        for filter in filters {
            push_unique(&mut needed, filter.linkable_specs.iter().cloned());
        }
        node = self.join_linked_specs(node, model, &needed, &[model.name.as_str()], factory, cache)?;

        if let Some(filter) = WhereFilterSpec::merge_iterable(filters) {
            node = DataflowPlanNode::with_parent(NodeKind::WhereConstraint { filter }, node);
        }

        let measure_spec = MeasureSpec::new(&measure.name);
        let mut include = vec![InstanceSpec::Measure(measure_spec.clone())];
        include.extend(group_by.iter().cloned().map(InstanceSpec::Linkable));
        node = DataflowPlanNode::with_parent(NodeKind::FilterElements { include }, node);

        Ok(DataflowPlanNode::with_parent(
            NodeKind::AggregateMeasures {
                aggregations: vec![MeasureAggregation {
                    measure: measure_spec,
                    agg: measure.agg,
                }],
            },
            node,
        ))
    }

    fn reaggregate_over_metric_time(
        &self,
        node: DataflowPlanNode,
        measure_ref: &MeasureReference,
        group_by: &[LinkableSpec],
    ) -> Result<DataflowPlanNode> {
        let Some(metric_time) = group_by.iter().find(|s| s.is_metric_time()) else {
            return Ok(node);
        };
        let (_, measure) = self
            .lookup
            .get_measure(measure_ref)
            .ok_or_else(|| SemaqueryError::Internal(format!("unknown measure {measure_ref}")))?;
        Ok(DataflowPlanNode::with_parent(
            NodeKind::WindowReaggregation {
                order_by: metric_time.clone(),
                partition_by: group_by
                    .iter()
                    .filter(|s| !s.is_metric_time())
                    .cloned()
                    .collect(),
                aggregations: vec![MeasureAggregation {
                    measure: MeasureSpec::new(&measure.name),
                    agg: measure.agg,
                }],
            },
            node,
        ))
    }

    /// Join in every semantic model needed to provide the non-local specs.
    fn join_linked_specs(
        &self,
        node: DataflowPlanNode,
        model: &SemanticModel,
        needed: &[LinkableSpec],
        visited: &[&str],
        factory: &WhereSpecFactory<'_>,
        cache: &mut DescriptorCache,
    ) -> Result<DataflowPlanNode> {
        let mut groups: Vec<(EntityReference, Vec<LinkableSpec>)> = Vec::new();
        let mut rights = Vec::new();
        let mut join_entities = Vec::new();

        for spec in needed {
            if is_local(model, spec) {
                continue;
            }
            if let LinkableSpec::GroupByMetric(metric_spec) = spec {
                let entity = metric_spec.metric_subquery_entity_links.first().ok_or_else(|| {
                    SemaqueryError::Internal(format!("group-by metric {spec} has no entity link"))
                })?;
                let subquery = MetricRequest {
                    metric: MetricReference::new(&metric_spec.element_name),
                    alias: None,
                    group_by: vec![LinkableSpec::Entity(EntitySpec {
                        element_name: entity.element_name.clone(),
                        entity_links: Vec::new(),
                    })],
                    filters: Vec::new(),
                    offset_window: None,
                };
                rights.push(self.build_metric(&subquery, factory, cache)?);
                join_entities.push(entity.clone());
                continue;
            }
            let Some(first) = spec.entity_links().first() else {
                continue;
            };
            match groups.iter_mut().find(|(entity, _)| entity == first) {
                Some((_, specs)) => specs.push(spec.without_first_entity_link()),
                None => groups.push((first.clone(), vec![spec.without_first_entity_link()])),
            }
        }

        for (entity, specs) in groups {
            let target = self.find_join_target(model, &entity, &specs, visited).ok_or_else(|| {
                SemaqueryError::Structural(format!(
                    "no semantic model reachable through '{entity}' from '{}' provides {}",
                    model.name,
                    specs.iter().map(LinkableSpec::qualified_name).collect::<Vec<_>>().join(", ")
                ))
            })?;
            let mut path = visited.to_vec();
            path.push(target.name.as_str());
            let right = self.join_linked_specs(read_source(target), target, &specs, &path, factory, cache)?;

            let mut include: Vec<InstanceSpec> = vec![InstanceSpec::Linkable(LinkableSpec::Entity(EntitySpec {
                element_name: entity.element_name.clone(),
                entity_links: Vec::new(),
            }))];
            for spec in specs {
                let spec = InstanceSpec::Linkable(spec);
                if !include.contains(&spec) {
                    include.push(spec);
                }
            }
            rights.push(DataflowPlanNode::with_parent(NodeKind::FilterElements { include }, right));
            join_entities.push(entity);
        }

        if rights.is_empty() {
            return Ok(node);
        }
        let mut parents = vec![node];
        parents.extend(rights);
        Ok(DataflowPlanNode::new(NodeKind::JoinOnEntities { join_entities }, parents))
    }

    /// The first model identified by `entity` that can provide every one of `specs`.
    fn find_join_target(
        &self,
        from: &SemanticModel,
        entity: &EntityReference,
        specs: &[LinkableSpec],
        visited: &[&str],
    ) -> Option<&'a SemanticModel> {
        if from.get_entity(entity.as_str()).is_none() {
            return None;
        }
        self.lookup.semantic_models().iter().find(|candidate| {
            !visited.contains(&candidate.name.as_str())
                && candidate.has_identifying_entity(entity)
                && specs.iter().all(|spec| {
                    is_local(candidate, spec)
                        || spec
                            .entity_links()
                            .first()
                            .is_some_and(|link| candidate.get_entity(link.as_str()).is_some())
                })
        })
    }

    /// A query without metrics lists distinct values from a single semantic model.
    fn build_distinct_values(
        &self,
        query: &QuerySpec,
        filters: &[WhereFilterSpec],
    ) -> Result<DataflowPlanNode> {
        let elements = self.lookup.linkable_elements_for_no_metrics_query();
        let mut needed: Vec<LinkableSpec> = query.group_by_specs.clone();
        for filter in filters {
            push_unique(&mut needed, filter.linkable_specs.iter().cloned());
        }

        let mut owner = None;
        for spec in &needed {
            let defined_in = elements
                .iter()
                .find(|e| &e.spec == spec)
                .and_then(|e| e.defined_in.clone());
            match (&owner, defined_in) {
                (None, Some(model)) => owner = Some(model),
                (Some(current), Some(model)) if *current == model => {}
                _ => {
                    return Err(SemaqueryError::InvalidQuery(format!(
                        "group-by items of a query without metrics must come from one semantic model; '{}' does not",
                        spec.qualified_name()
                    )))
                }
            }
        }
        let owner = owner.ok_or_else(|| {
            SemaqueryError::InvalidQuery("a query without metrics needs group-by items".to_string())
        })?;
        let model = self
            .lookup
            .get_semantic_model(&owner)
            .ok_or_else(|| SemaqueryError::Internal(format!("unknown semantic model {owner}")))?;

        let mut node = read_source(model);
        if let Some(filter) = WhereFilterSpec::merge_iterable(filters) {
            node = DataflowPlanNode::with_parent(NodeKind::WhereConstraint { filter }, node);
        }
        node = DataflowPlanNode::with_parent(
            NodeKind::FilterElements {
                include: query
                    .group_by_specs
                    .iter()
                    .cloned()
                    .map(InstanceSpec::Linkable)
                    .collect(),
            },
            node,
        );
        Ok(DataflowPlanNode::with_parent(
            NodeKind::AggregateMeasures {
                aggregations: Vec::new(),
            },
            node,
        ))
    }
}

fn read_source(model: &SemanticModel) -> DataflowPlanNode {
    DataflowPlanNode::leaf(NodeKind::ReadSource {
        semantic_model: model.reference(),
    })
}

fn combine(mut outputs: Vec<DataflowPlanNode>) -> DataflowPlanNode {
    if outputs.len() == 1 {
        if let Some(single) = outputs.pop() {
            return single;
        }
    }
    DataflowPlanNode::new(NodeKind::CombineAggregatedOutputs, outputs)
}

/// Whether reading `model` alone provides `spec`.
fn is_local(model: &SemanticModel, spec: &LinkableSpec) -> bool {
    if spec.is_metric_time() {
        return true;
    }
    let defines_element = match spec {
        LinkableSpec::Dimension(_) | LinkableSpec::TimeDimension(_) => {
            model.get_dimension(spec.element_name()).is_some()
        }
        LinkableSpec::Entity(_) => model.get_entity(spec.element_name()).is_some(),
        LinkableSpec::GroupByMetric(_) => return false,
    };
    match spec.entity_links() {
        [] => defines_element,
        [link] => defines_element && model.has_identifying_entity(link),
        _ => false,
    }
}

fn push_unique<T: PartialEq>(into: &mut Vec<T>, items: impl IntoIterator<Item = T>) {
    for item in items {
        if !into.contains(&item) {
            into.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SemaqueryConfig;
    use crate::model::lookup::ManifestLookup;
    use crate::model::manifest::SemanticManifest;
    use crate::resolution::parser::{QueryParser, QueryRequest};
    use crate::specs::column_assoc::DunderColumnAssociationResolver;

    const MANIFEST: &str = r#"
semantic_models:
  - name: bookings_source
    node_relation: fct_bookings
    defaults: {agg_time_dimension: ds}
    entities:
      - {name: booking, type: primary}
      - {name: listing, type: foreign}
    dimensions:
      - {name: ds, type: time}
      - {name: is_instant, type: categorical}
    measures:
      - {name: bookings, agg: sum, expr: "1"}
  - name: listings_source
    node_relation: dim_listings
    entities:
      - {name: listing, type: primary}
      - {name: user, type: foreign}
    dimensions:
      - {name: country, type: categorical}
  - name: users_source
    node_relation: dim_users
    entities:
      - {name: user, type: primary}
    dimensions:
      - {name: home_country, type: categorical}
metrics:
  - name: bookings
    type: simple
    type_params: {measure: bookings}
  - name: instant_bookings
    type: simple
    filter: "{{ Dimension('booking__is_instant') }}"
    type_params: {measure: bookings}
  - name: cumulative_bookings
    type: cumulative
    type_params: {measure: bookings}
  - name: bookings_growth_2_weeks
    type: derived
    type_params:
      expr: bookings - bookings_2_weeks_ago
      metrics:
        - bookings
        - {name: bookings, alias: bookings_2_weeks_ago, offset_window: 2 weeks}
  - name: instant_share
    type: ratio
    type_params:
      numerator: {name: bookings, filter: "{{ Dimension('booking__is_instant') }}"}
      denominator: bookings
"#;

    fn build(request: QueryRequest) -> DataflowPlan {
        let lookup = ManifestLookup::new(SemanticManifest::from_yaml(MANIFEST).unwrap(), 2);
        let config = SemaqueryConfig::default();
        let mut cache = DescriptorCache::new();
        let query = QueryParser::new(&lookup, &DunderColumnAssociationResolver, &config)
            .parse(&request, &mut cache)
            .unwrap();
        DataflowPlanBuilder::new(&lookup, &DunderColumnAssociationResolver)
            .build_plan(&query, &mut cache)
            .unwrap()
    }

    #[test]
    fn simple_metric_chain() {
        let plan = build(QueryRequest::new(["bookings"]).group_by(["metric_time__day"]));
        assert_eq!(
            plan.structure_text(),
            "Write to Result\n\
             \x20 Compute Metrics via Expressions [bookings]\n\
             \x20   Aggregate Measures\n\
             \x20     Pass Only Elements\n\
             \x20       Metric Time Dimension Transform\n\
             \x20         Read From Semantic Model [bookings_source]\n"
        );
    }

    #[test]
    fn multi_hop_dimension_joins_through_listings() {
        let plan = build(QueryRequest::new(["bookings"]).group_by(["listing__user__home_country"]));
        let text = plan.structure_text();
        assert!(text.contains("Join Standard Outputs [listing]"));
        assert!(text.contains("Join Standard Outputs [user]"));
        assert!(text.contains("Read From Semantic Model [users_source]"));
    }

    #[test]
    fn metric_filter_becomes_where_constraint() {
        let plan = build(QueryRequest::new(["instant_bookings"]).group_by(["metric_time__day"]));
        assert!(plan
            .structure_text()
            .contains("Constrain Output with WHERE [booking__is_instant]"));
    }

    #[test]
    fn derived_offset_metric_reads_source_twice() {
        let plan = build(QueryRequest::new(["bookings_growth_2_weeks"]).group_by(["metric_time__day"]));
        let text = plan.structure_text();
        assert!(text.contains("Combine Aggregated Outputs"));
        assert!(text.contains("Metric Time Dimension Transform [ds + 2 week]"));
        assert_eq!(text.matches("Read From Semantic Model [bookings_source]").count(), 2);
    }

    #[test]
    fn ratio_with_same_input_aliases_denominator() {
        let plan = build(QueryRequest::new(["instant_share"]));
        match plan.sink.parents()[0].kind() {
            NodeKind::ComputeMetrics {
                expr: MetricExpr::Ratio { numerator, denominator },
                ..
            } => {
                assert_eq!(numerator.output_name(), "bookings");
                assert_eq!(denominator.output_name(), "bookings_denominator");
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn cumulative_metric_uses_window_over_metric_time() {
        let plan = build(QueryRequest::new(["cumulative_bookings"]).group_by(["metric_time__month"]));
        assert!(plan
            .structure_text()
            .contains("Window Function for Metric Re-aggregation"));
        let plain = build(QueryRequest::new(["cumulative_bookings"]));
        assert!(!plain
            .structure_text()
            .contains("Window Function for Metric Re-aggregation"));
    }

    #[test]
    fn order_and_limit_wrap_the_output() {
        let plan = build(
            QueryRequest::new(["bookings"])
                .group_by(["metric_time__day"])
                .order_by(["-metric_time__day"])
                .limit(5),
        );
        assert!(matches!(
            plan.sink.parents()[0].kind(),
            NodeKind::OrderByLimit { limit: Some(5), .. }
        ));
    }

    #[test]
    fn distinct_values_without_metrics() {
        let plan = build(QueryRequest::default().group_by(["listing__country"]));
        assert_eq!(
            plan.structure_text(),
            "Write to Result\n\
             \x20 Aggregate Measures\n\
             \x20   Pass Only Elements\n\
             \x20     Read From Semantic Model [listings_source]\n"
        );
    }

    #[test]
    fn building_twice_is_structurally_equal() {
        let request = QueryRequest::new(["bookings_growth_2_weeks", "bookings"])
            .group_by(["metric_time__day", "listing__country"]);
        assert_eq!(build(request.clone()), build(request));
    }
}
