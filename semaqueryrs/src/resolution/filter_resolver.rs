//! Resolves the items referenced in every where filter of a resolution DAG.
//!
//! Filters can be declared on the query, on a metric, on a metric's input
//! measure, and by a derived metric on one of its input metrics. Each is
//! resolved in the scope of the node it is declared at.

use std::collections::HashMap;

use crate::model::lookup::SemanticModelLookup;
use crate::model::manifest::{WhereFilter, WhereFilterIntersection};
use crate::naming::cache::DescriptorCache;
use crate::naming::descriptor::QueryableItemDescriptor;
use crate::naming::template::parse_item_descriptions;
use crate::resolution::dag::{ResolutionDag, ResolutionNodeId, ResolutionNodeKind};
use crate::resolution::filter_spec::{
    FilterLocation, FilterSpecResolution, FilterSpecResolutionLookup, NonParsableFilterResolution,
    ResolvedSpecLookupKey,
};
use crate::resolution::issues::{IssueSet, ResolutionIssue, ResolutionIssueKind};
use crate::resolution::path::ResolutionPath;
use crate::resolution::resolver::GroupByItemResolver;
use crate::specs::pattern::EntityLinkPattern;

pub struct WhereFilterSpecResolver<'a, 'c> {
    lookup: &'a dyn SemanticModelLookup,
    resolver: &'a GroupByItemResolver<'a>,
    cache: &'c mut DescriptorCache,
    path: ResolutionPath,
    visited: HashMap<ResolutionNodeId, FilterSpecResolutionLookup>,
}

impl<'a, 'c> WhereFilterSpecResolver<'a, 'c> {
    pub fn new(
        lookup: &'a dyn SemanticModelLookup,
        resolver: &'a GroupByItemResolver<'a>,
        cache: &'c mut DescriptorCache,
    ) -> Self {
        Self {
            lookup,
            resolver,
            cache,
            path: ResolutionPath::default(),
            visited: HashMap::new(),
        }
    }

    fn dag(&self) -> &'a ResolutionDag {
        self.resolver.dag()
    }

    pub fn resolve_lookup(mut self) -> FilterSpecResolutionLookup {
        let sink = self.dag().sink_node();
        let lookup = self.visit(sink);
        tracing::debug!(
            resolutions = lookup.spec_resolutions().len(),
            non_parsable = lookup.non_parsable_resolutions().len(),
            has_errors = lookup.has_errors(),
            "resolved where filter specs"
        );
        lookup
    }

    fn visit(&mut self, node: ResolutionNodeId) -> FilterSpecResolutionLookup {
        if let Some(done) = self.visited.get(&node) {
            return done.clone();
        }
        let dag = self.dag();
        self.path.push(dag, node);

        let result = match &dag.node(node).kind {
            ResolutionNodeKind::MeasureSource { .. } | ResolutionNodeKind::NoMetricsQuery => {
                FilterSpecResolutionLookup::empty()
            }
            ResolutionNodeKind::Metric { .. } => {
                let from_parents = self.visit_parents(node);
                let filters = self.where_filters_at_metric_node(node);
                from_parents.merge(self.resolve_where_filters(node, filters))
            }
            ResolutionNodeKind::Query {
                metrics,
                where_filters,
            } => {
                let from_parents = self.visit_parents(node);
                let location = FilterLocation::Query {
                    metrics: metrics.clone(),
                };
                let filters = vec![(location, dedupe_filters(&where_filters.where_filters))];
                from_parents.merge(self.resolve_where_filters(node, filters))
            }
        };

        self.path.pop();
        self.visited.insert(node, result.clone());
        result
    }

    fn visit_parents(&mut self, node: ResolutionNodeId) -> FilterSpecResolutionLookup {
        let parents = self.dag().parents(node);
        let lookups: Vec<_> = parents.iter().map(|parent| self.visit(*parent)).collect();
        FilterSpecResolutionLookup::merge_iterable(lookups)
    }

    fn where_filters_at_metric_node(&self, node: ResolutionNodeId) -> Vec<(FilterLocation, Vec<WhereFilter>)> {
        let ResolutionNodeKind::Metric {
            metric: reference,
            input_location,
        } = &self.dag().node(node).kind
        else {
            return Vec::new();
        };
        let Some(metric) = self.lookup.get_metric(reference) else {
            return Vec::new();
        };

        let mut metric_filters = Vec::new();
        for input_measure in metric.input_measures() {
            if let Some(filter) = &input_measure.filter {
                metric_filters.extend(filter.where_filters.iter().cloned());
            }
        }
        if let Some(filter) = &metric.filter {
            metric_filters.extend(filter.where_filters.iter().cloned());
        }

        let mut locations = Vec::new();
        if !metric_filters.is_empty() {
            locations.push((
                FilterLocation::Metric(reference.clone()),
                dedupe_filters(&metric_filters),
            ));
        }

        // This metric feeds a derived metric that may filter it.
        let input_filter = input_location
            .as_ref()
            .and_then(|location| location.metric_input(self.lookup))
            .and_then(|input| input.filter.as_ref());
        if let Some(filter) = input_filter {
            locations.push((
                FilterLocation::InputMetric(reference.clone()),
                dedupe_filters(&filter.where_filters),
            ));
        }
        locations
    }

    fn resolve_where_filters(
        &mut self,
        node: ResolutionNodeId,
        filters_by_location: Vec<(FilterLocation, Vec<WhereFilter>)>,
    ) -> FilterSpecResolutionLookup {
        if filters_by_location.iter().all(|(_, filters)| filters.is_empty()) {
            return FilterSpecResolutionLookup::empty();
        }
        let all_filters = WhereFilterIntersection {
            where_filters: filters_by_location
                .iter()
                .flat_map(|(_, filters)| filters.iter().cloned())
                .collect(),
        };

        let mut non_parsable = Vec::new();
        let mut descriptors_by_location: Vec<(FilterLocation, Vec<QueryableItemDescriptor>)> = Vec::new();
        for (location, filters) in &filters_by_location {
            let mut descriptors = Vec::new();
            for filter in filters {
                match self.parse_filter(filter) {
                    Ok(parsed) => descriptors.extend(parsed),
                    Err(message) => non_parsable.push(NonParsableFilterResolution {
                        filter_location_path: self.path.clone(),
                        where_filters: all_filters.clone(),
                        issue_set: IssueSet::from_issue(ResolutionIssue::error(
                            filter.where_sql_template.clone(),
                            self.path.clone(),
                            ResolutionIssueKind::NonParsableWhereFilter {
                                where_sql_template: filter.where_sql_template.clone(),
                                message,
                            },
                        )),
                    }),
                }
            }
            descriptors_by_location.push((location.clone(), ordered_dedupe(descriptors)));
        }

        let path_prefix = self.path.parent_path();
        let mut resolutions = Vec::new();
        for (location, descriptors) in descriptors_by_location {
            let where_filters = filters_by_location
                .iter()
                .find(|(l, _)| *l == location)
                .map(|(_, filters)| WhereFilterIntersection {
                    where_filters: filters.clone(),
                })
                .unwrap_or_default();
            for descriptor in descriptors {
                let input_str = descriptor.builder_str();
                let pattern = EntityLinkPattern::from_descriptor(&descriptor);
                let resolution = self
                    .resolver
                    .resolve_matching_item(node, &pattern, &input_str);
                resolutions.push(FilterSpecResolution {
                    lookup_key: ResolvedSpecLookupKey {
                        filter_location: location.clone(),
                        item_descriptor: descriptor,
                    },
                    filter_location_path: self.path.clone(),
                    resolved_spec: resolution.spec().cloned(),
                    linkable_elements: resolution.linkable_elements,
                    where_filters: where_filters.clone(),
                    issue_set: resolution.issue_set.with_path_prefix(&path_prefix),
                    input_str,
                });
            }
        }

        // A location with any failure reports only its failures.
        if !non_parsable.is_empty() || resolutions.iter().any(|r| r.issue_set.has_errors()) {
            resolutions.retain(|r| r.issue_set.has_errors());
        }
        FilterSpecResolutionLookup::new(resolutions, non_parsable)
    }

    fn parse_filter(&mut self, filter: &WhereFilter) -> Result<Vec<QueryableItemDescriptor>, String> {
        let callouts =
            parse_item_descriptions(&filter.where_sql_template).map_err(|e| e.to_string())?;
        callouts
            .iter()
            .map(|callout| self.cache.parse_callout(callout).map_err(|e| e.to_string()))
            .collect()
    }
}

fn dedupe_filters(filters: &[WhereFilter]) -> Vec<WhereFilter> {
    ordered_dedupe(filters.to_vec())
}

/// Drop repeats, keeping the first occurrence of each item.
fn ordered_dedupe<T: PartialEq>(items: Vec<T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::elements::MetricReference;
    use crate::model::lookup::ManifestLookup;
    use crate::model::manifest::SemanticManifest;
    use crate::resolution::dag::ResolutionDagBuilder;

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
    dimensions:
      - {name: is_lux, type: categorical}
metrics:
  - name: bookings
    type: simple
    type_params: {measure: bookings}
  - name: lux_bookings
    type: simple
    type_params:
      measure:
        name: bookings
        filter: "{{ Dimension('listing__is_lux') }}"
    filter: "{{ Dimension('booking__is_instant') }}"
  - name: lux_share
    type: derived
    type_params:
      expr: lux_bookings / bookings
      metrics:
        - lux_bookings
        - name: bookings
          filter: "{{ TimeDimension('metric_time', 'day') }} > '2020-01-01'"
"#;

    fn resolve(metrics: &[&str], query_filters: &[&str]) -> FilterSpecResolutionLookup {
        let lookup = ManifestLookup::new(SemanticManifest::from_yaml(MANIFEST).unwrap(), 2);
        let metrics: Vec<_> = metrics.iter().map(|m| MetricReference::new(*m)).collect();
        let dag = ResolutionDagBuilder::new(&lookup)
            .build(&metrics, WhereFilterIntersection::from_templates(query_filters.iter().copied()))
            .unwrap();
        let resolver = GroupByItemResolver::new(&lookup, &dag, 6);
        let mut cache = DescriptorCache::new();
        WhereFilterSpecResolver::new(&lookup, &resolver, &mut cache).resolve_lookup()
    }

    fn inputs(lookup: &FilterSpecResolutionLookup) -> Vec<(FilterLocation, String)> {
        lookup
            .spec_resolutions()
            .iter()
            .map(|r| (r.lookup_key.filter_location.clone(), r.input_str.clone()))
            .collect()
    }

    #[test]
    fn resolves_filters_at_every_location() {
        let lookup = resolve(&["lux_share"], &["{{ Dimension('listing__is_lux') }}"]);
        assert!(!lookup.has_errors());
        let found = inputs(&lookup);
        let metric = |m: &str| MetricReference::new(m);
        assert!(found.contains(&(
            FilterLocation::Metric(metric("lux_bookings")),
            "Dimension('listing__is_lux')".to_string()
        )));
        assert!(found.contains(&(
            FilterLocation::Metric(metric("lux_bookings")),
            "Dimension('booking__is_instant')".to_string()
        )));
        assert!(found.contains(&(
            FilterLocation::InputMetric(metric("bookings")),
            "TimeDimension('metric_time', 'day')".to_string()
        )));
        assert!(found.contains(&(
            FilterLocation::Query {
                metrics: vec![metric("lux_share")]
            },
            "Dimension('listing__is_lux')".to_string()
        )));
    }

    #[test]
    fn repeated_items_in_one_location_resolve_once() {
        let lookup = resolve(
            &["bookings"],
            &[
                "{{ Dimension('listing__is_lux') }}",
                "NOT {{ Dimension('listing__is_lux') }} OR {{ Dimension('booking__is_instant') }}",
            ],
        );
        assert_eq!(lookup.spec_resolutions().len(), 2);
    }

    #[test]
    fn one_failure_drops_the_successes_of_its_location() {
        let lookup = resolve(
            &["bookings"],
            &[
                "{{ Dimension('listing__is_lux') }}",
                "{{ Dimension('booking__is_instant') }}",
                "{{ Dimension('listing__nope') }}",
            ],
        );
        assert!(lookup.has_errors());
        let found = inputs(&lookup);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1, "Dimension('listing__nope')");
    }

    #[test]
    fn unparsable_filter_is_recorded_not_raised() {
        let lookup = resolve(
            &["bookings"],
            &[
                "{{ Dimension('listing__is_lux') }",
                "{{ Dimension('listing__is_lux') }}",
            ],
        );
        assert!(lookup.has_errors());
        assert_eq!(lookup.non_parsable_resolutions().len(), 1);
        assert!(lookup.spec_resolutions().is_empty());
    }

    #[test]
    fn nested_issue_paths_start_at_the_query() {
        let manifest = MANIFEST.replace("booking__is_instant", "booking__is_instantt");
        let lookup = ManifestLookup::new(SemanticManifest::from_yaml(&manifest).unwrap(), 2);
        let dag = ResolutionDagBuilder::new(&lookup)
            .build(&[MetricReference::new("lux_share")], WhereFilterIntersection::default())
            .unwrap();
        let resolver = GroupByItemResolver::new(&lookup, &dag, 6);
        let mut cache = DescriptorCache::new();
        let result = WhereFilterSpecResolver::new(&lookup, &resolver, &mut cache).resolve_lookup();
        let issues = result.issue_set();
        let error = issues.errors().next().unwrap();
        assert_eq!(error.input_str, "Dimension('booking__is_instantt')");
        assert_eq!(
            error.path.to_string(),
            "[Resolve Query(['lux_share'])] -> [Resolve Metric('lux_share')] -> [Resolve Metric('lux_bookings')]"
        );
    }
}
