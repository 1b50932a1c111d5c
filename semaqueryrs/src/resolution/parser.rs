//! Validation of a query request into a fully resolved [`QuerySpec`].

use serde::{Deserialize, Serialize};

use crate::config::SemaqueryConfig;
use crate::error::{Result, SemaqueryError};
use crate::model::elements::MetricReference;
use crate::model::lookup::SemanticModelLookup;
use crate::model::manifest::WhereFilterIntersection;
use crate::naming::cache::DescriptorCache;
use crate::resolution::dag::ResolutionDagBuilder;
use crate::resolution::filter_render::{WhereFilterSpec, WhereSpecFactory};
use crate::resolution::filter_resolver::WhereFilterSpecResolver;
use crate::resolution::filter_spec::{FilterLocation, FilterSpecResolutionLookup};
use crate::resolution::issues::{IssueSet, ResolutionIssue, ResolutionIssueKind};
use crate::resolution::path::ResolutionPath;
use crate::resolution::resolver::{input_str_for_spec, GroupByItemResolver};
use crate::specs::column_assoc::ColumnAssociationResolver;
use crate::specs::pattern::{EntityLinkPattern, SpecPattern, WhitelistSpecPattern};
use crate::specs::similarity::closest_names;
use crate::specs::spec::{InstanceSpec, LinkableSpec, MetricSpec, OrderBySpec};

/// A metrics query as submitted by a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryRequest {
    pub metric_names: Vec<String>,
    /// Dundered names or builder calls, e.g. `metric_time__day` or `Dimension('listing__country')`.
    pub group_by_names: Vec<String>,
    /// Where-filter templates, all of which must hold.
    pub where_filters: Vec<String>,
    /// Metric or group-by names; a leading `-` sorts descending.
    pub order_by_names: Vec<String>,
    pub limit: Option<u64>,
}

impl QueryRequest {
    pub fn new<S: Into<String>>(metric_names: impl IntoIterator<Item = S>) -> Self {
        Self {
            metric_names: metric_names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn group_by<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.group_by_names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn where_filter(mut self, template: impl Into<String>) -> Self {
        self.where_filters.push(template.into());
        self
    }

    pub fn order_by<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.order_by_names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A query whose every reference has been resolved to a spec.
#[derive(Debug, Clone, Serialize)]
pub struct QuerySpec {
    pub metric_specs: Vec<MetricSpec>,
    pub group_by_specs: Vec<LinkableSpec>,
    pub where_filters: WhereFilterIntersection,
    /// The query filters rendered and combined; `None` without filters.
    pub query_filter_spec: Option<WhereFilterSpec>,
    pub filter_resolution_lookup: FilterSpecResolutionLookup,
    pub order_by_specs: Vec<OrderBySpec>,
    pub limit: Option<u64>,
    /// Non-fatal issues, such as repeated inputs.
    pub warnings: IssueSet,
}

impl QuerySpec {
    pub fn query_filter_location(&self) -> FilterLocation {
        FilterLocation::Query {
            metrics: self
                .metric_specs
                .iter()
                .map(|m| MetricReference::new(&m.element_name))
                .collect(),
        }
    }
}

pub struct QueryParser<'a> {
    lookup: &'a dyn SemanticModelLookup,
    column_resolver: &'a dyn ColumnAssociationResolver,
    config: &'a SemaqueryConfig,
}

impl<'a> QueryParser<'a> {
    pub fn new(
        lookup: &'a dyn SemanticModelLookup,
        column_resolver: &'a dyn ColumnAssociationResolver,
        config: &'a SemaqueryConfig,
    ) -> Self {
        Self {
            lookup,
            column_resolver,
            config,
        }
    }

    /// Resolve `request`, failing once with every error found.
    pub fn parse(&self, request: &QueryRequest, cache: &mut DescriptorCache) -> Result<QuerySpec> {
        if request.metric_names.is_empty() && request.group_by_names.is_empty() {
            return Err(SemaqueryError::InvalidQuery(
                "a query needs at least one metric or group-by item".to_string(),
            ));
        }

        let mut issues = IssueSet::new();
        let metrics = self.resolve_metrics(&request.metric_names, &mut issues)?;
        let where_filters = WhereFilterIntersection::from_templates(request.where_filters.iter().cloned());
        let dag = ResolutionDagBuilder::new(self.lookup).build(&metrics, where_filters.clone())?;
        let resolver = GroupByItemResolver::new(
            self.lookup,
            &dag,
            self.config.resolution.max_suggestions,
        );

        let group_by_specs = self.resolve_group_by_items(&request.group_by_names, &resolver, cache, &mut issues);

        let filter_resolution_lookup = WhereFilterSpecResolver::new(self.lookup, &resolver, cache).resolve_lookup();
        issues.extend(filter_resolution_lookup.issue_set());

        let metric_specs: Vec<MetricSpec> = metrics
            .iter()
            .map(|m| MetricSpec::new(m.as_str()))
            .collect();
        let order_by_specs = self.resolve_order_by(
            &request.order_by_names,
            &metric_specs,
            &group_by_specs,
            &resolver,
            cache,
            &mut issues,
        );

        if issues.has_errors() {
            tracing::debug!(errors = issues.errors().count(), "query failed to resolve");
            return Err(SemaqueryError::InvalidQuery(issues.ui_report()));
        }

        let location = FilterLocation::Query {
            metrics: metrics.clone(),
        };
        let factory = WhereSpecFactory::new(self.column_resolver, &filter_resolution_lookup);
        let query_filter_specs =
            factory.create_from_where_filter_intersection(&location, &where_filters, cache)?;
        let query_filter_spec = WhereFilterSpec::merge_iterable(&query_filter_specs);

        let warnings: IssueSet = issues.warnings().cloned().collect();
        for warning in warnings.issues() {
            tracing::warn!(input = %warning.input_str, "{}", warning.message());
        }

        tracing::debug!(
            metrics = metric_specs.len(),
            group_by = group_by_specs.len(),
            order_by = order_by_specs.len(),
            "parsed query"
        );
        Ok(QuerySpec {
            metric_specs,
            group_by_specs,
            where_filters,
            query_filter_spec,
            filter_resolution_lookup,
            order_by_specs,
            limit: request.limit,
            warnings,
        })
    }

    fn resolve_metrics(&self, names: &[String], warnings: &mut IssueSet) -> Result<Vec<MetricReference>> {
        let mut issues = IssueSet::new();
        let mut metrics = Vec::new();
        for name in names {
            let reference = MetricReference::new(name.trim());
            if self.lookup.get_metric(&reference).is_some() {
                if metrics.contains(&reference) {
                    warnings.push(ResolutionIssue::warning(
                        name.as_str(),
                        ResolutionPath::default(),
                        ResolutionIssueKind::DuplicateItem {
                            selected: format!("Metric('{reference}')"),
                        },
                    ));
                } else {
                    metrics.push(reference);
                }
                continue;
            }
            let suggestions = closest_names(
                name,
                self.lookup.metrics().iter().map(|m| m.name.as_str()),
                self.config.resolution.max_suggestions,
            );
            issues.push(ResolutionIssue::error(
                name.as_str(),
                ResolutionPath::default(),
                ResolutionIssueKind::UnknownMetric { suggestions },
            ));
        }
        if issues.has_errors() {
            return Err(SemaqueryError::InvalidQuery(issues.ui_report()));
        }
        Ok(metrics)
    }

    fn resolve_group_by_items(
        &self,
        names: &[String],
        resolver: &GroupByItemResolver<'_>,
        cache: &mut DescriptorCache,
        issues: &mut IssueSet,
    ) -> Vec<LinkableSpec> {
        let sink = resolver.dag().sink_node();
        let query_path = ResolutionPath::from_nodes(resolver.dag(), [sink]);
        let mut specs: Vec<LinkableSpec> = Vec::new();
        for name in names {
            let descriptor = match cache.parse(name) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    issues.push(ResolutionIssue::error(
                        name.as_str(),
                        ResolutionPath::default(),
                        ResolutionIssueKind::InvalidItemSyntax {
                            message: e.to_string(),
                        },
                    ));
                    continue;
                }
            };
            let pattern = EntityLinkPattern::from_descriptor(&descriptor);
            let resolution = resolver.resolve_matching_item(sink, &pattern, name);
            issues.extend(resolution.issue_set.clone());
            if let Some(spec) = resolution.spec() {
                if specs.contains(spec) {
                    issues.push(ResolutionIssue::warning(
                        name.as_str(),
                        query_path.clone(),
                        ResolutionIssueKind::DuplicateItem {
                            selected: input_str_for_spec(spec),
                        },
                    ));
                } else {
                    specs.push(spec.clone());
                }
            }
        }
        specs
    }

    /// Order-by items must name a selected metric or group-by item.
    fn resolve_order_by(
        &self,
        names: &[String],
        metric_specs: &[MetricSpec],
        group_by_specs: &[LinkableSpec],
        resolver: &GroupByItemResolver<'_>,
        cache: &mut DescriptorCache,
        issues: &mut IssueSet,
    ) -> Vec<OrderBySpec> {
        let dag = resolver.dag();
        let selected = WhitelistSpecPattern::new(group_by_specs.iter().cloned())
            .match_specs(&resolver.candidate_specs(dag.sink_node()));
        let query_path = ResolutionPath::from_nodes(dag, [dag.sink_node()]);
        let mut order_by = Vec::new();
        for raw in names {
            let (name, mut descending) = match raw.strip_prefix('-') {
                Some(stripped) => (stripped, true),
                None => (raw.as_str(), false),
            };

            if let Some(metric) = metric_specs.iter().find(|m| m.element_name == name) {
                order_by.push(OrderBySpec {
                    instance: InstanceSpec::Metric(metric.clone()),
                    descending,
                });
                continue;
            }

            let matched = cache.parse(name).ok().and_then(|descriptor| {
                if let Some(explicit) = descriptor.descending {
                    descending = explicit;
                }
                let pattern = EntityLinkPattern::from_descriptor(&descriptor);
                match pattern.match_specs(&selected).as_slice() {
                    [single] => Some(single.clone()),
                    _ => None,
                }
            });
            match matched {
                Some(spec) => order_by.push(OrderBySpec {
                    instance: InstanceSpec::Linkable(spec),
                    descending,
                }),
                None => {
                    let mut suggestions: Vec<String> =
                        metric_specs.iter().map(|m| m.element_name.clone()).collect();
                    suggestions.extend(group_by_specs.iter().map(input_str_for_spec));
                    issues.push(ResolutionIssue::error(
                        raw.as_str(),
                        query_path.clone(),
                        ResolutionIssueKind::InvalidOrderBy { suggestions },
                    ));
                }
            }
        }
        order_by
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::lookup::ManifestLookup;
    use crate::model::manifest::SemanticManifest;
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
    measures:
      - {name: bookings, agg: sum, expr: "1"}
  - name: listings_source
    node_relation: dim_listings
    entities:
      - {name: listing, type: primary}
    dimensions:
      - {name: country, type: categorical}
metrics:
  - name: bookings
    type: simple
    type_params: {measure: bookings}
"#;

    fn parse(request: &QueryRequest) -> Result<QuerySpec> {
        let lookup = ManifestLookup::new(SemanticManifest::from_yaml(MANIFEST).unwrap(), 2);
        let config = SemaqueryConfig::default();
        let parser = QueryParser::new(&lookup, &DunderColumnAssociationResolver, &config);
        parser.parse(request, &mut DescriptorCache::new())
    }

    #[test]
    fn parses_metrics_group_by_filters_and_order() {
        let request = QueryRequest::new(["bookings"])
            .group_by(["metric_time__day", "listing__country"])
            .where_filter("{{ Dimension('listing__country') }} = 'US'")
            .order_by(["-bookings", "listing__country"])
            .limit(10);
        let spec = parse(&request).unwrap();
        let names: Vec<String> = spec.group_by_specs.iter().map(|s| s.qualified_name()).collect();
        assert_eq!(names, vec!["metric_time__day", "listing__country"]);
        assert_eq!(
            spec.query_filter_spec.as_ref().map(|f| f.where_sql.as_str()),
            Some("listing__country = 'US'")
        );
        assert_eq!(spec.order_by_specs.len(), 2);
        assert!(spec.order_by_specs[0].descending);
        assert!(!spec.order_by_specs[1].descending);
        assert_eq!(spec.limit, Some(10));
    }

    #[test]
    fn unknown_metric_suggests_close_names() {
        let err = parse(&QueryRequest::new(["bokings"])).unwrap_err();
        match err {
            SemaqueryError::InvalidQuery(report) => {
                assert!(report.contains("bokings"));
                assert!(report.contains("\"bookings\""));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn all_errors_are_reported_together() {
        let request = QueryRequest::new(["bookings"])
            .group_by(["listing__countryy", "metric_time__dayy__"])
            .where_filter("{{ Dimension('listing__nope') }} = 1");
        let SemaqueryError::InvalidQuery(report) = parse(&request).unwrap_err() else {
            panic!("expected an invalid query");
        };
        assert!(report.contains("Error #1:"));
        assert!(report.contains("Error #2:"));
        assert!(report.contains("Error #3:"));
        assert!(report.contains("listing__countryy"));
        assert!(report.contains("Dimension('listing__nope')"));
    }

    #[test]
    fn order_by_must_be_selected() {
        let request = QueryRequest::new(["bookings"])
            .group_by(["metric_time__day"])
            .order_by(["listing__country"]);
        assert!(matches!(
            parse(&request),
            Err(SemaqueryError::InvalidQuery(_))
        ));
    }

    #[test]
    fn repeated_inputs_are_kept_once_with_a_warning() {
        let request = QueryRequest::new(["bookings", "bookings"])
            .group_by(["listing__country", "Dimension('listing__country')"]);
        let spec = parse(&request).unwrap();
        assert_eq!(spec.metric_specs.len(), 1);
        assert_eq!(spec.group_by_specs.len(), 1);

        let warnings = spec.warnings.issues();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().all(|w| !w.is_error()));
        assert_eq!(warnings[0].input_str, "bookings");
        assert_eq!(warnings[1].input_str, "Dimension('listing__country')");
        assert_eq!(
            warnings[1].kind,
            ResolutionIssueKind::DuplicateItem {
                selected: "Dimension('listing__country')".into()
            }
        );
    }

    #[test]
    fn empty_query_is_rejected() {
        assert!(matches!(
            parse(&QueryRequest::default()),
            Err(SemaqueryError::InvalidQuery(_))
        ));
    }

    #[test]
    fn group_by_only_query_uses_no_metrics_scope() {
        let spec = parse(&QueryRequest::default().group_by(["listing__country"])).unwrap();
        assert!(spec.metric_specs.is_empty());
        assert_eq!(spec.group_by_specs.len(), 1);
    }
}
