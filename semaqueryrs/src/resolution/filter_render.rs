//! Rendering of where-filter templates into SQL over resolved columns.

use serde::Serialize;

use crate::error::{Result, SemaqueryError};
use crate::model::linkable::LinkableElement;
use crate::model::manifest::{WhereFilter, WhereFilterIntersection};
use crate::naming::cache::DescriptorCache;
use crate::naming::template::render_template;
use crate::resolution::filter_spec::{FilterLocation, FilterSpecResolutionLookup, ResolvedSpecLookupKey};
use crate::specs::column_assoc::ColumnAssociationResolver;
use crate::specs::spec::{InstanceSpec, LinkableSpec};

/// A rendered filter and the items it reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WhereFilterSpec {
    pub where_sql: String,
    pub linkable_specs: Vec<LinkableSpec>,
    pub linkable_elements: Vec<LinkableElement>,
}

impl WhereFilterSpec {
    /// Both filters must hold.
    pub fn merge(&self, other: &WhereFilterSpec) -> WhereFilterSpec {
        let mut linkable_specs = self.linkable_specs.clone();
        push_unique(&mut linkable_specs, other.linkable_specs.iter().cloned());
        let mut linkable_elements = self.linkable_elements.clone();
        push_unique(&mut linkable_elements, other.linkable_elements.iter().cloned());
        WhereFilterSpec {
            where_sql: format!("({}) AND ({})", self.where_sql, other.where_sql),
            linkable_specs,
            linkable_elements,
        }
    }

    pub fn merge_iterable<'s>(specs: impl IntoIterator<Item = &'s WhereFilterSpec>) -> Option<WhereFilterSpec> {
        let mut specs = specs.into_iter();
        let first = specs.next()?.clone();
        Some(specs.fold(first, |merged, next| merged.merge(next)))
    }
}

fn push_unique<T: PartialEq>(into: &mut Vec<T>, items: impl IntoIterator<Item = T>) {
    for item in items {
        if !into.contains(&item) {
            into.push(item);
        }
    }
}

/// Builds [`WhereFilterSpec`]s from templates, substituting each callout with
/// the column of its resolved spec.
pub struct WhereSpecFactory<'a> {
    column_resolver: &'a dyn ColumnAssociationResolver,
    lookup: &'a FilterSpecResolutionLookup,
}

impl<'a> WhereSpecFactory<'a> {
    pub fn new(
        column_resolver: &'a dyn ColumnAssociationResolver,
        lookup: &'a FilterSpecResolutionLookup,
    ) -> Self {
        Self {
            column_resolver,
            lookup,
        }
    }

    pub fn create_from_where_filter(
        &self,
        location: &FilterLocation,
        filter: &WhereFilter,
        cache: &mut DescriptorCache,
    ) -> Result<WhereFilterSpec> {
        let mut linkable_specs = Vec::new();
        let mut linkable_elements = Vec::new();
        let where_sql = render_template(&filter.where_sql_template, |callout| {
            let item_descriptor = cache.parse_callout(callout)?;
            let key = ResolvedSpecLookupKey {
                filter_location: location.clone(),
                item_descriptor,
            };
            let resolution = self.lookup.checked_resolved_spec(&key)?;
            let spec = resolution.resolved_spec.clone().ok_or_else(|| {
                SemaqueryError::Internal(format!("filter item {} was not resolved", resolution.input_str))
            })?;
            let column = self
                .column_resolver
                .resolve_spec(&InstanceSpec::Linkable(spec.clone()))
                .column_name;
            push_unique(&mut linkable_specs, [spec]);
            push_unique(&mut linkable_elements, resolution.linkable_elements.iter().cloned());
            Ok::<_, SemaqueryError>(column)
        })?;
        Ok(WhereFilterSpec {
            where_sql,
            linkable_specs,
            linkable_elements,
        })
    }

    pub fn create_from_where_filter_intersection(
        &self,
        location: &FilterLocation,
        filters: &WhereFilterIntersection,
        cache: &mut DescriptorCache,
    ) -> Result<Vec<WhereFilterSpec>> {
        filters
            .where_filters
            .iter()
            .map(|filter| self.create_from_where_filter(location, filter, cache))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::elements::{MetricReference, TimeGranularity};
    use crate::naming::descriptor::QueryableItemDescriptor;
    use crate::resolution::filter_spec::FilterSpecResolution;
    use crate::resolution::issues::IssueSet;
    use crate::resolution::path::ResolutionPath;
    use crate::specs::column_assoc::DunderColumnAssociationResolver;
    use crate::specs::spec::TimeDimensionSpec;

    fn location() -> FilterLocation {
        FilterLocation::Query {
            metrics: vec![MetricReference::new("bookings")],
        }
    }

    fn lookup() -> FilterSpecResolutionLookup {
        let descriptor =
            QueryableItemDescriptor::parse("TimeDimension('metric_time', 'day')").unwrap();
        FilterSpecResolutionLookup::new(
            vec![FilterSpecResolution {
                lookup_key: ResolvedSpecLookupKey {
                    filter_location: location(),
                    item_descriptor: descriptor,
                },
                filter_location_path: ResolutionPath::default(),
                resolved_spec: Some(TimeDimensionSpec::metric_time(TimeGranularity::Day).into()),
                linkable_elements: Vec::new(),
                where_filters: WhereFilterIntersection::default(),
                issue_set: IssueSet::new(),
                input_str: "TimeDimension('metric_time', 'day')".into(),
            }],
            Vec::new(),
        )
    }

    #[test]
    fn substitutes_resolved_columns() {
        let lookup = lookup();
        let factory = WhereSpecFactory::new(&DunderColumnAssociationResolver, &lookup);
        let mut cache = DescriptorCache::new();
        let spec = factory
            .create_from_where_filter(
                &location(),
                &WhereFilter::new("{{ TimeDimension('metric_time','day') }} = '2020-01-01'"),
                &mut cache,
            )
            .unwrap();
        assert_eq!(spec.where_sql, "metric_time__day = '2020-01-01'");
        assert_eq!(
            spec.linkable_specs,
            vec![LinkableSpec::from(TimeDimensionSpec::metric_time(TimeGranularity::Day))]
        );
    }

    #[test]
    fn unresolved_callout_is_internal_error() {
        let lookup = lookup();
        let factory = WhereSpecFactory::new(&DunderColumnAssociationResolver, &lookup);
        let mut cache = DescriptorCache::new();
        let err = factory
            .create_from_where_filter(
                &location(),
                &WhereFilter::new("{{ Dimension('listing__country') }} = 'US'"),
                &mut cache,
            )
            .unwrap_err();
        assert!(matches!(err, SemaqueryError::Internal(_)));
    }

    #[test]
    fn merged_filters_are_conjunctions() {
        let a = WhereFilterSpec {
            where_sql: "a = 1".into(),
            linkable_specs: Vec::new(),
            linkable_elements: Vec::new(),
        };
        let b = WhereFilterSpec {
            where_sql: "b = 2".into(),
            ..a.clone()
        };
        assert_eq!(
            WhereFilterSpec::merge_iterable([&a, &b]).unwrap().where_sql,
            "(a = 1) AND (b = 2)"
        );
        assert!(WhereFilterSpec::merge_iterable([]).is_none());
    }
}
