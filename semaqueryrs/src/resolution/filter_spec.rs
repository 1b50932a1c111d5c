//! Lookup of resolved specs for the items referenced inside where filters.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Result, SemaqueryError};
use crate::model::elements::MetricReference;
use crate::model::linkable::LinkableElement;
use crate::model::manifest::WhereFilterIntersection;
use crate::naming::descriptor::QueryableItemDescriptor;
use crate::resolution::issues::IssueSet;
use crate::resolution::path::ResolutionPath;
use crate::specs::spec::LinkableSpec;

/// Where a filter was declared. The same item text in two locations is
/// resolved independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum FilterLocation {
    Query { metrics: Vec<MetricReference> },
    /// Filter of the metric itself or of one of its input measures.
    Metric(MetricReference),
    /// Filter a derived metric attaches to this input metric.
    InputMetric(MetricReference),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResolvedSpecLookupKey {
    pub filter_location: FilterLocation,
    pub item_descriptor: QueryableItemDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterSpecResolution {
    pub lookup_key: ResolvedSpecLookupKey,
    /// Path from the query to the node declaring the filter.
    pub filter_location_path: ResolutionPath,
    pub resolved_spec: Option<LinkableSpec>,
    pub linkable_elements: Vec<LinkableElement>,
    pub where_filters: WhereFilterIntersection,
    pub issue_set: IssueSet,
    /// The item as written in builder syntax.
    pub input_str: String,
}

/// A filter whose template could not be parsed at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NonParsableFilterResolution {
    pub filter_location_path: ResolutionPath,
    pub where_filters: WhereFilterIntersection,
    pub issue_set: IssueSet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterSpecResolutionLookup {
    spec_resolutions: Vec<FilterSpecResolution>,
    non_parsable_resolutions: Vec<NonParsableFilterResolution>,
}

impl FilterSpecResolutionLookup {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(
        spec_resolutions: Vec<FilterSpecResolution>,
        non_parsable_resolutions: Vec<NonParsableFilterResolution>,
    ) -> Self {
        Self {
            spec_resolutions,
            non_parsable_resolutions,
        }
    }

    pub fn spec_resolutions(&self) -> &[FilterSpecResolution] {
        &self.spec_resolutions
    }

    pub fn non_parsable_resolutions(&self) -> &[NonParsableFilterResolution] {
        &self.non_parsable_resolutions
    }

    pub fn is_empty(&self) -> bool {
        self.spec_resolutions.is_empty() && self.non_parsable_resolutions.is_empty()
    }

    /// Every issue, resolution entries first.
    pub fn issue_set(&self) -> IssueSet {
        let mut issues = IssueSet::new();
        for resolution in &self.spec_resolutions {
            issues.extend(resolution.issue_set.clone());
        }
        for resolution in &self.non_parsable_resolutions {
            issues.extend(resolution.issue_set.clone());
        }
        issues
    }

    pub fn has_errors(&self) -> bool {
        self.spec_resolutions.iter().any(|r| r.issue_set.has_errors())
            || self
                .non_parsable_resolutions
                .iter()
                .any(|r| r.issue_set.has_errors())
    }

    pub fn get(&self, key: &ResolvedSpecLookupKey) -> impl Iterator<Item = &FilterSpecResolution> {
        let key = key.clone();
        self.spec_resolutions
            .iter()
            .filter(move |r| r.lookup_key == key)
    }

    /// The single successful resolution for `key`.
    ///
    /// A miss means filter resolution did not cover a callout, which is a
    /// defect rather than a user error.
    pub fn checked_resolved_spec(&self, key: &ResolvedSpecLookupKey) -> Result<&FilterSpecResolution> {
        let mut found = self.get(key);
        let first = found.next().ok_or_else(|| {
            SemaqueryError::Internal(format!(
                "no filter resolution for {} at {:?}",
                key.item_descriptor.builder_str(),
                key.filter_location
            ))
        })?;
        if found.next().is_some() {
            return Err(SemaqueryError::Internal(format!(
                "more than one filter resolution for {}",
                key.item_descriptor.builder_str()
            )));
        }
        if first.resolved_spec.is_none() {
            return Err(SemaqueryError::Internal(format!(
                "filter item {} was not resolved",
                first.input_str
            )));
        }
        Ok(first)
    }

    /// Combine lookups from different branches of the DAG.
    ///
    /// Entries are grouped by key. A group with errors keeps only its failing
    /// entries; otherwise the group collapses to one success, chosen by path so
    /// the result does not depend on the order of the inputs.
    pub fn merge(self, other: FilterSpecResolutionLookup) -> FilterSpecResolutionLookup {
        let mut groups: BTreeMap<ResolvedSpecLookupKey, Vec<FilterSpecResolution>> = BTreeMap::new();
        for resolution in self.spec_resolutions.into_iter().chain(other.spec_resolutions) {
            groups
                .entry(resolution.lookup_key.clone())
                .or_default()
                .push(resolution);
        }

        let mut spec_resolutions = Vec::new();
        for (_, mut group) in groups {
            group.sort_by_key(|r| r.filter_location_path.ui_description());
            if group.iter().any(|r| r.issue_set.has_errors()) {
                spec_resolutions.extend(group.into_iter().filter(|r| r.issue_set.has_errors()));
            } else if let Some(first) = group.into_iter().next() {
                spec_resolutions.push(first);
            }
        }

        let mut non_parsable_resolutions = self.non_parsable_resolutions;
        for resolution in other.non_parsable_resolutions {
            if !non_parsable_resolutions.contains(&resolution) {
                non_parsable_resolutions.push(resolution);
            }
        }
        non_parsable_resolutions.sort_by_key(|r| {
            let templates: Vec<&str> = r
                .where_filters
                .where_filters
                .iter()
                .map(|f| f.where_sql_template.as_str())
                .collect();
            (r.filter_location_path.ui_description(), templates.join("\n"))
        });

        tracing::trace!(
            resolutions = spec_resolutions.len(),
            non_parsable = non_parsable_resolutions.len(),
            "merged filter spec lookups"
        );
        FilterSpecResolutionLookup {
            spec_resolutions,
            non_parsable_resolutions,
        }
    }

    pub fn merge_iterable(
        lookups: impl IntoIterator<Item = FilterSpecResolutionLookup>,
    ) -> FilterSpecResolutionLookup {
        lookups
            .into_iter()
            .fold(FilterSpecResolutionLookup::empty(), FilterSpecResolutionLookup::merge)
    }
}
