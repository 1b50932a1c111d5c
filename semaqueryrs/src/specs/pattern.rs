//! Predicates over candidate specs.
//!
//! A [`SpecPattern`] narrows a candidate set down to the specs a user reference
//! could mean. Zero or several matches are ordinary results; the caller decides
//! what they mean.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::model::elements::{DatePart, EntityReference, TimeGranularity, DUNDER};
use crate::naming::descriptor::QueryableItemDescriptor;
use crate::specs::similarity::levenshtein;
use crate::specs::spec::{ItemKind, LinkableSpec};

pub trait SpecPattern {
    fn match_specs(&self, candidates: &[LinkableSpec]) -> Vec<LinkableSpec>;

    /// Near misses for error messages, closest first, at most `max_items`.
    fn partially_match(&self, _candidates: &[LinkableSpec], _max_items: usize) -> Vec<LinkableSpec> {
        Vec::new()
    }
}

/// Attributes a parameter set can compare. Variants are declared in name
/// order so the derived ordering matches the field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ParameterSetField {
    DatePart,
    ElementName,
    EntityLinks,
    MetricSubqueryEntityLinks,
    TimeGranularity,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EntityLinkPatternParameterSet {
    fields_to_compare: BTreeSet<ParameterSetField>,
    element_kinds: BTreeSet<ItemKind>,
    element_name: Option<String>,
    entity_links: Option<Vec<EntityReference>>,
    time_granularity: Option<TimeGranularity>,
    date_part: Option<DatePart>,
    metric_subquery_entity_links: Option<Vec<EntityReference>>,
}

impl EntityLinkPatternParameterSet {
    /// Element name, entity links and date part are always compared. The grain
    /// is compared only when given, so an unspecified grain matches any grain.
    pub fn from_descriptor(descriptor: &QueryableItemDescriptor) -> Self {
        let mut fields_to_compare = BTreeSet::from([
            ParameterSetField::ElementName,
            ParameterSetField::EntityLinks,
            ParameterSetField::DatePart,
        ]);
        if descriptor.time_granularity.is_some() {
            fields_to_compare.insert(ParameterSetField::TimeGranularity);
        }

        let element_kinds: BTreeSet<ItemKind> = match descriptor.item_kind {
            None => ItemKind::ALL.into_iter().collect(),
            Some(ItemKind::Dimension)
                if descriptor.time_granularity.is_none() && descriptor.date_part.is_none() =>
            {
                BTreeSet::from([ItemKind::Dimension, ItemKind::TimeDimension])
            }
            Some(ItemKind::Dimension) | Some(ItemKind::TimeDimension) => {
                BTreeSet::from([ItemKind::TimeDimension])
            }
            Some(kind) => BTreeSet::from([kind]),
        };

        if descriptor.item_kind == Some(ItemKind::Metric) {
            fields_to_compare.insert(ParameterSetField::MetricSubqueryEntityLinks);
            let group_by_links = descriptor.metric_group_by_links.clone().unwrap_or_default();
            // Only a single outer join link is supported for metric subqueries.
            let entity_links = group_by_links.last().cloned().into_iter().collect();
            return Self {
                fields_to_compare,
                element_kinds,
                element_name: Some(descriptor.element_name.clone()),
                entity_links: Some(entity_links),
                time_granularity: descriptor.time_granularity,
                date_part: descriptor.date_part,
                metric_subquery_entity_links: Some(group_by_links),
            };
        }

        Self {
            fields_to_compare,
            element_kinds,
            element_name: Some(descriptor.element_name.clone()),
            entity_links: Some(descriptor.entity_links.clone()),
            time_granularity: descriptor.time_granularity,
            date_part: descriptor.date_part,
            metric_subquery_entity_links: None,
        }
    }

    /// Compared fields, in sorted order.
    pub fn fields_to_compare(&self) -> impl Iterator<Item = ParameterSetField> + '_ {
        self.fields_to_compare.iter().copied()
    }

    pub fn element_kinds(&self) -> impl Iterator<Item = ItemKind> + '_ {
        self.element_kinds.iter().copied()
    }

    pub fn compares(&self, field: ParameterSetField) -> bool {
        self.fields_to_compare.contains(&field)
    }

    pub fn entity_links(&self) -> Option<&[EntityReference]> {
        self.entity_links.as_deref()
    }

    pub fn time_granularity(&self) -> Option<TimeGranularity> {
        self.time_granularity
    }

    /// Links and element as a dundered name, used to rank suggestions.
    pub fn dundered_name(&self) -> String {
        let mut parts: Vec<&str> = self
            .entity_links
            .iter()
            .flatten()
            .map(|l| l.as_str())
            .collect();
        if let Some(name) = &self.element_name {
            parts.push(name);
        }
        parts.join(DUNDER)
    }

    fn field_matches(&self, field: ParameterSetField, spec: &LinkableSpec) -> bool {
        match field {
            ParameterSetField::ElementName => {
                self.element_name.as_deref() == Some(spec.element_name())
            }
            ParameterSetField::TimeGranularity => spec.time_granularity() == self.time_granularity,
            ParameterSetField::DatePart => spec.date_part() == self.date_part,
            ParameterSetField::MetricSubqueryEntityLinks => {
                spec.metric_subquery_entity_links() == self.metric_subquery_entity_links.as_deref()
            }
            // Handled separately by suffix matching.
            ParameterSetField::EntityLinks => true,
        }
    }
}

/// Matches specs by kind, exact attributes and an entity-link suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EntityLinkPattern {
    parameter_set: EntityLinkPatternParameterSet,
}

impl EntityLinkPattern {
    pub fn new(parameter_set: EntityLinkPatternParameterSet) -> Self {
        Self { parameter_set }
    }

    pub fn from_descriptor(descriptor: &QueryableItemDescriptor) -> Self {
        Self::new(EntityLinkPatternParameterSet::from_descriptor(descriptor))
    }

    pub fn parameter_set(&self) -> &EntityLinkPatternParameterSet {
        &self.parameter_set
    }

    fn kind_matches(&self, spec: &LinkableSpec) -> bool {
        self.parameter_set.element_kinds.contains(&spec.item_kind())
    }

    fn link_suffix_matches(&self, spec: &LinkableSpec) -> bool {
        let Some(links) = self.parameter_set.entity_links.as_deref() else {
            return true;
        };
        let candidate = spec.entity_links();
        candidate.len() >= links.len() && candidate[candidate.len() - links.len()..] == *links
    }
}

impl SpecPattern for EntityLinkPattern {
    fn match_specs(&self, candidates: &[LinkableSpec]) -> Vec<LinkableSpec> {
        let params = &self.parameter_set;
        let mut matches: Vec<&LinkableSpec> = candidates
            .iter()
            .filter(|spec| self.kind_matches(spec))
            .collect();

        // Links match by suffix, so they narrow the candidates before any
        // exact comparison. Among suffix matches, the shortest join path wins.
        if params.compares(ParameterSetField::EntityLinks) {
            matches.retain(|spec| self.link_suffix_matches(spec));
            if let Some(shortest) = matches.iter().map(|s| s.entity_links().len()).min() {
                matches.retain(|spec| spec.entity_links().len() == shortest);
            }
        }

        matches.retain(|spec| {
            params
                .fields_to_compare()
                .all(|field| params.field_matches(field, spec))
        });
        matches.into_iter().cloned().collect()
    }

    fn partially_match(&self, candidates: &[LinkableSpec], max_items: usize) -> Vec<LinkableSpec> {
        let params = &self.parameter_set;
        let target = params.dundered_name();
        let compare_grain = params.compares(ParameterSetField::TimeGranularity);

        // Without a requested grain, suggest each time dimension once at its finest grain.
        let mut finest: HashMap<(String, Option<DatePart>), TimeGranularity> = HashMap::new();
        if !compare_grain {
            for spec in candidates {
                if let Some(grain) = spec.time_granularity() {
                    let key = (without_suffix(spec), spec.date_part());
                    let entry = finest.entry(key).or_insert(grain);
                    *entry = (*entry).min(grain);
                }
            }
        }

        let mut scored: Vec<(usize, String, &LinkableSpec)> = candidates
            .iter()
            .filter(|spec| self.kind_matches(spec))
            .filter(|spec| match spec.time_granularity() {
                Some(grain) if !compare_grain => {
                    finest.get(&(without_suffix(spec), spec.date_part())) == Some(&grain)
                }
                _ => true,
            })
            .map(|spec| {
                let mut distance = levenshtein(&target, &without_suffix(spec));
                if compare_grain && spec.time_granularity() != params.time_granularity {
                    distance += 1;
                }
                if spec.date_part() != params.date_part {
                    distance += 1;
                }
                (distance, spec.qualified_name(), spec)
            })
            .collect();
        scored.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        scored
            .into_iter()
            .take(max_items)
            .map(|(_, _, spec)| spec.clone())
            .collect()
    }
}

fn without_suffix(spec: &LinkableSpec) -> String {
    let mut parts: Vec<&str> = spec.entity_links().iter().map(|l| l.as_str()).collect();
    parts.push(spec.element_name());
    parts.join(DUNDER)
}

/// Matches exactly the listed specs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WhitelistSpecPattern {
    allowed: BTreeSet<LinkableSpec>,
}

impl WhitelistSpecPattern {
    pub fn new(allowed: impl IntoIterator<Item = LinkableSpec>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }
}

impl SpecPattern for WhitelistSpecPattern {
    fn match_specs(&self, candidates: &[LinkableSpec]) -> Vec<LinkableSpec> {
        candidates
            .iter()
            .filter(|spec| self.allowed.contains(spec))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specs::spec::{DimensionSpec, GroupByMetricSpec, TimeDimensionSpec};

    fn links(names: &[&str]) -> Vec<EntityReference> {
        names.iter().map(|n| EntityReference::new(*n)).collect()
    }

    fn dim(name: &str, path: &[&str]) -> LinkableSpec {
        DimensionSpec {
            element_name: name.into(),
            entity_links: links(path),
        }
        .into()
    }

    fn time_dim(
        name: &str,
        path: &[&str],
        grain: TimeGranularity,
        date_part: Option<DatePart>,
    ) -> LinkableSpec {
        TimeDimensionSpec {
            element_name: name.into(),
            entity_links: links(path),
            time_granularity: grain,
            date_part,
        }
        .into()
    }

    fn pattern(input: &str) -> EntityLinkPattern {
        EntityLinkPattern::from_descriptor(&QueryableItemDescriptor::parse(input).unwrap())
    }

    #[test]
    fn fields_to_compare_are_sorted() {
        let p = pattern("TimeDimension('metric_time', 'day')");
        let fields: Vec<_> = p.parameter_set().fields_to_compare().collect();
        let mut sorted = fields.clone();
        sorted.sort();
        assert_eq!(fields, sorted);
        assert_eq!(
            fields,
            vec![
                ParameterSetField::DatePart,
                ParameterSetField::ElementName,
                ParameterSetField::EntityLinks,
                ParameterSetField::TimeGranularity,
            ]
        );
    }

    #[test]
    fn suffix_match_keeps_shortest_path() {
        let candidates = vec![
            dim("country", &["booking", "listing"]),
            dim("country", &["listing"]),
        ];
        let p = pattern("listing__country");
        assert_eq!(p.match_specs(&candidates), vec![dim("country", &["listing"])]);

        // Only the longer path exists: it still matches by suffix.
        let p = pattern("listing__country");
        assert_eq!(
            p.match_specs(&candidates[..1]),
            vec![dim("country", &["booking", "listing"])]
        );
    }

    #[test]
    fn shortest_suffix_match_is_taken_before_comparing_names() {
        let candidates = vec![
            dim("capacity", &["listing"]),
            dim("country", &["booking", "listing"]),
        ];
        // `listing__capacity` is the shortest suffix match, and its name differs.
        assert!(pattern("listing__country").match_specs(&candidates).is_empty());
        assert_eq!(
            pattern("booking__listing__country").match_specs(&candidates),
            vec![dim("country", &["booking", "listing"])]
        );
    }

    #[test]
    fn bare_name_only_matches_unlinked_items() {
        let candidates = vec![
            dim("country", &["listing"]),
            time_dim("metric_time", &[], TimeGranularity::Day, None),
        ];
        assert!(pattern("Dimension('country')").match_specs(&candidates).is_empty());
        assert_eq!(
            pattern("metric_time").match_specs(&candidates),
            vec![time_dim("metric_time", &[], TimeGranularity::Day, None)]
        );
    }

    #[test]
    fn date_part_none_excludes_date_part_candidates() {
        let candidates = vec![
            time_dim("ds", &["booking"], TimeGranularity::Day, Some(DatePart::Dow)),
            time_dim("ds", &["booking"], TimeGranularity::Day, None),
        ];
        let p = pattern("TimeDimension('booking__ds', 'day')");
        assert_eq!(
            p.match_specs(&candidates),
            vec![time_dim("ds", &["booking"], TimeGranularity::Day, None)]
        );
    }

    #[test]
    fn unspecified_grain_matches_any_grain() {
        let candidates = vec![
            time_dim("ds", &["booking"], TimeGranularity::Day, None),
            time_dim("ds", &["booking"], TimeGranularity::Month, None),
        ];
        let p = pattern("TimeDimension('booking__ds')");
        assert_eq!(p.match_specs(&candidates).len(), 2);
        let p = pattern("booking__ds__month");
        assert_eq!(
            p.match_specs(&candidates),
            vec![time_dim("ds", &["booking"], TimeGranularity::Month, None)]
        );
    }

    #[test]
    fn plain_dimension_accepts_time_dimensions_but_entity_does_not() {
        let candidates = vec![time_dim("ds", &["booking"], TimeGranularity::Day, None)];
        assert_eq!(pattern("Dimension('booking__ds')").match_specs(&candidates).len(), 1);
        assert!(pattern("Entity('booking__ds')").match_specs(&candidates).is_empty());
    }

    #[test]
    fn metric_pattern_uses_last_group_by_link() {
        let spec: LinkableSpec = GroupByMetricSpec {
            element_name: "bookings".into(),
            entity_links: links(&["listing"]),
            metric_subquery_entity_links: links(&["listing"]),
        }
        .into();
        let candidates = vec![spec.clone(), dim("bookings", &["listing"])];
        let p = pattern("Metric('bookings', group_by=['listing'])");
        assert_eq!(p.match_specs(&candidates), vec![spec]);
    }

    #[test]
    fn partial_match_ranks_by_distance() {
        let candidates = vec![
            dim("country_latest", &["listing"]),
            dim("capacity_latest", &["listing"]),
            dim("home_state", &["listing", "user"]),
            time_dim("ds", &["booking"], TimeGranularity::Day, None),
            time_dim("ds", &["booking"], TimeGranularity::Week, None),
        ];
        let p = pattern("listing__country");
        let suggestions = p.partially_match(&candidates[..3], 2);
        assert_eq!(
            suggestions,
            vec![
                dim("country_latest", &["listing"]),
                dim("capacity_latest", &["listing"])
            ]
        );

        // Time dimensions are suggested once, at their finest grain.
        let p = pattern("booking__dss");
        let suggestions = p.partially_match(&candidates, 10);
        assert_eq!(suggestions[0], time_dim("ds", &["booking"], TimeGranularity::Day, None));
        assert_eq!(suggestions.len(), 4);
    }

    #[test]
    fn whitelist_matches_members_only() {
        let allowed = dim("country", &["listing"]);
        let p = WhitelistSpecPattern::new([allowed.clone()]);
        assert_eq!(
            p.match_specs(&[allowed.clone(), dim("country", &["user"])]),
            vec![allowed]
        );
    }
}
