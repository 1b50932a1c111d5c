//! Enumeration of the group-by items reachable from a measure through entity joins.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::model::elements::{DatePart, EntityReference, SemanticModelReference};
use crate::model::manifest::{Dimension, Measure, Metric, MetricType, SemanticModel};
use crate::specs::spec::{
    DimensionSpec, EntitySpec, GroupByMetricSpec, LinkableSpec, TimeDimensionSpec,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum LinkableElementProperty {
    /// Defined in the measure's own semantic model.
    Local,
    /// Reached through at least one entity join.
    Joined,
    /// Reached through more than one entity join.
    MultiHop,
    MetricTime,
    DatePart,
    /// A metric computed in a subquery and used as a group-by item.
    Metric,
}

/// A candidate spec together with where it comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LinkableElement {
    pub spec: LinkableSpec,
    /// `None` for `metric_time`, which is not owned by a single model.
    pub defined_in: Option<SemanticModelReference>,
    pub properties: BTreeSet<LinkableElementProperty>,
}

pub struct LinkableElementEnumerator<'a> {
    models: &'a [SemanticModel],
    metrics: &'a [Metric],
    max_entity_hops: usize,
}

impl<'a> LinkableElementEnumerator<'a> {
    pub fn new(models: &'a [SemanticModel], metrics: &'a [Metric], max_entity_hops: usize) -> Self {
        Self {
            models,
            metrics,
            max_entity_hops,
        }
    }

    pub fn for_measure(&self, model: &SemanticModel, measure: &Measure) -> Vec<LinkableElement> {
        let mut out = Vec::new();
        self.push_local(model, &mut out);

        if let Some(agg_time) = model.agg_time_dimension_for(measure) {
            push_time_dimension(
                crate::model::elements::METRIC_TIME_ELEMENT_NAME,
                agg_time,
                &[],
                None,
                props(&[LinkableElementProperty::MetricTime]),
                &mut out,
            );
        }

        let mut visited = vec![model.name.as_str()];
        self.push_joined(model, &[], &mut visited, &mut out);
        self.push_group_by_metrics(model, &mut out);

        out.sort();
        out.dedup();
        tracing::trace!(
            measure = %measure.name,
            elements = out.len(),
            "enumerated linkable elements"
        );
        out
    }

    /// Local elements of every model, for queries without metrics.
    pub fn for_no_metrics_query(&self) -> Vec<LinkableElement> {
        let mut out = Vec::new();
        for model in self.models {
            self.push_local(model, &mut out);
        }
        out.sort();
        out.dedup();
        out
    }

    fn push_local(&self, model: &SemanticModel, out: &mut Vec<LinkableElement>) {
        let local = props(&[LinkableElementProperty::Local]);
        for entity in model.identifying_entities() {
            let links = vec![entity.reference()];
            push_dimensions(model, &links, local.clone(), out);
        }
        for entity in &model.entities {
            out.push(LinkableElement {
                spec: EntitySpec {
                    element_name: entity.name.clone(),
                    entity_links: Vec::new(),
                }
                .into(),
                defined_in: Some(model.reference()),
                properties: local.clone(),
            });
        }
    }

    fn push_joined<'m>(
        &'m self,
        from: &SemanticModel,
        prefix: &[EntityReference],
        visited: &mut Vec<&'m str>,
        out: &mut Vec<LinkableElement>,
    ) {
        if prefix.len() >= self.max_entity_hops {
            return;
        }
        for entity in &from.entities {
            let join_entity = entity.reference();
            if prefix.contains(&join_entity) {
                continue;
            }
            for target in self.models {
                if visited.contains(&target.name.as_str())
                    || !target.has_identifying_entity(&join_entity)
                {
                    continue;
                }
                let mut links = prefix.to_vec();
                links.push(join_entity.clone());

                let mut properties = props(&[LinkableElementProperty::Joined]);
                if links.len() > 1 {
                    properties.insert(LinkableElementProperty::MultiHop);
                }
                push_dimensions(target, &links, properties.clone(), out);
                for other in target.entities.iter().filter(|e| e.name != entity.name) {
                    out.push(LinkableElement {
                        spec: EntitySpec {
                            element_name: other.name.clone(),
                            entity_links: links.clone(),
                        }
                        .into(),
                        defined_in: Some(target.reference()),
                        properties: properties.clone(),
                    });
                }

                visited.push(target.name.as_str());
                self.push_joined(target, &links, visited, out);
                visited.pop();
            }
        }
    }

    fn push_group_by_metrics(&self, model: &SemanticModel, out: &mut Vec<LinkableElement>) {
        for entity in &model.entities {
            for metric in self.metrics {
                if metric.metric_type != MetricType::Simple {
                    continue;
                }
                let Some(input) = metric.input_measures().first().copied() else {
                    continue;
                };
                let owner = self
                    .models
                    .iter()
                    .find(|m| m.get_measure(&input.name).is_some());
                let Some(owner) = owner else { continue };
                if owner.get_entity(&entity.name).is_none() {
                    continue;
                }
                let links = vec![entity.reference()];
                out.push(LinkableElement {
                    spec: GroupByMetricSpec {
                        element_name: metric.name.clone(),
                        entity_links: links.clone(),
                        metric_subquery_entity_links: links,
                    }
                    .into(),
                    defined_in: Some(owner.reference()),
                    properties: props(&[
                        LinkableElementProperty::Joined,
                        LinkableElementProperty::Metric,
                    ]),
                });
            }
        }
    }
}

fn props(items: &[LinkableElementProperty]) -> BTreeSet<LinkableElementProperty> {
    items.iter().copied().collect()
}

fn push_dimensions(
    model: &SemanticModel,
    links: &[EntityReference],
    properties: BTreeSet<LinkableElementProperty>,
    out: &mut Vec<LinkableElement>,
) {
    for dimension in &model.dimensions {
        if dimension.is_time() {
            push_time_dimension(
                &dimension.name,
                dimension,
                links,
                Some(model.reference()),
                properties.clone(),
                out,
            );
        } else {
            out.push(LinkableElement {
                spec: DimensionSpec {
                    element_name: dimension.name.clone(),
                    entity_links: links.to_vec(),
                }
                .into(),
                defined_in: Some(model.reference()),
                properties: properties.clone(),
            });
        }
    }
}

/// One spec per grain at or above the defined grain, plus one per extractable date part.
fn push_time_dimension(
    element_name: &str,
    dimension: &Dimension,
    links: &[EntityReference],
    defined_in: Option<SemanticModelReference>,
    properties: BTreeSet<LinkableElementProperty>,
    out: &mut Vec<LinkableElement>,
) {
    let defined = dimension.defined_granularity();
    for granularity in defined.coarser_or_equal() {
        out.push(LinkableElement {
            spec: TimeDimensionSpec {
                element_name: element_name.to_string(),
                entity_links: links.to_vec(),
                time_granularity: granularity,
                date_part: None,
            }
            .into(),
            defined_in: defined_in.clone(),
            properties: properties.clone(),
        });
    }
    for date_part in DatePart::ALL {
        if !date_part.is_compatible_with(defined) {
            continue;
        }
        let mut properties = properties.clone();
        properties.insert(LinkableElementProperty::DatePart);
        out.push(LinkableElement {
            spec: TimeDimensionSpec {
                element_name: element_name.to_string(),
                entity_links: links.to_vec(),
                time_granularity: defined,
                date_part: Some(date_part),
            }
            .into(),
            defined_in: defined_in.clone(),
            properties,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::manifest::SemanticManifest;

    fn manifest() -> SemanticManifest {
        SemanticManifest::from_yaml(
            r#"
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
      - {name: country_latest, type: categorical}
  - name: users_source
    node_relation: dim_users
    entities:
      - {name: user, type: primary}
    dimensions:
      - {name: home_state, type: categorical}
metrics:
  - name: bookings
    type: simple
    type_params: {measure: bookings}
"#,
        )
        .unwrap()
    }

    fn names(elements: &[LinkableElement]) -> Vec<String> {
        elements.iter().map(|e| e.spec.qualified_name()).collect()
    }

    #[test]
    fn enumerates_local_joined_and_multi_hop_elements() {
        let manifest = manifest();
        let enumerator =
            LinkableElementEnumerator::new(&manifest.semantic_models, &manifest.metrics, 2);
        let model = &manifest.semantic_models[0];
        let elements = enumerator.for_measure(model, &model.measures[0]);
        let names = names(&elements);

        assert!(names.contains(&"booking__is_instant".to_string()));
        assert!(names.contains(&"booking__ds__month".to_string()));
        assert!(names.contains(&"metric_time__day".to_string()));
        assert!(names.contains(&"metric_time__extract_dow".to_string()));
        assert!(names.contains(&"listing__country_latest".to_string()));
        assert!(names.contains(&"listing__user__home_state".to_string()));
        assert!(names.contains(&"listing__user".to_string()));
        assert!(names.contains(&"listing__bookings".to_string()));
        // Grains finer than the defined grain are never offered.
        assert!(!names.contains(&"metric_time__hour".to_string()));

        let multi_hop = elements
            .iter()
            .find(|e| e.spec.qualified_name() == "listing__user__home_state")
            .unwrap();
        assert!(multi_hop
            .properties
            .contains(&LinkableElementProperty::MultiHop));
    }

    #[test]
    fn hop_limit_stops_enumeration() {
        let manifest = manifest();
        let enumerator =
            LinkableElementEnumerator::new(&manifest.semantic_models, &manifest.metrics, 1);
        let model = &manifest.semantic_models[0];
        let names = names(&enumerator.for_measure(model, &model.measures[0]));
        assert!(names.contains(&"listing__country_latest".to_string()));
        assert!(!names.contains(&"listing__user__home_state".to_string()));
    }
}
