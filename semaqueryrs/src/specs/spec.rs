//! Concrete element specs: what a resolved group-by item, measure or metric is.

use std::fmt;

use serde::Serialize;

use crate::model::elements::{
    DatePart, EntityReference, TimeGranularity, DUNDER, METRIC_TIME_ELEMENT_NAME,
};

/// Kind of a queryable item. Derived ordering is used for sorted kind sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ItemKind {
    Dimension,
    TimeDimension,
    Entity,
    Metric,
}

impl ItemKind {
    pub const ALL: [ItemKind; 4] = [
        ItemKind::Dimension,
        ItemKind::TimeDimension,
        ItemKind::Entity,
        ItemKind::Metric,
    ];

    /// Name of the builder call for this kind (`TimeDimension`).
    pub fn builder_name(&self) -> &'static str {
        match self {
            ItemKind::Dimension => "Dimension",
            ItemKind::TimeDimension => "TimeDimension",
            ItemKind::Entity => "Entity",
            ItemKind::Metric => "Metric",
        }
    }

    pub fn from_builder_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.builder_name() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DimensionSpec {
    pub element_name: String,
    pub entity_links: Vec<EntityReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TimeDimensionSpec {
    pub element_name: String,
    pub entity_links: Vec<EntityReference>,
    pub time_granularity: TimeGranularity,
    pub date_part: Option<DatePart>,
}

impl TimeDimensionSpec {
    pub fn metric_time(time_granularity: TimeGranularity) -> Self {
        Self {
            element_name: METRIC_TIME_ELEMENT_NAME.to_string(),
            entity_links: Vec::new(),
            time_granularity,
            date_part: None,
        }
    }

    pub fn is_metric_time(&self) -> bool {
        self.element_name == METRIC_TIME_ELEMENT_NAME
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntitySpec {
    pub element_name: String,
    pub entity_links: Vec<EntityReference>,
}

/// A metric used as a group-by item, computed in a subquery grouped by
/// `metric_subquery_entity_links` and joined back through `entity_links`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GroupByMetricSpec {
    pub element_name: String,
    pub entity_links: Vec<EntityReference>,
    pub metric_subquery_entity_links: Vec<EntityReference>,
}

/// A candidate group-by item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum LinkableSpec {
    Dimension(DimensionSpec),
    TimeDimension(TimeDimensionSpec),
    Entity(EntitySpec),
    GroupByMetric(GroupByMetricSpec),
}

impl LinkableSpec {
    pub fn element_name(&self) -> &str {
        match self {
            LinkableSpec::Dimension(s) => &s.element_name,
            LinkableSpec::TimeDimension(s) => &s.element_name,
            LinkableSpec::Entity(s) => &s.element_name,
            LinkableSpec::GroupByMetric(s) => &s.element_name,
        }
    }

    pub fn entity_links(&self) -> &[EntityReference] {
        match self {
            LinkableSpec::Dimension(s) => &s.entity_links,
            LinkableSpec::TimeDimension(s) => &s.entity_links,
            LinkableSpec::Entity(s) => &s.entity_links,
            LinkableSpec::GroupByMetric(s) => &s.entity_links,
        }
    }

    pub fn item_kind(&self) -> ItemKind {
        match self {
            LinkableSpec::Dimension(_) => ItemKind::Dimension,
            LinkableSpec::TimeDimension(_) => ItemKind::TimeDimension,
            LinkableSpec::Entity(_) => ItemKind::Entity,
            LinkableSpec::GroupByMetric(_) => ItemKind::Metric,
        }
    }

    pub fn time_granularity(&self) -> Option<TimeGranularity> {
        match self {
            LinkableSpec::TimeDimension(s) => Some(s.time_granularity),
            _ => None,
        }
    }

    pub fn date_part(&self) -> Option<DatePart> {
        match self {
            LinkableSpec::TimeDimension(s) => s.date_part,
            _ => None,
        }
    }

    pub fn metric_subquery_entity_links(&self) -> Option<&[EntityReference]> {
        match self {
            LinkableSpec::GroupByMetric(s) => Some(&s.metric_subquery_entity_links),
            _ => None,
        }
    }

    pub fn is_metric_time(&self) -> bool {
        matches!(self, LinkableSpec::TimeDimension(s) if s.is_metric_time())
    }

    /// Dundered name: links, element, then the grain or `extract_<part>` suffix.
    pub fn qualified_name(&self) -> String {
        let mut parts: Vec<&str> = self.entity_links().iter().map(|l| l.as_str()).collect();
        parts.push(self.element_name());
        let suffix = match self {
            LinkableSpec::TimeDimension(s) => Some(match s.date_part {
                Some(part) => format!("extract_{part}"),
                None => s.time_granularity.as_str().to_string(),
            }),
            _ => None,
        };
        let mut name = parts.join(DUNDER);
        if let Some(suffix) = suffix {
            name.push_str(DUNDER);
            name.push_str(&suffix);
        }
        name
    }

    /// Same element seen through one more join, `entity` becoming the outermost link.
    pub fn with_entity_prefix(&self, entity: &EntityReference) -> LinkableSpec {
        let mut spec = self.clone();
        spec.entity_links_mut().insert(0, entity.clone());
        spec
    }

    /// Same element with the outermost link removed.
    pub fn without_first_entity_link(&self) -> LinkableSpec {
        let mut spec = self.clone();
        let links = spec.entity_links_mut();
        if !links.is_empty() {
            links.remove(0);
        }
        spec
    }

    fn entity_links_mut(&mut self) -> &mut Vec<EntityReference> {
        match self {
            LinkableSpec::Dimension(s) => &mut s.entity_links,
            LinkableSpec::TimeDimension(s) => &mut s.entity_links,
            LinkableSpec::Entity(s) => &mut s.entity_links,
            LinkableSpec::GroupByMetric(s) => &mut s.entity_links,
        }
    }
}

impl fmt::Display for LinkableSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

impl From<DimensionSpec> for LinkableSpec {
    fn from(spec: DimensionSpec) -> Self {
        LinkableSpec::Dimension(spec)
    }
}

impl From<TimeDimensionSpec> for LinkableSpec {
    fn from(spec: TimeDimensionSpec) -> Self {
        LinkableSpec::TimeDimension(spec)
    }
}

impl From<EntitySpec> for LinkableSpec {
    fn from(spec: EntitySpec) -> Self {
        LinkableSpec::Entity(spec)
    }
}

impl From<GroupByMetricSpec> for LinkableSpec {
    fn from(spec: GroupByMetricSpec) -> Self {
        LinkableSpec::GroupByMetric(spec)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MeasureSpec {
    pub element_name: String,
}

impl MeasureSpec {
    pub fn new(element_name: impl Into<String>) -> Self {
        Self {
            element_name: element_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MetricSpec {
    pub element_name: String,
    pub alias: Option<String>,
}

impl MetricSpec {
    pub fn new(element_name: impl Into<String>) -> Self {
        Self {
            element_name: element_name.into(),
            alias: None,
        }
    }

    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.element_name)
    }
}

/// Anything that can appear as a column in an intermediate data set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum InstanceSpec {
    Measure(MeasureSpec),
    Metric(MetricSpec),
    Linkable(LinkableSpec),
}

impl InstanceSpec {
    pub fn as_linkable(&self) -> Option<&LinkableSpec> {
        match self {
            InstanceSpec::Linkable(spec) => Some(spec),
            _ => None,
        }
    }
}

impl From<LinkableSpec> for InstanceSpec {
    fn from(spec: LinkableSpec) -> Self {
        InstanceSpec::Linkable(spec)
    }
}

impl From<MeasureSpec> for InstanceSpec {
    fn from(spec: MeasureSpec) -> Self {
        InstanceSpec::Measure(spec)
    }
}

impl From<MetricSpec> for InstanceSpec {
    fn from(spec: MetricSpec) -> Self {
        InstanceSpec::Metric(spec)
    }
}

/// Sort direction plus the item being ordered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OrderBySpec {
    pub instance: InstanceSpec,
    pub descending: bool,
}

pub(crate) fn links_from_names<S: AsRef<str>>(names: &[S]) -> Vec<EntityReference> {
    names
        .iter()
        .map(|n| EntityReference::new(n.as_ref()))
        .collect()
}
