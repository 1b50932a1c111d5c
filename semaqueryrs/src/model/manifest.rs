//! Inert semantic model definitions: semantic models, measures and metrics.
//!
//! These types only describe the model. Loading from YAML/JSON is a thin serde
//! layer; validation of the model itself happens upstream.

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::model::elements::{
    EntityReference, MeasureReference, MetricReference, SemanticModelReference, TimeGranularity,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SemanticManifest {
    #[serde(default)]
    pub semantic_models: Vec<SemanticModel>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
}

impl SemanticManifest {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SemanticModel {
    pub name: String,
    /// Physical table backing the model.
    pub node_relation: String,
    #[serde(default)]
    pub defaults: ModelDefaults,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub measures: Vec<Measure>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelDefaults {
    pub agg_time_dimension: Option<String>,
}

impl SemanticModel {
    pub fn reference(&self) -> SemanticModelReference {
        SemanticModelReference::new(&self.name)
    }

    pub fn get_entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn get_dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn get_measure(&self, name: &str) -> Option<&Measure> {
        self.measures.iter().find(|m| m.name == name)
    }

    /// Entities whose value identifies at most one row of this model.
    pub fn identifying_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|e| e.entity_type.is_identifying())
    }

    pub fn has_identifying_entity(&self, entity: &EntityReference) -> bool {
        self.identifying_entities().any(|e| e.name == entity.element_name)
    }

    /// The time dimension a measure aggregates against, if any.
    pub fn agg_time_dimension_for(&self, measure: &Measure) -> Option<&Dimension> {
        let name = measure
            .agg_time_dimension
            .as_deref()
            .or(self.defaults.agg_time_dimension.as_deref())?;
        self.get_dimension(name)
            .filter(|d| d.dimension_type == DimensionType::Time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Primary,
    Unique,
    Natural,
    Foreign,
}

impl EntityType {
    pub fn is_identifying(&self) -> bool {
        !matches!(self, EntityType::Foreign)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub expr: Option<String>,
}

impl Entity {
    pub fn reference(&self) -> EntityReference {
        EntityReference::new(&self.name)
    }

    pub fn expr(&self) -> &str {
        self.expr.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionType {
    Categorical,
    Time,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dimension {
    pub name: String,
    #[serde(rename = "type")]
    pub dimension_type: DimensionType,
    pub expr: Option<String>,
    /// Grain the column is stored at; time dimensions default to day.
    pub time_granularity: Option<TimeGranularity>,
}

impl Dimension {
    pub fn expr(&self) -> &str {
        self.expr.as_deref().unwrap_or(&self.name)
    }

    pub fn is_time(&self) -> bool {
        self.dimension_type == DimensionType::Time
    }

    pub fn defined_granularity(&self) -> TimeGranularity {
        self.time_granularity.unwrap_or(TimeGranularity::Day)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationType {
    Sum,
    Count,
    CountDistinct,
    Min,
    Max,
    Average,
    SumBoolean,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Measure {
    pub name: String,
    pub agg: AggregationType,
    pub expr: Option<String>,
    pub agg_time_dimension: Option<String>,
}

impl Measure {
    pub fn reference(&self) -> MeasureReference {
        MeasureReference::new(&self.name)
    }

    pub fn expr(&self) -> &str {
        self.expr.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Simple,
    Ratio,
    Derived,
    /// Running total over `metric_time`.
    Cumulative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metric {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    #[serde(default)]
    pub type_params: MetricTypeParams,
    pub filter: Option<WhereFilterIntersection>,
    pub description: Option<String>,
}

impl Metric {
    pub fn reference(&self) -> MetricReference {
        MetricReference::new(&self.name)
    }

    pub fn input_measures(&self) -> Vec<&MetricInputMeasure> {
        match self.metric_type {
            MetricType::Simple | MetricType::Cumulative => {
                self.type_params.measure.iter().collect()
            }
            MetricType::Ratio | MetricType::Derived => Vec::new(),
        }
    }

    /// Input metrics in declaration order; ratios list numerator then denominator.
    pub fn input_metrics(&self) -> Vec<&MetricInput> {
        match self.metric_type {
            MetricType::Simple | MetricType::Cumulative => Vec::new(),
            MetricType::Ratio => self
                .type_params
                .numerator
                .iter()
                .chain(self.type_params.denominator.iter())
                .collect(),
            MetricType::Derived => self.type_params.metrics.iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricTypeParams {
    pub measure: Option<MetricInputMeasure>,
    pub numerator: Option<MetricInput>,
    pub denominator: Option<MetricInput>,
    pub expr: Option<String>,
    #[serde(default)]
    pub metrics: Vec<MetricInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricInputMeasure {
    pub name: String,
    pub filter: Option<WhereFilterIntersection>,
}

impl MetricInputMeasure {
    pub fn reference(&self) -> MeasureReference {
        MeasureReference::new(&self.name)
    }
}

impl<'de> Deserialize<'de> for MetricInputMeasure {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::String(name) => Ok(MetricInputMeasure { name, filter: None }),
            other => {
                #[derive(Deserialize)]
                #[serde(deny_unknown_fields)]
                struct Full {
                    name: String,
                    filter: Option<WhereFilterIntersection>,
                }
                let full = Full::deserialize(other).map_err(de::Error::custom)?;
                Ok(MetricInputMeasure {
                    name: full.name,
                    filter: full.filter,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricInput {
    pub name: String,
    pub filter: Option<WhereFilterIntersection>,
    pub alias: Option<String>,
    pub offset_window: Option<OffsetWindow>,
}

impl MetricInput {
    pub fn reference(&self) -> MetricReference {
        MetricReference::new(&self.name)
    }
}

impl<'de> Deserialize<'de> for MetricInput {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::String(name) => Ok(MetricInput {
                name,
                filter: None,
                alias: None,
                offset_window: None,
            }),
            other => {
                #[derive(Deserialize)]
                #[serde(deny_unknown_fields)]
                struct Full {
                    name: String,
                    filter: Option<WhereFilterIntersection>,
                    alias: Option<String>,
                    offset_window: Option<OffsetWindow>,
                }
                let full = Full::deserialize(other).map_err(de::Error::custom)?;
                Ok(MetricInput {
                    name: full.name,
                    filter: full.filter,
                    alias: full.alias,
                    offset_window: full.offset_window,
                })
            }
        }
    }
}

/// Time shift applied to an input metric, written as `"2 weeks"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct OffsetWindow {
    pub count: u32,
    pub granularity: TimeGranularity,
}

impl OffsetWindow {
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split_whitespace();
        let count = parts.next()?.parse().ok()?;
        let unit = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        let unit = unit.strip_suffix('s').unwrap_or(unit);
        Some(OffsetWindow {
            count,
            granularity: TimeGranularity::from_name(unit)?,
        })
    }
}

impl<'de> Deserialize<'de> for OffsetWindow {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        OffsetWindow::parse(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid offset window '{raw}'")))
    }
}

/// A single where filter as written by the user, with `{{ ... }}` callouts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WhereFilter {
    pub where_sql_template: String,
}

impl WhereFilter {
    pub fn new(where_sql_template: impl Into<String>) -> Self {
        Self {
            where_sql_template: where_sql_template.into(),
        }
    }
}

/// Filters that must all hold. Deserializes from one template or a list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct WhereFilterIntersection {
    pub where_filters: Vec<WhereFilter>,
}

impl WhereFilterIntersection {
    pub fn from_templates<S: Into<String>>(templates: impl IntoIterator<Item = S>) -> Self {
        Self {
            where_filters: templates.into_iter().map(WhereFilter::new).collect(),
        }
    }
}

impl<'de> Deserialize<'de> for WhereFilterIntersection {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }
        let where_filters = match Raw::deserialize(deserializer)? {
            Raw::One(template) => vec![WhereFilter::new(template)],
            Raw::Many(templates) => templates.into_iter().map(WhereFilter::new).collect(),
        };
        Ok(WhereFilterIntersection { where_filters })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_metrics_with_shorthand_inputs() {
        let yaml = r#"
semantic_models: []
metrics:
  - name: bookings
    type: simple
    type_params:
      measure: bookings
  - name: bookings_growth_2_weeks
    type: derived
    filter: "{{ Dimension('booking__is_instant') }}"
    type_params:
      expr: bookings - bookings_2_weeks_ago
      metrics:
        - bookings
        - name: bookings
          alias: bookings_2_weeks_ago
          offset_window: 2 weeks
"#;
        let manifest = SemanticManifest::from_yaml(yaml).unwrap();
        let derived = &manifest.metrics[1];
        let inputs = derived.input_metrics();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[1].alias.as_deref(), Some("bookings_2_weeks_ago"));
        assert_eq!(
            inputs[1].offset_window,
            Some(OffsetWindow {
                count: 2,
                granularity: TimeGranularity::Week
            })
        );
        assert_eq!(derived.filter.as_ref().unwrap().where_filters.len(), 1);
        assert_eq!(manifest.metrics[0].input_measures()[0].name, "bookings");
    }

    #[test]
    fn rejects_bad_offset_window() {
        assert!(OffsetWindow::parse("two weeks").is_none());
        assert!(OffsetWindow::parse("2 fortnights").is_none());
        assert_eq!(
            OffsetWindow::parse("1 day").map(|w| w.granularity),
            Some(TimeGranularity::Day)
        );
    }

    #[test]
    fn agg_time_dimension_falls_back_to_model_default() {
        let json = r#"{
            "semantic_models": [{
                "name": "bookings_source",
                "node_relation": "fct_bookings",
                "defaults": {"agg_time_dimension": "ds"},
                "entities": [{"name": "booking", "type": "primary"}],
                "dimensions": [{"name": "ds", "type": "time"}],
                "measures": [{"name": "bookings", "agg": "sum", "expr": "1"}]
            }]
        }"#;
        let manifest = SemanticManifest::from_json(json).unwrap();
        let model = &manifest.semantic_models[0];
        let measure = model.get_measure("bookings").unwrap();
        let dim = model.agg_time_dimension_for(measure).unwrap();
        assert_eq!(dim.name, "ds");
        assert_eq!(dim.defined_granularity(), TimeGranularity::Day);
    }
}
