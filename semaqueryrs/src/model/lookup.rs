use std::collections::HashMap;

use crate::model::elements::{MeasureReference, MetricReference, SemanticModelReference};
use crate::model::linkable::{LinkableElement, LinkableElementEnumerator};
use crate::model::manifest::{Measure, Metric, SemanticManifest, SemanticModel};

/// Read-only access to the semantic model used during compilation.
pub trait SemanticModelLookup {
    fn get_metric(&self, metric: &MetricReference) -> Option<&Metric>;

    /// The measure together with the semantic model that defines it.
    fn get_measure(&self, measure: &MeasureReference) -> Option<(&SemanticModel, &Measure)>;

    fn get_semantic_model(&self, model: &SemanticModelReference) -> Option<&SemanticModel>;

    fn semantic_models(&self) -> &[SemanticModel];

    fn metrics(&self) -> &[Metric];

    /// Group-by items available when aggregating the given measure.
    fn linkable_elements_for_measure(&self, measure: &MeasureReference) -> &[LinkableElement];

    /// Group-by items available to a query that requests no metrics.
    fn linkable_elements_for_no_metrics_query(&self) -> &[LinkableElement];
}

/// [`SemanticModelLookup`] over an in-memory manifest, indexed by name.
pub struct ManifestLookup {
    manifest: SemanticManifest,
    metric_index: HashMap<String, usize>,
    measure_index: HashMap<String, (usize, usize)>,
    model_index: HashMap<String, usize>,
    measure_elements: HashMap<String, Vec<LinkableElement>>,
    no_metrics_elements: Vec<LinkableElement>,
}

impl ManifestLookup {
    pub fn new(manifest: SemanticManifest, max_entity_hops: usize) -> Self {
        let metric_index = manifest
            .metrics
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name.clone(), i))
            .collect();
        let model_index = manifest
            .semantic_models
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name.clone(), i))
            .collect();

        let mut measure_index = HashMap::new();
        let mut measure_elements = HashMap::new();
        let enumerator = LinkableElementEnumerator::new(
            &manifest.semantic_models,
            &manifest.metrics,
            max_entity_hops,
        );
        for (model_idx, model) in manifest.semantic_models.iter().enumerate() {
            for (measure_idx, measure) in model.measures.iter().enumerate() {
                measure_index.insert(measure.name.clone(), (model_idx, measure_idx));
                measure_elements.insert(
                    measure.name.clone(),
                    enumerator.for_measure(model, measure),
                );
            }
        }
        let no_metrics_elements = enumerator.for_no_metrics_query();

        tracing::debug!(
            models = manifest.semantic_models.len(),
            metrics = manifest.metrics.len(),
            measures = measure_index.len(),
            "indexed semantic manifest"
        );

        Self {
            manifest,
            metric_index,
            measure_index,
            model_index,
            measure_elements,
            no_metrics_elements,
        }
    }

    pub fn manifest(&self) -> &SemanticManifest {
        &self.manifest
    }
}

impl SemanticModelLookup for ManifestLookup {
    fn get_metric(&self, metric: &MetricReference) -> Option<&Metric> {
        let idx = self.metric_index.get(metric.as_str())?;
        self.manifest.metrics.get(*idx)
    }

    fn get_measure(&self, measure: &MeasureReference) -> Option<(&SemanticModel, &Measure)> {
        let (model_idx, measure_idx) = self.measure_index.get(measure.as_str())?;
        let model = self.manifest.semantic_models.get(*model_idx)?;
        Some((model, model.measures.get(*measure_idx)?))
    }

    fn get_semantic_model(&self, model: &SemanticModelReference) -> Option<&SemanticModel> {
        let idx = self.model_index.get(model.as_str())?;
        self.manifest.semantic_models.get(*idx)
    }

    fn semantic_models(&self) -> &[SemanticModel] {
        &self.manifest.semantic_models
    }

    fn metrics(&self) -> &[Metric] {
        &self.manifest.metrics
    }

    fn linkable_elements_for_measure(&self, measure: &MeasureReference) -> &[LinkableElement] {
        self.measure_elements
            .get(measure.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn linkable_elements_for_no_metrics_query(&self) -> &[LinkableElement] {
        &self.no_metrics_elements
    }
}
