//! Semantic model types and the read-only lookup the compiler consumes.

pub mod elements;
pub mod linkable;
pub mod lookup;
pub mod manifest;

pub use elements::{
    DatePart, EntityReference, MeasureReference, MetricReference, SemanticModelReference,
    TimeGranularity, METRIC_TIME_ELEMENT_NAME,
};
pub use linkable::{LinkableElement, LinkableElementProperty};
pub use lookup::{ManifestLookup, SemanticModelLookup};
pub use manifest::{SemanticManifest, WhereFilter, WhereFilterIntersection};
