//! Candidate specs, patterns that select among them, and column naming.

pub mod column_assoc;
pub mod pattern;
pub mod similarity;
pub mod spec;

pub use column_assoc::{ColumnAssociation, ColumnAssociationResolver, DunderColumnAssociationResolver};
pub use pattern::{EntityLinkPattern, EntityLinkPatternParameterSet, SpecPattern, WhitelistSpecPattern};
pub use spec::{
    DimensionSpec, EntitySpec, GroupByMetricSpec, InstanceSpec, ItemKind, LinkableSpec,
    MeasureSpec, MetricSpec, OrderBySpec, TimeDimensionSpec,
};
