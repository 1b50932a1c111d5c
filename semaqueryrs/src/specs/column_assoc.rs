//! Mapping from specs to the column names they occupy in generated SQL.

use crate::specs::spec::InstanceSpec;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnAssociation {
    pub column_name: String,
}

pub trait ColumnAssociationResolver {
    fn resolve_spec(&self, spec: &InstanceSpec) -> ColumnAssociation;
}

/// Names columns after the dundered qualified name of the spec, so
/// `TimeDimension('metric_time', 'day')` becomes `metric_time__day`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DunderColumnAssociationResolver;

impl ColumnAssociationResolver for DunderColumnAssociationResolver {
    fn resolve_spec(&self, spec: &InstanceSpec) -> ColumnAssociation {
        let column_name = match spec {
            InstanceSpec::Linkable(linkable) => linkable.qualified_name(),
            InstanceSpec::Measure(measure) => measure.element_name.clone(),
            InstanceSpec::Metric(metric) => metric.output_name().to_string(),
        };
        ColumnAssociation { column_name }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::elements::TimeGranularity;
    use crate::specs::spec::{MeasureSpec, MetricSpec, TimeDimensionSpec};

    #[test]
    fn column_names_follow_qualified_names() {
        let resolver = DunderColumnAssociationResolver;
        let time = InstanceSpec::from(crate::specs::spec::LinkableSpec::from(
            TimeDimensionSpec::metric_time(TimeGranularity::Day),
        ));
        assert_eq!(resolver.resolve_spec(&time).column_name, "metric_time__day");
        assert_eq!(
            resolver
                .resolve_spec(&MeasureSpec::new("booking_value").into())
                .column_name,
            "booking_value"
        );
        let aliased = MetricSpec {
            element_name: "bookings".into(),
            alias: Some("bookings_2_weeks_ago".into()),
        };
        assert_eq!(
            resolver.resolve_spec(&aliased.into()).column_name,
            "bookings_2_weeks_ago"
        );
    }
}
