//! Group-by item resolution through the query parser.

mod common;

use semaquery::model::{DatePart, EntityReference, TimeGranularity};
use semaquery::resolution::QueryRequest;
use semaquery::specs::{LinkableSpec, TimeDimensionSpec};
use semaquery::SemaqueryError;

fn invalid_query_report(request: QueryRequest) -> String {
    let lookup = common::lookup();
    match common::parse(&lookup, &request) {
        Err(SemaqueryError::InvalidQuery(report)) => report,
        other => panic!("expected an invalid query, got {other:?}"),
    }
}

#[test]
fn suffix_links_resolve_to_the_multi_hop_path() {
    let lookup = common::lookup();
    let query = common::parse(
        &lookup,
        &QueryRequest::new(["bookings"]).group_by(["user__home_country"]),
    )
    .unwrap();
    assert_eq!(query.group_by_specs.len(), 1);
    assert_eq!(
        query.group_by_specs[0].qualified_name(),
        "listing__user__home_country"
    );
    assert_eq!(
        query.group_by_specs[0].entity_links(),
        &[EntityReference::new("listing"), EntityReference::new("user")]
    );
}

#[test]
fn bare_name_needs_its_entity_link() {
    let report = invalid_query_report(QueryRequest::new(["bookings"]).group_by(["country"]));
    assert!(report.contains("Query Input:\n    country"));
    assert!(report.contains("does not match any of the available group-by-items"));
    assert!(!report.contains("matches more than one group-by-item"));
}

#[test]
fn explicit_link_removes_the_ambiguity() {
    let lookup = common::lookup();
    let query = common::parse(
        &lookup,
        &QueryRequest::new(["bookings"]).group_by(["guest__country"]),
    )
    .unwrap();
    assert_eq!(query.group_by_specs[0].qualified_name(), "guest__country");
}

#[test]
fn unspecified_grain_picks_the_finest_and_excludes_date_parts() {
    let lookup = common::lookup();
    let query = common::parse(
        &lookup,
        &QueryRequest::new(["bookings"]).group_by(["TimeDimension('metric_time')"]),
    )
    .unwrap();
    assert_eq!(
        query.group_by_specs,
        vec![LinkableSpec::TimeDimension(TimeDimensionSpec::metric_time(
            TimeGranularity::Day
        ))]
    );
}

#[test]
fn date_part_must_be_requested_explicitly() {
    let lookup = common::lookup();
    let query = common::parse(
        &lookup,
        &QueryRequest::new(["bookings"]).group_by(["metric_time__extract_dow"]),
    )
    .unwrap();
    assert_eq!(query.group_by_specs[0].date_part(), Some(DatePart::Dow));
}

#[test]
fn explicit_grain_is_respected() {
    let lookup = common::lookup();
    let query = common::parse(
        &lookup,
        &QueryRequest::new(["bookings"]).group_by(["booking__ds__month"]),
    )
    .unwrap();
    assert_eq!(
        query.group_by_specs[0].time_granularity(),
        Some(TimeGranularity::Month)
    );
}

#[test]
fn unknown_items_carry_suggestions_and_the_input_verbatim() {
    let report = invalid_query_report(QueryRequest::new(["bookings"]).group_by(["listing__countryy"]));
    assert!(report.contains("listing__countryy"));
    assert!(report.contains("does not match any of the available group-by-items"));
    assert!(report.contains("Suggestions:"));
    assert!(report.contains("listing__country"));
}

#[test]
fn group_by_metric_requires_a_single_group_by_link() {
    let report = invalid_query_report(
        QueryRequest::new(["bookings"]).group_by(["Metric('bookings', group_by=['listing', 'guest'])"]),
    );
    assert!(report.contains("could not be parsed"));
}

#[test]
fn group_by_metric_resolves() {
    let lookup = common::lookup();
    let query = common::parse(
        &lookup,
        &QueryRequest::new(["booking_value"]).group_by(["Metric('bookings', group_by=['listing'])"]),
    )
    .unwrap();
    assert!(matches!(
        &query.group_by_specs[0],
        LinkableSpec::GroupByMetric(spec) if spec.element_name == "bookings"
    ));
}

#[test]
fn every_error_is_reported_at_once() {
    let report = invalid_query_report(
        QueryRequest::new(["bookings"])
            .group_by(["country", "listing__nope"])
            .order_by(["metric_time__day"]),
    );
    assert!(report.contains("Error #1:"));
    assert!(report.contains("Error #2:"));
    assert!(report.contains("Error #3:"));
}

#[test]
fn unknown_metric_gets_closest_names() {
    let report = invalid_query_report(QueryRequest::new(["bookingz"]));
    assert!(report.contains("does not match any of the available metrics"));
    assert!(report.contains("\"bookings\""));
}
