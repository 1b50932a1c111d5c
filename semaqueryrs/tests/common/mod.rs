//! Shared semantic manifest for integration tests.
#![allow(dead_code)]

use semaquery::config::SemaqueryConfig;
use semaquery::model::{ManifestLookup, SemanticManifest};
use semaquery::naming::DescriptorCache;
use semaquery::resolution::{QueryParser, QueryRequest, QuerySpec};
use semaquery::specs::DunderColumnAssociationResolver;
use serde_json::json;

pub fn manifest() -> SemanticManifest {
    let value = json!({
        "semantic_models": [
            {
                "name": "bookings_source",
                "node_relation": "main.fct_bookings",
                "defaults": {"agg_time_dimension": "ds"},
                "entities": [
                    {"name": "booking", "type": "primary"},
                    {"name": "listing", "type": "foreign"},
                    {"name": "guest", "type": "foreign"}
                ],
                "dimensions": [
                    {"name": "ds", "type": "time", "time_granularity": "day"},
                    {"name": "is_instant", "type": "categorical"}
                ],
                "measures": [
                    {"name": "bookings", "agg": "sum", "expr": "1"},
                    {"name": "booking_value", "agg": "sum"}
                ]
            },
            {
                "name": "listings_source",
                "node_relation": "main.dim_listings",
                "entities": [
                    {"name": "listing", "type": "primary"},
                    {"name": "user", "type": "foreign"}
                ],
                "dimensions": [
                    {"name": "country", "type": "categorical"},
                    {"name": "created_at", "type": "time"}
                ]
            },
            {
                "name": "users_source",
                "node_relation": "main.dim_users",
                "entities": [{"name": "user", "type": "primary"}],
                "dimensions": [{"name": "home_country", "type": "categorical"}]
            },
            {
                "name": "guests_source",
                "node_relation": "main.dim_guests",
                "entities": [{"name": "guest", "type": "primary"}],
                "dimensions": [{"name": "country", "type": "categorical"}]
            }
        ],
        "metrics": [
            {"name": "bookings", "type": "simple", "type_params": {"measure": "bookings"}},
            {"name": "booking_value", "type": "simple", "type_params": {"measure": "booking_value"}},
            {
                "name": "instant_bookings",
                "type": "simple",
                "filter": "{{ Dimension('booking__is_instant') }}",
                "type_params": {"measure": "bookings"}
            },
            {
                "name": "us_booking_value",
                "type": "simple",
                "type_params": {
                    "measure": {
                        "name": "booking_value",
                        "filter": "{{ Dimension('listing__country') }} = 'US'"
                    }
                }
            },
            {
                "name": "bookings_growth_2_weeks",
                "type": "derived",
                "type_params": {
                    "expr": "bookings - bookings_2_weeks_ago",
                    "metrics": [
                        "bookings",
                        {"name": "bookings", "alias": "bookings_2_weeks_ago", "offset_window": "2 weeks"}
                    ]
                }
            },
            {
                "name": "instant_share",
                "type": "ratio",
                "type_params": {
                    "numerator": {"name": "bookings", "filter": "{{ Dimension('booking__is_instant') }}"},
                    "denominator": "bookings"
                }
            },
            {"name": "cumulative_bookings", "type": "cumulative", "type_params": {"measure": "bookings"}},
            {
                "name": "broken_filter_bookings",
                "type": "simple",
                "filter": "{{ Dimension('listing__nope') }} = 1",
                "type_params": {"measure": "bookings"}
            },
            {
                "name": "broken_derived",
                "type": "derived",
                "type_params": {
                    "expr": "broken_filter_bookings * 2",
                    "metrics": ["broken_filter_bookings"]
                }
            }
        ]
    });
    serde_json::from_value(value).expect("fixture manifest deserializes")
}

pub fn lookup() -> ManifestLookup {
    ManifestLookup::new(manifest(), 2)
}

pub fn parse(lookup: &ManifestLookup, request: &QueryRequest) -> semaquery::Result<QuerySpec> {
    let config = SemaqueryConfig::default();
    let mut cache = DescriptorCache::new();
    QueryParser::new(lookup, &DunderColumnAssociationResolver, &config).parse(request, &mut cache)
}
