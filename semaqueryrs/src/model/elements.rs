//! Element vocabulary shared by the semantic model, item descriptors and specs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Element name reserved for the query-level aggregation time dimension.
pub const METRIC_TIME_ELEMENT_NAME: &str = "metric_time";

/// Separator used in dundered names (`booking__ds__day`).
pub const DUNDER: &str = "__";

/// Time granularities ordered from finest to coarsest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TimeGranularity {
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGranularity {
    pub const ALL: [TimeGranularity; 11] = [
        TimeGranularity::Nanosecond,
        TimeGranularity::Microsecond,
        TimeGranularity::Millisecond,
        TimeGranularity::Second,
        TimeGranularity::Minute,
        TimeGranularity::Hour,
        TimeGranularity::Day,
        TimeGranularity::Week,
        TimeGranularity::Month,
        TimeGranularity::Quarter,
        TimeGranularity::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeGranularity::Nanosecond => "nanosecond",
            TimeGranularity::Microsecond => "microsecond",
            TimeGranularity::Millisecond => "millisecond",
            TimeGranularity::Second => "second",
            TimeGranularity::Minute => "minute",
            TimeGranularity::Hour => "hour",
            TimeGranularity::Day => "day",
            TimeGranularity::Week => "week",
            TimeGranularity::Month => "month",
            TimeGranularity::Quarter => "quarter",
            TimeGranularity::Year => "year",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<Self> {
        let lowered = name.to_ascii_lowercase();
        Self::ALL.into_iter().find(|g| g.as_str() == lowered)
    }

    /// Granularities at least as coarse as `self`, finest first.
    pub fn coarser_or_equal(&self) -> impl Iterator<Item = TimeGranularity> + '_ {
        Self::ALL.into_iter().filter(move |g| g >= self)
    }
}

impl fmt::Display for TimeGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parts that can be extracted from a time dimension.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DatePart {
    Year,
    Quarter,
    Month,
    Day,
    Dow,
    Doy,
}

impl DatePart {
    pub const ALL: [DatePart; 6] = [
        DatePart::Year,
        DatePart::Quarter,
        DatePart::Month,
        DatePart::Day,
        DatePart::Dow,
        DatePart::Doy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatePart::Year => "year",
            DatePart::Quarter => "quarter",
            DatePart::Month => "month",
            DatePart::Day => "day",
            DatePart::Dow => "dow",
            DatePart::Doy => "doy",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let lowered = name.to_ascii_lowercase();
        Self::ALL.into_iter().find(|p| p.as_str() == lowered)
    }

    /// The coarsest grain a time dimension may have for this part to be extractable.
    pub fn base_granularity(&self) -> TimeGranularity {
        match self {
            DatePart::Year => TimeGranularity::Year,
            DatePart::Quarter => TimeGranularity::Quarter,
            DatePart::Month => TimeGranularity::Month,
            DatePart::Day | DatePart::Dow | DatePart::Doy => TimeGranularity::Day,
        }
    }

    pub fn is_compatible_with(&self, granularity: TimeGranularity) -> bool {
        granularity <= self.base_granularity()
    }
}

impl fmt::Display for DatePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! element_reference {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name {
            pub element_name: String,
        }

        impl $name {
            pub fn new(element_name: impl Into<String>) -> Self {
                Self {
                    element_name: element_name.into(),
                }
            }

            pub fn as_str(&self) -> &str {
                &self.element_name
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.element_name)
            }
        }
    };
}

element_reference!(
    /// Reference to an entity, used as a join-path link.
    EntityReference
);
element_reference!(MetricReference);
element_reference!(MeasureReference);
element_reference!(SemanticModelReference);

/// Join entity links as a dundered prefix (`listing__user`).
pub fn dundered_links(links: &[EntityReference]) -> String {
    links
        .iter()
        .map(|l| l.as_str())
        .collect::<Vec<_>>()
        .join(DUNDER)
}
