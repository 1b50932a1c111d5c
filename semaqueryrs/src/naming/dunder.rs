//! Dundered item names such as `listing__user__country` or `booking__ds__month`.

use crate::error::ItemParseError;
use crate::model::elements::{DatePart, EntityReference, TimeGranularity, DUNDER};

const DATE_PART_PREFIX: &str = "extract_";

/// A dundered name split into entity links, element and optional time suffixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredDunderedName {
    pub entity_links: Vec<EntityReference>,
    pub element_name: String,
    pub time_granularity: Option<TimeGranularity>,
    pub date_part: Option<DatePart>,
}

impl StructuredDunderedName {
    /// Split a dundered name.
    ///
    /// Trailing reserved tokens are consumed right to left: first an
    /// `extract_<part>` token, then a grain token. A reserved token is never
    /// taken as the element itself, so `day` alone is an element named `day`.
    pub fn parse(name: &str) -> Result<Self, ItemParseError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ItemParseError::QueryItemSyntax(
                "empty item name".to_string(),
            ));
        }
        let tokens: Vec<&str> = name.split(DUNDER).collect();
        if tokens.iter().any(|t| t.is_empty()) {
            return Err(ItemParseError::QueryItemSyntax(format!(
                "'{name}' contains an empty name segment"
            )));
        }
        if let Some(bad) = tokens.iter().find(|t| !is_name_token(t)) {
            return Err(ItemParseError::QueryItemSyntax(format!(
                "'{bad}' in '{name}' is not a valid name segment"
            )));
        }

        let mut end = tokens.len();
        let mut date_part = None;
        if end > 1 {
            if let Some(part) = tokens[end - 1]
                .strip_prefix(DATE_PART_PREFIX)
                .and_then(DatePart::from_name)
            {
                date_part = Some(part);
                end -= 1;
            }
        }
        let mut time_granularity = None;
        if end > 1 {
            if let Some(granularity) = TimeGranularity::from_name(tokens[end - 1]) {
                time_granularity = Some(granularity);
                end -= 1;
            }
        }

        Ok(Self {
            entity_links: tokens[..end - 1]
                .iter()
                .map(|t| EntityReference::new(*t))
                .collect(),
            element_name: tokens[end - 1].to_string(),
            time_granularity,
            date_part,
        })
    }

    /// Links and element joined back together, without time suffixes.
    pub fn dundered_name_without_suffixes(&self) -> String {
        let mut parts: Vec<&str> = self.entity_links.iter().map(|l| l.as_str()).collect();
        parts.push(&self.element_name);
        parts.join(DUNDER)
    }
}

fn is_name_token(token: &str) -> bool {
    token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_links_element_and_grain() {
        let name = StructuredDunderedName::parse("booking__ds__day").unwrap();
        assert_eq!(name.entity_links, vec![EntityReference::new("booking")]);
        assert_eq!(name.element_name, "ds");
        assert_eq!(name.time_granularity, Some(TimeGranularity::Day));
        assert_eq!(name.date_part, None);
    }

    #[test]
    fn consumes_date_part_then_grain() {
        let name = StructuredDunderedName::parse("metric_time__month__extract_year").unwrap();
        assert_eq!(name.element_name, "metric_time");
        assert_eq!(name.time_granularity, Some(TimeGranularity::Month));
        assert_eq!(name.date_part, Some(DatePart::Year));

        let name = StructuredDunderedName::parse("booking__ds__extract_dow").unwrap();
        assert_eq!(name.element_name, "ds");
        assert_eq!(name.time_granularity, None);
        assert_eq!(name.date_part, Some(DatePart::Dow));
    }

    #[test]
    fn reserved_token_alone_is_an_element() {
        let name = StructuredDunderedName::parse("day").unwrap();
        assert_eq!(name.element_name, "day");
        assert_eq!(name.time_granularity, None);
        assert!(name.entity_links.is_empty());
    }

    #[test]
    fn multi_hop_links_are_kept_in_order() {
        let name = StructuredDunderedName::parse("listing__user__country").unwrap();
        assert_eq!(
            name.entity_links,
            vec![EntityReference::new("listing"), EntityReference::new("user")]
        );
        assert_eq!(name.dundered_name_without_suffixes(), "listing__user__country");
    }

    #[test]
    fn rejects_empty_segments() {
        assert!(matches!(
            StructuredDunderedName::parse("booking____ds"),
            Err(ItemParseError::QueryItemSyntax(_))
        ));
        assert!(StructuredDunderedName::parse("").is_err());
        assert!(StructuredDunderedName::parse("listing__coun try").is_err());
    }
}
