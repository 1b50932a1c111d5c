use serde::Serialize;

use crate::error::ItemParseError;
use crate::model::elements::{DatePart, EntityReference, TimeGranularity, DUNDER};
use crate::naming::builder::{parse_builder_call, ObjectBuilderItemDescription};
use crate::naming::dunder::StructuredDunderedName;
use crate::specs::spec::{ItemKind, LinkableSpec};

/// Structured form of one user-supplied item reference.
///
/// `item_kind` is `None` for dundered names, which may refer to any kind.
/// `date_part == None` means the item must not carry a date part; it is not a
/// wildcard the way an unspecified `time_granularity` is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QueryableItemDescriptor {
    pub item_kind: Option<ItemKind>,
    pub element_name: String,
    pub entity_links: Vec<EntityReference>,
    pub time_granularity: Option<TimeGranularity>,
    pub date_part: Option<DatePart>,
    pub metric_group_by_links: Option<Vec<EntityReference>>,
    pub descending: Option<bool>,
}

impl QueryableItemDescriptor {
    /// Parse either syntax; anything containing a call is treated as a builder call.
    pub fn parse(input: &str) -> Result<Self, ItemParseError> {
        if input.contains('(') {
            Self::parse_builder(input)
        } else {
            Self::parse_dunder(input)
        }
    }

    pub fn parse_dunder(input: &str) -> Result<Self, ItemParseError> {
        let name = StructuredDunderedName::parse(input)?;
        Ok(Self {
            item_kind: None,
            element_name: name.element_name,
            entity_links: name.entity_links,
            time_granularity: name.time_granularity,
            date_part: name.date_part,
            metric_group_by_links: None,
            descending: None,
        })
    }

    pub fn parse_builder(input: &str) -> Result<Self, ItemParseError> {
        let description = parse_builder_call(input)?;
        Self::from_builder_description(input, description)
    }

    fn from_builder_description(
        input: &str,
        description: ObjectBuilderItemDescription,
    ) -> Result<Self, ItemParseError> {
        let invalid = |detail: String| {
            ItemParseError::InvalidQuerySyntax(format!("invalid item '{input}': {detail}"))
        };

        let name = StructuredDunderedName::parse(&description.item_name)?;
        let mut entity_links: Vec<EntityReference> = description
            .entity_path
            .iter()
            .map(EntityReference::new)
            .collect();
        entity_links.extend(name.entity_links);

        let explicit_grain = description
            .time_granularity_name
            .as_deref()
            .map(|g| {
                TimeGranularity::from_name(g)
                    .ok_or_else(|| invalid(format!("unknown time granularity '{g}'")))
            })
            .transpose()?;
        let time_granularity = match (explicit_grain, name.time_granularity) {
            (Some(a), Some(b)) if a != b => {
                return Err(invalid(format!(
                    "conflicting granularities '{a}' and '{b}'"
                )))
            }
            (explicit, from_name) => explicit.or(from_name),
        };
        let explicit_date_part = description
            .date_part_name
            .as_deref()
            .map(|p| {
                DatePart::from_name(p).ok_or_else(|| invalid(format!("unknown date part '{p}'")))
            })
            .transpose()?;
        let date_part = explicit_date_part.or(name.date_part);

        let mut item_kind = description.item_kind;
        let mut metric_group_by_links = None;
        match item_kind {
            Some(ItemKind::Dimension) if time_granularity.is_some() || date_part.is_some() => {
                item_kind = Some(ItemKind::TimeDimension);
            }
            Some(ItemKind::Entity) | Some(ItemKind::Metric)
                if time_granularity.is_some() || date_part.is_some() =>
            {
                return Err(invalid(
                    "entities and metrics cannot have a granularity or date part".to_string(),
                ));
            }
            _ => {}
        }
        if item_kind == Some(ItemKind::Metric) {
            let group_by = description.group_by.unwrap_or_default();
            let [target] = group_by.as_slice() else {
                return Err(invalid(format!(
                    "a metric requires exactly one group_by item, got {}",
                    group_by.len()
                )));
            };
            let target = StructuredDunderedName::parse(target)?;
            let mut links = target.entity_links;
            links.push(EntityReference::new(target.element_name));
            metric_group_by_links = Some(links);
        }

        Ok(Self {
            item_kind,
            element_name: name.element_name,
            entity_links,
            time_granularity,
            date_part,
            metric_group_by_links,
            descending: description.descending,
        })
    }

    /// Descriptor that exactly describes an already resolved spec.
    pub fn from_spec(spec: &LinkableSpec) -> Self {
        let (time_granularity, date_part) = match spec {
            LinkableSpec::TimeDimension(s) if s.date_part.is_some() => (None, s.date_part),
            LinkableSpec::TimeDimension(s) => (Some(s.time_granularity), None),
            _ => (None, None),
        };
        let (entity_links, metric_group_by_links) = match spec {
            LinkableSpec::GroupByMetric(s) => {
                (Vec::new(), Some(s.metric_subquery_entity_links.clone()))
            }
            other => (other.entity_links().to_vec(), None),
        };
        Self {
            item_kind: Some(spec.item_kind()),
            element_name: spec.element_name().to_string(),
            entity_links,
            time_granularity,
            date_part,
            metric_group_by_links,
            descending: None,
        }
    }

    /// Links and element name without time suffixes (`listing__user__country`).
    pub fn dundered_name(&self) -> String {
        let mut parts: Vec<&str> = self.entity_links.iter().map(|l| l.as_str()).collect();
        parts.push(&self.element_name);
        parts.join(DUNDER)
    }

    /// Render back in builder syntax, e.g. `Dimension('user__country', entity_path=['listing'])`.
    ///
    /// Descriptors without a kind render as dundered names.
    pub fn builder_str(&self) -> String {
        let Some(kind) = self.item_kind else {
            let mut name = self.dundered_name();
            if let Some(granularity) = self.time_granularity {
                name.push_str(DUNDER);
                name.push_str(granularity.as_str());
            }
            if let Some(part) = self.date_part {
                name.push_str(DUNDER);
                name.push_str(&format!("extract_{part}"));
            }
            return name;
        };

        let (path, last) = match self.entity_links.split_last() {
            Some((last, path)) => (path, Some(last)),
            None => (&[][..], None),
        };
        let name = match last {
            Some(link) => format!("{link}{DUNDER}{}", self.element_name),
            None => self.element_name.clone(),
        };

        let mut args = vec![quote(&name)];
        if let Some(granularity) = self.time_granularity {
            args.push(quote(granularity.as_str()));
        }
        if let Some(part) = self.date_part {
            args.push(format!("date_part_name={}", quote(part.as_str())));
        }
        if !path.is_empty() {
            args.push(format!("entity_path={}", quote_list(path.iter().map(|l| l.as_str()))));
        }
        if let Some(links) = &self.metric_group_by_links {
            let target = links
                .iter()
                .map(|l| l.as_str())
                .collect::<Vec<_>>()
                .join(DUNDER);
            args.push(format!("group_by={}", quote_list([target.as_str()])));
        }
        let kind = if kind == ItemKind::Dimension && self.time_granularity.is_some() {
            ItemKind::TimeDimension
        } else {
            kind
        };
        format!("{}({})", kind.builder_name(), args.join(", "))
    }
}

fn quote(value: &str) -> String {
    format!("'{value}'")
}

fn quote_list<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    let items: Vec<String> = values.into_iter().map(quote).collect();
    format!("[{}]", items.join(", "))
}
