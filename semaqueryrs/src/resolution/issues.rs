//! Issues collected while resolving a query, and their user-facing report.

use std::fmt::Write as _;

use serde::Serialize;

use crate::model::elements::MeasureReference;
use crate::resolution::path::ResolutionPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum IssueLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ResolutionIssueKind {
    /// Nothing in scope matched the input.
    NoMatchingItems { suggestions: Vec<String> },
    /// The item is in scope for the query but a measure underneath cannot provide it.
    NoMatchingItemsForMeasure {
        measure: MeasureReference,
        suggestions: Vec<String>,
    },
    AmbiguousItem { matches: Vec<String> },
    InvalidItemSyntax { message: String },
    NonParsableWhereFilter {
        where_sql_template: String,
        message: String,
    },
    UnknownMetric { suggestions: Vec<String> },
    InvalidOrderBy { suggestions: Vec<String> },
    /// The input names something the query already selects.
    DuplicateItem { selected: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionIssue {
    pub level: IssueLevel,
    /// The user input the issue is about, verbatim.
    pub input_str: String,
    pub path: ResolutionPath,
    pub kind: ResolutionIssueKind,
}

impl ResolutionIssue {
    pub fn error(input_str: impl Into<String>, path: ResolutionPath, kind: ResolutionIssueKind) -> Self {
        Self {
            level: IssueLevel::Error,
            input_str: input_str.into(),
            path,
            kind,
        }
    }

    pub fn warning(input_str: impl Into<String>, path: ResolutionPath, kind: ResolutionIssueKind) -> Self {
        Self {
            level: IssueLevel::Warning,
            ..Self::error(input_str, path, kind)
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == IssueLevel::Error
    }

    pub fn message(&self) -> String {
        match &self.kind {
            ResolutionIssueKind::NoMatchingItems { .. } => {
                "The given input does not match any of the available group-by-items.".to_string()
            }
            ResolutionIssueKind::NoMatchingItemsForMeasure { measure, .. } => format!(
                "The given input matches an available group-by-item, but it is not available for measure '{measure}'."
            ),
            ResolutionIssueKind::AmbiguousItem { .. } => {
                "The given input matches more than one group-by-item. Specify the entity path to choose one."
                    .to_string()
            }
            ResolutionIssueKind::InvalidItemSyntax { message } => {
                format!("The given input could not be parsed: {message}")
            }
            ResolutionIssueKind::NonParsableWhereFilter {
                where_sql_template,
                message,
            } => format!("Error parsing where filter {where_sql_template:?}: {message}"),
            ResolutionIssueKind::UnknownMetric { .. } => {
                "The given input does not match any of the available metrics.".to_string()
            }
            ResolutionIssueKind::InvalidOrderBy { .. } => {
                "The given input does not match any of the selected metrics or group-by-items."
                    .to_string()
            }
            ResolutionIssueKind::DuplicateItem { selected } => {
                format!("The query already selects {selected}; the repeated input is ignored.")
            }
        }
    }

    fn listed_items(&self) -> Option<(&'static str, &[String])> {
        match &self.kind {
            ResolutionIssueKind::NoMatchingItems { suggestions }
            | ResolutionIssueKind::NoMatchingItemsForMeasure { suggestions, .. }
            | ResolutionIssueKind::UnknownMetric { suggestions }
            | ResolutionIssueKind::InvalidOrderBy { suggestions } => {
                Some(("Suggestions", suggestions.as_slice()))
            }
            ResolutionIssueKind::AmbiguousItem { matches } => Some(("Matching items", matches.as_slice())),
            ResolutionIssueKind::InvalidItemSyntax { .. }
            | ResolutionIssueKind::NonParsableWhereFilter { .. }
            | ResolutionIssueKind::DuplicateItem { .. } => None,
        }
    }

    fn with_path_prefix(&self, prefix: &ResolutionPath) -> Self {
        Self {
            path: self.path.with_prefix(prefix),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IssueSet {
    issues: Vec<ResolutionIssue>,
}

impl FromIterator<ResolutionIssue> for IssueSet {
    fn from_iter<I: IntoIterator<Item = ResolutionIssue>>(iter: I) -> Self {
        Self {
            issues: iter.into_iter().collect(),
        }
    }
}

impl IssueSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_issue(issue: ResolutionIssue) -> Self {
        Self {
            issues: vec![issue],
        }
    }

    pub fn push(&mut self, issue: ResolutionIssue) {
        self.issues.push(issue);
    }

    pub fn extend(&mut self, other: IssueSet) {
        self.issues.extend(other.issues);
    }

    pub fn merge(mut self, other: IssueSet) -> IssueSet {
        self.extend(other);
        self
    }

    pub fn issues(&self) -> &[ResolutionIssue] {
        &self.issues
    }

    pub fn errors(&self) -> impl Iterator<Item = &ResolutionIssue> {
        self.issues.iter().filter(|i| i.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ResolutionIssue> {
        self.issues.iter().filter(|i| !i.is_error())
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Issue paths are relative to the node they were produced at; prefixing
    /// them makes them start at the query.
    pub fn with_path_prefix(&self, prefix: &ResolutionPath) -> IssueSet {
        IssueSet {
            issues: self.issues.iter().map(|i| i.with_path_prefix(prefix)).collect(),
        }
    }

    /// Human-readable report of every error.
    pub fn ui_report(&self) -> String {
        let mut report = String::from("Got errors while resolving the query.");
        for (idx, issue) in self.errors().enumerate() {
            let _ = write!(report, "\n\nError #{}:", idx + 1);
            let _ = write!(report, "\n  Query Input:\n    {}", issue.input_str);
            if !issue.path.is_empty() {
                let _ = write!(report, "\n  Issue Location:\n    {}", issue.path);
            }
            let _ = write!(report, "\n  Message:\n    {}", issue.message());
            if let Some((title, items)) = issue.listed_items() {
                if !items.is_empty() {
                    let quoted: Vec<String> = items.iter().map(|s| format!("{s:?}")).collect();
                    let _ = write!(report, "\n  {title}:\n    [{}]", quoted.join(", "));
                }
            }
        }
        report
    }
}
