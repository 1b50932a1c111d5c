//! Group-by item resolution over the resolution DAG.
//!
//! The candidates at a node are the union of the linkable elements of every
//! measure source underneath it. A pattern is applied to that union and the
//! result classified as resolved, unresolved or ambiguous. A resolved spec is
//! then checked against each measure source individually, since every measure
//! in scope has to be able to provide the item.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::model::linkable::LinkableElement;
use crate::model::lookup::SemanticModelLookup;
use crate::naming::descriptor::QueryableItemDescriptor;
use crate::resolution::dag::{ResolutionDag, ResolutionNodeId, ResolutionNodeKind};
use crate::resolution::issues::{IssueSet, ResolutionIssue, ResolutionIssueKind};
use crate::resolution::path::ResolutionPath;
use crate::specs::pattern::SpecPattern;
use crate::specs::spec::LinkableSpec;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ResolutionOutcome {
    Resolved(LinkableSpec),
    Unresolved { suggestions: Vec<String> },
    Ambiguous { matches: Vec<LinkableSpec> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupByItemResolution {
    pub outcome: ResolutionOutcome,
    /// Elements backing the resolved spec; empty unless resolved.
    pub linkable_elements: Vec<LinkableElement>,
    pub issue_set: IssueSet,
}

impl GroupByItemResolution {
    pub fn spec(&self) -> Option<&LinkableSpec> {
        match &self.outcome {
            ResolutionOutcome::Resolved(spec) => Some(spec),
            _ => None,
        }
    }
}

pub struct GroupByItemResolver<'a> {
    dag: &'a ResolutionDag,
    max_suggestions: usize,
    candidates: HashMap<ResolutionNodeId, Vec<LinkableElement>>,
}

impl<'a> GroupByItemResolver<'a> {
    pub fn new(
        lookup: &dyn SemanticModelLookup,
        dag: &'a ResolutionDag,
        max_suggestions: usize,
    ) -> Self {
        let mut candidates = HashMap::new();
        collect_candidates(lookup, dag, dag.sink_node(), &mut candidates);
        Self {
            dag,
            max_suggestions,
            candidates,
        }
    }

    pub fn dag(&self) -> &'a ResolutionDag {
        self.dag
    }

    /// Every linkable element available at `node`.
    pub fn candidate_elements(&self, node: ResolutionNodeId) -> &[LinkableElement] {
        self.candidates
            .get(&node)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn candidate_specs(&self, node: ResolutionNodeId) -> Vec<LinkableSpec> {
        distinct_specs(self.candidate_elements(node))
    }

    /// Resolve `pattern` in the scope of `start`. Issue paths start at `start`.
    pub fn resolve_matching_item(
        &self,
        start: ResolutionNodeId,
        pattern: &dyn SpecPattern,
        input_str: &str,
    ) -> GroupByItemResolution {
        let specs = self.candidate_specs(start);
        let matches = prefer_finest_grain(pattern.match_specs(&specs));
        let start_path = ResolutionPath::from_nodes(self.dag, [start]);

        let spec = match matches.as_slice() {
            [] => {
                let suggestions = self.suggestions(pattern, &specs);
                tracing::debug!(node = %start, input = input_str, "no matching group-by item");
                return GroupByItemResolution {
                    outcome: ResolutionOutcome::Unresolved {
                        suggestions: suggestions.clone(),
                    },
                    linkable_elements: Vec::new(),
                    issue_set: IssueSet::from_issue(ResolutionIssue::error(
                        input_str,
                        start_path,
                        ResolutionIssueKind::NoMatchingItems { suggestions },
                    )),
                };
            }
            [single] => single.clone(),
            _ => {
                tracing::debug!(
                    node = %start,
                    input = input_str,
                    matches = matches.len(),
                    "ambiguous group-by item"
                );
                let described = matches.iter().map(input_str_for_spec).collect();
                return GroupByItemResolution {
                    outcome: ResolutionOutcome::Ambiguous { matches },
                    linkable_elements: Vec::new(),
                    issue_set: IssueSet::from_issue(ResolutionIssue::error(
                        input_str,
                        start_path,
                        ResolutionIssueKind::AmbiguousItem { matches: described },
                    )),
                };
            }
        };

        let mut issue_set = IssueSet::new();
        let mut first_suggestions = None;
        for (measure_node, path) in self.measure_paths(start) {
            let available = self.candidate_elements(measure_node);
            if available.iter().any(|e| e.spec == spec) {
                continue;
            }
            let ResolutionNodeKind::MeasureSource { measure } = &self.dag.node(measure_node).kind
            else {
                continue;
            };
            let suggestions = self.suggestions(pattern, &distinct_specs(available));
            first_suggestions.get_or_insert_with(|| suggestions.clone());
            issue_set.push(ResolutionIssue::error(
                input_str,
                ResolutionPath::from_nodes(self.dag, path),
                ResolutionIssueKind::NoMatchingItemsForMeasure {
                    measure: measure.clone(),
                    suggestions,
                },
            ));
        }
        if let Some(suggestions) = first_suggestions {
            tracing::debug!(node = %start, input = input_str, spec = %spec, "group-by item unavailable for a measure");
            return GroupByItemResolution {
                outcome: ResolutionOutcome::Unresolved { suggestions },
                linkable_elements: Vec::new(),
                issue_set,
            };
        }

        tracing::debug!(node = %start, input = input_str, spec = %spec, "resolved group-by item");
        let linkable_elements = self
            .candidate_elements(start)
            .iter()
            .filter(|e| e.spec == spec)
            .cloned()
            .collect();
        GroupByItemResolution {
            outcome: ResolutionOutcome::Resolved(spec),
            linkable_elements,
            issue_set,
        }
    }

    fn suggestions(&self, pattern: &dyn SpecPattern, specs: &[LinkableSpec]) -> Vec<String> {
        pattern
            .partially_match(specs, self.max_suggestions)
            .iter()
            .map(input_str_for_spec)
            .collect()
    }

    /// Measure source nodes under `start`, each with its path from `start`.
    fn measure_paths(&self, start: ResolutionNodeId) -> Vec<(ResolutionNodeId, Vec<ResolutionNodeId>)> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        self.walk_measures(start, &mut path, &mut out);
        out
    }

    fn walk_measures(
        &self,
        node: ResolutionNodeId,
        path: &mut Vec<ResolutionNodeId>,
        out: &mut Vec<(ResolutionNodeId, Vec<ResolutionNodeId>)>,
    ) {
        path.push(node);
        if matches!(self.dag.node(node).kind, ResolutionNodeKind::MeasureSource { .. }) {
            out.push((node, path.clone()));
        }
        for parent in self.dag.parents(node) {
            self.walk_measures(*parent, path, out);
        }
        path.pop();
    }
}

fn collect_candidates(
    lookup: &dyn SemanticModelLookup,
    dag: &ResolutionDag,
    node: ResolutionNodeId,
    memo: &mut HashMap<ResolutionNodeId, Vec<LinkableElement>>,
) {
    if memo.contains_key(&node) {
        return;
    }
    let elements = match &dag.node(node).kind {
        ResolutionNodeKind::MeasureSource { measure } => {
            lookup.linkable_elements_for_measure(measure).to_vec()
        }
        ResolutionNodeKind::NoMetricsQuery => lookup.linkable_elements_for_no_metrics_query().to_vec(),
        ResolutionNodeKind::Metric { .. } | ResolutionNodeKind::Query { .. } => {
            let mut union = BTreeSet::new();
            for parent in dag.parents(node) {
                collect_candidates(lookup, dag, *parent, memo);
                if let Some(elements) = memo.get(parent) {
                    union.extend(elements.iter().cloned());
                }
            }
            union.into_iter().collect()
        }
    };
    memo.insert(node, elements);
}

fn distinct_specs(elements: &[LinkableElement]) -> Vec<LinkableSpec> {
    elements
        .iter()
        .map(|e| e.spec.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// When every match is the same time dimension at different grains, the
/// finest grain is the default.
fn prefer_finest_grain(matches: Vec<LinkableSpec>) -> Vec<LinkableSpec> {
    let [first, rest @ ..] = matches.as_slice() else {
        return matches;
    };
    if rest.is_empty() {
        return matches;
    }
    let LinkableSpec::TimeDimension(head) = first else {
        return matches;
    };
    let same_item = rest.iter().all(|spec| match spec {
        LinkableSpec::TimeDimension(other) => {
            other.element_name == head.element_name
                && other.entity_links == head.entity_links
                && other.date_part == head.date_part
        }
        _ => false,
    });
    if !same_item {
        return matches;
    }
    matches
        .into_iter()
        .min_by_key(|spec| spec.time_granularity())
        .into_iter()
        .collect()
}

pub(crate) fn input_str_for_spec(spec: &LinkableSpec) -> String {
    QueryableItemDescriptor::from_spec(spec).builder_str()
}
