use std::collections::HashMap;

use crate::dataflow::node::DataflowPlanNode;

/// Nodes that occur more than once in the tree under `start`, outermost first.
///
/// A repeated node's parents are not counted again, so when a large subtree
/// repeats only its root is returned, not every node inside it. Selection
/// stops at that root: a node that repeats only inside a selected subtree is
/// not returned and stays inlined, once per occurrence, in the body of the
/// subtree's CTE.
pub fn find_common_branches(start: &DataflowPlanNode) -> Vec<DataflowPlanNode> {
    let mut counts: HashMap<DataflowPlanNode, usize> = HashMap::new();
    count_occurrences(start, &mut counts);

    let mut selected: Vec<DataflowPlanNode> = Vec::new();
    collect_repeated(start, &counts, &mut selected);
    tracing::debug!(common_branches = selected.len(), "found common dataflow branches");
    selected
}

fn count_occurrences(node: &DataflowPlanNode, counts: &mut HashMap<DataflowPlanNode, usize>) {
    let count = counts.entry(node.clone()).or_insert(0);
    *count += 1;
    if *count > 1 {
        return;
    }
    for parent in node.parents() {
        count_occurrences(parent, counts);
    }
}

fn collect_repeated(
    node: &DataflowPlanNode,
    counts: &HashMap<DataflowPlanNode, usize>,
    selected: &mut Vec<DataflowPlanNode>,
) {
    if counts.get(node).copied().unwrap_or(0) > 1 {
        if !selected.contains(node) {
            selected.push(node.clone());
        }
        return;
    }
    for parent in node.parents() {
        collect_repeated(parent, counts, selected);
    }
}
