//! Query validation: group-by items and where-filter items are resolved to
//! specs in the context of the metrics that use them.

pub mod dag;
pub mod filter_render;
pub mod filter_resolver;
pub mod filter_spec;
pub mod issues;
pub mod parser;
pub mod path;
pub mod resolver;

pub use dag::{ResolutionDag, ResolutionDagBuilder, ResolutionNode, ResolutionNodeId, ResolutionNodeKind};
pub use filter_render::{WhereFilterSpec, WhereSpecFactory};
pub use filter_resolver::WhereFilterSpecResolver;
pub use filter_spec::{
    FilterLocation, FilterSpecResolution, FilterSpecResolutionLookup, NonParsableFilterResolution,
    ResolvedSpecLookupKey,
};
pub use issues::{IssueLevel, IssueSet, ResolutionIssue, ResolutionIssueKind};
pub use parser::{QueryParser, QueryRequest, QuerySpec};
pub use path::ResolutionPath;
pub use resolver::{GroupByItemResolution, GroupByItemResolver, ResolutionOutcome};
