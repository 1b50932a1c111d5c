use std::collections::{HashMap, VecDeque};

use crate::config::ParserConfig;
use crate::error::ItemParseError;
use crate::naming::descriptor::QueryableItemDescriptor;

/// Memo of parsed item references, owned by a single compile session.
///
/// Parsing is a pure function of the input string, so failures are cached too.
#[derive(Debug)]
pub struct DescriptorCache {
    entries: HashMap<String, Result<QueryableItemDescriptor, ItemParseError>>,
    insertion_order: VecDeque<String>,
    max_size: usize,
    hits: u64,
}

impl Default for DescriptorCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::with_config(&ParserConfig::default())
    }

    pub fn with_config(config: &ParserConfig) -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            max_size: config.descriptor_cache_size.max(1),
            hits: 0,
        }
    }

    pub fn parse(&mut self, input: &str) -> Result<QueryableItemDescriptor, ItemParseError> {
        if let Some(cached) = self.entries.get(input) {
            self.hits += 1;
            return cached.clone();
        }
        let parsed = QueryableItemDescriptor::parse(input);
        self.insert(input.to_string(), parsed.clone());
        parsed
    }

    /// Parse a template callout, which must use builder-call syntax.
    pub fn parse_callout(&mut self, callout: &str) -> Result<QueryableItemDescriptor, ItemParseError> {
        if !callout.contains('(') {
            return Err(ItemParseError::InvalidQuerySyntax(format!(
                "'{callout}' is not a call like Dimension('...') or TimeDimension('...', 'day')"
            )));
        }
        self.parse(callout)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    fn insert(&mut self, input: String, parsed: Result<QueryableItemDescriptor, ItemParseError>) {
        if self.entries.len() >= self.max_size {
            self.evict_oldest();
        }
        self.insertion_order.push_back(input.clone());
        self.entries.insert(input, parsed);
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self.insertion_order.pop_front() {
            self.entries.remove(&oldest);
            tracing::debug!(input = %oldest, "evicted oldest descriptor cache entry");
        }
    }
}
