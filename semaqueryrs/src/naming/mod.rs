//! Parsing of user-supplied item references into [`QueryableItemDescriptor`]s.

pub mod builder;
pub mod cache;
pub mod descriptor;
pub mod dunder;
pub mod template;

pub use cache::DescriptorCache;
pub use descriptor::QueryableItemDescriptor;
