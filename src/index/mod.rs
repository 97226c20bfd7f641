//! Indices owned by `Stacks`: inverted (BM25), topic catalog, metadata.

pub mod inverted;
pub mod metadata;
pub mod topics;

pub use inverted::InvertedIndex;
pub use metadata::{MetadataFilter, MetadataIndex, MetadataMode};
pub use topics::TopicCatalog;
