//! # stacks-core
//!
//! An embedded, persistent hybrid vector + text memory store for AI agent
//! runtimes.
//!
//! A [`library::Library`] is the primary entry point: it owns an embedding
//! provider reference, a storage backend, the [`stacks::Stacks`] engine
//! core, and a background [`desk`] job queue that uses an LLM-backed
//! [`librarian::Librarian`] to extract, summarize, and reorganize memory in
//! the background.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use stacks_core::library::{Library, LibraryConfig};
//!
//! let mut library = Library::open(LibraryConfig::default())?;
//! let id = library.remember("Rust favors explicit error handling via Result.", None)?;
//! let hits = library.search("how does rust handle errors", 5)?;
//! ```
//!
//! ## Module layout
//!
//! | Module | Responsibility |
//! |---|---|
//! | [`math`] | Cosine/dot/magnitude kernels |
//! | [`text`] | Tokenizer and text similarity modes |
//! | [`index`] | BM25 inverted index, topic catalog, metadata index |
//! | [`storage`] | Pluggable storage backend + binary snapshot codec |
//! | [`cache`] | Bounded LRU text cache |
//! | [`learning`] | Adaptive ranking weight engine ("Patron profile") |
//! | [`stacks`] | The vector store engine core |
//! | [`library`] | The public facade + query DSL |
//! | [`desk`] | Background job queue ("Circulation Desk") |
//! | [`librarian`] | LLM-backed extraction/summarization + bidding registry |
//! | [`pruner`] | Conversation context pruning |
//! | [`resilience`] | Retry, circuit breaker, timeout, health monitor |

#![warn(rustdoc::missing_crate_level_docs)]

pub mod cache;
pub mod desk;
pub mod error;
pub mod index;
pub mod learning;
pub mod librarian;
pub mod library;
pub mod logging;
pub mod math;
pub mod pruner;
pub mod resilience;
pub mod stacks;
pub mod storage;
pub mod text;

/// Opaque identifier for a stored volume. An owned `String` rather than a
/// newtype, matching the teacher's convention for id-like fields that cross
/// the storage boundary as plain strings.
pub type VolumeId = String;

pub use error::{ErrorKind, LibraryError, Result};
pub use library::{Library, LibraryConfig};
pub use stacks::{DuplicateCheck, LoadReport, ScoredVolume, Stacks, StacksConfig, Volume};

/// Crate version, exposed for diagnostics and user-agent style logging.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod prelude {
    pub use crate::error::{ErrorKind, LibraryError, Result};
    pub use crate::index::{MetadataFilter, MetadataMode};
    pub use crate::library::{Library, LibraryConfig};
    pub use crate::logging::{Level, Logger};
    pub use crate::stacks::{DuplicateCheck, ScoredVolume, Stacks, StacksConfig, Volume};
    pub use crate::VolumeId;
}
