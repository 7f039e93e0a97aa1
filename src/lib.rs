//! Reading-position and annotation consistency engine for packaged-book
//! readers.
//!
//! The crate maps between an opaque stable position reference, a
//! human-meaningful percentage, and persisted annotations (bookmarks,
//! highlights, reading progress), staying correct across re-renders at
//! different viewport sizes, font and margin reflows, and parallel
//! original/translated views with independent annotation partitions.
//!
//! The document renderer, the persistence store and the machine
//! translation service are external collaborators, consumed through the
//! [`engine::DocumentEngine`], [`store::KeyValueStore`] and
//! [`translation::Translator`] traits. The [`bridge::ReaderBridge`] is
//! the control surface a host drives; everything it holds outside the
//! repository is ephemeral and reconstructible.

pub mod annotations;
pub mod bridge;
pub mod cancellation;
pub mod config;
pub mod engine;
pub mod error;
pub mod library;
pub mod locations;
pub mod search;
pub mod store;
pub mod translation;

#[cfg(test)]
pub(crate) mod testutil;

pub use annotations::{
    AnnotationSet, BookRecord, Bookmark, Highlight, HighlightColor, PositionRef, ReadingProgress,
    Variant,
};
pub use bridge::{BridgeState, NAVIGATION_TOLERANCE_PCT, ReaderBridge};
pub use cancellation::CancellationToken;
pub use config::ReaderSettings;
pub use engine::{BookMetadata, DocumentEngine, Location, LocationChange, RenderTarget, TocEntry};
pub use error::{Error, Result};
pub use library::{Library, derive_book_id};
pub use locations::{DEFAULT_GRANULARITY, LocationIndex};
pub use search::SearchHit;
pub use store::{
    AnnotationRepository, KeyValueStore, MemoryStore, Namespace, ToggleOutcome,
};
pub use translation::{TranslationManager, Translator, VariantState};
