//! Persistence seam and the annotation repository built on it.
//!
//! The host supplies [`KeyValueStore`] implementations (browser local
//! storage, an embedded database, the in-memory store used by tests).
//! Everything the reader persists goes through one of the logical
//! namespaces below; the repository composes two stores into the tiered
//! policy described in [`repository`].

mod memory;
mod repository;

pub use memory::MemoryStore;
pub use repository::{AnnotationRepository, ToggleOutcome};

use crate::error::Result;
use async_trait::async_trait;

/// Logical store names. One namespace per kind of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Books,
    Files,
    Covers,
    Configs,
    Bookmarks,
    Highlights,
    Progress,
    Translations,
}

impl Namespace {
    pub const ALL: [Namespace; 8] = [
        Namespace::Books,
        Namespace::Files,
        Namespace::Covers,
        Namespace::Configs,
        Namespace::Bookmarks,
        Namespace::Highlights,
        Namespace::Progress,
        Namespace::Translations,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Books => "books",
            Namespace::Files => "files",
            Namespace::Covers => "covers",
            Namespace::Configs => "configs",
            Namespace::Bookmarks => "bookmarks",
            Namespace::Highlights => "highlights",
            Namespace::Progress => "progress",
            Namespace::Translations => "translations",
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Asynchronous namespaced key-value storage.
///
/// Values are opaque bytes; JSON records, raw book files and cover images
/// all travel through the same four operations.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, namespace: Namespace, key: &str, value: Vec<u8>) -> Result<()>;

    async fn remove(&self, namespace: Namespace, key: &str) -> Result<()>;

    /// All keys currently present in a namespace, in no particular order.
    async fn keys(&self, namespace: Namespace) -> Result<Vec<String>>;
}
