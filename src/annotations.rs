//! Persisted annotation data model.
//!
//! Everything here is keyed by `(book id, variant)`. The original and
//! translated views of a book keep fully independent partitions; switching
//! variants swaps the active partition and never merges the two.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque engine-specific pointer into document content.
///
/// Stable under normal rendering, but a reference produced under one
/// pagination state may fail to resolve after a reflow. References are
/// comparable for reading order only through the location index or the
/// engine, never lexically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionRef(String);

impl PositionRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for PositionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which annotation partition of a book is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    #[default]
    Original,
    Translated,
}

impl Variant {
    /// Storage key for this partition: `{bookId}` or `{bookId}_translated`.
    pub fn partition_key(self, book_id: &str) -> String {
        match self {
            Variant::Original => book_id.to_string(),
            Variant::Translated => format!("{book_id}_translated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighlightColor {
    #[default]
    Yellow,
    Green,
    Blue,
    Pink,
    Orange,
}

/// A user bookmark. Unique by position reference within a partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub position: PositionRef,
    pub section_href: String,
    pub label: String,
    #[serde(default)]
    pub chapter_title: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A text highlight. Unique by position reference within a partition.
///
/// The percentage is a snapshot taken at write time; it is the navigation
/// fallback when the reference no longer resolves after a reflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub position: PositionRef,
    pub text: String,
    pub color: HighlightColor,
    #[serde(default)]
    pub chapter_title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub percentage: f64,
}

/// Last reading position. Exactly one live record per `(book, variant)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingProgress {
    pub position: PositionRef,
    pub section_href: String,
    pub percentage: f64,
    pub last_read_at: DateTime<Utc>,
    #[serde(default)]
    pub variant: Variant,
}

/// Library entry for an imported book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    pub added_at: DateTime<Utc>,
}

/// Both annotation lists of one partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationSet {
    #[serde(default)]
    pub bookmarks: Vec<Bookmark>,
    #[serde(default)]
    pub highlights: Vec<Highlight>,
}
