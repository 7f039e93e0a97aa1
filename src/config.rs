//! Reader presentation settings.
//!
//! Settings are persisted per book under the configs namespace, keyed
//! `{bookId}_config`, as a map from variant-language tag to a snapshot.
//! The fields that change pagination are what invalidate the location
//! index; [`ReaderSettings::reflow_differs`] is the single place that
//! knows which ones those are.

use crate::annotations::{Bookmark, Highlight, ReadingProgress};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Minimum allowed font size (points).
pub const MIN_FONT_SIZE: u32 = 12;
/// Maximum allowed font size (points).
pub const MAX_FONT_SIZE: u32 = 36;

pub const MAX_HORIZONTAL_MARGIN: u16 = 240;
pub const MAX_VERTICAL_MARGIN: u16 = 160;

/// Language tag under which the untranslated view stores its snapshot.
pub const ORIGINAL_LANG_TAG: &str = "original";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThemeMode {
    Day,
    #[default]
    Night,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FontFamily {
    #[default]
    Sans,
    Serif,
    Monospace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderSettings {
    #[serde(default)]
    pub theme: ThemeMode,
    #[serde(default)]
    pub font_family: FontFamily,
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    #[serde(default = "default_line_spacing")]
    pub line_spacing: f32,
    #[serde(default = "default_margin_horizontal")]
    pub margin_horizontal: u16,
    #[serde(default = "default_margin_vertical")]
    pub margin_vertical: u16,
}

fn default_font_size() -> u32 {
    16
}

fn default_line_spacing() -> f32 {
    1.4
}

fn default_margin_horizontal() -> u16 {
    24
}

fn default_margin_vertical() -> u16 {
    16
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            theme: ThemeMode::default(),
            font_family: FontFamily::default(),
            font_size: default_font_size(),
            line_spacing: default_line_spacing(),
            margin_horizontal: default_margin_horizontal(),
            margin_vertical: default_margin_vertical(),
        }
    }
}

impl ReaderSettings {
    /// Keep values in bounds regardless of where they were loaded from.
    pub fn clamped(mut self) -> Self {
        self.font_size = self.font_size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
        self.line_spacing = self.line_spacing.clamp(0.8, 2.5);
        self.margin_horizontal = self.margin_horizontal.min(MAX_HORIZONTAL_MARGIN);
        self.margin_vertical = self.margin_vertical.min(MAX_VERTICAL_MARGIN);
        self
    }

    /// Whether switching to `other` reflows the text. Theme changes do
    /// not move pagination; everything else here does.
    pub fn reflow_differs(&self, other: &ReaderSettings) -> bool {
        self.font_size != other.font_size
            || self.font_family != other.font_family
            || self.line_spacing != other.line_spacing
            || self.margin_horizontal != other.margin_horizontal
            || self.margin_vertical != other.margin_vertical
    }
}

/// Persisted per-book configuration: one entry per variant-language tag.
///
/// Newly written entries carry settings only. Old single-tier installs
/// stored the whole reading state here (settings, progress, bookmarks,
/// highlights per language); the repository migrates those lists into the
/// tiered annotation stores on first read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookConfig {
    #[serde(default)]
    pub variants: HashMap<String, VariantConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantConfig {
    #[serde(default)]
    pub settings: Option<ReaderSettings>,
    #[serde(default)]
    pub progress: Option<ReadingProgress>,
    #[serde(default)]
    pub bookmarks: Vec<Bookmark>,
    #[serde(default)]
    pub highlights: Vec<Highlight>,
}
