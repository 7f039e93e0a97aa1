//! Tiered annotation repository.
//!
//! One canonical store for bookmarks, highlights, reading progress, book
//! records and per-book configuration, composed of two
//! [`KeyValueStore`] tiers:
//!
//! - the **fast tier** is authoritative; every read consults it first and
//!   every mutation must land there,
//! - the **durable tier** mirrors every mutation best-effort (one retry)
//!   and answers reads only when the fast tier has no entry. A durable
//!   copy is never allowed to shadow a present fast-tier copy.
//!
//! Records from the old single-tier layout (everything under
//! `{bookId}_config`) are migrated into the tiers the first time a
//! partition is read and found empty in both.
//!
//! Mutations of the same logical record are serialized in submission
//! order through per-record async locks, so rapid duplicate operations
//! (double bookmark toggles) resolve to the last completed intent.

use super::{KeyValueStore, Namespace};
use crate::annotations::{
    AnnotationSet, Bookmark, Highlight, PositionRef, ReadingProgress, Variant,
};
use crate::config::{BookConfig, ORIGINAL_LANG_TAG, ReaderSettings, VariantConfig};
use crate::error::{Error, Result};
use crate::locations::round_percent;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct AnnotationRepository {
    fast: Arc<dyn KeyValueStore>,
    durable: Arc<dyn KeyValueStore>,
    record_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// What `toggle_bookmark_at` did.
#[derive(Debug, Clone, PartialEq)]
pub enum ToggleOutcome {
    Created(Bookmark),
    Removed,
}

impl AnnotationRepository {
    pub fn new(fast: Arc<dyn KeyValueStore>, durable: Arc<dyn KeyValueStore>) -> Self {
        Self {
            fast,
            durable,
            record_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Serialize mutations of one logical record. The guard is held for
    /// the whole read-modify-write cycle.
    async fn lock_record(&self, namespace: Namespace, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.record_locks.lock();
            locks
                .entry(format!("{namespace}/{key}"))
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }

    // --- tier policy ----------------------------------------------------

    pub(crate) async fn read_through(
        &self,
        namespace: Namespace,
        key: &str,
    ) -> Result<Option<Vec<u8>>> {
        match self.fast.get(namespace, key).await {
            Ok(Some(value)) => return Ok(Some(value)),
            Ok(None) => {}
            Err(err) => {
                warn!(%namespace, key, %err, "Fast tier read failed; consulting durable tier")
            }
        }
        let fallback = match self.durable.get(namespace, key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(%namespace, key, %err, "Durable tier read failed");
                return Ok(None);
            }
        };
        if let Some(value) = &fallback {
            // Refill the fast tier so later reads stop falling back.
            if let Err(err) = self.fast.set(namespace, key, value.clone()).await {
                warn!(%namespace, key, %err, "Could not refill fast tier from durable copy");
            }
        }
        Ok(fallback)
    }

    pub(crate) async fn write_through(
        &self,
        namespace: Namespace,
        key: &str,
        value: Vec<u8>,
    ) -> Result<()> {
        self.fast
            .set(namespace, key, value.clone())
            .await
            .map_err(|err| Error::Storage(format!("{namespace}/{key}: {err}")))?;
        if let Err(err) = self.durable.set(namespace, key, value.clone()).await {
            warn!(%namespace, key, %err, "Durable mirror write failed; retrying once");
            if let Err(err) = self.durable.set(namespace, key, value).await {
                warn!(%namespace, key, %err, "Durable mirror write failed after retry");
            }
        }
        Ok(())
    }

    /// Union of both tiers' keys in a namespace.
    pub(crate) async fn list_keys(&self, namespace: Namespace) -> Result<Vec<String>> {
        let mut keys = match self.fast.keys(namespace).await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(%namespace, %err, "Fast tier key listing failed");
                Vec::new()
            }
        };
        match self.durable.keys(namespace).await {
            Ok(more) => {
                for key in more {
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
            }
            Err(err) => warn!(%namespace, %err, "Durable tier key listing failed"),
        }
        Ok(keys)
    }

    pub(crate) async fn remove_everywhere(
        &self,
        namespace: Namespace,
        key: &str,
        errors: &mut Vec<String>,
    ) {
        if let Err(err) = self.fast.remove(namespace, key).await {
            errors.push(format!("{namespace}/{key}: {err}"));
        }
        if let Err(err) = self.durable.remove(namespace, key).await {
            errors.push(format!("{namespace}/{key} (durable): {err}"));
        }
    }

    async fn read_list<T: serde::de::DeserializeOwned>(
        &self,
        namespace: Namespace,
        key: &str,
    ) -> Result<Option<Vec<T>>> {
        match self.read_through(namespace, key).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    async fn write_list<T: serde::Serialize>(
        &self,
        namespace: Namespace,
        key: &str,
        list: &[T],
    ) -> Result<()> {
        self.write_through(namespace, key, serde_json::to_vec(list)?)
            .await
    }

    // --- bookmarks ------------------------------------------------------

    /// Insert or replace a bookmark, matched by position reference.
    pub async fn upsert_bookmark(
        &self,
        book_id: &str,
        variant: Variant,
        mut bookmark: Bookmark,
    ) -> Result<Bookmark> {
        let key = variant.partition_key(book_id);
        let _guard = self.lock_record(Namespace::Bookmarks, &key).await;

        bookmark.created_at = Utc::now();
        let mut bookmarks: Vec<Bookmark> = self
            .read_list(Namespace::Bookmarks, &key)
            .await?
            .unwrap_or_default();
        match bookmarks
            .iter_mut()
            .find(|existing| existing.position == bookmark.position)
        {
            Some(existing) => *existing = bookmark.clone(),
            None => bookmarks.push(bookmark.clone()),
        }
        self.write_list(Namespace::Bookmarks, &key, &bookmarks).await?;
        debug!(book_id, ?variant, position = %bookmark.position, "Stored bookmark");
        Ok(bookmark)
    }

    /// The operation behind the "bookmark this page" action: removes an
    /// existing bookmark at the position, or creates one with a
    /// percentage-based label.
    pub async fn toggle_bookmark_at(
        &self,
        book_id: &str,
        variant: Variant,
        position: PositionRef,
        section_href: String,
        chapter_title: Option<String>,
        percentage: f64,
    ) -> Result<ToggleOutcome> {
        let key = variant.partition_key(book_id);
        let _guard = self.lock_record(Namespace::Bookmarks, &key).await;

        let mut bookmarks: Vec<Bookmark> = self
            .read_list(Namespace::Bookmarks, &key)
            .await?
            .unwrap_or_default();
        let before = bookmarks.len();
        bookmarks.retain(|existing| existing.position != position);
        if bookmarks.len() < before {
            self.write_list(Namespace::Bookmarks, &key, &bookmarks).await?;
            debug!(book_id, ?variant, %position, "Removed bookmark");
            return Ok(ToggleOutcome::Removed);
        }

        let bookmark = Bookmark {
            position,
            section_href,
            label: format!("At {:.2}%", round_percent(percentage)),
            chapter_title,
            created_at: Utc::now(),
        };
        bookmarks.push(bookmark.clone());
        self.write_list(Namespace::Bookmarks, &key, &bookmarks).await?;
        debug!(book_id, ?variant, position = %bookmark.position, "Created bookmark");
        Ok(ToggleOutcome::Created(bookmark))
    }

    pub async fn remove_bookmark(
        &self,
        book_id: &str,
        variant: Variant,
        position: &PositionRef,
    ) -> Result<bool> {
        let key = variant.partition_key(book_id);
        let _guard = self.lock_record(Namespace::Bookmarks, &key).await;

        let mut bookmarks: Vec<Bookmark> = self
            .read_list(Namespace::Bookmarks, &key)
            .await?
            .unwrap_or_default();
        let before = bookmarks.len();
        bookmarks.retain(|existing| &existing.position != position);
        if bookmarks.len() == before {
            return Ok(false);
        }
        self.write_list(Namespace::Bookmarks, &key, &bookmarks).await?;
        Ok(true)
    }

    // --- highlights -----------------------------------------------------

    /// Insert or replace a highlight, matched by position reference. The
    /// percentage snapshot is rounded and denormalized at write time.
    pub async fn upsert_highlight(
        &self,
        book_id: &str,
        variant: Variant,
        mut highlight: Highlight,
    ) -> Result<Highlight> {
        let key = variant.partition_key(book_id);
        let _guard = self.lock_record(Namespace::Highlights, &key).await;

        highlight.created_at = Utc::now();
        highlight.percentage = round_percent(highlight.percentage);
        let mut highlights: Vec<Highlight> = self
            .read_list(Namespace::Highlights, &key)
            .await?
            .unwrap_or_default();
        match highlights
            .iter_mut()
            .find(|existing| existing.position == highlight.position)
        {
            Some(existing) => *existing = highlight.clone(),
            None => highlights.push(highlight.clone()),
        }
        self.write_list(Namespace::Highlights, &key, &highlights).await?;
        debug!(book_id, ?variant, position = %highlight.position, "Stored highlight");
        Ok(highlight)
    }

    pub async fn remove_highlight(
        &self,
        book_id: &str,
        variant: Variant,
        position: &PositionRef,
    ) -> Result<bool> {
        let key = variant.partition_key(book_id);
        let _guard = self.lock_record(Namespace::Highlights, &key).await;

        let mut highlights: Vec<Highlight> = self
            .read_list(Namespace::Highlights, &key)
            .await?
            .unwrap_or_default();
        let before = highlights.len();
        highlights.retain(|existing| &existing.position != position);
        if highlights.len() == before {
            return Ok(false);
        }
        self.write_list(Namespace::Highlights, &key, &highlights).await?;
        debug!(book_id, ?variant, %position, "Removed highlight");
        Ok(true)
    }

    // --- reads ----------------------------------------------------------

    /// Both annotation lists of a partition.
    ///
    /// When neither tier has an entry for the partition, the legacy
    /// single-tier snapshot (if any) is migrated first; the answer is the
    /// same no matter which tier or format held the data.
    pub async fn get_annotations(&self, book_id: &str, variant: Variant) -> Result<AnnotationSet> {
        let key = variant.partition_key(book_id);
        let bookmarks = self
            .read_list::<Bookmark>(Namespace::Bookmarks, &key)
            .await?;
        let highlights = self
            .read_list::<Highlight>(Namespace::Highlights, &key)
            .await?;

        if bookmarks.is_none() && highlights.is_none() {
            if let Some(migrated) = self.migrate_legacy(book_id, variant).await? {
                return Ok(migrated);
            }
        }

        Ok(AnnotationSet {
            bookmarks: bookmarks.unwrap_or_default(),
            highlights: highlights.unwrap_or_default(),
        })
    }

    async fn migrate_legacy(
        &self,
        book_id: &str,
        variant: Variant,
    ) -> Result<Option<AnnotationSet>> {
        let config_key = format!("{book_id}_config");
        let Some(raw) = self.read_through(Namespace::Configs, &config_key).await? else {
            return Ok(None);
        };
        let legacy: BookConfig = match serde_json::from_slice(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(book_id, %err, "Unreadable legacy book config; skipping migration");
                return Ok(None);
            }
        };
        let Some(snapshot) = legacy_snapshot_for(&legacy, variant) else {
            return Ok(None);
        };
        if snapshot.bookmarks.is_empty() && snapshot.highlights.is_empty() {
            return Ok(None);
        }

        let key = variant.partition_key(book_id);
        self.write_list(Namespace::Bookmarks, &key, &snapshot.bookmarks)
            .await?;
        self.write_list(Namespace::Highlights, &key, &snapshot.highlights)
            .await?;
        info!(
            book_id,
            ?variant,
            bookmarks = snapshot.bookmarks.len(),
            highlights = snapshot.highlights.len(),
            "Migrated legacy annotations into tiered stores"
        );
        Ok(Some(AnnotationSet {
            bookmarks: snapshot.bookmarks.clone(),
            highlights: snapshot.highlights.clone(),
        }))
    }

    // --- reading progress -----------------------------------------------

    /// Overwrite the partition's single progress record. The timestamp is
    /// stamped here, not taken from the caller.
    pub async fn save_progress(
        &self,
        book_id: &str,
        variant: Variant,
        position: PositionRef,
        section_href: String,
        percentage: f64,
    ) -> Result<ReadingProgress> {
        if position.is_empty() {
            return Err(Error::InvalidProgress("empty position reference".into()));
        }
        if !percentage.is_finite() || !(0.0..=100.0).contains(&percentage) {
            return Err(Error::InvalidProgress(format!(
                "percentage {percentage} outside [0, 100]"
            )));
        }

        let key = variant.partition_key(book_id);
        let _guard = self.lock_record(Namespace::Progress, &key).await;
        let progress = ReadingProgress {
            position,
            section_href,
            percentage: round_percent(percentage),
            last_read_at: Utc::now(),
            variant,
        };
        self.write_through(Namespace::Progress, &key, serde_json::to_vec(&progress)?)
            .await?;
        debug!(book_id, ?variant, percentage = progress.percentage, "Saved reading progress");
        Ok(progress)
    }

    /// `None` means never read: open at document start.
    pub async fn get_progress(
        &self,
        book_id: &str,
        variant: Variant,
    ) -> Result<Option<ReadingProgress>> {
        let key = variant.partition_key(book_id);
        match self.read_through(Namespace::Progress, &key).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    // --- configuration --------------------------------------------------

    pub async fn save_settings(
        &self,
        book_id: &str,
        lang_tag: &str,
        settings: &ReaderSettings,
    ) -> Result<()> {
        let config_key = format!("{book_id}_config");
        let _guard = self.lock_record(Namespace::Configs, &config_key).await;

        let mut config: BookConfig = match self.read_through(Namespace::Configs, &config_key).await?
        {
            Some(raw) => serde_json::from_slice(&raw).unwrap_or_default(),
            None => BookConfig::default(),
        };
        config
            .variants
            .entry(lang_tag.to_string())
            .or_insert_with(VariantConfig::default)
            .settings = Some(settings.clone());
        self.write_through(Namespace::Configs, &config_key, serde_json::to_vec(&config)?)
            .await
    }

    pub async fn load_settings(
        &self,
        book_id: &str,
        lang_tag: &str,
    ) -> Result<Option<ReaderSettings>> {
        let config_key = format!("{book_id}_config");
        let Some(raw) = self.read_through(Namespace::Configs, &config_key).await? else {
            return Ok(None);
        };
        let config: BookConfig = serde_json::from_slice(&raw)?;
        Ok(config
            .variants
            .get(lang_tag)
            .and_then(|entry| entry.settings.clone()))
    }

    // --- deletion -------------------------------------------------------

    /// Remove every trace of a book: record, raw file, cover, config,
    /// both annotation partitions, progress, and cached translations.
    ///
    /// The cascade is best-effort per entry; failures are aggregated into
    /// a single error so a partial deletion is never silent.
    pub async fn delete_book(&self, book_id: &str) -> Result<()> {
        let mut errors = Vec::new();

        for key in [
            Variant::Original.partition_key(book_id),
            Variant::Translated.partition_key(book_id),
        ] {
            self.remove_everywhere(Namespace::Bookmarks, &key, &mut errors)
                .await;
            self.remove_everywhere(Namespace::Highlights, &key, &mut errors)
                .await;
            self.remove_everywhere(Namespace::Progress, &key, &mut errors)
                .await;
        }

        self.remove_everywhere(Namespace::Books, book_id, &mut errors)
            .await;
        self.remove_everywhere(Namespace::Files, book_id, &mut errors)
            .await;
        self.remove_everywhere(Namespace::Covers, book_id, &mut errors)
            .await;
        self.remove_everywhere(Namespace::Configs, &format!("{book_id}_config"), &mut errors)
            .await;

        self.delete_translations(book_id, &mut errors).await;

        if errors.is_empty() {
            info!(book_id, "Deleted book and all associated data");
            Ok(())
        } else {
            Err(Error::Storage(format!(
                "book deletion incomplete: {}",
                errors.join("; ")
            )))
        }
    }

    async fn delete_translations(&self, book_id: &str, errors: &mut Vec<String>) {
        let prefix = format!("{book_id}:");
        for store in [&self.fast, &self.durable] {
            let keys = match store.keys(Namespace::Translations).await {
                Ok(keys) => keys,
                Err(err) => {
                    errors.push(format!("translations listing: {err}"));
                    continue;
                }
            };
            for key in keys.into_iter().filter(|key| key.starts_with(&prefix)) {
                if let Err(err) = store.remove(Namespace::Translations, &key).await {
                    errors.push(format!("translations/{key}: {err}"));
                }
            }
        }
    }
}

/// Legacy snapshot for a partition: the original view lives under the
/// `original` tag, the translated view under whichever language tag was
/// active (first in sorted order when several exist).
fn legacy_snapshot_for(config: &BookConfig, variant: Variant) -> Option<&VariantConfig> {
    match variant {
        Variant::Original => config.variants.get(ORIGINAL_LANG_TAG),
        Variant::Translated => {
            let mut tags: Vec<&String> = config
                .variants
                .keys()
                .filter(|tag| tag.as_str() != ORIGINAL_LANG_TAG)
                .collect();
            tags.sort();
            tags.first().and_then(|tag| config.variants.get(*tag))
        }
    }
}
