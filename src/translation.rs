//! Translation variant management.
//!
//! The manager owns which view of the book is active (`Original` or
//! `Translated(lang)`), the translated-text cache, and the cancellation
//! context for in-flight lookups. The cache is a correctness cache: it
//! exists to keep the external service from being queried twice for the
//! same passage, so entries live for the whole session and are dropped
//! only by [`TranslationManager::clear_translation`] or book deletion.
//! It is an owned, injected object, never process-wide state.
//!
//! Concurrency guard: at most one lookup per content key is in flight. A
//! duplicate request for a queued key is dropped and resolves to the
//! untranslated text.

use crate::annotations::{PositionRef, Variant};
use crate::cancellation::CancellationToken;
use crate::error::Result;
use crate::store::{KeyValueStore, Namespace};
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// External machine-translation lookup.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        target_lang: &str,
        token: &CancellationToken,
    ) -> Result<String>;
}

/// Which view of the book is active.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VariantState {
    #[default]
    Original,
    Translated {
        lang: String,
    },
}

impl VariantState {
    pub fn variant(&self) -> Variant {
        match self {
            VariantState::Original => Variant::Original,
            VariantState::Translated { .. } => Variant::Translated,
        }
    }

    pub fn lang(&self) -> Option<&str> {
        match self {
            VariantState::Original => None,
            VariantState::Translated { lang } => Some(lang),
        }
    }
}

pub struct TranslationManager {
    translator: Arc<dyn Translator>,
    store: Arc<dyn KeyValueStore>,
    state: Mutex<VariantState>,
    cache: Mutex<HashMap<String, String>>,
    in_flight: Mutex<HashSet<String>>,
    token: Mutex<CancellationToken>,
}

impl TranslationManager {
    pub fn new(translator: Arc<dyn Translator>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            translator,
            store,
            state: Mutex::new(VariantState::Original),
            cache: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            token: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn state(&self) -> VariantState {
        self.state.lock().clone()
    }

    pub fn active_variant(&self) -> Variant {
        self.state.lock().variant()
    }

    /// Language tag the active view stores its settings snapshot under.
    pub fn lang_tag(&self) -> String {
        match &*self.state.lock() {
            VariantState::Original => crate::config::ORIGINAL_LANG_TAG.to_string(),
            VariantState::Translated { lang } => lang.clone(),
        }
    }

    /// Switch the active view. Cancels every lookup still in flight for
    /// the previous context so a stale result cannot land in the new one.
    /// Returns the previous state.
    pub fn set_language(&self, lang: Option<&str>) -> VariantState {
        let next = match lang {
            Some(lang) => VariantState::Translated { lang: lang.to_string() },
            None => VariantState::Original,
        };
        let previous = std::mem::replace(&mut *self.state.lock(), next.clone());
        let stale = std::mem::replace(&mut *self.token.lock(), CancellationToken::new());
        stale.cancel();
        info!(from = ?previous, to = ?next, "Switched translation variant");
        previous
    }

    /// Revert to the original view and drop every cached translation.
    pub fn clear_translation(&self) {
        self.set_language(None);
        let dropped = {
            let mut cache = self.cache.lock();
            let dropped = cache.len();
            cache.clear();
            dropped
        };
        debug!(dropped, "Cleared translation cache");
    }

    /// Cancel in-flight lookups without changing state; used when the
    /// reader closes.
    pub fn cancel_inflight(&self) {
        let stale = std::mem::replace(&mut *self.token.lock(), CancellationToken::new());
        stale.cancel();
    }

    /// Drop session-cached translations of one book. The persisted copies
    /// go away with the repository's deletion cascade.
    pub fn forget_book(&self, book_id: &str) {
        let prefix = format!("{book_id}:");
        self.cache.lock().retain(|key, _| !key.starts_with(&prefix));
    }

    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }

    /// Text to display for a passage under the active view.
    ///
    /// Under `Original` this is the input text. Under `Translated(lang)`
    /// the session cache answers first, then the translations namespace,
    /// then the external service; every failure path (cancelled, dropped
    /// duplicate, service error) falls back to the untranslated text.
    pub async fn section_text_for_display(
        &self,
        book_id: &str,
        position: &PositionRef,
        original: &str,
    ) -> String {
        let lang = match &*self.state.lock() {
            VariantState::Original => return original.to_string(),
            VariantState::Translated { lang } => lang.clone(),
        };
        let key = content_key(book_id, position, &lang);

        let cached = self.cache.lock().get(&key).cloned();
        if let Some(hit) = cached {
            return hit;
        }

        match self.store.get(Namespace::Translations, &key).await {
            Ok(Some(raw)) => {
                let text = String::from_utf8_lossy(&raw).into_owned();
                self.cache.lock().insert(key, text.clone());
                return text;
            }
            Ok(None) => {}
            Err(err) => warn!(%err, "Translation store read failed"),
        }

        {
            let mut in_flight = self.in_flight.lock();
            if !in_flight.insert(key.clone()) {
                debug!(%position, lang, "Duplicate translation request dropped");
                return original.to_string();
            }
        }
        let token = self.token.lock().clone();
        let outcome = self.translator.translate(original, &lang, &token).await;
        self.in_flight.lock().remove(&key);

        match outcome {
            Ok(translated) => {
                if token.is_cancelled() {
                    // The context changed while the fetch was out; do not
                    // let the stale result into the new context's cache.
                    debug!(%position, lang, "Discarding translation from a cancelled context");
                    return original.to_string();
                }
                self.cache.lock().insert(key.clone(), translated.clone());
                if let Err(err) = self
                    .store
                    .set(Namespace::Translations, &key, translated.clone().into_bytes())
                    .await
                {
                    warn!(%err, "Could not persist translated text");
                }
                translated
            }
            Err(err) => {
                warn!(%err, lang, "Translation failed; showing untranslated text");
                original.to_string()
            }
        }
    }
}

/// Cache key for a translated passage. The position reference is hashed
/// so keys stay short and storage-safe regardless of how the engine
/// encodes its references.
fn content_key(book_id: &str, position: &PositionRef, lang: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(position.as_str().as_bytes());
    let digest = hasher.finalize();
    format!("{book_id}:{digest:x}:{lang}")
}
