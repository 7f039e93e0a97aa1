//! Render/navigation bridge.
//!
//! Turns high-level intents (open, jump to a bookmark, jump to a search
//! hit, restore the last session) into concrete render calls, reconciling
//! stored position references against the freshly computed location index,
//! since references can drift after layout changes.
//!
//! The bridge holds only ephemeral, reconstructible state: the current
//! location, the derived percentage, the in-memory search results. The
//! repository is the source of truth for everything persisted; on any
//! ambiguity the bridge defers to it. Annotation and progress failures
//! are logged here and never interrupt reading; only open failures and
//! fully exhausted navigation fallbacks surface to the caller.

use crate::annotations::{
    AnnotationSet, Bookmark, Highlight, HighlightColor, PositionRef,
};
use crate::config::ReaderSettings;
use crate::engine::{DocumentEngine, Location, LocationChange, RenderTarget, TocEntry};
use crate::error::{Error, Result};
use crate::locations::{DEFAULT_GRANULARITY, LocationIndex};
use crate::search::{SearchHit, search_book};
use crate::store::{AnnotationRepository, ToggleOutcome};
use crate::translation::TranslationManager;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How far a resolved reference may land from its expected percentage
/// before navigation falls back to the stored percentage.
pub const NAVIGATION_TOLERANCE_PCT: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeState {
    Loading,
    Ready,
    Error(String),
}

pub struct ReaderBridge<E: DocumentEngine> {
    engine: E,
    repo: Arc<AnnotationRepository>,
    translations: TranslationManager,
    book_id: String,
    settings: ReaderSettings,
    granularity: usize,
    state: BridgeState,
    toc: Vec<TocEntry>,
    index: Option<LocationIndex>,
    index_failed: bool,
    current: Option<Location>,
    current_percentage: f64,
    last_saved_position: Option<PositionRef>,
    search_hits: Vec<SearchHit>,
    selected_hit: usize,
}

impl<E: DocumentEngine> ReaderBridge<E> {
    pub fn new(
        engine: E,
        repo: Arc<AnnotationRepository>,
        translations: TranslationManager,
        book_id: String,
        settings: ReaderSettings,
    ) -> Self {
        Self {
            engine,
            repo,
            translations,
            book_id,
            settings: settings.clamped(),
            granularity: DEFAULT_GRANULARITY,
            state: BridgeState::Loading,
            toc: Vec::new(),
            index: None,
            index_failed: false,
            current: None,
            current_percentage: 0.0,
            last_saved_position: None,
            search_hits: Vec::new(),
            selected_hit: 0,
        }
    }

    pub fn with_granularity(mut self, granularity: usize) -> Self {
        self.granularity = granularity.max(2);
        self
    }

    pub fn state(&self) -> &BridgeState {
        &self.state
    }

    pub fn book_id(&self) -> &str {
        &self.book_id
    }

    pub fn settings(&self) -> &ReaderSettings {
        &self.settings
    }

    pub fn translations(&self) -> &TranslationManager {
        &self.translations
    }

    pub fn current_location(&self) -> Option<&Location> {
        self.current.as_ref()
    }

    pub fn current_percentage(&self) -> f64 {
        self.current_percentage
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    // --- lifecycle ------------------------------------------------------

    /// Open the book: restore per-book settings and the last reading
    /// position for the active variant, then project the variant's
    /// highlights. A failure here is terminal for the session; the book
    /// must be reopened.
    pub async fn open(&mut self) -> Result<()> {
        match self
            .repo
            .load_settings(&self.book_id, &self.translations.lang_tag())
            .await
        {
            Ok(Some(stored)) => self.settings = stored.clamped(),
            Ok(None) => {}
            Err(err) => warn!(%err, "Could not load stored reader settings"),
        }
        self.toc = self.engine.toc();

        let variant = self.translations.active_variant();
        let progress = match self.repo.get_progress(&self.book_id, variant).await {
            Ok(progress) => progress,
            Err(err) => {
                warn!(%err, "Could not load reading progress; opening at start");
                None
            }
        };
        let rendered = match &progress {
            Some(record) => {
                match self
                    .render_with_fallback(
                        Some(&record.position),
                        Some(record.percentage),
                        Some(&record.section_href),
                    )
                    .await
                {
                    Ok(location) => Ok(location),
                    Err(err) => {
                        warn!(%err, "Stored progress no longer navigable; opening at start");
                        self.render_start().await
                    }
                }
            }
            None => self.render_start().await,
        };

        match rendered {
            Ok(location) => {
                self.state = BridgeState::Ready;
                // Restoring the persisted position must not immediately
                // rewrite it; a fallback landing elsewhere should.
                self.last_saved_position = match &progress {
                    Some(record) if record.position == location.position => {
                        Some(record.position.clone())
                    }
                    _ => None,
                };
                self.track_location(&location);
                self.reapply_overlays().await;
                info!(
                    book_id = %self.book_id,
                    title = %self.engine.metadata().title,
                    restored = progress.is_some(),
                    "Opened book"
                );
                Ok(())
            }
            Err(err) => {
                self.state = BridgeState::Error(err.to_string());
                tracing::error!(%err, book_id = %self.book_id, "Failed to open book");
                Err(err)
            }
        }
    }

    /// Cancel in-flight work and release the engine. The bridge returns
    /// to `Loading` and refuses navigation until reopened.
    pub async fn close(&mut self) {
        self.translations.cancel_inflight();
        self.engine.destroy().await;
        self.state = BridgeState::Loading;
        self.index = None;
        self.index_failed = false;
        self.current = None;
        self.current_percentage = 0.0;
        self.last_saved_position = None;
        self.search_hits.clear();
        self.selected_hit = 0;
        info!(book_id = %self.book_id, "Closed book");
    }

    fn ensure_ready(&self) -> Result<()> {
        match &self.state {
            BridgeState::Ready => Ok(()),
            BridgeState::Loading => Err(Error::NotReady("book is not open".into())),
            BridgeState::Error(reason) => Err(Error::NotReady(reason.clone())),
        }
    }

    async fn render_start(&mut self) -> Result<Location> {
        let Some(first) = self.engine.section_hrefs().into_iter().next() else {
            return Err(Error::Load("document has no sections".into()));
        };
        self.engine
            .render_at(RenderTarget::Href(&first))
            .await
            .map_err(|err| Error::Load(err.to_string()))
    }

    // --- location tracking ----------------------------------------------

    fn track_location(&mut self, location: &Location) {
        self.current_percentage = match &self.index {
            Some(index) => index.position_to_percentage(&self.engine, &location.position),
            None => 0.0,
        };
        self.current = Some(location.clone());
    }

    /// Feed an engine relocation report into the bridge. Intermediate
    /// frames only refresh ephemeral state; a settled report persists
    /// reading progress for the active variant, unless the position is
    /// the one already persisted.
    pub async fn on_relocated(&mut self, location: Location, change: LocationChange) {
        if self.state != BridgeState::Ready {
            debug!(?change, "Relocation report ignored while not ready");
            return;
        }
        self.track_location(&location);
        if change != LocationChange::Settled {
            return;
        }
        if self.last_saved_position.as_ref() == Some(&location.position) {
            return;
        }
        let variant = self.translations.active_variant();
        match self
            .repo
            .save_progress(
                &self.book_id,
                variant,
                location.position.clone(),
                location.section_href.clone(),
                self.current_percentage,
            )
            .await
        {
            Ok(_) => self.last_saved_position = Some(location.position),
            Err(err) => warn!(%err, "Progress save failed; reading continues"),
        }
    }

    // --- index ----------------------------------------------------------

    /// Build the location index if this pagination state does not have
    /// one yet. A failed build is remembered and not retried until a
    /// reflow produces a new pagination state.
    async fn ensure_index(&mut self) -> Result<()> {
        if self.index.is_some() {
            return Ok(());
        }
        if self.index_failed {
            return Err(Error::IndexBuild(
                "index build already failed for this pagination".into(),
            ));
        }
        match LocationIndex::build(&mut self.engine, self.granularity).await {
            Ok(index) => {
                self.index = Some(index);
                Ok(())
            }
            Err(err) => {
                self.index_failed = true;
                warn!(%err, "Percentage navigation degraded");
                Err(err)
            }
        }
    }

    // --- navigation -----------------------------------------------------

    pub async fn next_page(&mut self) -> Result<Location> {
        self.ensure_ready()?;
        let location = self
            .engine
            .next_page()
            .await
            .map_err(|err| Error::Navigation(err.to_string()))?;
        self.track_location(&location);
        Ok(location)
    }

    pub async fn previous_page(&mut self) -> Result<Location> {
        self.ensure_ready()?;
        let location = self
            .engine
            .previous_page()
            .await
            .map_err(|err| Error::Navigation(err.to_string()))?;
        self.track_location(&location);
        Ok(location)
    }

    /// Jump to a percentage. The only path where a percentage is ground
    /// truth; everything stored navigates by reference first.
    pub async fn go_to_percentage(&mut self, percentage: f64) -> Result<Location> {
        self.ensure_ready()?;
        self.ensure_index().await?;
        let target = {
            let Some(index) = &self.index else {
                return Err(Error::OutOfRangeReference);
            };
            index.percentage_to_position(percentage)?.clone()
        };
        let location = self
            .engine
            .render_at(RenderTarget::Position(&target))
            .await
            .map_err(|err| Error::Navigation(err.to_string()))?;
        self.track_location(&location);
        Ok(location)
    }

    /// Open a chapter by its content href.
    pub async fn go_to_section(&mut self, href: &str) -> Result<Location> {
        self.ensure_ready()?;
        let location = self
            .engine
            .render_at(RenderTarget::Href(href))
            .await
            .map_err(|err| Error::Navigation(err.to_string()))?;
        self.track_location(&location);
        Ok(location)
    }

    pub async fn go_to_bookmark(&mut self, bookmark: &Bookmark) -> Result<Location> {
        self.ensure_ready()?;
        let location = self
            .render_with_fallback(Some(&bookmark.position), None, Some(&bookmark.section_href))
            .await?;
        self.track_location(&location);
        Ok(location)
    }

    pub async fn go_to_highlight(&mut self, highlight: &Highlight) -> Result<Location> {
        self.ensure_ready()?;
        let location = self
            .render_with_fallback(Some(&highlight.position), Some(highlight.percentage), None)
            .await?;
        self.track_location(&location);
        Ok(location)
    }

    /// Reference first; stored percentage when the reference fails or
    /// lands outside the tolerance band; section href last. Exhausting
    /// the chain is a navigation error, not a session failure.
    async fn render_with_fallback(
        &mut self,
        position: Option<&PositionRef>,
        expected_pct: Option<f64>,
        href: Option<&str>,
    ) -> Result<Location> {
        if let Some(position) = position {
            match self.engine.render_at(RenderTarget::Position(position)).await {
                Ok(location) => {
                    let drifted = match expected_pct {
                        Some(expected) => self.landed_outside_tolerance(&location, expected).await,
                        None => false,
                    };
                    if !drifted {
                        return Ok(location);
                    }
                    warn!(
                        %position,
                        expected = expected_pct,
                        "Reference landed outside the tolerance band; falling back to percentage"
                    );
                }
                Err(err) => {
                    warn!(%position, %err, "Stored reference no longer resolves; trying fallbacks");
                }
            }
        }

        if let Some(expected) = expected_pct {
            if self.ensure_index().await.is_ok() {
                let target = self
                    .index
                    .as_ref()
                    .and_then(|index| index.percentage_to_position(expected).ok().cloned());
                if let Some(target) = target {
                    match self.engine.render_at(RenderTarget::Position(&target)).await {
                        Ok(location) => return Ok(location),
                        Err(err) => warn!(expected, %err, "Percentage fallback failed"),
                    }
                }
            }
        }

        if let Some(href) = href {
            match self.engine.render_at(RenderTarget::Href(href)).await {
                Ok(location) => return Ok(location),
                Err(err) => warn!(href, %err, "Section fallback failed"),
            }
        }

        Err(Error::Navigation("no stored target could be resolved".into()))
    }

    async fn landed_outside_tolerance(&mut self, location: &Location, expected: f64) -> bool {
        if self.ensure_index().await.is_err() {
            // Without an index the landing cannot be verified; accept it.
            return false;
        }
        let Some(index) = &self.index else {
            return false;
        };
        let landed = index.position_to_percentage(&self.engine, &location.position);
        (landed - expected).abs() > NAVIGATION_TOLERANCE_PCT
    }

    // --- annotations ----------------------------------------------------

    /// Both annotation lists of the active variant.
    pub async fn annotations(&self) -> Result<AnnotationSet> {
        self.repo
            .get_annotations(&self.book_id, self.translations.active_variant())
            .await
    }

    /// Toggle a bookmark at the current location. Failures are logged
    /// and reported as `None`; they never interrupt reading.
    pub async fn toggle_bookmark_here(&mut self) -> Option<ToggleOutcome> {
        if self.ensure_ready().is_err() {
            return None;
        }
        let location = self.current.clone()?;
        let chapter_title = self.chapter_title_for(&location.section_href);
        match self
            .repo
            .toggle_bookmark_at(
                &self.book_id,
                self.translations.active_variant(),
                location.position,
                location.section_href,
                chapter_title,
                self.current_percentage,
            )
            .await
        {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                warn!(%err, "Bookmark toggle failed");
                None
            }
        }
    }

    /// Highlight the text currently selected in the renderer. The host
    /// passes the selection's own range reference (from the engine's
    /// text-selected notification); the percentage snapshot is
    /// denormalized here for later fallback navigation.
    pub async fn add_highlight_from_selection(
        &mut self,
        position: PositionRef,
        text: impl Into<String>,
        color: HighlightColor,
    ) -> Option<Highlight> {
        if self.ensure_ready().is_err() {
            return None;
        }
        let percentage = match &self.index {
            Some(index) => index.position_to_percentage(&self.engine, &position),
            None => self.current_percentage,
        };
        let chapter_title = self
            .current
            .as_ref()
            .map(|location| location.section_href.clone())
            .and_then(|href| self.chapter_title_for(&href));
        let highlight = Highlight {
            position,
            text: text.into(),
            color,
            chapter_title,
            created_at: Utc::now(),
            percentage,
        };
        match self
            .repo
            .upsert_highlight(&self.book_id, self.translations.active_variant(), highlight)
            .await
        {
            Ok(stored) => {
                self.reapply_overlays().await;
                Some(stored)
            }
            Err(err) => {
                warn!(%err, "Highlight save failed");
                None
            }
        }
    }

    /// Highlight the given text at the current location, then reproject
    /// the overlay set.
    pub async fn add_highlight_here(
        &mut self,
        text: impl Into<String>,
        color: HighlightColor,
    ) -> Option<Highlight> {
        let location = self.current.clone()?;
        self.add_highlight_from_selection(location.position, text, color)
            .await
    }

    pub async fn remove_highlight_at(&mut self, position: &PositionRef) -> Option<bool> {
        if self.ensure_ready().is_err() {
            return None;
        }
        match self
            .repo
            .remove_highlight(&self.book_id, self.translations.active_variant(), position)
            .await
        {
            Ok(removed) => {
                if removed {
                    self.reapply_overlays().await;
                }
                Some(removed)
            }
            Err(err) => {
                warn!(%err, "Highlight removal failed");
                None
            }
        }
    }

    /// Clear-then-reapply the active variant's highlights onto the
    /// renderer. Incremental diffing is deliberately avoided; replacing
    /// the whole set cannot leave stale overlay artifacts behind.
    async fn reapply_overlays(&mut self) {
        let variant = self.translations.active_variant();
        let set = match self.repo.get_annotations(&self.book_id, variant).await {
            Ok(set) => set,
            Err(err) => {
                warn!(%err, "Could not load annotations for overlay projection");
                return;
            }
        };
        if let Err(err) = self.engine.set_overlays(&set.highlights).await {
            warn!(%err, "Overlay projection failed");
        }
    }

    // --- variants -------------------------------------------------------

    /// Switch between the original view and a translated view.
    ///
    /// Freezes the current position, swaps the active annotation
    /// partition, reprojects its highlights, and prefers the target
    /// variant's own reading progress over carrying the frozen position
    /// across, since translated content reflows differently. The
    /// location index is dropped for the same reason.
    pub async fn switch_variant(&mut self, lang: Option<&str>) -> Result<Location> {
        self.ensure_ready()?;
        let frozen = self.current.clone();
        self.translations.set_language(lang);
        self.index = None;
        self.index_failed = false;

        self.reapply_overlays().await;

        let variant = self.translations.active_variant();
        let progress = match self.repo.get_progress(&self.book_id, variant).await {
            Ok(progress) => progress,
            Err(err) => {
                warn!(%err, "Could not load target variant progress");
                None
            }
        };
        let rendered = match &progress {
            Some(record) => {
                self.render_with_fallback(
                    Some(&record.position),
                    Some(record.percentage),
                    Some(&record.section_href),
                )
                .await
            }
            None => match &frozen {
                Some(location) => {
                    self.render_with_fallback(
                        Some(&location.position),
                        None,
                        Some(&location.section_href),
                    )
                    .await
                }
                None => self.render_start().await,
            },
        };

        let location = rendered?;
        self.last_saved_position = None;
        self.track_location(&location);
        info!(?variant, lang = ?lang, "Variant switch complete");
        Ok(location)
    }

    /// Text of a section under the active view: untranslated for the
    /// original variant, translated (cache, store, then service) for a
    /// translated one.
    pub async fn display_text_for_section(&mut self, href: &str) -> Result<String> {
        self.ensure_ready()?;
        let text = self.engine.section_text(href).await?;
        let anchor = match self.engine.position_for_range(href, 0, 0) {
            Ok(position) => position,
            Err(err) => {
                warn!(href, %err, "No anchor position for section; showing untranslated text");
                return Ok(text);
            }
        };
        Ok(self
            .translations
            .section_text_for_display(&self.book_id, &anchor, &text)
            .await)
    }

    // --- settings -------------------------------------------------------

    /// Apply and persist reader settings. When the change reflows the
    /// text, the location index is invalidated and the view re-anchors
    /// on the frozen position reference.
    pub async fn apply_settings(&mut self, settings: ReaderSettings) {
        let next = settings.clamped();
        if next == self.settings {
            return;
        }
        let reflow = self.settings.reflow_differs(&next);
        self.settings = next;
        if let Err(err) = self
            .repo
            .save_settings(&self.book_id, &self.translations.lang_tag(), &self.settings)
            .await
        {
            warn!(%err, "Could not persist reader settings");
        }
        if !reflow {
            return;
        }
        self.index = None;
        self.index_failed = false;
        debug!(
            font_size = self.settings.font_size,
            "Reflow settings applied; location index invalidated"
        );
        if let Some(location) = self.current.clone() {
            match self
                .engine
                .render_at(RenderTarget::Position(&location.position))
                .await
            {
                Ok(location) => self.track_location(&location),
                Err(err) => warn!(%err, "Could not re-anchor after reflow"),
            }
        }
    }

    // --- chapters -------------------------------------------------------

    /// Label of the TOC entry matching an href: exact match first, then
    /// substring containment, so `ch3.xhtml#sec2` still finds the entry
    /// for `ch3.xhtml`.
    pub fn chapter_title_for(&self, href: &str) -> Option<String> {
        if let Some(entry) = self.toc.iter().find(|entry| entry.href == href) {
            return Some(entry.label.clone());
        }
        self.toc
            .iter()
            .find(|entry| href.contains(entry.href.as_str()) || entry.href.contains(href))
            .map(|entry| entry.label.clone())
    }

    pub fn toc(&self) -> &[TocEntry] {
        &self.toc
    }

    // --- search ---------------------------------------------------------

    /// Scan the whole document for a literal query. An empty query or a
    /// document whose index cannot be built yields an empty result set.
    pub async fn search(&mut self, query: &str) -> Vec<SearchHit> {
        self.search_hits.clear();
        self.selected_hit = 0;
        if self.ensure_ready().is_err() || query.trim().is_empty() {
            return Vec::new();
        }
        if self.ensure_index().await.is_err() {
            warn!("Search skipped: no location index for this document");
            return Vec::new();
        }
        let Some(index) = &self.index else {
            return Vec::new();
        };
        let hits = search_book(&mut self.engine, index, query).await;
        info!(query, hits = hits.len(), "Search complete");
        self.search_hits = hits.clone();
        hits
    }

    pub fn search_hits(&self) -> &[SearchHit] {
        &self.search_hits
    }

    pub fn select_next_hit(&mut self) -> Option<&SearchHit> {
        if self.search_hits.is_empty() {
            return None;
        }
        self.selected_hit = (self.selected_hit + 1) % self.search_hits.len();
        self.search_hits.get(self.selected_hit)
    }

    pub fn select_previous_hit(&mut self) -> Option<&SearchHit> {
        if self.search_hits.is_empty() {
            return None;
        }
        self.selected_hit = self
            .selected_hit
            .checked_sub(1)
            .unwrap_or(self.search_hits.len() - 1);
        self.search_hits.get(self.selected_hit)
    }

    pub async fn go_to_search_hit(&mut self, idx: usize) -> Result<Location> {
        self.ensure_ready()?;
        let Some(hit) = self.search_hits.get(idx).cloned() else {
            return Err(Error::Navigation(format!("no search hit at index {idx}")));
        };
        self.selected_hit = idx;
        let location = self
            .render_with_fallback(Some(&hit.position), Some(hit.percentage), Some(&hit.section_href))
            .await?;
        self.track_location(&location);
        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::Variant;
    use crate::config::ThemeMode;
    use crate::store::MemoryStore;
    use crate::testutil::{FakeEngine, FakeTranslator, init_logging, offset_of};
    use crate::translation::TranslationManager;

    fn test_repo() -> Arc<AnnotationRepository> {
        Arc::new(AnnotationRepository::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
        ))
    }

    fn test_translations() -> TranslationManager {
        TranslationManager::new(Arc::new(FakeTranslator::new()), Arc::new(MemoryStore::new()))
    }

    fn bridge_over(engine: FakeEngine, repo: Arc<AnnotationRepository>) -> ReaderBridge<FakeEngine> {
        init_logging();
        ReaderBridge::new(
            engine,
            repo,
            test_translations(),
            "book-1".into(),
            ReaderSettings::default(),
        )
    }

    async fn open_bridge(engine: FakeEngine) -> ReaderBridge<FakeEngine> {
        let mut bridge = bridge_over(engine, test_repo());
        bridge.open().await.expect("open");
        bridge
    }

    fn pos(offset: usize) -> PositionRef {
        PositionRef::new(format!("pos:{offset}"))
    }

    #[tokio::test]
    async fn opens_at_document_start_without_history() {
        let bridge = open_bridge(FakeEngine::with_uniform_sections(4, 1000)).await;
        assert_eq!(bridge.state(), &BridgeState::Ready);
        let location = bridge.current_location().expect("location");
        assert_eq!(location.section_href, "ch1.xhtml");
        assert_eq!(offset_of(location), 0);
    }

    #[tokio::test]
    async fn open_restores_saved_progress() {
        let repo = test_repo();
        repo.save_progress("book-1", Variant::Original, pos(2500), "ch3.xhtml".into(), 62.5)
            .await
            .expect("seed progress");
        let mut bridge = bridge_over(FakeEngine::with_uniform_sections(4, 1000), repo);
        bridge.open().await.expect("open");

        let location = bridge.current_location().expect("location");
        assert_eq!(offset_of(location), 2500);
        assert_eq!(location.section_href, "ch3.xhtml");
    }

    #[tokio::test]
    async fn open_failure_is_terminal() {
        let mut engine = FakeEngine::with_uniform_sections(2, 100);
        engine.fail_href("ch1.xhtml");
        let mut bridge = bridge_over(engine, test_repo());
        let err = bridge.open().await.expect_err("open fails");
        assert!(matches!(err, Error::Load(_)));
        assert!(matches!(bridge.state(), BridgeState::Error(_)));
        assert!(matches!(
            bridge.next_page().await,
            Err(Error::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn only_settled_relocations_persist_progress() {
        let repo = test_repo();
        let mut bridge = bridge_over(FakeEngine::with_uniform_sections(4, 1000), repo.clone());
        bridge.open().await.expect("open");

        let passing = Location {
            position: pos(700),
            section_href: "ch1.xhtml".into(),
        };
        bridge
            .on_relocated(passing.clone(), LocationChange::Intermediate)
            .await;
        assert!(
            repo.get_progress("book-1", Variant::Original)
                .await
                .expect("read")
                .is_none(),
            "intermediate frames must not persist"
        );

        bridge.on_relocated(passing, LocationChange::Settled).await;
        let stored = repo
            .get_progress("book-1", Variant::Original)
            .await
            .expect("read")
            .expect("settled frame persists");
        assert_eq!(stored.position, pos(700));
        assert_eq!(stored.section_href, "ch1.xhtml");
    }

    #[tokio::test]
    async fn bookmark_toggle_round_trips_through_the_bridge() {
        let mut bridge = open_bridge(FakeEngine::with_uniform_sections(4, 1000)).await;
        let created = bridge.toggle_bookmark_here().await.expect("outcome");
        assert!(matches!(created, ToggleOutcome::Created(_)));

        let removed = bridge.toggle_bookmark_here().await.expect("outcome");
        assert_eq!(removed, ToggleOutcome::Removed);
        let set = bridge.annotations().await.expect("annotations");
        assert!(set.bookmarks.is_empty());
    }

    #[tokio::test]
    async fn dead_reference_falls_back_to_stored_percentage() {
        let mut engine = FakeEngine::with_uniform_sections(10, 1000);
        let stale = pos(8000);
        engine.kill_position(&stale);
        let mut bridge = open_bridge(engine).await;

        let highlight = Highlight {
            position: stale,
            text: "whale".into(),
            color: HighlightColor::Yellow,
            chapter_title: None,
            created_at: Utc::now(),
            percentage: 80.0,
        };
        let location = bridge.go_to_highlight(&highlight).await.expect("fallback");
        let landed = offset_of(&location);
        assert!(
            (7800..=8200).contains(&landed),
            "percentage fallback landed at {landed}"
        );
    }

    #[tokio::test]
    async fn drifted_reference_outside_tolerance_falls_back() {
        let mut engine = FakeEngine::with_uniform_sections(10, 1000);
        let drifted = pos(8000);
        // The reference still resolves, but to the start of the book.
        engine.alias_position(&drifted, 100);
        let mut bridge = open_bridge(engine).await;

        let highlight = Highlight {
            position: drifted,
            text: "whale".into(),
            color: HighlightColor::Yellow,
            chapter_title: None,
            created_at: Utc::now(),
            percentage: 80.0,
        };
        let location = bridge.go_to_highlight(&highlight).await.expect("fallback");
        let landed = offset_of(&location);
        assert!(
            (7800..=8200).contains(&landed),
            "tolerance band rejected the drifted landing, got {landed}"
        );
    }

    #[tokio::test]
    async fn bookmark_falls_back_to_section_href() {
        let mut engine = FakeEngine::with_uniform_sections(4, 1000);
        let stale = pos(1500);
        engine.kill_position(&stale);
        let mut bridge = open_bridge(engine).await;

        let bookmark = Bookmark {
            position: stale,
            section_href: "ch2.xhtml".into(),
            label: "At 37.50%".into(),
            chapter_title: None,
            created_at: Utc::now(),
        };
        let location = bridge.go_to_bookmark(&bookmark).await.expect("fallback");
        assert_eq!(location.section_href, "ch2.xhtml");
        assert_eq!(offset_of(&location), 1000, "landed at the section start");
    }

    #[tokio::test]
    async fn exhausted_fallbacks_do_not_close_the_session() {
        let mut engine = FakeEngine::with_uniform_sections(4, 1000);
        let stale = pos(1500);
        engine.kill_position(&stale);
        engine.fail_href("ghost.xhtml");
        let mut bridge = open_bridge(engine).await;

        let bookmark = Bookmark {
            position: stale,
            section_href: "ghost.xhtml".into(),
            label: "gone".into(),
            chapter_title: None,
            created_at: Utc::now(),
        };
        let err = bridge.go_to_bookmark(&bookmark).await.expect_err("no target");
        assert!(matches!(err, Error::Navigation(_)));
        assert_eq!(bridge.state(), &BridgeState::Ready);
        bridge.next_page().await.expect("session still navigable");
    }

    #[tokio::test]
    async fn variant_detour_preserves_the_original_partition() {
        let mut bridge = open_bridge(FakeEngine::with_uniform_sections(4, 1000)).await;
        bridge
            .add_highlight_here("call me ishmael", HighlightColor::Yellow)
            .await
            .expect("highlight stored");
        assert_eq!(bridge.engine().overlays.len(), 1);

        bridge.switch_variant(Some("es")).await.expect("switch");
        let translated = bridge.annotations().await.expect("annotations");
        assert!(translated.highlights.is_empty());
        assert!(
            bridge.engine().overlays.is_empty(),
            "overlays are cleared and reapplied per variant"
        );

        bridge.switch_variant(None).await.expect("switch back");
        let original = bridge.annotations().await.expect("annotations");
        assert_eq!(original.highlights.len(), 1);
        assert_eq!(original.highlights[0].color, HighlightColor::Yellow);
        assert_eq!(bridge.engine().overlays.len(), 1);
    }

    #[tokio::test]
    async fn reflow_settings_invalidate_the_index() {
        let mut bridge = open_bridge(FakeEngine::with_uniform_sections(10, 1000)).await;
        bridge.go_to_percentage(50.0).await.expect("navigate");
        assert_eq!(bridge.engine().sample_calls, 1);

        // A theme flip does not move pagination.
        let mut themed = bridge.settings().clone();
        themed.theme = ThemeMode::Day;
        bridge.apply_settings(themed).await;
        bridge.go_to_percentage(25.0).await.expect("navigate");
        assert_eq!(bridge.engine().sample_calls, 1);

        let mut larger = bridge.settings().clone();
        larger.font_size += 4;
        bridge.apply_settings(larger).await;
        bridge.go_to_percentage(25.0).await.expect("navigate");
        assert_eq!(bridge.engine().sample_calls, 2, "reflow rebuilds the index");
    }

    #[tokio::test]
    async fn chapter_labels_tolerate_subfragment_hrefs() {
        let mut bridge = open_bridge(FakeEngine::with_uniform_sections(4, 100)).await;
        let location = bridge.go_to_section("ch3.xhtml").await.expect("open chapter");
        assert_eq!(location.section_href, "ch3.xhtml");
        assert_eq!(
            bridge.chapter_title_for("ch3.xhtml").as_deref(),
            Some("Chapter 3")
        );
        assert_eq!(
            bridge.chapter_title_for("ch3.xhtml#section2").as_deref(),
            Some("Chapter 3")
        );
        assert_eq!(bridge.chapter_title_for("missing.xhtml"), None);
    }

    #[tokio::test]
    async fn search_hits_are_navigable() {
        let engine = FakeEngine::new(vec![
            ("ch1.xhtml".into(), "calm seas and quiet skies".repeat(8)),
            ("ch2.xhtml".into(), format!("{} the whale surfaced {}", "x".repeat(120), "y".repeat(120))),
            ("ch3.xhtml".into(), "no sightings today".repeat(10)),
        ]);
        let mut bridge = open_bridge(engine).await;
        let hits = bridge.search("whale").await;
        assert_eq!(hits.len(), 1);

        let location = bridge.go_to_search_hit(0).await.expect("navigate");
        assert_eq!(location.section_href, "ch2.xhtml");
        assert!(bridge.select_next_hit().is_some());
    }

    #[tokio::test]
    async fn close_releases_the_engine() {
        let mut bridge = open_bridge(FakeEngine::with_uniform_sections(2, 100)).await;
        bridge.close().await;
        assert!(bridge.engine().destroyed);
        assert_eq!(bridge.state(), &BridgeState::Loading);
        assert!(matches!(bridge.next_page().await, Err(Error::NotReady(_))));
    }

    #[tokio::test]
    async fn empty_query_clears_results() {
        let mut bridge = open_bridge(FakeEngine::with_uniform_sections(4, 1000)).await;
        bridge.search("abcdefghi").await;
        assert!(!bridge.search_hits().is_empty());
        let hits = bridge.search("   ").await;
        assert!(hits.is_empty());
        assert!(bridge.search_hits().is_empty());
    }
}
