//! Shared fixtures for the module test suites.
//!
//! [`FakeEngine`] models a rendering engine over in-memory sections.
//! Position references encode a global character offset (`pos:{offset}`);
//! the library under test still treats them as opaque strings. Individual
//! references can be killed (no longer resolvable) or aliased (resolve to
//! a different place) to reproduce post-reflow drift.

use crate::annotations::{Highlight, PositionRef};
use crate::cancellation::CancellationToken;
use crate::engine::{BookMetadata, DocumentEngine, Location, RenderTarget, TocEntry};
use crate::error::{Error, Result};
use crate::store::{KeyValueStore, MemoryStore, Namespace};
use crate::translation::Translator;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

pub struct FakeEngine {
    sections: Vec<(String, String)>,
    toc_entries: Vec<TocEntry>,
    current: Option<Location>,
    page_step: usize,
    dead: HashSet<String>,
    aliases: HashMap<String, usize>,
    fail_hrefs: HashSet<String>,
    pub sample_calls: usize,
    pub overlays: Vec<Highlight>,
    pub destroyed: bool,
}

impl FakeEngine {
    pub fn new(sections: Vec<(String, String)>) -> Self {
        let toc_entries = sections
            .iter()
            .enumerate()
            .map(|(idx, (href, _))| TocEntry {
                label: format!("Chapter {}", idx + 1),
                href: href.clone(),
            })
            .collect();
        Self {
            sections,
            toc_entries,
            current: None,
            page_step: 256,
            dead: HashSet::new(),
            aliases: HashMap::new(),
            fail_hrefs: HashSet::new(),
            sample_calls: 0,
            overlays: Vec::new(),
            destroyed: false,
        }
    }

    pub fn with_uniform_sections(count: usize, chars_per_section: usize) -> Self {
        let sections = (0..count)
            .map(|idx| (format!("ch{}.xhtml", idx + 1), filler_text(chars_per_section)))
            .collect();
        Self::new(sections)
    }

    /// Make a reference unresolvable, as after a pagination change.
    pub fn kill_position(&mut self, position: &PositionRef) {
        self.dead.insert(position.as_str().to_string());
    }

    /// Make a reference resolve somewhere else than its offset says.
    pub fn alias_position(&mut self, position: &PositionRef, lands_at: usize) {
        self.aliases.insert(position.as_str().to_string(), lands_at);
    }

    pub fn fail_href(&mut self, href: &str) {
        self.fail_hrefs.insert(href.to_string());
    }

    pub fn section_char_range(&self, href: &str) -> (usize, usize) {
        let mut start = 0usize;
        for (candidate, text) in &self.sections {
            let len = text.chars().count();
            if candidate == href {
                return (start, start + len);
            }
            start += len;
        }
        (start, start)
    }

    fn total_chars(&self) -> usize {
        self.sections.iter().map(|(_, text)| text.chars().count()).sum()
    }

    fn offset_of_ref(&self, position: &PositionRef) -> Option<usize> {
        let raw = position.as_str();
        if self.dead.contains(raw) {
            return None;
        }
        raw.strip_prefix("pos:")?.parse().ok()
    }

    fn location_at(&self, offset: usize) -> Location {
        let total = self.total_chars();
        let offset = if total == 0 { 0 } else { offset.min(total - 1) };
        let mut start = 0usize;
        for (href, text) in &self.sections {
            let end = start + text.chars().count();
            if offset < end {
                return Location {
                    position: PositionRef::new(format!("pos:{offset}")),
                    section_href: href.clone(),
                };
            }
            start = end;
        }
        Location {
            position: PositionRef::new(format!("pos:{offset}")),
            section_href: self
                .sections
                .last()
                .map(|(href, _)| href.clone())
                .unwrap_or_default(),
        }
    }

    fn current_offset(&self) -> usize {
        self.current
            .as_ref()
            .and_then(|location| location.position.as_str().strip_prefix("pos:"))
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0)
    }
}

/// Deterministic filler: a repeating ten-character word-and-space cycle.
pub fn filler_text(chars: usize) -> String {
    "abcdefghi ".chars().cycle().take(chars).collect()
}

/// Route tracing output through the test harness; safe to call from
/// every test.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Global character offset a fake location points at.
pub fn offset_of(location: &Location) -> usize {
    location
        .position
        .as_str()
        .strip_prefix("pos:")
        .and_then(|raw| raw.parse().ok())
        .expect("fake positions encode an offset")
}

#[async_trait]
impl DocumentEngine for FakeEngine {
    fn metadata(&self) -> BookMetadata {
        BookMetadata {
            title: "Fixture Book".into(),
            author: Some("Fixture Author".into()),
        }
    }

    fn toc(&self) -> Vec<TocEntry> {
        self.toc_entries.clone()
    }

    fn section_hrefs(&self) -> Vec<String> {
        self.sections.iter().map(|(href, _)| href.clone()).collect()
    }

    async fn section_text(&mut self, href: &str) -> Result<String> {
        if self.fail_hrefs.contains(href) {
            return Err(Error::Navigation(format!("section {href} unavailable")));
        }
        self.sections
            .iter()
            .find(|(candidate, _)| candidate == href)
            .map(|(_, text)| text.clone())
            .ok_or_else(|| Error::Navigation(format!("unknown section {href}")))
    }

    async fn render_at(&mut self, target: RenderTarget<'_>) -> Result<Location> {
        let location = match target {
            RenderTarget::Position(position) => {
                if let Some(&lands_at) = self.aliases.get(position.as_str()) {
                    self.location_at(lands_at)
                } else {
                    let offset = self.offset_of_ref(position).ok_or_else(|| {
                        Error::Navigation(format!("unresolvable reference {position}"))
                    })?;
                    self.location_at(offset)
                }
            }
            RenderTarget::Href(href) => {
                if self.fail_hrefs.contains(href) {
                    return Err(Error::Navigation(format!("section {href} unavailable")));
                }
                if !self.sections.iter().any(|(candidate, _)| candidate == href) {
                    return Err(Error::Navigation(format!("unknown section {href}")));
                }
                let (start, _) = self.section_char_range(href);
                self.location_at(start)
            }
        };
        self.current = Some(location.clone());
        Ok(location)
    }

    async fn next_page(&mut self) -> Result<Location> {
        let location = self.location_at(self.current_offset() + self.page_step);
        self.current = Some(location.clone());
        Ok(location)
    }

    async fn previous_page(&mut self) -> Result<Location> {
        let location = self.location_at(self.current_offset().saturating_sub(self.page_step));
        self.current = Some(location.clone());
        Ok(location)
    }

    fn current_location(&self) -> Option<Location> {
        self.current.clone()
    }

    async fn sample_positions(&mut self, granularity: usize) -> Result<Vec<PositionRef>> {
        self.sample_calls += 1;
        let total = self.total_chars();
        if total == 0 {
            return Ok(Vec::new());
        }
        let count = granularity.max(2);
        Ok((0..count)
            .map(|idx| {
                let offset = idx * (total - 1) / (count - 1);
                PositionRef::new(format!("pos:{offset}"))
            })
            .collect())
    }

    fn compare_positions(&self, a: &PositionRef, b: &PositionRef) -> Option<Ordering> {
        Some(self.offset_of_ref(a)?.cmp(&self.offset_of_ref(b)?))
    }

    fn position_for_range(
        &self,
        href: &str,
        start_char: usize,
        _end_char: usize,
    ) -> Result<PositionRef> {
        if !self.sections.iter().any(|(candidate, _)| candidate == href) {
            return Err(Error::Navigation(format!("unknown section {href}")));
        }
        let (start, _) = self.section_char_range(href);
        Ok(PositionRef::new(format!("pos:{}", start + start_char)))
    }

    async fn set_overlays(&mut self, highlights: &[Highlight]) -> Result<()> {
        self.overlays = highlights.to_vec();
        Ok(())
    }

    async fn destroy(&mut self) {
        self.destroyed = true;
        self.current = None;
    }
}

/// Translator that tags text with the target language.
pub struct FakeTranslator {
    calls: Mutex<Vec<(String, String)>>,
    delay: Option<Duration>,
}

impl FakeTranslator {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            delay: Some(delay),
        }
    }

    /// Completed translations; cancelled fetches do not count.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Translator for FakeTranslator {
    async fn translate(
        &self,
        text: &str,
        target_lang: &str,
        token: &CancellationToken,
    ) -> Result<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        token.check_cancelled("translate")?;
        self.calls
            .lock()
            .push((text.to_string(), target_lang.to_string()));
        Ok(format!("[{target_lang}] {text}"))
    }
}

/// Store whose writes fail, for exercising tier degradation.
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: bool,
}

impl FlakyStore {
    pub fn failing_writes() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_writes: true,
        }
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(namespace, key).await
    }

    async fn set(&self, namespace: Namespace, key: &str, value: Vec<u8>) -> Result<()> {
        if self.fail_writes {
            return Err(Error::Storage("simulated write failure".into()));
        }
        self.inner.set(namespace, key, value).await
    }

    async fn remove(&self, namespace: Namespace, key: &str) -> Result<()> {
        self.inner.remove(namespace, key).await
    }

    async fn keys(&self, namespace: Namespace) -> Result<Vec<String>> {
        self.inner.keys(namespace).await
    }
}
