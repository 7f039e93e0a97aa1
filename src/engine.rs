//! The document rendering engine seam.
//!
//! The container parser and layout engine are external collaborators. The
//! reader core drives them through [`DocumentEngine`] and stays agnostic of
//! the container format and of how positions are encoded; a
//! [`PositionRef`](crate::annotations::PositionRef) is opaque here.
//!
//! Relocation events flow the other way: the host wires the engine's
//! location-changed notifications into
//! [`ReaderBridge::on_relocated`](crate::bridge::ReaderBridge::on_relocated),
//! tagging each report as an intermediate frame or a settled position.

use crate::annotations::{Highlight, PositionRef};
use crate::error::Result;
use async_trait::async_trait;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookMetadata {
    pub title: String,
    pub author: Option<String>,
}

/// Table-of-contents entry (label plus content href).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub label: String,
    pub href: String,
}

/// A concrete rendered position: the reference and its owning section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub position: PositionRef,
    pub section_href: String,
}

/// How a relocation report should be treated.
///
/// Intermediate frames update ephemeral state only; settled reports are the
/// final resting position after a transition and drive progress persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationChange {
    Intermediate,
    Settled,
}

#[derive(Debug, Clone, Copy)]
pub enum RenderTarget<'a> {
    Position(&'a PositionRef),
    Href(&'a str),
}

/// Contract the reader core expects from a rendering engine.
///
/// Paging at a document boundary is a no-op returning the current location,
/// not an error. `render_at` fails when the target does not resolve under
/// the current pagination; callers own the fallback policy.
#[async_trait]
pub trait DocumentEngine: Send {
    fn metadata(&self) -> BookMetadata;

    fn toc(&self) -> Vec<TocEntry>;

    /// Section hrefs in spine (reading) order.
    fn section_hrefs(&self) -> Vec<String>;

    /// Plain text content of one section.
    async fn section_text(&mut self, href: &str) -> Result<String>;

    async fn render_at(&mut self, target: RenderTarget<'_>) -> Result<Location>;

    async fn next_page(&mut self) -> Result<Location>;

    async fn previous_page(&mut self) -> Result<Location>;

    fn current_location(&self) -> Option<Location>;

    /// Evenly spaced position samples across the whole content, used to
    /// build the location index. Empty when the document has no
    /// extractable text.
    async fn sample_positions(&mut self, granularity: usize) -> Result<Vec<PositionRef>>;

    /// Reading-order comparison of two references. `None` when either
    /// reference does not resolve under the current pagination.
    fn compare_positions(&self, a: &PositionRef, b: &PositionRef) -> Option<Ordering>;

    /// Reference for a character range inside a section.
    fn position_for_range(&self, href: &str, start_char: usize, end_char: usize)
    -> Result<PositionRef>;

    /// Replace the whole overlay set. The engine clears existing overlays
    /// before painting the given ones; there is no incremental diff.
    async fn set_overlays(&mut self, highlights: &[Highlight]) -> Result<()>;

    async fn destroy(&mut self);
}
