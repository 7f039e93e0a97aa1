//! Full-text search.
//!
//! A literal substring scan over each content section in spine order.
//! Text is NFC-normalized and lowercased for matching; excerpts keep the
//! original casing with 100 characters of context on each side, clipped
//! to the section bounds. Results are ordered by ascending percentage so
//! they read top to bottom regardless of section iteration order.

use crate::annotations::PositionRef;
use crate::engine::DocumentEngine;
use crate::locations::LocationIndex;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

/// Context kept on each side of a match, in characters.
pub const EXCERPT_CONTEXT_CHARS: usize = 100;

static RE_WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub excerpt: String,
    pub position: PositionRef,
    pub percentage: f64,
    pub section_href: String,
}

/// Scan the whole document for a literal query.
///
/// An empty query yields an empty result set. Sections that cannot be
/// read, and matches the engine cannot turn into a reference, are skipped
/// with a warning rather than failing the scan.
pub async fn search_book<E: DocumentEngine + ?Sized>(
    engine: &mut E,
    index: &LocationIndex,
    query: &str,
) -> Vec<SearchHit> {
    let needle = normalize(query.trim());
    if needle.is_empty() {
        return Vec::new();
    }

    let mut hits = Vec::new();
    for href in engine.section_hrefs() {
        let text = match engine.section_text(&href).await {
            Ok(text) => text,
            Err(err) => {
                warn!(%href, %err, "Skipping unreadable section");
                continue;
            }
        };
        for found in find_matches(&text, &needle) {
            let position =
                match engine.position_for_range(&href, found.start_char, found.end_char) {
                    Ok(position) => position,
                    Err(err) => {
                        warn!(%href, %err, "Match could not be resolved to a reference");
                        continue;
                    }
                };
            let percentage = index.position_to_percentage(engine, &position);
            hits.push(SearchHit {
                excerpt: found.excerpt,
                position,
                percentage,
                section_href: href.clone(),
            });
        }
    }

    hits.sort_by(|a, b| {
        a.percentage
            .partial_cmp(&b.percentage)
            .unwrap_or(Ordering::Equal)
    });
    debug!(query, hits = hits.len(), "Document scan finished");
    hits
}

fn normalize(text: &str) -> String {
    text.nfc().collect::<String>().to_lowercase()
}

struct SectionMatch {
    start_char: usize,
    end_char: usize,
    excerpt: String,
}

/// All occurrences of `needle` in `text`, as character ranges into the
/// NFC-normalized section text plus a display excerpt.
///
/// Lowercasing can change the number of characters, so the scan runs on
/// a lowercased copy with a byte-to-character back-map into the original.
fn find_matches(text: &str, needle: &str) -> Vec<SectionMatch> {
    let chars: Vec<char> = text.nfc().collect();
    let mut lower = String::with_capacity(text.len());
    let mut char_at_byte: Vec<usize> = Vec::with_capacity(text.len());
    for (char_idx, ch) in chars.iter().enumerate() {
        for folded in ch.to_lowercase() {
            for _ in 0..folded.len_utf8() {
                char_at_byte.push(char_idx);
            }
            lower.push(folded);
        }
    }

    let mut matches = Vec::new();
    let mut from = 0usize;
    while let Some(found) = lower[from..].find(needle) {
        let at = from + found;
        let end_byte = at + needle.len();
        let start_char = char_at_byte[at];
        let end_char = char_at_byte
            .get(end_byte)
            .copied()
            .unwrap_or(chars.len());
        matches.push(SectionMatch {
            start_char,
            end_char,
            excerpt: excerpt_around(&chars, start_char, end_char),
        });
        from = end_byte;
    }
    matches
}

fn excerpt_around(chars: &[char], start_char: usize, end_char: usize) -> String {
    let lo = start_char.saturating_sub(EXCERPT_CONTEXT_CHARS);
    let hi = (end_char + EXCERPT_CONTEXT_CHARS).min(chars.len());
    let window: String = chars[lo..hi].iter().collect();
    RE_WHITESPACE_RUN
        .replace_all(window.trim(), " ")
        .into_owned()
}
