//! Position reference codec.
//!
//! The [`LocationIndex`] is a derived, rebuildable mapping between opaque
//! position references and reading percentages, built by sampling the
//! engine at a fixed granularity. It is never persisted: any reflow
//! (font size, margins, viewport) moves the sample boundaries, so the
//! bridge drops the index and rebuilds it on next use.
//!
//! Percentages are carried at full precision internally and rounded to two
//! decimals only where they leave this module.

use crate::annotations::PositionRef;
use crate::engine::DocumentEngine;
use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Conventional sampling granularity.
pub const DEFAULT_GRANULARITY: usize = 1024;

#[derive(Debug)]
pub struct LocationIndex {
    samples: Vec<PositionRef>,
    by_ref: HashMap<String, usize>,
}

impl LocationIndex {
    /// Sample the engine and build a fresh index.
    ///
    /// Fails with [`Error::IndexBuild`] when the document yields no
    /// samples; callers treat that as percentage navigation being
    /// degraded, not as a fatal condition.
    pub async fn build<E: DocumentEngine + ?Sized>(
        engine: &mut E,
        granularity: usize,
    ) -> Result<Self> {
        let samples = engine
            .sample_positions(granularity)
            .await
            .map_err(|err| Error::IndexBuild(err.to_string()))?;
        if samples.is_empty() {
            return Err(Error::IndexBuild(
                "document has no extractable text content".into(),
            ));
        }
        let by_ref = samples
            .iter()
            .enumerate()
            .map(|(idx, pos)| (pos.as_str().to_string(), idx))
            .collect();
        debug!(samples = samples.len(), granularity, "Built location index");
        Ok(Self { samples, by_ref })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Reference nearest to the given percentage. The percentage is
    /// clamped into [0, 100] before lookup; the only failure is an empty
    /// index.
    pub fn percentage_to_position(&self, percentage: f64) -> Result<&PositionRef> {
        let Some(last) = self.samples.len().checked_sub(1) else {
            return Err(Error::OutOfRangeReference);
        };
        let pct = clamp_percent(percentage);
        let idx = ((pct / 100.0) * last as f64).round() as usize;
        Ok(&self.samples[idx.min(last)])
    }

    /// Percentage of a reference under the current index, rounded to two
    /// decimals.
    ///
    /// This runs on every navigation tick, so an unresolvable reference
    /// (typically one minted under a different pagination state) is not an
    /// error: it logs a warning and reports 0.0.
    pub fn position_to_percentage<E: DocumentEngine + ?Sized>(
        &self,
        engine: &E,
        position: &PositionRef,
    ) -> f64 {
        let Some(idx) = self.resolve_sample_index(engine, position) else {
            warn!(%position, "Position did not resolve against the current location index");
            return 0.0;
        };
        round_percent(self.fraction_at(idx) * 100.0)
    }

    fn fraction_at(&self, idx: usize) -> f64 {
        match self.samples.len().checked_sub(1) {
            Some(0) | None => 0.0,
            Some(last) => idx as f64 / last as f64,
        }
    }

    /// Index of the sample at, or nearest below, the given reference.
    fn resolve_sample_index<E: DocumentEngine + ?Sized>(
        &self,
        engine: &E,
        position: &PositionRef,
    ) -> Option<usize> {
        if let Some(&idx) = self.by_ref.get(position.as_str()) {
            return Some(idx);
        }
        // Binary search for the first sample past the reference. Ordering
        // comes from the engine; a reference it cannot place is
        // unresolvable here too.
        let mut lo = 0usize;
        let mut hi = self.samples.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match engine.compare_positions(&self.samples[mid], position)? {
                Ordering::Greater => hi = mid,
                Ordering::Less | Ordering::Equal => lo = mid + 1,
            }
        }
        Some(lo.saturating_sub(1))
    }
}

/// Clamp a requested percentage into [0, 100]; non-finite input maps to 0.
pub fn clamp_percent(pct: f64) -> f64 {
    if pct.is_finite() { pct.clamp(0.0, 100.0) } else { 0.0 }
}

/// Two-decimal rounding applied wherever a percentage leaves the codec.
pub fn round_percent(pct: f64) -> f64 {
    (pct * 100.0).round() / 100.0
}
