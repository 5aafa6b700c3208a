//! Viewport trigger.
//!
//! Tracks product-image placeholders by their layout region. When a
//! placeholder comes within `margin` pixels of the visible viewport its real
//! image is promoted, once, and the placeholder is no longer observed. The
//! promotion result decides what the placeholder shows: the real image, or
//! the generic fallback with a manual retry.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::config::ViewportConfig;
use crate::error::Result;
use crate::resource::ResourceId;
use crate::scheduler::{ImageScheduler, PromotionReport};

/// Vertical extent of a placeholder, in document pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub top: u32,
    pub height: u32,
}

impl Region {
    pub fn new(top: u32, height: u32) -> Self {
        Self { top, height }
    }

    fn bottom(&self) -> u32 {
        self.top.saturating_add(self.height)
    }
}

/// Visible slice of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub scroll_top: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(scroll_top: u32, height: u32) -> Self {
        Self { scroll_top, height }
    }

    /// Whether `region` overlaps the viewport grown by `margin` on both edges.
    pub fn reaches(&self, region: &Region, margin: u32) -> bool {
        let top = self.scroll_top.saturating_sub(margin);
        let bottom = self.scroll_top.saturating_add(self.height).saturating_add(margin);
        region.top < bottom && region.bottom() > top
    }
}

/// What a placeholder currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderState {
    /// Observed, not yet near the viewport.
    Waiting,
    /// Promoted; waiting for the fetch to settle.
    Loading,
    /// Showing the real image.
    Loaded { src: String },
    /// Showing the generic placeholder.
    Fallback { src: String, retryable: bool },
}

#[derive(Debug, Clone)]
struct Placeholder {
    id: ResourceId,
    region: Region,
    observed: bool,
    state: PlaceholderState,
}

/// Emits placeholders entering the viewport as promotions.
#[derive(Debug, Clone)]
pub struct ViewportTrigger {
    margin: u32,
    fallback_src: String,
    placeholders: HashMap<String, Placeholder>,
}

impl From<&ViewportConfig> for ViewportTrigger {
    fn from(config: &ViewportConfig) -> Self {
        Self::new(config.margin_px, config.placeholder_src.clone())
    }
}

impl ViewportTrigger {
    pub fn new(margin: u32, fallback_src: impl Into<String>) -> Self {
        Self {
            margin,
            fallback_src: fallback_src.into(),
            placeholders: HashMap::new(),
        }
    }

    /// Start observing a placeholder. Re-observing a key replaces it.
    pub fn observe(&mut self, key: impl Into<String>, id: ResourceId, region: Region) {
        self.placeholders.insert(
            key.into(),
            Placeholder {
                id,
                region,
                observed: true,
                state: PlaceholderState::Waiting,
            },
        );
    }

    /// Forget a placeholder, e.g. when its card is removed.
    pub fn unobserve(&mut self, key: &str) -> bool {
        self.placeholders.remove(key).is_some()
    }

    /// Placeholders still waiting to come into view.
    pub fn observed_len(&self) -> usize {
        self.placeholders.values().filter(|p| p.observed).count()
    }

    pub fn state(&self, key: &str) -> Option<&PlaceholderState> {
        self.placeholders.get(key).map(|p| &p.state)
    }

    /// Source the placeholder element should display right now.
    pub fn displayed_src(&self, key: &str) -> Option<&str> {
        self.placeholders.get(key).map(|p| match &p.state {
            PlaceholderState::Loaded { src } | PlaceholderState::Fallback { src, .. } => src.as_str(),
            PlaceholderState::Waiting | PlaceholderState::Loading => self.fallback_src.as_str(),
        })
    }

    /// Collect the images newly reached by `viewport`.
    ///
    /// Each placeholder is emitted once: it stops being observed and moves to
    /// [`PlaceholderState::Loading`]. Ids come back ordered top to bottom,
    /// without duplicates.
    pub fn visible(&mut self, viewport: &Viewport) -> Vec<ResourceId> {
        let margin = self.margin;
        let mut hits: Vec<(u32, ResourceId)> = self
            .placeholders
            .values_mut()
            .filter(|p| p.observed && viewport.reaches(&p.region, margin))
            .map(|p| {
                p.observed = false;
                p.state = PlaceholderState::Loading;
                (p.region.top, p.id.clone())
            })
            .collect();
        hits.sort();

        let mut seen = HashSet::new();
        hits.into_iter()
            .filter_map(|(_, id)| seen.insert(id.clone()).then_some(id))
            .collect()
    }

    /// Record the fetch result for every loading placeholder backed by `id`.
    pub fn settle(&mut self, id: &ResourceId, loaded: bool) {
        let fallback = &self.fallback_src;
        for placeholder in self.placeholders.values_mut() {
            if placeholder.id != *id || placeholder.state != PlaceholderState::Loading {
                continue;
            }
            placeholder.state = if loaded {
                PlaceholderState::Loaded {
                    src: id.as_str().to_string(),
                }
            } else {
                PlaceholderState::Fallback {
                    src: fallback.clone(),
                    retryable: true,
                }
            };
        }
    }

    /// Settle the placeholders of `requested` from a promotion report.
    ///
    /// Only ids the report shows as loaded swap to the real image. Anything
    /// else falls back, including ids the promotion never fetched.
    fn apply(&mut self, requested: &[ResourceId], report: &PromotionReport) {
        let loaded: HashSet<&ResourceId> = report.loaded.iter().chain(&report.already_loaded).collect();
        for (id, reason) in &report.failed {
            debug!("Showing placeholder for {}: {}", id, reason);
        }
        for id in requested {
            self.settle(id, loaded.contains(id));
        }
    }

    /// Promote whatever `viewport` newly reaches and update placeholder states.
    pub async fn on_viewport(&mut self, scheduler: &ImageScheduler, viewport: Viewport) -> PromotionReport {
        let ids = self.visible(&viewport);
        if ids.is_empty() {
            return PromotionReport::default();
        }
        debug!("{} placeholders entered the viewport", ids.len());
        let report = scheduler.promote(ids.clone()).await;
        self.apply(&ids, &report);
        report
    }

    /// Manual retry for a placeholder showing the fallback.
    ///
    /// Clears the image from the ledger and promotes it on its own. Returns
    /// the new state, or `None` for an unknown key.
    pub async fn retry(&mut self, scheduler: &ImageScheduler, key: &str) -> Result<Option<PlaceholderState>> {
        let Some(placeholder) = self.placeholders.get_mut(key) else {
            return Ok(None);
        };
        if !matches!(placeholder.state, PlaceholderState::Fallback { retryable: true, .. }) {
            return Ok(Some(placeholder.state.clone()));
        }
        let id = placeholder.id.clone();

        scheduler.forget(&id, false).await?;
        if let Some(placeholder) = self.placeholders.get_mut(key) {
            placeholder.state = PlaceholderState::Loading;
        }
        let report = scheduler.promote(vec![id.clone()]).await;
        self.apply(&[id], &report);
        Ok(self.state(key).cloned())
    }
}
