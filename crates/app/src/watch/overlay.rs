//! Hazard marker overlay.
//!
//! [`OverlayHost`] is the map surface contract; [`MarkerBoard`] is the
//! in-process host served over HTTP. [`OverlayManager`] owns the markers of
//! the current scan generation and is the only code that adds or removes them.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use hazard_core::{BoundingBox, GeoPoint, HazardFlag};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MarkerHandle(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

pub type ViewportHandler = Arc<dyn Fn(BoundingBox) + Send + Sync>;

pub trait OverlayHost {
    fn add_marker(&self, point: GeoPoint, content: &str) -> MarkerHandle;
    /// Remove a marker. Returns `false` when it was already detached.
    fn remove_marker(&self, handle: MarkerHandle) -> bool;
    fn viewport_bounds(&self) -> Option<BoundingBox>;
    fn on_viewport_change(&self, handler: ViewportHandler) -> SubscriptionToken;
    fn unsubscribe(&self, token: SubscriptionToken) -> bool;
}

#[derive(Clone, Debug, Serialize)]
pub struct Marker {
    pub handle: MarkerHandle,
    pub point: GeoPoint,
    pub content: String,
}

#[derive(Default)]
struct BoardInner {
    next_id: u64,
    markers: BTreeMap<MarkerHandle, Marker>,
    viewport: Option<BoundingBox>,
    subscribers: Vec<(SubscriptionToken, ViewportHandler)>,
}

/// Shared in-memory map surface. Clones refer to the same board.
#[derive(Clone, Default)]
pub struct MarkerBoard {
    inner: Arc<Mutex<BoardInner>>,
}

impl MarkerBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BoardInner> {
        // The board holds no invariants a panicking writer could break.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn markers(&self) -> Vec<Marker> {
        self.lock().markers.values().cloned().collect()
    }

    /// Move the viewport and notify every subscriber.
    pub fn set_viewport(&self, bounds: BoundingBox) {
        let handlers: Vec<ViewportHandler> = {
            let mut inner = self.lock();
            inner.viewport = Some(bounds);
            inner.subscribers.iter().map(|(_, h)| h.clone()).collect()
        };
        debug!(subscribers = handlers.len(), "Viewport changed");
        for handler in handlers {
            handler(bounds);
        }
    }
}

impl OverlayHost for MarkerBoard {
    fn add_marker(&self, point: GeoPoint, content: &str) -> MarkerHandle {
        let mut inner = self.lock();
        inner.next_id += 1;
        let handle = MarkerHandle(inner.next_id);
        inner.markers.insert(
            handle,
            Marker {
                handle,
                point,
                content: content.to_string(),
            },
        );
        handle
    }

    fn remove_marker(&self, handle: MarkerHandle) -> bool {
        self.lock().markers.remove(&handle).is_some()
    }

    fn viewport_bounds(&self) -> Option<BoundingBox> {
        self.lock().viewport
    }

    fn on_viewport_change(&self, handler: ViewportHandler) -> SubscriptionToken {
        let mut inner = self.lock();
        inner.next_id += 1;
        let token = SubscriptionToken(inner.next_id);
        inner.subscribers.push((token, handler));
        token
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(t, _)| *t != token);
        inner.subscribers.len() != before
    }
}

/// Popup text for a flagged point.
pub fn marker_content(flag: &HazardFlag) -> String {
    format!(
        "{} ({:.2}, {:.2})",
        flag.summary,
        flag.point.lat(),
        flag.point.lng()
    )
}

/// Tracks the markers of the latest scan generation.
pub struct OverlayManager<H> {
    host: H,
    generation: u64,
    current: Vec<MarkerHandle>,
}

impl<H: OverlayHost> OverlayManager<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            generation: 0,
            current: Vec::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn tracked(&self) -> usize {
        self.current.len()
    }

    /// Remove every tracked marker. Markers already gone from the host are
    /// skipped silently.
    pub fn clear(&mut self) {
        let mut detached = 0usize;
        for handle in self.current.drain(..) {
            if !self.host.remove_marker(handle) {
                detached += 1;
            }
        }
        if detached > 0 {
            warn!(detached, "Markers were already detached from the host");
        }
    }

    pub fn add_all(&mut self, flags: &[HazardFlag]) {
        for flag in flags {
            let handle = self.host.add_marker(flag.point, &marker_content(flag));
            self.current.push(handle);
        }
    }

    /// Start a new generation holding exactly `flags`. Returns its number.
    pub fn replace(&mut self, flags: &[HazardFlag]) -> u64 {
        self.clear();
        self.add_all(flags);
        self.generation += 1;
        metrics::gauge!("marine_marker_generation").set(self.generation as f64);
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hazard_core::{HazardThresholds, ProbeResult, classify};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn flags(n: usize) -> Vec<HazardFlag> {
        (0..n)
            .map(|i| {
                let result = ProbeResult {
                    point: GeoPoint::new(8.0 + i as f64 * 0.5, 125.0),
                    wind_speed: Some(45.0),
                    wind_gust: Some(20.0),
                    precipitation: Some(0.0),
                    wave_height: Some(1.0),
                };
                classify(&result, &HazardThresholds::default())
            })
            .collect()
    }

    #[test]
    fn tracked_count_matches_latest_add_all() {
        let board = MarkerBoard::new();
        let mut manager = OverlayManager::new(board.clone());
        for size in [3, 0, 5, 1, 4] {
            manager.clear();
            manager.add_all(&flags(size));
            assert_eq!(manager.tracked(), size);
            assert_eq!(board.markers().len(), size);
        }
    }

    #[test]
    fn replace_advances_generation_and_drops_old_markers() {
        let board = MarkerBoard::new();
        let mut manager = OverlayManager::new(board.clone());
        assert_eq!(manager.replace(&flags(4)), 1);
        let first: Vec<_> = board.markers().into_iter().map(|m| m.handle).collect();
        assert_eq!(manager.replace(&flags(2)), 2);
        let second: Vec<_> = board.markers().into_iter().map(|m| m.handle).collect();
        assert_eq!(second.len(), 2);
        assert!(second.iter().all(|h| !first.contains(h)));
    }

    #[test]
    fn clear_tolerates_detached_markers() {
        let board = MarkerBoard::new();
        let mut manager = OverlayManager::new(board.clone());
        manager.add_all(&flags(3));
        let stray = board.markers()[1].handle;
        assert!(board.remove_marker(stray));

        manager.clear();
        assert_eq!(manager.tracked(), 0);
        assert!(board.markers().is_empty());
        assert!(!board.remove_marker(stray));
    }

    #[test]
    fn marker_content_carries_summary() {
        let flag = &flags(1)[0];
        assert_eq!(marker_content(flag), "Wind 45 km/h (8.00, 125.00)");
    }

    #[test]
    fn viewport_subscribers_receive_changes_until_unsubscribed() {
        let board = MarkerBoard::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let token = board.on_viewport_change(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let bounds = BoundingBox::new(10.0, 8.0, 126.0, 124.0);

        board.set_viewport(bounds);
        assert_eq!(board.viewport_bounds(), Some(bounds));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(board.unsubscribe(token));
        assert!(!board.unsubscribe(token));
        board.set_viewport(bounds);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
