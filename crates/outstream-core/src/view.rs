//! View bindings
//!
//! The view renders the media element and, only when the controller reports that autoplay was
//! blocked, a manual-start control. It observes nothing beyond [`PlacementSnapshot`].

use crate::controller::LifecycleController;
use crate::types::{MediaElementRef, PlacementSnapshot};
use serde::Serialize;
use tokio::sync::watch;

/// Label of the manual-start control
pub const MANUAL_START_LABEL: &str = "Play Ad";

/// What the view renders for one snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementView {
    pub media_element: MediaElementRef,
    pub show_manual_start: bool,
    #[serde(flatten)]
    pub snapshot: PlacementSnapshot,
}

impl PlacementView {
    pub fn new(media_element: MediaElementRef, snapshot: PlacementSnapshot) -> Self {
        Self {
            media_element,
            show_manual_start: snapshot.needs_gesture,
            snapshot,
        }
    }

    /// Manual-start control label, when shown
    pub fn manual_start_label(&self) -> Option<&'static str> {
        self.show_manual_start.then_some(MANUAL_START_LABEL)
    }

    /// One-line flag summary for debug overlays
    pub fn debug_badge(&self) -> String {
        let flags = self.snapshot.flags;
        format!(
            "requestAds: {} · adsManagerLoaded: {} · adsReady: {} · needsGesture: {}",
            flags.request_ads_called,
            flags.ads_manager_loaded,
            flags.ads_ready,
            self.snapshot.needs_gesture
        )
    }
}

/// Binds a view to a mounted controller
pub struct ViewBinding<'a> {
    controller: &'a LifecycleController,
    updates: watch::Receiver<PlacementSnapshot>,
}

impl<'a> ViewBinding<'a> {
    pub fn new(controller: &'a LifecycleController) -> Self {
        Self {
            controller,
            updates: controller.subscribe(),
        }
    }

    /// Render the latest state
    pub fn render(&self) -> PlacementView {
        PlacementView::new(
            self.controller.media_element().clone(),
            *self.updates.borrow(),
        )
    }

    /// Wait for the next state change; `None` once the controller is gone
    pub async fn next(&mut self) -> Option<PlacementView> {
        self.updates.changed().await.ok()?;
        Some(self.render())
    }

    /// Handle a click on the manual-start control
    ///
    /// Returns false when the control is not shown.
    pub fn click_manual_start(&self) -> bool {
        if !self.render().show_manual_start {
            return false;
        }
        self.controller.start_ad();
        true
    }
}
