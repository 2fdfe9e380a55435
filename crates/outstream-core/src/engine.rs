//! Playback engine hosting
//!
//! An outstream placement has no content stream: the engine exists only to host the ad.
//! [`PlaybackHost`] builds the engine with the options browsers require for a later
//! programmatic ad start, and hands out an [`EngineHandle`] whose disposal is always safe.

use crate::best_effort::best_effort;
use crate::bridge::{AdPlugin, PluginOptions};
use crate::sdk::AdSdk;
use crate::types::MediaElementRef;
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Engine construction options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Engine-level autoplay; ad-break start is driven explicitly instead
    pub autoplay: bool,
    /// Start muted so browsers allow a programmatic start
    pub muted: bool,
    /// Show the engine's own transport controls
    pub controls: bool,
    /// Play inline on mobile
    pub plays_inline: bool,
    /// Content sources
    pub sources: Vec<Url>,
}

impl EngineOptions {
    /// Options for a content-less ad host
    pub fn outstream() -> Self {
        Self {
            autoplay: false,
            muted: true,
            controls: false,
            plays_inline: true,
            sources: Vec::new(),
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::outstream()
    }
}

/// A playback engine instance bound to a media element
pub trait PlaybackEngine: Send + Sync {
    /// Register the ad plugin on this engine
    fn attach_ad_plugin(
        &self,
        sdk: &Arc<dyn AdSdk>,
        options: &PluginOptions,
    ) -> std::result::Result<Arc<dyn AdPlugin>, String>;

    /// Tear the engine down
    fn dispose(&self) -> std::result::Result<(), String>;
}

/// Builds playback engines
pub trait EngineFactory: Send + Sync {
    fn create(
        &self,
        element: &MediaElementRef,
        options: &EngineOptions,
    ) -> std::result::Result<Arc<dyn PlaybackEngine>, String>;
}

/// Constructs engines for placements
#[derive(Clone)]
pub struct PlaybackHost {
    factory: Arc<dyn EngineFactory>,
}

impl PlaybackHost {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self { factory }
    }

    /// Construct an engine bound to `element`
    pub fn create(&self, element: &MediaElementRef, options: &EngineOptions) -> Result<EngineHandle> {
        debug!(element = %element, ?options, "Creating playback engine");

        let engine = self
            .factory
            .create(element, options)
            .map_err(Error::EngineCreate)?;

        info!(element = %element, "Playback engine ready");
        Ok(EngineHandle {
            element: element.clone(),
            engine: Mutex::new(Some(engine)),
        })
    }
}

/// Owned handle to a constructed engine
///
/// Disposal happens at most once; disposing an empty or already disposed handle does nothing.
pub struct EngineHandle {
    element: MediaElementRef,
    engine: Mutex<Option<Arc<dyn PlaybackEngine>>>,
}

impl EngineHandle {
    /// Handle for an engine that was never constructed
    pub fn empty(element: MediaElementRef) -> Self {
        Self {
            element,
            engine: Mutex::new(None),
        }
    }

    pub fn element(&self) -> &MediaElementRef {
        &self.element
    }

    /// The live engine, if not disposed
    pub fn engine(&self) -> Option<Arc<dyn PlaybackEngine>> {
        self.engine.lock().clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.engine.lock().is_none()
    }

    /// Dispose the engine. Returns true if an engine was actually torn down.
    pub fn dispose(&self) -> bool {
        let Some(engine) = self.engine.lock().take() else {
            return false;
        };

        if best_effort("dispose_engine", || engine.dispose()).is_ok() {
            debug!(element = %self.element, "Playback engine disposed");
        }
        true
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("element", &self.element)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
