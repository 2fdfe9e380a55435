//! Ad bridge - wires the SDK's ad plugin onto the playback engine
//!
//! The plugin is always registered with manual break control and without an ad tag, so it
//! can neither request nor start ads on its own. The lifecycle controller decides when the
//! tag is set, when ads are requested, and when the break starts.

use crate::engine::EngineHandle;
use crate::events::{AdEvent, AdEventType, Listener, PluginEvent, Subscription};
use crate::sdk::{AdSdk, RenderingSettings};
use crate::types::{AdTagRef, PlacementConfig};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How the ads framework treats the player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerMode {
    /// Content playback with ad breaks
    Content,
    /// Player exists only for the ad
    Outstream,
}

/// Options passed to the plugin at registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginOptions {
    /// Ad tag set at construction; `None` keeps the plugin from requesting early
    pub ad_tag: Option<AdTagRef>,
    /// Let the plugin start breaks by itself
    pub auto_play_ad_breaks: bool,
    pub show_countdown: bool,
    pub player_mode: PlayerMode,
    /// Ad request timeout
    pub timeout: Duration,
    /// Rendering overrides, when the built-in UI is suppressed
    pub rendering: Option<RenderingSettings>,
}

/// Ad plugin registered on an engine
pub trait AdPlugin: Send + Sync {
    /// Listen to plugin events
    fn subscribe(&self, listener: Listener<PluginEvent>) -> Subscription;

    fn change_ad_tag(&self, tag: &AdTagRef);

    /// Fetch ad metadata for the current tag
    fn request_ads(&self) -> std::result::Result<(), String>;

    /// Gesture-sensitive handshake required before any ad surface renders
    fn initialize_display_container(&self) -> std::result::Result<(), String>;

    /// Start the next ad break on the loaded ads-manager
    fn play_ad_break(&self) -> std::result::Result<(), String>;
}

/// SDK object controlling a loaded ad break
pub trait AdsManager: Send + Sync {
    fn add_event_listener(&self, kind: AdEventType, listener: Listener<AdEvent>) -> Subscription;
}

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdBridgeConfig {
    pub ad_tag: AdTagRef,
    /// Whether the controller will start breaks without waiting for the user
    pub auto_start_break: bool,
    pub suppress_builtin_ui: bool,
    pub timeout: Duration,
}

impl AdBridgeConfig {
    /// Bridge config for a placement; `None` if the placement has no tag
    pub fn from_placement(config: &PlacementConfig) -> Option<Self> {
        Some(Self {
            ad_tag: config.ad_tag.clone()?,
            auto_start_break: config.auto_start,
            suppress_builtin_ui: config.suppress_builtin_ui,
            timeout: config.ads_timeout(),
        })
    }

    /// Plugin registration options derived from this config
    pub fn plugin_options(&self, sdk: &dyn AdSdk) -> PluginOptions {
        let rendering = self.suppress_builtin_ui.then(|| {
            let mut settings = sdk.rendering_settings();
            settings.use_styled_linear_ads = false;
            settings.ui_elements.clear();
            settings
        });

        PluginOptions {
            ad_tag: None,
            auto_play_ad_breaks: false,
            show_countdown: false,
            player_mode: PlayerMode::Outstream,
            timeout: self.timeout,
            rendering,
        }
    }
}

/// Result of an ad request attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The request went out
    Issued,
    /// The plugin's loader is not ready yet; nothing was sent
    NotReady,
    /// A request was already issued for this bridge
    AlreadyRequested,
}

/// Ad plugin attached to an engine
pub struct AdBridge {
    plugin: Arc<dyn AdPlugin>,
    config: AdBridgeConfig,
    loader_ready: AtomicBool,
    requested: AtomicBool,
}

impl AdBridge {
    /// Register the ad plugin on `engine`
    pub fn attach(engine: &EngineHandle, sdk: &Arc<dyn AdSdk>, config: AdBridgeConfig) -> Result<Self> {
        let engine = engine
            .engine()
            .ok_or_else(|| Error::AdBridgeAttach("playback engine is not available".into()))?;

        let options = config.plugin_options(sdk.as_ref());
        debug!(?options, "Registering ad plugin");

        let plugin = engine
            .attach_ad_plugin(sdk, &options)
            .map_err(Error::AdBridgeAttach)?;

        info!(
            sdk_version = %sdk.version(),
            auto_start = config.auto_start_break,
            suppress_ui = config.suppress_builtin_ui,
            "Ad plugin attached"
        );

        Ok(Self {
            plugin,
            config,
            loader_ready: AtomicBool::new(false),
            requested: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &AdBridgeConfig {
        &self.config
    }

    /// Listen to plugin events
    pub fn subscribe(&self, listener: Listener<PluginEvent>) -> Subscription {
        self.plugin.subscribe(listener)
    }

    /// Record that the plugin's internal loader exists
    pub fn mark_loader_ready(&self) {
        self.loader_ready.store(true, Ordering::SeqCst);
    }

    pub fn is_loader_ready(&self) -> bool {
        self.loader_ready.load(Ordering::SeqCst)
    }

    /// Set the ad tag after the loader is ready
    pub fn change_ad_tag(&self, tag: &AdTagRef) {
        debug!(tag = %tag, "Setting ad tag");
        self.plugin.change_ad_tag(tag);
    }

    /// Issue the single ad-metadata request for this bridge
    pub fn request_ads(&self, tag: &AdTagRef) -> Result<RequestOutcome> {
        if !self.is_loader_ready() {
            warn!("Ad request before loader ready ignored");
            return Ok(RequestOutcome::NotReady);
        }
        if self.requested.swap(true, Ordering::SeqCst) {
            debug!("Ad request already issued");
            return Ok(RequestOutcome::AlreadyRequested);
        }

        self.change_ad_tag(tag);
        self.plugin.request_ads().map_err(Error::AdServing)?;
        info!(tag = %tag, "Ads requested");
        Ok(RequestOutcome::Issued)
    }

    /// Display-container handshake; the caller decides how to treat failure
    pub fn initialize_display_container(&self) -> std::result::Result<(), String> {
        self.plugin.initialize_display_container()
    }

    /// Start the next ad break; only valid once ads are ready
    pub fn play_ad_break(&self) -> std::result::Result<(), String> {
        self.plugin.play_ad_break()
    }
}

impl std::fmt::Debug for AdBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdBridge")
            .field("config", &self.config)
            .field("loader_ready", &self.is_loader_ready())
            .field("requested", &self.requested.load(Ordering::SeqCst))
            .finish()
    }
}
