//! Core types for Outstream Core

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

/// Default SDK script reference
pub const DEFAULT_SDK_SCRIPT_URL: &str = "https://imasdk.googleapis.com/js/sdkloader/ima3.js";

/// Delay before the manual-start control is offered after an unconfirmed break start
pub const DEFAULT_FALLBACK_DELAY_MS: u64 = 1200;

/// Ad plugin request timeout
pub const DEFAULT_ADS_TIMEOUT_MS: u64 = 8000;

/// Unique identifier for a placement session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to the ad-metadata document (VAST/VMAP) requested for a session.
///
/// Opaque to the placement; it is handed to the SDK untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdTagRef(Url);

impl AdTagRef {
    /// Parse an ad tag URI
    pub fn parse(uri: &str) -> Result<Self> {
        Url::parse(uri)
            .map(Self)
            .map_err(|e| Error::InvalidAdTag(format!("{uri}: {e}")))
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<Url> for AdTagRef {
    fn from(url: Url) -> Self {
        Self(url)
    }
}

impl std::fmt::Display for AdTagRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to the media element a placement renders into
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaElementRef {
    pub id: String,
}

impl MediaElementRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl std::fmt::Display for MediaElementRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.id)
    }
}

/// Placement lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    /// Created, not yet mounted
    Idle,
    /// Waiting for the ad SDK
    SdkLoading,
    /// Engine constructed and plugin attached
    EngineReady,
    /// Ad request issued
    AdsRequested,
    /// Ads-manager created and subscribed
    ManagerReady,
    /// Break can be started
    AdsReady,
    /// Ad playback confirmed
    AdBreakStarted,
    /// Break finished
    Complete,
    /// Fatal or ad-serving error
    Error,
}

impl LifecyclePhase {
    /// Check if transition to target phase is valid
    pub fn can_transition_to(&self, target: LifecyclePhase) -> bool {
        use LifecyclePhase::*;
        if target == Error {
            return !self.is_terminal();
        }
        matches!(
            (self, target),
            (Idle, SdkLoading)
                | (SdkLoading, EngineReady)
                | (EngineReady, AdsRequested)
                | (AdsRequested, ManagerReady)
                | (ManagerReady, AdsReady)
                | (AdsReady, AdBreakStarted)
                | (AdBreakStarted, Complete)
        )
    }

    /// Complete and Error end the session
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecyclePhase::Complete | LifecyclePhase::Error)
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecyclePhase::Idle => write!(f, "idle"),
            LifecyclePhase::SdkLoading => write!(f, "sdk_loading"),
            LifecyclePhase::EngineReady => write!(f, "engine_ready"),
            LifecyclePhase::AdsRequested => write!(f, "ads_requested"),
            LifecyclePhase::ManagerReady => write!(f, "manager_ready"),
            LifecyclePhase::AdsReady => write!(f, "ads_ready"),
            LifecyclePhase::AdBreakStarted => write!(f, "ad_break_started"),
            LifecyclePhase::Complete => write!(f, "complete"),
            LifecyclePhase::Error => write!(f, "error"),
        }
    }
}

/// Flags a view may render
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFlags {
    pub request_ads_called: bool,
    pub ads_manager_loaded: bool,
    pub ads_ready: bool,
}

/// Everything observable about a placement from outside the controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementSnapshot {
    pub flags: SessionFlags,
    pub needs_gesture: bool,
}

/// Placement configuration, fixed for the lifetime of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Ad-metadata document to request
    pub ad_tag: Option<AdTagRef>,
    /// Start the break as soon as ads are ready
    pub auto_start: bool,
    /// Hide the SDK's built-in ad UI
    pub suppress_builtin_ui: bool,
    /// Plugin ad request timeout (milliseconds)
    pub ads_timeout_ms: u64,
    /// Wait for a confirmed ad start before offering manual start (milliseconds)
    pub fallback_delay_ms: u64,
    /// SDK script injected when the capability is absent; must name the shared loader's script
    pub sdk_script_url: Url,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            ad_tag: None,
            auto_start: true,
            suppress_builtin_ui: true,
            ads_timeout_ms: DEFAULT_ADS_TIMEOUT_MS,
            fallback_delay_ms: DEFAULT_FALLBACK_DELAY_MS,
            sdk_script_url: Url::parse(DEFAULT_SDK_SCRIPT_URL)
                .expect("default SDK script URL is valid"),
        }
    }
}

impl PlacementConfig {
    /// Config for the given ad tag with default behavior
    pub fn new(ad_tag: AdTagRef) -> Self {
        Self {
            ad_tag: Some(ad_tag),
            ..Default::default()
        }
    }

    /// Parse a JSON config document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_suppress_builtin_ui(mut self, suppress: bool) -> Self {
        self.suppress_builtin_ui = suppress;
        self
    }

    pub fn with_fallback_delay(mut self, delay: Duration) -> Self {
        self.fallback_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Check the config can drive a session
    pub fn validate(&self) -> Result<()> {
        if self.ad_tag.is_none() {
            return Err(Error::InvalidConfig("ad_tag is required".into()));
        }
        if self.fallback_delay_ms == 0 {
            return Err(Error::InvalidConfig(
                "fallback_delay_ms must be greater than zero".into(),
            ));
        }
        if self.ads_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "ads_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn fallback_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_delay_ms)
    }

    pub fn ads_timeout(&self) -> Duration {
        Duration::from_millis(self.ads_timeout_ms)
    }
}
