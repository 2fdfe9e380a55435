//! SDK event types and listener subscriptions
//!
//! Two event sources feed a placement:
//! - the ad plugin registered on the playback engine ([`PluginEvent`])
//! - the ads-manager handed over by the plugin once ad metadata loaded ([`AdEvent`])
//!
//! Listeners are registered against either source and return a [`Subscription`]
//! that unregisters the listener when released or dropped.

use crate::bridge::AdsManager;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Callback registered on an SDK event source
pub type Listener<E> = Box<dyn Fn(E) + Send + Sync>;

/// Events emitted by the ad plugin on the engine instance
#[derive(Clone)]
pub enum PluginEvent {
    /// The plugin created its internal ads loader
    LoaderReady,
    /// Ad metadata loaded and an ads-manager exists
    AdsManager(Arc<dyn AdsManager>),
    /// An ad break can be started
    AdsReady,
    /// Ad playback started
    AdStarted,
    /// Ad playback ended
    AdEnded,
    /// The plugin gave up on ads
    AdError(AdError),
}

impl PluginEvent {
    /// Wire name of the event on the engine
    pub fn name(&self) -> &'static str {
        match self {
            PluginEvent::LoaderReady => "ads-loader",
            PluginEvent::AdsManager(_) => "ads-manager",
            PluginEvent::AdsReady => "adsready",
            PluginEvent::AdStarted => "adstart",
            PluginEvent::AdEnded => "adend",
            PluginEvent::AdError(_) => "adserror",
        }
    }
}

impl std::fmt::Debug for PluginEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginEvent::AdError(err) => f.debug_tuple("AdError").field(err).finish(),
            other => f.write_str(other.name()),
        }
    }
}

/// Ads-manager event types a placement listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdEventType {
    /// Creative loaded
    Loaded,
    /// Ad started playing
    Started,
    /// Single ad completed
    Complete,
    /// Every ad in the break completed
    AllAdsCompleted,
    /// Ad-level error
    AdError,
}

impl AdEventType {
    /// All types a placement subscribes to once the ads-manager exists
    pub const SUBSCRIBED: [AdEventType; 5] = [
        AdEventType::Loaded,
        AdEventType::Started,
        AdEventType::Complete,
        AdEventType::AllAdsCompleted,
        AdEventType::AdError,
    ];
}

/// Event delivered by the ads-manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdEvent {
    Loaded,
    Started,
    Complete,
    AllAdsCompleted,
    AdError(AdError),
}

impl AdEvent {
    pub fn event_type(&self) -> AdEventType {
        match self {
            AdEvent::Loaded => AdEventType::Loaded,
            AdEvent::Started => AdEventType::Started,
            AdEvent::Complete => AdEventType::Complete,
            AdEvent::AllAdsCompleted => AdEventType::AllAdsCompleted,
            AdEvent::AdError(_) => AdEventType::AdError,
        }
    }
}

/// Error payload reported by the SDK
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdError {
    /// SDK error code, if any
    pub code: Option<i32>,
    message: Option<String>,
}

impl AdError {
    pub fn new(code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// Underlying message, when the SDK supplied one
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Handle to a registered listener
///
/// Releasing (or dropping) the handle unregisters the listener. Releasing twice is a no-op.
pub struct Subscription {
    label: &'static str,
    release: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    /// Create a subscription that runs `release` when it is released
    pub fn new(label: &'static str, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label,
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn is_active(&self) -> bool {
        self.release.lock().is_some()
    }

    pub fn release(&self) {
        if let Some(release) = self.release.lock().take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Subscriptions held by a session
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    /// Number of listeners still registered
    pub fn active(&self) -> usize {
        self.subscriptions.iter().filter(|s| s.is_active()).count()
    }

    /// Unregister every listener
    pub fn release_all(&mut self) -> usize {
        let count = self.active();
        for subscription in self.subscriptions.drain(..) {
            subscription.release();
        }
        count
    }
}
