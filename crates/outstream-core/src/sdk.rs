//! Ad SDK loading
//!
//! The ad-serving SDK is a page-global capability that appears once its script has loaded.
//! [`SdkLoader`] makes sure the script is injected at most once per page, no matter how many
//! placements ask for it concurrently.

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Ad UI elements the SDK can draw over the ad surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiElement {
    AdAttribution,
    Countdown,
}

/// How the SDK renders linear ads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderingSettings {
    /// Let the SDK style linear ads itself
    pub use_styled_linear_ads: bool,
    /// UI elements drawn over the ad
    pub ui_elements: Vec<UiElement>,
}

impl Default for RenderingSettings {
    fn default() -> Self {
        Self {
            use_styled_linear_ads: true,
            ui_elements: vec![UiElement::AdAttribution, UiElement::Countdown],
        }
    }
}

/// The SDK's global capability object
pub trait AdSdk: Send + Sync {
    /// SDK version string
    fn version(&self) -> String;

    /// Fresh rendering settings with SDK defaults
    fn rendering_settings(&self) -> RenderingSettings {
        RenderingSettings::default()
    }
}

/// Access to the page-global SDK capability
#[async_trait]
pub trait AdSdkProvider: Send + Sync {
    /// The capability object, if the SDK is present on the page
    fn capability(&self) -> Option<Arc<dyn AdSdk>>;

    /// Inject the SDK script and resolve on its load event
    async fn inject_script(&self, src: &Url) -> std::result::Result<(), String>;
}

/// Loads the ad SDK once per page
pub struct SdkLoader {
    provider: Arc<dyn AdSdkProvider>,
    script_url: Url,
    /// Serializes injection so concurrent placements share one script
    injection: Arc<Mutex<()>>,
    injections: AtomicUsize,
}

impl SdkLoader {
    /// Create a loader for the given provider and script reference
    pub fn new(provider: Arc<dyn AdSdkProvider>, script_url: Url) -> Self {
        Self {
            provider,
            script_url,
            injection: Arc::new(Mutex::new(())),
            injections: AtomicUsize::new(0),
        }
    }

    /// Script this loader injects
    pub fn script_url(&self) -> &Url {
        &self.script_url
    }

    /// Whether the SDK capability is already present
    pub fn is_loaded(&self) -> bool {
        self.provider.capability().is_some()
    }

    /// Number of script injections this loader performed
    pub fn injections(&self) -> usize {
        self.injections.load(Ordering::SeqCst)
    }

    /// Resolve once the SDK capability is present, injecting the script if needed
    #[instrument(skip(self), fields(script = %self.script_url))]
    pub async fn ensure_loaded(&self) -> Result<Arc<dyn AdSdk>> {
        if let Some(sdk) = self.provider.capability() {
            debug!("Ad SDK already present");
            return Ok(sdk);
        }

        let guard = self.injection.clone().lock_owned().await;

        // Another placement may have finished loading while we waited
        if let Some(sdk) = self.provider.capability() {
            debug!("Ad SDK loaded by concurrent placement");
            return Ok(sdk);
        }

        self.injections.fetch_add(1, Ordering::SeqCst);
        info!("Injecting ad SDK script");

        // The script keeps loading if this caller goes away, so the load owns the lock
        let provider = self.provider.clone();
        let src = self.script_url.clone();
        let load = tokio::spawn(async move {
            let _guard = guard;
            provider.inject_script(&src).await
        });

        match load.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "Ad SDK script failed to load");
                return Err(Error::SdkLoad(e));
            }
            Err(e) => return Err(Error::Internal(format!("script load task failed: {e}"))),
        }

        match self.provider.capability() {
            Some(sdk) => {
                info!(version = %sdk.version(), "Ad SDK loaded");
                Ok(sdk)
            }
            None => Err(Error::SdkLoad(
                "script loaded but SDK capability is missing".into(),
            )),
        }
    }
}
